//! Events published on the shared [`event_bus::EventBus`]: peer lifecycle
//! transitions, and the raw `(peer, message)` stream for upstream
//! consumers (sync logic, inventory relay, ...).

use std::net::SocketAddr;

use bitcoin::network::message::NetworkMessage;
use event_bus::Event;

#[derive(Debug, Clone, Event)]
pub struct PeerConnected {
    pub peer: SocketAddr,
    pub user_agent: String,
    pub start_height: i32,
}

#[derive(Debug, Clone, Event)]
pub struct PeerDisconnected {
    pub peer: SocketAddr,
}

#[derive(Clone, Event)]
pub struct PeerMessage {
    pub peer: SocketAddr,
    pub message: NetworkMessage,
}
