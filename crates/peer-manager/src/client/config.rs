//! External configuration surface (§6.1).

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use event_bus::EventBus;

use crate::common::network::NetworkParams;
use crate::net::peer::Dialer;

/// Configuration for [`crate::client::with_peer_manager`].
///
/// `events` carries both the `PeerConnected`/`PeerDisconnected` lifecycle
/// events and the raw `(peer, message)` stream upstream consumers observe
/// — the spec's separate `events`/`messages` publishers are, in this
/// implementation, two event types registered on one shared bus rather
/// than two distinct handles; see `DESIGN.md`.
#[derive(Clone)]
pub struct Config {
    /// Target concurrent `OnlinePeers` count.
    pub max_peers: usize,
    /// `host:port` strings, pre-resolved at start via the address resolver.
    pub static_peers: Vec<String>,
    /// Enable DNS seed resolution and gossip-learned addresses.
    pub discover: bool,
    /// Local address advertised as `addr_send` in our outbound `version`.
    pub local_net_addr: SocketAddr,
    /// Network descriptor: magic, seeds, default port, user agent, segwit.
    pub network: NetworkParams,
    /// Idle threshold before pinging; also the liveness tick-period basis.
    pub timeout: Duration,
    /// Upper bound on a connection's lifetime (jittered by `x U[0.75,1.0]`).
    pub max_life: Duration,
    /// Factory producing an outbound connection for a socket endpoint.
    pub connect: Arc<dyn Dialer>,
    /// Shared bus for `PeerConnected`/`PeerDisconnected`/`PeerMessage`.
    pub events: EventBus,
}
