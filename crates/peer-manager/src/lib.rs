//! Peer-connection manager for a Bitcoin-family P2P node: discovers peer
//! addresses, opens outbound connections, performs the handshake, tracks
//! per-peer liveness, and multiplexes inbound protocol messages to
//! observers. See `client::with_peer_manager` for the entry point.
#![allow(clippy::type_complexity)]

pub mod client;
pub mod common;
pub mod fsm;
pub mod net;
