use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

use bitcoin::Network;
use event_bus::EventBus;
use eyre::{Context, OptionExt};
use serde::{Deserialize, Serialize};
use yuv_p2p::client::Config as ManagerConfig;
use yuv_p2p::common::network::NetworkParams;
use yuv_p2p::net::codec::TcpDialer;

/// Default number of peers this node keeps connected.
pub const DEFAULT_MAX_PEERS: usize = 8;

/// Default idle threshold, in seconds, before a quiet peer gets pinged.
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Default upper bound, in seconds, on a single connection's lifetime.
pub const DEFAULT_MAX_LIFE_SECS: u64 = 60 * 60 * 24;

#[derive(Serialize, Deserialize, Clone)]
pub struct P2pConfig {
    /// Local address advertised to peers as our own.
    pub address: String,
    /// Target number of concurrently connected peers.
    #[serde(default = "default_max_peers")]
    pub max_peers: usize,
    /// `host:port` peers dialed before anything else.
    #[serde(default)]
    pub bootnodes: Vec<String>,
    /// Enable DNS-seed resolution and gossip-learned addresses.
    #[serde(default)]
    pub discover: bool,
    /// Idle threshold, in seconds, before pinging a quiet peer.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Upper bound, in seconds, on a connection's lifetime.
    #[serde(default = "default_max_life_secs")]
    pub max_life_secs: u64,
}

fn default_max_peers() -> usize {
    DEFAULT_MAX_PEERS
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_max_life_secs() -> u64 {
    DEFAULT_MAX_LIFE_SECS
}

impl P2pConfig {
    pub fn to_manager_config(&self, network: Network, events: EventBus) -> eyre::Result<ManagerConfig> {
        let local_net_addr: SocketAddr = self
            .address
            .to_socket_addrs()
            .wrap_err("failed to resolve local p2p address")?
            .next()
            .ok_or_eyre("no address found in local p2p address")?;

        let network = NetworkParams::for_chain(network);
        let dialer = Arc::new(TcpDialer::new(network.magic()));

        Ok(ManagerConfig {
            max_peers: self.max_peers,
            static_peers: self.bootnodes.clone(),
            discover: self.discover,
            local_net_addr,
            network,
            timeout: Duration::from_secs(self.timeout_secs),
            max_life: Duration::from_secs(self.max_life_secs),
            connect: dialer,
            events,
        })
    }
}
