//! Public entry point: [`with_peer_manager`] wires together the registry
//! (C2), the actor (C7), the connect loop (C6) and its supervised peer
//! tasks, and returns a [`Handle`] the embedding application drives and
//! observes through (§6.2).

mod config;
pub use config::Config;

use std::ops::Deref;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::common::resolver;
use crate::fsm::connect::{self, ConnectConfig};
use crate::fsm::discovery::KnownAddresses;
use crate::fsm::manager::{self, ManagerHandle, PeerManager};
use crate::fsm::registry::{OnlinePeer, Registry};
use crate::net::peer::Mailbox;
use crate::net::supervisor::Supervisor;

/// A running peer manager: the actor task, its connect loop, and every
/// peer task they spawn are all children of the embedded [`Supervisor`].
/// Dropping a `Handle` does not stop them — call [`Handle::shutdown`].
pub struct Handle {
    manager: ManagerHandle,
    registry: Arc<Registry>,
    known: Arc<KnownAddresses>,
    supervisor: Supervisor,
    cancellation: CancellationToken,
}

/// Every inbound call forwards to the manager's mailbox, so a `Handle`
/// exposes `manager_connect`, `manager_version`, ... directly (§6.2).
impl Deref for Handle {
    type Target = ManagerHandle;

    fn deref(&self) -> &Self::Target {
        &self.manager
    }
}

impl Handle {
    /// Number of endpoints currently waiting to be dialed.
    pub fn known_addresses(&self) -> usize {
        self.known.len()
    }

    /// Stop the connect loop and tear down every supervised child,
    /// including in-flight peer tasks. No new dials are initiated once
    /// cancellation is observed; in-flight `PeerDied` notifications still
    /// reach the actor before teardown completes (§5).
    pub async fn shutdown(&self) {
        self.cancellation.cancel();
        self.supervisor.shutdown().await;
    }
}

/// `get_peers(mgr)` (§6.2): connected peers only, sorted by median ping.
pub fn get_peers(mgr: &Handle) -> Vec<OnlinePeer> {
    mgr.registry.connected_snapshot()
}

/// `get_online_peer(mailbox, mgr)` (§6.2): lookup by identity, connected
/// or not.
pub fn get_online_peer(mailbox: &Mailbox, mgr: &Handle) -> Option<OnlinePeer> {
    mgr.registry.find_by_mailbox(mailbox)
}

/// Start the peer manager: spawns the actor (C7) and the connect loop
/// (C6) as supervised background tasks, seeds `best_block` (required
/// before the actor leaves its match-only filter, §4.7), and returns a
/// [`Handle`] for the embedder to observe and eventually shut down.
pub fn with_peer_manager(config: Config, best_block: u32, rng: fastrand::Rng) -> Handle {
    let (manager_handle, inbox) = manager::channel();
    let registry = Arc::new(Registry::new());
    let known = Arc::new(KnownAddresses::new(rng.clone()));
    let supervisor = Supervisor::new(manager_handle.clone());
    let cancellation = CancellationToken::new();

    let peer_manager = PeerManager::new(
        inbox,
        manager_handle.clone(),
        registry.clone(),
        known.clone(),
        supervisor.clone(),
        config.clone(),
        rng.clone(),
    );
    supervisor.spawn_background(peer_manager.run());
    manager_handle.manager_best(best_block);

    let connect_config = ConnectConfig {
        max_peers: config.max_peers,
        discover: config.discover,
        static_peers: config.static_peers,
        network: config.network,
    };
    let dns = resolver::default_resolver();
    supervisor.spawn_background(connect::run(
        manager_handle.clone(),
        registry.clone(),
        known.clone(),
        dns,
        connect_config,
        rng,
        cancellation.clone(),
    ));

    Handle {
        manager: manager_handle,
        registry,
        known,
        supervisor,
        cancellation,
    }
}

#[cfg(any(test, feature = "mocks"))]
pub mod mocks {
    use std::net::SocketAddr;

    use async_trait::async_trait;
    use bitcoin::network::message::NetworkMessage;

    use crate::net::peer::{Dialer, PeerConnection};

    mockall::mock! {
        pub Connection {}

        #[async_trait]
        impl PeerConnection for Connection {
            async fn send(&mut self, message: NetworkMessage) -> std::io::Result<()>;
            async fn recv(&mut self) -> std::io::Result<Option<NetworkMessage>>;
        }
    }

    mockall::mock! {
        pub Dialer {}

        #[async_trait]
        impl Dialer for Dialer {
            async fn connect(&self, addr: SocketAddr) -> std::io::Result<Box<dyn PeerConnection>>;
        }
    }
}
