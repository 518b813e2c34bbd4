use std::time::Duration;

use event_bus::EventBus;
use tokio::select;
use tokio::sync::OnceCell;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

use yuv_p2p::client::{self, Handle};
use yuv_p2p::fsm::events::{PeerConnected, PeerDisconnected};

use crate::config::NodeConfig;

/// The limit of time to wait for the node to shut down.
const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 30;

/// Wraps the peer manager with the event-bus registration and signal
/// handling an embedding node needs around it.
pub struct Node {
    config: NodeConfig,
    event_bus: EventBus,
    p2p: OnceCell<Handle>,

    cancellation: CancellationToken,
    pub(crate) task_tracker: TaskTracker,
}

impl Node {
    pub async fn new(config: NodeConfig) -> eyre::Result<Self> {
        Ok(Self {
            config,
            event_bus: Self::init_event_bus(),
            p2p: OnceCell::new(),
            cancellation: CancellationToken::new(),
            task_tracker: TaskTracker::new(),
        })
    }

    /// Wait for the signal from any node's service about the cancellation.
    pub async fn cancelled(&self) {
        self.cancellation.cancelled().await
    }

    pub async fn run(&self) -> eyre::Result<()> {
        let manager_config = self
            .config
            .p2p
            .to_manager_config(self.config.network, self.event_bus.clone())?;

        let handle = client::with_peer_manager(manager_config, 0, fastrand::Rng::new());
        self.spawn_event_logger();
        self.p2p
            .set(handle)
            .unwrap_or_else(|_| unreachable!("run is only called once"));

        self.task_tracker.close();

        Ok(())
    }

    fn spawn_event_logger(&self) {
        let connected = self.event_bus.subscribe::<PeerConnected>();
        self.task_tracker.spawn(async move {
            while let Ok(event) = connected.recv().await {
                info!(peer = %event.peer, agent = %event.user_agent, height = event.start_height, "peer connected");
            }
        });

        let disconnected = self.event_bus.subscribe::<PeerDisconnected>();
        self.task_tracker.spawn(async move {
            while let Ok(event) = disconnected.recv().await {
                warn!(peer = %event.peer, "peer disconnected");
            }
        });
    }

    fn init_event_bus() -> EventBus {
        let mut event_bus = EventBus::default();
        event_bus.register::<PeerConnected>(None);
        event_bus.register::<PeerDisconnected>(None);
        event_bus.register::<yuv_p2p::fsm::events::PeerMessage>(None);

        event_bus
    }

    pub async fn shutdown(&self) {
        info!("Shutting down node, finishing received requests...");

        self.cancellation.cancel();
        if let Some(p2p) = self.p2p.get() {
            p2p.shutdown().await;
        }

        let timeout = self
            .config
            .shutdown_timeout
            .unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT_SECS);

        select! {
            // Wait until all tasks are finished
            _ = self.task_tracker.wait() => {},
            // Or wait for and exit by timeout
            _ = sleep(Duration::from_secs(timeout)) => {
                info!("Shutdown timeout reached, exiting...");
            },
        }
    }
}
