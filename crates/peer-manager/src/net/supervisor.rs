//! Tracks every spawned child task (peer tasks, the connect loop, per-peer
//! liveness tickers) and, on any child's completion, posts a `PeerDied`
//! message back to the manager so cleanup always happens through the
//! single-consumer mailbox.

use std::future::Future;

use tokio_util::task::TaskTracker;

use crate::fsm::error::PeerException;
use crate::fsm::manager::{ManagerHandle, ManagerMessage};

#[derive(Clone)]
pub struct Supervisor {
    handle: ManagerHandle,
    tracker: TaskTracker,
}

impl Supervisor {
    pub fn new(handle: ManagerHandle) -> Self {
        Self {
            handle,
            tracker: TaskTracker::new(),
        }
    }

    /// Spawn a peer task, wiring up its death notification. Returns the
    /// task's stable identity for the registry.
    pub fn spawn_peer<F>(&self, fut: F) -> tokio::task::Id
    where
        F: Future<Output = Option<PeerException>> + Send + 'static,
    {
        let join = self.tracker.spawn(fut);
        let id = join.id();
        let handle = self.handle.clone();

        self.tracker.spawn(async move {
            let outcome = join.await.unwrap_or(None);
            handle.send(ManagerMessage::PeerDied(id, outcome));
        });

        id
    }

    /// Spawn a background task (connect loop, liveness ticker) that isn't
    /// itself tracked in the registry.
    pub fn spawn_background<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tracker.spawn(fut);
    }

    /// Stop accepting new tasks and wait for every tracked task to finish.
    pub async fn shutdown(&self) {
        self.tracker.close();
        self.tracker.wait().await;
    }
}
