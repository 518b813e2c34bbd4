//! C2 — the online-peer registry: a transactional, in-memory store of
//! per-peer handshake and liveness state, with mailbox/task/address-keyed
//! lookup and a sorted-by-median-ping view invariant.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Mutex;

use bitcoin::network::message_network::VersionMessage;
use tokio::task::Id as TaskId;

use crate::common::time::{LocalDuration, LocalTime};
use crate::net::peer::Mailbox;

/// Peers without any recorded ping are sorted as if they had this latency.
const DEFAULT_PING: LocalDuration = LocalDuration::from_secs(60);
/// Most-recent round-trip times kept per peer.
const MAX_PINGS: usize = 11;

/// One peer task's manager-side record.
#[derive(Clone)]
pub struct OnlinePeer {
    pub address: SocketAddr,
    pub mailbox: Mailbox,
    pub task: TaskId,
    pub nonce: u64,
    pub verack_received: bool,
    pub peer_version: Option<VersionMessage>,
    pub pings: VecDeque<LocalDuration>,
    pub outstanding_ping: Option<(LocalTime, u64)>,
    pub connect_time: LocalTime,
    pub tickled_at: LocalTime,
    pub disconnect_at: LocalTime,
    /// Set while the peer task is still completing its initial I/O (before
    /// it has sent anything observable); the liveness monitor skips it.
    pub busy: bool,
    /// Whether `PeerConnected` has already been published for this peer.
    pub(crate) announced: bool,
}

impl OnlinePeer {
    pub fn new(
        address: SocketAddr,
        mailbox: Mailbox,
        task: TaskId,
        nonce: u64,
        now: LocalTime,
        disconnect_at: LocalTime,
    ) -> Self {
        Self {
            address,
            mailbox,
            task,
            nonce,
            verack_received: false,
            peer_version: None,
            pings: VecDeque::new(),
            outstanding_ping: None,
            connect_time: now,
            tickled_at: now,
            disconnect_at,
            busy: true,
            announced: false,
        }
    }

    /// Derived invariant: §3.2(2).
    pub fn connected(&self) -> bool {
        self.verack_received && self.peer_version.is_some()
    }

    /// Median of the most recent round-trip times, or [`DEFAULT_PING`] if
    /// none have been recorded yet. `pings` is kept in recency order
    /// (newest first); this sorts a scratch copy ascending to find it.
    pub fn median_ping(&self) -> LocalDuration {
        if self.pings.is_empty() {
            return DEFAULT_PING;
        }
        let mut sorted: Vec<_> = self.pings.iter().copied().collect();
        sorted.sort_unstable();
        sorted[sorted.len() / 2]
    }

    /// Record a round-trip time, prepending it and evicting the oldest
    /// entry once there are more than [`MAX_PINGS`] (§4.4: "prepend to
    /// pings, keep first 11" — eviction is by recency, never by value).
    pub fn record_ping(&mut self, rtt: LocalDuration) {
        self.pings.push_front(rtt);
        self.pings.truncate(MAX_PINGS);
    }
}

/// The transactional peer container. All operations take a short critical
/// section under a single mutex; none are held across an `.await`.
#[derive(Default)]
pub struct Registry {
    peers: Mutex<Vec<OnlinePeer>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.peers.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn find_by_mailbox(&self, mailbox: &Mailbox) -> Option<OnlinePeer> {
        self.peers
            .lock()
            .unwrap()
            .iter()
            .find(|p| &p.mailbox == mailbox)
            .cloned()
    }

    pub fn find_by_task(&self, task: TaskId) -> Option<OnlinePeer> {
        self.peers
            .lock()
            .unwrap()
            .iter()
            .find(|p| p.task == task)
            .cloned()
    }

    pub fn find_by_address(&self, address: &SocketAddr) -> Option<OnlinePeer> {
        self.peers
            .lock()
            .unwrap()
            .iter()
            .find(|p| &p.address == address)
            .cloned()
    }

    /// Insert `peer`, replacing any existing entry with the same mailbox,
    /// then re-sort and de-duplicate per the view invariant (§3.2-3).
    pub fn insert(&self, peer: OnlinePeer) {
        let mut peers = self.peers.lock().unwrap();
        peers.retain(|p| p.mailbox != peer.mailbox);
        peers.push(peer);
        sort_and_dedup(&mut peers);
    }

    /// No-op if `mailbox` is absent; otherwise applies `f` to the entry and
    /// reinserts it.
    pub fn modify(&self, mailbox: &Mailbox, f: impl FnOnce(&mut OnlinePeer)) {
        let mut peers = self.peers.lock().unwrap();
        if let Some(peer) = peers.iter_mut().find(|p| &p.mailbox == mailbox) {
            f(peer);
        }
        sort_and_dedup(&mut peers);
    }

    /// Removes every entry with the given mailbox (at most one, by
    /// invariant §3.2-1), returning it.
    pub fn remove(&self, mailbox: &Mailbox) -> Option<OnlinePeer> {
        let mut peers = self.peers.lock().unwrap();
        let before = peers.len();
        let removed = peers.iter().find(|p| &p.mailbox == mailbox).cloned();
        peers.retain(|p| &p.mailbox != mailbox);
        debug_assert!(peers.len() <= before);
        removed
    }

    pub fn remove_by_task(&self, task: TaskId) -> Option<OnlinePeer> {
        let mut peers = self.peers.lock().unwrap();
        let removed = peers.iter().find(|p| p.task == task).cloned();
        peers.retain(|p| p.task != task);
        removed
    }

    /// Sorted-by-median-ping, de-duplicated view of all peers (§3.2-3).
    pub fn snapshot(&self) -> Vec<OnlinePeer> {
        self.peers.lock().unwrap().clone()
    }

    /// Connected peers only, sorted-by-median-ping (§6.2 `get_peers`).
    pub fn connected_snapshot(&self) -> Vec<OnlinePeer> {
        self.peers
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.connected())
            .cloned()
            .collect()
    }
}

fn sort_and_dedup(peers: &mut Vec<OnlinePeer>) {
    let mut seen = std::collections::HashSet::new();
    peers.retain(|p| seen.insert(p.mailbox.id()));
    peers.sort_by_key(|p| p.median_ping());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(addr: &str, nonce: u64) -> OnlinePeer {
        let (mailbox, _rx) = crate::net::peer::test_support::mailbox();
        OnlinePeer::new(
            addr.parse().unwrap(),
            mailbox,
            crate::net::peer::test_support::fake_task_id(),
            nonce,
            LocalTime::now(),
            LocalTime::now() + LocalDuration::from_secs(1000),
        )
    }

    #[test]
    fn insert_replaces_same_mailbox() {
        let registry = Registry::new();
        let mut p = peer("1.2.3.4:8333", 1);
        let mailbox = p.mailbox.clone();
        registry.insert(p.clone());
        p.nonce = 42;
        registry.insert(p);

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.find_by_mailbox(&mailbox).unwrap().nonce, 42);
    }

    #[test]
    fn view_is_sorted_by_median_ping_ascending() {
        let registry = Registry::new();

        let mut slow = peer("1.1.1.1:8333", 1);
        slow.record_ping(LocalDuration::from_millis(500));
        let mut fast = peer("2.2.2.2:8333", 2);
        fast.record_ping(LocalDuration::from_millis(10));
        let no_pings = peer("3.3.3.3:8333", 3);

        registry.insert(slow);
        registry.insert(fast.clone());
        registry.insert(no_pings);

        let snapshot = registry.snapshot();
        let ping_order: Vec<_> = snapshot.iter().map(|p| p.median_ping()).collect();
        let mut expected = ping_order.clone();
        expected.sort();
        assert_eq!(ping_order, expected);
        assert_eq!(snapshot[0].address, fast.address);
    }

    #[test]
    fn remove_by_task_only_removes_that_task() {
        let registry = Registry::new();
        let a = peer("1.1.1.1:8333", 1);
        let b = peer("2.2.2.2:8333", 2);
        let a_task = a.task;
        registry.insert(a);
        registry.insert(b);

        let removed = registry.remove_by_task(a_task).unwrap();
        assert_eq!(removed.address, "1.1.1.1:8333".parse().unwrap());
        assert_eq!(registry.len(), 1);
        assert!(registry.find_by_task(a_task).is_none());
    }

    #[test]
    fn modify_is_a_no_op_when_mailbox_absent() {
        let registry = Registry::new();
        let (unknown, _rx) = crate::net::peer::test_support::mailbox();
        registry.modify(&unknown, |p| p.verack_received = true);
        assert!(registry.is_empty());
    }

    #[test]
    fn connected_snapshot_excludes_unhandshaked_peers() {
        let registry = Registry::new();
        let mut connected = peer("1.1.1.1:8333", 1);
        connected.verack_received = true;
        connected.peer_version = Some(test_version());
        registry.insert(connected.clone());
        registry.insert(peer("2.2.2.2:8333", 2));

        let snapshot = registry.connected_snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].address, connected.address);
    }

    fn test_version() -> VersionMessage {
        use bitcoin::network::address::Address;
        use bitcoin::network::constants::ServiceFlags;

        let addr: SocketAddr = "127.0.0.1:8333".parse().unwrap();
        VersionMessage {
            version: 70015,
            services: ServiceFlags::NETWORK,
            timestamp: 0,
            receiver: Address::new(&addr, ServiceFlags::NONE),
            sender: Address::new(&addr, ServiceFlags::NONE),
            nonce: 0,
            user_agent: "/test/".into(),
            start_height: 0,
            relay: true,
        }
    }
}
