//! C7 — the peer manager actor: a single mailbox, single consumer that
//! serializes all state mutation and dispatches to C2–C6.

use std::net::SocketAddr;
use std::sync::Arc;

use bitcoin::network::address::Address;
use bitcoin::network::constants::ServiceFlags;
use bitcoin::network::message::NetworkMessage;
use bitcoin::network::message_network::VersionMessage;
use tokio::sync::mpsc;
use tokio::task::Id as TaskId;
use tracing::{debug, info, warn};

use crate::client::config::Config;
use crate::common::time::{LocalDuration, LocalTime};
use crate::fsm::discovery::{self, KnownAddresses, Source};
use crate::fsm::error::PeerException;
use crate::fsm::events::{PeerConnected, PeerDisconnected, PeerMessage};
use crate::fsm::handshake::{self, Outcome as HandshakeOutcome};
use crate::fsm::liveness::{self, LivenessConfig, Outcome as LivenessOutcome};
use crate::fsm::registry::{OnlinePeer, Registry};
use crate::net::peer::{self, Mailbox, PeerOutbound};
use crate::net::supervisor::Supervisor;

/// Our advertised protocol version (§6.3).
pub const PROTOCOL_VERSION: u32 = 70012;

/// Messages accepted by the manager's mailbox (§4.7).
pub enum ManagerMessage {
    Best(u32),
    Connect(SocketAddr),
    PeerVersion(Mailbox, VersionMessage),
    PeerVerAck(Mailbox),
    PeerPing(Mailbox, u64),
    PeerPong(Mailbox, u64),
    PeerAddrs(Mailbox, Vec<(u32, Address)>),
    PeerTickle(Mailbox),
    PeerMessage(SocketAddr, NetworkMessage),
    CheckPeer(Mailbox),
    PeerDied(TaskId, Option<PeerException>),
}

/// A cloneable sender onto the manager's mailbox; every external entry
/// point in §6.2 is a thin wrapper converting a call into a message here.
#[derive(Clone)]
pub struct ManagerHandle {
    tx: mpsc::UnboundedSender<ManagerMessage>,
}

impl ManagerHandle {
    pub(crate) fn send(&self, msg: ManagerMessage) {
        let _ = self.tx.send(msg);
    }

    pub fn manager_best(&self, height: u32) {
        self.send(ManagerMessage::Best(height));
    }

    pub fn manager_connect(&self, addr: SocketAddr) {
        self.send(ManagerMessage::Connect(addr));
    }

    pub fn manager_version(&self, peer: Mailbox, version: VersionMessage) {
        self.send(ManagerMessage::PeerVersion(peer, version));
    }

    pub fn manager_ver_ack(&self, peer: Mailbox) {
        self.send(ManagerMessage::PeerVerAck(peer));
    }

    pub fn manager_ping(&self, peer: Mailbox, nonce: u64) {
        self.send(ManagerMessage::PeerPing(peer, nonce));
    }

    pub fn manager_pong(&self, peer: Mailbox, nonce: u64) {
        self.send(ManagerMessage::PeerPong(peer, nonce));
    }

    pub fn manager_addrs(&self, peer: Mailbox, addrs: Vec<(u32, Address)>) {
        self.send(ManagerMessage::PeerAddrs(peer, addrs));
    }

    pub fn manager_tickle(&self, peer: Mailbox) {
        self.send(ManagerMessage::PeerTickle(peer));
    }

    pub fn manager_check(&self, peer: Mailbox) {
        self.send(ManagerMessage::CheckPeer(peer));
    }

    pub(crate) fn manager_message(&self, addr: SocketAddr, message: NetworkMessage) {
        self.send(ManagerMessage::PeerMessage(addr, message));
    }
}

/// Build a fresh, unconnected handle/inbox pair.
pub fn channel() -> (ManagerHandle, mpsc::UnboundedReceiver<ManagerMessage>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ManagerHandle { tx }, rx)
}

pub struct PeerManager {
    inbox: mpsc::UnboundedReceiver<ManagerMessage>,
    handle: ManagerHandle,
    registry: Arc<Registry>,
    known: Arc<KnownAddresses>,
    supervisor: Supervisor,
    config: Config,
    liveness: LivenessConfig,
    max_life: LocalDuration,
    best_block: Option<u32>,
    rng: fastrand::Rng,
}

impl PeerManager {
    pub fn new(
        inbox: mpsc::UnboundedReceiver<ManagerMessage>,
        handle: ManagerHandle,
        registry: Arc<Registry>,
        known: Arc<KnownAddresses>,
        supervisor: Supervisor,
        config: Config,
        rng: fastrand::Rng,
    ) -> Self {
        let liveness = LivenessConfig {
            timeout: config.timeout.into(),
        };
        let max_life = config.max_life.into();

        Self {
            inbox,
            handle,
            registry,
            known,
            supervisor,
            config,
            liveness,
            max_life,
            best_block: None,
            rng,
        }
    }

    pub fn handle(&self) -> ManagerHandle {
        self.handle.clone()
    }

    /// Runs until the mailbox closes. The first receive is a match-only
    /// filter for `ManagerBest`, per §4.7 — anything else arriving before
    /// it is dropped, since `best_height` must be known before any
    /// `version` can be built.
    pub async fn run(mut self) {
        loop {
            match self.inbox.recv().await {
                Some(ManagerMessage::Best(height)) => {
                    self.best_block = Some(height);
                    break;
                }
                Some(_) => continue,
                None => return,
            }
        }

        while let Some(msg) = self.inbox.recv().await {
            self.handle_message(msg).await;
        }
    }

    async fn handle_message(&mut self, msg: ManagerMessage) {
        match msg {
            ManagerMessage::Best(height) => self.best_block = Some(height),
            ManagerMessage::Connect(addr) => self.connect(addr).await,
            ManagerMessage::PeerVersion(peer, version) => {
                self.apply_handshake(&peer, handshake::on_version(&self.registry, &peer, version))
                    .await;
            }
            ManagerMessage::PeerVerAck(peer) => {
                let outcome = handshake::on_verack(&self.registry, &peer);
                self.apply_handshake(&peer, outcome).await;
            }
            ManagerMessage::PeerPing(peer, nonce) => {
                peer.send(PeerOutbound::Send(NetworkMessage::Pong(nonce)));
            }
            ManagerMessage::PeerPong(peer, nonce) => {
                liveness::on_pong(&self.registry, &peer, nonce, LocalTime::now());
            }
            ManagerMessage::PeerAddrs(peer, addrs) => self.receive_addrs(&peer, addrs),
            ManagerMessage::PeerTickle(peer) => {
                liveness::tickle(&self.registry, &peer, LocalTime::now());
            }
            ManagerMessage::PeerMessage(addr, message) => {
                self.config
                    .events
                    .send(PeerMessage { peer: addr, message })
                    .await;
            }
            ManagerMessage::CheckPeer(peer) => self.check_peer(&peer).await,
            ManagerMessage::PeerDied(task, err) => self.peer_died(task, err).await,
        }
    }

    async fn apply_handshake(&mut self, peer: &Mailbox, outcome: HandshakeOutcome) {
        match outcome {
            HandshakeOutcome::NoOp => {}
            HandshakeOutcome::Announce => self.announce(peer).await,
            HandshakeOutcome::Kill(reason) => self.kill_peer(peer, reason),
        }
    }

    /// §3.2-4 / §4.7: publishes `PeerConnected` iff `connected` is true now
    /// and the event hasn't fired before. Idempotent across the two
    /// possible handshake arrival orders.
    async fn announce(&mut self, peer: &Mailbox) {
        let mut should_announce = None;
        self.registry.modify(peer, |p| {
            if p.connected() && !p.announced {
                p.announced = true;
                should_announce = Some(p.clone());
            }
        });

        if let Some(p) = should_announce {
            let version = p.peer_version.expect("connected implies peer_version");
            info!(address = %p.address, "peer connected");
            self.config
                .events
                .send(PeerConnected {
                    peer: p.address,
                    user_agent: version.user_agent,
                    start_height: version.start_height,
                })
                .await;
        }
    }

    /// §4.6 `Connect(addr)`.
    async fn connect(&mut self, addr: SocketAddr) {
        if self.registry.find_by_address(&addr).is_some() {
            debug!(%addr, "already online, dropping duplicate connect");
            return;
        }

        let now = LocalTime::now();
        let nonce = self.rng.u64(..);
        let jitter = 0.75 + self.rng.f64() * 0.25;
        let disconnect_at = now + self.max_life * jitter;

        let (mailbox, task) = peer::spawn(self.config.connect.clone(), addr, self.handle.clone());
        let task_id = self.supervisor.spawn_peer(task);

        self.registry.insert(OnlinePeer::new(
            addr, mailbox.clone(), task_id, nonce, now, disconnect_at,
        ));

        let version = self.version(addr, nonce);
        mailbox.send(PeerOutbound::Send(NetworkMessage::Version(version)));

        self.spawn_liveness_ticker(mailbox);
    }

    /// Our outbound `version` (§6.3).
    fn version(&self, remote: SocketAddr, nonce: u64) -> VersionMessage {
        let services = self.config.network.local_services();
        let receiver_services = if self.config.network.segwit {
            ServiceFlags::WITNESS
        } else {
            ServiceFlags::NONE
        };

        VersionMessage {
            version: PROTOCOL_VERSION,
            services,
            timestamp: LocalTime::now().as_secs() as i64,
            receiver: Address::new(&remote, receiver_services),
            sender: Address::new(&self.config.local_net_addr, services),
            nonce,
            user_agent: self.config.network.user_agent.to_string(),
            start_height: self.best_block.unwrap_or(0) as i32,
            relay: true,
        }
    }

    fn spawn_liveness_ticker(&self, mailbox: Mailbox) {
        let handle = self.handle.clone();
        let liveness = self.liveness;
        let rng = self.rng.clone();

        self.supervisor.spawn_background(async move {
            loop {
                let delay = liveness::next_check_delay(&liveness, &rng);
                tokio::time::sleep(delay.into()).await;
                handle.manager_check(mailbox.clone());
            }
        });
    }

    async fn check_peer(&mut self, peer: &Mailbox) {
        match liveness::check_peer(&self.registry, peer, LocalTime::now(), &self.liveness, &self.rng) {
            LivenessOutcome::NoOp => {}
            LivenessOutcome::IssuePing(nonce) => {
                peer.send(PeerOutbound::Send(NetworkMessage::Ping(nonce)));
            }
            LivenessOutcome::Kill(reason) => self.kill_peer(peer, reason),
        }
    }

    fn receive_addrs(&mut self, peer: &Mailbox, addrs: Vec<(u32, Address)>) {
        if !self.config.discover {
            return;
        }
        let Some(record) = self.registry.find_by_mailbox(peer) else {
            return;
        };
        if !record.connected() {
            return;
        }

        let endpoints = discovery::addrs_from_gossip(addrs);
        let fresh: Vec<_> = endpoints
            .into_iter()
            .filter(|addr| self.registry.find_by_address(addr).is_none())
            .collect();

        self.known.insert_many(fresh, Source::Peer(record.address));
    }

    /// §7: the manager signals the peer task to terminate; the supervisor
    /// delivers `PeerDied` once it actually exits.
    fn kill_peer(&mut self, peer: &Mailbox, reason: PeerException) {
        warn!(?reason, "killing peer");
        peer.send(PeerOutbound::Shutdown);
    }

    /// §4.7 `PeerDied`.
    async fn peer_died(&mut self, task: TaskId, err: Option<PeerException>) {
        let Some(removed) = self.registry.remove_by_task(task) else {
            return;
        };

        if let Some(err) = &err {
            warn!(address = %removed.address, %err, "peer task ended");
        } else {
            debug!(address = %removed.address, "peer task ended");
        }

        if removed.connected() {
            self.config
                .events
                .send(PeerDisconnected {
                    peer: removed.address,
                })
                .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    use event_bus::EventBus;

    use crate::client::config::Config;
    use crate::client::mocks::{MockConnection, MockDialer};
    use crate::common::network::NetworkParams;
    use crate::net::peer::PeerConnection;

    fn test_config(dialer: Arc<dyn peer::Dialer>) -> Config {
        let mut events = EventBus::default();
        events.register::<PeerConnected>(None);
        events.register::<PeerDisconnected>(None);
        events.register::<PeerMessage>(None);

        Config {
            max_peers: 8,
            static_peers: vec![],
            discover: false,
            local_net_addr: "127.0.0.1:8333".parse().unwrap(),
            network: NetworkParams::for_chain(bitcoin::Network::Regtest),
            timeout: Duration::from_secs(3600),
            max_life: Duration::from_secs(3600),
            connect: dialer,
            events,
        }
    }

    /// Cooperatively drains the current-thread runtime until `cond` holds,
    /// bailing out after a bounded number of yields rather than looping
    /// forever if the expected state never arrives.
    async fn wait_until(mut cond: impl FnMut() -> bool) {
        for _ in 0..1000 {
            if cond() {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("condition never became true");
    }

    #[tokio::test]
    async fn connect_registers_peer_sends_version_and_cleans_up_on_death() {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let sent_in_dialer = sent.clone();

        let mut dialer = MockDialer::new();
        dialer.expect_connect().returning(move |_addr| {
            let sent = sent_in_dialer.clone();
            let mut conn = MockConnection::new();
            conn.expect_send().returning(move |msg| {
                sent.lock().unwrap().push(msg);
                Ok(())
            });
            conn.expect_recv().returning(|| Ok(None));
            Ok(Box::new(conn) as Box<dyn PeerConnection>)
        });

        let config = test_config(Arc::new(dialer));
        let (manager_handle, inbox) = channel();
        let registry = Arc::new(Registry::new());
        let known = Arc::new(KnownAddresses::new(fastrand::Rng::new()));
        let supervisor = Supervisor::new(manager_handle.clone());

        let pm = PeerManager::new(
            inbox,
            manager_handle.clone(),
            registry.clone(),
            known,
            supervisor,
            config,
            fastrand::Rng::new(),
        );
        tokio::spawn(pm.run());

        manager_handle.manager_best(500);

        let addr: SocketAddr = "1.2.3.4:8333".parse().unwrap();
        manager_handle.manager_connect(addr);

        wait_until(|| registry.len() == 1).await;
        assert_eq!(registry.find_by_address(&addr).unwrap().address, addr);

        wait_until(|| !sent.lock().unwrap().is_empty()).await;
        assert!(matches!(
            sent.lock().unwrap().first(),
            Some(NetworkMessage::Version(_))
        ));

        // The mock connection's `recv` returns `Ok(None)` immediately, so
        // the peer task exits cleanly and the supervisor reports its death.
        wait_until(|| registry.is_empty()).await;
    }

    #[tokio::test]
    async fn duplicate_connect_to_an_online_address_is_dropped() {
        let attempts = Arc::new(Mutex::new(0));
        let attempts_in_dialer = attempts.clone();

        let mut dialer = MockDialer::new();
        dialer.expect_connect().returning(move |_addr| {
            *attempts_in_dialer.lock().unwrap() += 1;
            let mut conn = MockConnection::new();
            conn.expect_send().returning(|_| Ok(()));
            conn.expect_recv().returning(|| Ok(None));
            Ok(Box::new(conn) as Box<dyn PeerConnection>)
        });

        let config = test_config(Arc::new(dialer));
        let (manager_handle, inbox) = channel();
        let registry = Arc::new(Registry::new());
        let known = Arc::new(KnownAddresses::new(fastrand::Rng::new()));
        let supervisor = Supervisor::new(manager_handle.clone());

        let pm = PeerManager::new(
            inbox,
            manager_handle.clone(),
            registry.clone(),
            known,
            supervisor,
            config,
            fastrand::Rng::new(),
        );
        tokio::spawn(pm.run());

        manager_handle.manager_best(0);

        // Both `Connect` messages are enqueued before the actor task is
        // ever polled, so the mailbox delivers them in this order: the
        // actor's own `connect()` handler has no internal await point, so
        // it registers the first and rejects the second as a duplicate
        // before the newly spawned peer task gets a chance to run (let
        // alone die and report back).
        let addr: SocketAddr = "5.6.7.8:8333".parse().unwrap();
        manager_handle.manager_connect(addr);
        manager_handle.manager_connect(addr);

        wait_until(|| *attempts.lock().unwrap() >= 1).await;
        assert_eq!(registry.len(), 1);
        assert_eq!(*attempts.lock().unwrap(), 1);
    }
}
