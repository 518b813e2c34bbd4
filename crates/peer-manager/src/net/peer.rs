//! The "Peer" actor's boundary: a [`Dialer`] produces a [`PeerConnection`],
//! and [`run`] is the per-peer task that relays wire traffic between that
//! connection and the manager's mailbox. The wire codec itself — framing,
//! encoding, the actual socket — is a collaborator supplied by the
//! embedding application, not implemented here.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bitcoin::network::message::NetworkMessage;
use tokio::sync::mpsc;

use crate::fsm::error::PeerException;
use crate::fsm::manager::ManagerHandle;

/// An established outbound connection to a peer.
#[async_trait]
pub trait PeerConnection: Send {
    async fn send(&mut self, message: NetworkMessage) -> std::io::Result<()>;

    /// Returns `Ok(None)` on a clean connection close.
    async fn recv(&mut self) -> std::io::Result<Option<NetworkMessage>>;
}

/// Factory producing an outbound connection for a socket endpoint.
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn connect(&self, addr: SocketAddr) -> std::io::Result<Box<dyn PeerConnection>>;
}

/// A command sent from the manager to a peer task's mailbox.
#[derive(Debug, Clone)]
pub enum PeerOutbound {
    Send(NetworkMessage),
    Shutdown,
}

static NEXT_MAILBOX_ID: AtomicU64 = AtomicU64::new(0);

/// Opaque, cloneable identity of a peer task's mailbox. Equality is by
/// identity (an internally assigned sequence number), never by channel
/// contents — this is what the registry de-duplicates and looks peers up
/// by.
#[derive(Clone)]
pub struct Mailbox {
    id: u64,
    tx: mpsc::UnboundedSender<PeerOutbound>,
}

impl Mailbox {
    fn new(tx: mpsc::UnboundedSender<PeerOutbound>) -> Self {
        Self {
            id: NEXT_MAILBOX_ID.fetch_add(1, Ordering::Relaxed),
            tx,
        }
    }

    /// Stable identity used for de-duplication; not meant for display.
    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    /// Fire-and-forget send. A closed receiver means the peer task has
    /// already exited; its death is reported independently by the
    /// supervisor, so the send failure is not itself an error here.
    pub fn send(&self, outbound: PeerOutbound) {
        let _ = self.tx.send(outbound);
    }
}

impl PartialEq for Mailbox {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Mailbox {}

impl std::hash::Hash for Mailbox {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state)
    }
}

impl std::fmt::Debug for Mailbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Mailbox({})", self.id)
    }
}

/// Spawn the peer task for `addr`, returning its mailbox immediately and a
/// future that the supervisor polls to completion. The dial itself (via
/// `dialer`) happens inside the returned task, never in the manager: any
/// `PeerOutbound` queued on the mailbox before the dial completes (our
/// outbound `Version`, typically) is simply buffered until the task starts
/// its read/write loop.
pub fn spawn(
    dialer: Arc<dyn Dialer>,
    addr: SocketAddr,
    manager: ManagerHandle,
) -> (Mailbox, impl std::future::Future<Output = Option<PeerException>>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let mailbox = Mailbox::new(tx);
    let task = run(dialer, addr, rx, manager, mailbox.clone());

    (mailbox, task)
}

async fn run(
    dialer: Arc<dyn Dialer>,
    addr: SocketAddr,
    mut inbox: mpsc::UnboundedReceiver<PeerOutbound>,
    manager: ManagerHandle,
    mailbox: Mailbox,
) -> Option<PeerException> {
    let mut conn = match dialer.connect(addr).await {
        Ok(conn) => conn,
        Err(err) => return Some(PeerException::Connection(std::sync::Arc::new(err))),
    };

    loop {
        tokio::select! {
            outbound = inbox.recv() => match outbound {
                Some(PeerOutbound::Send(msg)) => {
                    if let Err(err) = conn.send(msg).await {
                        return Some(PeerException::Connection(std::sync::Arc::new(err)));
                    }
                }
                Some(PeerOutbound::Shutdown) | None => return None,
            },
            inbound = conn.recv() => match inbound {
                Ok(Some(msg)) => {
                    manager.manager_tickle(mailbox.clone());
                    dispatch(&manager, &mailbox, addr, msg);
                }
                Ok(None) => return None,
                Err(err) => return Some(PeerException::Connection(std::sync::Arc::new(err))),
            },
        }
    }
}

#[cfg(test)]
pub mod test_support {
    use super::*;

    /// A mailbox with no task attached, for registry/handshake/liveness
    /// tests that only exercise manager-side state.
    pub fn mailbox() -> (Mailbox, mpsc::UnboundedReceiver<PeerOutbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Mailbox::new(tx), rx)
    }

    /// A real, stable `tokio::task::Id` for registry tests that need one
    /// but don't care which task it names.
    pub fn fake_task_id() -> tokio::task::Id {
        let rt = tokio::runtime::Builder::new_current_thread()
            .build()
            .expect("build current-thread runtime");
        rt.block_on(async { tokio::spawn(async {}).id() })
    }
}

fn dispatch(manager: &ManagerHandle, mailbox: &Mailbox, addr: SocketAddr, msg: NetworkMessage) {
    match msg {
        NetworkMessage::Version(v) => manager.manager_version(mailbox.clone(), v),
        NetworkMessage::Verack => manager.manager_ver_ack(mailbox.clone()),
        NetworkMessage::Ping(nonce) => manager.manager_ping(mailbox.clone(), nonce),
        NetworkMessage::Pong(nonce) => manager.manager_pong(mailbox.clone(), nonce),
        NetworkMessage::Addr(addrs) => manager.manager_addrs(mailbox.clone(), addrs),
        _ => {
            // Anything else is forwarded to the upstream message publisher
            // by the manager; it never touches handshake or liveness state.
            manager.manager_message(addr, msg);
        }
    }
}
