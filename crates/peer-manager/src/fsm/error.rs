use std::sync::Arc;

/// Reasons a peer gets killed by the manager. Passed to `kill_peer` and
/// carried on the `PeerDied` notification the supervisor posts back.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PeerException {
    #[error("peer did not advertise the NODE_NETWORK service bit")]
    NotNetworkPeer,
    #[error("peer's nonce matches one of our outstanding connection attempts")]
    PeerIsMyself,
    #[error("received a message for a peer that is not in the registry")]
    UnknownPeer,
    #[error("peer did not answer a ping within the idle timeout")]
    PeerTimeout,
    #[error("peer exceeded its connection lifetime budget")]
    PeerTooOld,
    #[error("connection error: {0}")]
    Connection(#[from] Arc<std::io::Error>),
}
