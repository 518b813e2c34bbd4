//! C3 — handshake state machine: `Dialed → GotVersion/GotVerAck →
//! Connected`, with independent arrivals of `Version` and `VerAck`.

use bitcoin::network::constants::ServiceFlags;
use bitcoin::network::message_network::VersionMessage;

use crate::fsm::error::PeerException;
use crate::fsm::registry::Registry;
use crate::net::peer::Mailbox;

/// What the caller should do after feeding a handshake message through.
pub enum Outcome {
    /// No externally visible effect (yet).
    NoOp,
    /// `connected` flipped false → true for the first time; announce it.
    Announce,
    /// The peer violated a handshake rule and must be killed.
    Kill(PeerException),
}

/// Transitions on inbound `version` (§4.3).
pub fn on_version(registry: &Registry, mailbox: &Mailbox, version: VersionMessage) -> Outcome {
    if !version.services.has(ServiceFlags::NETWORK) {
        return Outcome::Kill(PeerException::NotNetworkPeer);
    }

    let self_connect = registry
        .snapshot()
        .iter()
        .any(|p| p.nonce == version.nonce);
    if self_connect {
        return Outcome::Kill(PeerException::PeerIsMyself);
    }

    if registry.find_by_mailbox(mailbox).is_none() {
        return Outcome::Kill(PeerException::UnknownPeer);
    }

    let mut became_connected = false;
    registry.modify(mailbox, |peer| {
        let was_connected = peer.connected();
        peer.peer_version = Some(version);
        peer.busy = false;
        became_connected = !was_connected && peer.connected();
    });

    if became_connected {
        Outcome::Announce
    } else {
        Outcome::NoOp
    }
}

/// Transitions on inbound `verack` (§4.3).
pub fn on_verack(registry: &Registry, mailbox: &Mailbox) -> Outcome {
    if registry.find_by_mailbox(mailbox).is_none() {
        return Outcome::Kill(PeerException::UnknownPeer);
    }

    let mut became_connected = false;
    registry.modify(mailbox, |peer| {
        let was_connected = peer.connected();
        peer.verack_received = true;
        became_connected = !was_connected && peer.connected();
    });

    if became_connected {
        Outcome::Announce
    } else {
        Outcome::NoOp
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::time::LocalTime;
    use crate::fsm::registry::OnlinePeer;
    use bitcoin::network::address::Address;
    use std::net::SocketAddr;

    fn version(nonce: u64) -> VersionMessage {
        let addr: SocketAddr = "127.0.0.1:8333".parse().unwrap();
        VersionMessage {
            version: 70015,
            services: ServiceFlags::NETWORK,
            timestamp: 0,
            receiver: Address::new(&addr, ServiceFlags::NONE),
            sender: Address::new(&addr, ServiceFlags::NONE),
            nonce,
            user_agent: "/test/".into(),
            start_height: 0,
            relay: true,
        }
    }

    #[test]
    fn version_without_network_service_is_killed() {
        let registry = Registry::new();
        let (mailbox, _rx) = crate::net::peer::test_support::mailbox();
        registry.insert(OnlinePeer::new(
            "1.2.3.4:8333".parse().unwrap(),
            mailbox.clone(),
            crate::net::peer::test_support::fake_task_id(),
            0xAA,
            LocalTime::now(),
            LocalTime::now(),
        ));

        let mut v = version(1);
        v.services = ServiceFlags::NONE;
        match on_version(&registry, &mailbox, v) {
            Outcome::Kill(PeerException::NotNetworkPeer) => {}
            _ => panic!("expected NotNetworkPeer"),
        }
    }

    #[test]
    fn handshake_announces_exactly_once_either_order() {
        let registry = Registry::new();
        let (mailbox, _rx) = crate::net::peer::test_support::mailbox();
        registry.insert(OnlinePeer::new(
            "1.2.3.4:8333".parse().unwrap(),
            mailbox.clone(),
            crate::net::peer::test_support::fake_task_id(),
            0xAA,
            LocalTime::now(),
            LocalTime::now(),
        ));

        // version first
        assert!(matches!(
            on_version(&registry, &mailbox, version(1)),
            Outcome::NoOp
        ));
        assert!(matches!(
            on_verack(&registry, &mailbox),
            Outcome::Announce
        ));
    }

    #[test]
    fn handshake_announces_exactly_once_verack_first() {
        let registry = Registry::new();
        let (mailbox, _rx) = crate::net::peer::test_support::mailbox();
        registry.insert(OnlinePeer::new(
            "1.2.3.4:8333".parse().unwrap(),
            mailbox.clone(),
            crate::net::peer::test_support::fake_task_id(),
            0xAA,
            LocalTime::now(),
            LocalTime::now(),
        ));

        // verack first
        assert!(matches!(
            on_verack(&registry, &mailbox),
            Outcome::NoOp
        ));
        assert!(matches!(
            on_version(&registry, &mailbox, version(1)),
            Outcome::Announce
        ));
    }

    #[test]
    fn self_connect_is_rejected() {
        let registry = Registry::new();
        let (mailbox, _rx) = crate::net::peer::test_support::mailbox();
        registry.insert(OnlinePeer::new(
            "1.2.3.4:8333".parse().unwrap(),
            mailbox.clone(),
            crate::net::peer::test_support::fake_task_id(),
            0x1234,
            LocalTime::now(),
            LocalTime::now(),
        ));

        match on_version(&registry, &mailbox, version(0x1234)) {
            Outcome::Kill(PeerException::PeerIsMyself) => {}
            _ => panic!("expected PeerIsMyself"),
        }
    }
}
