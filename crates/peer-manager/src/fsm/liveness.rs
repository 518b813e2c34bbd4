//! C4 — liveness monitor: per-peer tickle freshness, outstanding-ping
//! timeout, and forced lifetime expiry.

use crate::common::time::{LocalDuration, LocalTime};
use crate::fsm::error::PeerException;
use crate::fsm::registry::Registry;
use crate::net::peer::Mailbox;

/// Configuration shared by every peer's liveness check.
#[derive(Debug, Clone, Copy)]
pub struct LivenessConfig {
    /// Idle threshold before pinging; also the basis for the tick period.
    pub timeout: LocalDuration,
}

/// What the caller should do after a `check_peer` tick.
pub enum Outcome {
    NoOp,
    IssuePing(u64),
    Kill(PeerException),
}

/// `check_peer` (§4.4): evaluated by the manager on each `CheckPeer`
/// message, driven by a per-peer random-interval ticker.
pub fn check_peer(
    registry: &Registry,
    mailbox: &Mailbox,
    now: LocalTime,
    config: &LivenessConfig,
    rng: &fastrand::Rng,
) -> Outcome {
    let Some(peer) = registry.find_by_mailbox(mailbox) else {
        return Outcome::NoOp;
    };
    if peer.busy {
        return Outcome::NoOp;
    }

    if now >= peer.disconnect_at {
        return Outcome::Kill(PeerException::PeerTooOld);
    }

    if now.diff(peer.tickled_at) <= config.timeout {
        return Outcome::NoOp;
    }

    match peer.outstanding_ping {
        None => {
            let nonce = rng.u64(..);
            registry.modify(mailbox, |p| {
                p.outstanding_ping = Some((now, nonce));
            });
            Outcome::IssuePing(nonce)
        }
        Some(_) => Outcome::Kill(PeerException::PeerTimeout),
    }
}

/// Inbound `pong(n)` (§4.4). Returns whether the nonce matched the
/// outstanding ping; a mismatch is a silent no-op.
pub fn on_pong(registry: &Registry, mailbox: &Mailbox, nonce: u64, now: LocalTime) -> bool {
    let mut matched = false;
    registry.modify(mailbox, |peer| {
        if let Some((sent_at, expected)) = peer.outstanding_ping {
            if expected == nonce {
                let rtt = now.diff(sent_at);
                peer.record_ping(rtt);
                peer.outstanding_ping = None;
                matched = true;
            }
        }
    });
    matched
}

/// Update `tickled_at` on any inbound protocol message (§4.4).
pub fn tickle(registry: &Registry, mailbox: &Mailbox, now: LocalTime) {
    registry.modify(mailbox, |peer| peer.tickled_at = now);
}

/// Sample a random interval in `[0.75 * T, T]`, per §4.4's per-peer ticker.
pub fn next_check_delay(config: &LivenessConfig, rng: &fastrand::Rng) -> LocalDuration {
    let min = config.timeout * 0.75;
    let span = config.timeout.as_millis().saturating_sub(min.as_millis());
    let jitter = if span == 0 {
        0
    } else {
        rng.u128(0..=span)
    };
    LocalDuration::from_millis(min.as_millis() + jitter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fsm::registry::OnlinePeer;

    fn timeout_config() -> LivenessConfig {
        LivenessConfig {
            timeout: LocalDuration::from_secs(1),
        }
    }

    #[test]
    fn ping_timeout_then_kill() {
        let registry = Registry::new();
        let (mailbox, _rx) = crate::net::peer::test_support::mailbox();
        let t0 = LocalTime::from_secs(1_000_000);
        let far_future = t0 + LocalDuration::from_secs(1_000);
        registry.insert(OnlinePeer::new(
            "1.2.3.4:8333".parse().unwrap(),
            mailbox.clone(),
            crate::net::peer::test_support::fake_task_id(),
            1,
            t0,
            far_future,
        ));
        registry.modify(&mailbox, |p| p.busy = false);

        let rng = fastrand::Rng::new();
        let cfg = timeout_config();

        let t1 = t0 + LocalDuration::from_millis(1500);
        match check_peer(&registry, &mailbox, t1, &cfg, &rng) {
            Outcome::IssuePing(_) => {}
            _ => panic!("expected a ping to be issued"),
        }

        let t2 = t0 + LocalDuration::from_secs(3);
        match check_peer(&registry, &mailbox, t2, &cfg, &rng) {
            Outcome::Kill(PeerException::PeerTimeout) => {}
            _ => panic!("expected PeerTimeout"),
        }
    }

    #[test]
    fn lifetime_expiry() {
        let registry = Registry::new();
        let (mailbox, _rx) = crate::net::peer::test_support::mailbox();
        let t0 = LocalTime::from_secs(1_000_000);
        let disconnect_at = t0 + LocalDuration::from_secs(9);
        registry.insert(OnlinePeer::new(
            "1.2.3.4:8333".parse().unwrap(),
            mailbox.clone(),
            crate::net::peer::test_support::fake_task_id(),
            1,
            t0,
            disconnect_at,
        ));
        registry.modify(&mailbox, |p| p.busy = false);

        let cfg = timeout_config();
        let rng = fastrand::Rng::new();

        let t1 = t0 + LocalDuration::from_secs(10);
        match check_peer(&registry, &mailbox, t1, &cfg, &rng) {
            Outcome::Kill(PeerException::PeerTooOld) => {}
            _ => panic!("expected PeerTooOld"),
        }
    }

    #[test]
    fn mismatched_pong_is_ignored() {
        let registry = Registry::new();
        let (mailbox, _rx) = crate::net::peer::test_support::mailbox();
        let t0 = LocalTime::from_secs(1_000_000);
        registry.insert(OnlinePeer::new(
            "1.2.3.4:8333".parse().unwrap(),
            mailbox.clone(),
            crate::net::peer::test_support::fake_task_id(),
            1,
            t0,
            t0 + LocalDuration::from_secs(1000),
        ));
        registry.modify(&mailbox, |p| p.outstanding_ping = Some((t0, 42)));

        assert!(!on_pong(&registry, &mailbox, 99, t0));
        assert!(on_pong(&registry, &mailbox, 42, t0));
    }
}
