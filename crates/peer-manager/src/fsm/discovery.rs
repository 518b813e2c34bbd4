//! C5 — discovery: static configured peers, DNS seeds, and gossiped
//! addresses all feed into a single known-address pool.

use std::net::SocketAddr;
use std::sync::Mutex;

use bitcoin::network::address::Address;
use tracing::debug;
use trust_dns_resolver::TokioAsyncResolver;

use crate::common::collections::AddressBook;
use crate::common::network::NetworkParams;
use crate::common::resolver;

/// Where a known address was learned from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Static,
    Dns,
    Peer(SocketAddr),
}

/// The pool of endpoints available for future dials. Duplicate-free; an
/// address enters on discovery and leaves when it is selected for a dial
/// attempt or is already present in the online registry.
pub struct KnownAddresses {
    inner: Mutex<AddressBook<SocketAddr, Source>>,
}

impl KnownAddresses {
    pub fn new(rng: fastrand::Rng) -> Self {
        Self {
            inner: Mutex::new(AddressBook::new(rng)),
        }
    }

    pub fn insert(&self, addr: SocketAddr, source: Source) {
        self.inner.lock().unwrap().insert(addr, source);
    }

    pub fn insert_many(&self, addrs: impl IntoIterator<Item = SocketAddr>, source: Source) {
        let mut book = self.inner.lock().unwrap();
        for addr in addrs {
            book.insert(addr, source);
        }
    }

    pub fn remove(&self, addr: &SocketAddr) {
        self.inner.lock().unwrap().remove(addr);
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().is_empty()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    /// Pick a uniformly random known address, removing it from the pool.
    /// The randomized hasher on [`AddressBook`] makes "first key" a random
    /// sample.
    pub fn take_random(&self) -> Option<SocketAddr> {
        let mut book = self.inner.lock().unwrap();
        let addr = *book.keys().next()?;
        book.remove(&addr);
        Some(addr)
    }
}

/// Resolve the configured static peer list via the address resolver (C1).
pub async fn resolve_static(
    dns: &TokioAsyncResolver,
    peers: &[String],
    default_port: u16,
) -> Vec<SocketAddr> {
    let mut out = Vec::new();
    for peer in peers {
        out.extend(resolver::resolve(dns, peer, default_port).await);
    }
    out
}

/// Resolve the network's DNS seed hostnames via the address resolver (C1).
pub async fn resolve_seeds(dns: &TokioAsyncResolver, network: &NetworkParams) -> Vec<SocketAddr> {
    let mut out = Vec::new();
    for seed in &network.seeds {
        let addrs = resolver::resolve(dns, seed, network.default_port).await;
        debug!(seed, count = addrs.len(), "resolved dns seed");
        out.extend(addrs);
    }
    out
}

/// Convert a gossiped `addr` message payload into socket endpoints,
/// dropping anything that fails to decode to a valid endpoint.
pub fn addrs_from_gossip(addrs: Vec<(u32, Address)>) -> Vec<SocketAddr> {
    addrs
        .into_iter()
        .filter_map(|(_, addr)| addr.socket_addr().ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_random_drains_without_repeats() {
        let known = KnownAddresses::new(fastrand::Rng::new());
        let addrs: Vec<SocketAddr> = (0..20)
            .map(|i| format!("10.0.0.{i}:8333").parse().unwrap())
            .collect();
        known.insert_many(addrs.clone(), Source::Static);
        assert_eq!(known.len(), addrs.len());

        let mut drawn = std::collections::HashSet::new();
        while let Some(addr) = known.take_random() {
            assert!(drawn.insert(addr), "address sampled twice: {addr}");
        }
        assert_eq!(drawn.len(), addrs.len());
        assert!(known.is_empty());
    }

    #[test]
    fn insert_is_duplicate_free() {
        let known = KnownAddresses::new(fastrand::Rng::new());
        let addr: SocketAddr = "10.0.0.1:8333".parse().unwrap();
        known.insert(addr, Source::Static);
        known.insert(addr, Source::Dns);
        assert_eq!(known.len(), 1);
    }

    #[test]
    fn gossip_addrs_round_trip_into_socket_addrs() {
        let addr: SocketAddr = "1.2.3.4:8333".parse().unwrap();
        let network_addr = Address::new(&addr, bitcoin::network::constants::ServiceFlags::NONE);
        let endpoints = addrs_from_gossip(vec![(0, network_addr)]);
        assert_eq!(endpoints, vec![addr]);
    }
}
