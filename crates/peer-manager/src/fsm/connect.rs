//! C6 — connect loop: keeps the online peer count at `max_peers` by
//! sampling the known-address pool and handing dials off to the actor.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use trust_dns_resolver::TokioAsyncResolver;

use crate::common::network::NetworkParams;
use crate::fsm::discovery::{self, KnownAddresses};
use crate::fsm::manager::ManagerHandle;
use crate::fsm::registry::Registry;

const MIN_SLEEP: Duration = Duration::from_millis(100);
const MAX_SLEEP: Duration = Duration::from_secs(5);

/// Parameters the connect loop needs beyond the registry and known-address
/// pool it shares with the rest of the manager.
pub struct ConnectConfig {
    pub max_peers: usize,
    pub discover: bool,
    pub static_peers: Vec<String>,
    pub network: NetworkParams,
}

/// Runs until `cancellation` fires. Grounded in §4.6: random sleep between
/// iterations, sample-or-discover, hand the chosen address to the actor.
pub async fn run(
    handle: ManagerHandle,
    registry: Arc<Registry>,
    known: Arc<KnownAddresses>,
    dns: TokioAsyncResolver,
    config: ConnectConfig,
    rng: fastrand::Rng,
    cancellation: CancellationToken,
) {
    loop {
        let sleep_ms = rng.u64(MIN_SLEEP.as_millis() as u64..=MAX_SLEEP.as_millis() as u64);
        tokio::select! {
            _ = cancellation.cancelled() => return,
            _ = tokio::time::sleep(Duration::from_millis(sleep_ms)) => {}
        }

        let n = registry.len();
        if n >= config.max_peers {
            continue;
        }

        if known.is_empty() {
            run_discovery(&dns, &known, &config).await;
        }

        loop {
            let Some(addr) = known.take_random() else {
                break;
            };
            if registry.find_by_address(&addr).is_some() {
                // Already online; drop it and keep sampling.
                continue;
            }
            handle.manager_connect(addr);
            break;
        }
    }
}

async fn run_discovery(dns: &TokioAsyncResolver, known: &KnownAddresses, config: &ConnectConfig) {
    let statics = discovery::resolve_static(dns, &config.static_peers, config.network.default_port).await;
    known.insert_many(statics, discovery::Source::Static);

    if config.discover {
        let seeds = discovery::resolve_seeds(dns, &config.network).await;
        known.insert_many(seeds, discovery::Source::Dns);
    }
}
