//! Network descriptor: magic bytes, DNS seeds, default port, user agent and
//! segwit support, keyed off the underlying `bitcoin` chain.

use bitcoin::network::constants::ServiceFlags;
use bitcoin::network::Magic;
use bitcoin::Network as Chain;

/// Everything the peer manager needs to know about the network it is
/// operating on, beyond the raw [`Chain`] discriminant.
#[derive(Debug, Clone)]
pub struct NetworkParams {
    pub chain: Chain,
    /// DNS seed hostnames, queried when discovery is enabled and the
    /// known-address pool runs dry.
    pub seeds: Vec<&'static str>,
    /// Port assumed for peers that don't specify one explicitly.
    pub default_port: u16,
    /// User agent string advertised in our outbound `version` message.
    pub user_agent: &'static str,
    /// Whether peers on this network are expected to speak segwit.
    pub segwit: bool,
}

impl NetworkParams {
    pub fn magic(&self) -> Magic {
        self.chain.magic()
    }

    pub fn local_services(&self) -> ServiceFlags {
        ServiceFlags::NETWORK
    }

    /// Build the descriptor for a given chain using its well-known defaults.
    pub fn for_chain(chain: Chain) -> Self {
        match chain {
            Chain::Bitcoin => Self {
                chain,
                seeds: vec![
                    "seed.bitcoin.sipa.be",
                    "dnsseed.bluematt.me",
                    "dnsseed.bitcoin.dashjr.org",
                    "seed.bitcoinstats.com",
                    "seed.btc.petertodd.org",
                ],
                default_port: 8333,
                user_agent: "/peer-manager:0.1.0/",
                segwit: true,
            },
            Chain::Testnet => Self {
                chain,
                seeds: vec![
                    "testnet-seed.bitcoin.jonasschnelli.ch",
                    "seed.tbtc.petertodd.org",
                ],
                default_port: 18333,
                user_agent: "/peer-manager:0.1.0/",
                segwit: true,
            },
            Chain::Signet => Self {
                chain,
                seeds: vec!["seed.signet.bitcoin.sprovoost.nl"],
                default_port: 38333,
                user_agent: "/peer-manager:0.1.0/",
                segwit: true,
            },
            Chain::Regtest => Self {
                chain,
                seeds: vec![],
                default_port: 18444,
                user_agent: "/peer-manager:0.1.0/",
                segwit: true,
            },
            _ => Self {
                chain,
                seeds: vec![],
                default_port: 8333,
                user_agent: "/peer-manager:0.1.0/",
                segwit: true,
            },
        }
    }
}
