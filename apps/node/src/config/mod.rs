use config::Config;
use serde::Deserialize;

use std::path::PathBuf;

mod p2p;
pub use p2p::P2pConfig;

mod logger;
pub use logger::LoggerConfig;

#[derive(Deserialize)]
pub struct NodeConfig {
    #[serde(default = "default_network")]
    pub network: bitcoin::Network,

    pub p2p: P2pConfig,

    #[serde(default)]
    pub shutdown_timeout: Option<u64>,

    #[serde(default)]
    pub logger: LoggerConfig,
}

fn default_network() -> bitcoin::Network {
    bitcoin::Network::Bitcoin
}

impl NodeConfig {
    pub fn from_path(path: PathBuf) -> eyre::Result<Self> {
        let config = Config::builder()
            .add_source(config::File::from(path))
            .build()?;

        Ok(config.try_deserialize()?)
    }
}
