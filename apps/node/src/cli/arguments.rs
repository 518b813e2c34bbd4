use std::path::PathBuf;

use clap::Args;

#[derive(Args)]
pub struct Run {
    /// Path to the node's configuration file.
    #[arg(short, long)]
    pub config: PathBuf,
}
