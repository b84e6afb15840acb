use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::level_filters::LevelFilter;

#[derive(Parser)]
#[command(name = "ratchet")]
#[command(
    author,
    version,
    about = "Ledgered deployments of upgradeable contracts across networks"
)]
pub struct Cli {
    /// The verbosity level.
    #[arg(short, long, env = "RATCHET_VERBOSITY", default_value_t = LevelFilter::INFO)]
    pub verbosity: LevelFilter,

    /// Path to the network profile configuration file.
    #[arg(short, long, env = "RATCHET_CONFIG", default_value = "Ratchet.toml")]
    pub config: PathBuf,

    /// Directory holding the migration ledger and deployment records.
    #[arg(long, env = "RATCHET_STATE_DIR", default_value = ".ratchet")]
    pub state_dir: PathBuf,

    /// Directory holding compiled contract artifacts.
    #[arg(long, env = "RATCHET_ARTIFACTS_DIR", default_value = "artifacts")]
    pub artifacts_dir: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Apply pending migration steps to the selected networks.
    Migrate {
        /// Target network id. Repeat the flag to migrate several networks
        /// concurrently.
        #[arg(short, long = "network", required = true)]
        networks: Vec<String>,

        /// Index of the signing account within RATCHET_PRIVATE_KEYS.
        #[arg(long, env = "RATCHET_ACCOUNT_INDEX", default_value_t = 0)]
        account_index: usize,

        /// Treasury address wired into the collection after deployment.
        #[arg(long, env = "RATCHET_TREASURY")]
        treasury: String,
    },
    /// Show migration progress and deployed addresses. Reads only local
    /// state, no network I/O.
    Status {
        /// Restrict output to these network ids.
        #[arg(short, long = "network")]
        networks: Vec<String>,
    },
}
