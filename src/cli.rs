//! Command line arguments for the deskrelay binary.

use clap::Parser;
use std::path::PathBuf;

/// deskrelay - multi-tenant support desk relay
#[derive(Debug, Parser)]
#[command(name = "deskrelay", about = "Multi-tenant support desk relay")]
pub struct Args {
    #[arg(long, help = "Path to the config file")]
    pub config: Option<PathBuf>,

    #[arg(
        long,
        env = "DESKRELAY_GATEWAY_PORT",
        help = "Agent gateway listen port"
    )]
    pub port: Option<u16>,

    #[arg(
        long,
        env = "DESKRELAY_SEED_FILE",
        help = "TOML seed file with tenants, departments, and agents"
    )]
    pub seed: Option<PathBuf>,
}
