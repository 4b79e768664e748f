//! layerkv
//!
//! Command-line access to a layerkv store.
//!
//! # Usage
//!
//! ```bash
//! layerkv put session:42 token --ttl 60
//! layerkv get session:42
//! layerkv ttl get session:42
//! layerkv scan --prefix session: --limit 10
//! ```
//!
//! # Configuration
//!
//! Settings are loaded in order (later sources override earlier):
//! 1. Built-in defaults
//! 2. Config file (~/.config/layerkv/config.toml)
//! 3. Environment variables (LAYERKV_*)
//! 4. CLI flags

use anyhow::Result;
use clap::Parser;

use layerkv_cli::{run, Cli};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    run(cli).await
}
