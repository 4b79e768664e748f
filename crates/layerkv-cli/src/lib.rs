//! layerkv command-line tool.
//!
//! # Modules
//!
//! - `cli`: Command-line argument parsing with clap
//! - `commands`: Command implementations against an open store

pub mod cli;
pub mod commands;

pub use cli::{Cli, Commands, TtlCommands};
pub use commands::{execute, init_logging, load_settings, run};
