//! CLI argument parsing for the layerkv tool.
//!
//! CLI flags override every other settings source.

use clap::{Parser, Subcommand};

/// Inspect and edit a layerkv store
#[derive(Parser, Debug)]
#[command(name = "layerkv")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to config file (overrides the default in the user config dir)
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Set log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    /// Override the store directory
    #[arg(short, long, global = true)]
    pub data_dir: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Print the value stored under a key
    Get { key: String },

    /// Store a value
    Put {
        key: String,
        value: String,

        /// Expire after this many seconds (0 keeps any current schedule)
        #[arg(long, default_value = "0")]
        ttl: i64,
    },

    /// Delete a key and its expiration
    Del { key: String },

    /// Print whether a key exists
    Exists { key: String },

    /// Expiration commands
    Ttl {
        #[command(subcommand)]
        command: TtlCommands,
    },

    /// List entries in key order
    Scan {
        /// Only keys starting with this prefix
        #[arg(long, conflicts_with_all = ["from", "to"])]
        prefix: Option<String>,

        /// Inclusive lower bound
        #[arg(long, requires = "to")]
        from: Option<String>,

        /// Inclusive upper bound
        #[arg(long, requires = "from")]
        to: Option<String>,

        /// Maximum results
        #[arg(short = 'n', long, default_value = "100")]
        limit: usize,
    },

    /// List keys only
    Keys {
        /// Only keys matching this regular expression
        #[arg(short, long)]
        pattern: Option<String>,

        #[arg(short = 'n', long, default_value = "1000")]
        limit: usize,
    },

    /// Show entry and expiration counts and disk usage
    Stats,

    /// Compact all column families
    Compact,

    /// Delete the store and all its data
    Destroy {
        /// Required confirmation
        #[arg(long)]
        yes: bool,
    },
}

/// Expiration subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum TtlCommands {
    /// Show seconds left before a key expires
    Get { key: String },

    /// Expire an existing key after `seconds` (-1 cancels)
    Set {
        key: String,

        #[arg(allow_negative_numbers = true)]
        seconds: i64,
    },

    /// Remove a key's expiration
    Clear { key: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_put_with_ttl() {
        let cli = Cli::parse_from(["layerkv", "put", "k", "v", "--ttl", "30"]);
        match cli.command {
            Commands::Put { key, value, ttl } => {
                assert_eq!(key, "k");
                assert_eq!(value, "v");
                assert_eq!(ttl, 30);
            }
            _ => panic!("Expected Put command"),
        }
    }

    #[test]
    fn test_cli_put_default_ttl() {
        let cli = Cli::parse_from(["layerkv", "put", "k", "v"]);
        assert!(matches!(cli.command, Commands::Put { ttl: 0, .. }));
    }

    #[test]
    fn test_cli_global_flags() {
        let cli = Cli::parse_from([
            "layerkv",
            "get",
            "k",
            "--config",
            "/path/to/config.toml",
            "--data-dir",
            "/tmp/db",
            "-l",
            "debug",
        ]);
        assert_eq!(cli.config, Some("/path/to/config.toml".to_string()));
        assert_eq!(cli.data_dir, Some("/tmp/db".to_string()));
        assert_eq!(cli.log_level, Some("debug".to_string()));
    }

    #[test]
    fn test_cli_ttl_cancel() {
        let cli = Cli::parse_from(["layerkv", "ttl", "set", "k", "-1"]);
        match cli.command {
            Commands::Ttl {
                command: TtlCommands::Set { key, seconds },
            } => {
                assert_eq!(key, "k");
                assert_eq!(seconds, -1);
            }
            _ => panic!("Expected Ttl Set command"),
        }
    }

    #[test]
    fn test_cli_scan_range() {
        let cli = Cli::parse_from(["layerkv", "scan", "--from", "b", "--to", "d", "-n", "5"]);
        match cli.command {
            Commands::Scan {
                prefix,
                from,
                to,
                limit,
            } => {
                assert_eq!(prefix, None);
                assert_eq!(from.as_deref(), Some("b"));
                assert_eq!(to.as_deref(), Some("d"));
                assert_eq!(limit, 5);
            }
            _ => panic!("Expected Scan command"),
        }
    }

    #[test]
    fn test_cli_scan_rejects_prefix_with_range() {
        let result = Cli::try_parse_from([
            "layerkv", "scan", "--prefix", "a", "--from", "b", "--to", "c",
        ]);
        assert!(result.is_err());

        let result = Cli::try_parse_from(["layerkv", "scan", "--from", "b"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_keys_pattern() {
        let cli = Cli::parse_from(["layerkv", "keys", "--pattern", "^user-", "-n", "10"]);
        match cli.command {
            Commands::Keys { pattern, limit } => {
                assert_eq!(pattern.as_deref(), Some("^user-"));
                assert_eq!(limit, 10);
            }
            _ => panic!("Expected Keys command"),
        }
    }

    #[test]
    fn test_cli_stats() {
        let cli = Cli::parse_from(["layerkv", "stats"]);
        assert!(matches!(cli.command, Commands::Stats));
    }
}
