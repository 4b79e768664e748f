//! Command implementations for the layerkv tool.
//!
//! Every command opens the store, runs once and closes it again, so the
//! sweeper only runs for the lifetime of a single command.

use std::io::Write;

use anyhow::{bail, Context, Result};
use regex::bytes::Regex;
use tracing::{debug, info};

use layerkv_storage::{Store, StoreError, StoreStats};
use layerkv_types::Settings;

use crate::cli::{Cli, Commands, TtlCommands};

/// Load settings and apply CLI overrides (highest precedence)
pub fn load_settings(
    config_path: Option<&str>,
    data_dir_override: Option<&str>,
    log_level_override: Option<&str>,
) -> Result<Settings> {
    let mut settings = Settings::load(config_path).context("Failed to load configuration")?;

    if let Some(data_dir) = data_dir_override {
        settings.data_dir = data_dir.to_string();
    }
    if let Some(log_level) = log_level_override {
        settings.log_level = log_level.to_string();
    }
    Ok(settings)
}

/// Install the global tracing subscriber, writing to stderr
pub fn init_logging(settings: &Settings) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&settings.log_level)),
        )
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;
    Ok(())
}

/// Parse-to-exit entry point used by `main`
pub async fn run(cli: Cli) -> Result<()> {
    let settings = load_settings(
        cli.config.as_deref(),
        cli.data_dir.as_deref(),
        cli.log_level.as_deref(),
    )?;
    init_logging(&settings)?;
    debug!("Data directory: {:?}", settings.expanded_data_dir());

    let store = Store::open(&settings).context("Failed to open store")?;

    if let Commands::Destroy { yes } = cli.command {
        if !yes {
            store.close().await?;
            bail!("Refusing to destroy {:?} without --yes", store.path());
        }
        let path = store.path().to_path_buf();
        store.destroy().await.context("Failed to destroy store")?;
        println!("Destroyed {}", path.display());
        return Ok(());
    }

    let result = execute(&store, &cli.command, &mut std::io::stdout().lock());
    store.close().await.context("Failed to close store")?;
    result
}

/// Run one command against an open store, writing results to `out`
pub fn execute<W: Write>(store: &Store, command: &Commands, out: &mut W) -> Result<()> {
    match command {
        Commands::Get { key } => {
            let value = store.get(key.as_bytes())?;
            writeln!(out, "{}", String::from_utf8_lossy(&value))?;
        }
        Commands::Put { key, value, ttl } => {
            store.put(key.as_bytes(), value.as_bytes(), *ttl)?;
            info!(key = %key, ttl = *ttl, "Stored value");
            writeln!(out, "OK")?;
        }
        Commands::Del { key } => {
            store.del(key.as_bytes())?;
            writeln!(out, "OK")?;
        }
        Commands::Exists { key } => {
            writeln!(out, "{}", store.exists(key.as_bytes()))?;
        }
        Commands::Ttl { command } => execute_ttl(store, command, out)?,
        Commands::Scan {
            prefix,
            from,
            to,
            limit,
        } => {
            let iter = match (prefix, from, to) {
                (Some(prefix), _, _) => store.scan_prefix(prefix.as_bytes())?,
                (None, Some(from), Some(to)) => store.scan_range(from.as_bytes(), to.as_bytes())?,
                _ => store.scan()?,
            };
            for item in iter.take(*limit) {
                let entry = item?;
                writeln!(
                    out,
                    "{}\t{}",
                    String::from_utf8_lossy(&entry.key),
                    String::from_utf8_lossy(&entry.value)
                )?;
            }
        }
        Commands::Keys { pattern, limit } => match pattern {
            Some(pattern) => {
                let pattern = Regex::new(pattern).context("Invalid key pattern")?;
                write_keys(store.keys_matching(&pattern)?.take(*limit), out)?;
            }
            None => write_keys(store.keys()?.take(*limit), out)?,
        },
        Commands::Stats => print_stats(&store.stats()?, store.ttl_enabled(), out)?,
        Commands::Compact => {
            store.compact()?;
            writeln!(out, "OK")?;
        }
        Commands::Destroy { .. } => bail!("destroy must be run through `run`"),
    }
    Ok(())
}

fn write_keys<W: Write>(
    keys: impl Iterator<Item = Result<Vec<u8>, StoreError>>,
    out: &mut W,
) -> Result<()> {
    for key in keys {
        writeln!(out, "{}", String::from_utf8_lossy(&key?))?;
    }
    Ok(())
}

fn execute_ttl<W: Write>(store: &Store, command: &TtlCommands, out: &mut W) -> Result<()> {
    match command {
        TtlCommands::Get { key } => match store.get_ttl(key.as_bytes()) {
            Ok(left) => writeln!(out, "{}", left.as_secs())?,
            Err(StoreError::TtlNotFound(_)) => writeln!(out, "none")?,
            Err(e) => return Err(e.into()),
        },
        TtlCommands::Set { key, seconds } => {
            store.set_ttl(key.as_bytes(), *seconds)?;
            writeln!(out, "OK")?;
        }
        TtlCommands::Clear { key } => {
            store.del_ttl(key.as_bytes())?;
            writeln!(out, "OK")?;
        }
    }
    Ok(())
}

fn print_stats<W: Write>(stats: &StoreStats, ttl_enabled: bool, out: &mut W) -> Result<()> {
    writeln!(out, "Entries:      {}", stats.entry_count)?;
    if ttl_enabled {
        writeln!(out, "Expiring:     {}", stats.ttl_count)?;
    } else {
        writeln!(out, "Expiring:     (ttl disabled)")?;
    }
    writeln!(
        out,
        "Disk usage:   {:.2} MB",
        stats.disk_usage_bytes as f64 / 1024.0 / 1024.0
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_test_store(temp_dir: &TempDir) -> Store {
        let settings = Settings::with_data_dir(temp_dir.path().join("db"));
        Store::open(&settings).unwrap()
    }

    fn run_command(store: &Store, command: Commands) -> String {
        let mut out = Vec::new();
        execute(store, &command, &mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_load_settings_overrides() {
        let settings = load_settings(None, Some("/tmp/override"), Some("debug")).unwrap();
        assert_eq!(settings.data_dir, "/tmp/override");
        assert_eq!(settings.log_level, "debug");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_put_get_exists_del() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_test_store(&temp_dir);

        let put = Commands::Put {
            key: "greeting".to_string(),
            value: "hello".to_string(),
            ttl: 0,
        };
        assert_eq!(run_command(&store, put), "OK\n");
        assert_eq!(
            run_command(&store, Commands::Get { key: "greeting".to_string() }),
            "hello\n"
        );
        assert_eq!(
            run_command(&store, Commands::Exists { key: "greeting".to_string() }),
            "true\n"
        );
        run_command(&store, Commands::Del { key: "greeting".to_string() });

        let mut out = Vec::new();
        let missing = execute(&store, &Commands::Get { key: "greeting".to_string() }, &mut out);
        assert!(missing.is_err());

        store.close().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_ttl_commands() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_test_store(&temp_dir);
        store.put(b"k", b"v", 0).unwrap();

        let get = || Commands::Ttl {
            command: TtlCommands::Get { key: "k".to_string() },
        };
        assert_eq!(run_command(&store, get()), "none\n");

        run_command(
            &store,
            Commands::Ttl {
                command: TtlCommands::Set { key: "k".to_string(), seconds: 60 },
            },
        );
        let left: u64 = run_command(&store, get()).trim().parse().unwrap();
        assert!(left > 55 && left <= 60);

        run_command(
            &store,
            Commands::Ttl {
                command: TtlCommands::Clear { key: "k".to_string() },
            },
        );
        assert_eq!(run_command(&store, get()), "none\n");

        store.close().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_scan_modes_and_limit() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_test_store(&temp_dir);
        for key in ["a", "b", "c", "d", "user-1", "user-2"] {
            store.put(key.as_bytes(), b"v", 0).unwrap();
        }

        let prefix = run_command(
            &store,
            Commands::Scan {
                prefix: Some("user-".to_string()),
                from: None,
                to: None,
                limit: 100,
            },
        );
        assert_eq!(prefix, "user-1\tv\nuser-2\tv\n");

        let range = run_command(
            &store,
            Commands::Scan {
                prefix: None,
                from: Some("b".to_string()),
                to: Some("c".to_string()),
                limit: 100,
            },
        );
        assert_eq!(range, "b\tv\nc\tv\n");

        let keys = run_command(&store, Commands::Keys { pattern: None, limit: 2 });
        assert_eq!(keys, "a\nb\n");

        let keys = run_command(
            &store,
            Commands::Keys {
                pattern: Some(r"^user-\d$".to_string()),
                limit: 100,
            },
        );
        assert_eq!(keys, "user-1\nuser-2\n");

        let mut out = Vec::new();
        let invalid = Commands::Keys {
            pattern: Some("user-(".to_string()),
            limit: 100,
        };
        assert!(execute(&store, &invalid, &mut out).is_err());

        let stats = run_command(&store, Commands::Stats);
        assert!(stats.starts_with("Entries:      6\n"));

        store.close().await.unwrap();
    }
}
