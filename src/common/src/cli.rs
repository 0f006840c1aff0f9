use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Common CLI arguments shared by every bigbucket mode
#[derive(Parser, Debug, Clone)]
pub struct CommonArgs {
    #[arg(long, help = "Configuration file path")]
    pub config: Option<PathBuf>,

    #[arg(
        long,
        env = "BUCKET",
        help = "Bucket DSN, overrides storage.dsn (e.g. gs://<bucket-name>)"
    )]
    pub bucket: Option<String>,

    #[arg(short, long, help = "Enable verbose logging")]
    pub verbose: bool,

    #[arg(short, long, help = "Enable quiet mode (minimal output)")]
    pub quiet: bool,
}

/// Commands that inspect the configuration without starting anything
#[derive(Subcommand, Debug, Clone)]
pub enum CommonCommands {
    /// Show current configuration and exit
    Config {
        #[arg(long, help = "Show configuration in JSON format")]
        json: bool,
    },
    /// Validate configuration and exit
    Validate,
    /// Show version information and exit
    Version,
}

/// Utility functions for CLI operations
pub mod utils {
    use super::*;
    use crate::config::{CleanerMode, Configuration};
    use anyhow::{Context, Result};
    use tracing::info;
    use tracing_subscriber::EnvFilter;

    /// Initialize logging based on CLI arguments, `RUST_LOG` wins when set
    pub fn init_logging(args: &CommonArgs) {
        let level = if args.quiet {
            "warn"
        } else if args.verbose {
            "debug"
        } else {
            "info"
        };

        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    /// Load configuration with optional override from CLI
    pub fn load_config(args: &CommonArgs) -> Result<Configuration> {
        let mut config = match &args.config {
            Some(path) => {
                info!("Loading configuration from: {}", path.display());
                Configuration::load_from_path(path).context("Failed to load configuration")?
            }
            None => Configuration::load().context("Failed to load configuration")?,
        };

        if let Some(bucket) = &args.bucket {
            config.storage.dsn = bucket.clone();
        }

        Ok(config)
    }

    /// Display configuration in human-readable or JSON format
    pub fn display_config(config: &Configuration, json: bool) -> Result<()> {
        if json {
            let json = serde_json::to_string_pretty(config)
                .context("Failed to serialize configuration to JSON")?;
            println!("{json}");
        } else {
            println!("Bigbucket Configuration:");
            println!("========================");
            println!("Storage DSN: {}", config.storage.dsn);
            println!("Storage root: {}", config.storage.root);
            println!("Compression: {}", config.storage.compression);
            println!("Listen address: {}", config.server.listen_addr());
            println!("Cleaner mode: {:?}", config.cleaner.mode);
            println!("Cleaner interval: {:?}", config.cleaner.interval);
            println!("Cleaner port: {}", config.cleaner.port);
            println!("Cleaner embedded: {}", config.cleaner.embedded);
            println!("Max fan-out workers: {}", config.pool.max_workers);
        }
        Ok(())
    }

    /// Validate configuration and report any issues
    pub fn validate_config(config: &Configuration) -> Result<()> {
        info!("Validating configuration...");

        if config.storage.dsn.is_empty() {
            anyhow::bail!("Storage DSN cannot be empty");
        }

        let root = &config.storage.root;
        if root.is_empty() || root.starts_with('.') || root.contains('/') {
            anyhow::bail!(
                "Storage root '{root}' must be a single non-empty segment not starting with '.'"
            );
        }

        if config.pool.max_workers == 0 || config.pool.queue_factor == 0 {
            anyhow::bail!("Pool max_workers and queue_factor must be greater than zero");
        }

        if config.cleaner.workers == 0 || config.cleaner.max_passes == 0 {
            anyhow::bail!("Cleaner workers and max_passes must be greater than zero");
        }

        if config.cleaner.mode == CleanerMode::Interval && config.cleaner.interval.is_zero() {
            anyhow::bail!("Cleaner interval cannot be zero in interval mode");
        }

        info!("Configuration validation passed");
        Ok(())
    }

    /// Handle common CLI commands that don't require starting services
    pub fn handle_common_command(command: &CommonCommands, config: &Configuration) -> Result<()> {
        match command {
            CommonCommands::Config { json } => display_config(config, *json),
            CommonCommands::Validate => validate_config(config),
            CommonCommands::Version => {
                println!("{}", version_info());
                Ok(())
            }
        }
    }

    /// Standard version information
    pub fn version_info() -> String {
        format!(
            "Bigbucket version {} ({})",
            env!("CARGO_PKG_VERSION"),
            env!("CARGO_PKG_RUST_VERSION")
        )
    }
}
