use anyhow::{Context, Result, bail};
use api::{ApiState, create_router};
use clap::{Args, Parser, Subcommand};
use cleaner::{Cleaner, Trigger, service};
use common::cli::{CommonArgs, CommonCommands, utils};
use common::config::{CleanerConfig, CleanerMode, Configuration};
use common::storage::create_bucket;
use std::sync::Arc;
use std::time::Duration;
use store::Store;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Parser)]
#[command(name = "bigbucket")]
#[command(about = "Bigbucket - wide-column store on top of object storage")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    #[arg(long, env = "PORT", global = true, help = "API listen port, overrides server.port")]
    port: Option<u16>,

    #[command(subcommand)]
    command: Option<BigbucketCommands>,
}

#[derive(Subcommand)]
enum BigbucketCommands {
    /// Serve the HTTP API (default)
    Serve,
    /// Run the garbage collector for tombstoned tables and columns
    Clean(CleanArgs),
    #[command(flatten)]
    Common(CommonCommands),
}

#[derive(Args, Debug)]
#[group(multiple = false)]
struct CleanArgs {
    #[arg(long, help = "Sweep once and exit")]
    once: bool,

    #[arg(long, value_name = "SECONDS", help = "Sweep on start, then every SECONDS")]
    interval: Option<u64>,

    #[arg(long, value_name = "PORT", help = "Sweep on every POST / to PORT")]
    http: Option<u16>,
}

impl CleanArgs {
    fn apply(&self, config: &mut CleanerConfig) {
        if self.once {
            config.mode = CleanerMode::Once;
        } else if let Some(secs) = self.interval {
            config.mode = CleanerMode::Interval;
            config.interval = Duration::from_secs(secs);
        } else if let Some(port) = self.http {
            config.mode = CleanerMode::Http;
            config.port = port;
        }
    }
}

/// Waits for a shutdown signal (SIGINT or SIGTERM)
async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigint =
            signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;
        let mut sigterm =
            signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;

        tokio::select! {
            _ = sigint.recv() => info!("Received SIGINT"),
            _ = sigterm.recv() => info!("Received SIGTERM"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for shutdown signal")?;
        info!("Received Ctrl+C");
    }

    Ok(())
}

fn open_store(config: &Configuration) -> Result<Arc<Store>> {
    utils::validate_config(config)?;

    let bucket = create_bucket(&config.storage).context("Failed to initialize bucket")?;
    info!(
        dsn = %config.storage.dsn,
        root = %config.storage.root,
        compression = config.storage.compression,
        "Bucket initialized"
    );

    Ok(Arc::new(Store::new(
        bucket,
        &config.storage.root,
        config.pool.clone(),
    )))
}

async fn serve(config: Configuration) -> Result<()> {
    let store = open_store(&config)?;
    let deadline = config.cleaner.shutdown_timeout;

    let embedded = config.cleaner.embedded.then(|| {
        let cleaner = Arc::new(Cleaner::new(store.clone(), &config.cleaner, &config.pool));
        let handle = tokio::spawn(service::run(
            cleaner.clone(),
            Trigger::Interval(config.cleaner.interval),
        ));
        info!("Embedded cleaner started");
        (cleaner, handle)
    });

    let app = create_router(ApiState::new(store));
    let addr = config.server.listen_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("HTTP server could not listen on {addr}"))?;

    let shutdown = CancellationToken::new();
    let server = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            axum::serve(listener, app.into_make_service())
                .with_graceful_shutdown(async move {
                    shutdown.cancelled().await;
                    info!("HTTP server shutting down gracefully");
                })
                .await
        })
    };
    info!(%addr, "HTTP server is ready to handle requests");

    wait_for_shutdown_signal().await?;
    shutdown.cancel();
    drain(server, embedded, deadline).await?;

    info!("HTTP server stopped");
    Ok(())
}

/// Wait for the HTTP server and the embedded cleaner to stop, both within one
/// `deadline` counted from now.
async fn drain(
    server: JoinHandle<std::io::Result<()>>,
    embedded: Option<(Arc<Cleaner>, JoinHandle<cleaner::Result<()>>)>,
    deadline: Duration,
) -> Result<()> {
    let expires = Instant::now() + deadline;
    if let Some((cleaner, _)) = &embedded {
        cleaner.shutdown();
    }

    match tokio::time::timeout_at(expires, server).await {
        Ok(joined) => joined
            .context("HTTP server task failed")?
            .context("HTTP server error")?,
        Err(_) => bail!("Could not gracefully shutdown the HTTP server within {deadline:?}"),
    }

    if let Some((cleaner, handle)) = embedded {
        let remaining = expires.saturating_duration_since(Instant::now());
        service::shutdown(&cleaner, handle, remaining)
            .await
            .context("Could not gracefully shutdown the embedded cleaner")?;
    }
    Ok(())
}

async fn clean(config: Configuration) -> Result<()> {
    let store = open_store(&config)?;
    let cleaner = Arc::new(Cleaner::new(store, &config.cleaner, &config.pool));
    let trigger = Trigger::from_config(&config.cleaner, &config.server.host)?;

    let mut handle = tokio::spawn(service::run(cleaner.clone(), trigger));
    tokio::select! {
        joined = &mut handle => {
            joined.context("Cleaner task failed")??;
            info!("Cleaner process done");
            return Ok(());
        }
        signal = wait_for_shutdown_signal() => signal?,
    }

    service::shutdown(&cleaner, handle, config.cleaner.shutdown_timeout)
        .await
        .context("Could not gracefully shutdown the cleaner process")?;
    info!("Cleaner process done");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on CLI arguments
    utils::init_logging(&cli.common);

    // Load application configuration
    let mut config = utils::load_config(&cli.common)?;
    if let Some(port) = cli.port {
        config.server.port = port;
    }

    match cli.command.unwrap_or(BigbucketCommands::Serve) {
        BigbucketCommands::Common(command) => utils::handle_common_command(&command, &config),
        BigbucketCommands::Serve => serve(config).await,
        BigbucketCommands::Clean(args) => {
            args.apply(&mut config.cleaner);
            clean(config).await
        }
    }
}
