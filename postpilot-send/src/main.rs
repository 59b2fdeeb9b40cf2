//! postpilot-send - Background service for scheduled publishing
//!
//! Re-registers every scheduled post on startup, then keeps one timer per
//! post and publishes each at its instant until told to stop.

use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use libpostpilot::logging::{LogFormat, LoggingConfig};
use libpostpilot::{Config, PostpilotError, Scheduler, SchedulingService};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::time::{sleep, Duration, Instant};
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "postpilot-send")]
#[command(version)]
#[command(about = "Background service that publishes scheduled posts")]
#[command(long_about = "\
postpilot-send - Background service that publishes scheduled posts

DESCRIPTION:
    postpilot-send loads every post whose status is 'scheduled', arms a
    timer for each one, and publishes it through the matching platform
    (Facebook, Instagram) when its instant arrives. Posts whose instant
    already passed are published right away.

    Successful posts become 'published' with the platform's post id in
    their metadata. Failed posts go back to 'draft' with the error in
    metadata.last_error; nothing is retried automatically.

USAGE:
    # Run in foreground (logs to stderr)
    postpilot-send

    # Use a specific config file
    postpilot-send --config ./postpilot.toml

    # JSON logs for a log collector
    postpilot-send --log-format json

SIGNALS:
    SIGTERM, SIGINT - Graceful shutdown (running publishes may finish)

CONFIGURATION:
    Configuration file: ~/.config/postpilot/config.toml
    Database location: ~/.local/share/postpilot/posts.db

    [scheduler]
    lease_ttl = \"5m\"        # how long a publishing lease blocks retries
    poll_interval = \"5s\"    # media processing status checks
    poll_ceiling = \"120s\"   # give up waiting for processing after this

    [credentials]
    master_password = \"...\" # or POSTPILOT_MASTER_PASSWORD

EXIT CODES:
    0 - Clean shutdown
    1 - Runtime error
    2 - Configuration or credential error
")]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, env = "POSTPILOT_CONFIG", value_name = "PATH")]
    config: Option<PathBuf>,

    /// Enable verbose logging to stderr
    #[arg(short, long)]
    verbose: bool,

    /// Log output format: text, json, or pretty
    #[arg(long, value_name = "FORMAT")]
    log_format: Option<LogFormat>,

    /// Seconds to let running publishes finish on shutdown
    #[arg(long, value_name = "SECONDS", default_value_t = 30)]
    shutdown_grace: u64,

    /// Publish overdue posts and exit (for testing)
    #[arg(long, hide = true)]
    once: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let mut logging = LoggingConfig::from_env(cli.verbose);
    if let Some(format) = cli.log_format {
        logging.format = format;
    }
    logging.init();

    if let Err(e) = run(cli).await {
        error!("{:#}", e);
        eprintln!("Error: {:#}", e);
        std::process::exit(exit_code(&e));
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = match &cli.config {
        Some(path) => Config::load_from_path(path)
            .with_context(|| format!("Loading {}", path.display()))?,
        None => Config::load().context("Loading configuration")?,
    };

    let service = SchedulingService::from_config(config).await?;
    info!("postpilot-send starting");

    let shutdown = Arc::new(AtomicBool::new(false));
    setup_signal_handlers(shutdown.clone())?;

    let report = service.start().await?;
    info!(
        registered = report.registered,
        overdue = report.overdue,
        skipped = report.skipped,
        "Scheduled posts recovered"
    );

    let grace = Duration::from_secs(cli.shutdown_grace);

    if cli.once {
        drain_overdue(service.scheduler(), grace).await;
        info!("postpilot-send: published overdue posts once, exiting");
    } else {
        while !shutdown.load(Ordering::Relaxed) {
            sleep(Duration::from_millis(250)).await;
        }
        info!("Shutdown requested");
    }

    if !service.shutdown(grace).await {
        warn!("Exiting with publishes still running");
    }

    info!("postpilot-send stopped");
    Ok(())
}

fn exit_code(err: &anyhow::Error) -> i32 {
    err.downcast_ref::<PostpilotError>()
        .map(PostpilotError::exit_code)
        .unwrap_or(1)
}

/// Set up signal handlers for graceful shutdown
#[cfg(unix)]
fn setup_signal_handlers(shutdown: Arc<AtomicBool>) -> anyhow::Result<()> {
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM]).context("Signal setup failed")?;

    std::thread::spawn(move || {
        if let Some(sig) = signals.forever().next() {
            info!(signal = sig, "Received shutdown signal, stopping gracefully...");
            shutdown.store(true, Ordering::Relaxed);
        }
    });

    Ok(())
}

#[cfg(not(unix))]
fn setup_signal_handlers(shutdown: Arc<AtomicBool>) -> anyhow::Result<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            shutdown.store(true, Ordering::Relaxed);
        }
    });
    Ok(())
}

/// Wait until no registration is due and nothing is dispatching
async fn drain_overdue(scheduler: &Scheduler, limit: Duration) {
    let deadline = Instant::now() + limit;

    loop {
        let now = Utc::now();
        let due = scheduler
            .pending()
            .iter()
            .filter(|r| r.scheduled_at <= now)
            .count();

        if due == 0 && scheduler.in_flight() == 0 {
            return;
        }
        if Instant::now() >= deadline {
            warn!(due, in_flight = scheduler.in_flight(), "Gave up waiting for overdue posts");
            return;
        }
        sleep(Duration::from_millis(50)).await;
    }
}
