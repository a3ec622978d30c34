//! Beacon - terminal uptime monitor

use beacon::config::AppConfig;
use beacon::display::app::{run_headless, run_tui, App};
use beacon::display::DisplayState;
use beacon::events::{EventBus, LogRecorder, RenderNotifier};
use beacon::probe::{HttpProber, UnavailableSslLookup};
use beacon::registry::Registry;
use beacon::scheduler::{lookup_ssl_expiry, ProbeScheduler};
use beacon::store::{LiveDataStore, SharedLog};

use clap::Parser;
use std::fs::File;
use std::path::PathBuf;
use std::sync::atomic::AtomicU16;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// How long probe tasks get to finish after the UI exits.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);
const FALLBACK_WIDTH: u16 = 80;

#[derive(Parser, Debug)]
#[command(name = "beacon", version, about = "Terminal uptime monitor for HTTP endpoints")]
struct Args {
    /// Config file (default: $BEACON_CONFIG, then ./beacon.yaml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log check results instead of drawing the terminal UI
    #[arg(long)]
    headless: bool,

    /// Write diagnostics to this file while the UI is running
    #[arg(long)]
    log_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let args = Args::parse();

    // The UI owns the terminal, so diagnostics only go to stderr when headless.
    let file_layer = match &args.log_file {
        Some(path) => Some(
            fmt::layer()
                .with_ansi(false)
                .with_writer(Mutex::new(File::create(path)?)),
        ),
        None => None,
    };
    let stderr_layer = args.headless.then(|| fmt::layer().with_writer(std::io::stderr));
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive("beacon=info".parse()?))
        .with(file_layer)
        .with(stderr_layer)
        .init();

    let config_path = AppConfig::resolve_path(args.config);
    let cfg = AppConfig::load(&config_path)?;
    tracing::info!(
        "Loaded {} targets from {}",
        cfg.targets.len(),
        config_path.display()
    );

    let registry = Arc::new(Registry::build(&cfg.targets, &cfg.regions)?);

    let store = Arc::new(LiveDataStore::new());
    let log = Arc::new(SharedLog::new(cfg.log_capacity));
    let (render_tx, render_rx) = mpsc::unbounded_channel();

    let mut bus = EventBus::new();
    bus.subscribe(store.clone());
    bus.subscribe(Arc::new(LogRecorder::new(log.clone())));
    bus.subscribe(Arc::new(RenderNotifier::new(render_tx)));
    let bus = Arc::new(bus);

    let width = crossterm::terminal::size()
        .map(|(columns, _)| columns)
        .unwrap_or(FALLBACK_WIDTH);
    let terminal_width = Arc::new(AtomicU16::new(width));

    lookup_ssl_expiry(&UnavailableSslLookup, &registry, &bus).await;

    let scheduler = ProbeScheduler::new(registry.clone(), bus, terminal_width.clone());
    scheduler.start(Arc::new(HttpProber)).await?;

    let outcome = if args.headless {
        let shutdown = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for Ctrl-C: {}", e);
            }
        };
        let reported = run_headless(render_rx, shutdown).await;
        tracing::info!("Reported {} events", reported);
        Ok(())
    } else {
        let app = App::new(DisplayState::new(registry), store, log);
        run_tui(app, render_rx, terminal_width).await
    };

    scheduler.shutdown(SHUTDOWN_GRACE).await;
    outcome?;
    Ok(())
}
