use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use pagewatch_client::{OpenAiSummarizer, ReqwestFetcher, TelegramNotifier};
use pagewatch_core::models::{Event, MonitorState};
use pagewatch_core::traits::{Fetcher, Notifier, Renderer, SnapshotStore, Summarizer};
use pagewatch_core::{AppError, BestEffort, Monitor, MonitorConfig, TracingMonitorReporter};
use pagewatch_store::{EventLog, FsStore, StoreConfig};

#[derive(Parser)]
#[command(name = "pagewatch", version, about = "Watch web pages and report what changed")]
struct Cli {
    /// Path to the JSON configuration file
    #[arg(short, long, env = "PAGEWATCH_CONFIG", default_value = "config.json")]
    config: PathBuf,

    /// Run a single check cycle and exit
    #[arg(long, default_value_t = false)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("pagewatch=info".parse()?))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = MonitorConfig::load(&cli.config)
        .with_context(|| format!("Failed to load configuration {}", cli.config.display()))?;
    config.warn_key_collisions();

    let store_config = StoreConfig::from_monitor_config(&config);
    let (store, state) = match open_store(&store_config) {
        Ok(opened) => opened,
        Err(e) => {
            record_fatal(&store_config, &e);
            return Err(e).context("Failed to open snapshot store");
        }
    };

    let fetcher = ReqwestFetcher::new().context("Failed to create HTTP client")?;
    let notifier = TelegramNotifier::from_env().context("Failed to create notifier")?;
    let monitor = Monitor::new(fetcher, renderer(), store, notifier);

    let summarizer = OpenAiSummarizer::from_env(config.summary_model.as_deref())
        .context("Failed to create summarizer")?;
    match summarizer {
        Some(summarizer) => {
            tracing::info!("Diff summaries enabled");
            drive(monitor.with_summarizer(summarizer), config, state, cli.once).await;
        }
        None => drive(monitor, config, state, cli.once).await,
    }

    Ok(())
}

/// Open the store and read the persisted state. Both failures are fatal.
fn open_store(config: &StoreConfig) -> Result<(FsStore, MonitorState), AppError> {
    let store = FsStore::open(config.clone())?;
    let state = store.load_state()?;
    tracing::info!(
        targets = state.urls.len(),
        root = %config.public_dir.display(),
        "State loaded"
    );
    Ok((store, state))
}

fn record_fatal(config: &StoreConfig, error: &AppError) {
    EventLog::new(config)
        .append(&Event::fatal(Utc::now(), error.to_string()))
        .best_effort("Recording fatal event");
}

#[cfg(feature = "browser")]
fn renderer() -> impl Renderer {
    pagewatch_client::BrowserRenderer::new()
}

#[cfg(not(feature = "browser"))]
fn renderer() -> impl Renderer {
    tracing::info!("Built without the browser feature, dynamic pages use plain HTTP");
    pagewatch_core::traits::NullRenderer
}

async fn drive<F, R, S, N, Z>(
    mut monitor: Monitor<F, R, S, N, Z>,
    config: MonitorConfig,
    mut state: MonitorState,
    once: bool,
) where
    F: Fetcher,
    R: Renderer,
    S: SnapshotStore,
    N: Notifier,
    Z: Summarizer,
{
    let reporter = TracingMonitorReporter;

    if once {
        monitor.run_cycle(&config, &mut state, &reporter).await;
        monitor.shutdown().await;
        return;
    }

    let cancel_token = CancellationToken::new();
    tokio::spawn(shutdown_signal(cancel_token.clone()));
    monitor.run(config, state, cancel_token, &reporter).await;
}

async fn shutdown_signal(cancel_token: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to install CTRL+C handler");
        return;
    }
    tracing::info!("Shutdown signal received, stopping after the current cycle");
    cancel_token.cancel();
}
