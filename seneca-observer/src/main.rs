//! seneca observer - read-only client for Marcus orchestrator instances
//!
//! Discovers a running instance, registers as an observer and writes every
//! event it receives to the log. With nothing reachable it keeps retrying in
//! the background and replays the conversation logs instead.

use seneca_link::{ConnectionManager, EventBus, EventFilter};
use seneca_utils::{init_logging_with_config, Result};
use tokio_util::sync::CancellationToken;

mod cli;
mod config;
mod sink;

use cli::Args;
use config::{ConfigLoader, ObserverConfig};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse_args();

    // Logging settings live in the config file, so load it first
    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            return Err(e);
        }
    };

    init_logging_with_config(config.log.to_log_config())?;
    tracing::info!("seneca observer starting");
    tracing::debug!("CLI args: {:?}", args);

    match run(config).await {
        Ok(()) => {
            tracing::info!("seneca observer exiting normally");
            Ok(())
        }
        Err(e) => {
            tracing::error!("seneca observer error: {}", e);
            eprintln!("Error: {}", e);
            Err(e)
        }
    }
}

fn load_config(args: &Args) -> Result<ObserverConfig> {
    let mut config = match &args.config {
        Some(path) => ConfigLoader::load_from_path(path)?,
        None => ConfigLoader::load()?,
    };
    args.apply(&mut config)?;
    ConfigLoader::validate(&config)?;
    Ok(config)
}

async fn run(config: ObserverConfig) -> Result<()> {
    let bus = EventBus::new(config.bus.clone());
    let cancel = CancellationToken::new();

    let sink = sink::spawn_log_sink(bus.subscribe(EventFilter::all()), cancel.clone());
    let manager = ConnectionManager::start(config.link.clone(), bus.clone())?;
    let reader = config.history.backfill.then(|| config.history.reader());
    let watcher =
        sink::spawn_state_watcher(manager.watch_state(), reader, bus.clone(), cancel.clone());

    tokio::signal::ctrl_c().await?;
    tracing::info!("Interrupt received, shutting down");

    manager.shutdown().await;
    cancel.cancel();

    let _ = watcher.await;
    if let Ok(written) = sink.await {
        let stats = bus.stats();
        tracing::info!(
            written,
            published = stats.published,
            dropped = stats.dropped,
            "Event summary"
        );
    }

    Ok(())
}
