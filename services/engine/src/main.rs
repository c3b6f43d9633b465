use anyhow::Context;
use kline_engine::alerts::{AlertEngine, LogNotifier};
use kline_engine::config::{resolve_config_path, EngineConfig};
use kline_engine::dispatch::StreamDispatcher;
use kline_engine::snapshot::{FlushReason, SnapshotWriter};
use kline_engine::store::TimeSeriesStore;
use kline_engine::strategy::SignalLog;
use okx_adapter::{OkxConfig, OkxWsFeed};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config_path = resolve_config_path("KLINE_ENGINE_CONFIG", "configs/engine.toml");
    let config = EngineConfig::load_or_default(&config_path)
        .with_context(|| format!("loading config from {}", config_path.display()))?;
    info!(
        instrument = %config.instrument,
        timeframes = ?config.timeframes,
        capacity = config.series_capacity,
        "starting kline engine"
    );

    let store = Arc::new(TimeSeriesStore::new(
        &config.timeframes,
        config.series_capacity,
    ));

    let okx_config = OkxConfig {
        instrument: config.instrument.clone(),
        ..OkxConfig::default()
    };

    // Seed each series over REST before going live. A failed backfill is
    // not fatal: the series fills from the stream instead.
    let client = reqwest::Client::new();
    for &timeframe in &config.timeframes {
        match okx_adapter::fetch_history(&client, &okx_config, timeframe, config.series_capacity)
            .await
        {
            Ok(candles) => {
                let kept = store.initialize(timeframe, candles)?;
                info!(%timeframe, candles = kept, "backfill complete");
            }
            Err(e) => {
                warn!(%timeframe, error = %e, "backfill failed, starting degraded");
            }
        }
    }

    let signals = Arc::new(SignalLog::default());
    let (flush_tx, flush_rx) = mpsc::channel(8);
    let alerts = Arc::new(AlertEngine::new(
        &config.alerts,
        Arc::new(LogNotifier),
        Some(flush_tx),
    ));
    let dispatcher = StreamDispatcher::new(&config, store.clone(), signals.clone(), alerts);

    let writer = Arc::new(SnapshotWriter::new(
        &config.snapshot,
        config.instrument.clone(),
        store,
        signals,
    ));
    let writer_task = tokio::spawn(writer.clone().run(flush_rx));

    let (update_tx, mut update_rx) = mpsc::channel(1024);
    let feed = OkxWsFeed::new(okx_config, config.timeframes.clone());
    let feed_task = tokio::spawn(feed.run(update_tx));

    loop {
        tokio::select! {
            maybe_update = update_rx.recv() => match maybe_update {
                Some(update) => {
                    if let Err(e) = dispatcher.on_update(update) {
                        error!(error = %e, "failed to process update");
                    }
                }
                None => {
                    warn!("market feed channel closed");
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received");
                break;
            }
        }
    }

    feed_task.abort();
    writer_task.abort();
    if let Err(e) = writer.flush(FlushReason::Shutdown) {
        error!(error = %e, "final snapshot flush failed");
    }
    info!("kline engine stopped");
    Ok(())
}
