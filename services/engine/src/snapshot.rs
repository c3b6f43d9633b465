//! Periodic atomic persistence of market state and signal history.
//!
//! Both documents are written with a write-temp-then-rename sequence so
//! external readers never observe a partially written file.

use crate::error::Result;
use crate::store::TimeSeriesStore;
use crate::strategy::SignalLog;
use kline_types::Timeframe;
use serde::Serialize;
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

/// Why a flush is being performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushReason {
    Interval,
    AlertTriggered,
    Shutdown,
}

/// One persisted candle row with its indicator values, flattened for
/// straightforward consumption by external tooling.
#[derive(Debug, Clone, Serialize)]
pub struct SnapshotRow {
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub macd: f64,
    pub macd_signal: f64,
    pub macd_hist: f64,
    pub rsi: f64,
    pub k: f64,
    pub d: f64,
    pub j: f64,
    pub bb_upper: f64,
    pub bb_mid: f64,
    pub bb_lower: f64,
    pub vol_ma: f64,
}

#[derive(Debug, Serialize)]
struct MarketSnapshot {
    instrument: String,
    generated_at: i64,
    series: BTreeMap<Timeframe, Vec<SnapshotRow>>,
}

pub struct SnapshotWriter {
    instrument: String,
    market_path: std::path::PathBuf,
    signal_path: std::path::PathBuf,
    interval: Duration,
    store: Arc<TimeSeriesStore>,
    signals: Arc<SignalLog>,
}

impl SnapshotWriter {
    pub fn new(
        settings: &crate::config::SnapshotSettings,
        instrument: String,
        store: Arc<TimeSeriesStore>,
        signals: Arc<SignalLog>,
    ) -> Self {
        Self {
            instrument,
            market_path: settings.market_path.clone(),
            signal_path: settings.signal_path.clone(),
            interval: Duration::from_secs(settings.interval_secs),
            store,
            signals,
        }
    }

    /// Run the flush loop until the forced-flush channel closes.
    ///
    /// Interval ticks and forced-flush requests share one loop; a missed
    /// tick is skipped rather than replayed in a burst.
    pub async fn run(self: Arc<Self>, mut rx: mpsc::Receiver<FlushReason>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick completes immediately; consume it so the loop
        // starts with a full interval.
        ticker.tick().await;

        loop {
            let reason = tokio::select! {
                _ = ticker.tick() => FlushReason::Interval,
                request = rx.recv() => match request {
                    Some(reason) => reason,
                    None => {
                        info!("flush channel closed, snapshot writer exiting");
                        return;
                    }
                },
            };
            if let Err(e) = self.flush(reason) {
                error!(?reason, error = %e, "snapshot flush failed");
            }
        }
    }

    /// Write both snapshot documents once.
    pub fn flush(&self, reason: FlushReason) -> Result<()> {
        let market = MarketSnapshot {
            instrument: self.instrument.clone(),
            generated_at: chrono::Utc::now().timestamp_millis(),
            series: self.collect_rows(),
        };
        write_atomic(&self.market_path, &serde_json::to_vec_pretty(&market)?)?;

        let signals = self.signals.all();
        write_atomic(&self.signal_path, &serde_json::to_vec_pretty(&signals)?)?;

        debug!(
            ?reason,
            market = %self.market_path.display(),
            signals = %self.signal_path.display(),
            "snapshot flushed"
        );
        Ok(())
    }

    fn collect_rows(&self) -> BTreeMap<Timeframe, Vec<SnapshotRow>> {
        self.store
            .snapshot_all()
            .into_iter()
            .map(|(timeframe, series)| {
                let rows = series
                    .candles
                    .iter()
                    .enumerate()
                    .map(|(i, candle)| SnapshotRow {
                        timestamp: candle.timestamp,
                        open: candle.open,
                        high: candle.high,
                        low: candle.low,
                        close: candle.close,
                        volume: candle.volume,
                        macd: series.columns.macd[i],
                        macd_signal: series.columns.macd_signal[i],
                        macd_hist: series.columns.macd_hist[i],
                        rsi: series.columns.rsi[i],
                        k: series.columns.k[i],
                        d: series.columns.d[i],
                        j: series.columns.j[i],
                        bb_upper: series.columns.bb_upper[i],
                        bb_mid: series.columns.bb_mid[i],
                        bb_lower: series.columns.bb_lower[i],
                        vol_ma: series.columns.vol_ma[i],
                    })
                    .collect();
                (timeframe, rows)
            })
            .collect()
    }
}

/// Write `bytes` to `path` atomically: write a sibling temp file, then
/// rename over the destination.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut tmp = OsString::from(path.as_os_str());
    tmp.push(".tmp");
    let tmp = std::path::PathBuf::from(tmp);
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}
