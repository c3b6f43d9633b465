//! Per-update pipeline: apply, recompute, detect, alert.

use crate::alerts::{AlertEngine, LiveValues};
use crate::error::Result;
use crate::store::{ApplyOutcome, AugmentedSeries, TimeSeriesStore};
use crate::strategy::{SignalLog, StrategyRunner};
use kline_types::{CandleUpdate, Timeframe};
use std::sync::Arc;
use tracing::{info, warn};

/// Routes each incoming candle update through the full pipeline:
/// series mutation, indicator recomputation, signal re-evaluation and,
/// for the alert timeframe only, live alert checks.
pub struct StreamDispatcher {
    store: Arc<TimeSeriesStore>,
    runner: StrategyRunner,
    signals: Arc<SignalLog>,
    alerts: Arc<AlertEngine>,
    alert_timeframe: Timeframe,
    range_lookback: usize,
}

impl StreamDispatcher {
    pub fn new(
        config: &crate::config::EngineConfig,
        store: Arc<TimeSeriesStore>,
        signals: Arc<SignalLog>,
        alerts: Arc<AlertEngine>,
    ) -> Self {
        Self {
            store,
            runner: StrategyRunner::new(config.strategy.window, config.strategy.min_history),
            signals,
            alerts,
            alert_timeframe: config.alert_timeframe(),
            range_lookback: config.alerts.range_lookback,
        }
    }

    /// Process one update. Out-of-order and non-finite updates are dropped
    /// without touching strategies or alerts.
    pub fn on_update(&self, update: CandleUpdate) -> Result<()> {
        if !update.candle.is_finite() {
            warn!(
                timeframe = %update.timeframe,
                timestamp = update.candle.timestamp,
                "dropping candle with non-finite fields"
            );
            return Ok(());
        }

        let outcome = self.store.apply(update.timeframe, update.candle)?;
        if outcome == ApplyOutcome::DroppedOutOfOrder {
            return Ok(());
        }

        let series = self.store.snapshot(update.timeframe)?;

        if outcome == ApplyOutcome::Appended && series.len() >= 2 {
            // A fresh bar opening means the previous one just closed.
            let closed = &series.candles[series.len() - 2];
            let when = chrono::DateTime::from_timestamp_millis(closed.timestamp)
                .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| closed.timestamp.to_string());
            info!(
                timeframe = %update.timeframe,
                time = %when,
                close = closed.close,
                volume = closed.volume,
                "candle closed"
            );
        }

        let events = self.runner.evaluate(&series);
        self.signals.replace(update.timeframe, events);

        if update.timeframe == self.alert_timeframe {
            let values = self.live_values(&series);
            self.alerts.check(&values);
        }
        Ok(())
    }

    /// Sample the freshest row of a series for alert evaluation.
    fn live_values(&self, series: &AugmentedSeries) -> LiveValues {
        let n = series.len();
        if n == 0 {
            return LiveValues::default();
        }
        let last = &series.candles[n - 1];

        // Current-bar range against the average range of the preceding
        // closed bars.
        let volatility_ratio = if n > self.range_lookback {
            let start = n - 1 - self.range_lookback;
            let mean: f64 = series.candles[start..n - 1]
                .iter()
                .map(|c| c.range())
                .sum::<f64>()
                / self.range_lookback as f64;
            if mean > 0.0 {
                last.range() / mean
            } else {
                0.0
            }
        } else {
            0.0
        };

        LiveValues {
            price: last.close,
            rsi: series.columns.rsi[n - 1],
            j: series.columns.j[n - 1],
            volatility_ratio,
        }
    }
}
