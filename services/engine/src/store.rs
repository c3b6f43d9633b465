//! Bounded, ordered candle series per timeframe.
//!
//! The store exclusively owns every series. Writers (the stream consumer)
//! take an exclusive lock scoped to one timeframe for the duration of an
//! append/amend plus the indicator recompute; readers (snapshot flush,
//! strategy evaluation) take a shared lock just long enough to copy data out.
//! Locks are per-timeframe, so one timeframe's recompute never blocks
//! another's ingestion.

use crate::error::{EngineError, Result};
use crate::indicators::{self, IndicatorColumns};
use kline_types::{Candle, Timeframe};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::warn;

/// A candle series plus its indicator columns.
///
/// Invariants observers can rely on: candles are strictly ascending by
/// timestamp, `candles.len() <= capacity`, and every indicator column has
/// exactly one value per candle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AugmentedSeries {
    pub candles: Vec<Candle>,
    pub columns: IndicatorColumns,
}

impl AugmentedSeries {
    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn last(&self) -> Option<&Candle> {
        self.candles.last()
    }

    /// View over the most recent `n` rows (or all of them when shorter).
    pub fn tail(&self, n: usize) -> AugmentedView<'_> {
        AugmentedView {
            series: self,
            start: self.len().saturating_sub(n),
        }
    }
}

/// Borrowed window over the end of an [`AugmentedSeries`].
///
/// Indices are local to the window, `0..len()`. The final row may still be
/// forming; detectors read the last *closed* row at `len() - 2`.
#[derive(Debug, Clone, Copy)]
pub struct AugmentedView<'a> {
    series: &'a AugmentedSeries,
    start: usize,
}

impl<'a> AugmentedView<'a> {
    pub fn len(&self) -> usize {
        self.series.len() - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn candle(&self, i: usize) -> &'a Candle {
        &self.series.candles[self.start + i]
    }

    pub fn macd(&self, i: usize) -> f64 {
        self.series.columns.macd[self.start + i]
    }

    pub fn macd_signal(&self, i: usize) -> f64 {
        self.series.columns.macd_signal[self.start + i]
    }

    pub fn bb_upper(&self, i: usize) -> f64 {
        self.series.columns.bb_upper[self.start + i]
    }

    pub fn bb_lower(&self, i: usize) -> f64 {
        self.series.columns.bb_lower[self.start + i]
    }
}

/// What `apply` did with an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// New bar: timestamp advanced past the last candle.
    Appended,
    /// Same bar: the still-forming candle was replaced wholesale.
    Amended,
    /// Timestamp regressed; the update was discarded.
    DroppedOutOfOrder,
}

/// Owns one bounded series per configured timeframe.
pub struct TimeSeriesStore {
    capacity: usize,
    series: HashMap<Timeframe, RwLock<AugmentedSeries>>,
    dropped_out_of_order: AtomicU64,
}

impl TimeSeriesStore {
    pub fn new(timeframes: &[Timeframe], capacity: usize) -> Self {
        let series = timeframes
            .iter()
            .map(|&tf| (tf, RwLock::new(AugmentedSeries::default())))
            .collect();
        Self {
            capacity,
            series,
            dropped_out_of_order: AtomicU64::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn timeframes(&self) -> impl Iterator<Item = Timeframe> + '_ {
        self.series.keys().copied()
    }

    fn slot(&self, tf: Timeframe) -> Result<&RwLock<AugmentedSeries>> {
        self.series.get(&tf).ok_or(EngineError::UnknownTimeframe(tf))
    }

    /// Seed a timeframe from backfilled history, oldest first.
    ///
    /// Keeps the newest `capacity` candles when handed more. Intended for
    /// startup, before the stream is connected; not safe to interleave with
    /// `apply` for the same timeframe.
    pub fn initialize(&self, tf: Timeframe, mut candles: Vec<Candle>) -> Result<usize> {
        let slot = self.slot(tf)?;
        if candles.len() > self.capacity {
            candles.drain(..candles.len() - self.capacity);
        }
        let columns = indicators::compute(&candles);
        let mut guard = slot.write();
        guard.candles = candles;
        guard.columns = columns;
        Ok(guard.len())
    }

    /// Merge one live update into the series for `tf`.
    ///
    /// Append when the timestamp advances (evicting the oldest candle past
    /// capacity), amend the last candle wholesale when it matches, drop when
    /// it regresses. Indicators are recomputed over the full series before
    /// the lock is released, so readers never observe misaligned columns.
    pub fn apply(&self, tf: Timeframe, candle: Candle) -> Result<ApplyOutcome> {
        let slot = self.slot(tf)?;
        let mut guard = slot.write();

        let outcome = match guard.last() {
            Some(last) if candle.timestamp < last.timestamp => {
                drop(guard);
                let total = self.dropped_out_of_order.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(%tf, candle_ts = candle.timestamp, dropped_total = total, "dropped out-of-order update");
                return Ok(ApplyOutcome::DroppedOutOfOrder);
            }
            Some(last) if candle.timestamp == last.timestamp => {
                *guard.candles.last_mut().expect("non-empty series") = candle;
                ApplyOutcome::Amended
            }
            _ => {
                guard.candles.push(candle);
                if guard.candles.len() > self.capacity {
                    guard.candles.remove(0);
                }
                ApplyOutcome::Appended
            }
        };

        let columns = indicators::compute(&guard.candles);
        if columns.len() == guard.candles.len() {
            guard.columns = columns;
        } else {
            // A recompute must never take down the ingestion path. Keep the
            // stale columns, realigned to the new length, and carry on.
            let len = guard.candles.len();
            warn!(%tf, "indicator recompute misaligned, keeping stale columns");
            guard.columns.resize_to(len);
        }

        Ok(outcome)
    }

    /// Consistent read-only copy of the current series for `tf`.
    pub fn snapshot(&self, tf: Timeframe) -> Result<AugmentedSeries> {
        Ok(self.slot(tf)?.read().clone())
    }

    /// Consistent copies of every timeframe, shortest first.
    ///
    /// Each series is copied under its own shared lock; the result is never
    /// torn within a timeframe.
    pub fn snapshot_all(&self) -> BTreeMap<Timeframe, AugmentedSeries> {
        self.series
            .iter()
            .map(|(&tf, lock)| (tf, lock.read().clone()))
            .collect()
    }

    pub fn len(&self, tf: Timeframe) -> Result<usize> {
        Ok(self.slot(tf)?.read().len())
    }

    /// Updates discarded because their timestamp regressed.
    pub fn dropped_out_of_order(&self) -> u64 {
        self.dropped_out_of_order.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candle(ts: i64, close: f64) -> Candle {
        Candle {
            timestamp: ts,
            open: close - 0.5,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume: 25.0,
        }
    }

    fn store(capacity: usize) -> TimeSeriesStore {
        TimeSeriesStore::new(&[Timeframe::M1], capacity)
    }

    #[test]
    fn unknown_timeframe_is_loud() {
        let store = store(10);
        let err = store.apply(Timeframe::H1, candle(100, 1.0)).unwrap_err();
        assert!(matches!(err, EngineError::UnknownTimeframe(Timeframe::H1)));
        assert!(store.snapshot(Timeframe::H1).is_err());
    }

    #[test]
    fn series_stays_bounded_and_sorted() {
        let store = store(5);
        for ts in (0..20).map(|i| i * 60_000) {
            store.apply(Timeframe::M1, candle(ts, 100.0)).unwrap();
        }
        let snap = store.snapshot(Timeframe::M1).unwrap();
        assert_eq!(snap.len(), 5);
        assert!(snap
            .candles
            .windows(2)
            .all(|w| w[0].timestamp < w[1].timestamp));
        assert_eq!(snap.columns.len(), 5);
    }

    #[test]
    fn amend_replaces_wholesale_and_is_idempotent_in_timestamp() {
        let store = store(10);
        store.apply(Timeframe::M1, candle(100, 10.0)).unwrap();
        let first = store.apply(Timeframe::M1, candle(200, 11.0)).unwrap();
        assert_eq!(first, ApplyOutcome::Appended);

        let mut update = candle(200, 12.5);
        update.volume = 99.0;
        assert_eq!(
            store.apply(Timeframe::M1, update).unwrap(),
            ApplyOutcome::Amended
        );
        let snap = store.snapshot(Timeframe::M1).unwrap();
        assert_eq!(snap.len(), 2);
        assert_eq!(snap.last().unwrap().close, 12.5);
        // Volume is replaced, not accumulated.
        assert_eq!(snap.last().unwrap().volume, 99.0);
    }

    #[test]
    fn out_of_order_update_is_dropped() {
        let store = store(10);
        store.apply(Timeframe::M1, candle(100, 10.0)).unwrap();
        store.apply(Timeframe::M1, candle(200, 11.0)).unwrap();
        let before = store.snapshot(Timeframe::M1).unwrap();

        let outcome = store.apply(Timeframe::M1, candle(150, 9.0)).unwrap();
        assert_eq!(outcome, ApplyOutcome::DroppedOutOfOrder);
        assert_eq!(store.dropped_out_of_order(), 1);
        assert_eq!(store.snapshot(Timeframe::M1).unwrap(), before);
    }

    #[test]
    fn initialize_keeps_newest_when_over_capacity() {
        let store = store(3);
        let candles: Vec<Candle> = (0..6).map(|i| candle(i * 60_000, 100.0 + i as f64)).collect();
        let len = store.initialize(Timeframe::M1, candles).unwrap();
        assert_eq!(len, 3);
        let snap = store.snapshot(Timeframe::M1).unwrap();
        assert_eq!(snap.candles[0].timestamp, 3 * 60_000);
        assert_eq!(snap.columns.len(), 3);
    }

    // End-to-end scenario from the store contract: capacity 3, append,
    // evict, amend, drop.
    #[test]
    fn sliding_window_scenario() {
        let store = store(3);
        for ts in [100, 200, 300] {
            store.apply(Timeframe::M1, candle(ts, 50.0)).unwrap();
        }
        assert_eq!(store.len(Timeframe::M1).unwrap(), 3);

        store.apply(Timeframe::M1, candle(400, 51.0)).unwrap();
        let snap = store.snapshot(Timeframe::M1).unwrap();
        let timestamps: Vec<i64> = snap.candles.iter().map(|c| c.timestamp).collect();
        assert_eq!(timestamps, vec![200, 300, 400]);

        store.apply(Timeframe::M1, candle(400, 52.5)).unwrap();
        let snap = store.snapshot(Timeframe::M1).unwrap();
        assert_eq!(snap.len(), 3);
        assert_eq!(snap.last().unwrap().close, 52.5);

        assert_eq!(
            store.apply(Timeframe::M1, candle(350, 48.0)).unwrap(),
            ApplyOutcome::DroppedOutOfOrder
        );
        assert_eq!(store.snapshot(Timeframe::M1).unwrap().len(), 3);
        assert_eq!(
            store.snapshot(Timeframe::M1).unwrap().last().unwrap().close,
            52.5
        );
    }

    #[test]
    fn tail_view_exposes_window_locally() {
        let store = store(10);
        for i in 0..8 {
            store
                .apply(Timeframe::M1, candle(i * 60_000, 100.0 + i as f64))
                .unwrap();
        }
        let snap = store.snapshot(Timeframe::M1).unwrap();
        let view = snap.tail(3);
        assert_eq!(view.len(), 3);
        assert_eq!(view.candle(0).timestamp, 5 * 60_000);
        assert_eq!(view.candle(2).timestamp, 7 * 60_000);
    }
}
