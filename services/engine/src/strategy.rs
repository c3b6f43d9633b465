//! Pattern-detection strategies and signal events.
//!
//! Detectors are a closed set of tagged variants sharing one `check`
//! capability over a bounded recent window. Each run re-derives the full
//! signal list for that window; the caller replaces its prior log with the
//! result instead of appending, so overlapping re-evaluations never
//! accumulate duplicates.
//!
//! Every detector reads the last fully closed row (window index `len - 2`);
//! the final row can still mutate and is never used to confirm a pattern.

use crate::store::{AugmentedSeries, AugmentedView};
use kline_types::Timeframe;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Local extremum radius for divergence peak/trough confirmation.
const DIVERGENCE_RADIUS: usize = 5;
/// A divergence is only reported while its defining extremum is at most this
/// many rows from the window end; older ones would replay every cycle.
const DIVERGENCE_RECENCY: usize = 7;
/// Detectors comparing two trailing closed rows need a little context.
const MIN_ROWS_FOR_CROSS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SignalKind {
    BullishCross,
    BearishCross,
    BreakUpper,
    BreakLower,
    BearishDivergence,
    BullishDivergence,
}

/// Which display pane a signal targets. Informational only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalChannel {
    Main,
    Macd,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalEvent {
    pub kind: SignalKind,
    pub channel: SignalChannel,
    pub price: f64,
    pub timestamp: i64,
    pub note: String,
}

/// The closed set of pattern detectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// MACD DIF/DEA crossover on the last closed bar.
    MacdCross,
    /// Close crossing outside a Bollinger band between two closed bars.
    BollingerBreak,
    /// Price/MACD divergence over recent confirmed peaks and troughs.
    MacdDivergence,
}

impl Strategy {
    pub const ALL: [Strategy; 3] = [
        Strategy::MacdCross,
        Strategy::BollingerBreak,
        Strategy::MacdDivergence,
    ];

    /// Run this detector over the window. `None` means no signal; a detector
    /// that cannot read the rows it needs also answers `None` rather than
    /// aborting the batch.
    pub fn check(&self, view: &AugmentedView<'_>) -> Option<SignalEvent> {
        match self {
            Strategy::MacdCross => macd_cross(view),
            Strategy::BollingerBreak => bollinger_break(view),
            Strategy::MacdDivergence => macd_divergence(view),
        }
    }
}

fn macd_cross(view: &AugmentedView<'_>) -> Option<SignalEvent> {
    if view.len() < MIN_ROWS_FOR_CROSS {
        return None;
    }
    let curr = view.len() - 2;
    let prev = view.len() - 3;

    let spread_prev = view.macd(prev) - view.macd_signal(prev);
    let spread_curr = view.macd(curr) - view.macd_signal(curr);

    let kind = if spread_prev < 0.0 && spread_curr > 0.0 {
        SignalKind::BullishCross
    } else if spread_prev > 0.0 && spread_curr < 0.0 {
        SignalKind::BearishCross
    } else {
        return None;
    };

    Some(SignalEvent {
        kind,
        channel: SignalChannel::Macd,
        price: view.candle(curr).close,
        timestamp: view.candle(curr).timestamp,
        note: match kind {
            SignalKind::BullishCross => "DIF crossed above DEA".to_string(),
            _ => "DIF crossed below DEA".to_string(),
        },
    })
}

fn bollinger_break(view: &AugmentedView<'_>) -> Option<SignalEvent> {
    if view.len() < MIN_ROWS_FOR_CROSS {
        return None;
    }
    let curr = view.len() - 2;
    let prev = view.len() - 3;

    // Zero bands mean the lookback has not filled yet.
    if view.bb_upper(curr) == 0.0 || view.bb_upper(prev) == 0.0 {
        return None;
    }

    let close_curr = view.candle(curr).close;
    let close_prev = view.candle(prev).close;

    if close_prev <= view.bb_upper(prev) && close_curr > view.bb_upper(curr) {
        return Some(SignalEvent {
            kind: SignalKind::BreakUpper,
            channel: SignalChannel::Main,
            price: view.candle(curr).high,
            timestamp: view.candle(curr).timestamp,
            note: "close broke above upper band".to_string(),
        });
    }
    if close_prev >= view.bb_lower(prev) && close_curr < view.bb_lower(curr) {
        return Some(SignalEvent {
            kind: SignalKind::BreakLower,
            channel: SignalChannel::Main,
            price: view.candle(curr).low,
            timestamp: view.candle(curr).timestamp,
            note: "close broke below lower band".to_string(),
        });
    }
    None
}

fn macd_divergence(view: &AugmentedView<'_>) -> Option<SignalEvent> {
    if view.len() < 2 * DIVERGENCE_RADIUS + 2 {
        return None;
    }
    let last_idx = view.len() - 1;
    let mut signal = None;

    // Bearish: price makes a higher high while MACD makes a lower high,
    // with positive oscillator at the earlier peak.
    let peaks = local_extrema(view, DIVERGENCE_RADIUS, Extremum::Peak);
    if let [.., p1, p2] = peaks.as_slice() {
        if last_idx - p2 <= DIVERGENCE_RECENCY {
            let (price_p1, price_p2) = (view.candle(*p1).high, view.candle(*p2).high);
            let (macd_p1, macd_p2) = (view.macd(*p1), view.macd(*p2));
            if price_p2 > price_p1 && macd_p2 < macd_p1 && macd_p1 > 0.0 {
                signal = Some(SignalEvent {
                    kind: SignalKind::BearishDivergence,
                    channel: SignalChannel::Main,
                    price: price_p2,
                    timestamp: view.candle(*p2).timestamp,
                    note: "higher high with weakening MACD".to_string(),
                });
            }
        }
    }

    // Bullish mirror over troughs; when both confirm, the trough wins.
    let troughs = local_extrema(view, DIVERGENCE_RADIUS, Extremum::Trough);
    if let [.., t1, t2] = troughs.as_slice() {
        if last_idx - t2 <= DIVERGENCE_RECENCY {
            let (price_t1, price_t2) = (view.candle(*t1).low, view.candle(*t2).low);
            let (macd_t1, macd_t2) = (view.macd(*t1), view.macd(*t2));
            if price_t2 < price_t1 && macd_t2 > macd_t1 && macd_t1 < 0.0 {
                signal = Some(SignalEvent {
                    kind: SignalKind::BullishDivergence,
                    channel: SignalChannel::Main,
                    price: price_t2,
                    timestamp: view.candle(*t2).timestamp,
                    note: "lower low with strengthening MACD".to_string(),
                });
            }
        }
    }

    signal
}

#[derive(Clone, Copy)]
enum Extremum {
    Peak,
    Trough,
}

/// Indices whose high (or low) strictly dominates every row within `radius`
/// on both sides. The trailing `radius` rows can never confirm, which also
/// keeps the still-forming last row out.
fn local_extrema(view: &AugmentedView<'_>, radius: usize, which: Extremum) -> Vec<usize> {
    let len = view.len();
    if len < 2 * radius + 1 {
        return Vec::new();
    }
    let value = |i: usize| match which {
        Extremum::Peak => view.candle(i).high,
        Extremum::Trough => view.candle(i).low,
    };
    let mut out = Vec::new();
    for i in radius..len - radius {
        let center = value(i);
        let dominated = (i - radius..i)
            .chain(i + 1..=i + radius)
            .all(|n| match which {
                Extremum::Peak => value(n) < center,
                Extremum::Trough => value(n) > center,
            });
        if dominated {
            out.push(i);
        }
    }
    out
}

/// Evaluates the detector set over the most recent window of a series.
///
/// Pure given the slice: two runs over identical input produce identical
/// output, in the same order.
pub struct StrategyRunner {
    strategies: Vec<Strategy>,
    window: usize,
    min_history: usize,
}

impl StrategyRunner {
    pub fn new(window: usize, min_history: usize) -> Self {
        Self {
            strategies: Strategy::ALL.to_vec(),
            window,
            min_history,
        }
    }

    /// Re-derive the signal list for the series' recent window, newest last.
    ///
    /// No two returned events share both timestamp and kind. The caller must
    /// replace its prior log for this series with the result.
    pub fn evaluate(&self, series: &AugmentedSeries) -> Vec<SignalEvent> {
        if series.len() < self.min_history {
            return Vec::new();
        }
        let view = series.tail(self.window);
        let mut seen: HashSet<(i64, SignalKind)> = HashSet::new();
        let mut events: Vec<SignalEvent> = Vec::new();
        for strategy in &self.strategies {
            if let Some(event) = strategy.check(&view) {
                if seen.insert((event.timestamp, event.kind)) {
                    events.push(event);
                }
            }
        }
        events.sort_by_key(|e| e.timestamp);
        events
    }
}

/// Shared, replace-only log of the latest evaluation per timeframe.
#[derive(Debug, Default)]
pub struct SignalLog {
    inner: RwLock<BTreeMap<Timeframe, Vec<SignalEvent>>>,
}

impl SignalLog {
    /// Replace the stored events for one timeframe with a fresh evaluation.
    pub fn replace(&self, tf: Timeframe, events: Vec<SignalEvent>) {
        self.inner.write().insert(tf, events);
    }

    pub fn for_timeframe(&self, tf: Timeframe) -> Vec<SignalEvent> {
        self.inner.read().get(&tf).cloned().unwrap_or_default()
    }

    /// Every stored event, grouped by timeframe (shortest first), newest
    /// last within each group.
    pub fn all(&self) -> BTreeMap<Timeframe, Vec<SignalEvent>> {
        self.inner.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::IndicatorColumns;
    use kline_types::Candle;

    fn flat_candles(n: usize, close: f64) -> Vec<Candle> {
        (0..n)
            .map(|i| Candle {
                timestamp: 60_000 * i as i64,
                open: close,
                high: close + 1.0,
                low: close - 1.0,
                close,
                volume: 10.0,
            })
            .collect()
    }

    /// Series with hand-set indicator columns so detector logic can be
    /// driven directly.
    fn series(candles: Vec<Candle>) -> AugmentedSeries {
        let n = candles.len();
        let mut columns = IndicatorColumns::default();
        columns.resize_to(n);
        AugmentedSeries { candles, columns }
    }

    #[test]
    fn below_min_history_yields_nothing() {
        let runner = StrategyRunner::new(60, 50);
        let s = series(flat_candles(49, 100.0));
        assert!(runner.evaluate(&s).is_empty());
    }

    #[test]
    fn bullish_cross_fires_on_sign_flip_only() {
        let mut s = series(flat_candles(60, 100.0));
        let n = s.len();
        // Closed-row spread signs: ... -1, -1, +1 ending at the last closed row.
        s.columns.macd[n - 4] = -1.0;
        s.columns.macd[n - 3] = -1.0;
        s.columns.macd[n - 2] = 1.0;

        let runner = StrategyRunner::new(60, 50);
        let events = runner.evaluate(&s);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, SignalKind::BullishCross);
        assert_eq!(events[0].timestamp, s.candles[n - 2].timestamp);
        assert_eq!(events[0].channel, SignalChannel::Macd);

        // One bar earlier the spread had not flipped yet: no event.
        let mut earlier = s.clone();
        earlier.candles.pop();
        earlier.columns.resize_to(n - 1);
        assert!(runner.evaluate(&earlier).is_empty());
    }

    #[test]
    fn bearish_cross_mirrors() {
        let mut s = series(flat_candles(60, 100.0));
        let n = s.len();
        s.columns.macd[n - 3] = 2.0;
        s.columns.macd[n - 2] = -2.0;
        let events = StrategyRunner::new(60, 50).evaluate(&s);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, SignalKind::BearishCross);
    }

    #[test]
    fn band_break_needs_a_crossing_transition() {
        let mut s = series(flat_candles(60, 100.0));
        let n = s.len();
        for i in 0..n {
            s.columns.bb_upper[i] = 105.0;
            s.columns.bb_lower[i] = 95.0;
        }
        // Previous closed row inside, current closed row strictly outside.
        s.candles[n - 3].close = 104.0;
        s.candles[n - 2].close = 106.0;
        s.candles[n - 2].high = 106.5;

        let events = StrategyRunner::new(60, 50).evaluate(&s);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, SignalKind::BreakUpper);
        assert_eq!(events[0].price, 106.5);

        // Already outside on both rows: no fresh break.
        s.candles[n - 3].close = 107.0;
        assert!(StrategyRunner::new(60, 50).evaluate(&s).is_empty());
    }

    #[test]
    fn break_lower_uses_candle_low() {
        let mut s = series(flat_candles(60, 100.0));
        let n = s.len();
        for i in 0..n {
            s.columns.bb_upper[i] = 105.0;
            s.columns.bb_lower[i] = 95.0;
        }
        s.candles[n - 3].close = 96.0;
        s.candles[n - 2].close = 94.0;
        s.candles[n - 2].low = 93.5;

        let events = StrategyRunner::new(60, 50).evaluate(&s);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, SignalKind::BreakLower);
        assert_eq!(events[0].price, 93.5);
    }

    #[test]
    fn bearish_divergence_on_higher_high_weaker_macd() {
        let mut s = series(flat_candles(60, 100.0));
        // Earlier peak: high 110, MACD 5. Later peak: high 115, MACD 3.
        s.candles[30].high = 110.0;
        s.columns.macd[30] = 5.0;
        s.candles[53].high = 115.0;
        s.columns.macd[53] = 3.0;

        let events = StrategyRunner::new(60, 50).evaluate(&s);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, SignalKind::BearishDivergence);
        assert_eq!(events[0].price, 115.0);
        assert_eq!(events[0].timestamp, s.candles[53].timestamp);
    }

    #[test]
    fn stale_divergence_is_not_replayed() {
        let mut s = series(flat_candles(60, 100.0));
        // Both peaks well before the recency bound.
        s.candles[20].high = 110.0;
        s.columns.macd[20] = 5.0;
        s.candles[35].high = 115.0;
        s.columns.macd[35] = 3.0;

        assert!(StrategyRunner::new(60, 50).evaluate(&s).is_empty());
    }

    #[test]
    fn bullish_divergence_needs_negative_prior_macd() {
        let mut s = series(flat_candles(60, 100.0));
        s.candles[30].low = 90.0;
        s.columns.macd[30] = -4.0;
        s.candles[53].low = 88.0;
        s.columns.macd[53] = -2.0;

        let events = StrategyRunner::new(60, 50).evaluate(&s);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, SignalKind::BullishDivergence);

        // Positive oscillator at the earlier trough disqualifies it.
        s.columns.macd[30] = 4.0;
        assert!(StrategyRunner::new(60, 50).evaluate(&s).is_empty());
    }

    #[test]
    fn evaluation_is_deterministic() {
        let mut s = series(flat_candles(60, 100.0));
        let n = s.len();
        s.columns.macd[n - 3] = -1.0;
        s.columns.macd[n - 2] = 1.0;
        s.candles[30].high = 110.0;
        s.columns.macd[30] = 5.0;

        let runner = StrategyRunner::new(60, 50);
        let first = runner.evaluate(&s);
        let second = runner.evaluate(&s);
        assert_eq!(first, second);
    }

    #[test]
    fn signal_log_replaces_rather_than_appends() {
        let log = SignalLog::default();
        let event = SignalEvent {
            kind: SignalKind::BreakUpper,
            channel: SignalChannel::Main,
            price: 101.0,
            timestamp: 42,
            note: "test".to_string(),
        };
        log.replace(Timeframe::M1, vec![event.clone(), event.clone()]);
        log.replace(Timeframe::M1, vec![event]);
        assert_eq!(log.for_timeframe(Timeframe::M1).len(), 1);
        assert_eq!(log.all().len(), 1);
    }
}
