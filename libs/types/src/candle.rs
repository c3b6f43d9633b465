//! OHLCV candle types.

use crate::Timeframe;
use serde::{Deserialize, Serialize};

/// One OHLCV aggregate for a single time bucket.
///
/// `timestamp` is the bar open time in Unix epoch milliseconds and is the
/// series key: within a series timestamps are strictly increasing. All price
/// and volume fields are finite; the decoding boundary enforces that before a
/// candle reaches the engine.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    /// Current bar range, used by volatility-style comparisons.
    pub fn range(&self) -> f64 {
        self.high - self.low
    }

    /// True when every numeric field is finite.
    pub fn is_finite(&self) -> bool {
        self.open.is_finite()
            && self.high.is_finite()
            && self.low.is_finite()
            && self.close.is_finite()
            && self.volume.is_finite()
    }
}

/// A decoded live update: the latest known state of one (possibly still
/// forming) candle on one timeframe. Delivered by the transport in arrival
/// order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CandleUpdate {
    pub timeframe: Timeframe,
    pub candle: Candle,
}
