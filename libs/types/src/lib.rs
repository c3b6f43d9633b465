//! Shared market data vocabulary.
//!
//! Everything the engine and the exchange adapters exchange lives here:
//! candle aggregation periods ([`Timeframe`]), OHLCV aggregates ([`Candle`])
//! and the decoded stream unit ([`CandleUpdate`]). This crate stays free of
//! async and I/O so both sides can depend on it without pulling in a runtime.

mod candle;
mod timeframe;

pub use candle::{Candle, CandleUpdate};
pub use timeframe::{ParseTimeframeError, Timeframe};
