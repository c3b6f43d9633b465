//! Streaming kline engine: bounded candle series per timeframe, full
//! indicator recomputation on every update, windowed signal detection,
//! hot-reloadable one-shot alerts and atomic snapshot persistence.

pub mod alerts;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod indicators;
pub mod snapshot;
pub mod store;
pub mod strategy;

pub use error::{EngineError, Result};
