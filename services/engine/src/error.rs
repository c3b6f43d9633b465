//! Error types for the kline engine.

use kline_types::Timeframe;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Contract violation: the caller addressed a timeframe the store was
    /// never configured with. Fails loudly, never swallowed.
    #[error("unknown timeframe: {0} is not in the configured set")]
    UnknownTimeframe(Timeframe),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("configuration error: {message}")]
    Configuration { message: String },
}

pub type Result<T> = std::result::Result<T, EngineError>;
