//! OKX market data adapter: REST backfill and live candle streaming.

pub mod config;
pub mod decode;
pub mod error;
pub mod rest;
pub mod ws;

pub use config::OkxConfig;
pub use error::{AdapterError, Result};
pub use rest::fetch_history;
pub use ws::OkxWsFeed;
