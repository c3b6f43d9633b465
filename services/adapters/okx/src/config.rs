use serde::{Deserialize, Serialize};

/// Connection settings for the OKX market data endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OkxConfig {
    /// Business WebSocket endpoint (candle channels live here, not on the
    /// public endpoint).
    pub ws_url: String,
    pub rest_url: String,
    pub instrument: String,
    /// Application-level keepalive cadence; OKX drops connections idle for
    /// 30 seconds.
    pub ping_interval_secs: u64,
    pub reconnect_delay_secs: u64,
}

impl Default for OkxConfig {
    fn default() -> Self {
        Self {
            ws_url: "wss://ws.okx.com:8443/ws/v5/business".to_string(),
            rest_url: "https://www.okx.com".to_string(),
            instrument: "ETH-USDT-SWAP".to_string(),
            ping_interval_secs: 25,
            reconnect_delay_secs: 5,
        }
    }
}
