//! REST candle backfill.

use crate::config::OkxConfig;
use crate::decode::{okx_bar, parse_candle_row};
use crate::error::{AdapterError, Result};
use kline_types::{Candle, Timeframe};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

/// Maximum rows per candles request, imposed by OKX.
const PAGE_LIMIT: usize = 300;

#[derive(Debug, Deserialize)]
struct OkxResponse {
    code: String,
    #[serde(default)]
    msg: String,
    #[serde(default)]
    data: Vec<Value>,
}

/// Fetch up to `max_count` of the most recent candles for one timeframe,
/// returned oldest first.
///
/// OKX serves candles newest first in pages of at most 300; older pages are
/// addressed with an `after` cursor set to the oldest timestamp seen so far.
pub async fn fetch_history(
    client: &reqwest::Client,
    config: &OkxConfig,
    timeframe: Timeframe,
    max_count: usize,
) -> Result<Vec<Candle>> {
    let url = format!("{}/api/v5/market/candles", config.rest_url);
    let bar = okx_bar(timeframe);

    // Newest first while paging; reversed once at the end.
    let mut collected: Vec<Candle> = Vec::with_capacity(max_count);
    let mut cursor: Option<i64> = None;

    while collected.len() < max_count {
        let limit = PAGE_LIMIT.min(max_count - collected.len());
        let mut request = client.get(&url).query(&[
            ("instId", config.instrument.as_str()),
            ("bar", bar),
            ("limit", &limit.to_string()),
        ]);
        if let Some(after) = cursor {
            request = request.query(&[("after", after.to_string())]);
        }

        let response: OkxResponse = request.send().await?.error_for_status()?.json().await?;
        if response.code != "0" {
            return Err(AdapterError::Exchange {
                code: response.code,
                message: response.msg,
            });
        }
        if response.data.is_empty() {
            break;
        }

        let mut page = Vec::with_capacity(response.data.len());
        for row in &response.data {
            page.push(parse_candle_row(row)?);
        }
        debug!(%timeframe, rows = page.len(), "fetched candle page");

        cursor = page.iter().map(|c| c.timestamp).min();
        let exhausted = page.len() < limit;
        collected.extend(page);
        if exhausted {
            break;
        }
    }

    collected.sort_by_key(|c| c.timestamp);
    collected.dedup_by_key(|c| c.timestamp);
    if collected.len() > max_count {
        let excess = collected.len() - max_count;
        collected.drain(..excess);
    }
    Ok(collected)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_exchange_error_codes() {
        let response: OkxResponse = serde_json::from_str(
            r#"{"code":"51001","msg":"Instrument ID does not exist","data":[]}"#,
        )
        .unwrap();
        assert_eq!(response.code, "51001");
        assert!(!response.msg.is_empty());
    }

    #[test]
    fn parses_success_envelope() {
        let response: OkxResponse = serde_json::from_str(
            r#"{"code":"0","msg":"","data":[["1700000000000","2000","2010","1995","2005","120","241060","241060","1"]]}"#,
        )
        .unwrap();
        assert_eq!(response.code, "0");
        assert_eq!(response.data.len(), 1);
        assert!(parse_candle_row(&response.data[0]).is_ok());
    }
}
