//! Decoding of OKX candle payloads, shared by the REST and WebSocket paths.

use crate::error::{AdapterError, Result};
use kline_types::{Candle, Timeframe};
use serde_json::Value;
use tracing::debug;

/// OKX bar identifier for a timeframe. Minute bars are lowercase, hour bars
/// uppercase.
pub fn okx_bar(timeframe: Timeframe) -> &'static str {
    match timeframe {
        Timeframe::M1 => "1m",
        Timeframe::M5 => "5m",
        Timeframe::M15 => "15m",
        Timeframe::H1 => "1H",
    }
}

/// WebSocket channel name for a timeframe's candle stream.
pub fn candle_channel(timeframe: Timeframe) -> String {
    format!("candle{}", okx_bar(timeframe))
}

/// Inverse of [`candle_channel`].
pub fn channel_timeframe(channel: &str) -> Option<Timeframe> {
    let bar = channel.strip_prefix("candle")?;
    Timeframe::ALL.iter().copied().find(|tf| okx_bar(*tf) == bar)
}

/// Parse one OKX candle row.
///
/// Rows are arrays of decimal strings:
/// `[ts, open, high, low, close, vol, volCcy, ...]`. Quote-currency volume
/// (`volCcy`) is preferred; short rows fall back to base volume.
pub fn parse_candle_row(row: &Value) -> Result<Candle> {
    let fields = row
        .as_array()
        .ok_or_else(|| AdapterError::Parse("candle row is not an array".to_string()))?;
    if fields.len() < 6 {
        return Err(AdapterError::Parse(format!(
            "candle row has {} fields, expected at least 6",
            fields.len()
        )));
    }

    let timestamp: i64 = field_str(fields, 0)?
        .parse()
        .map_err(|_| AdapterError::Parse("bad candle timestamp".to_string()))?;
    let volume_index = if fields.len() > 6 { 6 } else { 5 };

    Ok(Candle {
        timestamp,
        open: field_f64(fields, 1)?,
        high: field_f64(fields, 2)?,
        low: field_f64(fields, 3)?,
        close: field_f64(fields, 4)?,
        volume: field_f64(fields, volume_index)?,
    })
}

fn field_str<'a>(fields: &'a [Value], index: usize) -> Result<&'a str> {
    fields[index]
        .as_str()
        .ok_or_else(|| AdapterError::Parse(format!("candle field {} is not a string", index)))
}

fn field_f64(fields: &[Value], index: usize) -> Result<f64> {
    field_str(fields, index)?
        .parse()
        .map_err(|_| AdapterError::Parse(format!("candle field {} is not numeric", index)))
}

/// Decode one WebSocket push into candles, oldest first.
///
/// Returns `None` for frames that are not candle data (subscription acks,
/// errors already logged by the caller). Malformed rows inside an otherwise
/// valid push are skipped rather than failing the frame.
pub fn decode_push(text: &str) -> Option<(Timeframe, Vec<Candle>)> {
    let value: Value = serde_json::from_str(text).ok()?;
    let channel = value.get("arg")?.get("channel")?.as_str()?;
    let timeframe = channel_timeframe(channel)?;
    let rows = value.get("data")?.as_array()?;

    let mut candles = Vec::with_capacity(rows.len());
    for row in rows {
        match parse_candle_row(row) {
            Ok(candle) => candles.push(candle),
            Err(e) => debug!(error = %e, "skipping malformed candle row"),
        }
    }
    candles.sort_by_key(|c| c.timestamp);
    Some((timeframe, candles))
}
