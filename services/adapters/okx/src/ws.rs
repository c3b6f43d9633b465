//! Live candle stream over the OKX business WebSocket.

use crate::config::OkxConfig;
use crate::decode::{candle_channel, decode_push};
use crate::error::Result;
use futures_util::{SinkExt, StreamExt};
use kline_types::{CandleUpdate, Timeframe};
use serde_json::json;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

/// Subscribes to candle channels and forwards every pushed row as a
/// [`CandleUpdate`]. Reconnects with a fixed delay on any failure and keeps
/// the connection alive with application-level pings.
pub struct OkxWsFeed {
    config: OkxConfig,
    timeframes: Vec<Timeframe>,
}

impl OkxWsFeed {
    pub fn new(config: OkxConfig, timeframes: Vec<Timeframe>) -> Self {
        Self { config, timeframes }
    }

    /// Run until the output channel closes.
    pub async fn run(self, tx: mpsc::Sender<CandleUpdate>) {
        let delay = Duration::from_secs(self.config.reconnect_delay_secs);
        loop {
            match self.connect_and_stream(&tx).await {
                Ok(()) => {
                    info!("update channel closed, feed exiting");
                    return;
                }
                Err(e) => {
                    error!(error = %e, "websocket session ended, reconnecting");
                }
            }
            tokio::time::sleep(delay).await;
        }
    }

    /// One connection lifetime. `Ok` means the consumer went away; `Err`
    /// means the connection broke and should be retried.
    async fn connect_and_stream(&self, tx: &mpsc::Sender<CandleUpdate>) -> Result<()> {
        let (ws_stream, _) = connect_async(self.config.ws_url.as_str()).await?;
        let (mut sink, mut stream) = ws_stream.split();

        let args: Vec<_> = self
            .timeframes
            .iter()
            .map(|tf| {
                json!({
                    "channel": candle_channel(*tf),
                    "instId": self.config.instrument,
                })
            })
            .collect();
        let subscription = json!({"op": "subscribe", "args": args});
        sink.send(Message::Text(subscription.to_string())).await?;
        info!(
            url = %self.config.ws_url,
            instrument = %self.config.instrument,
            channels = self.timeframes.len(),
            "subscribed to candle channels"
        );

        let mut ping = tokio::time::interval(Duration::from_secs(self.config.ping_interval_secs));
        ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ping.tick().await;

        loop {
            tokio::select! {
                _ = ping.tick() => {
                    sink.send(Message::Text("ping".to_string())).await?;
                }
                frame = stream.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        if text == "pong" {
                            continue;
                        }
                        if let Some((timeframe, candles)) = decode_push(&text) {
                            for candle in candles {
                                let update = CandleUpdate { timeframe, candle };
                                if tx.send(update).await.is_err() {
                                    return Ok(());
                                }
                            }
                        } else if let Some(event) = frame_event(&text) {
                            match event.as_str() {
                                "error" => warn!(frame = %text, "exchange reported error"),
                                _ => debug!(event = %event, "control frame"),
                            }
                        }
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        sink.send(Message::Pong(payload)).await?;
                    }
                    Some(Ok(Message::Close(_))) => {
                        warn!("server closed the connection");
                        return Err(tokio_tungstenite::tungstenite::Error::ConnectionClosed.into());
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(e.into()),
                    None => {
                        warn!("websocket stream ended");
                        return Err(tokio_tungstenite::tungstenite::Error::ConnectionClosed.into());
                    }
                },
            }
        }
    }
}

fn frame_event(text: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(text).ok()?;
    value.get("event")?.as_str().map(str::to_string)
}
