//! Engine configuration.

use crate::error::{EngineError, Result};
use kline_types::Timeframe;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Instrument monitored by this process (single-instrument engine).
    pub instrument: String,

    /// Timeframes to maintain. The first (shortest) entry also drives alert
    /// evaluation.
    pub timeframes: Vec<Timeframe>,

    /// Maximum retained candles per timeframe (sliding window).
    pub series_capacity: usize,

    pub strategy: StrategySettings,
    pub snapshot: SnapshotSettings,
    pub alerts: AlertSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategySettings {
    /// Recent rows each detector re-evaluates per update.
    pub window: usize,
    /// Minimum series length before any detector runs.
    pub min_history: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotSettings {
    pub market_path: PathBuf,
    pub signal_path: PathBuf,
    /// Interval-driven flush cadence in seconds.
    pub interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertSettings {
    pub rules_path: PathBuf,
    /// Cadence of the rule-file modification check, in seconds.
    pub reload_interval_secs: u64,
    /// Fractional tolerance for `reach` comparisons (0.002 = 0.2%).
    pub reach_tolerance: f64,
    /// Closed bars averaged for the volatility-ratio denominator.
    pub range_lookback: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            instrument: "ETH-USDT-SWAP".to_string(),
            timeframes: vec![Timeframe::M1, Timeframe::M5, Timeframe::M15, Timeframe::H1],
            series_capacity: 800,
            strategy: StrategySettings::default(),
            snapshot: SnapshotSettings::default(),
            alerts: AlertSettings::default(),
        }
    }
}

impl Default for StrategySettings {
    fn default() -> Self {
        Self {
            window: 60,
            min_history: 50,
        }
    }
}

impl Default for SnapshotSettings {
    fn default() -> Self {
        Self {
            market_path: PathBuf::from("market_snapshot.json"),
            signal_path: PathBuf::from("signals.json"),
            interval_secs: 30,
        }
    }
}

impl Default for AlertSettings {
    fn default() -> Self {
        Self {
            rules_path: PathBuf::from("alerts.json"),
            reload_interval_secs: 5,
            reach_tolerance: 0.002,
            range_lookback: 14,
        }
    }
}

impl EngineConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| EngineError::Configuration {
            message: format!("failed to read {}: {}", path.display(), e),
        })?;
        let config: Self = toml::from_str(&content).map_err(|e| EngineError::Configuration {
            message: format!("failed to parse {}: {}", path.display(), e),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration, falling back to defaults when the file is absent.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::load(path)
        } else {
            tracing::info!(path = %path.display(), "config file not found, using defaults");
            Ok(Self::default())
        }
    }

    fn validate(&self) -> Result<()> {
        if self.timeframes.is_empty() {
            return Err(EngineError::Configuration {
                message: "at least one timeframe must be configured".to_string(),
            });
        }
        if self.series_capacity == 0 {
            return Err(EngineError::Configuration {
                message: "series_capacity must be positive".to_string(),
            });
        }
        if self.strategy.window < self.strategy.min_history {
            return Err(EngineError::Configuration {
                message: format!(
                    "strategy window ({}) must be at least min_history ({})",
                    self.strategy.window, self.strategy.min_history
                ),
            });
        }
        Ok(())
    }

    /// The timeframe whose updates drive alert evaluation.
    pub fn alert_timeframe(&self) -> Timeframe {
        self.timeframes[0]
    }
}

/// Resolve the config path from an environment variable with a fallback.
pub fn resolve_config_path(env_var: &str, default: &str) -> PathBuf {
    std::env::var(env_var)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(default))
}
