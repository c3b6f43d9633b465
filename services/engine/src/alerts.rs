//! Declarative price/indicator alerts with hot-reloaded rules.
//!
//! Rules live in an external JSON document and are reloaded wholesale
//! whenever the file's modification time advances, checked on a fixed
//! cadence rather than every evaluation. Each rule is a one-shot: once
//! fired it stays suppressed until the next reload re-arms everything.

use crate::error::Result;
use crate::snapshot::FlushReason;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;
use std::time::{Duration, Instant, SystemTime};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    /// Live value at or above the target.
    Above,
    /// Live value at or below the target.
    Below,
    /// Live value within a small fractional tolerance of the target.
    Reach,
    /// Current-bar range over trailing average range at or above the target
    /// multiplier.
    VolatilityRatio,
}

/// Which live value a rule compares against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LiveIndicator {
    Price,
    Rsi,
    J,
    Volatility,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AlertRule {
    pub target: f64,
    pub comparison: Comparison,
    pub note: String,
    pub indicator: LiveIndicator,
}

impl AlertRule {
    /// Deterministic identity derived from rule contents; scopes one-shot
    /// suppression to the rule itself rather than its list position.
    fn identity(&self) -> u64 {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        self.target.to_bits().hash(&mut hasher);
        self.comparison.hash(&mut hasher);
        self.note.hash(&mut hasher);
        self.indicator.hash(&mut hasher);
        hasher.finish()
    }
}

/// Live values sampled from the freshest row of the alert timeframe.
#[derive(Debug, Clone, Copy, Default)]
pub struct LiveValues {
    pub price: f64,
    pub rsi: f64,
    pub j: f64,
    /// Current-bar range divided by the trailing average range; zero until
    /// enough closed bars exist.
    pub volatility_ratio: f64,
}

impl LiveValues {
    fn get(&self, indicator: LiveIndicator) -> f64 {
        match indicator {
            LiveIndicator::Price => self.price,
            LiveIndicator::Rsi => self.rsi,
            LiveIndicator::J => self.j,
            LiveIndicator::Volatility => self.volatility_ratio,
        }
    }
}

/// Notification capability injected into the engine.
///
/// Implementations must return promptly: `notify` is invoked on the
/// evaluation path and slow delivery belongs on a task of the
/// implementation's own.
pub trait Notifier: Send + Sync {
    fn notify(&self, value_text: &str, note: &str, comparison: Comparison);
}

/// Default notifier: structured log line, nothing else.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, value_text: &str, note: &str, comparison: Comparison) {
        warn!(value = value_text, note, ?comparison, "alert triggered");
    }
}

#[derive(Debug, Default)]
struct RuleState {
    enabled: bool,
    rules: Vec<AlertRule>,
    fired: HashSet<u64>,
    marker: Option<SystemTime>,
    last_reload_check: Option<Instant>,
}

pub struct AlertEngine {
    rules_path: PathBuf,
    reload_interval: Duration,
    reach_tolerance: f64,
    notifier: std::sync::Arc<dyn Notifier>,
    flush_tx: Option<mpsc::Sender<FlushReason>>,
    state: Mutex<RuleState>,
}

impl AlertEngine {
    pub fn new(
        settings: &crate::config::AlertSettings,
        notifier: std::sync::Arc<dyn Notifier>,
        flush_tx: Option<mpsc::Sender<FlushReason>>,
    ) -> Self {
        let engine = Self {
            rules_path: settings.rules_path.clone(),
            reload_interval: Duration::from_secs(settings.reload_interval_secs),
            reach_tolerance: settings.reach_tolerance,
            notifier,
            flush_tx,
            state: Mutex::new(RuleState::default()),
        };
        engine.reload();
        engine
    }

    /// Evaluate every armed rule against the given live values.
    ///
    /// Also drives the periodic reload check. A satisfied rule fires at most
    /// once per reload epoch: it notifies, requests a forced snapshot flush,
    /// and stays suppressed until the rule set is reloaded.
    pub fn check(&self, values: &LiveValues) {
        let triggered: Vec<AlertRule> = {
            let mut state = self.state.lock();

            let due = state
                .last_reload_check
                .map(|at| at.elapsed() >= self.reload_interval)
                .unwrap_or(true);
            if due {
                state.last_reload_check = Some(Instant::now());
                if self.marker_advanced(&state) {
                    drop(state);
                    self.reload();
                    state = self.state.lock();
                }
            }

            if !state.enabled {
                return;
            }

            let tolerance = self.reach_tolerance;
            let armed: Vec<AlertRule> = state
                .rules
                .iter()
                .filter(|rule| !state.fired.contains(&rule.identity()))
                .filter(|rule| rule_satisfied(rule, values, tolerance))
                .cloned()
                .collect();
            for rule in &armed {
                state.fired.insert(rule.identity());
            }
            armed
        };

        // Side effects happen outside the lock.
        for rule in triggered {
            let live = values.get(rule.indicator);
            let value_text = format!("{:?} {} = {:.4}", rule.indicator, rule.comparison_label(), live);
            self.notifier.notify(&value_text, &rule.note, rule.comparison);
            if let Some(tx) = &self.flush_tx {
                // Best effort: a full queue means a flush is already pending.
                let _ = tx.try_send(FlushReason::AlertTriggered);
            }
        }
    }

    /// Reload the rule set from its file, re-arming every rule.
    ///
    /// Malformed entries are skipped individually; a missing or unreadable
    /// file disables alerting until the file reappears.
    pub fn reload(&self) {
        let marker = std::fs::metadata(&self.rules_path)
            .and_then(|m| m.modified())
            .ok();
        let (enabled, rules) = match std::fs::read_to_string(&self.rules_path) {
            Ok(content) => match parse_rule_file(&content) {
                Ok(parsed) => parsed,
                Err(e) => {
                    warn!(path = %self.rules_path.display(), error = %e, "rule file unparseable, alerting disabled");
                    (false, Vec::new())
                }
            },
            Err(e) => {
                debug!(path = %self.rules_path.display(), error = %e, "no rule file, alerting disabled");
                (false, Vec::new())
            }
        };

        let mut state = self.state.lock();
        info!(
            enabled,
            rules = rules.len(),
            "alert rules reloaded, suppression cleared"
        );
        state.enabled = enabled;
        state.rules = rules;
        state.fired.clear();
        state.marker = marker;
    }

    fn marker_advanced(&self, state: &RuleState) -> bool {
        let current = std::fs::metadata(&self.rules_path)
            .and_then(|m| m.modified())
            .ok();
        current.is_some() && current != state.marker
    }

    #[cfg(test)]
    fn rule_count(&self) -> usize {
        self.state.lock().rules.len()
    }
}

impl AlertRule {
    fn comparison_label(&self) -> &'static str {
        match self.comparison {
            Comparison::Above => "above",
            Comparison::Below => "below",
            Comparison::Reach => "reached",
            Comparison::VolatilityRatio => "volatility",
        }
    }
}

fn rule_satisfied(rule: &AlertRule, values: &LiveValues, reach_tolerance: f64) -> bool {
    let live = values.get(rule.indicator);
    match rule.comparison {
        Comparison::Above => live >= rule.target,
        Comparison::Below => live <= rule.target,
        Comparison::Reach => (live - rule.target).abs() <= rule.target.abs() * reach_tolerance,
        Comparison::VolatilityRatio => values.volatility_ratio >= rule.target,
    }
}

#[derive(Debug, Deserialize)]
struct RuleFile {
    enabled: bool,
    rules: Vec<serde_json::Value>,
}

/// Parse the rule document. The document itself must be valid JSON with the
/// expected top-level shape; individual rule entries are validated one by
/// one and bad ones are dropped with a warning.
fn parse_rule_file(content: &str) -> Result<(bool, Vec<AlertRule>)> {
    let file: RuleFile = serde_json::from_str(content)?;
    let mut rules = Vec::with_capacity(file.rules.len());
    for (index, entry) in file.rules.iter().enumerate() {
        match parse_rule_entry(entry) {
            Some(rule) => rules.push(rule),
            None => warn!(index, "skipping malformed alert rule entry"),
        }
    }
    Ok((file.enabled, rules))
}

/// One entry: `[target, comparison, note, indicator?]`; the indicator
/// defaults to `price`.
fn parse_rule_entry(entry: &serde_json::Value) -> Option<AlertRule> {
    let fields = entry.as_array()?;
    let target = fields.first()?.as_f64().filter(|t| t.is_finite())?;
    let comparison: Comparison = serde_json::from_value(fields.get(1)?.clone()).ok()?;
    let note = fields.get(2)?.as_str()?.to_string();
    let indicator = match fields.get(3) {
        Some(value) => serde_json::from_value(value.clone()).ok()?,
        None => LiveIndicator::Price,
    };
    Some(AlertRule {
        target,
        comparison,
        note,
        indicator,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AlertSettings;
    use parking_lot::Mutex as PlMutex;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[derive(Default)]
    struct RecordingNotifier {
        hits: PlMutex<Vec<(String, String)>>,
    }

    impl Notifier for RecordingNotifier {
        fn notify(&self, value_text: &str, note: &str, _comparison: Comparison) {
            self.hits
                .lock()
                .push((value_text.to_string(), note.to_string()));
        }
    }

    fn write_rules(dir: &TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("alerts.json");
        std::fs::write(&path, body).unwrap();
        path
    }

    fn engine_with(
        path: PathBuf,
        flush_tx: Option<mpsc::Sender<FlushReason>>,
    ) -> (AlertEngine, Arc<RecordingNotifier>) {
        let notifier = Arc::new(RecordingNotifier::default());
        let settings = AlertSettings {
            rules_path: path,
            ..AlertSettings::default()
        };
        let engine = AlertEngine::new(&settings, notifier.clone(), flush_tx);
        (engine, notifier)
    }

    fn price(p: f64) -> LiveValues {
        LiveValues {
            price: p,
            ..LiveValues::default()
        }
    }

    #[test]
    fn above_rule_fires_once_per_epoch() {
        let dir = TempDir::new().unwrap();
        let path = write_rules(&dir, r#"{"enabled": true, "rules": [[2100.0, "above", "breakout"]]}"#);
        let (engine, notifier) = engine_with(path, None);

        engine.check(&price(2050.0));
        engine.check(&price(2101.0));
        engine.check(&price(2099.0));
        engine.check(&price(2150.0));

        let hits = notifier.hits.lock();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].1, "breakout");
    }

    #[test]
    fn reload_rearms_fired_rules() {
        let dir = TempDir::new().unwrap();
        let path = write_rules(&dir, r#"{"enabled": true, "rules": [[2100.0, "above", "breakout"]]}"#);
        let (engine, notifier) = engine_with(path, None);

        engine.check(&price(2101.0));
        assert_eq!(notifier.hits.lock().len(), 1);

        engine.reload();
        engine.check(&price(2102.0));
        assert_eq!(notifier.hits.lock().len(), 2);
    }

    #[test]
    fn malformed_entries_are_skipped_not_fatal() {
        let dir = TempDir::new().unwrap();
        let path = write_rules(
            &dir,
            r#"{"enabled": true, "rules": [
                [2100.0, "above", "ok"],
                ["not-a-number", "above", "bad"],
                [50.0, "sideways", "bad comparison"],
                [30.0, "below", "rsi floor", "rsi"]
            ]}"#,
        );
        let (engine, _notifier) = engine_with(path, None);
        assert_eq!(engine.rule_count(), 2);
    }

    #[test]
    fn disabled_file_suppresses_everything() {
        let dir = TempDir::new().unwrap();
        let path = write_rules(&dir, r#"{"enabled": false, "rules": [[1.0, "above", "always"]]}"#);
        let (engine, notifier) = engine_with(path, None);
        engine.check(&price(10.0));
        assert!(notifier.hits.lock().is_empty());
    }

    #[test]
    fn reach_uses_fractional_tolerance() {
        let dir = TempDir::new().unwrap();
        let path = write_rules(&dir, r#"{"enabled": true, "rules": [[2000.0, "reach", "round number"]]}"#);
        let (engine, notifier) = engine_with(path, None);

        engine.check(&price(2010.0)); // 0.5% away, outside 0.2%
        assert!(notifier.hits.lock().is_empty());
        engine.check(&price(2003.0)); // 0.15% away
        assert_eq!(notifier.hits.lock().len(), 1);
    }

    #[test]
    fn indicator_rules_read_their_own_live_value() {
        let dir = TempDir::new().unwrap();
        let path = write_rules(
            &dir,
            r#"{"enabled": true, "rules": [
                [75.0, "above", "overbought", "rsi"],
                [3.0, "volatility_ratio", "range spike", "volatility"]
            ]}"#,
        );
        let (engine, notifier) = engine_with(path, None);

        let values = LiveValues {
            price: 2000.0,
            rsi: 80.0,
            j: 50.0,
            volatility_ratio: 1.2,
        };
        engine.check(&values);
        let hits = notifier.hits.lock();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].1, "overbought");
    }

    #[test]
    fn triggered_rule_requests_forced_flush() {
        let dir = TempDir::new().unwrap();
        let path = write_rules(&dir, r#"{"enabled": true, "rules": [[2100.0, "above", "breakout"]]}"#);
        let (tx, mut rx) = mpsc::channel(4);
        let (engine, _notifier) = engine_with(path, Some(tx));

        engine.check(&price(2101.0));
        assert_eq!(rx.try_recv().unwrap(), FlushReason::AlertTriggered);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn identity_is_content_derived() {
        let rule = AlertRule {
            target: 2100.0,
            comparison: Comparison::Above,
            note: "breakout".to_string(),
            indicator: LiveIndicator::Price,
        };
        assert_eq!(rule.identity(), rule.clone().identity());
        let mut other = rule.clone();
        other.target = 2200.0;
        assert_ne!(rule.identity(), other.identity());
    }
}
