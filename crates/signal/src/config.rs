use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::info;

/// Scheduler tunables file (TOML). Every key is optional.
///
/// Example `config/scheduler.toml`:
/// ```toml
/// max_lead_secs = 600
/// default_source = "OTC-3"
/// gate_margin_secs = 20
///
/// [aliases]
/// Cameroon = 1
/// Jakarta = 7
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Signals further ahead than this are dropped.
    pub max_lead_secs: i64,
    /// Timezone hint used when a signal carries none.
    pub default_source: String,
    /// Expiry used when a signal carries none.
    pub default_timeframe: String,
    /// The readiness gate gives up this long before entry.
    pub gate_margin_secs: u64,
    /// A leg starts preparing the UI this long before its entry.
    pub prepare_lead_secs: u64,
    /// Sleep between polls of the gate, sweep and watchers.
    pub poll_interval_ms: u64,
    /// Per-trade watcher deadline, counted from placement.
    pub watch_deadline_secs: u64,
    /// A leg still unplaced this long after its entry is abandoned.
    pub entry_tolerance_ms: u64,
    /// Free-text zone names mapped to a UTC offset in whole hours.
    pub aliases: HashMap<String, i32>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_lead_secs: 600,
            default_source: "OTC-3".to_string(),
            default_timeframe: "M1".to_string(),
            gate_margin_secs: 20,
            prepare_lead_secs: 45,
            poll_interval_ms: 500,
            watch_deadline_secs: 60,
            entry_tolerance_ms: 1_000,
            aliases: default_aliases(),
        }
    }
}

pub fn default_aliases() -> HashMap<String, i32> {
    HashMap::from([("Cameroon".to_string(), 1), ("Jakarta".to_string(), 7)])
}

impl SchedulerConfig {
    /// Load from a TOML file. A missing file yields the defaults;
    /// a malformed one exits the process.
    pub fn load(path: &str) -> Self {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path, "No scheduler config found, using defaults");
                return Self::default();
            }
            Err(e) => panic!("Failed to read scheduler config at '{path}': {e}"),
        };
        Self::from_toml_str(&content)
            .unwrap_or_else(|e| panic!("Failed to parse scheduler config at '{path}': {e}"))
    }

    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        let mut cfg: SchedulerConfig = toml::from_str(content)?;
        // File aliases extend the built-ins rather than replace them.
        for (name, hours) in default_aliases() {
            cfg.aliases.entry(name).or_insert(hours);
        }
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let cfg = SchedulerConfig::from_toml_str("").unwrap();
        assert_eq!(cfg.max_lead_secs, 600);
        assert_eq!(cfg.default_source, "OTC-3");
        assert_eq!(cfg.aliases.get("Cameroon"), Some(&1));
    }

    #[test]
    fn file_aliases_extend_builtins() {
        let cfg = SchedulerConfig::from_toml_str(
            r#"
            gate_margin_secs = 30

            [aliases]
            Lagos = 1
            "#,
        )
        .unwrap();
        assert_eq!(cfg.gate_margin_secs, 30);
        assert_eq!(cfg.aliases.get("Lagos"), Some(&1));
        assert_eq!(cfg.aliases.get("Jakarta"), Some(&7));
    }

    #[test]
    fn missing_file_yields_defaults() {
        let cfg = SchedulerConfig::load("/nonexistent/scheduler.toml");
        assert_eq!(cfg.watch_deadline_secs, 60);
    }
}
