use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_DATA_DIR: &str = "./data";
const DEFAULT_COMPACT_THRESHOLD: u64 = 1000;
const DEFAULT_COMPACT_INTERVAL: Duration = Duration::from_secs(60);

/// Process configuration, read from `SCHEDULR_*` environment variables.
/// Unparseable values fall back to their defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub data_dir: PathBuf,
    /// Prometheus exporter port; exporter disabled when unset.
    pub metrics_port: Option<u16>,
    /// Compact the WAL once this many commits have been appended since the last compaction.
    pub compact_threshold: u64,
    pub compact_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            metrics_port: None,
            compact_threshold: DEFAULT_COMPACT_THRESHOLD,
            compact_interval: DEFAULT_COMPACT_INTERVAL,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            data_dir: lookup("SCHEDULR_DATA_DIR")
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            metrics_port: lookup("SCHEDULR_METRICS_PORT").and_then(|s| s.trim().parse().ok()),
            compact_threshold: lookup("SCHEDULR_COMPACT_THRESHOLD")
                .and_then(|s| s.trim().parse().ok())
                .filter(|&n| n > 0)
                .unwrap_or(defaults.compact_threshold),
            compact_interval: lookup("SCHEDULR_COMPACT_INTERVAL_SECS")
                .and_then(|s| s.trim().parse().ok())
                .filter(|&n| n > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.compact_interval),
        }
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("bookings.wal")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        assert_eq!(Config::from_lookup(lookup(&[])), Config::default());
    }

    #[test]
    fn reads_every_variable() {
        let config = Config::from_lookup(lookup(&[
            ("SCHEDULR_DATA_DIR", "/var/lib/schedulr"),
            ("SCHEDULR_METRICS_PORT", "9100"),
            ("SCHEDULR_COMPACT_THRESHOLD", "50"),
            ("SCHEDULR_COMPACT_INTERVAL_SECS", "5"),
        ]));
        assert_eq!(config.data_dir, PathBuf::from("/var/lib/schedulr"));
        assert_eq!(config.metrics_port, Some(9100));
        assert_eq!(config.compact_threshold, 50);
        assert_eq!(config.compact_interval, Duration::from_secs(5));
        assert_eq!(config.wal_path(), PathBuf::from("/var/lib/schedulr/bookings.wal"));
    }

    #[test]
    fn garbage_falls_back() {
        let config = Config::from_lookup(lookup(&[
            ("SCHEDULR_DATA_DIR", "  "),
            ("SCHEDULR_METRICS_PORT", "http"),
            ("SCHEDULR_COMPACT_THRESHOLD", "0"),
            ("SCHEDULR_COMPACT_INTERVAL_SECS", "-3"),
        ]));
        assert_eq!(config, Config::default());
    }
}
