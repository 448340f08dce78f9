use std::path::PathBuf;
use std::time::Duration;

/// Runtime settings, read from `CONFCAL_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub data_dir: PathBuf,
    pub journal_file: String,
    pub metrics_port: Option<u16>,
    /// Compact once this many events were appended since the last compaction.
    pub compact_threshold: u64,
    pub compact_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            journal_file: "calendars.wal".into(),
            metrics_port: None,
            compact_threshold: 1000,
            compact_interval: Duration::from_secs(60),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unset or unparsable values keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            data_dir: lookup("CONFCAL_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            journal_file: lookup("CONFCAL_JOURNAL").unwrap_or(defaults.journal_file),
            metrics_port: lookup("CONFCAL_METRICS_PORT").and_then(|s| s.parse().ok()),
            compact_threshold: lookup("CONFCAL_COMPACT_THRESHOLD")
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.compact_threshold),
            compact_interval: lookup("CONFCAL_COMPACT_INTERVAL_SECS")
                .and_then(|s| s.parse().ok())
                .filter(|&secs: &u64| secs > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.compact_interval),
        }
    }

    pub fn journal_path(&self) -> PathBuf {
        self.data_dir.join(&self.journal_file)
    }
}
