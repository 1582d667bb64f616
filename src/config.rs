//! Configuration file parser for rssmill.toml.
//!
//! The config file is optional: a missing or empty file yields
//! `Config::default()`. Unknown keys are ignored by serde but logged, since
//! they are usually typos. Out-of-range values are clamped with a warning;
//! only an empty database path is rejected outright.
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// Config file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),

    #[error("Database path cannot be empty")]
    EmptyDatabase,
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level application configuration, as written in the TOML file.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Path of the SQLite database file (":memory:" for a throwaway database).
    pub database: String,

    /// Number of fetch/parse workers. Also the scheduler's page size.
    pub threads: usize,

    /// Per-fetch deadline in seconds (at least 1).
    pub source_timeout_secs: u64,

    /// Minimum time between the starts of two scheduler passes.
    pub min_cycle_interval_secs: u64,

    /// Pause after a failed source count or page read.
    pub error_backoff_secs: u64,

    /// Publisher flush period in milliseconds.
    pub flush_interval_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: "rssmill.db".to_string(),
            threads: 4,
            source_timeout_secs: 10,
            min_cycle_interval_secs: 5,
            error_backoff_secs: 5,
            flush_interval_ms: 1000,
        }
    }
}

const KNOWN_KEYS: [&str; 6] = [
    "database",
    "threads",
    "source_timeout_secs",
    "min_cycle_interval_secs",
    "error_backoff_secs",
    "flush_interval_ms",
];

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = std::fs::read_to_string(path)?;
        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        Self::parse(&content)
    }

    /// Parse configuration from TOML text.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Validate and convert into the settings the pipeline runs with.
    pub fn pipeline(&self) -> Result<PipelineConfig, ConfigError> {
        if self.database.trim().is_empty() {
            return Err(ConfigError::EmptyDatabase);
        }

        Ok(PipelineConfig::new(
            self.threads,
            Duration::from_secs(self.source_timeout_secs),
        )
        .with_min_cycle_interval(Duration::from_secs(self.min_cycle_interval_secs))
        .with_error_backoff(Duration::from_secs(self.error_backoff_secs))
        .with_flush_interval(Duration::from_millis(self.flush_interval_ms)))
    }
}

// ============================================================================
// Pipeline Settings
// ============================================================================

/// Validated pipeline settings.
///
/// The constructor enforces the floors: at least one worker and a fetch
/// deadline of at least one second.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    threads: usize,
    source_timeout: Duration,
    min_cycle_interval: Duration,
    error_backoff: Duration,
    flush_interval: Duration,
}

impl PipelineConfig {
    pub const MIN_SOURCE_TIMEOUT: Duration = Duration::from_secs(1);

    pub fn new(threads: usize, source_timeout: Duration) -> Self {
        let threads = if threads < 1 {
            tracing::warn!(threads = threads, "Threads count must be > 0, using 1");
            1
        } else {
            threads
        };

        let source_timeout = if source_timeout < Self::MIN_SOURCE_TIMEOUT {
            tracing::warn!(
                timeout = ?source_timeout,
                "Source timeout must be >= 1s, using 1s"
            );
            Self::MIN_SOURCE_TIMEOUT
        } else {
            source_timeout
        };

        Self {
            threads,
            source_timeout,
            min_cycle_interval: Duration::from_secs(5),
            error_backoff: Duration::from_secs(5),
            flush_interval: Duration::from_secs(1),
        }
    }

    pub fn with_min_cycle_interval(mut self, interval: Duration) -> Self {
        self.min_cycle_interval = interval;
        self
    }

    pub fn with_error_backoff(mut self, backoff: Duration) -> Self {
        self.error_backoff = backoff;
        self
    }

    /// A zero period would make the publisher's timer panic, so it is
    /// raised to one millisecond.
    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval.max(Duration::from_millis(1));
        self
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    pub fn source_timeout(&self) -> Duration {
        self.source_timeout
    }

    pub fn min_cycle_interval(&self) -> Duration {
        self.min_cycle_interval
    }

    pub fn error_backoff(&self) -> Duration {
        self.error_backoff
    }

    pub fn flush_interval(&self) -> Duration {
        self.flush_interval
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.database, "rssmill.db");
        assert_eq!(config.threads, 4);
        assert_eq!(config.source_timeout_secs, 10);
        assert_eq!(config.min_cycle_interval_secs, 5);
        assert_eq!(config.error_backoff_secs, 5);
        assert_eq!(config.flush_interval_ms, 1000);
    }

    #[test]
    fn test_missing_file_returns_default() {
        let path = Path::new("/tmp/rssmill_test_nonexistent_config.toml");
        let config = Config::load(path).unwrap();
        assert_eq!(config.threads, 4);
    }

    #[test]
    fn test_empty_file_returns_default() {
        let dir = std::env::temp_dir().join("rssmill_config_test_empty");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, "  \n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.database, "rssmill.db");

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let config = Config::parse("threads = 8\ndatabase = \"/var/lib/rssmill.db\"\n").unwrap();
        assert_eq!(config.threads, 8);
        assert_eq!(config.database, "/var/lib/rssmill.db");
        assert_eq!(config.source_timeout_secs, 10);
    }

    #[test]
    fn test_unknown_keys_accepted() {
        let config = Config::parse("thredas = 3\n").unwrap();
        assert_eq!(config.threads, 4);
    }

    #[test]
    fn test_invalid_toml_rejected() {
        let result = Config::parse("threads = [");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_too_large_file_rejected() {
        let dir = std::env::temp_dir().join("rssmill_config_test_too_large");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, "a".repeat(1_048_577)).unwrap();

        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::TooLarge(_)));
        assert!(err.to_string().contains("too large"));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_empty_database_is_fatal() {
        let config = Config {
            database: "   ".to_string(),
            ..Config::default()
        };
        assert!(matches!(config.pipeline(), Err(ConfigError::EmptyDatabase)));
    }

    #[test]
    fn test_pipeline_clamps_threads_and_timeout() {
        let config = Config {
            threads: 0,
            source_timeout_secs: 0,
            ..Config::default()
        };
        let pipeline = config.pipeline().unwrap();
        assert_eq!(pipeline.threads(), 1);
        assert_eq!(pipeline.source_timeout(), Duration::from_secs(1));
    }

    #[test]
    fn test_pipeline_carries_intervals() {
        let config = Config::parse(
            "min_cycle_interval_secs = 30\nerror_backoff_secs = 2\nflush_interval_ms = 250\n",
        )
        .unwrap();
        let pipeline = config.pipeline().unwrap();
        assert_eq!(pipeline.min_cycle_interval(), Duration::from_secs(30));
        assert_eq!(pipeline.error_backoff(), Duration::from_secs(2));
        assert_eq!(pipeline.flush_interval(), Duration::from_millis(250));
    }

    #[test]
    fn test_zero_flush_interval_raised() {
        let pipeline = PipelineConfig::new(1, Duration::from_secs(1))
            .with_flush_interval(Duration::ZERO);
        assert_eq!(pipeline.flush_interval(), Duration::from_millis(1));
    }
}
