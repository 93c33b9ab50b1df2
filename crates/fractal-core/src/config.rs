//! Configuration system for fractal.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $FRACTAL_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/fractal/config.toml
//!   3. ~/.config/fractal/config.toml

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::backoff::BackoffPolicy;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FractalConfig {
    pub loader: LoaderConfig,
    pub store: StoreConfig,
}

/// Knobs for one load operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// Leaves per fetch group.
    pub batch_size: usize,
    /// Prefer one aggregated read per group over per-leaf reads.
    pub use_batched_reader: bool,
    /// Fixed leaf size. Only used for streaming byte/chunk arithmetic.
    pub chunk_size: usize,
    /// Retry rounds for leaves that failed during the fetch pass.
    pub max_retry_rounds: u32,
    /// Branch reads in flight at once during discovery, counted across the
    /// whole tree. 1 = strictly sequential.
    pub discovery_concurrency: usize,
    /// Pause between consecutive fetch groups.
    pub group_pause_ms: u64,
    /// Base wait before a retry round, multiplied by the round number.
    pub retry_round_delay_ms: u64,
    /// Pause between leaves inside one retry round.
    pub retry_leaf_pause_ms: u64,
    /// Largest segment header accepted before streaming falls back.
    pub max_header_len: usize,

    pub node_backoff: BackoffPolicy,
    pub batch_backoff: BackoffPolicy,
    pub leaf_backoff: BackoffPolicy,
}

/// Where the command-line front end finds chunks and site descriptors.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Content-addressed chunk directory: {chunk_dir}/{hex[0..2]}/{hex}
    pub chunk_dir: PathBuf,
    /// JSON manifest mapping site identifiers to root descriptors.
    pub manifest_path: PathBuf,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            use_batched_reader: true,
            chunk_size: 15_000,
            max_retry_rounds: 5,
            discovery_concurrency: 1,
            group_pause_ms: 100,
            retry_round_delay_ms: 500,
            retry_leaf_pause_ms: 100,
            max_header_len: 1024 * 1024, // 1 MiB
            node_backoff: BackoffPolicy::node_read(),
            batch_backoff: BackoffPolicy::batch_call(),
            leaf_backoff: BackoffPolicy::leaf_read(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            chunk_dir: data_dir().join("chunks"),
            manifest_path: config_dir().join("sites.json"),
        }
    }
}

impl LoaderConfig {
    pub fn group_pause(&self) -> Duration {
        Duration::from_millis(self.group_pause_ms)
    }

    /// Wait before retry round `round` (1-indexed).
    pub fn retry_round_delay(&self, round: u32) -> Duration {
        Duration::from_millis(self.retry_round_delay_ms.saturating_mul(u64::from(round)))
    }

    pub fn retry_leaf_pause(&self) -> Duration {
        Duration::from_millis(self.retry_leaf_pause_ms)
    }

    /// Reject settings that would make a load loop forever or do nothing.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid("loader.batch_size must be > 0".into()));
        }
        if self.chunk_size == 0 {
            return Err(ConfigError::Invalid("loader.chunk_size must be > 0".into()));
        }
        if self.discovery_concurrency == 0 {
            return Err(ConfigError::Invalid(
                "loader.discovery_concurrency must be > 0".into(),
            ));
        }
        for (name, policy) in [
            ("node_backoff", &self.node_backoff),
            ("batch_backoff", &self.batch_backoff),
            ("leaf_backoff", &self.leaf_backoff),
        ] {
            if policy.max_attempts == 0 {
                return Err(ConfigError::Invalid(format!(
                    "loader.{name}.max_attempts must be > 0"
                )));
            }
        }
        Ok(())
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

pub fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("fractal")
}

pub fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".local").join("share"))
        .join("fractal")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl FractalConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::file_path())
    }

    /// Load from an explicit path. A missing file yields defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(path)
                .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))?
        } else {
            FractalConfig::default()
        };
        config.apply_env_overrides();
        config.loader.validate()?;
        Ok(config)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("FRACTAL_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        Self::write_default_to(&path)?;
        Ok(path)
    }

    fn write_default_to(path: &Path) -> Result<(), ConfigError> {
        if path.exists() {
            return Ok(());
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ConfigError::WriteFailed(path.to_path_buf(), e))?;
        }
        let text = toml::to_string_pretty(&FractalConfig::default())
            .map_err(ConfigError::SerializeFailed)?;
        std::fs::write(path, text).map_err(|e| ConfigError::WriteFailed(path.to_path_buf(), e))
    }

    /// Apply FRACTAL_* env var overrides.
    fn apply_env_overrides(&mut self) {
        if let Some(v) = env_parse("FRACTAL_LOADER__BATCH_SIZE") {
            self.loader.batch_size = v;
        }
        if let Ok(v) = std::env::var("FRACTAL_LOADER__USE_BATCHED_READER") {
            self.loader.use_batched_reader = v == "true" || v == "1";
        }
        if let Some(v) = env_parse("FRACTAL_LOADER__CHUNK_SIZE") {
            self.loader.chunk_size = v;
        }
        if let Some(v) = env_parse("FRACTAL_LOADER__MAX_RETRY_ROUNDS") {
            self.loader.max_retry_rounds = v;
        }
        if let Some(v) = env_parse("FRACTAL_LOADER__DISCOVERY_CONCURRENCY") {
            self.loader.discovery_concurrency = v;
        }
        if let Ok(v) = std::env::var("FRACTAL_STORE__CHUNK_DIR") {
            self.store.chunk_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("FRACTAL_STORE__MANIFEST_PATH") {
            self.store.manifest_path = PathBuf::from(v);
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparseable env override");
            None
        }
    }
}
