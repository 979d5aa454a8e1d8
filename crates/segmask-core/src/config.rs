//! Configuration file support.
//!
//! Values are layered: defaults, then the global file
//! (`~/.segmask/config.toml`), then the local file (`./.segmaskrc`), then
//! `SEGMASK_*` environment variables. Command-line flags are applied last by
//! the front end. The runner never reads any of this directly; it receives the
//! derived [`PollPolicy`], [`HttpSettings`] and [`RunnerLimits`].

use crate::error::{SegmaskError, SegmaskResult};
use crate::poller::PollPolicy;
use crate::runner::RunnerLimits;
use crate::transport::HttpSettings;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENV_ENDPOINT: &str = "SEGMASK_ENDPOINT";
pub const ENV_OUTPUT_DIR: &str = "SEGMASK_OUTPUT_DIR";
pub const ENV_LOG_LEVEL: &str = "SEGMASK_LOG_LEVEL";

pub const DEFAULT_MAX_ATTEMPTS: u32 = 30;
pub const DEFAULT_INTERVAL_MS: u64 = 2000;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_CONFIRM_THRESHOLD: usize = 100;

// Section fields stay `None` until a layer sets them, so merging one file
// over another only replaces the keys that file actually names.

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollConfig {
    #[serde(default)]
    pub max_attempts: Option<u32>,
    #[serde(default)]
    pub interval_ms: Option<u64>,
}

impl PollConfig {
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS)
    }

    pub fn interval_ms(&self) -> u64 {
        self.interval_ms.unwrap_or(DEFAULT_INTERVAL_MS)
    }

    fn merge(&mut self, other: &Self) {
        self.max_attempts = other.max_attempts.or(self.max_attempts);
        self.interval_ms = other.interval_ms.or(self.interval_ms);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
    #[serde(default)]
    pub connect_timeout_secs: Option<u64>,
}

impl HttpConfig {
    pub fn request_timeout_secs(&self) -> u64 {
        self.request_timeout_secs.unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS)
    }

    pub fn connect_timeout_secs(&self) -> u64 {
        self.connect_timeout_secs.unwrap_or(DEFAULT_CONNECT_TIMEOUT_SECS)
    }

    fn merge(&mut self, other: &Self) {
        self.request_timeout_secs = other.request_timeout_secs.or(self.request_timeout_secs);
        self.connect_timeout_secs = other.connect_timeout_secs.or(self.connect_timeout_secs);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Hard limit on files per batch. Unlimited when unset.
    #[serde(default)]
    pub max_batch_size: Option<usize>,
    /// Ask before submitting more files than this.
    #[serde(default)]
    pub confirm_threshold: Option<usize>,
}

impl BatchConfig {
    pub fn confirm_threshold(&self) -> usize {
        self.confirm_threshold.unwrap_or(DEFAULT_CONFIRM_THRESHOLD)
    }

    fn merge(&mut self, other: &Self) {
        self.max_batch_size = other.max_batch_size.or(self.max_batch_size);
        self.confirm_threshold = other.confirm_threshold.or(self.confirm_threshold);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmaskConfig {
    /// Upload URL. Poll URLs are this plus the job token.
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Where result images are saved.
    #[serde(default)]
    pub output_dir: Option<PathBuf>,

    #[serde(default)]
    pub log_level: Option<String>,

    #[serde(default)]
    pub poll: PollConfig,

    #[serde(default)]
    pub http: HttpConfig,

    #[serde(default)]
    pub batch: BatchConfig,
}

impl SegmaskConfig {
    pub fn load_from_file(path: &Path) -> SegmaskResult<Self> {
        if !path.exists() {
            return Err(SegmaskError::Config(format!("configuration file not found: {}", path.display())));
        }
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| SegmaskError::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn save_to_file(&self, path: &Path) -> SegmaskResult<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| SegmaskError::Config(format!("failed to serialize: {}", e)))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn default_global_path() -> PathBuf {
        dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")).join(".segmask").join("config.toml")
    }

    pub fn default_local_path() -> PathBuf {
        PathBuf::from(".segmaskrc")
    }

    /// Loads global then local files and applies environment overrides.
    /// Missing files are skipped; unreadable or invalid ones are errors.
    pub fn discover_and_load() -> SegmaskResult<Self> {
        let mut config = Self::default();
        for path in [Self::default_global_path(), Self::default_local_path()] {
            if path.exists() {
                config.merge(&Self::load_from_file(&path)?);
            }
        }
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Values set in `other` override `self`, key by key. Unset keys never
    /// clobber values from an earlier layer.
    pub fn merge(&mut self, other: &Self) {
        if let Some(ref endpoint) = other.endpoint {
            self.endpoint = Some(endpoint.clone());
        }
        if let Some(ref dir) = other.output_dir {
            self.output_dir = Some(dir.clone());
        }
        if let Some(ref level) = other.log_level {
            self.log_level = Some(level.clone());
        }
        self.poll.merge(&other.poll);
        self.http.merge(&other.http);
        self.batch.merge(&other.batch);
    }

    /// Copy with every section key filled in, as used for display and for
    /// writing a starter file.
    pub fn resolved(&self) -> Self {
        let mut resolved = self.clone();
        resolved.poll.max_attempts = Some(self.poll.max_attempts());
        resolved.poll.interval_ms = Some(self.poll.interval_ms());
        resolved.http.request_timeout_secs = Some(self.http.request_timeout_secs());
        resolved.http.connect_timeout_secs = Some(self.http.connect_timeout_secs());
        resolved.batch.confirm_threshold = Some(self.batch.confirm_threshold());
        resolved
    }

    /// Applies `SEGMASK_*` overrides read through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(endpoint) = lookup(ENV_ENDPOINT).filter(|v| !v.is_empty()) {
            self.endpoint = Some(endpoint);
        }
        if let Some(dir) = lookup(ENV_OUTPUT_DIR).filter(|v| !v.is_empty()) {
            self.output_dir = Some(PathBuf::from(dir));
        }
        if let Some(level) = lookup(ENV_LOG_LEVEL).filter(|v| !v.is_empty()) {
            self.log_level = Some(level);
        }
    }

    pub fn validate(&self) -> SegmaskResult<()> {
        if let Some(ref endpoint) = self.endpoint {
            if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
                return Err(SegmaskError::Config(format!(
                    "endpoint must be an http(s) URL, got {}",
                    endpoint
                )));
            }
        }
        if self.poll.max_attempts() == 0 {
            return Err(SegmaskError::Config("poll.max_attempts must be >= 1".to_string()));
        }
        if self.http.request_timeout_secs() == 0 || self.http.connect_timeout_secs() == 0 {
            return Err(SegmaskError::Config("http timeouts must be >= 1 second".to_string()));
        }
        if self.batch.max_batch_size == Some(0) {
            return Err(SegmaskError::Config("batch.max_batch_size must be >= 1".to_string()));
        }
        Ok(())
    }

    pub fn poll_policy(&self) -> PollPolicy {
        PollPolicy {
            max_attempts: self.poll.max_attempts(),
            interval: Duration::from_millis(self.poll.interval_ms()),
        }
    }

    pub fn http_settings(&self) -> HttpSettings {
        HttpSettings {
            request_timeout: Duration::from_secs(self.http.request_timeout_secs()),
            connect_timeout: Duration::from_secs(self.http.connect_timeout_secs()),
        }
    }

    pub fn runner_limits(&self) -> RunnerLimits {
        RunnerLimits { max_batch_size: self.batch.max_batch_size }
    }
}
