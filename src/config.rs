//! Engine configuration.
//!
//! All fields are optional in the JSON form; missing ones take the defaults
//! below.
//!
//! ```json
//! { "max_attempts": 50, "base_delay_ms": 200, "jitter_factor": 0.5,
//!   "lock_timeout_ms": 5000, "timeout_ms": 60000 }
//! ```

use crate::settlement::retry::{Jitter, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Upper bound for every millisecond setting: one day.
const MAX_MILLIS: u64 = 86_400_000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Attempt ceiling shared by both strategies.
    pub max_attempts: u32,
    /// Delay unit; attempt `n` (0-based) waits `base * (n + 1)`.
    pub base_delay_ms: u64,
    /// Extra random delay on the optimistic path, as a fraction of the
    /// linear delay.
    pub jitter_factor: f64,
    /// How long the in-memory store waits for a row lock.
    pub lock_timeout_ms: u64,
    /// Overall budget for one transfer including every retry.
    pub timeout_ms: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_attempts: 50,
            base_delay_ms: 200,
            jitter_factor: 0.5,
            lock_timeout_ms: 5_000,
            timeout_ms: None,
        }
    }
}

impl EngineConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid("max_attempts must be at least 1".into()));
        }
        let millis = [
            ("base_delay_ms", Some(self.base_delay_ms)),
            ("lock_timeout_ms", Some(self.lock_timeout_ms)),
            ("timeout_ms", self.timeout_ms),
        ];
        for (name, value) in millis {
            if let Some(ms) = value.filter(|&ms| ms > MAX_MILLIS) {
                return Err(ConfigError::Invalid(format!(
                    "{name} must be at most {MAX_MILLIS}, got {ms}"
                )));
            }
        }
        if !self.jitter_factor.is_finite() || self.jitter_factor < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "jitter_factor must be a non-negative number, got {}",
                self.jitter_factor
            )));
        }
        Ok(())
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    fn base_policy(&self) -> RetryPolicy {
        let policy = RetryPolicy::new(self.max_attempts, Duration::from_millis(self.base_delay_ms));
        match self.timeout_ms {
            Some(ms) => policy.with_timeout(Duration::from_millis(ms)),
            None => policy,
        }
    }

    /// Linear backoff without jitter.
    pub fn pessimistic_policy(&self) -> RetryPolicy {
        self.base_policy()
    }

    /// Linear backoff plus proportional jitter.
    pub fn optimistic_policy(&self) -> RetryPolicy {
        self.base_policy()
            .with_jitter(Jitter::Proportional(self.jitter_factor))
    }
}
