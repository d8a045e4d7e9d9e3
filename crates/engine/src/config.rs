//! Engine configuration.

use std::time::Duration;

use thiserror::Error;

/// Tuning knobs for the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// How often the scheduler loop evaluates triggers.
    pub tick_interval: Duration,
    /// Maximum number of executions running at once across all workflows.
    pub max_concurrent_executions: usize,
    /// Maximum number of times a retryable step failure will be retried.
    pub step_max_retries: u32,
    /// Base delay for exponential back-off between step retries.
    pub retry_base_delay: Duration,
    /// History limit used when the caller does not supply one.
    pub default_history_limit: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
            max_concurrent_executions: 16,
            step_max_retries: 3,
            retry_base_delay: Duration::from_millis(100),
            default_history_limit: 50,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: '{value}'")]
    Invalid { key: &'static str, value: String },
}

impl EngineConfig {
    /// Build a config from `ENGINE_*` environment variables, falling back to
    /// defaults for anything unset.
    ///
    /// | variable                     | field                       |
    /// |------------------------------|-----------------------------|
    /// | `ENGINE_TICK_MS`             | `tick_interval`             |
    /// | `ENGINE_MAX_CONCURRENCY`     | `max_concurrent_executions` |
    /// | `ENGINE_STEP_MAX_RETRIES`    | `step_max_retries`          |
    /// | `ENGINE_RETRY_BASE_DELAY_MS` | `retry_base_delay`          |
    /// | `ENGINE_HISTORY_LIMIT`       | `default_history_limit`     |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`EngineConfig::from_env`] with an injectable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let millis = |key: &'static str, default: Duration| -> Result<Duration, ConfigError> {
            parse_or(&lookup, key, default.as_millis() as u64).map(Duration::from_millis)
        };

        let config = Self {
            tick_interval: millis("ENGINE_TICK_MS", defaults.tick_interval)?,
            max_concurrent_executions: parse_or(
                &lookup,
                "ENGINE_MAX_CONCURRENCY",
                defaults.max_concurrent_executions,
            )?,
            step_max_retries: parse_or(&lookup, "ENGINE_STEP_MAX_RETRIES", defaults.step_max_retries)?,
            retry_base_delay: millis("ENGINE_RETRY_BASE_DELAY_MS", defaults.retry_base_delay)?,
            default_history_limit: parse_or(
                &lookup,
                "ENGINE_HISTORY_LIMIT",
                defaults.default_history_limit,
            )?,
        };

        if config.tick_interval.is_zero() {
            return Err(ConfigError::Invalid {
                key: "ENGINE_TICK_MS",
                value: "0".into(),
            });
        }
        if config.max_concurrent_executions == 0 {
            return Err(ConfigError::Invalid {
                key: "ENGINE_MAX_CONCURRENCY",
                value: "0".into(),
            });
        }
        Ok(config)
    }

    /// Set the scheduler tick interval.
    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    /// Set maximum concurrency.
    pub fn with_max_concurrent_executions(mut self, max: usize) -> Self {
        self.max_concurrent_executions = max.max(1);
        self
    }

    /// Set the step retry policy.
    pub fn with_step_retries(mut self, max_retries: u32, base_delay: Duration) -> Self {
        self.step_max_retries = max_retries;
        self.retry_base_delay = base_delay;
        self
    }
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid { key, value: raw }),
    }
}
