//! Runtime configuration.
//!
//! Both configurations deserialize with serde, filling missing fields with
//! their defaults, and can be read from `STATELESS_*` environment
//! variables.
//!
//! | Variable                      | Field                               |
//! |-------------------------------|-------------------------------------|
//! | `STATELESS_THREAD_POOL_SIZE`  | [`ParallelConfig::thread_pool_size`]  |
//! | `STATELESS_PROCESS_POOL_SIZE` | [`ParallelConfig::process_pool_size`] |
//! | `STATELESS_WORKER_PROGRAM`    | [`ParallelConfig::worker`]            |
//! | `STATELESS_MEMO_CAPACITY`     | [`MemoizeConfig::capacity`]           |
//!
//! # Examples
//!
//! ```rust
//! use stateless::config::ParallelConfig;
//!
//! let config = ParallelConfig::from_lookup(|key| match key {
//!     "STATELESS_THREAD_POOL_SIZE" => Some("3".to_owned()),
//!     _ => None,
//! })
//! .unwrap();
//!
//! assert_eq!(config.thread_pool_size, 3);
//! assert!(config.worker.is_none());
//! ```

use crate::parallel::WorkerCommand;
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use thiserror::Error;

/// Environment variable for [`ParallelConfig::thread_pool_size`].
pub const THREAD_POOL_SIZE_VAR: &str = "STATELESS_THREAD_POOL_SIZE";
/// Environment variable for [`ParallelConfig::process_pool_size`].
pub const PROCESS_POOL_SIZE_VAR: &str = "STATELESS_PROCESS_POOL_SIZE";
/// Environment variable naming the worker program of [`ParallelConfig::worker`].
pub const WORKER_PROGRAM_VAR: &str = "STATELESS_WORKER_PROGRAM";
/// Environment variable for [`MemoizeConfig::capacity`].
pub const MEMO_CAPACITY_VAR: &str = "STATELESS_MEMO_CAPACITY";

/// An unusable configuration value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// The value of `key` could not be used.
    #[error("invalid value `{value}` for {key}: {reason}")]
    Invalid {
        /// Variable or field name.
        key: &'static str,
        /// The rejected value.
        value: String,
        /// What is wrong with it.
        reason: String,
    },
}

fn parse_size(key: &'static str, value: String, allow_zero: bool) -> Result<usize, ConfigError> {
    match value.trim().parse::<usize>() {
        Ok(0) if !allow_zero => Err(ConfigError::Invalid {
            key,
            value,
            reason: "must be at least 1".to_owned(),
        }),
        Ok(size) => Ok(size),
        Err(error) => Err(ConfigError::Invalid {
            key,
            value,
            reason: error.to_string(),
        }),
    }
}

fn default_pool_size() -> usize {
    num_cpus::get().max(1)
}

// =============================================================================
// ParallelConfig
// =============================================================================

/// Sizes of the executors opened by [`Parallel::open`](crate::parallel::Parallel::open).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParallelConfig {
    /// Threads of the thread pool. Defaults to the number of CPUs.
    pub thread_pool_size: usize,
    /// Concurrent worker processes. Defaults to the number of CPUs.
    pub process_pool_size: usize,
    /// How to start worker processes; no process pool is opened without it.
    pub worker: Option<WorkerCommand>,
}

impl Default for ParallelConfig {
    fn default() -> Self {
        Self {
            thread_pool_size: default_pool_size(),
            process_pool_size: default_pool_size(),
            worker: None,
        }
    }
}

impl ParallelConfig {
    /// Reads the configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for an unparsable or zero size.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads the configuration through `lookup`, starting from the defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for an unparsable or zero size.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(value) = lookup(THREAD_POOL_SIZE_VAR) {
            config.thread_pool_size = parse_size(THREAD_POOL_SIZE_VAR, value, false)?;
        }
        if let Some(value) = lookup(PROCESS_POOL_SIZE_VAR) {
            config.process_pool_size = parse_size(PROCESS_POOL_SIZE_VAR, value, false)?;
        }
        if let Some(program) = lookup(WORKER_PROGRAM_VAR).filter(|program| !program.trim().is_empty()) {
            config.worker = Some(WorkerCommand::new(program));
        }
        Ok(config)
    }

    /// Sets the thread pool size.
    #[must_use]
    pub const fn with_thread_pool_size(mut self, size: usize) -> Self {
        self.thread_pool_size = size;
        self
    }

    /// Sets the process pool size.
    #[must_use]
    pub const fn with_process_pool_size(mut self, size: usize) -> Self {
        self.process_pool_size = size;
        self
    }

    /// Sets the worker command, enabling the process pool.
    #[must_use]
    pub fn with_worker(mut self, worker: WorkerCommand) -> Self {
        self.worker = Some(worker);
        self
    }
}

// =============================================================================
// MemoizeConfig
// =============================================================================

/// Cache bounds of a [`Memoized`](crate::Memoized) function.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoizeConfig {
    /// Maximum cached entries; `None` or `0` is unbounded.
    pub capacity: Option<usize>,
}

impl MemoizeConfig {
    /// An unbounded cache.
    #[must_use]
    pub const fn unbounded() -> Self {
        Self { capacity: None }
    }

    /// A cache holding at most `capacity` entries.
    #[must_use]
    pub const fn bounded(capacity: NonZeroUsize) -> Self {
        Self {
            capacity: Some(capacity.get()),
        }
    }

    /// The effective bound.
    #[must_use]
    pub fn capacity(&self) -> Option<NonZeroUsize> {
        self.capacity.and_then(NonZeroUsize::new)
    }

    /// Reads the configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for an unparsable capacity.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads the configuration through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for an unparsable capacity.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        lookup(MEMO_CAPACITY_VAR)
            .map(|value| parse_size(MEMO_CAPACITY_VAR, value, true))
            .transpose()
            .map(|capacity| Self { capacity })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let values = pairs
            .iter()
            .map(|(key, value)| ((*key).to_owned(), (*value).to_owned()))
            .collect::<HashMap<_, _>>();
        move |key| values.get(key).cloned()
    }

    #[rstest]
    fn defaults_use_every_cpu() {
        let config = ParallelConfig::default();
        assert_eq!(config.thread_pool_size, num_cpus::get().max(1));
        assert_eq!(config.process_pool_size, config.thread_pool_size);
        assert!(config.worker.is_none());
    }

    #[rstest]
    fn environment_overrides_defaults() {
        let config = ParallelConfig::from_lookup(lookup(&[
            (THREAD_POOL_SIZE_VAR, "4"),
            (PROCESS_POOL_SIZE_VAR, " 2 "),
            (WORKER_PROGRAM_VAR, "/usr/bin/worker"),
        ]))
        .unwrap();
        assert_eq!(config.thread_pool_size, 4);
        assert_eq!(config.process_pool_size, 2);
        assert_eq!(config.worker, Some(WorkerCommand::new("/usr/bin/worker")));
    }

    #[rstest]
    #[case(THREAD_POOL_SIZE_VAR, "0")]
    #[case(THREAD_POOL_SIZE_VAR, "many")]
    #[case(PROCESS_POOL_SIZE_VAR, "-3")]
    fn invalid_sizes_are_rejected(#[case] key: &'static str, #[case] value: &str) {
        let error = ParallelConfig::from_lookup(lookup(&[(key, value)])).unwrap_err();
        assert!(matches!(error, ConfigError::Invalid { key: rejected, .. } if rejected == key));
    }

    #[rstest]
    fn missing_fields_deserialize_to_defaults() {
        let config: ParallelConfig = serde_json::from_value(json!({
            "thread_pool_size": 3,
            "worker": { "program": "worker", "args": ["--serve"] }
        }))
        .unwrap();
        assert_eq!(config.thread_pool_size, 3);
        assert_eq!(config.process_pool_size, ParallelConfig::default().process_pool_size);
        assert_eq!(config.worker, Some(WorkerCommand::new("worker").arg("--serve")));
    }

    #[rstest]
    #[case(None, None)]
    #[case(Some("0"), None)]
    #[case(Some("128"), NonZeroUsize::new(128))]
    fn memo_capacity_zero_is_unbounded(#[case] value: Option<&str>, #[case] expected: Option<NonZeroUsize>) {
        let pairs = value.map(|value| vec![(MEMO_CAPACITY_VAR, value)]).unwrap_or_default();
        let config = MemoizeConfig::from_lookup(lookup(&pairs)).unwrap();
        assert_eq!(config.capacity(), expected);
    }

    #[rstest]
    fn memo_config_round_trips_through_json() {
        let config: MemoizeConfig = serde_json::from_value(json!({})).unwrap();
        assert_eq!(config, MemoizeConfig::unbounded());
        let bounded = MemoizeConfig::bounded(NonZeroUsize::MIN);
        assert_eq!(serde_json::to_value(bounded).unwrap(), json!({ "capacity": 1 }));
    }
}
