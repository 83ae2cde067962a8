//! Core runtime configuration.
//!
//! Configuration is resolved once at process startup and then passed into the views as an
//! `Arc<CoreConfig>`. Nothing in the engine reads environment variables while a view is
//! running.

use crate::constants::{DEFAULT_IN_FILTER_LIMIT, DEFAULT_LOADING_TIMEOUT, DEFAULT_PAGE_SIZE};
use crate::error::ConfigError;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Core configuration resolved at startup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CoreConfig {
    in_filter_limit: usize,
    loading_timeout: Duration,
    page_size: usize,
    seed_file: Option<PathBuf>,
}

impl CoreConfig {
    /// Create a new `CoreConfig`.
    ///
    /// `in_filter_limit` and `page_size` must be at least 1.
    pub fn new(
        in_filter_limit: usize,
        loading_timeout: Duration,
        page_size: usize,
        seed_file: Option<PathBuf>,
    ) -> Result<Self, ConfigError> {
        if in_filter_limit == 0 {
            return Err(ConfigError::InvalidInput(
                "in_filter_limit must be at least 1".into(),
            ));
        }
        if page_size == 0 {
            return Err(ConfigError::InvalidInput(
                "page_size must be at least 1".into(),
            ));
        }

        Ok(Self {
            in_filter_limit,
            loading_timeout,
            page_size,
            seed_file,
        })
    }

    /// Maximum number of values the engine puts in a single "in" filter.
    pub fn in_filter_limit(&self) -> usize {
        self.in_filter_limit
    }

    pub fn loading_timeout(&self) -> Duration {
        self.loading_timeout
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn seed_file(&self) -> Option<&Path> {
        self.seed_file.as_deref()
    }

    /// Build a configuration from optional raw values, typically read from the environment
    /// by a binary's `main`.
    ///
    /// Missing or blank values fall back to the defaults.
    ///
    /// # Arguments
    ///
    /// * `in_filter_limit` - `TRIAL_IN_FILTER_LIMIT`
    /// * `loading_timeout_ms` - `TRIAL_LOADING_TIMEOUT_MS`
    /// * `page_size` - `TRIAL_PAGE_SIZE`
    /// * `seed_file` - `TRIAL_SEED_FILE`
    pub fn from_env_values(
        in_filter_limit: Option<String>,
        loading_timeout_ms: Option<String>,
        page_size: Option<String>,
        seed_file: Option<String>,
    ) -> Result<Self, ConfigError> {
        let in_filter_limit = parse_count("TRIAL_IN_FILTER_LIMIT", in_filter_limit)?
            .unwrap_or(DEFAULT_IN_FILTER_LIMIT);
        let loading_timeout = parse_count("TRIAL_LOADING_TIMEOUT_MS", loading_timeout_ms)?
            .map(|ms| Duration::from_millis(ms as u64))
            .unwrap_or(DEFAULT_LOADING_TIMEOUT);
        let page_size = parse_count("TRIAL_PAGE_SIZE", page_size)?.unwrap_or(DEFAULT_PAGE_SIZE);
        let seed_file = non_blank(seed_file).map(PathBuf::from);

        Self::new(in_filter_limit, loading_timeout, page_size, seed_file)
    }
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            in_filter_limit: DEFAULT_IN_FILTER_LIMIT,
            loading_timeout: DEFAULT_LOADING_TIMEOUT,
            page_size: DEFAULT_PAGE_SIZE,
            seed_file: None,
        }
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_count(key: &str, value: Option<String>) -> Result<Option<usize>, ConfigError> {
    non_blank(value)
        .map(|v| {
            v.parse::<usize>().map_err(|e| {
                ConfigError::InvalidInput(format!("{key} must be a non-negative integer: {e}"))
            })
        })
        .transpose()
}
