//! # Dispatch Configuration Module
//!
//! Configuration consumed by the dispatch core. The core never decides where configuration
//! comes from; it reads a [`DispatchConfig`] handed to the
//! [`DispatcherBuilder`](crate::dispatcher::DispatcherBuilder). Two loaders are provided:
//!
//! - [`DispatchConfig::from_env`] reads `BRRTD_*` environment variables
//! - [`DispatchConfig::from_file`] reads a YAML (`.yaml`/`.yml`) or TOML (`.toml`) file
//!
//! ## Environment Variables
//!
//! | Variable | Meaning | Default |
//! |----------|---------|---------|
//! | `BRRTD_DEFAULT_SCHEDULER` | scheduler used by routes that do not name one | `biz` |
//! | `BRRTD_NEGOTIATION_PARAM` | query parameter selecting the response format (empty disables) | `format` |
//! | `BRRTD_TERMINATION_TIMEOUT_MS` | graceful shutdown drain timeout | `5000` |
//! | `BRRTD_TIMEOUT_MODE` | `queued` or `ttfb` timeout for the default scheduler | unset |
//! | `BRRTD_TIMEOUT_MS` | timeout value paired with `BRRTD_TIMEOUT_MODE` | unset |
//! | `BRRTD_HANDLER_WORKERS` etc. | sizing of the default worker pool, see [`WorkerPoolConfig::from_env`] | |
//!
//! ## File Format
//!
//! ```yaml
//! default_scheduler: biz
//! negotiation_param: format
//! termination_timeout_ms: 2000
//! worker_pools:
//!   biz:
//!     num_workers: 8
//!     queue_bound: 256
//!     backpressure_mode: shed
//!   reports:
//!     num_workers: 2
//! timeouts:
//!   biz:
//!     mode: queued
//!     millis: 250
//! ```

use crate::scheduler::{WorkerPoolConfig, DEFAULT_SCHEDULER};
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::path::Path;
use std::time::Duration;

/// Where a scheduler timeout is measured from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeoutMode {
    /// From the moment the task was handed to the scheduler
    Queued,
    /// From the moment the request arrived (time to first byte budget)
    Ttfb,
}

impl TimeoutMode {
    /// Parse timeout mode from string
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "queued" | "queue" => Some(Self::Queued),
            "ttfb" => Some(Self::Ttfb),
            _ => None,
        }
    }
}

/// Per-scheduler timeout override
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerTimeout {
    pub mode: TimeoutMode,
    pub millis: u64,
}

impl SchedulerTimeout {
    pub fn queued(millis: u64) -> Self {
        Self {
            mode: TimeoutMode::Queued,
            millis,
        }
    }

    pub fn ttfb(millis: u64) -> Self {
        Self {
            mode: TimeoutMode::Ttfb,
            millis,
        }
    }

    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.millis)
    }
}

fn default_scheduler_name() -> String {
    DEFAULT_SCHEDULER.to_string()
}

fn default_negotiation_param() -> Option<String> {
    Some("format".to_string())
}

fn default_termination_timeout_ms() -> u64 {
    5000
}

/// Configuration surface of the dispatch core
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Scheduler assigned to routes that do not name one
    #[serde(default = "default_scheduler_name")]
    pub default_scheduler: String,
    /// Query parameter consulted before `Accept` for response negotiation
    #[serde(default = "default_negotiation_param")]
    pub negotiation_param: Option<String>,
    /// How long `shutdown` waits for scheduled work to drain
    #[serde(default = "default_termination_timeout_ms")]
    pub termination_timeout_ms: u64,
    /// Worker pools to create, keyed by scheduler name
    #[serde(default)]
    pub worker_pools: BTreeMap<String, WorkerPoolConfig>,
    /// Timeout overrides keyed by scheduler name
    #[serde(default)]
    pub timeouts: BTreeMap<String, SchedulerTimeout>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            default_scheduler: default_scheduler_name(),
            negotiation_param: default_negotiation_param(),
            termination_timeout_ms: default_termination_timeout_ms(),
            worker_pools: BTreeMap::new(),
            timeouts: BTreeMap::new(),
        }
    }
}

impl DispatchConfig {
    /// Load configuration from environment variables.
    ///
    /// The default worker pool (`biz`) is always sized from the environment so that a bare
    /// deployment gets a working pool without any file.
    pub fn from_env() -> Self {
        let mut config = Self {
            default_scheduler: env::var("BRRTD_DEFAULT_SCHEDULER")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(default_scheduler_name),
            negotiation_param: match env::var("BRRTD_NEGOTIATION_PARAM") {
                Ok(v) if v.trim().is_empty() => None,
                Ok(v) => Some(v.trim().to_string()),
                Err(_) => default_negotiation_param(),
            },
            termination_timeout_ms: env::var("BRRTD_TERMINATION_TIMEOUT_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or_else(default_termination_timeout_ms),
            worker_pools: BTreeMap::new(),
            timeouts: BTreeMap::new(),
        };

        config
            .worker_pools
            .insert(DEFAULT_SCHEDULER.to_string(), WorkerPoolConfig::from_env());

        let mode = env::var("BRRTD_TIMEOUT_MODE")
            .ok()
            .and_then(|s| TimeoutMode::parse(&s));
        let millis = env::var("BRRTD_TIMEOUT_MS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok());
        if let (Some(mode), Some(millis)) = (mode, millis) {
            config.timeouts.insert(
                config.default_scheduler.clone(),
                SchedulerTimeout { mode, millis },
            );
        }

        config
    }

    /// Load configuration from a YAML or TOML file, chosen by extension.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read dispatch config {}", path.display()))?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase)
            .unwrap_or_default();
        match ext.as_str() {
            "yaml" | "yml" => serde_yaml::from_str(&raw)
                .with_context(|| format!("Invalid YAML dispatch config {}", path.display())),
            "toml" => toml::from_str(&raw)
                .with_context(|| format!("Invalid TOML dispatch config {}", path.display())),
            other => bail!(
                "Unsupported dispatch config format '{}' for {}",
                other,
                path.display()
            ),
        }
    }

    /// Timeout configured for `scheduler`, if any
    pub fn timeout_for(&self, scheduler: &str) -> Option<SchedulerTimeout> {
        self.timeouts.get(scheduler).copied()
    }

    pub fn termination_timeout(&self) -> Duration {
        Duration::from_millis(self.termination_timeout_ms)
    }
}

/// Parse a stack size in decimal (`65536`) or hexadecimal (`0x10000`) notation
pub fn parse_stack_size(value: &str) -> Option<usize> {
    let value = value.trim();
    if let Some(hex) = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
    {
        usize::from_str_radix(hex, 16).ok()
    } else {
        value.parse().ok()
    }
}

/// Serializes unit tests that mutate `BRRTD_*` environment variables
#[cfg(test)]
pub(crate) static ENV_MUTEX: std::sync::Mutex<()> = std::sync::Mutex::new(());

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::BackpressureMode;
    use std::io::Write;

    #[test]
    fn test_parse_stack_size() {
        assert_eq!(parse_stack_size("0x4000"), Some(0x4000));
        assert_eq!(parse_stack_size("16384"), Some(16384));
        assert_eq!(parse_stack_size(" 0X10 "), Some(16));
        assert_eq!(parse_stack_size("lots"), None);
    }

    #[test]
    fn test_timeout_mode_parse() {
        assert_eq!(TimeoutMode::parse("Queued"), Some(TimeoutMode::Queued));
        assert_eq!(TimeoutMode::parse("TTFB"), Some(TimeoutMode::Ttfb));
        assert_eq!(TimeoutMode::parse("later"), None);
    }

    #[test]
    fn test_default_config() {
        let config = DispatchConfig::default();
        assert_eq!(config.default_scheduler, "biz");
        assert_eq!(config.negotiation_param.as_deref(), Some("format"));
        assert_eq!(config.termination_timeout(), Duration::from_secs(5));
        assert!(config.timeout_for("biz").is_none());
    }

    #[test]
    fn test_from_env() {
        let _guard = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
        env::set_var("BRRTD_DEFAULT_SCHEDULER", "reports");
        env::set_var("BRRTD_NEGOTIATION_PARAM", "");
        env::set_var("BRRTD_TIMEOUT_MODE", "ttfb");
        env::set_var("BRRTD_TIMEOUT_MS", "750");
        env::set_var("BRRTD_HANDLER_WORKERS", "3");

        let config = DispatchConfig::from_env();

        env::remove_var("BRRTD_DEFAULT_SCHEDULER");
        env::remove_var("BRRTD_NEGOTIATION_PARAM");
        env::remove_var("BRRTD_TIMEOUT_MODE");
        env::remove_var("BRRTD_TIMEOUT_MS");
        env::remove_var("BRRTD_HANDLER_WORKERS");

        assert_eq!(config.default_scheduler, "reports");
        assert_eq!(config.negotiation_param, None);
        assert_eq!(config.timeout_for("reports"), Some(SchedulerTimeout::ttfb(750)));
        assert_eq!(config.worker_pools["biz"].num_workers, 3);
    }

    #[test]
    fn test_from_yaml_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "default_scheduler: biz\nworker_pools:\n  biz:\n    num_workers: 8\n    queue_bound: 16\n    backpressure_mode: shed\ntimeouts:\n  biz:\n    mode: queued\n    millis: 250\n"
        )
        .unwrap();

        let config = DispatchConfig::from_file(file.path()).unwrap();
        let pool = &config.worker_pools["biz"];
        assert_eq!(pool.num_workers, 8);
        assert_eq!(pool.queue_bound, 16);
        assert_eq!(pool.backpressure_mode, BackpressureMode::Shed);
        assert_eq!(config.timeout_for("biz"), Some(SchedulerTimeout::queued(250)));
        assert_eq!(config.negotiation_param.as_deref(), Some("format"));
    }

    #[test]
    fn test_from_toml_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "default_scheduler = \"io\"\ntermination_timeout_ms = 100\n\n[worker_pools.reports]\nnum_workers = 2\n"
        )
        .unwrap();

        let config = DispatchConfig::from_file(file.path()).unwrap();
        assert_eq!(config.default_scheduler, "io");
        assert_eq!(config.termination_timeout_ms, 100);
        assert_eq!(config.worker_pools["reports"].num_workers, 2);
        assert_eq!(config.worker_pools["reports"].queue_bound, 1024);
    }

    #[test]
    fn test_unknown_extension_is_rejected() {
        let file = tempfile::Builder::new().suffix(".ini").tempfile().unwrap();
        let err = DispatchConfig::from_file(file.path()).unwrap_err();
        assert!(err.to_string().contains("Unsupported dispatch config format"));
    }
}
