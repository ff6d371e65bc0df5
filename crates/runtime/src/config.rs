//! Runtime configuration
//!
//! ## Configuration (Environment Variables)
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `UAL_WORKERS` | available parallelism | Worker coroutines (and scheduler threads) in a pool |
//! | `UAL_STACK_SIZE` | `131072` | Coroutine stack size in bytes |
//! | `UAL_STEAL_BATCH` | `1` | Elements a thief takes per steal |
//!
//! The report destination (`UAL_REPORT`) is parsed by the `report` module.
//! Invalid values are warned about and the default is kept.

use std::sync::OnceLock;
use tracing::warn;

/// Default coroutine stack size: 128KB (0x20000 bytes)
pub const DEFAULT_STACK_SIZE: usize = 0x20000;

/// Default number of elements taken per steal
pub const DEFAULT_STEAL_BATCH: usize = 1;

/// Fallback when the platform cannot report its parallelism
const FALLBACK_WORKERS: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    pub workers: usize,
    pub stack_size: usize,
    pub steal_batch: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            stack_size: DEFAULT_STACK_SIZE,
            steal_batch: DEFAULT_STEAL_BATCH,
        }
    }
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(FALLBACK_WORKERS)
}

impl RuntimeConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self::from_vars(
            std::env::var("UAL_WORKERS").ok(),
            std::env::var("UAL_STACK_SIZE").ok(),
            std::env::var("UAL_STEAL_BATCH").ok(),
        )
    }

    fn from_vars(
        workers: Option<String>,
        stack_size: Option<String>,
        steal_batch: Option<String>,
    ) -> Self {
        let defaults = Self::default();
        Self {
            workers: parse_positive("UAL_WORKERS", workers).unwrap_or(defaults.workers),
            stack_size: parse_positive("UAL_STACK_SIZE", stack_size).unwrap_or(defaults.stack_size),
            steal_batch: parse_positive("UAL_STEAL_BATCH", steal_batch)
                .unwrap_or(defaults.steal_batch),
        }
    }
}

fn parse_positive(name: &str, raw: Option<String>) -> Option<usize> {
    let raw = raw?;
    match raw.trim().parse::<usize>() {
        Ok(0) => {
            warn!("{}=0 is invalid, using default", name);
            None
        }
        Ok(v) => Some(v),
        Err(_) => {
            warn!("{}='{}' is not a valid number, using default", name, raw);
            None
        }
    }
}

static RUNTIME_CONFIG: OnceLock<RuntimeConfig> = OnceLock::new();

/// Process-wide runtime configuration
pub fn runtime_config() -> &'static RuntimeConfig {
    RUNTIME_CONFIG.get_or_init(RuntimeConfig::from_env)
}
