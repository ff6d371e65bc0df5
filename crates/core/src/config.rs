//! Engine configuration
//!
//! ## Configuration (Environment Variables)
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `UAL_COMPACT_MIN` | `64` | Minimum dead head slots before FIFO compaction |
//! | `UAL_TOMBSTONE_RATIO` | `50` | Percent of dead interior slots that triggers a full compaction |
//!
//! Values are read once, on first use. Invalid values are warned about and
//! the default is kept.

use std::sync::OnceLock;
use tracing::warn;

/// Default minimum head slack before a FIFO compaction
pub const DEFAULT_COMPACT_MIN: usize = 64;

/// Default tombstone percentage for a full compaction
pub const DEFAULT_TOMBSTONE_RATIO: usize = 50;

/// Storage tuning knobs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Dead slots at the head are only reclaimed once there are at least this many
    pub compact_min: usize,
    /// Percentage (1..=100) of dead interior slots that triggers a rebuild
    pub tombstone_ratio: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            compact_min: DEFAULT_COMPACT_MIN,
            tombstone_ratio: DEFAULT_TOMBSTONE_RATIO,
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self::from_vars(
            std::env::var("UAL_COMPACT_MIN").ok(),
            std::env::var("UAL_TOMBSTONE_RATIO").ok(),
        )
    }

    fn from_vars(compact_min: Option<String>, tombstone_ratio: Option<String>) -> Self {
        let compact_min = parse_var("UAL_COMPACT_MIN", compact_min, |v| v > 0)
            .unwrap_or(DEFAULT_COMPACT_MIN);
        let tombstone_ratio =
            parse_var("UAL_TOMBSTONE_RATIO", tombstone_ratio, |v| (1..=100).contains(&v))
                .unwrap_or(DEFAULT_TOMBSTONE_RATIO);

        Self {
            compact_min,
            tombstone_ratio,
        }
    }
}

fn parse_var(name: &str, raw: Option<String>, valid: impl Fn(usize) -> bool) -> Option<usize> {
    let raw = raw?;
    match raw.trim().parse::<usize>() {
        Ok(v) if valid(v) => Some(v),
        _ => {
            warn!("{}='{}' is not valid, using default", name, raw);
            None
        }
    }
}

static ENGINE_CONFIG: OnceLock<EngineConfig> = OnceLock::new();

/// Process-wide engine configuration
pub fn engine_config() -> &'static EngineConfig {
    ENGINE_CONFIG.get_or_init(EngineConfig::from_env)
}
