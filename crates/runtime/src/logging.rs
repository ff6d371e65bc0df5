//! Log subscriber setup
//!
//! Both crates log through `tracing`; nothing is printed until a subscriber
//! is installed. `init()` installs a formatter on stderr filtered by the
//! `UAL_LOG` environment variable (EnvFilter syntax, e.g.
//! `UAL_LOG=ual_core=debug`). Calling it more than once is harmless, and it
//! steps aside if the host application already installed a subscriber.

use std::sync::Once;
use tracing_subscriber::EnvFilter;

/// Filter used when `UAL_LOG` is unset or invalid
pub const DEFAULT_FILTER: &str = "ual_core=warn,ual_runtime=info";

static LOGGING_INIT: Once = Once::new();

/// Install the stderr subscriber (idempotent)
pub fn init() {
    LOGGING_INIT.call_once(|| {
        let filter = EnvFilter::try_from_env("UAL_LOG").unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
        let installed = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(true)
            .try_init()
            .is_ok();
        if installed {
            tracing::debug!("logging initialized");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        init();
        init();
        tracing::info!("still logging after a second init");
    }

    #[test]
    fn test_default_filter_parses() {
        assert!(EnvFilter::try_new(DEFAULT_FILTER).is_ok());
    }
}
