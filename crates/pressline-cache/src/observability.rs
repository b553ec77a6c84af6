//! Tracing setup for processes embedding the cache.
//!
//! `RUST_LOG` always takes precedence. The configured `logging.level` (or a
//! CLI flag) only applies when `RUST_LOG` is unset or unparsable.
use std::sync::OnceLock;

use tracing_subscriber::{EnvFilter, Registry, fmt, prelude::*, reload};

static FILTER_HANDLE: OnceLock<reload::Handle<EnvFilter, Registry>> = OnceLock::new();

/// Filter from a `RUST_LOG` value, falling back to `level`.
fn select_filter(rust_log: Option<&str>, level: &str) -> EnvFilter {
    rust_log
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new(level))
}

fn rust_log() -> Option<String> {
    std::env::var("RUST_LOG").ok()
}

fn env_overrides_level(rust_log: Option<&str>) -> bool {
    rust_log.is_some_and(|directives| EnvFilter::try_new(directives).is_ok())
}

pub fn init_tracing(level: &str) {
    let filter = select_filter(rust_log().as_deref(), level);
    let (filter_layer, handle) = reload::Layer::new(filter);
    let _ = FILTER_HANDLE.set(handle);

    let _ = tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt::layer().with_target(false))
        .try_init();
}

/// Switch to `level` once configuration is loaded. Returns `false` when the
/// level was not applied, because `RUST_LOG` is set or tracing was not
/// initialized through [`init_tracing`].
pub fn apply_logging_level(level: &str) -> bool {
    let env = rust_log();
    if env_overrides_level(env.as_deref()) {
        tracing::debug!(level, "RUST_LOG set, ignoring configured log level");
        return false;
    }
    let Some(handle) = FILTER_HANDLE.get() else {
        return false;
    };
    handle
        .modify(|filter| *filter = select_filter(None, level))
        .is_ok()
}
