//! Logging setup for binaries and tests that embed a store.
//!
//! Store crates only emit `tracing` events, every one tagged with the
//! [`prefix::DB`] segment. Nothing is printed until a subscriber is
//! installed, which is what [`init`] does.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Install the global subscriber at `info`, or whatever `RUST_LOG` says.
///
/// Returns `false` if another subscriber was already installed.
pub fn init() -> bool {
    init_with_filter("info")
}

/// Install the global subscriber with a fallback filter for when `RUST_LOG`
/// is unset.
///
/// Only the first call in a process takes effect; later calls leave the
/// installed subscriber alone and return `false`.
pub fn init_with_filter(default_filter: &str) -> bool {
    let installed = tracing_subscriber::registry()
        .with(filter(default_filter))
        .with(fmt::layer().compact())
        .try_init()
        .is_ok();
    if installed {
        ::tracing::debug!("{} logging initialized", prefix::DB);
    }
    installed
}

/// `RUST_LOG` when set and valid, else `default_filter`, else `info`.
fn filter(default_filter: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Segment prefixes for logging.
pub mod prefix {
    /// Database operations prefix
    pub const DB: &str = "⊔";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_is_noop() {
        init_with_filter("debug");
        assert!(::tracing::dispatcher::has_been_set());

        assert!(!init_with_filter("info"));
        assert!(!init());
    }

    #[test]
    fn test_bad_default_filter_falls_back() {
        // The directive is rejected, so the filter stays usable at info
        let filter = filter("localstore=[unclosed");
        assert!(!filter.to_string().is_empty());
    }
}
