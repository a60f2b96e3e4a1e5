// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "info";

pub fn init_tracing() {
    init_tracing_with(DEFAULT_FILTER);
}

/// Installs the global subscriber. `RUST_LOG` wins over `fallback`.
/// Calling this twice is harmless; the second install is ignored.
pub fn init_tracing_with(fallback: &str) {
    use tracing_subscriber::fmt;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_init_is_ignored() {
        init_tracing();
        init_tracing_with("debug");
        tracing::info!("still logging after second init");
    }
}
