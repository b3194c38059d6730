#![forbid(unsafe_code)]

//! Logging facade.
//!
//! With the `tracing` feature enabled, the `tracing` macros are re-exported
//! here so downstream crates can log through `recompose_core` without naming
//! `tracing` themselves. With `tracing-json`, [`init_json_logging`] installs a
//! JSON subscriber filtered by `RUST_LOG` (default `info`).
//!
//! Without the feature, this module is empty and core code compiles its log
//! statements out.

#[cfg(feature = "tracing")]
pub use tracing::{
    debug, debug_span, error, error_span, info, info_span, trace, trace_span, warn, warn_span,
};

/// Install a global JSON `tracing` subscriber.
///
/// Returns `false` if a global subscriber was already installed.
#[cfg(feature = "tracing-json")]
pub fn init_json_logging() -> bool {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(filter)
        .with_current_span(true)
        .try_init()
        .is_ok()
}
