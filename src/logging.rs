//! Logging setup: `tracing-subscriber` fmt layer behind an `EnvFilter`, writing to stderr.
//!
//! Filter priority: `XONREQUEST_LOG`, then `RUST_LOG`, then `info` (`debug` with `--verbose`).

use std::env;

use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

pub const LOG_ENV: &str = "XONREQUEST_LOG";

/// Filter directive in effect for this process.
pub fn filter_directive(verbose: bool) -> String {
    env::var(LOG_ENV)
        .ok()
        .or_else(|| env::var("RUST_LOG").ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| if verbose { "debug" } else { "info" }.to_string())
}

/// Install the global subscriber. Returns false when one was already set.
pub fn init(verbose: bool) -> bool {
    let directive = filter_directive(verbose);
    let env_filter = EnvFilter::try_new(&directive).unwrap_or_else(|e| {
        eprintln!("xonrequest: invalid log filter '{directive}': {e}; using 'info'");
        EnvFilter::new("info")
    });
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false);
    if tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .is_err()
    {
        eprintln!("xonrequest: logging init skipped (global subscriber already set)");
        return false;
    }
    true
}

/// One-line build description for the startup banner.
pub fn build_banner() -> String {
    format!(
        "xonrequest {} build={} target={} profile={} rust={}",
        env!("CARGO_PKG_VERSION"),
        env!("XONREQUEST_BUILD_DATE"),
        env!("XONREQUEST_BUILD_TARGET"),
        env!("XONREQUEST_BUILD_PROFILE"),
        env!("XONREQUEST_BUILD_RUSTC"),
    )
}
