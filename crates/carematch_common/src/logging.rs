//! Tracing subscriber setup for the backend binary and ad-hoc test runs.

use std::str::FromStr;

use tracing::{info, Level};
use tracing_subscriber::{filter::Directive, fmt, prelude::*, EnvFilter};

/// Variable read by [`init`] to pick the level for the CareMatch crates.
pub const LOG_LEVEL_VAR: &str = "CAREMATCH_LOG_LEVEL";

const CRATES: [&str; 7] = [
    "carematch_backend",
    "carematch_booking",
    "carematch_gcal",
    "carematch_stripe",
    "carematch_subsidy",
    "carematch_db",
    "carematch_common",
];

/// Installs the subscriber at the level named by `CAREMATCH_LOG_LEVEL`, INFO otherwise.
///
/// ```
/// use carematch_common::logging;
///
/// logging::init();
/// // later calls leave the first subscriber in place
/// logging::init_with_level(tracing::Level::DEBUG);
/// ```
pub fn init() {
    let level = std::env::var(LOG_LEVEL_VAR)
        .ok()
        .and_then(|raw| Level::from_str(raw.trim()).ok())
        .unwrap_or(Level::INFO);
    init_with_level(level);
}

/// `RUST_LOG` still applies; the CareMatch crates are pinned to `level` on top of it.
pub fn init_with_level(level: Level) {
    let filter = CRATES
        .iter()
        .filter_map(|krate| format!("{}={}", krate, level).parse::<Directive>().ok())
        .fold(EnvFilter::from_default_env(), EnvFilter::add_directive);

    let layer = fmt::layer()
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_thread_names(true);

    if tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .try_init()
        .is_ok()
    {
        info!(%level, "Logging initialized");
    }
}
