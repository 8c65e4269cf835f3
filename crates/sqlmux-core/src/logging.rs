//! Tracing initialisation
//!
//! Console output only; the embedding application owns any file sinks.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Crates that log at `debug` unless RUST_LOG says otherwise.
/// Rust crate names use underscores in tracing targets.
const SQLMUX_TARGETS: &[&str] = &["sqlmux_core", "sqlmux_auth", "sqlmux_pool"];

/// Build the default filter: RUST_LOG if set, else `default_level` with
/// the sqlmux crates at `debug`.
pub fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        SQLMUX_TARGETS
            .iter()
            .fold(EnvFilter::new(default_level), |filter, target| {
                match format!("{}=debug", target).parse() {
                    Ok(directive) => filter.add_directive(directive),
                    Err(_) => filter,
                }
            })
    })
}

/// Install a compact console subscriber.
///
/// Returns `false` if a global subscriber was already installed, which is
/// expected when several tests initialise logging.
pub fn init_tracing(default_level: &str) -> bool {
    let console_layer = fmt::layer()
        .with_ansi(true)
        .compact()
        .with_thread_names(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true);

    tracing_subscriber::registry()
        .with(env_filter(default_level))
        .with(console_layer)
        .try_init()
        .is_ok()
}
