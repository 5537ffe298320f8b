//! Logging setup over `tracing-subscriber`.
//!
//! `RUST_LOG` wins when set; otherwise the configured level applies to
//! everything except the MQTT client library, which stays at `warn`.

use tracing_subscriber::EnvFilter;

/// Install the global fmt subscriber.
///
/// Safe to call more than once: later calls are no-ops.
pub fn init(level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directives(level)));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// Filter directives for a configured level name. Unknown names mean `info`.
pub(crate) fn directives(level: &str) -> String {
    let level = match level.trim().to_lowercase().as_str() {
        "error" => "error",
        "warn" | "warning" => "warn",
        "debug" => "debug",
        "trace" => "trace",
        _ => "info",
    };
    format!("{level},rumqttc=warn")
}
