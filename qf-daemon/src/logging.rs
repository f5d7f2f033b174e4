//! Log level resolution and subscriber setup

use std::path::Path;

use qf_core::constants::paths::JOURNALD_SOCKET;

/// Environment variable overriding the configured log level
pub const LOG_ENV: &str = "QUIETFAN_LOG";

const DEFAULT_LEVEL: &str = "info";

/// `--log-level`, then `QUIETFAN_LOG`, then the config file, then `info`
pub fn resolve_log_level(cli: Option<&str>, config: Option<&str>) -> String {
    cli.map(str::to_string)
        .or_else(|| std::env::var(LOG_ENV).ok().filter(|v| !v.trim().is_empty()))
        .or_else(|| config.map(str::to_string))
        .unwrap_or_else(|| DEFAULT_LEVEL.to_string())
}

/// Log to the systemd journal when its socket exists, stdout otherwise.
///
/// Returns true when logging to the journal.
pub fn init(log_level: &str) -> bool {
    if Path::new(JOURNALD_SOCKET).exists() {
        match tracing_journald::layer() {
            Ok(journald_layer) => {
                use tracing_subscriber::prelude::*;
                tracing_subscriber::registry()
                    .with(journald_layer)
                    .with(tracing_subscriber::EnvFilter::new(log_level))
                    .init();
                return true;
            }
            Err(e) => {
                eprintln!("Failed to create journald layer: {}, falling back to stdout", e);
            }
        }
    }

    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .with_env_filter(log_level)
        .init();
    false
}
