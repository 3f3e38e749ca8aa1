//! Tracing setup for notepost binaries.
//!
//! ```ignore
//! use notepost_common::telemetry::{self, TelemetryConfig};
//!
//! telemetry::init(TelemetryConfig::from_env("notepost"));
//! tracing::info!("ready");
//! ```

use tracing::Level;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;

#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Name attached to the startup log line
    pub service_name: String,
    /// Console log level when `RUST_LOG` is unset (default: INFO, DEBUG in debug builds)
    pub console_level: Level,
}

impl TelemetryConfig {
    pub fn from_env(service_name: impl Into<String>) -> Self {
        let console_level = if cfg!(debug_assertions) {
            Level::DEBUG
        } else {
            Level::INFO
        };
        Self {
            service_name: service_name.into(),
            console_level,
        }
    }

    pub fn with_level(mut self, level: Level) -> Self {
        self.console_level = level;
        self
    }
}

/// Install the global subscriber. Logs go to stderr so command output on
/// stdout stays clean. Calling this twice is harmless.
pub fn init(config: TelemetryConfig) {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(config.console_level).into())
        .from_env_lossy();

    let installed = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .try_init();

    if installed.is_ok() {
        tracing::debug!(service = %config.service_name, "telemetry initialized");
    }
}
