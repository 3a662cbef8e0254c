pub mod config;
pub mod error;

pub use config::{
    AuthConfig, CalendarConfig, Config, GoogleConfig, StorageBackend, StorageConfig,
    ValidationResult,
};
pub use error::ConfigError;

use anyhow::Result;

/// Initialize logging for the calsync binaries.
///
/// `debug` forces the debug level; otherwise `RUST_LOG` applies, defaulting
/// to `info`.
pub fn init(debug: bool) -> Result<()> {
    let filter = if debug {
        tracing_subscriber::EnvFilter::new("debug")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {}", e))?;

    tracing::debug!("calsync core initialized");
    Ok(())
}
