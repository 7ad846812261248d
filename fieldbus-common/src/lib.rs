//! Fieldbus Common Library
//!
//! Shared types and utilities for the fieldbus bridge:
//!
//! - [`reading`] - The `Reading` record produced by every poll cycle
//! - [`serialization`] - JSON/CBOR encoding and decoding of published payloads
//! - [`config`] - Logging and Zenoh configuration, JSON5 loading
//! - [`session`] - Zenoh session management
//! - [`keyexpr`] - Key expression builders for readings, status and writes
//! - [`error`] - Error types

pub mod config;
pub mod error;
pub mod keyexpr;
pub mod reading;
pub mod serialization;
pub mod session;

pub use config::{LogFormat, LoggingConfig, ZenohConfig, load_config, parse_config};
pub use error::{Error, Result};
pub use keyexpr::{DEFAULT_KEY_PREFIX, KeyExprBuilder};
pub use reading::{Reading, ReadingOutcome};
pub use serialization::{Format, decode, encode};
pub use session::connect;

/// Initialize tracing with the given configuration.
///
/// `RUST_LOG` takes precedence over the configured level when set.
///
/// # Example
///
/// ```ignore
/// use fieldbus_common::{LoggingConfig, LogFormat, init_tracing};
///
/// let config = LoggingConfig {
///     level: "debug".to_string(),
///     format: LogFormat::Json,
/// };
/// init_tracing(&config)?;
/// ```
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    let registry = tracing_subscriber::registry().with(filter);

    let installed = match config.format {
        LogFormat::Text => registry.with(fmt::layer()).try_init(),
        LogFormat::Json => registry.with(fmt::layer().json()).try_init(),
    };

    installed.map_err(|e| Error::Config(format!("Failed to initialize tracing: {}", e)))
}
