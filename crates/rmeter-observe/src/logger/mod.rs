mod config;
mod error;
mod install;
mod object;

pub use config::LoggerConfig;
pub use error::LoggerError;
pub use object::{LoggerFormat, LoggerLevel, LoggerOutput, LoggerTimeZone, init_local_offset};

/// Installs the global `tracing` subscriber described by `cfg`.
///
/// Fails with [`LoggerError::AlreadyInitialized`] when a subscriber is already set, and with a
/// journald error when that sink is requested but unavailable.
///
/// Worker processes speak their protocol on stdout, so they must log with
/// [`LoggerOutput::Stderr`].
///
/// # Examples
/// ```rust
/// use rmeter_observe::{LoggerConfig, LoggerOutput, init_logger};
///
/// let config = LoggerConfig {
///     output: LoggerOutput::Stderr,
///     ..Default::default()
/// };
/// init_logger(&config).expect("logger");
/// tracing::info!("ready");
/// ```
pub fn init_logger(cfg: &LoggerConfig) -> Result<(), LoggerError> {
    match cfg.format {
        LoggerFormat::Text => install::text(cfg),
        LoggerFormat::Json => install::json(cfg),
        LoggerFormat::Journald => install::journald(cfg),
    }
}
