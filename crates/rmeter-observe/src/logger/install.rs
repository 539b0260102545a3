use tracing::Subscriber;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::logger::{
    config::LoggerConfig,
    error::{LoggerError, LoggerResult},
    object::Rfc3339Timer,
};

pub(super) fn text(cfg: &LoggerConfig) -> LoggerResult<()> {
    let layer = fmt::layer()
        .with_ansi(cfg.should_use_color())
        .with_target(cfg.with_targets)
        .with_timer(Rfc3339Timer::new(cfg.tz))
        .with_writer(cfg.output.make_writer());

    install(tracing_subscriber::registry().with(cfg.level.to_env_filter()).with(layer))
}

pub(super) fn json(cfg: &LoggerConfig) -> LoggerResult<()> {
    let layer = fmt::layer()
        .json()
        .with_ansi(false)
        .with_target(cfg.with_targets)
        .with_timer(Rfc3339Timer::new(cfg.tz))
        .with_writer(cfg.output.make_writer());

    install(tracing_subscriber::registry().with(cfg.level.to_env_filter()).with(layer))
}

#[cfg(target_os = "linux")]
pub(super) fn journald(cfg: &LoggerConfig) -> LoggerResult<()> {
    let layer = tracing_journald::layer().map_err(|e| LoggerError::JournaldInitFailed(e.to_string()))?;

    install(tracing_subscriber::registry().with(cfg.level.to_env_filter()).with(layer))
}

#[cfg(not(target_os = "linux"))]
pub(super) fn journald(_cfg: &LoggerConfig) -> LoggerResult<()> {
    Err(LoggerError::JournaldNotSupported)
}

fn install<S>(subscriber: S) -> LoggerResult<()>
where
    S: Subscriber + Send + Sync + 'static,
{
    subscriber.try_init().map_err(|_| LoggerError::AlreadyInitialized)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::object::{LoggerFormat, LoggerOutput};

    // Only one global subscriber per test binary, so installation is covered by a single test.
    #[test]
    fn second_install_is_rejected() {
        let cfg = LoggerConfig {
            format: LoggerFormat::Json,
            output: LoggerOutput::Stderr,
            level: "rmeter_observe=debug,warn".parse().unwrap(),
            ..Default::default()
        };

        let first = crate::init_logger(&cfg);
        let second = crate::init_logger(&LoggerConfig::default());

        assert!(first.is_ok(), "first install failed: {first:?}");
        assert!(matches!(second, Err(LoggerError::AlreadyInitialized)));
        tracing::debug!(target: "rmeter_observe", "installed");
    }

    #[cfg(not(target_os = "linux"))]
    #[test]
    fn journald_is_refused_off_linux() {
        assert!(matches!(
            journald(&LoggerConfig::default()),
            Err(LoggerError::JournaldNotSupported)
        ));
    }
}
