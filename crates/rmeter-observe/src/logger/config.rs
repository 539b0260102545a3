use std::io::IsTerminal;

use serde::{Deserialize, Serialize};

use crate::logger::object::{LoggerFormat, LoggerLevel, LoggerOutput, LoggerTimeZone};

/// Logger configuration, usually the `logger` section of a JSON config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LoggerConfig {
    pub format: LoggerFormat,
    /// `EnvFilter` expression, e.g. `"info"` or `"rmeter_core=debug,info"`.
    pub level: LoggerLevel,
    /// Stream for the text and json formats. Ignored by journald.
    pub output: LoggerOutput,
    /// Timezone of the timestamps.
    pub tz: LoggerTimeZone,
    /// Include the event target (module path).
    pub with_targets: bool,
    /// Ask for ANSI colors; only honored when the chosen stream is a terminal.
    pub use_color: bool,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            format: LoggerFormat::default(),
            level: LoggerLevel::default(),
            output: LoggerOutput::default(),
            tz: LoggerTimeZone::default(),
            with_targets: true,
            use_color: true,
        }
    }
}

impl LoggerConfig {
    /// Config for a worker process: same settings, logging to stderr.
    pub fn for_worker(&self) -> Self {
        Self {
            output: LoggerOutput::Stderr,
            ..self.clone()
        }
    }

    /// Colors are used only when requested, the format is text, and the target stream is a tty.
    pub fn should_use_color(&self) -> bool {
        if !self.use_color || self.format != LoggerFormat::Text {
            return false;
        }
        match self.output {
            LoggerOutput::Stdout => std::io::stdout().is_terminal(),
            LoggerOutput::Stderr => std::io::stderr().is_terminal(),
        }
    }
}
