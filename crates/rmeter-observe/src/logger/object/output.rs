use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use tracing_subscriber::fmt::writer::BoxMakeWriter;

use crate::logger::LoggerError;

/// Stream the text and json formats write to.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "&'static str")]
pub enum LoggerOutput {
    #[default]
    Stdout,
    Stderr,
}

impl LoggerOutput {
    pub fn as_str(self) -> &'static str {
        match self {
            LoggerOutput::Stdout => "stdout",
            LoggerOutput::Stderr => "stderr",
        }
    }

    pub(crate) fn make_writer(self) -> BoxMakeWriter {
        match self {
            LoggerOutput::Stdout => BoxMakeWriter::new(std::io::stdout),
            LoggerOutput::Stderr => BoxMakeWriter::new(std::io::stderr),
        }
    }
}

impl FromStr for LoggerOutput {
    type Err = LoggerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stdout" => Ok(Self::Stdout),
            "stderr" => Ok(Self::Stderr),
            _ => Err(LoggerError::InvalidOutput(s.to_owned())),
        }
    }
}

impl TryFrom<String> for LoggerOutput {
    type Error = LoggerError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<LoggerOutput> for &'static str {
    fn from(o: LoggerOutput) -> Self {
        o.as_str()
    }
}

impl fmt::Display for LoggerOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
