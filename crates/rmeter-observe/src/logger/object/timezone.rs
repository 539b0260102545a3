use std::{fmt, str::FromStr, sync::OnceLock};

use serde::{Deserialize, Serialize};
use time::{OffsetDateTime, UtcOffset, format_description::well_known::Rfc3339};
use tracing_subscriber::fmt::{format::Writer, time::FormatTime};

use crate::logger::LoggerError;

static LOCAL_OFFSET: OnceLock<UtcOffset> = OnceLock::new();

/// Timezone of log timestamps.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoggerTimeZone {
    #[default]
    Utc,
    /// The system offset, captured once by [`init_local_offset`].
    Local,
}

impl FromStr for LoggerTimeZone {
    type Err = LoggerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "utc" => Ok(Self::Utc),
            "local" => Ok(Self::Local),
            _ => Err(LoggerError::InvalidTimeZone(s.to_owned())),
        }
    }
}

impl fmt::Display for LoggerTimeZone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LoggerTimeZone::Utc => "utc",
            LoggerTimeZone::Local => "local",
        })
    }
}

/// Captures the local UTC offset.
///
/// Must run in `main()` before any thread is spawned (including the tokio runtime): most Unix
/// platforms refuse to read the offset from a multi-threaded process. Falls back to UTC.
pub fn init_local_offset() -> UtcOffset {
    *LOCAL_OFFSET.get_or_init(|| UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC))
}

fn local_offset() -> UtcOffset {
    LOCAL_OFFSET.get().copied().unwrap_or(UtcOffset::UTC)
}

/// RFC 3339 timestamps in the configured timezone.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Rfc3339Timer {
    offset: UtcOffset,
}

impl Rfc3339Timer {
    pub(crate) fn new(tz: LoggerTimeZone) -> Self {
        let offset = match tz {
            LoggerTimeZone::Utc => UtcOffset::UTC,
            LoggerTimeZone::Local => local_offset(),
        };
        Self { offset }
    }

    fn render(&self, at: OffsetDateTime) -> String {
        at.to_offset(self.offset)
            .format(&Rfc3339)
            .unwrap_or_else(|_| "<invalid-time>".to_owned())
    }
}

impl FormatTime for Rfc3339Timer {
    fn format_time(&self, w: &mut Writer<'_>) -> fmt::Result {
        write!(w, "{}", self.render(OffsetDateTime::now_utc()))
    }
}
