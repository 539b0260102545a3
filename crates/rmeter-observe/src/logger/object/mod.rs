mod format;
pub use format::LoggerFormat;

mod level;
pub use level::LoggerLevel;

mod output;
pub use output::LoggerOutput;

mod timezone;
pub(crate) use timezone::Rfc3339Timer;
pub use timezone::{LoggerTimeZone, init_local_offset};
