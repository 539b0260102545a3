use serde::{Deserialize, Serialize};

/// Boolean switch with explicit enable/disable semantics.
///
/// Serialized as a bare JSON boolean. Defaults to disabled, so options such as
/// cache flushing stay off unless a config asks for them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Flag(bool);

impl Flag {
    pub const fn enabled() -> Self {
        Self(true)
    }

    pub const fn disabled() -> Self {
        Self(false)
    }

    pub const fn is_enabled(&self) -> bool {
        self.0
    }
}

impl From<bool> for Flag {
    fn from(b: bool) -> Self {
        Self(b)
    }
}

impl From<Flag> for bool {
    fn from(f: Flag) -> Self {
        f.0
    }
}
