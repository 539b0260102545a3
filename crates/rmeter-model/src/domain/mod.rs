mod flag;
pub use flag::Flag;

mod constants;
pub use constants::{ENV_TRACKER_HOST, ENV_TRACKER_KEY, ENV_TRACKER_PORT};
