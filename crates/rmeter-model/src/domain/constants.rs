//! Environment keys consulted when normalizing an [`crate::RpcConfig`].
//!
//! Only fields left empty in the config are looked up; explicit values always win.

/// Tracker host fallback.
pub const ENV_TRACKER_HOST: &str = "RMETER_TRACKER_HOST";

/// Tracker port fallback. Must parse as `u16`.
pub const ENV_TRACKER_PORT: &str = "RMETER_TRACKER_PORT";

/// Device key requested from the tracker.
pub const ENV_TRACKER_KEY: &str = "RMETER_TRACKER_KEY";
