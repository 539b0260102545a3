use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{ENV_TRACKER_HOST, ENV_TRACKER_KEY, ENV_TRACKER_PORT, ModelError, ModelResult};

/// Connection parameters of the remote execution endpoint.
///
/// The tracker fields are forwarded to the connector untouched; the core only reads
/// `session_timeout_sec`, which bounds one full measurement lifecycle.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RpcConfig {
    /// Tracker host name or address.
    pub tracker_host: Option<String>,
    /// Tracker port.
    pub tracker_port: Option<u16>,
    /// Device key requested from the tracker.
    pub tracker_key: Option<String>,
    /// Priority of the session request on the tracker.
    pub session_priority: i32,
    /// Hard ceiling for one measurement, from session creation through cleanup.
    pub session_timeout_sec: f64,
    /// Connection attempts the connector may make before giving up.
    pub max_retry: u32,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            tracker_host: None,
            tracker_port: None,
            tracker_key: None,
            session_priority: 1,
            session_timeout_sec: 10.0,
            max_retry: 5,
        }
    }
}

impl RpcConfig {
    /// Fill empty tracker fields from the process environment and validate the timeout.
    pub fn normalized(self) -> ModelResult<Self> {
        self.normalized_with(|key| std::env::var(key).ok())
    }

    /// Same as [`RpcConfig::normalized`] with an explicit variable lookup.
    pub fn normalized_with<F>(mut self, lookup: F) -> ModelResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if self.tracker_host.is_none() {
            self.tracker_host = lookup(ENV_TRACKER_HOST);
        }
        if self.tracker_key.is_none() {
            self.tracker_key = lookup(ENV_TRACKER_KEY);
        }
        if self.tracker_port.is_none() {
            if let Some(raw) = lookup(ENV_TRACKER_PORT) {
                let port = raw.trim().parse::<u16>().map_err(|e| {
                    ModelError::InvalidRpcConfig(format!("{ENV_TRACKER_PORT}={raw:?}: {e}"))
                })?;
                self.tracker_port = Some(port);
            }
        }
        if !self.session_timeout_sec.is_finite() || self.session_timeout_sec <= 0.0 {
            return Err(ModelError::InvalidRpcConfig(format!(
                "session_timeout_sec must be positive, got {}",
                self.session_timeout_sec
            )));
        }
        Ok(self)
    }

    /// Session timeout as a [`Duration`]. Invalid values collapse to zero.
    pub fn session_timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.session_timeout_sec).unwrap_or(Duration::ZERO)
    }

    /// `host:port` of the tracker when both parts are known.
    pub fn tracker_addr(&self) -> Option<String> {
        match (&self.tracker_host, self.tracker_port) {
            (Some(host), Some(port)) => Some(format!("{host}:{port}")),
            _ => None,
        }
    }
}
