//! POSIX rlimits for worker processes.
//!
//! Limits are installed in a `pre_exec` hook, so the worker never runs without them.
//! A requested soft limit above the inherited hard limit is clamped to the hard limit;
//! hard limits are never raised. Non-Unix targets log a warning and ignore the request.
use serde::Deserialize;
use tokio::process::Command;

/// Limits applied to every worker process of a pool. `None` keeps the inherited value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RlimitConfig {
    /// `RLIMIT_NOFILE`.
    pub max_open_files: Option<u64>,
    /// `RLIMIT_AS`, in bytes.
    pub max_address_space_bytes: Option<u64>,
    /// Set `RLIMIT_CORE` to 0.
    pub disable_core_dumps: bool,
}

impl RlimitConfig {
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.max_open_files.is_none() && self.max_address_space_bytes.is_none() && !self.disable_core_dumps
    }
}

/// Install `config` on `cmd`. No-op for an empty config.
pub fn attach_rlimits(cmd: &mut Command, config: &RlimitConfig) {
    if config.is_empty() {
        return;
    }

    #[cfg(unix)]
    unix::attach(cmd, config);

    #[cfg(not(unix))]
    tracing::warn!(?config, "rlimits are only supported on unix; ignoring");
}

#[cfg(unix)]
mod unix {
    use std::io;

    use tokio::process::Command;

    use super::RlimitConfig;

    #[cfg(all(target_os = "linux", target_env = "gnu"))]
    type Resource = libc::__rlimit_resource_t;
    #[cfg(not(all(target_os = "linux", target_env = "gnu")))]
    type Resource = libc::c_int;

    #[derive(Clone, Copy)]
    struct Limit {
        resource: Resource,
        soft: u64,
        label: &'static [u8],
    }

    pub(super) fn attach(cmd: &mut Command, config: &RlimitConfig) {
        let mut limits = Vec::with_capacity(3);
        if let Some(n) = config.max_open_files {
            limits.push(Limit {
                resource: libc::RLIMIT_NOFILE,
                soft: n,
                label: b"RLIMIT_NOFILE",
            });
        }
        if let Some(bytes) = config.max_address_space_bytes {
            limits.push(Limit {
                resource: libc::RLIMIT_AS,
                soft: bytes,
                label: b"RLIMIT_AS",
            });
        }
        if config.disable_core_dumps {
            limits.push(Limit {
                resource: libc::RLIMIT_CORE,
                soft: 0,
                label: b"RLIMIT_CORE",
            });
        }

        // SAFETY: the hook only calls async-signal-safe functions (getrlimit, setrlimit, write)
        // and does not allocate.
        unsafe {
            cmd.pre_exec(move || {
                for limit in &limits {
                    if let Err(e) = apply(*limit) {
                        stderr(b"rmeter-exec: cannot set ");
                        stderr(limit.label);
                        stderr(b"\n");
                        return Err(e);
                    }
                }
                Ok(())
            });
        }
    }

    fn apply(limit: Limit) -> io::Result<()> {
        let mut current = libc::rlimit {
            rlim_cur: 0,
            rlim_max: 0,
        };
        // SAFETY: `current` is a valid, writable rlimit.
        if unsafe { libc::getrlimit(limit.resource, &mut current) } != 0 {
            return Err(io::Error::last_os_error());
        }

        let requested = libc::rlim_t::try_from(limit.soft).unwrap_or(libc::RLIM_INFINITY);
        let soft = if current.rlim_max == libc::RLIM_INFINITY {
            requested
        } else {
            requested.min(current.rlim_max)
        };
        let next = libc::rlimit {
            rlim_cur: soft,
            rlim_max: current.rlim_max,
        };
        // SAFETY: `next` is a valid rlimit.
        if unsafe { libc::setrlimit(limit.resource, &next) } != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn stderr(msg: &[u8]) {
        // SAFETY: plain write(2) of a valid buffer.
        unsafe {
            libc::write(libc::STDERR_FILENO, msg.as_ptr().cast::<libc::c_void>(), msg.len());
        }
    }
}
