use std::{
    any::Any,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
};

use tracing::warn;

use crate::{
    lifecycle::{Cleanup, LifecycleError},
    remote::RemoteSession,
};

/// Owns the remote resources of one task and releases them exactly once.
///
/// The normal path calls [`RemoteScope::release`]; `Drop` covers any path that skips it.
pub(crate) struct RemoteScope {
    cleanup: Arc<dyn Cleanup>,
    pub(crate) session: Option<Box<dyn RemoteSession>>,
    pub(crate) remote_path: Option<String>,
    released: bool,
}

impl RemoteScope {
    pub(crate) fn new(cleanup: Arc<dyn Cleanup>) -> Self {
        Self {
            cleanup,
            session: None,
            remote_path: None,
            released: false,
        }
    }

    /// Run cleanup and report its outcome.
    pub(crate) fn release(mut self) -> Result<(), LifecycleError> {
        self.released = true;
        self.run_cleanup()
    }

    fn run_cleanup(&mut self) -> Result<(), LifecycleError> {
        let session: Option<&mut dyn RemoteSession> = match self.session.as_mut() {
            Some(s) => Some(&mut **s),
            None => None,
        };
        let remote_path = self.remote_path.as_deref();
        let cleanup = &self.cleanup;

        panic::catch_unwind(AssertUnwindSafe(|| cleanup.cleanup(session, remote_path)))
            .unwrap_or_else(|payload| Err(LifecycleError::Panicked(panic_message(&*payload))))
    }
}

impl Drop for RemoteScope {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Err(e) = self.run_cleanup() {
            warn!(error = %e, remote_path = ?self.remote_path, "cleanup failed while unwinding");
        }
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
