use std::sync::atomic::{AtomicU64, Ordering};

/// Per-process sequence for task identifiers.
static TASK_SEQ: AtomicU64 = AtomicU64::new(1);

/// Build a task id used in logs: `{prefix}-{seq:x}`.
pub fn make_task_id(prefix: &str) -> String {
    format!("{prefix}-{seq:x}", seq = TASK_SEQ.fetch_add(1, Ordering::Relaxed))
}
