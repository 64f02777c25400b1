//! Per-task runner: executes one ready task against a chosen backend
//! and produces a [`TaskResult`].
//!
//! Two execution modes share the same parsing and status mapping:
//! pipe-mode launches the backend as a direct child, pane-mode drives
//! it inside a reserved terminal pane. Both write incremental state
//! through the [`StateWriter`] -- a start record when the task launches,
//! the full result merge when it finishes.

pub mod extract;
pub mod pane;
pub mod pipe;
pub mod stream;
pub mod types;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::backend::Backend;
use crate::config::RuntimeConfig;
use crate::mux::{MuxManager, PaneTarget};
use crate::state::{StateWriter, TaskResultUpdate, TaskStatus};

pub use extract::{Extracted, extract};
pub use stream::{ParsedStream, StreamReducer};
pub use types::{
    EXIT_INTERRUPTED, EXIT_NOT_FOUND, EXIT_TIMEOUT, TaskResult, TaskSpec, wants_stdin,
};

/// Map a finished run onto the status machine: clean completion heads
/// to review, anything else blocks the task.
pub fn final_status(exit_code: i32, error: &str) -> TaskStatus {
    if exit_code == 0 && error.is_empty() {
        TaskStatus::PendingReview
    } else {
        TaskStatus::Blocked
    }
}

/// Execute one task end to end.
///
/// `pane` selects the mode: `Some` runs inside the reserved target,
/// `None` runs as a direct child process.
pub async fn run_task(
    spec: &TaskSpec,
    backend: &dyn Backend,
    config: &RuntimeConfig,
    writer: &StateWriter,
    pane: Option<(&MuxManager, &PaneTarget)>,
    cancel: &CancellationToken,
) -> TaskResult {
    let (window_id, pane_id) = match &pane {
        Some((_, target)) => (target.window.clone(), target.pane.clone()),
        None => (String::new(), String::new()),
    };

    if let Err(e) = writer.write_task_start(&spec.id, &window_id, &pane_id).await {
        warn!(task_id = %spec.id, error = %e, "start write failed, continuing");
    }

    let (exit_code, parsed, mut error, stderr_tail, log_path) = match pane {
        Some((manager, target)) => {
            let outcome = pane::run_pane(backend, config, spec, manager, target, cancel).await;
            (outcome.exit_code, outcome.parsed, outcome.error, String::new(), outcome.log_path)
        }
        None => {
            let outcome = pipe::run_pipe(backend, config, spec, cancel).await;
            (
                outcome.exit_code,
                outcome.parsed,
                outcome.error,
                outcome.stderr_tail,
                String::new(),
            )
        }
    };

    // Plain non-zero exits surface the stderr tail as the error text.
    if error.is_empty() && exit_code != 0 {
        let tail = stderr_tail.trim();
        error = if tail.is_empty() {
            format!("exit status {exit_code}")
        } else {
            format!("exit status {exit_code}: {tail}")
        };
    }

    let extracted = extract(&parsed.message);
    let status = final_status(exit_code, &error);
    let completed_at = Some(Utc::now());

    let update = TaskResultUpdate {
        task_id: spec.id.clone(),
        status,
        exit_code,
        output: parsed.message.clone(),
        error: error.clone(),
        files_changed: extracted.files_changed.clone(),
        coverage: extracted.coverage.clone(),
        coverage_num: extracted.coverage_num,
        tests_passed: extracted.tests_passed,
        tests_failed: extracted.tests_failed,
        window_id,
        pane_id,
        completed_at,
    };
    if let Err(e) = writer.write_task_result(update).await {
        warn!(task_id = %spec.id, error = %e, "result write failed");
    }

    info!(
        task_id = %spec.id,
        backend = backend.name(),
        review = spec.is_review,
        exit_code,
        %status,
        "task run finished"
    );

    TaskResult {
        task_id: spec.id.clone(),
        exit_code,
        session_id: parsed
            .session_id
            .or_else(|| spec.session_id.clone())
            .unwrap_or_default(),
        message: parsed.message,
        error,
        log_path,
        files_changed: extracted.files_changed,
        coverage: extracted.coverage,
        coverage_num: extracted.coverage_num,
        tests_passed: extracted.tests_passed,
        tests_failed: extracted.tests_failed,
        key_output: extracted.key_output,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_exit_heads_to_review() {
        assert_eq!(final_status(0, ""), TaskStatus::PendingReview);
    }

    #[test]
    fn any_failure_blocks() {
        assert_eq!(final_status(1, ""), TaskStatus::Blocked);
        assert_eq!(final_status(0, "timeout"), TaskStatus::Blocked);
        assert_eq!(final_status(EXIT_TIMEOUT, "timeout"), TaskStatus::Blocked);
    }
}
