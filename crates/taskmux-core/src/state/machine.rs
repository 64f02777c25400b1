//! Task status machine.
//!
//! The transition graph is fixed; every status write goes through
//! [`is_valid_transition`] in the writer and is rejected otherwise.

use super::document::TaskStatus;

/// The task state machine.
///
/// ```text
/// not_started    -> in_progress | blocked
/// in_progress    -> pending_review | blocked
/// pending_review -> under_review | blocked
/// under_review   -> final_review | fix_required | blocked
/// fix_required   -> in_progress | blocked
/// final_review   -> completed | blocked
/// blocked        -> not_started | in_progress | fix_required
/// completed      -> (terminal)
/// ```
pub struct TaskStateMachine;

impl TaskStateMachine {
    /// Check whether `from -> to` is an edge of the transition graph.
    pub fn is_valid_transition(from: TaskStatus, to: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (from, to),
            (NotStarted, InProgress)
                | (NotStarted, Blocked)
                | (InProgress, PendingReview)
                | (InProgress, Blocked)
                | (PendingReview, UnderReview)
                | (PendingReview, Blocked)
                | (UnderReview, FinalReview)
                | (UnderReview, FixRequired)
                | (UnderReview, Blocked)
                | (FixRequired, InProgress)
                | (FixRequired, Blocked)
                | (FinalReview, Completed)
                | (FinalReview, Blocked)
                | (Blocked, NotStarted)
                | (Blocked, InProgress)
                | (Blocked, FixRequired)
        )
    }

    /// `completed` is the one status no transition leaves.
    pub fn is_terminal(status: TaskStatus) -> bool {
        status == TaskStatus::Completed
    }
}
