//! Persisted state: the document model, the status machine, and the
//! atomic writer.
//!
//! All mutation of the state document flows through [`StateWriter`];
//! the machine in [`machine`] decides which status writes are legal.

pub mod document;
pub mod machine;
pub mod writer;

pub use document::{
    BlockedItem, Criticality, FinalReport, PendingDecision, ReviewFinding, ReviewRecord,
    Severity, StateDocument, Task, TaskStatus, TaskType,
};
pub use machine::TaskStateMachine;
pub use writer::{StateWriter, TaskResultUpdate, apply_status, apply_task_result, transition_task};
