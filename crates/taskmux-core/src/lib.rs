//! taskmux-core: execution engine for multi-agent coding workflows.
//!
//! Given a batch of task specifications and a persisted state document,
//! the engine schedules tasks over a dependency DAG with file-conflict-
//! aware batching, launches each task against an external coding-
//! assistant CLI (directly or inside a terminal pane), captures the
//! backend's streaming-JSON output into structured results, and drives
//! the review-feedback fix loop with escalation and human fallback.
//!
//! # Architecture
//!
//! ```text
//! Dispatcher (dispatch)
//!     |-- FixLoop (fixloop) ----- retry state machine
//!     |-- ready/batches (graph) - DAG + conflict partitioning
//!     |-- MuxManager (mux) ------ session/window/pane placement
//!     |-- run_task (runner) ----- subprocess + stream parsing
//!     `-- StateWriter (state) --- atomic document writes
//! ```

pub mod backend;
pub mod batch_input;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod fixloop;
pub mod graph;
pub mod mux;
pub mod runner;
pub mod state;

pub use backend::{Backend, BackendRegistry, DEFAULT_BACKEND, ESCALATION_BACKEND};
pub use config::RuntimeConfig;
pub use dispatch::{Dispatcher, ExecutionReport, SpecOverrides};
pub use error::ConfigError;
pub use fixloop::FixLoop;
pub use mux::{MuxManager, Multiplexer, Tmux};
pub use runner::{TaskResult, TaskSpec};
pub use state::{StateDocument, StateWriter, Task, TaskStatus};
