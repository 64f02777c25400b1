//! Runner input and output types.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Exit code recorded for a timed-out task.
pub const EXIT_TIMEOUT: i32 = 124;
/// Exit code recorded when the backend executable is missing.
pub const EXIT_NOT_FOUND: i32 = 127;
/// Exit code recorded for an interrupted task.
pub const EXIT_INTERRUPTED: i32 = 130;

/// Everything the runner needs to execute one task.
#[derive(Debug, Clone, Default)]
pub struct TaskSpec {
    pub id: String,
    pub prompt: String,
    pub workdir: PathBuf,
    /// Backend registry name.
    pub backend: String,
    pub dependencies: Vec<String>,
    /// Session/thread id to resume.
    pub session_id: Option<String>,
    /// Explicit window placement from the batch input.
    pub target_window: Option<String>,
    /// Review tasks feed the review side of the report.
    pub is_review: bool,
    /// The prompt arrived on a pipe from the calling process.
    pub prompt_piped: bool,
    /// The caller explicitly requested stdin delivery.
    pub stdin_requested: bool,
}

/// Structured outcome of one task run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: String,
    pub exit_code: i32,
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub error: String,
    #[serde(default)]
    pub log_path: String,
    #[serde(default)]
    pub files_changed: Vec<String>,
    #[serde(default)]
    pub coverage: String,
    #[serde(default)]
    pub coverage_num: f64,
    #[serde(default)]
    pub tests_passed: u32,
    #[serde(default)]
    pub tests_failed: u32,
    #[serde(default)]
    pub key_output: String,
}

impl TaskResult {
    /// Clean completion: exit 0 and no error text.
    pub fn passed(&self) -> bool {
        self.exit_code == 0 && self.error.is_empty()
    }
}

/// Characters in a prompt that make argv delivery a quoting hazard.
fn has_quoting_hazard(prompt: &str) -> bool {
    prompt
        .chars()
        .any(|c| matches!(c, '\n' | '\\' | '`' | '"' | '\'' | '$'))
}

/// Prompt length beyond which stdin delivery is preferred.
const STDIN_LENGTH_THRESHOLD: usize = 800;

/// The stdin delivery policy. The backend must also declare stdin
/// support; callers gate on that separately.
pub fn wants_stdin(spec: &TaskSpec) -> bool {
    spec.prompt_piped
        || spec.stdin_requested
        || spec.prompt.len() > STDIN_LENGTH_THRESHOLD
        || has_quoting_hazard(&spec.prompt)
}
