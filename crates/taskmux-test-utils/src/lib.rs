//! Shared fixtures for taskmux integration tests: task and document
//! builders, a recording fake multiplexer, and script-backed fake
//! backends that emit streaming JSON.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use taskmux_core::backend::{Backend, Invocation};
use taskmux_core::config::RuntimeConfig;
use taskmux_core::mux::Multiplexer;
use taskmux_core::state::{
    ReviewFinding, ReviewRecord, Severity, StateDocument, StateWriter, Task, TaskStatus, TaskType,
};

// ---------------------------------------------------------------------------
// Task and document builders
// ---------------------------------------------------------------------------

/// Fluent builder over [`Task`] defaults.
pub struct TaskBuilder {
    task: Task,
}

impl TaskBuilder {
    pub fn new(id: &str) -> Self {
        Self { task: Task::new(id) }
    }

    pub fn status(mut self, status: TaskStatus) -> Self {
        self.task.status = status;
        self
    }

    pub fn description(mut self, description: &str) -> Self {
        self.task.description = description.to_string();
        self
    }

    pub fn task_type(mut self, task_type: TaskType) -> Self {
        self.task.task_type = task_type;
        self
    }

    pub fn deps(mut self, deps: &[&str]) -> Self {
        self.task.dependencies = deps.iter().map(|d| d.to_string()).collect();
        self
    }

    pub fn writes(mut self, files: &[&str]) -> Self {
        self.task.writes = files.iter().map(|f| f.to_string()).collect();
        self
    }

    pub fn reads(mut self, files: &[&str]) -> Self {
        self.task.reads = files.iter().map(|f| f.to_string()).collect();
        self
    }

    pub fn parent(mut self, parent_id: &str) -> Self {
        self.task.parent_id = Some(parent_id.to_string());
        self
    }

    pub fn subtasks(mut self, subtasks: &[&str]) -> Self {
        self.task.subtasks = subtasks.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn owner(mut self, backend: &str) -> Self {
        self.task.owner_agent = backend.to_string();
        self
    }

    pub fn fix_attempts(mut self, attempts: u32) -> Self {
        self.task.fix_attempts = attempts;
        self
    }

    pub fn escalated(mut self) -> Self {
        self.task.escalated = true;
        self
    }

    pub fn output(mut self, output: &str) -> Self {
        self.task.output = output.to_string();
        self
    }

    pub fn review_record(mut self, attempt: u32, severity: Severity, findings: &[ReviewFinding]) -> Self {
        self.task.review_history.push(ReviewRecord {
            attempt,
            severity,
            findings: findings.to_vec(),
            reviewed_at: Some(chrono::Utc::now()),
        });
        self
    }

    pub fn build(self) -> Task {
        self.task
    }
}

/// A finding with sensible defaults for tests.
pub fn finding(task_id: &str, severity: Severity, summary: &str) -> ReviewFinding {
    ReviewFinding {
        task_id: task_id.to_string(),
        reviewer: "reviewer".to_string(),
        severity,
        summary: summary.to_string(),
        details: String::new(),
        created_at: Some(chrono::Utc::now()),
    }
}

/// A state document holding the given tasks.
pub fn doc_with(tasks: Vec<Task>) -> StateDocument {
    StateDocument {
        tasks,
        ..StateDocument::default()
    }
}

/// Persist a document into a fresh temp dir and hand back the writer.
/// The `TempDir` must outlive the writer.
pub async fn temp_writer(doc: &StateDocument) -> (tempfile::TempDir, StateWriter) {
    let dir = tempfile::tempdir().expect("tempdir");
    let writer = StateWriter::new(dir.path().join("state.json"));
    writer.replace(doc).await.expect("seed state document");
    (dir, writer)
}

// ---------------------------------------------------------------------------
// Fake multiplexer
// ---------------------------------------------------------------------------

/// Recorded state of the [`FakeMux`].
#[derive(Debug, Default)]
pub struct FakeMuxState {
    pub sessions: Vec<String>,
    /// session -> ordered window names.
    pub windows: HashMap<String, Vec<String>>,
    /// Commands sent, as `(pane, command)` pairs.
    pub sent: Vec<(String, String)>,
    /// Splits performed, as `(session, window)` pairs.
    pub splits: Vec<(String, String)>,
    next_pane: u32,
}

/// An in-memory multiplexer that records every operation and fires
/// every wait-for immediately.
#[derive(Debug, Default)]
pub struct FakeMux {
    pub state: Mutex<FakeMuxState>,
    /// When `false`, `wait_for` reports a timeout.
    pub signal_fires: bool,
}

impl FakeMux {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FakeMuxState::default()),
            signal_fires: true,
        }
    }

    pub fn window_names(&self, session: &str) -> Vec<String> {
        self.state
            .lock()
            .expect("fake mux lock")
            .windows
            .get(session)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl Multiplexer for FakeMux {
    async fn has_session(&self, session: &str) -> bool {
        self.state
            .lock()
            .expect("fake mux lock")
            .sessions
            .iter()
            .any(|s| s == session)
    }

    async fn create_session(&self, session: &str) -> Result<()> {
        let mut state = self.state.lock().expect("fake mux lock");
        state.sessions.push(session.to_string());
        state
            .windows
            .entry(session.to_string())
            .or_default()
            .push("main".to_string());
        Ok(())
    }

    async fn list_windows(&self, session: &str) -> Result<Vec<String>> {
        Ok(self
            .state
            .lock()
            .expect("fake mux lock")
            .windows
            .get(session)
            .cloned()
            .unwrap_or_default())
    }

    async fn create_window(&self, session: &str, name: &str) -> Result<String> {
        let mut state = self.state.lock().expect("fake mux lock");
        state
            .windows
            .entry(session.to_string())
            .or_default()
            .push(name.to_string());
        state.next_pane += 1;
        Ok(format!("%{}", state.next_pane))
    }

    async fn split_pane(&self, session: &str, window: &str) -> Result<String> {
        let mut state = self.state.lock().expect("fake mux lock");
        let exists = state
            .windows
            .get(session)
            .is_some_and(|w| w.iter().any(|n| n == window));
        if !exists {
            anyhow::bail!("window {window} not found in session {session}");
        }
        state.splits.push((session.to_string(), window.to_string()));
        state.next_pane += 1;
        Ok(format!("%{}", state.next_pane))
    }

    async fn send_keys(&self, pane: &str, command: &str) -> Result<()> {
        self.state
            .lock()
            .expect("fake mux lock")
            .sent
            .push((pane.to_string(), command.to_string()));
        Ok(())
    }

    async fn wait_for(&self, _signal: &str, _timeout: Duration) -> Result<bool> {
        Ok(self.signal_fires)
    }
}

// ---------------------------------------------------------------------------
// Script-backed fake backends
// ---------------------------------------------------------------------------

/// Write an executable shell script that emits the given stdout lines
/// and exits with `exit_code`.
pub fn write_fake_backend(dir: &Path, name: &str, stdout_lines: &[&str], exit_code: i32) -> PathBuf {
    let path = dir.join(name);
    let mut script = String::from("#!/bin/sh\n");
    for line in stdout_lines {
        script.push_str(&format!("echo '{}'\n", line.replace('\'', r"'\''")));
    }
    script.push_str(&format!("exit {exit_code}\n"));
    std::fs::write(&path, script).expect("write fake backend script");
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
            .expect("chmod fake backend script");
    }
    path
}

/// A [`Backend`] adapter that launches an arbitrary script.
#[derive(Debug)]
pub struct ScriptBackend {
    pub backend_name: String,
    pub script: PathBuf,
    pub stdin: bool,
}

impl ScriptBackend {
    pub fn new(name: &str, script: PathBuf) -> Self {
        Self {
            backend_name: name.to_string(),
            script,
            stdin: true,
        }
    }
}

impl Backend for ScriptBackend {
    fn name(&self) -> &str {
        &self.backend_name
    }

    fn command(&self) -> &str {
        self.script.to_str().unwrap_or("fake-backend")
    }

    fn build_args(&self, _config: &RuntimeConfig, inv: &Invocation<'_>) -> Vec<String> {
        if inv.prompt_via_stdin {
            vec!["-".to_string()]
        } else {
            vec![inv.prompt.to_string()]
        }
    }

    fn supports_stdin(&self) -> bool {
        self.stdin
    }
}
