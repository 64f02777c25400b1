//! Atomic read-modify-write access to the state document.
//!
//! One writer process per document. Writes hold a process-scoped mutex
//! and land on disk as temp-file + fsync + rename, so readers that skip
//! the mutex still never observe a torn document.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::ConfigError;

use super::document::{StateDocument, TaskStatus};
use super::machine::TaskStateMachine;

/// Execution-result fields written back onto a task after a run.
///
/// Orchestration fields (dependencies, manifests, fix-loop lineage, …)
/// are deliberately absent: the merge can never clobber them.
#[derive(Debug, Clone, Default)]
pub struct TaskResultUpdate {
    pub task_id: String,
    pub status: TaskStatus,
    pub exit_code: i32,
    pub output: String,
    pub error: String,
    pub files_changed: Vec<String>,
    pub coverage: String,
    pub coverage_num: f64,
    pub tests_passed: u32,
    pub tests_failed: u32,
    pub window_id: String,
    pub pane_id: String,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Serialized access to one on-disk state document.
pub struct StateWriter {
    path: PathBuf,
    lock: Mutex<()>,
}

impl StateWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the document. A missing or empty file is the canonical empty
    /// document; a present-but-unparsable file is a configuration error.
    pub fn read(&self) -> Result<StateDocument, ConfigError> {
        read_document(&self.path)
    }

    /// Lock, load, mutate, atomically persist.
    ///
    /// The closure's error aborts the write: a failed mutation never
    /// half-persists.
    pub async fn update<T>(
        &self,
        mutate: impl FnOnce(&mut StateDocument) -> Result<T>,
    ) -> Result<T> {
        let _guard = self.lock.lock().await;
        let mut doc = read_document(&self.path)?;
        let out = mutate(&mut doc)?;
        write_document(&self.path, &doc)?;
        Ok(out)
    }

    /// Replace the whole document (used for initialization).
    pub async fn replace(&self, doc: &StateDocument) -> Result<()> {
        let _guard = self.lock.lock().await;
        write_document(&self.path, doc)
    }

    /// Validated single-task status transition.
    pub async fn transition(&self, task_id: &str, to: TaskStatus) -> Result<()> {
        let id = task_id.to_string();
        self.update(move |doc| transition_task(doc, &id, to)).await
    }

    /// The runner's start write: `in_progress` plus pane placement.
    pub async fn write_task_start(
        &self,
        task_id: &str,
        window_id: &str,
        pane_id: &str,
    ) -> Result<()> {
        let id = task_id.to_string();
        let window = window_id.to_string();
        let pane = pane_id.to_string();
        self.update(move |doc| {
            apply_status(doc, &id, TaskStatus::InProgress)?;
            let task = doc
                .task_mut(&id)
                .ok_or_else(|| ConfigError::TaskNotFound { task_id: id.clone() })?;
            if !window.is_empty() {
                task.window_id = window.clone();
            }
            if !pane.is_empty() {
                task.pane_id = pane.clone();
            }
            if !window.is_empty() {
                doc.window_mapping.insert(id.clone(), window.clone());
            }
            Ok(())
        })
        .await
    }

    /// The runner's completion write: the full result merge.
    pub async fn write_task_result(&self, update: TaskResultUpdate) -> Result<()> {
        self.update(move |doc| apply_task_result(doc, &update)).await
    }
}

/// Apply a validated status change inside an open document mutation.
///
/// The identity transition is a merge-only no-op: the runner's start write
/// may race a transition another component already performed.
pub fn apply_status(
    doc: &mut StateDocument,
    task_id: &str,
    to: TaskStatus,
) -> Result<(), ConfigError> {
    let task = doc
        .task_mut(task_id)
        .ok_or_else(|| ConfigError::TaskNotFound { task_id: task_id.to_string() })?;
    let from = task.status;
    if from == to {
        debug!(task_id, status = %to, "identity status write, nothing to do");
        return Ok(());
    }
    if !TaskStateMachine::is_valid_transition(from, to) {
        warn!(task_id, %from, %to, "rejected status transition");
        return Err(ConfigError::InvalidTransition {
            task_id: task_id.to_string(),
            from,
            to,
        });
    }
    task.status = to;
    Ok(())
}

/// [`apply_status`] lifted to `anyhow::Result` for `update` closures.
pub fn transition_task(doc: &mut StateDocument, task_id: &str, to: TaskStatus) -> Result<()> {
    apply_status(doc, task_id, to)?;
    Ok(())
}

/// Merge an execution-result update onto its task.
pub fn apply_task_result(doc: &mut StateDocument, update: &TaskResultUpdate) -> Result<()> {
    apply_status(doc, &update.task_id, update.status)?;

    let task = doc
        .task_mut(&update.task_id)
        .ok_or_else(|| ConfigError::TaskNotFound { task_id: update.task_id.clone() })?;

    task.completed_at = update.completed_at;

    // Execution fields replace unconditionally, even when empty, so a
    // later success clears a stale failure.
    task.output = update.output.clone();
    task.error = update.error.clone();
    task.files_changed = update.files_changed.clone();
    task.coverage = update.coverage.clone();
    task.coverage_num = update.coverage_num;
    task.tests_passed = update.tests_passed;
    task.tests_failed = update.tests_failed;

    if update.exit_code != 0 || update.completed_at.is_some() {
        task.exit_code = update.exit_code;
    }
    if !update.window_id.is_empty() {
        task.window_id = update.window_id.clone();
    }
    if !update.pane_id.is_empty() {
        task.pane_id = update.pane_id.clone();
    }

    if !update.window_id.is_empty() {
        doc.window_mapping
            .insert(update.task_id.clone(), update.window_id.clone());
    }

    Ok(())
}

fn read_document(path: &Path) -> Result<StateDocument, ConfigError> {
    let bytes = match fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(StateDocument::default()),
        Err(e) => {
            return Err(ConfigError::UnreadableState {
                path: path.display().to_string(),
                reason: e.to_string(),
            });
        }
    };
    if bytes.iter().all(|b| b.is_ascii_whitespace()) {
        return Ok(StateDocument::default());
    }
    serde_json::from_slice(&bytes).map_err(|e| ConfigError::UnreadableState {
        path: path.display().to_string(),
        reason: e.to_string(),
    })
}

/// Marshal, write a sibling temp file, fsync, rename over the target.
fn write_document(path: &Path, doc: &StateDocument) -> Result<()> {
    let payload = serde_json::to_vec_pretty(doc).context("failed to serialize state document")?;

    let tmp = path.with_extension("json.tmp");
    {
        let mut file = fs::File::create(&tmp)
            .with_context(|| format!("failed to create temp state file {}", tmp.display()))?;
        file.write_all(&payload)
            .with_context(|| format!("failed to write temp state file {}", tmp.display()))?;
        file.sync_all()
            .with_context(|| format!("failed to fsync temp state file {}", tmp.display()))?;
    }
    fs::rename(&tmp, path).with_context(|| {
        format!("failed to rename {} over {}", tmp.display(), path.display())
    })?;
    Ok(())
}
