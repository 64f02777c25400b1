//! Batch dispatcher: entry point for one dispatch cycle.
//!
//! A cycle runs the fix-loop pass, selects ready leaf tasks, partitions
//! them into conflict-free batches, executes each batch with in-batch
//! parallelism, and recomputes parent statuses. The recomputation is
//! guaranteed to run even when the cycle body errors or returns early.

pub mod report;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::backend::{BackendRegistry, DEFAULT_BACKEND};
use crate::config::RuntimeConfig;
use crate::fixloop::FixLoop;
use crate::graph::{detect_cycle, partition_batches, ready_tasks};
use crate::mux::{MuxError, MuxManager, PaneTarget, PlacementRequest};
use crate::runner::{self, TaskResult, TaskSpec};
use crate::state::{StateDocument, StateWriter, Task, TaskStatus, TaskType, apply_status};

pub use report::{ExecutionReport, ReportSummary, build_report};

/// Per-task launch attributes that live outside the state document
/// (batch-input headers: working directory, explicit window, resumable
/// session).
#[derive(Debug, Clone, Default)]
pub struct SpecOverrides {
    pub workdir: Option<PathBuf>,
    pub target_window: Option<String>,
    pub session_id: Option<String>,
    /// The prompt arrived on a pipe from the calling process.
    pub prompt_piped: bool,
}

/// One dispatch cycle's orchestrator.
pub struct Dispatcher {
    writer: Arc<StateWriter>,
    registry: Arc<BackendRegistry>,
    config: RuntimeConfig,
    mux: Option<Arc<MuxManager>>,
    overrides: HashMap<String, SpecOverrides>,
}

impl Dispatcher {
    pub fn new(
        writer: Arc<StateWriter>,
        registry: Arc<BackendRegistry>,
        config: RuntimeConfig,
    ) -> Self {
        Self {
            writer,
            registry,
            config,
            mux: None,
            overrides: HashMap::new(),
        }
    }

    /// Attach a terminal-multiplexer manager; tasks then run in panes
    /// unless `no_tmux` forces pipe-mode.
    pub fn with_mux(mut self, mux: Arc<MuxManager>) -> Self {
        self.mux = Some(mux);
        self
    }

    /// Attach per-task launch overrides from the batch input.
    pub fn with_overrides(mut self, overrides: HashMap<String, SpecOverrides>) -> Self {
        self.overrides = overrides;
        self
    }

    fn active_mux(&self) -> Option<&Arc<MuxManager>> {
        if self.config.no_tmux {
            None
        } else {
            self.mux.as_ref()
        }
    }

    /// Run one dispatch cycle.
    ///
    /// Parent-status recomputation always runs before this returns,
    /// including on early return and on cycle errors.
    pub async fn run_cycle(&self, cancel: &CancellationToken) -> Result<ExecutionReport> {
        // Configuration errors fail fast, before any subprocess.
        let doc = self.writer.read()?;
        detect_cycle(&doc.tasks)?;

        let outcome = self.cycle_inner(cancel).await;
        let recompute = self.update_parent_statuses().await;
        let report = outcome?;
        recompute?;
        Ok(report)
    }

    async fn cycle_inner(&self, cancel: &CancellationToken) -> Result<ExecutionReport> {
        let mut errors: Vec<String> = Vec::new();

        // 1. Fix-loop pass.
        let fixloop = FixLoop {
            writer: &self.writer,
            registry: &self.registry,
            config: &self.config,
        };
        let fix_results = fixloop
            .process(self.active_mux().map(|m| m.as_ref()), cancel)
            .await
            .context("fix-loop pass failed")?;

        // 2. Ready leaf tasks.
        let doc = self.writer.read()?;
        let ready = ready_tasks(&doc.tasks);

        // 3. Nothing to do this cycle.
        if fix_results.is_empty() && ready.is_empty() {
            info!("dispatch cycle: no fixes and no ready tasks");
            return Ok(build_report(&[], self.config.coverage_target, errors));
        }

        // Unknown backends are configuration errors; refuse before launch.
        for task in &ready {
            self.registry.resolve(&task.task_id, owner_backend(task))?;
        }

        let mux = self.active_mux();
        if let Some(manager) = mux {
            if !ready.is_empty() {
                manager
                    .ensure_session()
                    .await
                    .context("terminal session setup failed")?;
            }
        }

        // 4. Conflict-aware batches, sequential between, parallel within.
        let mut results = fix_results;
        let batches = partition_batches(&ready);
        let batch_count = batches.len();
        for (index, batch) in batches.into_iter().enumerate() {
            if cancel.is_cancelled() {
                errors.push("dispatch interrupted".to_string());
                break;
            }
            info!(batch = index + 1, of = batch_count, tasks = batch.len(), "running batch");
            let batch_results = self
                .run_batch(batch, mux.map(|m| m.as_ref()), cancel, &mut errors)
                .await?;
            results.extend(batch_results);
        }

        // 5. Aggregate report.
        Ok(build_report(&results, self.config.coverage_target, errors))
    }

    /// Execute one batch: reserve targets, run every task in parallel,
    /// wait for all of them, record failure reasons.
    async fn run_batch(
        &self,
        batch: Vec<Task>,
        mux: Option<&MuxManager>,
        cancel: &CancellationToken,
        errors: &mut Vec<String>,
    ) -> Result<Vec<TaskResult>> {
        let doc = self.writer.read()?;
        let mut launches: Vec<(TaskSpec, Option<PaneTarget>)> = Vec::new();

        for task in &batch {
            let spec = self.build_spec(task);
            let target = match mux {
                Some(manager) => {
                    let request = PlacementRequest {
                        task_id: &spec.id,
                        dependencies: &task.dependencies,
                        target_window: spec.target_window.as_deref(),
                    };
                    match manager.reserve_target(&request, &doc.window_mapping).await {
                        Ok(target) => Some(target),
                        Err(MuxError::WindowLimit) => {
                            // Deferred: the task stays not_started and is
                            // picked up by a later cycle.
                            warn!(task_id = %spec.id, "window limit reached, deferring task");
                            errors.push(format!("deferred {}: window limit reached", spec.id));
                            continue;
                        }
                        Err(e) => {
                            warn!(task_id = %spec.id, error = %e, "pane reservation failed");
                            errors.push(format!("infrastructure failure for {}: {e}", spec.id));
                            self.block_for_infrastructure(&spec.id, &e.to_string()).await?;
                            continue;
                        }
                    }
                }
                None => None,
            };
            launches.push((spec, target));
        }

        let semaphore = Arc::new(Semaphore::new(self.config.effective_max_parallel()));
        let mut handles = Vec::new();
        for (spec, target) in launches {
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .context("worker semaphore closed")?;
            let writer = Arc::clone(&self.writer);
            let registry = Arc::clone(&self.registry);
            let config = self.config.clone();
            let mux = if target.is_some() {
                self.active_mux().cloned()
            } else {
                None
            };
            let cancel = cancel.clone();

            handles.push(tokio::spawn(async move {
                let _permit = permit;
                let Some(backend) = registry.get(&spec.backend) else {
                    // Validated before the batch started; losing it now
                    // is a task failure, not a crash.
                    return TaskResult {
                        task_id: spec.id.clone(),
                        exit_code: 1,
                        error: format!("backend '{}' disappeared from registry", spec.backend),
                        ..TaskResult::default()
                    };
                };
                let pane = match (&mux, &target) {
                    (Some(manager), Some(target)) => Some((manager.as_ref(), target)),
                    _ => None,
                };
                runner::run_task(&spec, backend, &config, &writer, pane, &cancel).await
            }));
        }

        let mut results = Vec::new();
        for handle in handles {
            match handle.await {
                Ok(result) => results.push(result),
                Err(e) => errors.push(format!("task worker panicked: {e}")),
            }
        }

        self.record_failure_reasons(&results).await?;
        Ok(results)
    }

    /// Compose the runner spec for a state-document task, folding in any
    /// batch-input overrides.
    fn build_spec(&self, task: &Task) -> TaskSpec {
        let overrides = self
            .overrides
            .get(&task.task_id)
            .cloned()
            .unwrap_or_default();
        let mut prompt = task.description.clone();
        if !task.details.is_empty() {
            prompt.push_str("\n\n");
            prompt.push_str(&task.details);
        }
        TaskSpec {
            id: task.task_id.clone(),
            prompt,
            workdir: overrides.workdir.unwrap_or_else(|| PathBuf::from(".")),
            backend: owner_backend(task).to_string(),
            dependencies: task.dependencies.clone(),
            session_id: overrides.session_id,
            target_window: overrides.target_window,
            is_review: task.task_type == TaskType::Review,
            prompt_piped: overrides.prompt_piped,
            stdin_requested: false,
        }
    }

    /// Block a task that infrastructure failed underneath.
    async fn block_for_infrastructure(&self, task_id: &str, message: &str) -> Result<()> {
        let id = task_id.to_string();
        let reason = format!("infrastructure: {message}");
        self.writer
            .update(move |doc| {
                apply_status(doc, &id, TaskStatus::Blocked)?;
                if let Some(task) = doc.task_mut(&id) {
                    task.blocked_reason = reason.clone();
                }
                Ok(())
            })
            .await
    }

    /// Failed results carry their error into `blocked_reason`; the
    /// result merge itself never touches orchestration fields.
    async fn record_failure_reasons(&self, results: &[TaskResult]) -> Result<()> {
        let failures: Vec<(String, String)> = results
            .iter()
            .filter(|r| !r.passed())
            .map(|r| (r.task_id.clone(), r.error.clone()))
            .collect();
        if failures.is_empty() {
            return Ok(());
        }
        self.writer
            .update(move |doc| {
                for (task_id, error) in &failures {
                    if let Some(task) = doc.task_mut(task_id) {
                        if task.status == TaskStatus::Blocked {
                            task.blocked_reason = error.clone();
                        }
                    }
                }
                Ok(())
            })
            .await
    }

    /// Recompute every parent's derived status from its transitive leaf
    /// descendants. Runs on every cycle, including empty ones.
    pub async fn update_parent_statuses(&self) -> Result<()> {
        self.writer
            .update(|doc| {
                recompute_parent_statuses(doc);
                Ok(())
            })
            .await
    }
}

fn owner_backend(task: &Task) -> &str {
    if task.owner_agent.is_empty() {
        DEFAULT_BACKEND
    } else {
        &task.owner_agent
    }
}

/// Parent aggregation priority over a multiset of leaf statuses.
pub fn aggregate_status(leaves: &[TaskStatus]) -> Option<TaskStatus> {
    use TaskStatus::*;
    if leaves.is_empty() {
        return None;
    }
    if leaves.iter().all(|s| *s == Completed) {
        return Some(Completed);
    }
    if leaves.contains(&Blocked) {
        return Some(Blocked);
    }
    if leaves.contains(&FixRequired) {
        return Some(FixRequired);
    }
    if leaves
        .iter()
        .any(|s| matches!(s, InProgress | PendingReview | UnderReview | FinalReview))
    {
        return Some(InProgress);
    }
    Some(NotStarted)
}

/// Apply the aggregation to every parent in the document. Parents are
/// containers; their status is set directly, outside the leaf machine,
/// and a `completed` parent never regresses through aggregation.
pub fn recompute_parent_statuses(doc: &mut StateDocument) {
    let updates: Vec<(String, TaskStatus)> = doc
        .tasks
        .iter()
        .filter(|t| t.is_parent())
        .filter_map(|parent| {
            let leaves = leaf_descendant_statuses(doc, &parent.task_id);
            aggregate_status(&leaves).map(|status| (parent.task_id.clone(), status))
        })
        .collect();

    for (task_id, status) in updates {
        if let Some(task) = doc.task_mut(&task_id) {
            if task.status != TaskStatus::Completed {
                task.status = status;
            }
        }
    }
}

/// Statuses of a parent's transitive leaf descendants.
fn leaf_descendant_statuses(doc: &StateDocument, parent_id: &str) -> Vec<TaskStatus> {
    let mut out = Vec::new();
    let Some(parent) = doc.task(parent_id) else {
        return out;
    };
    for sub_id in &parent.subtasks {
        match doc.task(sub_id) {
            Some(sub) if sub.is_parent() => {
                out.extend(leaf_descendant_statuses(doc, sub_id));
            }
            Some(sub) => out.push(sub.status),
            None => {}
        }
    }
    out
}
