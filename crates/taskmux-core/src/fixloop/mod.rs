//! The fix-loop engine: the retry state machine driven by review
//! feedback.
//!
//! Review failures of severity critical/major push a task into
//! `fix_required`; each dispatch cycle then rebuilds a fix prompt from
//! the reviewer findings and re-dispatches, escalating to a stronger
//! backend after repeated failures and finally surfacing a
//! human-intervention request when attempts are exhausted.

pub mod prompt;

use std::collections::{HashMap, HashSet, VecDeque};

use anyhow::Result;
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::backend::{BackendRegistry, DEFAULT_BACKEND, ESCALATION_BACKEND};
use crate::config::RuntimeConfig;
use crate::graph::{expand_dependencies, index_tasks};
use crate::mux::{MuxManager, PlacementRequest};
use crate::runner::{self, TaskResult, TaskSpec};
use crate::state::{
    BlockedItem, FinalReport, PendingDecision, ReviewFinding, ReviewRecord, Severity,
    StateDocument, StateWriter, TaskStatus, apply_status,
};

pub use prompt::{FixRequest, build_fix_prompt, format_review_history};

/// `blocked_reason` recorded when fix attempts are exhausted.
pub const HUMAN_INTERVENTION: &str = "human_intervention_required";

/// Options offered on the human-fallback pending decision.
const FALLBACK_OPTIONS: [&str; 3] = ["resume manually fixed", "skip this task", "abort"];

/// The engine; borrows the long-lived singletons it coordinates.
pub struct FixLoop<'a> {
    pub writer: &'a StateWriter,
    pub registry: &'a BackendRegistry,
    pub config: &'a RuntimeConfig,
}

impl FixLoop<'_> {
    /// Entry point for review completion, called by the dispatcher when
    /// an external review verdict lands.
    ///
    /// Critical/major verdicts append a history record, move the task to
    /// `fix_required`, and block every transitive dependent. None/minor
    /// verdicts ride the task through `final_review` to `completed` and
    /// unblock its dependents.
    pub async fn on_review_complete(
        &self,
        task_id: &str,
        severity: Severity,
        findings: Vec<ReviewFinding>,
    ) -> Result<()> {
        let id = task_id.to_string();
        self.writer
            .update(move |doc| {
                doc.review_findings.extend(findings.iter().cloned());
                doc.final_reports.push(FinalReport {
                    task_id: id.clone(),
                    overall_severity: severity,
                    summary: findings
                        .first()
                        .map(|f| f.summary.clone())
                        .unwrap_or_default(),
                    finding_count: findings.len() as u32,
                    created_at: Some(Utc::now()),
                });

                if severity.requires_fix() {
                    enter_fix_mode(doc, &id, severity, findings)
                } else {
                    complete_after_review(doc, &id, severity, findings)
                }
            })
            .await
    }

    /// Per-cycle scheduling pass: dispatch every `fix_required` task,
    /// escalating and exhausting as the attempt counters dictate.
    /// Returns the results of the dispatched fixes.
    pub async fn process(
        &self,
        mux: Option<&MuxManager>,
        cancel: &CancellationToken,
    ) -> Result<Vec<TaskResult>> {
        let doc = self.writer.read()?;
        let fix_ids: Vec<String> = doc
            .tasks
            .iter()
            .filter(|t| t.status == TaskStatus::FixRequired)
            .map(|t| t.task_id.clone())
            .collect();

        let mut dispatched = Vec::new();
        for task_id in fix_ids {
            if cancel.is_cancelled() {
                break;
            }
            if let Some(result) = self.schedule_one(&task_id, mux, cancel).await? {
                dispatched.push(result);
            }
        }
        Ok(dispatched)
    }

    /// Handle one `fix_required` task. Returns the dispatch result, or
    /// `None` when the task was not dispatched (exhausted or skipped).
    async fn schedule_one(
        &self,
        task_id: &str,
        mux: Option<&MuxManager>,
        cancel: &CancellationToken,
    ) -> Result<Option<TaskResult>> {
        // Exhaustion and escalation bookkeeping happen inside one
        // document mutation; the dispatch itself runs outside the lock.
        let id = task_id.to_string();
        let escalation_threshold = self.config.escalation_threshold;
        let prepared = self
            .writer
            .update(move |doc| {
                let Some(task) = doc.task(&id).cloned() else {
                    return Ok(None);
                };
                if task.status != TaskStatus::FixRequired {
                    return Ok(None);
                }

                if task.fix_attempts >= task.max_fix_attempts {
                    trigger_human_fallback(doc, &id)?;
                    return Ok(None);
                }

                if task.fix_attempts >= escalation_threshold && !task.escalated {
                    let owner = task.owner_agent.clone();
                    if let Some(t) = doc.task_mut(&id) {
                        t.escalated = true;
                        t.escalated_at = Some(Utc::now());
                        t.original_agent = owner;
                    }
                    info!(task_id = %id, "escalating fix dispatch");
                }

                Ok(doc.task(&id).cloned())
            })
            .await?;

        let Some(task) = prepared else {
            return Ok(None);
        };

        // Build the fix request from the latest review record.
        let latest = task.review_history.last();
        let findings: Vec<&ReviewFinding> = latest
            .map(|record| {
                record
                    .findings
                    .iter()
                    .filter(|f| f.severity.requires_fix())
                    .collect()
            })
            .unwrap_or_default();
        let request = FixRequest {
            attempt_number: task.fix_attempts + 1,
            max_attempts: task.max_fix_attempts,
            description: &task.description,
            findings,
            previous_output: &task.output,
            history: task.escalated.then_some(task.review_history.as_slice()),
        };
        let fix_prompt = build_fix_prompt(&request);

        let backend_name = if task.escalated {
            ESCALATION_BACKEND
        } else if task.owner_agent.is_empty() {
            DEFAULT_BACKEND
        } else {
            task.owner_agent.as_str()
        };
        let backend = self.registry.resolve(&task.task_id, backend_name)?;

        let spec = TaskSpec {
            id: task.task_id.clone(),
            prompt: fix_prompt,
            workdir: std::path::PathBuf::from("."),
            backend: backend_name.to_string(),
            dependencies: task.dependencies.clone(),
            session_id: None,
            target_window: None,
            is_review: false,
            prompt_piped: false,
            stdin_requested: true,
        };

        self.writer
            .transition(&task.task_id, TaskStatus::InProgress)
            .await?;

        // Fix dispatches reuse the task's window when the manager can
        // find one; otherwise they fall back to pipe mode.
        let reserved = match mux {
            Some(manager) => {
                let doc = self.writer.read()?;
                let request = PlacementRequest {
                    task_id: &task.task_id,
                    dependencies: &task.dependencies,
                    target_window: doc
                        .window_mapping
                        .get(&task.task_id)
                        .map(String::as_str),
                };
                match manager.reserve_target(&request, &doc.window_mapping).await {
                    Ok(target) => Some(target),
                    Err(e) => {
                        warn!(task_id = %task.task_id, error = %e, "pane reservation failed for fix, using pipe mode");
                        None
                    }
                }
            }
            None => None,
        };

        let result = match (mux, &reserved) {
            (Some(manager), Some(target)) => {
                runner::run_task(&spec, backend, self.config, self.writer, Some((manager, target)), cancel)
                    .await
            }
            _ => runner::run_task(&spec, backend, self.config, self.writer, None, cancel).await,
        };

        self.settle_fix_dispatch(&task.task_id, &result).await?;
        Ok(Some(result))
    }

    /// Post-dispatch accounting: increment on success, roll back on
    /// failure. The counter moves exactly once per completed fix.
    async fn settle_fix_dispatch(&self, task_id: &str, result: &TaskResult) -> Result<()> {
        let id = task_id.to_string();
        if result.passed() {
            self.writer
                .update(move |doc| {
                    let task = doc
                        .task_mut(&id)
                        .ok_or_else(|| anyhow::anyhow!("task {id} vanished during fix dispatch"))?;
                    task.fix_attempts += 1;
                    apply_status(doc, &id, TaskStatus::PendingReview)?;
                    Ok(())
                })
                .await
        } else {
            warn!(task_id, exit_code = result.exit_code, "fix dispatch failed, rolling back");
            self.writer
                .update(move |doc| {
                    if let Err(e) = apply_status(doc, &id, TaskStatus::FixRequired) {
                        warn!(task_id = %id, error = %e, "rollback transition rejected");
                    }
                    Ok(())
                })
                .await
        }
    }
}

/// Critical/major review verdict: record history, enter fix mode, block
/// the downstream cone.
fn enter_fix_mode(
    doc: &mut StateDocument,
    task_id: &str,
    severity: Severity,
    findings: Vec<ReviewFinding>,
) -> Result<()> {
    let task = doc
        .task_mut(task_id)
        .ok_or_else(|| anyhow::anyhow!("reviewed task {task_id} not in state document"))?;
    let attempt = task.fix_attempts;
    task.review_history.push(ReviewRecord {
        attempt,
        severity,
        findings,
        reviewed_at: Some(Utc::now()),
    });
    task.last_review_severity = severity.to_string();

    apply_status(doc, task_id, TaskStatus::FixRequired)?;
    block_dependents(doc, task_id, &format!("Upstream task {task_id} requires fixes ({severity})"));
    Ok(())
}

/// None/minor verdict: finish the task and release its dependents.
fn complete_after_review(
    doc: &mut StateDocument,
    task_id: &str,
    severity: Severity,
    findings: Vec<ReviewFinding>,
) -> Result<()> {
    apply_status(doc, task_id, TaskStatus::FinalReview)?;
    apply_status(doc, task_id, TaskStatus::Completed)?;
    if let Some(task) = doc.task_mut(task_id) {
        task.last_review_severity = severity.to_string();
    }

    // Minor findings survive as deferred fixes instead of re-entering
    // the loop.
    if severity == Severity::Minor {
        for finding in findings {
            doc.deferred_fixes
                .push(serde_json::to_value(finding).unwrap_or_default());
        }
    }

    let unblocked: Vec<String> = doc
        .tasks
        .iter()
        .filter(|t| t.blocked_by == task_id && t.status == TaskStatus::Blocked)
        .map(|t| t.task_id.clone())
        .collect();
    for id in unblocked {
        apply_status(doc, &id, TaskStatus::NotStarted)?;
        if let Some(task) = doc.task_mut(&id) {
            task.blocked_reason.clear();
            task.blocked_by.clear();
        }
    }
    doc.blocked_items.retain(|item| item.task_id != task_id);
    Ok(())
}

/// Exhausted attempts: block the task, file exactly one critical
/// pending decision, block dependents that are still loose.
fn trigger_human_fallback(doc: &mut StateDocument, task_id: &str) -> Result<()> {
    let already_filed = doc.pending_decisions.iter().any(|d| {
        d.task_id.as_deref() == Some(task_id) && d.priority.as_deref() == Some("critical")
    });

    apply_status(doc, task_id, TaskStatus::Blocked)?;
    let task = doc
        .task_mut(task_id)
        .ok_or_else(|| anyhow::anyhow!("task {task_id} not in state document"))?;
    task.blocked_reason = HUMAN_INTERVENTION.to_string();
    let task = task.clone();

    if !already_filed {
        let context = format!(
            "Task '{}' failed review after {} fix attempt(s).\n\nReview history:\n{}",
            task.description,
            task.fix_attempts,
            format_review_history(&task.review_history)
        );
        doc.pending_decisions.push(PendingDecision {
            id: Uuid::new_v4().to_string(),
            task_id: Some(task_id.to_string()),
            context,
            options: FALLBACK_OPTIONS.iter().map(|o| o.to_string()).collect(),
            priority: Some("critical".to_string()),
            created_at: Some(Utc::now()),
        });
        info!(task_id, "filed human-intervention request");
    }

    block_dependents(doc, task_id, &format!("Upstream task {task_id} requires human intervention"));
    Ok(())
}

/// Block every transitive dependent of `task_id` (and of its parent,
/// when the task is a subtask) that is not already terminal.
fn block_dependents(doc: &mut StateDocument, task_id: &str, reason: &str) {
    let dependents = transitive_dependents(doc, task_id);
    if dependents.is_empty() {
        return;
    }

    for dep_id in &dependents {
        let Some(task) = doc.task(dep_id) else { continue };
        if matches!(task.status, TaskStatus::Completed | TaskStatus::Blocked) || task.is_parent() {
            continue;
        }
        if apply_status(doc, dep_id, TaskStatus::Blocked).is_ok() {
            if let Some(task) = doc.task_mut(dep_id) {
                task.blocked_reason = reason.to_string();
                task.blocked_by = task_id.to_string();
            }
        }
    }

    let already_recorded = doc
        .blocked_items
        .iter()
        .any(|item| item.task_id == task_id && item.blocking_reason == reason);
    if !already_recorded {
        doc.blocked_items.push(BlockedItem {
            task_id: task_id.to_string(),
            blocking_reason: reason.to_string(),
            dependent_tasks: dependents,
            created_at: Some(Utc::now()),
        });
    }
}

/// Reverse-dependency BFS over the expanded graph, seeded with the task
/// and (for subtasks) its parent. The originals are excluded.
pub fn transitive_dependents(doc: &StateDocument, task_id: &str) -> Vec<String> {
    let index = index_tasks(&doc.tasks);
    let mut reverse: HashMap<String, Vec<String>> = HashMap::new();
    for task in &doc.tasks {
        if task.is_parent() {
            continue;
        }
        let mut deps = expand_dependencies(&task.task_id, &task.dependencies, &index);
        // Raw references too: a dependent naming a parent directly still
        // belongs to the parent's cone.
        deps.extend(task.dependencies.iter().cloned());
        for dep in deps {
            reverse.entry(dep).or_default().push(task.task_id.clone());
        }
    }

    let mut seeds = vec![task_id.to_string()];
    if let Some(parent) = doc.task(task_id).and_then(|t| t.parent_id.clone()) {
        seeds.push(parent);
    }

    let mut seen: HashSet<String> = seeds.iter().cloned().collect();
    let mut queue: VecDeque<String> = seeds.into();
    let mut out = Vec::new();
    while let Some(node) = queue.pop_front() {
        if let Some(dependents) = reverse.get(&node) {
            for dep in dependents {
                if seen.insert(dep.clone()) {
                    out.push(dep.clone());
                    queue.push_back(dep.clone());
                }
            }
        }
    }
    out
}
