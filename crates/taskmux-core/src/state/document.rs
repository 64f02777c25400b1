//! The persisted state document and the entities it contains.
//!
//! The document is the single JSON file of record for one orchestration
//! run. External tools (the spec parser, the review pipeline, the
//! narrative renderer) read and write it too, so every field carries
//! `#[serde(default)]` and unknown statuses never panic the loader.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Classification of a task's work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    #[default]
    Code,
    Ui,
    Review,
}

/// How carefully a task must be treated (informs prompt construction
/// and review expectations upstream; carried verbatim here).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Criticality {
    #[default]
    Standard,
    Complex,
    SecuritySensitive,
}

/// Task execution status. See [`super::machine`] for the legal transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    NotStarted,
    InProgress,
    PendingReview,
    UnderReview,
    FixRequired,
    FinalReview,
    Completed,
    Blocked,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::NotStarted => "not_started",
            Self::InProgress => "in_progress",
            Self::PendingReview => "pending_review",
            Self::UnderReview => "under_review",
            Self::FixRequired => "fix_required",
            Self::FinalReview => "final_review",
            Self::Completed => "completed",
            Self::Blocked => "blocked",
        };
        f.write_str(s)
    }
}

/// Review severity. `None` means the reviewer found nothing of note.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    Major,
    Minor,
    #[default]
    None,
}

impl Severity {
    /// Whether this severity forces the task into the fix loop.
    pub fn requires_fix(self) -> bool {
        matches!(self, Self::Critical | Self::Major)
    }

    /// Upper-case tag used in fix prompts, e.g. `CRITICAL`.
    pub fn tag(self) -> &'static str {
        match self {
            Self::Critical => "CRITICAL",
            Self::Major => "MAJOR",
            Self::Minor => "MINOR",
            Self::None => "NONE",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Critical => "critical",
            Self::Major => "major",
            Self::Minor => "minor",
            Self::None => "none",
        };
        f.write_str(s)
    }
}

/// A single reviewer assessment of one task.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ReviewFinding {
    #[serde(default)]
    pub task_id: String,
    #[serde(default)]
    pub reviewer: String,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub details: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// One entry of a task's `review_history`.
///
/// Attempt index 0 is the review of the initial implementation; attempt N
/// is the review of the Nth fix attempt.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ReviewRecord {
    #[serde(default)]
    pub attempt: u32,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default)]
    pub findings: Vec<ReviewFinding>,
    #[serde(default)]
    pub reviewed_at: Option<DateTime<Utc>>,
}

/// Consolidated per-task verdict over all review findings.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FinalReport {
    #[serde(default)]
    pub task_id: String,
    #[serde(default)]
    pub overall_severity: Severity,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub finding_count: u32,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// A blocked-task record surfaced to humans.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BlockedItem {
    #[serde(default)]
    pub task_id: String,
    #[serde(default)]
    pub blocking_reason: String,
    #[serde(default)]
    pub dependent_tasks: Vec<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// A structured question addressed to a human operator.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PendingDecision {
    #[serde(default)]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(default)]
    pub context: String,
    #[serde(default)]
    pub options: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

fn default_max_fix_attempts() -> u32 {
    3
}

/// The unit of work.
///
/// A task with a non-empty `subtasks` list is a *parent*: a pure container
/// whose status is derived from its leaves and which is never dispatched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub task_id: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub details: String,
    #[serde(default, rename = "type")]
    pub task_type: TaskType,
    #[serde(default)]
    pub criticality: Criticality,
    #[serde(default)]
    pub is_optional: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub subtasks: Vec<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub writes: Vec<String>,
    #[serde(default)]
    pub reads: Vec<String>,

    // Execution lineage.
    #[serde(default)]
    pub owner_agent: String,
    #[serde(default)]
    pub original_agent: String,

    // Fix-loop lineage.
    #[serde(default)]
    pub fix_attempts: u32,
    #[serde(default = "default_max_fix_attempts")]
    pub max_fix_attempts: u32,
    #[serde(default)]
    pub escalated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escalated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_review_severity: String,
    #[serde(default)]
    pub review_history: Vec<ReviewRecord>,

    // Execution result.
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub exit_code: i32,
    #[serde(default)]
    pub output: String,
    #[serde(default)]
    pub error: String,
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
    pub window_id: String,
    #[serde(default)]
    pub pane_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    // Blocking.
    #[serde(default)]
    pub blocked_reason: String,
    #[serde(default)]
    pub blocked_by: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl Task {
    /// A bare task with the given id and everything else defaulted.
    pub fn new(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            description: String::new(),
            details: String::new(),
            task_type: TaskType::default(),
            criticality: Criticality::default(),
            is_optional: false,
            parent_id: None,
            subtasks: Vec::new(),
            dependencies: Vec::new(),
            writes: Vec::new(),
            reads: Vec::new(),
            owner_agent: String::new(),
            original_agent: String::new(),
            fix_attempts: 0,
            max_fix_attempts: default_max_fix_attempts(),
            escalated: false,
            escalated_at: None,
            last_review_severity: String::new(),
            review_history: Vec::new(),
            status: TaskStatus::NotStarted,
            exit_code: 0,
            output: String::new(),
            error: String::new(),
            files_changed: Vec::new(),
            coverage: String::new(),
            coverage_num: 0.0,
            tests_passed: 0,
            tests_failed: 0,
            window_id: String::new(),
            pane_id: String::new(),
            completed_at: None,
            blocked_reason: String::new(),
            blocked_by: String::new(),
            created_at: None,
        }
    }

    /// Parents hold subtasks and are never dispatched.
    pub fn is_parent(&self) -> bool {
        !self.subtasks.is_empty()
    }

    pub fn is_leaf(&self) -> bool {
        self.subtasks.is_empty()
    }
}

/// The root persisted entity.
///
/// All array fields default to empty and the window mapping to `{}`, so a
/// missing or empty file deserializes to the canonical empty document.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StateDocument {
    #[serde(default)]
    pub spec_path: String,
    #[serde(default)]
    pub session_name: String,
    #[serde(default)]
    pub tasks: Vec<Task>,
    #[serde(default)]
    pub review_findings: Vec<ReviewFinding>,
    #[serde(default)]
    pub final_reports: Vec<FinalReport>,
    #[serde(default)]
    pub blocked_items: Vec<BlockedItem>,
    #[serde(default)]
    pub pending_decisions: Vec<PendingDecision>,
    #[serde(default)]
    pub deferred_fixes: Vec<serde_json::Value>,
    #[serde(default)]
    pub window_mapping: BTreeMap<String, String>,
}

impl StateDocument {
    pub fn task(&self, task_id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.task_id == task_id)
    }

    pub fn task_mut(&mut self, task_id: &str) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|t| t.task_id == task_id)
    }
}
