//! The execution report returned to the caller and emitted on stdout.
//!
//! Field names are part of the external interface; several of them are
//! aliases kept for downstream consumers that predate the current
//! naming.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::runner::TaskResult;

/// Aggregate counters over one dispatch cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub below_coverage: usize,
    pub coverage_target: f64,
    pub total_tests_passed: u32,
    pub total_tests_failed: u32,
    pub total_files_changed: usize,
    pub average_coverage: f64,
}

/// One dispatch cycle's full report.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub summary: ReportSummary,
    pub tasks: Vec<TaskResult>,
    pub generated_at: Option<DateTime<Utc>>,
    pub all_files_changed: Vec<String>,
    pub failed_task_ids: Vec<String>,
    pub pending_review_task_ids: Vec<String>,

    // Aliases for downstream consumers.
    pub tasks_completed: usize,
    pub tasks_failed: usize,
    pub task_results: Vec<TaskResult>,

    // Review-cycle aliases; same numbers, only one of the two sets is
    // semantically populated per call.
    pub reviews_completed: usize,
    pub reviews_failed: usize,
    pub review_results: Vec<TaskResult>,

    pub errors: Vec<String>,
}

/// Build the report for one cycle's results.
pub fn build_report(
    results: &[TaskResult],
    coverage_target: f64,
    errors: Vec<String>,
) -> ExecutionReport {
    let total = results.len();
    let mut passed = 0;
    let mut failed = 0;
    let mut below_coverage = 0;
    let mut total_tests_passed = 0u32;
    let mut total_tests_failed = 0u32;
    let mut all_files_changed: Vec<String> = Vec::new();
    let mut failed_task_ids = Vec::new();
    let mut pending_review_task_ids = Vec::new();
    let mut coverage_sum = 0.0;
    let mut coverage_count = 0usize;

    for result in results {
        if result.passed() {
            passed += 1;
            pending_review_task_ids.push(result.task_id.clone());
            if result.coverage_num > 0.0 && result.coverage_num < coverage_target {
                below_coverage += 1;
            }
        } else {
            failed += 1;
            failed_task_ids.push(result.task_id.clone());
        }
        total_tests_passed += result.tests_passed;
        total_tests_failed += result.tests_failed;
        if result.coverage_num > 0.0 {
            coverage_sum += result.coverage_num;
            coverage_count += 1;
        }
        for file in &result.files_changed {
            if !all_files_changed.contains(file) {
                all_files_changed.push(file.clone());
            }
        }
    }

    let average_coverage = if coverage_count > 0 {
        coverage_sum / coverage_count as f64
    } else {
        0.0
    };

    ExecutionReport {
        summary: ReportSummary {
            total,
            passed,
            failed,
            below_coverage,
            coverage_target,
            total_tests_passed,
            total_tests_failed,
            total_files_changed: all_files_changed.len(),
            average_coverage,
        },
        tasks: results.to_vec(),
        generated_at: Some(Utc::now()),
        all_files_changed,
        failed_task_ids,
        pending_review_task_ids,
        tasks_completed: passed,
        tasks_failed: failed,
        task_results: results.to_vec(),
        reviews_completed: passed,
        reviews_failed: failed,
        review_results: results.to_vec(),
        errors,
    }
}
