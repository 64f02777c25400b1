//! Fix-prompt construction.
//!
//! The prompt hands the backend everything it needs to repair a failed
//! review: the original task, the findings that must be fixed, the tail
//! of the previous output, and -- when the dispatch escalates to a new
//! backend -- the full attempt history so the new backend does not
//! repeat dead ends.

use crate::state::{ReviewFinding, ReviewRecord};

/// How much of the previous output the prompt carries.
const PREVIOUS_OUTPUT_LIMIT: usize = 2000;

/// Inputs for one fix dispatch.
#[derive(Debug, Clone)]
pub struct FixRequest<'a> {
    /// 1-indexed attempt number for display.
    pub attempt_number: u32,
    pub max_attempts: u32,
    pub description: &'a str,
    /// Findings from the latest review, filtered to critical/major.
    pub findings: Vec<&'a ReviewFinding>,
    pub previous_output: &'a str,
    /// Complete review history; present only when escalating.
    pub history: Option<&'a [ReviewRecord]>,
}

/// Render the fix prompt.
pub fn build_fix_prompt(request: &FixRequest<'_>) -> String {
    let mut prompt = format!(
        "## FIX REQUEST - Attempt {}/{}\n\n### Original Task\n{}\n\n### Review Findings (MUST FIX)\n",
        request.attempt_number, request.max_attempts, request.description
    );

    for finding in &request.findings {
        prompt.push_str(&format!("- [{}] {}\n", finding.severity.tag(), finding.summary));
        if !finding.details.is_empty() {
            prompt.push_str(&format!("  Details: {}\n", finding.details));
        }
    }

    prompt.push_str("\n### Previous Output\n");
    prompt.push_str(&tail(request.previous_output, PREVIOUS_OUTPUT_LIMIT));
    prompt.push('\n');

    prompt.push_str(
        "\n### Instructions\n\
         1. Review the findings above.\n\
         2. Fix every critical and major issue.\n\
         3. Preserve existing functionality.\n\
         4. Run the tests before finishing.\n",
    );

    if let Some(history) = request.history {
        prompt.push_str("\n### Previous Fix Attempts History\n");
        prompt.push_str(&format_review_history(history));
    }

    prompt
}

/// Human-readable review history, one block per attempt.
pub fn format_review_history(history: &[ReviewRecord]) -> String {
    let mut out = String::new();
    for record in history {
        out.push_str(&format!(
            "- Attempt {} ({}): {} finding(s)\n",
            record.attempt,
            record.severity,
            record.findings.len()
        ));
        for finding in &record.findings {
            out.push_str(&format!("  - [{}] {}\n", finding.severity.tag(), finding.summary));
        }
    }
    out
}

/// Last `limit` characters, with a truncation marker when the head was
/// dropped.
fn tail(text: &str, limit: usize) -> String {
    let count = text.chars().count();
    if count <= limit {
        return text.to_string();
    }
    let skipped: String = text.chars().skip(count - limit).collect();
    format!("{skipped}...")
}
