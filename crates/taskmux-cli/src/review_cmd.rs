//! `taskmux review-complete`: feed an external review verdict into the
//! fix-loop engine.
//!
//! The review pipeline runs outside this process; when a verdict lands
//! it calls back in with the task id, the overall severity, and the
//! findings as JSON on stdin.

use std::io::Read;

use anyhow::{Context, Result, bail};

use taskmux_core::backend::BackendRegistry;
use taskmux_core::config::RuntimeConfig;
use taskmux_core::fixloop::FixLoop;
use taskmux_core::state::{ReviewFinding, Severity, StateWriter, TaskStatus};

pub async fn run_review_complete(
    writer: &StateWriter,
    task_id: &str,
    severity: &str,
) -> Result<()> {
    let severity = parse_severity(severity)?;

    let mut input = String::new();
    std::io::stdin()
        .read_to_string(&mut input)
        .context("failed to read findings from stdin")?;
    let findings: Vec<ReviewFinding> = if input.trim().is_empty() {
        Vec::new()
    } else {
        serde_json::from_str(&input).context("findings must be a JSON array")?
    };

    // The verdict lands on a task that finished execution; move it into
    // review if the external pipeline has not already done so.
    let doc = writer.read()?;
    if doc
        .task(task_id)
        .is_some_and(|t| t.status == TaskStatus::PendingReview)
    {
        writer.transition(task_id, TaskStatus::UnderReview).await?;
    }

    let registry = BackendRegistry::with_defaults();
    let config = RuntimeConfig::from_env();
    let fixloop = FixLoop {
        writer,
        registry: &registry,
        config: &config,
    };
    fixloop.on_review_complete(task_id, severity, findings).await?;

    println!("review recorded for {task_id} ({severity})");
    Ok(())
}

fn parse_severity(value: &str) -> Result<Severity> {
    Ok(match value.to_ascii_lowercase().as_str() {
        "critical" => Severity::Critical,
        "major" => Severity::Major,
        "minor" => Severity::Minor,
        "none" => Severity::None,
        other => bail!("unknown severity {other:?} (expected critical/major/minor/none)"),
    })
}
