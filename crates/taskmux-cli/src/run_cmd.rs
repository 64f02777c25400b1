//! `taskmux run` and `taskmux dispatch`: drive dispatch cycles.

use std::collections::HashMap;
use std::io::Read;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::info;

use taskmux_core::backend::BackendRegistry;
use taskmux_core::batch_input::{BatchTask, parse_batch_input};
use taskmux_core::config::RuntimeConfig;
use taskmux_core::dispatch::{Dispatcher, ExecutionReport, SpecOverrides, build_report};
use taskmux_core::mux::{MuxManager, Tmux};
use taskmux_core::runner::TaskResult;
use taskmux_core::state::{StateWriter, Task};

/// Safety bound on run-to-quiescence cycles; each productive cycle
/// dispatches at least one task, so a real graph converges long before
/// this.
const MAX_CYCLES: usize = 1000;

/// Parallel mode: read a batch submission from stdin, seed the state
/// document, and drive cycles until nothing more dispatches.
pub async fn run_parallel(
    writer: Arc<StateWriter>,
    session: Option<String>,
    cancel: CancellationToken,
) -> Result<ExecutionReport> {
    let mut input = String::new();
    std::io::stdin()
        .read_to_string(&mut input)
        .context("failed to read batch input from stdin")?;
    let batch = parse_batch_input(&input)?;

    seed_state(&writer, &batch, session.as_deref()).await?;

    let config = RuntimeConfig::from_env();
    let overrides = overrides_from(&batch);
    let dispatcher = build_dispatcher(
        Arc::clone(&writer),
        config.clone(),
        session.as_deref(),
    )
    .with_overrides(overrides);

    // One submission, many cycles: completions feed later layers.
    let mut all_results: Vec<TaskResult> = Vec::new();
    let mut all_errors: Vec<String> = Vec::new();
    for cycle in 0..MAX_CYCLES {
        if cancel.is_cancelled() {
            all_errors.push("interrupted".to_string());
            break;
        }
        let report = dispatcher.run_cycle(&cancel).await?;
        info!(cycle, dispatched = report.summary.total, "cycle finished");
        let quiescent = report.summary.total == 0;
        all_results.extend(report.tasks);
        all_errors.extend(report.errors);
        if quiescent {
            break;
        }
    }

    Ok(build_report(&all_results, config.coverage_target, all_errors))
}

/// Single-cycle mode against an existing state document.
pub async fn run_single_cycle(
    writer: Arc<StateWriter>,
    session: Option<String>,
    cancel: CancellationToken,
) -> Result<ExecutionReport> {
    let config = RuntimeConfig::from_env();
    let dispatcher = build_dispatcher(writer, config, session.as_deref());
    dispatcher.run_cycle(&cancel).await
}

fn build_dispatcher(
    writer: Arc<StateWriter>,
    config: RuntimeConfig,
    session: Option<&str>,
) -> Dispatcher {
    let registry = Arc::new(BackendRegistry::with_defaults());
    let mut dispatcher = Dispatcher::new(writer, registry, config.clone());
    if let Some(session) = session {
        if !config.no_tmux {
            let manager = MuxManager::new(session, Arc::new(Tmux::new()));
            dispatcher = dispatcher.with_mux(Arc::new(manager));
        }
    }
    dispatcher
}

/// Merge the submission into the state document: unknown task ids are
/// created, existing tasks are left untouched.
async fn seed_state(
    writer: &StateWriter,
    batch: &[BatchTask],
    session: Option<&str>,
) -> Result<()> {
    let batch = batch.to_vec();
    let session = session.map(str::to_string);
    writer
        .update(move |doc| {
            if let Some(session) = &session {
                doc.session_name = session.clone();
            }
            for entry in &batch {
                if doc.task(&entry.id).is_some() {
                    continue;
                }
                let mut task = Task::new(&entry.id);
                task.description = entry.content.clone();
                task.dependencies = entry.dependencies.clone();
                task.owner_agent = entry.backend.clone().unwrap_or_default();
                task.created_at = Some(chrono::Utc::now());
                doc.tasks.push(task);
            }
            Ok(())
        })
        .await
}

fn overrides_from(batch: &[BatchTask]) -> HashMap<String, SpecOverrides> {
    batch
        .iter()
        .map(|entry| {
            (
                entry.id.clone(),
                SpecOverrides {
                    workdir: entry.workdir.clone(),
                    target_window: entry.target_window.clone(),
                    session_id: entry.session_id.clone(),
                    prompt_piped: false,
                },
            )
        })
        .collect()
}

/// Map a finished report onto the process exit code: single-task
/// submissions pass the task's exit code through, multi-task failures
/// exit 1.
pub fn exit_code_for(report: &ExecutionReport) -> i32 {
    if report.summary.failed == 0 {
        return 0;
    }
    if report.tasks.len() == 1 {
        let code = report.tasks[0].exit_code;
        if code != 0 {
            return code;
        }
    }
    1
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(id: &str, exit: i32, error: &str) -> TaskResult {
        TaskResult {
            task_id: id.to_string(),
            exit_code: exit,
            error: error.to_string(),
            ..TaskResult::default()
        }
    }

    #[test]
    fn clean_report_exits_zero() {
        let report = build_report(&[result("a", 0, "")], 90.0, Vec::new());
        assert_eq!(exit_code_for(&report), 0);
    }

    #[test]
    fn single_task_failure_passes_the_code_through() {
        let report = build_report(&[result("a", 124, "timeout")], 90.0, Vec::new());
        assert_eq!(exit_code_for(&report), 124);
        let report = build_report(&[result("a", 127, "not found")], 90.0, Vec::new());
        assert_eq!(exit_code_for(&report), 127);
    }

    #[test]
    fn multi_task_failure_exits_one() {
        let results = vec![result("a", 0, ""), result("b", 124, "timeout")];
        let report = build_report(&results, 90.0, Vec::new());
        assert_eq!(exit_code_for(&report), 1);
    }
}
