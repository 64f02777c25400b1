//! Integration tests for the fix-loop state machine: the happy path,
//! escalation, human fallback, and attempt accounting, driven end to
//! end with script-backed fake backends.

use std::path::{Path, PathBuf};

use tokio_util::sync::CancellationToken;

use taskmux_core::backend::BackendRegistry;
use taskmux_core::config::RuntimeConfig;
use taskmux_core::fixloop::{FixLoop, HUMAN_INTERVENTION};
use taskmux_core::state::{Severity, StateWriter, TaskStatus};

use taskmux_test_utils::{ScriptBackend, TaskBuilder, doc_with, finding, temp_writer};

/// Write a fake backend script that captures its stdin prompt into
/// `capture` and then reports success as stream-JSON.
fn capturing_script(dir: &Path, name: &str, capture: &Path) -> PathBuf {
    let path = dir.join(name);
    let script = format!(
        "#!/bin/sh\ncat > '{}'\necho '{{\"type\":\"result\",\"result\":\"applied the fix\"}}'\n",
        capture.display()
    );
    std::fs::write(&path, script).unwrap();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }
    path
}

fn failing_script(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, "#!/bin/sh\necho 'fix attempt crashed' >&2\nexit 1\n").unwrap();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }
    path
}

/// Drive one failed-review round: the task is reviewed at `severity`
/// and lands in `fix_required`.
async fn fail_review(fixloop: &FixLoop<'_>, writer: &StateWriter, severity: Severity) {
    let doc = writer.read().unwrap();
    if doc.task("T").unwrap().status == TaskStatus::PendingReview {
        writer.transition("T", TaskStatus::UnderReview).await.unwrap();
    }
    fixloop
        .on_review_complete("T", severity, vec![finding("T", severity, "Uses MD5")])
        .await
        .unwrap();
}

/// Scenario C: critical review enters fix mode, the fix dispatch runs
/// with the right prompt, and a clean re-review completes the task and
/// unblocks dependents.
#[tokio::test]
async fn fix_loop_happy_path() {
    let scratch = tempfile::tempdir().unwrap();
    let capture = scratch.path().join("prompt.txt");
    let script = capturing_script(scratch.path(), "fake-claude.sh", &capture);

    let mut registry = BackendRegistry::new();
    registry.register(ScriptBackend::new("claude", script));

    let tasks = vec![
        TaskBuilder::new("T")
            .status(TaskStatus::UnderReview)
            .description("Implement password hashing")
            .owner("claude")
            .output("initial implementation output")
            .build(),
        TaskBuilder::new("dep").deps(&["T"]).build(),
    ];
    let (_dir, writer) = temp_writer(&doc_with(tasks)).await;
    let config = RuntimeConfig::default();
    let fixloop = FixLoop {
        writer: &writer,
        registry: &registry,
        config: &config,
    };

    // Review fails critical.
    fixloop
        .on_review_complete(
            "T",
            Severity::Critical,
            vec![finding("T", Severity::Critical, "Uses MD5")],
        )
        .await
        .unwrap();

    let doc = writer.read().unwrap();
    let task = doc.task("T").unwrap();
    assert_eq!(task.status, TaskStatus::FixRequired);
    assert_eq!(task.review_history.len(), 1);
    assert_eq!(task.review_history[0].attempt, 0);
    assert_eq!(task.last_review_severity, "critical");
    let dep = doc.task("dep").unwrap();
    assert_eq!(dep.status, TaskStatus::Blocked);
    assert_eq!(dep.blocked_by, "T");
    assert!(dep.blocked_reason.contains("requires fixes (critical)"));
    assert_eq!(doc.blocked_items.len(), 1);

    // Next cycle dispatches the fix.
    let cancel = CancellationToken::new();
    let results = fixloop.process(None, &cancel).await.unwrap();
    assert_eq!(results.len(), 1);
    assert!(results[0].passed());

    let prompt = std::fs::read_to_string(&capture).unwrap();
    assert!(prompt.contains("## FIX REQUEST - Attempt 1/3"));
    assert!(prompt.contains("[CRITICAL] Uses MD5"));
    assert!(prompt.contains("Implement password hashing"));
    assert!(prompt.contains("initial implementation output"));

    let doc = writer.read().unwrap();
    let task = doc.task("T").unwrap();
    assert_eq!(task.fix_attempts, 1);
    assert_eq!(task.status, TaskStatus::PendingReview);

    // Re-review comes back minor: the task completes, dependents free.
    fail_review(&fixloop, &writer, Severity::Minor).await;
    let doc = writer.read().unwrap();
    assert_eq!(doc.task("T").unwrap().status, TaskStatus::Completed);
    let dep = doc.task("dep").unwrap();
    assert_eq!(dep.status, TaskStatus::NotStarted);
    assert!(dep.blocked_by.is_empty());
    assert!(dep.blocked_reason.is_empty());
    assert!(doc.blocked_items.is_empty());
    // The minor findings survived as deferred fixes.
    assert_eq!(doc.deferred_fixes.len(), 1);
}

/// Scenario D: two failed fix rounds escalate the third dispatch to the
/// escalation backend, with the attempt history in the prompt.
#[tokio::test]
async fn repeated_failures_escalate_to_codex() {
    let scratch = tempfile::tempdir().unwrap();
    let claude_capture = scratch.path().join("claude-prompt.txt");
    let codex_capture = scratch.path().join("codex-prompt.txt");
    let claude = capturing_script(scratch.path(), "fake-claude.sh", &claude_capture);
    let codex = capturing_script(scratch.path(), "fake-codex.sh", &codex_capture);

    let mut registry = BackendRegistry::new();
    registry.register(ScriptBackend::new("claude", claude));
    registry.register(ScriptBackend::new("codex", codex));

    let tasks = vec![
        TaskBuilder::new("T")
            .status(TaskStatus::UnderReview)
            .description("Paginate the list endpoint")
            .owner("claude")
            .build(),
    ];
    let (_dir, writer) = temp_writer(&doc_with(tasks)).await;
    let config = RuntimeConfig::default();
    let fixloop = FixLoop {
        writer: &writer,
        registry: &registry,
        config: &config,
    };
    let cancel = CancellationToken::new();

    // Round 1: review fails, fix dispatch succeeds.
    fixloop
        .on_review_complete("T", Severity::Major, vec![finding("T", Severity::Major, "Off-by-one")])
        .await
        .unwrap();
    fixloop.process(None, &cancel).await.unwrap();

    // Round 2: still failing.
    fail_review(&fixloop, &writer, Severity::Major).await;
    fixloop.process(None, &cancel).await.unwrap();

    let doc = writer.read().unwrap();
    assert_eq!(doc.task("T").unwrap().fix_attempts, 2);
    assert!(!doc.task("T").unwrap().escalated);
    assert!(!codex_capture.exists(), "codex must not run before escalation");

    // Round 3: the escalation threshold is reached.
    fail_review(&fixloop, &writer, Severity::Major).await;
    fixloop.process(None, &cancel).await.unwrap();

    let doc = writer.read().unwrap();
    let task = doc.task("T").unwrap();
    assert!(task.escalated);
    assert!(task.escalated_at.is_some());
    assert_eq!(task.original_agent, "claude");
    assert_eq!(task.fix_attempts, 3);

    let prompt = std::fs::read_to_string(&codex_capture).unwrap();
    assert!(prompt.contains("## FIX REQUEST - Attempt 3/3"));
    assert!(prompt.contains("### Previous Fix Attempts History"));
    assert!(prompt.contains("Attempt 0 (major)"));
}

/// Scenario E: exhausting the attempts files exactly one critical
/// pending decision and blocks the task for a human.
#[tokio::test]
async fn exhausted_attempts_trigger_human_fallback() {
    let scratch = tempfile::tempdir().unwrap();
    let capture = scratch.path().join("prompt.txt");
    let script = capturing_script(scratch.path(), "fake-claude.sh", &capture);
    let codex = capturing_script(scratch.path(), "fake-codex.sh", &scratch.path().join("c.txt"));

    let mut registry = BackendRegistry::new();
    registry.register(ScriptBackend::new("claude", script));
    registry.register(ScriptBackend::new("codex", codex));

    let tasks = vec![
        TaskBuilder::new("T")
            .status(TaskStatus::UnderReview)
            .description("Flaky integration suite")
            .owner("claude")
            .build(),
        TaskBuilder::new("dep").deps(&["T"]).build(),
    ];
    let (_dir, writer) = temp_writer(&doc_with(tasks)).await;
    let config = RuntimeConfig::default();
    let fixloop = FixLoop {
        writer: &writer,
        registry: &registry,
        config: &config,
    };
    let cancel = CancellationToken::new();

    // Three failing rounds exhaust max_fix_attempts.
    fixloop
        .on_review_complete("T", Severity::Major, vec![finding("T", Severity::Major, "Races")])
        .await
        .unwrap();
    for _ in 0..3 {
        fixloop.process(None, &cancel).await.unwrap();
        fail_review(&fixloop, &writer, Severity::Major).await;
    }

    // The next pass hits the exhaustion rule instead of dispatching.
    let results = fixloop.process(None, &cancel).await.unwrap();
    assert!(results.is_empty());

    let doc = writer.read().unwrap();
    let task = doc.task("T").unwrap();
    assert_eq!(task.fix_attempts, 3);
    assert_eq!(task.status, TaskStatus::Blocked);
    assert_eq!(task.blocked_reason, HUMAN_INTERVENTION);

    let decisions: Vec<_> = doc
        .pending_decisions
        .iter()
        .filter(|d| d.task_id.as_deref() == Some("T"))
        .collect();
    assert_eq!(decisions.len(), 1);
    let decision = decisions[0];
    assert_eq!(decision.priority.as_deref(), Some("critical"));
    assert!(decision.options.iter().any(|o| o.contains("resume manually")));
    assert!(decision.options.iter().any(|o| o.contains("skip")));
    assert!(decision.options.iter().any(|o| o.contains("abort")));
    assert!(decision.context.contains("Flaky integration suite"));

    // Dependents stay blocked.
    assert_eq!(doc.task("dep").unwrap().status, TaskStatus::Blocked);

    // A second pass does not file a second decision.
    fixloop.process(None, &cancel).await.unwrap();
    let doc = writer.read().unwrap();
    let count = doc
        .pending_decisions
        .iter()
        .filter(|d| d.task_id.as_deref() == Some("T"))
        .count();
    assert_eq!(count, 1);
}

/// Property: `fix_attempts` moves only on a successfully completed fix
/// dispatch; a failed dispatch rolls back without counting.
#[tokio::test]
async fn failed_dispatch_does_not_consume_an_attempt() {
    let scratch = tempfile::tempdir().unwrap();
    let script = failing_script(scratch.path(), "broken-claude.sh");

    let mut registry = BackendRegistry::new();
    registry.register(ScriptBackend::new("claude", script));

    let tasks = vec![
        TaskBuilder::new("T")
            .status(TaskStatus::UnderReview)
            .description("d")
            .owner("claude")
            .build(),
    ];
    let (_dir, writer) = temp_writer(&doc_with(tasks)).await;
    let config = RuntimeConfig::default();
    let fixloop = FixLoop {
        writer: &writer,
        registry: &registry,
        config: &config,
    };

    fixloop
        .on_review_complete("T", Severity::Critical, vec![finding("T", Severity::Critical, "x")])
        .await
        .unwrap();

    let cancel = CancellationToken::new();
    let results = fixloop.process(None, &cancel).await.unwrap();
    assert_eq!(results.len(), 1);
    assert!(!results[0].passed());

    let doc = writer.read().unwrap();
    let task = doc.task("T").unwrap();
    assert_eq!(task.fix_attempts, 0, "failed dispatch must not count");
    assert_eq!(task.status, TaskStatus::FixRequired, "rollback to fix_required");
}
