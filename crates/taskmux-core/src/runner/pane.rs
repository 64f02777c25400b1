//! Pane-mode execution: the backend runs inside a terminal pane and the
//! runner reads its capture files after the wait-for signal fires.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::backend::{Backend, Invocation};
use crate::config::RuntimeConfig;
use crate::mux::{MuxManager, PaneTarget};

use super::stream::{ParsedStream, StreamReducer};
use super::types::{EXIT_INTERRUPTED, EXIT_TIMEOUT, TaskSpec, wants_stdin};

/// Slack added to the wait-for deadline beyond the task timeout: the
/// script itself needs a moment to write the exit file and signal.
const WAIT_SLACK: Duration = Duration::from_secs(5);

/// Raw outcome of a pane-mode run, before status mapping.
#[derive(Debug, Default)]
pub struct PaneOutcome {
    pub exit_code: i32,
    pub parsed: ParsedStream,
    pub error: String,
    /// Capture file kept for post-mortem when the run failed.
    pub log_path: String,
}

/// Materialized scratch files for one pane run.
struct Scratch {
    dir: PathBuf,
    stdout: PathBuf,
    stderr: PathBuf,
    exit: PathBuf,
    input: PathBuf,
}

impl Scratch {
    fn materialize(task_id: &str) -> std::io::Result<Self> {
        let dir = std::env::temp_dir()
            .join("taskmux")
            .join(format!("{}-{}", sanitize(task_id), Uuid::new_v4().simple()));
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            stdout: dir.join("out.log"),
            stderr: dir.join("err.log"),
            exit: dir.join("exit.code"),
            input: dir.join("input.txt"),
            dir,
        })
    }

    fn cleanup(&self) {
        let _ = std::fs::remove_dir_all(&self.dir);
    }
}

/// Run one task in its reserved pane.
pub async fn run_pane(
    backend: &dyn Backend,
    config: &RuntimeConfig,
    spec: &TaskSpec,
    manager: &MuxManager,
    target: &PaneTarget,
    cancel: &CancellationToken,
) -> PaneOutcome {
    let scratch = match Scratch::materialize(&spec.id) {
        Ok(s) => s,
        Err(e) => {
            return PaneOutcome {
                exit_code: 1,
                error: format!("failed to materialize pane scratch files: {e}"),
                ..PaneOutcome::default()
            };
        }
    };

    let use_stdin = backend.supports_stdin() && wants_stdin(spec);
    if use_stdin {
        if let Err(e) = std::fs::write(&scratch.input, &spec.prompt) {
            scratch.cleanup();
            return PaneOutcome {
                exit_code: 1,
                error: format!("failed to write pane input file: {e}"),
                ..PaneOutcome::default()
            };
        }
    }

    let invocation = Invocation {
        prompt: &spec.prompt,
        session_id: spec.session_id.as_deref(),
        workdir: &spec.workdir,
        prompt_via_stdin: use_stdin,
    };
    let args = backend.build_args(config, &invocation);
    let signal = format!("taskmux-{}", Uuid::new_v4().simple());
    let script = build_script(
        &spec.workdir,
        backend.command(),
        &args,
        use_stdin.then_some(scratch.input.as_path()),
        &scratch.stderr,
        &scratch.stdout,
        &scratch.exit,
        &signal,
    );

    debug!(task_id = %spec.id, pane = %target.pane, %signal, "sending pane script");

    if let Err(e) = manager.send_command(&target.pane, &script).await {
        scratch.cleanup();
        return PaneOutcome {
            exit_code: 1,
            error: format!("failed to send command to pane {}: {e}", target.pane),
            ..PaneOutcome::default()
        };
    }

    let deadline = config.timeout + WAIT_SLACK;
    let mut outcome = PaneOutcome::default();

    let signalled = tokio::select! {
        fired = manager.wait_for(&signal, deadline) => match fired {
            Ok(fired) => fired,
            Err(e) => {
                warn!(task_id = %spec.id, error = %e, "wait-for failed");
                false
            }
        },
        _ = cancel.cancelled() => {
            outcome.exit_code = EXIT_INTERRUPTED;
            outcome.error = "interrupted".to_string();
            false
        }
    };

    if !signalled && outcome.error.is_empty() {
        outcome.exit_code = EXIT_TIMEOUT;
        outcome.error = "timeout".to_string();
    }

    // Whatever happened, parse what the pane managed to capture.
    outcome.parsed = parse_capture(&scratch.stdout);

    if signalled {
        // A missing exit file reads as exit 1: the child may have
        // survived SIGTERM long enough to race the signal write.
        outcome.exit_code = read_exit_code(&scratch.exit).unwrap_or(1);
    }

    if outcome.exit_code == 0 && outcome.error.is_empty() {
        scratch.cleanup();
    } else {
        outcome.log_path = scratch.stdout.display().to_string();
    }
    outcome
}

fn parse_capture(path: &Path) -> ParsedStream {
    let mut reducer = StreamReducer::new();
    match std::fs::read_to_string(path) {
        Ok(content) => {
            for line in content.lines() {
                reducer.push_line(line);
            }
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to read pane capture");
        }
    }
    reducer.finish()
}

fn read_exit_code(path: &Path) -> Option<i32> {
    std::fs::read_to_string(path).ok()?.trim().parse().ok()
}

/// Single-quote a string for a POSIX shell.
fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

fn sanitize(id: &str) -> String {
    id.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

/// Build the pane script:
/// `set -o pipefail; [cd <wd>;] <cmd args…> [< input] 2> <err> | tee <out>;
///  echo $? > <exit>; tmux wait-for -S <signal>`
#[allow(clippy::too_many_arguments)]
fn build_script(
    workdir: &Path,
    command: &str,
    args: &[String],
    input: Option<&Path>,
    stderr: &Path,
    stdout: &Path,
    exit: &Path,
    signal: &str,
) -> String {
    let mut script = String::from("set -o pipefail; ");

    let wd = workdir.to_string_lossy();
    if !wd.is_empty() && wd != "." {
        script.push_str(&format!("cd {}; ", shell_quote(&wd)));
    }

    script.push_str(&shell_quote(command));
    for arg in args {
        script.push(' ');
        script.push_str(&shell_quote(arg));
    }

    if let Some(input) = input {
        script.push_str(&format!(" < {}", shell_quote(&input.to_string_lossy())));
    }
    script.push_str(&format!(
        " 2> {} | tee {}; echo $? > {}; tmux wait-for -S {}",
        shell_quote(&stderr.to_string_lossy()),
        shell_quote(&stdout.to_string_lossy()),
        shell_quote(&exit.to_string_lossy()),
        shell_quote(signal),
    ));

    script
}
