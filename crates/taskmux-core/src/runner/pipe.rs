//! Pipe-mode execution: the backend runs as a direct child process and
//! its stdout is parsed live.

use std::process::Stdio;
use std::time::Duration;

use futures::StreamExt;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio_stream::wrappers::LinesStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::backend::{Backend, Invocation};
use crate::config::RuntimeConfig;

use super::stream::{ParsedStream, StreamReducer};
use super::types::{EXIT_INTERRUPTED, EXIT_NOT_FOUND, EXIT_TIMEOUT, TaskSpec, wants_stdin};

/// Retained stderr tail, surfaced on failure.
const STDERR_TAIL_LIMIT: usize = 4096;

/// Bound on waiting for the child to exit after stdout EOF; zombies
/// holding the pipe open do not hang the runner.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Raw outcome of a pipe-mode run, before status mapping.
#[derive(Debug, Default)]
pub struct PipeOutcome {
    pub exit_code: i32,
    pub parsed: ParsedStream,
    /// Error classification set by the runner itself (timeout,
    /// interruption, missing executable). Empty for plain non-zero exits.
    pub error: String,
    pub stderr_tail: String,
}

/// Launch the backend and consume its stream until EOF, timeout, or
/// cancellation.
pub async fn run_pipe(
    backend: &dyn Backend,
    config: &RuntimeConfig,
    spec: &TaskSpec,
    cancel: &CancellationToken,
) -> PipeOutcome {
    let use_stdin = backend.supports_stdin() && wants_stdin(spec);
    let invocation = Invocation {
        prompt: &spec.prompt,
        session_id: spec.session_id.as_deref(),
        workdir: &spec.workdir,
        prompt_via_stdin: use_stdin,
    };
    let args = backend.build_args(config, &invocation);

    debug!(
        task_id = %spec.id,
        backend = backend.name(),
        command = backend.command(),
        use_stdin,
        "launching backend (pipe mode)"
    );

    let mut command = Command::new(backend.command());
    command
        .args(&args)
        .current_dir(&spec.workdir)
        .stdin(if use_stdin { Stdio::piped() } else { Stdio::null() })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return PipeOutcome {
                exit_code: EXIT_NOT_FOUND,
                error: format!("backend command not found: {}", backend.command()),
                ..PipeOutcome::default()
            };
        }
        Err(e) => {
            return PipeOutcome {
                exit_code: 1,
                error: format!("failed to spawn {}: {e}", backend.command()),
                ..PipeOutcome::default()
            };
        }
    };

    // Deliver the prompt and close stdin so the backend starts working.
    if use_stdin {
        if let Some(mut stdin) = child.stdin.take() {
            if let Err(e) = stdin.write_all(spec.prompt.as_bytes()).await {
                warn!(task_id = %spec.id, error = %e, "failed to write prompt to backend stdin");
            }
            let _ = stdin.shutdown().await;
            drop(stdin);
        }
    }

    // Stderr collector: keep only the last few KB.
    let stderr_handle = child.stderr.take().map(|stderr| {
        tokio::spawn(async move {
            let mut reader = BufReader::new(stderr);
            let mut tail: Vec<u8> = Vec::new();
            let mut buf = [0u8; 1024];
            loop {
                match reader.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        tail.extend_from_slice(&buf[..n]);
                        if tail.len() > STDERR_TAIL_LIMIT {
                            let cut = tail.len() - STDERR_TAIL_LIMIT;
                            tail.drain(..cut);
                        }
                    }
                }
            }
            String::from_utf8_lossy(&tail).into_owned()
        })
    });

    let mut reducer = StreamReducer::new();
    let mut outcome_error = String::new();
    let exit_code;

    enum StopCause {
        Eof,
        TimedOut,
        Interrupted,
    }

    let stop = if let Some(stdout) = child.stdout.take() {
        let mut lines = LinesStream::new(BufReader::new(stdout).lines());
        let deadline = tokio::time::sleep(config.timeout);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                line = lines.next() => match line {
                    Some(Ok(line)) => reducer.push_line(&line),
                    Some(Err(e)) => {
                        warn!(task_id = %spec.id, error = %e, "error reading backend stdout");
                        break StopCause::Eof;
                    }
                    None => break StopCause::Eof,
                },
                _ = &mut deadline => break StopCause::TimedOut,
                _ = cancel.cancelled() => break StopCause::Interrupted,
            }
        }
    } else {
        StopCause::Eof
    };

    match stop {
        StopCause::Eof => {
            exit_code = match tokio::time::timeout(DRAIN_TIMEOUT, child.wait()).await {
                Ok(Ok(status)) => status.code().unwrap_or(1),
                Ok(Err(e)) => {
                    warn!(task_id = %spec.id, error = %e, "failed to reap backend process");
                    1
                }
                Err(_elapsed) => {
                    warn!(task_id = %spec.id, "backend did not exit after closing stdout, killing");
                    let _ = child.kill().await;
                    1
                }
            };
        }
        StopCause::TimedOut => {
            terminate(&mut child, config.kill_grace).await;
            exit_code = EXIT_TIMEOUT;
            outcome_error = "timeout".to_string();
        }
        StopCause::Interrupted => {
            terminate(&mut child, config.kill_grace).await;
            exit_code = EXIT_INTERRUPTED;
            outcome_error = "interrupted".to_string();
        }
    }

    let stderr_tail = match stderr_handle {
        Some(handle) => handle.await.unwrap_or_default(),
        None => String::new(),
    };

    PipeOutcome {
        exit_code,
        parsed: reducer.finish(),
        error: outcome_error,
        stderr_tail,
    }
}

/// Graceful terminate: SIGTERM, a grace interval, then force kill.
async fn terminate(child: &mut Child, grace: Duration) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        // SAFETY: pid belongs to a child we spawned and still own.
        let ret = unsafe { libc::kill(pid as i32, libc::SIGTERM) };
        if ret != 0 {
            warn!(pid, "SIGTERM failed, proceeding to force kill");
        }
    }

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(_) => {
            debug!("backend exited within the grace interval");
        }
        Err(_elapsed) => {
            debug!("backend survived SIGTERM, force killing");
            let _ = child.kill().await;
        }
    }
}
