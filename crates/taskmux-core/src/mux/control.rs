//! Low-level multiplexer control surface.
//!
//! [`Multiplexer`] is the seam between the manager and the real `tmux`
//! binary: the production implementation shells out, tests substitute a
//! fake. The trait is object-safe so it can be shared as
//! `Arc<dyn Multiplexer>`.

use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

/// Session/window/pane primitives the manager composes.
#[async_trait]
pub trait Multiplexer: Send + Sync {
    /// Does the named session exist?
    async fn has_session(&self, session: &str) -> bool;

    /// Create a detached session with a `main` window and configure it:
    /// automatic window rename off, a status split in the main window.
    async fn create_session(&self, session: &str) -> Result<()>;

    /// Names of the session's windows.
    async fn list_windows(&self, session: &str) -> Result<Vec<String>>;

    /// Create a window; returns the id of its initial pane.
    async fn create_window(&self, session: &str, name: &str) -> Result<String>;

    /// Split a new pane inside a window; returns the new pane's id.
    async fn split_pane(&self, session: &str, window: &str) -> Result<String>;

    /// Type a shell command into a pane and press return.
    async fn send_keys(&self, pane: &str, command: &str) -> Result<()>;

    /// Block until `wait-for` fires on the named signal channel.
    /// Returns `false` when the timeout elapses first.
    async fn wait_for(&self, signal: &str, timeout: Duration) -> Result<bool>;
}

/// The real thing: drives the `tmux` binary.
#[derive(Debug, Clone)]
pub struct Tmux {
    /// Binary to launch; `"tmux"` unless overridden for tests.
    binary: String,
}

impl Default for Tmux {
    fn default() -> Self {
        Self::new()
    }
}

impl Tmux {
    pub fn new() -> Self {
        Self {
            binary: "tmux".to_string(),
        }
    }

    pub fn with_binary(path: impl Into<String>) -> Self {
        Self { binary: path.into() }
    }

    async fn run(&self, args: &[&str]) -> Result<std::process::Output> {
        debug!(binary = %self.binary, ?args, "tmux invocation");
        let output = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .with_context(|| format!("failed to launch {}", self.binary))?;
        Ok(output)
    }

    async fn run_checked(&self, args: &[&str]) -> Result<String> {
        let output = self.run(args).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("tmux {} failed: {}", args.first().unwrap_or(&""), stderr.trim());
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[async_trait]
impl Multiplexer for Tmux {
    async fn has_session(&self, session: &str) -> bool {
        // `=` forces an exact match instead of prefix matching.
        let target = format!("={session}");
        self.run(&["has-session", "-t", &target])
            .await
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    async fn create_session(&self, session: &str) -> Result<()> {
        self.run_checked(&["new-session", "-d", "-s", session, "-n", "main"])
            .await?;
        // Keep task windows on their assigned names.
        self.run_checked(&["set-option", "-t", session, "automatic-rename", "off"])
            .await?;
        self.run_checked(&["set-option", "-t", session, "allow-rename", "off"])
            .await?;
        // Status split in the main window.
        let main = format!("{session}:main");
        self.run_checked(&["split-window", "-v", "-t", &main]).await?;
        Ok(())
    }

    async fn list_windows(&self, session: &str) -> Result<Vec<String>> {
        let out = self
            .run_checked(&["list-windows", "-t", session, "-F", "#{window_name}"])
            .await?;
        Ok(out.lines().map(|l| l.trim().to_string()).filter(|l| !l.is_empty()).collect())
    }

    async fn create_window(&self, session: &str, name: &str) -> Result<String> {
        self.run_checked(&[
            "new-window",
            "-t",
            session,
            "-n",
            name,
            "-P",
            "-F",
            "#{pane_id}",
        ])
        .await
    }

    async fn split_pane(&self, session: &str, window: &str) -> Result<String> {
        let target = format!("{session}:{window}");
        self.run_checked(&["split-window", "-t", &target, "-P", "-F", "#{pane_id}"])
            .await
    }

    async fn send_keys(&self, pane: &str, command: &str) -> Result<()> {
        self.run_checked(&["send-keys", "-t", pane, command, "C-m"])
            .await?;
        Ok(())
    }

    async fn wait_for(&self, signal: &str, timeout: Duration) -> Result<bool> {
        let mut child = Command::new(&self.binary)
            .args(["wait-for", signal])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("failed to launch {} wait-for", self.binary))?;

        match tokio::time::timeout(timeout, child.wait()).await {
            Ok(status) => {
                let status = status.context("wait-for did not report a status")?;
                Ok(status.success())
            }
            Err(_elapsed) => {
                let _ = child.kill().await;
                Ok(false)
            }
        }
    }
}
