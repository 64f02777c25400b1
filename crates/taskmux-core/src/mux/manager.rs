//! Session manager: window/pane placement for tasks.
//!
//! Owns one named session. A session holds the `main` window (status
//! only, never tasks) plus at most [`MAX_TASK_WINDOWS`] task windows.
//! All mutating operations serialize on a manager-scoped mutex; tmux
//! itself races otherwise (its server spins up asynchronously on the
//! first client).

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::control::Multiplexer;

/// Cap on task windows per session; the main window is not counted.
pub const MAX_TASK_WINDOWS: usize = 9;

/// How often and how long to poll for session readiness after create.
const READY_POLL: Duration = Duration::from_millis(100);
const READY_POLL_ATTEMPTS: u32 = 20;

/// Settle time after the session becomes queryable; the server socket
/// can still drop the first window operation right after creation.
const SETTLE: Duration = Duration::from_millis(300);

/// A reserved command target: the window holding it and the pane id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaneTarget {
    pub window: String,
    pub pane: String,
}

#[derive(Debug, Error)]
pub enum MuxError {
    #[error("window limit reached ({MAX_TASK_WINDOWS} task windows)")]
    WindowLimit,

    #[error("dependency window not found for task {task_id} (dependency {dep_id})")]
    DependencyWindowNotFound { task_id: String, dep_id: String },

    #[error("session {session} did not become ready")]
    SessionNotReady { session: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Placement request for one task.
#[derive(Debug, Clone)]
pub struct PlacementRequest<'a> {
    pub task_id: &'a str,
    pub dependencies: &'a [String],
    /// Explicit window chosen by the caller; wins over dependency-derived
    /// placement.
    pub target_window: Option<&'a str>,
}

struct ManagerState {
    /// task id -> window name, for tasks placed by this manager.
    local_windows: HashMap<String, String>,
}

/// Window/pane bookkeeping for one session.
pub struct MuxManager {
    session: String,
    mux: std::sync::Arc<dyn Multiplexer>,
    state: Mutex<ManagerState>,
}

impl MuxManager {
    pub fn new(session: impl Into<String>, mux: std::sync::Arc<dyn Multiplexer>) -> Self {
        Self {
            session: session.into(),
            mux,
            state: Mutex::new(ManagerState {
                local_windows: HashMap::new(),
            }),
        }
    }

    pub fn session(&self) -> &str {
        &self.session
    }

    /// Reuse the session if it exists; otherwise create it detached and
    /// poll until it is queryable. The session outlives the process --
    /// teardown belongs to the human operator.
    pub async fn ensure_session(&self) -> Result<(), MuxError> {
        let _guard = self.state.lock().await;
        if self.mux.has_session(&self.session).await {
            debug!(session = %self.session, "reusing existing session");
            return Ok(());
        }
        info!(session = %self.session, "creating detached session");
        self.mux.create_session(&self.session).await?;

        let mut ready = false;
        for _ in 0..READY_POLL_ATTEMPTS {
            if self.mux.has_session(&self.session).await {
                ready = true;
                break;
            }
            tokio::time::sleep(READY_POLL).await;
        }
        if !ready {
            return Err(MuxError::SessionNotReady {
                session: self.session.clone(),
            });
        }
        tokio::time::sleep(SETTLE).await;
        Ok(())
    }

    /// Produce a pane target for a task, honoring the placement order:
    /// explicit `target_window`, then fresh-window-per-rootless-task,
    /// then the window of the first dependency (local mapping first,
    /// then the persisted one).
    pub async fn reserve_target(
        &self,
        request: &PlacementRequest<'_>,
        persisted_windows: &BTreeMap<String, String>,
    ) -> Result<PaneTarget, MuxError> {
        let mut state = self.state.lock().await;

        let target = if let Some(window) = request.target_window {
            self.get_or_create_window(window).await?
        } else if request.dependencies.is_empty() {
            let pane = self.create_task_window(request.task_id).await?;
            PaneTarget {
                window: request.task_id.to_string(),
                pane,
            }
        } else {
            let dep_id = request.dependencies[0].as_str();
            let window = state
                .local_windows
                .get(dep_id)
                .cloned()
                .or_else(|| persisted_windows.get(dep_id).cloned())
                .ok_or_else(|| MuxError::DependencyWindowNotFound {
                    task_id: request.task_id.to_string(),
                    dep_id: dep_id.to_string(),
                })?;
            let pane = self.mux.split_pane(&self.session, &window).await?;
            PaneTarget { window, pane }
        };

        state
            .local_windows
            .insert(request.task_id.to_string(), target.window.clone());
        debug!(
            task_id = request.task_id,
            window = %target.window,
            pane = %target.pane,
            "reserved pane"
        );
        Ok(target)
    }

    /// Explicit-window placement: split when it already exists, create
    /// it otherwise.
    async fn get_or_create_window(&self, window: &str) -> Result<PaneTarget, MuxError> {
        let windows = self.mux.list_windows(&self.session).await?;
        if windows.iter().any(|w| w == window) {
            let pane = self.mux.split_pane(&self.session, window).await?;
            return Ok(PaneTarget {
                window: window.to_string(),
                pane,
            });
        }
        self.check_window_capacity(&windows)?;
        let pane = self.mux.create_window(&self.session, window).await?;
        Ok(PaneTarget {
            window: window.to_string(),
            pane,
        })
    }

    async fn create_task_window(&self, name: &str) -> Result<String, MuxError> {
        let windows = self.mux.list_windows(&self.session).await?;
        self.check_window_capacity(&windows)?;
        Ok(self.mux.create_window(&self.session, name).await?)
    }

    fn check_window_capacity(&self, windows: &[String]) -> Result<(), MuxError> {
        let task_windows = windows.iter().filter(|w| w.as_str() != "main").count();
        if task_windows >= MAX_TASK_WINDOWS {
            return Err(MuxError::WindowLimit);
        }
        Ok(())
    }

    /// Type a command into a pane. The pane runs a login shell; quoting
    /// and redirection belong to the caller's command string.
    pub async fn send_command(&self, pane: &str, command: &str) -> Result<(), MuxError> {
        let _guard = self.state.lock().await;
        self.mux.send_keys(pane, command).await?;
        Ok(())
    }

    /// Block on a `wait-for` signal; `false` means the deadline passed.
    pub async fn wait_for(&self, signal: &str, timeout: Duration) -> Result<bool, MuxError> {
        // Deliberately not under the state mutex: waits are long and
        // must not starve placement for parallel tasks.
        Ok(self.mux.wait_for(signal, timeout).await?)
    }
}
