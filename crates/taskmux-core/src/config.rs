//! Environment-variable configuration surface.
//!
//! Everything here has a default; the runtime works with no environment
//! at all. Values are read once per invocation and carried by value.

use std::time::Duration;

/// Hard ceiling on in-batch workers when the cap is "unlimited".
pub const MAX_WORKERS_CEILING: usize = 100;

/// Default per-task timeout: two hours.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(7_200_000);

/// Default grace interval between SIGTERM and force-kill.
pub const DEFAULT_KILL_GRACE: Duration = Duration::from_millis(5_000);

/// Coverage target used by report accounting.
pub const DEFAULT_COVERAGE_TARGET: f64 = 90.0;

/// Fix attempts after which the dispatch backend escalates.
pub const DEFAULT_ESCALATION_THRESHOLD: u32 = 2;

/// Resolved runtime configuration.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Per-task wall-clock timeout.
    pub timeout: Duration,
    /// In-batch concurrency cap; 0 means unlimited up to
    /// [`MAX_WORKERS_CEILING`].
    pub max_parallel: usize,
    /// Pass the permission-skip flag to backends that accept it.
    pub skip_permissions: bool,
    /// Injected as `--agent` on the opencode backend.
    pub opencode_agent: Option<String>,
    /// Injected as `--model` on the opencode backend.
    pub opencode_model: Option<String>,
    /// Affects the codex launch arguments.
    pub bypass_sandbox: bool,
    /// ASCII summary markers instead of unicode.
    pub ascii_mode: bool,
    /// Force pipe-mode even when a session name is requested.
    pub no_tmux: bool,
    /// SIGTERM-to-kill grace interval.
    pub kill_grace: Duration,
    /// Coverage target for report accounting.
    pub coverage_target: f64,
    /// Fix attempts at which escalation kicks in.
    pub escalation_threshold: u32,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            max_parallel: 0,
            skip_permissions: false,
            opencode_agent: None,
            opencode_model: None,
            bypass_sandbox: false,
            ascii_mode: false,
            no_tmux: false,
            kill_grace: DEFAULT_KILL_GRACE,
            coverage_target: DEFAULT_COVERAGE_TARGET,
            escalation_threshold: DEFAULT_ESCALATION_THRESHOLD,
        }
    }
}

impl RuntimeConfig {
    /// Read the configuration from the process environment.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            timeout: env_millis("TASKMUX_TIMEOUT_MS").unwrap_or(defaults.timeout),
            max_parallel: env_usize("TASKMUX_MAX_PARALLEL").unwrap_or(0),
            skip_permissions: env_truthy("TASKMUX_SKIP_PERMISSIONS"),
            opencode_agent: env_nonempty("OPENCODE_AGENT"),
            opencode_model: env_nonempty("OPENCODE_MODEL"),
            bypass_sandbox: env_truthy("TASKMUX_BYPASS_SANDBOX"),
            ascii_mode: env_truthy("TASKMUX_ASCII"),
            no_tmux: env_truthy("TASKMUX_NO_TMUX"),
            kill_grace: env_millis("TASKMUX_KILL_GRACE_MS").unwrap_or(defaults.kill_grace),
            coverage_target: DEFAULT_COVERAGE_TARGET,
            escalation_threshold: DEFAULT_ESCALATION_THRESHOLD,
        }
    }

    /// The effective worker cap: 0 resolves to the ceiling.
    pub fn effective_max_parallel(&self) -> usize {
        match self.max_parallel {
            0 => MAX_WORKERS_CEILING,
            n => n.min(MAX_WORKERS_CEILING),
        }
    }
}

fn env_nonempty(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_truthy(name: &str) -> bool {
    match std::env::var(name) {
        Ok(v) => matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => false,
    }
}

fn env_millis(name: &str) -> Option<Duration> {
    env_nonempty(name)?.parse::<u64>().ok().map(Duration::from_millis)
}

fn env_usize(name: &str) -> Option<usize> {
    env_nonempty(name)?.parse::<usize>().ok()
}
