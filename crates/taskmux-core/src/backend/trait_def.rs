//! The `Backend` trait -- the adapter interface for external coding
//! assistants.
//!
//! Each concrete backend (`codex`, `claude`, …) implements this trait.
//! Adapters are stateless and essentially pure: they describe how to
//! launch a CLI, they never own the process. The trait is object-safe so
//! adapters can be stored as `Box<dyn Backend>` in the
//! [`super::BackendRegistry`].

use std::path::Path;

use crate::config::RuntimeConfig;

/// Per-launch payload a backend turns into an argument vector.
#[derive(Debug, Clone)]
pub struct Invocation<'a> {
    /// The task prompt.
    pub prompt: &'a str,
    /// Session/thread id to resume, when the task carries one.
    pub session_id: Option<&'a str>,
    /// The task's working directory. Applied to the spawned process
    /// directly; only backends with an explicit workdir flag consume it
    /// here.
    pub workdir: &'a Path,
    /// The caller will deliver the prompt on stdin. Backends that
    /// support stdin substitute their prompt argument accordingly;
    /// backends that do not ignore this and take the prompt verbatim.
    pub prompt_via_stdin: bool,
}

/// Adapter interface for one external coding-assistant CLI.
///
/// Exactly four operations: name, executable command, argument
/// construction, and stdin capability. Nothing else -- process lifecycle
/// belongs to the runner.
pub trait Backend: std::fmt::Debug + Send + Sync {
    /// Registry name, e.g. `"claude"`.
    fn name(&self) -> &str;

    /// Executable to launch, resolved via `$PATH`.
    fn command(&self) -> &str;

    /// Build the argument vector for one launch.
    fn build_args(&self, config: &RuntimeConfig, inv: &Invocation<'_>) -> Vec<String>;

    /// Whether the CLI accepts the prompt on standard input.
    fn supports_stdin(&self) -> bool;
}

// Compile-time assertion: Backend must be object-safe.
const _: () = {
    fn _assert_object_safe(_: &dyn Backend) {}
};
