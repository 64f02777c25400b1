//! Backend registry -- the closed, named set of available adapters.
//!
//! The dispatcher looks backends up by name at runtime (a task's
//! `owner_agent`, or the escalation backend). An unknown name is a
//! configuration error, reported before any subprocess is launched.

use std::collections::HashMap;

use crate::error::ConfigError;

use super::claude::ClaudeBackend;
use super::codex::CodexBackend;
use super::gemini::GeminiBackend;
use super::kiro::KiroBackend;
use super::opencode::OpencodeBackend;
use super::trait_def::Backend;

/// Backend used for escalated fix dispatches.
pub const ESCALATION_BACKEND: &str = "codex";

/// Backend assumed for tasks that carry no owner.
pub const DEFAULT_BACKEND: &str = "claude";

/// A collection of registered [`Backend`] adapters, keyed by name.
#[derive(Default)]
pub struct BackendRegistry {
    backends: HashMap<String, Box<dyn Backend>>,
}

impl BackendRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// The full adapter set recognized by this runtime.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(CodexBackend);
        registry.register(ClaudeBackend);
        registry.register(GeminiBackend);
        registry.register(OpencodeBackend);
        registry.register(KiroBackend);
        registry
    }

    /// Register an adapter under the name it reports. An existing
    /// adapter with the same name is replaced and returned.
    pub fn register(&mut self, backend: impl Backend + 'static) -> Option<Box<dyn Backend>> {
        let name = backend.name().to_string();
        self.backends.insert(name, Box::new(backend))
    }

    /// Look up an adapter by name.
    pub fn get(&self, name: &str) -> Option<&dyn Backend> {
        self.backends.get(name).map(|b| b.as_ref())
    }

    /// Look up an adapter, surfacing the miss as a configuration error.
    pub fn resolve(&self, task_id: &str, name: &str) -> Result<&dyn Backend, ConfigError> {
        self.get(name).ok_or_else(|| ConfigError::UnknownBackend {
            task_id: task_id.to_string(),
            name: name.to_string(),
        })
    }

    /// Registered backend names, unordered.
    pub fn list(&self) -> Vec<&str> {
        self.backends.keys().map(|s| s.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }
}

impl std::fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendRegistry")
            .field("backends", &self.backends.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_the_closed_set() {
        let registry = BackendRegistry::with_defaults();
        let mut names = registry.list();
        names.sort();
        assert_eq!(names, vec!["claude", "codex", "gemini", "kiro-cli", "opencode"]);
    }

    #[test]
    fn escalation_backend_is_registered() {
        let registry = BackendRegistry::with_defaults();
        assert!(registry.get(ESCALATION_BACKEND).is_some());
    }

    #[test]
    fn resolve_unknown_is_a_configuration_error() {
        let registry = BackendRegistry::with_defaults();
        let err = registry.resolve("t1", "mystery").unwrap_err();
        assert!(matches!(err, ConfigError::UnknownBackend { .. }));
        assert!(err.to_string().contains("mystery"));
    }

    #[test]
    fn register_replaces_existing() {
        let mut registry = BackendRegistry::with_defaults();
        let old = registry.register(CodexBackend);
        assert!(old.is_some());
        assert_eq!(registry.len(), 5);
    }

    #[test]
    fn stdin_capability_per_adapter() {
        let registry = BackendRegistry::with_defaults();
        assert!(registry.get("codex").unwrap().supports_stdin());
        assert!(registry.get("claude").unwrap().supports_stdin());
        assert!(registry.get("gemini").unwrap().supports_stdin());
        assert!(!registry.get("opencode").unwrap().supports_stdin());
        assert!(!registry.get("kiro-cli").unwrap().supports_stdin());
    }
}
