//! Backend adapters for external coding-assistant CLIs.
//!
//! A closed variant set with a common capability surface: *name*,
//! *command*, *build-args*, *supports-stdin*. Adding a backend means
//! adding an adapter file and registering it in
//! [`BackendRegistry::with_defaults`]; the rest of the engine never
//! needs extension.

pub mod claude;
pub mod codex;
pub mod gemini;
pub mod kiro;
pub mod opencode;
pub mod registry;
pub mod trait_def;

pub use claude::ClaudeBackend;
pub use codex::CodexBackend;
pub use gemini::GeminiBackend;
pub use kiro::KiroBackend;
pub use opencode::OpencodeBackend;
pub use registry::{BackendRegistry, DEFAULT_BACKEND, ESCALATION_BACKEND};
pub use trait_def::{Backend, Invocation};
