//! opencode backend adapter.
//!
//! opencode only takes the prompt as an argument (after a `--`
//! separator), never on stdin. `@path` references found in the prompt
//! are surfaced as repeated `--file` flags so the CLI preloads them.

use std::sync::LazyLock;

use regex::Regex;

use crate::config::RuntimeConfig;

use super::trait_def::{Backend, Invocation};

static FILE_REF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"@([A-Za-z0-9_~][A-Za-z0-9_./~-]*)").expect("static regex"));

/// Adapter for the `opencode` CLI.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpencodeBackend;

/// Collect `@path` references from a prompt, first occurrence order,
/// duplicates removed.
fn file_references(prompt: &str) -> Vec<String> {
    let mut seen = Vec::new();
    for cap in FILE_REF.captures_iter(prompt) {
        let path = cap[1].to_string();
        if !seen.contains(&path) {
            seen.push(path);
        }
    }
    seen
}

impl Backend for OpencodeBackend {
    fn name(&self) -> &str {
        "opencode"
    }

    fn command(&self) -> &str {
        "opencode"
    }

    fn build_args(&self, config: &RuntimeConfig, inv: &Invocation<'_>) -> Vec<String> {
        let mut args = vec!["run".to_string(), "--format".to_string(), "json".to_string()];
        if let Some(agent) = &config.opencode_agent {
            args.push("--agent".to_string());
            args.push(agent.clone());
        }
        if let Some(model) = &config.opencode_model {
            args.push("--model".to_string());
            args.push(model.clone());
        }
        for path in file_references(inv.prompt) {
            args.push("--file".to_string());
            args.push(path);
        }
        args.push("--".to_string());
        args.push(inv.prompt.to_string());
        args
    }

    fn supports_stdin(&self) -> bool {
        false
    }
}
