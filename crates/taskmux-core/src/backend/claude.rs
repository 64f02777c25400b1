//! Claude Code backend adapter.

use crate::config::RuntimeConfig;

use super::trait_def::{Backend, Invocation};

/// Adapter for the `claude` CLI.
///
/// Always runs print-mode with streaming-JSON output and verbose events.
/// Setting sources are disabled so an agent spawned from inside another
/// agent session cannot pick up the outer session's settings and recurse.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClaudeBackend;

impl Backend for ClaudeBackend {
    fn name(&self) -> &str {
        "claude"
    }

    fn command(&self) -> &str {
        "claude"
    }

    fn build_args(&self, config: &RuntimeConfig, inv: &Invocation<'_>) -> Vec<String> {
        let mut args = vec![
            "-p".to_string(),
            "--setting-sources".to_string(),
            String::new(),
            "--output-format".to_string(),
            "stream-json".to_string(),
            "--verbose".to_string(),
        ];
        if config.skip_permissions {
            args.push("--dangerously-skip-permissions".to_string());
        }
        if let Some(session) = inv.session_id {
            args.push("-r".to_string());
            args.push(session.to_string());
        }
        if inv.prompt_via_stdin {
            args.push("-".to_string());
        } else {
            args.push(inv.prompt.to_string());
        }
        args
    }

    fn supports_stdin(&self) -> bool {
        true
    }
}
