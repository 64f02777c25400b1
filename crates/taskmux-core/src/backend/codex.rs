//! Codex CLI backend adapter.

use crate::config::RuntimeConfig;

use super::trait_def::{Backend, Invocation};

/// Adapter for the `codex` CLI.
///
/// Launches `codex exec --json` and, when escalating a resumable
/// conversation, `codex exec --json resume <session>`. The prompt rides
/// on stdin (signalled with the `-` argument) or as the final argument.
#[derive(Debug, Clone, Copy, Default)]
pub struct CodexBackend;

impl Backend for CodexBackend {
    fn name(&self) -> &str {
        "codex"
    }

    fn command(&self) -> &str {
        "codex"
    }

    fn build_args(&self, config: &RuntimeConfig, inv: &Invocation<'_>) -> Vec<String> {
        let mut args = vec!["exec".to_string(), "--json".to_string()];
        if config.bypass_sandbox {
            args.push("--dangerously-bypass-approvals-and-sandbox".to_string());
        }
        if let Some(session) = inv.session_id {
            args.push("resume".to_string());
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::trait_def::test_support::invocation;

    #[test]
    fn plain_launch_takes_prompt_as_argument() {
        let args = CodexBackend.build_args(&RuntimeConfig::default(), &invocation("fix the bug"));
        assert_eq!(args, vec!["exec", "--json", "fix the bug"]);
    }

    #[test]
    fn stdin_delivery_substitutes_dash() {
        let mut inv = invocation("long prompt");
        inv.prompt_via_stdin = true;
        let args = CodexBackend.build_args(&RuntimeConfig::default(), &inv);
        assert_eq!(args, vec!["exec", "--json", "-"]);
    }

    #[test]
    fn bypass_sandbox_adds_flag_before_prompt() {
        let config = RuntimeConfig {
            bypass_sandbox: true,
            ..RuntimeConfig::default()
        };
        let args = CodexBackend.build_args(&config, &invocation("p"));
        assert_eq!(
            args,
            vec!["exec", "--json", "--dangerously-bypass-approvals-and-sandbox", "p"]
        );
    }

    #[test]
    fn resume_mode_inserts_session() {
        let mut inv = invocation("p");
        inv.session_id = Some("sess-42");
        let args = CodexBackend.build_args(&RuntimeConfig::default(), &inv);
        assert_eq!(args, vec!["exec", "--json", "resume", "sess-42", "p"]);
    }
}
