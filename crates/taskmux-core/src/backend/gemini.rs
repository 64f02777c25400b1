//! Gemini CLI backend adapter.

use crate::config::RuntimeConfig;

use super::trait_def::{Backend, Invocation};

/// Adapter for the `gemini` CLI: streaming-JSON output, never
/// interactive.
#[derive(Debug, Clone, Copy, Default)]
pub struct GeminiBackend;

impl Backend for GeminiBackend {
    fn name(&self) -> &str {
        "gemini"
    }

    fn command(&self) -> &str {
        "gemini"
    }

    fn build_args(&self, _config: &RuntimeConfig, inv: &Invocation<'_>) -> Vec<String> {
        let mut args = vec![
            "--output-format".to_string(),
            "stream-json".to_string(),
            "--non-interactive".to_string(),
        ];
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::trait_def::test_support::invocation;

    #[test]
    fn non_interactive_streaming_json() {
        let args = GeminiBackend.build_args(&RuntimeConfig::default(), &invocation("p"));
        assert_eq!(args, vec!["--output-format", "stream-json", "--non-interactive", "p"]);
    }

    #[test]
    fn resume_inserts_session_before_prompt() {
        let mut inv = invocation("p");
        inv.session_id = Some("s1");
        let args = GeminiBackend.build_args(&RuntimeConfig::default(), &inv);
        assert_eq!(
            args,
            vec!["--output-format", "stream-json", "--non-interactive", "-r", "s1", "p"]
        );
    }
}
