//! kiro-cli backend adapter.
//!
//! The only backend with an explicit workdir flag: `-C <dir>` is passed
//! when the working directory is not `.`; all other backends rely on
//! the spawned process's working-directory attribute.

use crate::config::RuntimeConfig;

use super::trait_def::{Backend, Invocation};

/// Adapter for the `kiro-cli` chat command.
#[derive(Debug, Clone, Copy, Default)]
pub struct KiroBackend;

impl Backend for KiroBackend {
    fn name(&self) -> &str {
        "kiro-cli"
    }

    fn command(&self) -> &str {
        "kiro-cli"
    }

    fn build_args(&self, _config: &RuntimeConfig, inv: &Invocation<'_>) -> Vec<String> {
        let mut args = vec![
            "chat".to_string(),
            "--no-interactive".to_string(),
            "--trust-all-tools".to_string(),
        ];
        let workdir = inv.workdir.to_string_lossy();
        if !workdir.is_empty() && workdir != "." {
            args.push("-C".to_string());
            args.push(workdir.into_owned());
        }
        args.push(inv.prompt.to_string());
        args
    }

    fn supports_stdin(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use crate::backend::trait_def::test_support::invocation;

    #[test]
    fn default_workdir_omits_flag() {
        let args = KiroBackend.build_args(&RuntimeConfig::default(), &invocation("p"));
        assert_eq!(args, vec!["chat", "--no-interactive", "--trust-all-tools", "p"]);
    }

    #[test]
    fn explicit_workdir_adds_chdir_flag() {
        let mut inv = invocation("p");
        inv.workdir = Path::new("/srv/project");
        let args = KiroBackend.build_args(&RuntimeConfig::default(), &inv);
        assert_eq!(
            args,
            vec!["chat", "--no-interactive", "--trust-all-tools", "-C", "/srv/project", "p"]
        );
    }

    #[test]
    fn prompt_is_argument_only() {
        assert!(!KiroBackend.supports_stdin());
    }
}
