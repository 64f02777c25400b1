//! Logging bootstrap: env-filtered tracing into a per-invocation log
//! file, with a bounded recent-error extract printed on abnormal exit.

use std::fs;
use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};

/// Lines of the error extract printed to stderr on abnormal exit.
const RECENT_ERROR_LINES: usize = 40;

/// Initialize tracing into a fresh log file and return its path.
pub fn init() -> Result<PathBuf> {
    let dir = std::env::temp_dir().join("taskmux-logs");
    fs::create_dir_all(&dir).context("failed to create log directory")?;
    let path = dir.join(format!("taskmux-{}.log", std::process::id()));

    let file = fs::File::create(&path)
        .with_context(|| format!("failed to create log file {}", path.display()))?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(file)
        .with_ansi(false)
        .init();

    Ok(path)
}

/// Startup banner on stderr: what is running, where it logs.
pub fn banner(log_path: &std::path::Path, backends: &[&str]) {
    let mut names: Vec<&str> = backends.to_vec();
    names.sort_unstable();
    eprintln!(
        "taskmux pid={} backends=[{}] log={}",
        std::process::id(),
        names.join(","),
        log_path.display()
    );
}

/// On abnormal exit: print the tail of the log's error lines to stderr,
/// then drop the log file -- the in-band report is the artifact that
/// stays.
pub fn emit_recent_errors(log_path: &std::path::Path) {
    if let Ok(content) = fs::read_to_string(log_path) {
        let errors: Vec<&str> = content
            .lines()
            .filter(|line| line.contains("ERROR") || line.contains("WARN"))
            .collect();
        if !errors.is_empty() {
            let start = errors.len().saturating_sub(RECENT_ERROR_LINES);
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "--- recent errors ---");
            for line in &errors[start..] {
                let _ = writeln!(stderr, "{line}");
            }
        }
    }
    let _ = fs::remove_file(log_path);
}
