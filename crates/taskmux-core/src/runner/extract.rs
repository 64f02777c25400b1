//! Result extraction from the accumulated assistant message.
//!
//! Backends report coverage, changed files, and test counts in prose;
//! the patterns here pull the structured values out. All of this is
//! best-effort -- absence of a match leaves the field at its default.

use std::sync::LazyLock;

use regex::Regex;

static PERCENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+(?:\.\d+)?)%").expect("static regex"));

static TEST_COUNTS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)\s+passed(?:\s*,\s*(\d+)\s+failed)?").expect("static regex"));

static FAILED_ONLY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)\s+failed").expect("static regex"));

static FILES_HEADER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(changed|modified)\s+files").expect("static regex"));

static FILE_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[\s*+-]*([A-Za-z0-9_][A-Za-z0-9_./-]*\.[A-Za-z0-9_]+)\s*$").expect("static regex"));

/// Maximum length of the key-output summary.
const KEY_OUTPUT_LIMIT: usize = 150;

/// Artifacts scraped from a task's message.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Extracted {
    pub coverage: String,
    pub coverage_num: f64,
    pub files_changed: Vec<String>,
    pub tests_passed: u32,
    pub tests_failed: u32,
    pub key_output: String,
}

/// Scan the captured text for coverage, changed files, test counts,
/// and the key-output summary.
pub fn extract(message: &str) -> Extracted {
    let mut out = Extracted::default();

    // Coverage: the first percent token on a line that mentions coverage.
    for line in message.lines() {
        if !line.to_ascii_lowercase().contains("coverage") {
            continue;
        }
        if let Some(cap) = PERCENT.captures(line) {
            out.coverage = format!("{}%", &cap[1]);
            out.coverage_num = cap[1].parse().unwrap_or(0.0);
            break;
        }
    }

    // Changed files: path-shaped lines in the block under the header.
    let mut in_files_block = false;
    for line in message.lines() {
        if FILES_HEADER.is_match(line) {
            in_files_block = true;
            continue;
        }
        if in_files_block {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                in_files_block = false;
                continue;
            }
            if let Some(cap) = FILE_LINE.captures(trimmed) {
                let path = cap[1].to_string();
                if !out.files_changed.contains(&path) {
                    out.files_changed.push(path);
                }
            } else {
                in_files_block = false;
            }
        }
    }

    // Test counts: prefer the combined "N passed, M failed" form.
    if let Some(cap) = TEST_COUNTS.captures(message) {
        out.tests_passed = cap[1].parse().unwrap_or(0);
        if let Some(failed) = cap.get(2) {
            out.tests_failed = failed.as_str().parse().unwrap_or(0);
        }
    }
    if out.tests_failed == 0 {
        if let Some(cap) = FAILED_ONLY.captures(message) {
            out.tests_failed = cap[1].parse().unwrap_or(0);
        }
    }

    // Key output: the last non-empty line, bounded.
    if let Some(last) = message.lines().rev().map(str::trim).find(|l| !l.is_empty()) {
        out.key_output = truncate_chars(last, KEY_OUTPUT_LIMIT);
    }

    out
}

/// Char-boundary-safe truncation.
fn truncate_chars(s: &str, limit: usize) -> String {
    match s.char_indices().nth(limit) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coverage_is_taken_from_a_coverage_line() {
        let extracted = extract("Progress: 50%\nTest coverage: 92.5% overall\n");
        assert_eq!(extracted.coverage, "92.5%");
        assert_eq!(extracted.coverage_num, 92.5);
    }

    #[test]
    fn no_coverage_line_leaves_defaults() {
        let extracted = extract("ran 10 tests, all good");
        assert_eq!(extracted.coverage, "");
        assert_eq!(extracted.coverage_num, 0.0);
    }

    #[test]
    fn files_block_is_collected_until_it_ends() {
        let message = "\
Summary of work.

Changed files:
- src/auth.rs
- src/lib.rs
  tests/auth_test.rs

Everything else is prose.";
        let extracted = extract(message);
        assert_eq!(
            extracted.files_changed,
            vec!["src/auth.rs", "src/lib.rs", "tests/auth_test.rs"]
        );
    }

    #[test]
    fn modified_files_header_is_recognized() {
        let extracted = extract("Modified files\nmain.go\n");
        assert_eq!(extracted.files_changed, vec!["main.go"]);
    }

    #[test]
    fn combined_test_counts() {
        let extracted = extract("Result: 42 passed, 3 failed");
        assert_eq!(extracted.tests_passed, 42);
        assert_eq!(extracted.tests_failed, 3);
    }

    #[test]
    fn separate_passed_and_failed_markers() {
        let extracted = extract("12 passed\nlater on: 2 failed");
        assert_eq!(extracted.tests_passed, 12);
        assert_eq!(extracted.tests_failed, 2);
    }

    #[test]
    fn key_output_is_last_line_bounded_to_150_chars() {
        let long_tail = "x".repeat(200);
        let message = format!("first line\n{long_tail}");
        let extracted = extract(&message);
        assert_eq!(extracted.key_output.chars().count(), 150);
    }

    #[test]
    fn key_output_skips_trailing_blank_lines() {
        let extracted = extract("the salient bit\n\n\n");
        assert_eq!(extracted.key_output, "the salient bit");
    }

    #[test]
    fn empty_message_extracts_nothing() {
        assert_eq!(extract(""), Extracted::default());
    }
}
