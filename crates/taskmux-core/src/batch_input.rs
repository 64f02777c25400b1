//! Batch input parsing: the `---TASK---` block format read from
//! standard input in parallel mode.
//!
//! Each block is a header section of `key: value` lines, a
//! `---CONTENT---` divider, and the prompt text running to the next
//! block or end of input. Dependencies resolve within the same
//! submission; cycles are rejected before anything is dispatched.

use std::path::PathBuf;

use crate::error::ConfigError;
use crate::graph::detect_cycle;
use crate::state::Task;

/// Block delimiter line.
const TASK_DELIMITER: &str = "---TASK---";
/// Header/content divider line.
const CONTENT_DELIMITER: &str = "---CONTENT---";

/// One parsed task block.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchTask {
    pub id: String,
    pub workdir: Option<PathBuf>,
    pub backend: Option<String>,
    pub dependencies: Vec<String>,
    pub session_id: Option<String>,
    pub target_window: Option<String>,
    /// The prompt text from the content section.
    pub content: String,
}

/// Parse a full submission.
pub fn parse_batch_input(input: &str) -> Result<Vec<BatchTask>, ConfigError> {
    let mut tasks: Vec<BatchTask> = Vec::new();
    let mut current: Option<BlockAccumulator> = None;

    for line in input.lines() {
        if line.trim() == TASK_DELIMITER {
            if let Some(block) = current.take() {
                tasks.push(block.finish()?);
            }
            current = Some(BlockAccumulator::default());
            continue;
        }
        if let Some(block) = current.as_mut() {
            block.push_line(line)?;
        } else if !line.trim().is_empty() {
            return Err(ConfigError::MalformedBatchInput(format!(
                "content before first {TASK_DELIMITER} delimiter: {line:?}"
            )));
        }
    }
    if let Some(block) = current.take() {
        tasks.push(block.finish()?);
    }

    if tasks.is_empty() {
        return Err(ConfigError::MalformedBatchInput(
            "no task blocks found".to_string(),
        ));
    }

    // Duplicate ids make dependency resolution ambiguous.
    for (i, task) in tasks.iter().enumerate() {
        if tasks[..i].iter().any(|t| t.id == task.id) {
            return Err(ConfigError::MalformedBatchInput(format!(
                "duplicate task id {:?}",
                task.id
            )));
        }
    }

    // Reject dependency cycles within the submission.
    let graph: Vec<Task> = tasks
        .iter()
        .map(|t| {
            let mut task = Task::new(&t.id);
            task.dependencies = t.dependencies.clone();
            task
        })
        .collect();
    detect_cycle(&graph)?;

    Ok(tasks)
}

#[derive(Debug, Default)]
struct BlockAccumulator {
    task: BatchTask,
    in_content: bool,
    content_lines: Vec<String>,
}

impl BlockAccumulator {
    fn push_line(&mut self, line: &str) -> Result<(), ConfigError> {
        if !self.in_content {
            if line.trim() == CONTENT_DELIMITER {
                self.in_content = true;
                return Ok(());
            }
            if line.trim().is_empty() {
                return Ok(());
            }
            let Some((key, value)) = line.split_once(':') else {
                return Err(ConfigError::MalformedBatchInput(format!(
                    "header line without ':' separator: {line:?}"
                )));
            };
            self.set_header(key.trim(), value.trim())?;
            return Ok(());
        }
        self.content_lines.push(line.to_string());
        Ok(())
    }

    fn set_header(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        match key {
            "id" => self.task.id = value.to_string(),
            "workdir" => self.task.workdir = Some(PathBuf::from(value)),
            "backend" => self.task.backend = Some(value.to_string()),
            "dependencies" => {
                self.task.dependencies = value
                    .split(',')
                    .map(str::trim)
                    .filter(|d| !d.is_empty())
                    .map(str::to_string)
                    .collect();
            }
            "session_id" => self.task.session_id = Some(value.to_string()),
            "target_window" => self.task.target_window = Some(value.to_string()),
            other => {
                // Unknown headers are tolerated; submissions evolve
                // faster than consumers.
                tracing::debug!(header = other, "ignoring unknown batch header");
            }
        }
        Ok(())
    }

    fn finish(mut self) -> Result<BatchTask, ConfigError> {
        if self.task.id.is_empty() {
            return Err(ConfigError::MalformedBatchInput(
                "task block missing required 'id' header".to_string(),
            ));
        }
        self.task.content = self.content_lines.join("\n").trim().to_string();
        Ok(self.task)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_block_parses_headers_and_content() {
        let input = "\
---TASK---
id: t1
workdir: /srv/app
backend: claude
dependencies: a, b
session_id: s-9
target_window: builds
---CONTENT---
Fix the login flow.
Keep the API stable.
";
        let tasks = parse_batch_input(input).unwrap();
        assert_eq!(tasks.len(), 1);
        let task = &tasks[0];
        assert_eq!(task.id, "t1");
        assert_eq!(task.workdir.as_deref(), Some(std::path::Path::new("/srv/app")));
        assert_eq!(task.backend.as_deref(), Some("claude"));
        assert_eq!(task.dependencies, vec!["a", "b"]);
        assert_eq!(task.session_id.as_deref(), Some("s-9"));
        assert_eq!(task.target_window.as_deref(), Some("builds"));
        assert_eq!(task.content, "Fix the login flow.\nKeep the API stable.");
    }

    #[test]
    fn multiple_blocks_split_on_delimiter() {
        let input = "\
---TASK---
id: a
---CONTENT---
first prompt
---TASK---
id: b
dependencies: a
---CONTENT---
second prompt
";
        let tasks = parse_batch_input(input).unwrap();
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].id, "a");
        assert_eq!(tasks[1].dependencies, vec!["a"]);
        assert_eq!(tasks[1].content, "second prompt");
    }

    #[test]
    fn missing_id_is_rejected() {
        let input = "---TASK---\nworkdir: /x\n---CONTENT---\nbody\n";
        let err = parse_batch_input(input).unwrap_err();
        assert!(err.to_string().contains("missing required 'id'"));
    }

    #[test]
    fn dependency_cycle_is_rejected() {
        let input = "\
---TASK---
id: a
dependencies: b
---CONTENT---
x
---TASK---
id: b
dependencies: a
---CONTENT---
y
";
        let err = parse_batch_input(input).unwrap_err();
        assert!(matches!(err, ConfigError::DependencyCycle { .. }));
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let input = "---TASK---\nid: a\n---CONTENT---\nx\n---TASK---\nid: a\n---CONTENT---\ny\n";
        let err = parse_batch_input(input).unwrap_err();
        assert!(err.to_string().contains("duplicate task id"));
    }

    #[test]
    fn empty_input_is_rejected() {
        assert!(parse_batch_input("").is_err());
        assert!(parse_batch_input("   \n\n").is_err());
    }

    #[test]
    fn header_without_separator_is_rejected() {
        let input = "---TASK---\nid a\n---CONTENT---\nx\n";
        assert!(parse_batch_input(input).is_err());
    }

    #[test]
    fn unknown_headers_are_tolerated() {
        let input = "---TASK---\nid: a\npriority: high\n---CONTENT---\nx\n";
        let tasks = parse_batch_input(input).unwrap();
        assert_eq!(tasks[0].id, "a");
    }

    #[test]
    fn content_keeps_internal_blank_lines() {
        let input = "---TASK---\nid: a\n---CONTENT---\npara one\n\npara two\n";
        let tasks = parse_batch_input(input).unwrap();
        assert_eq!(tasks[0].content, "para one\n\npara two");
    }
}
