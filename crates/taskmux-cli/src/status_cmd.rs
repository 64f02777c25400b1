//! `taskmux status`: human-readable summary of the state document.

use anyhow::Result;

use taskmux_core::config::RuntimeConfig;
use taskmux_core::state::{StateWriter, TaskStatus};

/// Status markers, unicode by default, ASCII when configured.
struct Markers {
    pass: &'static str,
    fail: &'static str,
    warn: &'static str,
}

impl Markers {
    fn for_config(config: &RuntimeConfig) -> Self {
        if config.ascii_mode {
            Self { pass: "PASS", fail: "FAIL", warn: "WARN" }
        } else {
            Self { pass: "✓", fail: "✗", warn: "⚠" }
        }
    }
}

pub fn run_status(writer: &StateWriter) -> Result<()> {
    let doc = writer.read()?;
    let config = RuntimeConfig::from_env();
    let markers = Markers::for_config(&config);

    if !doc.session_name.is_empty() {
        println!("session: {}", doc.session_name);
    }
    println!("tasks: {}", doc.tasks.len());

    for task in &doc.tasks {
        let marker = match task.status {
            TaskStatus::Completed => markers.pass,
            TaskStatus::Blocked => markers.fail,
            TaskStatus::FixRequired => markers.warn,
            _ => " ",
        };
        let kind = if task.is_parent() { "parent" } else { "leaf" };
        print!("{marker} {} [{kind}] {}", task.task_id, task.status);
        if task.fix_attempts > 0 {
            print!(" fixes={}/{}", task.fix_attempts, task.max_fix_attempts);
        }
        if !task.blocked_reason.is_empty() {
            print!(" ({})", task.blocked_reason);
        }
        println!();
    }

    if !doc.blocked_items.is_empty() {
        println!("\nblocked:");
        for item in &doc.blocked_items {
            println!(
                "{} {} -> [{}] {}",
                markers.fail,
                item.task_id,
                item.dependent_tasks.join(", "),
                item.blocking_reason
            );
        }
    }

    if !doc.pending_decisions.is_empty() {
        println!("\npending decisions:");
        for decision in &doc.pending_decisions {
            let priority = decision.priority.as_deref().unwrap_or("normal");
            println!(
                "{} [{}] {}: {}",
                markers.warn,
                priority,
                decision.task_id.as_deref().unwrap_or("-"),
                decision.options.join(" / ")
            );
        }
    }

    Ok(())
}
