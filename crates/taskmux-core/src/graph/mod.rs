//! Task graph scheduling: leaf extraction, dependency expansion,
//! readiness, cycle detection, and conflict-aware batching.
//!
//! The graph is id-based; nothing here holds references between tasks.
//! Expansion results are ephemeral -- they feed readiness tests and the
//! cycle walk, and are never persisted back onto a task.

use std::collections::{HashMap, HashSet};

use crate::error::ConfigError;
use crate::state::{Task, TaskStatus};

/// Index tasks by id for expansion lookups.
pub fn index_tasks(tasks: &[Task]) -> HashMap<&str, &Task> {
    tasks.iter().map(|t| (t.task_id.as_str(), t)).collect()
}

/// The dispatch candidate set: tasks with no subtasks. Parents are
/// containers and never dispatch units.
pub fn leaf_tasks(tasks: &[Task]) -> Vec<&Task> {
    tasks.iter().filter(|t| t.is_leaf()).collect()
}

/// Expand a task's dependency list: a dependency on a parent is replaced
/// by the parent's transitive leaf descendants. Duplicates are removed
/// preserving first occurrence, and the task itself never appears in its
/// own expansion.
pub fn expand_dependencies(
    task_id: &str,
    dependencies: &[String],
    index: &HashMap<&str, &Task>,
) -> Vec<String> {
    let mut out = Vec::new();
    let mut seen: HashSet<&str> = HashSet::new();
    for dep in dependencies {
        expand_into(dep, index, &mut seen, &mut out);
    }
    out.retain(|id| id != task_id);
    out
}

fn expand_into<'a>(
    id: &'a str,
    index: &HashMap<&str, &'a Task>,
    seen: &mut HashSet<&'a str>,
    out: &mut Vec<String>,
) {
    // The visited set both dedups and terminates malformed parent loops;
    // real cycles are reported separately by `detect_cycle`.
    if !seen.insert(id) {
        return;
    }
    match index.get(id) {
        Some(task) if task.is_parent() => {
            for sub in &task.subtasks {
                expand_into(sub, index, seen, out);
            }
        }
        // Leaf, or an id the document does not know: keep as-is. Unknown
        // ids make the dependent permanently un-ready, which is the
        // desired failure mode for a dangling reference.
        _ => out.push(id.to_string()),
    }
}

/// A leaf task is ready iff it is `not_started` and every expanded
/// dependency resolves to a `completed` task.
pub fn ready_tasks(tasks: &[Task]) -> Vec<Task> {
    let index = index_tasks(tasks);
    leaf_tasks(tasks)
        .into_iter()
        .filter(|task| task.status == TaskStatus::NotStarted)
        .filter(|task| {
            expand_dependencies(&task.task_id, &task.dependencies, &index)
                .iter()
                .all(|dep| {
                    index
                        .get(dep.as_str())
                        .is_some_and(|d| d.status == TaskStatus::Completed)
                })
        })
        .cloned()
        .collect()
}

/// Walk the expanded dependency graph and report the first cycle found.
///
/// A cycle is a configuration error: the caller must refuse to dispatch.
pub fn detect_cycle(tasks: &[Task]) -> Result<(), ConfigError> {
    let index = index_tasks(tasks);
    let expanded: HashMap<&str, Vec<String>> = leaf_tasks(tasks)
        .into_iter()
        .map(|t| {
            (
                t.task_id.as_str(),
                expand_dependencies(&t.task_id, &t.dependencies, &index),
            )
        })
        .collect();

    // 0 = unvisited, 1 = on the current path, 2 = done.
    let mut color: HashMap<&str, u8> = HashMap::new();
    let mut path: Vec<&str> = Vec::new();

    fn visit<'a>(
        node: &'a str,
        expanded: &'a HashMap<&str, Vec<String>>,
        color: &mut HashMap<&'a str, u8>,
        path: &mut Vec<&'a str>,
    ) -> Option<Vec<String>> {
        match color.get(node).copied().unwrap_or(0) {
            1 => {
                // Found the back edge; slice the current path into a cycle.
                let start = path.iter().position(|n| *n == node).unwrap_or(0);
                let mut cycle: Vec<String> =
                    path[start..].iter().map(|s| (*s).to_string()).collect();
                cycle.push(node.to_string());
                return Some(cycle);
            }
            2 => return None,
            _ => {}
        }
        color.insert(node, 1);
        path.push(node);
        if let Some(deps) = expanded.get(node) {
            for dep in deps {
                if let Some(cycle) = visit(dep.as_str(), expanded, color, path) {
                    return Some(cycle);
                }
            }
        }
        path.pop();
        color.insert(node, 2);
        None
    }

    for node in expanded.keys().copied() {
        if let Some(cycle) = visit(node, &expanded, &mut color, &mut path) {
            return Err(ConfigError::DependencyCycle { cycle });
        }
    }
    Ok(())
}

/// Do two write manifests overlap?
fn writes_conflict(a: &Task, b: &Task) -> bool {
    a.writes.iter().any(|w| b.writes.contains(w))
}

/// Partition a ready set into ordered batches honoring the conflict
/// rules:
///
/// - overlapping `writes` are separated (greedy first-fit coloring);
/// - read-only tasks ride alongside the first batch;
/// - tasks with no manifest at all get one singleton batch each,
///   appended after the write-carrying batches.
pub fn partition_batches(ready: &[Task]) -> Vec<Vec<Task>> {
    let mut batches: Vec<Vec<Task>> = Vec::new();
    let mut readers: Vec<Task> = Vec::new();
    let mut loners: Vec<Task> = Vec::new();

    for task in ready {
        if task.writes.is_empty() && task.reads.is_empty() {
            loners.push(task.clone());
        } else if task.writes.is_empty() {
            readers.push(task.clone());
        } else {
            let slot = batches
                .iter()
                .position(|batch| batch.iter().all(|member| !writes_conflict(task, member)));
            match slot {
                Some(i) => batches[i].push(task.clone()),
                None => batches.push(vec![task.clone()]),
            }
        }
    }

    if !readers.is_empty() {
        match batches.first_mut() {
            Some(first) => first.extend(readers),
            None => batches.push(readers),
        }
    }

    for loner in loners {
        batches.push(vec![loner]);
    }

    batches
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(id: &str) -> Task {
        Task::new(id)
    }

    fn with_deps(id: &str, deps: &[&str]) -> Task {
        let mut t = task(id);
        t.dependencies = deps.iter().map(|d| d.to_string()).collect();
        t
    }

    fn parent(id: &str, subtasks: &[&str]) -> Task {
        let mut t = task(id);
        t.subtasks = subtasks.iter().map(|s| s.to_string()).collect();
        t
    }

    fn writes(id: &str, files: &[&str]) -> Task {
        let mut t = task(id);
        t.writes = files.iter().map(|f| f.to_string()).collect();
        t
    }

    #[test]
    fn parents_are_excluded_from_the_candidate_set() {
        let tasks = vec![task("1"), parent("2", &["2.1"]), task("2.1")];
        let leaves = leaf_tasks(&tasks);
        let ids: Vec<&str> = leaves.iter().map(|t| t.task_id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2.1"]);
    }

    #[test]
    fn parent_dependency_expands_to_leaf_descendants() {
        let tasks = vec![
            parent("p", &["p.1", "p.2"]),
            task("p.1"),
            parent("p.2", &["p.2.1"]),
            task("p.2.1"),
            with_deps("x", &["p"]),
        ];
        let index = index_tasks(&tasks);
        let expanded = expand_dependencies("x", &["p".to_string()], &index);
        assert_eq!(expanded, vec!["p.1", "p.2.1"]);
    }

    #[test]
    fn expansion_dedups_preserving_first_occurrence() {
        let tasks = vec![parent("p", &["a", "b"]), task("a"), task("b")];
        let index = index_tasks(&tasks);
        let expanded =
            expand_dependencies("x", &["a".to_string(), "p".to_string()], &index);
        assert_eq!(expanded, vec!["a", "b"]);
    }

    #[test]
    fn expansion_never_contains_the_task_itself() {
        let tasks = vec![parent("p", &["p.1", "p.2"]), task("p.1"), task("p.2")];
        let index = index_tasks(&tasks);
        let expanded = expand_dependencies("p.2", &["p".to_string()], &index);
        assert_eq!(expanded, vec!["p.1"]);
    }

    #[test]
    fn unknown_dependency_blocks_readiness() {
        let tasks = vec![with_deps("x", &["ghost"])];
        assert!(ready_tasks(&tasks).is_empty());
    }

    #[test]
    fn readiness_requires_completed_dependencies() {
        let mut dep = task("dep");
        dep.status = TaskStatus::InProgress;
        let tasks = vec![dep, with_deps("x", &["dep"])];
        assert!(ready_tasks(&tasks).is_empty());

        let mut dep = task("dep");
        dep.status = TaskStatus::Completed;
        let tasks = vec![dep, with_deps("x", &["dep"])];
        let ready = ready_tasks(&tasks);
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].task_id, "x");
    }

    #[test]
    fn only_not_started_tasks_are_ready() {
        let mut t = task("x");
        t.status = TaskStatus::PendingReview;
        assert!(ready_tasks(&[t]).is_empty());
    }

    #[test]
    fn two_task_cycle_is_reported() {
        let tasks = vec![with_deps("a", &["b"]), with_deps("b", &["a"])];
        let err = detect_cycle(&tasks).unwrap_err();
        match err {
            ConfigError::DependencyCycle { cycle } => {
                assert!(cycle.len() >= 3);
                assert_eq!(cycle.first(), cycle.last());
            }
            other => panic!("expected cycle error, got {other}"),
        }
    }

    #[test]
    fn self_dependency_through_parent_is_not_a_cycle() {
        // p.2 depends on its parent p; expansion drops p.2 itself, so the
        // remaining edge p.2 -> p.1 is acyclic.
        let tasks = vec![
            parent("p", &["p.1", "p.2"]),
            task("p.1"),
            with_deps("p.2", &["p"]),
        ];
        assert!(detect_cycle(&tasks).is_ok());
    }

    #[test]
    fn acyclic_graph_passes() {
        let tasks = vec![
            with_deps("a", &[]),
            with_deps("b", &["a"]),
            with_deps("c", &["a", "b"]),
        ];
        assert!(detect_cycle(&tasks).is_ok());
    }

    #[test]
    fn conflicting_writes_are_separated() {
        let ready = vec![
            writes("A", &["x.ts"]),
            writes("B", &["x.ts", "y.ts"]),
            writes("C", &["z.ts"]),
            task("D"),
        ];
        let batches = partition_batches(&ready);
        let ids: Vec<Vec<&str>> = batches
            .iter()
            .map(|b| b.iter().map(|t| t.task_id.as_str()).collect())
            .collect();
        assert_eq!(ids, vec![vec!["A", "C"], vec!["B"], vec!["D"]]);
    }

    #[test]
    fn readers_ride_the_first_batch() {
        let mut reader = task("R");
        reader.reads = vec!["x.ts".to_string()];
        let ready = vec![writes("A", &["x.ts"]), reader];
        let batches = partition_batches(&ready);
        assert_eq!(batches.len(), 1);
        let ids: Vec<&str> = batches[0].iter().map(|t| t.task_id.as_str()).collect();
        assert_eq!(ids, vec!["A", "R"]);
    }

    #[test]
    fn readers_alone_form_one_batch() {
        let mut reader = task("R");
        reader.reads = vec!["x.ts".to_string()];
        let batches = partition_batches(&[reader]);
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0][0].task_id, "R");
    }

    #[test]
    fn no_manifest_tasks_are_singletons() {
        let batches = partition_batches(&[task("D1"), task("D2")]);
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].len(), 1);
        assert_eq!(batches[1].len(), 1);
    }

    #[test]
    fn no_batch_contains_a_write_conflict() {
        let ready = vec![
            writes("a", &["1", "2"]),
            writes("b", &["2", "3"]),
            writes("c", &["3", "4"]),
            writes("d", &["4", "1"]),
            writes("e", &["5"]),
        ];
        let batches = partition_batches(&ready);
        for batch in &batches {
            for (i, left) in batch.iter().enumerate() {
                for right in &batch[i + 1..] {
                    assert!(
                        !writes_conflict(left, right),
                        "{} and {} conflict in one batch",
                        left.task_id,
                        right.task_id
                    );
                }
            }
        }
    }
}
