//! Progress aggregation for rebalance tasks
//!
//! The engine reports a nested map of per-move sequence counters. The
//! aggregate is throughput-weighted: `sum(curr - init) / sum(want - init)`
//! over every entry, so moves with more outstanding work weigh more.

use crate::metrics;
use crate::rebalance::ProgressMap;
use crate::registry::TaskRegistry;
use crate::task::TaskStatus;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

/// Scalar and per-node completion derived from a progress map
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgressSummary {
    /// Overall completion in `[0, 1]`
    pub progress: f64,
    /// Completion per node in `[0, 1]`
    pub per_node: BTreeMap<String, f64>,
}

fn ratio(achieved: u64, expected: u64) -> f64 {
    if expected > 0 {
        (achieved as f64 / expected as f64).min(1.0)
    } else {
        0.0
    }
}

/// Reduce a progress map to overall and per-node completion
pub fn aggregate(progress: &ProgressMap) -> ProgressSummary {
    let mut total_achieved: u64 = 0;
    let mut total_expected: u64 = 0;
    let mut nodes: BTreeMap<&str, (u64, u64)> = BTreeMap::new();

    for sources in progress.values() {
        for node_entries in sources.values() {
            for (node, entry) in node_entries {
                total_achieved = total_achieved.saturating_add(entry.achieved());
                total_expected = total_expected.saturating_add(entry.expected());

                let totals = nodes.entry(node.as_str()).or_default();
                totals.0 = totals.0.saturating_add(entry.achieved());
                totals.1 = totals.1.saturating_add(entry.expected());
            }
        }
    }

    ProgressSummary {
        progress: ratio(total_achieved, total_expected),
        per_node: nodes
            .into_iter()
            .map(|(node, (achieved, expected))| (node.to_string(), ratio(achieved, expected)))
            .collect(),
    }
}

/// Append `errors` to an existing newline-joined error message
pub fn append_errors(existing: &str, errors: &[String]) -> String {
    let mut message = existing.to_string();
    for err in errors {
        if !message.is_empty() {
            message.push('\n');
        }
        message.push_str(err);
    }
    message
}

/// The progress of a report that is still running. `None` and an empty
/// map both signal termination.
pub fn running_progress(progress: Option<&ProgressMap>) -> Option<&ProgressMap> {
    progress.filter(|p| !p.is_empty())
}

/// Fold one engine report into the task with id `task_id`.
///
/// `None` or empty progress is the termination signal: the task keeps its last
/// reported progress and its status becomes `Failed`, whether or not errors
/// accompany it. Returns `false` if the task is no longer registered.
pub fn apply_progress(
    registry: &TaskRegistry,
    task_id: &str,
    progress: Option<&ProgressMap>,
    errors: &[String],
) -> bool {
    let progress = running_progress(progress);
    let summary = progress.map(aggregate);

    let updated = registry
        .update_tasks(|tasks| {
            let Some(current_rev) = tasks.get(task_id).map(|t| t.rev) else {
                return Ok(false);
            };
            let rev = tasks.allocate(current_rev);

            Ok(tasks.update(task_id, |task| {
                let mut next = task.clone();
                next.rev = rev;
                if let Some(summary) = &summary {
                    next.progress = summary.progress;
                    next.detailed_progress = Some(summary.per_node.clone());
                }
                next.error_message = append_errors(&task.error_message, errors);
                if progress.is_none() {
                    next.status = TaskStatus::Failed;
                }
                next
            }))
        })
        .unwrap_or(false);

    match (&summary, updated) {
        (_, false) => {
            debug!("Progress for unknown task {} ignored", task_id);
        }
        (Some(summary), true) => {
            metrics::record_task_progress(task_id, summary.progress);
        }
        (None, true) => {
            if errors.is_empty() {
                debug!("Task {} terminated", task_id);
            } else {
                warn!("Task {} terminated with errors: {}", task_id, errors.join("; "));
            }
            metrics::record_topology_change_event("terminated");
        }
    }

    updated
}

/// Render a progress map as a fixed-width table: one row per index
/// partition, one column per node, each cell the completion percentage of
/// that node's moves for that partition.
pub fn format_table(progress: &ProgressMap) -> String {
    let nodes: BTreeSet<&str> = progress
        .values()
        .flat_map(|sources| sources.values())
        .flat_map(|entries| entries.keys().map(String::as_str))
        .collect();

    let first_width = progress
        .keys()
        .map(String::len)
        .chain(std::iter::once("PINDEX".len()))
        .max()
        .unwrap_or(0);
    let col_width = nodes.iter().map(|n| n.len()).max().unwrap_or(0).max(7);

    let mut out = String::new();
    out.push_str(&format!("{:<width$}", "PINDEX", width = first_width));
    for node in &nodes {
        out.push_str(&format!(" {:>width$}", node, width = col_width));
    }
    out.push('\n');
    out.push_str(&"-".repeat(first_width + nodes.len() * (col_width + 1)));
    out.push('\n');

    for (pindex, sources) in progress {
        out.push_str(&format!("{:<width$}", pindex, width = first_width));
        for node in &nodes {
            let (achieved, expected) = sources
                .values()
                .filter_map(|entries| entries.get(*node))
                .fold((0u64, 0u64), |(a, e), entry| {
                    (a.saturating_add(entry.achieved()), e.saturating_add(entry.expected()))
                });
            let has_entries = sources.values().any(|entries| entries.contains_key(*node));
            let cell = if !has_entries {
                ".".to_string()
            } else if expected == 0 {
                "done".to_string()
            } else {
                format!("{:.1}%", ratio(achieved, expected) * 100.0)
            };
            out.push_str(&format!(" {:>width$}", cell, width = col_width));
        }
        out.push('\n');
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rebalance::ProgressEntry;

    fn entry_map(entries: &[(&str, &str, &str, ProgressEntry)]) -> ProgressMap {
        let mut map = ProgressMap::new();
        for (pindex, source, node, entry) in entries {
            map.entry(pindex.to_string())
                .or_default()
                .entry(source.to_string())
                .or_default()
                .insert(node.to_string(), *entry);
        }
        map
    }

    #[test]
    fn test_aggregate_weighted() {
        let map = entry_map(&[
            ("p0", "0", "n1", ProgressEntry::new(0, 50, 100)),
            ("p1", "1", "n2", ProgressEntry::new(0, 25, 50)),
        ]);
        let summary = aggregate(&map);
        assert!((summary.progress - 0.5).abs() < f64::EPSILON);
        assert!((summary.per_node["n1"] - 0.5).abs() < f64::EPSILON);
        assert!((summary.per_node["n2"] - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_aggregate_is_not_per_entry_average() {
        // Entry averages would be (1.0 + 0.0) / 2 = 0.5
        let map = entry_map(&[
            ("p0", "0", "n1", ProgressEntry::new(0, 10, 10)),
            ("p0", "1", "n1", ProgressEntry::new(0, 0, 90)),
        ]);
        let summary = aggregate(&map);
        assert!((summary.progress - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_aggregate_no_expected_work() {
        let map = entry_map(&[("p0", "0", "n1", ProgressEntry::new(7, 7, 7))]);
        let summary = aggregate(&map);
        assert_eq!(summary.progress, 0.0);
        assert_eq!(summary.per_node["n1"], 0.0);

        assert_eq!(aggregate(&ProgressMap::new()), ProgressSummary::default());
    }

    #[test]
    fn test_aggregate_nonzero_init() {
        let map = entry_map(&[("p0", "0", "n1", ProgressEntry::new(100, 150, 300))]);
        let summary = aggregate(&map);
        assert!((summary.progress - 0.25).abs() < f64::EPSILON);
    }

    #[test]
    fn test_append_errors() {
        assert_eq!(append_errors("", &[]), "");
        assert_eq!(append_errors("", &["a".to_string()]), "a");
        assert_eq!(
            append_errors("a", &["b".to_string(), "c".to_string()]),
            "a\nb\nc"
        );
    }

    #[test]
    fn test_format_table() {
        let map = entry_map(&[
            ("default_0", "0", "node-a", ProgressEntry::new(0, 50, 100)),
            ("default_1", "1", "node-b", ProgressEntry::new(0, 0, 0)),
        ]);
        let table = format_table(&map);
        let lines: Vec<&str> = table.lines().collect();

        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("PINDEX"));
        assert!(lines[0].contains("node-a") && lines[0].contains("node-b"));
        assert!(lines[1].chars().all(|c| c == '-'));
        assert!(lines[2].starts_with("default_0") && lines[2].contains("50.0%"));
        assert!(lines[3].contains("done"));
        assert!(lines[3].contains('.'));
    }
}
