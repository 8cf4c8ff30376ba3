use crate::tasks::{NormalizedTask, TaskSource};
use chrono::NaiveDateTime;
use serde::Serialize;
use std::collections::BTreeMap;

/// Counts shown on the dashboards.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TaskStats {
    pub total: usize,
    pub completed: usize,
    pub pending: usize,
    pub delayed: usize,
    /// Completed over total, in percent. Zero when there are no tasks.
    pub completion_pct: f64,
    pub completion_rate: String,
}

/// Format the completion rate the way the dashboards always have: the
/// distance to 100%, negated. Full completion reads "-0.00%".
pub fn completion_rate_label(pct: f64) -> String {
    format!("{:.2}%", -(100.0 - pct))
}

/// Count total, completed and delayed tasks in a single pass.
pub fn task_stats(tasks: &[NormalizedTask], now: NaiveDateTime) -> TaskStats {
    let mut completed = 0;
    let mut delayed = 0;
    let mut by_source: BTreeMap<TaskSource, (usize, usize, usize)> = BTreeMap::new();

    for task in tasks {
        let entry = by_source.entry(task.source).or_insert((0, 0, 0));
        entry.0 += 1;
        if task.is_completed() {
            completed += 1;
            entry.1 += 1;
        }
        if task.is_delayed(now) {
            delayed += 1;
            entry.2 += 1;
        }
    }

    for (source, (total, completed, delayed)) in by_source.iter() {
        tracing::debug!(
            source = source.as_str(),
            total,
            completed,
            delayed,
            "task counts per source"
        );
    }

    let total = tasks.len();
    let completion_pct = if total > 0 {
        completed as f64 / total as f64 * 100.0
    } else {
        0.0
    };
    let stats = TaskStats {
        total,
        completed,
        pending: total - completed,
        delayed,
        completion_pct,
        completion_rate: completion_rate_label(completion_pct),
    };
    tracing::debug!(
        total = stats.total,
        completed = stats.completed,
        delayed = stats.delayed,
        completion_rate = %stats.completion_rate,
        "task totals"
    );
    stats
}

/// Per doer counts for the team performance table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DoerStats {
    pub doer_name: String,
    pub stats: TaskStats,
}

/// Group tasks by doer name and count each group. Sorted by name.
pub fn stats_by_doer(tasks: &[NormalizedTask], now: NaiveDateTime) -> Vec<DoerStats> {
    let mut groups: BTreeMap<String, Vec<NormalizedTask>> = BTreeMap::new();
    for task in tasks {
        groups
            .entry(task.doer_name.trim().to_string())
            .or_insert_with(Vec::new)
            .push(task.clone());
    }

    groups
        .into_iter()
        .map(|(doer_name, tasks)| DoerStats {
            stats: task_stats(&tasks, now),
            doer_name,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::fixtures::{at, task};
    use crate::tasks::TaskSource::*;

    #[test]
    fn full_completion_reads_negative_zero() {
        assert_eq!(completion_rate_label(100.0), "-0.00%");
    }

    #[test]
    fn seven_of_ten_reads_minus_thirty() {
        let now = at("2024-05-10", "12:00");
        let tasks: Vec<_> = (0..10)
            .map(|i| {
                let status = if i < 7 { "completed" } else { "pending" };
                task(Delegation, i, "a", None, None, status)
            })
            .collect();
        let stats = task_stats(&tasks, now);
        assert_eq!(stats.completion_rate, "-30.00%");

        let all_done: Vec<_> = (0..10).map(|i| task(Delegation, i, "a", None, None, "done")).collect();
        assert_eq!(task_stats(&all_done, now).completion_rate, "-0.00%");
    }

    #[test]
    fn on_time_late_and_overdue() {
        let now = at("2024-05-10", "12:00");
        let tasks = vec![
            task(Delegation, 1, "a", Some("2024-05-01 10:00"), Some("2024-05-01 09:00"), "completed"),
            task(Delegation, 2, "a", Some("2024-05-01 10:00"), Some("2024-05-02 09:00"), "shifted"),
            task(Delegation, 3, "a", Some("2024-05-03 10:00"), None, "pending"),
        ];
        let stats = task_stats(&tasks, now);
        assert_eq!(stats.total, 3);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.pending, 2);
        assert_eq!(stats.delayed, 2);
        assert_eq!(stats.completion_rate, "-66.67%");
    }

    #[test]
    fn no_tasks_reads_minus_hundred() {
        let stats = task_stats(&[], at("2024-05-10", "12:00"));
        assert_eq!(stats.total, 0);
        assert_eq!(stats.completion_rate, "-100.00%");
    }

    #[test]
    fn grouped_by_doer_across_sources() {
        let now = at("2024-05-10", "12:00");
        let tasks = vec![
            task(Delegation, 1, "Bob", None, None, "completed"),
            task(Checklist, 2, "Alice", Some("2024-05-01 00:00"), None, "pending"),
            task(Fms, 3, "Alice", None, None, "Done"),
        ];
        let groups = stats_by_doer(&tasks, now);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].doer_name, "Alice");
        assert_eq!(groups[0].stats.total, 2);
        assert_eq!(groups[0].stats.delayed, 1);
        assert_eq!(groups[0].stats.completion_rate, "-50.00%");
        assert_eq!(groups[1].doer_name, "Bob");
        assert_eq!(groups[1].stats.completion_rate, "-0.00%");
    }
}
