use crate::tasks::NormalizedTask;
use chrono::NaiveDate;
use serde::Serialize;
use std::cmp::Ordering;

/// Requester supplied filters for the merged task list. Every field is
/// optional; unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub doer: Option<String>,
    pub department: Option<String>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub search: Option<String>,
    pub status: Option<String>,
}

fn in_range(date: Option<NaiveDate>, from: Option<NaiveDate>, to: Option<NaiveDate>) -> bool {
    match date {
        Some(date) => from.map_or(true, |from| date >= from) && to.map_or(true, |to| date <= to),
        None => false,
    }
}

/// Case insensitive substring match. An empty needle matches anything.
pub fn contains_text(haystack: &str, needle: &str) -> bool {
    needle.is_empty() || haystack.to_lowercase().contains(&needle.to_lowercase())
}

impl TaskFilter {
    /// Whether a task passes every set filter. The date range keeps a
    /// task when either its planned date or its actual date falls inside
    /// it.
    pub fn matches(&self, task: &NormalizedTask) -> bool {
        if let Some(doer) = &self.doer {
            if task.doer_name != *doer {
                return false;
            }
        }
        if let Some(department) = &self.department {
            let same = task
                .department
                .as_deref()
                .map_or(false, |d| d.trim().eq_ignore_ascii_case(department.trim()));
            if !same {
                return false;
            }
        }
        if self.from.is_some() || self.to.is_some() {
            let planned = in_range(task.planned_date, self.from, self.to);
            let actual = in_range(task.actual_date, self.from, self.to);
            if !(planned || actual) {
                return false;
            }
        }
        if let Some(search) = &self.search {
            let search = search.trim();
            if !(contains_text(&task.description, search) || contains_text(&task.key, search)) {
                return false;
            }
        }
        if let Some(status) = &self.status {
            if !task.status.trim().eq_ignore_ascii_case(status.trim()) {
                return false;
            }
        }
        true
    }

    pub fn apply(&self, tasks: Vec<NormalizedTask>) -> Vec<NormalizedTask> {
        let before = tasks.len();
        let kept: Vec<NormalizedTask> = tasks.into_iter().filter(|task| self.matches(task)).collect();
        tracing::debug!(before, after = kept.len(), filter = ?self, "task filter applied");
        kept
    }
}

/// Most recent first: planned timestamp descending with unplanned tasks
/// last, then by source, then by id descending.
pub fn sort_tasks(tasks: &mut [NormalizedTask]) {
    tasks.sort_by(|a, b| {
        let planned = match (a.planned_at(), b.planned_at()) {
            (Some(a), Some(b)) => b.cmp(&a),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        };
        planned
            .then_with(|| a.source.cmp(&b.source))
            .then_with(|| b.id.cmp(&a.id))
    });
}

/// One page of a listing.
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: usize,
    pub per_page: usize,
    pub total: usize,
    pub total_pages: usize,
}

/// Cut a page out of an already sorted list. Pages are 1-based; page 0
/// is treated as page 1 and a page past the end is empty.
pub fn paginate<T>(items: Vec<T>, page: usize, per_page: usize) -> Page<T> {
    let per_page = per_page.max(1);
    let page = page.max(1);
    let total = items.len();
    let total_pages = if total == 0 { 0 } else { (total - 1) / per_page + 1 };
    let items = items
        .into_iter()
        .skip((page - 1).saturating_mul(per_page))
        .take(per_page)
        .collect();
    Page {
        items,
        page,
        per_page,
        total,
        total_pages,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::fixtures::task;
    use crate::tasks::TaskSource::*;

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn date_range_matches_planned_or_actual() {
        let filter = TaskFilter {
            from: Some(day("2024-05-10")),
            to: Some(day("2024-05-20")),
            ..TaskFilter::default()
        };
        let actual_inside = task(Delegation, 1, "a", Some("2024-04-01 10:00"), Some("2024-05-15 10:00"), "completed");
        let planned_inside = task(Delegation, 2, "a", Some("2024-05-20 10:00"), Some("2024-06-01 10:00"), "completed");
        let neither = task(Delegation, 3, "a", Some("2024-04-01 10:00"), Some("2024-06-01 10:00"), "completed");
        let undated = task(Fms, 4, "a", None, None, "");
        assert!(filter.matches(&actual_inside));
        assert!(filter.matches(&planned_inside));
        assert!(!filter.matches(&neither));
        assert!(!filter.matches(&undated));
    }

    #[test]
    fn open_ended_ranges() {
        let from_only = TaskFilter {
            from: Some(day("2024-05-10")),
            ..TaskFilter::default()
        };
        assert!(from_only.matches(&task(Checklist, 1, "a", Some("2030-01-01 00:00"), None, "pending")));
        assert!(!from_only.matches(&task(Checklist, 2, "a", Some("2024-05-09 23:59"), None, "pending")));
    }

    #[test]
    fn doer_filter_spans_all_sources() {
        let tasks = vec![
            task(Delegation, 1, "Alice", None, None, "pending"),
            task(Delegation, 2, "Bob", None, None, "pending"),
            task(Checklist, 3, "Alice", None, None, "pending"),
            task(Checklist, 4, "Carol", None, None, "pending"),
            task(Fms, 5, "Alice", None, None, ""),
            task(Fms, 6, "alice", None, None, ""),
        ];
        let filter = TaskFilter {
            doer: Some("Alice".to_string()),
            ..TaskFilter::default()
        };
        let kept = filter.apply(tasks);
        assert_eq!(kept.len(), 3);
        assert!(kept.iter().all(|t| t.doer_name == "Alice"));
        let mut sources: Vec<_> = kept.iter().map(|t| t.source).collect();
        sources.dedup();
        assert_eq!(sources, vec![Delegation, Checklist, Fms]);
    }

    #[test]
    fn search_department_and_status() {
        let mut t = task(Delegation, 1, "a", None, None, "Pending");
        t.description = "Renew the SSL certificate".to_string();
        let filter = TaskFilter {
            search: Some("ssl".to_string()),
            department: Some("OPS".to_string()),
            status: Some("pending".to_string()),
            ..TaskFilter::default()
        };
        assert!(filter.matches(&t));
        t.department = None;
        assert!(!filter.matches(&t));
    }

    #[test]
    fn sorted_by_planned_then_id() {
        let mut tasks = vec![
            task(Delegation, 1, "a", Some("2024-05-01 10:00"), None, "pending"),
            task(Delegation, 2, "a", None, None, "pending"),
            task(Checklist, 3, "a", Some("2024-05-03 10:00"), None, "pending"),
            task(Delegation, 4, "a", Some("2024-05-01 10:00"), None, "pending"),
        ];
        sort_tasks(&mut tasks);
        let ids: Vec<i64> = tasks.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![3, 4, 1, 2]);
    }

    #[test]
    fn pages() {
        let items: Vec<u32> = (1..=23).collect();
        let first = paginate(items.clone(), 1, 10);
        assert_eq!(first.items, (1..=10).collect::<Vec<_>>());
        assert_eq!(first.total_pages, 3);
        let last = paginate(items.clone(), 3, 10);
        assert_eq!(last.items, vec![21, 22, 23]);
        let past = paginate(items, 4, 10);
        assert!(past.items.is_empty());
        assert_eq!(past.total, 23);
        assert_eq!(paginate(Vec::<u32>::new(), 0, 10).total_pages, 0);
    }

    #[test]
    fn huge_page_numbers_are_past_the_end() {
        let items: Vec<u32> = (1..=23).collect();
        let far = paginate(items.clone(), usize::MAX / 10 + 2, 10);
        assert!(far.items.is_empty());
        assert_eq!(far.total, 23);
        let last = paginate(items, usize::MAX, usize::MAX);
        assert!(last.items.is_empty());
        assert_eq!(last.total_pages, 1);
    }
}
