use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::Serialize;

/// Where a task comes from. The order of the variants is the order
/// sources are listed in when everything else is equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskSource {
    Delegation,
    Checklist,
    Fms,
}

impl TaskSource {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskSource::Delegation => "delegation",
            TaskSource::Checklist => "checklist",
            TaskSource::Fms => "fms",
        }
    }
}

/// The common shape every task source is mapped into before it is
/// counted, filtered or listed.
#[derive(Debug, Clone, Serialize)]
pub struct NormalizedTask {
    pub source: TaskSource,
    pub id: i64,
    /// The identifier shown to users: unique id, task code or FMS key.
    pub key: String,
    pub description: String,
    pub doer_name: String,
    pub department: Option<String>,
    pub planned_date: Option<NaiveDate>,
    pub planned_time: Option<NaiveTime>,
    pub actual_date: Option<NaiveDate>,
    pub actual_time: Option<NaiveTime>,
    pub status: String,
    pub link: Option<String>,
}

/// Statuses that count a task as completed.
const COMPLETED_STATUSES: [&str; 2] = ["completed", "done"];

/// Join a date and an optional time. A date without a time means
/// midnight of that date.
pub fn timestamp(date: Option<NaiveDate>, time: Option<NaiveTime>) -> Option<NaiveDateTime> {
    let date = date?;
    let time = match time {
        Some(time) => time,
        None => NaiveTime::from_hms_opt(0, 0, 0)?,
    };
    Some(date.and_time(time))
}

impl NormalizedTask {
    pub fn planned_at(&self) -> Option<NaiveDateTime> {
        timestamp(self.planned_date, self.planned_time)
    }

    pub fn actual_at(&self) -> Option<NaiveDateTime> {
        timestamp(self.actual_date, self.actual_time)
    }

    pub fn is_completed(&self) -> bool {
        let status = self.status.trim().to_lowercase();
        COMPLETED_STATUSES.contains(&status.as_str())
    }

    /// A task is delayed when it was done after it was planned, or when
    /// it was planned in the past and has not been done.
    pub fn is_delayed(&self, now: NaiveDateTime) -> bool {
        match (self.planned_at(), self.actual_at()) {
            (Some(planned), Some(actual)) => actual > planned,
            (Some(planned), None) => planned < now,
            _ => false,
        }
    }
}

#[cfg(test)]
pub mod fixtures {
    use super::*;

    pub fn at(date: &str, time: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(&format!("{} {}", date, time), "%Y-%m-%d %H:%M").unwrap()
    }

    pub fn task(
        source: TaskSource,
        id: i64,
        doer: &str,
        planned: Option<&str>,
        actual: Option<&str>,
        status: &str,
    ) -> NormalizedTask {
        let split = |stamp: Option<&str>| match stamp {
            Some(stamp) => {
                let value = NaiveDateTime::parse_from_str(stamp, "%Y-%m-%d %H:%M").unwrap();
                (Some(value.date()), Some(value.time()))
            }
            None => (None, None),
        };
        let (planned_date, planned_time) = split(planned);
        let (actual_date, actual_time) = split(actual);
        NormalizedTask {
            source,
            id,
            key: format!("{}-{}", source.as_str(), id),
            description: format!("task {}", id),
            doer_name: doer.to_string(),
            department: Some("ops".to_string()),
            planned_date,
            planned_time,
            actual_date,
            actual_time,
            status: status.to_string(),
            link: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::{at, task};
    use super::*;

    #[test]
    fn completed_late_is_delayed() {
        let now = at("2024-05-10", "12:00");
        let late = task(TaskSource::Delegation, 1, "a", Some("2024-05-01 10:00"), Some("2024-05-01 10:01"), "completed");
        let on_time = task(TaskSource::Delegation, 2, "a", Some("2024-05-01 10:00"), Some("2024-05-01 10:00"), "completed");
        assert!(late.is_delayed(now));
        assert!(!on_time.is_delayed(now));
    }

    #[test]
    fn overdue_without_actual_is_delayed() {
        let now = at("2024-05-10", "12:00");
        let overdue = task(TaskSource::Checklist, 1, "a", Some("2024-05-10 11:59"), None, "pending");
        let upcoming = task(TaskSource::Checklist, 2, "a", Some("2024-05-10 12:01"), None, "pending");
        assert!(overdue.is_delayed(now));
        assert!(!upcoming.is_delayed(now));
    }

    #[test]
    fn missing_planned_is_never_delayed() {
        let now = at("2024-05-10", "12:00");
        let unplanned = task(TaskSource::Fms, 1, "a", None, Some("2024-05-09 10:00"), "done");
        assert!(!unplanned.is_delayed(now));
    }

    #[test]
    fn date_without_time_is_midnight() {
        let mut t = task(TaskSource::Checklist, 1, "a", Some("2024-05-10 15:00"), None, "pending");
        t.planned_time = None;
        assert_eq!(t.planned_at(), Some(at("2024-05-10", "00:00")));
    }

    #[test]
    fn completed_status_is_case_insensitive() {
        assert!(task(TaskSource::Fms, 1, "a", None, None, " Done ").is_completed());
        assert!(task(TaskSource::Delegation, 1, "a", None, None, "COMPLETED").is_completed());
        assert!(!task(TaskSource::Delegation, 1, "a", None, None, "shifted").is_completed());
    }
}
