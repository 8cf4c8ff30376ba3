use crate::auth::{require_role, AuthContext, Role};
use crate::errors::AppResult;
use crate::listing::{paginate, sort_tasks, Page, TaskFilter};
use crate::metrics::{stats_by_doer, task_stats, DoerStats, TaskStats};
use crate::model::visible_tasks;
use crate::reports::{list_reports, Report};
use crate::tasks::NormalizedTask;
use crate::updates::{list_updates, Update};
use chrono::NaiveDateTime;
use rusqlite::Connection;
use serde::Serialize;

/// A task row of the dashboard, with its delay computed.
#[derive(Debug, Clone, Serialize)]
pub struct TaskRow {
    #[serde(flatten)]
    pub task: NormalizedTask,
    pub is_completed: bool,
    pub is_delayed: bool,
}

impl TaskRow {
    pub fn new(task: NormalizedTask, now: NaiveDateTime) -> Self {
        TaskRow {
            is_completed: task.is_completed(),
            is_delayed: task.is_delayed(now),
            task,
        }
    }
}

/// Everything a dashboard shows. Sections that do not apply to the
/// requester's role are empty.
#[derive(Debug, Clone, Serialize)]
pub struct Dashboard {
    pub role: Role,
    pub user: String,
    pub stats: TaskStats,
    /// Team performance. Only filled for admins and managers.
    pub team: Vec<DoerStats>,
    pub recent_tasks: Vec<TaskRow>,
    pub recent_updates: Vec<Update>,
    pub reports: Vec<Report>,
}

/// Build the dashboard of the session user.
pub fn dashboard(
    db: &Connection,
    auth: Option<&AuthContext>,
    filter: &TaskFilter,
    recent: usize,
    now: NaiveDateTime,
) -> AppResult<Dashboard> {
    let auth = require_role(auth, &[Role::Admin, Role::Manager, Role::Doer, Role::Client])?;

    let mut tasks = filter.apply(visible_tasks(db, auth)?);
    sort_tasks(&mut tasks);
    let stats = task_stats(&tasks, now);
    let team = if auth.is_admin() || auth.is_manager() {
        stats_by_doer(&tasks, now)
    } else {
        Vec::new()
    };
    let recent_tasks = tasks
        .into_iter()
        .take(recent)
        .map(|task| TaskRow::new(task, now))
        .collect();

    let mut recent_updates = list_updates(db, Some(auth), None)?;
    recent_updates.truncate(recent);

    let reports = if auth.is_client() {
        list_reports(db, Some(auth))?
    } else {
        Vec::new()
    };

    Ok(Dashboard {
        role: auth.role,
        user: auth.display_name.clone(),
        stats,
        team,
        recent_tasks,
        recent_updates,
        reports,
    })
}

/// The merged task list page: visible tasks of all sources, filtered,
/// most recent first and cut to one page.
pub fn task_list(
    db: &Connection,
    auth: Option<&AuthContext>,
    filter: &TaskFilter,
    page: usize,
    per_page: usize,
    now: NaiveDateTime,
) -> AppResult<Page<TaskRow>> {
    let auth = require_role(auth, &[Role::Admin, Role::Manager, Role::Doer])?;
    let mut tasks = filter.apply(visible_tasks(db, auth)?);
    sort_tasks(&mut tasks);
    let rows = tasks.into_iter().map(|task| TaskRow::new(task, now)).collect();
    Ok(paginate(rows, page, per_page))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::fixtures::{login, user};
    use crate::model::fixtures::delegation;
    use crate::model::{upsert_fms_task, NewFmsTask};
    use crate::tasks::fixtures::at;

    #[test]
    fn manager_dashboard_counts_the_team() {
        let db = crate::db::test_db();
        let admin = user(&db, "root", Role::Admin, None);
        user(&db, "mia", Role::Manager, None);
        let alice = user(&db, "alice", Role::Doer, Some("mia"));
        let bob = user(&db, "bob", Role::Doer, None);
        let mia = login(&db, "mia");

        delegation(&db, alice.user_id, ("2024-05-01", "10:00:00"), Some(("2024-05-01", "09:00:00")), "completed");
        delegation(&db, alice.user_id, ("2024-05-01", "10:00:00"), Some(("2024-05-02", "09:00:00")), "completed");
        delegation(&db, alice.user_id, ("2024-05-05", "10:00:00"), None, "pending");
        delegation(&db, bob.user_id, ("2024-05-05", "10:00:00"), None, "pending");
        upsert_fms_task(
            &db,
            Some(&admin),
            &NewFmsTask {
                unique_key: "F-9".to_string(),
                step_name: "Pack".to_string(),
                planned: Some("not a date".to_string()),
                actual: None,
                status: "".to_string(),
                doer_name: "alice".to_string(),
                sheet_id: None,
                sheet_label: None,
                task_link: None,
            },
        )
        .expect("fms");

        let now = at("2024-05-10", "12:00");
        let board = dashboard(&db, Some(&mia), &TaskFilter::default(), 10, now).expect("dashboard");
        assert_eq!(board.stats.total, 4);
        assert_eq!(board.stats.completed, 2);
        assert_eq!(board.stats.delayed, 2);
        assert_eq!(board.stats.completion_rate, "-50.00%");
        assert_eq!(board.team.len(), 1);
        assert_eq!(board.team[0].stats.total, 4);
        assert_eq!(board.recent_tasks.len(), 4);
        assert!(board.reports.is_empty());

        let board = dashboard(&db, Some(&mia), &TaskFilter::default(), 2, now).expect("dashboard");
        assert_eq!(board.recent_tasks.len(), 2);
        assert_eq!(board.stats.total, 4);
    }

    #[test]
    fn three_delegation_tasks_scenario() {
        let db = crate::db::test_db();
        let doer = user(&db, "alice", Role::Doer, None);
        delegation(&db, doer.user_id, ("2024-05-01", "10:00"), Some(("2024-05-01", "09:30")), "completed");
        delegation(&db, doer.user_id, ("2024-05-01", "10:00"), Some(("2024-05-03", "10:00")), "shifted");
        delegation(&db, doer.user_id, ("2024-05-02", "10:00"), None, "pending");

        let board = dashboard(&db, Some(&doer), &TaskFilter::default(), 10, at("2024-05-10", "00:00"))
            .expect("dashboard");
        assert_eq!(board.stats.total, 3);
        assert_eq!(board.stats.completed, 1);
        assert_eq!(board.stats.delayed, 2);
        assert_eq!(board.stats.completion_rate, "-66.67%");
        assert!(board.team.is_empty());
    }

    #[test]
    fn task_list_filters_and_pages() {
        let db = crate::db::test_db();
        let admin = user(&db, "root", Role::Admin, None);
        let alice = user(&db, "alice", Role::Doer, None);
        let bob = user(&db, "bob", Role::Doer, None);
        for day in 1..=12 {
            let date = format!("2024-05-{:02}", day);
            delegation(&db, alice.user_id, (date.as_str(), "10:00"), None, "pending");
        }
        delegation(&db, bob.user_id, ("2024-05-20", "10:00"), None, "pending");

        let filter = TaskFilter {
            doer: Some("alice".to_string()),
            ..TaskFilter::default()
        };
        let now = at("2024-05-06", "00:00");
        let page = task_list(&db, Some(&admin), &filter, 1, 10, now).expect("list");
        assert_eq!(page.total, 12);
        assert_eq!(page.items.len(), 10);
        assert_eq!(page.items[0].task.planned_date.map(|d| d.to_string()), Some("2024-05-12".to_string()));
        assert!(!page.items[0].is_delayed);
        assert!(page.items[9].is_delayed);

        let client = user(&db, "acme", Role::Client, None);
        assert!(matches!(
            task_list(&db, Some(&client), &filter, 1, 10, now),
            Err(crate::errors::AppError::Redirect(ref to)) if to == "client_dashboard"
        ));
    }

    #[test]
    fn anonymous_dashboard_redirects_to_login() {
        let db = crate::db::test_db();
        let err = dashboard(&db, None, &TaskFilter::default(), 10, at("2024-05-10", "00:00")).unwrap_err();
        assert!(matches!(err, crate::errors::AppError::Redirect(ref to) if to == "login"));
    }
}
