use crate::auth::{existing_user, require_login, require_role, AuthContext, Role};
use crate::errors::{AppError, AppResult};
use crate::fms_time::{parse_date, parse_fms_datetime, parse_time};
use crate::tasks::{timestamp, NormalizedTask, TaskSource};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use humantime::format_duration;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Serialize, Serializer};
use std::str::FromStr;
use std::time::Duration as STDDuration;

/// The statuses a delegation or checklist task can be set to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    Completed,
    Shifted,
    NotDone,
    CanNotBeDone,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Completed => "completed",
            TaskStatus::Shifted => "shifted",
            TaskStatus::NotDone => "not done",
            TaskStatus::CanNotBeDone => "can not be done",
        }
    }
}

impl Serialize for TaskStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Ok(TaskStatus::Pending),
            "completed" => Ok(TaskStatus::Completed),
            "shifted" => Ok(TaskStatus::Shifted),
            "not done" => Ok(TaskStatus::NotDone),
            "can not be done" => Ok(TaskStatus::CanNotBeDone),
            _ => Err(AppError::InvalidStatus(s.to_string())),
        }
    }
}

/// The two task kinds whose status can be changed by hand. FMS tasks
/// follow their sheet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    Delegation,
    Checklist,
}

impl FromStr for TaskType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "delegation" => Ok(TaskType::Delegation),
            "checklist" => Ok(TaskType::Checklist),
            _ => Err(AppError::InvalidInput("Invalid task type.".to_string())),
        }
    }
}

/// A manager assigned task, saved in the tasks table.
#[derive(Debug, Clone, Serialize)]
pub struct DelegationTask {
    pub id: i64,
    pub unique_id: Option<String>,
    pub description: String,
    pub planned_date: Option<String>,
    pub planned_time: Option<String>,
    pub actual_date: Option<String>,
    pub actual_time: Option<String>,
    pub status: String,
    pub is_delayed: bool,
    pub delay_duration: Option<String>,
    pub doer_id: i64,
    pub doer_name: String,
    pub department: Option<String>,
}

/// A recurring checklist item. It only has a day, no planned time.
#[derive(Debug, Clone, Serialize)]
pub struct ChecklistSubtask {
    pub id: i64,
    pub task_code: String,
    pub description: String,
    pub task_date: Option<String>,
    pub status: String,
    pub actual_date: Option<String>,
    pub actual_time: Option<String>,
    pub assignee_id: i64,
    pub assignee_name: String,
    pub department: Option<String>,
}

/// A task mirrored from an FMS sheet. Planned and actual are kept as
/// the raw text of the sheet cells.
#[derive(Debug, Clone, Serialize)]
pub struct FmsTask {
    pub id: i64,
    pub unique_key: String,
    pub step_name: String,
    pub planned: Option<String>,
    pub actual: Option<String>,
    pub status: String,
    pub doer_name: String,
    pub sheet_id: Option<String>,
    pub sheet_label: Option<String>,
    pub task_link: Option<String>,
}

impl From<&DelegationTask> for NormalizedTask {
    fn from(task: &DelegationTask) -> Self {
        NormalizedTask {
            source: TaskSource::Delegation,
            id: task.id,
            key: task
                .unique_id
                .clone()
                .unwrap_or_else(|| format!("DT-{}", task.id)),
            description: task.description.clone(),
            doer_name: task.doer_name.clone(),
            department: task.department.clone(),
            planned_date: parse_date(task.planned_date.as_deref()),
            planned_time: parse_time(task.planned_time.as_deref()),
            actual_date: parse_date(task.actual_date.as_deref()),
            actual_time: parse_time(task.actual_time.as_deref()),
            status: task.status.clone(),
            link: None,
        }
    }
}

impl From<&ChecklistSubtask> for NormalizedTask {
    fn from(task: &ChecklistSubtask) -> Self {
        NormalizedTask {
            source: TaskSource::Checklist,
            id: task.id,
            key: task.task_code.clone(),
            description: task.description.clone(),
            doer_name: task.assignee_name.clone(),
            department: task.department.clone(),
            planned_date: parse_date(task.task_date.as_deref()),
            planned_time: None,
            actual_date: parse_date(task.actual_date.as_deref()),
            actual_time: parse_time(task.actual_time.as_deref()),
            status: task.status.clone(),
            link: None,
        }
    }
}

impl From<&FmsTask> for NormalizedTask {
    fn from(task: &FmsTask) -> Self {
        let planned = task.planned.as_deref().and_then(parse_fms_datetime);
        let actual = task.actual.as_deref().and_then(parse_fms_datetime);
        NormalizedTask {
            source: TaskSource::Fms,
            id: task.id,
            key: task.unique_key.clone(),
            description: task.step_name.clone(),
            doer_name: task.doer_name.clone(),
            department: task.sheet_label.clone(),
            planned_date: planned.map(|(date, _)| date),
            planned_time: planned.and_then(|(_, time)| time),
            actual_date: actual.map(|(date, _)| date),
            actual_time: actual.and_then(|(_, time)| time),
            status: task.status.clone(),
            link: task.task_link.clone(),
        }
    }
}

const DELEGATION_COLUMNS: &str = "t.id, t.unique_id, t.description, t.planned_date, t.planned_time, \
     t.actual_date, t.actual_time, t.status, t.is_delayed, t.delay_duration, t.doer_id, \
     u.display_name, t.department";

/// Return a delegation task from a row in the order of `DELEGATION_COLUMNS`.
fn delegation_from_row(row: &Row) -> rusqlite::Result<DelegationTask> {
    Ok(DelegationTask {
        id: row.get(0)?,
        unique_id: row.get(1)?,
        description: row.get(2)?,
        planned_date: row.get(3)?,
        planned_time: row.get(4)?,
        actual_date: row.get(5)?,
        actual_time: row.get(6)?,
        status: row.get(7)?,
        is_delayed: row.get::<_, i64>(8)? != 0,
        delay_duration: row.get(9)?,
        doer_id: row.get(10)?,
        doer_name: row.get(11)?,
        department: row.get(12)?,
    })
}

const CHECKLIST_COLUMNS: &str = "c.id, c.task_code, c.description, c.task_date, c.status, \
     c.actual_date, c.actual_time, c.assignee_id, u.display_name, c.department";

fn checklist_from_row(row: &Row) -> rusqlite::Result<ChecklistSubtask> {
    Ok(ChecklistSubtask {
        id: row.get(0)?,
        task_code: row.get(1)?,
        description: row.get(2)?,
        task_date: row.get(3)?,
        status: row.get(4)?,
        actual_date: row.get(5)?,
        actual_time: row.get(6)?,
        assignee_id: row.get(7)?,
        assignee_name: row.get(8)?,
        department: row.get(9)?,
    })
}

const FMS_COLUMNS: &str = "id, unique_key, step_name, planned, actual, status, doer_name, \
     sheet_id, sheet_label, task_link";

fn fms_from_row(row: &Row) -> rusqlite::Result<FmsTask> {
    Ok(FmsTask {
        id: row.get(0)?,
        unique_key: row.get(1)?,
        step_name: row.get(2)?,
        planned: row.get(3)?,
        actual: row.get(4)?,
        status: row.get(5)?,
        doer_name: row.get(6)?,
        sheet_id: row.get(7)?,
        sheet_label: row.get(8)?,
        task_link: row.get(9)?,
    })
}

/// Get every delegation task.
pub fn delegation_tasks(db: &Connection) -> AppResult<Vec<DelegationTask>> {
    let mut stmt = db.prepare(&format!(
        "SELECT {} FROM tasks t JOIN users u ON u.id = t.doer_id ORDER BY t.id DESC",
        DELEGATION_COLUMNS
    ))?;
    let rows = stmt.query_map([], |row| delegation_from_row(row))?;
    let mut tasks = Vec::new();
    for task in rows {
        tasks.push(task?);
    }
    Ok(tasks)
}

/// Get every checklist subtask.
pub fn checklist_subtasks(db: &Connection) -> AppResult<Vec<ChecklistSubtask>> {
    let mut stmt = db.prepare(&format!(
        "SELECT {} FROM checklist_subtasks c JOIN users u ON u.id = c.assignee_id ORDER BY c.id DESC",
        CHECKLIST_COLUMNS
    ))?;
    let rows = stmt.query_map([], |row| checklist_from_row(row))?;
    let mut tasks = Vec::new();
    for task in rows {
        tasks.push(task?);
    }
    Ok(tasks)
}

/// Get every mirrored FMS task.
pub fn fms_tasks(db: &Connection) -> AppResult<Vec<FmsTask>> {
    let mut stmt = db.prepare(&format!("SELECT {} FROM fms_tasks ORDER BY id DESC", FMS_COLUMNS))?;
    let rows = stmt.query_map([], |row| fms_from_row(row))?;
    let mut tasks = Vec::new();
    for task in rows {
        tasks.push(task?);
    }
    Ok(tasks)
}

pub fn delegation_task(db: &Connection, id: i64) -> AppResult<Option<DelegationTask>> {
    let task = db
        .query_row(
            &format!(
                "SELECT {} FROM tasks t JOIN users u ON u.id = t.doer_id WHERE t.id = ?1",
                DELEGATION_COLUMNS
            ),
            params![id],
            |row| delegation_from_row(row),
        )
        .optional()?;
    Ok(task)
}

pub fn checklist_subtask(db: &Connection, id: i64) -> AppResult<Option<ChecklistSubtask>> {
    let task = db
        .query_row(
            &format!(
                "SELECT {} FROM checklist_subtasks c JOIN users u ON u.id = c.assignee_id WHERE c.id = ?1",
                CHECKLIST_COLUMNS
            ),
            params![id],
            |row| checklist_from_row(row),
        )
        .optional()?;
    Ok(task)
}

/// Collect the tasks of all three sources the requester may see, mapped
/// into their common shape. FMS tasks carry a doer name only, so they are
/// matched against the display names of the visible users.
pub fn visible_tasks(db: &Connection, auth: &AuthContext) -> AppResult<Vec<NormalizedTask>> {
    if auth.is_client() {
        return Ok(Vec::new());
    }

    let mut tasks: Vec<NormalizedTask> = delegation_tasks(db)?
        .iter()
        .filter(|task| auth.can_see_doer(task.doer_id))
        .map(NormalizedTask::from)
        .collect();

    tasks.extend(
        checklist_subtasks(db)?
            .iter()
            .filter(|task| auth.can_see_doer(task.assignee_id))
            .map(NormalizedTask::from),
    );

    let visible_names = visible_doer_names(db, auth)?;
    tasks.extend(
        fms_tasks(db)?
            .iter()
            .filter(|task| {
                auth.is_admin()
                    || visible_names
                        .iter()
                        .any(|name| name.eq_ignore_ascii_case(task.doer_name.trim()))
            })
            .map(NormalizedTask::from),
    );

    tracing::debug!(
        user = %auth.username,
        role = auth.role.as_str(),
        count = tasks.len(),
        "collected visible tasks"
    );
    Ok(tasks)
}

fn visible_doer_names(db: &Connection, auth: &AuthContext) -> AppResult<Vec<String>> {
    let mut names = Vec::new();
    for id in auth.team_ids.iter() {
        if let Some(name) = db
            .query_row("SELECT display_name FROM users WHERE id = ?1", params![id], |row| {
                row.get::<_, String>(0)
            })
            .optional()?
        {
            names.push(name);
        }
    }
    Ok(names)
}

/// Fields for a new delegation task.
#[derive(Debug, Clone)]
pub struct NewDelegationTask {
    pub description: String,
    pub doer: String,
    pub planned_date: NaiveDate,
    pub planned_time: Option<NaiveTime>,
    pub department: Option<String>,
}

/// Assign a delegation task to a doer. Managers can only assign to
/// their own team.
pub fn add_delegation_task(
    db: &Connection,
    auth: Option<&AuthContext>,
    new: &NewDelegationTask,
) -> AppResult<DelegationTask> {
    let auth = require_role(auth, &[Role::Admin, Role::Manager])?;
    if new.description.trim().is_empty() {
        return Err(AppError::InvalidInput("Description is required.".to_string()));
    }
    let doer = existing_user(db, &new.doer)?;
    if !auth.can_see_doer(doer.id) {
        return Err(AppError::Forbidden(format!(
            "{} is not in your team.",
            doer.display_name
        )));
    }

    let department = new.department.clone().or(doer.department);
    // The row and its key are written together.
    let tx = db.unchecked_transaction()?;
    tx.execute(
        "INSERT INTO tasks (description, planned_date, planned_time, status, doer_id, department, created_by, created_at)
         VALUES (?1, ?2, ?3, 'pending', ?4, ?5, ?6, ?7)",
        params![
            new.description.trim(),
            new.planned_date.format("%Y-%m-%d").to_string(),
            new.planned_time.map(|time| time.format("%H:%M:%S").to_string()),
            doer.id,
            department,
            auth.user_id,
            crate::db::now_stamp()
        ],
    )?;
    let id = tx.last_insert_rowid();
    tx.execute(
        "UPDATE tasks SET unique_id = ?1 WHERE id = ?2",
        params![format!("DT-{}", id), id],
    )?;
    tx.commit()?;
    tracing::info!(task_id = id, doer = %doer.username, by = %auth.username, "delegation task added");

    delegation_task(db, id)?.ok_or_else(|| AppError::NotFound("Task".to_string()))
}

/// Fields for a new checklist subtask.
#[derive(Debug, Clone)]
pub struct NewChecklistSubtask {
    pub task_code: String,
    pub description: String,
    pub assignee: String,
    pub task_date: NaiveDate,
    pub department: Option<String>,
}

pub fn add_checklist_subtask(
    db: &Connection,
    auth: Option<&AuthContext>,
    new: &NewChecklistSubtask,
) -> AppResult<ChecklistSubtask> {
    let auth = require_role(auth, &[Role::Admin, Role::Manager])?;
    if new.task_code.trim().is_empty() {
        return Err(AppError::InvalidInput("Task code is required.".to_string()));
    }
    let assignee = existing_user(db, &new.assignee)?;
    if !auth.can_see_doer(assignee.id) {
        return Err(AppError::Forbidden(format!(
            "{} is not in your team.",
            assignee.display_name
        )));
    }

    let department = new.department.clone().or(assignee.department);
    db.execute(
        "INSERT INTO checklist_subtasks (task_code, description, task_date, status, assignee_id, department)
         VALUES (?1, ?2, ?3, 'pending', ?4, ?5)",
        params![
            new.task_code.trim(),
            new.description,
            new.task_date.format("%Y-%m-%d").to_string(),
            assignee.id,
            department
        ],
    )?;
    let id = db.last_insert_rowid();
    tracing::info!(subtask_id = id, assignee = %assignee.username, "checklist subtask added");

    checklist_subtask(db, id)?.ok_or_else(|| AppError::NotFound("Checklist task".to_string()))
}

/// Fields of an FMS row as read from its sheet.
#[derive(Debug, Clone)]
pub struct NewFmsTask {
    pub unique_key: String,
    pub step_name: String,
    pub planned: Option<String>,
    pub actual: Option<String>,
    pub status: String,
    pub doer_name: String,
    pub sheet_id: Option<String>,
    pub sheet_label: Option<String>,
    pub task_link: Option<String>,
}

/// Mirror an FMS row. A row with a known key replaces the stored one.
pub fn upsert_fms_task(
    db: &Connection,
    auth: Option<&AuthContext>,
    new: &NewFmsTask,
) -> AppResult<FmsTask> {
    require_role(auth, &[Role::Admin, Role::Manager])?;
    if new.unique_key.trim().is_empty() {
        return Err(AppError::InvalidInput("Unique key is required.".to_string()));
    }

    db.execute(
        "INSERT INTO fms_tasks (unique_key, step_name, planned, actual, status, doer_name, sheet_id, sheet_label, task_link)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
         ON CONFLICT(unique_key) DO UPDATE SET
             step_name = excluded.step_name,
             planned = excluded.planned,
             actual = excluded.actual,
             status = excluded.status,
             doer_name = excluded.doer_name,
             sheet_id = excluded.sheet_id,
             sheet_label = excluded.sheet_label,
             task_link = excluded.task_link",
        params![
            new.unique_key.trim(),
            new.step_name,
            new.planned,
            new.actual,
            new.status,
            new.doer_name.trim(),
            new.sheet_id,
            new.sheet_label,
            new.task_link
        ],
    )?;

    let task = db.query_row(
        &format!("SELECT {} FROM fms_tasks WHERE unique_key = ?1", FMS_COLUMNS),
        params![new.unique_key.trim()],
        |row| fms_from_row(row),
    )?;
    tracing::info!(unique_key = %task.unique_key, doer = %task.doer_name, "fms task mirrored");
    Ok(task)
}

/// The outcome of a status change.
#[derive(Debug, Clone, Serialize)]
pub struct StatusChange {
    pub task_type: TaskType,
    pub task_id: i64,
    pub status: TaskStatus,
    pub is_delayed: bool,
    pub delay_duration: Option<String>,
}

/// Render how late a task was, truncated to minutes. None when it was
/// not late.
pub fn delay_duration(planned: NaiveDateTime, actual: NaiveDateTime) -> Option<String> {
    let late = actual - planned;
    if late <= chrono::Duration::zero() {
        return None;
    }
    let minutes = late.num_minutes();
    if minutes == 0 {
        return Some("0m".to_string());
    }
    Some(format_duration(STDDuration::from_secs(minutes as u64 * 60)).to_string())
}

/// Change the status of a delegation or checklist task. The status is
/// checked before anything is read or written. Completing a task stamps
/// its actual date and time with `now`; delegation tasks also get their
/// delay written once. Leaving the completed status clears those fields.
pub fn update_status(
    db: &Connection,
    auth: Option<&AuthContext>,
    task_id: i64,
    status: &str,
    task_type: &str,
    now: NaiveDateTime,
) -> AppResult<StatusChange> {
    let status: TaskStatus = status.parse()?;
    let task_type: TaskType = task_type.parse()?;
    let auth = require_login(auth)?;

    let doer_id = match task_type {
        TaskType::Delegation => delegation_task(db, task_id)?.map(|task| task.doer_id),
        TaskType::Checklist => checklist_subtask(db, task_id)?.map(|task| task.assignee_id),
    }
    .ok_or_else(|| AppError::NotFound("Task".to_string()))?;

    if !auth.can_see_doer(doer_id) {
        return Err(AppError::Forbidden(
            "You are not allowed to update this task.".to_string(),
        ));
    }

    let (actual_date, actual_time) = if status == TaskStatus::Completed {
        (
            Some(now.date().format("%Y-%m-%d").to_string()),
            Some(now.time().format("%H:%M:%S").to_string()),
        )
    } else {
        (None, None)
    };

    let mut change = StatusChange {
        task_type,
        task_id,
        status,
        is_delayed: false,
        delay_duration: None,
    };

    match task_type {
        TaskType::Delegation => {
            if status == TaskStatus::Completed {
                let task = delegation_task(db, task_id)?
                    .ok_or_else(|| AppError::NotFound("Task".to_string()))?;
                let planned = timestamp(
                    parse_date(task.planned_date.as_deref()),
                    parse_time(task.planned_time.as_deref()),
                );
                if let Some(planned) = planned {
                    change.is_delayed = now > planned;
                    change.delay_duration = delay_duration(planned, now);
                }
            }
            db.execute(
                "UPDATE tasks SET status = ?1, actual_date = ?2, actual_time = ?3, is_delayed = ?4, delay_duration = ?5
                 WHERE id = ?6",
                params![
                    status.as_str(),
                    actual_date,
                    actual_time,
                    change.is_delayed as i64,
                    change.delay_duration,
                    task_id
                ],
            )?;
        }
        TaskType::Checklist => {
            db.execute(
                "UPDATE checklist_subtasks SET status = ?1, actual_date = ?2, actual_time = ?3 WHERE id = ?4",
                params![status.as_str(), actual_date, actual_time, task_id],
            )?;
        }
    }

    tracing::info!(
        task_id,
        task_type = ?task_type,
        status = status.as_str(),
        is_delayed = change.is_delayed,
        by = %auth.username,
        "task status updated"
    );
    Ok(change)
}

#[cfg(test)]
pub mod fixtures {
    use super::*;

    /// Insert a delegation task with raw column values.
    pub fn delegation(
        db: &Connection,
        doer_id: i64,
        planned: (&str, &str),
        actual: Option<(&str, &str)>,
        status: &str,
    ) -> i64 {
        db.execute(
            "INSERT INTO tasks (description, planned_date, planned_time, actual_date, actual_time, status, doer_id, department, created_at)
             VALUES ('fixture', ?1, ?2, ?3, ?4, ?5, ?6, 'ops', '2024-01-01 00:00:00')",
            params![
                planned.0,
                planned.1,
                actual.map(|a| a.0),
                actual.map(|a| a.1),
                status,
                doer_id
            ],
        )
        .expect("insert task");
        db.last_insert_rowid()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::fixtures::user;
    use crate::db::test_db;
    use crate::tasks::fixtures::at;

    #[test]
    fn bogus_status_is_rejected_without_mutation() {
        let db = test_db();
        let admin = user(&db, "root", Role::Admin, None);
        let doer = user(&db, "alice", Role::Doer, None);
        let id = fixtures::delegation(&db, doer.user_id, ("2024-05-01", "10:00:00"), None, "pending");

        let err = update_status(&db, Some(&admin), id, "bogus", "delegation", at("2024-05-02", "09:00"))
            .unwrap_err();
        assert_eq!(err.user_message(), "Invalid status selected.");

        let task = delegation_task(&db, id).expect("load").expect("exists");
        assert_eq!(task.status, "pending");
        assert_eq!(task.actual_date, None);
    }

    #[test]
    fn bogus_status_is_rejected_before_the_session_is_checked() {
        let db = test_db();
        let err = update_status(&db, None, 1, "bogus", "checklist", at("2024-05-02", "09:00")).unwrap_err();
        assert!(matches!(err, AppError::InvalidStatus(_)));
    }

    #[test]
    fn completing_late_writes_delay_once() {
        let db = test_db();
        let doer = user(&db, "alice", Role::Doer, None);
        let id = fixtures::delegation(&db, doer.user_id, ("2024-05-01", "10:00:00"), None, "pending");

        let change = update_status(&db, Some(&doer), id, "Completed", "delegation", at("2024-05-02", "12:30"))
            .expect("update");
        assert!(change.is_delayed);
        assert_eq!(change.delay_duration.as_deref(), Some("1day 2h 30m"));

        let task = delegation_task(&db, id).expect("load").expect("exists");
        assert_eq!(task.status, "completed");
        assert!(task.is_delayed);
        assert_eq!(task.actual_date.as_deref(), Some("2024-05-02"));
        assert_eq!(task.actual_time.as_deref(), Some("12:30:00"));

        update_status(&db, Some(&doer), id, "pending", "delegation", at("2024-05-03", "08:00"))
            .expect("reopen");
        let task = delegation_task(&db, id).expect("load").expect("exists");
        assert!(!task.is_delayed);
        assert_eq!(task.actual_date, None);
        assert_eq!(task.delay_duration, None);
    }

    #[test]
    fn completing_on_time_is_not_delayed() {
        let db = test_db();
        let doer = user(&db, "alice", Role::Doer, None);
        let id = fixtures::delegation(&db, doer.user_id, ("2024-05-01", "10:00:00"), None, "pending");
        let change = update_status(&db, Some(&doer), id, "completed", "delegation", at("2024-05-01", "09:00"))
            .expect("update");
        assert!(!change.is_delayed);
        assert_eq!(change.delay_duration, None);
    }

    #[test]
    fn doers_cannot_touch_other_tasks() {
        let db = test_db();
        let alice = user(&db, "alice", Role::Doer, None);
        let bob = user(&db, "bob", Role::Doer, None);
        let id = fixtures::delegation(&db, alice.user_id, ("2024-05-01", "10:00:00"), None, "pending");
        let err = update_status(&db, Some(&bob), id, "completed", "delegation", at("2024-05-01", "09:00"))
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
    }

    #[test]
    fn checklist_status_stamps_actual() {
        let db = test_db();
        let admin = user(&db, "root", Role::Admin, None);
        user(&db, "alice", Role::Doer, None);
        let subtask = add_checklist_subtask(
            &db,
            Some(&admin),
            &NewChecklistSubtask {
                task_code: "CL-7".to_string(),
                description: "Check stock".to_string(),
                assignee: "alice".to_string(),
                task_date: NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
                department: None,
            },
        )
        .expect("add");
        update_status(&db, Some(&admin), subtask.id, "completed", "checklist", at("2024-05-01", "17:45"))
            .expect("update");
        let subtask = checklist_subtask(&db, subtask.id).expect("load").expect("exists");
        assert_eq!(subtask.status, "completed");
        assert_eq!(subtask.actual_time.as_deref(), Some("17:45:00"));
        assert_eq!(subtask.department.as_deref(), Some("ops"));

        // Checklist days have no time, so the deadline is midnight of the
        // day and completing later that same day counts as late.
        let normalized = NormalizedTask::from(&subtask);
        assert_eq!(normalized.planned_at(), Some(at("2024-05-01", "00:00")));
        assert!(normalized.is_completed());
        assert!(normalized.is_delayed(at("2024-05-02", "00:00")));
    }

    #[test]
    fn managers_assign_only_to_their_team() {
        let db = test_db();
        user(&db, "root", Role::Admin, None);
        user(&db, "mia", Role::Manager, None);
        user(&db, "alice", Role::Doer, Some("mia"));
        user(&db, "bob", Role::Doer, None);
        let mia = crate::auth::fixtures::login(&db, "mia");

        let mut new = NewDelegationTask {
            description: "Prepare invoice".to_string(),
            doer: "alice".to_string(),
            planned_date: NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
            planned_time: NaiveTime::from_hms_opt(10, 0, 0),
            department: None,
        };
        let task = add_delegation_task(&db, Some(&mia), &new).expect("assign to team");
        assert_eq!(task.unique_id, Some(format!("DT-{}", task.id)));
        assert_eq!(task.planned_time.as_deref(), Some("10:00:00"));

        new.doer = "bob".to_string();
        assert!(matches!(
            add_delegation_task(&db, Some(&mia), &new),
            Err(AppError::Forbidden(_))
        ));
    }

    #[test]
    fn failed_key_write_leaves_no_task() {
        let db = test_db();
        let admin = user(&db, "root", Role::Admin, None);
        user(&db, "alice", Role::Doer, None);
        db.execute_batch(
            "CREATE TRIGGER reject_keys BEFORE UPDATE OF unique_id ON tasks
             BEGIN SELECT RAISE(ABORT, 'keys are frozen'); END;",
        )
        .expect("trigger");

        let new = NewDelegationTask {
            description: "Prepare invoice".to_string(),
            doer: "alice".to_string(),
            planned_date: NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
            planned_time: None,
            department: None,
        };
        let err = add_delegation_task(&db, Some(&admin), &new).unwrap_err();
        assert!(matches!(err, AppError::Database(_)));
        assert!(delegation_tasks(&db).expect("list").is_empty());
    }

    #[test]
    fn fms_rows_are_replaced_by_key() {
        let db = test_db();
        let admin = user(&db, "root", Role::Admin, None);
        let mut row = NewFmsTask {
            unique_key: "FMS-1".to_string(),
            step_name: "Dispatch".to_string(),
            planned: Some("05/03/2024 10:00".to_string()),
            actual: None,
            status: "".to_string(),
            doer_name: "Alice".to_string(),
            sheet_id: None,
            sheet_label: Some("Orders".to_string()),
            task_link: None,
        };
        upsert_fms_task(&db, Some(&admin), &row).expect("insert");
        row.actual = Some("05/03/2024 11:00".to_string());
        row.status = "Done".to_string();
        let stored = upsert_fms_task(&db, Some(&admin), &row).expect("update");

        assert_eq!(fms_tasks(&db).expect("list").len(), 1);
        let normalized = NormalizedTask::from(&stored);
        assert!(normalized.is_completed());
        assert!(normalized.is_delayed(at("2024-06-01", "00:00")));
    }

    #[test]
    fn visibility_follows_roles() {
        let db = test_db();
        let admin = user(&db, "root", Role::Admin, None);
        user(&db, "mia", Role::Manager, None);
        let alice = user(&db, "alice", Role::Doer, Some("mia"));
        let bob = user(&db, "bob", Role::Doer, None);
        let client = user(&db, "acme", Role::Client, None);
        let mia = crate::auth::fixtures::login(&db, "mia");

        fixtures::delegation(&db, alice.user_id, ("2024-05-01", "10:00"), None, "pending");
        fixtures::delegation(&db, bob.user_id, ("2024-05-01", "10:00"), None, "pending");
        let fms = |key: &str, doer: &str| NewFmsTask {
            unique_key: key.to_string(),
            step_name: "Step".to_string(),
            planned: None,
            actual: None,
            status: "".to_string(),
            doer_name: doer.to_string(),
            sheet_id: None,
            sheet_label: None,
            task_link: None,
        };
        upsert_fms_task(&db, Some(&admin), &fms("F1", "alice")).expect("fms");
        upsert_fms_task(&db, Some(&admin), &fms("F2", "bob")).expect("fms");

        assert_eq!(visible_tasks(&db, &admin).expect("admin").len(), 4);
        assert_eq!(visible_tasks(&db, &mia).expect("manager").len(), 2);
        assert_eq!(visible_tasks(&db, &bob).expect("doer").len(), 2);
        assert!(visible_tasks(&db, &client).expect("client").is_empty());
    }
}
