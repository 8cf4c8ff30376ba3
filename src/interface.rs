use crate::auth::{self, require_login, AuthContext, NewUser, Role, User};
use crate::config::Config;
use crate::dashboard::{self, Dashboard, TaskRow};
use crate::errors::{AppError, AppResult};
use crate::listing::{paginate, Page, TaskFilter};
use crate::metrics::{DoerStats, TaskStats};
use crate::model::{self, NewChecklistSubtask, NewDelegationTask, NewFmsTask, StatusChange};
use crate::notes::{self, Access, Note, NoteDetail, NoteFilter, NoteInput, NoteView};
use crate::reports::{self, Disposition, Report, ReportInput};
use crate::response::Envelope;
use crate::updates::{self, Update, UpdateInput};
use crate::urls::{self, UrlFilter, UrlInput, UrlScope, UsefulUrl};
use anyhow::Context;
use chrono::{Local, NaiveDate, NaiveDateTime, NaiveTime};
use prettytable::Table;
use rusqlite::Connection;
use serde::Serialize;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration as STDDuration;

const CELL_WIDTH: usize = 40;

fn now() -> NaiveDateTime {
    Local::now().naive_local()
}

fn wrap(text: &str) -> String {
    textwrap::fill(text, CELL_WIDTH)
}

fn fmt_when(date: Option<NaiveDate>, time: Option<NaiveTime>) -> String {
    match (date, time) {
        (Some(date), Some(time)) => format!("{} {}", date, time.format("%H:%M")),
        (Some(date), None) => date.to_string(),
        (None, _) => "-".to_string(),
    }
}

fn fmt_flag(flag: bool) -> &'static str {
    if flag {
        "yes"
    } else {
        ""
    }
}

/// Run an operation as the session user.
fn as_session<T, F>(db: &Connection, config: &Config, op: F) -> AppResult<T>
where
    F: FnOnce(Option<&AuthContext>) -> AppResult<T>,
{
    let auth = auth::session(db, config.session_user.as_deref())?;
    op(auth.as_ref())
}

fn report_error(err: &AppError) {
    err.log();
    match err {
        AppError::Redirect(target) => {
            eprintln!("Not allowed here. Continue from: {}", target.replace('_', " "))
        }
        other => eprintln!("Error: {}", other.user_message()),
    }
}

/// Print the outcome of an operation, either as a JSON envelope or
/// through `render`. Failures never change the exit status.
fn respond<T, F>(config: &Config, result: AppResult<T>, message: Option<&str>, render: F) -> anyhow::Result<()>
where
    T: Serialize,
    F: FnOnce(&T),
{
    if config.json {
        let envelope = Envelope::from_result(&result, message);
        println!("{}", serde_json::to_string_pretty(&envelope)?);
        return Ok(());
    }
    match result {
        Ok(data) => {
            render(&data);
            if let Some(message) = message {
                println!("{}", message);
            }
        }
        Err(err) => report_error(&err),
    }
    Ok(())
}

/// Answer with an error raised before any operation ran.
pub fn reject(config: &Config, err: AppError) -> anyhow::Result<()> {
    respond::<(), _>(config, Err(err), None, |_| {})
}

fn print_page_footer<T>(page: &Page<T>) {
    if page.total_pages > 1 {
        println!("Page {} of {} ({} in total).", page.page, page.total_pages, page.total);
    }
}

pub fn init(db: &Connection, config: &Config) -> anyhow::Result<()> {
    crate::db::init_db(db)?;
    println!("Database ready at {}.", config.db_path.display());
    Ok(())
}

// USERS

pub fn add_user(db: &Connection, config: &Config, new: NewUser) -> anyhow::Result<()> {
    let result = as_session(db, config, |auth| auth::add_user(db, auth, &new));
    respond(config, result, Some("User added successfully."), |user| {
        user_table(std::slice::from_ref(user)).printstd()
    })
}

pub fn list_users(db: &Connection, config: &Config) -> anyhow::Result<()> {
    let result = as_session(db, config, |auth| {
        require_login(auth)?;
        auth::users(db)
    });
    respond(config, result, None, |users| user_table(users).printstd())
}

fn user_table(users: &[User]) -> Table {
    let mut table = Table::new();
    table.add_row(row!["id", "username", "name", "role", "department", "manager", "client account"]);
    for user in users {
        let manager = user.manager_id.map(|id| id.to_string()).unwrap_or_default();
        table.add_row(row![
            user.id,
            user.username,
            user.display_name,
            user.role,
            user.department.as_deref().unwrap_or(""),
            manager,
            user.client_account.as_deref().unwrap_or("")
        ]);
    }
    table
}

pub fn parse_role(role: &str) -> AppResult<Role> {
    role.parse::<Role>().map_err(AppError::InvalidInput)
}

// DASHBOARD AND TASKS

fn stats_table(stats: &TaskStats) -> Table {
    let mut table = Table::new();
    table.add_row(row!["total", "completed", "pending", "delayed", "completion rate"]);
    table.add_row(row![
        stats.total,
        stats.completed,
        stats.pending,
        stats.delayed,
        stats.completion_rate
    ]);
    table
}

fn team_table(team: &[DoerStats]) -> Table {
    let mut table = Table::new();
    table.add_row(row!["doer", "total", "completed", "pending", "delayed", "completion rate"]);
    for doer in team {
        table.add_row(row![
            doer.doer_name,
            doer.stats.total,
            doer.stats.completed,
            doer.stats.pending,
            doer.stats.delayed,
            doer.stats.completion_rate
        ]);
    }
    table
}

fn task_table(rows: &[TaskRow]) -> Table {
    let mut table = Table::new();
    table.add_row(row!["source", "id", "key", "task", "doer", "planned", "actual", "status", "delayed"]);
    for row in rows {
        let task = &row.task;
        let planned = fmt_when(task.planned_date, task.planned_time);
        let actual = fmt_when(task.actual_date, task.actual_time);
        let delayed = fmt_flag(row.is_delayed);
        table.add_row(row![
            task.source.as_str(),
            task.id,
            task.key,
            wrap(&task.description),
            task.doer_name,
            planned,
            actual,
            task.status,
            delayed
        ]);
    }
    table
}

fn render_dashboard(board: &Dashboard) {
    println!("{} ({})", board.user, board.role);
    stats_table(&board.stats).printstd();
    if !board.team.is_empty() {
        println!("Team performance");
        team_table(&board.team).printstd();
    }
    if !board.recent_tasks.is_empty() {
        println!("Recent tasks");
        task_table(&board.recent_tasks).printstd();
    }
    if !board.recent_updates.is_empty() {
        println!("Updates");
        update_table(&board.recent_updates).printstd();
    }
    if !board.reports.is_empty() {
        println!("Reports");
        report_table(&board.reports).printstd();
    }
}

pub fn dashboard(
    db: &Connection,
    config: &Config,
    filter: TaskFilter,
    recent: Option<usize>,
    watch: bool,
    interval_minutes: u64,
) -> anyhow::Result<()> {
    let recent = recent.unwrap_or(config.page_size);
    let interval = STDDuration::from_secs(interval_minutes.max(1).saturating_mul(60));
    loop {
        let result = as_session(db, config, |auth| {
            dashboard::dashboard(db, auth, &filter, recent, now())
        });
        let failed = result.is_err();
        respond(config, result, None, render_dashboard)?;
        if !watch || failed {
            return Ok(());
        }
        tracing::debug!(interval_minutes, "waiting for the next dashboard refresh");
        std::thread::sleep(interval);
    }
}

pub fn list_tasks(db: &Connection, config: &Config, filter: TaskFilter, page: usize) -> anyhow::Result<()> {
    let result = as_session(db, config, |auth| {
        dashboard::task_list(db, auth, &filter, page, config.page_size, now())
    });
    respond(config, result, None, |page| {
        task_table(&page.items).printstd();
        print_page_footer(page);
    })
}

pub fn add_task(db: &Connection, config: &Config, new: NewDelegationTask) -> anyhow::Result<()> {
    let result = as_session(db, config, |auth| model::add_delegation_task(db, auth, &new));
    respond(config, result, Some("Task assigned successfully."), |task| {
        println!("{} assigned to {}.", task.unique_id.as_deref().unwrap_or("-"), task.doer_name)
    })
}

pub fn add_checklist(db: &Connection, config: &Config, new: NewChecklistSubtask) -> anyhow::Result<()> {
    let result = as_session(db, config, |auth| model::add_checklist_subtask(db, auth, &new));
    respond(config, result, Some("Checklist task added successfully."), |task| {
        println!("{} #{} assigned to {}.", task.task_code, task.id, task.assignee_name)
    })
}

pub fn upsert_fms(db: &Connection, config: &Config, new: NewFmsTask) -> anyhow::Result<()> {
    let result = as_session(db, config, |auth| model::upsert_fms_task(db, auth, &new));
    respond(config, result, Some("FMS task saved."), |task| {
        println!("{} ({}) for {}.", task.unique_key, task.step_name, task.doer_name)
    })
}

pub fn update_status(
    db: &Connection,
    config: &Config,
    task_id: i64,
    status: String,
    task_type: String,
) -> anyhow::Result<()> {
    let result = as_session(db, config, |auth| {
        model::update_status(db, auth, task_id, &status, &task_type, now())
    });
    respond(config, result, Some("Status updated successfully."), |change: &StatusChange| {
        println!("Task {} is now {}.", change.task_id, change.status.as_str());
        if let Some(delay) = &change.delay_duration {
            println!("Completed late by {}.", delay);
        }
    })
}

// NOTES

fn access_label(access: Access) -> String {
    match access {
        Access::Owner => "owner".to_string(),
        Access::Shared(permission) => format!("shared ({})", permission.as_str()),
    }
}

fn note_table(notes: &[NoteView]) -> Table {
    let mut table = Table::new();
    table.add_row(row!["id", "title", "owner", "access", "important", "done", "reminder", "updated"]);
    for view in notes {
        let note = &view.note;
        table.add_row(row![
            note.id,
            wrap(&note.title),
            note.owner_name,
            access_label(view.access),
            fmt_flag(note.is_important),
            fmt_flag(note.is_completed),
            note.reminder_date.as_deref().unwrap_or(""),
            note.updated_at
        ]);
    }
    table
}

fn print_note(note: &Note) {
    println!("#{} {}", note.id, note.title);
    if !note.content.is_empty() {
        println!("{}", textwrap::fill(&note.content, 72));
    }
}

pub fn add_note(db: &Connection, config: &Config, input: NoteInput) -> anyhow::Result<()> {
    let result = as_session(db, config, |auth| notes::create_note(db, auth, &input));
    respond(config, result, Some("Note created successfully."), print_note)
}

pub fn list_notes(db: &Connection, config: &Config, filter: NoteFilter, page: usize) -> anyhow::Result<()> {
    let result = as_session(db, config, |auth| notes::list_notes(db, auth, &filter))
        .map(|notes| paginate(notes, page, config.page_size));
    respond(config, result, None, |page| {
        note_table(&page.items).printstd();
        print_page_footer(page);
    })
}

pub fn show_note(db: &Connection, config: &Config, note_id: i64) -> anyhow::Result<()> {
    let result = as_session(db, config, |auth| notes::show_note(db, auth, note_id));
    respond(config, result, None, |detail: &NoteDetail| {
        print_note(&detail.view.note);
        println!(
            "by {} ({}), updated {}",
            detail.view.note.owner_name,
            access_label(detail.view.access),
            detail.view.note.updated_at
        );
        if !detail.shares.is_empty() {
            let mut table = Table::new();
            table.add_row(row!["shared with", "permission"]);
            for share in &detail.shares {
                table.add_row(row![share.username, share.permission.as_str()]);
            }
            table.printstd();
        }
        for comment in &detail.comments {
            println!("[{}] {}: {}", comment.created_at, comment.author_name, comment.text);
        }
    })
}

pub fn edit_note(db: &Connection, config: &Config, note_id: i64, input: NoteInput) -> anyhow::Result<()> {
    let result = as_session(db, config, |auth| notes::edit_note(db, auth, note_id, &input));
    respond(config, result, Some("Note updated successfully."), print_note)
}

pub fn toggle_important(db: &Connection, config: &Config, note_id: i64) -> anyhow::Result<()> {
    let result = as_session(db, config, |auth| notes::toggle_important(db, auth, note_id));
    respond(config, result, None, |note| {
        println!("Note {} important: {}.", note.id, note.is_important)
    })
}

pub fn toggle_completed(db: &Connection, config: &Config, note_id: i64) -> anyhow::Result<()> {
    let result = as_session(db, config, |auth| notes::toggle_completed(db, auth, note_id));
    respond(config, result, None, |note| {
        println!("Note {} completed: {}.", note.id, note.is_completed)
    })
}

pub fn delete_note(db: &Connection, config: &Config, note_id: i64) -> anyhow::Result<()> {
    let result = as_session(db, config, |auth| notes::delete_note(db, auth, note_id));
    respond(config, result, Some("Note deleted successfully."), |_| {})
}

pub fn share_note(
    db: &Connection,
    config: &Config,
    note_id: i64,
    username: String,
    permission: String,
) -> anyhow::Result<()> {
    let result = as_session(db, config, |auth| {
        let permission = permission.parse()?;
        notes::share_note(db, auth, note_id, &username, permission)
    });
    respond(config, result, Some("Note shared successfully."), |_| {})
}

pub fn unshare_note(db: &Connection, config: &Config, note_id: i64, username: String) -> anyhow::Result<()> {
    let result = as_session(db, config, |auth| notes::unshare_note(db, auth, note_id, &username));
    respond(config, result, Some("Share removed."), |_| {})
}

pub fn comment_note(db: &Connection, config: &Config, note_id: i64, text: String) -> anyhow::Result<()> {
    let result = as_session(db, config, |auth| notes::add_comment(db, auth, note_id, &text));
    respond(config, result, Some("Comment added."), |_| {})
}

// URLS

fn url_table(links: &[UsefulUrl]) -> Table {
    let mut table = Table::new();
    table.add_row(row!["id", "title", "url", "category", "scope", "owner"]);
    for link in links {
        table.add_row(row![
            link.id,
            wrap(&link.title),
            link.url,
            link.category,
            link.scope.as_str(),
            link.owner_name
        ]);
    }
    table
}

pub fn add_url(db: &Connection, config: &Config, input: UrlInput) -> anyhow::Result<()> {
    let result = as_session(db, config, |auth| urls::add_url(db, auth, &input));
    respond(config, result, Some("URL added successfully."), |link| {
        url_table(std::slice::from_ref(link)).printstd()
    })
}

/// Links on one page together with every category of the listing, so the
/// category filter can be offered.
#[derive(Debug, Serialize)]
struct UrlListing {
    categories: Vec<String>,
    #[serde(flatten)]
    page: Page<UsefulUrl>,
}

pub fn list_urls(db: &Connection, config: &Config, filter: UrlFilter, page: usize) -> anyhow::Result<()> {
    let result = as_session(db, config, |auth| {
        let all = urls::list_urls(db, auth, &UrlFilter::default())?;
        let matching = urls::list_urls(db, auth, &filter)?;
        Ok(UrlListing {
            categories: urls::categories(&all),
            page: paginate(matching, page, config.page_size),
        })
    });
    respond(config, result, None, |listing| {
        url_table(&listing.page.items).printstd();
        print_page_footer(&listing.page);
        if !listing.categories.is_empty() {
            println!("Categories: {}", listing.categories.join(", "));
        }
    })
}

pub fn share_url(db: &Connection, config: &Config, url_id: i64, username: String) -> anyhow::Result<()> {
    let result = as_session(db, config, |auth| urls::share_url(db, auth, url_id, &username));
    respond(config, result, Some("URL shared successfully."), |_| {})
}

pub fn delete_url(db: &Connection, config: &Config, url_id: i64) -> anyhow::Result<()> {
    let result = as_session(db, config, |auth| urls::delete_url(db, auth, url_id));
    respond(config, result, Some("URL deleted successfully."), |_| {})
}

pub fn url_scope(admin: bool) -> UrlScope {
    if admin {
        UrlScope::Admin
    } else {
        UrlScope::Personal
    }
}

// REPORTS

fn report_table(reports: &[Report]) -> Table {
    let mut table = Table::new();
    table.add_row(row!["id", "title", "project", "type", "client account", "uploaded by", "uploaded at"]);
    for report in reports {
        table.add_row(row![
            report.id,
            wrap(&report.title),
            report.project_name,
            report.file_type,
            report.client_account,
            report.uploader_name,
            report.created_at
        ]);
    }
    table
}

pub fn add_report(db: &Connection, config: &Config, input: ReportInput) -> anyhow::Result<()> {
    let result = as_session(db, config, |auth| reports::add_report(db, auth, &input));
    respond(config, result, Some("Report uploaded successfully."), |report| {
        report_table(std::slice::from_ref(report)).printstd()
    })
}

pub fn list_reports(db: &Connection, config: &Config) -> anyhow::Result<()> {
    let result = as_session(db, config, |auth| reports::list_reports(db, auth));
    respond(config, result, None, |reports| report_table(reports).printstd())
}

/// What is said about a served report file.
#[derive(Debug, Serialize)]
struct ServedReport {
    file_name: String,
    mime_type: &'static str,
    disposition: Disposition,
    size: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    saved_to: Option<PathBuf>,
}

pub fn view_report(db: &Connection, config: &Config, report_id: i64) -> anyhow::Result<()> {
    let result = as_session(db, config, |auth| {
        reports::open_report(db, auth, report_id, Disposition::Inline)
    });
    if config.json {
        let result = result.map(|content| ServedReport {
            size: content.bytes.len(),
            file_name: content.file_name,
            mime_type: content.mime_type,
            disposition: content.disposition,
            saved_to: None,
        });
        return respond(config, result, None, |_| {});
    }
    match result {
        Ok(content) => {
            let mut stdout = std::io::stdout();
            stdout.write_all(&content.bytes)?;
            stdout.flush()?;
        }
        Err(err) => report_error(&err),
    }
    Ok(())
}

pub fn download_report(
    db: &Connection,
    config: &Config,
    report_id: i64,
    out: Option<PathBuf>,
) -> anyhow::Result<()> {
    let result = as_session(db, config, |auth| {
        reports::open_report(db, auth, report_id, Disposition::Attachment)
    });
    let served = match result {
        Ok(content) => {
            let target = out.unwrap_or_else(|| PathBuf::from(&content.file_name));
            std::fs::write(&target, &content.bytes)
                .with_context(|| format!("Failed to write {}.", target.display()))?;
            Ok(ServedReport {
                size: content.bytes.len(),
                file_name: content.file_name,
                mime_type: content.mime_type,
                disposition: content.disposition,
                saved_to: Some(target),
            })
        }
        Err(err) => Err(err),
    };
    respond(config, served, None, |served| {
        if let Some(path) = &served.saved_to {
            println!("Saved {} ({} bytes) to {}.", served.file_name, served.size, path.display());
        }
    })
}

// UPDATES

fn update_table(updates: &[Update]) -> Table {
    let mut table = Table::new();
    table.add_row(row!["id", "title", "content", "by", "posted at"]);
    for update in updates {
        table.add_row(row![
            update.id,
            wrap(&update.title),
            wrap(&update.content),
            update.author_name,
            update.created_at
        ]);
    }
    table
}

pub fn post_update(db: &Connection, config: &Config, input: UpdateInput) -> anyhow::Result<()> {
    let result = as_session(db, config, |auth| updates::post_update(db, auth, &input));
    respond(config, result, Some("Update posted successfully."), |update| {
        update_table(std::slice::from_ref(update)).printstd()
    })
}

pub fn list_updates(
    db: &Connection,
    config: &Config,
    search: Option<String>,
    page: usize,
) -> anyhow::Result<()> {
    let result = as_session(db, config, |auth| updates::list_updates(db, auth, search.as_deref()))
        .map(|updates| paginate(updates, page, config.page_size));
    respond(config, result, None, |page| {
        update_table(&page.items).printstd();
        print_page_footer(page);
    })
}

pub fn delete_update(db: &Connection, config: &Config, update_id: i64) -> anyhow::Result<()> {
    let result = as_session(db, config, |auth| updates::delete_update(db, auth, update_id));
    respond(config, result, Some("Update deleted successfully."), |_| {})
}
