#[macro_use]
extern crate prettytable;

use structopt::StructOpt;

mod auth;
mod cli;
mod config;
mod dashboard;
mod db;
mod errors;
mod fms_time;
mod interface;
mod listing;
mod logging;
mod metrics;
mod model;
mod notes;
mod reports;
mod response;
mod tasks;
mod updates;
mod urls;

use auth::NewUser;
use cli::{
    Command::*, CommandLineArgs, FilterArgs, NoteCommand, ReportCommand, TaskCommand, UpdateCommand,
    UrlCommand, UserCommand,
};
use config::{Config, Overrides};
use listing::TaskFilter;
use model::{NewChecklistSubtask, NewDelegationTask, NewFmsTask};
use notes::{NoteFilter, NoteInput};
use reports::ReportInput;
use updates::UpdateInput;
use urls::{UrlFilter, UrlInput};

impl From<FilterArgs> for TaskFilter {
    fn from(args: FilterArgs) -> Self {
        TaskFilter {
            doer: args.doer,
            department: args.department,
            from: args.from,
            to: args.to,
            search: args.search,
            status: args.status,
        }
    }
}

fn main() -> anyhow::Result<()> {
    logging::init_tracing();

    // Get the command-line arguments.
    let CommandLineArgs {
        action,
        db_file,
        user,
        json,
        page_size,
    } = CommandLineArgs::from_args();

    let config = Config::resolve(Overrides {
        db_file,
        user,
        page_size,
        json,
    })?;
    tracing::debug!(db = %config.db_path.display(), user = ?config.session_user, "starting");

    let database = db::get_db(&config.db_path)?;
    let db = &database;
    let config = &config;

    // Perform the action.
    match action {
        Init => interface::init(db, config),
        User(command) => match command {
            UserCommand::Add {
                username,
                role,
                name,
                department,
                manager,
                client_account,
            } => match interface::parse_role(&role) {
                Ok(role) => interface::add_user(
                    db,
                    config,
                    NewUser {
                        username,
                        display_name: name,
                        role,
                        department,
                        manager,
                        client_account,
                    },
                ),
                Err(err) => interface::reject(config, err),
            },
            UserCommand::List => interface::list_users(db, config),
        },
        Dashboard {
            filter,
            recent,
            watch,
            interval_minutes,
        } => interface::dashboard(db, config, filter.into(), recent, watch, interval_minutes),
        Tasks { filter, page } => interface::list_tasks(db, config, filter.into(), page),
        Task(command) => match command {
            TaskCommand::Add {
                description,
                doer,
                date,
                time,
                department,
            } => interface::add_task(
                db,
                config,
                NewDelegationTask {
                    description,
                    doer,
                    planned_date: date,
                    planned_time: time,
                    department,
                },
            ),
            TaskCommand::Checklist {
                task_code,
                assignee,
                date,
                description,
                department,
            } => interface::add_checklist(
                db,
                config,
                NewChecklistSubtask {
                    task_code,
                    description,
                    assignee,
                    task_date: date,
                    department,
                },
            ),
            TaskCommand::Fms {
                unique_key,
                doer,
                step,
                planned,
                actual,
                status,
                sheet_id,
                sheet_label,
                link,
            } => interface::upsert_fms(
                db,
                config,
                NewFmsTask {
                    unique_key,
                    step_name: step,
                    planned,
                    actual,
                    status,
                    doer_name: doer,
                    sheet_id,
                    sheet_label,
                    task_link: link,
                },
            ),
        },
        Status {
            task_id,
            status,
            task_type,
        } => interface::update_status(db, config, task_id, status, task_type),
        Note(command) => match command {
            NoteCommand::Add {
                title,
                content,
                important,
                reminder,
            } => interface::add_note(
                db,
                config,
                NoteInput {
                    title,
                    content,
                    is_important: important,
                    reminder_date: reminder,
                },
            ),
            NoteCommand::List {
                search,
                important,
                completed,
                all,
                page,
            } => interface::list_notes(
                db,
                config,
                NoteFilter {
                    search,
                    important_only: important,
                    completed_only: completed,
                    include_completed: all,
                },
                page,
            ),
            NoteCommand::Show { id } => interface::show_note(db, config, id),
            NoteCommand::Edit {
                id,
                title,
                content,
                important,
                reminder,
            } => interface::edit_note(
                db,
                config,
                id,
                NoteInput {
                    title,
                    content,
                    is_important: important,
                    reminder_date: reminder,
                },
            ),
            NoteCommand::Important { id } => interface::toggle_important(db, config, id),
            NoteCommand::Complete { id } => interface::toggle_completed(db, config, id),
            NoteCommand::Delete { id } => interface::delete_note(db, config, id),
            NoteCommand::Share {
                id,
                username,
                permission,
            } => interface::share_note(db, config, id, username, permission),
            NoteCommand::Unshare { id, username } => interface::unshare_note(db, config, id, username),
            NoteCommand::Comment { id, text } => interface::comment_note(db, config, id, text),
        },
        Url(command) => match command {
            UrlCommand::Add {
                title,
                url,
                description,
                category,
                admin,
                visible_for,
            } => interface::add_url(
                db,
                config,
                UrlInput {
                    title,
                    url,
                    description,
                    category,
                    scope: interface::url_scope(admin),
                    visible_for,
                },
            ),
            UrlCommand::List {
                category,
                search,
                page,
            } => interface::list_urls(db, config, UrlFilter { category, search }, page),
            UrlCommand::Share { id, username } => interface::share_url(db, config, id, username),
            UrlCommand::Delete { id } => interface::delete_url(db, config, id),
        },
        Report(command) => match command {
            ReportCommand::Add {
                title,
                file,
                client_account,
                project,
            } => interface::add_report(
                db,
                config,
                ReportInput {
                    title,
                    project_name: project,
                    file,
                    client_account,
                },
            ),
            ReportCommand::List => interface::list_reports(db, config),
            ReportCommand::View { id } => interface::view_report(db, config, id),
            ReportCommand::Download { id, out } => interface::download_report(db, config, id, out),
        },
        Update(command) => match command {
            UpdateCommand::Post {
                title,
                content,
                attachment,
                client,
            } => interface::post_update(
                db,
                config,
                UpdateInput {
                    title,
                    content,
                    attachment,
                    target_client: client,
                },
            ),
            UpdateCommand::List { search, page } => interface::list_updates(db, config, search, page),
            UpdateCommand::Delete { id } => interface::delete_update(db, config, id),
        },
    }?;
    Ok(())
}
