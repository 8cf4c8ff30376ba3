use chrono::{NaiveDate, NaiveTime};
use std::path::PathBuf;
use structopt::StructOpt;

fn parse_day(s: &str) -> Result<NaiveDate, chrono::ParseError> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
}

fn parse_clock(s: &str) -> Result<NaiveTime, chrono::ParseError> {
    NaiveTime::parse_from_str(s, "%H:%M").or_else(|_| NaiveTime::parse_from_str(s, "%H:%M:%S"))
}

/// Filters shared by the dashboard and the task list.
#[derive(Debug, StructOpt)]
pub struct FilterArgs {
    /// Only tasks of this doer (exact name).
    #[structopt(long)]
    pub doer: Option<String>,
    #[structopt(long)]
    pub department: Option<String>,
    /// Planned or actual date on or after this day (YYYY-MM-DD).
    #[structopt(long, parse(try_from_str = parse_day))]
    pub from: Option<NaiveDate>,
    /// Planned or actual date on or before this day (YYYY-MM-DD).
    #[structopt(long, parse(try_from_str = parse_day))]
    pub to: Option<NaiveDate>,
    /// Text to look for in the description or key.
    #[structopt(long)]
    pub search: Option<String>,
    #[structopt(long)]
    pub status: Option<String>,
}

#[derive(Debug, StructOpt)]
pub enum UserCommand {
    /// Add a user. The first user must be an admin.
    Add {
        username: String,
        /// admin, manager, doer or client.
        #[structopt(long)]
        role: String,
        #[structopt(long)]
        name: Option<String>,
        #[structopt(long)]
        department: Option<String>,
        /// Username of the manager whose team this user joins.
        #[structopt(long)]
        manager: Option<String>,
        /// Account whose reports a client user can see.
        #[structopt(long)]
        client_account: Option<String>,
    },
    /// List users.
    List,
}

#[derive(Debug, StructOpt)]
pub enum TaskCommand {
    /// Assign a delegation task.
    Add {
        description: String,
        /// Username of the doer.
        #[structopt(long)]
        doer: String,
        /// Planned day (YYYY-MM-DD).
        #[structopt(long, parse(try_from_str = parse_day))]
        date: NaiveDate,
        /// Planned time (HH:MM).
        #[structopt(long, parse(try_from_str = parse_clock))]
        time: Option<NaiveTime>,
        #[structopt(long)]
        department: Option<String>,
    },
    /// Add a checklist subtask.
    Checklist {
        task_code: String,
        #[structopt(long)]
        assignee: String,
        #[structopt(long, parse(try_from_str = parse_day))]
        date: NaiveDate,
        #[structopt(long, default_value = "")]
        description: String,
        #[structopt(long)]
        department: Option<String>,
    },
    /// Mirror a row of an FMS sheet.
    Fms {
        unique_key: String,
        /// Doer name as written in the sheet.
        #[structopt(long)]
        doer: String,
        #[structopt(long, default_value = "")]
        step: String,
        /// Planned cell, as written in the sheet.
        #[structopt(long)]
        planned: Option<String>,
        /// Actual cell, as written in the sheet.
        #[structopt(long)]
        actual: Option<String>,
        #[structopt(long, default_value = "")]
        status: String,
        #[structopt(long)]
        sheet_id: Option<String>,
        #[structopt(long)]
        sheet_label: Option<String>,
        #[structopt(long)]
        link: Option<String>,
    },
}

#[derive(Debug, StructOpt)]
pub enum NoteCommand {
    /// Write a new note.
    Add {
        title: String,
        #[structopt(long, default_value = "")]
        content: String,
        #[structopt(long)]
        important: bool,
        #[structopt(long, parse(try_from_str = parse_day))]
        reminder: Option<NaiveDate>,
    },
    /// List own and shared notes.
    List {
        #[structopt(long)]
        search: Option<String>,
        #[structopt(long)]
        important: bool,
        /// Only completed notes.
        #[structopt(long)]
        completed: bool,
        /// Include completed notes.
        #[structopt(long)]
        all: bool,
        #[structopt(long, default_value = "1")]
        page: usize,
    },
    /// Show a note with its comments.
    Show { id: i64 },
    /// Replace the title and content of a note.
    Edit {
        id: i64,
        title: String,
        #[structopt(long, default_value = "")]
        content: String,
        #[structopt(long)]
        important: bool,
        #[structopt(long, parse(try_from_str = parse_day))]
        reminder: Option<NaiveDate>,
    },
    /// Flip the important flag.
    Important { id: i64 },
    /// Flip the completed flag.
    Complete { id: i64 },
    Delete { id: i64 },
    /// Share a note with a user (view, comment or edit).
    Share {
        id: i64,
        username: String,
        #[structopt(long, default_value = "view")]
        permission: String,
    },
    Unshare { id: i64, username: String },
    Comment { id: i64, text: String },
}

#[derive(Debug, StructOpt)]
pub enum UrlCommand {
    /// Save a link.
    Add {
        title: String,
        url: String,
        #[structopt(long, default_value = "")]
        description: String,
        #[structopt(long, default_value = "")]
        category: String,
        /// Publish to roles instead of keeping it personal (admins only).
        #[structopt(long)]
        admin: bool,
        /// "all" or a comma separated list of roles.
        #[structopt(long)]
        visible_for: Option<String>,
    },
    List {
        #[structopt(long)]
        category: Option<String>,
        #[structopt(long)]
        search: Option<String>,
        #[structopt(long, default_value = "1")]
        page: usize,
    },
    Share { id: i64, username: String },
    Delete { id: i64 },
}

#[derive(Debug, StructOpt)]
pub enum ReportCommand {
    /// Register a report file for a client account.
    Add {
        title: String,
        #[structopt(parse(from_os_str))]
        file: PathBuf,
        #[structopt(long)]
        client_account: String,
        #[structopt(long, default_value = "")]
        project: String,
    },
    List,
    /// Print a report to stdout.
    View { id: i64 },
    /// Save a report to a file.
    Download {
        id: i64,
        #[structopt(parse(from_os_str), short, long)]
        out: Option<PathBuf>,
    },
}

#[derive(Debug, StructOpt)]
pub enum UpdateCommand {
    /// Post an update to the feed.
    Post {
        title: String,
        #[structopt(long, default_value = "")]
        content: String,
        #[structopt(long)]
        attachment: Option<String>,
        /// Username of the only client who should see it.
        #[structopt(long)]
        client: Option<String>,
    },
    List {
        #[structopt(long)]
        search: Option<String>,
        #[structopt(long, default_value = "1")]
        page: usize,
    },
    Delete { id: i64 },
}

#[derive(Debug, StructOpt)]
pub enum Command {
    /// Create the database tables.
    Init,
    /// Manage users.
    User(UserCommand),
    /// Show the dashboard of the session user.
    Dashboard {
        #[structopt(flatten)]
        filter: FilterArgs,
        /// Number of recent tasks and updates shown.
        #[structopt(long)]
        recent: Option<usize>,
        /// Redraw the dashboard periodically.
        #[structopt(long)]
        watch: bool,
        #[structopt(long, default_value = "10")]
        interval_minutes: u64,
    },
    /// List delegation, checklist and FMS tasks together.
    Tasks {
        #[structopt(flatten)]
        filter: FilterArgs,
        #[structopt(long, default_value = "1")]
        page: usize,
    },
    /// Add delegation, checklist and FMS tasks.
    Task(TaskCommand),
    /// Change the status of a delegation or checklist task.
    Status {
        task_id: i64,
        /// pending, completed, shifted, "not done" or "can not be done".
        status: String,
        /// delegation or checklist.
        #[structopt(long = "type", default_value = "delegation")]
        task_type: String,
    },
    Note(NoteCommand),
    Url(UrlCommand),
    Report(ReportCommand),
    Update(UpdateCommand),
}

#[derive(Debug, StructOpt)]
#[structopt(
    name = "taskdesk",
    about = "Delegated tasks, checklists, FMS steps, notes and reports for a small team."
)]
pub struct CommandLineArgs {
    #[structopt(subcommand)]
    pub action: Command,

    /// Use a different database file.
    #[structopt(parse(from_os_str), short, long)]
    pub db_file: Option<PathBuf>,

    /// Act as this user.
    #[structopt(short, long)]
    pub user: Option<String>,

    /// Answer with a JSON body instead of tables.
    #[structopt(long)]
    pub json: bool,

    #[structopt(long)]
    pub page_size: Option<usize>,
}
