use anyhow::{Context, Result};
use rusqlite::Connection;
use std::path::Path;

/// Get a connection to the database, creating its tables if the file
/// does not exist yet.
pub fn get_db(db_path: &Path) -> Result<Connection> {
    let db_exists = db_path.exists();
    let db = Connection::open(db_path)
        .with_context(|| format!("Failed to open database {}.", db_path.display()))?;
    db.execute_batch("PRAGMA foreign_keys = ON;")
        .context("Failed to enable foreign keys.")?;
    if !db_exists {
        init_db(&db)?;
    }
    Ok(db)
}

/// Initialize every table. Safe to run on an existing database.
pub fn init_db(db: &Connection) -> Result<()> {
    db.execute_batch(
        "CREATE TABLE IF NOT EXISTS users (
                  id              INTEGER PRIMARY KEY AUTOINCREMENT,
                  username        TEXT NOT NULL UNIQUE,
                  display_name    TEXT NOT NULL,
                  role            TEXT NOT NULL,
                  department      TEXT,
                  manager_id      INTEGER REFERENCES users(id),
                  client_account  TEXT
                  );",
    )
    .context("Failed to create users table.")?;

    db.execute_batch(
        "CREATE TABLE IF NOT EXISTS tasks (
                  id              INTEGER PRIMARY KEY AUTOINCREMENT,
                  unique_id       TEXT,
                  description     TEXT NOT NULL,
                  planned_date    TEXT,
                  planned_time    TEXT,
                  actual_date     TEXT,
                  actual_time     TEXT,
                  status          TEXT NOT NULL DEFAULT 'pending',
                  is_delayed      INTEGER NOT NULL DEFAULT 0,
                  delay_duration  TEXT,
                  doer_id         INTEGER NOT NULL REFERENCES users(id),
                  department      TEXT,
                  created_by      INTEGER REFERENCES users(id),
                  created_at      TEXT NOT NULL
                  );
         CREATE INDEX IF NOT EXISTS tasks_doer ON tasks (doer_id);",
    )
    .context("Failed to create tasks table.")?;

    db.execute_batch(
        "CREATE TABLE IF NOT EXISTS checklist_subtasks (
                  id              INTEGER PRIMARY KEY AUTOINCREMENT,
                  task_code       TEXT NOT NULL,
                  description     TEXT NOT NULL DEFAULT '',
                  task_date       TEXT,
                  status          TEXT NOT NULL DEFAULT 'pending',
                  actual_date     TEXT,
                  actual_time     TEXT,
                  assignee_id     INTEGER NOT NULL REFERENCES users(id),
                  department      TEXT
                  );
         CREATE INDEX IF NOT EXISTS checklist_assignee ON checklist_subtasks (assignee_id);",
    )
    .context("Failed to create checklist_subtasks table.")?;

    db.execute_batch(
        "CREATE TABLE IF NOT EXISTS fms_tasks (
                  id              INTEGER PRIMARY KEY AUTOINCREMENT,
                  unique_key      TEXT NOT NULL UNIQUE,
                  step_name       TEXT NOT NULL DEFAULT '',
                  planned         TEXT,
                  actual          TEXT,
                  status          TEXT NOT NULL DEFAULT '',
                  doer_name       TEXT NOT NULL,
                  sheet_id        TEXT,
                  sheet_label     TEXT,
                  task_link       TEXT
                  );",
    )
    .context("Failed to create fms_tasks table.")?;

    db.execute_batch(
        "CREATE TABLE IF NOT EXISTS notes (
                  id              INTEGER PRIMARY KEY AUTOINCREMENT,
                  title           TEXT NOT NULL,
                  content         TEXT NOT NULL DEFAULT '',
                  is_important    INTEGER NOT NULL DEFAULT 0,
                  is_completed    INTEGER NOT NULL DEFAULT 0,
                  reminder_date   TEXT,
                  owner_id        INTEGER NOT NULL REFERENCES users(id),
                  created_at      TEXT NOT NULL,
                  updated_at      TEXT NOT NULL
                  );
         CREATE TABLE IF NOT EXISTS note_shares (
                  note_id         INTEGER NOT NULL REFERENCES notes(id) ON DELETE CASCADE,
                  user_id         INTEGER NOT NULL REFERENCES users(id),
                  permission      TEXT NOT NULL,
                  PRIMARY KEY (note_id, user_id)
                  );
         CREATE TABLE IF NOT EXISTS note_comments (
                  id              INTEGER PRIMARY KEY AUTOINCREMENT,
                  note_id         INTEGER NOT NULL REFERENCES notes(id) ON DELETE CASCADE,
                  author_id       INTEGER NOT NULL REFERENCES users(id),
                  text            TEXT NOT NULL,
                  created_at      TEXT NOT NULL
                  );",
    )
    .context("Failed to create notes tables.")?;

    db.execute_batch(
        "CREATE TABLE IF NOT EXISTS useful_urls (
                  id              INTEGER PRIMARY KEY AUTOINCREMENT,
                  title           TEXT NOT NULL,
                  url             TEXT NOT NULL,
                  description     TEXT NOT NULL DEFAULT '',
                  category        TEXT NOT NULL DEFAULT '',
                  scope           TEXT NOT NULL,
                  visible_for     TEXT NOT NULL DEFAULT 'all',
                  owner_id        INTEGER NOT NULL REFERENCES users(id),
                  created_at      TEXT NOT NULL
                  );
         CREATE TABLE IF NOT EXISTS url_shares (
                  url_id          INTEGER NOT NULL REFERENCES useful_urls(id) ON DELETE CASCADE,
                  user_id         INTEGER NOT NULL REFERENCES users(id),
                  PRIMARY KEY (url_id, user_id)
                  );",
    )
    .context("Failed to create url tables.")?;

    db.execute_batch(
        "CREATE TABLE IF NOT EXISTS reports (
                  id              INTEGER PRIMARY KEY AUTOINCREMENT,
                  title           TEXT NOT NULL,
                  project_name    TEXT NOT NULL DEFAULT '',
                  file_path       TEXT NOT NULL,
                  file_type       TEXT NOT NULL,
                  uploaded_by     INTEGER NOT NULL REFERENCES users(id),
                  client_account  TEXT NOT NULL,
                  created_at      TEXT NOT NULL
                  );
         CREATE TABLE IF NOT EXISTS updates (
                  id              INTEGER PRIMARY KEY AUTOINCREMENT,
                  title           TEXT NOT NULL,
                  content         TEXT NOT NULL DEFAULT '',
                  attachment      TEXT,
                  created_by      INTEGER NOT NULL REFERENCES users(id),
                  target_client_id INTEGER REFERENCES users(id),
                  created_at      TEXT NOT NULL
                  );",
    )
    .context("Failed to create reports and updates tables.")?;

    Ok(())
}

/// Current local time as stored in `created_at` columns.
pub fn now_stamp() -> String {
    chrono::Local::now()
        .naive_local()
        .format("%Y-%m-%d %H:%M:%S")
        .to_string()
}

#[cfg(test)]
pub fn test_db() -> Connection {
    let db = Connection::open_in_memory().expect("in-memory db");
    db.execute_batch("PRAGMA foreign_keys = ON;").expect("pragma");
    init_db(&db).expect("schema");
    db
}
