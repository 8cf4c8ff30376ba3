use crate::auth::{existing_user, require_login, require_role, AuthContext, Role};
use crate::db::now_stamp;
use crate::errors::{AppError, AppResult};
use crate::listing::contains_text;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;

/// An entry of the updates feed.
#[derive(Debug, Clone, Serialize)]
pub struct Update {
    pub id: i64,
    pub title: String,
    pub content: String,
    pub attachment: Option<String>,
    pub created_by: i64,
    pub author_name: String,
    /// Set when the update is addressed to a single client.
    pub target_client_id: Option<i64>,
    pub created_at: String,
}

const UPDATE_COLUMNS: &str = "p.id, p.title, p.content, p.attachment, p.created_by, \
     u.display_name, p.target_client_id, p.created_at";

fn update_from_row(row: &Row) -> rusqlite::Result<Update> {
    Ok(Update {
        id: row.get(0)?,
        title: row.get(1)?,
        content: row.get(2)?,
        attachment: row.get(3)?,
        created_by: row.get(4)?,
        author_name: row.get(5)?,
        target_client_id: row.get(6)?,
        created_at: row.get(7)?,
    })
}

fn update_by_id(db: &Connection, id: i64) -> AppResult<Option<Update>> {
    let update = db
        .query_row(
            &format!(
                "SELECT {} FROM updates p JOIN users u ON u.id = p.created_by WHERE p.id = ?1",
                UPDATE_COLUMNS
            ),
            params![id],
            |row| update_from_row(row),
        )
        .optional()?;
    Ok(update)
}

#[derive(Debug, Clone)]
pub struct UpdateInput {
    pub title: String,
    pub content: String,
    pub attachment: Option<String>,
    /// Username of the client the update is for.
    pub target_client: Option<String>,
}

pub fn post_update(db: &Connection, auth: Option<&AuthContext>, input: &UpdateInput) -> AppResult<Update> {
    let auth = require_role(auth, &[Role::Admin, Role::Manager])?;
    if input.title.trim().is_empty() {
        return Err(AppError::InvalidInput("Title is required.".to_string()));
    }
    let target_client_id = match &input.target_client {
        Some(username) => {
            let client = existing_user(db, username)?;
            if client.role != Role::Client {
                return Err(AppError::InvalidInput(format!("'{}' is not a client.", username)));
            }
            Some(client.id)
        }
        None => None,
    };

    db.execute(
        "INSERT INTO updates (title, content, attachment, created_by, target_client_id, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            input.title.trim(),
            input.content,
            input.attachment,
            auth.user_id,
            target_client_id,
            now_stamp()
        ],
    )?;
    let id = db.last_insert_rowid();
    tracing::info!(update_id = id, by = %auth.username, targeted = target_client_id.is_some(), "update posted");
    update_by_id(db, id)?.ok_or_else(|| AppError::NotFound("Update".to_string()))
}

/// The feed as seen by the requester, newest first. Targeted updates are
/// only shown to their client (and to admins and managers).
pub fn list_updates(
    db: &Connection,
    auth: Option<&AuthContext>,
    search: Option<&str>,
) -> AppResult<Vec<Update>> {
    let auth = require_login(auth)?;
    let mut stmt = db.prepare(&format!(
        "SELECT {} FROM updates p JOIN users u ON u.id = p.created_by ORDER BY p.id DESC",
        UPDATE_COLUMNS
    ))?;
    let rows = stmt.query_map([], |row| update_from_row(row))?;

    let mut updates = Vec::new();
    for update in rows {
        let update = update?;
        let visible = match (auth.role, update.target_client_id) {
            (Role::Admin, _) | (Role::Manager, _) => true,
            (_, None) => true,
            (Role::Client, Some(target)) => target == auth.user_id,
            (Role::Doer, Some(_)) => false,
        };
        let found = search.map_or(true, |search| {
            contains_text(&update.title, search.trim()) || contains_text(&update.content, search.trim())
        });
        if visible && found {
            updates.push(update);
        }
    }
    Ok(updates)
}

/// Delete an update. Its author or an admin may do it.
pub fn delete_update(db: &Connection, auth: Option<&AuthContext>, update_id: i64) -> AppResult<()> {
    let auth = require_role(auth, &[Role::Admin, Role::Manager])?;
    let update = update_by_id(db, update_id)?.ok_or_else(|| AppError::NotFound("Update".to_string()))?;
    if update.created_by != auth.user_id && !auth.is_admin() {
        return Err(AppError::Forbidden("Only the author can delete this update.".to_string()));
    }
    db.execute("DELETE FROM updates WHERE id = ?1", params![update_id])?;
    tracing::info!(update_id, by = %auth.username, "update deleted");
    Ok(())
}
