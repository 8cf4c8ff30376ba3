use crate::auth::{existing_user, require_login, AuthContext};
use crate::db::now_stamp;
use crate::errors::{AppError, AppResult};
use crate::listing::contains_text;
use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;
use std::str::FromStr;

/// What a user a note is shared with may do with it. Each level
/// includes the ones before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    View,
    Comment,
    Edit,
}

impl Permission {
    pub fn as_str(self) -> &'static str {
        match self {
            Permission::View => "view",
            Permission::Comment => "comment",
            Permission::Edit => "edit",
        }
    }
}

impl FromStr for Permission {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "view" => Ok(Permission::View),
            "comment" => Ok(Permission::Comment),
            "edit" => Ok(Permission::Edit),
            other => Err(AppError::InvalidInput(format!("Invalid permission '{}'.", other))),
        }
    }
}

/// How the requester relates to a note.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Access {
    Owner,
    Shared(Permission),
}

impl Access {
    fn allows(self, needed: Permission) -> bool {
        match self {
            Access::Owner => true,
            Access::Shared(granted) => granted >= needed,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Note {
    pub id: i64,
    pub title: String,
    /// HTML as produced by the editor.
    pub content: String,
    pub is_important: bool,
    pub is_completed: bool,
    pub reminder_date: Option<String>,
    pub owner_id: i64,
    pub owner_name: String,
    pub created_at: String,
    pub updated_at: String,
}

/// A note together with the requester's access to it.
#[derive(Debug, Clone, Serialize)]
pub struct NoteView {
    pub note: Note,
    pub access: Access,
}

#[derive(Debug, Clone, Serialize)]
pub struct Comment {
    pub id: i64,
    pub note_id: i64,
    pub author_name: String,
    pub text: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct NoteShare {
    pub note_id: i64,
    pub username: String,
    pub permission: Permission,
}

/// A note with its comments and shares, as shown on the note page.
#[derive(Debug, Clone, Serialize)]
pub struct NoteDetail {
    pub view: NoteView,
    pub comments: Vec<Comment>,
    pub shares: Vec<NoteShare>,
}

const NOTE_COLUMNS: &str = "n.id, n.title, n.content, n.is_important, n.is_completed, \
     n.reminder_date, n.owner_id, u.display_name, n.created_at, n.updated_at";

fn note_from_row(row: &Row) -> rusqlite::Result<Note> {
    Ok(Note {
        id: row.get(0)?,
        title: row.get(1)?,
        content: row.get(2)?,
        is_important: row.get::<_, i64>(3)? != 0,
        is_completed: row.get::<_, i64>(4)? != 0,
        reminder_date: row.get(5)?,
        owner_id: row.get(6)?,
        owner_name: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

fn note_by_id(db: &Connection, id: i64) -> AppResult<Option<Note>> {
    let note = db
        .query_row(
            &format!(
                "SELECT {} FROM notes n JOIN users u ON u.id = n.owner_id WHERE n.id = ?1",
                NOTE_COLUMNS
            ),
            params![id],
            |row| note_from_row(row),
        )
        .optional()?;
    Ok(note)
}

fn shared_permission(db: &Connection, note_id: i64, user_id: i64) -> AppResult<Option<Permission>> {
    let permission: Option<String> = db
        .query_row(
            "SELECT permission FROM note_shares WHERE note_id = ?1 AND user_id = ?2",
            params![note_id, user_id],
            |row| row.get(0),
        )
        .optional()?;
    match permission {
        Some(permission) => Ok(Some(permission.parse()?)),
        None => Ok(None),
    }
}

/// Load a note the requester has at least `needed` access to. Notes the
/// requester cannot see at all are reported as missing.
fn accessible_note(
    db: &Connection,
    auth: &AuthContext,
    note_id: i64,
    needed: Permission,
) -> AppResult<NoteView> {
    let note = note_by_id(db, note_id)?.ok_or_else(|| AppError::NotFound("Note".to_string()))?;
    let access = if note.owner_id == auth.user_id {
        Access::Owner
    } else {
        match shared_permission(db, note_id, auth.user_id)? {
            Some(permission) => Access::Shared(permission),
            None => return Err(AppError::NotFound("Note".to_string())),
        }
    };
    if !access.allows(needed) {
        return Err(AppError::Forbidden(format!(
            "You need {} permission on this note.",
            needed.as_str()
        )));
    }
    Ok(NoteView { note, access })
}

fn owned_note(db: &Connection, auth: &AuthContext, note_id: i64) -> AppResult<Note> {
    let view = accessible_note(db, auth, note_id, Permission::View)?;
    if view.access != Access::Owner {
        return Err(AppError::Forbidden("Only the owner can do that.".to_string()));
    }
    Ok(view.note)
}

/// Fields of a note as submitted by its editor.
#[derive(Debug, Clone)]
pub struct NoteInput {
    pub title: String,
    pub content: String,
    pub is_important: bool,
    pub reminder_date: Option<NaiveDate>,
}

fn check_input(input: &NoteInput) -> AppResult<()> {
    if input.title.trim().is_empty() {
        return Err(AppError::InvalidInput("Title is required.".to_string()));
    }
    Ok(())
}

pub fn create_note(db: &Connection, auth: Option<&AuthContext>, input: &NoteInput) -> AppResult<Note> {
    let auth = require_login(auth)?;
    check_input(input)?;
    let now = now_stamp();
    db.execute(
        "INSERT INTO notes (title, content, is_important, is_completed, reminder_date, owner_id, created_at, updated_at)
         VALUES (?1, ?2, ?3, 0, ?4, ?5, ?6, ?6)",
        params![
            input.title.trim(),
            input.content,
            input.is_important as i64,
            input.reminder_date.map(|d| d.format("%Y-%m-%d").to_string()),
            auth.user_id,
            now
        ],
    )?;
    let id = db.last_insert_rowid();
    tracing::info!(note_id = id, owner = %auth.username, "note created");
    note_by_id(db, id)?.ok_or_else(|| AppError::NotFound("Note".to_string()))
}

/// Filters for the notes page.
#[derive(Debug, Clone, Default)]
pub struct NoteFilter {
    pub search: Option<String>,
    pub important_only: bool,
    pub completed_only: bool,
    pub include_completed: bool,
}

impl NoteFilter {
    fn matches(&self, note: &Note) -> bool {
        if self.important_only && !note.is_important {
            return false;
        }
        if self.completed_only {
            if !note.is_completed {
                return false;
            }
        } else if !self.include_completed && note.is_completed {
            return false;
        }
        match &self.search {
            Some(search) => {
                contains_text(&note.title, search.trim()) || contains_text(&note.content, search.trim())
            }
            None => true,
        }
    }
}

/// Own notes and notes shared with the requester, newest first.
pub fn list_notes(
    db: &Connection,
    auth: Option<&AuthContext>,
    filter: &NoteFilter,
) -> AppResult<Vec<NoteView>> {
    let auth = require_login(auth)?;
    let mut stmt = db.prepare(&format!(
        "SELECT {}, s.permission FROM notes n
         JOIN users u ON u.id = n.owner_id
         LEFT JOIN note_shares s ON s.note_id = n.id AND s.user_id = ?1
         WHERE n.owner_id = ?1 OR s.user_id = ?1
         ORDER BY n.id DESC",
        NOTE_COLUMNS
    ))?;
    let rows = stmt.query_map(params![auth.user_id], |row| {
        Ok((note_from_row(row)?, row.get::<_, Option<String>>(10)?))
    })?;

    let mut notes = Vec::new();
    for row in rows {
        let (note, permission) = row?;
        if !filter.matches(&note) {
            continue;
        }
        let access = if note.owner_id == auth.user_id {
            Access::Owner
        } else {
            match permission {
                Some(permission) => Access::Shared(permission.parse()?),
                None => continue,
            }
        };
        notes.push(NoteView { note, access });
    }
    Ok(notes)
}

pub fn show_note(db: &Connection, auth: Option<&AuthContext>, note_id: i64) -> AppResult<NoteDetail> {
    let auth = require_login(auth)?;
    let view = accessible_note(db, auth, note_id, Permission::View)?;
    let comments = comments(db, note_id)?;
    let shares = if view.access == Access::Owner {
        shares(db, note_id)?
    } else {
        Vec::new()
    };
    Ok(NoteDetail {
        view,
        comments,
        shares,
    })
}

/// Replace title, content, importance and reminder. Needs edit access.
pub fn edit_note(
    db: &Connection,
    auth: Option<&AuthContext>,
    note_id: i64,
    input: &NoteInput,
) -> AppResult<Note> {
    let auth = require_login(auth)?;
    check_input(input)?;
    accessible_note(db, auth, note_id, Permission::Edit)?;
    db.execute(
        "UPDATE notes SET title = ?1, content = ?2, is_important = ?3, reminder_date = ?4, updated_at = ?5
         WHERE id = ?6",
        params![
            input.title.trim(),
            input.content,
            input.is_important as i64,
            input.reminder_date.map(|d| d.format("%Y-%m-%d").to_string()),
            now_stamp(),
            note_id
        ],
    )?;
    tracing::info!(note_id, by = %auth.username, "note edited");
    note_by_id(db, note_id)?.ok_or_else(|| AppError::NotFound("Note".to_string()))
}

/// Flip the important flag. Needs edit access.
pub fn toggle_important(db: &Connection, auth: Option<&AuthContext>, note_id: i64) -> AppResult<Note> {
    let auth = require_login(auth)?;
    accessible_note(db, auth, note_id, Permission::Edit)?;
    db.execute(
        "UPDATE notes SET is_important = 1 - is_important, updated_at = ?1 WHERE id = ?2",
        params![now_stamp(), note_id],
    )?;
    note_by_id(db, note_id)?.ok_or_else(|| AppError::NotFound("Note".to_string()))
}

/// Flip the completed flag. Needs edit access.
pub fn toggle_completed(db: &Connection, auth: Option<&AuthContext>, note_id: i64) -> AppResult<Note> {
    let auth = require_login(auth)?;
    accessible_note(db, auth, note_id, Permission::Edit)?;
    db.execute(
        "UPDATE notes SET is_completed = 1 - is_completed, updated_at = ?1 WHERE id = ?2",
        params![now_stamp(), note_id],
    )?;
    note_by_id(db, note_id)?.ok_or_else(|| AppError::NotFound("Note".to_string()))
}

pub fn delete_note(db: &Connection, auth: Option<&AuthContext>, note_id: i64) -> AppResult<()> {
    let auth = require_login(auth)?;
    owned_note(db, auth, note_id)?;
    db.execute("DELETE FROM note_comments WHERE note_id = ?1", params![note_id])?;
    db.execute("DELETE FROM note_shares WHERE note_id = ?1", params![note_id])?;
    db.execute("DELETE FROM notes WHERE id = ?1", params![note_id])?;
    tracing::info!(note_id, by = %auth.username, "note deleted");
    Ok(())
}

/// Share a note, or change the permission of an existing share.
pub fn share_note(
    db: &Connection,
    auth: Option<&AuthContext>,
    note_id: i64,
    username: &str,
    permission: Permission,
) -> AppResult<NoteShare> {
    let auth = require_login(auth)?;
    owned_note(db, auth, note_id)?;
    let target = existing_user(db, username)?;
    if target.id == auth.user_id {
        return Err(AppError::InvalidInput("You cannot share a note with yourself.".to_string()));
    }
    db.execute(
        "INSERT INTO note_shares (note_id, user_id, permission) VALUES (?1, ?2, ?3)
         ON CONFLICT(note_id, user_id) DO UPDATE SET permission = excluded.permission",
        params![note_id, target.id, permission.as_str()],
    )?;
    tracing::info!(note_id, with = %target.username, permission = permission.as_str(), "note shared");
    Ok(NoteShare {
        note_id,
        username: target.username,
        permission,
    })
}

pub fn unshare_note(
    db: &Connection,
    auth: Option<&AuthContext>,
    note_id: i64,
    username: &str,
) -> AppResult<()> {
    let auth = require_login(auth)?;
    owned_note(db, auth, note_id)?;
    let target = existing_user(db, username)?;
    let removed = db.execute(
        "DELETE FROM note_shares WHERE note_id = ?1 AND user_id = ?2",
        params![note_id, target.id],
    )?;
    if removed == 0 {
        return Err(AppError::NotFound("Share".to_string()));
    }
    Ok(())
}

/// Add a comment. Needs comment access.
pub fn add_comment(
    db: &Connection,
    auth: Option<&AuthContext>,
    note_id: i64,
    text: &str,
) -> AppResult<Comment> {
    let auth = require_login(auth)?;
    if text.trim().is_empty() {
        return Err(AppError::InvalidInput("Comment cannot be empty.".to_string()));
    }
    accessible_note(db, auth, note_id, Permission::Comment)?;
    let now = now_stamp();
    db.execute(
        "INSERT INTO note_comments (note_id, author_id, text, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![note_id, auth.user_id, text.trim(), now],
    )?;
    Ok(Comment {
        id: db.last_insert_rowid(),
        note_id,
        author_name: auth.display_name.clone(),
        text: text.trim().to_string(),
        created_at: now,
    })
}

fn comments(db: &Connection, note_id: i64) -> AppResult<Vec<Comment>> {
    let mut stmt = db.prepare(
        "SELECT c.id, c.note_id, u.display_name, c.text, c.created_at
         FROM note_comments c JOIN users u ON u.id = c.author_id
         WHERE c.note_id = ?1 ORDER BY c.id",
    )?;
    let rows = stmt.query_map(params![note_id], |row| {
        Ok(Comment {
            id: row.get(0)?,
            note_id: row.get(1)?,
            author_name: row.get(2)?,
            text: row.get(3)?,
            created_at: row.get(4)?,
        })
    })?;
    let mut comments = Vec::new();
    for comment in rows {
        comments.push(comment?);
    }
    Ok(comments)
}

fn shares(db: &Connection, note_id: i64) -> AppResult<Vec<NoteShare>> {
    let mut stmt = db.prepare(
        "SELECT s.note_id, u.username, s.permission
         FROM note_shares s JOIN users u ON u.id = s.user_id
         WHERE s.note_id = ?1 ORDER BY u.username",
    )?;
    let rows = stmt.query_map(params![note_id], |row| {
        Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?))
    })?;
    let mut shares = Vec::new();
    for row in rows {
        let (note_id, username, permission) = row?;
        shares.push(NoteShare {
            note_id,
            username,
            permission: permission.parse()?,
        });
    }
    Ok(shares)
}
