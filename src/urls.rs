use crate::auth::{existing_user, require_login, require_role, AuthContext, Role};
use crate::db::now_stamp;
use crate::errors::{AppError, AppResult};
use crate::listing::contains_text;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;

/// Personal links belong to one user. Admin links are published to the
/// roles listed in `visible_for`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UrlScope {
    Personal,
    Admin,
}

impl UrlScope {
    pub fn as_str(self) -> &'static str {
        match self {
            UrlScope::Personal => "personal",
            UrlScope::Admin => "admin",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct UsefulUrl {
    pub id: i64,
    pub title: String,
    pub url: String,
    pub description: String,
    pub category: String,
    pub scope: UrlScope,
    pub visible_for: String,
    pub owner_id: i64,
    pub owner_name: String,
    pub created_at: String,
}

impl UsefulUrl {
    /// Whether an admin link is published to `role`.
    pub fn visible_to(&self, role: Role) -> bool {
        self.visible_for.split(',').any(|entry| {
            let entry = entry.trim();
            entry.eq_ignore_ascii_case("all") || entry.eq_ignore_ascii_case(role.as_str())
        })
    }
}

const URL_COLUMNS: &str = "l.id, l.title, l.url, l.description, l.category, l.scope, \
     l.visible_for, l.owner_id, u.display_name, l.created_at";

fn url_from_row(row: &Row) -> rusqlite::Result<UsefulUrl> {
    let scope: String = row.get(5)?;
    Ok(UsefulUrl {
        id: row.get(0)?,
        title: row.get(1)?,
        url: row.get(2)?,
        description: row.get(3)?,
        category: row.get(4)?,
        scope: if scope == "admin" {
            UrlScope::Admin
        } else {
            UrlScope::Personal
        },
        visible_for: row.get(6)?,
        owner_id: row.get(7)?,
        owner_name: row.get(8)?,
        created_at: row.get(9)?,
    })
}

fn url_by_id(db: &Connection, id: i64) -> AppResult<Option<UsefulUrl>> {
    let url = db
        .query_row(
            &format!(
                "SELECT {} FROM useful_urls l JOIN users u ON u.id = l.owner_id WHERE l.id = ?1",
                URL_COLUMNS
            ),
            params![id],
            |row| url_from_row(row),
        )
        .optional()?;
    Ok(url)
}

/// Fields of a new link.
#[derive(Debug, Clone)]
pub struct UrlInput {
    pub title: String,
    pub url: String,
    pub description: String,
    pub category: String,
    pub scope: UrlScope,
    /// `all` or a comma separated list of roles. Only used by admin links.
    pub visible_for: Option<String>,
}

fn check_visible_for(visible_for: &str) -> AppResult<String> {
    let mut entries = Vec::new();
    for entry in visible_for.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        if entry.eq_ignore_ascii_case("all") {
            return Ok("all".to_string());
        }
        let role: Role = entry
            .parse()
            .map_err(|_| AppError::InvalidInput(format!("Unknown role '{}'.", entry)))?;
        entries.push(role.as_str());
    }
    if entries.is_empty() {
        return Ok("all".to_string());
    }
    Ok(entries.join(","))
}

pub fn add_url(db: &Connection, auth: Option<&AuthContext>, input: &UrlInput) -> AppResult<UsefulUrl> {
    let auth = match input.scope {
        UrlScope::Admin => require_role(auth, &[Role::Admin])?,
        UrlScope::Personal => require_login(auth)?,
    };
    if input.title.trim().is_empty() {
        return Err(AppError::InvalidInput("Title is required.".to_string()));
    }
    let url = input.url.trim();
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(AppError::InvalidInput(
            "URL must start with http:// or https://.".to_string(),
        ));
    }
    let visible_for = match input.scope {
        UrlScope::Admin => check_visible_for(input.visible_for.as_deref().unwrap_or("all"))?,
        UrlScope::Personal => "all".to_string(),
    };

    db.execute(
        "INSERT INTO useful_urls (title, url, description, category, scope, visible_for, owner_id, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            input.title.trim(),
            url,
            input.description,
            input.category.trim(),
            input.scope.as_str(),
            visible_for,
            auth.user_id,
            now_stamp()
        ],
    )?;
    let id = db.last_insert_rowid();
    tracing::info!(url_id = id, scope = input.scope.as_str(), by = %auth.username, "url added");
    url_by_id(db, id)?.ok_or_else(|| AppError::NotFound("URL".to_string()))
}

/// Filters for the links page.
#[derive(Debug, Clone, Default)]
pub struct UrlFilter {
    pub category: Option<String>,
    pub search: Option<String>,
}

impl UrlFilter {
    fn matches(&self, url: &UsefulUrl) -> bool {
        if let Some(category) = &self.category {
            if !url.category.eq_ignore_ascii_case(category.trim()) {
                return false;
            }
        }
        match &self.search {
            Some(search) => {
                let search = search.trim();
                contains_text(&url.title, search)
                    || contains_text(&url.url, search)
                    || contains_text(&url.description, search)
            }
            None => true,
        }
    }
}

/// Own personal links, personal links shared with the requester and the
/// admin links published to their role. Newest first.
pub fn list_urls(
    db: &Connection,
    auth: Option<&AuthContext>,
    filter: &UrlFilter,
) -> AppResult<Vec<UsefulUrl>> {
    let auth = require_login(auth)?;
    let mut stmt = db.prepare(&format!(
        "SELECT {} FROM useful_urls l JOIN users u ON u.id = l.owner_id
         WHERE l.owner_id = ?1
            OR l.scope = 'admin'
            OR EXISTS (SELECT 1 FROM url_shares s WHERE s.url_id = l.id AND s.user_id = ?1)
         ORDER BY l.id DESC",
        URL_COLUMNS
    ))?;
    let rows = stmt.query_map(params![auth.user_id], |row| url_from_row(row))?;

    let mut urls = Vec::new();
    for url in rows {
        let url = url?;
        let published = url.scope == UrlScope::Admin && (auth.is_admin() || url.visible_to(auth.role));
        let personal = url.scope == UrlScope::Personal;
        if (published || personal) && filter.matches(&url) {
            urls.push(url);
        }
    }
    Ok(urls)
}

/// Distinct categories of the links the requester can see.
pub fn categories(urls: &[UsefulUrl]) -> Vec<String> {
    let mut categories: Vec<String> = urls
        .iter()
        .map(|url| url.category.clone())
        .filter(|category| !category.is_empty())
        .collect();
    categories.sort();
    categories.dedup();
    categories
}

/// Share one of the requester's personal links with another user.
pub fn share_url(
    db: &Connection,
    auth: Option<&AuthContext>,
    url_id: i64,
    username: &str,
) -> AppResult<()> {
    let auth = require_login(auth)?;
    let url = url_by_id(db, url_id)?.ok_or_else(|| AppError::NotFound("URL".to_string()))?;
    if url.owner_id != auth.user_id {
        return Err(AppError::Forbidden("Only the owner can share this link.".to_string()));
    }
    if url.scope == UrlScope::Admin {
        return Err(AppError::InvalidInput(
            "Admin links are published by role, not shared.".to_string(),
        ));
    }
    let target = existing_user(db, username)?;
    if target.id == auth.user_id {
        return Err(AppError::InvalidInput("You cannot share a link with yourself.".to_string()));
    }
    db.execute(
        "INSERT OR IGNORE INTO url_shares (url_id, user_id) VALUES (?1, ?2)",
        params![url_id, target.id],
    )?;
    tracing::info!(url_id, with = %target.username, "url shared");
    Ok(())
}

/// Delete a link. Owners delete their own; admins may delete any admin link.
pub fn delete_url(db: &Connection, auth: Option<&AuthContext>, url_id: i64) -> AppResult<()> {
    let auth = require_login(auth)?;
    let url = url_by_id(db, url_id)?.ok_or_else(|| AppError::NotFound("URL".to_string()))?;
    let allowed = url.owner_id == auth.user_id || (url.scope == UrlScope::Admin && auth.is_admin());
    if !allowed {
        return Err(AppError::Forbidden("You cannot delete this link.".to_string()));
    }
    db.execute("DELETE FROM url_shares WHERE url_id = ?1", params![url_id])?;
    db.execute("DELETE FROM useful_urls WHERE id = ?1", params![url_id])?;
    tracing::info!(url_id, by = %auth.username, "url deleted");
    Ok(())
}
