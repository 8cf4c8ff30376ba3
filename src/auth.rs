use crate::errors::{AppError, AppResult};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// The role a user plays. It decides which dashboard they land on and
/// what they may see.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Manager,
    Doer,
    Client,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Manager => "manager",
            Role::Doer => "doer",
            Role::Client => "client",
        }
    }

    /// Where a user of this role is sent when they open a page meant for
    /// someone else.
    pub fn dashboard(self) -> &'static str {
        match self {
            Role::Admin => "admin_dashboard",
            Role::Manager => "manager_dashboard",
            Role::Doer => "doer_dashboard",
            Role::Client => "client_dashboard",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "manager" => Ok(Role::Manager),
            "doer" => Ok(Role::Doer),
            "client" => Ok(Role::Client),
            other => Err(format!("unknown role '{}'", other)),
        }
    }
}

/// A row of the users table.
#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub display_name: String,
    pub role: Role,
    pub department: Option<String>,
    pub manager_id: Option<i64>,
    pub client_account: Option<String>,
}

/// The identity a request runs under, passed explicitly to every
/// operation.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user_id: i64,
    pub username: String,
    pub display_name: String,
    pub role: Role,
    pub client_account: Option<String>,
    /// The user's own id plus everyone they manage.
    pub team_ids: Vec<i64>,
}

impl AuthContext {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn is_manager(&self) -> bool {
        self.role == Role::Manager
    }

    pub fn is_client(&self) -> bool {
        self.role == Role::Client
    }

    /// Whether tasks assigned to `doer_id` are visible to this user.
    pub fn can_see_doer(&self, doer_id: i64) -> bool {
        match self.role {
            Role::Admin => true,
            Role::Manager => self.team_ids.contains(&doer_id),
            Role::Doer => self.user_id == doer_id,
            Role::Client => false,
        }
    }
}

/// Check the session role. Anonymous requests go to the login page,
/// users with the wrong role go back to their own dashboard.
pub fn require_role<'a>(
    auth: Option<&'a AuthContext>,
    allowed: &[Role],
) -> AppResult<&'a AuthContext> {
    match auth {
        None => Err(AppError::Redirect("login".to_string())),
        Some(ctx) if allowed.contains(&ctx.role) => Ok(ctx),
        Some(ctx) => Err(AppError::Redirect(ctx.role.dashboard().to_string())),
    }
}

/// Any logged in user.
pub fn require_login(auth: Option<&AuthContext>) -> AppResult<&AuthContext> {
    require_role(auth, &[Role::Admin, Role::Manager, Role::Doer, Role::Client])
}

/// Resolve the session user into an `AuthContext`. Returns None when no
/// user is given or the user is unknown, which means "not logged in".
pub fn session(db: &Connection, username: Option<&str>) -> AppResult<Option<AuthContext>> {
    let username = match username {
        Some(name) if !name.trim().is_empty() => name.trim(),
        _ => return Ok(None),
    };

    let user = match user_by_username(db, username)? {
        Some(user) => user,
        None => {
            tracing::warn!(username, "unknown session user");
            return Ok(None);
        }
    };

    let mut team_ids = vec![user.id];
    let mut stmt = db.prepare("SELECT id FROM users WHERE manager_id = ?1 ORDER BY id")?;
    let rows = stmt.query_map(params![user.id], |row| row.get::<_, i64>(0))?;
    for id in rows {
        team_ids.push(id?);
    }

    Ok(Some(AuthContext {
        user_id: user.id,
        username: user.username,
        display_name: user.display_name,
        role: user.role,
        client_account: user.client_account,
        team_ids,
    }))
}

const USER_COLUMNS: &str =
    "id, username, display_name, role, department, manager_id, client_account";

/// Return a user from a row in this order: [id, username, display_name,
/// role, department, manager_id, client_account]
fn user_from_row(row: &Row) -> rusqlite::Result<User> {
    let role: String = row.get(3)?;
    let role = role.parse::<Role>().map_err(|err| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            rusqlite::types::Type::Text,
            Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, err)),
        )
    })?;
    Ok(User {
        id: row.get(0)?,
        username: row.get(1)?,
        display_name: row.get(2)?,
        role,
        department: row.get(4)?,
        manager_id: row.get(5)?,
        client_account: row.get(6)?,
    })
}

pub fn user_by_username(db: &Connection, username: &str) -> AppResult<Option<User>> {
    let user = db
        .query_row(
            &format!("SELECT {} FROM users WHERE username = ?1", USER_COLUMNS),
            params![username],
            |row| user_from_row(row),
        )
        .optional()?;
    Ok(user)
}

pub fn user_by_id(db: &Connection, id: i64) -> AppResult<Option<User>> {
    let user = db
        .query_row(
            &format!("SELECT {} FROM users WHERE id = ?1", USER_COLUMNS),
            params![id],
            |row| user_from_row(row),
        )
        .optional()?;
    Ok(user)
}

/// Look a user up by username, failing with NotFound.
pub fn existing_user(db: &Connection, username: &str) -> AppResult<User> {
    user_by_username(db, username)?.ok_or_else(|| AppError::NotFound(format!("User '{}'", username)))
}

pub fn users(db: &Connection) -> AppResult<Vec<User>> {
    let mut stmt = db.prepare(&format!("SELECT {} FROM users ORDER BY username", USER_COLUMNS))?;
    let rows = stmt.query_map([], |row| user_from_row(row))?;
    let mut users = Vec::new();
    for user in rows {
        users.push(user?);
    }
    Ok(users)
}

/// Fields for a new user.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub display_name: Option<String>,
    pub role: Role,
    pub department: Option<String>,
    pub manager: Option<String>,
    pub client_account: Option<String>,
}

/// Add a user. The first user of a database can be added by anyone (it
/// bootstraps the admin account), after that only admins add users.
pub fn add_user(db: &Connection, auth: Option<&AuthContext>, new: &NewUser) -> AppResult<User> {
    let user_count: i64 = db.query_row("SELECT count(*) FROM users", [], |row| row.get(0))?;
    if user_count > 0 {
        require_role(auth, &[Role::Admin])?;
    } else if new.role != Role::Admin {
        return Err(AppError::InvalidInput(
            "The first user must be an admin.".to_string(),
        ));
    }

    let username = new.username.trim();
    if username.is_empty() {
        return Err(AppError::InvalidInput("Username is required.".to_string()));
    }
    if user_by_username(db, username)?.is_some() {
        return Err(AppError::InvalidInput(format!(
            "Username '{}' is already taken.",
            username
        )));
    }
    if new.role == Role::Client && new.client_account.is_none() {
        return Err(AppError::InvalidInput(
            "Client users need a client account.".to_string(),
        ));
    }

    let manager_id = match &new.manager {
        Some(name) => {
            let manager = existing_user(db, name)?;
            if manager.role != Role::Manager && manager.role != Role::Admin {
                return Err(AppError::InvalidInput(format!(
                    "'{}' is not a manager.",
                    name
                )));
            }
            Some(manager.id)
        }
        None => None,
    };

    let display_name = new
        .display_name
        .clone()
        .unwrap_or_else(|| username.to_string());

    db.execute(
        "INSERT INTO users (username, display_name, role, department, manager_id, client_account)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            username,
            display_name,
            new.role.as_str(),
            new.department,
            manager_id,
            new.client_account
        ],
    )?;
    let id = db.last_insert_rowid();
    tracing::info!(user_id = id, username, role = new.role.as_str(), "user added");

    user_by_id(db, id)?.ok_or_else(|| AppError::NotFound("User".to_string()))
}

#[cfg(test)]
pub mod fixtures {
    use super::*;

    pub fn user(db: &Connection, username: &str, role: Role, manager: Option<&str>) -> AuthContext {
        let manager_id: Option<i64> = manager.map(|name| {
            db.query_row("SELECT id FROM users WHERE username = ?1", params![name], |row| row.get(0))
                .expect("manager")
        });
        let client_account = if role == Role::Client {
            Some(format!("{}-account", username))
        } else {
            None
        };
        db.execute(
            "INSERT INTO users (username, display_name, role, department, manager_id, client_account)
             VALUES (?1, ?2, ?3, 'ops', ?4, ?5)",
            params![username, username, role.as_str(), manager_id, client_account],
        )
        .expect("insert user");
        login(db, username)
    }

    pub fn login(db: &Connection, username: &str) -> AuthContext {
        session(db, Some(username)).expect("session").expect("known user")
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::user;
    use super::*;
    use crate::db::test_db;

    #[test]
    fn anonymous_requests_go_to_login() {
        let err = require_role(None, &[Role::Manager]).unwrap_err();
        assert!(matches!(err, AppError::Redirect(ref to) if to == "login"));
    }

    #[test]
    fn wrong_role_goes_to_own_dashboard() {
        let db = test_db();
        let doer = user(&db, "dora", Role::Doer, None);
        let err = require_role(Some(&doer), &[Role::Manager, Role::Admin]).unwrap_err();
        assert!(matches!(err, AppError::Redirect(ref to) if to == "doer_dashboard"));
    }

    #[test]
    fn manager_team_includes_reports() {
        let db = test_db();
        user(&db, "admin", Role::Admin, None);
        let manager = user(&db, "mia", Role::Manager, None);
        let alice = user(&db, "alice", Role::Doer, Some("mia"));
        let bob = user(&db, "bob", Role::Doer, None);

        let manager = fixtures::login(&db, &manager.username);
        assert!(manager.can_see_doer(manager.user_id));
        assert!(manager.can_see_doer(alice.user_id));
        assert!(!manager.can_see_doer(bob.user_id));
        assert!(!alice.can_see_doer(bob.user_id));
    }

    #[test]
    fn unknown_session_user_is_not_logged_in() {
        let db = test_db();
        assert!(session(&db, Some("ghost")).expect("session").is_none());
        assert!(session(&db, None).expect("session").is_none());
    }

    #[test]
    fn first_user_must_be_admin_then_admin_only() {
        let db = test_db();
        let mut new = NewUser {
            username: "boss".to_string(),
            display_name: None,
            role: Role::Doer,
            department: None,
            manager: None,
            client_account: None,
        };
        assert!(matches!(add_user(&db, None, &new), Err(AppError::InvalidInput(_))));

        new.role = Role::Admin;
        add_user(&db, None, &new).expect("bootstrap admin");

        new.username = "second".to_string();
        new.role = Role::Doer;
        assert!(matches!(add_user(&db, None, &new), Err(AppError::Redirect(_))));

        let admin = fixtures::login(&db, "boss");
        let added = add_user(&db, Some(&admin), &new).expect("admin adds");
        assert_eq!(added.display_name, "second");
    }
}
