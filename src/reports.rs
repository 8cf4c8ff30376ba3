use crate::auth::{require_login, require_role, AuthContext, Role};
use crate::db::now_stamp;
use crate::errors::{AppError, AppResult};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub id: i64,
    pub title: String,
    pub project_name: String,
    pub file_path: String,
    pub file_type: String,
    pub uploaded_by: i64,
    pub uploader_name: String,
    pub client_account: String,
    pub created_at: String,
}

/// How a report file is handed over: shown in place or saved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Disposition {
    Inline,
    Attachment,
}

/// The bytes of a report file ready to be served.
#[derive(Debug, Clone)]
pub struct ReportContent {
    pub file_name: String,
    pub mime_type: &'static str,
    pub disposition: Disposition,
    pub bytes: Vec<u8>,
}

/// Mime type of a report by its file type (extension).
pub fn mime_type(file_type: &str) -> &'static str {
    match file_type.trim_start_matches('.').to_lowercase().as_str() {
        "pdf" => "application/pdf",
        "xls" => "application/vnd.ms-excel",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "csv" => "text/csv",
        "txt" => "text/plain",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        _ => "application/octet-stream",
    }
}

const REPORT_COLUMNS: &str = "r.id, r.title, r.project_name, r.file_path, r.file_type, \
     r.uploaded_by, u.display_name, r.client_account, r.created_at";

fn report_from_row(row: &Row) -> rusqlite::Result<Report> {
    Ok(Report {
        id: row.get(0)?,
        title: row.get(1)?,
        project_name: row.get(2)?,
        file_path: row.get(3)?,
        file_type: row.get(4)?,
        uploaded_by: row.get(5)?,
        uploader_name: row.get(6)?,
        client_account: row.get(7)?,
        created_at: row.get(8)?,
    })
}

fn report_by_id(db: &Connection, id: i64) -> AppResult<Option<Report>> {
    let report = db
        .query_row(
            &format!(
                "SELECT {} FROM reports r JOIN users u ON u.id = r.uploaded_by WHERE r.id = ?1",
                REPORT_COLUMNS
            ),
            params![id],
            |row| report_from_row(row),
        )
        .optional()?;
    Ok(report)
}

fn can_see(auth: &AuthContext, report: &Report) -> bool {
    match auth.role {
        Role::Admin | Role::Manager => true,
        Role::Client => auth.client_account.as_deref() == Some(report.client_account.as_str()),
        Role::Doer => false,
    }
}

/// Fields of a new report. The file must already be on disk.
#[derive(Debug, Clone)]
pub struct ReportInput {
    pub title: String,
    pub project_name: String,
    pub file: PathBuf,
    pub client_account: String,
}

/// Register a report file for a client account.
pub fn add_report(db: &Connection, auth: Option<&AuthContext>, input: &ReportInput) -> AppResult<Report> {
    let auth = require_role(auth, &[Role::Admin, Role::Manager])?;
    if input.title.trim().is_empty() {
        return Err(AppError::InvalidInput("Title is required.".to_string()));
    }
    if input.client_account.trim().is_empty() {
        return Err(AppError::InvalidInput("Client account is required.".to_string()));
    }
    if !input.file.is_file() {
        return Err(AppError::InvalidInput(format!(
            "No file at {}.",
            input.file.display()
        )));
    }
    let file_type = input
        .file
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_lowercase)
        .unwrap_or_default();

    db.execute(
        "INSERT INTO reports (title, project_name, file_path, file_type, uploaded_by, client_account, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            input.title.trim(),
            input.project_name.trim(),
            input.file.to_string_lossy().into_owned(),
            file_type,
            auth.user_id,
            input.client_account.trim(),
            now_stamp()
        ],
    )?;
    let id = db.last_insert_rowid();
    tracing::info!(report_id = id, client_account = %input.client_account, "report added");
    report_by_id(db, id)?.ok_or_else(|| AppError::NotFound("Report".to_string()))
}

/// Reports visible to the requester, newest first. Admins and managers
/// see everything, clients the reports of their account.
pub fn list_reports(db: &Connection, auth: Option<&AuthContext>) -> AppResult<Vec<Report>> {
    let auth = require_role(auth, &[Role::Admin, Role::Manager, Role::Client])?;
    let mut stmt = db.prepare(&format!(
        "SELECT {} FROM reports r JOIN users u ON u.id = r.uploaded_by ORDER BY r.id DESC",
        REPORT_COLUMNS
    ))?;
    let rows = stmt.query_map([], |row| report_from_row(row))?;
    let mut reports = Vec::new();
    for report in rows {
        let report = report?;
        if can_see(auth, &report) {
            reports.push(report);
        }
    }
    Ok(reports)
}

/// Read a report file for viewing in place or downloading.
pub fn open_report(
    db: &Connection,
    auth: Option<&AuthContext>,
    report_id: i64,
    disposition: Disposition,
) -> AppResult<ReportContent> {
    let auth = require_login(auth)?;
    let report = report_by_id(db, report_id)?
        .filter(|report| can_see(auth, report))
        .ok_or_else(|| AppError::NotFound("Report".to_string()))?;

    let path = Path::new(&report.file_path);
    let bytes = std::fs::read(path)?;
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| format!("report-{}", report.id));
    tracing::info!(report_id, by = %auth.username, disposition = ?disposition, "report opened");

    Ok(ReportContent {
        file_name,
        mime_type: mime_type(&report.file_type),
        disposition,
        bytes,
    })
}
