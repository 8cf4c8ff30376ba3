use thiserror::Error;

/// Errors produced by domain operations. Each one maps to the message
/// shown to the requester through `user_message`.
#[derive(Debug, Error)]
pub enum AppError {
    /// The requester must be sent somewhere else (login page or their own dashboard).
    #[error("redirect to {0}")]
    Redirect(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("invalid status: {0}")]
    InvalidStatus(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl AppError {
    /// The human readable message returned to the requester. Storage and
    /// file errors never leak their details.
    pub fn user_message(&self) -> String {
        match self {
            AppError::Redirect(_) => "Redirect".to_string(),
            AppError::Forbidden(msg) => msg.clone(),
            AppError::InvalidStatus(_) => "Invalid status selected.".to_string(),
            AppError::InvalidInput(msg) => msg.clone(),
            AppError::NotFound(what) => format!("{} not found.", what),
            AppError::Database(_) => "A database error occurred".to_string(),
            AppError::Io(_) => "The report file could not be read.".to_string(),
        }
    }

    /// Log the error with the detail that `user_message` hides.
    pub fn log(&self) {
        match self {
            AppError::Database(err) => tracing::error!(error = %err, "database error"),
            AppError::Io(err) => tracing::error!(error = %err, "file error"),
            AppError::Redirect(target) => tracing::info!(redirect = %target, "redirecting"),
            other => tracing::warn!(error = %other, "request rejected"),
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::AppError;

    #[test]
    fn database_errors_are_generic_for_the_user() {
        let err = AppError::from(rusqlite::Error::QueryReturnedNoRows);
        assert_eq!(err.user_message(), "A database error occurred");
    }

    #[test]
    fn invalid_status_has_fixed_message() {
        let err = AppError::InvalidStatus("bogus".to_string());
        assert_eq!(err.user_message(), "Invalid status selected.");
    }
}
