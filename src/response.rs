use crate::errors::{AppError, AppResult};
use serde::Serialize;
use serde_json::{json, Value};

/// The JSON body every handler answers with. Failures are reported in
/// the body, never through the exit status.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Envelope {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl Envelope {
    pub fn ok<T: Serialize>(data: &T, message: Option<&str>) -> Self {
        match serde_json::to_value(data) {
            Ok(data) => Envelope {
                success: true,
                message: message.map(str::to_string),
                data: Some(data),
            },
            Err(err) => {
                tracing::error!(error = %err, "failed to serialize response");
                Envelope::failure("A server error occurred")
            }
        }
    }

    pub fn failure(message: &str) -> Self {
        Envelope {
            success: false,
            message: Some(message.to_string()),
            data: None,
        }
    }

    /// Log an error and turn it into the body the requester sees.
    pub fn from_error(err: &AppError) -> Self {
        err.log();
        let mut envelope = Envelope::failure(&err.user_message());
        if let AppError::Redirect(target) = err {
            envelope.data = Some(json!({ "redirect": target }));
        }
        envelope
    }

    pub fn from_result<T: Serialize>(result: &AppResult<T>, message: Option<&str>) -> Self {
        match result {
            Ok(data) => Envelope::ok(data, message),
            Err(err) => Envelope::from_error(err),
        }
    }
}
