use std::error::Error;

use axum::Json;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};

/// An error response from an api.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ApiErrorResponse {
    /// Machine readable reason code, such as `MALFORMED`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    code: Option<String>,
    #[serde(default)]
    detail: Option<String>,
}

impl ApiErrorResponse {
    /// Creates an error response with a detail message.
    pub fn with_detail<S: AsRef<str>>(s: S) -> Self {
        Self {
            code: None,
            detail: Some(s.as_ref().to_owned()),
        }
    }

    /// Creates an error response with a reason code and the error's message.
    pub fn with_code(code: &str, error: &dyn Error) -> Self {
        Self {
            code: Some(code.to_owned()),
            detail: Some(error.to_string()),
        }
    }

    /// The reason code, if any.
    pub fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }
}

impl IntoResponse for ApiErrorResponse {
    fn into_response(self) -> Response {
        Json(self).into_response()
    }
}
