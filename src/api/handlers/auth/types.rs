//! Request/response types and the security error taxonomy.

use axum::{
    http::{header::RETRY_AFTER, HeaderMap, HeaderValue, StatusCode},
    response::{Html, IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use utoipa::ToSchema;

use super::utils::wants_json;
use crate::api::views;

/// JSON error body shared by every gated endpoint.
#[derive(ToSchema, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct ErrorBody {
    pub success: bool,
    pub error: String,
    pub message: String,
}

/// Result of an administrative action.
#[derive(ToSchema, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct ActionResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ActionResponse {
    #[must_use]
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            error: None,
        }
    }

    #[must_use]
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            message: None,
            error: Some(error.into()),
        }
    }
}

#[derive(Deserialize)]
pub struct LoginForm {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(rename = "_csrf", default)]
    pub csrf: Option<String>,
}

impl std::fmt::Debug for LoginForm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginForm")
            .field("username", &self.username)
            .field("password", &"***")
            .finish_non_exhaustive()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LimitScope {
    General,
    Login,
}

/// Request rejections raised by the session-security layers.
#[derive(Debug, thiserror::Error)]
pub enum SecurityError {
    #[error("Invalid request. Reload the page and try again.")]
    BadCsrfToken,
    #[error("rate limited")]
    RateLimited {
        scope: LimitScope,
        retry_after: Duration,
    },
    #[error("Please log in.")]
    Unauthenticated,
    #[error("Administrators only.")]
    Forbidden,
    #[error("internal error")]
    Internal {
        /// Shown only in development.
        detail: Option<String>,
    },
}

impl SecurityError {
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadCsrfToken | Self::Forbidden => StatusCode::FORBIDDEN,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::Unauthenticated => StatusCode::UNAUTHORIZED,
            Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Short error label and the user-facing message.
    #[must_use]
    pub fn describe(&self) -> (&'static str, &'static str) {
        match self {
            Self::BadCsrfToken => (
                "Invalid CSRF token",
                "Invalid request. Reload the page and try again.",
            ),
            Self::RateLimited {
                scope: LimitScope::General,
                ..
            } => (
                "Too many requests",
                "Too many requests. Please wait and try again.",
            ),
            Self::RateLimited {
                scope: LimitScope::Login,
                ..
            } => (
                "Too many login attempts",
                "Too many login attempts. Please try again later.",
            ),
            Self::Unauthenticated => ("Authentication required", "Please log in."),
            Self::Forbidden => ("Forbidden", "Administrators only."),
            Self::Internal { .. } => (
                "Internal server error",
                "Something went wrong. Please try again later.",
            ),
        }
    }

    /// Render as JSON for JSON clients, otherwise as an HTML error page.
    #[must_use]
    pub fn respond(self, headers: &HeaderMap) -> Response {
        let status = self.status();
        let (error, message) = self.describe();

        let mut response = if wants_json(headers) {
            let body = ErrorBody {
                success: false,
                error: error.to_string(),
                message: message.to_string(),
            };
            (status, Json(body)).into_response()
        } else {
            let detail = match &self {
                Self::Internal { detail } => detail.as_deref(),
                _ => None,
            };
            (
                status,
                Html(views::error_page(status, error, message, detail)),
            )
                .into_response()
        };

        if let Self::RateLimited { retry_after, .. } = self {
            let seconds = retry_after.as_secs().max(1);
            if let Ok(value) = HeaderValue::from_str(&seconds.to_string()) {
                response.headers_mut().insert(RETRY_AFTER, value);
            }
        }
        response
    }
}
