//! HTTP error responses.
//!
//! Domain errors reach the handlers as rootcause reports. The error class
//! decides the status code; internal details never leave the server.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use rootcause::prelude::Report;
use serde_json::json;
use std::fmt;
use vo_federation_core::{Classify, ErrorClass};

/// Errors returned by the route handlers.
#[derive(Debug)]
pub enum ApiError {
    /// No local user on the request.
    NotAuthenticated,
    /// The local user is not an administrator.
    AdminRequired,
    /// The request body or path could not be used.
    BadRequest { details: String },
    /// A classified domain error.
    Domain { class: ErrorClass, message: String },
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotAuthenticated => write!(f, "not authenticated"),
            Self::AdminRequired => write!(f, "admin access required"),
            Self::BadRequest { details } => write!(f, "bad request: {}", details),
            Self::Domain { class, message } => write!(f, "{} error: {}", class, message),
        }
    }
}

impl<C> From<Report<C>> for ApiError
where
    C: Classify + fmt::Display + fmt::Debug + Send + Sync + 'static,
{
    fn from(report: Report<C>) -> Self {
        let context = report.current_context();
        Self::Domain {
            class: context.class(),
            message: context.to_string(),
        }
    }
}

/// The status code for an error class.
pub fn status_for(class: ErrorClass) -> StatusCode {
    match class {
        ErrorClass::Protocol => StatusCode::BAD_REQUEST,
        ErrorClass::UpstreamTransport => StatusCode::BAD_GATEWAY,
        ErrorClass::NotFound => StatusCode::NOT_FOUND,
        ErrorClass::Conflict => StatusCode::CONFLICT,
        ErrorClass::Validation => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorClass::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::NotAuthenticated => (StatusCode::UNAUTHORIZED, "Not authenticated".to_string()),
            Self::AdminRequired => (StatusCode::FORBIDDEN, "Admin access required".to_string()),
            Self::BadRequest { details } => (StatusCode::BAD_REQUEST, details),
            Self::Domain {
                class: ErrorClass::Internal,
                message,
            } => {
                tracing::error!(error = %message, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
            Self::Domain { class, message } => (status_for(class), message),
        };

        (status, Json(json!({ "message": message }))).into_response()
    }
}
