//! API error type shared by every handler.
//!
//! Errors render as `{"error": {"code", "message", "details"}}` with the
//! status implied by the code. Ownership failures deliberately surface as
//! 404 so callers cannot probe for resources belonging to other tenants.

use std::collections::BTreeMap;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Per-field validation messages, keyed by field name.
pub type FieldErrors = BTreeMap<String, Vec<String>>;

/// Machine-readable error codes carried in the response body
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    BadRequest,
    Unauthorized,
    Forbidden,
    NotFound,
    Conflict,
    ValidationError,
    InternalError,
    DatabaseError,
    ExternalServiceError,
}

impl ErrorCode {
    fn wire(self) -> (StatusCode, &'static str) {
        use ErrorCode::*;
        match self {
            BadRequest => (StatusCode::BAD_REQUEST, "bad_request"),
            Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized"),
            Forbidden => (StatusCode::FORBIDDEN, "forbidden"),
            NotFound => (StatusCode::NOT_FOUND, "not_found"),
            Conflict => (StatusCode::CONFLICT, "conflict"),
            ValidationError => (StatusCode::BAD_REQUEST, "validation_error"),
            InternalError => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
            DatabaseError => (StatusCode::INTERNAL_SERVER_ERROR, "database_error"),
            ExternalServiceError => (StatusCode::BAD_GATEWAY, "external_service_error"),
        }
    }

    pub fn status_code(self) -> StatusCode {
        self.wire().0
    }

    pub fn as_str(self) -> &'static str {
        self.wire().1
    }
}

#[derive(Debug)]
pub struct ApiError {
    code: ErrorCode,
    message: String,
    field_errors: Option<FieldErrors>,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            field_errors: None,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.code.status_code()
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::BadRequest, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unauthorized, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Forbidden, message)
    }

    /// Absent, or owned by a different tenant. The two are indistinguishable.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Conflict, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    pub fn database(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::DatabaseError, message)
    }

    /// A 400 carrying per-field messages in `details`. The top-level message
    /// repeats the single failure when there is only one, so simple clients
    /// never need to dig into the map.
    pub fn validation(errors: FieldErrors) -> Self {
        let first = errors.values().next().and_then(|msgs| msgs.first());
        let message = match (errors.len(), first) {
            (1, Some(only)) => only.clone(),
            (n, _) => format!("Validation failed for {} fields", n),
        };

        let mut err = Self::new(ErrorCode::ValidationError, message);
        err.field_errors = Some(errors);
        err
    }

    pub fn validation_field(field: &str, message: impl Into<String>) -> Self {
        let mut errors = FieldErrors::new();
        errors.insert(field.to_string(), vec![message.into()]);
        Self::validation(errors)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut body = json!({
            "error": {
                "code": self.code.as_str(),
                "message": self.message,
            }
        });
        if let Some(ref fields) = self.field_errors {
            body["error"]["details"] = json!(fields);
        }

        (self.status(), Json(body)).into_response()
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code.as_str(), self.message)
    }
}

impl std::error::Error for ApiError {}

/// Catch-all for query failures a handler has no better mapping for.
/// Constraint violations become client errors; anything else is a 500.
impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        tracing::error!("Database error: {}", err);

        if matches!(err, sqlx::Error::RowNotFound) {
            return ApiError::not_found("Resource not found");
        }

        let constraint = match &err {
            sqlx::Error::Database(db_err) => db_err.message().to_string(),
            _ => String::new(),
        };

        if constraint.contains("UNIQUE constraint failed") {
            ApiError::conflict("A resource with this identifier already exists")
        } else if constraint.contains("FOREIGN KEY constraint failed") {
            ApiError::bad_request("Referenced resource does not exist")
        } else {
            ApiError::database("A database error occurred")
        }
    }
}

/// Accumulates field errors across a request's validators, then either
/// passes or turns into a single validation ApiError.
#[derive(Debug, Default)]
pub struct ValidationErrorBuilder {
    errors: FieldErrors,
}

impl ValidationErrorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) -> &mut Self {
        self.errors
            .entry(field.into())
            .or_default()
            .push(message.into());
        self
    }

    pub fn finish(self) -> Result<(), ApiError> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(ApiError::validation(self.errors))
        }
    }
}
