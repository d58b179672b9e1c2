use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use sea_orm::error::{DbErr, SqlErr};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

fn current_request_id() -> Option<String> {
    crate::tracing::current_request_id().map(|rid| rid.as_str().to_string())
}

/// Error body returned by every failing endpoint.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "error": "Not Found",
    "code": "NOT_FOUND",
    "message": "Not found: Production order 550e8400-e29b-41d4-a716-446655440000 not found",
    "details": null,
    "request_id": "req-abc123xyz",
    "timestamp": "2024-12-09T10:30:00.000Z"
}))]
pub struct ErrorResponse {
    /// HTTP status category (e.g., "Not Found", "Bad Request")
    #[schema(example = "Not Found")]
    pub error: String,
    /// Machine-readable error code
    #[schema(example = "NOT_FOUND")]
    pub code: String,
    /// Human-readable error description
    pub message: String,
    /// Additional detail, such as the violated constraint
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    /// Unique request identifier for support and debugging
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(example = "req-abc123xyz")]
    pub request_id: Option<String>,
    /// RFC 3339 timestamp when the error occurred
    pub timestamp: String,
}

/// Stable error codes exposed to API clients.
pub mod codes {
    pub const DUPLICATE_ENTRY: &str = "DUPLICATE_ENTRY";
    pub const INVALID_REFERENCE: &str = "INVALID_REFERENCE";
    pub const REFERENCE_EXISTS: &str = "REFERENCE_EXISTS";
    pub const NOT_FOUND: &str = "NOT_FOUND";
    pub const INSUFFICIENT_QUANTITY: &str = "INSUFFICIENT_QUANTITY";
    pub const ALREADY_EXISTS: &str = "ALREADY_EXISTS";
    pub const UNAUTHORIZED: &str = "UNAUTHORIZED";
    pub const FORBIDDEN: &str = "FORBIDDEN";
    pub const VALIDATION_ERROR: &str = "VALIDATION_ERROR";
    pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";
}

#[derive(Debug, thiserror::Error, Serialize)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(
        #[from]
        #[serde(skip)]
        sea_orm::error::DbErr,
    ),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Already exists: {0}")]
    Conflict(String),

    #[error("Insufficient stock: {0}")]
    InsufficientStock(String),

    #[error("Still referenced: {0}")]
    ReferenceExists(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Migration error: {0}")]
    MigrationError(String),

    #[error("Other error: {0}")]
    Other(
        #[from]
        #[serde(skip)]
        anyhow::Error,
    ),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

impl From<serde_json::Error> for ServiceError {
    fn from(err: serde_json::Error) -> Self {
        ServiceError::SerializationError(err.to_string())
    }
}

/// How a database failure surfaces to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbFailure {
    Duplicate,
    MissingReference,
    StillReferenced,
    RecordNotFound,
    Other,
}

/// Classifies a database error by the constraint it violated.
///
/// MySQL distinguishes a missing parent ("Cannot add or update a child row")
/// from a delete blocked by children ("Cannot delete or update a parent row");
/// SQLite reports both as a bare foreign key failure, which is treated as a
/// missing reference.
pub fn classify_db_error(err: &DbErr) -> DbFailure {
    if matches!(err, DbErr::RecordNotFound(_)) {
        return DbFailure::RecordNotFound;
    }
    match err.sql_err() {
        Some(SqlErr::UniqueConstraintViolation(_)) => DbFailure::Duplicate,
        Some(SqlErr::ForeignKeyConstraintViolation(msg)) => {
            if msg.to_lowercase().contains("parent row") {
                DbFailure::StillReferenced
            } else {
                DbFailure::MissingReference
            }
        }
        _ => DbFailure::Other,
    }
}

impl ServiceError {
    pub fn db_error(error: DbErr) -> Self {
        ServiceError::DatabaseError(error)
    }

    pub fn not_found(entity: &str, id: impl std::fmt::Display) -> Self {
        ServiceError::NotFound(format!("{} {} not found", entity, id))
    }

    /// Returns the HTTP status code for this error.
    /// This is the single source of truth for error-to-status mapping.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::DatabaseError(err) => match classify_db_error(err) {
                DbFailure::Duplicate => StatusCode::CONFLICT,
                DbFailure::MissingReference | DbFailure::StillReferenced => StatusCode::BAD_REQUEST,
                DbFailure::RecordNotFound => StatusCode::NOT_FOUND,
                DbFailure::Other => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::ValidationError(_)
            | Self::InvalidOperation(_)
            | Self::InsufficientStock(_)
            | Self::ReferenceExists(_) => StatusCode::BAD_REQUEST,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::InternalError(_)
            | Self::SerializationError(_)
            | Self::MigrationError(_)
            | Self::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Machine-readable code paired with [`status_code`](Self::status_code).
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::DatabaseError(err) => match classify_db_error(err) {
                DbFailure::Duplicate => codes::DUPLICATE_ENTRY,
                DbFailure::MissingReference => codes::INVALID_REFERENCE,
                DbFailure::StillReferenced => codes::REFERENCE_EXISTS,
                DbFailure::RecordNotFound => codes::NOT_FOUND,
                DbFailure::Other => codes::INTERNAL_ERROR,
            },
            Self::NotFound(_) => codes::NOT_FOUND,
            Self::InsufficientStock(_) => codes::INSUFFICIENT_QUANTITY,
            Self::ReferenceExists(_) => codes::REFERENCE_EXISTS,
            Self::Conflict(_) => codes::ALREADY_EXISTS,
            Self::Forbidden(_) => codes::FORBIDDEN,
            Self::ValidationError(_) | Self::InvalidOperation(_) => codes::VALIDATION_ERROR,
            Self::InternalError(_)
            | Self::SerializationError(_)
            | Self::MigrationError(_)
            | Self::Other(_) => codes::INTERNAL_ERROR,
        }
    }

    /// Returns the error message suitable for HTTP responses.
    /// Internal errors return generic messages to avoid leaking implementation details.
    pub fn response_message(&self) -> String {
        match self {
            Self::DatabaseError(err) => match classify_db_error(err) {
                DbFailure::Duplicate => "Record already exists".to_string(),
                DbFailure::MissingReference => "Referenced record does not exist".to_string(),
                DbFailure::StillReferenced => {
                    "Record cannot be deleted because other records reference it".to_string()
                }
                DbFailure::RecordNotFound => "Record not found".to_string(),
                DbFailure::Other => "Database error".to_string(),
            },
            Self::SerializationError(_)
            | Self::MigrationError(_)
            | Self::InternalError(_)
            | Self::Other(_) => "Internal server error".to_string(),
            _ => self.to_string(),
        }
    }

    /// Constraint text for database errors that clients can act on.
    fn response_details(&self) -> Option<String> {
        match self {
            Self::DatabaseError(err) => match classify_db_error(err) {
                DbFailure::Other => None,
                _ => Some(err.to_string()),
            },
            _ => None,
        }
    }

    fn to_error_response(&self) -> ErrorResponse {
        let status = self.status_code();
        ErrorResponse {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            code: self.error_code().to_string(),
            message: self.response_message(),
            details: self.response_details(),
            request_id: current_request_id(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        (status, Json(self.to_error_response())).into_response()
    }
}

/// API Error type for HTTP responses
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Service error: {0}")]
    ServiceError(#[from] ServiceError),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Internal server error")]
    InternalServerError,

    #[error("Bad request: {message}")]
    BadRequest {
        message: String,
        error_code: Option<String>,
    },
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, error_message) = match self {
            ApiError::ServiceError(service_error) => return service_error.into_response(),
            ApiError::ValidationError(msg) => (
                StatusCode::BAD_REQUEST,
                codes::VALIDATION_ERROR.to_string(),
                msg,
            ),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, codes::NOT_FOUND.to_string(), msg),
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                codes::UNAUTHORIZED.to_string(),
                "Unauthorized".to_string(),
            ),
            ApiError::InternalServerError => (
                StatusCode::INTERNAL_SERVER_ERROR,
                codes::INTERNAL_ERROR.to_string(),
                "Internal server error".to_string(),
            ),
            ApiError::BadRequest {
                message,
                error_code,
            } => (
                StatusCode::BAD_REQUEST,
                error_code.unwrap_or_else(|| codes::VALIDATION_ERROR.to_string()),
                message,
            ),
        };

        let error_response = ErrorResponse {
            error: status
                .canonical_reason()
                .unwrap_or("Unknown Error")
                .to_string(),
            code,
            message: error_message,
            details: None,
            request_id: current_request_id(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        (status, Json(error_response)).into_response()
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(err: validator::ValidationErrors) -> Self {
        ApiError::ValidationError(err.to_string())
    }
}

impl From<DbErr> for ApiError {
    fn from(err: DbErr) -> Self {
        ApiError::ServiceError(ServiceError::DatabaseError(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::to_bytes, http::StatusCode};
    use rstest::rstest;

    #[tokio::test]
    async fn service_error_response_includes_request_id() {
        let response =
            crate::tracing::scope_request_id(crate::tracing::RequestId::new("req-123"), async {
                ServiceError::NotFound("missing".into()).into_response()
            })
            .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let payload: ErrorResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(payload.request_id.as_deref(), Some("req-123"));
        assert_eq!(payload.code, "NOT_FOUND");
    }

    #[tokio::test]
    async fn api_error_delegates_to_service_error_body() {
        let response =
            ApiError::ServiceError(ServiceError::InsufficientStock("Material shortage".into()))
                .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let payload: ErrorResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(payload.code, "INSUFFICIENT_QUANTITY");
        assert_eq!(payload.message, "Insufficient stock: Material shortage");
    }

    #[rstest]
    #[case(ServiceError::NotFound("x".into()), StatusCode::NOT_FOUND, "NOT_FOUND")]
    #[case(ServiceError::InsufficientStock("x".into()), StatusCode::BAD_REQUEST, "INSUFFICIENT_QUANTITY")]
    #[case(ServiceError::Conflict("x".into()), StatusCode::CONFLICT, "ALREADY_EXISTS")]
    #[case(ServiceError::ReferenceExists("x".into()), StatusCode::BAD_REQUEST, "REFERENCE_EXISTS")]
    #[case(ServiceError::Forbidden("x".into()), StatusCode::FORBIDDEN, "FORBIDDEN")]
    #[case(ServiceError::InvalidOperation("x".into()), StatusCode::BAD_REQUEST, "VALIDATION_ERROR")]
    #[case(ServiceError::InternalError("x".into()), StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR")]
    fn service_error_status_and_code(
        #[case] err: ServiceError,
        #[case] status: StatusCode,
        #[case] code: &str,
    ) {
        assert_eq!(err.status_code(), status);
        assert_eq!(err.error_code(), code);
    }

    #[test]
    fn record_not_found_maps_to_404() {
        let err = ServiceError::DatabaseError(DbErr::RecordNotFound("bom".into()));
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(err.error_code(), "NOT_FOUND");
    }

    #[test]
    fn generic_database_error_is_hidden() {
        let err = ServiceError::db_error(DbErr::Custom("connection reset by peer".into()));
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.error_code(), "INTERNAL_ERROR");
        assert_eq!(err.response_message(), "Database error");
        assert!(err.response_details().is_none());
    }

    #[test]
    fn service_error_response_message_hides_internal_details() {
        assert_eq!(
            ServiceError::MigrationError("sensitive".into()).response_message(),
            "Internal server error"
        );
        assert_eq!(
            ServiceError::NotFound("BOM not found".into()).response_message(),
            "Not found: BOM not found"
        );
    }
}
