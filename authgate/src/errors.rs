use axum::{
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use thiserror::Error as ThisError;

use crate::db::errors::DbError;

/// Failures raised while decoding or checking a credential.
///
/// These never reach the client verbatim: the dispatcher collapses every variant that
/// concerns authentication into a generic 401.
#[derive(ThisError, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// Structurally invalid input (wrong delimiter count, non-base64, truncated buffer)
    #[error("Malformed token: {reason}")]
    MalformedToken { reason: String },

    /// Well-formed token whose signature or MAC does not verify
    #[error("Invalid token signature")]
    InvalidSignature,

    /// Valid signature but past its expiry
    #[error("Token expired")]
    Expired,

    /// Valid and unexpired, but no longer present in the revocation store
    #[error("Token {id} has been revoked")]
    Revoked { id: String },

    /// Authorization code exchanged by a client other than the one it was issued to
    #[error("Client {caller} is not allowed to redeem a code issued to {client_id}")]
    ClientMismatch { caller: String, client_id: String },

    /// OAuth `response_type` other than `code`
    #[error("Unsupported response type: {response_type}")]
    UnsupportedResponseType { response_type: String },
}

impl AuthError {
    pub fn malformed(reason: impl Into<String>) -> Self {
        AuthError::MalformedToken { reason: reason.into() }
    }

    /// Stable reason code, useful for log correlation.
    pub fn reason_code(&self) -> &'static str {
        match self {
            AuthError::MalformedToken { .. } => "AKY0101E",
            AuthError::InvalidSignature | AuthError::Expired | AuthError::Revoked { .. } => "AKY0100E",
            AuthError::UnsupportedResponseType { .. } => "OAH0001E",
            AuthError::ClientMismatch { .. } => "OAH0002E",
        }
    }
}

#[derive(ThisError, Debug)]
pub enum Error {
    /// Authentication required but not provided, or provided and rejected
    #[error("Not authenticated")]
    Unauthenticated { message: Option<String> },

    /// Caller is authenticated but not allowed to perform the operation
    #[error("Forbidden: {message}")]
    Forbidden { message: String },

    /// Invalid request data
    #[error("{message}")]
    BadRequest { message: String },

    /// Requested resource not found
    #[error("{resource} with ID {id} not found")]
    NotFound { resource: String, id: String },

    /// Well-formed request that cannot be processed, such as a token that does not decode
    #[error("{message}")]
    Unprocessable { message: String },

    /// Conflict with existing state, e.g. a name that is already taken
    #[error("Conflict: {message}")]
    Conflict { message: String },

    /// A backing service the operation needs is not configured
    #[error("Service unavailable: {message}")]
    ServiceUnavailable { message: String },

    /// Generic internal service error
    #[error("Failed to {operation}")]
    Internal { operation: String },

    /// Database operation error
    #[error(transparent)]
    Database(#[from] DbError),

    /// Credential-level failure
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// Unexpected error with full context chain
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::Unauthenticated { .. } => StatusCode::UNAUTHORIZED,
            Error::Forbidden { .. } => StatusCode::FORBIDDEN,
            Error::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Error::NotFound { .. } => StatusCode::NOT_FOUND,
            Error::Unprocessable { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Error::Conflict { .. } => StatusCode::CONFLICT,
            Error::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Error::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Database(db_err) => match db_err {
                DbError::NotFound => StatusCode::NOT_FOUND,
                DbError::UniqueViolation { .. } => StatusCode::CONFLICT,
                DbError::InvalidInput { .. } => StatusCode::BAD_REQUEST,
                DbError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Error::Auth(auth_err) => match auth_err {
                AuthError::ClientMismatch { .. } => StatusCode::FORBIDDEN,
                AuthError::UnsupportedResponseType { .. } => StatusCode::BAD_REQUEST,
                _ => StatusCode::UNAUTHORIZED,
            },
            Error::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns a user-safe error message, without leaking internal implementation details
    pub fn user_message(&self) -> String {
        match self {
            Error::Unauthenticated { message } => message.clone().unwrap_or_else(|| "Authentication required".to_string()),
            Error::Forbidden { .. } => "Access denied".to_string(),
            Error::BadRequest { message } => message.clone(),
            Error::NotFound { resource, id } => format!("{resource} with ID {id} not found"),
            Error::Unprocessable { message } => message.clone(),
            Error::Conflict { message } => message.clone(),
            Error::ServiceUnavailable { message } => message.clone(),
            Error::Internal { .. } => "Internal server error".to_string(),
            Error::Database(db_err) => match db_err {
                DbError::NotFound => "Resource not found".to_string(),
                DbError::UniqueViolation { constraint, .. } => match constraint.as_deref() {
                    Some("access_tokens_name_unique") => "An access key with this name already exists".to_string(),
                    _ => "Resource already exists".to_string(),
                },
                DbError::InvalidInput { message } => format!("Invalid input: {message}"),
                DbError::Other(_) => "Database error occurred".to_string(),
            },
            Error::Auth(auth_err) => match auth_err {
                AuthError::ClientMismatch { .. } => "Access denied".to_string(),
                AuthError::UnsupportedResponseType { response_type } => format!("Unsupported response type: {response_type}"),
                // Which check failed is deliberately not disclosed
                _ => "Authentication required".to_string(),
            },
            Error::Other(_) => "Internal server error".to_string(),
        }
    }
}

/// Generic 401 carrying the headers that keep intermediaries from caching it.
pub fn unauthorized_response() -> Response {
    let mut response = (StatusCode::UNAUTHORIZED, "Authentication required").into_response();
    disable_caching(&mut response);
    response
}

pub(crate) fn disable_caching(response: &mut Response) {
    let headers = response.headers_mut();
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        // Log full error details for debugging - different log levels based on severity
        match &self {
            Error::Database(DbError::Other(_)) | Error::Internal { .. } | Error::Other(_) => {
                tracing::error!("Internal service error: {:#}", self);
            }
            Error::ServiceUnavailable { .. } => {
                tracing::warn!("Service unavailable: {}", self);
            }
            Error::Database(_) | Error::Conflict { .. } => {
                tracing::warn!("Conflict or constraint error: {}", self);
            }
            Error::Unauthenticated { .. } | Error::Forbidden { .. } => {
                tracing::info!("Authorization error: {}", self);
            }
            Error::Auth(auth_err) => {
                tracing::info!(reason = auth_err.reason_code(), "Authentication error: {}", auth_err);
            }
            Error::BadRequest { .. } | Error::NotFound { .. } | Error::Unprocessable { .. } => {
                tracing::debug!("Client error: {}", self);
            }
        }

        let status = self.status_code();
        let mut response = (status, self.user_message()).into_response();
        if status == StatusCode::UNAUTHORIZED {
            disable_caching(&mut response);
        }
        response
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_failures_map_to_generic_401() {
        let errors = [
            Error::Auth(AuthError::malformed("missing signature")),
            Error::Auth(AuthError::InvalidSignature),
            Error::Auth(AuthError::Expired),
            Error::Auth(AuthError::Revoked { id: "K1".to_string() }),
        ];

        for err in errors {
            assert_eq!(err.status_code(), StatusCode::UNAUTHORIZED);
            assert_eq!(err.user_message(), "Authentication required");
        }
    }

    #[test]
    fn test_oauth_errors_status() {
        let mismatch = Error::Auth(AuthError::ClientMismatch {
            caller: "a".to_string(),
            client_id: "b".to_string(),
        });
        assert_eq!(mismatch.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(mismatch.user_message(), "Access denied");

        let unsupported = Error::Auth(AuthError::UnsupportedResponseType {
            response_type: "token".to_string(),
        });
        assert_eq!(unsupported.status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_unauthenticated_response_disables_caching() {
        let response = Error::Unauthenticated { message: None }.into_response();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(response.headers().get(header::CACHE_CONTROL).unwrap(), "no-cache");
        assert_eq!(response.headers().get(header::PRAGMA).unwrap(), "no-cache");
    }

    #[test]
    fn test_internal_error_hides_details() {
        let err = Error::Internal {
            operation: "load signing key from /secret/path".to_string(),
        };
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.user_message(), "Internal server error");
    }

    #[test]
    fn test_database_errors_status() {
        let duplicate = Error::Database(DbError::UniqueViolation {
            constraint: Some("access_tokens_name_unique".to_string()),
            table: Some("access_tokens".to_string()),
            message: "duplicate key value violates unique constraint".to_string(),
        });
        assert_eq!(duplicate.status_code(), StatusCode::CONFLICT);
        assert_eq!(duplicate.user_message(), "An access key with this name already exists");

        assert_eq!(Error::Database(DbError::NotFound).status_code(), StatusCode::NOT_FOUND);
        assert_eq!(
            Error::Database(DbError::InvalidInput {
                message: "invalid regular expression".to_string()
            })
            .status_code(),
            StatusCode::BAD_REQUEST
        );

        let other = Error::Database(DbError::Other(anyhow::anyhow!("connection reset by 10.0.0.5")));
        assert_eq!(other.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(other.user_message(), "Database error occurred");
    }

    #[test]
    fn test_resource_errors_status() {
        let missing = Error::NotFound {
            resource: "Access key".to_string(),
            id: "K1".to_string(),
        };
        assert_eq!(missing.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(missing.user_message(), "Access key with ID K1 not found");

        let unavailable = Error::ServiceUnavailable {
            message: "no database configured".to_string(),
        };
        assert_eq!(unavailable.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            Error::Unprocessable { message: "x".to_string() }.status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }

    #[test]
    fn test_reason_codes() {
        assert_eq!(AuthError::malformed("x").reason_code(), "AKY0101E");
        assert_eq!(AuthError::InvalidSignature.reason_code(), "AKY0100E");
        assert_eq!(
            AuthError::UnsupportedResponseType {
                response_type: "token".to_string()
            }
            .reason_code(),
            "OAH0001E"
        );
    }
}
