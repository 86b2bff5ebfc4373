use thiserror::Error;

/// SQLSTATE raised by PostgreSQL for an unparsable regular expression
const INVALID_REGULAR_EXPRESSION: &str = "2201B";

/// Errors of database operations that application code can act on
#[derive(Error, Debug)]
pub enum DbError {
    /// Entity not found by the given identifier
    #[error("Entity not found")]
    NotFound,

    /// Unique constraint violation
    #[error("Unique constraint violation")]
    UniqueViolation {
        constraint: Option<String>,
        table: Option<String>,
        message: String,
    },

    /// Input rejected by the database, such as a malformed filter pattern
    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    /// Catch-all for non-recoverable errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => DbError::NotFound,
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => DbError::UniqueViolation {
                constraint: db_err.constraint().map(|s| s.to_string()),
                table: db_err.table().map(|s| s.to_string()),
                message: db_err.message().to_string(),
            },
            sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some(INVALID_REGULAR_EXPRESSION) => DbError::InvalidInput {
                message: db_err.message().to_string(),
            },
            _ => DbError::Other(anyhow::Error::from(err)),
        }
    }
}

pub type Result<T> = std::result::Result<T, DbError>;
