//! Error types for sqlweave

use thiserror::Error;

/// Result type alias for sqlweave operations
pub type OrmResult<T> = Result<T, OrmError>;

/// Error types for mapping, compilation and execution
#[derive(Debug, Error)]
pub enum OrmError {
    /// Mapping configuration error (duplicate columns, ambiguous keys, missing metadata)
    #[error("Mapping error: {0}")]
    Mapping(String),

    /// A member was referenced that the entity does not map
    #[error("Missing member '{member}' on entity '{entity}'")]
    MissingMember { entity: String, member: String },

    /// An expression shape without a translation rule
    #[error("Unsupported expression: {0}")]
    UnsupportedExpression(String),

    /// A statement was assembled in a way that cannot be executed safely
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Value conversion error (converter or host-side evaluation)
    #[error("Conversion error: {0}")]
    Conversion(String),

    /// Query execution error
    #[error("Query error: {0}")]
    Query(#[from] tokio_postgres::Error),

    /// Unique constraint violation
    #[error("Unique constraint violation: {0}")]
    UniqueViolation(String),

    /// Foreign key constraint violation
    #[error("Foreign key violation: {0}")]
    ForeignKeyViolation(String),

    /// Check constraint violation
    #[error("Check constraint violation: {0}")]
    CheckViolation(String),

    /// A flush or statement exceeded its timeout
    #[error("Query timeout after {0:?}")]
    Timeout(std::time::Duration),

    /// Cancellation was requested between batch flushes
    #[error("Operation cancelled after {completed} flush(es)")]
    Cancelled { completed: usize },

    /// Other errors
    #[error("{0}")]
    Other(String),
}

impl OrmError {
    /// Create a mapping error
    pub fn mapping(message: impl Into<String>) -> Self {
        Self::Mapping(message.into())
    }

    /// Create a missing member error
    pub fn missing_member(entity: impl Into<String>, member: impl Into<String>) -> Self {
        Self::MissingMember {
            entity: entity.into(),
            member: member.into(),
        }
    }

    /// Create an unsupported expression error carrying the offending expression text
    pub fn unsupported(expr: impl std::fmt::Display) -> Self {
        Self::UnsupportedExpression(expr.to_string())
    }

    /// Create an invalid operation error
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation(message.into())
    }

    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a conversion error
    pub fn conversion(message: impl Into<String>) -> Self {
        Self::Conversion(message.into())
    }

    /// Check if this error was raised while compiling (before any I/O)
    pub fn is_compile_error(&self) -> bool {
        matches!(
            self,
            Self::Mapping(_)
                | Self::MissingMember { .. }
                | Self::UnsupportedExpression(_)
                | Self::InvalidOperation(_)
                | Self::Validation(_)
                | Self::Conversion(_)
        )
    }

    /// Check if this is a unique violation error
    pub fn is_unique_violation(&self) -> bool {
        matches!(self, Self::UniqueViolation(_))
    }

    /// Check if this is a timeout error
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }

    /// Parse a tokio_postgres error into a more specific OrmError
    pub fn from_db_error(err: tokio_postgres::Error) -> Self {
        if let Some(db_err) = err.as_db_error() {
            let constraint = db_err.constraint().unwrap_or("unknown");
            let message = db_err.message();

            match db_err.code().code() {
                "23505" => return Self::UniqueViolation(format!("{}: {}", constraint, message)),
                "23503" => {
                    return Self::ForeignKeyViolation(format!("{}: {}", constraint, message));
                }
                "23514" => return Self::CheckViolation(format!("{}: {}", constraint, message)),
                _ => {}
            }
        }
        Self::Query(err)
    }
}
