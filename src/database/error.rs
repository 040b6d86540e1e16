use thiserror::Error;

/// Database-layer error with a coarse kind used for retry decisions and
/// HTTP mapping.
#[derive(Debug, Error)]
#[error("{kind}")]
pub struct DatabaseError {
    kind: DatabaseErrorKind,
}

#[derive(Debug, Error)]
pub enum DatabaseErrorKind {
    #[error("connection error: {message}")]
    Connection { message: String },

    #[error("{entity} not found")]
    NotFound { entity: String },

    #[error("constraint violation: {message}")]
    Constraint { message: String },

    #[error("database error: {message}")]
    Unknown { message: String },
}

impl DatabaseError {
    pub fn new(kind: DatabaseErrorKind) -> Self {
        Self { kind }
    }

    pub fn kind(&self) -> &DatabaseErrorKind {
        &self.kind
    }

    pub fn not_found(entity: impl Into<String>) -> Self {
        Self::new(DatabaseErrorKind::NotFound {
            entity: entity.into(),
        })
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self.kind, DatabaseErrorKind::Connection { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self.kind, DatabaseErrorKind::NotFound { .. })
    }

    pub fn from_sqlx(error: sqlx::Error) -> Self {
        let kind = match &error {
            sqlx::Error::RowNotFound => DatabaseErrorKind::NotFound {
                entity: "row".to_string(),
            },
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                DatabaseErrorKind::Connection {
                    message: error.to_string(),
                }
            }
            sqlx::Error::Database(db) => match db.kind() {
                sqlx::error::ErrorKind::UniqueViolation
                | sqlx::error::ErrorKind::ForeignKeyViolation
                | sqlx::error::ErrorKind::NotNullViolation
                | sqlx::error::ErrorKind::CheckViolation => DatabaseErrorKind::Constraint {
                    message: db.message().to_string(),
                },
                _ => DatabaseErrorKind::Unknown {
                    message: db.message().to_string(),
                },
            },
            _ => DatabaseErrorKind::Unknown {
                message: error.to_string(),
            },
        };
        Self::new(kind)
    }
}

impl From<DatabaseError> for crate::error::AppError {
    fn from(err: DatabaseError) -> Self {
        use crate::error::{AppError, AppErrorKind, InfrastructureError};

        AppError::new(AppErrorKind::Infrastructure(InfrastructureError::Database {
            message: err.to_string(),
            is_retryable: err.is_retryable(),
        }))
    }
}
