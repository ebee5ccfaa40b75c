use sea_orm::{DbErr, RuntimeErr};
use thiserror::Error;

/// SQLSTATE reported by PostgreSQL when a serializable transaction loses a
/// conflict and has to be retried.
const SERIALIZATION_FAILURE: &str = "40001";

/// Errors surfaced by a [`RecordGateway`](crate::gateway::RecordGateway).
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("record not found: file={file} key={key} branch={version}")]
    NotFound {
        file: String,
        key: String,
        version: String,
    },

    /// A value does not fit the column it is written to.
    #[error("{field} must be {min}-{max} characters (got {actual})")]
    InvalidField {
        field: &'static str,
        min: usize,
        max: usize,
        actual: usize,
    },

    #[error("Database error: {0}")]
    Database(#[from] DbErr),
}

/// Errors surfaced by the branch store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Schema assertion failed for table {table}")]
    Schema {
        table: String,
        #[source]
        source: DbErr,
    },

    #[error("Branch operation {op} failed")]
    Branch {
        op: &'static str,
        #[source]
        source: DbErr,
    },

    /// Rollback failed after an earlier error. The earlier error is the source.
    #[error("Rollback of {op} failed: {rollback}")]
    Rollback {
        op: &'static str,
        rollback: DbErr,
        #[source]
        source: Box<StoreError>,
    },

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error("Branch operation {op} cancelled before commit")]
    Cancelled { op: &'static str },
}

impl StoreError {
    /// Whether the database aborted the operation with a serialization
    /// failure, directly or underneath a failed rollback.
    pub fn is_serialization_failure(&self) -> bool {
        match self {
            Self::Branch { source, .. } => is_serialization_failure(source),
            Self::Rollback { source, .. } => source.is_serialization_failure(),
            Self::Gateway(GatewayError::Database(source)) => is_serialization_failure(source),
            _ => false,
        }
    }

    /// Whether the operation was cancelled, directly or underneath a failed
    /// rollback.
    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Cancelled { .. } => true,
            Self::Rollback { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }
}

/// Checks a raw database error for SQLSTATE 40001.
pub fn is_serialization_failure(err: &DbErr) -> bool {
    let runtime = match err {
        DbErr::Conn(e) | DbErr::Exec(e) | DbErr::Query(e) => e,
        _ => return false,
    };

    match runtime {
        RuntimeErr::SqlxError(e) => e
            .as_database_error()
            .and_then(|db| db.code())
            .is_some_and(|code| code == SERIALIZATION_FAILURE),
        _ => false,
    }
}
