use crate::ident::MalformedIdentifier;
use crate::models::EntityKind;
use thiserror::Error;

pub type ImportResult<T> = Result<T, ImportError>;

/// Fatal import failures. Any of these halts the run; a restarted run skips
/// everything that was already correlated.
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("malformed export stream at line {line}: {message}")]
    Protocol { line: usize, message: String },
    #[error(transparent)]
    MalformedIdentifier(#[from] MalformedIdentifier),
    #[error("{kind} `{external_id}` is referenced before it was imported")]
    DanglingReference {
        kind: EntityKind,
        external_id: String,
    },
    #[error("consistency check failed: {0}")]
    Consistency(String),
    #[error("invalid {kind} record `{external_id}`: {message}")]
    InvalidRecord {
        kind: EntityKind,
        external_id: String,
        message: String,
    },
    #[error("destination error: {0}")]
    Destination(#[from] DestinationError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ImportError {
    pub fn protocol(line: usize, message: impl Into<String>) -> Self {
        ImportError::Protocol {
            line,
            message: message.into(),
        }
    }

    pub fn dangling(kind: EntityKind, external_id: impl Into<String>) -> Self {
        ImportError::DanglingReference {
            kind,
            external_id: external_id.into(),
        }
    }
}

/// Errors raised by a destination backend.
#[derive(Debug, Error)]
pub enum DestinationError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("avatar fetch error: {0}")]
    Avatar(#[from] reqwest::Error),
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },
}
