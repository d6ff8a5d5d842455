//! Error types for resmap

use std::time::Duration;
use thiserror::Error;

/// Result type alias for resmap operations
pub type OrmResult<T> = Result<T, OrmError>;

/// Error types for resource writes and reads.
///
/// The variants fall into three families:
/// - client errors detected from in-memory state before any SQL is issued
///   ([`OrmError::Validation`], [`OrmError::ResourceTypeMismatch`],
///   [`OrmError::RequiredRelationshipCleared`]);
/// - store failures raised while a write batch executes ([`OrmError::StoreUpdate`]),
///   which always roll the enclosing transaction back;
/// - internal invariant violations ([`OrmError::Invariant`]), which indicate that the
///   executed SQL and the include tree built for it disagree.
#[derive(Debug, Error)]
pub enum OrmError {
    /// Generic validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// A resource of the wrong type was handed to a change tracker
    #[error("Resource type mismatch: expected '{expected}', got '{actual}'")]
    ResourceTypeMismatch { expected: String, actual: String },

    /// A non-nullable to-one relationship was about to be set to null
    #[error("The relationship '{relationship}' on resource type '{resource_type}' cannot be cleared because it is a required relationship")]
    RequiredRelationshipCleared {
        relationship: String,
        resource_type: String,
    },

    /// Data store update failure (row-count mismatch or driver error during a write)
    #[error("Data store update failed: {message}")]
    StoreUpdate {
        message: String,
        #[source]
        source: Option<tokio_postgres::Error>,
    },

    /// Internal invariant violation
    #[error("Internal invariant violated: {0}")]
    Invariant(String),

    /// Query execution error outside of a write batch
    #[error("Query error: {0}")]
    Query(#[from] tokio_postgres::Error),

    /// Row decode/mapping error
    #[error("Decode error on column '{column}': {message}")]
    Decode { column: String, message: String },

    /// Unknown resource type or relationship
    #[error("Metadata error: {0}")]
    Metadata(String),

    /// Command timeout
    #[error("Command timeout after {0:?}")]
    Timeout(Duration),

    /// Cancelled through a [`CancelSignal`](crate::executor::CancelSignal)
    #[error("Operation cancelled")]
    Cancelled,
}

impl OrmError {
    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a store update failure without an underlying driver error
    pub fn store_update(message: impl Into<String>) -> Self {
        Self::StoreUpdate {
            message: message.into(),
            source: None,
        }
    }

    /// Create an invariant violation
    pub fn invariant(message: impl Into<String>) -> Self {
        Self::Invariant(message.into())
    }

    /// Create a decode error for a specific column
    pub fn decode(column: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Decode {
            column: column.into(),
            message: message.into(),
        }
    }

    /// Create a metadata lookup error
    pub fn metadata(message: impl Into<String>) -> Self {
        Self::Metadata(message.into())
    }

    /// Wrap a driver error raised while a write batch was executing.
    pub fn from_store_error(err: tokio_postgres::Error) -> Self {
        let message = match err.as_db_error() {
            Some(db_err) => match db_err.constraint() {
                Some(constraint) => format!("{} ({})", db_err.message(), constraint),
                None => db_err.message().to_string(),
            },
            None => err.to_string(),
        };
        Self::StoreUpdate {
            message,
            source: Some(err),
        }
    }

    /// Wrap a driver error raised outside of a write batch.
    pub fn from_db_error(err: tokio_postgres::Error) -> Self {
        Self::Query(err)
    }

    /// Turn any error surfaced during a write batch into a store failure.
    ///
    /// Client errors, timeouts and cancellation keep their identity.
    pub(crate) fn into_store_failure(self) -> Self {
        match self {
            Self::Query(err) => Self::from_store_error(err),
            other => other,
        }
    }

    /// Errors caused by the request itself, detected before any SQL was issued.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::Validation(_)
                | Self::ResourceTypeMismatch { .. }
                | Self::RequiredRelationshipCleared { .. }
        )
    }

    /// Check if this is a required-relationship-cleared error
    pub fn is_required_relationship_cleared(&self) -> bool {
        matches!(self, Self::RequiredRelationshipCleared { .. })
    }

    /// Check if this is a data store update failure
    pub fn is_store_failure(&self) -> bool {
        matches!(self, Self::StoreUpdate { .. })
    }

    /// Check if this is an internal invariant violation
    pub fn is_invariant(&self) -> bool {
        matches!(self, Self::Invariant(_))
    }

    /// Check if this is a timeout error
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}
