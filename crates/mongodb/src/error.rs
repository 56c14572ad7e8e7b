//! Error types for the reconcile engine.

use snapshot::SnapshotError;

use crate::resolve::{render_summaries, DatabaseSummary};

/// Server error code for a unique index violation.
pub const DUPLICATE_KEY_CODE: i32 = 11000;

/// Server error code returned when a namespace does not exist.
pub const NAMESPACE_NOT_FOUND_CODE: i32 = 26;

/// Errors raised by a [`crate::DocumentStore`].
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The server could not be reached (server selection, I/O, DNS or pool failure).
    #[error("store unreachable: {0}")]
    Unreachable(String),

    /// A write violated a unique index.
    #[error("duplicate key: {message}")]
    DuplicateKey { message: String },

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("MongoDB error: {0}")]
    Driver(#[source] mongodb::error::Error),

    #[error("{0}")]
    Other(String),
}

impl StoreError {
    pub fn is_duplicate_key(&self) -> bool {
        matches!(self, StoreError::DuplicateKey { .. })
    }
}

impl From<mongodb::error::Error> for StoreError {
    fn from(err: mongodb::error::Error) -> Self {
        use mongodb::error::{ErrorKind, WriteFailure};

        let classified = match err.kind.as_ref() {
            ErrorKind::ServerSelection { .. }
            | ErrorKind::Io(_)
            | ErrorKind::DnsResolve { .. }
            | ErrorKind::ConnectionPoolCleared { .. } => {
                Some(StoreError::Unreachable(err.to_string()))
            }
            ErrorKind::Write(WriteFailure::WriteError(write_error))
                if write_error.code == DUPLICATE_KEY_CODE =>
            {
                Some(StoreError::DuplicateKey {
                    message: write_error.message.clone(),
                })
            }
            ErrorKind::Command(command_error) if command_error.code == DUPLICATE_KEY_CODE => {
                Some(StoreError::DuplicateKey {
                    message: command_error.message.clone(),
                })
            }
            _ => None,
        };

        match classified {
            Some(store_error) => store_error,
            None => StoreError::Driver(err),
        }
    }
}

impl From<bson::ser::Error> for StoreError {
    fn from(err: bson::ser::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

/// Fatal errors of a mirror run.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("cannot connect to {uri}: {reason}")]
    Connection { uri: String, reason: String },

    #[error(
        "source database '{database}' has no collections. Visible databases:\n{}",
        render_summaries(.available)
    )]
    EmptySourceDatabase {
        database: String,
        available: Vec<DatabaseSummary>,
    },

    #[error("backup of collection '{collection}' failed: {source}")]
    Backup {
        collection: String,
        #[source]
        source: SnapshotError,
    },

    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    #[error("failed to reconcile collection '{collection}': {source}")]
    Reconcile {
        collection: String,
        #[source]
        source: StoreError,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("verification failed: {0}")]
    Verification(String),
}

impl SyncError {
    pub fn reconcile(collection: &str) -> impl FnOnce(StoreError) -> SyncError + '_ {
        move |source| SyncError::Reconcile {
            collection: collection.to_string(),
            source,
        }
    }
}
