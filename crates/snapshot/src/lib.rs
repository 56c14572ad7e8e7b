//! Snapshot files for mongo-mirror
//!
//! Backups of the target database and exports of the source database share
//! one on-disk layout: a timestamped directory per run, with one JSON file per
//! collection holding that collection's documents in canonical Extended JSON.
//!
//! ```text
//! mongodb-backups/
//!   backup-2024-01-01T10-00-00-000Z/
//!     pages.json
//!     users.json
//!   export-2024-01-01T10-00-01-250Z/
//!     pages.json
//! ```
//!
//! Snapshot directories are never deleted by this crate.

mod file;
mod filesystem;
mod kind;


pub use file::{
    collection_file_name, decode_documents, encode_documents, COLLECTION_FILE_EXTENSION,
};
pub use filesystem::SnapshotDir;
pub use kind::SnapshotKind;

use std::path::PathBuf;

/// Errors raised while writing or reading snapshot files.
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid Extended JSON: {0}")]
    ExtendedJson(String),

    #[error("entry {position} is not a document (found {found})")]
    NotADocument { position: usize, found: String },

    #[error("collection name '{0}' cannot be used as a file name")]
    InvalidCollectionName(String),
}
