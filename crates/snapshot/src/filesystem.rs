//! Filesystem layout of snapshot directories.

use bson::Document;
use chrono::Utc;
use std::path::{Path, PathBuf};

use crate::file::{
    collection_file_name, decode_documents, encode_documents, COLLECTION_FILE_EXTENSION,
};
use crate::{SnapshotError, SnapshotKind};

/// A per-run snapshot directory holding one file per collection.
///
/// Layout: `<root>/<kind>-<timestamp>/<collection>.json`.
#[derive(Debug, Clone)]
pub struct SnapshotDir {
    dir: PathBuf,
}

impl SnapshotDir {
    /// Create a fresh timestamped directory under `root`.
    ///
    /// The root is created when missing. A numeric suffix is appended when a
    /// directory with the same timestamp already exists, so two runs never
    /// share a snapshot.
    pub fn create(root: impl AsRef<Path>, kind: SnapshotKind) -> Result<Self, SnapshotError> {
        let root = root.as_ref();
        std::fs::create_dir_all(root).map_err(|source| SnapshotError::Io {
            path: root.to_path_buf(),
            source,
        })?;

        let timestamp = Utc::now().format("%Y-%m-%dT%H-%M-%S-%3fZ").to_string();
        let mut dir = root.join(format!("{kind}-{timestamp}"));
        let mut suffix = 0u32;
        loop {
            match std::fs::create_dir(&dir) {
                Ok(()) => break,
                // Same millisecond as an earlier snapshot
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists && suffix < 100 => {
                    suffix += 1;
                    dir = root.join(format!("{kind}-{timestamp}-{suffix}"));
                }
                Err(source) => {
                    return Err(SnapshotError::Io {
                        path: dir.clone(),
                        source,
                    })
                }
            }
        }

        tracing::debug!("Created {} directory {}", kind, dir.display());
        Ok(Self { dir })
    }

    /// Get the directory path.
    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Write the full document set of one collection.
    pub fn write_collection(
        &self,
        collection: &str,
        documents: &[Document],
    ) -> Result<PathBuf, SnapshotError> {
        let path = self.dir.join(collection_file_name(collection)?);
        let content = encode_documents(documents)?;
        std::fs::write(&path, content).map_err(|source| SnapshotError::Io {
            path: path.clone(),
            source,
        })?;

        tracing::debug!(
            "Wrote {} documents of '{}' to {}",
            documents.len(),
            collection,
            path.display()
        );
        Ok(path)
    }

    /// Read back the document set of one collection.
    pub fn read_collection(&self, collection: &str) -> Result<Vec<Document>, SnapshotError> {
        let path = self.dir.join(collection_file_name(collection)?);
        let content = std::fs::read_to_string(&path).map_err(|source| SnapshotError::Io {
            path: path.clone(),
            source,
        })?;
        decode_documents(&content)
    }

    /// Names of the collections stored in this directory, sorted.
    pub fn collections(&self) -> Result<Vec<String>, SnapshotError> {
        let entries = std::fs::read_dir(&self.dir).map_err(|source| SnapshotError::Io {
            path: self.dir.clone(),
            source,
        })?;

        let mut names: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.is_file()
                    && path
                        .extension()
                        .and_then(|ext| ext.to_str())
                        .map(|ext| ext == COLLECTION_FILE_EXTENSION)
                        .unwrap_or(false)
            })
            .filter_map(|path| {
                path.file_stem()
                    .and_then(|stem| stem.to_str())
                    .map(str::to_string)
            })
            .collect();
        names.sort();
        Ok(names)
    }
}
