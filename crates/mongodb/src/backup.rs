//! Backup of the target database before any destructive operation.

use snapshot::{SnapshotDir, SnapshotKind};
use std::path::{Path, PathBuf};

use crate::store::DocumentStore;
use crate::SyncError;

/// Write every collection of `target_db` into a fresh backup directory.
///
/// Returns `None` without touching the filesystem when the target has no
/// collections. Any failure is fatal: the run must not go on to modify the
/// target without a complete backup.
pub async fn backup_if_present<T: DocumentStore + ?Sized>(
    target: &T,
    target_db: &str,
    backup_root: &Path,
) -> Result<Option<PathBuf>, SyncError> {
    let collections = target.list_collections(target_db).await?;
    if collections.is_empty() {
        tracing::info!("Target database '{}' is empty, no backup needed", target_db);
        return Ok(None);
    }

    let backup = SnapshotDir::create(backup_root, SnapshotKind::Backup)?;
    tracing::info!(
        "Backing up {} collections of '{}' to {}",
        collections.len(),
        target_db,
        backup.path().display()
    );

    for collection in &collections {
        let documents = target.find_all(target_db, collection).await?;
        backup
            .write_collection(collection, &documents)
            .map_err(|source| SyncError::Backup {
                collection: collection.clone(),
                source,
            })?;
        tracing::debug!("Backed up '{}': {} documents", collection, documents.len());
    }

    tracing::info!("Backup written to {}", backup.path().display());
    Ok(Some(backup.path().to_path_buf()))
}
