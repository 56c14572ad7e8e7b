//! Full-replace mode: export the source, drop the target, reload the export.

use snapshot::{SnapshotDir, SnapshotKind};
use std::path::Path;

use crate::stats::{CollectionStats, ReconcileStats};
use crate::store::DocumentStore;
use crate::SyncError;

/// Export every collection of the source database into a fresh export directory.
pub async fn export_source<S: DocumentStore + ?Sized>(
    source: &S,
    source_db: &str,
    collections: &[String],
    snapshot_root: &Path,
) -> Result<SnapshotDir, SyncError> {
    let export = SnapshotDir::create(snapshot_root, SnapshotKind::Export)?;
    tracing::info!("Exporting source collections to {}", export.path().display());

    for collection in collections {
        let documents = source
            .find_all(source_db, collection)
            .await
            .map_err(SyncError::reconcile(collection))?;
        export.write_collection(collection, &documents)?;
        tracing::info!("Exported '{}': {} documents", collection, documents.len());
    }
    Ok(export)
}

/// Drop the target database and bulk-insert every exported collection verbatim.
pub async fn replace_from_export<T: DocumentStore + ?Sized>(
    target: &T,
    target_db: &str,
    export: &SnapshotDir,
) -> Result<ReconcileStats, SyncError> {
    tracing::warn!("Dropping target database '{}'", target_db);
    target.drop_database(target_db).await?;

    let mut stats = ReconcileStats::new();
    for collection in export.collections()? {
        let documents = export.read_collection(&collection)?;
        if documents.is_empty() {
            tracing::debug!("Skipping empty collection '{}'", collection);
            continue;
        }

        let count = documents.len() as u64;
        target
            .insert_many(target_db, &collection, documents)
            .await
            .map_err(SyncError::reconcile(&collection))?;
        tracing::info!("Imported '{}': {} documents", collection, count);

        stats.record(&CollectionStats {
            created: count,
            ..Default::default()
        });
    }
    stats.log_summary();
    Ok(stats)
}

/// Full resynchronization of the target from the source.
pub async fn full_replace<S, T>(
    source: &S,
    source_db: &str,
    target: &T,
    target_db: &str,
    collections: &[String],
    snapshot_root: &Path,
) -> Result<ReconcileStats, SyncError>
where
    S: DocumentStore + ?Sized,
    T: DocumentStore + ?Sized,
{
    let export = export_source(source, source_db, collections, snapshot_root).await?;
    replace_from_export(target, target_db, &export).await
}
