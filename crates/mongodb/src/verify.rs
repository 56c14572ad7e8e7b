//! Post-run sanity check of the target database.

use crate::store::DocumentStore;
use crate::SyncError;

/// Count the documents of every target collection.
///
/// Returns `false` when the target has no collections at all. The counts are
/// logged only; documents are not compared against the source again.
pub async fn verify<T: DocumentStore + ?Sized>(
    target: &T,
    target_db: &str,
) -> Result<bool, SyncError> {
    let collections = target.list_collections(target_db).await?;
    if collections.is_empty() {
        tracing::error!("Target database '{}' has no collections", target_db);
        return Ok(false);
    }

    let mut total = 0u64;
    for collection in &collections {
        let count = target.count(target_db, collection).await?;
        tracing::info!("  {}: {} documents", collection, count);
        total += count;
    }
    tracing::info!(
        "Target database '{}': {} collections, {} documents",
        target_db,
        collections.len(),
        total
    );
    Ok(true)
}
