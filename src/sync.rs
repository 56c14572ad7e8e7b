//! Mirror run orchestration
//!
//! A run goes through these steps in order, stopping at the first failure:
//!
//! 1. Validate the configuration
//! 2. Bootstrap the local store when needed
//! 3. Connect to the source and the target
//! 4. Resolve the source database
//! 5. Back up the target
//! 6. Reconcile (incremental) or reload (full)
//! 7. Verify the target
//!
//! Both connections are closed on every exit path once they are open.

use anyhow::Context;
use std::path::PathBuf;

use mongo_mirror_mongodb::{
    backup_if_present, connect, ensure_source_not_empty, full_replace, mask_uri,
    resolve_source_database, verify, DocumentStore, ReconcileStats, Reconciler, SyncError,
};

use crate::{container, MirrorOpts, UpdateMode};

/// What a successful run did.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub source_database: String,
    pub backup: Option<PathBuf>,
    pub stats: ReconcileStats,
}

/// Run one mirror pass against real MongoDB deployments.
pub async fn run(opts: &MirrorOpts) -> anyhow::Result<RunReport> {
    let source_uri = opts.source_uri()?;

    tracing::info!(
        "Mirroring {} into {} ({:?} mode)",
        mask_uri(source_uri),
        mask_uri(&opts.local_uri),
        opts.update_mode
    );

    container::ensure_local_store(opts).await?;

    let source = connect(source_uri)
        .await
        .context("Failed to connect to the source database")?;
    let target = match connect(&opts.local_uri).await {
        Ok(target) => target,
        Err(e) => {
            source.close().await;
            return Err(e).context("Failed to connect to the local database");
        }
    };

    let result = mirror(opts, source_uri, &source, &target).await;

    source.close().await;
    target.close().await;

    Ok(result?)
}

/// Mirror the source into the target over already open stores.
pub async fn mirror<S, T>(
    opts: &MirrorOpts,
    source_uri: &str,
    source: &S,
    target: &T,
) -> Result<RunReport, SyncError>
where
    S: DocumentStore + ?Sized,
    T: DocumentStore + ?Sized,
{
    let source_database = resolve_source_database(source, &opts.source_db, source_uri).await;
    let collections = ensure_source_not_empty(source, &source_database).await?;
    tracing::info!(
        "Source database '{}' has {} collections",
        source_database,
        collections.len()
    );

    let backup = backup_if_present(target, &opts.local_db, &opts.backup_dir).await?;

    let stats = match opts.update_mode {
        UpdateMode::Incremental => {
            Reconciler::new(source, &source_database, target, &opts.local_db)
                .run(&collections)
                .await?
        }
        UpdateMode::Full => {
            full_replace(
                source,
                &source_database,
                target,
                &opts.local_db,
                &collections,
                &opts.backup_dir,
            )
            .await?
        }
    };

    if !verify(target, &opts.local_db).await? {
        return Err(SyncError::Verification(format!(
            "target database '{}' has no collections after the run",
            opts.local_db
        )));
    }

    if let Some(path) = &backup {
        tracing::info!("Previous target contents saved in {}", path.display());
    }

    Ok(RunReport {
        source_database,
        backup,
        stats,
    })
}
