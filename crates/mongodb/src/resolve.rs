//! Source database resolution
//!
//! The configured database name is not always the one holding the data: Atlas
//! connection strings often carry their own database in the path, and older
//! deployments used the driver's default database. Resolution walks a fixed
//! chain of candidates and never fails; the caller checks the result with
//! [`ensure_source_not_empty`].

use crate::connect::database_from_uri;
use crate::store::DocumentStore;
use crate::SyncError;

/// Databases that never hold application data.
pub const SYSTEM_DATABASES: [&str; 3] = ["admin", "local", "config"];

/// Collections expected in a CMS database, used to score candidates.
pub const REFERENCE_COLLECTIONS: [&str; 13] = [
    "users",
    "media",
    "pages",
    "posts",
    "categories",
    "forms",
    "form-submissions",
    "redirects",
    "search",
    "globals",
    "payload-preferences",
    "payload-migrations",
    "payload-locked-documents",
];

/// A database as shown in diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseSummary {
    pub name: String,
    pub size_on_disk: u64,
    pub collections: usize,
}

impl std::fmt::Display for DatabaseSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let megabytes = self.size_on_disk as f64 / (1024.0 * 1024.0);
        write!(
            f,
            "  - {} (~{:.2} MB, {} collections)",
            self.name, megabytes, self.collections
        )
    }
}

pub(crate) fn render_summaries(summaries: &[DatabaseSummary]) -> String {
    if summaries.is_empty() {
        return "  (none)".to_string();
    }
    summaries
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

async fn collection_count<S: DocumentStore + ?Sized>(store: &S, database: &str) -> usize {
    match store.list_collections(database).await {
        Ok(collections) => collections.len(),
        Err(e) => {
            tracing::debug!("Cannot list collections of '{}': {}", database, e);
            0
        }
    }
}

/// Pick the source database to mirror.
///
/// 1. `configured` when it has at least one collection.
/// 2. The database named in the URI path when it has at least one collection.
/// 3. The non-system database containing the most [`REFERENCE_COLLECTIONS`];
///    the first one listed wins a tie.
///
/// Falls back to `configured` when every strategy comes up empty.
pub async fn resolve_source_database<S: DocumentStore + ?Sized>(
    store: &S,
    configured: &str,
    uri: &str,
) -> String {
    if collection_count(store, configured).await > 0 {
        tracing::info!("Using configured source database '{}'", configured);
        return configured.to_string();
    }
    tracing::warn!(
        "Configured source database '{}' has no collections",
        configured
    );

    if let Some(from_uri) = database_from_uri(uri) {
        if from_uri != configured && collection_count(store, &from_uri).await > 0 {
            tracing::info!("Using source database '{}' from the connection string", from_uri);
            return from_uri;
        }
    }

    match scan_for_cms_database(store).await {
        Some((name, score)) => {
            tracing::info!(
                "Using source database '{}' ({} known collections found)",
                name,
                score
            );
            name
        }
        None => {
            tracing::warn!("No database with known collections found");
            configured.to_string()
        }
    }
}

/// Best-scoring non-system database, `None` when no database scores above zero.
pub async fn scan_for_cms_database<S: DocumentStore + ?Sized>(
    store: &S,
) -> Option<(String, usize)> {
    let databases = match store.list_databases().await {
        Ok(databases) => databases,
        Err(e) => {
            tracing::debug!("Cannot list databases: {}", e);
            return None;
        }
    };

    let mut best: Option<(String, usize)> = None;
    for database in databases {
        if SYSTEM_DATABASES.contains(&database.name.as_str()) {
            continue;
        }
        let collections = match store.list_collections(&database.name).await {
            Ok(collections) => collections,
            Err(e) => {
                tracing::debug!("Skipping database '{}': {}", database.name, e);
                continue;
            }
        };
        let score = collections
            .iter()
            .filter(|name| REFERENCE_COLLECTIONS.contains(&name.as_str()))
            .count();
        tracing::debug!("Database '{}' scores {}", database.name, score);

        let better = match &best {
            Some((_, best_score)) => score > *best_score,
            None => score > 0,
        };
        if better {
            best = Some((database.name, score));
        }
    }
    best
}

/// Every visible database with its approximate size and collection count.
pub async fn describe_databases<S: DocumentStore + ?Sized>(store: &S) -> Vec<DatabaseSummary> {
    let databases = match store.list_databases().await {
        Ok(databases) => databases,
        Err(e) => {
            tracing::debug!("Cannot list databases: {}", e);
            return Vec::new();
        }
    };

    let mut summaries = Vec::with_capacity(databases.len());
    for database in databases {
        let collections = collection_count(store, &database.name).await;
        summaries.push(DatabaseSummary {
            name: database.name,
            size_on_disk: database.size_on_disk,
            collections,
        });
    }
    summaries
}

/// Fail with a listing of every visible database when `database` is empty.
///
/// Returns the collection names of `database` otherwise.
pub async fn ensure_source_not_empty<S: DocumentStore + ?Sized>(
    store: &S,
    database: &str,
) -> Result<Vec<String>, SyncError> {
    let collections = store.list_collections(database).await?;
    if !collections.is_empty() {
        return Ok(collections);
    }

    let available = describe_databases(store).await;
    tracing::error!(
        "Source database '{}' is empty; {} databases visible",
        database,
        available.len()
    );
    Err(SyncError::EmptySourceDatabase {
        database: database.to_string(),
        available,
    })
}
