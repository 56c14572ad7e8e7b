//! MongoDB reconcile engine for mongo-mirror
//!
//! Brings a target database in line with a source database, either by
//! diffing and patching each collection (incremental) or by exporting the
//! source and reloading it into a dropped target (full replace).

mod backup;
pub mod connect;
pub mod document;
mod error;
mod full_replace;
pub mod memory;
mod mongo_store;
mod reconcile;
pub mod resolve;
mod stats;
mod store;
mod verify;

#[cfg(test)]
mod tests;

pub use backup::backup_if_present;
pub use connect::{connect, is_ready, mask_uri, wait_until_ready, ReadinessPolicy};
pub use document::{diff_documents, ChangeRecord};
pub use error::{StoreError, SyncError, DUPLICATE_KEY_CODE};
pub use full_replace::{export_source, full_replace, replace_from_export};
pub use memory::MemoryStore;
pub use mongo_store::MongoStore;
pub use reconcile::Reconciler;
pub use resolve::{ensure_source_not_empty, resolve_source_database, DatabaseSummary};
pub use stats::{CollectionStats, ReconcileStats};
pub use store::{DatabaseInfo, DocumentStore};
pub use verify::verify;
