//! Document store trait
//!
//! Every component of the engine talks to the source and the target through
//! this trait, so the same reconcile code runs against MongoDB and against the
//! in-memory store used in tests.

use async_trait::async_trait;
use bson::{Bson, Document};

use crate::StoreError;

/// A database as reported by the store's database listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseInfo {
    pub name: String,
    /// Approximate size on disk in bytes.
    pub size_on_disk: u64,
}

/// Asynchronous access to a document store.
///
/// All calls are awaited one after another by the engine; implementations do
/// not need to support concurrent writers.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Lightweight liveness probe.
    async fn ping(&self) -> Result<(), StoreError>;

    async fn list_databases(&self) -> Result<Vec<DatabaseInfo>, StoreError>;

    /// Names of the user collections of a database.
    async fn list_collections(&self, database: &str) -> Result<Vec<String>, StoreError>;

    async fn find_all(&self, database: &str, collection: &str)
        -> Result<Vec<Document>, StoreError>;

    /// First document whose fields equal every field of `filter`.
    async fn find_one(
        &self,
        database: &str,
        collection: &str,
        filter: Document,
    ) -> Result<Option<Document>, StoreError>;

    async fn count(&self, database: &str, collection: &str) -> Result<u64, StoreError>;

    async fn insert_one(
        &self,
        database: &str,
        collection: &str,
        document: Document,
    ) -> Result<(), StoreError>;

    async fn insert_many(
        &self,
        database: &str,
        collection: &str,
        documents: Vec<Document>,
    ) -> Result<(), StoreError>;

    /// Partial update of the document with the given `_id`: `$set` then `$unset`.
    async fn update_fields(
        &self,
        database: &str,
        collection: &str,
        id: &Bson,
        set: Document,
        unset: Vec<String>,
    ) -> Result<(), StoreError>;

    /// Delete every document whose `_id` is in `ids`, returning the number removed.
    async fn delete_by_ids(
        &self,
        database: &str,
        collection: &str,
        ids: Vec<Bson>,
    ) -> Result<u64, StoreError>;

    /// Field lists of the collection's unique indexes, the `_id` index excluded.
    async fn unique_indexes(
        &self,
        database: &str,
        collection: &str,
    ) -> Result<Vec<Vec<String>>, StoreError>;

    async fn drop_database(&self, database: &str) -> Result<(), StoreError>;

    /// Release the connection. Calling it more than once is a no-op.
    async fn close(&self);
}
