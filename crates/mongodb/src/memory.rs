//! In-memory implementation of [`DocumentStore`].
//!
//! Behaves like a single MongoDB deployment for the operations the engine
//! uses, including unique index enforcement, and records every write so tests
//! can assert on exactly what was sent to the store.

use async_trait::async_trait;
use bson::{oid::ObjectId, Bson, Document};
use std::collections::{BTreeMap, HashSet};
use tokio::sync::Mutex;

use crate::document::{document_key, ID_FIELD};
use crate::error::DUPLICATE_KEY_CODE;
use crate::store::{DatabaseInfo, DocumentStore};
use crate::StoreError;

/// A write sent to a [`MemoryStore`].
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    Insert {
        collection: String,
        id: Bson,
    },
    Update {
        collection: String,
        id: Bson,
        set: Vec<String>,
        unset: Vec<String>,
    },
    Delete {
        collection: String,
        ids: Vec<Bson>,
    },
    DropDatabase {
        database: String,
    },
}

#[derive(Debug, Default)]
struct MemoryCollection {
    documents: Vec<Document>,
    unique_indexes: Vec<Vec<String>>,
}

impl MemoryCollection {
    fn position_of(&self, id: &Bson) -> Option<usize> {
        let key = document_key(id);
        self.documents
            .iter()
            .position(|doc| doc.get(ID_FIELD).map(document_key).as_deref() == Some(key.as_str()))
    }

    /// The unique index `candidate` would violate, ignoring the document at `skip`.
    fn violated_index(&self, candidate: &Document, skip: Option<usize>) -> Option<String> {
        if let Some(id) = candidate.get(ID_FIELD) {
            if let Some(position) = self.position_of(id) {
                if Some(position) != skip {
                    return Some(format!("{ID_FIELD}_ dup key: {{ _id: {id} }}"));
                }
            }
        }

        for fields in &self.unique_indexes {
            let values: Option<Vec<&Bson>> = fields.iter().map(|f| candidate.get(f)).collect();
            let Some(values) = values else { continue };

            let clash = self.documents.iter().enumerate().any(|(position, doc)| {
                Some(position) != skip
                    && fields
                        .iter()
                        .zip(&values)
                        .all(|(field, value)| doc.get(field) == Some(*value))
            });
            if clash {
                return Some(format!("{}_1 dup key", fields.join("_1_")));
            }
        }
        None
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    databases: BTreeMap<String, BTreeMap<String, MemoryCollection>>,
    writes: Vec<WriteOp>,
    rejected_inserts: HashSet<(String, String)>,
    unreachable: bool,
}

/// Document store held entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty collection.
    pub async fn create_collection(&self, database: &str, collection: &str) {
        let mut state = self.state.lock().await;
        state
            .databases
            .entry(database.to_string())
            .or_default()
            .entry(collection.to_string())
            .or_default();
    }

    /// Declare a unique index on `fields`.
    pub async fn create_unique_index(&self, database: &str, collection: &str, fields: &[&str]) {
        let mut state = self.state.lock().await;
        state
            .databases
            .entry(database.to_string())
            .or_default()
            .entry(collection.to_string())
            .or_default()
            .unique_indexes
            .push(fields.iter().map(|f| f.to_string()).collect());
    }

    /// Load documents without recording writes.
    pub async fn seed(&self, database: &str, collection: &str, documents: Vec<Document>) {
        let mut state = self.state.lock().await;
        state
            .databases
            .entry(database.to_string())
            .or_default()
            .entry(collection.to_string())
            .or_default()
            .documents
            .extend(documents);
    }

    /// Make every `insert_one` into the collection fail with a duplicate key error.
    pub async fn reject_inserts(&self, database: &str, collection: &str) {
        let mut state = self.state.lock().await;
        state
            .rejected_inserts
            .insert((database.to_string(), collection.to_string()));
    }

    /// Make every call fail as if the server could not be reached.
    pub async fn set_unreachable(&self, unreachable: bool) {
        self.state.lock().await.unreachable = unreachable;
    }

    /// Documents currently stored in a collection, in insertion order.
    pub async fn documents(&self, database: &str, collection: &str) -> Vec<Document> {
        let state = self.state.lock().await;
        state
            .databases
            .get(database)
            .and_then(|collections| collections.get(collection))
            .map(|c| c.documents.clone())
            .unwrap_or_default()
    }

    /// Writes recorded since the store was created or last drained.
    pub async fn take_writes(&self) -> Vec<WriteOp> {
        std::mem::take(&mut self.state.lock().await.writes)
    }

    async fn lock_reachable(&self) -> Result<tokio::sync::MutexGuard<'_, MemoryState>, StoreError> {
        let state = self.state.lock().await;
        if state.unreachable {
            return Err(StoreError::Unreachable(
                "memory store marked unreachable".to_string(),
            ));
        }
        Ok(state)
    }
}

fn duplicate_key(database: &str, collection: &str, detail: &str) -> StoreError {
    StoreError::DuplicateKey {
        message: format!(
            "E{DUPLICATE_KEY_CODE} duplicate key error collection: {database}.{collection} index: {detail}"
        ),
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn ping(&self) -> Result<(), StoreError> {
        self.lock_reachable().await.map(|_| ())
    }

    async fn list_databases(&self) -> Result<Vec<DatabaseInfo>, StoreError> {
        let state = self.lock_reachable().await?;
        let mut databases = Vec::new();
        for (name, collections) in &state.databases {
            let mut size_on_disk = 0u64;
            for collection in collections.values() {
                for doc in &collection.documents {
                    size_on_disk += bson::to_vec(doc)?.len() as u64;
                }
            }
            databases.push(DatabaseInfo {
                name: name.clone(),
                size_on_disk,
            });
        }
        Ok(databases)
    }

    async fn list_collections(&self, database: &str) -> Result<Vec<String>, StoreError> {
        let state = self.lock_reachable().await?;
        Ok(state
            .databases
            .get(database)
            .map(|collections| collections.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn find_all(
        &self,
        database: &str,
        collection: &str,
    ) -> Result<Vec<Document>, StoreError> {
        let state = self.lock_reachable().await?;
        Ok(state
            .databases
            .get(database)
            .and_then(|collections| collections.get(collection))
            .map(|c| c.documents.clone())
            .unwrap_or_default())
    }

    async fn find_one(
        &self,
        database: &str,
        collection: &str,
        filter: Document,
    ) -> Result<Option<Document>, StoreError> {
        let state = self.lock_reachable().await?;
        let found = state
            .databases
            .get(database)
            .and_then(|collections| collections.get(collection))
            .and_then(|c| {
                c.documents
                    .iter()
                    .find(|doc| filter.iter().all(|(field, value)| doc.get(field) == Some(value)))
                    .cloned()
            });
        Ok(found)
    }

    async fn count(&self, database: &str, collection: &str) -> Result<u64, StoreError> {
        let state = self.lock_reachable().await?;
        Ok(state
            .databases
            .get(database)
            .and_then(|collections| collections.get(collection))
            .map(|c| c.documents.len() as u64)
            .unwrap_or(0))
    }

    async fn insert_one(
        &self,
        database: &str,
        collection: &str,
        mut document: Document,
    ) -> Result<(), StoreError> {
        let mut state = self.lock_reachable().await?;
        if state
            .rejected_inserts
            .contains(&(database.to_string(), collection.to_string()))
        {
            return Err(duplicate_key(database, collection, "rejected"));
        }

        if !document.contains_key(ID_FIELD) {
            document.insert(ID_FIELD, ObjectId::new());
        }
        let id = document.get(ID_FIELD).cloned().unwrap_or(Bson::Null);

        let target = state
            .databases
            .entry(database.to_string())
            .or_default()
            .entry(collection.to_string())
            .or_default();
        if let Some(detail) = target.violated_index(&document, None) {
            return Err(duplicate_key(database, collection, &detail));
        }
        target.documents.push(document);

        state.writes.push(WriteOp::Insert {
            collection: collection.to_string(),
            id,
        });
        Ok(())
    }

    async fn insert_many(
        &self,
        database: &str,
        collection: &str,
        documents: Vec<Document>,
    ) -> Result<(), StoreError> {
        for document in documents {
            self.insert_one(database, collection, document).await?;
        }
        Ok(())
    }

    async fn update_fields(
        &self,
        database: &str,
        collection: &str,
        id: &Bson,
        set: Document,
        unset: Vec<String>,
    ) -> Result<(), StoreError> {
        let mut state = self.lock_reachable().await?;
        let Some(target) = state
            .databases
            .get_mut(database)
            .and_then(|collections| collections.get_mut(collection))
        else {
            return Ok(());
        };
        let Some(position) = target.position_of(id) else {
            return Ok(());
        };

        let mut updated = target.documents[position].clone();
        for (field, value) in set.iter() {
            updated.insert(field.clone(), value.clone());
        }
        for field in &unset {
            updated.remove(field);
        }
        if let Some(detail) = target.violated_index(&updated, Some(position)) {
            return Err(duplicate_key(database, collection, &detail));
        }
        target.documents[position] = updated;

        state.writes.push(WriteOp::Update {
            collection: collection.to_string(),
            id: id.clone(),
            set: set.keys().cloned().collect(),
            unset,
        });
        Ok(())
    }

    async fn delete_by_ids(
        &self,
        database: &str,
        collection: &str,
        ids: Vec<Bson>,
    ) -> Result<u64, StoreError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let mut state = self.lock_reachable().await?;
        let keys: HashSet<String> = ids.iter().map(document_key).collect();

        let mut deleted = 0u64;
        if let Some(target) = state
            .databases
            .get_mut(database)
            .and_then(|collections| collections.get_mut(collection))
        {
            let before = target.documents.len();
            target.documents.retain(|doc| {
                doc.get(ID_FIELD)
                    .map(|id| !keys.contains(&document_key(id)))
                    .unwrap_or(true)
            });
            deleted = (before - target.documents.len()) as u64;
        }

        state.writes.push(WriteOp::Delete {
            collection: collection.to_string(),
            ids,
        });
        Ok(deleted)
    }

    async fn unique_indexes(
        &self,
        database: &str,
        collection: &str,
    ) -> Result<Vec<Vec<String>>, StoreError> {
        let state = self.lock_reachable().await?;
        Ok(state
            .databases
            .get(database)
            .and_then(|collections| collections.get(collection))
            .map(|c| c.unique_indexes.clone())
            .unwrap_or_default())
    }

    async fn drop_database(&self, database: &str) -> Result<(), StoreError> {
        let mut state = self.lock_reachable().await?;
        state.databases.remove(database);
        state.writes.push(WriteOp::DropDatabase {
            database: database.to_string(),
        });
        Ok(())
    }

    async fn close(&self) {}
}
