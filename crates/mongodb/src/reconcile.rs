//! Incremental reconciliation
//!
//! Each collection is loaded from both stores, diffed in memory and patched
//! so that the target converges to the source with as few writes as possible.
//! Collections are processed one after another; a failure aborts the run
//! without rolling back collections already reconciled.

use bson::{Bson, Document};
use std::collections::{HashMap, HashSet};

use crate::document::{
    diff_documents, document_key, global_type, id_key, partial_update, ChangeRecord,
    GLOBAL_TYPE_FIELD, ID_FIELD,
};
use crate::stats::{CollectionStats, ReconcileStats};
use crate::store::DocumentStore;
use crate::{StoreError, SyncError};

/// Number of updated documents per collection whose changed fields are logged.
pub const LOGGED_UPDATES_PER_COLLECTION: usize = 5;

/// Matching key of a document in a globals collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum GlobalKey<'d> {
    Type(&'d str),
    Id(String),
}

impl<'d> GlobalKey<'d> {
    /// `globalType` when present, the `_id` key otherwise.
    fn of(doc: &'d Document) -> Option<Self> {
        match global_type(doc) {
            Some(kind) => Some(GlobalKey::Type(kind)),
            None => id_key(doc).map(GlobalKey::Id),
        }
    }
}

/// Source and target of one reconciliation pass.
pub struct Reconciler<'a, S: ?Sized, T: ?Sized> {
    source: &'a S,
    source_db: &'a str,
    target: &'a T,
    target_db: &'a str,
}

impl<'a, S, T> Reconciler<'a, S, T>
where
    S: DocumentStore + ?Sized,
    T: DocumentStore + ?Sized,
{
    pub fn new(source: &'a S, source_db: &'a str, target: &'a T, target_db: &'a str) -> Self {
        Self {
            source,
            source_db,
            target,
            target_db,
        }
    }

    /// Reconcile every collection in `collections`, in order.
    pub async fn run(&self, collections: &[String]) -> Result<ReconcileStats, SyncError> {
        let mut stats = ReconcileStats::new();
        for collection in collections {
            let collection_stats = self.reconcile_collection(collection).await?;
            stats.record(&collection_stats);
        }
        stats.log_summary();
        Ok(stats)
    }

    /// Reconcile one collection, choosing the globals or the regular path.
    pub async fn reconcile_collection(
        &self,
        collection: &str,
    ) -> Result<CollectionStats, SyncError> {
        let on_error = SyncError::reconcile(collection);

        let sample = self
            .source
            .find_one(self.source_db, collection, Document::new())
            .await
            .map_err(SyncError::reconcile(collection))?;
        let is_globals = sample
            .as_ref()
            .map(|doc| doc.contains_key(GLOBAL_TYPE_FIELD))
            .unwrap_or(false);

        let result = if is_globals {
            tracing::info!("Reconciling globals collection '{}'", collection);
            self.reconcile_globals(collection).await
        } else {
            tracing::info!("Reconciling collection '{}'", collection);
            self.reconcile_regular(collection).await
        };
        let stats = result.map_err(on_error)?;

        tracing::info!(
            "Collection '{}': {} created, {} updated ({} fields), {} unchanged, {} deleted",
            collection,
            stats.created,
            stats.updated,
            stats.fields_updated,
            stats.unchanged,
            stats.deleted
        );
        Ok(stats)
    }

    /// Globals are matched by `globalType`; a changed global is replaced whole.
    ///
    /// Documents of a globals collection that carry no `globalType` are
    /// matched by `_id` instead.
    async fn reconcile_globals(&self, collection: &str) -> Result<CollectionStats, StoreError> {
        let source_docs = self.source.find_all(self.source_db, collection).await?;
        let target_docs = self.target.find_all(self.target_db, collection).await?;

        let target_by_key: HashMap<GlobalKey<'_>, &Document> = target_docs
            .iter()
            .filter_map(|doc| GlobalKey::of(doc).map(|key| (key, doc)))
            .collect();
        let source_keys: HashSet<GlobalKey<'_>> =
            source_docs.iter().filter_map(GlobalKey::of).collect();

        let mut stats = CollectionStats::default();
        for source_doc in &source_docs {
            let key = GlobalKey::of(source_doc);
            let existing = key.as_ref().and_then(|key| target_by_key.get(key));
            match existing {
                None => {
                    self.target
                        .insert_one(self.target_db, collection, source_doc.clone())
                        .await?;
                    stats.created += 1;
                }
                Some(target_doc) => {
                    let changes = diff_documents(source_doc, target_doc);
                    if changes.is_empty() {
                        stats.unchanged += 1;
                        continue;
                    }
                    if let Some(id) = target_doc.get(ID_FIELD) {
                        self.target
                            .delete_by_ids(self.target_db, collection, vec![id.clone()])
                            .await?;
                    }
                    self.target
                        .insert_one(self.target_db, collection, source_doc.clone())
                        .await?;
                    tracing::debug!(
                        "Replaced global {:?} ({} fields changed)",
                        key,
                        changes.len()
                    );
                    stats.updated += 1;
                    stats.fields_updated += changes.len() as u64;
                }
            }
        }

        let stale: Vec<Bson> = target_docs
            .iter()
            .filter(|doc| {
                GlobalKey::of(doc)
                    .map(|key| !source_keys.contains(&key))
                    .unwrap_or(true)
            })
            .filter_map(|doc| doc.get(ID_FIELD).cloned())
            .collect();
        stats.deleted = self.delete_stale(collection, stale).await?;

        Ok(stats)
    }

    /// Regular documents are matched by `_id` and patched field by field.
    async fn reconcile_regular(&self, collection: &str) -> Result<CollectionStats, StoreError> {
        let source_docs = self.source.find_all(self.source_db, collection).await?;
        let target_docs = self.target.find_all(self.target_db, collection).await?;

        let target_by_key: HashMap<String, &Document> = target_docs
            .iter()
            .filter_map(|doc| id_key(doc).map(|key| (key, doc)))
            .collect();
        let source_keys: HashSet<String> = source_docs.iter().filter_map(id_key).collect();

        let mut stats = CollectionStats::default();
        let mut logged_updates = 0usize;
        // Target documents adopted through unique index recovery survive the delete pass
        let mut adopted: HashSet<String> = HashSet::new();

        for source_doc in &source_docs {
            let matched = id_key(source_doc).and_then(|key| target_by_key.get(&key).copied());

            let (target_doc, changes) = match matched {
                Some(target_doc) => (target_doc.clone(), diff_documents(source_doc, target_doc)),
                None => match self.insert_new(collection, source_doc).await? {
                    None => {
                        stats.created += 1;
                        continue;
                    }
                    Some(conflicting) => {
                        if let Some(key) = id_key(&conflicting) {
                            adopted.insert(key);
                        }
                        let changes = diff_documents(source_doc, &conflicting);
                        (conflicting, changes)
                    }
                },
            };

            if changes.is_empty() {
                stats.unchanged += 1;
                continue;
            }

            self.apply_changes(collection, &target_doc, &changes).await?;
            stats.updated += 1;
            stats.fields_updated += changes.len() as u64;

            if logged_updates < LOGGED_UPDATES_PER_COLLECTION {
                logged_updates += 1;
                let fields: Vec<&str> = changes.iter().map(|c| c.field.as_str()).collect();
                tracing::info!(
                    "Updated {} in '{}': {}",
                    id_key(&target_doc).unwrap_or_default(),
                    collection,
                    fields.join(", ")
                );
            }
        }

        let stale: Vec<Bson> = target_docs
            .iter()
            .filter_map(|doc| {
                let key = id_key(doc)?;
                if source_keys.contains(&key) || adopted.contains(&key) {
                    None
                } else {
                    doc.get(ID_FIELD).cloned()
                }
            })
            .collect();
        stats.deleted = self.delete_stale(collection, stale).await?;

        Ok(stats)
    }

    /// Insert a source document with no `_id` match in the target.
    ///
    /// Returns `None` when inserted, or the target document holding the same
    /// unique index values when the insert hit a duplicate key. A duplicate key
    /// with no such document is returned as the original error.
    async fn insert_new(
        &self,
        collection: &str,
        source_doc: &Document,
    ) -> Result<Option<Document>, StoreError> {
        let err = match self
            .target
            .insert_one(self.target_db, collection, source_doc.clone())
            .await
        {
            Ok(()) => return Ok(None),
            Err(err) if err.is_duplicate_key() => err,
            Err(err) => return Err(err),
        };

        match self.find_conflicting(collection, source_doc).await? {
            Some(conflicting) => {
                tracing::warn!(
                    "Document {} in '{}' conflicts with existing {} on a unique index, updating it instead",
                    id_key(source_doc).unwrap_or_default(),
                    collection,
                    id_key(&conflicting).unwrap_or_default()
                );
                Ok(Some(conflicting))
            }
            None => Err(err),
        }
    }

    /// Target document sharing a unique index value with `source_doc`.
    async fn find_conflicting(
        &self,
        collection: &str,
        source_doc: &Document,
    ) -> Result<Option<Document>, StoreError> {
        let indexes = self
            .target
            .unique_indexes(self.target_db, collection)
            .await?;

        for fields in indexes {
            let mut filter = Document::new();
            for field in &fields {
                match source_doc.get(field) {
                    Some(value) => {
                        filter.insert(field.clone(), value.clone());
                    }
                    None => break,
                }
            }
            if filter.len() != fields.len() {
                continue;
            }
            if let Some(found) = self
                .target
                .find_one(self.target_db, collection, filter)
                .await?
            {
                return Ok(Some(found));
            }
        }
        Ok(None)
    }

    /// Partial update of `target_doc` touching only the changed fields.
    async fn apply_changes(
        &self,
        collection: &str,
        target_doc: &Document,
        changes: &[ChangeRecord],
    ) -> Result<(), StoreError> {
        let Some(id) = target_doc.get(ID_FIELD) else {
            return Err(StoreError::Other(format!(
                "target document in '{collection}' has no _id"
            )));
        };
        let (set, unset) = partial_update(changes);
        self.target
            .update_fields(self.target_db, collection, id, set, unset)
            .await
    }

    async fn delete_stale(&self, collection: &str, ids: Vec<Bson>) -> Result<u64, StoreError> {
        if ids.is_empty() {
            return Ok(0);
        }
        tracing::debug!(
            "Deleting {} stale documents from '{}': {:?}",
            ids.len(),
            collection,
            ids.iter().map(document_key).collect::<Vec<_>>()
        );
        self.target
            .delete_by_ids(self.target_db, collection, ids)
            .await
    }
}
