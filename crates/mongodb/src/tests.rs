//! Unit tests for the reconcile engine, run against the in-memory store.

use bson::{doc, oid::ObjectId, Bson, Document};
use tempfile::TempDir;

use crate::document::{diff_documents, id_key};
use crate::memory::{MemoryStore, WriteOp};
use crate::{
    backup_if_present, full_replace, verify, CollectionStats, DocumentStore, Reconciler,
    StoreError, SyncError,
};

const SOURCE_DB: &str = "payload";
const TARGET_DB: &str = "payload-local";

async fn reconcile(
    source: &MemoryStore,
    target: &MemoryStore,
    collection: &str,
) -> Result<CollectionStats, SyncError> {
    Reconciler::new(source, SOURCE_DB, target, TARGET_DB)
        .reconcile_collection(collection)
        .await
}

fn by_id<'a>(docs: &'a [Document], id: &str) -> Option<&'a Document> {
    docs.iter().find(|doc| id_key(doc).as_deref() == Some(id))
}

/// Every source document has an equal target counterpart and nothing else remains.
async fn assert_converged(source: &MemoryStore, target: &MemoryStore, collection: &str) {
    let source_docs = source.documents(SOURCE_DB, collection).await;
    let target_docs = target.documents(TARGET_DB, collection).await;
    assert_eq!(source_docs.len(), target_docs.len());
    for source_doc in &source_docs {
        let key = id_key(source_doc).unwrap();
        let target_doc = by_id(&target_docs, &key)
            .unwrap_or_else(|| panic!("missing {key} in target {collection}"));
        assert!(diff_documents(source_doc, target_doc).is_empty());
    }
}

// ============================================================================
// Regular collections
// ============================================================================

#[tokio::test]
async fn test_pages_scenario() {
    let source = MemoryStore::new();
    let target = MemoryStore::new();
    source
        .seed(
            SOURCE_DB,
            "pages",
            vec![
                doc! { "_id": "a", "title": "Home" },
                doc! { "_id": "b", "title": "About" },
            ],
        )
        .await;
    target
        .seed(
            TARGET_DB,
            "pages",
            vec![
                doc! { "_id": "a", "title": "Old Home" },
                doc! { "_id": "c", "title": "Stale" },
            ],
        )
        .await;

    let stats = reconcile(&source, &target, "pages").await.unwrap();
    assert_eq!(
        stats,
        CollectionStats {
            created: 1,
            updated: 1,
            unchanged: 0,
            deleted: 1,
            fields_updated: 1,
        }
    );

    let target_docs = target.documents(TARGET_DB, "pages").await;
    assert_eq!(by_id(&target_docs, "a").unwrap().get_str("title").unwrap(), "Home");
    assert!(by_id(&target_docs, "b").is_some());
    assert!(by_id(&target_docs, "c").is_none());
    assert_converged(&source, &target, "pages").await;
}

#[tokio::test]
async fn test_second_run_is_a_no_op() {
    let source = MemoryStore::new();
    let target = MemoryStore::new();
    source
        .seed(
            SOURCE_DB,
            "posts",
            vec![
                doc! { "_id": ObjectId::new(), "title": "One", "tags": ["a", "b"] },
                doc! { "_id": ObjectId::new(), "title": "Two", "meta": { "og": { "image": "x.png" } } },
                doc! { "_id": ObjectId::new(), "title": "Three", "__v": 2 },
            ],
        )
        .await;
    target
        .seed(TARGET_DB, "posts", vec![doc! { "_id": "orphan", "title": "Gone" }])
        .await;

    let first = reconcile(&source, &target, "posts").await.unwrap();
    assert_eq!(first.created, 3);
    assert_eq!(first.deleted, 1);
    target.take_writes().await;

    let second = reconcile(&source, &target, "posts").await.unwrap();
    assert_eq!(second.writes(), 0);
    assert_eq!(second.unchanged, 3);
    assert!(target.take_writes().await.is_empty());
}

#[tokio::test]
async fn test_single_field_change_is_a_partial_update() {
    let source = MemoryStore::new();
    let target = MemoryStore::new();
    let id = ObjectId::new();
    source
        .seed(
            SOURCE_DB,
            "users",
            vec![doc! { "_id": id, "email": "a@example.com", "name": "Ada", "role": "admin" }],
        )
        .await;
    target
        .seed(
            TARGET_DB,
            "users",
            vec![doc! { "_id": id, "email": "a@example.com", "name": "Ada", "role": "editor", "__v": 0 }],
        )
        .await;

    let stats = reconcile(&source, &target, "users").await.unwrap();
    assert_eq!(stats.updated, 1);
    assert_eq!(stats.fields_updated, 1);

    assert_eq!(
        target.take_writes().await,
        vec![WriteOp::Update {
            collection: "users".to_string(),
            id: Bson::ObjectId(id),
            set: vec!["role".to_string()],
            unset: vec![],
        }]
    );
    // Internal fields on the target are left alone
    let target_docs = target.documents(TARGET_DB, "users").await;
    assert_eq!(target_docs[0].get_i32("__v").unwrap(), 0);
}

#[tokio::test]
async fn test_fields_missing_from_source_are_unset() {
    let source = MemoryStore::new();
    let target = MemoryStore::new();
    source
        .seed(SOURCE_DB, "media", vec![doc! { "_id": "m1", "alt": "Logo" }])
        .await;
    target
        .seed(
            TARGET_DB,
            "media",
            vec![doc! { "_id": "m1", "alt": "Logo", "caption": "old" }],
        )
        .await;

    let stats = reconcile(&source, &target, "media").await.unwrap();
    assert_eq!(stats.updated, 1);
    assert_converged(&source, &target, "media").await;
    assert!(!target.documents(TARGET_DB, "media").await[0].contains_key("caption"));
}

#[tokio::test]
async fn test_reordered_nested_keys_are_unchanged() {
    let source = MemoryStore::new();
    let target = MemoryStore::new();
    source
        .seed(
            SOURCE_DB,
            "pages",
            vec![doc! { "_id": "a", "meta": { "title": "Home", "description": "Welcome" } }],
        )
        .await;
    target
        .seed(
            TARGET_DB,
            "pages",
            vec![doc! { "_id": "a", "meta": { "description": "Welcome", "title": "Home" } }],
        )
        .await;

    let stats = reconcile(&source, &target, "pages").await.unwrap();
    assert_eq!(stats.unchanged, 1);
    assert_eq!(stats.writes(), 0);
}

#[tokio::test]
async fn test_empty_source_collection_empties_target() {
    let source = MemoryStore::new();
    let target = MemoryStore::new();
    source.create_collection(SOURCE_DB, "redirects").await;
    target
        .seed(
            TARGET_DB,
            "redirects",
            vec![doc! { "_id": 1, "from": "/a" }, doc! { "_id": 2, "from": "/b" }],
        )
        .await;

    let stats = reconcile(&source, &target, "redirects").await.unwrap();
    assert_eq!(stats.deleted, 2);
    assert!(target.documents(TARGET_DB, "redirects").await.is_empty());
}

// ============================================================================
// Unique index conflicts
// ============================================================================

#[tokio::test]
async fn test_insert_conflict_updates_existing_document() {
    let source = MemoryStore::new();
    let target = MemoryStore::new();
    let source_id = ObjectId::new();
    let target_id = ObjectId::new();

    source
        .seed(
            SOURCE_DB,
            "users",
            vec![doc! { "_id": source_id, "email": "ada@example.com", "name": "Ada Lovelace" }],
        )
        .await;
    target
        .create_unique_index(TARGET_DB, "users", &["email"])
        .await;
    target
        .seed(
            TARGET_DB,
            "users",
            vec![doc! { "_id": target_id, "email": "ada@example.com", "name": "Ada" }],
        )
        .await;

    let stats = reconcile(&source, &target, "users").await.unwrap();
    assert_eq!(stats.created, 0);
    assert_eq!(stats.updated, 1);
    assert_eq!(stats.deleted, 0);

    let target_docs = target.documents(TARGET_DB, "users").await;
    assert_eq!(target_docs.len(), 1);
    assert_eq!(target_docs[0].get_object_id("_id").unwrap(), target_id);
    assert_eq!(target_docs[0].get_str("name").unwrap(), "Ada Lovelace");

    let writes = target.take_writes().await;
    assert_eq!(
        writes,
        vec![WriteOp::Update {
            collection: "users".to_string(),
            id: Bson::ObjectId(target_id),
            set: vec!["name".to_string()],
            unset: vec![],
        }]
    );
}

#[tokio::test]
async fn test_insert_conflict_with_equal_document_is_unchanged() {
    let source = MemoryStore::new();
    let target = MemoryStore::new();
    source
        .seed(
            SOURCE_DB,
            "users",
            vec![doc! { "_id": "s1", "email": "ada@example.com" }],
        )
        .await;
    target
        .create_unique_index(TARGET_DB, "users", &["email"])
        .await;
    target
        .seed(
            TARGET_DB,
            "users",
            vec![doc! { "_id": "t1", "email": "ada@example.com" }],
        )
        .await;

    let stats = reconcile(&source, &target, "users").await.unwrap();
    assert_eq!(stats.unchanged, 1);
    assert_eq!(stats.writes(), 0);
    assert_eq!(target.documents(TARGET_DB, "users").await.len(), 1);
}

#[tokio::test]
async fn test_unresolvable_duplicate_key_aborts() {
    let source = MemoryStore::new();
    let target = MemoryStore::new();
    source
        .seed(SOURCE_DB, "forms", vec![doc! { "_id": "f1", "title": "Contact" }])
        .await;
    target.reject_inserts(TARGET_DB, "forms").await;

    let err = reconcile(&source, &target, "forms").await.unwrap_err();
    match err {
        SyncError::Reconcile { collection, source } => {
            assert_eq!(collection, "forms");
            assert!(matches!(source, StoreError::DuplicateKey { .. }));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_unreachable_target_aborts() {
    let source = MemoryStore::new();
    let target = MemoryStore::new();
    source
        .seed(SOURCE_DB, "pages", vec![doc! { "_id": "a" }])
        .await;
    target.set_unreachable(true).await;

    let err = reconcile(&source, &target, "pages").await.unwrap_err();
    assert!(matches!(
        err,
        SyncError::Reconcile {
            source: StoreError::Unreachable(_),
            ..
        }
    ));
}

// ============================================================================
// Globals
// ============================================================================

#[tokio::test]
async fn test_globals_are_matched_by_global_type() {
    let source = MemoryStore::new();
    let target = MemoryStore::new();
    source
        .seed(
            SOURCE_DB,
            "globals",
            vec![
                doc! { "_id": "s-header", "globalType": "header", "links": ["/", "/about"] },
                doc! { "_id": "s-footer", "globalType": "footer", "copyright": "2024" },
                doc! { "_id": "s-nav", "globalType": "nav", "items": [] },
            ],
        )
        .await;
    target
        .seed(
            TARGET_DB,
            "globals",
            vec![
                doc! { "_id": "t-header", "globalType": "header", "links": ["/"] },
                doc! { "_id": "t-footer", "globalType": "footer", "copyright": "2024" },
                doc! { "_id": "t-banner", "globalType": "banner", "text": "Sale" },
            ],
        )
        .await;

    let stats = reconcile(&source, &target, "globals").await.unwrap();
    assert_eq!(stats.created, 1);
    assert_eq!(stats.updated, 1);
    assert_eq!(stats.unchanged, 1);
    assert_eq!(stats.deleted, 1);

    let target_docs = target.documents(TARGET_DB, "globals").await;
    assert_eq!(target_docs.len(), 3);
    // A changed global is replaced by the source document, _id included
    assert!(by_id(&target_docs, "s-header").is_some());
    assert!(by_id(&target_docs, "t-header").is_none());
    // An unchanged global keeps its target _id
    assert!(by_id(&target_docs, "t-footer").is_some());
    assert!(by_id(&target_docs, "t-banner").is_none());
}

#[tokio::test]
async fn test_changed_global_is_deleted_and_reinserted() {
    let source = MemoryStore::new();
    let target = MemoryStore::new();
    source
        .seed(
            SOURCE_DB,
            "globals",
            vec![doc! { "_id": "s-header", "globalType": "header", "title": "New", "logo": "a.svg" }],
        )
        .await;
    target
        .seed(
            TARGET_DB,
            "globals",
            vec![doc! { "_id": "t-header", "globalType": "header", "title": "Old", "logo": "a.svg" }],
        )
        .await;

    reconcile(&source, &target, "globals").await.unwrap();

    assert_eq!(
        target.take_writes().await,
        vec![
            WriteOp::Delete {
                collection: "globals".to_string(),
                ids: vec![Bson::String("t-header".to_string())],
            },
            WriteOp::Insert {
                collection: "globals".to_string(),
                id: Bson::String("s-header".to_string()),
            },
        ]
    );
}

#[tokio::test]
async fn test_globals_without_global_type_are_matched_by_id() {
    let source = MemoryStore::new();
    let target = MemoryStore::new();
    source
        .seed(
            SOURCE_DB,
            "globals",
            vec![
                doc! { "_id": "g1", "globalType": "header", "title": "Site" },
                doc! { "_id": "z", "note": "settings" },
            ],
        )
        .await;
    target
        .seed(
            TARGET_DB,
            "globals",
            vec![doc! { "_id": "orphan", "note": "gone" }],
        )
        .await;

    let first = reconcile(&source, &target, "globals").await.unwrap();
    assert_eq!(first.created, 2);
    assert_eq!(first.deleted, 1);

    let second = reconcile(&source, &target, "globals").await.unwrap();
    assert_eq!(second.unchanged, 2);
    assert_eq!(second.writes(), 0);

    let target_docs = target.documents(TARGET_DB, "globals").await;
    assert_eq!(target_docs.len(), 2);
    assert!(by_id(&target_docs, "z").is_some());
}

#[tokio::test]
async fn test_changed_untyped_global_is_replaced() {
    let source = MemoryStore::new();
    let target = MemoryStore::new();
    source
        .seed(
            SOURCE_DB,
            "globals",
            vec![
                doc! { "_id": "g1", "globalType": "header" },
                doc! { "_id": "z", "note": "new" },
            ],
        )
        .await;
    target
        .seed(
            TARGET_DB,
            "globals",
            vec![
                doc! { "_id": "g1", "globalType": "header" },
                doc! { "_id": "z", "note": "old" },
            ],
        )
        .await;

    let stats = reconcile(&source, &target, "globals").await.unwrap();
    assert_eq!(stats.updated, 1);
    assert_eq!(stats.unchanged, 1);
    assert_eq!(stats.deleted, 0);
    assert_converged(&source, &target, "globals").await;
}

// ============================================================================
// Whole runs
// ============================================================================

#[tokio::test]
async fn test_run_converges_every_collection() {
    let source = MemoryStore::new();
    let target = MemoryStore::new();
    source
        .seed(SOURCE_DB, "pages", vec![doc! { "_id": "home", "title": "Home" }])
        .await;
    source
        .seed(
            SOURCE_DB,
            "categories",
            vec![doc! { "_id": 1, "name": "News" }, doc! { "_id": 2, "name": "Events" }],
        )
        .await;
    target
        .seed(TARGET_DB, "categories", vec![doc! { "_id": 1, "name": "Old news" }])
        .await;

    let collections = source.list_collections(SOURCE_DB).await.unwrap();
    let stats = Reconciler::new(&source, SOURCE_DB, &target, TARGET_DB)
        .run(&collections)
        .await
        .unwrap();

    assert_eq!(stats.collections_processed, 2);
    assert_eq!(stats.created, 2);
    assert_eq!(stats.updated, 1);
    assert_converged(&source, &target, "pages").await;
    assert_converged(&source, &target, "categories").await;
}

#[tokio::test]
async fn test_full_replace_reloads_export() {
    let source = MemoryStore::new();
    let target = MemoryStore::new();
    let id = ObjectId::new();
    source
        .seed(SOURCE_DB, "pages", vec![doc! { "_id": id, "title": "Home" }])
        .await;
    source.create_collection(SOURCE_DB, "search").await;
    target
        .seed(TARGET_DB, "legacy", vec![doc! { "_id": 1 }])
        .await;

    let root = TempDir::new().unwrap();
    let collections = source.list_collections(SOURCE_DB).await.unwrap();
    let stats = full_replace(&source, SOURCE_DB, &target, TARGET_DB, &collections, root.path())
        .await
        .unwrap();

    assert_eq!(stats.created, 1);
    assert_eq!(
        target.list_collections(TARGET_DB).await.unwrap(),
        vec!["pages"]
    );
    let pages = target.documents(TARGET_DB, "pages").await;
    assert_eq!(pages[0].get_object_id("_id").unwrap(), id);

    let exports: Vec<_> = std::fs::read_dir(root.path()).unwrap().collect();
    assert_eq!(exports.len(), 1);
}

// ============================================================================
// Backup and verification
// ============================================================================

#[tokio::test]
async fn test_backup_skipped_for_empty_target() {
    let target = MemoryStore::new();
    let root = TempDir::new().unwrap();
    let backup_root = root.path().join("backups");

    let path = backup_if_present(&target, TARGET_DB, &backup_root)
        .await
        .unwrap();
    assert!(path.is_none());
    assert!(!backup_root.exists());
}

#[tokio::test]
async fn test_backup_writes_one_file_per_collection() {
    let target = MemoryStore::new();
    target
        .seed(TARGET_DB, "pages", vec![doc! { "_id": "a", "title": "Home" }])
        .await;
    target.create_collection(TARGET_DB, "media").await;
    let root = TempDir::new().unwrap();

    let path = backup_if_present(&target, TARGET_DB, root.path())
        .await
        .unwrap()
        .unwrap();

    let mut files: Vec<String> = std::fs::read_dir(&path)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().to_string())
        .collect();
    files.sort();
    assert_eq!(files, vec!["media.json", "pages.json"]);
}

#[tokio::test]
async fn test_verify_fails_without_collections() {
    let target = MemoryStore::new();
    assert!(!verify(&target, TARGET_DB).await.unwrap());

    target.create_collection(TARGET_DB, "pages").await;
    assert!(verify(&target, TARGET_DB).await.unwrap());
}
