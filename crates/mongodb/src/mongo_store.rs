//! MongoDB implementation of [`DocumentStore`].

use async_trait::async_trait;
use bson::{doc, Bson, Document};
use futures::TryStreamExt;
use mongodb::{options::ClientOptions, Client, Collection, IndexModel};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::error::NAMESPACE_NOT_FOUND_CODE;
use crate::store::{DatabaseInfo, DocumentStore};
use crate::StoreError;

/// Connect and server selection timeout applied to every client.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// A MongoDB deployment reached through one client.
#[derive(Debug)]
pub struct MongoStore {
    client: Client,
    closed: AtomicBool,
}

impl MongoStore {
    /// Build a client for `uri` without contacting the server.
    pub async fn from_uri(uri: &str) -> Result<Self, StoreError> {
        Self::with_timeout(uri, CONNECT_TIMEOUT).await
    }

    /// Build a client whose connect and server selection timeouts are `timeout`.
    pub async fn with_timeout(uri: &str, timeout: Duration) -> Result<Self, StoreError> {
        let mut options = match ClientOptions::parse(uri).await {
            Ok(options) => {
                tracing::debug!("MongoDB options parsed successfully");
                options
            }
            Err(e) => {
                tracing::error!("Failed to parse MongoDB connection options: {}", e);
                return Err(e.into());
            }
        };
        // Add connection timeout to prevent hanging
        options.connect_timeout = Some(timeout);
        options.server_selection_timeout = Some(timeout);

        let client = Client::with_options(options)?;
        Ok(Self {
            client,
            closed: AtomicBool::new(false),
        })
    }

    fn collection(&self, database: &str, collection: &str) -> Collection<Document> {
        self.client.database(database).collection::<Document>(collection)
    }
}

fn is_namespace_not_found(err: &mongodb::error::Error) -> bool {
    matches!(
        err.kind.as_ref(),
        mongodb::error::ErrorKind::Command(command_error)
            if command_error.code == NAMESPACE_NOT_FOUND_CODE
    )
}

#[async_trait]
impl DocumentStore for MongoStore {
    async fn ping(&self) -> Result<(), StoreError> {
        self.client
            .database("admin")
            .run_command(doc! { "ping": 1 })
            .await?;
        Ok(())
    }

    async fn list_databases(&self) -> Result<Vec<DatabaseInfo>, StoreError> {
        let databases = self.client.list_databases().await?;
        Ok(databases
            .into_iter()
            .map(|spec| DatabaseInfo {
                name: spec.name,
                size_on_disk: spec.size_on_disk,
            })
            .collect())
    }

    async fn list_collections(&self, database: &str) -> Result<Vec<String>, StoreError> {
        let names = self
            .client
            .database(database)
            .list_collection_names()
            .await?;
        // Skip system collections
        Ok(names
            .into_iter()
            .filter(|name| !name.starts_with("system."))
            .collect())
    }

    async fn find_all(
        &self,
        database: &str,
        collection: &str,
    ) -> Result<Vec<Document>, StoreError> {
        let cursor = self.collection(database, collection).find(doc! {}).await?;
        Ok(cursor.try_collect().await?)
    }

    async fn find_one(
        &self,
        database: &str,
        collection: &str,
        filter: Document,
    ) -> Result<Option<Document>, StoreError> {
        Ok(self.collection(database, collection).find_one(filter).await?)
    }

    async fn count(&self, database: &str, collection: &str) -> Result<u64, StoreError> {
        Ok(self
            .collection(database, collection)
            .count_documents(doc! {})
            .await?)
    }

    async fn insert_one(
        &self,
        database: &str,
        collection: &str,
        document: Document,
    ) -> Result<(), StoreError> {
        self.collection(database, collection)
            .insert_one(document)
            .await?;
        Ok(())
    }

    async fn insert_many(
        &self,
        database: &str,
        collection: &str,
        documents: Vec<Document>,
    ) -> Result<(), StoreError> {
        if documents.is_empty() {
            return Ok(());
        }
        self.collection(database, collection)
            .insert_many(documents)
            .await?;
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
        let mut update = Document::new();
        if !set.is_empty() {
            update.insert("$set", set);
        }
        if !unset.is_empty() {
            let fields: Document = unset.into_iter().map(|f| (f, Bson::from(""))).collect();
            update.insert("$unset", fields);
        }
        if update.is_empty() {
            return Ok(());
        }

        self.collection(database, collection)
            .update_one(doc! { "_id": id.clone() }, update)
            .await?;
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
        let result = self
            .collection(database, collection)
            .delete_many(doc! { "_id": { "$in": ids } })
            .await?;
        Ok(result.deleted_count)
    }

    async fn unique_indexes(
        &self,
        database: &str,
        collection: &str,
    ) -> Result<Vec<Vec<String>>, StoreError> {
        let cursor = match self.collection(database, collection).list_indexes().await {
            Ok(cursor) => cursor,
            Err(e) if is_namespace_not_found(&e) => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let indexes: Vec<IndexModel> = cursor.try_collect().await?;

        Ok(indexes
            .into_iter()
            .filter(|index| {
                index
                    .options
                    .as_ref()
                    .and_then(|options| options.unique)
                    .unwrap_or(false)
            })
            .map(|index| index.keys.keys().cloned().collect::<Vec<String>>())
            .filter(|fields| fields.as_slice() != ["_id"])
            .collect())
    }

    async fn drop_database(&self, database: &str) -> Result<(), StoreError> {
        self.client.database(database).drop().await?;
        Ok(())
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.client.clone().shutdown().await;
        tracing::debug!("MongoDB client shut down");
    }
}
