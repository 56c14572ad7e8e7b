//! Collection file encoding.

use bson::{Bson, Document};

use crate::SnapshotError;

/// File extension of every collection file in a snapshot directory.
pub const COLLECTION_FILE_EXTENSION: &str = "json";

/// Encode a collection's documents as one JSON array.
///
/// Each document is written in canonical Extended JSON so that `_id` values
/// and other BSON-only types (ObjectId, dates, decimals, binaries) come back
/// unchanged when the file is decoded.
///
/// # File Format
///
/// ```json
/// [
///   { "_id": { "$oid": "65a1f0c2e4b0a1b2c3d4e5f6" }, "title": "Home" },
///   { "_id": "about", "title": "About" }
/// ]
/// ```
pub fn encode_documents(documents: &[Document]) -> Result<String, SnapshotError> {
    let values: Vec<serde_json::Value> = documents
        .iter()
        .map(|doc| Bson::Document(doc.clone()).into_canonical_extjson())
        .collect();
    Ok(serde_json::to_string_pretty(&values)?)
}

/// Decode a collection file written by [`encode_documents`].
pub fn decode_documents(content: &str) -> Result<Vec<Document>, SnapshotError> {
    let values: Vec<serde_json::Value> = serde_json::from_str(content)?;

    let mut documents = Vec::with_capacity(values.len());
    for (position, value) in values.into_iter().enumerate() {
        match Bson::try_from(value) {
            Ok(Bson::Document(doc)) => documents.push(doc),
            Ok(other) => {
                return Err(SnapshotError::NotADocument {
                    position,
                    found: format!("{:?}", other.element_type()),
                })
            }
            Err(e) => return Err(SnapshotError::ExtendedJson(e.to_string())),
        }
    }
    Ok(documents)
}

/// File name used for a collection, e.g. `pages.json`.
pub fn collection_file_name(collection: &str) -> Result<String, SnapshotError> {
    if collection.is_empty()
        || collection.contains('/')
        || collection.contains('\\')
        || collection == "."
        || collection == ".."
    {
        return Err(SnapshotError::InvalidCollectionName(collection.to_string()));
    }
    Ok(format!("{collection}.{COLLECTION_FILE_EXTENSION}"))
}
