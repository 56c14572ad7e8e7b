//! Document keys and field-level change detection.

use bson::{Bson, Document};
use std::collections::BTreeSet;

/// Primary key field of every document.
pub const ID_FIELD: &str = "_id";

/// Version marker written by the CMS document mapper.
pub const VERSION_FIELD: &str = "__v";

/// Discriminator of documents in a globals collection.
pub const GLOBAL_TYPE_FIELD: &str = "globalType";

/// Fields never compared between a source and a target document.
pub const INTERNAL_FIELDS: [&str; 2] = [ID_FIELD, VERSION_FIELD];

/// String form of a document `_id`, used to match source and target documents.
pub fn document_key(id: &Bson) -> String {
    match id {
        Bson::ObjectId(oid) => oid.to_hex(),
        Bson::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Key of a document by its `_id`, `None` when the document has no `_id`.
pub fn id_key(doc: &Document) -> Option<String> {
    doc.get(ID_FIELD).map(document_key)
}

/// `globalType` of a document, `None` when absent or not a string.
pub fn global_type(doc: &Document) -> Option<&str> {
    doc.get_str(GLOBAL_TYPE_FIELD).ok()
}

/// One field that differs between a matched source and target document.
///
/// A `None` value means the field is absent on that side.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeRecord {
    pub field: String,
    pub old_value: Option<Bson>,
    pub new_value: Option<Bson>,
}

/// Serialized form of a field value used for comparison.
///
/// Values are rendered as relaxed Extended JSON with object keys sorted, so
/// nested documents holding the same fields in a different order produce the
/// same signature. Array order is significant.
///
/// Relaxed Extended JSON renders `Int32` and `Int64` as plain JSON integers,
/// so `Int32(5)` and `Int64(5)` compare equal. A `Double` keeps its fraction
/// (`5.0`), so `Double(5.0)` differs from both.
pub fn value_signature(value: &Bson) -> String {
    sort_keys(value.clone().into_relaxed_extjson()).to_string()
}

fn sort_keys(value: serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let mut entries: Vec<(String, serde_json::Value)> = map.into_iter().collect();
            entries.sort_by(|(a, _), (b, _)| a.cmp(b));
            serde_json::Value::Object(
                entries
                    .into_iter()
                    .map(|(key, value)| (key, sort_keys(value)))
                    .collect(),
            )
        }
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.into_iter().map(sort_keys).collect())
        }
        other => other,
    }
}

/// Compute the change records turning `target` into `source`.
///
/// The union of both field sets is compared, internal fields excluded. Records
/// come out in field-name order.
pub fn diff_documents(source: &Document, target: &Document) -> Vec<ChangeRecord> {
    let fields: BTreeSet<&str> = source
        .keys()
        .chain(target.keys())
        .map(String::as_str)
        .filter(|field| !INTERNAL_FIELDS.contains(field))
        .collect();

    let mut changes = Vec::new();
    for field in fields {
        let new_value = source.get(field);
        let old_value = target.get(field);
        let differs = match (new_value, old_value) {
            (Some(new), Some(old)) => value_signature(new) != value_signature(old),
            (None, None) => false,
            _ => true,
        };
        if differs {
            changes.push(ChangeRecord {
                field: field.to_string(),
                old_value: old_value.cloned(),
                new_value: new_value.cloned(),
            });
        }
    }
    changes
}

/// Split change records into a `$set` document and the list of fields to `$unset`.
pub fn partial_update(changes: &[ChangeRecord]) -> (Document, Vec<String>) {
    let mut set = Document::new();
    let mut unset = Vec::new();
    for change in changes {
        match &change.new_value {
            Some(value) => {
                set.insert(change.field.clone(), value.clone());
            }
            None => unset.push(change.field.clone()),
        }
    }
    (set, unset)
}
