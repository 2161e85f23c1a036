//! Metadata filtering for the two places rich metadata must shrink:
//! before chunking (the splitter counts metadata length against the chunk
//! size budget) and before upserting to the vector index (the index only
//! accepts primitive values and lists of strings).

use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};

/// Serialized chunking-time metadata must stay under this margin, which in
/// turn must stay well under the smallest configured chunk size. Oversized
/// metadata silently shrinks usable chunk content.
pub const CHUNKING_METADATA_MARGIN: usize = 800;

/// Maximum length for any single chunking-time metadata value.
const CHUNKING_VALUE_LIMIT: usize = 50;

/// Fields the vector index needs for search and retrieval.
const ESSENTIAL_STORAGE_KEYS: &[&str] = &[
    "document_id",
    "content_type",
    "block_type",
    "block_index",
    "page_number",
    "hierarchical_level",
    "importance_score",
    "layout_tag",
    "layout_block_class",
    "layout_level",
];

/// Fields known to blow past index metadata limits.
const OVERSIZED_KEYS: &[&str] = &[
    "bbox",
    "table_data",
    "image_info",
    "layout_bbox",
    "layout_sentences",
];

/// Reduce metadata to the absolute minimum for chunking.
///
/// Keeps `document_id`, `content_type`, and `hierarchical_level` (each
/// value stringified and truncated to 50 characters) plus a derived
/// `chunk_id`. If the serialized result still exceeds the 800-character
/// margin, falls back to 20-character `document_id`/`content_type` and the
/// `chunk_id` alone.
pub fn filter_for_chunking(metadata: &Map<String, Value>) -> Map<String, Value> {
    let mut filtered = Map::new();

    for key in ["document_id", "content_type", "hierarchical_level"] {
        if let Some(value) = metadata.get(key) {
            filtered.insert(
                key.to_string(),
                json!(truncate(&value_to_string(value), CHUNKING_VALUE_LIMIT)),
            );
        }
    }

    let document_id = metadata
        .get("document_id")
        .map(value_to_string)
        .unwrap_or_default();
    let chunk_id = derived_chunk_id(&document_id);
    filtered.insert("chunk_id".into(), json!(chunk_id));

    if serialized_len(&filtered) > CHUNKING_METADATA_MARGIN {
        tracing::warn!(
            len = serialized_len(&filtered),
            "chunking metadata still too large, truncating to essentials"
        );
        let content_type = metadata
            .get("content_type")
            .map(value_to_string)
            .unwrap_or_default();
        filtered = Map::new();
        filtered.insert("document_id".into(), json!(truncate(&document_id, 20)));
        filtered.insert("content_type".into(), json!(truncate(&content_type, 20)));
        filtered.insert("chunk_id".into(), json!(derived_chunk_id(&document_id)));
    }

    filtered
}

/// Reduce metadata to the index-compatible essential set, applied just
/// before upserting. Primitives pass through, lists survive only when all
/// elements are strings, known-oversized fields are dropped, and anything
/// else is stringified.
pub fn filter_for_storage(metadata: &Map<String, Value>) -> Map<String, Value> {
    let mut filtered = Map::new();

    for key in ESSENTIAL_STORAGE_KEYS {
        if let Some(value) = metadata.get(*key) {
            if is_primitive(value) {
                filtered.insert((*key).to_string(), value.clone());
            } else if !value.is_null() {
                filtered.insert((*key).to_string(), json!(value_to_string(value)));
            }
        }
    }

    for (key, value) in metadata {
        if ESSENTIAL_STORAGE_KEYS.contains(&key.as_str()) {
            continue;
        }
        if OVERSIZED_KEYS.contains(&key.as_str()) {
            continue;
        }

        if is_primitive(value) {
            filtered.insert(key.clone(), value.clone());
        } else if let Value::Array(items) = value {
            if items.iter().all(Value::is_string) {
                filtered.insert(key.clone(), value.clone());
            }
        } else if !value.is_null() {
            filtered.insert(key.clone(), json!(value_to_string(value)));
        }
    }

    filtered
}

/// Serialized length of a metadata map, as counted against the chunk size
/// budget.
pub fn serialized_len(metadata: &Map<String, Value>) -> usize {
    serde_json::to_string(metadata).map(|s| s.len()).unwrap_or(0)
}

fn derived_chunk_id(document_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(document_id.as_bytes());
    let digest = hasher.finalize();
    let mut hex = String::with_capacity(16);
    for byte in digest.iter().take(8) {
        hex.push_str(&format!("{:02x}", byte));
    }
    format!("chunk_{hex}")
}

fn is_primitive(value: &Value) -> bool {
    matches!(
        value,
        Value::String(_) | Value::Number(_) | Value::Bool(_)
    )
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}
