//! BSON codec helpers.
//!
//! Conversion between serde record graphs and `bson::Document` trees, the
//! insert-only deep merge used for both default application and
//! unknown-field carry-over, and strict dotted-path access for shallow
//! field operations.

use bson::{Bson, Document};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Error, Result};

/// Serialize a record graph into a document tree.
pub fn to_document<T: Serialize>(value: &T) -> Result<Document> {
    bson::to_document(value).map_err(|e| Error::Schema(format!("encode: {e}")))
}

/// Decode a document tree into a record graph. Fields missing from the
/// document take serde defaults only if the caller merged them in first;
/// decode failures are type mismatches, not transport problems.
pub fn from_document<T: DeserializeOwned>(document: Document) -> Result<T> {
    bson::from_document(document).map_err(|e| Error::mismatch("$", e))
}

/// Decode a single BSON value at a known dotted path.
pub fn from_bson<T: DeserializeOwned>(path: &str, value: Bson) -> Result<T> {
    bson::from_bson(value).map_err(|e| Error::mismatch(path, e))
}

/// Insert into `dst` every key of `src` that `dst` does not already have,
/// recursing into nested documents. Existing values are never touched, so
/// the same routine serves two masters:
///
/// * merging declared defaults under persisted data (defaults only fill
///   holes);
/// * carrying unknown persisted fields onto a freshly serialized record
///   so they round-trip on write-back.
///
/// Returns the number of leaves inserted.
pub fn merge_missing(dst: &mut Document, src: &Document) -> usize {
    let mut inserted = 0;
    for (key, value) in src {
        match dst.get_mut(key) {
            None => {
                dst.insert(key.clone(), value.clone());
                inserted += leaf_count(value);
            }
            Some(Bson::Document(existing)) => {
                if let Bson::Document(incoming) = value {
                    inserted += merge_missing(existing, incoming);
                }
            }
            Some(_) => {}
        }
    }
    inserted
}

fn leaf_count(value: &Bson) -> usize {
    match value {
        Bson::Document(doc) => doc.values().map(leaf_count).sum(),
        _ => 1,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Dotted-path access
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn segments(path: &str) -> Result<Vec<&str>> {
    if path.is_empty() || path.split('.').any(str::is_empty) {
        return Err(Error::Schema(format!("malformed field path `{path}`")));
    }
    Ok(path.split('.').collect())
}

/// Read the value at a dotted path. `Ok(None)` when any segment is
/// absent; a non-document intermediate is a type mismatch.
pub fn path_get<'a>(document: &'a Document, path: &str) -> Result<Option<&'a Bson>> {
    let segs = segments(path)?;
    let (leaf, parents) = segs.split_last().expect("segments are non-empty");

    let mut current = document;
    let mut walked = String::new();
    for seg in parents {
        if !walked.is_empty() {
            walked.push('.');
        }
        walked.push_str(seg);
        match current.get(*seg) {
            None => return Ok(None),
            Some(Bson::Document(sub)) => current = sub,
            Some(other) => {
                return Err(Error::mismatch(
                    walked,
                    format!("expected a document, found {}", bson_kind(other)),
                ))
            }
        }
    }
    Ok(current.get(*leaf))
}

/// Write the value at a dotted path, creating missing intermediate
/// documents. A non-document intermediate is a type mismatch; existing
/// data is never silently replaced by a container.
pub fn path_set(document: &mut Document, path: &str, value: Bson) -> Result<()> {
    let segs = segments(path)?;
    let (leaf, parents) = segs.split_last().expect("segments are non-empty");

    let mut current = document;
    let mut walked = String::new();
    for seg in parents {
        if !walked.is_empty() {
            walked.push('.');
        }
        walked.push_str(seg);
        if !current.contains_key(*seg) {
            current.insert(seg.to_string(), Document::new());
        }
        match current.get_mut(*seg) {
            Some(Bson::Document(sub)) => current = sub,
            Some(other) => {
                return Err(Error::mismatch(
                    walked,
                    format!("expected a document, found {}", bson_kind(other)),
                ))
            }
            None => unreachable!("inserted above"),
        }
    }
    current.insert(leaf.to_string(), value);
    Ok(())
}

fn bson_kind(value: &Bson) -> &'static str {
    match value {
        Bson::Double(_) => "a double",
        Bson::String(_) => "a string",
        Bson::Array(_) => "an array",
        Bson::Document(_) => "a document",
        Bson::Boolean(_) => "a boolean",
        Bson::Null => "null",
        Bson::Int32(_) | Bson::Int64(_) => "an integer",
        _ => "an unsupported value",
    }
}
