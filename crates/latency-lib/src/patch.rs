//! Structural JSON diff producing RFC 6902 patches
//!
//! Both documents are walked in parallel. Objects are compared key by key,
//! arrays position by position, and every changed leaf yields exactly one
//! operation. Appending an element to a list therefore becomes a single
//! `add` at the new index rather than a `replace` of the whole list.
//!
//! Only `add`, `remove` and `replace` are emitted.

use json_patch::{AddOperation, Patch, PatchOperation, RemoveOperation, ReplaceOperation};
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

/// Failure while computing a patch
#[derive(Debug, Error)]
pub enum PatchError {
    /// A document could not be converted to JSON
    #[error("failed to serialize document: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Serialize both documents and diff them.
///
/// Applying the returned patch to `original` yields `mutated`.
pub fn create_patch<T: Serialize>(original: &T, mutated: &T) -> Result<Patch, PatchError> {
    let original = serde_json::to_value(original)?;
    let mutated = serde_json::to_value(mutated)?;
    Ok(diff(&original, &mutated))
}

/// Diff two JSON values into an ordered list of operations
pub fn diff(original: &Value, mutated: &Value) -> Patch {
    let mut ops = Vec::new();
    diff_value(&mut String::new(), original, mutated, &mut ops);
    Patch(ops)
}

fn diff_value(path: &mut String, from: &Value, to: &Value, ops: &mut Vec<PatchOperation>) {
    match (from, to) {
        (Value::Object(from), Value::Object(to)) => diff_object(path, from, to, ops),
        (Value::Array(from), Value::Array(to)) => diff_array(path, from, to, ops),
        _ if from == to => {}
        _ => ops.push(PatchOperation::Replace(ReplaceOperation {
            path: path.clone(),
            value: to.clone(),
        })),
    }
}

fn diff_object(
    path: &mut String,
    from: &Map<String, Value>,
    to: &Map<String, Value>,
    ops: &mut Vec<PatchOperation>,
) {
    for (key, from_value) in from {
        with_token(path, key, |path| match to.get(key) {
            Some(to_value) => diff_value(path, from_value, to_value, ops),
            None => ops.push(PatchOperation::Remove(RemoveOperation { path: path.clone() })),
        });
    }

    for (key, to_value) in to {
        if from.contains_key(key) {
            continue;
        }
        with_token(path, key, |path| {
            ops.push(PatchOperation::Add(AddOperation {
                path: path.clone(),
                value: to_value.clone(),
            }))
        });
    }
}

fn diff_array(path: &mut String, from: &[Value], to: &[Value], ops: &mut Vec<PatchOperation>) {
    let common = from.len().min(to.len());

    for (index, (from_value, to_value)) in from.iter().zip(to).enumerate() {
        with_token(path, &index.to_string(), |path| {
            diff_value(path, from_value, to_value, ops)
        });
    }

    for (index, to_value) in to.iter().enumerate().skip(common) {
        with_token(path, &index.to_string(), |path| {
            ops.push(PatchOperation::Add(AddOperation {
                path: path.clone(),
                value: to_value.clone(),
            }))
        });
    }

    // Highest index first so earlier removals don't shift later ones
    for index in (common..from.len()).rev() {
        with_token(path, &index.to_string(), |path| {
            ops.push(PatchOperation::Remove(RemoveOperation { path: path.clone() }))
        });
    }
}

/// Run `f` with `token` appended to `path` as an escaped JSON pointer segment
fn with_token(path: &mut String, token: &str, f: impl FnOnce(&mut String)) {
    let len = path.len();
    path.push('/');
    for c in token.chars() {
        match c {
            '~' => path.push_str("~0"),
            '/' => path.push_str("~1"),
            c => path.push(c),
        }
    }
    f(path);
    path.truncate(len);
}
