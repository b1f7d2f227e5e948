//! Deep merge of whole JSON files.
//!
//! Separate from the step engine: it never runs steps, it only folds several
//! documents into one.
//!
//! - Objects merge key-wise, recursively
//! - Arrays concatenate, left before right
//! - Any other pairing takes the right-hand value

use crate::error::MergeError;
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Provenance key written by [`stamp_source`].
pub const SOURCE_KEY: &str = "_source_";

pub fn merge_values(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_value) in source_map {
                match target_map.get_mut(&key) {
                    Some(existing) => {
                        let current = std::mem::take(existing);
                        *existing = merge_values(current, source_value);
                    }
                    None => {
                        target_map.insert(key, source_value);
                    }
                }
            }
            Value::Object(target_map)
        }
        (Value::Array(mut left), Value::Array(right)) => {
            left.extend(right);
            Value::Array(left)
        }
        (_, source) => source,
    }
}

/// Set `_source_` on every object in the tree, arrays included.
pub fn stamp_source(value: &mut Value, name: &str) {
    match value {
        Value::Object(map) => {
            for child in map.values_mut() {
                stamp_source(child, name);
            }
            map.insert(SOURCE_KEY.to_string(), Value::String(name.to_string()));
        }
        Value::Array(items) => {
            for item in items {
                stamp_source(item, name);
            }
        }
        _ => {}
    }
}

/// Read, optionally stamp, and merge `paths` left to right into `{}`.
pub fn merge_files<P: AsRef<Path>>(paths: &[P], nameit: bool) -> Result<Value, MergeError> {
    if paths.is_empty() {
        return Err(MergeError::NoInputs);
    }
    let mut merged = Value::Object(Map::new());
    for path in paths {
        let path = path.as_ref();
        let mut doc = read_json(path)?;
        if nameit {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string());
            stamp_source(&mut doc, &name);
        }
        debug!(path = %path.display(), "merging file");
        merged = merge_values(merged, doc);
    }
    info!(files = paths.len(), "merged files");
    Ok(merged)
}

/// Every `*.json` file directly inside `dir`, sorted by name.
pub fn json_files_in(dir: &Path) -> Result<Vec<PathBuf>, MergeError> {
    let entries = fs::read_dir(dir).map_err(|source| MergeError::Io {
        path: dir.to_path_buf(),
        source,
    })?;
    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| MergeError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "json") {
            files.push(path);
        }
    }
    if files.is_empty() {
        return Err(MergeError::NoInputs);
    }
    files.sort();
    Ok(files)
}

fn read_json(path: &Path) -> Result<Value, MergeError> {
    let bytes = fs::read(path).map_err(|source| MergeError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_slice(&bytes).map_err(|source| MergeError::Json {
        path: path.to_path_buf(),
        source,
    })
}
