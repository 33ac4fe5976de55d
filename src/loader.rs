//! Document loading and parsing.
//!
//! Handles parsing YAML/JSON text into trees and loading a collection of
//! documents from a directory.

use std::path::{Path, PathBuf};

use serde_json::{Map, Number, Value};
use tracing::debug;

use crate::error::BundleError;
use crate::types::DocumentNode;

/// File extensions treated as API description documents.
pub const DOCUMENT_EXTENSIONS: &[&str] = &["yaml", "yml", "json"];

/// Parse YAML or JSON text into a tree.
///
/// Mapping keys that YAML reads as numbers or booleans (`200:` in a
/// responses map) become strings.
///
/// # Errors
///
/// Returns `BundleError::Parse` if the text is neither valid JSON nor YAML.
pub fn parse_document(file_name: &str, content: &str) -> Result<Value, BundleError> {
    let trimmed = content.trim_start();
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        if let Ok(value) = serde_json::from_str(content) {
            return Ok(value);
        }
    }

    let yaml: serde_yaml::Value =
        serde_yaml::from_str(content).map_err(|e| BundleError::Parse {
            file: file_name.to_string(),
            message: e.to_string(),
        })?;
    yaml_to_json(yaml).map_err(|message| BundleError::Parse {
        file: file_name.to_string(),
        message,
    })
}

fn yaml_to_json(value: serde_yaml::Value) -> Result<Value, String> {
    Ok(match value {
        serde_yaml::Value::Null => Value::Null,
        serde_yaml::Value::Bool(b) => Value::Bool(b),
        serde_yaml::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Number(i.into())
            } else if let Some(u) = n.as_u64() {
                Value::Number(u.into())
            } else {
                let f = n.as_f64().unwrap_or(f64::NAN);
                Value::Number(
                    Number::from_f64(f).ok_or_else(|| format!("unsupported number {}", n))?,
                )
            }
        }
        serde_yaml::Value::String(s) => Value::String(s),
        serde_yaml::Value::Sequence(items) => Value::Array(
            items
                .into_iter()
                .map(yaml_to_json)
                .collect::<Result<_, _>>()?,
        ),
        serde_yaml::Value::Mapping(mapping) => {
            let mut map = Map::with_capacity(mapping.len());
            for (key, value) in mapping {
                map.insert(mapping_key(key)?, yaml_to_json(value)?);
            }
            Value::Object(map)
        }
        serde_yaml::Value::Tagged(tagged) => yaml_to_json(tagged.value)?,
    })
}

fn mapping_key(key: serde_yaml::Value) -> Result<String, String> {
    match key {
        serde_yaml::Value::String(s) => Ok(s),
        serde_yaml::Value::Number(n) => Ok(n.to_string()),
        serde_yaml::Value::Bool(b) => Ok(b.to_string()),
        serde_yaml::Value::Null => Ok("null".to_string()),
        other => Err(format!("unsupported mapping key {:?}", other)),
    }
}

/// Parse a node's content unless it already carries a parsed tree.
pub fn parsed_content(node: &DocumentNode) -> Result<Value, BundleError> {
    match &node.parsed {
        Some(value) => Ok(value.clone()),
        None => parse_document(&node.file_name, &node.content),
    }
}

/// Load a single file as a document node named `file_name`.
///
/// # Errors
///
/// Returns `BundleError::FileNotFound` if the file doesn't exist,
/// or `BundleError::ReadError` if it cannot be read.
pub fn load_document(path: &Path, file_name: impl Into<String>) -> Result<DocumentNode, BundleError> {
    if !path.exists() {
        return Err(BundleError::FileNotFound {
            path: path.to_path_buf(),
        });
    }

    let content = std::fs::read_to_string(path).map_err(|source| BundleError::ReadError {
        path: path.to_path_buf(),
        source,
    })?;

    Ok(DocumentNode::new(file_name, content))
}

/// Load every YAML/JSON file under `dir` as a collection.
///
/// Files are named by their path relative to `dir`, with `/` separators, and
/// returned sorted by name. Content is not parsed here.
pub fn load_collection(dir: &Path) -> Result<Vec<DocumentNode>, BundleError> {
    if !dir.is_dir() {
        return Err(BundleError::FileNotFound {
            path: dir.to_path_buf(),
        });
    }

    let mut files = Vec::new();
    collect_files_recursive(dir, &mut files);
    files.sort();

    let mut nodes = Vec::with_capacity(files.len());
    for file in files {
        let name = collection_name(dir, &file).ok_or_else(|| BundleError::FileNotFound {
            path: file.clone(),
        })?;
        nodes.push(load_document(&file, name)?);
    }
    debug!(dir = %dir.display(), files = nodes.len(), "loaded collection");
    Ok(nodes)
}

/// Name of `file` inside the collection rooted at `dir`.
pub fn collection_name(dir: &Path, file: &Path) -> Option<String> {
    let relative = file.strip_prefix(dir).ok()?;
    let parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    (!parts.is_empty()).then(|| parts.join("/"))
}

fn is_document(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| DOCUMENT_EXTENSIONS.contains(&e))
        .unwrap_or(false)
}

fn collect_files_recursive(dir: &Path, files: &mut Vec<PathBuf>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_files_recursive(&path, files);
        } else if is_document(&path) {
            files.push(path);
        }
    }
}
