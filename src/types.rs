//! Core types shared by the traversal, bundling and remote modules.

use std::str::FromStr;

use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::Value;

use crate::error::BundleError;

/// One document of a collection.
///
/// Identity is `file_name`: two nodes with the same name are the same node
/// for traversal and deduplication.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentNode {
    /// Collection-relative path (`/` separated) or absolute URL.
    pub file_name: String,
    /// Raw YAML or JSON text.
    pub content: String,
    /// Already parsed tree. When present, `content` is not parsed again.
    pub parsed: Option<Value>,
}

impl DocumentNode {
    /// Create a node from raw text.
    pub fn new(file_name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            content: content.into(),
            parsed: None,
        }
    }

    /// Create a node from an already parsed tree.
    pub fn from_value(file_name: impl Into<String>, parsed: Value) -> Self {
        Self {
            file_name: file_name.into(),
            content: String::new(),
            parsed: Some(parsed),
        }
    }
}

/// Container vocabulary family of a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SpecVersion {
    /// Swagger 2.0: `definitions`, `parameters`, `responses`,
    /// `securityDefinitions` at the document root.
    Legacy,
    /// OpenAPI 3.x: everything under `components`.
    #[default]
    Current,
}

impl SpecVersion {
    /// Detect the vocabulary from the `swagger` / `openapi` root fields.
    ///
    /// Returns `None` when neither field is present.
    pub fn detect(document: &Value) -> Option<Self> {
        if let Some(v) = document.get("openapi").and_then(version_text) {
            return v.starts_with('3').then_some(SpecVersion::Current);
        }
        document
            .get("swagger")
            .and_then(version_text)
            .filter(|v| v.starts_with('2'))
            .map(|_| SpecVersion::Legacy)
    }
}

// YAML authors often write `swagger: 2.0` unquoted, which parses as a number.
fn version_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

impl FromStr for SpecVersion {
    type Err = BundleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "2" | "2.0" | "swagger" | "legacy" => Ok(SpecVersion::Legacy),
            "3" | "3.0" | "3.1" | "openapi" | "current" => Ok(SpecVersion::Current),
            other => Err(BundleError::UnsupportedVersion {
                message: format!("expected 2.0, 3.0 or 3.1, got \"{}\"", other),
            }),
        }
    }
}

/// A reference that could not be resolved to content.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MissingRef {
    /// The referenced file is not part of the collection (or could not be
    /// fetched). Serialises as `{"path": "..."}`.
    Path { path: String },
    /// The reference escaped resolvable space, e.g. climbed above the
    /// collection root. Serialises as `{"$ref": "...", "path": null}`.
    Unreachable { reference: String },
}

impl MissingRef {
    /// The resolved path, when there is one.
    pub fn path(&self) -> Option<&str> {
        match self {
            MissingRef::Path { path } => Some(path),
            MissingRef::Unreachable { .. } => None,
        }
    }
}

impl Serialize for MissingRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            MissingRef::Path { path } => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("path", path)?;
                map.end()
            }
            MissingRef::Unreachable { reference } => {
                let mut map = serializer.serialize_map(Some(2))?;
                map.serialize_entry("$ref", reference)?;
                map.serialize_entry("path", &Option::<String>::None)?;
                map.end()
            }
        }
    }
}

/// Options for bundling.
#[derive(Debug, Clone, Default)]
pub struct BundleOptions {
    /// Container vocabulary used for promotion.
    pub version: SpecVersion,
    /// When true, remote (`http(s)://`) references are looked up in the pool
    /// by URL, as produced by `resolve_remote_refs`. Otherwise they are left
    /// untouched.
    pub remote_pool: bool,
}

impl BundleOptions {
    pub fn new(version: SpecVersion) -> Self {
        Self {
            version,
            remote_pool: false,
        }
    }

    /// Resolve remote references against pool entries named by URL.
    pub fn remote_pool(mut self, enabled: bool) -> Self {
        self.remote_pool = enabled;
        self
    }
}
