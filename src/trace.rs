//! Placement of referenced content inside the shared container.
//!
//! A Container Trace is the list of keys, from the container root, where a
//! referenced node is promoted (`["schemas", "pet.yaml"]`). An empty trace
//! means the content is inlined at the reference site.

use crate::pointer::{decode_pointer_segment, to_pointer};
use crate::types::SpecVersion;

/// Root key of the OpenAPI 3 container.
pub const COMPONENTS_KEY: &str = "components";

/// Keywords whose value is a schema, folded to the schema bucket.
pub const SCHEMA_ALIASES: &[&str] = &[
    "allOf",
    "oneOf",
    "anyOf",
    "not",
    "additionalProperties",
    "items",
    "schema",
];

/// Container keys of one version.
#[derive(Debug)]
pub struct Vocabulary {
    /// Key under which all containers live, `None` if they sit at the
    /// document root.
    pub root: Option<&'static str>,
    /// Top-level container keys.
    pub containers: &'static [&'static str],
    /// Bucket that schema aliases fold to.
    pub schema_bucket: &'static str,
    /// Keys whose content is always inlined.
    pub inline_only: &'static [&'static str],
}

const CURRENT: Vocabulary = Vocabulary {
    root: Some(COMPONENTS_KEY),
    containers: &[
        "schemas",
        "responses",
        "parameters",
        "examples",
        "requestBodies",
        "headers",
        "securitySchemes",
        "links",
        "callbacks",
    ],
    schema_bucket: "schemas",
    inline_only: &["example"],
};

const LEGACY: Vocabulary = Vocabulary {
    root: None,
    containers: &[
        "definitions",
        "parameters",
        "responses",
        "securityDefinitions",
    ],
    schema_bucket: "definitions",
    inline_only: &["example", "examples"],
};

impl SpecVersion {
    /// Container vocabulary of this version.
    pub fn vocabulary(self) -> &'static Vocabulary {
        match self {
            SpecVersion::Current => &CURRENT,
            SpecVersion::Legacy => &LEGACY,
        }
    }
}

impl Vocabulary {
    /// True if `key` is one of this version's top-level container keys.
    pub fn is_container(&self, key: &str) -> bool {
        self.containers.contains(&key)
    }

    fn fold_alias<'a>(&self, key: &'a str) -> &'a str {
        if SCHEMA_ALIASES.contains(&key) {
            self.schema_bucket
        } else {
            key
        }
    }

    /// True if a reference at `ancestors` already sits inside the container.
    fn is_canonical(&self, ancestors: &[String]) -> bool {
        match (self.root, ancestors.first()) {
            (Some(root), Some(first)) => first == root,
            // below a root-level bucket, e.g. `definitions/Pet`
            (None, Some(first)) => ancestors.len() > 1 && self.is_container(first),
            (_, None) => false,
        }
    }
}

/// Compute the Container Trace of a reference.
///
/// * `ancestors` - object keys from the document root to the reference site;
///   array indices are not part of it
/// * `file_name` - file holding the referenced content
/// * `local_pointer` - `#` suffix of the reference (empty when absent)
///
/// The entry key is `file_name + local_pointer`, pointer-decoded. The trace is
/// scanned from the reference site outward; schema aliases fold to the schema
/// bucket and the scan stops at the first container key.
pub fn resolve_trace(
    ancestors: &[String],
    file_name: &str,
    local_pointer: &str,
    version: SpecVersion,
) -> Vec<String> {
    let vocabulary = version.vocabulary();
    if vocabulary.is_canonical(ancestors) {
        return Vec::new();
    }

    let entry = decode_pointer_segment(&format!("{}{}", file_name, local_pointer));
    let scan = std::iter::once(entry.as_str()).chain(ancestors.iter().rev().map(String::as_str));

    let mut trace: Vec<String> = Vec::new();
    for (depth, key) in scan.enumerate() {
        if depth > 0 && vocabulary.inline_only.contains(&key) {
            return Vec::new();
        }
        let key = if depth == 0 { key } else { vocabulary.fold_alias(key) };
        trace.push(key.to_string());

        if depth > 0 && vocabulary.is_container(key) {
            // the reference object is the whole top-level bucket
            if version == SpecVersion::Legacy && ancestors.len() == 1 && depth == 1 {
                return Vec::new();
            }
            trace.reverse();
            return trace;
        }
    }

    Vec::new()
}

/// Local reference to a trace location in the merged document.
pub fn container_pointer(trace: &[String], version: SpecVersion) -> String {
    match version.vocabulary().root {
        Some(root) => {
            let mut segments = Vec::with_capacity(trace.len() + 1);
            segments.push(root.to_string());
            segments.extend(trace.iter().cloned());
            to_pointer(&segments)
        }
        None => to_pointer(trace),
    }
}
