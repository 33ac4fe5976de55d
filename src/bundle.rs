//! Bundling of a multi-file collection into one document.
//!
//! Bundling runs in two passes:
//!
//! 1. A depth-first traversal over the files reachable from the root. Every
//!    relevant `$ref` is rewritten to its resolvable path (collection-relative
//!    file plus `#` pointer) and recorded once in the reference directory,
//!    together with its Container Trace.
//! 2. A walk over the root content that replaces every recorded reference by
//!    inline content, by a local reference into the shared container (whose
//!    entry is materialized on first use), or by a placeholder when the target
//!    could not be found.
//!
//! Unresolved references never fail the call; they are listed in
//! [`BundleOutput::missing`]. Only parse failures are fatal.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::dfs::{dedup_missing, traverse, Expansion, Traversal};
use crate::error::BundleError;
use crate::loader::parsed_content;
use crate::pointer::{
    calculate_path, classify_str, local_suffix, missing_descriptor, navigate_fragment,
    remove_local_suffix, RefKind, REF_KEY,
};
use crate::trace::{container_pointer, resolve_trace};
use crate::types::{BundleOptions, DocumentNode, MissingRef, SpecVersion};

/// Marker key of the placeholder left for an unresolved reference.
pub const UNRESOLVED_KEY: &str = "x-unresolved-ref";

/// Marker key of the placeholder left for a reference that inlines itself.
pub const CIRCULAR_KEY: &str = "x-circular-ref";

/// One recorded reference, keyed in the directory by its resolvable path.
#[derive(Debug, Clone, PartialEq)]
pub struct RefEntry {
    /// Pointer part after `#`, if any.
    pub local: Option<String>,
    /// Placement inside the shared container; empty means inline.
    pub key_in_components: Vec<String>,
    /// Snapshot of the reference-bearing object before rewriting.
    pub node: Value,
    /// Local reference to the container location, when promoted.
    pub reference: Option<String>,
    /// Segments from the owning file's root to the reference site, array
    /// indices included.
    pub trace_to_parent: Vec<String>,
    /// File that holds the reference.
    pub parent_node_key: String,
    /// File that holds the referenced content.
    pub target_file: String,
    /// True if the target could not be located.
    pub missing: bool,
}

/// Result of [`bundle`].
#[derive(Debug, Clone)]
pub struct BundleOutput {
    /// Root content with every collection reference resolved.
    pub file_content: Value,
    /// Shared container entries promoted during bundling, keyed by bucket.
    pub components: Map<String, Value>,
    /// Visited files, root first, in traversal order.
    pub traverse_order: Vec<String>,
    /// Deduplicated unresolved references.
    pub missing: Vec<MissingRef>,
    /// Reference directory, keyed by resolvable path.
    pub references: BTreeMap<String, RefEntry>,
}

impl BundleOutput {
    /// Merge the shared container into the root content.
    ///
    /// Entries already present in the root win over promoted ones.
    pub fn into_document(self, version: SpecVersion) -> Value {
        let mut document = self.file_content;
        if let Value::Object(root) = &mut document {
            match version.vocabulary().root {
                Some(key) => {
                    let slot = root
                        .entry(key.to_string())
                        .or_insert_with(|| Value::Object(Map::new()));
                    if !slot.is_object() {
                        *slot = Value::Object(Map::new());
                    }
                    if let Some(container) = slot.as_object_mut() {
                        merge_missing(container, self.components);
                    }
                }
                None => merge_missing(root, self.components),
            }
        }
        document
    }
}

/// Bundle `root` and the files it references from `pool`.
///
/// # Errors
///
/// Returns `BundleError::Parse` if any reachable file cannot be parsed.
pub fn bundle(
    root: &DocumentNode,
    pool: &[DocumentNode],
    options: &BundleOptions,
) -> Result<BundleOutput, BundleError> {
    let mut bundler = Bundler::new(root, pool, options);
    let traversal = bundler.discover(root)?;
    bundler.assemble(traversal)
}

/// Bundle the pool entry named `root_name`.
///
/// # Errors
///
/// Returns `BundleError::UnknownRoot` if no pool entry has that name.
pub fn bundle_collection(
    root_name: &str,
    pool: &[DocumentNode],
    options: &BundleOptions,
) -> Result<BundleOutput, BundleError> {
    let root = pool
        .iter()
        .find(|n| n.file_name == root_name)
        .ok_or_else(|| BundleError::UnknownRoot {
            file: root_name.to_string(),
        })?;
    bundle(root, pool, options)
}

/// Detect the files reachable from `root` without assembling a bundle.
///
/// `traverse_order` holds file names, root first.
pub fn related_files(
    root: &DocumentNode,
    pool: &[DocumentNode],
    options: &BundleOptions,
) -> Result<Traversal<String, MissingRef>, BundleError> {
    let mut bundler = Bundler::new(root, pool, options);
    let traversal = bundler.discover(root)?;
    let mut missing = traversal.missing;
    missing.extend(bundler.dangling_pointers());
    Ok(Traversal {
        traverse_order: traversal
            .traverse_order
            .into_iter()
            .map(|n| n.file_name.clone())
            .collect(),
        missing: dedup_missing(missing),
    })
}

/// Location of the value being rewritten inside its file.
#[derive(Debug, Default)]
struct SitePath {
    path: Vec<String>,
    keys: Vec<String>,
}

enum Lookup {
    Found(String),
    Missing(MissingRef),
}

struct Bundler<'a> {
    options: &'a BundleOptions,
    root_name: String,
    pool: HashMap<&'a str, &'a DocumentNode>,
    /// Rewritten trees of visited files.
    documents: HashMap<String, Value>,
    directory: BTreeMap<String, RefEntry>,
    components: Map<String, Value>,
    /// Directory keys whose container entry exists or is being built.
    materialized: HashSet<String>,
    late_missing: Vec<MissingRef>,
}

impl<'a> Bundler<'a> {
    fn new(root: &'a DocumentNode, pool: &'a [DocumentNode], options: &'a BundleOptions) -> Self {
        let mut by_name: HashMap<&'a str, &'a DocumentNode> =
            pool.iter().map(|n| (n.file_name.as_str(), n)).collect();
        by_name.insert(root.file_name.as_str(), root);

        Self {
            options,
            root_name: root.file_name.clone(),
            pool: by_name,
            documents: HashMap::new(),
            directory: BTreeMap::new(),
            components: Map::new(),
            materialized: HashSet::new(),
            late_missing: Vec::new(),
        }
    }

    fn discover(
        &mut self,
        root: &'a DocumentNode,
    ) -> Result<Traversal<&'a DocumentNode, MissingRef>, BundleError> {
        traverse(root, |n| n.file_name.clone(), |n| self.expand(*n))
    }

    fn expand(
        &mut self,
        node: &'a DocumentNode,
    ) -> Result<Expansion<&'a DocumentNode, MissingRef>, BundleError> {
        debug!(file = %node.file_name, "visiting");
        let mut tree = parsed_content(node)?;
        let mut expansion = Expansion::default();
        self.rewrite_refs(node, &mut tree, &mut SitePath::default(), &mut expansion);
        self.documents.insert(node.file_name.clone(), tree);
        Ok(expansion)
    }

    /// `path` holds every segment down to the current value, array indices
    /// included; `keys` holds only the object keys and feeds the trace.
    fn rewrite_refs(
        &mut self,
        node: &'a DocumentNode,
        value: &mut Value,
        site: &mut SitePath,
        expansion: &mut Expansion<&'a DocumentNode, MissingRef>,
    ) {
        match value {
            Value::Object(map) => {
                let raw = map.get(REF_KEY).and_then(Value::as_str).map(str::to_string);
                if let Some(raw) = raw {
                    if let Some(resolved) = self.record_reference(node, &raw, map, site, expansion) {
                        map.insert(REF_KEY.to_string(), Value::String(resolved));
                    }
                }
                for (key, child) in map.iter_mut() {
                    if key == REF_KEY {
                        continue;
                    }
                    site.path.push(key.clone());
                    site.keys.push(key.clone());
                    self.rewrite_refs(node, child, site, expansion);
                    site.keys.pop();
                    site.path.pop();
                }
            }
            Value::Array(items) => {
                for (index, item) in items.iter_mut().enumerate() {
                    site.path.push(index.to_string());
                    self.rewrite_refs(node, item, site, expansion);
                    site.path.pop();
                }
            }
            _ => {}
        }
    }

    /// Record one reference and return its resolvable path, or `None` if the
    /// reference is not bundled (root-local, remote without a remote pool).
    fn record_reference(
        &mut self,
        node: &'a DocumentNode,
        raw: &str,
        ref_object: &Map<String, Value>,
        site: &SitePath,
        expansion: &mut Expansion<&'a DocumentNode, MissingRef>,
    ) -> Option<String> {
        let lookup = match classify_str(raw) {
            RefKind::Local if node.file_name == self.root_name => return None,
            RefKind::Local => Lookup::Found(node.file_name.clone()),
            RefKind::External => self.locate(&node.file_name, raw),
            RefKind::Remote if self.options.remote_pool => {
                let url = remove_local_suffix(raw);
                if self.pool.contains_key(url) {
                    Lookup::Found(url.to_string())
                } else {
                    Lookup::Missing(MissingRef::Path {
                        path: url.to_string(),
                    })
                }
            }
            _ => return None,
        };

        let local = local_suffix(raw).map(str::to_string);
        let (file, missing) = match lookup {
            Lookup::Found(file) => (file, None),
            Lookup::Missing(descriptor) => {
                let file = descriptor
                    .path()
                    .unwrap_or_else(|| remove_local_suffix(raw))
                    .to_string();
                (file, Some(descriptor))
            }
        };
        let resolved = match &local {
            Some(pointer) => format!("{}#{}", file, pointer),
            None => file.clone(),
        };

        let version = self.options.version;
        let local_pointer = local
            .as_deref()
            .map(|p| format!("#{}", p))
            .unwrap_or_default();
        let trace = resolve_trace(&site.keys, &file, &local_pointer, version);
        let reference = (!trace.is_empty()).then(|| container_pointer(&trace, version));

        match &missing {
            Some(descriptor) => {
                warn!(file = %node.file_name, reference = raw, "unresolved reference");
                expansion.missing.push(descriptor.clone());
            }
            None if file != node.file_name => {
                if let Some(target) = self.pool.get(file.as_str()) {
                    expansion.adjacent.push(*target);
                }
            }
            None => {}
        }

        self.directory
            .entry(resolved.clone())
            .or_insert_with(|| RefEntry {
                local,
                key_in_components: trace,
                node: Value::Object(ref_object.clone()),
                reference,
                trace_to_parent: site.path.clone(),
                parent_node_key: node.file_name.clone(),
                target_file: file,
                missing: missing.is_some(),
            });
        Some(resolved)
    }

    /// Find the pool entry an external reference points to.
    ///
    /// Exact name match first, then the path relative to `parent`.
    fn locate(&self, parent: &str, raw: &str) -> Lookup {
        let file_part = remove_local_suffix(raw);
        if self.pool.contains_key(file_part) {
            return Lookup::Found(file_part.to_string());
        }
        if let Some(path) = calculate_path(parent, file_part) {
            if self.pool.contains_key(path.as_str()) {
                return Lookup::Found(path);
            }
            let relative = path.trim_start_matches('/');
            if self.pool.contains_key(relative) {
                return Lookup::Found(relative.to_string());
            }
        }
        Lookup::Missing(missing_descriptor(parent, raw))
    }

    /// References whose file was found but whose pointer matches nothing in
    /// it.
    fn dangling_pointers(&self) -> Vec<MissingRef> {
        self.directory
            .iter()
            .filter(|(_, entry)| !entry.missing)
            .filter_map(|(key, entry)| {
                let local = entry.local.as_deref()?;
                let document = self.documents.get(&entry.target_file)?;
                if navigate_fragment(document, local).is_some() {
                    return None;
                }
                let raw = entry.node.get(REF_KEY).and_then(Value::as_str).unwrap_or(key.as_str());
                Some(MissingRef::Unreachable {
                    reference: raw.to_string(),
                })
            })
            .collect()
    }

    fn assemble(
        mut self,
        traversal: Traversal<&'a DocumentNode, MissingRef>,
    ) -> Result<BundleOutput, BundleError> {
        let mut file_content = self
            .documents
            .get(&self.root_name)
            .cloned()
            .unwrap_or(Value::Null);
        self.resolve_value(&mut file_content, &mut Vec::new());

        let mut missing = traversal.missing;
        missing.extend(self.dangling_pointers());
        missing.append(&mut self.late_missing);

        debug!(
            files = traversal.traverse_order.len(),
            promoted = self.materialized.len(),
            missing = missing.len(),
            "bundle assembled"
        );

        Ok(BundleOutput {
            file_content,
            components: self.components,
            traverse_order: traversal
                .traverse_order
                .into_iter()
                .map(|n| n.file_name.clone())
                .collect(),
            missing: dedup_missing(missing),
            references: self.directory,
        })
    }

    fn resolve_value(&mut self, value: &mut Value, inlining: &mut Vec<String>) {
        let key = match &*value {
            Value::Object(map) => map
                .get(REF_KEY)
                .and_then(Value::as_str)
                .filter(|r| self.directory.contains_key(*r))
                .map(str::to_string),
            _ => None,
        };

        match value {
            Value::Object(map) => {
                if let Some(key) = key {
                    map.remove(REF_KEY);
                    let siblings = std::mem::take(map);
                    *value = self.substitute(&key, siblings, inlining);
                    return;
                }
                for child in map.values_mut() {
                    self.resolve_value(child, inlining);
                }
            }
            Value::Array(items) => {
                for item in items {
                    self.resolve_value(item, inlining);
                }
            }
            _ => {}
        }
    }

    fn substitute(
        &mut self,
        key: &str,
        siblings: Map<String, Value>,
        inlining: &mut Vec<String>,
    ) -> Value {
        let Some(entry) = self.directory.get(key).cloned() else {
            return Value::Object(siblings);
        };
        let raw = entry
            .node
            .get(REF_KEY)
            .and_then(Value::as_str)
            .unwrap_or(key)
            .to_string();

        if entry.missing {
            return unresolved_placeholder(&raw);
        }

        // the root is the merged document, so its pointers stay valid
        if entry.target_file == self.root_name {
            if let Some(local) = &entry.local {
                return with_reference(format!("#{}", local), siblings);
            }
        }

        let content = self
            .documents
            .get(&entry.target_file)
            .and_then(|doc| navigate_fragment(doc, entry.local.as_deref().unwrap_or("")))
            .cloned();
        let Some(mut content) = content else {
            warn!(reference = %raw, "reference target not found");
            self.late_missing.push(MissingRef::Unreachable {
                reference: raw.clone(),
            });
            return unresolved_placeholder(&raw);
        };

        match entry.reference {
            None => {
                if inlining.iter().any(|k| k == key) {
                    warn!(reference = %raw, "circular reference left as placeholder");
                    return json!({
                        "description": format!("Circular reference: {}", raw),
                        CIRCULAR_KEY: raw,
                    });
                }
                inlining.push(key.to_string());
                self.resolve_value(&mut content, inlining);
                inlining.pop();
                merge_siblings(content, siblings)
            }
            Some(pointer) => {
                if self.materialized.insert(key.to_string()) {
                    debug!(reference = %raw, to = %pointer, "promoting");
                    self.resolve_value(&mut content, inlining);
                    set_at_trace(&mut self.components, &entry.key_in_components, content);
                }
                with_reference(pointer, siblings)
            }
        }
    }
}

fn unresolved_placeholder(reference: &str) -> Value {
    json!({
        "description": format!("Unresolved reference: {}", reference),
        UNRESOLVED_KEY: reference,
    })
}

fn with_reference(pointer: String, siblings: Map<String, Value>) -> Value {
    let mut map = Map::with_capacity(siblings.len() + 1);
    map.insert(REF_KEY.to_string(), Value::String(pointer));
    map.extend(siblings);
    Value::Object(map)
}

/// Keys written next to a `$ref` override the referenced content.
fn merge_siblings(content: Value, siblings: Map<String, Value>) -> Value {
    match content {
        Value::Object(mut map) => {
            map.extend(siblings);
            Value::Object(map)
        }
        other => other,
    }
}

fn set_at_trace(container: &mut Map<String, Value>, trace: &[String], value: Value) {
    let Some((last, parents)) = trace.split_last() else {
        return;
    };
    let mut current = container;
    for key in parents {
        let slot = current
            .entry(key.clone())
            .or_insert_with(|| Value::Object(Map::new()));
        if !slot.is_object() {
            *slot = Value::Object(Map::new());
        }
        current = match slot.as_object_mut() {
            Some(map) => map,
            None => return,
        };
    }
    current.insert(last.clone(), value);
}

/// Copy entries of `source` into `target` where `target` has none, recursing
/// into objects present on both sides.
fn merge_missing(target: &mut Map<String, Value>, source: Map<String, Value>) {
    for (key, value) in source {
        match (target.get_mut(&key), value) {
            (Some(Value::Object(existing)), Value::Object(incoming)) => {
                merge_missing(existing, incoming)
            }
            (Some(_), _) => {}
            (None, value) => {
                target.insert(key, value);
            }
        }
    }
}
