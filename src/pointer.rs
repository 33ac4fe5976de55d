//! Reference classification and JSON Pointer helpers.
//!
//! Every string `$ref` falls into exactly one [`RefKind`]: local (`#...`),
//! remote (an absolute URL with a host) or external (a path inside the
//! collection, optionally followed by `#<pointer>`).

use serde_json::{Map, Value};
use url::Url;

use crate::types::MissingRef;

/// The reference keyword.
pub const REF_KEY: &str = "$ref";

const LOCAL_POINTER: char = '#';

/// Category of a `$ref` value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RefKind {
    /// Points within the same merged document.
    Local,
    /// Points to another file of the collection.
    External,
    /// Points to a document fetched over the network.
    Remote,
    /// Not a string, or an empty string.
    NotAReference,
}

/// Classify a `$ref` value.
pub fn classify(value: &Value) -> RefKind {
    match value.as_str() {
        Some(s) if !s.is_empty() => classify_str(s),
        _ => RefKind::NotAReference,
    }
}

/// Classify a non-empty reference string.
pub fn classify_str(reference: &str) -> RefKind {
    if reference.is_empty() {
        RefKind::NotAReference
    } else if reference.starts_with(LOCAL_POINTER) {
        RefKind::Local
    } else if is_url(reference) {
        RefKind::Remote
    } else {
        RefKind::External
    }
}

fn kind_of(node: &Map<String, Value>, key: &str) -> RefKind {
    if key != REF_KEY {
        return RefKind::NotAReference;
    }
    node.get(key).map_or(RefKind::NotAReference, classify)
}

/// True iff `node[key]` is a `$ref` string starting with `#`.
pub fn is_local_ref(node: &Map<String, Value>, key: &str) -> bool {
    kind_of(node, key) == RefKind::Local
}

/// True iff `node[key]` is a `$ref` string that is neither local nor a URL.
pub fn is_external_ref(node: &Map<String, Value>, key: &str) -> bool {
    kind_of(node, key) == RefKind::External
}

/// True iff `node[key]` is a `$ref` string holding an absolute URL.
pub fn is_remote_ref(node: &Map<String, Value>, key: &str) -> bool {
    kind_of(node, key) == RefKind::Remote
}

/// Check whether a string is an absolute URL with a host.
///
/// Strict parsing first; scheme-relative references (`//host/path`) are
/// accepted by the lenient fallback.
pub fn is_url(s: &str) -> bool {
    match Url::parse(s) {
        Ok(url) => url.host().is_some(),
        Err(_) => s
            .strip_prefix("//")
            .and_then(|rest| Url::parse(&format!("http://{}", rest)).ok())
            .is_some_and(|url| url.host().is_some()),
    }
}

/// Escape a string for use as one JSON Pointer segment, then percent-encode it.
pub fn encode_pointer_segment(text: &str) -> String {
    let escaped = text.replace('~', "~0").replace('/', "~1");
    urlencoding::encode(&escaped).into_owned()
}

/// Inverse of [`encode_pointer_segment`].
pub fn decode_pointer_segment(text: &str) -> String {
    let unescaped = text.replace("~1", "/").replace("~0", "~");
    match urlencoding::decode(&unescaped) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => unescaped,
    }
}

/// The part of a reference before its first `#`.
pub fn remove_local_suffix(reference: &str) -> &str {
    match reference.find(LOCAL_POINTER) {
        Some(idx) => &reference[..idx],
        None => reference,
    }
}

/// The part of a reference after its first `#`, if any.
pub fn local_suffix(reference: &str) -> Option<&str> {
    reference
        .find(LOCAL_POINTER)
        .map(|idx| &reference[idx + 1..])
}

/// Build a local reference (`#/a/b`) from raw segments.
pub fn to_pointer<S: AsRef<str>>(segments: &[S]) -> String {
    let mut pointer = String::from("#");
    for segment in segments {
        pointer.push('/');
        pointer.push_str(&encode_pointer_segment(segment.as_ref()));
    }
    pointer
}

/// Resolve `reference` against the directory of `parent_file`.
///
/// Paths use `/` separators. An absolute reference is only normalized.
/// Returns `None` if the result would climb above the collection root.
///
/// When `parent_file` is a URL the reference is joined onto it instead, so
/// `b.yaml` next to `https://example.com/specs/a.yaml` becomes
/// `https://example.com/specs/b.yaml`.
pub fn calculate_path(parent_file: &str, reference: &str) -> Option<String> {
    if let Some(base) = Url::parse(parent_file).ok().filter(|u| u.host().is_some()) {
        return base.join(reference).ok().map(String::from);
    }

    let absolute = reference.starts_with('/') || (parent_file.starts_with('/') && !reference.is_empty());
    let mut segments: Vec<&str> = Vec::new();

    if !reference.starts_with('/') {
        segments.extend(
            parent_file
                .split('/')
                .filter(|s| !s.is_empty() && *s != "."),
        );
        // drop the file name itself
        segments.pop();
    }

    for segment in reference.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop()?;
            }
            other => segments.push(other),
        }
    }

    let joined = segments.join("/");
    Some(if absolute { format!("/{}", joined) } else { joined })
}

/// Describe a reference that could not be located.
///
/// Yields `MissingRef::Unreachable` when the reference climbs above the
/// collection root, otherwise the calculated path.
pub fn missing_descriptor(parent_file: &str, reference: &str) -> MissingRef {
    match calculate_path(parent_file, remove_local_suffix(reference)) {
        Some(path) => MissingRef::Path { path },
        None => MissingRef::Unreachable {
            reference: reference.to_string(),
        },
    }
}

/// Navigate a JSON Pointer fragment (`#/a/b`, `/a/b` or `a/b`).
///
/// Segments are decoded with [`decode_pointer_segment`]; array segments must
/// be indices.
pub fn navigate_fragment<'a>(value: &'a Value, fragment: &str) -> Option<&'a Value> {
    let path = fragment.trim_start_matches(LOCAL_POINTER);
    let path = path.strip_prefix('/').unwrap_or(path);
    if path.is_empty() {
        return Some(value);
    }

    let mut current = value;
    for part in path.split('/') {
        let key = decode_pointer_segment(part);
        current = match current {
            Value::Object(map) => map.get(&key)?,
            Value::Array(items) => items.get(key.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn classify_local() {
        assert_eq!(classify(&json!("#/components/schemas/Pet")), RefKind::Local);
        assert_eq!(classify(&json!("#")), RefKind::Local);
    }

    #[test]
    fn classify_external() {
        assert_eq!(classify(&json!("pet.yaml")), RefKind::External);
        assert_eq!(classify(&json!("../common/error.yaml#/Error")), RefKind::External);
        assert_eq!(classify(&json!("/abs/schema.json")), RefKind::External);
        assert_eq!(classify(&json!("C:/specs/pet.yaml")), RefKind::External);
    }

    #[test]
    fn classify_remote() {
        assert_eq!(
            classify(&json!("https://example.com/pet.yaml#/Pet")),
            RefKind::Remote
        );
        assert_eq!(classify(&json!("http://localhost:8080/a.json")), RefKind::Remote);
        assert_eq!(classify(&json!("//cdn.example.com/a.json")), RefKind::Remote);
    }

    #[test]
    fn classify_not_a_reference() {
        assert_eq!(classify(&json!("")), RefKind::NotAReference);
        assert_eq!(classify(&json!(42)), RefKind::NotAReference);
        assert_eq!(classify(&json!({"$ref": "a"})), RefKind::NotAReference);
    }

    #[test]
    fn predicates_partition_refs() {
        let samples = [
            "#/definitions/Pet",
            "pet.yaml",
            "sf/pet.yaml#/Pet",
            "https://example.com/pet.yaml",
            "file:///tmp/pet.yaml",
        ];
        for sample in samples {
            let node = obj(json!({ "$ref": sample }));
            let hits = [
                is_local_ref(&node, "$ref"),
                is_external_ref(&node, "$ref"),
                is_remote_ref(&node, "$ref"),
            ]
            .iter()
            .filter(|b| **b)
            .count();
            assert_eq!(hits, 1, "{} matched {} categories", sample, hits);
        }
    }

    #[test]
    fn predicates_require_ref_key() {
        let node = obj(json!({ "description": "#/not/a/ref" }));
        assert!(!is_local_ref(&node, "description"));
    }

    #[test]
    fn encode_escapes_pointer_characters() {
        assert_eq!(encode_pointer_segment("folder/pet.yaml"), "folder~1pet.yaml");
        assert_eq!(encode_pointer_segment("a~b"), "a~0b");
        assert_eq!(encode_pointer_segment("pet.yaml#/Pet"), "pet.yaml%23~1Pet");
    }

    #[test]
    fn decode_inverts_encode() {
        for s in [
            "folder/pet.yaml",
            "a~b",
            "~1",
            "a~01b",
            "spaces and ü",
            "100%/done",
            "",
        ] {
            assert_eq!(decode_pointer_segment(&encode_pointer_segment(s)), s);
        }
    }

    #[test]
    fn local_suffix_split() {
        assert_eq!(remove_local_suffix("pet.yaml#/Pet"), "pet.yaml");
        assert_eq!(remove_local_suffix("pet.yaml"), "pet.yaml");
        assert_eq!(remove_local_suffix("#/Pet"), "");
        assert_eq!(local_suffix("pet.yaml#/Pet"), Some("/Pet"));
        assert_eq!(local_suffix("pet.yaml"), None);
    }

    #[test]
    fn pointer_from_segments() {
        assert_eq!(
            to_pointer(&["components", "schemas", "sf/pet.yaml"]),
            "#/components/schemas/sf~1pet.yaml"
        );
        let empty: [&str; 0] = [];
        assert_eq!(to_pointer(&empty), "#");
    }

    #[test]
    fn calculate_path_climbs_one_level() {
        assert_eq!(
            calculate_path("sf/newpet.yaml", "../error.yaml").as_deref(),
            Some("error.yaml")
        );
        assert_eq!(
            calculate_path("sf/spec/newpet.yaml", "../common/error.yaml").as_deref(),
            Some("sf/common/error.yaml")
        );
    }

    #[test]
    fn calculate_path_sibling_and_dot() {
        assert_eq!(
            calculate_path("sf/newpet.yaml", "./pet.yaml").as_deref(),
            Some("sf/pet.yaml")
        );
        assert_eq!(
            calculate_path("root.yaml", "schemas/pet.yaml").as_deref(),
            Some("schemas/pet.yaml")
        );
    }

    #[test]
    fn calculate_path_absolute() {
        assert_eq!(
            calculate_path("sf/newpet.yaml", "/common/error.yaml").as_deref(),
            Some("/common/error.yaml")
        );
        assert_eq!(
            calculate_path("/specs/root.yaml", "pet.yaml").as_deref(),
            Some("/specs/pet.yaml")
        );
    }

    #[test]
    fn calculate_path_against_url_parent() {
        assert_eq!(
            calculate_path("https://example.com/specs/a.yaml", "b.yaml").as_deref(),
            Some("https://example.com/specs/b.yaml")
        );
        assert_eq!(
            calculate_path("https://example.com/specs/v1/a.yaml", "../common/error.yaml").as_deref(),
            Some("https://example.com/specs/common/error.yaml")
        );
        assert_eq!(
            missing_descriptor("https://example.com/specs/a.yaml", "gone.yaml#/X"),
            MissingRef::Path {
                path: "https://example.com/specs/gone.yaml".into()
            }
        );
    }

    #[test]
    fn calculate_path_above_root() {
        assert_eq!(calculate_path("newpet.yaml", "../error.yaml"), None);
        assert_eq!(calculate_path("sf/newpet.yaml", "../../error.yaml"), None);
    }

    #[test]
    fn missing_descriptor_above_root() {
        assert_eq!(
            missing_descriptor("sf/newpet.yaml", "../../error.yaml#/Error"),
            MissingRef::Unreachable {
                reference: "../../error.yaml#/Error".into()
            }
        );
        assert_eq!(
            missing_descriptor("sf/newpet.yaml", "error.yaml"),
            MissingRef::Path {
                path: "sf/error.yaml".into()
            }
        );
    }

    #[test]
    fn navigate_fragment_objects_and_arrays() {
        let doc = json!({
            "definitions": {
                "a/b": { "type": "string" },
                "list": [ { "type": "integer" } ]
            }
        });
        assert_eq!(
            navigate_fragment(&doc, "#/definitions/a~1b"),
            Some(&json!({"type": "string"}))
        );
        assert_eq!(
            navigate_fragment(&doc, "/definitions/list/0"),
            Some(&json!({"type": "integer"}))
        );
        assert_eq!(navigate_fragment(&doc, "#"), Some(&doc));
        assert_eq!(navigate_fragment(&doc, "#/definitions/missing"), None);
        assert_eq!(navigate_fragment(&doc, "#/definitions/list/x"), None);
    }
}
