//! Payload validation against bundled documents.
//!
//! Targets are located inside the bundled document; the document's root
//! entries travel with the target schema so that local references
//! (`#/components/...`, `#/definitions/...`) keep resolving.

use serde_json::{Map, Value};

use crate::error::{SchemaError, ValidateError};
use crate::pointer::{classify, encode_pointer_segment, navigate_fragment, RefKind, REF_KEY};
use crate::types::SpecVersion;

/// What part of a document a payload is checked against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationTarget {
    /// Any schema, by local reference (`#/components/schemas/Pet`).
    Pointer(String),
    /// JSON request body of an operation.
    RequestBody { path: String, method: String },
    /// JSON response body of an operation, falling back to `default`.
    Response {
        path: String,
        method: String,
        status: String,
    },
}

impl std::fmt::Display for ValidationTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationTarget::Pointer(pointer) => write!(f, "{}", pointer),
            ValidationTarget::RequestBody { path, method } => {
                write!(f, "{} {} request body", method.to_uppercase(), path)
            }
            ValidationTarget::Response {
                path,
                method,
                status,
            } => write!(f, "{} {} response {}", method.to_uppercase(), path, status),
        }
    }
}

/// Validate `payload` against the schema `target` designates in `document`.
///
/// # Errors
///
/// Returns `ValidateError::SchemaNotFound` if the target has no schema,
/// `ValidateError::InvalidSchema` if the schema does not compile, or
/// `ValidateError::Invalid` if the payload doesn't match.
pub fn validate_payload(
    document: &Value,
    target: &ValidationTarget,
    payload: &Value,
) -> Result<(), ValidateError> {
    let pointer = schema_pointer(document, target).ok_or_else(|| ValidateError::SchemaNotFound {
        target: target.to_string(),
    })?;

    let target_schema = navigate_fragment(document, &pointer).ok_or_else(|| {
        ValidateError::SchemaNotFound {
            target: target.to_string(),
        }
    })?;
    validate_against_schema(&with_document_root(target_schema, document), payload)
}

/// Place the document's root entries next to the schema so that local
/// references like `#/components/schemas/Pet` resolve.
fn with_document_root(schema: &Value, document: &Value) -> Value {
    match (schema, document) {
        (Value::Object(schema), Value::Object(root)) => {
            let mut merged: Map<String, Value> = schema.clone();
            for (key, value) in root {
                if !merged.contains_key(key) {
                    merged.insert(key.clone(), value.clone());
                }
            }
            Value::Object(merged)
        }
        _ => schema.clone(),
    }
}

/// Validate a payload against a standalone schema.
pub fn validate_against_schema(schema: &Value, payload: &Value) -> Result<(), ValidateError> {
    let validator = jsonschema::validator_for(schema).map_err(|e| ValidateError::InvalidSchema {
        message: e.to_string(),
    })?;

    let errors: Vec<SchemaError> = validator
        .iter_errors(payload)
        .map(|e| SchemaError {
            path: e.instance_path.to_string(),
            message: e.to_string(),
        })
        .collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ValidateError::Invalid { errors })
    }
}

/// Local reference of the schema designated by `target`, following
/// intermediate local references (`requestBody: {$ref: ...}`).
pub fn schema_pointer(document: &Value, target: &ValidationTarget) -> Option<String> {
    let version = SpecVersion::detect(document).unwrap_or_default();
    let mut cursor = Cursor::new(document);

    match target {
        ValidationTarget::Pointer(pointer) => {
            navigate_fragment(document, pointer)?;
            return Some(pointer.clone());
        }
        ValidationTarget::RequestBody { path, method } => {
            cursor.step("paths")?.step(path)?.step(&method.to_lowercase())?;
            match version {
                SpecVersion::Current => {
                    cursor.step("requestBody")?.step("content")?;
                    let media = json_media_type(cursor.value())?;
                    cursor.step(&media)?.step("schema")?;
                }
                SpecVersion::Legacy => {
                    cursor.step("parameters")?;
                    let index = cursor
                        .value()
                        .as_array()?
                        .iter()
                        .position(|p| p.get("in").and_then(Value::as_str) == Some("body"))?;
                    cursor.step(&index.to_string())?.step("schema")?;
                }
            }
        }
        ValidationTarget::Response {
            path,
            method,
            status,
        } => {
            cursor.step("paths")?.step(path)?.step(&method.to_lowercase())?.step("responses")?;
            let key = if cursor.value().get(status.as_str()).is_some() {
                status.as_str()
            } else {
                "default"
            };
            cursor.step(key)?;
            if version == SpecVersion::Current {
                cursor.step("content")?;
                let media = json_media_type(cursor.value())?;
                cursor.step(&media)?;
            }
            cursor.step("schema")?;
        }
    }

    Some(cursor.pointer)
}

/// `application/json`, else the first JSON-ish media type, else the first.
fn json_media_type(content: &Value) -> Option<String> {
    let map = content.as_object()?;
    if map.contains_key("application/json") {
        return Some("application/json".to_string());
    }
    map.keys()
        .find(|k| k.contains("json"))
        .or_else(|| map.keys().next())
        .cloned()
}

/// Walks a document by keys while tracking the equivalent local reference.
struct Cursor<'a> {
    document: &'a Value,
    current: &'a Value,
    pointer: String,
}

impl<'a> Cursor<'a> {
    fn new(document: &'a Value) -> Self {
        Self {
            document,
            current: document,
            pointer: "#".to_string(),
        }
    }

    fn value(&self) -> &'a Value {
        self.current
    }

    /// Follow local references at the current position, then descend.
    fn step(&mut self, key: &str) -> Option<&mut Self> {
        let mut hops = 0;
        while let Some(reference) = self.current.get(REF_KEY) {
            if classify(reference) != RefKind::Local || hops > 32 {
                break;
            }
            let target = reference.as_str()?;
            self.current = navigate_fragment(self.document, target)?;
            self.pointer = target.to_string();
            hops += 1;
        }

        self.current = match self.current {
            Value::Object(map) => map.get(key)?,
            Value::Array(items) => items.get(key.parse::<usize>().ok()?)?,
            _ => return None,
        };
        self.pointer.push('/');
        self.pointer.push_str(&encode_pointer_segment(key));
        Some(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn petstore() -> Value {
        json!({
            "openapi": "3.0.3",
            "paths": {
                "/pets": {
                    "post": {
                        "requestBody": { "$ref": "#/components/requestBodies/NewPet" },
                        "responses": {
                            "201": {
                                "description": "created",
                                "content": { "application/json": { "schema": { "$ref": "#/components/schemas/Pet" } } }
                            },
                            "default": {
                                "description": "error",
                                "content": { "application/problem+json": { "schema": { "type": "object", "required": ["title"] } } }
                            }
                        }
                    }
                }
            },
            "components": {
                "requestBodies": {
                    "NewPet": {
                        "content": { "application/json": { "schema": { "$ref": "#/components/schemas/Pet" } } }
                    }
                },
                "schemas": {
                    "Pet": {
                        "type": "object",
                        "required": ["name"],
                        "properties": {
                            "name": { "type": "string" },
                            "tag": { "$ref": "#/components/schemas/Tag" }
                        }
                    },
                    "Tag": { "type": "string" }
                }
            }
        })
    }

    #[test]
    fn validate_valid_payload_by_pointer() {
        let target = ValidationTarget::Pointer("#/components/schemas/Pet".into());
        let result = validate_payload(&petstore(), &target, &json!({"name": "rex", "tag": "dog"}));
        assert!(result.is_ok());
    }

    #[test]
    fn validate_follows_nested_refs() {
        let target = ValidationTarget::Pointer("#/components/schemas/Pet".into());
        let result = validate_payload(&petstore(), &target, &json!({"name": "rex", "tag": 7}));
        match result {
            Err(ValidateError::Invalid { errors }) => {
                assert_eq!(errors.len(), 1);
                assert_eq!(errors[0].path, "/tag");
            }
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn request_body_pointer_follows_ref() {
        let target = ValidationTarget::RequestBody {
            path: "/pets".into(),
            method: "POST".into(),
        };
        assert_eq!(
            schema_pointer(&petstore(), &target).as_deref(),
            Some("#/components/requestBodies/NewPet/content/application~1json/schema")
        );
        let result = validate_payload(&petstore(), &target, &json!({}));
        assert!(matches!(result, Err(ValidateError::Invalid { .. })));
    }

    #[test]
    fn response_falls_back_to_default() {
        let target = ValidationTarget::Response {
            path: "/pets".into(),
            method: "post".into(),
            status: "500".into(),
        };
        assert_eq!(
            schema_pointer(&petstore(), &target).as_deref(),
            Some("#/paths/~1pets/post/responses/default/content/application~1problem%2Bjson/schema")
        );
        assert!(validate_payload(&petstore(), &target, &json!({"title": "boom"})).is_ok());
    }

    #[test]
    fn legacy_body_parameter() {
        let document = json!({
            "swagger": "2.0",
            "paths": { "/pets": { "post": {
                "parameters": [
                    { "name": "limit", "in": "query", "type": "integer" },
                    { "name": "body", "in": "body", "schema": { "$ref": "#/definitions/Pet" } }
                ],
                "responses": { "200": { "description": "ok", "schema": { "$ref": "#/definitions/Pet" } } }
            } } },
            "definitions": { "Pet": { "type": "object", "required": ["name"] } }
        });
        let request = ValidationTarget::RequestBody {
            path: "/pets".into(),
            method: "post".into(),
        };
        assert_eq!(
            schema_pointer(&document, &request).as_deref(),
            Some("#/paths/~1pets/post/parameters/1/schema")
        );
        assert!(validate_payload(&document, &request, &json!({"name": "rex"})).is_ok());

        let response = ValidationTarget::Response {
            path: "/pets".into(),
            method: "post".into(),
            status: "200".into(),
        };
        assert!(matches!(
            validate_payload(&document, &response, &json!({})),
            Err(ValidateError::Invalid { .. })
        ));
    }

    #[test]
    fn unknown_target_is_reported() {
        let target = ValidationTarget::RequestBody {
            path: "/owners".into(),
            method: "post".into(),
        };
        let result = validate_payload(&petstore(), &target, &json!({}));
        assert!(matches!(result, Err(ValidateError::SchemaNotFound { .. })));
    }

    #[test]
    fn standalone_schema() {
        let schema = json!({"type": "object", "properties": {"id": {"type": "string"}}});
        assert!(validate_against_schema(&schema, &json!({"id": "a"})).is_ok());
        assert!(validate_against_schema(&schema, &json!({"id": 1})).is_err());
    }
}
