//! API Description Bundler
//!
//! Resolves the `$ref` graph of a multi-file OpenAPI 3.x or Swagger 2.0
//! collection into one self-contained document, and validates payloads
//! against the result.
//!
//! # Example
//!
//! ```
//! use api_bundler::{bundle, BundleOptions, DocumentNode, SpecVersion};
//!
//! let root = DocumentNode::new(
//!     "openapi.yaml",
//!     r#"
//! openapi: 3.0.0
//! paths:
//!   /pets:
//!     get:
//!       responses:
//!         '200':
//!           description: ok
//!           content:
//!             application/json:
//!               schema:
//!                 $ref: schemas/pet.yaml
//! "#,
//! );
//! let pool = vec![DocumentNode::new("schemas/pet.yaml", "type: object\n")];
//!
//! let output = bundle(&root, &pool, &BundleOptions::new(SpecVersion::Current)).unwrap();
//! assert!(output.missing.is_empty());
//!
//! let document = output.into_document(SpecVersion::Current);
//! assert_eq!(
//!     document["components"]["schemas"]["schemas/pet.yaml"]["type"],
//!     "object"
//! );
//! ```
//!
//! # Reference kinds
//!
//! | `$ref` value | Kind | Bundling |
//! |--------------|------|----------|
//! | `#/components/schemas/Pet` | local | kept in the root, resolved against the owning file elsewhere |
//! | `schemas/pet.yaml#/Pet` | external | promoted into the container or inlined |
//! | `https://example.com/pet.yaml` | remote | fetched by `resolve_remote_refs`, then bundled like external |
//!
//! # Placement
//!
//! A referenced node is promoted into the shared container when a container
//! key (`schemas`, `responses`, ... or `definitions`, ... for Swagger 2.0) is
//! found walking outward from the reference site. Schema keywords (`items`,
//! `allOf`, `schema`, ...) count as the schema bucket. Everything else is
//! inlined.

mod bundle;
mod dfs;
mod error;
mod loader;
mod pointer;
mod remote;
mod trace;
mod types;
mod validator;

pub use bundle::{
    bundle, bundle_collection, related_files, BundleOutput, RefEntry, CIRCULAR_KEY,
    UNRESOLVED_KEY,
};
pub use dfs::{canonical_json, dedup_missing, traverse, traverse_async, Expansion, Traversal};
pub use error::{BundleError, FetchError, SchemaError, ValidateError};
pub use loader::{
    collection_name, load_collection, load_document, parse_document, parsed_content,
    DOCUMENT_EXTENSIONS,
};
pub use pointer::{
    calculate_path, classify, classify_str, decode_pointer_segment, encode_pointer_segment,
    is_external_ref, is_local_ref, is_remote_ref, is_url, local_suffix, missing_descriptor,
    navigate_fragment, remove_local_suffix, to_pointer, RefKind, REF_KEY,
};
pub use remote::{
    resolve_pool_remote_refs, resolve_remote_refs, RefFetcher, RemotePath, RemoteRefs,
    StaticFetcher,
};
pub use trace::{container_pointer, resolve_trace, Vocabulary, COMPONENTS_KEY, SCHEMA_ALIASES};
pub use types::{BundleOptions, DocumentNode, MissingRef, SpecVersion};
pub use validator::{schema_pointer, validate_against_schema, validate_payload, ValidationTarget};

#[cfg(feature = "remote")]
pub use remote::{resolve_remote_refs_http, HttpFetcher};
