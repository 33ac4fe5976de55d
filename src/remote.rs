//! Resolution of remote (`http(s)://`) references.
//!
//! The traversal mirrors local bundling but expands nodes asynchronously: all
//! remote references of one document are fetched concurrently, and the next
//! document is only visited once that fan-out completes. Fetch failures are
//! never fatal; they end up in `missing_remote_refs`.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use futures::future::join_all;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::dfs::{dedup_missing, traverse_async, Expansion};
use crate::error::{BundleError, FetchError};
use crate::loader::parsed_content;
use crate::pointer::{calculate_path, classify_str, is_url, remove_local_suffix, RefKind, REF_KEY};
use crate::types::{DocumentNode, MissingRef};

#[cfg(feature = "remote")]
use std::borrow::Cow;
#[cfg(feature = "remote")]
use std::time::Duration;

/// Default timeout for HTTP requests (10 seconds).
#[cfg(feature = "remote")]
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Source of remote documents.
///
/// Implement this to run offline, in tests, or over a custom transport.
#[async_trait]
pub trait RefFetcher: Send + Sync {
    /// Return the raw text of the document at `url`.
    async fn fetch(&self, url: &str) -> Result<String, FetchError>;
}

/// Fetcher issuing plain HTTP GET requests.
///
/// Requires the `remote` feature (enabled by default).
#[cfg(feature = "remote")]
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

#[cfg(feature = "remote")]
impl HttpFetcher {
    /// # Errors
    ///
    /// Returns `FetchError::Transport` if the HTTP client cannot be built.
    pub fn new() -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| FetchError::Transport {
                url: String::new(),
                message: e.to_string(),
            })?;
        Ok(Self { client })
    }
}

#[cfg(feature = "remote")]
#[async_trait]
impl RefFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        let response = self
            .client
            .get(with_default_scheme(url).as_ref())
            .send()
            .await
            .map_err(|e| FetchError::Transport {
                url: url.to_string(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        response.text().await.map_err(|e| FetchError::Transport {
            url: url.to_string(),
            message: e.to_string(),
        })
    }
}

/// Scheme-relative references (`//host/path`) are fetched over https.
#[cfg(feature = "remote")]
fn with_default_scheme(url: &str) -> Cow<'_, str> {
    if url.starts_with("//") {
        Cow::Owned(format!("https:{}", url))
    } else {
        Cow::Borrowed(url)
    }
}

/// Fetcher serving documents from memory.
#[derive(Debug, Clone, Default)]
pub struct StaticFetcher {
    documents: HashMap<String, String>,
}

impl StaticFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `content` under `url`.
    pub fn with(mut self, url: impl Into<String>, content: impl Into<String>) -> Self {
        self.documents.insert(url.into(), content.into());
        self
    }
}

#[async_trait]
impl RefFetcher for StaticFetcher {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        self.documents
            .get(url)
            .cloned()
            .ok_or_else(|| FetchError::NotFound {
                url: url.to_string(),
            })
    }
}

/// A fetched remote document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemotePath {
    pub path: String,
}

/// Result of [`resolve_remote_refs`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteRefs {
    /// Fetched documents in visitation order, root excluded.
    pub remote_refs: Vec<RemotePath>,
    /// URLs that could not be fetched.
    pub missing_remote_refs: Vec<MissingRef>,
    /// Fetched documents, named by URL, ready to join a bundling pool.
    #[serde(skip)]
    pub documents: Vec<DocumentNode>,
}

enum Fetched {
    Found(DocumentNode),
    NotFound(String),
}

async fn fetch_one<F: RefFetcher + ?Sized>(fetcher: &F, url: &str) -> Fetched {
    match fetcher.fetch(url).await {
        Ok(content) => Fetched::Found(DocumentNode::new(url, content)),
        Err(e) => {
            warn!(error = %e, "remote reference not fetched");
            Fetched::NotFound(url.to_string())
        }
    }
}

/// Follow the remote references reachable from `root`.
///
/// # Errors
///
/// Returns `BundleError::Parse` if the root or a fetched document cannot be
/// parsed. Fetch failures are reported in `missing_remote_refs`.
pub async fn resolve_remote_refs<F: RefFetcher + ?Sized>(
    root: &DocumentNode,
    fetcher: &F,
) -> Result<RemoteRefs, BundleError> {
    let traversal = traverse_async(
        root.clone(),
        |n: &DocumentNode| n.file_name.clone(),
        |node: DocumentNode| async move {
            let tree = parsed_content(&node)?;
            let urls = remote_urls(&tree, &node.file_name);
            debug!(file = %node.file_name, refs = urls.len(), "fetching remote references");

            let mut expansion = Expansion::default();
            for outcome in join_all(urls.iter().map(|url| fetch_one(fetcher, url))).await {
                match outcome {
                    Fetched::Found(document) => expansion.adjacent.push(document),
                    Fetched::NotFound(path) => expansion.missing.push(MissingRef::Path { path }),
                }
            }
            Ok::<_, BundleError>(expansion)
        },
    )
    .await?;

    let documents: Vec<DocumentNode> = traversal.traverse_order.into_iter().skip(1).collect();
    Ok(RemoteRefs {
        remote_refs: documents
            .iter()
            .map(|d| RemotePath {
                path: d.file_name.clone(),
            })
            .collect(),
        missing_remote_refs: traversal.missing,
        documents,
    })
}

/// Follow the remote references reachable from `root` over HTTP.
///
/// # Errors
///
/// Returns `BundleError::Fetch` if the HTTP client cannot be built, otherwise
/// as [`resolve_remote_refs`].
#[cfg(feature = "remote")]
pub async fn resolve_remote_refs_http(root: &DocumentNode) -> Result<RemoteRefs, BundleError> {
    let fetcher = HttpFetcher::new()?;
    resolve_remote_refs(root, &fetcher).await
}

/// Follow the remote references of every document in `pool`.
///
/// Results are merged; each URL appears once.
pub async fn resolve_pool_remote_refs<F: RefFetcher + ?Sized>(
    pool: &[DocumentNode],
    fetcher: &F,
) -> Result<RemoteRefs, BundleError> {
    let mut seen = HashSet::new();
    let mut merged = RemoteRefs {
        remote_refs: Vec::new(),
        missing_remote_refs: Vec::new(),
        documents: Vec::new(),
    };

    for node in pool {
        let found = resolve_remote_refs(node, fetcher).await?;
        merged.missing_remote_refs.extend(found.missing_remote_refs);
        for document in found.documents {
            if seen.insert(document.file_name.clone()) {
                merged.remote_refs.push(RemotePath {
                    path: document.file_name.clone(),
                });
                merged.documents.push(document);
            }
        }
    }
    merged.missing_remote_refs = dedup_missing(merged.missing_remote_refs);
    Ok(merged)
}

/// Distinct remote document URLs referenced in `tree`, fragment stripped, in
/// document order.
///
/// When `base` is itself a URL, relative references are joined onto it and
/// followed too.
fn remote_urls(tree: &Value, base: &str) -> Vec<String> {
    let mut urls = Vec::new();
    let mut seen = HashSet::new();
    let base = is_url(base).then_some(base);
    collect_remote_urls(tree, base, &mut urls, &mut seen);
    urls
}

fn collect_remote_urls(
    value: &Value,
    base: Option<&str>,
    urls: &mut Vec<String>,
    seen: &mut HashSet<String>,
) {
    match value {
        Value::Object(map) => {
            if let Some(reference) = map.get(REF_KEY).and_then(Value::as_str) {
                let url = match (classify_str(reference), base) {
                    (RefKind::Remote, _) => Some(remove_local_suffix(reference).to_string()),
                    (RefKind::External, Some(base)) => {
                        calculate_path(base, remove_local_suffix(reference))
                    }
                    _ => None,
                };
                if let Some(url) = url {
                    if seen.insert(url.clone()) {
                        urls.push(url);
                    }
                }
            }
            for child in map.values() {
                collect_remote_urls(child, base, urls, seen);
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_remote_urls(item, base, urls, seen);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;
    use serde_json::json;

    #[test]
    fn remote_urls_deduplicated_without_fragment() {
        let tree = json!({
            "a": { "$ref": "https://example.com/pet.yaml#/Pet" },
            "b": [ { "$ref": "https://example.com/pet.yaml#/Tag" } ],
            "c": { "$ref": "local.yaml" },
            "d": { "$ref": "#/components/schemas/X" },
            "e": { "$ref": "https://example.com/error.yaml" }
        });
        assert_eq!(
            remote_urls(&tree, "root.yaml"),
            vec!["https://example.com/pet.yaml", "https://example.com/error.yaml"]
        );
    }

    #[test]
    fn follows_remote_graph_in_dfs_order() {
        let root = DocumentNode::from_value(
            "root.yaml",
            json!({
                "a": { "$ref": "https://example.com/a.yaml" },
                "b": { "$ref": "https://example.com/b.yaml" }
            }),
        );
        let fetcher = StaticFetcher::new()
            .with("https://example.com/a.yaml", "type: string\n")
            .with(
                "https://example.com/b.yaml",
                "items:\n  $ref: 'https://example.com/a.yaml'\n",
            );

        let result = block_on(resolve_remote_refs(&root, &fetcher)).unwrap();
        let paths: Vec<&str> = result.remote_refs.iter().map(|r| r.path.as_str()).collect();
        assert_eq!(paths, vec!["https://example.com/b.yaml", "https://example.com/a.yaml"]);
        assert!(result.missing_remote_refs.is_empty());
        assert_eq!(result.documents.len(), 2);
    }

    #[test]
    fn failed_fetches_are_missing_once() {
        let root = DocumentNode::from_value(
            "root.yaml",
            json!({
                "a": { "$ref": "https://example.com/gone.yaml" },
                "b": { "$ref": "https://example.com/other.yaml" }
            }),
        );
        let fetcher = StaticFetcher::new().with(
            "https://example.com/other.yaml",
            "x:\n  $ref: 'https://example.com/gone.yaml#/X'\n",
        );

        let result = block_on(resolve_remote_refs(&root, &fetcher)).unwrap();
        assert_eq!(
            result.missing_remote_refs,
            vec![MissingRef::Path {
                path: "https://example.com/gone.yaml".into()
            }]
        );
        assert_eq!(
            result.remote_refs,
            vec![RemotePath {
                path: "https://example.com/other.yaml".into()
            }]
        );
    }

    #[test]
    fn relative_refs_in_fetched_documents_are_followed() {
        let root = DocumentNode::from_value(
            "root.yaml",
            json!({ "a": { "$ref": "https://example.com/specs/a.yaml" } }),
        );
        let fetcher = StaticFetcher::new()
            .with("https://example.com/specs/a.yaml", "next:\n  $ref: b.yaml#/B\n")
            .with("https://example.com/specs/b.yaml", "B:\n  type: string\n");

        let result = block_on(resolve_remote_refs(&root, &fetcher)).unwrap();
        let paths: Vec<&str> = result.remote_refs.iter().map(|r| r.path.as_str()).collect();
        assert_eq!(
            paths,
            vec!["https://example.com/specs/a.yaml", "https://example.com/specs/b.yaml"]
        );
        assert!(result.missing_remote_refs.is_empty());
    }

    #[test]
    fn unparsable_remote_document_is_fatal() {
        let root = DocumentNode::from_value(
            "root.yaml",
            json!({ "a": { "$ref": "https://example.com/bad.yaml" } }),
        );
        let fetcher = StaticFetcher::new().with("https://example.com/bad.yaml", "a: [1");
        let result = block_on(resolve_remote_refs(&root, &fetcher));
        assert!(matches!(result, Err(BundleError::Parse { .. })));
    }

    #[test]
    fn pool_results_are_merged() {
        let pool = vec![
            DocumentNode::from_value("a.yaml", json!({ "x": { "$ref": "https://example.com/s.yaml" } })),
            DocumentNode::from_value("b.yaml", json!({ "y": { "$ref": "https://example.com/s.yaml" } })),
        ];
        let fetcher = StaticFetcher::new().with("https://example.com/s.yaml", "type: object");
        let result = block_on(resolve_pool_remote_refs(&pool, &fetcher)).unwrap();
        assert_eq!(result.documents.len(), 1);
        assert_eq!(result.remote_refs[0].path, "https://example.com/s.yaml");
    }

    #[test]
    fn serializes_camel_case() {
        let refs = RemoteRefs {
            remote_refs: vec![RemotePath {
                path: "https://example.com/a.yaml".into(),
            }],
            missing_remote_refs: vec![],
            documents: vec![],
        };
        assert_eq!(
            serde_json::to_value(&refs).unwrap(),
            json!({
                "remoteRefs": [{"path": "https://example.com/a.yaml"}],
                "missingRemoteRefs": []
            })
        );
    }

    #[cfg(feature = "remote")]
    mod http {
        use super::*;

        #[tokio::test]
        async fn http_fetcher_returns_body() {
            let mut server = mockito::Server::new_async().await;
            let mock = server
                .mock("GET", "/pet.yaml")
                .with_status(200)
                .with_body("type: object\n")
                .create_async()
                .await;

            let fetcher = HttpFetcher::new().unwrap();
            let body = fetcher
                .fetch(&format!("{}/pet.yaml", server.url()))
                .await
                .unwrap();
            assert_eq!(body, "type: object\n");
            mock.assert_async().await;
        }

        #[tokio::test]
        async fn http_fetcher_maps_status_errors() {
            let mut server = mockito::Server::new_async().await;
            server
                .mock("GET", "/missing.yaml")
                .with_status(404)
                .create_async()
                .await;

            let fetcher = HttpFetcher::new().unwrap();
            let result = fetcher
                .fetch(&format!("{}/missing.yaml", server.url()))
                .await;
            assert!(matches!(result, Err(FetchError::Status { status: 404, .. })));
        }

        #[tokio::test]
        async fn http_failures_become_missing_refs() {
            let mut server = mockito::Server::new_async().await;
            server
                .mock("GET", "/down.yaml")
                .with_status(500)
                .create_async()
                .await;
            let url = format!("{}/down.yaml", server.url());
            let root = DocumentNode::from_value("root.yaml", json!({ "a": { "$ref": url.clone() } }));

            let fetcher = HttpFetcher::new().unwrap();
            let result = resolve_remote_refs(&root, &fetcher).await.unwrap();
            assert_eq!(result.missing_remote_refs, vec![MissingRef::Path { path: url }]);
            assert!(result.remote_refs.is_empty());
        }

        #[tokio::test]
        async fn default_http_resolution() {
            let mut server = mockito::Server::new_async().await;
            server
                .mock("GET", "/pet.yaml")
                .with_status(200)
                .with_body("type: object\n")
                .create_async()
                .await;
            let url = format!("{}/pet.yaml", server.url());
            let root = DocumentNode::from_value("root.yaml", json!({ "a": { "$ref": url.clone() } }));

            let result = resolve_remote_refs_http(&root).await.unwrap();
            assert_eq!(result.remote_refs, vec![RemotePath { path: url }]);
        }

        #[test]
        fn scheme_relative_urls_default_to_https() {
            assert_eq!(
                with_default_scheme("//example.com/pet.yaml"),
                "https://example.com/pet.yaml"
            );
            assert_eq!(
                with_default_scheme("http://example.com/pet.yaml"),
                "http://example.com/pet.yaml"
            );
        }
    }
}
