//! Stack-based depth-first traversal over a caller-supplied adjacency function.
//!
//! The visited check happens when a node is popped, not when it is pushed.
//! Siblings are therefore visited last-pushed-first: for `a -> [d, c, b]` the
//! order is `a, b, ...`. Callers rely on this order, do not "fix" it.

use std::collections::HashSet;
use std::future::Future;
use std::hash::Hash;

use serde::Serialize;
use serde_json::Value;

/// What expanding one node produced.
#[derive(Debug, Clone)]
pub struct Expansion<N, M> {
    /// Nodes reachable from the expanded node, in declaration order.
    pub adjacent: Vec<N>,
    /// References of the expanded node that could not be located.
    pub missing: Vec<M>,
}

impl<N, M> Default for Expansion<N, M> {
    fn default() -> Self {
        Self {
            adjacent: Vec::new(),
            missing: Vec::new(),
        }
    }
}

/// Result of a traversal.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Traversal<N, M> {
    /// Visited nodes, each identity once, in visitation order.
    pub traverse_order: Vec<N>,
    /// Deduplicated missing descriptors, in discovery order.
    pub missing: Vec<M>,
}

/// Traverse synchronously from `start`.
///
/// `identity` keys the visited set. An error from `expand` aborts the
/// traversal and is returned as is.
pub fn traverse<N, M, K, E, I, F>(start: N, identity: I, mut expand: F) -> Result<Traversal<N, M>, E>
where
    I: Fn(&N) -> K,
    K: Eq + Hash,
    M: Serialize,
    F: FnMut(&N) -> Result<Expansion<N, M>, E>,
{
    let mut visited = HashSet::new();
    let mut stack = vec![start];
    let mut traverse_order = Vec::new();
    let mut missing = Vec::new();

    while let Some(node) = stack.pop() {
        if !visited.insert(identity(&node)) {
            continue;
        }
        let expansion = expand(&node)?;
        traverse_order.push(node);
        missing.extend(expansion.missing);
        stack.extend(expansion.adjacent);
    }

    Ok(Traversal {
        traverse_order,
        missing: dedup_missing(missing),
    })
}

/// Traverse from `start`, awaiting each node's expansion before popping the
/// next one.
///
/// Work inside a single `expand` call may run concurrently; nodes are never
/// expanded concurrently with each other.
pub async fn traverse_async<N, M, K, E, I, F, Fut>(
    start: N,
    identity: I,
    mut expand: F,
) -> Result<Traversal<N, M>, E>
where
    N: Clone,
    I: Fn(&N) -> K,
    K: Eq + Hash,
    M: Serialize,
    F: FnMut(N) -> Fut,
    Fut: Future<Output = Result<Expansion<N, M>, E>>,
{
    let mut visited = HashSet::new();
    let mut stack = vec![start];
    let mut traverse_order = Vec::new();
    let mut missing = Vec::new();

    while let Some(node) = stack.pop() {
        if !visited.insert(identity(&node)) {
            continue;
        }
        let expansion = expand(node.clone()).await?;
        traverse_order.push(node);
        missing.extend(expansion.missing);
        stack.extend(expansion.adjacent);
    }

    Ok(Traversal {
        traverse_order,
        missing: dedup_missing(missing),
    })
}

/// Drop structurally identical descriptors, keeping the first occurrence.
///
/// Two descriptors are identical when their serialized forms are equal with
/// object keys sorted.
pub fn dedup_missing<M: Serialize>(items: Vec<M>) -> Vec<M> {
    let mut seen = HashSet::new();
    let mut unique = Vec::with_capacity(items.len());
    for item in items {
        match serde_json::to_value(&item) {
            Ok(value) => {
                if seen.insert(canonical_json(&value)) {
                    unique.push(item);
                }
            }
            // not representable as JSON, cannot be compared
            Err(_) => unique.push(item),
        }
    }
    unique
}

/// Serialize a value with object keys sorted at every level.
pub fn canonical_json(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let body: Vec<String> = keys
                .into_iter()
                .map(|k| format!("{}:{}", Value::String(k.clone()), canonical_json(&map[k])))
                .collect();
            format!("{{{}}}", body.join(","))
        }
        Value::Array(items) => {
            let body: Vec<String> = items.iter().map(canonical_json).collect();
            format!("[{}]", body.join(","))
        }
        other => other.to_string(),
    }
}
