//! Turns attribute values that look like remote resource identifiers into
//! typed linked-item queries.
//!
//! The registry is built once at init from the descriptor catalog and is
//! read-only afterwards. The walk itself never fails a parent extraction;
//! an unresolvable leaf is logged and dropped.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::debug;

use farsight_common::{
    attrs, join_unique, BlastPropagation, LinkedItemQuery, Method, Query, Scope, ScopeKind,
};

/// How a matched attribute value becomes a linked query.
#[derive(Debug, Clone)]
pub struct LinkSpec {
    pub target_type: String,
    pub method: Method,
    pub scope_kind: ScopeKind,
    /// Ordered path segments addressing the target resource inside the leaf.
    pub unique_attribute_keys: Vec<String>,
    pub blast: BlastPropagation,
}

/// Keyed by (source item type, attribute path). Paths are dot-joined object
/// keys; sequence indexes contribute no segment, so one entry covers every
/// element of a repeated field.
#[derive(Default)]
pub struct BlastRegistry {
    entries: HashMap<(String, String), LinkSpec>,
}

impl BlastRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        source_type: impl Into<String>,
        attribute_path: impl Into<String>,
        spec: LinkSpec,
    ) {
        self.entries
            .insert((source_type.into(), attribute_path.into()), spec);
    }

    pub fn get(&self, source_type: &str, attribute_path: &str) -> Option<&LinkSpec> {
        self.entries
            .get(&(source_type.to_string(), attribute_path.to_string()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Path-segment keywords that mark a string leaf as a probable resource
/// reference even without a registry entry.
const RESOURCE_PATH_HINTS: &[&str] = &[
    "projects/",
    "locations/",
    "folders/",
    "organizations/",
    "arn:",
];

pub struct Linker {
    registry: Arc<BlastRegistry>,
}

impl Linker {
    pub fn new(registry: Arc<BlastRegistry>) -> Self {
        Self { registry }
    }

    /// Walk the attribute tree depth-first and emit linked queries for every
    /// registered (type, path) whose leaf resolves. Duplicates coalesce.
    pub fn link(
        &self,
        item_type: &str,
        scope: &Scope,
        attributes: &Map<String, Value>,
    ) -> Vec<LinkedItemQuery> {
        let mut links = Vec::new();
        let mut seen: HashSet<(String, Method, String, Scope)> = HashSet::new();

        // Explicit stack; JSON is acyclic so no cycle detection needed.
        let mut stack: Vec<(String, &Value)> = attributes
            .iter()
            .map(|(k, v)| (k.clone(), v))
            .collect();

        while let Some((path, value)) = stack.pop() {
            match value {
                Value::Object(map) => {
                    for (k, v) in map {
                        stack.push((format!("{path}.{k}"), v));
                    }
                }
                Value::Array(seq) => {
                    for v in seq {
                        stack.push((path.clone(), v));
                    }
                }
                Value::String(leaf) => {
                    match self.registry.get(item_type, &path) {
                        Some(spec) => {
                            match self.resolve(spec, scope, leaf) {
                                Some(link) => {
                                    let dedup = (
                                        link.query.item_type.clone(),
                                        link.query.method,
                                        link.query.query.clone(),
                                        link.query.scope.clone(),
                                    );
                                    if seen.insert(dedup) {
                                        links.push(link);
                                    }
                                }
                                None => {
                                    debug!(
                                        item_type,
                                        path, leaf, "Dropping unresolvable linked value"
                                    );
                                }
                            }
                        }
                        None => {
                            if RESOURCE_PATH_HINTS.iter().any(|hint| leaf.contains(hint)) {
                                debug!(item_type, path, leaf, "Potential link not yet adopted");
                            }
                        }
                    }
                }
                _ => {}
            }
        }

        links
    }

    fn resolve(&self, spec: &LinkSpec, scope: &Scope, leaf: &str) -> Option<LinkedItemQuery> {
        let query_string = if spec.unique_attribute_keys.is_empty() {
            leaf.to_string()
        } else {
            let params = attrs::extract_path_params(leaf, &spec.unique_attribute_keys);
            join_unique(&params).ok()?
        };

        let account = scope.account_part();
        let location = location_from_leaf(leaf).or_else(|| scope.location_part());
        let target_scope = Scope::for_kind(spec.scope_kind, account, location);

        Some(LinkedItemQuery {
            query: Query {
                item_type: spec.target_type.clone(),
                method: spec.method,
                query: query_string,
                scope: target_scope,
                ignore_cache: false,
            },
            blast: spec.blast,
        })
    }
}

/// Pull a region/zone out of a resource path when it names one explicitly,
/// so a link from a regional item to a resource in another location lands in
/// the right scope.
fn location_from_leaf(leaf: &str) -> Option<&str> {
    for marker in ["locations", "regions", "zones"] {
        let segments: Vec<&str> = leaf.split('/').collect();
        if let Some(pos) = segments.iter().position(|s| *s == marker) {
            if let Some(value) = segments.get(pos + 1) {
                if !value.is_empty() && *value != "global" {
                    return Some(value);
                }
            }
        }
    }
    None
}
