use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::attrs;
use crate::error::QueryError;

/// Reserved separator joining ordered path parameters into one unique value.
pub const UNIQUE_SEPARATOR: char = '|';

// --- Health ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Health {
    Unknown,
    Pending,
    Ok,
    Warning,
    Error,
}

impl std::fmt::Display for Health {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Health::Unknown => write!(f, "unknown"),
            Health::Pending => write!(f, "pending"),
            Health::Ok => write!(f, "ok"),
            Health::Warning => write!(f, "warning"),
            Health::Error => write!(f, "error"),
        }
    }
}

impl std::str::FromStr for Health {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unknown" => Ok(Self::Unknown),
            "pending" => Ok(Self::Pending),
            "ok" => Ok(Self::Ok),
            "warning" => Ok(Self::Warning),
            "error" => Ok(Self::Error),
            other => Err(format!("unknown Health: {other}")),
        }
    }
}

// --- Method ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Method {
    Get,
    List,
    Search,
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Method::Get => write!(f, "GET"),
            Method::List => write!(f, "LIST"),
            Method::Search => write!(f, "SEARCH"),
        }
    }
}

impl std::str::FromStr for Method {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "GET" => Ok(Self::Get),
            "LIST" => Ok(Self::List),
            "SEARCH" => Ok(Self::Search),
            other => Err(format!("unknown Method: {other}")),
        }
    }
}

// --- Scope ---

/// Which shape of scope an adapter family lives in. Drives both adapter
/// instantiation (one adapter per concrete scope) and linked-query scoping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeKind {
    /// `{account}`: one per tenant, no location component.
    Account,
    /// `{account}.{region}`
    Regional,
    /// `{account}.{zone}`
    Zonal,
}

/// A dotted address for the slice of the world an adapter serves:
/// `{account}`, `{account}.{region}` or `{account}.{zone}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Scope(String);

impl Scope {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn account(account: impl Into<String>) -> Self {
        Self(account.into())
    }

    pub fn regional(account: &str, region: &str) -> Self {
        Self(format!("{account}.{region}"))
    }

    pub fn zonal(account: &str, zone: &str) -> Self {
        Self(format!("{account}.{zone}"))
    }

    /// Build the scope shape `kind` requires from the parts at hand.
    /// A regional/zonal kind with no location falls back to the bare account.
    pub fn for_kind(kind: ScopeKind, account: &str, location: Option<&str>) -> Self {
        match (kind, location) {
            (ScopeKind::Account, _) | (_, None) => Self::account(account),
            (ScopeKind::Regional, Some(loc)) | (ScopeKind::Zonal, Some(loc)) => {
                Self(format!("{account}.{loc}"))
            }
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The tenant part (everything before the first dot).
    pub fn account_part(&self) -> &str {
        self.0.split('.').next().unwrap_or(&self.0)
    }

    /// The region/zone part, when present.
    pub fn location_part(&self) -> Option<&str> {
        self.0.split_once('.').map(|(_, rest)| rest)
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Scope {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// --- Query ---

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Query {
    pub item_type: String,
    pub method: Method,
    /// GET: the unique-attribute value. LIST: empty. SEARCH: adapter-specific.
    pub query: String,
    pub scope: Scope,
    #[serde(default)]
    pub ignore_cache: bool,
}

impl Query {
    pub fn get(item_type: impl Into<String>, scope: Scope, query: impl Into<String>) -> Self {
        Self {
            item_type: item_type.into(),
            method: Method::Get,
            query: query.into(),
            scope,
            ignore_cache: false,
        }
    }

    pub fn list(item_type: impl Into<String>, scope: Scope) -> Self {
        Self {
            item_type: item_type.into(),
            method: Method::List,
            query: String::new(),
            scope,
            ignore_cache: false,
        }
    }

    pub fn search(item_type: impl Into<String>, scope: Scope, query: impl Into<String>) -> Self {
        Self {
            item_type: item_type.into(),
            method: Method::Search,
            query: query.into(),
            scope,
            ignore_cache: false,
        }
    }
}

// --- Blast propagation ---

/// Two-bit annotation on a linked query: does failure/change of the target
/// affect this item (`inward`), the reverse (`outward`), or both.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlastPropagation {
    pub inward: bool,
    pub outward: bool,
}

impl BlastPropagation {
    pub fn inward() -> Self {
        Self { inward: true, outward: false }
    }

    pub fn outward() -> Self {
        Self { inward: false, outward: true }
    }

    pub fn both() -> Self {
        Self { inward: true, outward: true }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkedItemQuery {
    pub query: Query,
    pub blast: BlastPropagation,
}

// --- Item ---

/// The uniform record every adapter returns. Identity is
/// `(item_type, scope, unique-attribute value)`; everything else may change
/// between refreshes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    pub item_type: String,
    pub scope: Scope,
    /// Name of the attribute whose value is unique within (type, scope).
    pub unique_attribute: String,
    pub attributes: Map<String, Value>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health: Option<Health>,
    #[serde(default)]
    pub linked_item_queries: Vec<LinkedItemQuery>,
}

impl Item {
    /// Build an item from ordered path parameters. The joined unique value is
    /// written into `attributes` under `unique_attribute`, so the identity
    /// invariant holds from construction.
    pub fn new<S: AsRef<str>>(
        item_type: impl Into<String>,
        scope: Scope,
        unique_attribute: impl Into<String>,
        params: &[S],
        mut attributes: Map<String, Value>,
    ) -> Result<Self, QueryError> {
        let unique_attribute = unique_attribute.into();
        let unique_value = crate::join_unique(params)?;
        attributes.insert(unique_attribute.clone(), Value::String(unique_value));
        Ok(Self {
            item_type: item_type.into(),
            scope,
            unique_attribute,
            attributes,
            tags: BTreeMap::new(),
            health: None,
            linked_item_queries: Vec::new(),
        })
    }

    /// The value of the unique attribute, coerced to a string.
    /// Present by construction; absent only if the attribute map was
    /// mutated out from under the item.
    pub fn unique_attribute_value(&self) -> Option<String> {
        self.attributes
            .get(&self.unique_attribute)
            .and_then(attrs::scalar_to_string)
    }

    /// Dotted-path access into the attribute tree.
    pub fn attribute(&self, path: &str) -> Option<&Value> {
        attrs::get_path_in(&self.attributes, path)
    }

    /// The canonical GET query that refetches this item.
    pub fn reference(&self) -> Query {
        Query::get(
            self.item_type.clone(),
            self.scope.clone(),
            self.unique_attribute_value().unwrap_or_default(),
        )
    }
}

impl PartialEq for Item {
    fn eq(&self, other: &Self) -> bool {
        self.item_type == other.item_type
            && self.scope == other.scope
            && self.unique_attribute_value() == other.unique_attribute_value()
    }
}

impl Eq for Item {}
