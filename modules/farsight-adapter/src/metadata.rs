use serde::{Deserialize, Serialize};

use farsight_common::Method;

/// Declarative descriptor every adapter reports at registration: what it can
/// do, how each method behaves, and how Terraform addresses map back onto it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AdapterMetadata {
    pub supported_methods: Vec<Method>,
    pub category: String,
    pub get_description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub list_description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_description: Option<String>,
    /// Attribute paths that look like references to other item types but have
    /// no registry entry yet.
    #[serde(default)]
    pub potential_links: Vec<String>,
    #[serde(default)]
    pub terraform_mappings: Vec<TerraformMapping>,
    /// IAM permissions the adapter needs; the permission probe aggregates these.
    #[serde(default)]
    pub iam_permissions: Vec<String>,
    #[serde(default)]
    pub in_development: bool,
}

/// Reverse lookup from a Terraform resource address to a discovery query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerraformMapping {
    /// e.g. `google_bigtable_table`
    pub terraform_type: String,
    /// The Terraform attribute whose value becomes the query, e.g. `id`.
    pub terraform_query_map: String,
    pub method: Method,
}
