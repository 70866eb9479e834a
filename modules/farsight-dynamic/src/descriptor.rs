use std::collections::HashMap;
use std::sync::Arc;

use typed_builder::TypedBuilder;

use farsight_adapter::TerraformMapping;
use farsight_common::{Health, ScopeKind};

/// Builds a fully qualified URL from the ordered path parameters of one call:
/// the split canonical query for GET, nothing for LIST (the closure already
/// carries the scope), the raw query string for SEARCH. `None` means the
/// parameters cannot address an endpoint.
pub type EndpointBuilder = Arc<dyn Fn(&[&str]) -> Option<String> + Send + Sync>;

/// Which capability set a descriptor materialises into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flavour {
    Standard,
    Listable,
    Searchable,
    SearchableListable,
}

/// Maps a remote state attribute onto item health for one resource family.
#[derive(Clone)]
pub struct HealthTable {
    pub state_attribute: String,
    pub states: HashMap<String, Health>,
}

impl HealthTable {
    /// The mapping most control-plane state machines fit: provisioning
    /// states are pending, enabled is ok, disabled warns, terminal states
    /// are errors.
    pub fn common(state_attribute: impl Into<String>) -> Self {
        let mut states = HashMap::new();
        states.insert("PENDING".to_string(), Health::Pending);
        states.insert("GENERATION".to_string(), Health::Pending);
        states.insert("CREATING".to_string(), Health::Pending);
        states.insert("ENABLED".to_string(), Health::Ok);
        states.insert("ACTIVE".to_string(), Health::Ok);
        states.insert("RUNNING".to_string(), Health::Ok);
        states.insert("DISABLED".to_string(), Health::Warning);
        states.insert("SUSPENDED".to_string(), Health::Warning);
        states.insert("DESTROYED".to_string(), Health::Error);
        states.insert("FAILED".to_string(), Health::Error);
        Self {
            state_attribute: state_attribute.into(),
            states,
        }
    }

    pub fn health_for(&self, state: &str) -> Option<Health> {
        self.states.get(state).copied()
    }
}

/// Declarative description of one remote REST resource, from which the
/// framework materialises a working adapter without resource-specific code.
/// Presence of the list/search builders selects the flavour.
#[derive(Clone, TypedBuilder)]
pub struct ResourceDescriptor {
    #[builder(setter(into))]
    pub item_type: String,

    #[builder(setter(into))]
    pub category: String,

    pub scope_kind: ScopeKind,

    pub get_endpoint: EndpointBuilder,

    #[builder(default)]
    pub list_endpoint: Option<EndpointBuilder>,

    #[builder(default)]
    pub search_endpoint: Option<EndpointBuilder>,

    /// Ordered path segments that together address the resource; their
    /// values join into the unique attribute.
    pub unique_attribute_keys: Vec<String>,

    /// Attribute holding the joined unique value on the finished item.
    #[builder(default = "uniqueAttributeValue".to_string(), setter(into))]
    pub unique_attribute: String,

    /// Attribute holding the remote name in responses.
    #[builder(default = "name".to_string(), setter(into))]
    pub name_selector: String,

    /// Key holding the items array in LIST/SEARCH pages.
    #[builder(default = "items".to_string(), setter(into))]
    pub list_response_selector: String,

    /// Attribute paths known to reference other resources but not yet
    /// registered for linking.
    #[builder(default)]
    pub potential_links: Vec<String>,

    #[builder(default)]
    pub iam_permissions: Vec<String>,

    #[builder(default)]
    pub in_development: bool,

    #[builder(default)]
    pub terraform_mappings: Vec<TerraformMapping>,

    /// Queries starting with this prefix are treated as reverse lookups of a
    /// full resource path (Terraform mode) and answered via GET.
    #[builder(default)]
    pub reverse_lookup_prefix: Option<String>,

    #[builder(default)]
    pub health: Option<HealthTable>,

    #[builder(default, setter(into))]
    pub get_description: String,
}

impl ResourceDescriptor {
    pub fn flavour(&self) -> Flavour {
        match (&self.list_endpoint, &self.search_endpoint) {
            (None, None) => Flavour::Standard,
            (Some(_), None) => Flavour::Listable,
            (None, Some(_)) => Flavour::Searchable,
            (Some(_), Some(_)) => Flavour::SearchableListable,
        }
    }

    /// Human description used in errors when the GET endpoint cannot be built.
    pub fn describe_get(&self) -> String {
        if self.get_description.is_empty() {
            format!(
                "GET {} by {}",
                self.item_type,
                self.unique_attribute_keys.join("|")
            )
        } else {
            self.get_description.clone()
        }
    }
}
