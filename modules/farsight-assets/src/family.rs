use farsight_common::ScopeKind;
use farsight_dynamic::{HealthTable, Normaliser};

/// One resource kind carried by the asset index: how its entries in the feed
/// are recognised and how they normalise into items.
#[derive(Clone)]
pub struct AssetFamily {
    pub item_type: String,
    /// The `assetType` discriminator in the index feed,
    /// e.g. `kms.example.com/KeyRing`.
    pub asset_type: String,
    pub scope_kind: ScopeKind,
    pub unique_attribute_keys: Vec<String>,
    pub unique_attribute: String,
    pub name_selector: String,
    pub health: Option<HealthTable>,
}

impl AssetFamily {
    pub fn new(
        item_type: impl Into<String>,
        asset_type: impl Into<String>,
        scope_kind: ScopeKind,
        unique_attribute_keys: Vec<String>,
    ) -> Self {
        Self {
            item_type: item_type.into(),
            asset_type: asset_type.into(),
            scope_kind,
            unique_attribute_keys,
            unique_attribute: "uniqueAttributeValue".to_string(),
            name_selector: "name".to_string(),
            health: None,
        }
    }

    pub fn with_health(mut self, health: HealthTable) -> Self {
        self.health = Some(health);
        self
    }

    pub fn normaliser(&self) -> Normaliser {
        Normaliser {
            item_type: self.item_type.clone(),
            unique_attribute: self.unique_attribute.clone(),
            unique_attribute_keys: self.unique_attribute_keys.clone(),
            name_selector: self.name_selector.clone(),
            health: self.health.clone(),
        }
    }
}
