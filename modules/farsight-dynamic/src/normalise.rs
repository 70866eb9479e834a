//! Conversion from a raw control-plane response to a farsight item.
//!
//! The same rules serve the per-adapter fetch path and the bulk asset
//! loader: labels become tags, the declared name attribute yields the
//! ordered path parameters (the whole name when it carries fewer segments
//! than declared), health is inferred from the family's state table, and
//! the linker walks the finished attribute tree for cross-references.

use serde_json::{Map, Value};
use tracing::debug;

use farsight_adapter::Linker;
use farsight_common::{attrs, Item, QueryError, Scope};

use crate::descriptor::{HealthTable, ResourceDescriptor};

/// The subset of a descriptor that drives normalisation.
#[derive(Clone)]
pub struct Normaliser {
    pub item_type: String,
    pub unique_attribute: String,
    pub unique_attribute_keys: Vec<String>,
    pub name_selector: String,
    pub health: Option<HealthTable>,
}

impl Normaliser {
    pub fn render(
        &self,
        linker: &Linker,
        scope: &Scope,
        body: Value,
    ) -> Result<Item, QueryError> {
        let mut attributes: Map<String, Value> = match body {
            Value::Object(map) => map,
            other => {
                return Err(QueryError::other(format!(
                    "expected a JSON object from the remote API, got {}",
                    kind_of(&other)
                ))
                .in_scope(scope))
            }
        };

        let labels = attributes.remove("labels");

        let name = match attributes
            .get(&self.name_selector)
            .and_then(attrs::scalar_to_string)
        {
            Some(name) => name,
            None => {
                return Err(QueryError::other(format!(
                    "response has no scalar '{}' attribute",
                    self.name_selector
                ))
                .in_scope(scope))
            }
        };

        let params = attrs::extract_path_params(&name, &self.unique_attribute_keys);

        let mut item = Item::new(
            self.item_type.clone(),
            scope.clone(),
            self.unique_attribute.clone(),
            &params,
            attributes,
        )
        .map_err(|e| e.in_scope(scope))?;

        if let Some(Value::Object(labels)) = labels {
            for (key, value) in labels {
                match attrs::scalar_to_string(&value) {
                    Some(value) => {
                        item.tags.insert(key, value);
                    }
                    None => debug!(key, "Dropping non-scalar label"),
                }
            }
        }

        if let Some(table) = &self.health {
            if let Some(state) = item
                .attribute(&table.state_attribute)
                .and_then(attrs::scalar_to_string)
            {
                item.health = table.health_for(&state);
            }
        }

        item.linked_item_queries = linker.link(&self.item_type, scope, &item.attributes);

        Ok(item)
    }
}

impl ResourceDescriptor {
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

/// Render one remote document into an item under a descriptor's rules.
pub fn external_to_item(
    descriptor: &ResourceDescriptor,
    linker: &Linker,
    scope: &Scope,
    body: Value,
) -> Result<Item, QueryError> {
    descriptor.normaliser().render(linker, scope, body)
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a sequence",
        Value::Object(_) => "a mapping",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::HealthTable;
    use farsight_adapter::BlastRegistry;
    use farsight_common::{Health, ScopeKind};
    use serde_json::json;
    use std::sync::Arc;

    fn descriptor() -> ResourceDescriptor {
        ResourceDescriptor::builder()
            .item_type("kms-keyring")
            .category("kms")
            .scope_kind(ScopeKind::Regional)
            .get_endpoint(Arc::new(|_: &[&str]| None))
            .unique_attribute_keys(vec!["locations".into(), "keyRings".into()])
            .health(Some(HealthTable::common("state")))
            .build()
    }

    fn linker() -> Linker {
        Linker::new(Arc::new(BlastRegistry::new()))
    }

    #[test]
    fn labels_become_tags_and_health_is_inferred() {
        let scope = Scope::regional("proj", "us-central1");
        let item = external_to_item(
            &descriptor(),
            &linker(),
            &scope,
            json!({
                "name": "projects/proj/locations/us-central1/keyRings/ring-a",
                "state": "ENABLED",
                "labels": {"team": "payments", "env": "prod"}
            }),
        )
        .unwrap();

        assert_eq!(item.unique_attribute_value().unwrap(), "us-central1|ring-a");
        assert_eq!(item.tags.get("team").unwrap(), "payments");
        assert_eq!(item.health, Some(Health::Ok));
        assert!(item.attributes.get("labels").is_none());
    }

    #[test]
    fn short_name_is_its_own_unique_value() {
        let scope = Scope::regional("proj", "us-central1");
        let item = external_to_item(
            &descriptor(),
            &linker(),
            &scope,
            json!({"name": "bare-name"}),
        )
        .unwrap();
        assert_eq!(item.unique_attribute_value().unwrap(), "bare-name");
    }

    #[test]
    fn missing_name_fails() {
        let scope = Scope::regional("proj", "us-central1");
        let err = external_to_item(
            &descriptor(),
            &linker(),
            &scope,
            json!({"displayName": "no canonical name"}),
        )
        .unwrap_err();
        assert_eq!(err.kind(), farsight_common::ErrorKind::Other);
        assert!(err.to_string().contains("name"));
    }

    #[test]
    fn non_object_body_fails() {
        let scope = Scope::account("proj");
        let err = external_to_item(&descriptor(), &linker(), &scope, json!([1, 2])).unwrap_err();
        assert!(err.to_string().contains("sequence"));
    }
}
