//! The descriptor catalog: every resource family this source can discover,
//! expressed as declarative metadata, plus the cross-reference registry the
//! linker consults. Built once per init attempt; read-only afterwards.

use std::sync::Arc;

use farsight_adapter::{AdapterHandle, BlastRegistry, LinkSpec, Linker, TerraformMapping};
use farsight_assets::{AssetBackedAdapter, AssetFamily, AssetLoader};
use farsight_cache::Cache;
use farsight_common::{BlastPropagation, Method, Scope, ScopeKind};
use farsight_dynamic::{DynamicAdapter, HealthTable, HttpClient, ResourceDescriptor};

/// Cross-references between the catalog's item types. Key paths are
/// index-free: one entry covers every element of a repeated field.
pub fn blast_registry() -> BlastRegistry {
    let mut registry = BlastRegistry::new();

    // An instance depends on its subnetwork; the subnetwork is not affected
    // by the instance.
    registry.register(
        "compute-instance",
        "networkInterfaces.subnetwork",
        LinkSpec {
            target_type: "compute-subnetwork".into(),
            method: Method::Get,
            scope_kind: ScopeKind::Regional,
            unique_attribute_keys: vec!["subnetworks".into()],
            blast: BlastPropagation::inward(),
        },
    );

    // Disk failure propagates into the instance and an instance can corrupt
    // its disk.
    registry.register(
        "compute-instance",
        "disks.source",
        LinkSpec {
            target_type: "compute-disk".into(),
            method: Method::Get,
            scope_kind: ScopeKind::Zonal,
            unique_attribute_keys: vec!["disks".into()],
            blast: BlastPropagation::both(),
        },
    );

    // A table lives inside its instance.
    registry.register(
        "bigtable-table",
        "sourceInstance",
        LinkSpec {
            target_type: "bigtable-instance".into(),
            method: Method::Get,
            scope_kind: ScopeKind::Account,
            unique_attribute_keys: vec!["instances".into()],
            blast: BlastPropagation::inward(),
        },
    );

    // A bucket's KMS key controls access to the bucket's data.
    registry.register(
        "storage-bucket",
        "encryption.defaultKmsKeyName",
        LinkSpec {
            target_type: "kms-crypto-key".into(),
            method: Method::Search,
            scope_kind: ScopeKind::Account,
            unique_attribute_keys: vec![],
            blast: BlastPropagation::inward(),
        },
    );

    registry
}

/// Dynamic descriptors for one concrete (account, location) pair. The
/// builders close over the resolved endpoints, so one catalog entry yields
/// one adapter per scope.
pub fn descriptors_for_scope(
    base: &str,
    account: &str,
    location: Option<&str>,
) -> Vec<ResourceDescriptor> {
    let mut descriptors = Vec::new();

    if let Some(zone) = location {
        let instance_base =
            format!("{base}/compute/v1/projects/{account}/zones/{zone}/instances");
        let get_base = instance_base.clone();
        let list_base = instance_base;
        let disk_base = format!("{base}/compute/v1/projects/{account}/zones/{zone}/disks");
        let disk_get = disk_base.clone();
        let subnet_base = format!(
            "{base}/compute/v1/projects/{account}/regions/{region}/subnetworks",
            region = region_of(zone)
        );
        let subnet_get = subnet_base.clone();

        descriptors.push(
            ResourceDescriptor::builder()
                .item_type("compute-instance")
                .category("compute")
                .scope_kind(ScopeKind::Zonal)
                .get_endpoint(Arc::new(move |params: &[&str]| match params {
                    [name] => Some(format!("{get_base}/{name}")),
                    _ => None,
                }))
                .list_endpoint(Some(Arc::new(move |_: &[&str]| Some(list_base.clone()))))
                .unique_attribute_keys(vec!["instances".into()])
                .health(Some(HealthTable::common("status")))
                // Referenced but not linked yet; the linker logs sightings.
                .potential_links(vec!["machineType".into(), "sourceImage".into()])
                .iam_permissions(vec!["compute.instances.get".into(), "compute.instances.list".into()])
                .build(),
        );

        descriptors.push(
            ResourceDescriptor::builder()
                .item_type("compute-disk")
                .category("compute")
                .scope_kind(ScopeKind::Zonal)
                .get_endpoint(Arc::new(move |params: &[&str]| match params {
                    [name] => Some(format!("{disk_get}/{name}")),
                    _ => None,
                }))
                .list_endpoint(Some(Arc::new(move |_: &[&str]| Some(disk_base.clone()))))
                .unique_attribute_keys(vec!["disks".into()])
                .iam_permissions(vec!["compute.disks.get".into(), "compute.disks.list".into()])
                .build(),
        );

        descriptors.push(
            ResourceDescriptor::builder()
                .item_type("compute-subnetwork")
                .category("compute")
                .scope_kind(ScopeKind::Regional)
                .get_endpoint(Arc::new(move |params: &[&str]| match params {
                    [name] => Some(format!("{subnet_get}/{name}")),
                    _ => None,
                }))
                .list_endpoint(Some(Arc::new(move |_: &[&str]| Some(subnet_base.clone()))))
                .unique_attribute_keys(vec!["subnetworks".into()])
                .iam_permissions(vec!["compute.subnetworks.get".into()])
                .build(),
        );
    } else {
        // Account-wide families.
        let table_get = format!("{base}/v2/projects/{account}");
        let bucket_base = format!("{base}/storage/v1/b");
        let bucket_get = bucket_base.clone();
        let bucket_list = format!("{base}/storage/v1/b?project={account}");
        let instance_base = format!("{base}/v2/projects/{account}/instances");
        let instance_get = instance_base.clone();

        descriptors.push(
            ResourceDescriptor::builder()
                .item_type("bigtable-instance")
                .category("bigtable")
                .scope_kind(ScopeKind::Account)
                .get_endpoint(Arc::new(move |params: &[&str]| match params {
                    [name] => Some(format!("{instance_get}/{name}")),
                    _ => None,
                }))
                .list_endpoint(Some(Arc::new(move |_: &[&str]| {
                    Some(instance_base.clone())
                })))
                .unique_attribute_keys(vec!["instances".into()])
                .list_response_selector("instances")
                .health(Some(HealthTable::common("state")))
                .iam_permissions(vec!["bigtable.instances.get".into(), "bigtable.instances.list".into()])
                .build(),
        );

        descriptors.push(
            ResourceDescriptor::builder()
                .item_type("bigtable-table")
                .category("bigtable")
                .scope_kind(ScopeKind::Account)
                .get_endpoint(Arc::new(move |params: &[&str]| match params {
                    [instance, table] => {
                        Some(format!("{table_get}/instances/{instance}/tables/{table}"))
                    }
                    _ => None,
                }))
                .search_endpoint(Some(Arc::new(|_: &[&str]| None)))
                .unique_attribute_keys(vec!["instances".into(), "tables".into()])
                .reverse_lookup_prefix(Some("projects/".to_string()))
                .terraform_mappings(vec![TerraformMapping {
                    terraform_type: "google_bigtable_table".into(),
                    terraform_query_map: "id".into(),
                    method: Method::Search,
                }])
                .iam_permissions(vec!["bigtable.tables.get".into()])
                .build(),
        );

        // Not production-ready yet: only registered when the deployable
        // opts in.
        let reservation_base = format!("{base}/v2/projects/{account}/reservations");
        let reservation_get = reservation_base.clone();
        descriptors.push(
            ResourceDescriptor::builder()
                .item_type("bigtable-reservation")
                .category("bigtable")
                .scope_kind(ScopeKind::Account)
                .get_endpoint(Arc::new(move |params: &[&str]| match params {
                    [name] => Some(format!("{reservation_get}/{name}")),
                    _ => None,
                }))
                .list_endpoint(Some(Arc::new(move |_: &[&str]| {
                    Some(reservation_base.clone())
                })))
                .unique_attribute_keys(vec!["reservations".into()])
                .in_development(true)
                .build(),
        );

        descriptors.push(
            ResourceDescriptor::builder()
                .item_type("storage-bucket")
                .category("storage")
                .scope_kind(ScopeKind::Account)
                .get_endpoint(Arc::new(move |params: &[&str]| match params {
                    [name] => Some(format!("{bucket_get}/{name}")),
                    _ => None,
                }))
                .list_endpoint(Some(Arc::new(move |_: &[&str]| Some(bucket_list.clone()))))
                // Bucket names are bare strings; the name itself is the
                // unique value.
                .unique_attribute_keys(vec![])
                .iam_permissions(vec!["storage.buckets.get".into(), "storage.buckets.list".into()])
                .build(),
        );
    }

    descriptors
}

/// Resource kinds served from the asset index instead of per-resource APIs.
pub fn asset_families() -> Vec<AssetFamily> {
    vec![
        AssetFamily::new(
            "kms-keyring",
            "kms.example.com/KeyRing",
            ScopeKind::Account,
            vec!["locations".into(), "keyRings".into()],
        ),
        AssetFamily::new(
            "kms-crypto-key",
            "kms.example.com/CryptoKey",
            ScopeKind::Account,
            vec!["locations".into(), "keyRings".into(), "cryptoKeys".into()],
        )
        .with_health(HealthTable::common("primary.state")),
    ]
}

/// Materialise every adapter for one concrete scope: dynamic families plus
/// the asset-backed KMS kinds on account scopes.
pub fn build_adapters_for_scope(
    base: &str,
    scope: &Scope,
    client: &HttpClient,
    cache: &Cache,
    linker: &Arc<Linker>,
    source_name: &str,
    include_in_development: bool,
) -> Vec<AdapterHandle> {
    let account = scope.account_part().to_string();
    let location = scope.location_part().map(str::to_string);

    let mut handles = Vec::new();

    for descriptor in descriptors_for_scope(base, &account, location.as_deref()) {
        if descriptor.in_development && !include_in_development {
            continue;
        }
        handles.push(
            DynamicAdapter::new(
                descriptor,
                client.clone(),
                cache.clone(),
                linker.clone(),
                scope.clone(),
                source_name,
            )
            .into_handle(),
        );
    }

    if location.is_none() {
        let loader = Arc::new(AssetLoader::new(
            client.clone(),
            cache.clone(),
            linker.clone(),
            scope.clone(),
            source_name,
            format!("{base}/v1/{account}/assets"),
            asset_families(),
            cache.default_ttl(),
        ));
        for family in asset_families() {
            handles.push(AssetBackedAdapter::new(family, loader.clone()).into_handle());
        }
    }

    handles
}

/// `us-central1-a` lives in `us-central1`.
fn region_of(zone: &str) -> &str {
    zone.rsplit_once('-').map(|(region, _)| region).unwrap_or(zone)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn region_is_the_zone_minus_its_suffix() {
        assert_eq!(region_of("us-central1-a"), "us-central1");
        assert_eq!(region_of("europe-west4-b"), "europe-west4");
        assert_eq!(region_of("weird"), "weird");
    }

    #[test]
    fn zonal_scope_gets_compute_families() {
        let descriptors = descriptors_for_scope("http://example", "proj", Some("us-central1-a"));
        let types: Vec<&str> = descriptors.iter().map(|d| d.item_type.as_str()).collect();
        assert!(types.contains(&"compute-instance"));
        assert!(types.contains(&"compute-disk"));
        assert!(types.contains(&"compute-subnetwork"));
    }

    #[test]
    fn account_scope_gets_the_global_families() {
        let descriptors = descriptors_for_scope("http://example", "proj", None);
        let types: Vec<&str> = descriptors.iter().map(|d| d.item_type.as_str()).collect();
        assert!(types.contains(&"bigtable-table"));
        assert!(types.contains(&"storage-bucket"));
    }

    #[test]
    fn in_development_families_are_skipped_by_default() {
        use farsight_cache::Cache;
        use farsight_dynamic::HttpClient;
        use std::time::Duration;

        let cache = Cache::new(Duration::from_secs(60));
        let client = HttpClient::new(reqwest::Client::new());
        let linker = Arc::new(Linker::new(Arc::new(blast_registry())));
        let scope = Scope::account("proj");

        let default_set = build_adapters_for_scope(
            "http://example",
            &scope,
            &client,
            &cache,
            &linker,
            "farsight-test",
            false,
        );
        assert!(!default_set
            .iter()
            .any(|h| h.item_type() == "bigtable-reservation"));

        let opted_in = build_adapters_for_scope(
            "http://example",
            &scope,
            &client,
            &cache,
            &linker,
            "farsight-test",
            true,
        );
        assert!(opted_in
            .iter()
            .any(|h| h.item_type() == "bigtable-reservation"));
    }

    #[test]
    fn instance_get_endpoint_wants_exactly_one_parameter() {
        let descriptors = descriptors_for_scope("http://example", "proj", Some("us-central1-a"));
        let instance = descriptors
            .iter()
            .find(|d| d.item_type == "compute-instance")
            .unwrap();
        assert_eq!(
            (instance.get_endpoint)(&["vm-1"]).unwrap(),
            "http://example/compute/v1/projects/proj/zones/us-central1-a/instances/vm-1"
        );
        assert!((instance.get_endpoint)(&["a", "b"]).is_none());
    }
}
