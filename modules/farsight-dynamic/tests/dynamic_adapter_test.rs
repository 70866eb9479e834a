//! Integration tests for the dynamic adapter framework against a mock
//! control plane: endpoint construction, pagination, reverse lookup,
//! negative caching and permission mapping.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path, query_param, query_param_is_missing};
use wiremock::{Mock, MockServer, ResponseTemplate};

use farsight_adapter::{
    Adapter, BlastRegistry, ItemSink, Linker, ListableAdapter, SearchableAdapter,
};
use farsight_cache::Cache;
use farsight_common::{ErrorKind, Scope, ScopeKind};
use farsight_dynamic::{DynamicAdapter, HttpClient, ResourceDescriptor};

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

fn scope() -> Scope {
    Scope::regional("proj", "us-central1")
}

/// A bigtable-table-shaped descriptor bound to the mock server.
fn table_descriptor(base: &str) -> ResourceDescriptor {
    let get_base = base.to_string();
    let list_base = base.to_string();
    ResourceDescriptor::builder()
        .item_type("bigtable-table")
        .category("bigtable")
        .scope_kind(ScopeKind::Account)
        .get_endpoint(Arc::new(move |params: &[&str]| {
            if params.len() != 2 {
                return None;
            }
            Some(format!(
                "{get_base}/v2/projects/proj/instances/{}/tables/{}",
                params[0], params[1]
            ))
        }))
        .list_endpoint(Some(Arc::new(move |_: &[&str]| {
            Some(format!("{list_base}/v2/projects/proj/instances/-/tables"))
        })))
        .search_endpoint(Some(Arc::new(|_: &[&str]| None)))
        .unique_attribute_keys(vec!["instances".into(), "tables".into()])
        .reverse_lookup_prefix(Some("projects/".to_string()))
        .build()
}

fn adapter(base: &str, cache: &Cache) -> DynamicAdapter {
    DynamicAdapter::new(
        table_descriptor(base),
        HttpClient::new(reqwest::Client::new()),
        cache.clone(),
        Arc::new(Linker::new(Arc::new(BlastRegistry::new()))),
        scope(),
        "farsight-test",
    )
}

fn cache() -> Cache {
    Cache::new(Duration::from_secs(60))
}

// ---------------------------------------------------------------------------
// GET
// ---------------------------------------------------------------------------

#[tokio::test]
async fn get_fetches_normalises_and_caches() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v2/projects/proj/instances/i/tables/t"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "name": "projects/proj/instances/i/tables/t",
            "granularity": "MILLIS",
            "labels": {"team": "storage"}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let cache = cache();
    let adapter = adapter(&server.uri(), &cache);
    let ctx = CancellationToken::new();

    let item = adapter.get(&ctx, &scope(), "i|t", false).await.unwrap();
    assert_eq!(item.item_type, "bigtable-table");
    assert_eq!(item.unique_attribute_value().unwrap(), "i|t");
    assert_eq!(item.tags.get("team").unwrap(), "storage");

    // Second call is served from cache; the mock's expect(1) verifies no
    // second HTTP request happened.
    let again = adapter.get(&ctx, &scope(), "i|t", false).await.unwrap();
    assert_eq!(again, item);
}

#[tokio::test]
async fn get_on_wrong_scope_is_noscope_without_network() {
    let server = MockServer::start().await;
    // No mocks mounted: any request would return 404 and fail expect(0) below.
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let cache = cache();
    let adapter = adapter(&server.uri(), &cache);
    let ctx = CancellationToken::new();

    let err = adapter
        .get(&ctx, &Scope::regional("proj", "europe-west1"), "i|t", false)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NoScope);
}

#[tokio::test]
async fn not_found_is_cached_for_the_ttl_window() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v2/projects/proj/instances/i/tables/missing"))
        .respond_with(ResponseTemplate::new(404).set_body_string("table not found"))
        .expect(1)
        .mount(&server)
        .await;

    let cache = cache();
    let adapter = adapter(&server.uri(), &cache);
    let ctx = CancellationToken::new();

    let first = adapter.get(&ctx, &scope(), "i|missing", false).await.unwrap_err();
    assert_eq!(first.kind(), ErrorKind::NotFound);

    // Authoritative within TTL: no second HTTP call.
    let second = adapter.get(&ctx, &scope(), "i|missing", false).await.unwrap_err();
    assert_eq!(second.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn forbidden_maps_to_notpermitted_with_status_preserved() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(403).set_body_string("caller lacks permission"))
        .mount(&server)
        .await;

    let cache = cache();
    let adapter = adapter(&server.uri(), &cache);
    let ctx = CancellationToken::new();

    let err = adapter.get(&ctx, &scope(), "i|t", false).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotPermitted);
    let cause = err.permission().expect("typed permission cause");
    assert_eq!(cause.status, 403);
    assert!(cause.body.contains("lacks permission"));
}

#[tokio::test]
async fn unbuildable_endpoint_is_other() {
    let server = MockServer::start().await;
    let cache = cache();
    let adapter = adapter(&server.uri(), &cache);
    let ctx = CancellationToken::new();

    // One parameter where the endpoint needs two.
    let err = adapter.get(&ctx, &scope(), "only-one", false).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Other);
    assert!(err.to_string().contains("cannot build"));
}

// ---------------------------------------------------------------------------
// LIST + pagination
// ---------------------------------------------------------------------------

async fn mount_two_pages(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/v2/projects/proj/instances/-/tables"))
        .and(query_param("pageToken", "t"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [{"name": "projects/proj/instances/i/tables/b"}]
        })))
        .expect(1)
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v2/projects/proj/instances/-/tables"))
        .and(query_param_is_missing("pageToken"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [{"name": "projects/proj/instances/i/tables/a"}],
            "nextPageToken": "t"
        })))
        .expect(1)
        .mount(server)
        .await;
}

#[tokio::test]
async fn list_walks_every_page_and_preserves_order() {
    let server = MockServer::start().await;
    mount_two_pages(&server).await;

    let cache = cache();
    let adapter = adapter(&server.uri(), &cache);
    let ctx = CancellationToken::new();

    let items = adapter.list(&ctx, &scope(), false).await.unwrap();
    let uniques: Vec<String> = items
        .iter()
        .map(|i| i.unique_attribute_value().unwrap())
        .collect();
    assert_eq!(uniques, vec!["i|a", "i|b"]);
}

#[tokio::test]
async fn list_populates_the_singular_get_keys() {
    let server = MockServer::start().await;
    mount_two_pages(&server).await;

    let cache = cache();
    let adapter = adapter(&server.uri(), &cache);
    let ctx = CancellationToken::new();

    adapter.list(&ctx, &scope(), false).await.unwrap();

    // The GET must come out of the cache: the mock server has no mock for
    // the item endpoint, so a real request would fail the lookup.
    let item = adapter.get(&ctx, &scope(), "i|a", false).await.unwrap();
    assert_eq!(item.unique_attribute_value().unwrap(), "i|a");
}

#[tokio::test]
async fn list_stream_delivers_items_incrementally() {
    let server = MockServer::start().await;
    mount_two_pages(&server).await;

    let cache = cache();
    let adapter = adapter(&server.uri(), &cache);
    let ctx = CancellationToken::new();

    let (sink, rx) = ItemSink::channel(16);
    adapter.list_stream(&ctx, &scope(), false, sink).await.unwrap();

    let (items, errors) = farsight_adapter::collect_stream(rx).await;
    assert_eq!(items.len(), 2);
    assert!(errors.is_empty());
}

#[tokio::test]
async fn items_that_fail_conversion_are_skipped_not_fatal() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v2/projects/proj/instances/-/tables"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [
                {"notAName": "first"},
                {"name": "projects/proj/instances/i/tables/ok"}
            ]
        })))
        .mount(&server)
        .await;

    let cache = cache();
    let adapter = adapter(&server.uri(), &cache);
    let ctx = CancellationToken::new();

    let items = adapter.list(&ctx, &scope(), false).await.unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].unique_attribute_value().unwrap(), "i|ok");
}

// ---------------------------------------------------------------------------
// SEARCH (reverse-lookup mode)
// ---------------------------------------------------------------------------

#[tokio::test]
async fn reverse_lookup_issues_exactly_one_get() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v2/projects/proj/instances/i/tables/t"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "name": "projects/proj/instances/i/tables/t"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let cache = cache();
    let adapter = adapter(&server.uri(), &cache);
    let ctx = CancellationToken::new();

    let items = adapter
        .search(&ctx, &scope(), "projects/proj/instances/i/tables/t", false)
        .await
        .unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].unique_attribute_value().unwrap(), "i|t");
}

#[tokio::test]
async fn reverse_lookup_with_wrong_parameter_count_is_rejected() {
    let server = MockServer::start().await;
    let cache = cache();
    let adapter = adapter(&server.uri(), &cache);
    let ctx = CancellationToken::new();

    let err = adapter
        .search(&ctx, &scope(), "projects/proj/instances/i", false)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Other);
    assert!(err.to_string().contains("expected path parameters"));
}

// ---------------------------------------------------------------------------
// Cross-references
// ---------------------------------------------------------------------------

#[tokio::test]
async fn get_decorates_items_with_linked_queries() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/instances/i-0abc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "instanceId": "i-0abc",
            "vpcId": "vpc-11aa",
            "state": "RUNNING"
        })))
        .mount(&server)
        .await;

    let mut registry = BlastRegistry::new();
    registry.register(
        "ec2-instance",
        "vpcId",
        farsight_adapter::LinkSpec {
            target_type: "ec2-vpc".into(),
            method: farsight_common::Method::Get,
            scope_kind: ScopeKind::Regional,
            unique_attribute_keys: vec![],
            blast: farsight_common::BlastPropagation::inward(),
        },
    );

    let base = server.uri();
    let descriptor = ResourceDescriptor::builder()
        .item_type("ec2-instance")
        .category("compute")
        .scope_kind(ScopeKind::Regional)
        .get_endpoint(Arc::new(move |params: &[&str]| match params {
            [id] => Some(format!("{base}/v1/instances/{id}")),
            _ => None,
        }))
        .unique_attribute_keys(vec![])
        .unique_attribute("instanceId")
        .name_selector("instanceId")
        .health(Some(farsight_dynamic::HealthTable::common("state")))
        .build();

    let instance_scope = Scope::regional("123456789012", "us-east-1");
    let adapter = DynamicAdapter::new(
        descriptor,
        HttpClient::new(reqwest::Client::new()),
        cache(),
        Arc::new(Linker::new(Arc::new(registry))),
        instance_scope.clone(),
        "farsight-test",
    );
    let ctx = CancellationToken::new();

    let item = adapter.get(&ctx, &instance_scope, "i-0abc", false).await.unwrap();
    assert_eq!(item.item_type, "ec2-instance");
    assert_eq!(item.unique_attribute, "instanceId");
    assert_eq!(item.unique_attribute_value().unwrap(), "i-0abc");
    assert_eq!(item.scope, instance_scope);
    assert_eq!(item.health, Some(farsight_common::Health::Ok));

    let link = &item.linked_item_queries[0];
    assert_eq!(link.query.item_type, "ec2-vpc");
    assert_eq!(link.query.query, "vpc-11aa");
    assert_eq!(link.query.scope.as_str(), "123456789012.us-east-1");
    assert!(link.blast.inward);
}

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cancelled_context_aborts_the_scan() {
    let server = MockServer::start().await;
    let cache = cache();
    let adapter = adapter(&server.uri(), &cache);

    let ctx = CancellationToken::new();
    ctx.cancel();

    let err = adapter.list(&ctx, &scope(), false).await.unwrap_err();
    assert!(err.to_string().contains("context cancelled"));
}
