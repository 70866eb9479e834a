//! The adapter the framework materialises from a [`ResourceDescriptor`].
//!
//! One instance serves one concrete scope. GET resolves a canonical
//! `|`-joined query against the resource endpoint; LIST and SEARCH walk the
//! remote API's `nextPageToken` pagination, preserving server order and
//! delivering partial results up to a page failure. Every fetch goes through
//! the shared cache, negatives included.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

use farsight_adapter::{
    Adapter, AdapterHandle, AdapterMetadata, ItemSink, Linker, ListableAdapter, SearchableAdapter,
};
use farsight_cache::{Cache, CacheKey, Lookup};
use farsight_common::{
    attrs, join_unique, split_unique, Item, Method, PermissionError, QueryError, Scope,
};

use crate::descriptor::{Flavour, ResourceDescriptor};
use crate::http::{HttpClient, HttpError};
use crate::normalise::external_to_item;

const PAGE_TOKEN_RESPONSE_KEY: &str = "nextPageToken";
const PAGE_TOKEN_PARAM: &str = "pageToken";
const FALLBACK_LIST_SELECTOR: &str = "items";

pub struct DynamicAdapter {
    descriptor: ResourceDescriptor,
    client: HttpClient,
    cache: Cache,
    linker: Arc<Linker>,
    scope: Scope,
    source_name: String,
}

impl DynamicAdapter {
    pub fn new(
        descriptor: ResourceDescriptor,
        client: HttpClient,
        cache: Cache,
        linker: Arc<Linker>,
        scope: Scope,
        source_name: impl Into<String>,
    ) -> Self {
        Self {
            descriptor,
            client,
            cache,
            linker,
            scope,
            source_name: source_name.into(),
        }
    }

    /// Wrap into a registration handle exposing exactly the capabilities the
    /// descriptor's flavour grants.
    pub fn into_handle(self) -> AdapterHandle {
        let flavour = self.descriptor.flavour();
        let adapter = Arc::new(self);
        match flavour {
            Flavour::Standard => AdapterHandle::standard(adapter),
            Flavour::Listable => AdapterHandle::listable(adapter),
            Flavour::Searchable => AdapterHandle::searchable(adapter),
            Flavour::SearchableListable => AdapterHandle::searchable_listable(adapter),
        }
    }

    pub fn descriptor(&self) -> &ResourceDescriptor {
        &self.descriptor
    }

    fn key(&self, method: Method, query: &str) -> CacheKey {
        CacheKey::new(
            &self.source_name,
            method,
            self.scope.clone(),
            &self.descriptor.item_type,
            query,
        )
    }

    fn check_scope(&self, scope: &Scope) -> Result<(), QueryError> {
        if scope == &self.scope {
            Ok(())
        } else {
            Err(QueryError::no_scope(
                scope,
                format!(
                    "adapter for {} serves scope {}",
                    self.descriptor.item_type, self.scope
                ),
            ))
        }
    }

    fn map_http_error(&self, err: HttpError) -> QueryError {
        match err {
            HttpError::Status { status: 404, body } => {
                QueryError::not_found(format!("remote API returned 404: {body}"))
                    .in_scope(&self.scope)
            }
            HttpError::Status { status, body } if status == 401 || status == 403 => {
                QueryError::from_permission(PermissionError { status, body }).in_scope(&self.scope)
            }
            HttpError::Status { status, body } => {
                QueryError::other(format!("remote API returned {status}: {body}"))
                    .in_scope(&self.scope)
            }
            HttpError::Timeout(msg) => QueryError::timeout(msg).in_scope(&self.scope),
            HttpError::Cancelled => {
                QueryError::other("context cancelled").in_scope(&self.scope)
            }
            HttpError::Transport(msg) | HttpError::Decode(msg) => {
                QueryError::other(msg).in_scope(&self.scope)
            }
        }
    }

    /// Negatives worth remembering: a 404 or a permission failure is
    /// authoritative for the TTL window; everything else is transient.
    fn cacheable(err: &QueryError) -> bool {
        matches!(
            err.kind(),
            farsight_common::ErrorKind::NotFound | farsight_common::ErrorKind::NotPermitted
        )
    }

    async fn fetch_one(&self, ctx: &CancellationToken, url: &str) -> Result<Item, QueryError> {
        let body = self
            .client
            .get_json(ctx, url)
            .await
            .map_err(|e| self.map_http_error(e))?;
        external_to_item(&self.descriptor, &self.linker, &self.scope, body)
    }

    /// Paginated scan shared by LIST and native SEARCH. Items are appended in
    /// server order and forwarded to `sink` as each page yields them; a page
    /// failure returns the items collected so far alongside the error.
    async fn paginate(
        &self,
        ctx: &CancellationToken,
        base_url: &str,
        sink: Option<&ItemSink>,
    ) -> (Vec<Item>, Option<QueryError>) {
        let mut items = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            if ctx.is_cancelled() {
                return (
                    items,
                    Some(QueryError::other("context cancelled").in_scope(&self.scope)),
                );
            }

            let url = match &page_token {
                Some(token) => match with_page_token(base_url, token) {
                    Ok(url) => url,
                    Err(e) => return (items, Some(e.in_scope(&self.scope))),
                },
                None => base_url.to_string(),
            };

            let page = match self.client.get_json(ctx, &url).await {
                Ok(page) => page,
                Err(e) => return (items, Some(self.map_http_error(e))),
            };

            for raw in page_items(&page, &self.descriptor.list_response_selector) {
                match external_to_item(&self.descriptor, &self.linker, &self.scope, raw.clone()) {
                    Ok(item) => {
                        if let Some(unique) = item.unique_attribute_value() {
                            self.cache.store_items(
                                &self.key(Method::Get, &unique),
                                vec![item.clone()],
                                self.cache.default_ttl(),
                            );
                        }
                        if let Some(sink) = sink {
                            if sink.send_item(item.clone()).await.is_err() {
                                // Consumer gone; keep what we have for the cache.
                                return (items, None);
                            }
                        }
                        items.push(item);
                    }
                    Err(e) => {
                        warn!(
                            item_type = %self.descriptor.item_type,
                            error = %e,
                            "Skipping item that failed conversion"
                        );
                        if let Some(sink) = sink {
                            let _ = sink.send_error(e).await;
                        }
                    }
                }
            }

            page_token = page
                .get(PAGE_TOKEN_RESPONSE_KEY)
                .and_then(attrs::scalar_to_string)
                .filter(|token| !token.is_empty());
            if page_token.is_none() {
                return (items, None);
            }
        }
    }

    /// Cache-through scan for LIST and native SEARCH.
    async fn scan(
        &self,
        ctx: &CancellationToken,
        method: Method,
        cache_query: &str,
        base_url: Option<String>,
        ignore_cache: bool,
        sink: Option<&ItemSink>,
    ) -> Result<Vec<Item>, QueryError> {
        let key = self.key(method, cache_query);

        match self.cache.lookup(&key, ignore_cache).await {
            Lookup::Hit(Ok(items)) => {
                debug!(item_type = %self.descriptor.item_type, %method, "Cache hit");
                if let Some(sink) = sink {
                    for item in &items {
                        if sink.send_item(item.clone()).await.is_err() {
                            break;
                        }
                    }
                }
                Ok(items)
            }
            Lookup::Hit(Err(e)) => {
                if let Some(sink) = sink {
                    let _ = sink.send_error(e.clone()).await;
                }
                Err(e)
            }
            Lookup::Miss(token) => {
                let base_url = match base_url {
                    Some(url) => url,
                    None => {
                        token.abandon();
                        return Err(QueryError::other(format!(
                            "cannot build {method} endpoint for {}",
                            self.descriptor.describe_get()
                        ))
                        .in_scope(&self.scope));
                    }
                };

                let (items, failure) = self.paginate(ctx, &base_url, sink).await;
                match failure {
                    None => {
                        token.complete_items(items.clone(), self.cache.default_ttl());
                        Ok(items)
                    }
                    Some(e) => {
                        // Partial results up to the failure are still served
                        // from cache; the caller sees the error.
                        if items.is_empty() && Self::cacheable(&e) {
                            token.complete_error(e.clone(), self.cache.default_ttl());
                        } else if !items.is_empty() {
                            token.complete_items(items, self.cache.default_ttl());
                        } else {
                            token.abandon();
                        }
                        if let Some(sink) = sink {
                            let _ = sink.send_error(e.clone()).await;
                        }
                        Err(e)
                    }
                }
            }
        }
    }

    fn build_list_url(&self) -> Option<String> {
        self.descriptor.list_endpoint.as_ref().and_then(|b| b(&[]))
    }

    fn build_search_url(&self, query: &str) -> Option<String> {
        self.descriptor
            .search_endpoint
            .as_ref()
            .and_then(|b| b(&[query]))
    }

    /// Terraform-style reverse lookup: a full resource path is reduced to the
    /// canonical query and answered by GET.
    async fn reverse_lookup(
        &self,
        ctx: &CancellationToken,
        query: &str,
        ignore_cache: bool,
    ) -> Result<Vec<Item>, QueryError> {
        let keys = &self.descriptor.unique_attribute_keys;
        let params = attrs::extract_path_params_strict(query, keys).ok_or_else(|| {
            QueryError::other(format!(
                "reverse lookup {query} does not carry the {} expected path parameters ({})",
                keys.len(),
                keys.join(", ")
            ))
            .in_scope(&self.scope)
        })?;
        let canonical = join_unique(&params).map_err(|e| e.in_scope(&self.scope))?;
        let item = self.get(ctx, &self.scope.clone(), &canonical, ignore_cache).await?;
        Ok(vec![item])
    }
}

#[async_trait]
impl Adapter for DynamicAdapter {
    fn item_type(&self) -> &str {
        &self.descriptor.item_type
    }

    fn scopes(&self) -> Vec<Scope> {
        vec![self.scope.clone()]
    }

    fn metadata(&self) -> AdapterMetadata {
        let flavour = self.descriptor.flavour();
        let mut supported_methods = vec![Method::Get];
        if matches!(flavour, Flavour::Listable | Flavour::SearchableListable) {
            supported_methods.push(Method::List);
        }
        if matches!(flavour, Flavour::Searchable | Flavour::SearchableListable) {
            supported_methods.push(Method::Search);
        }
        AdapterMetadata {
            supported_methods,
            category: self.descriptor.category.clone(),
            get_description: self.descriptor.describe_get(),
            list_description: self
                .descriptor
                .list_endpoint
                .as_ref()
                .map(|_| format!("LIST all {} in scope", self.descriptor.item_type)),
            search_description: self.descriptor.search_endpoint.as_ref().map(|_| {
                format!(
                    "SEARCH {} by query or full resource path",
                    self.descriptor.item_type
                )
            }),
            potential_links: self.descriptor.potential_links.clone(),
            terraform_mappings: self.descriptor.terraform_mappings.clone(),
            iam_permissions: self.descriptor.iam_permissions.clone(),
            in_development: self.descriptor.in_development,
        }
    }

    async fn get(
        &self,
        ctx: &CancellationToken,
        scope: &Scope,
        query: &str,
        ignore_cache: bool,
    ) -> Result<Item, QueryError> {
        self.check_scope(scope)?;
        let key = self.key(Method::Get, query);

        let token = match self.cache.lookup(&key, ignore_cache).await {
            Lookup::Hit(Ok(items)) => {
                return items.into_iter().next().ok_or_else(|| {
                    QueryError::not_found(format!("{query} not found")).in_scope(&self.scope)
                })
            }
            Lookup::Hit(Err(e)) => return Err(e),
            Lookup::Miss(token) => token,
        };

        let params = split_unique(query);
        let url = match (self.descriptor.get_endpoint)(&params) {
            Some(url) => url,
            None => {
                token.abandon();
                return Err(QueryError::other(format!(
                    "cannot build GET endpoint from '{query}' ({})",
                    self.descriptor.describe_get()
                ))
                .in_scope(&self.scope));
            }
        };

        match self.fetch_one(ctx, &url).await {
            Ok(item) => {
                token.complete_item(item.clone(), self.cache.default_ttl());
                Ok(item)
            }
            Err(e) => {
                if Self::cacheable(&e) {
                    token.complete_error(e.clone(), self.cache.default_ttl());
                } else {
                    token.abandon();
                }
                Err(e)
            }
        }
    }
}

#[async_trait]
impl ListableAdapter for DynamicAdapter {
    async fn list(
        &self,
        ctx: &CancellationToken,
        scope: &Scope,
        ignore_cache: bool,
    ) -> Result<Vec<Item>, QueryError> {
        self.check_scope(scope)?;
        self.scan(ctx, Method::List, "", self.build_list_url(), ignore_cache, None)
            .await
    }

    async fn list_stream(
        &self,
        ctx: &CancellationToken,
        scope: &Scope,
        ignore_cache: bool,
        sink: ItemSink,
    ) -> Result<(), QueryError> {
        self.check_scope(scope)?;
        self.scan(
            ctx,
            Method::List,
            "",
            self.build_list_url(),
            ignore_cache,
            Some(&sink),
        )
        .await
        .map(|_| ())
    }
}

#[async_trait]
impl SearchableAdapter for DynamicAdapter {
    async fn search(
        &self,
        ctx: &CancellationToken,
        scope: &Scope,
        query: &str,
        ignore_cache: bool,
    ) -> Result<Vec<Item>, QueryError> {
        self.check_scope(scope)?;

        if let Some(prefix) = &self.descriptor.reverse_lookup_prefix {
            if query.starts_with(prefix.as_str()) {
                return self.reverse_lookup(ctx, query, ignore_cache).await;
            }
        }

        self.scan(
            ctx,
            Method::Search,
            query,
            self.build_search_url(query),
            ignore_cache,
            None,
        )
        .await
    }

    async fn search_stream(
        &self,
        ctx: &CancellationToken,
        scope: &Scope,
        query: &str,
        ignore_cache: bool,
        sink: ItemSink,
    ) -> Result<(), QueryError> {
        self.check_scope(scope)?;

        if let Some(prefix) = &self.descriptor.reverse_lookup_prefix {
            if query.starts_with(prefix.as_str()) {
                match self.reverse_lookup(ctx, query, ignore_cache).await {
                    Ok(items) => {
                        for item in items {
                            sink.send_item(item).await?;
                        }
                        return Ok(());
                    }
                    Err(e) => {
                        let _ = sink.send_error(e.clone()).await;
                        return Err(e);
                    }
                }
            }
        }

        self.scan(
            ctx,
            Method::Search,
            query,
            self.build_search_url(query),
            ignore_cache,
            Some(&sink),
        )
        .await
        .map(|_| ())
    }
}

/// Locate the items array in a page, honouring the declared selector with a
/// fallback to the conventional `items` key. An absent array is an empty page.
fn page_items<'a>(page: &'a Value, selector: &str) -> Vec<&'a Value> {
    let array = attrs::get_path(page, selector)
        .or_else(|| page.get(FALLBACK_LIST_SELECTOR))
        .and_then(Value::as_array);
    match array {
        Some(values) => values.iter().collect(),
        None => Vec::new(),
    }
}

fn with_page_token(base: &str, token: &str) -> Result<String, QueryError> {
    let mut url = Url::parse(base)
        .map_err(|e| QueryError::other(format!("invalid endpoint URL {base}: {e}")))?;
    url.query_pairs_mut().append_pair(PAGE_TOKEN_PARAM, token);
    Ok(url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn page_items_honours_selector_with_fallback() {
        let page = json!({"resources": [{"name": "a"}], "items": [{"name": "b"}]});
        let via_selector = page_items(&page, "resources");
        assert_eq!(via_selector.len(), 1);
        assert_eq!(via_selector[0], &json!({"name": "a"}));

        let fallback = page_items(&page, "missing");
        assert_eq!(fallback.len(), 1);
        assert_eq!(fallback[0], &json!({"name": "b"}));

        assert!(page_items(&json!({}), "missing").is_empty());
    }

    #[test]
    fn page_token_is_appended_and_encoded() {
        let url = with_page_token("http://example.com/v1/things?alt=json", "a b+c").unwrap();
        assert!(url.starts_with("http://example.com/v1/things?alt=json&pageToken="));
        assert!(!url.contains("a b"));
    }
}
