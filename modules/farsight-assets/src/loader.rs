//! Bulk asset loader: one paginated index call fills the cache for every
//! resource family that shares the feed, under GET, LIST and SEARCH keys.
//!
//! Loads are single-flight (concurrent callers during a cold start share
//! one outbound fetch) and TTL-scoped, with the timestamp double-checked
//! inside the flight so a joiner that raced a fresh load returns without
//! fetching again.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use farsight_adapter::Linker;
use farsight_cache::{Cache, CacheKey, Group};
use farsight_common::{attrs, Item, Method, QueryError, Scope};
use farsight_dynamic::{HttpClient, HttpError};

use crate::family::AssetFamily;

const ASSETS_RESPONSE_KEY: &str = "assets";
const PAGE_TOKEN_RESPONSE_KEY: &str = "nextPageToken";
const PAGE_TOKEN_PARAM: &str = "pageToken";
const FLIGHT_KEY: &str = "load";

pub struct AssetLoader {
    client: HttpClient,
    cache: Cache,
    linker: Arc<Linker>,
    scope: Scope,
    source_name: String,
    index_url: String,
    families: Vec<AssetFamily>,
    ttl: Duration,
    last_load: Mutex<Option<Instant>>,
    flight: Group<Result<(), QueryError>>,
}

impl AssetLoader {
    pub fn new(
        client: HttpClient,
        cache: Cache,
        linker: Arc<Linker>,
        scope: Scope,
        source_name: impl Into<String>,
        index_url: impl Into<String>,
        families: Vec<AssetFamily>,
        ttl: Duration,
    ) -> Self {
        Self {
            client,
            cache,
            linker,
            scope,
            source_name: source_name.into(),
            index_url: index_url.into(),
            families,
            ttl,
            last_load: Mutex::new(None),
            flight: Group::new(),
        }
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn fresh(&self) -> bool {
        self.last_load
            .lock()
            .expect("loader timestamp lock poisoned")
            .map(|at| at.elapsed() < self.ttl)
            .unwrap_or(false)
    }

    /// Idempotent within the TTL window. Concurrent callers join one flight
    /// and share its outcome, success or failure.
    pub async fn ensure_loaded(&self, ctx: &CancellationToken) -> Result<(), QueryError> {
        if self.fresh() {
            return Ok(());
        }

        self.flight
            .work(FLIGHT_KEY, || async {
                // Double-check: a joiner that queued behind a completed load
                // must not fetch again.
                if self.fresh() {
                    return Ok(());
                }
                self.load(ctx).await?;
                *self
                    .last_load
                    .lock()
                    .expect("loader timestamp lock poisoned") = Some(Instant::now());
                Ok(())
            })
            .await
    }

    /// One full index scan. Network or parse failure of the index call fails
    /// the load; a single asset that will not convert is logged and skipped.
    async fn load(&self, ctx: &CancellationToken) -> Result<(), QueryError> {
        let mut by_family: HashMap<String, Vec<Item>> = HashMap::new();
        for family in &self.families {
            by_family.insert(family.item_type.clone(), Vec::new());
        }

        let mut page_token: Option<String> = None;
        let mut total = 0usize;

        loop {
            if ctx.is_cancelled() {
                return Err(QueryError::other("context cancelled").in_scope(&self.scope));
            }

            let url = match &page_token {
                Some(token) => with_page_token(&self.index_url, token)
                    .map_err(|e| e.in_scope(&self.scope))?,
                None => self.index_url.clone(),
            };

            let page = self
                .client
                .get_json(ctx, &url)
                .await
                .map_err(|e| self.map_http_error(e))?;

            for asset in page
                .get(ASSETS_RESPONSE_KEY)
                .and_then(Value::as_array)
                .into_iter()
                .flatten()
            {
                total += 1;
                if let Some((family, item)) = self.convert(asset) {
                    self.store_single(&item);
                    by_family
                        .entry(family)
                        .or_default()
                        .push(item);
                }
            }

            page_token = page
                .get(PAGE_TOKEN_RESPONSE_KEY)
                .and_then(attrs::scalar_to_string)
                .filter(|t| !t.is_empty());
            if page_token.is_none() {
                break;
            }
        }

        // LIST keys: full per-family lists, or an authoritative empty.
        for family in &self.families {
            let items = by_family.remove(&family.item_type).unwrap_or_default();
            let list_key = CacheKey::new(
                &self.source_name,
                Method::List,
                self.scope.clone(),
                &family.item_type,
                "",
            );
            if items.is_empty() {
                self.cache.store_error(
                    &list_key,
                    QueryError::not_found(format!(
                        "no {} present in the asset index",
                        family.item_type
                    ))
                    .in_scope(&self.scope),
                    self.ttl,
                );
            } else {
                debug!(
                    item_type = %family.item_type,
                    count = items.len(),
                    "Asset family loaded"
                );
                self.cache.store_items(&list_key, items, self.ttl);
            }
        }

        info!(scope = %self.scope, assets = total, "Asset index load complete");
        Ok(())
    }

    /// Match an asset to its family and normalise it. The resource document
    /// lives under `resource.data`; the top-level asset name backfills a
    /// missing name attribute.
    fn convert(&self, asset: &Value) -> Option<(String, Item)> {
        let asset_type = asset.get("assetType").and_then(Value::as_str)?;
        let family = self
            .families
            .iter()
            .find(|f| f.asset_type == asset_type)?;

        let mut body = attrs::get_path(asset, "resource.data")
            .cloned()
            .unwrap_or(Value::Null);
        if let (Value::Object(map), Some(asset_name)) =
            (&mut body, asset.get("name").and_then(Value::as_str))
        {
            map.entry(family.name_selector.clone())
                .or_insert_with(|| Value::String(asset_name.to_string()));
        }

        match family.normaliser().render(&self.linker, &self.scope, body) {
            Ok(item) => Some((family.item_type.clone(), item)),
            Err(e) => {
                warn!(
                    asset_type,
                    error = %e,
                    "Skipping asset that failed conversion"
                );
                None
            }
        }
    }

    /// Store one item under its GET key and its full-path SEARCH key, so a
    /// later query via either method hits.
    fn store_single(&self, item: &Item) {
        let Some(unique) = item.unique_attribute_value() else {
            return;
        };
        let get_key = CacheKey::new(
            &self.source_name,
            Method::Get,
            self.scope.clone(),
            &item.item_type,
            &unique,
        );
        self.cache.store_items(&get_key, vec![item.clone()], self.ttl);

        if let Some(full_name) = item
            .attributes
            .get("name")
            .and_then(attrs::scalar_to_string)
        {
            let search_key = get_key.with_method(Method::Search, full_name);
            self.cache.store_items(&search_key, vec![item.clone()], self.ttl);
        }
    }

    fn map_http_error(&self, err: HttpError) -> QueryError {
        match err {
            HttpError::Status { status, body } if status == 401 || status == 403 => {
                QueryError::from_permission(farsight_common::PermissionError { status, body })
                    .in_scope(&self.scope)
            }
            HttpError::Status { status, body } => {
                QueryError::other(format!("asset index returned {status}: {body}"))
                    .in_scope(&self.scope)
            }
            HttpError::Timeout(msg) => QueryError::timeout(msg).in_scope(&self.scope),
            HttpError::Cancelled => QueryError::other("context cancelled").in_scope(&self.scope),
            HttpError::Transport(msg) | HttpError::Decode(msg) => {
                QueryError::other(msg).in_scope(&self.scope)
            }
        }
    }
}

fn with_page_token(base: &str, token: &str) -> Result<String, QueryError> {
    let mut url = Url::parse(base)
        .map_err(|e| QueryError::other(format!("invalid index URL {base}: {e}")))?;
    url.query_pairs_mut().append_pair(PAGE_TOKEN_PARAM, token);
    Ok(url.to_string())
}
