//! Adapters served entirely out of the bulk-loaded cache.
//!
//! Every method follows the same shape: check the cache, release the fill
//! token *before* triggering a load (holding it across `ensure_loaded` would
//! self-deadlock the re-check), load, check again, and only then declare the
//! resource absent.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use farsight_adapter::{Adapter, AdapterHandle, AdapterMetadata, ListableAdapter, SearchableAdapter};
use farsight_cache::{CacheKey, Lookup};
use farsight_common::{Item, Method, QueryError, Scope};

use crate::family::AssetFamily;
use crate::loader::AssetLoader;

pub struct AssetBackedAdapter {
    family: AssetFamily,
    loader: Arc<AssetLoader>,
}

impl AssetBackedAdapter {
    pub fn new(family: AssetFamily, loader: Arc<AssetLoader>) -> Self {
        Self { family, loader }
    }

    pub fn into_handle(self) -> AdapterHandle {
        AdapterHandle::searchable_listable(Arc::new(self))
    }

    fn key(&self, method: Method, query: &str) -> CacheKey {
        CacheKey::new(
            self.loader.source_name(),
            method,
            self.loader.scope().clone(),
            &self.family.item_type,
            query,
        )
    }

    fn check_scope(&self, scope: &Scope) -> Result<(), QueryError> {
        if scope == self.loader.scope() {
            Ok(())
        } else {
            Err(QueryError::no_scope(
                scope,
                format!(
                    "adapter for {} serves scope {}",
                    self.family.item_type,
                    self.loader.scope()
                ),
            ))
        }
    }

    /// Cache → load → cache again → authoritative miss.
    async fn through_loader(
        &self,
        ctx: &CancellationToken,
        method: Method,
        query: &str,
        ignore_cache: bool,
    ) -> Result<Vec<Item>, QueryError> {
        let key = self.key(method, query);

        if !ignore_cache {
            match self.loader.cache().lookup(&key, false).await {
                Lookup::Hit(payload) => return payload,
                Lookup::Miss(token) => token.abandon(),
            }
        }

        self.loader.ensure_loaded(ctx).await?;

        match self.loader.cache().lookup(&key, false).await {
            Lookup::Hit(payload) => payload,
            Lookup::Miss(token) => {
                let err = QueryError::not_found(format!(
                    "{} {query} not present in the asset index (it may not exist yet, or the index may have an indexing delay)",
                    self.family.item_type
                ))
                .in_scope(self.loader.scope());
                token.complete_error(err.clone(), self.loader.ttl());
                Err(err)
            }
        }
    }
}

#[async_trait]
impl Adapter for AssetBackedAdapter {
    fn item_type(&self) -> &str {
        &self.family.item_type
    }

    fn scopes(&self) -> Vec<Scope> {
        vec![self.loader.scope().clone()]
    }

    fn metadata(&self) -> AdapterMetadata {
        AdapterMetadata {
            supported_methods: vec![Method::Get, Method::List, Method::Search],
            category: "asset-index".to_string(),
            get_description: format!(
                "GET {} by {}",
                self.family.item_type,
                self.family.unique_attribute_keys.join("|")
            ),
            list_description: Some(format!(
                "LIST all {} known to the asset index",
                self.family.item_type
            )),
            search_description: Some(format!(
                "SEARCH {} by full resource path",
                self.family.item_type
            )),
            ..AdapterMetadata::default()
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
        let items = self
            .through_loader(ctx, Method::Get, query, ignore_cache)
            .await?;
        items.into_iter().next().ok_or_else(|| {
            QueryError::not_found(format!("{query} not found")).in_scope(self.loader.scope())
        })
    }
}

#[async_trait]
impl ListableAdapter for AssetBackedAdapter {
    async fn list(
        &self,
        ctx: &CancellationToken,
        scope: &Scope,
        ignore_cache: bool,
    ) -> Result<Vec<Item>, QueryError> {
        self.check_scope(scope)?;
        self.through_loader(ctx, Method::List, "", ignore_cache).await
    }
}

#[async_trait]
impl SearchableAdapter for AssetBackedAdapter {
    async fn search(
        &self,
        ctx: &CancellationToken,
        scope: &Scope,
        query: &str,
        ignore_cache: bool,
    ) -> Result<Vec<Item>, QueryError> {
        self.check_scope(scope)?;
        self.through_loader(ctx, Method::Search, query, ignore_cache)
            .await
    }
}
