use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use farsight_common::{Item, Method, QueryError, Scope};

use crate::metadata::AdapterMetadata;
use crate::stream::ItemSink;

/// The uniform capability surface every adapter exposes: a GET within the
/// scopes it declares. LIST and SEARCH are separate capability traits so the
/// engine can ask for each at registration.
///
/// Contract: `get` on a scope in `scopes()` must attempt fulfilment and
/// return NOTFOUND/OTHER, never NOSCOPE; LIST/SEARCH on any other scope must
/// return NOSCOPE. Adapters are invoked concurrently and must be thread-safe.
#[async_trait]
pub trait Adapter: Send + Sync {
    fn item_type(&self) -> &str;

    fn scopes(&self) -> Vec<Scope>;

    fn metadata(&self) -> AdapterMetadata;

    async fn get(
        &self,
        ctx: &CancellationToken,
        scope: &Scope,
        query: &str,
        ignore_cache: bool,
    ) -> Result<Item, QueryError>;
}

#[async_trait]
pub trait ListableAdapter: Adapter {
    async fn list(
        &self,
        ctx: &CancellationToken,
        scope: &Scope,
        ignore_cache: bool,
    ) -> Result<Vec<Item>, QueryError>;

    /// Stream items as they surface. The default collects then forwards;
    /// adapters with paginated backends override to deliver the first page
    /// without waiting for the last.
    async fn list_stream(
        &self,
        ctx: &CancellationToken,
        scope: &Scope,
        ignore_cache: bool,
        sink: ItemSink,
    ) -> Result<(), QueryError> {
        match self.list(ctx, scope, ignore_cache).await {
            Ok(items) => {
                for item in items {
                    sink.send_item(item).await?;
                }
                Ok(())
            }
            Err(e) => {
                sink.send_error(e.clone()).await?;
                Err(e)
            }
        }
    }
}

#[async_trait]
pub trait SearchableAdapter: Adapter {
    async fn search(
        &self,
        ctx: &CancellationToken,
        scope: &Scope,
        query: &str,
        ignore_cache: bool,
    ) -> Result<Vec<Item>, QueryError>;

    async fn search_stream(
        &self,
        ctx: &CancellationToken,
        scope: &Scope,
        query: &str,
        ignore_cache: bool,
        sink: ItemSink,
    ) -> Result<(), QueryError> {
        match self.search(ctx, scope, query, ignore_cache).await {
            Ok(items) => {
                for item in items {
                    sink.send_item(item).await?;
                }
                Ok(())
            }
            Err(e) => {
                sink.send_error(e.clone()).await?;
                Err(e)
            }
        }
    }
}

/// One registered adapter plus the capabilities it opted into. The four
/// flavours (Standard / Listable / Searchable / SearchableListable) are the
/// four constructor shapes; the engine only ever asks the handle.
#[derive(Clone)]
pub struct AdapterHandle {
    base: Arc<dyn Adapter>,
    listable: Option<Arc<dyn ListableAdapter>>,
    searchable: Option<Arc<dyn SearchableAdapter>>,
}

impl AdapterHandle {
    pub fn standard<A>(adapter: Arc<A>) -> Self
    where
        A: Adapter + 'static,
    {
        Self {
            base: adapter,
            listable: None,
            searchable: None,
        }
    }

    pub fn listable<A>(adapter: Arc<A>) -> Self
    where
        A: ListableAdapter + 'static,
    {
        Self {
            base: adapter.clone(),
            listable: Some(adapter),
            searchable: None,
        }
    }

    pub fn searchable<A>(adapter: Arc<A>) -> Self
    where
        A: SearchableAdapter + 'static,
    {
        Self {
            base: adapter.clone(),
            listable: None,
            searchable: Some(adapter),
        }
    }

    pub fn searchable_listable<A>(adapter: Arc<A>) -> Self
    where
        A: ListableAdapter + SearchableAdapter + 'static,
    {
        Self {
            base: adapter.clone(),
            listable: Some(adapter.clone()),
            searchable: Some(adapter),
        }
    }

    pub fn item_type(&self) -> &str {
        self.base.item_type()
    }

    pub fn scopes(&self) -> Vec<Scope> {
        self.base.scopes()
    }

    pub fn serves(&self, scope: &Scope) -> bool {
        self.base.scopes().iter().any(|s| s == scope)
    }

    pub fn metadata(&self) -> AdapterMetadata {
        self.base.metadata()
    }

    pub fn supported_methods(&self) -> Vec<Method> {
        let mut methods = vec![Method::Get];
        if self.listable.is_some() {
            methods.push(Method::List);
        }
        if self.searchable.is_some() {
            methods.push(Method::Search);
        }
        methods
    }

    pub fn base(&self) -> &Arc<dyn Adapter> {
        &self.base
    }

    pub fn as_listable(&self) -> Option<&Arc<dyn ListableAdapter>> {
        self.listable.as_ref()
    }

    pub fn as_searchable(&self) -> Option<&Arc<dyn SearchableAdapter>> {
        self.searchable.as_ref()
    }
}
