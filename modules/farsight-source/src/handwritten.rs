//! Hand-written adapters that coexist with the dynamic ones in the same
//! registry. The HTTP prober is the generic network primitive: GET an
//! endpoint, describe what came back.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use farsight_adapter::{Adapter, AdapterHandle, AdapterMetadata};
use farsight_cache::{Cache, CacheKey, Lookup};
use farsight_common::{Health, Item, Method, QueryError, Scope};

pub struct HttpAdapter {
    client: reqwest::Client,
    cache: Cache,
    scope: Scope,
    source_name: String,
}

impl HttpAdapter {
    pub fn new(client: reqwest::Client, cache: Cache, scope: Scope, source_name: &str) -> Self {
        Self {
            client,
            cache,
            scope,
            source_name: source_name.to_string(),
        }
    }

    pub fn into_handle(self) -> AdapterHandle {
        AdapterHandle::standard(Arc::new(self))
    }

    async fn probe(&self, ctx: &CancellationToken, url: &str) -> Result<Item, QueryError> {
        let response = tokio::select! {
            _ = ctx.cancelled() => {
                return Err(QueryError::other("context cancelled").in_scope(&self.scope))
            }
            result = self.client.get(url).send() => result.map_err(|e| {
                if e.is_timeout() {
                    QueryError::timeout(e.to_string()).in_scope(&self.scope)
                } else {
                    QueryError::other(format!("probe failed: {e}")).in_scope(&self.scope)
                }
            })?,
        };

        let status = response.status();
        let mut attributes = Map::new();
        attributes.insert("status".to_string(), Value::from(status.as_u16()));
        if let Some(server) = response
            .headers()
            .get(reqwest::header::SERVER)
            .and_then(|v| v.to_str().ok())
        {
            attributes.insert("server".to_string(), Value::String(server.to_string()));
        }
        if let Some(content_type) = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
        {
            attributes.insert(
                "contentType".to_string(),
                Value::String(content_type.to_string()),
            );
        }

        let mut item = Item::new("http", self.scope.clone(), "url", &[url], attributes)
            .map_err(|e| e.in_scope(&self.scope))?;
        item.health = Some(if status.is_success() {
            Health::Ok
        } else if status.is_server_error() {
            Health::Error
        } else {
            Health::Warning
        });
        Ok(item)
    }
}

#[async_trait]
impl Adapter for HttpAdapter {
    fn item_type(&self) -> &str {
        "http"
    }

    fn scopes(&self) -> Vec<Scope> {
        vec![self.scope.clone()]
    }

    fn metadata(&self) -> AdapterMetadata {
        AdapterMetadata {
            supported_methods: vec![Method::Get],
            category: "network".to_string(),
            get_description: "GET an HTTP endpoint by URL and describe the response".to_string(),
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
        if scope != &self.scope {
            return Err(QueryError::no_scope(
                scope,
                format!("http adapter serves scope {}", self.scope),
            ));
        }

        let key = CacheKey::new(
            &self.source_name,
            Method::Get,
            self.scope.clone(),
            "http",
            query,
        );
        let token = match self.cache.lookup(&key, ignore_cache).await {
            Lookup::Hit(Ok(items)) => {
                return items.into_iter().next().ok_or_else(|| {
                    QueryError::not_found(format!("{query} not found")).in_scope(&self.scope)
                })
            }
            Lookup::Hit(Err(e)) => return Err(e),
            Lookup::Miss(token) => token,
        };

        if !query.starts_with("http://") && !query.starts_with("https://") {
            token.abandon();
            return Err(QueryError::other(format!(
                "http adapter queries must be absolute URLs, got '{query}'"
            ))
            .in_scope(&self.scope));
        }

        match self.probe(ctx, query).await {
            Ok(item) => {
                token.complete_item(item.clone(), self.cache.default_ttl());
                Ok(item)
            }
            Err(e) => {
                token.abandon();
                Err(e)
            }
        }
    }
}
