//! Dynamic prefix router over storage backends.
//!
//! Routes resolve by first-match prefix in installation order: the most
//! recently prepended route whose prefix matches wins, regardless of prefix
//! length. A more specific route therefore has to be installed after the
//! broader one to take precedence.
//!
//! The route list is copy-on-write: lookups clone an `Arc` snapshot and can
//! never observe a torn list, while mutations from reconciler callbacks are
//! serialized by the lock.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{info, warn};

use crate::backend::file::BackendFile;
use crate::backend::ObjectFs;
use crate::context::RequestContext;
use crate::error::{DienerError, Result};

/// One installed route: a URL prefix backed by a storage backend.
#[derive(Clone)]
pub struct Route {
    pub prefix: String,
    pub backend: Arc<dyn ObjectFs>,
}

pub struct DynamicRouter {
    routes: RwLock<Arc<Vec<Route>>>,
}

impl DynamicRouter {
    pub fn new() -> Self {
        Self {
            routes: RwLock::new(Arc::new(Vec::new())),
        }
    }

    /// Install a route at the front. No deduplication.
    pub fn prepend(&self, route: Route) {
        let mut routes = self.routes.write();
        info!(prefix = %route.prefix, "prepend route");
        let mut next = Vec::with_capacity(routes.len() + 1);
        next.push(route);
        next.extend(routes.iter().cloned());
        *routes = Arc::new(next);
    }

    /// Remove the first route whose prefix equals `prefix` exactly,
    /// returning it. Prefix matching plays no part here.
    pub fn delete(&self, prefix: &str) -> Option<Route> {
        let mut routes = self.routes.write();
        match routes.iter().position(|route| route.prefix == prefix) {
            Some(index) => {
                let mut next: Vec<Route> = routes.as_ref().clone();
                let removed = next.remove(index);
                *routes = Arc::new(next);
                info!(prefix, "delete route");
                Some(removed)
            }
            None => {
                info!(prefix, "route not found for delete");
                None
            }
        }
    }

    /// A cheap view carrying a per-request context. The route list is
    /// shared: mutations are visible through existing views.
    pub fn with_context(self: &Arc<Self>, ctx: RequestContext) -> RouterView {
        RouterView {
            router: Arc::clone(self),
            ctx,
        }
    }

    pub fn len(&self) -> usize {
        self.routes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn snapshot(&self) -> Arc<Vec<Route>> {
        Arc::clone(&self.routes.read())
    }
}

impl Default for DynamicRouter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ObjectFs for DynamicRouter {
    /// Resolve `name` to the first matching route, strip the prefix exactly
    /// once, and delegate to the backend.
    async fn open(&self, name: &str, ctx: &RequestContext) -> Result<BackendFile> {
        let routes = self.snapshot();
        for route in routes.iter() {
            if let Some(stripped) = name.strip_prefix(&route.prefix) {
                return route.backend.open(stripped, ctx).await;
            }
        }
        warn!(name, "no route found");
        Err(DienerError::NotFound(name.to_string()))
    }
}

/// A router view bound to one request's context.
pub struct RouterView {
    router: Arc<DynamicRouter>,
    ctx: RequestContext,
}

impl RouterView {
    pub async fn open(&self, name: &str) -> Result<BackendFile> {
        self.router.open(name, &self.ctx).await
    }
}
