//! Per-namespace ingress watching and route translation.
//!
//! Each watcher turns the ingress events of one namespace into route
//! installs and removals on the dynamic router. Only paths whose backend
//! resource reference names the recognized `S3Backend` kind participate;
//! everything else is skipped silently. A failure to resolve or construct
//! one path's backend never aborts the rest of the ingress.
//!
//! The handler records, per ingress UID, the last-applied spec and the
//! prefixes it installed. Updates compare specs field-by-field and replay as
//! delete-then-add; deletes replay the recorded prefixes, so they work even
//! when the delete payload is sparse.

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use k8s_openapi::api::networking::v1::{Ingress, IngressSpec};
use kube::api::Api;
use kube::runtime::watcher;
use kube::{Client, ResourceExt};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::crd::{S3Backend, S3BackendSpec, BACKEND_KIND, GROUP};
use crate::backend::s3::StorageBackend;
use crate::cache::ObjectCache;
use crate::config::S3BackendConfig;
use crate::error::Result;
use crate::router::{DynamicRouter, Route};

/// Resolves an ingress path's backend reference to the declared spec.
#[async_trait]
pub trait BackendResolver: Send + Sync {
    async fn resolve(&self, namespace: &str, name: &str) -> Result<S3BackendSpec>;
}

/// Resolver backed by the cluster's `s3backends` API.
pub struct KubeBackendResolver {
    client: Client,
}

impl KubeBackendResolver {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl BackendResolver for KubeBackendResolver {
    async fn resolve(&self, namespace: &str, name: &str) -> Result<S3BackendSpec> {
        let api: Api<S3Backend> = Api::namespaced(self.client.clone(), namespace);
        let resource = api.get(name).await?;
        Ok(resource.spec)
    }
}

/// A qualifying ingress path: URL prefix plus the referenced backend name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct BackendPath {
    pub prefix: String,
    pub backend_name: String,
}

/// Extract the paths of an ingress that reference the recognized backend
/// kind. Paths with a service backend, a foreign API group, another kind,
/// or no path string are skipped silently.
pub(crate) fn qualifying_paths(ingress: &Ingress) -> Vec<BackendPath> {
    let mut paths = Vec::new();
    let Some(spec) = &ingress.spec else {
        return paths;
    };
    for rule in spec.rules.iter().flatten() {
        let Some(http) = &rule.http else { continue };
        for path in &http.paths {
            let Some(resource) = &path.backend.resource else {
                continue;
            };
            if resource.api_group.as_deref().is_some_and(|group| group != GROUP) {
                continue;
            }
            if resource.kind != BACKEND_KIND {
                continue;
            }
            let Some(prefix) = &path.path else { continue };
            paths.push(BackendPath {
                prefix: prefix.clone(),
                backend_name: resource.name.clone(),
            });
        }
    }
    paths
}

/// Bookkeeping for one installed ingress.
struct InstalledIngress {
    spec: Option<IngressSpec>,
    prefixes: Vec<String>,
}

pub(crate) struct IngressHandler {
    namespace: String,
    router: Arc<DynamicRouter>,
    cache: Arc<ObjectCache>,
    resolver: Arc<dyn BackendResolver>,
    installed: HashMap<String, InstalledIngress>,
}

impl IngressHandler {
    pub(crate) fn new(
        namespace: String,
        router: Arc<DynamicRouter>,
        cache: Arc<ObjectCache>,
        resolver: Arc<dyn BackendResolver>,
    ) -> Self {
        Self {
            namespace,
            router,
            cache,
            resolver,
            installed: HashMap::new(),
        }
    }

    pub(crate) async fn on_applied(&mut self, ingress: &Ingress) {
        let Some(uid) = ingress.uid() else {
            warn!(component = "ingress-handler", namespace = %self.namespace, name = %ingress.name_any(), "ingress without uid");
            return;
        };
        match self.installed.get(&uid) {
            None => self.install(&uid, ingress).await,
            Some(existing) if existing.spec == ingress.spec => {
                debug!(component = "ingress-handler", namespace = %self.namespace, name = %ingress.name_any(), "ingress unchanged");
            }
            Some(_) => {
                // Updates replay as delete-then-add of the full path set.
                self.remove(&uid);
                self.install(&uid, ingress).await;
            }
        }
    }

    pub(crate) fn on_deleted(&mut self, ingress: &Ingress) {
        let uid = ingress.uid().unwrap_or_default();
        if self.installed.contains_key(&uid) {
            self.remove(&uid);
        } else {
            // Unknown UID: fall back to the paths the payload carries.
            warn!(component = "ingress-handler", namespace = %self.namespace, name = %ingress.name_any(), "delete for untracked ingress");
            for path in qualifying_paths(ingress) {
                self.router.delete(&path.prefix);
            }
        }
    }

    /// A watch restart delivers the namespace's full ingress set: drop
    /// routes for ingresses that vanished, then re-apply the rest.
    pub(crate) async fn resync(&mut self, ingresses: Vec<Ingress>) {
        let live: HashSet<String> = ingresses.iter().filter_map(|i| i.uid()).collect();
        let stale: Vec<String> = self
            .installed
            .keys()
            .filter(|uid| !live.contains(*uid))
            .cloned()
            .collect();
        for uid in stale {
            info!(component = "ingress-handler", namespace = %self.namespace, uid = %uid, "ingress gone after resync");
            self.remove(&uid);
        }
        for ingress in &ingresses {
            self.on_applied(ingress).await;
        }
    }

    async fn install(&mut self, uid: &str, ingress: &Ingress) {
        let name = ingress.name_any();
        let mut prefixes = Vec::new();
        for path in qualifying_paths(ingress) {
            let spec = match self
                .resolver
                .resolve(&self.namespace, &path.backend_name)
                .await
            {
                Ok(spec) => spec,
                Err(err) => {
                    error!(
                        component = "ingress-handler",
                        namespace = %self.namespace,
                        ingress = %name,
                        backend = %path.backend_name,
                        error = %err,
                        "get s3 backend"
                    );
                    continue;
                }
            };
            let config = S3BackendConfig::from(&spec);
            let backend = StorageBackend::new(config, Arc::clone(&self.cache));
            self.router.prepend(Route {
                prefix: path.prefix.clone(),
                backend: Arc::new(backend),
            });
            prefixes.push(path.prefix);
        }
        info!(
            component = "ingress-handler",
            namespace = %self.namespace,
            ingress = %name,
            routes = prefixes.len(),
            "installed ingress routes"
        );
        self.installed.insert(
            uid.to_string(),
            InstalledIngress {
                spec: ingress.spec.clone(),
                prefixes,
            },
        );
    }

    fn remove(&mut self, uid: &str) {
        if let Some(installed) = self.installed.remove(uid) {
            for prefix in installed.prefixes {
                self.router.delete(&prefix);
            }
        }
    }

    /// Drop every route this handler installed. Called when the namespace
    /// watcher stops.
    fn remove_all(&mut self) {
        let uids: Vec<String> = self.installed.keys().cloned().collect();
        for uid in uids {
            self.remove(&uid);
        }
    }
}

/// Watch one namespace's ingresses until the stop token fires.
pub(crate) async fn watch_ingresses(
    client: Client,
    namespace: String,
    router: Arc<DynamicRouter>,
    cache: Arc<ObjectCache>,
    stop: CancellationToken,
) {
    let resolver = Arc::new(KubeBackendResolver::new(client.clone()));
    let mut handler = IngressHandler::new(
        namespace.clone(),
        router,
        cache,
        resolver,
    );

    let api: Api<Ingress> = Api::namespaced(client, &namespace);
    let mut stream = watcher(api, watcher::Config::default()).boxed();
    info!(component = "ingress-handler", namespace = %namespace, "started ingress watcher");

    loop {
        tokio::select! {
            _ = stop.cancelled() => {
                handler.remove_all();
                info!(component = "ingress-handler", namespace = %namespace, "stopped ingress watcher");
                return;
            }
            event = stream.try_next() => match event {
                Ok(Some(watcher::Event::Applied(ingress))) => handler.on_applied(&ingress).await,
                Ok(Some(watcher::Event::Deleted(ingress))) => handler.on_deleted(&ingress),
                Ok(Some(watcher::Event::Restarted(ingresses))) => handler.resync(ingresses).await,
                Ok(None) => {
                    warn!(component = "ingress-handler", namespace = %namespace, "ingress watch stream ended");
                    return;
                }
                Err(err) => {
                    error!(component = "ingress-handler", namespace = %namespace, error = %err, "ingress watch error");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }
}
