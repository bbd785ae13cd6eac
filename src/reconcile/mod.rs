//! The route reconciler.
//!
//! A control loop that keeps the dynamic router a live projection of
//! cluster-declared routing rules: it watches namespaces, runs one ingress
//! watcher per namespace, and tears watchers down when their namespace goes
//! away. Errors are confined to the object that caused them; the reconciler
//! itself only stops on process shutdown.

mod crd;
mod ingress;

pub use crd::{S3Backend, S3BackendSpec, BACKEND_KIND, GROUP};
pub use ingress::{BackendResolver, KubeBackendResolver};

use futures::{StreamExt, TryStreamExt};
use k8s_openapi::api::core::v1::Namespace;
use kube::api::Api;
use kube::runtime::watcher;
use kube::{Client, ResourceExt};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::cache::ObjectCache;
use crate::error::Result;
use crate::router::DynamicRouter;
use crate::shutdown::Shutdown;

struct NamespaceWatcher {
    stop: CancellationToken,
}

/// The set of running per-namespace watchers, guarded by one lock. At most
/// one watcher runs per namespace.
pub(crate) struct WatcherSet {
    inner: Mutex<HashMap<String, NamespaceWatcher>>,
}

impl WatcherSet {
    fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Spawn a watcher for `namespace` unless one is already running.
    /// Returns whether a new watcher was started.
    fn start<F, Fut>(&self, namespace: &str, make_task: F) -> bool
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut watchers = self.inner.lock();
        if watchers.contains_key(namespace) {
            return false;
        }
        let stop = CancellationToken::new();
        tokio::spawn(make_task(stop.clone()));
        watchers.insert(namespace.to_string(), NamespaceWatcher { stop });
        true
    }

    /// Signal the namespace's watcher to stop and forget it. Returns whether
    /// a watcher was present.
    fn stop(&self, namespace: &str) -> bool {
        let removed = self.inner.lock().remove(namespace);
        match removed {
            Some(watcher) => {
                watcher.stop.cancel();
                true
            }
            None => false,
        }
    }

    fn stop_all(&self) {
        let mut watchers = self.inner.lock();
        for (_, watcher) in watchers.drain() {
            watcher.stop.cancel();
        }
    }

    fn names(&self) -> Vec<String> {
        self.inner.lock().keys().cloned().collect()
    }
}

pub struct Reconciler {
    client: Client,
    router: Arc<DynamicRouter>,
    cache: Arc<ObjectCache>,
    watchers: WatcherSet,
}

impl Reconciler {
    pub fn new(client: Client, router: Arc<DynamicRouter>, cache: Arc<ObjectCache>) -> Self {
        Self {
            client,
            router,
            cache,
            watchers: WatcherSet::new(),
        }
    }

    /// Watch namespaces until shutdown, maintaining one ingress watcher per
    /// live namespace.
    pub async fn run(&self, shutdown: Shutdown) -> Result<()> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let mut stream = watcher(api, watcher::Config::default()).boxed();
        info!(component = "reconciler", "reconciler started");

        loop {
            tokio::select! {
                _ = shutdown.triggered() => {
                    self.watchers.stop_all();
                    info!(component = "reconciler", "reconciler stopped");
                    return Ok(());
                }
                event = stream.try_next() => match event {
                    Ok(Some(watcher::Event::Applied(namespace))) => {
                        self.namespace_applied(&namespace.name_any());
                    }
                    Ok(Some(watcher::Event::Deleted(namespace))) => {
                        self.namespace_deleted(&namespace.name_any());
                    }
                    Ok(Some(watcher::Event::Restarted(namespaces))) => {
                        self.resync(&namespaces);
                    }
                    Ok(None) => {
                        warn!(component = "reconciler", "namespace watch stream ended");
                        self.watchers.stop_all();
                        return Ok(());
                    }
                    Err(err) => {
                        error!(component = "reconciler", error = %err, "namespace watch error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        }
    }

    /// Covers both add and update events: a second add for a running
    /// namespace is a no-op, and updates never touch the watcher.
    fn namespace_applied(&self, name: &str) {
        let client = self.client.clone();
        let namespace = name.to_string();
        let router = Arc::clone(&self.router);
        let cache = Arc::clone(&self.cache);
        let started = self.watchers.start(name, move |stop| {
            ingress::watch_ingresses(client, namespace, router, cache, stop)
        });
        if started {
            info!(component = "reconciler", namespace = name, "namespace added");
        } else {
            debug!(component = "reconciler", namespace = name, "ingress watcher already running");
        }
    }

    fn namespace_deleted(&self, name: &str) {
        if self.watchers.stop(name) {
            info!(component = "reconciler", namespace = name, "namespace deleted, watcher stopped");
        } else {
            warn!(component = "reconciler", namespace = name, "no ingress watcher to stop");
        }
    }

    /// A namespace watch restart delivers the full namespace set: start
    /// watchers for new namespaces and stop orphans.
    fn resync(&self, namespaces: &[Namespace]) {
        let live: HashSet<String> = namespaces.iter().map(|ns| ns.name_any()).collect();
        for stale in self.watchers.names() {
            if !live.contains(&stale) {
                warn!(component = "reconciler", namespace = %stale, "namespace gone after resync");
                self.watchers.stop(&stale);
            }
        }
        for name in live {
            self.namespace_applied(&name);
        }
    }
}
