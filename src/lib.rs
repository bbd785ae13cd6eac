//! diener - an HTTP gateway that serves S3 objects as files, routed by
//! cluster-declared ingress rules.
//!
//! End users issue ordinary GET requests; the gateway resolves the URL path
//! against a dynamic prefix router, fetches the object from the bucket the
//! winning route points at (or from the shared in-memory cache), and streams
//! the bytes back. Which bucket backs which prefix is reconciled live from
//! Kubernetes: one namespace watcher spawns per-namespace ingress watchers,
//! and ingress paths referencing an `S3Backend` resource become routes.
//!
//! # Architecture
//!
//! ```text
//! request ──> dynamic router ──> storage backend ──> shared cache
//!                  ▲                    │                 │
//!                  │                    └── object fetch ─┘
//!          reconciler (namespace + ingress watchers)
//! ```

pub mod backend;
pub mod cache;
pub mod config;
pub mod context;
pub mod error;
pub mod http;
pub mod reconcile;
pub mod router;
pub mod shutdown;

pub use error::{DienerError, Result};

use std::sync::Arc;
use tracing::{error, info};

use cache::ObjectCache;
use config::GatewayConfig;
use reconcile::Reconciler;
use router::DynamicRouter;
use shutdown::Shutdown;

/// Run the gateway with the given configuration until shutdown.
pub async fn run(config: GatewayConfig) -> Result<()> {
    config.validate()?;
    let listen = config.listen_addr()?;

    let cache = Arc::new(ObjectCache::new(config.cache.clone()));
    let router = Arc::new(DynamicRouter::new());

    let kube_config = match &config.kubeconfig {
        Some(path) => {
            info!(file = %path.display(), "using configuration from kubeconfig");
            let kubeconfig = kube::config::Kubeconfig::read_from(path)
                .map_err(|err| DienerError::Config(err.to_string()))?;
            kube::Config::from_custom_kubeconfig(
                kubeconfig,
                &kube::config::KubeConfigOptions::default(),
            )
            .await
            .map_err(|err| DienerError::Config(err.to_string()))?
        }
        None => {
            info!("using in-cluster configuration");
            kube::Config::incluster().map_err(|err| DienerError::Config(err.to_string()))?
        }
    };
    let client = kube::Client::try_from(kube_config)?;

    let shutdown = Shutdown::new();
    tokio::spawn(shutdown::listen_for_signals(shutdown.clone()));

    let reconciler = Reconciler::new(client, Arc::clone(&router), Arc::clone(&cache));
    let reconciler_shutdown = shutdown.clone();
    let reconciler_handle = tokio::spawn(async move {
        if let Err(err) = reconciler.run(reconciler_shutdown).await {
            error!(error = %err, "reconciler stopped with error");
        }
    });

    http::run_http(listen, Arc::clone(&router), shutdown.clone()).await?;

    // The HTTP server has drained; wind the watchers down too.
    shutdown.trigger();
    let _ = reconciler_handle.await;
    info!("gateway stopped");
    Ok(())
}
