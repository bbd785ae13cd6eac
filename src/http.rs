//! HTTP serving glue.
//!
//! Every request path is resolved through the dynamic router; the resulting
//! file handle is streamed back. Missing objects and unrouted prefixes are
//! 404s, everything else a request can trip over is a 500.

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Router;
use bytes::Bytes;
use futures::stream;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::backend::file::BackendFile;
use crate::context::RequestContext;
use crate::error::Result;
use crate::router::DynamicRouter;
use crate::shutdown::Shutdown;

/// Chunk size for draining a streaming file into the response body.
const STREAM_BUF_SIZE: usize = 64 * 1024;

#[derive(Clone)]
struct AppState {
    router: Arc<DynamicRouter>,
}

/// Build the gateway's axum application.
pub fn app(router: Arc<DynamicRouter>) -> Router {
    Router::new()
        .fallback(serve_object)
        .with_state(AppState { router })
}

/// Serve HTTP until shutdown, then drain gracefully.
pub async fn run_http(
    listen: SocketAddr,
    router: Arc<DynamicRouter>,
    shutdown: Shutdown,
) -> Result<()> {
    let listener = TcpListener::bind(listen).await?;
    info!(component = "gateway", addr = %listen, "gateway listening");
    axum::serve(listener, app(router))
        .with_graceful_shutdown(async move { shutdown.triggered().await })
        .await?;
    Ok(())
}

async fn serve_object(State(state): State<AppState>, method: Method, uri: Uri) -> Response {
    if method != Method::GET && method != Method::HEAD {
        return StatusCode::METHOD_NOT_ALLOWED.into_response();
    }

    let view = state.router.with_context(RequestContext::new());
    let file = match view.open(uri.path()).await {
        Ok(file) => file,
        Err(err) if err.is_not_found() => {
            debug!(component = "gateway", path = %uri.path(), "not found");
            return StatusCode::NOT_FOUND.into_response();
        }
        Err(err) => {
            warn!(component = "gateway", path = %uri.path(), error = %err, "open failed");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let info = file.stat();
    let body = if method == Method::HEAD {
        Body::empty()
    } else {
        file_body(file)
    };
    (
        StatusCode::OK,
        [(header::CONTENT_LENGTH, info.size.max(0).to_string())],
        body,
    )
        .into_response()
}

/// Turn a file handle into a response body. Cached files alias the cache
/// entry's bytes; streaming files are drained chunk by chunk.
fn file_body(file: BackendFile) -> Body {
    match file {
        BackendFile::Cached(cached) => Body::from(cached.remaining()),
        direct => Body::from_stream(stream::try_unfold(
            (direct, vec![0u8; STREAM_BUF_SIZE]),
            |(mut file, mut buf)| async move {
                let n = file.read(&mut buf).await?;
                if n == 0 {
                    file.close().await?;
                    return Ok::<_, crate::error::DienerError>(None);
                }
                Ok(Some((Bytes::copy_from_slice(&buf[..n]), (file, buf))))
            },
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ObjectFs;
    use crate::cache::CachedObject;
    use crate::error::{DienerError, Result};
    use crate::router::Route;
    use async_trait::async_trait;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use std::time::SystemTime;
    use tower::ServiceExt;

    struct StaticBackend {
        body: &'static [u8],
        direct: bool,
    }

    #[async_trait]
    impl ObjectFs for StaticBackend {
        async fn open(&self, name: &str, _ctx: &RequestContext) -> Result<BackendFile> {
            if name == "/missing" {
                return Err(DienerError::NotFound(name.to_string()));
            }
            if self.direct {
                Ok(BackendFile::direct(
                    name,
                    Box::new(self.body),
                    self.body.len() as i64,
                    SystemTime::now(),
                ))
            } else {
                Ok(BackendFile::cached(
                    name,
                    Arc::new(CachedObject::new(name, Bytes::from_static(self.body))),
                ))
            }
        }
    }

    fn test_app(direct: bool) -> Router {
        let router = Arc::new(DynamicRouter::new());
        router.prepend(Route {
            prefix: "/assets".to_string(),
            backend: Arc::new(StaticBackend {
                body: b"hello gateway",
                direct,
            }),
        });
        app(router)
    }

    #[tokio::test]
    async fn test_get_served_from_cached_file() {
        let response = test_app(false)
            .oneshot(Request::get("/assets/greeting").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_LENGTH], "13");
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(body.as_ref(), b"hello gateway");
    }

    #[tokio::test]
    async fn test_get_served_from_streaming_file() {
        let response = test_app(true)
            .oneshot(Request::get("/assets/big").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(body.as_ref(), b"hello gateway");
    }

    #[tokio::test]
    async fn test_unknown_prefix_is_404() {
        let response = test_app(false)
            .oneshot(Request::get("/elsewhere/x").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_missing_object_is_404() {
        let response = test_app(false)
            .oneshot(Request::get("/assets/missing").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_head_has_length_but_no_body() {
        let response = test_app(false)
            .oneshot(
                Request::head("/assets/greeting")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_LENGTH], "13");
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn test_writes_are_rejected() {
        let response = test_app(false)
            .oneshot(
                Request::post("/assets/greeting")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }
}
