//! Object retrieval from S3-compatible stores.
//!
//! The fetcher issues exactly one GET per call and hands back the body as a
//! forward-only reader plus the length the store declared. It performs no
//! caching and no retry; retry policy belongs to the SDK's transport layer.

use async_trait::async_trait;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use tokio::io::AsyncRead;
use tracing::debug;

use crate::config::S3BackendConfig;
use crate::error::{DienerError, Result};

/// Region placeholder for backends that do not declare one.
const UNSET_REGION: &str = "not-set";

/// A fetched object body with its declared length.
pub struct FetchedObject {
    /// Forward-only body stream. The caller must fully consume or drop it.
    pub reader: Box<dyn AsyncRead + Send + Unpin>,
    /// Length declared by the store; authoritative for size accounting.
    pub declared_len: i64,
}

/// One object retrieval per call.
#[async_trait]
pub trait ObjectFetcher: Send + Sync {
    async fn get(&self, bucket: &str, key: &str) -> Result<FetchedObject>;
}

/// Fetcher backed by the AWS S3 SDK: static credentials, path-style
/// addressing, per-backend endpoint and region.
pub struct S3Fetcher {
    client: aws_sdk_s3::Client,
}

impl S3Fetcher {
    pub fn new(config: &S3BackendConfig) -> Self {
        let credentials = Credentials::new(
            config.access_key.clone(),
            config.secret_key.clone(),
            None,
            None,
            "s3backend",
        );
        let region = config
            .region
            .clone()
            .unwrap_or_else(|| UNSET_REGION.to_string());

        let mut builder = aws_sdk_s3::config::Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .credentials_provider(credentials)
            .region(Region::new(region))
            .force_path_style(true);
        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        Self {
            client: aws_sdk_s3::Client::from_conf(builder.build()),
        }
    }
}

#[async_trait]
impl ObjectFetcher for S3Fetcher {
    async fn get(&self, bucket: &str, key: &str) -> Result<FetchedObject> {
        let output = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| {
                let service = err.into_service_error();
                if service.is_no_such_key() {
                    DienerError::NotFound(key.to_string())
                } else {
                    DienerError::Transport(service.to_string())
                }
            })?;

        let declared_len = output.content_length().unwrap_or_default();
        debug!(component = "s3-backend", bucket, key, size = declared_len, "fetched object");

        Ok(FetchedObject {
            reader: Box::new(output.body.into_async_read()),
            declared_len,
        })
    }
}
