//! Custom resource definitions consumed by the gateway.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::S3BackendConfig;

/// API group of the recognized backend kind.
pub const GROUP: &str = "diener.adviser.com";
/// The recognized backend kind; ingress paths referencing any other kind
/// are ignored.
pub const BACKEND_KIND: &str = "S3Backend";

/// `S3Backend` declares one bucket binding that ingress rules may reference.
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "diener.adviser.com",
    version = "v1alpha1",
    kind = "S3Backend",
    plural = "s3backends",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct S3BackendSpec {
    pub access_key: String,
    pub bucket_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    pub max_age_seconds: u64,
    pub max_object_size: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    pub secret_key: String,
    pub transfer_buf_size: usize,
}

impl From<&S3BackendSpec> for S3BackendConfig {
    fn from(spec: &S3BackendSpec) -> Self {
        Self {
            bucket_name: spec.bucket_name.clone(),
            endpoint: spec.endpoint.clone(),
            region: spec.region.clone(),
            access_key: spec.access_key.clone(),
            secret_key: spec.secret_key.clone(),
            max_object_size: spec.max_object_size,
            transfer_buf_size: spec.transfer_buf_size,
            max_age: Duration::from_secs(spec.max_age_seconds),
        }
    }
}
