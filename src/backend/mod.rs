//! Storage backends and the file-like handles they produce.

pub mod fetcher;
pub mod file;
pub mod s3;

use async_trait::async_trait;

use crate::context::RequestContext;
use crate::error::Result;
use file::BackendFile;

/// The filesystem capability consumed by the HTTP layer: open a named object,
/// yielding a file-like handle. Implemented by storage backends and by the
/// dynamic router's views.
#[async_trait]
pub trait ObjectFs: Send + Sync {
    async fn open(&self, name: &str, ctx: &RequestContext) -> Result<BackendFile>;
}
