//! Configuration module for the diener gateway.

use crate::error::{DienerError, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Fallback cache freshness when a backend declares `maxAgeSeconds: 0`.
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(3600);

/// Main configuration for a gateway process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Listen address for the HTTP server. Accepts the `:port` shorthand.
    pub listen: String,
    /// Path to a kubeconfig file. `None` means in-cluster discovery.
    pub kubeconfig: Option<PathBuf>,
    /// Enable debug-level logging.
    #[serde(default)]
    pub debug: bool,
    /// Shared content cache settings.
    #[serde(default)]
    pub cache: CacheConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen: ":8282".to_string(),
            kubeconfig: None,
            debug: false,
            cache: CacheConfig::default(),
        }
    }
}

impl GatewayConfig {
    /// Validate configuration.
    pub fn validate(&self) -> Result<()> {
        self.listen_addr()?;
        if self.cache.max_size_bytes == 0 {
            return Err(DienerError::Config(
                "cache.max_size_bytes must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Resolve the listen address, expanding the `:port` shorthand to all
    /// interfaces.
    pub fn listen_addr(&self) -> Result<SocketAddr> {
        let addr = if self.listen.starts_with(':') {
            format!("0.0.0.0{}", self.listen)
        } else {
            self.listen.clone()
        };
        addr.parse().map_err(|_| {
            DienerError::Config(format!("invalid listen address: {}", self.listen))
        })
    }
}

/// Shared content cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum total cost of cached bytes.
    pub max_size_bytes: u64,
    /// Maximum number of entries tracked.
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size_bytes: 1 << 30, // 1 GiB
            max_entries: 10_000,
        }
    }
}

/// Configuration for one storage backend, resolved from an `S3Backend`
/// cluster resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct S3BackendConfig {
    /// Bucket served by this backend.
    pub bucket_name: String,
    /// Endpoint URL override for S3-compatible stores.
    pub endpoint: Option<String>,
    /// Region; backends without one use a placeholder.
    pub region: Option<String>,
    pub access_key: String,
    pub secret_key: String,
    /// Objects larger than this are streamed through uncached.
    pub max_object_size: i64,
    /// Chunk size for buffering fetched bodies.
    pub transfer_buf_size: usize,
    /// Cache freshness window. Zero means [`DEFAULT_MAX_AGE`].
    #[serde(with = "humantime_serde")]
    pub max_age: Duration,
}

impl S3BackendConfig {
    /// The effective freshness window, with the zero fallback applied.
    pub fn effective_max_age(&self) -> Duration {
        if self.max_age.is_zero() {
            DEFAULT_MAX_AGE
        } else {
            self.max_age
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listen_shorthand() {
        let config = GatewayConfig::default();
        assert_eq!(config.listen_addr().unwrap().port(), 8282);
        assert!(config.listen_addr().unwrap().ip().is_unspecified());
    }

    #[test]
    fn test_listen_full_address() {
        let config = GatewayConfig {
            listen: "127.0.0.1:9090".to_string(),
            ..Default::default()
        };
        assert_eq!(
            config.listen_addr().unwrap(),
            "127.0.0.1:9090".parse().unwrap()
        );
    }

    #[test]
    fn test_listen_invalid() {
        let config = GatewayConfig {
            listen: "nonsense".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_cache_rejected() {
        let config = GatewayConfig {
            cache: CacheConfig {
                max_size_bytes: 0,
                max_entries: 10,
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_max_age_zero_fallback() {
        let config = S3BackendConfig {
            bucket_name: "b".to_string(),
            endpoint: None,
            region: None,
            access_key: "ak".to_string(),
            secret_key: "sk".to_string(),
            max_object_size: 1024,
            transfer_buf_size: 4096,
            max_age: Duration::ZERO,
        };
        assert_eq!(config.effective_max_age(), DEFAULT_MAX_AGE);

        let config = S3BackendConfig {
            max_age: Duration::from_secs(5),
            ..config
        };
        assert_eq!(config.effective_max_age(), Duration::from_secs(5));
    }
}
