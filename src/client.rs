//! Store construction: one wire client per endpoint.
//!
//! The S3 protocol itself (SigV4, TLS, retries) lives in the `object_store`
//! crate; this module only maps expanded endpoints to bucket-scoped store
//! handles. Tests inject in-memory stores through `from_stores`.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use object_store::aws::AmazonS3Builder;
use object_store::ObjectStore;
use tracing::{debug, warn};
use url::Url;

use crate::constants::DEFAULT_BUCKET;

/// Connection settings shared by every endpoint.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub access_key: String,
    pub secret_key: String,
    pub tls: bool,
    pub encrypt: bool,
    pub bucket: String,
    pub region: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            access_key: String::new(),
            secret_key: String::new(),
            tls: false,
            encrypt: false,
            bucket: DEFAULT_BUCKET.to_string(),
            region: "us-east-1".to_string(),
        }
    }
}

/// Endpoint -> store handle map, in endpoint-spec expansion order.
#[derive(Clone)]
pub struct StorePool {
    stores: HashMap<String, Arc<dyn ObjectStore>>,
    order: Vec<String>,
}

impl StorePool {
    /// Build an S3 store per endpoint.
    pub fn connect(endpoints: &[String], cfg: &ClientConfig) -> Result<Self> {
        if cfg.encrypt {
            warn!("Server-side encryption is handled by the wire client; --encrypt is ignored by this build");
        }
        let mut stores = HashMap::new();
        let mut order = Vec::new();
        for endpoint in endpoints {
            let url = endpoint_url(endpoint, cfg.tls)?;
            debug!("Connecting store for endpoint {}", url);

            let mut builder = AmazonS3Builder::new()
                .with_endpoint(url.as_str().trim_end_matches('/'))
                .with_bucket_name(&cfg.bucket)
                .with_region(&cfg.region)
                .with_allow_http(!cfg.tls);
            if !cfg.access_key.is_empty() {
                builder = builder.with_access_key_id(&cfg.access_key);
            }
            if !cfg.secret_key.is_empty() {
                builder = builder.with_secret_access_key(&cfg.secret_key);
            }

            let store = builder
                .build()
                .with_context(|| format!("Failed to build store for endpoint {}", endpoint))?;
            stores.insert(endpoint.clone(), Arc::new(store) as Arc<dyn ObjectStore>);
            order.push(endpoint.clone());
        }
        Ok(StorePool { stores, order })
    }

    /// Build a pool from pre-constructed stores (tests use `InMemory`).
    pub fn from_stores(pairs: Vec<(String, Arc<dyn ObjectStore>)>) -> Self {
        let order = pairs.iter().map(|(ep, _)| ep.clone()).collect();
        let stores = pairs.into_iter().collect();
        StorePool { stores, order }
    }

    pub fn store(&self, endpoint: &str) -> Result<Arc<dyn ObjectStore>> {
        self.stores
            .get(endpoint)
            .cloned()
            .ok_or_else(|| anyhow!("no store for endpoint {}", endpoint))
    }

    pub fn endpoints(&self) -> &[String] {
        &self.order
    }

    /// Any store; used for bucket-level setup and teardown probes.
    pub fn first(&self) -> Result<Arc<dyn ObjectStore>> {
        self.order
            .first()
            .ok_or_else(|| anyhow!("store pool is empty"))
            .and_then(|ep| self.store(ep))
    }
}

impl std::fmt::Debug for StorePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorePool")
            .field("endpoints", &self.order)
            .finish()
    }
}

/// Normalize a host spec token into a full URL, honoring the TLS flag when
/// no scheme is present.
fn endpoint_url(endpoint: &str, tls: bool) -> Result<Url> {
    let raw = if endpoint.contains("://") {
        endpoint.to_string()
    } else if tls {
        format!("https://{}", endpoint)
    } else {
        format!("http://{}", endpoint)
    };
    Url::parse(&raw).with_context(|| format!("invalid endpoint {}", endpoint))
}

#[cfg(test)]
mod tests {
    use super::*;
    use object_store::memory::InMemory;

    #[test]
    fn test_endpoint_url_scheme() {
        assert_eq!(
            endpoint_url("10.0.0.1:9000", false).unwrap().as_str(),
            "http://10.0.0.1:9000/"
        );
        assert_eq!(
            endpoint_url("10.0.0.1:9000", true).unwrap().scheme(),
            "https"
        );
        assert_eq!(
            endpoint_url("https://host:9000", false).unwrap().scheme(),
            "https"
        );
        assert!(endpoint_url("not a url", false).is_err());
    }

    #[test]
    fn test_from_stores_preserves_order() {
        let pool = StorePool::from_stores(vec![
            ("b".to_string(), Arc::new(InMemory::new()) as _),
            ("a".to_string(), Arc::new(InMemory::new()) as _),
        ]);
        assert_eq!(pool.endpoints(), &["b", "a"]);
        assert!(pool.store("a").is_ok());
        assert!(pool.store("missing").is_err());
    }
}
