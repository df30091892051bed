//! Server-side image provisioning: cache + in-flight dedup in front of the
//! upstream generator.

use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, warn};

use super::cache::{DedupCache, Lookup};
use super::{
    ImageBackend, ImageCache, ImageEndpoint, ImagePayload, ImageRequest, ImageRequestKey,
    ImageResponse,
};
use crate::{CacheConfig, Result};

/// Outcome of a provisioning call.
#[derive(Debug, Clone, PartialEq)]
pub struct Provisioned {
    pub payload: ImagePayload,
    /// True only when served straight from the cache.
    pub cached: bool,
}

/// Process-wide image provisioning service.
///
/// Construct one per process and hand clones to whoever needs it; clones
/// share the cache and the in-flight table. Tests build isolated instances.
#[derive(Clone)]
pub struct ImageProvisioner {
    backend: Arc<dyn ImageBackend>,
    table: Arc<DedupCache>,
}

impl ImageProvisioner {
    pub fn new(backend: Arc<dyn ImageBackend>, config: &CacheConfig) -> Self {
        Self::with_cache(backend, ImageCache::new(config))
    }

    /// Use a pre-built cache (e.g. one driven by a manual clock).
    pub fn with_cache(backend: Arc<dyn ImageBackend>, cache: ImageCache) -> Self {
        Self {
            backend,
            table: DedupCache::new(cache),
        }
    }

    /// Obtain the payload for `key`, making at most one upstream call per
    /// key no matter how many callers are waiting.
    pub async fn provision(&self, key: &ImageRequestKey, use_cache: bool) -> Result<Provisioned> {
        let backend = Arc::clone(&self.backend);
        let fetch_key = key.clone();
        let lookup = self.table.lookup(key, use_cache, move || async move {
            debug!("upstream image request {}", fetch_key);
            backend.generate(&fetch_key).await
        });
        match lookup {
            Lookup::Hit(payload) => Ok(Provisioned {
                payload,
                cached: true,
            }),
            Lookup::Pending(pending) => {
                let payload = pending.await.map_err(|e| {
                    warn!("image request {} failed: {}", key, e);
                    e
                })?;
                Ok(Provisioned {
                    payload,
                    cached: false,
                })
            }
        }
    }

    /// Endpoint entry point: validate the request body, then provision.
    pub async fn handle(&self, request: &ImageRequest) -> Result<ImageResponse> {
        let key = request.key()?;
        let provisioned = self.provision(&key, request.use_cache()).await?;
        Ok(ImageResponse {
            data_url: Some(provisioned.payload),
            cached: provisioned.cached,
        })
    }

    pub fn cached_len(&self) -> usize {
        self.table.cached_len()
    }

    pub fn in_flight_len(&self) -> usize {
        self.table.in_flight_len()
    }
}

#[async_trait]
impl ImageEndpoint for ImageProvisioner {
    async fn request_image(&self, request: &ImageRequest) -> Result<ImageResponse> {
        self.handle(request).await
    }
}
