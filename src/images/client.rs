//! Consumer-side image client: mirror cache and in-flight dedup in front of
//! an [`ImageEndpoint`].

use std::sync::Arc;

use log::{debug, warn};

use super::cache::{DedupCache, Lookup};
use super::{ImageCache, ImageEndpoint, ImagePayload, ImageRequest, ImageRequestKey};
use crate::{CacheConfig, Error, Result};

/// Resolves prompts to image payloads for placeholders.
///
/// Placeholders sharing a prompt and dimensions, within one slide or across
/// slides rendered concurrently, share one endpoint call.
#[derive(Clone)]
pub struct ImageClient {
    endpoint: Arc<dyn ImageEndpoint>,
    table: Arc<DedupCache>,
}

impl ImageClient {
    pub fn new(endpoint: Arc<dyn ImageEndpoint>, config: &CacheConfig) -> Self {
        Self::with_cache(endpoint, ImageCache::new(config))
    }

    pub fn with_cache(endpoint: Arc<dyn ImageEndpoint>, cache: ImageCache) -> Self {
        Self {
            endpoint,
            table: DedupCache::new(cache),
        }
    }

    /// Fetch the image for `prompt` at `width`×`height`.
    ///
    /// Fails with [`Error::ImageUnavailable`] when the endpoint errors or
    /// answers without a payload.
    pub async fn resolve(&self, prompt: &str, width: u32, height: u32) -> Result<ImagePayload> {
        let key = ImageRequestKey::new(prompt, width, height);
        let endpoint = Arc::clone(&self.endpoint);
        let request = ImageRequest::new(prompt, width, height);
        let lookup = self.table.lookup(&key, true, move || async move {
            debug!("requesting image for prompt {:?}", request.prompt);
            let response = endpoint
                .request_image(&request)
                .await
                .map_err(|e| match e {
                    Error::ImageUnavailable(_) => e,
                    other => Error::ImageUnavailable(other.to_string()),
                })?;
            response
                .data_url
                .ok_or_else(|| Error::ImageUnavailable("No image payload returned".into()))
        });
        match lookup {
            Lookup::Hit(payload) => Ok(payload),
            Lookup::Pending(pending) => pending.await.map_err(|e| {
                warn!("image for {} unavailable: {}", key, e);
                e
            }),
        }
    }

    pub fn cached_len(&self) -> usize {
        self.table.cached_len()
    }
}
