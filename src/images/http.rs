//! HTTP adapters: the upstream generator and the image endpoint.

use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use url::Url;

use super::{ImageBackend, ImageEndpoint, ImagePayload, ImageRequest, ImageRequestKey, ImageResponse};
use crate::{Error, RenderConfig, Result};

const FALLBACK_MIME: &str = "image/jpeg";

fn build_client(config: &RenderConfig) -> Result<Client> {
    Client::builder()
        .timeout(Duration::from_millis(config.timeout_ms))
        .user_agent(config.user_agent.clone())
        .build()
        .map_err(|e| Error::ConfigError(format!("Failed to build HTTP client: {}", e)))
}

fn parse_url(raw: &str, what: &str) -> Result<Url> {
    Url::parse(raw).map_err(|e| Error::ConfigError(format!("invalid {} {:?}: {}", what, raw, e)))
}

/// Error text for a non-success response: the body, or a generic message.
async fn failure_text(resp: reqwest::Response) -> String {
    let status = resp.status();
    let text = resp.text().await.unwrap_or_default();
    if text.trim().is_empty() {
        format!("Image API error ({})", status)
    } else {
        text
    }
}

/// Prompt-in-path image generator (`{base}/prompt/{prompt}?width=..`).
pub struct PollinationsBackend {
    client: Client,
    base_url: Url,
}

impl PollinationsBackend {
    pub fn new(config: &RenderConfig) -> Result<Self> {
        Ok(Self {
            client: build_client(config)?,
            base_url: parse_url(&config.upstream_url, "upstream URL")?,
        })
    }

    pub fn request_url(&self, key: &ImageRequestKey) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| Error::ConfigError(format!("upstream URL {} cannot take a path", self.base_url)))?
            .pop_if_empty()
            .push("prompt")
            .push(&key.prompt);
        url.query_pairs_mut()
            .append_pair("width", &key.width.to_string())
            .append_pair("height", &key.height.to_string())
            .append_pair("n", "1");
        Ok(url)
    }
}

#[async_trait]
impl ImageBackend for PollinationsBackend {
    async fn generate(&self, key: &ImageRequestKey) -> Result<ImagePayload> {
        let url = self.request_url(key)?;
        debug!("GET {}", url);
        let resp = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| Error::CacheBackendUnavailable(format!("Failed to fetch {}: {}", url, e)))?;

        if !resp.status().is_success() {
            return Err(Error::CacheBackendUnavailable(failure_text(resp).await));
        }

        let mime = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(';').next())
            .map(|v| v.trim().to_string())
            .filter(|v| v.starts_with("image/"))
            .unwrap_or_else(|| FALLBACK_MIME.to_string());
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| Error::CacheBackendUnavailable(format!("Failed to read image body: {}", e)))?;
        Ok(ImagePayload::from_bytes(&mime, &bytes))
    }
}

/// Client side of the image endpoint: POSTs JSON requests.
pub struct HttpImageEndpoint {
    client: Client,
    url: Url,
}

impl HttpImageEndpoint {
    pub fn new(config: &RenderConfig) -> Result<Self> {
        Ok(Self {
            client: build_client(config)?,
            url: parse_url(&config.image_endpoint, "image endpoint")?,
        })
    }
}

#[async_trait]
impl ImageEndpoint for HttpImageEndpoint {
    async fn request_image(&self, request: &ImageRequest) -> Result<ImageResponse> {
        let resp = self
            .client
            .post(self.url.clone())
            .json(request)
            .send()
            .await
            .map_err(|e| Error::NetworkError(format!("image endpoint unreachable: {}", e)))?;

        if !resp.status().is_success() {
            return Err(Error::ImageUnavailable(failure_text(resp).await));
        }

        resp.json::<ImageResponse>()
            .await
            .map_err(|e| Error::ImageUnavailable(format!("malformed image response: {}", e)))
    }
}
