//! Image provisioning: request fingerprints, payloads and the seams to the
//! image-generation backend.
//!
//! Two layers deduplicate work:
//!
//! - [`ImageProvisioner`] is the server-side cache in front of the upstream
//!   generator ([`ImageBackend`]). Identical concurrent requests share one
//!   upstream call.
//! - [`ImageClient`] is the consumer-side mirror. It talks to any
//!   [`ImageEndpoint`] (the provisioner in-process, or the HTTP endpoint) and
//!   applies the same discipline so placeholders sharing a prompt share one
//!   endpoint call.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

pub mod cache;
pub mod client;
pub mod provisioner;

#[cfg(feature = "http")]
pub mod http;

pub use cache::{Clock, ImageCache, ManualClock, SystemClock};
pub use client::ImageClient;
pub use provisioner::ImageProvisioner;

/// Default request dimension when the endpoint receives none.
pub const DEFAULT_REQUEST_DIMENSION: f64 = 1024.0;

/// Cache and deduplication identity of an image request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ImageRequestKey {
    pub prompt: String,
    pub width: u32,
    pub height: u32,
}

impl ImageRequestKey {
    pub fn new(prompt: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            prompt: prompt.into(),
            width,
            height,
        }
    }
}

impl fmt::Display for ImageRequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}__{}x{}", self.prompt, self.width, self.height)
    }
}

/// Image data encoded as text: a `data:<mime>;base64,<bytes>` URL.
///
/// Cloning is cheap; the same payload is handed to every waiter of a shared
/// request.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ImagePayload(Arc<str>);

impl ImagePayload {
    pub fn from_bytes(mime: &str, bytes: &[u8]) -> Self {
        Self(format!("data:{};base64,{}", mime, STANDARD.encode(bytes)).into())
    }

    pub fn from_data_url(data_url: impl Into<String>) -> Result<Self> {
        let data_url = data_url.into();
        if !data_url.starts_with("data:") || !data_url.contains(";base64,") {
            return Err(Error::InvalidRequest(
                "image payload must be a base64 data URL".into(),
            ));
        }
        Ok(Self(data_url.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// MIME type declared by the data URL.
    pub fn mime(&self) -> &str {
        self.0
            .strip_prefix("data:")
            .and_then(|rest| rest.split(';').next())
            .unwrap_or_default()
    }

    pub fn decode_bytes(&self) -> Result<Vec<u8>> {
        let encoded = self
            .0
            .split_once(";base64,")
            .map(|(_, data)| data)
            .ok_or_else(|| Error::RenderError("payload is not base64 encoded".into()))?;
        STANDARD
            .decode(encoded.trim())
            .map_err(|e| Error::RenderError(format!("invalid base64 payload: {}", e)))
    }

    pub fn decode_image(&self) -> Result<image::RgbaImage> {
        let bytes = self.decode_bytes()?;
        let decoded = image::load_from_memory(&bytes)
            .map_err(|e| Error::RenderError(format!("undecodable {} image: {}", self.mime(), e)))?;
        Ok(decoded.to_rgba8())
    }
}

impl fmt::Debug for ImagePayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ImagePayload({}, {} bytes)", self.mime(), self.0.len())
    }
}

impl TryFrom<String> for ImagePayload {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::from_data_url(value)
    }
}

impl From<ImagePayload> for String {
    fn from(payload: ImagePayload) -> Self {
        payload.0.to_string()
    }
}

/// Body of an image endpoint request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageRequest {
    #[serde(default)]
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache: Option<bool>,
}

impl ImageRequest {
    pub fn new(prompt: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            prompt: prompt.into(),
            width: Some(width as f64),
            height: Some(height as f64),
            cache: None,
        }
    }

    /// Validate the request and derive its fingerprint. Dimensions are
    /// floored; missing ones default to 1024.
    pub fn key(&self) -> Result<ImageRequestKey> {
        if self.prompt.trim().is_empty() {
            return Err(Error::InvalidRequest("Missing prompt".into()));
        }
        let width = floor_dimension(self.width, "width")?;
        let height = floor_dimension(self.height, "height")?;
        Ok(ImageRequestKey::new(self.prompt.clone(), width, height))
    }

    pub fn use_cache(&self) -> bool {
        self.cache.unwrap_or(true)
    }
}

fn floor_dimension(value: Option<f64>, name: &str) -> Result<u32> {
    let value = value.unwrap_or(DEFAULT_REQUEST_DIMENSION);
    if !value.is_finite() || value < 1.0 || value > u32::MAX as f64 {
        return Err(Error::InvalidRequest(format!("{} out of range: {}", name, value)));
    }
    Ok(value.floor() as u32)
}

/// Body of an image endpoint response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageResponse {
    #[serde(default)]
    pub data_url: Option<ImagePayload>,
    #[serde(default)]
    pub cached: bool,
}

/// Upstream image generator consulted on a provisioning cache miss.
#[async_trait]
pub trait ImageBackend: Send + Sync {
    async fn generate(&self, key: &ImageRequestKey) -> Result<ImagePayload>;
}

/// The endpoint the consumer-side client talks to.
#[async_trait]
pub trait ImageEndpoint: Send + Sync {
    async fn request_image(&self, request: &ImageRequest) -> Result<ImageResponse>;
}
