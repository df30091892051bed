//! Slideshot
//!
//! Renders short vertical slide documents into fixed-size bitmaps. Slide
//! markup is mounted on an isolated [`surface::RenderSurface`], embedded
//! image placeholders are resolved through a deduplicating, cached image
//! pipeline, and the settled surface is captured by one of two rasterizers.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use slideshot::images::{ImageClient, ImageProvisioner};
//! use slideshot::images::http::PollinationsBackend;
//! use slideshot::rendering::CaptureOptions;
//! use slideshot::{RenderConfig, SlideRenderer};
//!
//! # async fn run() -> slideshot::Result<()> {
//! let config = RenderConfig::default();
//! let backend = Arc::new(PollinationsBackend::new(&config)?);
//! let provisioner = ImageProvisioner::new(backend, &config.cache);
//! let client = ImageClient::new(Arc::new(provisioner), &config.cache);
//!
//! let renderer = SlideRenderer::new(&config, client);
//! let capture = renderer
//!     .render(r#"<h1>Hello</h1><div class="ai-image" data-prompt="sunset"></div>"#, &CaptureOptions::default())
//!     .await?;
//! std::fs::write("slide.png", capture.to_png()?).ok();
//! # Ok(())
//! # }
//! ```

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use log::debug;
use serde::{Deserialize, Serialize};

pub mod error;
pub use error::{Error, Result};

pub mod images;
pub mod rendering;
pub mod resolver;
pub mod surface;

use images::ImageClient;
use rendering::{CaptureOptions, CaptureResult};
use resolver::{PlaceholderResolver, ResolutionOutcome};
use surface::RenderSurface;

/// Lock a mutex, recovering the data if a holder panicked. Guarded state
/// is only ever replaced wholesale, so a poisoned value is still usable.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Configuration for the rendering pipeline
///
/// Defaults match the production slide format: a 1080×1920 portrait
/// surface, a 24 hour / 200 entry image cache, and two 16ms frame ticks of
/// settlement.
///
/// # Examples
///
/// ```
/// let cfg = slideshot::RenderConfig::default();
/// assert_eq!(cfg.viewport.width, 1080);
/// assert_eq!(cfg.cache.capacity, 200);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Surface dimensions
    pub viewport: Viewport,
    /// Image cache bounds (applies to both provisioner and client caches)
    pub cache: CacheConfig,
    /// Settlement timing
    pub settle: SettleConfig,
    /// Font files tried in order; empty selects the built-in typeface
    pub font_paths: Vec<PathBuf>,
    /// Image endpoint used by `HttpImageEndpoint`
    pub image_endpoint: String,
    /// Base URL of the upstream image generation service
    pub upstream_url: String,
    /// Timeout for outbound HTTP requests in milliseconds
    pub timeout_ms: u64,
    /// User agent sent upstream
    pub user_agent: String,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            viewport: Viewport::default(),
            cache: CacheConfig::default(),
            settle: SettleConfig::default(),
            font_paths: Vec::new(),
            image_endpoint: "http://127.0.0.1:3000/api/image".to_string(),
            upstream_url: "https://image.pollinations.ai".to_string(),
            timeout_ms: 60_000,
            user_agent: concat!("slideshot/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl RenderConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: RenderConfig =
            serde_json::from_str(json).map_err(|e| Error::ConfigError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::ConfigError(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        if self.viewport.width == 0 || self.viewport.height == 0 {
            return Err(Error::ConfigError(format!(
                "viewport must be non-zero, got {}x{}",
                self.viewport.width, self.viewport.height
            )));
        }
        if self.cache.capacity == 0 {
            return Err(Error::ConfigError("cache capacity must be at least 1".into()));
        }
        if self.cache.ttl_ms == 0 {
            return Err(Error::ConfigError("cache TTL must be positive".into()));
        }
        if self.timeout_ms == 0 {
            return Err(Error::ConfigError("timeout_ms must be positive".into()));
        }
        Ok(())
    }
}

/// Viewport dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1080,
            height: 1920,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Entries idle for longer than this are never returned
    pub ttl_ms: u64,
    /// Maximum resident entries; the least recently used is evicted
    pub capacity: usize,
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_ms: 24 * 60 * 60 * 1000,
            capacity: 200,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SettleConfig {
    /// Frame ticks to wait after fonts are ready
    pub frame_ticks: u32,
    /// Length of one tick; zero yields to the scheduler instead of sleeping
    pub frame_interval_ms: u64,
}

impl Default for SettleConfig {
    fn default() -> Self {
        Self {
            frame_ticks: 2,
            frame_interval_ms: 16,
        }
    }
}

/// Drives one surface through mount, placeholder resolution, settlement
/// and capture.
#[derive(Clone)]
pub struct SlideRenderer {
    surface: RenderSurface,
    resolver: PlaceholderResolver,
}

impl SlideRenderer {
    pub fn new(config: &RenderConfig, client: ImageClient) -> Self {
        Self::with_surface(RenderSurface::new(config), client)
    }

    pub fn with_surface(surface: RenderSurface, client: ImageClient) -> Self {
        Self {
            surface,
            resolver: PlaceholderResolver::new(client),
        }
    }

    pub fn surface(&self) -> &RenderSurface {
        &self.surface
    }

    /// Mount `markup`, resolve its placeholders and wait for settlement.
    ///
    /// Placeholder failures do not fail the call; they are reported in the
    /// returned outcomes and rendered inline.
    pub async fn prepare(&self, markup: &str) -> Vec<ResolutionOutcome> {
        let generation = self.surface.mount(markup);
        let outcomes = self.resolver.resolve(&self.surface).finish().await;
        let settled = self.surface.await_settled().await;
        debug!(
            "generation {} prepared with {} placeholder outcome(s), settled at {}",
            generation.0,
            outcomes.len(),
            settled.0
        );
        outcomes
    }

    /// Mount, resolve, settle and capture.
    pub async fn render(&self, markup: &str, options: &CaptureOptions) -> Result<CaptureResult> {
        self.prepare(markup).await;
        rendering::capture(&self.surface, options).await
    }
}
