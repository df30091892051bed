#![allow(dead_code)]

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use image::{ImageFormat, Rgba, RgbaImage};
use tokio::sync::Notify;

use slideshot::images::{ImageBackend, ImageClient, ImagePayload, ImageProvisioner, ImageRequestKey};
use slideshot::{CacheConfig, Error, RenderConfig, Result, SettleConfig};

/// Config with zero-length frame ticks so settlement only yields.
pub fn fast_config() -> RenderConfig {
    RenderConfig {
        settle: SettleConfig {
            frame_ticks: 2,
            frame_interval_ms: 0,
        },
        ..RenderConfig::default()
    }
}

/// PNG with a diagonal gradient so any sampled region is non-uniform.
pub fn gradient_png(width: u32, height: u32) -> ImagePayload {
    let img = RgbaImage::from_fn(width, height, |x, y| {
        let r = (x * 255 / width.max(1)) as u8;
        let g = (y * 255 / height.max(1)) as u8;
        Rgba([r, g, 160, 255])
    });
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Png).unwrap();
    ImagePayload::from_bytes("image/png", &out.into_inner())
}

/// Upstream double: counts calls, optionally delays, fails for listed prompts.
pub struct CountingBackend {
    calls: AtomicUsize,
    per_key: Mutex<HashMap<ImageRequestKey, usize>>,
    delay: Duration,
    failing: Vec<String>,
}

impl CountingBackend {
    pub fn new() -> Arc<Self> {
        Self::with(Duration::ZERO, &[])
    }

    pub fn with(delay: Duration, failing: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            per_key: Mutex::new(HashMap::new()),
            delay,
            failing: failing.iter().map(|s| s.to_string()).collect(),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn calls_for(&self, key: &ImageRequestKey) -> usize {
        self.per_key.lock().unwrap().get(key).copied().unwrap_or(0)
    }
}

#[async_trait]
impl ImageBackend for CountingBackend {
    async fn generate(&self, key: &ImageRequestKey) -> Result<ImagePayload> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.per_key.lock().unwrap().entry(key.clone()).or_default() += 1;
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.failing.iter().any(|p| p == &key.prompt) {
            return Err(Error::CacheBackendUnavailable(format!("upstream refused {}", key.prompt)));
        }
        Ok(gradient_png(key.width.min(256), key.height.min(256)))
    }
}

/// Upstream double whose responses are held until released per prompt.
pub struct GatedBackend {
    gates: Mutex<HashMap<String, Arc<Notify>>>,
    calls: AtomicUsize,
}

impl GatedBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            gates: Mutex::new(HashMap::new()),
            calls: AtomicUsize::new(0),
        })
    }

    fn gate(&self, prompt: &str) -> Arc<Notify> {
        self.gates
            .lock()
            .unwrap()
            .entry(prompt.to_string())
            .or_insert_with(|| Arc::new(Notify::new()))
            .clone()
    }

    /// Let the (single) pending request for `prompt` complete.
    pub fn release(&self, prompt: &str) {
        self.gate(prompt).notify_one();
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ImageBackend for GatedBackend {
    async fn generate(&self, key: &ImageRequestKey) -> Result<ImagePayload> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.gate(&key.prompt).notified().await;
        Ok(gradient_png(32, 32))
    }
}

/// In-process client stack over `backend`: provisioner cache behind the
/// client mirror cache.
pub fn client_for(backend: Arc<dyn ImageBackend>) -> (ImageClient, ImageProvisioner) {
    let config = CacheConfig::default();
    let provisioner = ImageProvisioner::new(backend, &config);
    let client = ImageClient::new(Arc::new(provisioner.clone()), &config);
    (client, provisioner)
}

/// Poll until `cond` holds, yielding to other tasks in between.
pub async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..10_000 {
        if cond() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition not reached");
}
