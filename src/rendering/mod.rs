//! Rasterization of settled surfaces.
//!
//! Two engines capture a [`SurfaceFrame`]: the full-layout engine
//! re-parses the serialized document and paints it through a display list,
//! the screenshot engine paints the live box tree directly. [`CaptureEngine::Auto`]
//! tries the former and falls back to the latter.

pub mod layout;
pub mod paint;
pub mod raster;
pub mod screenshot;

use std::fmt;
use std::io::Cursor;
use std::str::FromStr;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::imageops::{self, FilterType};
use image::{ImageFormat, RgbaImage};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::surface::fonts::GlyphBitmap;
use crate::surface::{RenderSurface, SurfaceFrame, Typeface};
use crate::surface::Color;
use crate::{Error, Result};

pub use raster::FullLayoutRasterizer;
pub use screenshot::ScreenshotRasterizer;

use layout::GlyphRun;

/// Largest accepted canvas or output edge, in pixels.
pub const MAX_OUTPUT_DIMENSION: u32 = 16_384;

/// Largest accepted canvas or output area, in pixels.
pub const MAX_OUTPUT_AREA: u64 = 64 * 1024 * 1024;

/// Horizontal shear applied to emphasised glyphs, per pixel of height.
const ITALIC_SHEAR: f32 = 0.2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CaptureEngine {
    #[default]
    Auto,
    FullLayout,
    Screenshot,
}

impl fmt::Display for CaptureEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CaptureEngine::Auto => "auto",
            CaptureEngine::FullLayout => "full-layout",
            CaptureEngine::Screenshot => "screenshot",
        })
    }
}

impl FromStr for CaptureEngine {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(CaptureEngine::Auto),
            "full-layout" | "full_layout" | "fulllayout" => Ok(CaptureEngine::FullLayout),
            "screenshot" => Ok(CaptureEngine::Screenshot),
            other => Err(Error::ConfigError(format!("unknown capture engine {:?}", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CaptureOptions {
    pub width: u32,
    pub height: u32,
    pub pixel_ratio: f32,
    /// Painted beneath the page; visible wherever the page is transparent.
    pub background_color: Color,
    pub engine: CaptureEngine,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            width: 1080,
            height: 1920,
            pixel_ratio: 1.0,
            background_color: Color::BLACK,
            engine: CaptureEngine::Auto,
        }
    }
}

impl CaptureOptions {
    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(Error::RenderError(format!(
                "capture size must be non-zero, got {}x{}",
                self.width, self.height
            )));
        }
        if !self.pixel_ratio.is_finite() || self.pixel_ratio <= 0.0 {
            return Err(Error::RenderError(format!(
                "pixel ratio must be positive, got {}",
                self.pixel_ratio
            )));
        }
        if !within_bounds(self.width, self.height) {
            return Err(Error::RenderError(format!(
                "canvas size {}x{} out of range",
                self.width, self.height
            )));
        }
        let (w, h) = self.output_size();
        if !within_bounds(w, h) {
            return Err(Error::RenderError(format!("output size {}x{} out of range", w, h)));
        }
        Ok(())
    }

    /// Size of the produced bitmap: the canvas scaled by the pixel ratio.
    pub fn output_size(&self) -> (u32, u32) {
        let scale = |v: u32| (v as f32 * self.pixel_ratio).round() as u32;
        (scale(self.width), scale(self.height))
    }
}

fn within_bounds(w: u32, h: u32) -> bool {
    w > 0
        && h > 0
        && w <= MAX_OUTPUT_DIMENSION
        && h <= MAX_OUTPUT_DIMENSION
        && w as u64 * h as u64 <= MAX_OUTPUT_AREA
}

/// A captured bitmap.
#[derive(Debug, Clone)]
pub struct CaptureResult {
    pub width: u32,
    pub height: u32,
    pub bitmap: RgbaImage,
}

impl CaptureResult {
    pub fn new(bitmap: RgbaImage) -> Self {
        Self {
            width: bitmap.width(),
            height: bitmap.height(),
            bitmap,
        }
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        (x < self.width && y < self.height).then(|| self.bitmap.get_pixel(x, y).0)
    }

    pub fn to_png(&self) -> Result<Vec<u8>> {
        let mut out = Cursor::new(Vec::new());
        self.bitmap
            .write_to(&mut out, ImageFormat::Png)
            .map_err(|e| Error::RenderError(format!("PNG encoding failed: {}", e)))?;
        Ok(out.into_inner())
    }

    pub fn to_data_url(&self) -> Result<String> {
        Ok(format!("data:image/png;base64,{}", STANDARD.encode(self.to_png()?)))
    }

    /// Hex SHA-256 over the dimensions and raw RGBA pixels.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.width.to_le_bytes());
        hasher.update(self.height.to_le_bytes());
        hasher.update(self.bitmap.as_raw());
        hex::encode(hasher.finalize())
    }
}

/// One capture engine.
pub trait Rasterizer: Send + Sync {
    fn name(&self) -> &'static str;

    fn capture(&self, frame: &SurfaceFrame, options: &CaptureOptions) -> Result<CaptureResult>;
}

/// Tries `primary`, and on an engine failure retries once with `fallback`.
pub struct AutoRasterizer {
    primary: Box<dyn Rasterizer>,
    fallback: Box<dyn Rasterizer>,
}

impl AutoRasterizer {
    pub fn new(primary: Box<dyn Rasterizer>, fallback: Box<dyn Rasterizer>) -> Self {
        Self { primary, fallback }
    }
}

impl Default for AutoRasterizer {
    fn default() -> Self {
        Self::new(Box::new(FullLayoutRasterizer), Box::new(ScreenshotRasterizer))
    }
}

impl Rasterizer for AutoRasterizer {
    fn name(&self) -> &'static str {
        "auto"
    }

    fn capture(&self, frame: &SurfaceFrame, options: &CaptureOptions) -> Result<CaptureResult> {
        frame.ensure_settled()?;
        options.validate()?;
        match self.primary.capture(frame, options) {
            Ok(result) => Ok(result),
            Err(e @ Error::SurfaceNotReady { .. }) => Err(e),
            Err(e) => {
                warn!(
                    "{} capture failed ({}), falling back to {}",
                    self.primary.name(),
                    e,
                    self.fallback.name()
                );
                self.fallback.capture(frame, options)
            }
        }
    }
}

pub fn rasterizer_for(engine: CaptureEngine) -> Box<dyn Rasterizer> {
    match engine {
        CaptureEngine::Auto => Box::new(AutoRasterizer::default()),
        CaptureEngine::FullLayout => Box::new(FullLayoutRasterizer),
        CaptureEngine::Screenshot => Box::new(ScreenshotRasterizer),
    }
}

/// Capture the surface's current frame with the engine named in `options`.
///
/// Painting runs on the blocking pool. Fails with
/// [`Error::SurfaceNotReady`] unless the surface is settled.
pub async fn capture(surface: &RenderSurface, options: &CaptureOptions) -> Result<CaptureResult> {
    let frame = surface.frame();
    frame.ensure_settled()?;
    options.validate()?;
    let rasterizer = rasterizer_for(options.engine);
    let options = options.clone();
    debug!(
        "capturing generation {} with {} engine",
        frame.generation.0,
        rasterizer.name()
    );
    tokio::task::spawn_blocking(move || rasterizer.capture(&frame, &options))
        .await
        .map_err(|e| Error::RenderError(format!("capture task failed: {}", e)))?
}

/// Scale a canvas painted at logical size to the requested pixel ratio.
pub(crate) fn finish(canvas: RgbaImage, options: &CaptureOptions) -> CaptureResult {
    let (w, h) = options.output_size();
    if (w, h) == canvas.dimensions() {
        return CaptureResult::new(canvas);
    }
    CaptureResult::new(imageops::resize(&canvas, w, h, FilterType::Triangle))
}

/// A glyph ready to blit: coverage plus the top-left destination pixel.
pub(crate) struct PlacedGlyph {
    pub x: i32,
    pub y: i32,
    pub bitmap: GlyphBitmap,
}

/// Extra horizontal passes used to embolden heavy weights.
fn bold_passes(weight: u16) -> i32 {
    match weight {
        0..=599 => 0,
        600..=799 => 1,
        _ => 2,
    }
}

/// Position every glyph of `run`, applying faux bold and italic.
pub(crate) fn place_glyphs(face: &Typeface, run: &GlyphRun) -> Vec<PlacedGlyph> {
    let size = run.font.size;
    let passes = bold_passes(run.font.weight);
    let mut pen = run.x;
    let mut placed = Vec::new();
    for ch in run.text.chars() {
        let mut bitmap = face.rasterize(ch, size);
        if bitmap.width > 0 && bitmap.height > 0 {
            if run.font.italic {
                bitmap = shear(bitmap);
            }
            let x = pen.round() as i32 + bitmap.left;
            let y = run.baseline.round() as i32 - bitmap.top;
            for dx in 1..=passes {
                placed.push(PlacedGlyph {
                    x: x + dx,
                    y,
                    bitmap: bitmap.clone(),
                });
            }
            placed.push(PlacedGlyph { x, y, bitmap });
        }
        pen += face.advance(ch, size);
    }
    placed
}

fn shear(glyph: GlyphBitmap) -> GlyphBitmap {
    let extra = (glyph.height as f32 * ITALIC_SHEAR).ceil() as usize;
    let width = glyph.width + extra;
    let mut coverage = vec![0u8; width * glyph.height];
    for row in 0..glyph.height {
        let shift = ((glyph.height - row) as f32 * ITALIC_SHEAR).round() as usize;
        let shift = shift.min(extra);
        let src = &glyph.coverage[row * glyph.width..(row + 1) * glyph.width];
        coverage[row * width + shift..row * width + shift + glyph.width].copy_from_slice(src);
    }
    GlyphBitmap {
        width,
        coverage,
        ..glyph
    }
}
