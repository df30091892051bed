//! Font loading and glyph rasterization.
//!
//! Configured font files are loaded asynchronously; the surface treats the
//! load as its font-readiness signal. When nothing is configured, or nothing
//! loads, text is drawn with a built-in block typeface so output stays
//! deterministic on every host.

use std::path::PathBuf;
use std::sync::Arc;

use fontdue::{Font, FontSettings};
use log::{debug, warn};
use tokio::sync::OnceCell;

/// Coverage bitmap for one glyph, positioned relative to the pen.
#[derive(Debug, Clone, PartialEq)]
pub struct GlyphBitmap {
    pub width: usize,
    pub height: usize,
    /// Horizontal offset from the pen position to the bitmap's left edge.
    pub left: i32,
    /// Distance from the baseline up to the bitmap's top edge.
    pub top: i32,
    pub coverage: Vec<u8>,
}

/// The face text is measured and drawn with.
#[derive(Clone)]
pub enum Typeface {
    /// Deterministic rectangles sized from the character class.
    Builtin,
    Outline(Arc<Font>),
}

impl std::fmt::Debug for Typeface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Typeface::Builtin => f.write_str("Typeface::Builtin"),
            Typeface::Outline(_) => f.write_str("Typeface::Outline"),
        }
    }
}

impl Typeface {
    pub fn advance(&self, ch: char, px: f32) -> f32 {
        match self {
            Typeface::Builtin => builtin_advance(ch, px),
            Typeface::Outline(font) => font.metrics(ch, px).advance_width,
        }
    }

    pub fn measure(&self, text: &str, px: f32) -> f32 {
        text.chars().map(|c| self.advance(c, px)).sum()
    }

    pub fn rasterize(&self, ch: char, px: f32) -> GlyphBitmap {
        match self {
            Typeface::Builtin => builtin_glyph(ch, px),
            Typeface::Outline(font) => {
                let (metrics, coverage) = font.rasterize(ch, px);
                GlyphBitmap {
                    width: metrics.width,
                    height: metrics.height,
                    left: metrics.xmin,
                    top: metrics.height as i32 + metrics.ymin,
                    coverage,
                }
            }
        }
    }
}

fn builtin_advance(ch: char, px: f32) -> f32 {
    if ch.is_whitespace() {
        px * 0.3
    } else if ch.is_ascii_punctuation() {
        px * 0.32
    } else {
        px * 0.56
    }
}

fn builtin_glyph(ch: char, px: f32) -> GlyphBitmap {
    if ch.is_whitespace() || ch.is_control() {
        return GlyphBitmap {
            width: 0,
            height: 0,
            left: 0,
            top: 0,
            coverage: Vec::new(),
        };
    }
    let (w, h) = if ch.is_ascii_punctuation() {
        (px * 0.14, px * 0.14)
    } else if ch.is_uppercase() || ch.is_ascii_digit() {
        (px * 0.44, px * 0.7)
    } else {
        (px * 0.44, px * 0.5)
    };
    let width = w.round().max(1.0) as usize;
    let height = h.round().max(1.0) as usize;
    GlyphBitmap {
        width,
        height,
        left: (px * 0.06).round() as i32,
        top: height as i32,
        coverage: vec![255; width * height],
    }
}

/// Loads the first usable font among the configured sources, once.
pub struct FontBook {
    sources: Vec<PathBuf>,
    loaded: OnceCell<Option<Arc<Font>>>,
}

impl FontBook {
    pub fn new(sources: Vec<PathBuf>) -> Self {
        Self {
            sources,
            loaded: OnceCell::new(),
        }
    }

    /// Whether awaiting [`FontBook::ready`] would still suspend.
    pub fn is_pending(&self) -> bool {
        !self.sources.is_empty() && !self.loaded.initialized()
    }

    /// Wait until font loading has finished.
    pub async fn ready(&self) -> Typeface {
        let font = self
            .loaded
            .get_or_init(|| async {
                for path in &self.sources {
                    match tokio::fs::read(path).await {
                        Ok(bytes) => match Font::from_bytes(bytes, FontSettings::default()) {
                            Ok(font) => {
                                debug!("loaded font {}", path.display());
                                return Some(Arc::new(font));
                            }
                            Err(e) => warn!("unusable font {}: {}", path.display(), e),
                        },
                        Err(e) => warn!("cannot read font {}: {}", path.display(), e),
                    }
                }
                if !self.sources.is_empty() {
                    warn!("no configured font loaded, using built-in typeface");
                }
                None
            })
            .await;
        Self::face(font.as_ref())
    }

    /// Typeface to use right now, without waiting.
    pub fn current(&self) -> Typeface {
        Self::face(self.loaded.get().and_then(Option::as_ref))
    }

    fn face(font: Option<&Arc<Font>>) -> Typeface {
        match font {
            Some(font) => Typeface::Outline(Arc::clone(font)),
            None => Typeface::Builtin,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_glyphs_are_deterministic() {
        let face = Typeface::Builtin;
        assert_eq!(face.rasterize('A', 64.0), face.rasterize('A', 64.0));
        assert!(face.rasterize(' ', 64.0).coverage.is_empty());
        assert!(face.measure("Hello", 32.0) > face.measure("Hi", 32.0));
    }

    #[tokio::test]
    async fn missing_font_files_fall_back_to_builtin() {
        let book = FontBook::new(vec![PathBuf::from("/nonexistent/font.ttf")]);
        assert!(book.is_pending());
        assert!(matches!(book.ready().await, Typeface::Builtin));
        assert!(!book.is_pending());
    }

    #[tokio::test]
    async fn no_sources_is_never_pending() {
        let book = FontBook::new(Vec::new());
        assert!(!book.is_pending());
        assert!(matches!(book.current(), Typeface::Builtin));
    }
}
