//! Full-layout engine: serializes the frame to a standalone document,
//! lays the re-parsed document out and paints the display list with
//! tiny-skia.
//!
//! The engine only sees what the serialized document carries. External
//! stylesheets and images it cannot read make the capture fail, which is
//! what sends [`crate::rendering::CaptureEngine::Auto`] to the fallback.

use image::RgbaImage;
use log::debug;
use tiny_skia::{
    ColorU8, FillRule, FilterQuality, Mask, Paint, Path, PathBuilder, Pixmap, PixmapPaint, Rect,
    Transform,
};

use super::layout::{layout_document, GlyphRun, ImageSource, LayoutContent, RunFont};
use super::paint::{build_display_list, PaintCommand};
use super::{finish, place_glyphs, CaptureOptions, CaptureResult, Rasterizer};
use crate::surface::fonts::GlyphBitmap;
use crate::surface::{Color, SlideDocument, SurfaceFrame, Typeface};
use crate::{Error, Result};

const NAME: &str = "full-layout";

#[derive(Debug, Clone, Copy, Default)]
pub struct FullLayoutRasterizer;

impl Rasterizer for FullLayoutRasterizer {
    fn name(&self) -> &'static str {
        NAME
    }

    fn capture(&self, frame: &SurfaceFrame, options: &CaptureOptions) -> Result<CaptureResult> {
        frame.ensure_settled()?;
        options.validate()?;

        let viewport = frame.viewport;
        let html = frame
            .document
            .to_html(&frame.stylesheet, viewport.width, viewport.height);
        let document = SlideDocument::parse(&html);
        if let Some(href) = document.external_stylesheets.first() {
            return Err(Error::engine(NAME, format!("cannot read stylesheet {}", href)));
        }

        let tree = layout_document(&document, &frame.stylesheet, &frame.typeface, viewport);
        for node in &tree.nodes {
            if let LayoutContent::Image { source, .. } = &node.content {
                match source {
                    ImageSource::CrossOrigin { url } => {
                        return Err(Error::engine(NAME, format!("cross-origin image {}", url)))
                    }
                    ImageSource::Unavailable { reason } => {
                        return Err(Error::engine(NAME, format!("undecodable image: {}", reason)))
                    }
                    ImageSource::Decoded(_) => {}
                }
            }
        }

        let list = build_display_list(&tree);
        debug!("painting {} command(s) for generation {}", list.len(), frame.generation.0);
        let mut pixmap = Pixmap::new(options.width, options.height).ok_or_else(|| {
            Error::engine(
                NAME,
                format!("cannot allocate {}x{} canvas", options.width, options.height),
            )
        })?;
        pixmap.fill(skia_color(options.background_color));
        for command in &list {
            paint_command(&mut pixmap, command, &frame.typeface)?;
        }
        Ok(finish(pixmap_to_image(&pixmap)?, options))
    }
}

fn skia_color(c: Color) -> tiny_skia::Color {
    tiny_skia::Color::from_rgba8(c.r, c.g, c.b, c.a)
}

fn solid(rgba: (u8, u8, u8, u8)) -> Paint<'static> {
    let mut paint = Paint::default();
    paint.set_color_rgba8(rgba.0, rgba.1, rgba.2, rgba.3);
    paint.anti_alias = false;
    paint
}

fn fill(pixmap: &mut Pixmap, x: i32, y: i32, w: u32, h: u32, paint: &Paint) {
    if let Some(rect) = Rect::from_xywh(x as f32, y as f32, w as f32, h as f32) {
        pixmap.fill_rect(rect, paint, Transform::identity(), None);
    }
}

fn paint_command(pixmap: &mut Pixmap, command: &PaintCommand, face: &Typeface) -> Result<()> {
    match command {
        PaintCommand::SolidRect {
            x,
            y,
            width,
            height,
            rgba,
        } => fill(pixmap, *x, *y, *width, *height, &solid(*rgba)),
        PaintCommand::StrokeRect {
            x,
            y,
            width,
            height,
            thickness,
            rgba,
        } => {
            let paint = solid(*rgba);
            let t = (*thickness).min(*width).min(*height);
            fill(pixmap, *x, *y, *width, t, &paint);
            fill(pixmap, *x, y + *height as i32 - t as i32, *width, t, &paint);
            fill(pixmap, *x, *y, t, *height, &paint);
            fill(pixmap, x + *width as i32 - t as i32, *y, t, *height, &paint);
        }
        PaintCommand::Text {
            x,
            baseline,
            text,
            font,
        } => {
            let run = GlyphRun {
                x: *x,
                baseline: *baseline,
                text: text.clone(),
                font: *font,
            };
            for glyph in place_glyphs(face, &run) {
                if let Some(glyph_pixmap) = glyph_pixmap(&glyph.bitmap, font) {
                    pixmap.draw_pixmap(
                        glyph.x,
                        glyph.y,
                        glyph_pixmap.as_ref(),
                        &PixmapPaint::default(),
                        Transform::identity(),
                        None,
                    );
                }
            }
        }
        PaintCommand::Image {
            x,
            y,
            width,
            height,
            radius,
            image,
        } => {
            if image.width() == 0 || image.height() == 0 || *width == 0 || *height == 0 {
                return Ok(());
            }
            let source = image_to_pixmap(image)?;
            let sx = *width as f32 / image.width() as f32;
            let sy = *height as f32 / image.height() as f32;
            let paint = PixmapPaint {
                quality: FilterQuality::Bilinear,
                ..PixmapPaint::default()
            };
            let mask = corner_mask(pixmap, *x, *y, *width, *height, *radius);
            pixmap.draw_pixmap(
                0,
                0,
                source.as_ref(),
                &paint,
                Transform::from_row(sx, 0.0, 0.0, sy, *x as f32, *y as f32),
                mask.as_ref(),
            );
        }
    }
    Ok(())
}

/// Canvas-sized clip mask for a rounded destination rectangle; `None`
/// when the corners are square.
fn corner_mask(pixmap: &Pixmap, x: i32, y: i32, w: u32, h: u32, radius: f32) -> Option<Mask> {
    if radius <= 0.0 {
        return None;
    }
    let path = rounded_rect(x as f32, y as f32, w as f32, h as f32, radius)?;
    let mut mask = Mask::new(pixmap.width(), pixmap.height())?;
    mask.fill_path(&path, FillRule::Winding, true, Transform::identity());
    Some(mask)
}

fn rounded_rect(x: f32, y: f32, w: f32, h: f32, radius: f32) -> Option<Path> {
    let r = radius.min(w / 2.0).min(h / 2.0);
    // Cubic control offset approximating a quarter circle.
    let k = r * (1.0 - 0.552_284_8);
    let (right, bottom) = (x + w, y + h);
    let mut pb = PathBuilder::new();
    pb.move_to(x + r, y);
    pb.line_to(right - r, y);
    pb.cubic_to(right - k, y, right, y + k, right, y + r);
    pb.line_to(right, bottom - r);
    pb.cubic_to(right, bottom - k, right - k, bottom, right - r, bottom);
    pb.line_to(x + r, bottom);
    pb.cubic_to(x + k, bottom, x, bottom - k, x, bottom - r);
    pb.line_to(x, y + r);
    pb.cubic_to(x, y + k, x + k, y, x + r, y);
    pb.close();
    pb.finish()
}

fn glyph_pixmap(glyph: &GlyphBitmap, font: &RunFont) -> Option<Pixmap> {
    let mut pixmap = Pixmap::new(glyph.width as u32, glyph.height as u32)?;
    let c = font.color;
    for (dst, &coverage) in pixmap.pixels_mut().iter_mut().zip(&glyph.coverage) {
        let alpha = (c.a as u16 * coverage as u16 / 255) as u8;
        *dst = ColorU8::from_rgba(c.r, c.g, c.b, alpha).premultiply();
    }
    Some(pixmap)
}

fn image_to_pixmap(image: &RgbaImage) -> Result<Pixmap> {
    let mut pixmap = Pixmap::new(image.width(), image.height()).ok_or_else(|| {
        Error::engine(
            NAME,
            format!("cannot allocate {}x{} image", image.width(), image.height()),
        )
    })?;
    for (dst, px) in pixmap.pixels_mut().iter_mut().zip(image.pixels()) {
        let [r, g, b, a] = px.0;
        *dst = ColorU8::from_rgba(r, g, b, a).premultiply();
    }
    Ok(pixmap)
}

fn pixmap_to_image(pixmap: &Pixmap) -> Result<RgbaImage> {
    let mut data = Vec::with_capacity(pixmap.data().len());
    for px in pixmap.pixels() {
        let c: ColorU8 = px.demultiply();
        data.extend_from_slice(&[c.red(), c.green(), c.blue(), c.alpha()]);
    }
    RgbaImage::from_raw(pixmap.width(), pixmap.height(), data)
        .ok_or_else(|| Error::engine(NAME, "canvas size mismatch"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rendering::CaptureEngine;
    use crate::surface::{RenderSurface, SurfacePhase};
    use crate::RenderConfig;

    async fn settled(markup: &str) -> RenderSurface {
        let surface = RenderSurface::new(&RenderConfig::default());
        surface.mount(markup);
        surface.await_settled().await;
        surface
    }

    fn options() -> CaptureOptions {
        CaptureOptions {
            engine: CaptureEngine::FullLayout,
            ..CaptureOptions::default()
        }
    }

    #[tokio::test]
    async fn paints_text_over_black_page() {
        let surface = settled("<h1>Hello</h1>").await;
        let frame = surface.frame();
        assert_eq!(frame.phase, SurfacePhase::Settled);
        let result = FullLayoutRasterizer.capture(&frame, &options()).unwrap();
        assert_eq!((result.width, result.height), (1080, 1920));
        assert_eq!(result.pixel(0, 0), Some([0, 0, 0, 255]));
        let lit = result.bitmap.pixels().filter(|p| p.0[0] > 128).count();
        assert!(lit > 0, "heading should paint light pixels");
    }

    #[tokio::test]
    async fn cross_origin_images_fail_the_engine() {
        let surface = settled(r#"<img src="https://example.com/a.png">"#).await;
        let err = FullLayoutRasterizer.capture(&surface.frame(), &options()).unwrap_err();
        assert!(matches!(err, Error::CaptureEngineFailure { engine: "full-layout", .. }));
    }

    #[tokio::test]
    async fn external_stylesheets_fail_the_engine() {
        let surface = settled(r#"<link rel="stylesheet" href="https://cdn.example.com/x.css"><p>x</p>"#).await;
        assert!(FullLayoutRasterizer.capture(&surface.frame(), &options()).is_err());
    }

    #[tokio::test]
    async fn pixel_ratio_scales_output() {
        let surface = settled("<p>Small</p>").await;
        let opts = CaptureOptions {
            width: 540,
            height: 960,
            pixel_ratio: 2.0,
            ..options()
        };
        let result = FullLayoutRasterizer.capture(&surface.frame(), &opts).unwrap();
        assert_eq!((result.width, result.height), (1080, 1920));
    }

    #[test]
    fn rounded_images_leave_corners_unpainted() {
        let mut pixmap = Pixmap::new(60, 40).unwrap();
        pixmap.fill(tiny_skia::Color::BLACK);
        let image = std::sync::Arc::new(RgbaImage::from_pixel(4, 2, image::Rgba([0, 255, 0, 255])));
        let command = PaintCommand::Image {
            x: 10,
            y: 10,
            width: 40,
            height: 20,
            radius: 12.0,
            image,
        };
        paint_command(&mut pixmap, &command, &Typeface::Builtin).unwrap();

        let green = |x, y| pixmap.pixel(x, y).map(|p| p.green()).unwrap_or(0);
        assert_eq!(green(10, 10), 0);
        assert_eq!(green(49, 29), 0);
        assert_eq!(green(30, 20), 255);
        assert!(green(30, 10) > 200);
    }

    #[test]
    fn unsettled_frames_are_rejected() {
        let surface = RenderSurface::new(&RenderConfig::default());
        surface.mount("<p>x</p>");
        let err = FullLayoutRasterizer.capture(&surface.frame(), &options()).unwrap_err();
        assert!(matches!(err, Error::SurfaceNotReady { .. }));
    }
}
