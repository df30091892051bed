//! Screenshot engine: paints the live box tree straight into an RGBA
//! buffer. It never fails on content it cannot read; unavailable images
//! become neutral frames.

use image::imageops::{self, FilterType};
use image::{Rgba, RgbaImage};
use log::debug;

use super::layout::{layout_document, ImageSource, LayoutContent, Rect};
use super::paint::{corner_coverage, FRAME_THICKNESS};
use super::{finish, place_glyphs, CaptureOptions, CaptureResult, Rasterizer};
use crate::surface::{Color, SurfaceFrame};
use crate::Result;

#[derive(Debug, Clone, Copy, Default)]
pub struct ScreenshotRasterizer;

impl Rasterizer for ScreenshotRasterizer {
    fn name(&self) -> &'static str {
        "screenshot"
    }

    fn capture(&self, frame: &SurfaceFrame, options: &CaptureOptions) -> Result<CaptureResult> {
        frame.ensure_settled()?;
        options.validate()?;

        let tree = layout_document(&frame.document, &frame.stylesheet, &frame.typeface, frame.viewport);
        let bg = options.background_color;
        let mut canvas = RgbaImage::from_pixel(options.width, options.height, Rgba([bg.r, bg.g, bg.b, bg.a]));
        fill_rect(
            &mut canvas,
            &Rect {
                x: 0,
                y: 0,
                width: tree.viewport.width,
                height: tree.viewport.height,
            },
            tree.background,
        );

        for node in &tree.nodes {
            match &node.content {
                LayoutContent::Text(runs) => {
                    for run in runs {
                        for glyph in place_glyphs(&frame.typeface, run) {
                            let bitmap = &glyph.bitmap;
                            for row in 0..bitmap.height {
                                for col in 0..bitmap.width {
                                    let coverage = bitmap.coverage[row * bitmap.width + col];
                                    if coverage > 0 {
                                        blend_at(
                                            &mut canvas,
                                            glyph.x + col as i32,
                                            glyph.y + row as i32,
                                            run.font.color,
                                            coverage,
                                        );
                                    }
                                }
                            }
                        }
                    }
                }
                LayoutContent::Image { rect, source, radius } => match source {
                    ImageSource::Decoded(image) if rect.width > 0 && rect.height > 0 => {
                        let mut scaled =
                            imageops::resize(&**image, rect.width, rect.height, FilterType::Triangle);
                        round_corners(&mut scaled, *radius);
                        imageops::overlay(&mut canvas, &scaled, rect.x as i64, rect.y as i64);
                    }
                    ImageSource::Decoded(_) => {}
                    ImageSource::Unavailable { .. } | ImageSource::CrossOrigin { .. } => {
                        stroke_rect(&mut canvas, rect, FRAME_THICKNESS, tree.frame_color);
                    }
                },
                LayoutContent::Empty => {}
            }
        }
        debug!(
            "screenshot painted {} node(s) for generation {}",
            tree.nodes.len(),
            frame.generation.0
        );
        Ok(finish(canvas, options))
    }
}

fn round_corners(image: &mut RgbaImage, radius: f32) {
    if radius <= 0.0 {
        return;
    }
    let (w, h) = image.dimensions();
    for (x, y, px) in image.enumerate_pixels_mut() {
        let coverage = corner_coverage(x, y, w, h, radius);
        if coverage < 1.0 {
            px.0[3] = (px.0[3] as f32 * coverage).round() as u8;
        }
    }
}

/// Source-over blend of `color` scaled by `coverage` onto one pixel.
fn blend_at(canvas: &mut RgbaImage, x: i32, y: i32, color: Color, coverage: u8) {
    if x < 0 || y < 0 || x as u32 >= canvas.width() || y as u32 >= canvas.height() {
        return;
    }
    let alpha = color.a as u32 * coverage as u32 / 255;
    if alpha == 0 {
        return;
    }
    let dst = canvas.get_pixel_mut(x as u32, y as u32);
    let inv = 255 - alpha;
    let mix = |s: u8, d: u8| ((s as u32 * alpha + d as u32 * inv + 127) / 255) as u8;
    dst.0 = [
        mix(color.r, dst.0[0]),
        mix(color.g, dst.0[1]),
        mix(color.b, dst.0[2]),
        (alpha + (dst.0[3] as u32 * inv + 127) / 255).min(255) as u8,
    ];
}

fn fill_rect(canvas: &mut RgbaImage, rect: &Rect, color: Color) {
    if color.a == 0 {
        return;
    }
    let x0 = rect.x.max(0);
    let y0 = rect.y.max(0);
    let x1 = rect.right().min(canvas.width() as i32);
    let y1 = rect.bottom().min(canvas.height() as i32);
    for y in y0..y1 {
        for x in x0..x1 {
            blend_at(canvas, x, y, color, 255);
        }
    }
}

fn stroke_rect(canvas: &mut RgbaImage, rect: &Rect, thickness: u32, color: Color) {
    let t = thickness.min(rect.width).min(rect.height);
    let edges = [
        Rect { height: t, ..rect.clone() },
        Rect {
            y: rect.bottom() - t as i32,
            height: t,
            ..rect.clone()
        },
        Rect { width: t, ..rect.clone() },
        Rect {
            x: rect.right() - t as i32,
            width: t,
            ..rect.clone()
        },
    ];
    for edge in &edges {
        fill_rect(canvas, edge, color);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rendering::CaptureEngine;
    use crate::surface::RenderSurface;
    use crate::RenderConfig;

    #[tokio::test]
    async fn cross_origin_images_paint_a_frame() {
        let surface = RenderSurface::new(&RenderConfig::default());
        surface.mount(r#"<img src="https://example.com/a.png" width="200" height="100">"#);
        surface.await_settled().await;

        let options = CaptureOptions {
            engine: CaptureEngine::Screenshot,
            ..CaptureOptions::default()
        };
        let result = ScreenshotRasterizer.capture(&surface.frame(), &options).unwrap();
        assert_eq!((result.width, result.height), (1080, 1920));

        // 200x100 frame centred on the page.
        let frame = Color::parse("#475569").unwrap();
        let (left, top) = (540 - 100, 960 - 50);
        assert_eq!(result.pixel(left as u32, top as u32), Some([frame.r, frame.g, frame.b, 255]));
        assert_eq!(result.pixel(540, 960), Some([0, 0, 0, 255]));
    }

    #[tokio::test]
    async fn very_tall_images_are_clipped_not_fatal() {
        let surface = RenderSurface::new(&RenderConfig::default());
        surface.mount(r#"<img src="https://cdn.example.com/a.png" width="1" height="4000000000"><p>after</p>"#);
        surface.await_settled().await;

        let options = CaptureOptions {
            engine: CaptureEngine::Screenshot,
            ..CaptureOptions::default()
        };
        let result = ScreenshotRasterizer.capture(&surface.frame(), &options).unwrap();
        assert_eq!((result.width, result.height), (1080, 1920));
    }

    #[test]
    fn rounded_corners_clear_only_the_corners() {
        let mut image = RgbaImage::from_pixel(40, 20, Rgba([200, 10, 10, 255]));
        round_corners(&mut image, 12.0);
        assert_eq!(image.get_pixel(0, 0).0[3], 0);
        assert_eq!(image.get_pixel(39, 19).0[3], 0);
        assert_eq!(image.get_pixel(20, 0).0[3], 255);
        assert_eq!(image.get_pixel(20, 10).0, [200, 10, 10, 255]);
    }

    #[test]
    fn blending_respects_coverage() {
        let mut canvas = RgbaImage::from_pixel(1, 1, Rgba([0, 0, 0, 255]));
        blend_at(&mut canvas, 0, 0, Color::WHITE, 128);
        let v = canvas.get_pixel(0, 0).0[0];
        assert!((127..=129).contains(&v));
        blend_at(&mut canvas, 5, 5, Color::WHITE, 255);
    }
}
