//! Display list built from a layout tree.

use std::sync::Arc;

use image::RgbaImage;

use super::layout::{ImageSource, LayoutContent, LayoutTree, RunFont};
use crate::surface::Color;

/// Thickness of the frame drawn where an image cannot be shown.
pub const FRAME_THICKNESS: u32 = 2;

#[derive(Debug, Clone, PartialEq)]
pub enum PaintCommand {
    SolidRect {
        x: i32,
        y: i32,
        width: u32,
        height: u32,
        rgba: (u8, u8, u8, u8),
    },
    StrokeRect {
        x: i32,
        y: i32,
        width: u32,
        height: u32,
        thickness: u32,
        rgba: (u8, u8, u8, u8),
    },
    Text {
        x: f32,
        baseline: f32,
        text: String,
        font: RunFont,
    },
    /// Draw `image` scaled into the destination rectangle, clipped to
    /// corners of `radius`.
    Image {
        x: i32,
        y: i32,
        width: u32,
        height: u32,
        radius: f32,
        image: Arc<RgbaImage>,
    },
}

pub(crate) fn rgba(c: Color) -> (u8, u8, u8, u8) {
    (c.r, c.g, c.b, c.a)
}

/// Flatten the tree into paint order: page background, then each node in
/// document order.
pub fn build_display_list(tree: &LayoutTree) -> Vec<PaintCommand> {
    let mut list = Vec::new();
    if tree.background.a > 0 {
        list.push(PaintCommand::SolidRect {
            x: 0,
            y: 0,
            width: tree.viewport.width,
            height: tree.viewport.height,
            rgba: rgba(tree.background),
        });
    }
    for node in &tree.nodes {
        match &node.content {
            LayoutContent::Text(runs) => {
                list.extend(runs.iter().map(|run| PaintCommand::Text {
                    x: run.x,
                    baseline: run.baseline,
                    text: run.text.clone(),
                    font: run.font,
                }));
            }
            LayoutContent::Image { rect, source, radius } => match source {
                ImageSource::Decoded(image) => list.push(PaintCommand::Image {
                    x: rect.x,
                    y: rect.y,
                    width: rect.width,
                    height: rect.height,
                    radius: *radius,
                    image: Arc::clone(image),
                }),
                ImageSource::Unavailable { .. } | ImageSource::CrossOrigin { .. } => {
                    list.push(PaintCommand::StrokeRect {
                        x: rect.x,
                        y: rect.y,
                        width: rect.width,
                        height: rect.height,
                        thickness: FRAME_THICKNESS,
                        rgba: rgba(tree.frame_color),
                    })
                }
            },
            LayoutContent::Empty => {}
        }
    }
    list
}

/// Coverage of pixel `(px, py)` inside a `width`x`height` box with
/// rounded corners, sampled at the pixel centre.
pub(crate) fn corner_coverage(px: u32, py: u32, width: u32, height: u32, radius: f32) -> f32 {
    let r = radius.min(width as f32 / 2.0).min(height as f32 / 2.0);
    if r <= 0.0 {
        return 1.0;
    }
    let (x, y) = (px as f32 + 0.5, py as f32 + 0.5);
    let (w, h) = (width as f32, height as f32);
    let cx = if x < r {
        r
    } else if x > w - r {
        w - r
    } else {
        return 1.0;
    };
    let cy = if y < r {
        r
    } else if y > h - r {
        h - r
    } else {
        return 1.0;
    };
    let d = ((x - cx).powi(2) + (y - cy).powi(2)).sqrt();
    (r - d + 0.5).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rendering::layout::layout_document;
    use crate::surface::{SlideDocument, Stylesheet, Typeface};
    use crate::Viewport;

    fn list_for(markup: &str) -> Vec<PaintCommand> {
        let doc = SlideDocument::parse(markup);
        let tree = layout_document(&doc, &Stylesheet::default(), &Typeface::Builtin, Viewport::default());
        build_display_list(&tree)
    }

    #[test]
    fn background_comes_first() {
        let list = list_for("<h1>Hello</h1>");
        match &list[0] {
            PaintCommand::SolidRect { width, height, rgba, .. } => {
                assert_eq!((*width, *height), (1080, 1920));
                assert_eq!(*rgba, (0, 0, 0, 255));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(&list[1], PaintCommand::Text { text, .. } if text == "Hello"));
    }

    #[test]
    fn unreachable_images_become_frames() {
        let list = list_for(r#"<img src="https://example.com/a.png">"#);
        assert!(list
            .iter()
            .any(|c| matches!(c, PaintCommand::StrokeRect { thickness: FRAME_THICKNESS, .. })));
    }

    fn png_data_url() -> String {
        let img = RgbaImage::from_pixel(40, 20, image::Rgba([10, 200, 30, 255]));
        let mut out = std::io::Cursor::new(Vec::new());
        img.write_to(&mut out, image::ImageFormat::Png).unwrap();
        crate::images::ImagePayload::from_bytes("image/png", &out.into_inner())
            .as_str()
            .to_string()
    }

    fn image_radii(markup: &str) -> Vec<f32> {
        list_for(markup)
            .into_iter()
            .filter_map(|c| match c {
                PaintCommand::Image { radius, .. } => Some(radius),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn only_resolved_placeholders_get_rounded_corners() {
        let url = png_data_url();
        let ready = format!(
            r#"<div class="ai-image" data-prompt="p" data-state="ready"><img src="{}"></div>"#,
            url
        );
        assert_eq!(image_radii(&ready), vec![12.0]);
        assert_eq!(image_radii(&format!(r#"<img src="{}">"#, url)), vec![0.0]);
    }

    #[test]
    fn corner_coverage_clips_only_the_corners() {
        assert_eq!(corner_coverage(0, 0, 100, 50, 12.0), 0.0);
        assert_eq!(corner_coverage(99, 49, 100, 50, 12.0), 0.0);
        assert_eq!(corner_coverage(50, 0, 100, 50, 12.0), 1.0);
        assert_eq!(corner_coverage(0, 25, 100, 50, 12.0), 1.0);
        assert_eq!(corner_coverage(6, 6, 100, 50, 12.0), 1.0);
        assert_eq!(corner_coverage(0, 0, 100, 50, 0.0), 1.0);
    }
}
