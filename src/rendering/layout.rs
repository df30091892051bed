//! Block layout for slide documents.
//!
//! The body is a centred flex column: blocks stack vertically with their
//! bottom margins, the stack is centred inside the padded page, and every
//! line of text is centred horizontally.

use std::sync::Arc;

use image::RgbaImage;

use crate::surface::markup::{
    Block, InlineStyle, Placeholder, PlaceholderContent, SlideDocument, TextBlock, TextRun,
    DEFAULT_PLACEHOLDER_DIMENSION,
};
use crate::surface::stylesheet::{BlockKind, Color, Stylesheet, TextStyle, FAILED_TEXT, GENERATING_TEXT};
use crate::surface::Typeface;
use crate::Viewport;

#[derive(Debug, Clone, PartialEq)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    fn from_f32(x: f32, y: f32, width: f32, height: f32) -> Self {
        Rect {
            x: x.round() as i32,
            y: y.round() as i32,
            width: width.round().max(0.0) as u32,
            height: height.round().max(0.0) as u32,
        }
    }

    pub fn right(&self) -> i32 {
        self.x.saturating_add(i32::try_from(self.width).unwrap_or(i32::MAX))
    }

    pub fn bottom(&self) -> i32 {
        self.y.saturating_add(i32::try_from(self.height).unwrap_or(i32::MAX))
    }

    fn shifted(&self, dy: i32) -> Self {
        Rect {
            y: self.y.saturating_add(dy),
            ..self.clone()
        }
    }
}

/// Resolved font for a run of glyphs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunFont {
    pub size: f32,
    pub weight: u16,
    pub italic: bool,
    pub color: Color,
}

/// A positioned run of text sharing one font.
#[derive(Debug, Clone, PartialEq)]
pub struct GlyphRun {
    pub x: f32,
    pub baseline: f32,
    pub text: String,
    pub font: RunFont,
}

#[derive(Debug, Clone)]
pub enum ImageSource {
    Decoded(Arc<RgbaImage>),
    /// The payload exists but could not be decoded.
    Unavailable { reason: String },
    /// Points outside the surface; never fetched.
    CrossOrigin { url: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementType {
    Heading,
    Paragraph,
    Placeholder,
    Image,
}

#[derive(Debug, Clone)]
pub enum LayoutContent {
    Text(Vec<GlyphRun>),
    /// `radius` rounds the image corners; zero for square images.
    Image {
        rect: Rect,
        source: ImageSource,
        radius: f32,
    },
    Empty,
}

#[derive(Debug, Clone)]
pub struct LayoutNode {
    pub rect: Rect,
    pub elem_type: ElementType,
    pub content: LayoutContent,
}

#[derive(Debug, Clone)]
pub struct LayoutTree {
    pub viewport: Viewport,
    pub background: Color,
    pub frame_color: Color,
    pub nodes: Vec<LayoutNode>,
}

struct Word {
    text: String,
    font: RunFont,
    width: f32,
    space_before: bool,
    break_before: bool,
}

#[derive(Default)]
struct Line {
    words: Vec<(usize, f32)>,
    width: f32,
}

struct Cursor<'a> {
    sheet: &'a Stylesheet,
    face: &'a Typeface,
    content_x: f32,
    content_w: f32,
    y: f32,
    nodes: Vec<LayoutNode>,
}

/// Lay out `document` inside `viewport` with the fixed stylesheet.
pub fn layout_document(
    document: &SlideDocument,
    sheet: &Stylesheet,
    face: &Typeface,
    viewport: Viewport,
) -> LayoutTree {
    let pad = sheet.padding;
    let mut cursor = Cursor {
        sheet,
        face,
        content_x: pad.left,
        content_w: (viewport.width as f32 - pad.left - pad.right).max(0.0),
        y: 0.0,
        nodes: Vec::new(),
    };

    for block in &document.blocks {
        match block {
            Block::Text(text) => cursor.text_block(text),
            Block::Placeholder(p) => cursor.placeholder(p),
            Block::InlineImage { payload, .. } => {
                let source = match payload.decode_image() {
                    Ok(img) => ImageSource::Decoded(Arc::new(img)),
                    Err(e) => ImageSource::Unavailable { reason: e.to_string() },
                };
                cursor.image_block(source, None, 0.0);
            }
            Block::ExternalImage {
                src, width, height, ..
            } => {
                let natural = (
                    width.unwrap_or(DEFAULT_PLACEHOLDER_DIMENSION) as f32,
                    height.unwrap_or(DEFAULT_PLACEHOLDER_DIMENSION) as f32,
                );
                cursor.image_block(ImageSource::CrossOrigin { url: src.clone() }, Some(natural), 0.0);
            }
        }
    }

    // Centre the stack vertically; overflowing content starts at the top
    // padding and is clipped at capture.
    let available = viewport.height as f32 - pad.top - pad.bottom;
    let offset = (pad.top + ((available - cursor.y) / 2.0).max(0.0)).round();
    let nodes = cursor
        .nodes
        .into_iter()
        .map(|node| shift_node(node, offset))
        .collect();

    LayoutTree {
        viewport,
        background: sheet.page_background,
        frame_color: sheet.frame_color,
        nodes,
    }
}

fn shift_node(node: LayoutNode, offset: f32) -> LayoutNode {
    let dy = offset as i32;
    let content = match node.content {
        LayoutContent::Text(runs) => LayoutContent::Text(
            runs.into_iter()
                .map(|r| GlyphRun {
                    baseline: r.baseline + offset,
                    ..r
                })
                .collect(),
        ),
        LayoutContent::Image { rect, source, radius } => LayoutContent::Image {
            rect: rect.shifted(dy),
            source,
            radius,
        },
        LayoutContent::Empty => LayoutContent::Empty,
    };
    LayoutNode {
        rect: node.rect.shifted(dy),
        elem_type: node.elem_type,
        content,
    }
}

fn resolve_font(base: &TextStyle, style: InlineStyle, sheet: &Stylesheet) -> RunFont {
    let mut font = RunFont {
        size: base.size,
        weight: base.weight,
        italic: style.em,
        color: base.color,
    };
    if style.strong {
        font.weight = font.weight.max(sheet.strong_weight);
    }
    if style.marker.is_some() {
        font.weight = font.weight.max(sheet.marker_weight);
        font.color = sheet.accent;
    }
    font
}

impl<'a> Cursor<'a> {
    fn text_block(&mut self, block: &TextBlock) {
        let style = self.sheet.block(block.kind).clone();
        let words = self.words(block, &style);
        let top = self.y;
        let lines = self.break_lines(&words);
        let runs = self.place_lines(&words, &lines, &style, top);
        let height = lines.len() as f32 * style.line_box();
        let elem_type = match block.kind {
            BlockKind::Paragraph => ElementType::Paragraph,
            _ => ElementType::Heading,
        };
        self.nodes.push(LayoutNode {
            rect: Rect::from_f32(self.content_x, top, self.content_w, height),
            elem_type,
            content: LayoutContent::Text(runs),
        });
        self.y = top + height + style.margin_bottom;
    }

    fn placeholder(&mut self, p: &Placeholder) {
        match &p.content {
            PlaceholderContent::Ready(payload) => {
                let (source, natural) = match payload.decode_image() {
                    Ok(img) => {
                        let natural = (img.width() as f32, img.height() as f32);
                        (ImageSource::Decoded(Arc::new(img)), natural)
                    }
                    Err(e) => (
                        ImageSource::Unavailable { reason: e.to_string() },
                        (p.width as f32, p.height as f32),
                    ),
                };
                self.image_block(source, Some(natural), self.sheet.placeholder_min_height);
                if let Some(node) = self.nodes.last_mut() {
                    node.elem_type = ElementType::Placeholder;
                    if let LayoutContent::Image { radius, .. } = &mut node.content {
                        *radius = self.sheet.image_radius;
                    }
                }
            }
            PlaceholderContent::Generating => self.indicator(GENERATING_TEXT),
            PlaceholderContent::Failed(msg) => {
                let msg = if msg.trim().is_empty() { FAILED_TEXT } else { msg.as_str() };
                self.indicator(msg)
            }
            PlaceholderContent::Empty => {
                let height = self.sheet.placeholder_min_height;
                self.nodes.push(LayoutNode {
                    rect: Rect::from_f32(self.content_x, self.y, self.content_w, height),
                    elem_type: ElementType::Placeholder,
                    content: LayoutContent::Empty,
                });
                self.y += height;
            }
        }
    }

    /// Status text centred inside a placeholder box.
    fn indicator(&mut self, text: &str) {
        let style = self.sheet.paragraph.clone();
        let block = TextBlock {
            kind: BlockKind::Paragraph,
            runs: vec![TextRun {
                text: text.to_string(),
                style: InlineStyle::default(),
            }],
        };
        let words = self.words(&block, &style);
        let lines = self.break_lines(&words);
        let text_h = lines.len() as f32 * style.line_box();
        let height = text_h.max(self.sheet.placeholder_min_height);
        let top = self.y + (height - text_h) / 2.0;
        let runs = self.place_lines(&words, &lines, &style, top);
        self.nodes.push(LayoutNode {
            rect: Rect::from_f32(self.content_x, self.y, self.content_w, height),
            elem_type: ElementType::Placeholder,
            content: LayoutContent::Text(runs),
        });
        self.y += height;
    }

    /// An image box: the image is at most `image_max_width` of the content
    /// width, keeps its aspect ratio and has vertical margins.
    fn image_block(&mut self, source: ImageSource, natural: Option<(f32, f32)>, min_height: f32) {
        let (nat_w, nat_h) = match (&source, natural) {
            (_, Some(dims)) => dims,
            (ImageSource::Decoded(img), None) => (img.width() as f32, img.height() as f32),
            _ => (
                DEFAULT_PLACEHOLDER_DIMENSION as f32,
                DEFAULT_PLACEHOLDER_DIMENSION as f32,
            ),
        };
        let max_w = self.content_w * self.sheet.image_max_width;
        let scale = if nat_w > max_w && nat_w > 0.0 { max_w / nat_w } else { 1.0 };
        let (w, h) = (nat_w * scale, nat_h * scale);
        let margin = self.sheet.image_margin;
        let height = (h + 2.0 * margin).max(min_height);
        let img_x = self.content_x + (self.content_w - w) / 2.0;
        let img_y = self.y + (height - h) / 2.0;
        self.nodes.push(LayoutNode {
            rect: Rect::from_f32(self.content_x, self.y, self.content_w, height),
            elem_type: ElementType::Image,
            content: LayoutContent::Image {
                rect: Rect::from_f32(img_x, img_y, w, h),
                source,
                radius: 0.0,
            },
        });
        self.y += height;
    }

    fn words(&self, block: &TextBlock, base: &TextStyle) -> Vec<Word> {
        let mut words = Vec::new();
        let mut gap = false;
        let mut pending_break = false;
        for run in &block.runs {
            let font = resolve_font(base, run.style, self.sheet);
            if run.style.is_spaced() {
                gap = true;
            }
            for (i, piece) in run.text.split('\n').enumerate() {
                if i > 0 {
                    pending_break = true;
                    gap = false;
                }
                if piece.starts_with(char::is_whitespace) {
                    gap = true;
                }
                for word in piece.split_whitespace() {
                    words.push(Word {
                        text: word.to_string(),
                        font,
                        width: self.face.measure(word, font.size),
                        space_before: gap,
                        break_before: pending_break,
                    });
                    gap = true;
                    pending_break = false;
                }
                if !piece.is_empty() && !piece.ends_with(char::is_whitespace) {
                    gap = false;
                }
            }
            if run.style.is_spaced() {
                gap = true;
            }
        }
        words
    }

    /// Greedy line breaking: each line is a list of (word index, x offset)
    /// plus its total width.
    fn break_lines(&self, words: &[Word]) -> Vec<Line> {
        let mut lines = Vec::new();
        let mut line = Line::default();
        for (i, word) in words.iter().enumerate() {
            let mut space = if word.space_before && !line.words.is_empty() {
                self.face.advance(' ', word.font.size)
            } else {
                0.0
            };
            let overflow = line.width + space + word.width > self.content_w;
            if (word.break_before || overflow) && !line.words.is_empty() {
                lines.push(std::mem::take(&mut line));
                space = 0.0;
            }
            line.words.push((i, line.width + space));
            line.width += space + word.width;
        }
        if !line.words.is_empty() {
            lines.push(line);
        }
        lines
    }

    /// Centre each line horizontally and merge same-font words into runs.
    fn place_lines(&self, words: &[Word], lines: &[Line], style: &TextStyle, top: f32) -> Vec<GlyphRun> {
        let line_h = style.line_box();
        let mut runs = Vec::new();
        for (n, line) in lines.iter().enumerate() {
            let x0 = self.content_x + (self.content_w - line.width) / 2.0;
            let line_top = top + n as f32 * line_h;
            let baseline = (line_top + (line_h - style.size) / 2.0 + style.size * 0.8).round();
            // (run, x where the run currently ends)
            let mut current: Option<(GlyphRun, f32)> = None;
            for &(i, offset) in &line.words {
                let word = &words[i];
                let start = x0 + offset;
                match current.as_mut() {
                    Some((run, end)) if run.font == word.font => {
                        if start > *end + 0.5 {
                            run.text.push(' ');
                        }
                        run.text.push_str(&word.text);
                        *end = start + word.width;
                    }
                    _ => {
                        if let Some((done, _)) = current.take() {
                            runs.push(done);
                        }
                        let run = GlyphRun {
                            x: start,
                            baseline,
                            text: word.text.clone(),
                            font: word.font,
                        };
                        current = Some((run, start + word.width));
                    }
                }
            }
            if let Some((done, _)) = current {
                runs.push(done);
            }
        }
        runs
    }
}
