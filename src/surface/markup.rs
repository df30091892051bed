//! Slide markup model: parsing the constrained subset into blocks and
//! serializing a surface back into a standalone HTML document.

use scraper::{ElementRef, Html, Node};

use super::stylesheet::{BlockKind, Stylesheet, FAILED_TEXT, GENERATING_TEXT};
use crate::images::ImagePayload;
use crate::rendering::MAX_OUTPUT_DIMENSION;

/// Default placeholder dimension when `data-width` / `data-height` is
/// absent or unparsable.
pub const DEFAULT_PLACEHOLDER_DIMENSION: u32 = 640;

pub const PLACEHOLDER_CLASS: &str = "ai-image";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Marker {
    Highlight,
    Cta,
}

impl Marker {
    fn class(&self) -> &'static str {
        match self {
            Marker::Highlight => "highlight",
            Marker::Cta => "cta",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct InlineStyle {
    pub strong: bool,
    pub em: bool,
    pub marker: Option<Marker>,
}

impl InlineStyle {
    /// Emphasis and marker runs get a space on either side.
    pub fn is_spaced(&self) -> bool {
        self.strong || self.em || self.marker.is_some()
    }

    fn refine(mut self, el: &ElementRef) -> Self {
        match el.value().name() {
            "strong" | "b" => self.strong = true,
            "em" | "i" => self.em = true,
            _ => {}
        }
        for class in el.value().classes() {
            match class {
                "highlight" => self.marker = Some(Marker::Highlight),
                "cta" => self.marker = Some(Marker::Cta),
                _ => {}
            }
        }
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextRun {
    pub text: String,
    pub style: InlineStyle,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextBlock {
    pub kind: BlockKind,
    pub runs: Vec<TextRun>,
}

impl TextBlock {
    pub fn text(&self) -> String {
        self.runs.iter().map(|r| r.text.as_str()).collect()
    }
}

/// What a placeholder currently shows.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum PlaceholderContent {
    #[default]
    Empty,
    Generating,
    Ready(ImagePayload),
    Failed(String),
}

impl PlaceholderContent {
    fn state(&self) -> &'static str {
        match self {
            PlaceholderContent::Empty => "idle",
            PlaceholderContent::Generating => "generating",
            PlaceholderContent::Ready(_) => "ready",
            PlaceholderContent::Failed(_) => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Placeholder {
    pub prompt: Option<String>,
    pub width: u32,
    pub height: u32,
    pub content: PlaceholderContent,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Block {
    Text(TextBlock),
    Placeholder(Placeholder),
    /// `<img>` whose source is already a data URL.
    InlineImage { payload: ImagePayload, alt: String },
    /// `<img>` pointing somewhere else; never fetched by the surface.
    ExternalImage {
        src: String,
        alt: String,
        width: Option<u32>,
        height: Option<u32>,
    },
}

/// The parsed content of one surface generation.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SlideDocument {
    pub blocks: Vec<Block>,
    /// `<link rel="stylesheet">` targets found in the markup.
    pub external_stylesheets: Vec<String>,
}

impl SlideDocument {
    /// Parse slide markup. Accepts fragments as well as whole documents
    /// produced by [`SlideDocument::to_html`].
    pub fn parse(markup: &str) -> Self {
        let fragment = Html::parse_fragment(markup);
        let mut builder = Builder::default();
        builder.container(fragment.root_element(), InlineStyle::default());
        builder.flush();
        SlideDocument {
            blocks: builder.blocks,
            external_stylesheets: builder.stylesheets,
        }
    }

    /// Block indices of every placeholder, in document order.
    pub fn placeholder_handles(&self) -> Vec<usize> {
        self.blocks
            .iter()
            .enumerate()
            .filter(|(_, b)| matches!(b, Block::Placeholder(_)))
            .map(|(i, _)| i)
            .collect()
    }

    pub fn placeholder(&self, handle: usize) -> Option<&Placeholder> {
        match self.blocks.get(handle) {
            Some(Block::Placeholder(p)) => Some(p),
            _ => None,
        }
    }

    pub fn placeholder_mut(&mut self, handle: usize) -> Option<&mut Placeholder> {
        match self.blocks.get_mut(handle) {
            Some(Block::Placeholder(p)) => Some(p),
            _ => None,
        }
    }

    /// Serialize into a standalone document with the stylesheet inlined.
    pub fn to_html(&self, stylesheet: &Stylesheet, width: u32, height: u32) -> String {
        let mut out = String::from("<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n<style>\n");
        out.push_str(&stylesheet.to_css(width, height));
        out.push_str("</style>\n");
        for href in &self.external_stylesheets {
            out.push_str(&format!("<link rel=\"stylesheet\" href=\"{}\">\n", escape(href, true)));
        }
        out.push_str("</head>\n<body>\n");
        for block in &self.blocks {
            write_block(&mut out, block);
            out.push('\n');
        }
        out.push_str("</body>\n</html>\n");
        out
    }
}

fn write_block(out: &mut String, block: &Block) {
    match block {
        Block::Text(text) => {
            let tag = text.kind.tag();
            out.push_str(&format!("<{}>", tag));
            for run in &text.runs {
                write_run(out, run);
            }
            out.push_str(&format!("</{}>", tag));
        }
        Block::Placeholder(p) => {
            out.push_str(&format!("<div class=\"{}\"", PLACEHOLDER_CLASS));
            if let Some(prompt) = &p.prompt {
                out.push_str(&format!(" data-prompt=\"{}\"", escape(prompt, true)));
            }
            out.push_str(&format!(
                " data-width=\"{}\" data-height=\"{}\" data-state=\"{}\">",
                p.width,
                p.height,
                p.content.state()
            ));
            match &p.content {
                PlaceholderContent::Empty => {}
                PlaceholderContent::Generating => out.push_str(GENERATING_TEXT),
                PlaceholderContent::Ready(payload) => out.push_str(&format!(
                    "<img src=\"{}\" alt=\"{}\">",
                    payload.as_str(),
                    escape(p.prompt.as_deref().unwrap_or_default(), true)
                )),
                PlaceholderContent::Failed(msg) => out.push_str(&escape(msg, false)),
            }
            out.push_str("</div>");
        }
        Block::InlineImage { payload, alt } => {
            out.push_str(&format!("<img src=\"{}\" alt=\"{}\">", payload.as_str(), escape(alt, true)));
        }
        Block::ExternalImage {
            src,
            alt,
            width,
            height,
        } => {
            out.push_str(&format!("<img src=\"{}\" alt=\"{}\"", escape(src, true), escape(alt, true)));
            if let Some(w) = width {
                out.push_str(&format!(" width=\"{}\"", w));
            }
            if let Some(h) = height {
                out.push_str(&format!(" height=\"{}\"", h));
            }
            out.push('>');
        }
    }
}

fn write_run(out: &mut String, run: &TextRun) {
    let mut close = Vec::new();
    if let Some(marker) = run.style.marker {
        out.push_str(&format!("<span class=\"{}\">", marker.class()));
        close.push("</span>");
    }
    if run.style.strong {
        out.push_str("<strong>");
        close.push("</strong>");
    }
    if run.style.em {
        out.push_str("<em>");
        close.push("</em>");
    }
    let mut lines = run.text.split('\n');
    if let Some(first) = lines.next() {
        out.push_str(&escape(first, false));
    }
    for line in lines {
        out.push_str("<br>");
        out.push_str(&escape(line, false));
    }
    for tag in close.into_iter().rev() {
        out.push_str(tag);
    }
}

fn escape(s: &str, attr: bool) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' if attr => out.push_str("&quot;"),
            c => out.push(c),
        }
    }
    out
}

/// Positive dimension attribute, floored and clamped to the largest
/// canvas side.
fn dimension_attr(el: &ElementRef, name: &str) -> Option<u32> {
    el.value()
        .attr(name)
        .and_then(|v| v.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite() && *v >= 1.0)
        .map(|v| v.floor().min(MAX_OUTPUT_DIMENSION as f64) as u32)
}

#[derive(Default)]
struct Builder {
    blocks: Vec<Block>,
    stylesheets: Vec<String>,
    // Loose inline content waiting to become an anonymous paragraph.
    pending: Vec<TextRun>,
}

impl Builder {
    fn container(&mut self, el: ElementRef, style: InlineStyle) {
        for child in el.children() {
            match child.value() {
                Node::Text(text) => push_run(&mut self.pending, &**text, style),
                Node::Element(_) => {
                    if let Some(child_el) = ElementRef::wrap(child) {
                        self.element(child_el, style);
                    }
                }
                _ => {}
            }
        }
    }

    fn element(&mut self, el: ElementRef, style: InlineStyle) {
        if el.value().classes().any(|c| c == PLACEHOLDER_CLASS) {
            self.flush();
            self.blocks.push(Block::Placeholder(parse_placeholder(&el)));
            return;
        }
        let kind = match el.value().name() {
            "script" | "style" | "head" | "title" | "meta" | "noscript" | "template" => return,
            "link" => {
                let is_stylesheet = el
                    .value()
                    .attr("rel")
                    .map(|rel| rel.split_whitespace().any(|r| r.eq_ignore_ascii_case("stylesheet")))
                    .unwrap_or(false);
                if let (true, Some(href)) = (is_stylesheet, el.value().attr("href")) {
                    self.stylesheets.push(href.to_string());
                }
                return;
            }
            "br" => {
                push_run(&mut self.pending, "\n", style);
                return;
            }
            "img" => {
                self.flush();
                if let Some(block) = parse_image(&el) {
                    self.blocks.push(block);
                }
                return;
            }
            "h1" => BlockKind::Heading1,
            "h2" => BlockKind::Heading2,
            "h3" | "h4" | "h5" | "h6" => BlockKind::Heading3,
            "p" => BlockKind::Paragraph,
            "strong" | "b" | "em" | "i" | "span" | "a" | "u" | "small" | "mark" | "code" => {
                self.container(el, style.refine(&el));
                return;
            }
            _ => {
                self.flush();
                self.container(el, style.refine(&el));
                self.flush();
                return;
            }
        };
        self.flush();
        let mut runs = Vec::new();
        inline_runs(el, style.refine(&el), &mut runs);
        self.push_text_block(kind, runs);
    }

    fn flush(&mut self) {
        let runs = std::mem::take(&mut self.pending);
        self.push_text_block(BlockKind::Paragraph, runs);
    }

    fn push_text_block(&mut self, kind: BlockKind, runs: Vec<TextRun>) {
        if runs.iter().any(|r| !r.text.trim().is_empty()) {
            self.blocks.push(Block::Text(TextBlock { kind, runs }));
        }
    }
}

fn push_run(runs: &mut Vec<TextRun>, text: &str, style: InlineStyle) {
    if text.is_empty() {
        return;
    }
    match runs.last_mut() {
        Some(last) if last.style == style => last.text.push_str(text),
        _ => runs.push(TextRun {
            text: text.to_string(),
            style,
        }),
    }
}

fn inline_runs(el: ElementRef, style: InlineStyle, runs: &mut Vec<TextRun>) {
    for child in el.children() {
        match child.value() {
            Node::Text(text) => push_run(runs, &**text, style),
            Node::Element(_) => {
                if let Some(child_el) = ElementRef::wrap(child) {
                    match child_el.value().name() {
                        "br" => push_run(runs, "\n", style),
                        "script" | "style" | "img" => {}
                        _ => inline_runs(child_el, style.refine(&child_el), runs),
                    }
                }
            }
            _ => {}
        }
    }
}

fn parse_placeholder(el: &ElementRef) -> Placeholder {
    let prompt = el
        .value()
        .attr("data-prompt")
        .filter(|p| !p.is_empty())
        .map(str::to_string);
    let content = match el.value().attr("data-state") {
        Some("generating") => PlaceholderContent::Generating,
        Some("error") => {
            let text = el.text().collect::<String>();
            let text = text.trim();
            PlaceholderContent::Failed(if text.is_empty() { FAILED_TEXT.to_string() } else { text.to_string() })
        }
        Some("ready") => el
            .descendants()
            .filter_map(ElementRef::wrap)
            .filter(|e| e.value().name() == "img")
            .filter_map(|e| e.value().attr("src"))
            .find_map(|src| ImagePayload::from_data_url(src).ok())
            .map(PlaceholderContent::Ready)
            .unwrap_or_default(),
        _ => PlaceholderContent::Empty,
    };
    Placeholder {
        prompt,
        width: dimension_attr(el, "data-width").unwrap_or(DEFAULT_PLACEHOLDER_DIMENSION),
        height: dimension_attr(el, "data-height").unwrap_or(DEFAULT_PLACEHOLDER_DIMENSION),
        content,
    }
}

fn parse_image(el: &ElementRef) -> Option<Block> {
    let src = el.value().attr("src").map(str::trim).filter(|s| !s.is_empty())?;
    let alt = el.value().attr("alt").unwrap_or_default().to_string();
    if src.starts_with("data:") {
        let payload = ImagePayload::from_data_url(src).ok()?;
        return Some(Block::InlineImage { payload, alt });
    }
    Some(Block::ExternalImage {
        src: src.to_string(),
        alt,
        width: dimension_attr(el, "width"),
        height: dimension_attr(el, "height"),
    })
}
