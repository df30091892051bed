//! The fixed stylesheet every slide is laid out with.
//!
//! Nothing from the host or from the markup itself can change these values:
//! inline styles are ignored and the box model is zeroed and then rebuilt
//! from the rules below.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Straight (non-premultiplied) RGBA colour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const BLACK: Color = Color::rgb(0, 0, 0);
    pub const WHITE: Color = Color::rgb(255, 255, 255);
    pub const TRANSPARENT: Color = Color {
        r: 0,
        g: 0,
        b: 0,
        a: 0,
    };

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Color { r, g, b, a: 255 }
    }

    pub fn is_opaque(&self) -> bool {
        self.a == 255
    }

    /// Parse `#rgb`, `#rrggbb` or `#rrggbbaa`.
    pub fn parse(s: &str) -> Result<Self> {
        let hex = s
            .trim()
            .strip_prefix('#')
            .ok_or_else(|| Error::ConfigError(format!("colour must start with '#': {:?}", s)))?;
        let digits: Vec<u8> = hex
            .chars()
            .map(|c| c.to_digit(16).map(|d| d as u8))
            .collect::<Option<_>>()
            .ok_or_else(|| Error::ConfigError(format!("invalid hex colour: {:?}", s)))?;
        let pair = |i: usize| digits[i] * 16 + digits[i + 1];
        match digits.len() {
            3 => Ok(Color::rgb(digits[0] * 17, digits[1] * 17, digits[2] * 17)),
            6 => Ok(Color::rgb(pair(0), pair(2), pair(4))),
            8 => Ok(Color {
                r: pair(0),
                g: pair(2),
                b: pair(4),
                a: pair(6),
            }),
            _ => Err(Error::ConfigError(format!("invalid hex colour: {:?}", s))),
        }
    }
}

impl FromStr for Color {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Color::parse(s)
    }
}

impl TryFrom<String> for Color {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Color::parse(&value)
    }
}

impl From<Color> for String {
    fn from(c: Color) -> Self {
        c.to_string()
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_opaque() {
            write!(f, "#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
        } else {
            write!(f, "#{:02x}{:02x}{:02x}{:02x}", self.r, self.g, self.b, self.a)
        }
    }
}

/// Typography for one block kind.
#[derive(Debug, Clone, PartialEq)]
pub struct TextStyle {
    pub size: f32,
    pub weight: u16,
    pub line_height: f32,
    pub color: Color,
    pub margin_bottom: f32,
}

impl TextStyle {
    pub fn line_box(&self) -> f32 {
        self.size * self.line_height
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Insets {
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
    pub left: f32,
}

/// Which block-level rule a text block uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockKind {
    Heading1,
    Heading2,
    Heading3,
    Paragraph,
}

impl BlockKind {
    pub fn tag(&self) -> &'static str {
        match self {
            BlockKind::Heading1 => "h1",
            BlockKind::Heading2 => "h2",
            BlockKind::Heading3 => "h3",
            BlockKind::Paragraph => "p",
        }
    }
}

pub const GENERATING_TEXT: &str = "Generating image…";
pub const FAILED_TEXT: &str = "Image generation error";

#[derive(Debug, Clone, PartialEq)]
pub struct Stylesheet {
    pub page_background: Color,
    pub text_color: Color,
    pub padding: Insets,
    pub h1: TextStyle,
    pub h2: TextStyle,
    pub h3: TextStyle,
    pub paragraph: TextStyle,
    pub strong_weight: u16,
    /// Colour and weight of the `highlight` / `cta` marker classes.
    pub accent: Color,
    pub marker_weight: u16,
    pub placeholder_min_height: f32,
    /// Resolved images are at most this fraction of the content width.
    pub image_max_width: f32,
    pub image_margin: f32,
    /// Corner radius of resolved placeholder images.
    pub image_radius: f32,
    pub frame_color: Color,
}

impl Default for Stylesheet {
    fn default() -> Self {
        let text = |size, weight, line_height, color, margin_bottom| TextStyle {
            size,
            weight,
            line_height,
            color,
            margin_bottom,
        };
        Self {
            page_background: Color::BLACK,
            text_color: Color::WHITE,
            padding: Insets {
                top: 48.0,
                right: 56.0,
                bottom: 48.0,
                left: 56.0,
            },
            h1: text(64.0, 750, 1.15, Color::rgb(0xf8, 0xfa, 0xfc), 24.0),
            h2: text(48.0, 700, 1.25, Color::rgb(0xe5, 0xe7, 0xeb), 20.0),
            h3: text(40.0, 650, 1.3, Color::rgb(0xe2, 0xe8, 0xf0), 16.0),
            paragraph: text(32.0, 400, 1.45, Color::rgb(0xcb, 0xd5, 0xe1), 12.0),
            strong_weight: 800,
            accent: Color::rgb(0xfe, 0x2c, 0x55),
            marker_weight: 850,
            placeholder_min_height: 320.0,
            image_max_width: 0.8,
            image_margin: 24.0,
            image_radius: 12.0,
            frame_color: Color::rgb(0x47, 0x55, 0x69),
        }
    }
}

impl Stylesheet {
    pub fn block(&self, kind: BlockKind) -> &TextStyle {
        match kind {
            BlockKind::Heading1 => &self.h1,
            BlockKind::Heading2 => &self.h2,
            BlockKind::Heading3 => &self.h3,
            BlockKind::Paragraph => &self.paragraph,
        }
    }

    /// CSS text equivalent of this stylesheet, embedded in serialized
    /// documents. Output is stable for equal stylesheets.
    pub fn to_css(&self, width: u32, height: u32) -> String {
        let mut css = String::new();
        css.push_str(&format!(
            "html, body {{ width: {}px; height: {}px; margin: 0; padding: 0; }}\n",
            width, height
        ));
        css.push_str("* { margin: 0; padding: 0; box-sizing: border-box; }\n");
        css.push_str(&format!(
            "html {{ background: {}; color: {}; font-kerning: normal; font-variant-ligatures: none; }}\n",
            self.page_background, self.text_color
        ));
        css.push_str(&format!(
            "body {{ display: flex; flex-direction: column; align-items: center; justify-content: center; \
             text-align: center; padding: {}px {}px {}px {}px; overflow: hidden; }}\n",
            self.padding.top, self.padding.right, self.padding.bottom, self.padding.left
        ));
        for kind in [
            BlockKind::Heading1,
            BlockKind::Heading2,
            BlockKind::Heading3,
            BlockKind::Paragraph,
        ] {
            let s = self.block(kind);
            css.push_str(&format!(
                "{} {{ font-size: {}px; font-weight: {}; line-height: {}; color: {}; margin-bottom: {}px; }}\n",
                kind.tag(),
                s.size,
                s.weight,
                s.line_height,
                s.color,
                s.margin_bottom
            ));
        }
        css.push_str(&format!(
            "strong {{ font-weight: {}; display: inline; }}\n",
            self.strong_weight
        ));
        css.push_str("em { font-style: italic; display: inline; }\n");
        css.push_str(&format!(
            ".highlight, .cta {{ color: {}; font-weight: {}; display: inline; }}\n",
            self.accent, self.marker_weight
        ));
        css.push_str(&format!(
            ".ai-image {{ width: 100%; display: flex; align-items: center; justify-content: center; min-height: {}px; }}\n",
            self.placeholder_min_height
        ));
        css.push_str(&format!(
            ".ai-image img {{ max-width: {}%; margin: {}px auto; border-radius: {}px; }}\n",
            self.image_max_width * 100.0,
            self.image_margin,
            self.image_radius
        ));
        css
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_hex_forms() {
        assert_eq!(Color::parse("#000").unwrap(), Color::BLACK);
        assert_eq!(Color::parse("#fe2c55").unwrap(), Color::rgb(0xfe, 0x2c, 0x55));
        assert_eq!(Color::parse("#ffffff80").unwrap().a, 0x80);
        assert!(Color::parse("red").is_err());
        assert!(Color::parse("#12345").is_err());
    }

    #[test]
    fn display_round_trips() {
        let c = Color::parse("#0a0b0c").unwrap();
        assert_eq!(c.to_string(), "#0a0b0c");
        assert_eq!(Color::parse(&c.to_string()).unwrap(), c);
    }

    #[test]
    fn css_is_stable_and_zeroes_box_model() {
        let sheet = Stylesheet::default();
        let a = sheet.to_css(1080, 1920);
        assert_eq!(a, sheet.to_css(1080, 1920));
        assert!(a.contains("* { margin: 0; padding: 0; box-sizing: border-box; }"));
        assert!(a.contains("border-radius: 12px"));
        assert!(a.contains("h1 { font-size: 64px; font-weight: 750;"));
        assert!(a.contains(".highlight, .cta { color: #fe2c55; font-weight: 850;"));
    }
}
