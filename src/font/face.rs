//! Font faces and glyph rasterization
//!
//! The atlas builder only needs two things from a font: a tight bounding
//! box per codepoint and a way to draw that codepoint into a bitmap.
//! `FontFace` / `Rasterizer` are that boundary; `FontdueFace` implements
//! it with fontdue.

use anyhow::{anyhow, Result};
use fontdue::{Font, FontSettings};
use log::info;
use std::sync::Arc;

use crate::engine::BitmapView;

/// Tight glyph bounding box relative to the pen origin on the baseline
///
/// All four edges are distances: `left` extends left of the origin,
/// `right` to its right, `ascent` above the baseline, `descent` below.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GlyphBounds {
    pub left: i32,
    pub right: i32,
    pub ascent: i32,
    pub descent: i32,
}

impl GlyphBounds {
    pub fn width(&self) -> i32 {
        self.left + self.right
    }

    pub fn height(&self) -> i32 {
        self.ascent + self.descent
    }

    /// No visible pixels
    pub fn is_empty(&self) -> bool {
        self.width() <= 0 || self.height() <= 0
    }
}

/// Glyph measurement and drawing at one pixel size
pub trait Rasterizer {
    /// Bounding box of `codepoint`
    fn measure(&self, codepoint: u32) -> GlyphBounds;

    /// Horizontal advance of `codepoint`
    fn advance(&self, codepoint: u32) -> f32;

    /// Draw `codepoint` with its pen origin at (`x`, `y`); clipped to `target`
    fn draw(&self, codepoint: u32, target: &mut BitmapView<'_>, x: i32, y: i32);
}

/// Loaded font face
pub trait FontFace: Send + Sync {
    /// Unique face name
    fn name(&self) -> &str;

    /// Rasterizer for this face at `size` pixels
    fn rasterizer(&self, size: u32) -> Box<dyn Rasterizer + '_>;
}

/// Shared handle to a loaded face
pub type FaceHandle = Arc<dyn FontFace>;

/// fontdue-backed face
pub struct FontdueFace {
    name: String,
    font: Font,
}

impl FontdueFace {
    /// Parse TTF/OTF data
    pub fn from_bytes(name: impl Into<String>, data: &[u8]) -> Result<Self> {
        let name = name.into();
        let font = Font::from_bytes(data, FontSettings::default())
            .map_err(|e| anyhow!("Failed to load font {}: {}", name, e))?;
        info!("Font loaded: {} ({} glyphs)", name, font.glyph_count());
        Ok(Self { name, font })
    }
}

impl FontFace for FontdueFace {
    fn name(&self) -> &str {
        &self.name
    }

    fn rasterizer(&self, size: u32) -> Box<dyn Rasterizer + '_> {
        Box::new(FontdueRasterizer {
            font: &self.font,
            px: size as f32,
        })
    }
}

struct FontdueRasterizer<'a> {
    font: &'a Font,
    px: f32,
}

impl Rasterizer for FontdueRasterizer<'_> {
    fn measure(&self, codepoint: u32) -> GlyphBounds {
        let Some(ch) = char::from_u32(codepoint) else {
            return GlyphBounds::default();
        };
        let m = self.font.metrics(ch, self.px);
        // ymin is the bottom edge relative to the baseline (up is positive)
        GlyphBounds {
            left: -m.xmin,
            right: m.xmin + m.width as i32,
            ascent: m.ymin + m.height as i32,
            descent: -m.ymin,
        }
    }

    fn advance(&self, codepoint: u32) -> f32 {
        char::from_u32(codepoint)
            .map(|ch| self.font.metrics(ch, self.px).advance_width)
            .unwrap_or(0.0)
    }

    fn draw(&self, codepoint: u32, target: &mut BitmapView<'_>, x: i32, y: i32) {
        let Some(ch) = char::from_u32(codepoint) else {
            return;
        };
        let (m, bitmap) = self.font.rasterize(ch, self.px);
        if m.width == 0 {
            return;
        }
        let x0 = x + m.xmin;
        let y0 = y - (m.ymin + m.height as i32);
        for (row, line) in bitmap.chunks_exact(m.width).enumerate() {
            for (col, &coverage) in line.iter().enumerate() {
                if coverage != 0 {
                    target.blend(x0 + col as i32, y0 + row as i32, coverage);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounds_size() {
        let b = GlyphBounds {
            left: -1,
            right: 7,
            ascent: 9,
            descent: 3,
        };
        assert_eq!(b.width(), 6);
        assert_eq!(b.height(), 12);
        assert!(!b.is_empty());
        assert!(GlyphBounds::default().is_empty());
    }

    #[test]
    fn test_invalid_font_data() {
        assert!(FontdueFace::from_bytes("garbage", b"not a font").is_err());
    }
}
