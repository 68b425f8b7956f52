//! Atlas build results
//!
//! The bitmap itself plus the table that tells a renderer where each
//! glyph of each pass lives and how to place it relative to the pen.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::font::FontIdentifier;

/// Placement of one glyph in one pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LookupEntry {
    /// Atlas position (pixels)
    pub u: u32,
    pub v: u32,
    /// Atlas size (pixels)
    pub w: u32,
    pub h: u32,
    /// Draw offset from the pen position
    pub dx: i32,
    pub dy: i32,
    /// On-screen size; halos are the base glyph grown by their padding
    pub w2: u32,
    pub h2: u32,
}

/// Glyph identity across fonts
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GlyphKey {
    pub codepoint: u32,
    pub font: FontIdentifier,
}

/// Serialized form of one table row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlyphLookup {
    pub font: FontIdentifier,
    pub codepoint: u32,
    /// Indexed by pass
    pub passes: Vec<Option<LookupEntry>>,
}

/// (glyph, pass) -> placement
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(into = "Vec<GlyphLookup>", from = "Vec<GlyphLookup>")]
pub struct LookupTable {
    entries: BTreeMap<GlyphKey, Vec<Option<LookupEntry>>>,
}

impl LookupTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `entry` for `key` in `pass`; `num_passes` sizes a fresh row
    pub fn insert(&mut self, key: GlyphKey, pass: usize, num_passes: usize, entry: LookupEntry) {
        let row = self
            .entries
            .entry(key)
            .or_insert_with(|| vec![None; num_passes.max(pass + 1)]);
        if row.len() <= pass {
            row.resize(pass + 1, None);
        }
        row[pass] = Some(entry);
    }

    pub fn get(&self, font: &FontIdentifier, codepoint: u32, pass: usize) -> Option<&LookupEntry> {
        let key = GlyphKey {
            codepoint,
            font: font.clone(),
        };
        self.entries.get(&key)?.get(pass)?.as_ref()
    }

    /// Every pass entry of one glyph
    pub fn passes(&self, font: &FontIdentifier, codepoint: u32) -> Option<&[Option<LookupEntry>]> {
        let key = GlyphKey {
            codepoint,
            font: font.clone(),
        };
        self.entries.get(&key).map(Vec::as_slice)
    }

    /// Number of glyphs (not passes)
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&GlyphKey, &[Option<LookupEntry>])> {
        self.entries.iter().map(|(k, v)| (k, v.as_slice()))
    }
}

impl From<LookupTable> for Vec<GlyphLookup> {
    fn from(table: LookupTable) -> Self {
        table
            .entries
            .into_iter()
            .map(|(key, passes)| GlyphLookup {
                font: key.font,
                codepoint: key.codepoint,
                passes,
            })
            .collect()
    }
}

impl From<Vec<GlyphLookup>> for LookupTable {
    fn from(rows: Vec<GlyphLookup>) -> Self {
        Self {
            entries: rows
                .into_iter()
                .map(|row| {
                    (
                        GlyphKey {
                            codepoint: row.codepoint,
                            font: row.font,
                        },
                        row.passes,
                    )
                })
                .collect(),
        }
    }
}

/// Single-channel coverage bitmap; both sides are powers of two
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AtlasImage {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl AtlasImage {
    pub fn pixel(&self, x: u32, y: u32) -> u8 {
        if x >= self.width || y >= self.height {
            return 0;
        }
        self.data[(y * self.width + x) as usize]
    }
}

/// Per-pass values the renderer needs
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PassInfo {
    pub post_multiplier: f32,
}

/// Per-font results
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FontSummary {
    pub font: FontIdentifier,
    /// Cell width: advance of 'W'
    pub cell_width: f32,
    /// Cell height: common ascent + common descent
    pub cell_height: u32,
    /// Baseline distance from the cell top
    pub common_ascent: i32,
    pub passes: Vec<PassInfo>,
    /// Number of glyphs in the atlas
    pub glyphs: usize,
}

/// Everything one build produces
#[derive(Debug, Clone, PartialEq)]
pub struct AtlasOutput {
    pub image: AtlasImage,
    pub lookup: LookupTable,
    pub fonts: Vec<FontSummary>,
}

impl AtlasOutput {
    /// Serializable description of the atlas without its pixels
    pub fn manifest(&self) -> AtlasManifest {
        AtlasManifest {
            width: self.image.width,
            height: self.image.height,
            fonts: self.fonts.clone(),
            glyphs: self.lookup.clone(),
        }
    }
}

/// Atlas metadata as written next to the image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AtlasManifest {
    pub width: u32,
    pub height: u32,
    pub fonts: Vec<FontSummary>,
    pub glyphs: LookupTable,
}
