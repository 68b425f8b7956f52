//! Glyph metric collection
//!
//! Turns requested codepoint ranges into sized rectangles: one per
//! codepoint for the direct render (pass 0) plus one per halo pass,
//! downscaled and padded for its blur.

use log::{debug, trace};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use super::face::{GlyphBounds, Rasterizer};
use crate::constants::MISSING_GLYPH_CODEPOINT;
use crate::error::{AtlasError, Result};

fn one() -> f32 {
    1.0
}

/// Halo pass configuration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HaloConfig {
    /// Downscale factor in (0, 1]
    pub scale: f32,
    /// Blur radius in unscaled pixels
    pub blur_radius: u32,
    /// Variance of the Gaussian blur kernel
    pub blur_variance: f32,
    /// Kernel tap multiplier
    pub pre_multiplier: f32,
    /// Intensity multiplier applied by the renderer (passed through)
    #[serde(default = "one")]
    pub post_multiplier: f32,
}

/// Destination geometry of one glyph in one halo pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HaloSize {
    pub inner_width: u32,
    pub inner_height: u32,
    pub blur_px: u32,
    pub width: u32,
    pub height: u32,
}

impl HaloConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.scale > 0.0 && self.scale <= 1.0) {
            return Err(AtlasError::InvalidArguments(format!(
                "halo scale must be in (0, 1], got {}",
                self.scale
            )));
        }
        if self.blur_radius > 0 && !(self.blur_variance > 0.0) {
            return Err(AtlasError::InvalidArguments(format!(
                "halo blur variance must be positive, got {}",
                self.blur_variance
            )));
        }
        Ok(())
    }

    /// Blur padding in scaled pixels
    pub fn blur_px(&self) -> u32 {
        (self.blur_radius as f32 * self.scale).ceil() as u32
    }

    /// Scaled and padded size of a `width` x `height` glyph (always rounded up)
    pub fn halo_size(&self, width: u32, height: u32) -> HaloSize {
        let inner_width = (width as f32 * self.scale).ceil() as u32;
        let inner_height = (height as f32 * self.scale).ceil() as u32;
        let blur_px = self.blur_px();
        HaloSize {
            inner_width,
            inner_height,
            blur_px,
            width: inner_width + 2 * blur_px,
            height: inner_height + 2 * blur_px,
        }
    }
}

/// One rectangle to pack: a glyph in one pass
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GlyphRect {
    /// Index of the font within the build
    pub font: usize,
    pub codepoint: u32,
    pub pass: usize,
    /// Pass-0 bounding box of the glyph
    pub bounds: GlyphBounds,
    pub width: u32,
    pub height: u32,
}

/// Per-pass summary needed to size the blur scratch space
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassExtent {
    pub blur_px: u32,
    pub max_width: u32,
    pub max_height: u32,
}

/// Everything measured for one font
#[derive(Debug, Default)]
pub struct FontMetrics {
    pub rects: Vec<GlyphRect>,
    /// Indexed by pass; `None` for pass 0
    pub extents: Vec<Option<PassExtent>>,
    /// Codepoints that produced rectangles, in request order
    pub codepoints: Vec<u32>,
}

/// Measure every requested codepoint of one font
///
/// Zero-area glyphs are skipped. With `missing_glyph_detection`, glyphs whose
/// bounding box equals that of codepoint 0 are skipped too; this is a
/// heuristic and drops real glyphs that happen to share that box.
pub fn collect(
    font: usize,
    rasterizer: &dyn Rasterizer,
    codepoint_ranges: &[(u32, u32)],
    halo_passes: &[HaloConfig],
    missing_glyph_detection: bool,
) -> FontMetrics {
    let missing = missing_glyph_detection.then(|| rasterizer.measure(MISSING_GLYPH_CODEPOINT));

    let mut metrics = FontMetrics {
        extents: std::iter::once(None)
            .chain(halo_passes.iter().map(|cfg| {
                Some(PassExtent {
                    blur_px: cfg.blur_px(),
                    ..PassExtent::default()
                })
            }))
            .collect(),
        ..FontMetrics::default()
    };

    let mut seen = HashSet::new();
    let mut skipped_missing = 0usize;

    for &(first, last) in codepoint_ranges {
        for codepoint in first..=last {
            if !seen.insert(codepoint) {
                continue;
            }

            let bounds = rasterizer.measure(codepoint);
            if bounds.is_empty() {
                continue;
            }
            if missing == Some(bounds) {
                skipped_missing += 1;
                continue;
            }

            let (w, h) = (bounds.width() as u32, bounds.height() as u32);
            metrics.codepoints.push(codepoint);
            metrics.rects.push(GlyphRect {
                font,
                codepoint,
                pass: 0,
                bounds,
                width: w,
                height: h,
            });

            for (i, cfg) in halo_passes.iter().enumerate() {
                let pass = i + 1;
                let size = cfg.halo_size(w, h);
                if let Some(extent) = metrics.extents[pass].as_mut() {
                    extent.max_width = extent.max_width.max(size.width);
                    extent.max_height = extent.max_height.max(size.height);
                }
                metrics.rects.push(GlyphRect {
                    font,
                    codepoint,
                    pass,
                    bounds,
                    width: size.width,
                    height: size.height,
                });
            }
            trace!("U+{:04X}: {}x{} ({:?})", codepoint, w, h, bounds);
        }
    }

    debug!(
        "font {}: {} glyphs, {} rects, {} skipped as missing",
        font,
        metrics.codepoints.len(),
        metrics.rects.len(),
        skipped_missing
    );
    metrics
}
