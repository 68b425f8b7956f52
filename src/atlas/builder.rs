//! Atlas build orchestration
//!
//! Handles:
//! - Font set validation, de-duplication and resolution
//! - Repack-on-overflow growth of the atlas
//! - Drawing direct glyphs, batched halo resizes and per-pass blurs
//! - Lookup table and per-font summary assembly

use futures_util::future::try_join_all;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use super::lookup::{AtlasImage, AtlasOutput, FontSummary, GlyphKey, LookupEntry, LookupTable, PassInfo};
use super::skyline::{Rect, SkylinePacker};
use crate::constants::{
    BASELINE_PROBE_CHARS, CELL_WIDTH_CHAR, INITIAL_HEIGHT_LOG2, INITIAL_WIDTH_LOG2, MAX_SIZE_LOG2,
    SCALE_KEY_PRECISION,
};
use crate::engine::{gaussian_kernel, BitmapEngine};
use crate::error::{AtlasError, Result};
use crate::font::metrics::{self, FontMetrics};
use crate::font::{FaceHandle, FontCache, FontIdentifier, GlyphRect, HaloConfig, PassExtent, Rasterizer};

/// Atlas growth settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AtlasSettings {
    /// First attempted width (log2)
    pub initial_width_log2: u32,
    /// First attempted height (log2)
    pub initial_height_log2: u32,
    /// Largest allowed side (log2)
    pub max_size_log2: u32,
    /// Paint every packed rectangle grey before drawing (layout inspection)
    pub debug_fill: bool,
}

impl Default for AtlasSettings {
    fn default() -> Self {
        Self {
            initial_width_log2: INITIAL_WIDTH_LOG2,
            initial_height_log2: INITIAL_HEIGHT_LOG2,
            max_size_log2: MAX_SIZE_LOG2,
            debug_fill: false,
        }
    }
}

impl AtlasSettings {
    fn validate(&self) -> Result<()> {
        if self.max_size_log2 > 15 {
            return Err(AtlasError::InvalidArguments(format!(
                "max_size_log2 {} is above 15",
                self.max_size_log2
            )));
        }
        if self.initial_width_log2 > self.max_size_log2 || self.initial_height_log2 > self.max_size_log2 {
            return Err(AtlasError::InvalidArguments(format!(
                "initial atlas 2^{}x2^{} exceeds maximum 2^{}",
                self.initial_width_log2, self.initial_height_log2, self.max_size_log2
            )));
        }
        Ok(())
    }
}

/// What to put in an atlas
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AtlasRequest {
    /// Encoded font identifiers (`size###source###ref`)
    pub fonts: Vec<String>,
    /// Inclusive codepoint ranges, applied to every font
    pub codepoint_ranges: Vec<(u32, u32)>,
    /// Skip glyphs whose bounding box matches codepoint 0's
    pub missing_glyph_detection: bool,
    /// Halo pass N uses entry N-1; pass 0 is the direct render
    pub halo_passes: Vec<HaloConfig>,
}

impl Default for AtlasRequest {
    fn default() -> Self {
        let halo = |scale, blur_radius| HaloConfig {
            scale,
            blur_radius,
            blur_variance: 1.0,
            pre_multiplier: 1.0,
            post_multiplier: 1.0,
        };
        Self {
            fonts: vec!["27###face###monospace".to_string(), "18###face###monospace".to_string()],
            // Latin-1
            codepoint_ranges: vec![(0x20, 0x7e), (0xa0, 0xff)],
            missing_glyph_detection: false,
            halo_passes: vec![halo(0.6, 4), halo(0.4, 10), halo(0.2, 32)],
        }
    }
}

impl AtlasRequest {
    /// Local checks that need no font: identifiers, ranges and halo passes
    ///
    /// Returns the decoded font set, sorted by encoded form without duplicates.
    pub fn validate(&self) -> Result<Vec<FontIdentifier>> {
        let mut fonts = self
            .fonts
            .iter()
            .map(|s| FontIdentifier::decode(s))
            .collect::<Result<Vec<_>>>()?;
        fonts.sort_by_cached_key(FontIdentifier::encode);
        let before = fonts.len();
        fonts.dedup();
        if fonts.len() != before {
            warn!("Ignoring {} duplicate font(s) in request", before - fonts.len());
        }

        if let Some(&(first, last)) = self.codepoint_ranges.iter().find(|(a, b)| a > b) {
            return Err(AtlasError::InvalidArguments(format!(
                "codepoint range {:#x}..={:#x} is reversed",
                first, last
            )));
        }
        for cfg in &self.halo_passes {
            cfg.validate()?;
        }
        Ok(fonts)
    }

    /// Number of passes including the direct render
    pub fn num_passes(&self) -> usize {
        self.halo_passes.len() + 1
    }
}

/// Next atlas size after a failed packing attempt
///
/// Doubles the smaller side; width grows first when both are equal.
pub fn grow(width_log2: u32, height_log2: u32) -> (u32, u32) {
    if height_log2 >= width_log2 {
        (width_log2 + 1, height_log2)
    } else {
        (width_log2, height_log2 + 1)
    }
}

/// Successful packing attempt
struct Layout {
    width: u32,
    height: u32,
    rects: Vec<Rect>,
}

/// Key under which halo resizes share one engine call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct ResizeKey {
    src_width: u32,
    src_height: u32,
    dst_width: u32,
    dst_height: u32,
    scale: i64,
    blur_px: u32,
}

/// Font-level values derived from the probe characters
struct BaseMetrics {
    common_ascent: i32,
    common_descent: i32,
    cell_width: f32,
}

fn base_metrics(rasterizer: &dyn Rasterizer) -> BaseMetrics {
    let probes: Vec<_> = BASELINE_PROBE_CHARS
        .iter()
        .map(|&c| rasterizer.measure(c as u32))
        .collect();
    BaseMetrics {
        common_ascent: probes.iter().map(|b| b.ascent).max().unwrap_or(0),
        common_descent: probes.iter().map(|b| b.descent).max().unwrap_or(0),
        cell_width: rasterizer.advance(CELL_WIDTH_CHAR as u32),
    }
}

/// Builds glyph atlases; owns the bitmap engine for the duration of a build
pub struct AtlasBuilder {
    engine: BitmapEngine,
    fonts: Arc<FontCache>,
    settings: AtlasSettings,
}

impl AtlasBuilder {
    pub fn new(engine: BitmapEngine, fonts: Arc<FontCache>, settings: AtlasSettings) -> Self {
        Self {
            engine,
            fonts,
            settings,
        }
    }

    pub fn font_cache(&self) -> &Arc<FontCache> {
        &self.fonts
    }

    pub fn settings(&self) -> &AtlasSettings {
        &self.settings
    }

    /// Build an atlas for every glyph of `request`
    pub async fn build(&mut self, request: &AtlasRequest) -> Result<AtlasOutput> {
        self.settings.validate()?;
        let ids = request.validate()?;

        let faces = try_join_all(ids.iter().map(|id| self.fonts.resolve(id))).await?;
        self.render(request, &ids, &faces)
    }

    /// Everything after font resolution; synchronous
    fn render(&mut self, request: &AtlasRequest, ids: &[FontIdentifier], faces: &[FaceHandle]) -> Result<AtlasOutput> {
        let rasterizers: Vec<Box<dyn Rasterizer + '_>> = faces
            .iter()
            .zip(ids)
            .map(|(face, id)| face.rasterizer(id.size()))
            .collect();

        let per_font: Vec<FontMetrics> = rasterizers
            .iter()
            .enumerate()
            .map(|(i, r)| {
                metrics::collect(
                    i,
                    r.as_ref(),
                    &request.codepoint_ranges,
                    &request.halo_passes,
                    request.missing_glyph_detection,
                )
            })
            .collect();
        let glyph_rects: Vec<GlyphRect> = per_font.iter().flat_map(|m| m.rects.iter().copied()).collect();
        let extents = merge_extents(&per_font, request.num_passes());

        let layout = self.pack(&glyph_rects)?;
        let (width, height) = (layout.width, layout.height);
        let stride = width as usize;

        self.engine.reset_arena();
        let bitmap = self.engine.allocate_bitmap(width, height)?;

        // Direct glyphs
        {
            let mut view = self.engine.bitmap_view(bitmap, width, height)?;
            if self.settings.debug_fill {
                for (i, r) in layout.rects.iter().enumerate() {
                    view.fill_rect(r.x, r.y, r.width, r.height, 0x20 + (i * 13 % 0x20) as u8);
                }
            }
            for (g, r) in glyph_rects.iter().zip(&layout.rects) {
                if g.pass != 0 {
                    continue;
                }
                let pen_x = r.x as i32 + g.bounds.left;
                let pen_y = r.y as i32 + g.bounds.ascent;
                rasterizers[g.font].draw(g.codepoint, &mut view, pen_x, pen_y);
            }
        }

        // Halo resizes, one engine call per distinct transform
        let offset = |r: &Rect, pad: u32| bitmap + (r.x + pad) as usize + (r.y + pad) as usize * stride;
        let mut group_of: HashMap<ResizeKey, usize> = HashMap::new();
        let mut groups: Vec<(ResizeKey, f32, Vec<u32>)> = Vec::new();
        let mut sources: HashMap<(usize, u32), usize> = HashMap::new();
        for (i, g) in glyph_rects.iter().enumerate() {
            if g.pass == 0 {
                sources.insert((g.font, g.codepoint), i);
            }
        }
        for (i, g) in glyph_rects.iter().enumerate() {
            if g.pass == 0 {
                continue;
            }
            let Some(&src) = sources.get(&(g.font, g.codepoint)) else {
                continue;
            };
            let cfg = &request.halo_passes[g.pass - 1];
            let blur_px = cfg.blur_px();
            let (s, d) = (&glyph_rects[src], g);
            let key = ResizeKey {
                src_width: s.width,
                src_height: s.height,
                dst_width: d.width - 2 * blur_px,
                dst_height: d.height - 2 * blur_px,
                scale: (cfg.scale * SCALE_KEY_PRECISION).round() as i64,
                blur_px,
            };
            let slot = *group_of.entry(key).or_insert_with(|| {
                groups.push((key, cfg.scale, Vec::new()));
                groups.len() - 1
            });
            let src_off = offset(&layout.rects[src], 0);
            let dst_off = offset(&layout.rects[i], blur_px);
            groups[slot].2.push(to_u32(src_off)?);
            groups[slot].2.push(to_u32(dst_off)?);
        }

        if let Some(max_pairs) = groups.iter().map(|(_, _, p)| p.len() / 2).max() {
            let io_pairs = self.engine.allocate_scratch(2 * max_pairs)?;
            debug!("{} resize group(s), at most {} pair(s)", groups.len(), max_pairs);
            for (key, scale, pairs) in &groups {
                self.engine.write_u32s(io_pairs, pairs)?;
                self.engine.batch_resize(
                    pairs.len() / 2,
                    key.src_width,
                    key.src_height,
                    key.dst_width,
                    key.dst_height,
                    *scale,
                    io_pairs,
                    stride,
                )?;
            }
        }

        // Blur, one kernel per pass
        for (pass, extent) in extents.iter().enumerate() {
            let Some(extent) = extent else { continue };
            if extent.blur_px == 0 || extent.max_width == 0 {
                continue;
            }
            let cfg = &request.halo_passes[pass - 1];
            self.engine.arena_checkpoint()?;
            let kernel = self.engine.blur_kernel_setup(extent.blur_px, extent.max_width, extent.max_height)?;
            self.engine.write_f32s(
                kernel,
                &gaussian_kernel(extent.blur_px, cfg.blur_variance, cfg.pre_multiplier),
            )?;
            for (g, r) in glyph_rects.iter().zip(&layout.rects) {
                if g.pass == pass {
                    self.engine.blur_apply(offset(r, 0), r.width, r.height, stride)?;
                }
            }
            self.engine.arena_restore()?;
        }

        let (lookup, summaries) = assemble(request, ids, &rasterizers, &per_font, &glyph_rects, &layout);
        let data = self.engine.bytes(bitmap, width as usize * height as usize)?.to_vec();

        info!(
            "Atlas built: {}x{}, {} font(s), {} glyph(s), {} rect(s)",
            width,
            height,
            ids.len(),
            lookup.len(),
            glyph_rects.len()
        );
        Ok(AtlasOutput {
            image: AtlasImage { width, height, data },
            lookup,
            fonts: summaries,
        })
    }

    /// Pack every rectangle, growing the atlas until it fits
    fn pack(&self, glyph_rects: &[GlyphRect]) -> Result<Layout> {
        let max = self.settings.max_size_log2;
        let (mut wl, mut hl) = (self.settings.initial_width_log2, self.settings.initial_height_log2);
        loop {
            let (width, height) = (1u32 << wl, 1u32 << hl);
            let mut rects: Vec<Rect> = glyph_rects.iter().map(|g| Rect::new(g.width, g.height)).collect();
            let mut packer = SkylinePacker::new(width, height, width as usize);
            if packer.pack(&mut rects) {
                debug_assert_eq!(packer.check_invariants(), Ok(()));
                debug!("Packed {} rect(s) into {}x{}", rects.len(), width, height);
                return Ok(Layout { width, height, rects });
            }

            let (next_wl, next_hl) = grow(wl, hl);
            if next_wl > max || next_hl > max {
                return Err(AtlasError::AtlasTooLarge {
                    width: 1 << next_wl,
                    height: 1 << next_hl,
                    max: 1 << max,
                });
            }
            debug!(
                "{}x{} too small, retrying at {}x{}",
                width,
                height,
                1u32 << next_wl,
                1u32 << next_hl
            );
            (wl, hl) = (next_wl, next_hl);
        }
    }
}

fn to_u32(offset: usize) -> Result<u32> {
    u32::try_from(offset).map_err(|_| AtlasError::BitmapEngine(format!("offset {} beyond 32-bit range", offset)))
}

/// Per-pass maxima across every font
fn merge_extents(per_font: &[FontMetrics], num_passes: usize) -> Vec<Option<PassExtent>> {
    let mut merged: Vec<Option<PassExtent>> = vec![None; num_passes];
    for m in per_font {
        for (slot, extent) in merged.iter_mut().zip(&m.extents) {
            if let Some(e) = extent {
                let acc = slot.get_or_insert(PassExtent {
                    blur_px: e.blur_px,
                    ..PassExtent::default()
                });
                acc.max_width = acc.max_width.max(e.max_width);
                acc.max_height = acc.max_height.max(e.max_height);
            }
        }
    }
    merged
}

/// Lookup entries and font summaries for a finished layout
fn assemble(
    request: &AtlasRequest,
    ids: &[FontIdentifier],
    rasterizers: &[Box<dyn Rasterizer + '_>],
    per_font: &[FontMetrics],
    glyph_rects: &[GlyphRect],
    layout: &Layout,
) -> (LookupTable, Vec<FontSummary>) {
    let num_passes = request.num_passes();
    let bases: Vec<BaseMetrics> = rasterizers.iter().map(|r| base_metrics(r.as_ref())).collect();

    let mut lookup = LookupTable::new();
    for (g, r) in glyph_rects.iter().zip(&layout.rects) {
        let base = &bases[g.font];
        let (w0, h0) = (g.bounds.width() as u32, g.bounds.height() as u32);
        let dx0 = -g.bounds.left;
        let dy0 = -g.bounds.ascent + base.common_ascent;
        let pad = if g.pass == 0 {
            0
        } else {
            request.halo_passes[g.pass - 1].blur_px()
        };
        let entry = LookupEntry {
            u: r.x,
            v: r.y,
            w: r.width,
            h: r.height,
            dx: dx0 - pad as i32,
            dy: dy0 - pad as i32,
            w2: w0 + 2 * pad,
            h2: h0 + 2 * pad,
        };
        let key = GlyphKey {
            codepoint: g.codepoint,
            font: ids[g.font].clone(),
        };
        lookup.insert(key, g.pass, num_passes, entry);
    }

    let passes: Vec<PassInfo> = std::iter::once(PassInfo { post_multiplier: 1.0 })
        .chain(request.halo_passes.iter().map(|cfg| PassInfo {
            post_multiplier: cfg.post_multiplier,
        }))
        .collect();

    let summaries = ids
        .iter()
        .zip(&bases)
        .zip(per_font)
        .map(|((id, base), m)| FontSummary {
            font: id.clone(),
            cell_width: base.cell_width,
            cell_height: (base.common_ascent + base.common_descent).max(0) as u32,
            common_ascent: base.common_ascent,
            passes: passes.clone(),
            glyphs: m.codepoints.len(),
        })
        .collect();

    (lookup, summaries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::BitmapView;
    use crate::font::{FontFace, FontLoader, GlyphBounds};
    use futures_util::future::BoxFuture;
    use futures_util::FutureExt;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Notify;

    /// Solid block glyphs; size-proportional so tests can force growth
    struct BlockFace(String);

    struct BlockRasterizer {
        size: i32,
    }

    impl Rasterizer for BlockRasterizer {
        fn measure(&self, codepoint: u32) -> GlyphBounds {
            let s = self.size;
            match char::from_u32(codepoint) {
                Some('j') | Some('|') | Some(']') => GlyphBounds {
                    left: 0,
                    right: 2,
                    ascent: s * 3 / 4,
                    descent: s / 4,
                },
                Some(c) if c.is_ascii_graphic() => GlyphBounds {
                    left: 1,
                    right: s / 2,
                    ascent: s * 3 / 4,
                    descent: 0,
                },
                _ => GlyphBounds::default(),
            }
        }

        fn advance(&self, _codepoint: u32) -> f32 {
            self.size as f32 * 0.6
        }

        fn draw(&self, codepoint: u32, target: &mut BitmapView<'_>, x: i32, y: i32) {
            let b = self.measure(codepoint);
            for py in y - b.ascent..y + b.descent {
                for px in x - b.left..x + b.right {
                    target.blend(px, py, 255);
                }
            }
        }
    }

    impl FontFace for BlockFace {
        fn name(&self) -> &str {
            &self.0
        }

        fn rasterizer(&self, size: u32) -> Box<dyn Rasterizer + '_> {
            Box::new(BlockRasterizer { size: size as i32 })
        }
    }

    /// `missing*` fails at once; `gated*` waits for the gate
    #[derive(Default)]
    struct BlockLoader {
        calls: Arc<AtomicUsize>,
        gate: Arc<Notify>,
    }

    impl FontLoader for BlockLoader {
        fn load_url(&self, url: &str, face_name: String) -> BoxFuture<'static, anyhow::Result<FaceHandle>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let missing = url.starts_with("missing");
            let gate = url.starts_with("gated").then(|| self.gate.clone());
            async move {
                if missing {
                    anyhow::bail!("404");
                }
                if let Some(gate) = gate {
                    gate.notified().await;
                }
                let face: FaceHandle = Arc::new(BlockFace(face_name));
                Ok(face)
            }
            .boxed()
        }

        fn load_face(&self, family: &str, face_name: String) -> BoxFuture<'static, anyhow::Result<FaceHandle>> {
            self.load_url(family, face_name)
        }
    }

    fn builder_with(settings: AtlasSettings) -> (AtlasBuilder, Arc<AtomicUsize>) {
        let loader = BlockLoader::default();
        let calls = loader.calls.clone();
        let cache = Arc::new(FontCache::new(Box::new(loader)));
        (AtlasBuilder::new(BitmapEngine::new(0), cache, settings), calls)
    }

    fn request(fonts: &[&str], ranges: &[(u32, u32)], halo_passes: Vec<HaloConfig>) -> AtlasRequest {
        AtlasRequest {
            fonts: fonts.iter().map(|s| s.to_string()).collect(),
            codepoint_ranges: ranges.to_vec(),
            missing_glyph_detection: false,
            halo_passes,
        }
    }

    fn halo(scale: f32, blur_radius: u32) -> HaloConfig {
        HaloConfig {
            scale,
            blur_radius,
            blur_variance: 1.0,
            pre_multiplier: 1.0,
            post_multiplier: 2.5,
        }
    }

    fn overlaps(a: &LookupEntry, b: &LookupEntry) -> bool {
        a.u < b.u + b.w && b.u < a.u + a.w && a.v < b.v + b.h && b.v < a.v + a.h
    }

    #[test]
    fn test_grow_prefers_width_on_ties() {
        assert_eq!(grow(7, 7), (8, 7));
        assert_eq!(grow(8, 7), (8, 8));
        assert_eq!(grow(9, 8), (9, 9));
    }

    #[tokio::test]
    async fn test_direct_glyphs() {
        let (mut builder, _) = builder_with(AtlasSettings::default());
        let req = request(&["16###url###block.ttf"], &[(0x20, 0x20), (0x41, 0x43)], vec![]);
        let out = builder.build(&req).await.unwrap();

        assert_eq!((out.image.width, out.image.height), (128, 128));
        assert_eq!(out.image.data.len(), 128 * 128);
        // Space has no box
        assert_eq!(out.lookup.len(), 3);

        let font = FontIdentifier::decode("16###url###block.ttf").unwrap();
        let a = *out.lookup.get(&font, 0x41, 0).unwrap();
        assert_eq!((a.w, a.h), (9, 12));
        assert_eq!((a.dx, a.dy), (-1, 0));
        assert_eq!((a.w2, a.h2), (9, 12));
        assert_eq!(out.image.pixel(a.u, a.v), 255);
        assert_eq!(out.image.pixel(a.u + a.w - 1, a.v + a.h - 1), 255);

        let summary = &out.fonts[0];
        assert_eq!(summary.common_ascent, 12);
        assert_eq!(summary.cell_height, 16);
        assert!((summary.cell_width - 9.6).abs() < 1e-4);
        assert_eq!(summary.glyphs, 3);
        assert_eq!(summary.passes, vec![PassInfo { post_multiplier: 1.0 }]);
    }

    #[tokio::test]
    async fn test_halo_pass_entries() {
        let (mut builder, _) = builder_with(AtlasSettings::default());
        let req = request(&["16###url###block.ttf"], &[(0x41, 0x42)], vec![halo(0.5, 2)]);
        let out = builder.build(&req).await.unwrap();
        let font = FontIdentifier::decode("16###url###block.ttf").unwrap();

        let base = *out.lookup.get(&font, 0x41, 0).unwrap();
        let h = *out.lookup.get(&font, 0x41, 1).unwrap();
        // 9x12 at half scale -> 5x6, plus one pixel of blur padding per side
        assert_eq!((h.w, h.h), (7, 8));
        assert_eq!((h.dx, h.dy), (base.dx - 1, base.dy - 1));
        assert_eq!((h.w2, h.h2), (base.w2 + 2, base.h2 + 2));
        assert!(out.image.pixel(h.u + 3, h.v + 4) > 0);

        assert_eq!(out.fonts[0].passes.len(), 2);
        assert_eq!(out.fonts[0].passes[1].post_multiplier, 2.5);
    }

    #[tokio::test]
    async fn test_growth_and_no_overlap() {
        let (mut builder, _) = builder_with(AtlasSettings::default());
        let req = request(&["64###url###block.ttf"], &[(0x21, 0x7e)], vec![halo(0.5, 4)]);
        let out = builder.build(&req).await.unwrap();

        assert!(out.image.width >= 256);
        assert!(out.image.width.is_power_of_two() && out.image.height.is_power_of_two());
        assert!(out.image.height <= out.image.width);

        let entries: Vec<LookupEntry> = out
            .lookup
            .iter()
            .flat_map(|(_, passes)| passes.iter().flatten().copied())
            .collect();
        assert_eq!(entries.len(), 94 * 2);
        for (i, a) in entries.iter().enumerate() {
            assert!(a.u + a.w <= out.image.width && a.v + a.h <= out.image.height);
            for b in &entries[i + 1..] {
                assert!(!overlaps(a, b), "{:?} overlaps {:?}", a, b);
            }
        }
    }

    #[tokio::test]
    async fn test_atlas_too_large() {
        let settings = AtlasSettings {
            max_size_log2: 7,
            ..AtlasSettings::default()
        };
        let (mut builder, _) = builder_with(settings);
        let req = request(&["64###url###block.ttf"], &[(0x21, 0x7e)], vec![]);
        let err = builder.build(&req).await.unwrap_err();
        assert!(matches!(err, AtlasError::AtlasTooLarge { max: 128, .. }));
    }

    #[tokio::test]
    async fn test_malformed_identifier_loads_nothing() {
        let (mut builder, calls) = builder_with(AtlasSettings::default());
        let req = request(&["16###url###block.ttf", "16###ftp###x"], &[(0x41, 0x41)], vec![]);
        let err = builder.build(&req).await.unwrap_err();
        assert!(matches!(err, AtlasError::MalformedFontIdentifier(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_fonts_deduplicated_and_sorted() {
        let (mut builder, calls) = builder_with(AtlasSettings::default());
        let req = request(
            &["16###url###block.ttf", "12###url###block.ttf", "16###url###block.ttf"],
            &[(0x41, 0x41)],
            vec![],
        );
        let out = builder.build(&req).await.unwrap();
        let names: Vec<String> = out.fonts.iter().map(|f| f.font.encode()).collect();
        assert_eq!(names, vec!["12###url###block.ttf", "16###url###block.ttf"]);
        assert_eq!(out.lookup.len(), 2);
        // One face serves both sizes
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_font_failure_aborts_build() {
        let (mut builder, _) = builder_with(AtlasSettings::default());
        let req = request(&["16###url###missing.ttf"], &[(0x41, 0x41)], vec![]);
        let err = builder.build(&req).await.unwrap_err();
        assert!(matches!(err, AtlasError::FontResolution { .. }));

        // The builder stays usable
        let ok = request(&["16###url###block.ttf"], &[(0x41, 0x41)], vec![]);
        assert!(builder.build(&ok).await.is_ok());
    }

    #[tokio::test]
    async fn test_failed_font_does_not_strand_slow_sibling() {
        let loader = BlockLoader::default();
        let gate = loader.gate.clone();
        let cache = Arc::new(FontCache::new(Box::new(loader)));
        let mut builder = AtlasBuilder::new(BitmapEngine::new(0), cache, AtlasSettings::default());

        // The gated load is in flight when the missing font fails the build
        let req = request(&["16###url###missing.ttf", "16###url###gated.ttf"], &[(0x41, 0x41)], vec![]);
        let err = builder.build(&req).await.unwrap_err();
        assert!(matches!(err, AtlasError::FontResolution { .. }));

        gate.notify_one();
        let retry = request(&["16###url###gated.ttf"], &[(0x41, 0x41)], vec![]);
        let out = tokio::time::timeout(Duration::from_secs(2), builder.build(&retry))
            .await
            .expect("font load stranded")
            .unwrap();
        assert_eq!(out.lookup.len(), 1);
    }

    #[tokio::test]
    async fn test_rebuild_is_deterministic() {
        let (mut builder, _) = builder_with(AtlasSettings::default());
        let req = request(&["20###url###block.ttf"], &[(0x41, 0x5a)], vec![halo(0.5, 4), halo(0.25, 8)]);
        let first = builder.build(&req).await.unwrap();
        let second = builder.build(&req).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_reversed_range_rejected() {
        let (mut builder, _) = builder_with(AtlasSettings::default());
        let req = request(&["16###url###block.ttf"], &[(0x42, 0x41)], vec![]);
        assert!(matches!(
            builder.build(&req).await,
            Err(AtlasError::InvalidArguments(_))
        ));
    }
}
