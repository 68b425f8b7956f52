//! Font resolution and glyph measurement
//!
//! Handles:
//! - Font identifier encoding (`size###source###ref`)
//! - Font loading (fontdue) with a coalescing, process-wide cache
//! - Installed face lookup (fontconfig)
//! - Glyph metric collection for direct and halo passes

pub mod cache;
pub mod face;
pub mod fontconfig;
pub mod identifier;
pub mod metrics;

pub use cache::{FontCache, FontLoader, SystemFontLoader};
pub use face::{FaceHandle, FontFace, FontdueFace, GlyphBounds, Rasterizer};
pub use identifier::{FontIdentifier, FontSource};
pub use metrics::{GlyphRect, HaloConfig, HaloSize, PassExtent};
