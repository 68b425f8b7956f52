//! Glyph atlas construction
//!
//! Handles:
//! - Skyline rectangle packing
//! - Build orchestration (growth, resize batching, blur passes)
//! - Lookup table and atlas image results

pub mod builder;
pub mod lookup;
pub mod skyline;

pub use builder::{grow, AtlasBuilder, AtlasRequest, AtlasSettings};
pub use lookup::{
    AtlasImage, AtlasManifest, AtlasOutput, FontSummary, GlyphKey, GlyphLookup, LookupEntry, LookupTable, PassInfo,
};
pub use skyline::{Rect, SkylinePacker};
