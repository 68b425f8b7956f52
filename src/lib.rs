//! halo-atlas - glyph atlas builder with blurred halo passes
//!
//! Packs every requested glyph of a font set, plus downscaled and blurred
//! "halo" copies used for bloom, into one single-channel bitmap and
//! produces the table a renderer needs to find and place each glyph.

pub mod atlas;
pub mod config;
pub mod constants;
pub mod engine;
pub mod error;
pub mod font;
pub mod worker;

pub use atlas::{AtlasBuilder, AtlasOutput, AtlasRequest, AtlasSettings};
pub use error::{AtlasError, Result};
pub use worker::AtlasWorker;
