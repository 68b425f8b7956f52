//! fontconfig integration
//!
//! Resolves `face` font identifiers (installed family names) to font files.

use anyhow::{anyhow, Result};
use fontconfig::Fontconfig;
use log::{info, warn};
use std::path::PathBuf;

/// Font search result
#[derive(Debug, Clone)]
pub struct FontMatch {
    /// Font file path
    pub path: PathBuf,
    /// Font name
    pub family: String,
}

/// Generic family names fontconfig is allowed to substitute freely
const GENERIC_FAMILIES: [&str; 3] = ["monospace", "sans-serif", "serif"];

/// Search installed fonts using fontconfig
pub struct FontFinder {
    fc: Fontconfig,
}

impl FontFinder {
    /// Initialize FontFinder
    pub fn new() -> Result<Self> {
        let fc = Fontconfig::new().ok_or_else(|| anyhow!("fontconfig initialization failed"))?;
        Ok(Self { fc })
    }

    /// Search by family name
    ///
    /// fontconfig always answers with its closest match, so for concrete
    /// family names the answer must actually resemble the request.
    pub fn find_font(&self, family: &str) -> Option<FontMatch> {
        let font = self.fc.find(family, None)?;
        let req = family.to_ascii_lowercase();
        if GENERIC_FAMILIES.contains(&req.as_str()) {
            return Some(FontMatch {
                path: font.path,
                family: font.name,
            });
        }
        let got = font.name.to_ascii_lowercase();
        if got.contains(&req) || req.contains(&got) {
            return Some(FontMatch {
                path: font.path,
                family: font.name,
            });
        }
        warn!(
            "fontconfig: rejected false match for \"{}\": got \"{}\"",
            family, font.name
        );
        None
    }

    /// Resolve an installed family name to its font file
    pub fn resolve(&self, family: &str) -> Result<FontMatch> {
        let font_match = self
            .find_font(family)
            .ok_or_else(|| anyhow!("Font face not installed: \"{}\"", family))?;
        info!(
            "Font face resolved: \"{}\" → {} ({})",
            family,
            font_match.family,
            font_match.path.display()
        );
        Ok(font_match)
    }
}
