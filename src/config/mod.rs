//! Configuration file management
//!
//! Loads TOML configuration files and provides builder settings plus the
//! default atlas request used by the command line tool.
//! Default config path: ~/.config/halo-atlas/config.toml

use anyhow::{Context, Result};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::atlas::{AtlasRequest, AtlasSettings};
use crate::constants::DEFAULT_ARENA_BYTES;

/// Application settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Atlas growth settings
    pub atlas: AtlasSettings,
    /// Bitmap engine settings
    pub engine: EngineConfig,
    /// Font lookup settings
    pub fonts: FontsConfig,
    /// Output file settings
    pub output: OutputConfig,
    /// Default build request
    pub request: AtlasRequest,
}

/// Bitmap engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Arena size reserved up front (grows on demand)
    pub initial_arena_bytes: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            initial_arena_bytes: DEFAULT_ARENA_BYTES,
        }
    }
}

/// Font lookup settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FontsConfig {
    /// Directories searched for relative font URLs ("~" is expanded)
    pub search_dirs: Vec<String>,
}

impl FontsConfig {
    /// Search directories with "~" expanded
    pub fn resolved_search_dirs(&self) -> Vec<PathBuf> {
        self.search_dirs.iter().map(|d| expand_home(d)).collect()
    }
}

/// Output file settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Atlas image path (grayscale PNG)
    pub image: String,
    /// Lookup table path (JSON)
    pub lookup: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            image: "atlas.png".to_string(),
            lookup: "atlas.json".to_string(),
        }
    }
}

/// Expand a leading "~" to the home directory
pub fn expand_home(path: &str) -> PathBuf {
    if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    } else if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

impl Config {
    /// System-wide config path
    const SYSTEM_CONFIG_PATH: &'static str = "/etc/halo-atlas/config.toml";

    /// Get the path that would be used for loading config
    /// Returns None if using built-in defaults
    pub fn config_path() -> Option<PathBuf> {
        // 1. HALO_ATLAS_CONFIG environment variable
        if let Ok(path) = std::env::var("HALO_ATLAS_CONFIG") {
            let p = Path::new(&path);
            if p.exists() {
                return Some(p.to_path_buf());
            }
        }

        // 2. User config: ~/.config/halo-atlas/config.toml
        if let Some(config_path) = default_config_path() {
            if config_path.exists() {
                return Some(config_path);
            }
        }

        // 3. System config: /etc/halo-atlas/config.toml
        let system_config = Path::new(Self::SYSTEM_CONFIG_PATH);
        if system_config.exists() {
            return Some(system_config.to_path_buf());
        }

        None
    }

    /// Load configuration with priority:
    /// 1. HALO_ATLAS_CONFIG environment variable
    /// 2. ~/.config/halo-atlas/config.toml (user config)
    /// 3. /etc/halo-atlas/config.toml (system config)
    /// 4. Built-in defaults
    pub fn load() -> Self {
        if let Some(path) = Self::config_path() {
            match Self::load_from_file(&path) {
                Ok(config) => {
                    info!("Loaded config: {}", path.display());
                    return config;
                }
                Err(e) => {
                    warn!("Failed to load config {}: {:#}", path.display(), e);
                }
            }
        }
        info!("Using built-in default config");
        Self::default()
    }

    /// Load settings from specified path
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_toml(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Parse settings from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Render the current settings as a commented TOML template
    pub fn to_template(&self) -> Result<String> {
        let body = toml::to_string_pretty(self).context("Failed to serialize config")?;
        Ok(format!(
            "# halo-atlas configuration\n\
             #\n\
             # Font identifiers are \"<size>###<face|url>###<reference>\".\n\
             # Halo pass N uses request.halo_passes[N-1]; pass 0 is the direct render.\n\n{}",
            fix_float_precision(&body)
        ))
    }

    /// Write the default template to `path` (or the user config path)
    pub fn write_default_config(path: Option<&Path>) -> Result<PathBuf> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => default_config_path().ok_or_else(|| anyhow::anyhow!("Config directory not found"))?,
        };
        if let Some(parent) = config_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
        }
        std::fs::write(&config_path, Self::default().to_template()?)
            .with_context(|| format!("Failed to write config file: {}", config_path.display()))?;
        info!("Wrote config template: {}", config_path.display());
        Ok(config_path)
    }
}

/// Fix f32 serialization precision issues
/// Replace the imprecise renderings of the default halo values
fn fix_float_precision(content: &str) -> String {
    let replacements = [
        ("0.6000000238418579", "0.6"),
        ("0.4000000059604645", "0.4"),
        ("0.20000000298023224", "0.2"),
    ];

    let mut result = content.to_string();
    for (from, to) in replacements {
        result = result.replace(from, to);
    }
    result
}

/// Get default config file path
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("halo-atlas").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.atlas.initial_width_log2, 7);
        assert_eq!(config.atlas.initial_height_log2, 7);
        assert_eq!(config.atlas.max_size_log2, 13);
        assert_eq!(config.request.fonts.len(), 2);
        assert_eq!(config.request.codepoint_ranges, vec![(0x20, 0x7e), (0xa0, 0xff)]);
        assert_eq!(config.request.halo_passes.len(), 3);
        assert_eq!(config.request.halo_passes[2].blur_radius, 32);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = Config::from_toml(
            r#"
[atlas]
max_size_log2 = 10

[request]
fonts = ["12###url###fonts/Hack.ttf"]
"#,
        )
        .unwrap();
        assert_eq!(config.atlas.max_size_log2, 10);
        assert_eq!(config.atlas.initial_width_log2, 7);
        assert_eq!(config.request.fonts, vec!["12###url###fonts/Hack.ttf".to_string()]);
        assert_eq!(config.request.halo_passes.len(), 3);
        assert_eq!(config.output.image, "atlas.png");
    }

    #[test]
    fn test_halo_pass_tables() {
        let config = Config::from_toml(
            r#"
[request]
halo_passes = [
    { scale = 0.5, blur_radius = 4, blur_variance = 1.0, pre_multiplier = 2.0 },
    { scale = 0.25, blur_radius = 8, blur_variance = 1.0, pre_multiplier = 1.0, post_multiplier = 3.0 },
]
"#,
        )
        .unwrap();
        let passes = &config.request.halo_passes;
        assert_eq!(passes.len(), 2);
        assert_eq!(passes[0].post_multiplier, 1.0);
        assert_eq!(passes[1].post_multiplier, 3.0);
    }

    #[test]
    fn test_template_parses_back() {
        let template = Config::default().to_template().unwrap();
        assert!(template.contains("scale = 0.6"));
        let config = Config::from_toml(&template).unwrap();
        assert_eq!(config.request, Config::default().request);
    }

    #[test]
    fn test_expand_home() {
        assert_eq!(expand_home("/usr/share/fonts"), PathBuf::from("/usr/share/fonts"));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_home("~/fonts"), home.join("fonts"));
        }
    }
}
