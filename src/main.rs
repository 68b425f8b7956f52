//! halo-atlas - glyph atlas builder
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │            main thread (CLI)             │
//! ├──────────────────────────────────────────┤
//! │  request  →  atlas-worker thread         │
//! │                ↓                         │
//! │   fonts → metrics → skyline → engine     │
//! │                ↓                         │
//! │  response ←  image + lookup table        │
//! └──────────────────────────────────────────┘
//! ```

use anyhow::{anyhow, Context, Result};
use log::info;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use halo_atlas::atlas::AtlasBuilder;
use halo_atlas::config::{self, Config};
use halo_atlas::engine::BitmapEngine;
use halo_atlas::font::{FontCache, SystemFontLoader};
use halo_atlas::worker::{AtlasWorker, Reply, OP_MAKE_ATLAS};
use halo_atlas::AtlasOutput;

/// Upper bound on one build
const BUILD_TIMEOUT: Duration = Duration::from_secs(600);

fn print_help() {
    println!(
        r#"halo-atlas {} - glyph atlas builder with blurred halo passes

USAGE:
    halo-atlas [OPTIONS]

OPTIONS:
    -h, --help              Print this help message
    -V, --version           Print version information
    -c, --config PATH       Use this config file
    -o, --out PATH          Atlas image output (grayscale PNG)
    -l, --lookup PATH       Lookup table output (JSON)
    --debug-fill            Paint packed rectangles grey
    --init-config[=PATH]    Generate config file template
    -f, --force             Overwrite config file without confirmation

EXAMPLES:
    halo-atlas                                 Build the configured atlas
    halo-atlas -o glyphs.png -l glyphs.json    Choose output files
    halo-atlas --init-config                   Generate default config
    RUST_LOG=debug halo-atlas                  Show packing and engine details

CONFIG FILE:
    $HALO_ATLAS_CONFIG
    ~/.config/halo-atlas/config.toml
    /etc/halo-atlas/config.toml
"#,
        env!("CARGO_PKG_VERSION")
    );
}

/// Value of `--name VALUE` / `--name=VALUE` (or the short form)
fn option_value<'a>(args: &'a [String], long: &str, short: &str) -> Option<&'a str> {
    let prefix = format!("{}=", long);
    args.iter().enumerate().find_map(|(i, a)| {
        if let Some(v) = a.strip_prefix(&prefix) {
            Some(v)
        } else if a == long || a == short {
            args.get(i + 1).map(String::as_str)
        } else {
            None
        }
    })
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    // Check command line arguments
    let args: Vec<String> = std::env::args().collect();

    // --help
    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_help();
        return Ok(());
    }

    // --version
    if args.iter().any(|a| a == "--version" || a == "-V") {
        println!("halo-atlas {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    // Config file generation mode
    // --init-config or --init-config=PATH
    if let Some(arg) = args.iter().find(|a| a.starts_with("--init-config")) {
        let target = arg.split_once('=').map(|(_, p)| PathBuf::from(p));
        let force = args.iter().any(|a| a == "--force" || a == "-f");
        return init_config(target, force);
    }

    let mut config = match option_value(&args, "--config", "-c") {
        Some(path) => Config::load_from_file(Path::new(path))?,
        None => Config::load(),
    };
    if args.iter().any(|a| a == "--debug-fill") {
        config.atlas.debug_fill = true;
    }
    let image_path = option_value(&args, "--out", "-o").unwrap_or(&config.output.image).to_string();
    let lookup_path = option_value(&args, "--lookup", "-l").unwrap_or(&config.output.lookup).to_string();

    info!("halo-atlas starting...");

    let loader = SystemFontLoader::new(config.fonts.resolved_search_dirs());
    let builder = AtlasBuilder::new(
        BitmapEngine::new(config.engine.initial_arena_bytes),
        Arc::new(FontCache::new(Box::new(loader))),
        config.atlas.clone(),
    );
    let mut worker = AtlasWorker::spawn(builder)?;

    let arguments = serde_json::to_value(&config.request).context("Failed to encode atlas request")?;
    let id = worker.submit(OP_MAKE_ATLAS, arguments)?;
    let response = worker.wait_for(id, BUILD_TIMEOUT)?;
    worker.shutdown()?;

    let output = match response.outcome {
        Ok(Reply::Atlas(output)) => output,
        Ok(other) => return Err(anyhow!("Unexpected reply: {:?}", other)),
        Err(e) => return Err(anyhow!(e).context("Atlas build failed")),
    };

    write_outputs(&output, Path::new(&image_path), Path::new(&lookup_path))?;
    eprintln!(
        "[OK] {}x{} atlas, {} glyph(s): {} + {}",
        output.image.width,
        output.image.height,
        output.lookup.len(),
        image_path,
        lookup_path
    );
    Ok(())
}

/// Write the template config, asking before overwriting
fn init_config(target: Option<PathBuf>, force: bool) -> Result<()> {
    let config_path = match target {
        Some(p) => p,
        None => config::default_config_path().ok_or_else(|| anyhow!("Config directory not found"))?,
    };

    if config_path.exists() && !force {
        println!("Config file already exists: {}", config_path.display());
        print!("Overwrite? [y/N]: ");
        std::io::Write::flush(&mut std::io::stdout())?;

        let mut input = String::new();
        std::io::stdin().read_line(&mut input)?;
        let input = input.trim().to_lowercase();

        if input != "y" && input != "yes" {
            println!("Aborted.");
            return Ok(());
        }
    }

    let written = Config::write_default_config(Some(&config_path))?;
    println!("Config file written: {}", written.display());
    Ok(())
}

fn write_outputs(output: &AtlasOutput, image_path: &Path, lookup_path: &Path) -> Result<()> {
    let image = image::GrayImage::from_raw(output.image.width, output.image.height, output.image.data.clone())
        .ok_or_else(|| anyhow!("Atlas image buffer does not match its size"))?;
    image
        .save(image_path)
        .with_context(|| format!("Failed to write atlas image: {}", image_path.display()))?;

    let json = serde_json::to_string_pretty(&output.manifest()).context("Failed to encode lookup table")?;
    std::fs::write(lookup_path, json)
        .with_context(|| format!("Failed to write lookup table: {}", lookup_path.display()))?;
    info!("Wrote {} and {}", image_path.display(), lookup_path.display());
    Ok(())
}
