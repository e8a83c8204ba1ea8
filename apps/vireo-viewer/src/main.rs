//! Vireo Demo Viewer
//!
//! Renders a lit, textured cube under an orbiting camera. The cube's texture
//! is regenerated and streamed to the GPU every frame.
//!
//! ## Usage
//!
//! ```bash
//! cargo run -p vireo-viewer -- [OPTIONS]
//! ```
//!
//! ## Options
//!
//! - `-c, --config <PATH>`: Load the application configuration from a TOML file
//! - `-h, --help`: Print help message
//!
//! ## Controls
//!
//! - `W`: Toggle wireframe
//! - `Space`: Pause or resume the texture animation
//! - `Escape`: Quit
//!
//! ## Environment Variables
//!
//! - `RUST_LOG`: Set log level (e.g., info, debug, trace)

mod app;
mod scene;

use anyhow::Context as _;
use vireo_app::{run_app, AppConfig};

use crate::app::Viewer;

const WIDTH: u32 = 1280;
const HEIGHT: u32 = 720;

fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();

    // Check for help flag before starting the app
    if args.iter().any(|arg| arg == "-h" || arg == "--help") {
        print_help();
        return Ok(());
    }

    let config = match config_path(&args) {
        Some(path) => AppConfig::load(path).with_context(|| format!("loading {path}"))?,
        None => AppConfig::new("Vireo Viewer")
            .with_size(WIDTH, HEIGHT)
            .with_clear_color([0.05, 0.05, 0.08, 1.0])
            .with_wireframe(true),
    };

    run_app(config, Viewer::new())
}

/// Value following `-c` or `--config`, if any.
fn config_path(args: &[String]) -> Option<&str> {
    args.iter()
        .position(|arg| arg == "-c" || arg == "--config")
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
}

fn print_help() {
    eprintln!(
        "Vireo Demo Viewer

USAGE:
    cargo run -p vireo-viewer -- [OPTIONS]

OPTIONS:
    -c, --config <PATH>     Load configuration from a TOML file, e.g.
                                title = \"Viewer\"
                                width = 1920
                                height = 1080
                                vsync = false
                                wireframe = true
    -h, --help              Print this help message

CONTROLS:
    W                       Toggle wireframe
    Space                   Pause or resume the texture animation
    Escape                  Quit

ENVIRONMENT VARIABLES:
    RUST_LOG                Set log level (e.g., info, debug, trace)"
    );
}
