// imagefloat - A floating image viewer for Wayland
// Shows an image in a semi-transparent, always-on-top window with pan, zoom and opacity

mod app;
mod cli;
mod drop_loader;
mod error;
mod image_loader;
mod input;
mod layout;
mod render;
mod settings;
mod text;
mod viewport;
mod wayland;
mod wgpu_renderer;
mod window;

use anyhow::{Context, Result};
use app::LaunchOptions;
use image_loader::ImageData;
use log::info;

/// Decode the image named on the command line or piped in, if any
fn load_initial_image(args: &cli::ParsedArgs) -> Result<Option<ImageData>> {
    if let Some(data) = &args.image_data {
        let image = image_loader::load_bytes(data).context("Failed to decode image from stdin")?;
        return Ok(Some(image));
    }
    match &args.image_path {
        Some(path) => {
            let image = image_loader::load_path(path)
                .with_context(|| format!("Failed to load image {}", path.display()))?;
            Ok(Some(image))
        }
        None => Ok(None),
    }
}

fn main() -> Result<()> {
    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // Parse command line arguments
    let args = cli::parse_args()?;

    info!(
        "Starting imagefloat with image: {:?}, opacity: {}",
        args.image_path, args.opacity
    );

    let image = load_initial_image(&args)?;
    if let Some(image) = &image {
        info!("Image loaded: {}x{} pixels", image.width, image.height);
    }

    // Run with layer-shell (GPU rendering by default, CPU as fallback)
    info!("Using layer-shell overlay mode (GPU: {})", args.use_gpu);
    wayland::run(wayland::RunOptions {
        image,
        launch: LaunchOptions {
            opacity: args.opacity,
            always_on_top: args.always_on_top,
            gesture_mode: args.gesture_mode,
        },
        size: args.size,
        use_gpu: args.use_gpu,
    })
}
