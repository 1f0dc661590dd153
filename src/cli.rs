// Command line interface module
// Handles parsing of command line arguments and stdin input

use crate::viewport::{GestureMode, DEFAULT_OPACITY, MAX_OPACITY, MIN_OPACITY};
use crate::window::{MAX_SIZE, MIN_SIZE};
use anyhow::{bail, Result};
use clap::Parser;
use std::io::{self, Read};
use std::path::PathBuf;

/// imagefloat - A floating, semi-transparent image viewer for Wayland
#[derive(Parser, Debug)]
#[command(name = "imagefloat")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Image to open at startup (can also be piped via stdin)
    #[arg(value_name = "IMAGE")]
    pub image_path: Option<PathBuf>,

    /// Initial image opacity (0.2 - 1.0)
    #[arg(short, long, default_value_t = DEFAULT_OPACITY, value_parser = parse_opacity)]
    pub opacity: f32,

    /// Start below other windows instead of floating on top
    #[arg(long)]
    pub no_top: bool,

    /// Initial window width
    #[arg(long, value_parser = parse_size)]
    pub width: Option<u32>,

    /// Initial window height
    #[arg(long, value_parser = parse_size)]
    pub height: Option<u32>,

    /// How pinch and ctrl+scroll zoom combine across gestures
    #[arg(long, value_enum, default_value_t = GestureMode::Absolute)]
    pub gesture_mode: GestureMode,

    /// Disable GPU rendering and use CPU rendering only
    #[arg(long, default_value = "false")]
    pub cpu: bool,
}

/// Parsed arguments with resolved image source
#[derive(Debug)]
pub struct ParsedArgs {
    pub image_path: Option<PathBuf>,
    pub image_data: Option<Vec<u8>>,
    pub opacity: f32,
    pub always_on_top: bool,
    pub size: (Option<u32>, Option<u32>),
    pub gesture_mode: GestureMode,
    /// Use GPU rendering (default true, set to false with --cpu)
    pub use_gpu: bool,
}

fn parse_opacity(s: &str) -> Result<f32, String> {
    let opacity: f32 = s.parse().map_err(|_| "Invalid opacity value")?;
    if !(MIN_OPACITY..=MAX_OPACITY).contains(&opacity) {
        return Err(format!(
            "Opacity must be between {} and {}",
            MIN_OPACITY, MAX_OPACITY
        ));
    }
    Ok(opacity)
}

fn parse_size(s: &str) -> Result<u32, String> {
    let size: u32 = s.parse().map_err(|_| "Invalid size")?;
    if !(MIN_SIZE..=MAX_SIZE).contains(&size) {
        return Err(format!("Size must be between {} and {}", MIN_SIZE, MAX_SIZE));
    }
    Ok(size)
}

/// Check if stdin has data available (is a pipe)
fn stdin_has_data() -> bool {
    !atty::is(atty::Stream::Stdin)
}

fn read_stdin() -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    io::stdin().read_to_end(&mut buffer)?;
    Ok(buffer)
}

impl Args {
    fn into_parsed(self, image_data: Option<Vec<u8>>) -> ParsedArgs {
        ParsedArgs {
            image_path: self.image_path,
            image_data,
            opacity: self.opacity,
            always_on_top: !self.no_top,
            size: (self.width, self.height),
            gesture_mode: self.gesture_mode,
            use_gpu: !self.cpu, // GPU is default, --cpu disables it
        }
    }
}

/// Parse command line arguments and handle stdin input.
/// Starting without an image is allowed; the window shows a placeholder.
pub fn parse_args() -> Result<ParsedArgs> {
    let args = Args::parse();

    // A path on the command line wins over a pipe
    let image_data = if args.image_path.is_none() && stdin_has_data() {
        let data = read_stdin()?;
        if data.is_empty() {
            bail!("No data received from stdin");
        }
        Some(data)
    } else {
        None
    };

    Ok(args.into_parsed(image_data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_float_on_top() {
        let parsed = Args::try_parse_from(["imagefloat"]).unwrap().into_parsed(None);
        assert!(parsed.always_on_top);
        assert!(parsed.use_gpu);
        assert_eq!(parsed.opacity, DEFAULT_OPACITY);
        assert_eq!(parsed.gesture_mode, GestureMode::Absolute);
        assert_eq!(parsed.size, (None, None));
    }

    #[test]
    fn parses_all_flags() {
        let parsed = Args::try_parse_from([
            "imagefloat",
            "cat.png",
            "--opacity",
            "0.5",
            "--no-top",
            "--width",
            "640",
            "--height",
            "480",
            "--gesture-mode",
            "accumulate",
            "--cpu",
        ])
        .unwrap()
        .into_parsed(None);
        assert_eq!(parsed.image_path, Some(PathBuf::from("cat.png")));
        assert_eq!(parsed.opacity, 0.5);
        assert!(!parsed.always_on_top);
        assert_eq!(parsed.size, (Some(640), Some(480)));
        assert_eq!(parsed.gesture_mode, GestureMode::Accumulate);
        assert!(!parsed.use_gpu);
    }

    #[test]
    fn rejects_out_of_range_values() {
        assert!(Args::try_parse_from(["imagefloat", "--opacity", "0.1"]).is_err());
        assert!(Args::try_parse_from(["imagefloat", "--opacity", "abc"]).is_err());
        assert!(Args::try_parse_from(["imagefloat", "--width", "100"]).is_err());
        assert!(Args::try_parse_from(["imagefloat", "--height", "5000"]).is_err());
    }
}
