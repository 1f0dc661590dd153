// Image loading module
// Decodes image files into BGRA buffers ready for display

use crate::error::{LoadError, LoadResult};
use image::{DynamicImage, ImageFormat};
use log::debug;
use std::fs;
use std::path::Path;

/// Extensions offered by the file picker
pub const IMAGE_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "webp", "bmp", "ico", "tif", "tiff",
];

/// Decoded image data ready for display
#[derive(Debug, Clone)]
pub struct ImageData {
    /// Image width in pixels
    pub width: u32,
    /// Image height in pixels
    pub height: u32,
    /// Raw BGRA pixel data (4 bytes per pixel, Wayland ARGB8888 byte order)
    pub bgra_data: Vec<u8>,
    /// Mipmap levels for faster downscaling (progressively half-sized versions)
    pub mipmaps: Vec<MipmapLevel>,
}

/// A single mipmap level
#[derive(Debug, Clone)]
pub struct MipmapLevel {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl ImageData {
    /// Pick the smallest level that still has at least `scale_ratio` of the
    /// full resolution, so sampling never magnifies a mipmap.
    pub fn level_for_scale(&self, scale_ratio: f64) -> (u32, u32, &[u8]) {
        let mut best = (self.width, self.height, &self.bgra_data[..]);
        if scale_ratio >= 0.5 {
            return best;
        }
        for mipmap in &self.mipmaps {
            let mip_scale = mipmap.width as f64 / self.width as f64;
            if mip_scale < scale_ratio {
                break;
            }
            best = (mipmap.width, mipmap.height, &mipmap.data[..]);
        }
        best
    }
}

/// Load an image file from disk
pub fn load_path(path: &Path) -> LoadResult<ImageData> {
    let io_err = |source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    };

    let data = fs::read(path).map_err(io_err)?;
    debug!("Read {} ({} bytes)", path.display(), data.len());

    let hint = path
        .extension()
        .and_then(|ext| ext.to_str())
        .and_then(format_from_extension);
    decode(&data, hint)
}

/// Load an image from raw bytes, auto-detecting the format
pub fn load_bytes(data: &[u8]) -> LoadResult<ImageData> {
    decode(data, None)
}

/// Sniff the format from the content; the extension hint only helps when
/// the content has no recognisable signature
fn decode(data: &[u8], hint: Option<ImageFormat>) -> LoadResult<ImageData> {
    if data.is_empty() {
        return Err(LoadError::Empty);
    }

    let format = match (image::guess_format(data), hint) {
        (Ok(format), _) => format,
        (Err(_), Some(format)) => format,
        (Err(e), None) => return Err(LoadError::UnknownFormat(e)),
    };
    let img = image::load_from_memory_with_format(data, format)?;

    Ok(from_dynamic(img))
}

/// Convert a decoded image into display order and build its mipmap chain
pub fn from_dynamic(img: DynamicImage) -> ImageData {
    let rgba = img.to_rgba8();
    let (width, height) = rgba.dimensions();

    // Wayland expects ARGB8888, which is BGRA in little-endian memory
    let mut bgra_data = rgba.into_raw();
    for pixel in bgra_data.chunks_exact_mut(4) {
        pixel.swap(0, 2);
    }

    let mipmaps = generate_mipmaps(width, height, &bgra_data);

    ImageData {
        width,
        height,
        bgra_data,
        mipmaps,
    }
}

/// Generate mipmap levels (progressively half-sized versions)
fn generate_mipmaps(width: u32, height: u32, data: &[u8]) -> Vec<MipmapLevel> {
    let mut mipmaps: Vec<MipmapLevel> = Vec::new();
    let mut current_width = width;
    let mut current_height = height;

    // Up to 8 levels, stopping before either side drops under 32px
    while current_width > 64 && current_height > 64 && mipmaps.len() < 8 {
        let next_width = current_width / 2;
        let next_height = current_height / 2;

        let source = mipmaps.last().map_or(data, |level| &level.data[..]);
        let mut next_data = vec![0u8; (next_width * next_height * 4) as usize];

        for y in 0..next_height {
            for x in 0..next_width {
                let mut sum = [0u32; 4];
                for dy in 0..2 {
                    for dx in 0..2 {
                        let sx = (x * 2 + dx).min(current_width - 1);
                        let sy = (y * 2 + dy).min(current_height - 1);
                        let idx = ((sy * current_width + sx) * 4) as usize;
                        for (c, total) in sum.iter_mut().enumerate() {
                            *total += source[idx + c] as u32;
                        }
                    }
                }

                let dst_idx = ((y * next_width + x) * 4) as usize;
                for (c, total) in sum.iter().enumerate() {
                    next_data[dst_idx + c] = (total / 4) as u8;
                }
            }
        }

        mipmaps.push(MipmapLevel {
            width: next_width,
            height: next_height,
            data: next_data,
        });

        current_width = next_width;
        current_height = next_height;
    }

    mipmaps
}

/// Get the image format from a file extension
pub fn format_from_extension(ext: &str) -> Option<ImageFormat> {
    match ext.to_lowercase().as_str() {
        "png" => Some(ImageFormat::Png),
        "jpg" | "jpeg" => Some(ImageFormat::Jpeg),
        "gif" => Some(ImageFormat::Gif),
        "webp" => Some(ImageFormat::WebP),
        "bmp" => Some(ImageFormat::Bmp),
        "ico" => Some(ImageFormat::Ico),
        "tiff" | "tif" => Some(ImageFormat::Tiff),
        _ => None,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    /// Write a solid-colour PNG and return its bytes
    pub(crate) fn png_bytes(width: u32, height: u32, color: [u8; 4]) -> Vec<u8> {
        let img = RgbaImage::from_pixel(width, height, Rgba(color));
        let mut bytes = Vec::new();
        DynamicImage::ImageRgba8(img)
            .write_to(&mut std::io::Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes
    }

    #[test]
    fn decodes_png_into_bgra_order() {
        let data = load_bytes(&png_bytes(3, 2, [10, 20, 30, 255])).unwrap();
        assert_eq!((data.width, data.height), (3, 2));
        assert_eq!(&data.bgra_data[..4], &[30, 20, 10, 255]);
        assert!(data.mipmaps.is_empty());
    }

    #[test]
    fn rejects_text_and_empty_input() {
        assert!(matches!(
            load_bytes(b"just some notes"),
            Err(LoadError::UnknownFormat(_))
        ));
        assert!(matches!(load_bytes(&[]), Err(LoadError::Empty)));
    }

    #[test]
    fn load_path_reads_file_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pixel.png");
        std::fs::write(&path, png_bytes(4, 4, [0, 0, 255, 128])).unwrap();

        let data = load_path(&path).unwrap();
        assert_eq!(data.width, 4);
        assert_eq!(&data.bgra_data[..4], &[255, 0, 0, 128]);
    }

    #[test]
    fn load_path_reports_missing_and_empty_files() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.png");
        assert!(matches!(load_path(&missing), Err(LoadError::Io { .. })));

        let empty = dir.path().join("empty.png");
        std::fs::write(&empty, b"").unwrap();
        assert!(matches!(load_path(&empty), Err(LoadError::Empty)));
    }

    #[test]
    fn mipmaps_halve_until_small() {
        let data = load_bytes(&png_bytes(256, 128, [1, 2, 3, 4])).unwrap();
        let sizes: Vec<_> = data.mipmaps.iter().map(|m| (m.width, m.height)).collect();
        assert_eq!(sizes, vec![(128, 64)]);
        // Averaging a flat colour keeps the colour
        assert_eq!(&data.mipmaps[0].data[..4], &[3, 2, 1, 4]);
    }

    #[test]
    fn level_for_scale_never_undersamples() {
        let data = load_bytes(&png_bytes(512, 512, [9, 9, 9, 255])).unwrap();
        assert_eq!(data.level_for_scale(1.0).0, 512);
        assert_eq!(data.level_for_scale(0.3).0, 256);
        assert_eq!(data.level_for_scale(0.2).0, 128);
    }

    #[test]
    fn picker_extensions_all_have_formats() {
        for ext in IMAGE_EXTENSIONS {
            assert!(format_from_extension(ext).is_some(), "{ext}");
        }
        assert_eq!(format_from_extension("JPG"), Some(ImageFormat::Jpeg));
        assert_eq!(format_from_extension("txt"), None);
    }

    #[test]
    fn text_with_image_extension_fails_to_decode() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fake.png");
        std::fs::write(&path, "not a png").unwrap();
        assert!(matches!(load_path(&path), Err(LoadError::Decode(_))));
    }

    #[test]
    fn truncated_file_is_a_decode_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cut.png");
        let full = png_bytes(64, 64, [7, 7, 7, 255]);
        std::fs::write(&path, &full[..full.len() / 2]).unwrap();
        assert!(matches!(load_path(&path), Err(LoadError::Decode(_))));
    }
}
