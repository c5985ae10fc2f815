//! CLI command implementations

pub mod backends;
pub mod denoise;

use anyhow::{Context, Result, anyhow};
use std::path::Path;
use wmprobe_gpu::Image;

/// Load image from path as RGBA8
pub fn load_image(path: &Path) -> Result<Image> {
    let decoded = image::open(path)
        .with_context(|| format!("Failed to load: {}", path.display()))?
        .to_rgba8();
    let (width, height) = decoded.dimensions();
    Image::from_rgba8(width, height, decoded.into_raw())
        .with_context(|| format!("Unusable image: {}", path.display()))
}

/// Save image to path (format from extension)
pub fn save_image(path: &Path, image: &Image) -> Result<()> {
    let (width, height) = image.dimensions();
    let buffer = image::RgbaImage::from_raw(width, height, image.data().to_vec())
        .ok_or_else(|| anyhow!("pixel buffer does not match {width}x{height}"))?;
    buffer
        .save(path)
        .with_context(|| format!("Failed to save: {}", path.display()))
}

/// Format file size for display
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_png_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("img.png");
        let mut img = Image::filled(5, 3, [10, 20, 30, 128]).unwrap();
        img.put_pixel(4, 2, [255, 0, 0, 255]);

        save_image(&path, &img).unwrap();
        assert_eq!(load_image(&path).unwrap(), img);
    }

    #[test]
    fn test_missing_file_has_context() {
        let err = load_image(Path::new("/nonexistent/wmprobe.png")).unwrap_err();
        assert!(err.to_string().contains("Failed to load"));
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(2048), "2.00 KB");
        assert_eq!(format_size(3 * 1024 * 1024), "3.00 MB");
    }
}
