use std::fs::File;
use std::io::{BufReader, Cursor};
use std::path::Path;

use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, RgbImage};
use thiserror::Error;
use tracing::debug;

const JPEG_QUALITY: u8 = 85;

#[derive(Debug, Error)]
pub enum ThumbError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("image decode failed: {0}")]
    Decode(#[from] image::ImageError),
}

/// Produce a JPEG preview that fits within `max_edge` on both sides.
///
/// Aspect ratio is preserved, EXIF orientation is applied, alpha is
/// flattened onto white, and images already inside the box are re-encoded
/// without scaling. Returns the encoded bytes; the caller hands them to
/// Storage so placement stays in one spot.
pub fn make_thumbnail(path: &Path, max_edge: u32) -> Result<Vec<u8>, ThumbError> {
    let reader = image::ImageReader::open(path)
        .map_err(|source| ThumbError::Io {
            path: path.display().to_string(),
            source,
        })?
        .with_guessed_format()
        .map_err(|source| ThumbError::Io {
            path: path.display().to_string(),
            source,
        })?;
    let mut img = reader.decode()?;

    if let Some(orientation) = read_orientation(path) {
        img = apply_orientation(img, orientation);
    }

    if img.width() > max_edge || img.height() > max_edge {
        img = img.thumbnail(max_edge, max_edge);
    }

    let rgb = flatten_to_rgb(img);
    let mut buffer = Cursor::new(Vec::new());
    let encoder = JpegEncoder::new_with_quality(&mut buffer, JPEG_QUALITY);
    rgb.write_with_encoder(encoder)?;
    Ok(buffer.into_inner())
}

fn read_orientation(path: &Path) -> Option<u16> {
    let file = File::open(path).ok()?;
    let mut reader = BufReader::new(file);
    let exif = exif::Reader::new().read_from_container(&mut reader).ok()?;
    let field = exif.get_field(exif::Tag::Orientation, exif::In::PRIMARY)?;
    match field.value {
        exif::Value::Short(ref v) => v.first().copied(),
        _ => None,
    }
}

fn apply_orientation(img: DynamicImage, orientation: u16) -> DynamicImage {
    match orientation {
        2 => img.fliph(),
        3 => img.rotate180(),
        4 => img.flipv(),
        5 => img.rotate90().fliph(),
        6 => img.rotate90(),
        7 => img.rotate270().fliph(),
        8 => img.rotate270(),
        other => {
            if other != 1 {
                debug!("unknown EXIF orientation {}, leaving image as-is", other);
            }
            img
        }
    }
}

/// JPEG has no alpha channel; composite transparent images onto white the
/// way the upstream viewers expect.
fn flatten_to_rgb(img: DynamicImage) -> RgbImage {
    match img {
        DynamicImage::ImageRgb8(rgb) => rgb,
        other if other.color().has_alpha() => {
            let rgba = other.to_rgba8();
            let mut flat = RgbImage::from_pixel(rgba.width(), rgba.height(), image::Rgb([255, 255, 255]));
            for (x, y, pixel) in rgba.enumerate_pixels() {
                let alpha = pixel[3] as u32;
                let background = flat.get_pixel_mut(x, y);
                for channel in 0..3 {
                    let fg = pixel[channel] as u32;
                    let bg = background[channel] as u32;
                    background[channel] = ((fg * alpha + bg * (255 - alpha)) / 255) as u8;
                }
            }
            flat
        }
        other => other.to_rgb8(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_png(dir: &TempDir, name: &str, width: u32, height: u32) -> std::path::PathBuf {
        let path = dir.path().join(name);
        image::RgbImage::from_pixel(width, height, image::Rgb([10, 120, 200]))
            .save(&path)
            .unwrap();
        path
    }

    fn decode(bytes: &[u8]) -> DynamicImage {
        image::load_from_memory(bytes).unwrap()
    }

    #[test]
    fn bounds_large_image_preserving_aspect() {
        let dir = TempDir::new().unwrap();
        let path = write_png(&dir, "wide.png", 1024, 512);

        let bytes = make_thumbnail(&path, 512).unwrap();
        let thumb = decode(&bytes);
        assert_eq!((thumb.width(), thumb.height()), (512, 256));
    }

    #[test]
    fn never_upscales_small_images() {
        let dir = TempDir::new().unwrap();
        let path = write_png(&dir, "small.png", 100, 80);

        let bytes = make_thumbnail(&path, 512).unwrap();
        let thumb = decode(&bytes);
        assert_eq!((thumb.width(), thumb.height()), (100, 80));
    }

    #[test]
    fn output_is_jpeg() {
        let dir = TempDir::new().unwrap();
        let path = write_png(&dir, "any.png", 64, 64);

        let bytes = make_thumbnail(&path, 512).unwrap();
        assert_eq!(image::guess_format(&bytes).unwrap(), image::ImageFormat::Jpeg);
    }

    #[test]
    fn transparent_pixels_land_on_white() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("alpha.png");
        image::RgbaImage::from_pixel(32, 32, image::Rgba([0, 0, 0, 0]))
            .save(&path)
            .unwrap();

        let bytes = make_thumbnail(&path, 512).unwrap();
        let thumb = decode(&bytes).to_rgb8();
        let pixel = thumb.get_pixel(16, 16);
        // JPEG is lossy; fully transparent input must come out near-white.
        assert!(pixel[0] > 240 && pixel[1] > 240 && pixel[2] > 240);
    }

    #[test]
    fn missing_file_errors() {
        let dir = TempDir::new().unwrap();
        assert!(make_thumbnail(&dir.path().join("nope.png"), 512).is_err());
    }
}
