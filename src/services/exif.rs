use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::process::Command;
use std::sync::OnceLock;

use chrono::{DateTime, NaiveDateTime, Utc};
use exif::{In, Tag, Value};
use thiserror::Error;
use tracing::{debug, warn};

/// Canonical metadata extracted from an uploaded image. Closed record:
/// unknown EXIF tags are dropped, never carried along as a loose map.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PhotoMetadata {
    pub shot_at: Option<DateTime<Utc>>,
    pub gps: Option<(f64, f64)>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub camera_make: Option<String>,
    pub camera_model: Option<String>,
}

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
}

/// Extract metadata from an image file. Missing or unparsable EXIF is not an
/// error: the photo simply keeps null fields and later lands in the group's
/// default meeting. Only an unreadable file is reported as a failure.
///
/// JPEG/PNG/TIFF are read in-process. HEIC/HEIF carry their metadata in a
/// container the `exif` crate does not parse, so they go through the external
/// `exiftool` binary when it is on PATH (see [`heic_capable`]); without it
/// HEIC photos are accepted with null metadata.
pub fn extract_metadata(path: &Path, mime: &str) -> Result<PhotoMetadata, ExtractError> {
    let mut metadata = PhotoMetadata::default();

    if let Ok(reader) = image::ImageReader::open(path) {
        if let Ok((w, h)) = reader.into_dimensions() {
            metadata.width = Some(w);
            metadata.height = Some(h);
        }
    }

    if matches!(mime, "image/heic" | "image/heif") {
        extract_via_exiftool(path, &mut metadata);
        return Ok(metadata);
    }

    let file = File::open(path).map_err(|source| ExtractError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let mut reader = BufReader::new(file);

    let exif = match exif::Reader::new().read_from_container(&mut reader) {
        Ok(exif) => exif,
        Err(e) => {
            debug!("no EXIF in {}: {}", path.display(), e);
            return Ok(metadata);
        }
    };

    metadata.shot_at = ascii_field(&exif, Tag::DateTimeOriginal)
        .or_else(|| ascii_field(&exif, Tag::DateTimeDigitized))
        .and_then(|raw| parse_exif_datetime(&raw));

    metadata.camera_make = ascii_field(&exif, Tag::Make);
    metadata.camera_model = ascii_field(&exif, Tag::Model);

    let lat = dms_field(&exif, Tag::GPSLatitude, Tag::GPSLatitudeRef, "S");
    let lon = dms_field(&exif, Tag::GPSLongitude, Tag::GPSLongitudeRef, "W");
    if let (Some(lat), Some(lon)) = (lat, lon) {
        metadata.gps = validate_gps(lat, lon);
    }

    Ok(metadata)
}

/// Whether HEIC metadata extraction is available on this host.
pub fn heic_capable() -> bool {
    static AVAILABLE: OnceLock<bool> = OnceLock::new();
    *AVAILABLE.get_or_init(|| {
        let ok = Command::new("exiftool")
            .arg("-ver")
            .output()
            .map(|out| out.status.success())
            .unwrap_or(false);
        if !ok {
            warn!("exiftool not found on PATH, HEIC metadata extraction disabled");
        }
        ok
    })
}

fn extract_via_exiftool(path: &Path, metadata: &mut PhotoMetadata) {
    if !heic_capable() {
        return;
    }

    let output = match Command::new("exiftool").arg("-j").arg("-n").arg(path).output() {
        Ok(out) if out.status.success() => out,
        Ok(out) => {
            warn!(
                "exiftool failed for {}: {}",
                path.display(),
                String::from_utf8_lossy(&out.stderr).trim()
            );
            return;
        }
        Err(e) => {
            warn!("exiftool invocation failed for {}: {}", path.display(), e);
            return;
        }
    };

    let parsed: Vec<serde_json::Value> = match serde_json::from_slice(&output.stdout) {
        Ok(parsed) => parsed,
        Err(e) => {
            warn!("unparsable exiftool output for {}: {}", path.display(), e);
            return;
        }
    };
    let Some(data) = parsed.first() else {
        return;
    };

    metadata.shot_at = ["DateTimeOriginal", "CreateDate", "DateCreated"]
        .iter()
        .find_map(|key| data.get(*key).and_then(|v| v.as_str()))
        .and_then(parse_exif_datetime);

    metadata.camera_make = data
        .get("Make")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string());
    metadata.camera_model = data
        .get("Model")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string());

    // -n makes exiftool emit signed decimal degrees directly.
    let lat = data.get("GPSLatitude").and_then(|v| v.as_f64());
    let lon = data.get("GPSLongitude").and_then(|v| v.as_f64());
    if let (Some(lat), Some(lon)) = (lat, lon) {
        metadata.gps = validate_gps(lat, lon);
    }

    if metadata.width.is_none() {
        metadata.width = data
            .get("ImageWidth")
            .and_then(|v| v.as_u64())
            .map(|w| w as u32);
        metadata.height = data
            .get("ImageHeight")
            .and_then(|v| v.as_u64())
            .map(|h| h as u32);
    }
}

fn ascii_field(exif: &exif::Exif, tag: Tag) -> Option<String> {
    let field = exif.get_field(tag, In::PRIMARY)?;
    if let Value::Ascii(ref v) = field.value {
        let raw = v.first()?;
        let text = String::from_utf8_lossy(raw).trim().to_string();
        if text.is_empty() {
            return None;
        }
        return Some(text);
    }
    None
}

/// EXIF stores `YYYY:MM:DD HH:MM:SS` with no zone; values are read as UTC.
/// exiftool output may append a zone offset, which is ignored the same way.
pub fn parse_exif_datetime(raw: impl AsRef<str>) -> Option<DateTime<Utc>> {
    let raw = raw.as_ref().trim();
    let head = raw.get(0..19)?;
    NaiveDateTime::parse_from_str(head, "%Y:%m:%d %H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}

fn dms_field(exif: &exif::Exif, tag: Tag, ref_tag: Tag, negative_ref: &str) -> Option<f64> {
    let field = exif.get_field(tag, In::PRIMARY)?;
    let Value::Rational(ref parts) = field.value else {
        return None;
    };
    if parts.len() < 3 || parts.iter().take(3).any(|r| r.denom == 0) {
        return None;
    }

    let degrees = parts[0].to_f64();
    let minutes = parts[1].to_f64();
    let seconds = parts[2].to_f64();
    let decimal = dms_to_decimal(degrees, minutes, seconds);

    let reference = exif
        .get_field(ref_tag, In::PRIMARY)
        .map(|f| f.display_value().to_string())
        .unwrap_or_default();
    if reference.contains(negative_ref) {
        Some(-decimal)
    } else {
        Some(decimal)
    }
}

pub fn dms_to_decimal(degrees: f64, minutes: f64, seconds: f64) -> f64 {
    degrees + minutes / 60.0 + seconds / 3600.0
}

/// Coordinates outside the valid range (or NaN) are dropped and treated as
/// no GPS; the warning keeps the dropped value visible in the logs.
pub fn validate_gps(lat: f64, lon: f64) -> Option<(f64, f64)> {
    if lat.is_nan() || lon.is_nan() || lat.abs() > 90.0 || lon.abs() > 180.0 {
        warn!("dropping invalid GPS coordinates ({}, {})", lat, lon);
        return None;
    }
    Some((lat, lon))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;
    use tempfile::TempDir;

    #[test]
    fn parses_exif_datetime_format() {
        let parsed = parse_exif_datetime("2024:06:10 10:04:30").unwrap();
        assert_eq!(parsed.to_rfc3339(), "2024-06-10T10:04:30+00:00");
    }

    #[test]
    fn parses_exiftool_datetime_with_offset() {
        let parsed = parse_exif_datetime("2024:06:10 15:00:00+09:00").unwrap();
        assert_eq!(parsed.hour(), 15);
    }

    #[test]
    fn rejects_garbage_datetime() {
        assert!(parse_exif_datetime("not a date").is_none());
        assert!(parse_exif_datetime("2024-06-10").is_none());
        assert!(parse_exif_datetime("").is_none());
    }

    #[test]
    fn converts_dms_to_decimal_degrees() {
        let decimal = dms_to_decimal(37.0, 33.0, 58.92);
        assert!((decimal - 37.56637).abs() < 1e-4);
    }

    #[test]
    fn drops_out_of_range_coordinates() {
        assert_eq!(validate_gps(91.0, 0.0), None);
        assert_eq!(validate_gps(0.0, 181.0), None);
        assert_eq!(validate_gps(f64::NAN, 0.0), None);
        assert_eq!(validate_gps(-90.0, 180.0), Some((-90.0, 180.0)));
    }

    #[test]
    fn plain_png_yields_dimensions_and_null_metadata() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("plain.png");
        image::RgbImage::new(320, 240).save(&path).unwrap();

        let metadata = extract_metadata(&path, "image/png").unwrap();
        assert_eq!(metadata.width, Some(320));
        assert_eq!(metadata.height, Some(240));
        assert_eq!(metadata.shot_at, None);
        assert_eq!(metadata.gps, None);
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("gone.jpg");
        assert!(extract_metadata(&path, "image/jpeg").is_err());
    }
}
