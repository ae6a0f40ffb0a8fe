//! Best-effort capture metadata from embedded EXIF tags.
//!
//! Reads the GPS block (altitude, GPS date/time, coordinates) and the
//! `DateTimeOriginal` tag from any container `kamadak-exif` understands.
//! Missing or unreadable metadata is normal for many uploads and never
//! produces an error: the affected fields are simply left empty.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::OnceLock;

use exif::{Context, Exif, Field, In, Tag, Value};
use regex::Regex;
use tracing::{debug, info};

use crate::models::CaptureMetadata;

/// Read whatever capture metadata `path` carries.
pub fn extract(path: &Path) -> CaptureMetadata {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "cannot open file for metadata");
            return CaptureMetadata::default();
        }
    };
    let mut reader = BufReader::new(file);
    match exif::Reader::new().read_from_container(&mut reader) {
        Ok(exif) => extract_from_exif(&exif, &path.display().to_string()),
        Err(e) => {
            debug!(path = %path.display(), error = %e, "no EXIF metadata");
            CaptureMetadata::default()
        }
    }
}

/// Map parsed EXIF fields onto [`CaptureMetadata`].
///
/// `label` only identifies the file in log lines.
pub fn extract_from_exif(exif: &Exif, label: &str) -> CaptureMetadata {
    let mut meta = CaptureMetadata::default();
    let has_gps_block = exif.fields().any(|f| f.tag.context() == Context::Gps);

    let mut raw_capture = None;
    if has_gps_block {
        meta.altitude = exif
            .get_field(Tag::GPSAltitude, In::PRIMARY)
            .map(|f| f.display_value().with_unit(exif).to_string());
        meta.altitude_ref = exif
            .get_field(Tag::GPSAltitudeRef, In::PRIMARY)
            .map(|f| f.display_value().to_string());
        raw_capture = gps_date_time(exif);
    } else {
        info!(file = label, "No GPS data found");
    }

    if raw_capture.is_none() {
        raw_capture = exif
            .fields()
            .find(|f| f.tag == Tag::DateTimeOriginal)
            .and_then(ascii_value);
    }
    meta.capture_timestamp = raw_capture.map(|s| normalize_capture_time(&s));

    match geolocation(exif) {
        Some(((lat, lat_ref), (lon, lon_ref))) => {
            meta.latitude = Some(lat.to_string());
            meta.latitude_ref = Some(lat_ref);
            meta.longitude = Some(lon.to_string());
            meta.longitude_ref = Some(lon_ref);
        }
        None => {
            meta.subject_location = exif
                .fields()
                .find(|f| f.tag == Tag::SubjectLocation)
                .map(subject_location_text);
            if has_gps_block {
                info!(file = label, "No GPS coordinates found");
            }
        }
    }

    meta
}

/// Rewrite `YYYY:MM:DD HH:MM:SS` into `YYYY-MM-DD HH:MM:SS`.
///
/// Only strings with at least four colons are considered EXIF-style
/// timestamps; anything else is returned unchanged.
pub fn normalize_capture_time(raw: &str) -> String {
    static EXIF_DATE: OnceLock<Regex> = OnceLock::new();
    if raw.matches(':').count() < 4 {
        return raw.to_string();
    }
    let re = EXIF_DATE.get_or_init(|| {
        Regex::new(r"(\d{4}):(\d{2}):(\d{2}) (\d{2}:\d{2}:\d{2})").expect("valid regex")
    });
    re.replace_all(raw, "$1-$2-$3 $4").into_owned()
}

/// `GPSDateStamp` + `GPSTimeStamp` as `YYYY:MM:DD HH:MM:SS`.
fn gps_date_time(exif: &Exif) -> Option<String> {
    let date = exif
        .get_field(Tag::GPSDateStamp, In::PRIMARY)
        .and_then(ascii_value)?;
    let time = exif.get_field(Tag::GPSTimeStamp, In::PRIMARY)?;
    let Value::Rational(ref parts) = time.value else {
        return None;
    };
    if parts.len() != 3 || parts.iter().any(|r| r.denom == 0) {
        return None;
    }
    Some(format!(
        "{} {:02}:{:02}:{:02}",
        date,
        parts[0].to_f64() as u32,
        parts[1].to_f64() as u32,
        parts[2].to_f64() as u32
    ))
}

/// Signed decimal latitude and longitude with their reference letters.
fn geolocation(exif: &Exif) -> Option<((f64, String), (f64, String))> {
    let lat = coordinate(exif, Tag::GPSLatitude, Tag::GPSLatitudeRef, 'S')?;
    let lon = coordinate(exif, Tag::GPSLongitude, Tag::GPSLongitudeRef, 'W')?;
    Some((lat, lon))
}

fn coordinate(exif: &Exif, tag: Tag, ref_tag: Tag, negative: char) -> Option<(f64, String)> {
    let field = exif.get_field(tag, In::PRIMARY)?;
    let reference = exif.get_field(ref_tag, In::PRIMARY).and_then(ascii_value)?;
    let Value::Rational(ref dms) = field.value else {
        return None;
    };
    if dms.len() != 3 || dms.iter().any(|r| r.denom == 0) {
        return None;
    }
    let decimal = dms[0].to_f64() + dms[1].to_f64() / 60.0 + dms[2].to_f64() / 3600.0;
    if !decimal.is_finite() {
        return None;
    }
    let signed = if reference.starts_with(negative) {
        -decimal
    } else {
        decimal
    };
    Some((signed, reference))
}

/// First ASCII string of a field, without padding.
fn ascii_value(field: &Field) -> Option<String> {
    match field.value {
        Value::Ascii(ref strings) => strings
            .first()
            .map(|s| String::from_utf8_lossy(s).trim_matches(|c| c == '\0' || c == ' ').to_string())
            .filter(|s| !s.is_empty()),
        _ => None,
    }
}

fn subject_location_text(field: &Field) -> String {
    match field.value {
        Value::Short(ref coords) => coords
            .iter()
            .map(|c| c.to_string())
            .collect::<Vec<_>>()
            .join(", "),
        _ => field.display_value().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BYTE: u16 = 1;
    const ASCII: u16 = 2;
    const SHORT: u16 = 3;
    const LONG: u16 = 4;
    const RATIONAL: u16 = 5;

    /// Tag, type, count and little-endian value bytes of one IFD entry.
    struct Entry(u16, u16, u32, Vec<u8>);

    fn ascii(tag: u16, text: &str) -> Entry {
        let mut bytes = text.as_bytes().to_vec();
        bytes.push(0);
        Entry(tag, ASCII, bytes.len() as u32, bytes)
    }

    fn byte(tag: u16, value: u8) -> Entry {
        Entry(tag, BYTE, 1, vec![value])
    }

    fn shorts(tag: u16, values: &[u16]) -> Entry {
        let bytes = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        Entry(tag, SHORT, values.len() as u32, bytes)
    }

    fn long(tag: u16, value: u32) -> Entry {
        Entry(tag, LONG, 1, value.to_le_bytes().to_vec())
    }

    fn rationals(tag: u16, values: &[(u32, u32)]) -> Entry {
        let bytes = values
            .iter()
            .flat_map(|(num, denom)| num.to_le_bytes().into_iter().chain(denom.to_le_bytes()))
            .collect();
        Entry(tag, RATIONAL, values.len() as u32, bytes)
    }

    /// An IFD placed at `offset`. Values wider than four bytes follow the
    /// entry table, padded to even offsets.
    fn ifd(entries: &[Entry], offset: u32) -> Vec<u8> {
        let data_start = offset + 2 + 12 * entries.len() as u32 + 4;
        let mut table = (entries.len() as u16).to_le_bytes().to_vec();
        let mut data = Vec::new();
        for Entry(tag, typ, count, value) in entries {
            table.extend_from_slice(&tag.to_le_bytes());
            table.extend_from_slice(&typ.to_le_bytes());
            table.extend_from_slice(&count.to_le_bytes());
            if value.len() <= 4 {
                let mut inline = value.clone();
                inline.resize(4, 0);
                table.extend_from_slice(&inline);
            } else {
                let at = data_start + data.len() as u32;
                table.extend_from_slice(&at.to_le_bytes());
                data.extend_from_slice(value);
                if data.len() % 2 == 1 {
                    data.push(0);
                }
            }
        }
        table.extend_from_slice(&0u32.to_le_bytes());
        table.extend(data);
        table
    }

    /// Little-endian TIFF whose IFD0 points at an Exif IFD and a GPS IFD.
    fn tiff(exif_entries: &[Entry], gps_entries: &[Entry]) -> Vec<u8> {
        let exif_offset = 8 + 2 + 12 * 2 + 4;
        let exif_ifd = ifd(exif_entries, exif_offset);
        let gps_offset = exif_offset + exif_ifd.len() as u32;

        let mut out = b"II".to_vec();
        out.extend_from_slice(&42u16.to_le_bytes());
        out.extend_from_slice(&8u32.to_le_bytes());
        out.extend(ifd(
            &[long(0x8769, exif_offset), long(0x8825, gps_offset)],
            8,
        ));
        out.extend(exif_ifd);
        out.extend(ifd(gps_entries, gps_offset));
        out
    }

    fn tiff_with_gps(include_coordinates: bool) -> Vec<u8> {
        let mut gps = Vec::new();
        if include_coordinates {
            gps.push(ascii(0x0001, "N"));
            gps.push(rationals(0x0002, &[(37, 1), (46, 1), (30, 1)]));
            gps.push(ascii(0x0003, "W"));
            gps.push(rationals(0x0004, &[(122, 1), (25, 1), (12, 1)]));
        }
        gps.push(byte(0x0005, 0));
        gps.push(rationals(0x0006, &[(1205, 10)]));
        tiff(&[ascii(0x9003, "2024:05:01 12:00:00")], &gps)
    }

    #[test]
    fn test_normalize_exif_timestamp() {
        assert_eq!(
            normalize_capture_time("2024:05:01 12:00:00"),
            "2024-05-01 12:00:00"
        );
    }

    #[test]
    fn test_normalize_leaves_short_strings() {
        assert_eq!(normalize_capture_time("12:00:00"), "12:00:00");
        assert_eq!(normalize_capture_time("2024-05-01 12:00:00"), "2024-05-01 12:00:00");
    }

    #[test]
    fn test_normalize_non_matching_with_colons_unchanged() {
        assert_eq!(normalize_capture_time("a:b:c:d:e"), "a:b:c:d:e");
    }

    #[test]
    fn test_extract_gps_block() {
        let exif = exif::Reader::new().read_raw(tiff_with_gps(true)).unwrap();
        let meta = extract_from_exif(&exif, "test");

        assert_eq!(meta.capture_timestamp.as_deref(), Some("2024-05-01 12:00:00"));
        let lat: f64 = meta.latitude.as_deref().unwrap().parse().unwrap();
        let lon: f64 = meta.longitude.as_deref().unwrap().parse().unwrap();
        assert!((lat - 37.775).abs() < 1e-9);
        assert!((lon + 122.42).abs() < 1e-9);
        assert_eq!(meta.latitude_ref.as_deref(), Some("N"));
        assert_eq!(meta.longitude_ref.as_deref(), Some("W"));
        assert!(meta.altitude.as_deref().unwrap().starts_with("120.5"));
        assert!(meta.subject_location.is_none());
    }

    #[test]
    fn test_extract_without_coordinates_keeps_going() {
        let exif = exif::Reader::new().read_raw(tiff_with_gps(false)).unwrap();
        let meta = extract_from_exif(&exif, "test");

        assert!(meta.latitude.is_none());
        assert!(meta.longitude.is_none());
        assert!(meta.altitude.is_some());
        assert_eq!(meta.capture_timestamp.as_deref(), Some("2024-05-01 12:00:00"));
    }

    #[test]
    fn test_gps_timestamp_preferred_over_date_time_original() {
        let raw = tiff(
            &[ascii(0x9003, "2024:05:01 12:00:00")],
            &[
                byte(0x0005, 1),
                rationals(0x0006, &[(25, 1)]),
                rationals(0x0007, &[(14, 1), (3, 1), (9, 1)]),
                ascii(0x001D, "2023:01:02"),
            ],
        );
        let exif = exif::Reader::new().read_raw(raw).unwrap();
        let meta = extract_from_exif(&exif, "test");

        assert_eq!(meta.capture_timestamp.as_deref(), Some("2023-01-02 14:03:09"));
        assert_eq!(meta.altitude.as_deref(), Some("25 meters below sea level"));
        assert!(meta.altitude_ref.as_deref().unwrap().contains("below"));
        assert!(meta.latitude.is_none());
    }

    #[test]
    fn test_subject_location_used_without_coordinates() {
        let raw = tiff(
            &[
                ascii(0x9003, "2024:05:01 12:00:00"),
                shorts(0xA214, &[100, 200]),
            ],
            &[byte(0x0005, 0), rationals(0x0006, &[(1205, 10)])],
        );
        let exif = exif::Reader::new().read_raw(raw).unwrap();
        let meta = extract_from_exif(&exif, "test");

        assert!(meta.latitude.is_none());
        assert!(meta.longitude_ref.is_none());
        assert_eq!(meta.subject_location.as_deref(), Some("100, 200"));
        assert_eq!(meta.capture_timestamp.as_deref(), Some("2024-05-01 12:00:00"));
    }

    #[test]
    fn test_extract_from_plain_file_is_empty() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, b"no metadata here").unwrap();
        assert_eq!(extract(&path), CaptureMetadata::default());
    }

    #[test]
    fn test_extract_missing_file_is_empty() {
        let dir = tempfile::TempDir::new().unwrap();
        assert_eq!(
            extract(&dir.path().join("gone.jpg")),
            CaptureMetadata::default()
        );
    }
}
