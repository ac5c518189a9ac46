//! The four [`MetadataSource`] implementations.
//!
//! | Backend | Reads | XMP | Notes |
//! |---------|-------|-----|-------|
//! | [`ExifToolBackend`] | everything ExifTool knows | yes | optional binary, bounded timeout |
//! | [`ImageLibraryBackend`] | decoder header + primary IFD | three-tier lookup | dimensions from the decoder |
//! | [`TagReaderBackend`] | kamadak-exif fields | no | thumbnail IFD excluded |
//! | [`IfdSectionsBackend`] | named IFD sections | TIFF `XMLPacket` only | static tag tables |

use image::{ImageDecoder, ImageReader};
use serde_json::{Map, Value};
use std::fs::File;
use std::io::{BufReader, Cursor};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::ResolverConfig;
use crate::container::{self, EXIF_SIGNATURE};
use crate::exiftool::{self, ExifToolCommand, ExifToolError};
use crate::metadata::{BackendError, BackendKind, MetadataSource, RawMetadataMap, GPS_KEY, XMP_KEY};
use crate::tiff::{self, Ifd, IfdSections};
use crate::xmp;

/// Build the backend for `kind` from runtime configuration.
pub fn build(kind: BackendKind, config: &ResolverConfig) -> Box<dyn MetadataSource> {
    match kind {
        BackendKind::ExifTool => Box::new(ExifToolBackend::new(
            config.exiftool_path.clone(),
            config.probe_timeout(),
            config.extraction_timeout(),
        )),
        BackendKind::ImageLibrary => Box::new(ImageLibraryBackend),
        BackendKind::TagReader => Box::new(TagReaderBackend),
        BackendKind::IfdSections => Box::new(IfdSectionsBackend),
    }
}

fn finish(mut map: RawMetadataMap) -> Result<RawMetadataMap, BackendError> {
    map.prune_empty();
    if map.is_empty() {
        Err(BackendError::Empty)
    } else {
        Ok(map)
    }
}

fn read_file(path: &Path) -> Result<Vec<u8>, BackendError> {
    std::fs::read(path).map_err(|e| BackendError::Failed(format!("{}: {}", path.display(), e)))
}

// ============================================================================
// ExifTool Backend
// ============================================================================

/// Group names (`-G1`) whose tags land in the flat map, highest priority first.
const EXIFTOOL_FLAT_GROUPS: &[&str] = &[
    "IFD0", "ExifIFD", "EXIF", "SubIFD", "File", "Composite", "MakerNotes", "DJI", "JFIF",
];

/// Tags of the thumbnail directory and bookkeeping entries are never kept.
const EXIFTOOL_SKIPPED_GROUPS: &[&str] = &["IFD1", "ExifTool", "System"];

pub struct ExifToolBackend {
    program: PathBuf,
    probe_timeout: Duration,
    extraction_timeout: Duration,
    version: OnceLock<Option<String>>,
}

impl ExifToolBackend {
    pub fn new(program: PathBuf, probe_timeout: Duration, extraction_timeout: Duration) -> Self {
        Self {
            program,
            probe_timeout,
            extraction_timeout,
            version: OnceLock::new(),
        }
    }

    /// Installed ExifTool version, probed once per backend instance.
    pub fn version(&self) -> Option<&str> {
        self.version
            .get_or_init(|| exiftool::probe_version(&self.program, self.probe_timeout))
            .as_deref()
    }
}

impl MetadataSource for ExifToolBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::ExifTool
    }

    fn extract(&self, path: &Path) -> Result<RawMetadataMap, BackendError> {
        let Some(version) = self.version() else {
            return Err(BackendError::Unavailable(format!(
                "{} not found or not responding",
                self.program.display()
            )));
        };
        debug!("Using ExifTool {} for {}", version, path.display());

        let output = ExifToolCommand::new(&self.program)
            .args(&["-j", "-n", "-G1"])
            .input(path)
            .timeout(self.extraction_timeout)
            .execute()
            .map_err(|e| match e {
                ExifToolError::NotInstalled(msg) => BackendError::Unavailable(msg),
                ExifToolError::Timeout(d) => BackendError::Timeout(d),
                other => BackendError::Failed(other.to_string()),
            })?;

        let parsed: Vec<Map<String, Value>> = serde_json::from_slice(&output.stdout)
            .map_err(|e| BackendError::Failed(format!("JSON parse error: {}", e)))?;
        let record = parsed.into_iter().next().ok_or(BackendError::Empty)?;

        finish(route_exiftool_record(record))
    }
}

/// Split one `-G1` JSON record into flat, `"XMP"` and `"GPS"` maps.
///
/// `XMP-*` groups go to the XMP map and `GPS` to the GPS map, both keyed by
/// bare tag name. Flat keys are taken group by group in priority order, so
/// `IFD0:Model` beats `MakerNotes:Model`; groups outside the accepted list are
/// dropped.
pub fn route_exiftool_record(record: Map<String, Value>) -> RawMetadataMap {
    let mut map = RawMetadataMap::new();
    let mut by_group: Vec<(String, String, Value)> = Vec::new();

    for (qualified, value) in record {
        let Some((group, tag)) = qualified.split_once(':') else {
            continue; // SourceFile
        };
        if EXIFTOOL_SKIPPED_GROUPS.contains(&group) {
            continue;
        }
        if group.starts_with("XMP") {
            map.sub_map_mut(XMP_KEY)
                .entry(tag.to_string())
                .or_insert(value);
        } else if group == "GPS" {
            map.sub_map_mut(GPS_KEY)
                .entry(tag.to_string())
                .or_insert(value);
        } else {
            by_group.push((group.to_string(), tag.to_string(), value));
        }
    }

    for wanted in EXIFTOOL_FLAT_GROUPS {
        for (group, tag, value) in by_group.iter().filter(|(g, _, _)| g.as_str() == *wanted) {
            if map.insert_if_absent(tag.clone(), value.clone()) {
                debug!("exiftool {}:{}", group, tag);
            }
        }
    }

    map
}

// ============================================================================
// Image Library Backend
// ============================================================================

/// Decoder header dimensions plus primary-IFD tags and the XMP packet.
pub struct ImageLibraryBackend;

impl MetadataSource for ImageLibraryBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::ImageLibrary
    }

    fn extract(&self, path: &Path) -> Result<RawMetadataMap, BackendError> {
        let bytes = read_file(path)?;
        let mut map = RawMetadataMap::new();

        let (dimensions, decoder_exif) = match read_header(&bytes) {
            Ok(header) => header,
            Err(e) => {
                debug!("image decoder unavailable for {}: {}", path.display(), e);
                (None, None)
            }
        };

        if let Some(raw) = decoder_exif.or_else(|| container::exif_payload(&bytes)) {
            match exif::Reader::new().read_raw(raw) {
                Ok(exif) => {
                    for field in exif.fields().filter(|f| f.ifd_num == exif::In::PRIMARY) {
                        insert_exif_field(&mut map, field);
                    }
                }
                Err(e) => debug!("primary IFD unreadable in {}: {}", path.display(), e),
            }
        }

        match xmp::locate_packet(&bytes) {
            Some((source, packet)) => {
                let properties = xmp::parse_packet(&packet);
                debug!("XMP packet via {:?}: {} properties", source, properties.len());
                if !properties.is_empty() {
                    map.insert(XMP_KEY, Value::Object(properties));
                }
            }
            None => debug!("no XMP packet in {}", path.display()),
        }

        // Decoder dimensions overwrite whatever the tag directory claims.
        if let Some((width, height)) = dimensions {
            map.insert("ImageWidth", Value::from(width));
            map.insert("ImageHeight", Value::from(height));
        }

        finish(map)
    }
}

fn read_header(bytes: &[u8]) -> image::ImageResult<(Option<(u32, u32)>, Option<Vec<u8>>)> {
    let mut decoder = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()?
        .into_decoder()?;
    let dimensions = decoder.dimensions();
    let exif = decoder.exif_metadata().ok().flatten().map(|mut raw| {
        if raw.starts_with(EXIF_SIGNATURE) {
            raw.drain(..EXIF_SIGNATURE.len());
        }
        raw
    });
    Ok((Some(dimensions), exif))
}

/// Width and height from the image header, never from an embedded thumbnail.
pub fn decoded_dimensions(path: &Path) -> Option<(u32, u32)> {
    let reader = match ImageReader::open(path).and_then(|r| r.with_guessed_format()) {
        Ok(reader) => reader,
        Err(e) => {
            warn!("Cannot open {}: {}", path.display(), e);
            return None;
        }
    };
    match reader.into_dimensions() {
        Ok(dims) => Some(dims),
        Err(e) => {
            debug!("Header decode failed for {}: {}", path.display(), e);
            None
        }
    }
}

// ============================================================================
// Tag Reader Backend
// ============================================================================

/// kamadak-exif field walk over the whole container.
pub struct TagReaderBackend;

impl MetadataSource for TagReaderBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::TagReader
    }

    fn extract(&self, path: &Path) -> Result<RawMetadataMap, BackendError> {
        let file = File::open(path).map_err(|e| BackendError::Failed(format!("{}: {}", path.display(), e)))?;
        let mut reader = BufReader::new(file);

        let mut exif_reader = exif::Reader::new();
        exif_reader.continue_on_error(true);
        let exif = match exif_reader.read_from_container(&mut reader) {
            Ok(exif) => exif,
            Err(exif::Error::PartialResult(partial)) => {
                let (exif, errors) = partial.into_inner();
                debug!("{} EXIF errors ignored in {}", errors.len(), path.display());
                exif
            }
            Err(exif::Error::NotFound(_)) => return Err(BackendError::Empty),
            Err(e) => return Err(BackendError::Failed(format!("EXIF parse error: {}", e))),
        };

        let mut map = RawMetadataMap::new();
        for field in exif.fields() {
            // IFD1 repeats ImageWidth/ImageLength with thumbnail sizes
            if field.ifd_num != exif::In::PRIMARY {
                continue;
            }
            insert_exif_field(&mut map, field);
        }

        finish(map)
    }
}

fn insert_exif_field(map: &mut RawMetadataMap, field: &exif::Field) {
    use exif::Tag;

    if matches!(
        field.tag,
        Tag::ExifIFDPointer | Tag::GPSInfoIFDPointer | Tag::InteropIFDPointer | Tag::MakerNote
    ) {
        return;
    }

    let name = kamadak_tag_name(field.tag);
    let value = exif_value_json(&field.value);
    if field.tag.context() == exif::Context::Gps {
        map.sub_map_mut(GPS_KEY).entry(name).or_insert(value);
    } else {
        map.insert_if_absent(name, value);
    }
}

/// Symbolic tag name, or a `0xNNNN` identifier for tags kamadak-exif cannot name.
fn kamadak_tag_name(tag: exif::Tag) -> String {
    if tag.description().is_some() {
        tag.to_string()
    } else {
        format!("0x{:04X}", tag.number())
    }
}

fn collapse(mut items: Vec<Value>) -> Value {
    if items.len() == 1 {
        items.remove(0)
    } else {
        Value::Array(items)
    }
}

fn ratio(num: f64, den: f64) -> Value {
    if den == 0.0 {
        Value::Null
    } else {
        Value::from(num / den)
    }
}

/// Convert a kamadak-exif value to JSON, collapsing single-element vectors.
pub fn exif_value_json(value: &exif::Value) -> Value {
    use exif::Value as V;

    match value {
        V::Ascii(parts) => {
            let text = parts
                .iter()
                .map(|p| String::from_utf8_lossy(p).trim_end_matches('\0').to_string())
                .collect::<Vec<_>>()
                .join(" ");
            Value::String(text.trim().to_string())
        }
        V::Byte(v) => collapse(v.iter().map(|n| Value::from(*n)).collect()),
        V::Short(v) => collapse(v.iter().map(|n| Value::from(*n)).collect()),
        V::Long(v) => collapse(v.iter().map(|n| Value::from(*n)).collect()),
        V::SByte(v) => collapse(v.iter().map(|n| Value::from(*n)).collect()),
        V::SShort(v) => collapse(v.iter().map(|n| Value::from(*n)).collect()),
        V::SLong(v) => collapse(v.iter().map(|n| Value::from(*n)).collect()),
        V::Float(v) => collapse(v.iter().map(|n| Value::from(*n as f64)).collect()),
        V::Double(v) => collapse(v.iter().map(|n| Value::from(*n)).collect()),
        V::Rational(v) => collapse(v.iter().map(|r| ratio(r.num as f64, r.denom as f64)).collect()),
        V::SRational(v) => collapse(v.iter().map(|r| ratio(r.num as f64, r.denom as f64)).collect()),
        V::Undefined(bytes, _) => {
            Value::String(String::from_utf8_lossy(bytes).trim_end_matches('\0').to_string())
        }
        #[allow(unreachable_patterns)]
        _ => Value::Null,
    }
}

// ============================================================================
// IFD Sections Backend
// ============================================================================

/// Named-section loader (`0th`, `Exif`, `GPS`, `1st`) with static tag tables.
pub struct IfdSectionsBackend;

/// Section entries that are pointers or opaque blobs rather than metadata.
const SECTION_SKIPPED_TAGS: &[u16] = &[
    tiff::TAG_EXIF_IFD,
    tiff::TAG_GPS_IFD,
    tiff::TAG_INTEROP_IFD,
    tiff::TAG_XML_PACKET,
    0x927C, // MakerNote
];

impl MetadataSource for IfdSectionsBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::IfdSections
    }

    fn extract(&self, path: &Path) -> Result<RawMetadataMap, BackendError> {
        let bytes = read_file(path)?;
        let payload = container::exif_payload(&bytes).ok_or(BackendError::Empty)?;
        let sections = IfdSections::parse(&payload).map_err(BackendError::Failed)?;

        let mut map = RawMetadataMap::new();
        // "1st" is the thumbnail directory and is deliberately absent here
        for name in ["0th", "Exif"] {
            if let Some(ifd) = sections.section(name) {
                flatten_section(ifd, tiff::tiff_tag_name, |key, value| {
                    map.insert_if_absent(key, value);
                });
            }
        }
        if let Some(gps) = sections.section("GPS") {
            let target = map.sub_map_mut(GPS_KEY);
            flatten_section(gps, tiff::gps_tag_name, |key, value| {
                target.entry(key).or_insert(value);
            });
        }

        if let Some(packet) = sections
            .primary
            .get(&tiff::TAG_XML_PACKET)
            .and_then(|v| v.as_bytes())
        {
            let properties = xmp::parse_packet(packet);
            if !properties.is_empty() {
                map.insert(XMP_KEY, Value::Object(properties));
            }
        }

        finish(map)
    }
}

fn flatten_section(
    ifd: &Ifd,
    names: fn(u16) -> Option<&'static str>,
    mut sink: impl FnMut(String, Value),
) {
    for (tag, value) in ifd {
        if SECTION_SKIPPED_TAGS.contains(tag) {
            continue;
        }
        let key = names(*tag)
            .map(str::to_string)
            .unwrap_or_else(|| format!("0x{:04X}", tag));
        sink(key, value.to_json());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(m) => m,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_exiftool_routing() {
        let map = route_exiftool_record(record(json!({
            "SourceFile": "DJI_0001.JPG",
            "ExifTool:ExifToolVersion": 12.76,
            "MakerNotes:Model": "maker",
            "IFD0:Make": "DJI",
            "IFD0:Model": "FC6310",
            "IFD1:ImageWidth": 160,
            "ExifIFD:FocalLength": 8.8,
            "File:ImageWidth": 5472,
            "XMP-drone-dji:RelativeAltitude": "+85.20",
            "XMP-drone-dji:GimbalPitchDegree": -72.0,
            "GPS:GPSLatitude": 47.37,
            "GPS:GPSLatitudeRef": "N",
            "ICC_Profile:ProfileVersion": 528
        })));

        assert_eq!(map.get("Model"), Some(&json!("FC6310")));
        assert_eq!(map.get("Make"), Some(&json!("DJI")));
        assert_eq!(map.get("FocalLength"), Some(&json!(8.8)));
        assert_eq!(map.get("ImageWidth"), Some(&json!(5472)));
        assert!(!map.contains_key("SourceFile"));
        assert!(!map.contains_key("ExifToolVersion"));
        assert!(!map.contains_key("ProfileVersion"));

        let xmp = map.xmp().unwrap();
        assert_eq!(xmp.get("RelativeAltitude"), Some(&json!("+85.20")));
        assert_eq!(xmp.get("GimbalPitchDegree"), Some(&json!(-72.0)));
        assert_eq!(map.gps().unwrap().get("GPSLatitudeRef"), Some(&json!("N")));
    }

    #[test]
    fn test_exiftool_missing_binary_is_unavailable() {
        let backend = ExifToolBackend::new(
            PathBuf::from("/nonexistent/exiftool-binary"),
            Duration::from_secs(1),
            Duration::from_secs(1),
        );
        assert!(backend.version().is_none());
        let err = backend.extract(Path::new("whatever.jpg")).unwrap_err();
        assert!(matches!(err, BackendError::Unavailable(_)));
    }

    #[test]
    fn test_kamadak_values_to_json() {
        use exif::{Rational, Value as V};

        assert_eq!(exif_value_json(&V::Ascii(vec![b"FC6310\0".to_vec()])), json!("FC6310"));
        assert_eq!(exif_value_json(&V::Short(vec![5472])), json!(5472));
        assert_eq!(
            exif_value_json(&V::Rational(vec![Rational { num: 88, denom: 10 }])),
            json!(8.8)
        );
        assert_eq!(
            exif_value_json(&V::Rational(vec![Rational { num: 1, denom: 0 }])),
            Value::Null
        );
        assert_eq!(exif_value_json(&V::Byte(vec![2, 3, 0, 0])), json!([2, 3, 0, 0]));
    }

    #[test]
    fn test_unknown_tags_get_numeric_names() {
        assert_eq!(kamadak_tag_name(exif::Tag::Model), "Model");
        assert_eq!(kamadak_tag_name(exif::Tag(exif::Context::Tiff, 0xC7FF)), "0xC7FF");
    }

    #[test]
    fn test_missing_file_fails_every_in_process_backend() {
        let path = Path::new("/nonexistent/DJI_0001.JPG");
        assert!(ImageLibraryBackend.extract(path).is_err());
        assert!(TagReaderBackend.extract(path).is_err());
        assert!(IfdSectionsBackend.extract(path).is_err());
        assert_eq!(decoded_dimensions(path), None);
    }

    #[test]
    fn test_file_without_metadata_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, b"plain text, no image here").unwrap();

        assert_eq!(IfdSectionsBackend.extract(&path).unwrap_err(), BackendError::Empty);
        assert!(ImageLibraryBackend.extract(&path).is_err());
    }
}
