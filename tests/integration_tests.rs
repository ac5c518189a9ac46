//! Integration tests for the calibration pipeline on synthetic drone JPEGs
//!
//! Every fixture is a real JPEG encoded by `image`, with a hand-assembled EXIF
//! APP1 segment (IFD0, Exif IFD, GPS IFD and a thumbnail IFD1) and an optional
//! XMP APP1 segment spliced in after SOI. ExifTool is disabled throughout.

use drone_gsd::backends::{ImageLibraryBackend, IfdSectionsBackend, TagReaderBackend};
use drone_gsd::calibration::DowngradeReason;
use drone_gsd::diagnostics::{FieldStatus, Stage};
use drone_gsd::distance::TierFailure;
use drone_gsd::gsd::compute_gsd;
use drone_gsd::metadata::{BackendKind, MetadataSource};
use drone_gsd::{
    calibrate_batch, calibrate_image, CalibError, ConfidenceLevel, Diagnostics, DistanceTier,
    ExtractionOrchestrator, MandatoryField, ResolverConfig, TargetLocation,
};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use serde_json::json;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

// ============================================================================
// Fixture builders
// ============================================================================

#[derive(Clone)]
struct Entry {
    tag: u16,
    kind: u16,
    count: u32,
    data: Vec<u8>,
}

fn ascii(tag: u16, s: &str) -> Entry {
    let mut data = s.as_bytes().to_vec();
    data.push(0);
    Entry { tag, kind: 2, count: data.len() as u32, data }
}

fn short(tag: u16, v: u16) -> Entry {
    Entry { tag, kind: 3, count: 1, data: v.to_le_bytes().to_vec() }
}

fn long(tag: u16, v: u32) -> Entry {
    Entry { tag, kind: 4, count: 1, data: v.to_le_bytes().to_vec() }
}

fn byte(tag: u16, v: u8) -> Entry {
    Entry { tag, kind: 1, count: 1, data: vec![v] }
}

fn rationals(tag: u16, values: &[(u32, u32)]) -> Entry {
    let data = values
        .iter()
        .flat_map(|(n, d)| n.to_le_bytes().into_iter().chain(d.to_le_bytes()))
        .collect();
    Entry { tag, kind: 5, count: values.len() as u32, data }
}

fn block_size(entries: &[Entry]) -> usize {
    let external: usize = entries
        .iter()
        .filter(|e| e.data.len() > 4)
        .map(|e| e.data.len() + e.data.len() % 2)
        .sum();
    2 + 12 * entries.len() + 4 + external
}

fn write_block(out: &mut Vec<u8>, entries: &[Entry], start: usize, next: u32) {
    let mut data_offset = start + 2 + 12 * entries.len() + 4;
    let mut external = Vec::new();

    out.extend_from_slice(&(entries.len() as u16).to_le_bytes());
    for e in entries {
        out.extend_from_slice(&e.tag.to_le_bytes());
        out.extend_from_slice(&e.kind.to_le_bytes());
        out.extend_from_slice(&e.count.to_le_bytes());
        if e.data.len() <= 4 {
            let mut inline = e.data.clone();
            inline.resize(4, 0);
            out.extend_from_slice(&inline);
        } else {
            out.extend_from_slice(&(data_offset as u32).to_le_bytes());
            external.extend_from_slice(&e.data);
            if e.data.len() % 2 == 1 {
                external.push(0);
            }
            data_offset += e.data.len() + e.data.len() % 2;
        }
    }
    out.extend_from_slice(&next.to_le_bytes());
    out.extend_from_slice(&external);
}

/// Little-endian TIFF with IFD0 -> {Exif, GPS} and IFD0 -> IFD1 chain.
fn tiff_payload(mut ifd0: Vec<Entry>, exif: Vec<Entry>, gps: Vec<Entry>, ifd1: Vec<Entry>) -> Vec<u8> {
    if !exif.is_empty() {
        ifd0.push(long(0x8769, 0));
    }
    if !gps.is_empty() {
        ifd0.push(long(0x8825, 0));
    }
    ifd0.sort_by_key(|e| e.tag);

    let ifd0_offset = 8;
    let exif_offset = ifd0_offset + block_size(&ifd0);
    let gps_offset = exif_offset + if exif.is_empty() { 0 } else { block_size(&exif) };
    let ifd1_offset = gps_offset + if gps.is_empty() { 0 } else { block_size(&gps) };

    for e in ifd0.iter_mut() {
        match e.tag {
            0x8769 => e.data = (exif_offset as u32).to_le_bytes().to_vec(),
            0x8825 => e.data = (gps_offset as u32).to_le_bytes().to_vec(),
            _ => {}
        }
    }

    let mut out = b"II".to_vec();
    out.extend_from_slice(&42u16.to_le_bytes());
    out.extend_from_slice(&(ifd0_offset as u32).to_le_bytes());

    let next = if ifd1.is_empty() { 0 } else { ifd1_offset as u32 };
    write_block(&mut out, &ifd0, ifd0_offset, next);
    if !exif.is_empty() {
        write_block(&mut out, &exif, exif_offset, 0);
    }
    if !gps.is_empty() {
        write_block(&mut out, &gps, gps_offset, 0);
    }
    if !ifd1.is_empty() {
        write_block(&mut out, &ifd1, ifd1_offset, 0);
    }
    out
}

fn app1(payload: &[u8]) -> Vec<u8> {
    let mut segment = vec![0xFF, 0xE1];
    segment.extend_from_slice(&((payload.len() + 2) as u16).to_be_bytes());
    segment.extend_from_slice(payload);
    segment
}

fn dji_xmp(attributes: &str) -> String {
    format!(
        r#"<?xpacket begin="" id="W5M0MpCehiHzreSzNTczkc9d"?>
<x:xmpmeta xmlns:x="adobe:ns:meta/">
 <rdf:RDF xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#">
  <rdf:Description rdf:about="DJI Meta Data"
    xmlns:drone-dji="http://www.dji.com/drone-dji/1.0/"
    {attributes}/>
 </rdf:RDF>
</x:xmpmeta>
<?xpacket end="w"?>"#
    )
}

/// Encode a 64x48 JPEG and splice EXIF/XMP segments in after SOI.
fn write_jpeg(dir: &Path, name: &str, exif: Option<Vec<u8>>, xmp: Option<String>) -> PathBuf {
    let img = RgbImage::from_pixel(64, 48, Rgb([90, 120, 60]));
    let mut encoded = Vec::new();
    DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut encoded), ImageFormat::Jpeg)
        .unwrap();
    assert_eq!(&encoded[..2], &[0xFF, 0xD8]);

    let mut bytes = encoded[..2].to_vec();
    if let Some(tiff) = exif {
        let mut payload = b"Exif\0\0".to_vec();
        payload.extend_from_slice(&tiff);
        bytes.extend_from_slice(&app1(&payload));
    }
    if let Some(packet) = xmp {
        let mut payload = b"http://ns.adobe.com/xap/1.0/\0".to_vec();
        payload.extend_from_slice(packet.as_bytes());
        bytes.extend_from_slice(&app1(&payload));
    }
    bytes.extend_from_slice(&encoded[2..]);

    let path = dir.join(name);
    std::fs::write(&path, bytes).unwrap();
    path
}

fn gps_block(lat: u32, lon: u32, altitude_m: u32) -> Vec<Entry> {
    vec![
        ascii(0x0001, "N"),
        rationals(0x0002, &[(lat, 1), (0, 1), (0, 1)]),
        ascii(0x0003, "E"),
        rationals(0x0004, &[(lon, 1), (0, 1), (0, 1)]),
        byte(0x0005, 0),
        rationals(0x0006, &[(altitude_m, 1)]),
    ]
}

/// Phantom 4 Pro style EXIF: model only, no optics, a 160x120 thumbnail IFD.
fn phantom_exif(gps: Vec<Entry>) -> Vec<u8> {
    tiff_payload(
        vec![
            short(0x0100, 5472),
            short(0x0101, 3648),
            ascii(0x010F, "DJI"),
            ascii(0x0110, "FC6310"),
        ],
        vec![ascii(0x9003, "2023:05:01 10:15:30")],
        gps,
        vec![short(0x0100, 160), short(0x0101, 120)],
    )
}

fn no_exiftool() -> ResolverConfig {
    ResolverConfig::default().without_exiftool()
}

// ============================================================================
// Backends
// ============================================================================

#[test]
fn test_thumbnail_ifd_never_overrides_primary_width() {
    let dir = TempDir::new().unwrap();
    let path = write_jpeg(dir.path(), "thumb.jpg", Some(phantom_exif(Vec::new())), None);

    let tags = TagReaderBackend.extract(&path).unwrap();
    assert_eq!(tags.get("ImageWidth"), Some(&json!(5472)));
    assert_eq!(tags.get("Model"), Some(&json!("FC6310")));

    let sections = IfdSectionsBackend.extract(&path).unwrap();
    assert_eq!(sections.get("ImageWidth"), Some(&json!(5472)));
    assert_eq!(sections.get("ImageLength"), Some(&json!(3648)));
    assert_eq!(sections.get("DateTimeOriginal"), Some(&json!("2023:05:01 10:15:30")));
}

#[test]
fn test_image_library_uses_decoder_dimensions_and_reads_xmp() {
    let dir = TempDir::new().unwrap();
    let xmp = dji_xmp(r#"drone-dji:RelativeAltitude="+85.20" drone-dji:GimbalPitchDegree="-72.00""#);
    let path = write_jpeg(dir.path(), "lib.jpg", Some(phantom_exif(Vec::new())), Some(xmp));

    let map = ImageLibraryBackend.extract(&path).unwrap();
    assert_eq!(map.get("ImageWidth"), Some(&json!(64)));
    assert_eq!(map.get("ImageHeight"), Some(&json!(48)));
    assert_eq!(map.get("Model"), Some(&json!("FC6310")));

    let xmp = map.xmp().unwrap();
    assert_eq!(xmp.get("RelativeAltitude"), Some(&json!("+85.20")));
    assert_eq!(xmp.get("GimbalPitchDegree"), Some(&json!("-72.00")));
}

#[test]
fn test_backends_agree_on_gps_block() {
    let dir = TempDir::new().unwrap();
    let path = write_jpeg(dir.path(), "gps.jpg", Some(phantom_exif(gps_block(47, 8, 450))), None);

    for backend in [
        Box::new(ImageLibraryBackend) as Box<dyn MetadataSource>,
        Box::new(TagReaderBackend),
        Box::new(IfdSectionsBackend),
    ] {
        let map = backend.extract(&path).unwrap();
        let gps = map.gps().unwrap_or_else(|| panic!("{} lost GPS", backend.kind()));
        assert_eq!(gps.get("GPSLatitudeRef"), Some(&json!("N")), "{}", backend.kind());
        assert_eq!(gps.get("GPSAltitude"), Some(&json!(450.0)), "{}", backend.kind());
        assert!(!map.contains_key("GPSLatitude"), "{}", backend.kind());
    }
}

// ============================================================================
// Orchestrator
// ============================================================================

#[test]
fn test_supplement_adds_xmp_without_touching_primary() {
    let dir = TempDir::new().unwrap();
    let xmp = dji_xmp(r#"drone-dji:RelativeAltitude="+85.20""#);
    let path = write_jpeg(dir.path(), "supp.jpg", Some(phantom_exif(gps_block(47, 8, 450))), Some(xmp));

    let config = ResolverConfig {
        backends: vec![BackendKind::TagReader],
        ..no_exiftool()
    };
    let orchestrator = ExtractionOrchestrator::from_config(&config);
    let mut diag = Diagnostics::new();
    let extracted = orchestrator.extract(&path, &mut diag).unwrap();

    assert_eq!(extracted.primary, BackendKind::TagReader);
    assert!(extracted.supplemented_keys.contains(&"XMP".to_string()));
    assert!(!extracted.supplemented_keys.contains(&"GPS".to_string()));
    assert!(!extracted.supplemented_keys.contains(&"ImageWidth".to_string()));
    assert_eq!(extracted.source_tag(), "tag_reader+image_library");
    // Thumbnail-free primary width survives even though the supplement decodes 64 px
    assert_eq!(extracted.map.get("ImageWidth"), Some(&json!(5472)));
    assert_eq!(extracted.map.xmp().unwrap().get("RelativeAltitude"), Some(&json!("+85.20")));
    assert!(diag
        .with_status(FieldStatus::Substituted)
        .any(|e| e.stage == Stage::Extraction && e.field == "XMP"));
}

#[test]
fn test_no_backend_succeeds() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("garbage.jpg");
    std::fs::write(&path, b"\x00\x01definitely not a jpeg").unwrap();

    let orchestrator = ExtractionOrchestrator::from_config(&no_exiftool());
    match orchestrator.extract(&path, &mut Diagnostics::new()) {
        Err(CalibError::NoMetadata { attempts }) => assert_eq!(attempts.len(), 3),
        other => panic!("unexpected: {other:?}"),
    }
}

// ============================================================================
// Full pipeline
// ============================================================================

#[test]
fn test_phantom_with_database_fill_and_tier2() {
    let dir = TempDir::new().unwrap();
    let xmp = dji_xmp(r#"drone-dji:RelativeAltitude="+85.20" drone-dji:GimbalPitchDegree="-72.00""#);
    let path = write_jpeg(dir.path(), "DJI_0001.JPG", Some(phantom_exif(Vec::new())), Some(xmp));

    let report = calibrate_image(&path, None, &no_exiftool()).unwrap();
    let record = &report.record;

    assert_eq!(record.camera_model(), Some("FC6310"));
    assert_eq!(record.focal_length_mm(), 8.8);
    assert_eq!(record.sensor_width_mm(), 13.2);
    assert_eq!((record.pixel_width(), record.pixel_height()), (64, 48));
    assert_eq!(report.confidence, ConfidenceLevel::Medium);
    assert_eq!(record.confidence_reasons(), &[DowngradeReason::DatabaseFallback]);
    assert!(record.data_source().ends_with("+database"));
    assert!(record.telemetry().captured_at.is_some());

    assert_eq!(report.distance.tier(), Some(DistanceTier::AltitudePitch));
    let distance = report.distance_m().unwrap();
    assert!((distance - 85.2 / 72f64.to_radians().tan()).abs() < 1e-9);

    let expected = compute_gsd(distance, 13.2, 8.8, 64).unwrap();
    assert!((report.gsd_cm_per_px().unwrap() - expected).abs() < 1e-12);
}

#[test]
fn test_tier1_with_target_location() {
    let dir = TempDir::new().unwrap();
    let xmp = dji_xmp(
        r#"drone-dji:AbsoluteAltitude="+450.00" drone-dji:RelativeAltitude="+50.00" drone-dji:GimbalPitchDegree="-10.00""#,
    );
    let path = write_jpeg(dir.path(), "tower.jpg", Some(phantom_exif(gps_block(47, 8, 449))), Some(xmp));

    let target = TargetLocation { latitude: 47.0, longitude: 8.001, base_altitude_m: 400.0 };
    let report = calibrate_image(&path, Some(&target), &no_exiftool()).unwrap();

    let telemetry = report.record.telemetry();
    assert_eq!(telemetry.latitude, Some(47.0));
    assert_eq!(telemetry.longitude, Some(8.0));
    assert_eq!(report.distance.tier(), Some(DistanceTier::Geodesic));

    let estimate = report.distance.estimate.unwrap();
    assert!((estimate.vertical_m.unwrap() - 50.0).abs() < 1e-9);
    assert!(estimate.aim_height_m.is_some());
    assert!(report.distance_m().unwrap() < estimate.horizontal_m.unwrap().hypot(50.0));
}

#[test]
fn test_zero_zero_gps_is_rejected_and_tier1_skipped() {
    let dir = TempDir::new().unwrap();
    let xmp = dji_xmp(r#"drone-dji:RelativeAltitude="+92.50""#);
    let path = write_jpeg(dir.path(), "null_island.jpg", Some(phantom_exif(gps_block(0, 0, 0))), Some(xmp));

    let target = TargetLocation { latitude: 47.0, longitude: 8.001, base_altitude_m: 400.0 };
    let report = calibrate_image(&path, Some(&target), &no_exiftool()).unwrap();

    assert_eq!(report.record.telemetry().latitude, None);
    assert!(report
        .diagnostics
        .with_status(FieldStatus::Rejected)
        .any(|e| e.field == "position"));

    assert_eq!(
        report.distance.attempts[0].failure,
        Some(TierFailure::MissingInput("drone latitude"))
    );
    assert_eq!(report.distance.tier(), Some(DistanceTier::FixedAngle));
    assert_eq!(report.distance_m(), Some(92.5));
    assert_eq!(report.confidence, ConfidenceLevel::Medium);
    assert!(report.record.data_source().ends_with("+database+fixed_angle"));
    assert!(report
        .record
        .confidence_reasons()
        .contains(&DowngradeReason::FixedAngleAssumption));
}

#[test]
fn test_unknown_camera_lists_missing_fields() {
    let dir = TempDir::new().unwrap();
    let exif = tiff_payload(vec![ascii(0x010F, "Acme"), ascii(0x0110, "SurveyCam 9000")], Vec::new(), Vec::new(), Vec::new());
    let path = write_jpeg(dir.path(), "acme.jpg", Some(exif), None);

    match calibrate_image(&path, None, &no_exiftool()) {
        Err(CalibError::MissingFields(fields)) => assert_eq!(
            fields,
            vec![MandatoryField::FocalLength, MandatoryField::SensorWidth, MandatoryField::SensorHeight]
        ),
        other => panic!("unexpected: {other:?}"),
    }
}

#[test]
fn test_no_distance_still_yields_record() {
    let dir = TempDir::new().unwrap();
    let path = write_jpeg(dir.path(), "ground.jpg", Some(phantom_exif(Vec::new())), None);

    let report = calibrate_image(&path, None, &no_exiftool()).unwrap();
    assert_eq!(report.distance.estimate, None);
    assert_eq!(report.gsd_cm_per_px(), None);
    assert_eq!(report.confidence, ConfidenceLevel::Medium);
    assert!(report.record.confidence_reasons().contains(&DowngradeReason::NoAltitude));
}

#[test]
fn test_batch_keeps_order_and_isolates_failures() {
    let dir = TempDir::new().unwrap();
    let xmp = dji_xmp(r#"drone-dji:RelativeAltitude="+40.00" drone-dji:GimbalPitchDegree="-72.00""#);
    let good = write_jpeg(dir.path(), "a.jpg", Some(phantom_exif(Vec::new())), Some(xmp));
    let missing = dir.path().join("b.jpg");
    let also_good = write_jpeg(dir.path(), "c.jpg", Some(phantom_exif(Vec::new())), None);

    let paths = vec![good.clone(), missing.clone(), also_good.clone()];
    let results = calibrate_batch(&paths, None, &no_exiftool()).unwrap();

    let order: Vec<_> = results.iter().map(|(p, _)| p.clone()).collect();
    assert_eq!(order, paths);
    assert!(results[0].1.is_ok());
    assert!(matches!(results[1].1, Err(CalibError::InvalidInput(_))));
    assert!(results[2].1.is_ok());

    let json = serde_json::to_value(results[0].1.as_ref().unwrap()).unwrap();
    assert_eq!(json["confidence"], "MEDIUM");
    assert_eq!(json["distance"]["estimate"]["tier"], "altitude_pitch");
}

#[test]
fn test_nadir_shot_falls_back_to_fixed_angle() {
    let dir = TempDir::new().unwrap();
    let xmp = dji_xmp(r#"drone-dji:RelativeAltitude="+40.00" drone-dji:GimbalPitchDegree="-90.00""#);
    let path = write_jpeg(dir.path(), "nadir.jpg", Some(phantom_exif(Vec::new())), Some(xmp));

    let report = calibrate_image(&path, None, &no_exiftool()).unwrap();

    assert!(matches!(report.distance.attempts[1].failure, Some(TierFailure::Degenerate(_))));
    assert_eq!(report.distance.tier(), Some(DistanceTier::FixedAngle));
    assert_eq!(report.distance_m(), Some(40.0));
    assert_eq!(report.confidence, ConfidenceLevel::Medium);
    assert_eq!(
        report.record.confidence_reasons(),
        &[DowngradeReason::DatabaseFallback, DowngradeReason::FixedAngleAssumption]
    );
    assert!(report.record.data_source().ends_with("+database+fixed_angle"));
    assert!(report
        .diagnostics
        .with_status(FieldStatus::Substituted)
        .any(|e| e.stage == Stage::Confidence));
}
