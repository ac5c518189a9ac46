//! Camera parameter resolution from merged metadata.
//!
//! Turns a [`RawMetadataMap`] into a [`CalibrationRecord`]: model identifier,
//! focal length, sensor size, pixel dimensions and flight telemetry. When the
//! image does not describe its own optics, the camera database fills the gap
//! and confidence drops to MEDIUM.

use chrono::NaiveDateTime;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::calibration::{CalibrationRecord, ConfidenceAssessment, Telemetry};
use crate::camera_db::{self, CameraMatch};
use crate::diagnostics::{Diagnostics, Stage};
use crate::error::Result;
use crate::geo;
use crate::metadata::{value_as_f64, value_as_str, RawMetadataMap};

const MODEL_KEYS: &[&str] = &["Model", "CameraModelName", "UniqueCameraModel", "LocalizedCameraModel"];
const XMP_MODEL_KEYS: &[&str] = &["Model", "CameraModel", "CameraModelName"];
const BRAND_KEYS: &[&str] = &["Make", "CameraMake"];

const FOCAL_KEYS: &[&str] = &["FocalLength"];
const FOCAL_35MM_KEYS: &[&str] = &["FocalLengthIn35mmFormat", "FocalLengthIn35mmFilm", "FocalLength35efl"];

// FocalPlaneXResolution/YResolution are pixels-per-unit, not sensor size
const SENSOR_WIDTH_KEYS: &[&str] = &["SensorWidth", "SensorWidthMm", "SensorWidthMM"];
const SENSOR_HEIGHT_KEYS: &[&str] = &["SensorHeight", "SensorHeightMm", "SensorHeightMM"];

const WIDTH_KEYS: &[&str] = &["ImageWidth", "ExifImageWidth", "PixelXDimension"];
const HEIGHT_KEYS: &[&str] = &["ImageHeight", "ImageLength", "ExifImageHeight", "PixelYDimension"];

const CAPTURE_TIME_KEYS: &[&str] = &["DateTimeOriginal", "CreateDate", "DateTimeDigitized", "DateTime"];
const CAPTURE_TIME_FORMATS: &[&str] = &["%Y:%m:%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"];

/// Model strings that carry no information.
const PLACEHOLDER_MODELS: &[&str] = &["unknown", "null", "none", "n/a", "undefined"];

/// The camera model as resolved from metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelIdentifier {
    pub value: String,
    /// Only the manufacturer was available.
    pub brand_only: bool,
}

/// Optical parameters after direct extraction and database fill.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OpticalParameters {
    pub focal_length_mm: Option<f64>,
    pub sensor_width_mm: Option<f64>,
    pub sensor_height_mm: Option<f64>,
    pub pixel_width: Option<u32>,
    pub pixel_height: Option<u32>,
    pub database_match: Option<CameraMatch>,
}

pub struct CameraParameterResolver<'a> {
    metadata: &'a RawMetadataMap,
}

impl<'a> CameraParameterResolver<'a> {
    pub fn new(metadata: &'a RawMetadataMap) -> Self {
        Self { metadata }
    }

    fn flat(&self, keys: &[&'static str]) -> Option<(&'static str, &'a Value)> {
        keys.iter()
            .find_map(|key| self.metadata.get(key).map(|v| (*key, v)))
    }

    fn nested(&self, map: Option<&'a Map<String, Value>>, keys: &[&'static str]) -> Option<(&'static str, &'a Value)> {
        let map = map?;
        keys.iter().find_map(|key| map.get(*key).map(|v| (*key, v)))
    }

    fn xmp(&self, keys: &[&'static str]) -> Option<(&'static str, &'a Value)> {
        self.nested(self.metadata.xmp(), keys)
    }

    fn gps(&self, keys: &[&'static str]) -> Option<(&'static str, &'a Value)> {
        self.nested(self.metadata.gps(), keys)
    }

    /// First numeric value among flat aliases, then XMP aliases.
    fn number(&self, flat: &[&'static str], xmp: &[&'static str]) -> Option<(&'static str, f64)> {
        let from = |found: Option<(&'static str, &'a Value)>| found.and_then(|(k, v)| value_as_f64(v).map(|n| (k, n)));
        flat.iter()
            .find_map(|key| from(self.flat(std::slice::from_ref(key))))
            .or_else(|| xmp.iter().find_map(|key| from(self.xmp(std::slice::from_ref(key)))))
    }

    fn xmp_number(&self, keys: &[&'static str]) -> Option<f64> {
        keys.iter()
            .find_map(|key| self.xmp(std::slice::from_ref(key)).and_then(|(_, v)| value_as_f64(v)))
    }

    // ========================================================================
    // Camera
    // ========================================================================

    /// Model aliases, then XMP aliases, then the manufacturer alone.
    pub fn camera_model(&self, diagnostics: &mut Diagnostics) -> Option<ModelIdentifier> {
        for key in MODEL_KEYS {
            if let Some(model) = self.flat(&[*key]).and_then(|(_, v)| usable_model(v)) {
                diagnostics.found(Stage::Camera, "model", *key);
                return Some(ModelIdentifier { value: model, brand_only: false });
            }
        }
        for key in XMP_MODEL_KEYS {
            if let Some(model) = self.xmp(&[*key]).and_then(|(_, v)| usable_model(v)) {
                diagnostics.found(Stage::Camera, "model", format!("XMP:{}", key));
                return Some(ModelIdentifier { value: model, brand_only: false });
            }
        }
        for key in BRAND_KEYS {
            let brand = self
                .flat(&[*key])
                .or_else(|| self.xmp(&[*key]))
                .and_then(|(_, v)| usable_model(v));
            if let Some(brand) = brand {
                diagnostics.substituted(Stage::Camera, "model", format!("brand only ({})", key));
                return Some(ModelIdentifier { value: brand, brand_only: true });
            }
        }
        diagnostics.missing(Stage::Camera, "model");
        None
    }

    pub fn focal_length(&self, diagnostics: &mut Diagnostics) -> Option<f64> {
        match self.number(FOCAL_KEYS, FOCAL_KEYS).filter(|(_, f)| *f > 0.0) {
            Some((key, focal)) => {
                diagnostics.found(Stage::Camera, "focal_length_mm", format!("{} = {}", key, focal));
                Some(focal)
            }
            None => {
                diagnostics.missing(Stage::Camera, "focal_length_mm");
                None
            }
        }
    }

    pub fn focal_length_35mm(&self) -> Option<f64> {
        self.number(FOCAL_35MM_KEYS, FOCAL_35MM_KEYS)
            .map(|(_, f)| f)
            .filter(|f| *f > 0.0)
    }

    /// Sensor size from explicit sensor-dimension fields only.
    pub fn sensor_size(&self, diagnostics: &mut Diagnostics) -> (Option<f64>, Option<f64>) {
        let mut read = |field: &str, keys: &[&'static str]| match self.number(keys, keys).filter(|(_, v)| *v > 0.0) {
            Some((key, value)) => {
                diagnostics.found(Stage::Camera, field, format!("{} = {}", key, value));
                Some(value)
            }
            None => {
                diagnostics.missing(Stage::Camera, field);
                None
            }
        };
        let width = read("sensor_width_mm", SENSOR_WIDTH_KEYS);
        let height = read("sensor_height_mm", SENSOR_HEIGHT_KEYS);
        (width, height)
    }

    /// Decoder dimensions win; metadata dimensions only when decoding failed.
    pub fn pixel_dimensions(
        &self,
        decoded: Option<(u32, u32)>,
        diagnostics: &mut Diagnostics,
    ) -> (Option<u32>, Option<u32>) {
        if let Some((w, h)) = decoded.filter(|(w, h)| *w > 0 && *h > 0) {
            diagnostics.found(Stage::Camera, "pixel_dimensions", format!("decoder {}x{}", w, h));
            return (Some(w), Some(h));
        }

        let dim = |keys: &[&'static str]| {
            self.number(keys, &[])
                .filter(|(_, v)| *v >= 1.0 && *v <= u32::MAX as f64)
                .map(|(_, v)| v as u32)
        };
        let (width, height) = (dim(WIDTH_KEYS), dim(HEIGHT_KEYS));
        match (width, height) {
            (Some(w), Some(h)) => diagnostics.substituted(
                Stage::Camera,
                "pixel_dimensions",
                format!("metadata {}x{} (decode failed)", w, h),
            ),
            _ => diagnostics.missing(Stage::Camera, "pixel_dimensions"),
        }
        (width, height)
    }

    /// Direct extraction followed by the database fill.
    pub fn optical_parameters(
        &self,
        model: Option<&ModelIdentifier>,
        decoded: Option<(u32, u32)>,
        diagnostics: &mut Diagnostics,
    ) -> OpticalParameters {
        let mut params = OpticalParameters {
            focal_length_mm: self.focal_length(diagnostics),
            ..Default::default()
        };
        (params.sensor_width_mm, params.sensor_height_mm) = self.sensor_size(diagnostics);
        (params.pixel_width, params.pixel_height) = self.pixel_dimensions(decoded, diagnostics);

        let incomplete = params.focal_length_mm.is_none()
            || params.sensor_width_mm.is_none()
            || params.sensor_height_mm.is_none();
        if !incomplete {
            return params;
        }

        let found = database_match(model, &params);
        let Some(matched) = found else {
            diagnostics.missing(Stage::Database, "camera_spec");
            return params;
        };

        let spec = matched.spec;
        warn!(
            "Optical parameters incomplete, using database entry {} ({}) via {:?} match",
            spec.key, spec.name, matched.kind
        );
        diagnostics.found(Stage::Database, "camera_spec", format!("{} ({:?})", spec.key, matched.kind));

        if params.focal_length_mm.is_none() {
            params.focal_length_mm = Some(spec.focal_length_mm);
            diagnostics.substituted(Stage::Database, "focal_length_mm", spec.key);
        }
        if params.sensor_width_mm.is_none() {
            params.sensor_width_mm = Some(spec.sensor_width_mm);
            diagnostics.substituted(Stage::Database, "sensor_width_mm", spec.key);
        }
        if params.sensor_height_mm.is_none() {
            params.sensor_height_mm = Some(spec.sensor_height_mm);
            diagnostics.substituted(Stage::Database, "sensor_height_mm", spec.key);
        }
        params.database_match = Some(matched);
        params
    }

    // ========================================================================
    // Telemetry
    // ========================================================================

    pub fn telemetry(&self, diagnostics: &mut Diagnostics) -> Telemetry {
        let gps_altitude_m = self
            .gps(&["GPSAltitude"])
            .and_then(|(_, v)| value_as_f64(v))
            .map(|alt| geo::apply_altitude_ref(alt, self.gps(&["GPSAltitudeRef"]).map(|(_, v)| v)));

        let mut telemetry = Telemetry {
            gps_altitude_m,
            relative_altitude_m: self.xmp_number(&["RelativeAltitude"]),
            absolute_altitude_m: self.xmp_number(&["AbsoluteAltitude"]),
            gimbal_pitch_deg: self
                .xmp_number(&["GimbalPitchDegree"])
                .or_else(|| self.number(&["GimbalPitchDegree", "CameraPitch"], &[]).map(|(_, v)| v)),
            gimbal_yaw_deg: self
                .xmp_number(&["GimbalYawDegree"])
                .or_else(|| self.number(&["GimbalYawDegree", "CameraYaw"], &[]).map(|(_, v)| v)),
            gimbal_roll_deg: self
                .xmp_number(&["GimbalRollDegree"])
                .or_else(|| self.number(&["GimbalRollDegree", "CameraRoll"], &[]).map(|(_, v)| v)),
            flight_pitch_deg: self.xmp_number(&["FlightPitchDegree"]),
            flight_yaw_deg: self.xmp_number(&["FlightYawDegree"]),
            flight_roll_deg: self.xmp_number(&["FlightRollDegree"]),
            captured_at: self.captured_at(),
            ..Default::default()
        };

        match geo::position_from_metadata(self.metadata.gps(), self.metadata.xmp()) {
            Ok(Some(point)) => {
                telemetry.latitude = Some(point.latitude);
                telemetry.longitude = Some(point.longitude);
                diagnostics.found(
                    Stage::Telemetry,
                    "position",
                    format!("{:.6}, {:.6}", point.latitude, point.longitude),
                );
            }
            Ok(None) => diagnostics.missing(Stage::Telemetry, "position"),
            Err(corrupt) => {
                warn!(
                    "Rejecting corrupt GPS position ({}, {})",
                    corrupt.latitude, corrupt.longitude
                );
                diagnostics.rejected(
                    Stage::Telemetry,
                    "position",
                    format!("corrupt coordinates ({}, {})", corrupt.latitude, corrupt.longitude),
                );
            }
        }

        for (field, value) in [
            ("gps_altitude_m", telemetry.gps_altitude_m),
            ("relative_altitude_m", telemetry.relative_altitude_m),
            ("absolute_altitude_m", telemetry.absolute_altitude_m),
            ("gimbal_pitch_deg", telemetry.gimbal_pitch_deg),
        ] {
            match value {
                Some(v) => diagnostics.found(Stage::Telemetry, field, v.to_string()),
                None => diagnostics.missing(Stage::Telemetry, field),
            }
        }

        telemetry
    }

    fn captured_at(&self) -> Option<NaiveDateTime> {
        CAPTURE_TIME_KEYS.iter().find_map(|key| {
            self.flat(&[*key])
                .or_else(|| self.xmp(&[*key]))
                .and_then(|(_, v)| value_as_str(v))
                .and_then(|s| parse_capture_time(&s))
        })
    }

    // ========================================================================
    // Record
    // ========================================================================

    /// Resolve everything and build the record.
    ///
    /// `source_tag` names the extraction backends; `"+database"` is appended
    /// when the database filled optical parameters.
    pub fn resolve(
        &self,
        decoded: Option<(u32, u32)>,
        source_tag: &str,
        diagnostics: &mut Diagnostics,
    ) -> Result<CalibrationRecord> {
        let model = self.camera_model(diagnostics);
        let optics = self.optical_parameters(model.as_ref(), decoded, diagnostics);
        let telemetry = self.telemetry(diagnostics);

        let database_used = optics.database_match.is_some();
        let confidence = ConfidenceAssessment::evaluate(
            database_used,
            telemetry.has_any_altitude(),
            telemetry.gimbal_pitch_deg.is_some(),
        );
        for reason in confidence.reasons() {
            diagnostics.substituted(Stage::Confidence, "confidence", format!("MEDIUM ({:?})", reason));
        }

        let data_source = if database_used {
            format!("{}+database", source_tag)
        } else {
            source_tag.to_string()
        };

        let record = CalibrationRecord::builder()
            .focal_length_mm(optics.focal_length_mm)
            .sensor_width_mm(optics.sensor_width_mm)
            .sensor_height_mm(optics.sensor_height_mm)
            .pixel_width(optics.pixel_width)
            .pixel_height(optics.pixel_height)
            .camera_model(model.map(|m| m.value))
            .focal_length_35mm(self.focal_length_35mm())
            .telemetry(telemetry)
            .confidence(confidence)
            .data_source(data_source)
            .database_match(optics.database_match.map(|m| m.kind))
            .build()?;

        info!(
            "Calibrated {} f={}mm sensor={}x{}mm {}x{}px confidence={}",
            record.camera_model().unwrap_or("unknown camera"),
            record.focal_length_mm(),
            record.sensor_width_mm(),
            record.sensor_height_mm(),
            record.pixel_width(),
            record.pixel_height(),
            record.confidence()
        );
        Ok(record)
    }
}

/// Exact/fuzzy by model, or resolution/focal when only a brand (or nothing) is known.
fn database_match(model: Option<&ModelIdentifier>, params: &OpticalParameters) -> Option<CameraMatch> {
    if let Some(model) = model {
        if let Some(matched) = camera_db::lookup_by_model(&model.value) {
            return Some(matched);
        }
        if !model.brand_only {
            debug!("No database entry for model {:?}", model.value);
            return None;
        }
    }
    let (w, h) = (params.pixel_width?, params.pixel_height?);
    camera_db::lookup_by_resolution(w, h, params.focal_length_mm)
}

fn usable_model(value: &Value) -> Option<String> {
    let s = value_as_str(value)?;
    let lowered = s.to_lowercase();
    if PLACEHOLDER_MODELS.contains(&lowered.as_str()) || s.chars().all(|c| c == '\0') {
        return None;
    }
    Some(s)
}

/// EXIF `2023:05:01 10:15:30`, ISO `2023-05-01T10:15:30` (fraction/offset ignored).
pub fn parse_capture_time(raw: &str) -> Option<NaiveDateTime> {
    let head = raw.trim().get(..19)?;
    CAPTURE_TIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(head, fmt).ok())
}
