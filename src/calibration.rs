//! Calibration record, its builder and the confidence policy.
//!
//! A [`CalibrationRecord`] only exists when all five optical parameters are
//! known and positive: focal length, sensor width, sensor height, pixel width
//! and pixel height. Everything else (telemetry, model name, 35 mm
//! equivalent) is best-effort.

use chrono::NaiveDateTime;
use serde::Serialize;
use std::cmp::Ordering;
use std::fmt;

use crate::camera_db::MatchKind;
use crate::error::{CalibError, Result};

/// Pixel pitch reported when sensor width or pixel width is unusable.
pub const DEFAULT_PIXEL_PITCH_UM: f64 = 2.4;

// ============================================================================
// Mandatory Fields
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MandatoryField {
    FocalLength,
    SensorWidth,
    SensorHeight,
    PixelWidth,
    PixelHeight,
}

impl MandatoryField {
    pub const ALL: [MandatoryField; 5] = [
        MandatoryField::FocalLength,
        MandatoryField::SensorWidth,
        MandatoryField::SensorHeight,
        MandatoryField::PixelWidth,
        MandatoryField::PixelHeight,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MandatoryField::FocalLength => "focal_length_mm",
            MandatoryField::SensorWidth => "sensor_width_mm",
            MandatoryField::SensorHeight => "sensor_height_mm",
            MandatoryField::PixelWidth => "pixel_width",
            MandatoryField::PixelHeight => "pixel_height",
        }
    }
}

impl fmt::Display for MandatoryField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Confidence
// ============================================================================

/// Qualitative certainty, ordered so that `High > Medium > ... > Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConfidenceLevel {
    High,
    Medium,
    Low,
    Manual,
    Failed,
}

impl ConfidenceLevel {
    fn rank(self) -> u8 {
        match self {
            ConfidenceLevel::High => 4,
            ConfidenceLevel::Medium => 3,
            ConfidenceLevel::Low => 2,
            ConfidenceLevel::Manual => 1,
            ConfidenceLevel::Failed => 0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConfidenceLevel::High => "HIGH",
            ConfidenceLevel::Medium => "MEDIUM",
            ConfidenceLevel::Low => "LOW",
            ConfidenceLevel::Manual => "MANUAL",
            ConfidenceLevel::Failed => "FAILED",
        }
    }
}

impl PartialOrd for ConfidenceLevel {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ConfidenceLevel {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank().cmp(&other.rank())
    }
}

impl fmt::Display for ConfidenceLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why the automatic path lowered confidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DowngradeReason {
    DatabaseFallback,
    NoAltitude,
    NoGimbalPitch,
    /// Distance came from the fixed 45° assumption.
    FixedAngleAssumption,
}

/// Floor-based confidence: starts HIGH, each trigger caps it at MEDIUM.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfidenceAssessment {
    level: ConfidenceLevel,
    reasons: Vec<DowngradeReason>,
}

impl Default for ConfidenceAssessment {
    fn default() -> Self {
        Self {
            level: ConfidenceLevel::High,
            reasons: Vec::new(),
        }
    }
}

impl ConfidenceAssessment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply the automatic-path policy in one go.
    pub fn evaluate(database_fallback: bool, has_altitude: bool, has_gimbal_pitch: bool) -> Self {
        let mut assessment = Self::new();
        if database_fallback {
            assessment.downgrade(DowngradeReason::DatabaseFallback);
        }
        if !has_altitude {
            assessment.downgrade(DowngradeReason::NoAltitude);
        }
        if !has_gimbal_pitch {
            assessment.downgrade(DowngradeReason::NoGimbalPitch);
        }
        assessment
    }

    /// Record a trigger. Never raises the level and never drops below MEDIUM.
    pub fn downgrade(&mut self, reason: DowngradeReason) {
        self.level = self.level.min(ConfidenceLevel::Medium);
        if !self.reasons.contains(&reason) {
            self.reasons.push(reason);
        }
    }

    pub fn level(&self) -> ConfidenceLevel {
        self.level
    }

    pub fn reasons(&self) -> &[DowngradeReason] {
        &self.reasons
    }
}

// ============================================================================
// Telemetry
// ============================================================================

/// Best-effort flight telemetry carried on the record.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Telemetry {
    /// EXIF GPS altitude, metres (sign from `GPSAltitudeRef`)
    pub gps_altitude_m: Option<f64>,
    /// Height above the takeoff point, metres
    pub relative_altitude_m: Option<f64>,
    /// Mean-sea-level altitude, metres
    pub absolute_altitude_m: Option<f64>,
    pub gimbal_pitch_deg: Option<f64>,
    pub gimbal_yaw_deg: Option<f64>,
    pub gimbal_roll_deg: Option<f64>,
    pub flight_pitch_deg: Option<f64>,
    pub flight_yaw_deg: Option<f64>,
    pub flight_roll_deg: Option<f64>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub captured_at: Option<NaiveDateTime>,
}

impl Telemetry {
    pub fn has_any_altitude(&self) -> bool {
        self.gps_altitude_m.is_some() || self.relative_altitude_m.is_some() || self.absolute_altitude_m.is_some()
    }

    /// Drone MSL altitude: XMP absolute altitude, else EXIF GPS altitude.
    pub fn msl_altitude_m(&self) -> Option<f64> {
        self.absolute_altitude_m.or(self.gps_altitude_m)
    }
}

// ============================================================================
// Calibration Record
// ============================================================================

/// Immutable optical and telemetry parameters for one image.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CalibrationRecord {
    focal_length_mm: f64,
    sensor_width_mm: f64,
    sensor_height_mm: f64,
    pixel_pitch_um: f64,
    pixel_width: u32,
    pixel_height: u32,
    camera_model: Option<String>,
    focal_length_35mm: Option<f64>,
    #[serde(flatten)]
    telemetry: Telemetry,
    confidence: ConfidenceLevel,
    confidence_reasons: Vec<DowngradeReason>,
    data_source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    database_match: Option<MatchKind>,
}

impl CalibrationRecord {
    pub fn builder() -> CalibrationBuilder {
        CalibrationBuilder::default()
    }

    pub fn focal_length_mm(&self) -> f64 {
        self.focal_length_mm
    }

    pub fn sensor_width_mm(&self) -> f64 {
        self.sensor_width_mm
    }

    pub fn sensor_height_mm(&self) -> f64 {
        self.sensor_height_mm
    }

    pub fn pixel_pitch_um(&self) -> f64 {
        self.pixel_pitch_um
    }

    pub fn pixel_width(&self) -> u32 {
        self.pixel_width
    }

    pub fn pixel_height(&self) -> u32 {
        self.pixel_height
    }

    pub fn camera_model(&self) -> Option<&str> {
        self.camera_model.as_deref()
    }

    pub fn focal_length_35mm(&self) -> Option<f64> {
        self.focal_length_35mm
    }

    pub fn telemetry(&self) -> &Telemetry {
        &self.telemetry
    }

    pub fn confidence(&self) -> ConfidenceLevel {
        self.confidence
    }

    pub fn confidence_reasons(&self) -> &[DowngradeReason] {
        &self.confidence_reasons
    }

    pub fn data_source(&self) -> &str {
        &self.data_source
    }

    pub fn database_match(&self) -> Option<MatchKind> {
        self.database_match
    }

    /// The same record after a downgrade found once distance was resolved.
    ///
    /// Confidence is capped at MEDIUM as usual and `+source_suffix` is
    /// appended to the data source, so the substitution shows in both tags.
    pub fn with_downgrade(self, reason: DowngradeReason, source_suffix: &str) -> Self {
        let mut assessment = ConfidenceAssessment {
            level: self.confidence,
            reasons: self.confidence_reasons,
        };
        assessment.downgrade(reason);

        let data_source = if self.data_source.is_empty() {
            source_suffix.to_string()
        } else {
            format!("{}+{}", self.data_source, source_suffix)
        };

        Self {
            confidence: assessment.level,
            confidence_reasons: assessment.reasons,
            data_source,
            ..self
        }
    }
}

/// `sensor_width_mm * 1000 / pixel_width`, or the literal default.
pub fn derive_pixel_pitch(sensor_width_mm: Option<f64>, pixel_width: Option<u32>) -> f64 {
    match (sensor_width_mm, pixel_width) {
        (Some(sw), Some(pw)) if sw > 0.0 && pw > 0 => sw * 1000.0 / pw as f64,
        _ => DEFAULT_PIXEL_PITCH_UM,
    }
}

#[derive(Debug, Clone, Default)]
pub struct CalibrationBuilder {
    focal_length_mm: Option<f64>,
    sensor_width_mm: Option<f64>,
    sensor_height_mm: Option<f64>,
    pixel_width: Option<u32>,
    pixel_height: Option<u32>,
    camera_model: Option<String>,
    focal_length_35mm: Option<f64>,
    telemetry: Telemetry,
    confidence: ConfidenceAssessment,
    data_source: String,
    database_match: Option<MatchKind>,
}

fn positive(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite() && *v > 0.0)
}

impl CalibrationBuilder {
    pub fn focal_length_mm(mut self, value: Option<f64>) -> Self {
        self.focal_length_mm = value;
        self
    }

    pub fn sensor_width_mm(mut self, value: Option<f64>) -> Self {
        self.sensor_width_mm = value;
        self
    }

    pub fn sensor_height_mm(mut self, value: Option<f64>) -> Self {
        self.sensor_height_mm = value;
        self
    }

    pub fn pixel_width(mut self, value: Option<u32>) -> Self {
        self.pixel_width = value;
        self
    }

    pub fn pixel_height(mut self, value: Option<u32>) -> Self {
        self.pixel_height = value;
        self
    }

    pub fn camera_model(mut self, value: Option<String>) -> Self {
        self.camera_model = value;
        self
    }

    pub fn focal_length_35mm(mut self, value: Option<f64>) -> Self {
        self.focal_length_35mm = value;
        self
    }

    pub fn telemetry(mut self, telemetry: Telemetry) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn confidence(mut self, confidence: ConfidenceAssessment) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn data_source(mut self, source: impl Into<String>) -> Self {
        self.data_source = source.into();
        self
    }

    pub fn database_match(mut self, kind: Option<MatchKind>) -> Self {
        self.database_match = kind;
        self
    }

    /// Mandatory fields that are absent, zero, negative or not finite.
    pub fn missing_fields(&self) -> Vec<MandatoryField> {
        MandatoryField::ALL
            .into_iter()
            .filter(|field| match field {
                MandatoryField::FocalLength => positive(self.focal_length_mm).is_none(),
                MandatoryField::SensorWidth => positive(self.sensor_width_mm).is_none(),
                MandatoryField::SensorHeight => positive(self.sensor_height_mm).is_none(),
                MandatoryField::PixelWidth => !self.pixel_width.is_some_and(|w| w > 0),
                MandatoryField::PixelHeight => !self.pixel_height.is_some_and(|h| h > 0),
            })
            .collect()
    }

    pub fn build(self) -> Result<CalibrationRecord> {
        let missing = self.missing_fields();
        let (Some(focal), Some(sw), Some(sh), Some(pw), Some(ph)) = (
            positive(self.focal_length_mm),
            positive(self.sensor_width_mm),
            positive(self.sensor_height_mm),
            self.pixel_width.filter(|w| *w > 0),
            self.pixel_height.filter(|h| *h > 0),
        ) else {
            return Err(CalibError::MissingFields(missing));
        };

        Ok(CalibrationRecord {
            focal_length_mm: focal,
            sensor_width_mm: sw,
            sensor_height_mm: sh,
            pixel_pitch_um: derive_pixel_pitch(Some(sw), Some(pw)),
            pixel_width: pw,
            pixel_height: ph,
            camera_model: self.camera_model,
            focal_length_35mm: positive(self.focal_length_35mm),
            telemetry: self.telemetry,
            confidence: self.confidence.level(),
            confidence_reasons: self.confidence.reasons().to_vec(),
            data_source: self.data_source,
            database_match: self.database_match,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complete() -> CalibrationBuilder {
        CalibrationRecord::builder()
            .focal_length_mm(Some(8.8))
            .sensor_width_mm(Some(13.2))
            .sensor_height_mm(Some(8.8))
            .pixel_width(Some(5472))
            .pixel_height(Some(3648))
            .camera_model(Some("FC6310".to_string()))
            .data_source("exiftool")
    }

    #[test]
    fn test_complete_record() {
        let record = complete().build().unwrap();
        assert_eq!(record.focal_length_mm(), 8.8);
        assert_eq!(record.pixel_width(), 5472);
        assert!((record.pixel_pitch_um() - 2.4123).abs() < 1e-3);
        assert_eq!(record.confidence(), ConfidenceLevel::High);
        assert_eq!(record.data_source(), "exiftool");
    }

    #[test]
    fn test_each_mandatory_field_blocks_construction() {
        let telemetry = Telemetry {
            gps_altitude_m: Some(120.0),
            relative_altitude_m: Some(85.2),
            absolute_altitude_m: Some(520.0),
            gimbal_pitch_deg: Some(-72.0),
            gimbal_yaw_deg: Some(10.0),
            gimbal_roll_deg: Some(0.0),
            latitude: Some(47.37),
            longitude: Some(8.54),
            ..Default::default()
        };

        for field in MandatoryField::ALL {
            let builder = complete()
                .telemetry(telemetry.clone())
                .focal_length_35mm(Some(24.0));
            let builder = match field {
                MandatoryField::FocalLength => builder.focal_length_mm(None),
                MandatoryField::SensorWidth => builder.sensor_width_mm(None),
                MandatoryField::SensorHeight => builder.sensor_height_mm(Some(0.0)),
                MandatoryField::PixelWidth => builder.pixel_width(Some(0)),
                MandatoryField::PixelHeight => builder.pixel_height(None),
            };
            match builder.build() {
                Err(CalibError::MissingFields(missing)) => assert_eq!(missing, vec![field]),
                other => panic!("{field} missing but got {other:?}"),
            }
        }
    }

    #[test]
    fn test_all_missing_listed() {
        let err = CalibrationRecord::builder().build().unwrap_err();
        match err {
            CalibError::MissingFields(missing) => assert_eq!(missing, MandatoryField::ALL.to_vec()),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_confidence_order() {
        assert!(ConfidenceLevel::High > ConfidenceLevel::Medium);
        assert!(ConfidenceLevel::Medium > ConfidenceLevel::Low);
        assert!(ConfidenceLevel::Low > ConfidenceLevel::Manual);
        assert!(ConfidenceLevel::Manual > ConfidenceLevel::Failed);
    }

    #[test]
    fn test_confidence_floor_at_medium() {
        let all = ConfidenceAssessment::evaluate(true, false, false);
        assert_eq!(all.level(), ConfidenceLevel::Medium);
        assert_eq!(all.reasons().len(), 3);

        let none = ConfidenceAssessment::evaluate(false, true, true);
        assert_eq!(none.level(), ConfidenceLevel::High);
        assert!(none.reasons().is_empty());

        let pitch_only = ConfidenceAssessment::evaluate(false, true, false);
        assert_eq!(pitch_only.level(), ConfidenceLevel::Medium);
        assert_eq!(pitch_only.reasons(), &[DowngradeReason::NoGimbalPitch]);
    }

    #[test]
    fn test_late_downgrade_marks_both_tags() {
        let record = complete().build().unwrap();
        let downgraded = record.clone().with_downgrade(DowngradeReason::FixedAngleAssumption, "fixed_angle");
        assert_eq!(downgraded.confidence(), ConfidenceLevel::Medium);
        assert_eq!(downgraded.confidence_reasons(), &[DowngradeReason::FixedAngleAssumption]);
        assert_eq!(downgraded.data_source(), "exiftool+fixed_angle");
        assert_eq!(downgraded.focal_length_mm(), record.focal_length_mm());

        let mut already = ConfidenceAssessment::new();
        already.downgrade(DowngradeReason::DatabaseFallback);
        let record = complete()
            .confidence(already)
            .data_source("tag_reader+database")
            .build()
            .unwrap()
            .with_downgrade(DowngradeReason::FixedAngleAssumption, "fixed_angle");
        assert_eq!(record.confidence(), ConfidenceLevel::Medium);
        assert_eq!(
            record.confidence_reasons(),
            &[DowngradeReason::DatabaseFallback, DowngradeReason::FixedAngleAssumption]
        );
        assert_eq!(record.data_source(), "tag_reader+database+fixed_angle");
    }

    #[test]
    fn test_pixel_pitch_default() {
        assert_eq!(derive_pixel_pitch(None, Some(4000)), DEFAULT_PIXEL_PITCH_UM);
        assert_eq!(derive_pixel_pitch(Some(6.17), Some(0)), DEFAULT_PIXEL_PITCH_UM);
        assert!((derive_pixel_pitch(Some(6.17), Some(4000)) - 1.5425).abs() < 1e-9);
    }

    #[test]
    fn test_serializes_confidence_uppercase() {
        let record = complete().build().unwrap();
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["confidence"], "HIGH");
        assert_eq!(json["pixel_width"], 5472);
    }
}
