//! Ground sample distance.
//!
//! ```text
//! gsd_cm = (distance_m * sensor_width_mm / 1000) / (focal_length_mm / 1000) / pixel_width * 100
//! ```

use serde::Serialize;

use crate::calibration::CalibrationRecord;
use crate::error::{CalibError, Result};

/// Ground area covered by the full frame, metres.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Footprint {
    pub width_m: f64,
    pub height_m: f64,
}

/// Horizontal and vertical GSD plus footprint for one record at one distance.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GroundSampling {
    pub distance_m: f64,
    pub gsd_cm_per_px: f64,
    pub gsd_height_cm_per_px: f64,
    pub footprint: Footprint,
}

fn check(distance_m: f64, sensor_mm: f64, focal_length_mm: f64, pixels: u32) -> Result<()> {
    if !distance_m.is_finite() || distance_m <= 0.0 {
        return Err(CalibError::InvalidInput(format!("distance must be > 0, got {}", distance_m)));
    }
    if !focal_length_mm.is_finite() || focal_length_mm <= 0.0 {
        return Err(CalibError::InvalidInput(format!("focal length must be > 0, got {}", focal_length_mm)));
    }
    if !sensor_mm.is_finite() || sensor_mm <= 0.0 {
        return Err(CalibError::InvalidInput(format!("sensor size must be > 0, got {}", sensor_mm)));
    }
    if pixels == 0 {
        return Err(CalibError::InvalidInput("pixel count must be > 0".to_string()));
    }
    Ok(())
}

/// Horizontal GSD in cm/pixel.
pub fn compute_gsd(distance_m: f64, sensor_width_mm: f64, focal_length_mm: f64, pixel_width: u32) -> Result<f64> {
    check(distance_m, sensor_width_mm, focal_length_mm, pixel_width)?;
    Ok((distance_m * sensor_width_mm / 1000.0) / (focal_length_mm / 1000.0) / pixel_width as f64 * 100.0)
}

/// Vertical GSD in cm/pixel, from sensor height and pixel height.
pub fn compute_gsd_height(distance_m: f64, sensor_height_mm: f64, focal_length_mm: f64, pixel_height: u32) -> Result<f64> {
    compute_gsd(distance_m, sensor_height_mm, focal_length_mm, pixel_height)
}

/// Ground width and height covered by the frame.
pub fn footprint(distance_m: f64, sensor_width_mm: f64, sensor_height_mm: f64, focal_length_mm: f64) -> Result<Footprint> {
    check(distance_m, sensor_width_mm, focal_length_mm, 1)?;
    check(distance_m, sensor_height_mm, focal_length_mm, 1)?;
    Ok(Footprint {
        width_m: distance_m * sensor_width_mm / focal_length_mm,
        height_m: distance_m * sensor_height_mm / focal_length_mm,
    })
}

impl GroundSampling {
    pub fn from_record(record: &CalibrationRecord, distance_m: f64) -> Result<Self> {
        Ok(Self {
            distance_m,
            gsd_cm_per_px: compute_gsd(
                distance_m,
                record.sensor_width_mm(),
                record.focal_length_mm(),
                record.pixel_width(),
            )?,
            gsd_height_cm_per_px: compute_gsd_height(
                distance_m,
                record.sensor_height_mm(),
                record.focal_length_mm(),
                record.pixel_height(),
            )?,
            footprint: footprint(
                distance_m,
                record.sensor_width_mm(),
                record.sensor_height_mm(),
                record.focal_length_mm(),
            )?,
        })
    }

    /// Convert a pixel length measured in the image to centimetres.
    pub fn pixels_to_cm(&self, pixels: f64) -> f64 {
        pixels * self.gsd_cm_per_px
    }
}
