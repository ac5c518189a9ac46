//! Camera-to-subject distance estimation.
//!
//! Three tiers of decreasing precision. Each tier is a standalone function;
//! [`best_available`] applies them in order and keeps every attempt so the
//! caller can see which tier produced the number and why the others did not.
//!
//! | Tier | Needs | Model |
//! |------|-------|-------|
//! | 1 | drone lat/lon/MSL, target lat/lon/base MSL, optional pitch | haversine + Pythagoras, aim-point refinement |
//! | 2 | relative altitude, gimbal pitch | `alt / tan(pitch)` |
//! | 3 | relative altitude | 45° assumption, `distance = alt` |

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::calibration::Telemetry;
use crate::geo::{self, GeoPoint};

/// Pitch magnitude above which Tier 1 refines the aim point (~3°).
pub const REFINEMENT_PITCH_THRESHOLD_RAD: f64 = 0.05;

/// Pitch magnitude Tier 2 requires (~5.7°).
pub const TIER2_MIN_PITCH_RAD: f64 = 0.1;

/// Distances at or below this are non-physical.
pub const MIN_DISTANCE_M: f64 = 0.1;

/// Pitch assumed by Tier 3. tan(45°) = 1, so distance equals altitude.
pub const FALLBACK_PITCH_DEG: f64 = 45.0;

/// Tower/structure location supplied by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TargetLocation {
    pub latitude: f64,
    pub longitude: f64,
    /// Base of the structure above mean sea level, metres
    pub base_altitude_m: f64,
}

/// The telemetry subset the tiers consume.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DistanceInputs {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub msl_altitude_m: Option<f64>,
    pub relative_altitude_m: Option<f64>,
    pub gimbal_pitch_deg: Option<f64>,
}

impl From<&Telemetry> for DistanceInputs {
    fn from(t: &Telemetry) -> Self {
        Self {
            latitude: t.latitude,
            longitude: t.longitude,
            msl_altitude_m: t.msl_altitude_m(),
            relative_altitude_m: t.relative_altitude_m,
            gimbal_pitch_deg: t.gimbal_pitch_deg,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceTier {
    /// Tier 1
    Geodesic,
    /// Tier 2
    AltitudePitch,
    /// Tier 3
    FixedAngle,
}

impl DistanceTier {
    pub const ORDER: [DistanceTier; 3] = [
        DistanceTier::Geodesic,
        DistanceTier::AltitudePitch,
        DistanceTier::FixedAngle,
    ];

    pub fn number(&self) -> u8 {
        match self {
            DistanceTier::Geodesic => 1,
            DistanceTier::AltitudePitch => 2,
            DistanceTier::FixedAngle => 3,
        }
    }
}

impl fmt::Display for DistanceTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DistanceTier::Geodesic => "geodesic",
            DistanceTier::AltitudePitch => "altitude_pitch",
            DistanceTier::FixedAngle => "fixed_angle",
        };
        write!(f, "tier {} ({})", self.number(), name)
    }
}

/// Why a tier could not produce a distance.
#[derive(Debug, Clone, Copy, PartialEq, Error, Serialize)]
#[serde(tag = "reason", content = "value", rename_all = "snake_case")]
pub enum TierFailure {
    #[error("missing input: {0}")]
    MissingInput(&'static str),

    #[error("corrupt coordinates")]
    CorruptCoordinates,

    #[error("gimbal pitch too close to horizontal")]
    NearHorizontal,

    #[error("degenerate distance {0:.3} m")]
    Degenerate(f64),
}

/// A distance produced by one tier.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DistanceEstimate {
    pub distance_m: f64,
    pub tier: DistanceTier,
    /// Tier 1 only: great-circle ground distance
    #[serde(skip_serializing_if = "Option::is_none")]
    pub horizontal_m: Option<f64>,
    /// Tier 1 only: drone MSL minus target base MSL
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vertical_m: Option<f64>,
    /// Tier 1 only: height on the structure the camera is aimed at
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aim_height_m: Option<f64>,
}

impl DistanceEstimate {
    fn simple(distance_m: f64, tier: DistanceTier) -> Self {
        Self {
            distance_m,
            tier,
            horizontal_m: None,
            vertical_m: None,
            aim_height_m: None,
        }
    }
}

pub type TierResult = Result<DistanceEstimate, TierFailure>;

/// Strictly above `threshold_rad` in magnitude; a pitch exactly at the
/// threshold does not qualify.
pub fn steeper_than(pitch_rad: f64, threshold_rad: f64) -> bool {
    pitch_rad.abs() > threshold_rad
}

fn non_degenerate(estimate: DistanceEstimate) -> TierResult {
    if !estimate.distance_m.is_finite() || estimate.distance_m <= MIN_DISTANCE_M {
        return Err(TierFailure::Degenerate(estimate.distance_m));
    }
    Ok(estimate)
}

// ============================================================================
// Tiers
// ============================================================================

/// Tier 1: 3D geodesic model with gimbal aim-point refinement.
pub fn tier1_geodesic(inputs: &DistanceInputs, target: Option<&TargetLocation>) -> TierResult {
    let target = target.ok_or(TierFailure::MissingInput("target location"))?;
    let lat = inputs.latitude.ok_or(TierFailure::MissingInput("drone latitude"))?;
    let lon = inputs.longitude.ok_or(TierFailure::MissingInput("drone longitude"))?;
    let drone_msl = inputs.msl_altitude_m.ok_or(TierFailure::MissingInput("drone MSL altitude"))?;

    let drone = GeoPoint::new(lat, lon).ok_or(TierFailure::CorruptCoordinates)?;
    let tower = GeoPoint::new(target.latitude, target.longitude).ok_or(TierFailure::CorruptCoordinates)?;

    let horizontal = geo::haversine_m(drone.latitude, drone.longitude, tower.latitude, tower.longitude);
    let vertical = drone_msl - target.base_altitude_m;
    let base_slant = horizontal.hypot(vertical);

    let mut estimate = DistanceEstimate {
        distance_m: base_slant,
        tier: DistanceTier::Geodesic,
        horizontal_m: Some(horizontal),
        vertical_m: Some(vertical),
        aim_height_m: None,
    };

    let pitch_rad = inputs.gimbal_pitch_deg.map(f64::to_radians);
    match pitch_rad {
        Some(p) if steeper_than(p, REFINEMENT_PITCH_THRESHOLD_RAD) => {
            let aim_height = vertical - horizontal * p.abs().tan();
            if aim_height < 0.0 {
                debug!(
                    "Aim ray passes below the target base ({:.2} m), keeping base slant {:.2} m",
                    aim_height, base_slant
                );
            } else {
                let adjusted_vertical = vertical - aim_height;
                estimate.distance_m = horizontal.hypot(adjusted_vertical);
                estimate.aim_height_m = Some(aim_height);
            }
        }
        _ => debug!("No usable gimbal pitch, using base slant {:.2} m", base_slant),
    }

    non_degenerate(estimate)
}

/// Tier 2: relative altitude over tan(|pitch|).
pub fn tier2_altitude_pitch(relative_altitude_m: Option<f64>, gimbal_pitch_deg: Option<f64>) -> TierResult {
    let altitude = relative_altitude_m.ok_or(TierFailure::MissingInput("relative altitude"))?;
    let pitch = gimbal_pitch_deg.ok_or(TierFailure::MissingInput("gimbal pitch"))?;

    let pitch_rad = pitch.to_radians().abs();
    if !steeper_than(pitch_rad, TIER2_MIN_PITCH_RAD) {
        return Err(TierFailure::NearHorizontal);
    }

    non_degenerate(DistanceEstimate::simple(altitude / pitch_rad.tan(), DistanceTier::AltitudePitch))
}

/// Tier 3: assume a 45° view so distance equals relative altitude.
pub fn tier3_fixed_angle(relative_altitude_m: Option<f64>) -> TierResult {
    let altitude = relative_altitude_m.ok_or(TierFailure::MissingInput("relative altitude"))?;
    non_degenerate(DistanceEstimate::simple(altitude, DistanceTier::FixedAngle))
}

// ============================================================================
// Best-available policy
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TierAttempt {
    pub tier: DistanceTier,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance_m: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<TierFailure>,
}

/// Outcome of running the tiers in order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DistanceResolution {
    pub estimate: Option<DistanceEstimate>,
    pub attempts: Vec<TierAttempt>,
}

impl DistanceResolution {
    pub fn distance_m(&self) -> Option<f64> {
        self.estimate.map(|e| e.distance_m)
    }

    pub fn tier(&self) -> Option<DistanceTier> {
        self.estimate.map(|e| e.tier)
    }
}

/// Run Tier 1, 2, 3 in order and stop at the first success.
pub fn best_available(inputs: &DistanceInputs, target: Option<&TargetLocation>) -> DistanceResolution {
    let mut attempts = Vec::new();

    for tier in DistanceTier::ORDER {
        let result = match tier {
            DistanceTier::Geodesic => tier1_geodesic(inputs, target),
            DistanceTier::AltitudePitch => tier2_altitude_pitch(inputs.relative_altitude_m, inputs.gimbal_pitch_deg),
            DistanceTier::FixedAngle => tier3_fixed_angle(inputs.relative_altitude_m),
        };

        match result {
            Ok(estimate) => {
                attempts.push(TierAttempt { tier, distance_m: Some(estimate.distance_m), failure: None });
                if tier == DistanceTier::FixedAngle {
                    match (inputs.gimbal_pitch_deg, attempts.iter().rev().nth(1)) {
                        (Some(pitch), Some(TierAttempt { failure: Some(failure), .. })) => warn!(
                            "Tier 2 unusable at {}° gimbal pitch ({}), falling back to {}° assumption, distance {:.2} m",
                            pitch, failure, FALLBACK_PITCH_DEG, estimate.distance_m
                        ),
                        _ => warn!(
                            "No gimbal pitch, assuming {}°, distance {:.2} m",
                            FALLBACK_PITCH_DEG, estimate.distance_m
                        ),
                    }
                } else {
                    info!("Distance {:.2} m from {}", estimate.distance_m, tier);
                }
                return DistanceResolution { estimate: Some(estimate), attempts };
            }
            Err(failure) => {
                debug!("{} unavailable: {}", tier, failure);
                attempts.push(TierAttempt { tier, distance_m: None, failure: Some(failure) });
            }
        }
    }

    warn!("No distance tier succeeded");
    DistanceResolution { estimate: None, attempts }
}
