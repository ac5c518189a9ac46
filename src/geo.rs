//! Geographic helpers: great-circle distance and GPS coordinate parsing.
//!
//! Coordinates arrive in many encodings depending on the backend:
//! signed decimals (`47.3769`), `[deg, min, sec]` arrays, `"47 22 36.84"` or
//! `"47 deg 22' 36.84\" N"` strings, or rationals. All of them are normalised
//! to signed decimal degrees. A (0, 0) pair is a sensor-fault artifact and is
//! treated as no location at all.

use serde::Serialize;
use serde_json::{Map, Value};

use tracing::{debug, warn};

use crate::metadata::{parse_number_str, value_as_f64, value_as_str};

/// Mean Earth radius used by the haversine formula, in metres.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Below this magnitude (degrees) a coordinate counts as zero.
const ZERO_EPSILON_DEG: f64 = 1e-9;

/// A location in signed decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    /// Validated constructor. Rejects out-of-range values and the (0, 0) pair.
    pub fn new(latitude: f64, longitude: f64) -> Option<Self> {
        if !latitude.is_finite() || !longitude.is_finite() {
            return None;
        }
        if latitude.abs() > 90.0 || longitude.abs() > 180.0 {
            return None;
        }
        if is_null_island(latitude, longitude) {
            return None;
        }
        Some(Self { latitude, longitude })
    }

    pub fn distance_to(&self, other: &GeoPoint) -> f64 {
        haversine_m(self.latitude, self.longitude, other.latitude, other.longitude)
    }
}

/// True for the equator/prime-meridian pair written by a faulty GPS.
pub fn is_null_island(latitude: f64, longitude: f64) -> bool {
    latitude.abs() < ZERO_EPSILON_DEG && longitude.abs() < ZERO_EPSILON_DEG
}

/// Great-circle distance in metres between two points given in degrees.
pub fn haversine_m(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let d_phi = (lat2 - lat1).to_radians();
    let d_lambda = (lon2 - lon1).to_radians();

    let a = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    EARTH_RADIUS_M * c
}

// ============================================================================
// Coordinate Parsing
// ============================================================================

/// Parse one coordinate component to unsigned-or-signed decimal degrees.
///
/// A standalone hemisphere word in a string (`N`, `S`, `East`, `WEST`...) is
/// honoured; southern and western ones negate.
pub fn parse_coordinate(value: &Value) -> Option<f64> {
    match value {
        Value::Number(_) => value_as_f64(value),
        Value::Array(items) => dms_to_decimal(&items.iter().map(value_as_f64).collect::<Option<Vec<_>>>()?),
        Value::String(s) => parse_coordinate_str(s),
        _ => None,
    }
}

/// Sign implied by the first hemisphere word in `upper`, if any.
///
/// Words are maximal runs of ASCII letters, so `47.5S` and `8 deg 30' East`
/// both qualify while the `S` inside `DEGS` or `EAST` does not.
fn hemisphere_sign(upper: &str) -> Option<f64> {
    upper
        .split(|c: char| !c.is_ascii_alphabetic())
        .find_map(|word| match word {
            "N" | "NORTH" | "E" | "EAST" => Some(1.0),
            "S" | "SOUTH" | "W" | "WEST" => Some(-1.0),
            _ => None,
        })
}

fn parse_coordinate_str(s: &str) -> Option<f64> {
    let upper = s.to_uppercase();
    let negative = hemisphere_sign(&upper) == Some(-1.0);

    let cleaned: String = upper
        .chars()
        .map(|c| {
            if c.is_ascii_digit() || c == '.' || c == '/' || c == '-' || c == '+' {
                c
            } else {
                ' '
            }
        })
        .collect();
    let parts: Vec<f64> = cleaned
        .split_whitespace()
        .map(parse_number_str)
        .collect::<Option<Vec<_>>>()?;

    let magnitude = dms_to_decimal(&parts)?;
    Some(if negative { -magnitude.abs() } else { magnitude })
}

/// `[d]`, `[d, m]` or `[d, m, s]` to decimal degrees, keeping the sign of `d`.
pub fn dms_to_decimal(parts: &[f64]) -> Option<f64> {
    let (deg, min, sec) = match parts {
        [d] => (*d, 0.0, 0.0),
        [d, m] => (*d, *m, 0.0),
        [d, m, s, ..] => (*d, *m, *s),
        [] => return None,
    };
    let magnitude = deg.abs() + min / 60.0 + sec / 3600.0;
    let decimal = if deg.is_sign_negative() { -magnitude } else { magnitude };
    decimal.is_finite().then_some(decimal)
}

/// Apply a hemisphere reference (`"S"`, `"W"`, `"South"`...) to a coordinate.
pub fn apply_ref(value: f64, reference: Option<&Value>) -> f64 {
    let Some(r) = reference.and_then(value_as_str) else {
        return value;
    };
    match r.trim().chars().next().map(|c| c.to_ascii_uppercase()) {
        Some('S') | Some('W') => -value.abs(),
        Some('N') | Some('E') => value.abs(),
        _ => value,
    }
}

/// Apply `GPSAltitudeRef` (`1` = below sea level) to an altitude.
pub fn apply_altitude_ref(altitude: f64, reference: Option<&Value>) -> f64 {
    let below = match reference {
        Some(Value::String(s)) => {
            let s = s.trim().to_lowercase();
            s == "1" || s.contains("below")
        }
        Some(v) => value_as_f64(v) == Some(1.0),
        None => false,
    };
    if below {
        -altitude.abs()
    } else {
        altitude
    }
}

/// Read the drone position from a `"GPS"` block, falling back to DJI XMP fields.
///
/// A pair that cannot be a real location (the (0, 0) pair or out of range)
/// counts as absent, so the XMP fields are still consulted. [`CorruptPosition`]
/// is returned only when no source yields a valid point; `Ok(None)` when no
/// coordinates exist at all.
pub fn position_from_metadata(
    gps: Option<&Map<String, Value>>,
    xmp: Option<&Map<String, Value>>,
) -> Result<Option<GeoPoint>, CorruptPosition> {
    let from_gps = gps.and_then(|g| {
        let lat = parse_coordinate(g.get("GPSLatitude")?)?;
        let lon = parse_coordinate(g.get("GPSLongitude")?)?;
        Some((
            apply_ref(lat, g.get("GPSLatitudeRef")),
            apply_ref(lon, g.get("GPSLongitudeRef")),
        ))
    });

    let from_xmp = xmp.and_then(|x| {
        let lat = x.get("GpsLatitude").or_else(|| x.get("Latitude"))?;
        let lon = x
            .get("GpsLongitude")
            .or_else(|| x.get("GpsLongtitude"))
            .or_else(|| x.get("Longitude"))?;
        Some((parse_coordinate(lat)?, parse_coordinate(lon)?))
    });

    let mut corrupt = None;
    for (source, candidate) in [("GPS", from_gps), ("XMP", from_xmp)] {
        let Some((lat, lon)) = candidate else {
            continue;
        };
        match GeoPoint::new(lat, lon) {
            Some(point) => {
                if let Some(CorruptPosition { latitude, longitude }) = corrupt {
                    warn!("Ignoring corrupt GPS position ({}, {}), using {} position", latitude, longitude, source);
                }
                return Ok(Some(point));
            }
            None => {
                debug!("{} position ({}, {}) is not a real location", source, lat, lon);
                corrupt.get_or_insert(CorruptPosition { latitude: lat, longitude: lon });
            }
        }
    }

    match corrupt {
        Some(position) => Err(position),
        None => Ok(None),
    }
}

/// Coordinates were present but cannot describe a real position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CorruptPosition {
    pub latitude: f64,
    pub longitude: f64,
}
