//! Curated drone camera database.
//!
//! Used when an image does not carry its own sensor size or focal length.
//! Entries are keyed by the model code the camera writes into EXIF `Model`
//! (`FC6310`, `L1D-20c`, ...).
//!
//! ## Lookup order
//!
//! 1. Exact key match
//! 2. Case-insensitive substring match, either direction, against key or name
//! 3. Pixel resolution (1 % per axis) and focal length (0.5 mm), only when no
//!    model identifier exists at all

use serde::Serialize;
use tracing::debug;

/// Relative tolerance on each resolution axis.
pub const RESOLUTION_TOLERANCE: f64 = 0.01;

/// Absolute focal length tolerance in millimetres.
pub const FOCAL_TOLERANCE_MM: f64 = 0.5;

/// Shortest model string allowed to match as a substring of a key or name.
const MIN_FUZZY_LEN: usize = 3;

/// Physical camera parameters for one model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CameraSpec {
    pub key: &'static str,
    pub name: &'static str,
    pub sensor_width_mm: f64,
    pub sensor_height_mm: f64,
    pub focal_length_mm: f64,
    pub resolution: (u32, u32),
    pub pixel_pitch_um: f64,
}

macro_rules! camera {
    ($key:expr, $name:expr, $sw:expr, $sh:expr, $f:expr, ($w:expr, $h:expr), $pitch:expr) => {
        CameraSpec {
            key: $key,
            name: $name,
            sensor_width_mm: $sw,
            sensor_height_mm: $sh,
            focal_length_mm: $f,
            resolution: ($w, $h),
            pixel_pitch_um: $pitch,
        }
    };
}

pub static CAMERA_DATABASE: &[CameraSpec] = &[
    camera!("FC6310", "Phantom 4 Pro", 13.2, 8.8, 8.8, (5472, 3648), 2.41),
    camera!("FC6310S", "Phantom 4 Pro V2", 13.2, 8.8, 8.8, (5472, 3648), 2.41),
    camera!("FC330", "Phantom 4", 6.17, 4.55, 3.61, (4000, 3000), 1.54),
    camera!("FC220", "Mavic Pro", 6.17, 4.55, 4.73, (4000, 3000), 1.54),
    camera!("L1D-20c", "Mavic 2 Pro", 13.2, 8.8, 10.26, (5472, 3648), 2.41),
    camera!("FC3170", "Mavic Air 2", 6.4, 4.8, 4.49, (8000, 6000), 0.8),
    camera!("FC7303", "Mini 2", 6.17, 4.55, 4.49, (4000, 3000), 1.54),
    camera!("FC7203", "Mavic Mini", 6.17, 4.55, 4.49, (4000, 3000), 1.54),
    camera!("FC2204", "Mavic 2 Zoom", 6.17, 4.55, 4.38, (4000, 3000), 1.54),
    camera!("FC3582", "Mini 3 Pro", 9.6, 7.2, 6.72, (8064, 6048), 1.19),
    camera!("FC3411", "Air 2S", 13.2, 8.8, 8.38, (5472, 3648), 2.41),
    camera!("FC6520", "Zenmuse X5S", 17.3, 13.0, 15.0, (5280, 3956), 3.28),
    camera!("FC6540", "Zenmuse X7", 23.5, 15.7, 24.0, (6016, 4008), 3.91),
    camera!("ZenmuseP1", "Zenmuse P1", 35.9, 24.0, 35.0, (8192, 5460), 4.38),
    camera!("M3E", "Mavic 3 Enterprise", 17.3, 13.0, 12.29, (5280, 3956), 3.28),
    camera!("L2D-20c", "Mavic 3", 17.3, 13.0, 12.29, (5280, 3956), 3.28),
];

/// How a database entry was selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    Exact,
    Fuzzy,
    ResolutionAndFocal,
    ResolutionOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CameraMatch {
    pub spec: &'static CameraSpec,
    pub kind: MatchKind,
}

pub fn lookup_exact(model: &str) -> Option<&'static CameraSpec> {
    let model = model.trim();
    CAMERA_DATABASE.iter().find(|spec| spec.key == model)
}

/// Case-insensitive substring match in either direction, longest overlap first.
///
/// `"DJI FC2204X"` contains both `FC220` and `FC2204`; the longer key wins.
/// Ties go to the entry whose key or name equals the model, then table order.
pub fn lookup_fuzzy(model: &str) -> Option<&'static CameraSpec> {
    let needle = model.trim().to_lowercase();
    if needle.is_empty() {
        return None;
    }

    let mut best: Option<(&'static CameraSpec, (bool, usize))> = None;
    for spec in CAMERA_DATABASE {
        let Some(score) = [spec.key, spec.name]
            .iter()
            .filter_map(|candidate| fuzzy_score(&needle, &candidate.to_lowercase()))
            .max()
        else {
            continue;
        };
        if best.map_or(true, |(_, current)| score > current) {
            best = Some((spec, score));
        }
    }

    best.map(|(spec, score)| {
        debug!("fuzzy camera match {:?} -> {} (overlap {})", model, spec.key, score.1);
        spec
    })
}

/// `(equal, overlap length)` when one string contains the other.
fn fuzzy_score(needle: &str, candidate: &str) -> Option<(bool, usize)> {
    if needle == candidate {
        return Some((true, candidate.len()));
    }
    if needle.contains(candidate) {
        return Some((false, candidate.len()));
    }
    if needle.len() >= MIN_FUZZY_LEN && candidate.contains(needle) {
        return Some((false, needle.len()));
    }
    None
}

/// Exact, then fuzzy.
pub fn lookup_by_model(model: &str) -> Option<CameraMatch> {
    if let Some(spec) = lookup_exact(model) {
        return Some(CameraMatch { spec, kind: MatchKind::Exact });
    }
    lookup_fuzzy(model).map(|spec| CameraMatch { spec, kind: MatchKind::Fuzzy })
}

/// Match purely on pixel resolution and, when known, focal length.
///
/// Portrait frames are compared with their axes swapped. Entries matching on
/// both resolution and focal length beat resolution-only entries; within a
/// class the first entry in table order wins.
pub fn lookup_by_resolution(width: u32, height: u32, focal_length_mm: Option<f64>) -> Option<CameraMatch> {
    let mut resolution_only = None;

    for spec in CAMERA_DATABASE {
        if !resolution_matches(spec.resolution, (width, height)) {
            continue;
        }
        let focal_matches = focal_length_mm
            .is_some_and(|f| (f - spec.focal_length_mm).abs() <= FOCAL_TOLERANCE_MM);
        if focal_matches {
            return Some(CameraMatch { spec, kind: MatchKind::ResolutionAndFocal });
        }
        if resolution_only.is_none() {
            resolution_only = Some(CameraMatch { spec, kind: MatchKind::ResolutionOnly });
        }
    }

    resolution_only
}

fn resolution_matches(nominal: (u32, u32), actual: (u32, u32)) -> bool {
    let within = |n: u32, a: u32| {
        let n = n as f64;
        (a as f64 - n).abs() <= n * RESOLUTION_TOLERANCE
    };
    let (nw, nh) = nominal;
    let (aw, ah) = actual;
    (within(nw, aw) && within(nh, ah)) || (within(nw, ah) && within(nh, aw))
}
