//! Raw Metadata Extraction
//!
//! Every backend reduces one image file to a [`RawMetadataMap`]: a flat
//! key/value map plus two reserved nested maps, `"GPS"` and `"XMP"`.
//!
//! ## Backend Priority
//!
//! 1. **ExifTool** (primary) - external binary, JSON output, broadest tag coverage
//! 2. **Image library** - decoded dimensions, primary IFD, three-tier XMP lookup
//! 3. **Tag reader** - kamadak-exif field walk with thumbnail IFD excluded
//! 4. **IFD sections** - named-section loader with a static tag table
//!
//! The first backend returning a non-empty map wins. Because only the
//! image-library path reliably reads DJI-style XMP packets, it is then run
//! again as a supplement whenever the winner lacks an `"XMP"` or `"GPS"`
//! block; supplemental keys never overwrite keys the winner already produced.
//!
//! ## Example
//!
//! ```rust,ignore
//! use drone_gsd::metadata::ExtractionOrchestrator;
//!
//! let orchestrator = ExtractionOrchestrator::from_config(&ResolverConfig::default());
//! let extracted = orchestrator.extract(Path::new("DJI_0001.JPG"), &mut diagnostics)?;
//! println!("Backend: {}", extracted.source_tag());
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::backends;
use crate::config::ResolverConfig;
use crate::diagnostics::{Diagnostics, Stage};
use crate::error::{CalibError, Result};

pub const GPS_KEY: &str = "GPS";
pub const XMP_KEY: &str = "XMP";

// ============================================================================
// Raw Metadata Map
// ============================================================================

/// Flat key/value metadata with reserved `"GPS"` and `"XMP"` sub-maps.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawMetadataMap {
    entries: Map<String, Value>,
}

impl RawMetadataMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(entries: Map<String, Value>) -> Self {
        Self { entries }
    }

    /// True when neither the flat map nor any sub-map holds a value.
    pub fn is_empty(&self) -> bool {
        self.entries.iter().all(|(_, v)| match v {
            Value::Object(m) => m.is_empty(),
            Value::Null => true,
            _ => false,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.entries.keys()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.entries.insert(key.into(), value)
    }

    /// Insert unless the key is already present. Returns true when inserted.
    pub fn insert_if_absent(&mut self, key: impl Into<String>, value: Value) -> bool {
        let key = key.into();
        if self.entries.contains_key(&key) {
            return false;
        }
        self.entries.insert(key, value);
        true
    }

    pub fn sub_map(&self, name: &str) -> Option<&Map<String, Value>> {
        self.entries.get(name).and_then(|v| v.as_object())
    }

    /// Mutable access to a nested map, creating it when absent.
    pub fn sub_map_mut(&mut self, name: &str) -> &mut Map<String, Value> {
        let slot = self
            .entries
            .entry(name.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !slot.is_object() {
            *slot = Value::Object(Map::new());
        }
        match slot {
            Value::Object(map) => map,
            _ => unreachable!("slot was just made an object"),
        }
    }

    pub fn gps(&self) -> Option<&Map<String, Value>> {
        self.sub_map(GPS_KEY)
    }

    pub fn xmp(&self) -> Option<&Map<String, Value>> {
        self.sub_map(XMP_KEY)
    }

    pub fn has_gps(&self) -> bool {
        self.gps().is_some_and(|m| !m.is_empty())
    }

    pub fn has_xmp(&self) -> bool {
        self.xmp().is_some_and(|m| !m.is_empty())
    }

    /// Drop empty nested maps so they do not masquerade as data.
    pub fn prune_empty(&mut self) {
        self.entries
            .retain(|_, v| !matches!(v, Value::Object(m) if m.is_empty()) && !v.is_null());
    }

    pub fn into_inner(self) -> Map<String, Value> {
        self.entries
    }
}

/// Merge `supplement` into `primary`, adding only top-level keys `primary` lacks.
///
/// Existing primary values, including whole `"XMP"`/`"GPS"` blocks, are never
/// overwritten. Returns the keys that were added.
pub fn merge_supplement(primary: &mut RawMetadataMap, supplement: RawMetadataMap) -> Vec<String> {
    let mut added = Vec::new();
    for (key, value) in supplement.into_inner() {
        if primary.insert_if_absent(key.clone(), value) {
            added.push(key);
        }
    }
    added
}

// ============================================================================
// Value Coercion
// ============================================================================

/// Numeric view of a metadata value.
///
/// Accepts JSON numbers, decimal strings (`"+85.20"`), rational strings
/// (`"88/10"`), unit-suffixed strings (`"8.8 mm"`) and single-element arrays.
pub fn value_as_f64(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => parse_number_str(s),
        Value::Array(items) if items.len() == 1 => value_as_f64(&items[0]),
        _ => None,
    }?;
    n.is_finite().then_some(n)
}

/// Parse a decimal or `numerator/denominator` string, ignoring a unit suffix.
pub fn parse_number_str(s: &str) -> Option<f64> {
    let token = s.trim_matches(|c: char| c == '\0' || c.is_whitespace());
    let token = token.split_whitespace().next()?;
    let token = token.trim_end_matches(|c: char| c.is_ascii_alphabetic());

    if let Some((num, den)) = token.split_once('/') {
        let num: f64 = num.trim().parse().ok()?;
        let den: f64 = den.trim().parse().ok()?;
        if den == 0.0 {
            return None;
        }
        return Some(num / den);
    }
    let n: f64 = token.parse().ok()?;
    n.is_finite().then_some(n)
}

/// String view of a metadata value, with NUL padding and whitespace trimmed.
pub fn value_as_str(value: &Value) -> Option<String> {
    let s = match value {
        Value::String(s) => s.trim_matches(|c: char| c == '\0' || c.is_whitespace()).to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(items) if items.len() == 1 => return value_as_str(&items[0]),
        _ => return None,
    };
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

// ============================================================================
// Backends
// ============================================================================

/// Metadata extraction backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// ExifTool subprocess
    ExifTool,
    /// `image` decoder + primary IFD + XMP packet search
    ImageLibrary,
    /// kamadak-exif field walk
    TagReader,
    /// Named-section IFD loader
    IfdSections,
}

impl BackendKind {
    pub const PRIORITY: [BackendKind; 4] = [
        BackendKind::ExifTool,
        BackendKind::ImageLibrary,
        BackendKind::TagReader,
        BackendKind::IfdSections,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::ExifTool => "exiftool",
            BackendKind::ImageLibrary => "image_library",
            BackendKind::TagReader => "tag_reader",
            BackendKind::IfdSections => "ifd_sections",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a backend produced nothing. Always recovered by trying the next one.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum BackendError {
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("backend returned no metadata")]
    Empty,

    #[error("backend failed: {0}")]
    Failed(String),

    #[error("backend timed out after {0:?}")]
    Timeout(Duration),
}

/// One metadata extraction strategy.
pub trait MetadataSource: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Produce a non-empty map or an error; an empty map is never a success.
    fn extract(&self, path: &Path) -> std::result::Result<RawMetadataMap, BackendError>;
}

// ============================================================================
// Orchestrator
// ============================================================================

/// Outcome of one backend attempt, kept for reporting.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackendAttempt {
    pub backend: BackendKind,
    pub succeeded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Merged metadata plus the provenance of every key block.
#[derive(Debug, Clone, Serialize)]
pub struct ExtractedMetadata {
    pub map: RawMetadataMap,
    pub primary: BackendKind,
    pub supplement: Option<BackendKind>,
    pub supplemented_keys: Vec<String>,
    pub attempts: Vec<BackendAttempt>,
}

impl ExtractedMetadata {
    /// `"exiftool"`, or `"exiftool+image_library"` when the supplement contributed.
    pub fn source_tag(&self) -> String {
        match self.supplement {
            Some(kind) if !self.supplemented_keys.is_empty() => format!("{}+{}", self.primary, kind),
            _ => self.primary.to_string(),
        }
    }
}

pub struct ExtractionOrchestrator {
    backends: Vec<Box<dyn MetadataSource>>,
    supplement: Option<Box<dyn MetadataSource>>,
}

impl ExtractionOrchestrator {
    pub fn new(
        backends: Vec<Box<dyn MetadataSource>>,
        supplement: Option<Box<dyn MetadataSource>>,
    ) -> Self {
        Self { backends, supplement }
    }

    pub fn from_config(config: &ResolverConfig) -> Self {
        let backends = config
            .backends
            .iter()
            .map(|kind| backends::build(*kind, config))
            .collect();
        let supplement = config
            .supplement
            .then(|| backends::build(BackendKind::ImageLibrary, config));
        Self::new(backends, supplement)
    }

    /// Try backends in priority order, then backfill XMP/GPS from the supplement.
    pub fn extract(&self, path: &Path, diagnostics: &mut Diagnostics) -> Result<ExtractedMetadata> {
        let mut attempts = Vec::new();
        let mut winner = None;

        for backend in &self.backends {
            let kind = backend.kind();
            match backend.extract(path) {
                Ok(map) if !map.is_empty() => {
                    debug!("{} produced {} keys", kind, map.len());
                    attempts.push(BackendAttempt { backend: kind, succeeded: true, error: None });
                    winner = Some((kind, map));
                    break;
                }
                Ok(_) => {
                    debug!("{} returned an empty map", kind);
                    attempts.push(BackendAttempt {
                        backend: kind,
                        succeeded: false,
                        error: Some(BackendError::Empty.to_string()),
                    });
                }
                Err(e) => {
                    debug!("{} failed: {}", kind, e);
                    attempts.push(BackendAttempt {
                        backend: kind,
                        succeeded: false,
                        error: Some(e.to_string()),
                    });
                }
            }
        }

        for attempt in &attempts {
            match &attempt.error {
                None => diagnostics.found(Stage::Extraction, attempt.backend.as_str(), "primary"),
                Some(e) => diagnostics.failed(Stage::Extraction, attempt.backend.as_str(), e.clone()),
            }
        }

        let Some((primary, mut map)) = winner else {
            return Err(CalibError::NoMetadata {
                attempts: attempts
                    .iter()
                    .map(|a| format!("{}: {}", a.backend, a.error.as_deref().unwrap_or("ok")))
                    .collect(),
            });
        };
        info!("Metadata for {} extracted with {}", path.display(), primary);

        let mut supplemented_keys = Vec::new();
        let mut supplement_kind = None;

        if let Some(supplement) = &self.supplement {
            let needs_backfill = !map.has_xmp() || !map.has_gps();
            if needs_backfill && supplement.kind() != primary {
                supplement_kind = Some(supplement.kind());
                match supplement.extract(path) {
                    Ok(extra) => {
                        supplemented_keys = merge_supplement(&mut map, extra);
                        for key in &supplemented_keys {
                            diagnostics.substituted(Stage::Extraction, key.clone(), supplement.kind().as_str());
                        }
                    }
                    Err(e) => {
                        warn!("Supplementary {} pass failed: {}", supplement.kind(), e);
                        diagnostics.failed(Stage::Extraction, supplement.kind().as_str(), e.to_string());
                    }
                }
            }
        }

        for block in [XMP_KEY, GPS_KEY] {
            if map.sub_map(block).is_some_and(|m| !m.is_empty()) {
                diagnostics.found(Stage::Extraction, block, "present");
            } else {
                diagnostics.missing(Stage::Extraction, block);
            }
        }

        Ok(ExtractedMetadata {
            map,
            primary,
            supplement: supplement_kind,
            supplemented_keys,
            attempts,
        })
    }
}
