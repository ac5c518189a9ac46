//! End-to-end calibration of one image or a batch.
//!
//! ```text
//! path ─▶ ExtractionOrchestrator ─▶ CameraParameterResolver ─▶ CalibrationRecord
//!                                                             │
//!           target location (optional) ─▶ distance tiers ─────┴─▶ GSD
//! ```

use rayon::prelude::*;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::backends;
use crate::calibration::{CalibrationRecord, ConfidenceLevel, DowngradeReason};
use crate::config::ResolverConfig;
use crate::diagnostics::{Diagnostics, FieldStatus, Stage};
use crate::distance::{self, DistanceInputs, DistanceResolution, DistanceTier, TargetLocation};
use crate::error::{CalibError, Result};
use crate::gsd::GroundSampling;
use crate::metadata::{BackendAttempt, ExtractionOrchestrator};

/// Data-source suffix marking a distance from the 45° assumption.
pub const FIXED_ANGLE_SOURCE: &str = "fixed_angle";

/// Everything resolved for one image.
#[derive(Debug, Clone, Serialize)]
pub struct GsdReport {
    pub path: PathBuf,
    pub record: CalibrationRecord,
    pub distance: DistanceResolution,
    /// Absent when no distance tier succeeded
    pub sampling: Option<GroundSampling>,
    pub confidence: ConfidenceLevel,
    pub backends: Vec<BackendAttempt>,
    pub supplemented_keys: Vec<String>,
    pub diagnostics: Diagnostics,
}

impl GsdReport {
    pub fn gsd_cm_per_px(&self) -> Option<f64> {
        self.sampling.map(|s| s.gsd_cm_per_px)
    }

    pub fn distance_m(&self) -> Option<f64> {
        self.distance.distance_m()
    }
}

/// Reusable pipeline; one orchestrator shared by every image.
pub struct Calibrator {
    orchestrator: ExtractionOrchestrator,
}

impl Calibrator {
    pub fn new(config: &ResolverConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::with_orchestrator(ExtractionOrchestrator::from_config(config)))
    }

    pub fn with_orchestrator(orchestrator: ExtractionOrchestrator) -> Self {
        Self { orchestrator }
    }

    pub fn calibrate(&self, path: &Path, target: Option<&TargetLocation>) -> Result<GsdReport> {
        let mut diagnostics = Diagnostics::new();
        self.calibrate_traced(path, target, &mut diagnostics).inspect_err(|e| {
            warn!("{}: calibration failed: {}", path.display(), e);
            for entry in diagnostics
                .entries()
                .iter()
                .filter(|entry| matches!(entry.status, FieldStatus::Missing | FieldStatus::Rejected | FieldStatus::Failed))
            {
                warn!(
                    "   {:?} {} {:?}: {}",
                    entry.stage,
                    entry.field,
                    entry.status,
                    entry.detail.as_deref().unwrap_or("-")
                );
            }
        })
    }

    /// Like [`Calibrator::calibrate`], recording into a caller-owned trace that
    /// stays available when calibration fails.
    pub fn calibrate_traced(
        &self,
        path: &Path,
        target: Option<&TargetLocation>,
        diagnostics: &mut Diagnostics,
    ) -> Result<GsdReport> {
        if !path.is_file() {
            return Err(CalibError::InvalidInput(format!("not a file: {}", path.display())));
        }

        let extracted = self.orchestrator.extract(path, diagnostics)?;
        let decoded = backends::decoded_dimensions(path);

        let mut record = crate::resolver::CameraParameterResolver::new(&extracted.map)
            .resolve(decoded, &extracted.source_tag(), diagnostics)?;

        let inputs = DistanceInputs::from(record.telemetry());
        let distance = distance::best_available(&inputs, target);
        for attempt in &distance.attempts {
            let field = attempt.tier.to_string();
            match (attempt.distance_m, attempt.failure) {
                (Some(d), _) => diagnostics.found(Stage::Distance, field, format!("{:.3} m", d)),
                (None, Some(failure)) => diagnostics.failed(Stage::Distance, field, failure.to_string()),
                (None, None) => diagnostics.missing(Stage::Distance, field),
            }
        }

        if distance.tier() == Some(DistanceTier::FixedAngle) {
            record = record.with_downgrade(DowngradeReason::FixedAngleAssumption, FIXED_ANGLE_SOURCE);
            diagnostics.substituted(
                Stage::Confidence,
                "confidence",
                format!("MEDIUM ({:?})", DowngradeReason::FixedAngleAssumption),
            );
        }

        let sampling = distance
            .distance_m()
            .map(|d| GroundSampling::from_record(&record, d))
            .transpose()?;
        match &sampling {
            Some(s) => {
                diagnostics.found(Stage::Gsd, "gsd_cm_per_px", format!("{:.4}", s.gsd_cm_per_px));
                info!(
                    "{}: GSD {:.4} cm/px at {:.2} m ({})",
                    path.display(),
                    s.gsd_cm_per_px,
                    s.distance_m,
                    record.confidence()
                );
            }
            None => {
                diagnostics.failed(Stage::Gsd, "gsd_cm_per_px", "distance unavailable");
                warn!("{}: distance unavailable, no GSD", path.display());
            }
        }

        Ok(GsdReport {
            path: path.to_path_buf(),
            confidence: record.confidence(),
            record,
            distance,
            sampling,
            backends: extracted.attempts,
            supplemented_keys: extracted.supplemented_keys,
            diagnostics: diagnostics.clone(),
        })
    }
}

/// Calibrate one image with a fresh pipeline.
pub fn calibrate_image(path: &Path, target: Option<&TargetLocation>, config: &ResolverConfig) -> Result<GsdReport> {
    Calibrator::new(config)?.calibrate(path, target)
}

/// Calibrate many images in parallel. Results keep input order.
pub fn calibrate_batch(
    paths: &[PathBuf],
    target: Option<&TargetLocation>,
    config: &ResolverConfig,
) -> Result<Vec<(PathBuf, Result<GsdReport>)>> {
    let calibrator = Calibrator::new(config)?;
    Ok(paths
        .par_iter()
        .map(|path| (path.clone(), calibrator.calibrate(path, target)))
        .collect())
}
