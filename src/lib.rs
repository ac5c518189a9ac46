//! drone_gsd - ground sample distance from drone photo metadata
//!
//! Reconciles EXIF/XMP/GPS metadata from several extraction backends into a
//! calibration record, estimates camera-to-subject distance with a tiered
//! geometric model and converts it to centimetres per pixel.
//! The optional `exiftool` binary is shelled out to; everything else is in-process.

pub mod backends;
pub mod calibration;
pub mod camera_db;
pub mod config;
pub mod container;
pub mod diagnostics;
pub mod distance;
pub mod error;
pub mod exiftool;
pub mod geo;
pub mod gsd;
pub mod metadata;
pub mod pipeline;
pub mod resolver;
pub mod tiff;
pub mod xmp;

pub use calibration::{CalibrationRecord, ConfidenceLevel, MandatoryField, Telemetry};
pub use camera_db::{CameraSpec, CAMERA_DATABASE};
pub use config::ResolverConfig;
pub use diagnostics::Diagnostics;
pub use distance::{best_available, DistanceResolution, DistanceTier, TargetLocation, TierFailure};
pub use error::{CalibError, Result};
pub use gsd::{compute_gsd, GroundSampling};
pub use metadata::{BackendKind, ExtractionOrchestrator, MetadataSource, RawMetadataMap};
pub use pipeline::{calibrate_batch, calibrate_image, Calibrator, GsdReport};
pub use resolver::CameraParameterResolver;
