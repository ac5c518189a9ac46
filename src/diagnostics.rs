//! Per-field trace of what each stage found, missed or substituted.
//!
//! Intended for operator troubleshooting. Every entry is also emitted as a
//! `tracing` event so a `RUST_LOG=debug` run shows the same story.

use serde::Serialize;
use std::fmt;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Extraction,
    Camera,
    Database,
    Telemetry,
    Distance,
    Gsd,
    Confidence,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Extraction => "extraction",
            Stage::Camera => "camera",
            Stage::Database => "database",
            Stage::Telemetry => "telemetry",
            Stage::Distance => "distance",
            Stage::Gsd => "gsd",
            Stage::Confidence => "confidence",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldStatus {
    Found,
    Missing,
    Substituted,
    Rejected,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TraceEntry {
    pub stage: Stage,
    pub field: String,
    pub status: FieldStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Diagnostics {
    entries: Vec<TraceEntry>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(
        &mut self,
        stage: Stage,
        field: impl Into<String>,
        status: FieldStatus,
        detail: Option<String>,
    ) {
        let field = field.into();
        debug!(%stage, field = %field, ?status, detail = detail.as_deref().unwrap_or(""), "trace");
        self.entries.push(TraceEntry { stage, field, status, detail });
    }

    pub fn found(&mut self, stage: Stage, field: impl Into<String>, detail: impl Into<String>) {
        self.record(stage, field, FieldStatus::Found, Some(detail.into()));
    }

    pub fn missing(&mut self, stage: Stage, field: impl Into<String>) {
        self.record(stage, field, FieldStatus::Missing, None);
    }

    pub fn substituted(&mut self, stage: Stage, field: impl Into<String>, detail: impl Into<String>) {
        self.record(stage, field, FieldStatus::Substituted, Some(detail.into()));
    }

    pub fn rejected(&mut self, stage: Stage, field: impl Into<String>, detail: impl Into<String>) {
        self.record(stage, field, FieldStatus::Rejected, Some(detail.into()));
    }

    pub fn failed(&mut self, stage: Stage, field: impl Into<String>, detail: impl Into<String>) {
        self.record(stage, field, FieldStatus::Failed, Some(detail.into()));
    }

    pub fn entries(&self) -> &[TraceEntry] {
        &self.entries
    }

    pub fn with_status(&self, status: FieldStatus) -> impl Iterator<Item = &TraceEntry> {
        self.entries.iter().filter(move |e| e.status == status)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
