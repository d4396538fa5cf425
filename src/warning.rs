//! Non-fatal findings attached to an asset's result.

use std::fmt;

use serde::Serialize;

/// Non-fatal finding. An asset with warnings is a partial success.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Warning {
    /// Malformed GPMF records skipped during extraction.
    SkippedRecords { count: usize },
    /// Lens streams disagree on fix time.
    StreamDisagreement { payloads: usize, max_seconds: f64 },
    /// GPS fixes failing quality checks.
    InvalidFixes { count: usize },
    /// Samples outside the extrapolation margin, flagged invalid.
    ExtrapolationExceeded { count: usize },
    /// Samples clamped to keep corrected time non-decreasing.
    ClampedTimestamps { count: usize },
    /// Corrected span differs from container duration.
    DurationMismatch { timeline: f64, container: f64 },
    /// Sample left out of the re-encoded telemetry track.
    SampleNotEncodable { index: usize, reason: String },
    /// Duplicate timestamps dropped from the GPX track.
    DuplicateTrackPoints { count: usize },
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Warning::SkippedRecords { count } => write!(f, "skipped {count} malformed telemetry records"),
            Warning::StreamDisagreement { payloads, max_seconds } => write!(f, "lens streams disagree in {payloads} payloads (max {max_seconds:.3}s)"),
            Warning::InvalidFixes { count } => write!(f, "{count} GPS fixes failed quality checks"),
            Warning::ExtrapolationExceeded { count } => write!(f, "{count} samples beyond extrapolation margin flagged invalid"),
            Warning::ClampedTimestamps { count } => write!(f, "{count} corrected timestamps clamped"),
            Warning::DurationMismatch { timeline, container } => write!(f, "corrected span {timeline:.3}s, container duration {container:.3}s"),
            Warning::SampleNotEncodable { index, reason } => write!(f, "sample {index} not encodable: {reason}"),
            Warning::DuplicateTrackPoints { count } => write!(f, "dropped {count} duplicate track points"),
        }
    }
}
