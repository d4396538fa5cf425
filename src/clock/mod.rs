//! Device clock to UTC reconciliation.
//!
//! The device clock (`STMP`) is monotonic within a chapter only.
//! GPS fix times are sparse (one per payload for `GPS5`) and
//! may be missing entirely while the receiver has no fix.
//! `reconcile()` derives a per-chapter linear correction anchored
//! on valid fixes and applies it to every sample.

mod reconciler;

pub use reconciler::{reconcile, ReconcilerParams};

use std::ops::Range;

use time::OffsetDateTime;

use crate::{
    gpmf::GpsStreamKind,
    support::{from_unix_seconds, to_unix_seconds},
    telemetry::{PayloadLayout, TelemetrySample},
    Warning,
};

/// Linear clock model for a contiguous run of samples:
/// `utc = offset + drift * device_time`.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    /// Sample index range.
    pub range: Range<usize>,
    /// Unix seconds.
    pub offset: f64,
    /// Ratio of UTC seconds to device seconds.
    pub drift: f64,
    /// Number of fixes the segment is anchored on.
    pub anchors: usize,
}

impl Segment {
    /// Unix seconds for device time `t`.
    pub fn map(&self, t: f64) -> f64 {
        self.offset + self.drift * t
    }
}

/// Per-chapter corrections. Segment boundaries
/// are device clock resets or gaps.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClockCorrection {
    pub segments: Vec<Segment>,
}

impl ClockCorrection {
    /// Segment holding sample `index`.
    pub fn segment_of(&self, index: usize) -> Option<&Segment> {
        self.segments.iter().find(|s| s.range.contains(&index))
    }

    /// Number of chapter breakpoints.
    pub fn breakpoints(&self) -> usize {
        self.segments.len().saturating_sub(1)
    }
}

/// Telemetry sample on the corrected clock.
#[derive(Debug, Clone, PartialEq)]
pub struct CorrectedSample {
    pub sample: TelemetrySample,
    /// Corrected UTC.
    pub time: OffsetDateTime,
    /// `false` if the sample lies beyond the extrapolation margin.
    /// Its time is then clamped to the edge of the margin.
    pub valid: bool,
    /// Carries a GPS fix passing quality checks.
    pub fix_valid: bool,
}

impl CorrectedSample {
    /// Valid timing and a usable GPS fix.
    pub fn is_geo(&self) -> bool {
        self.valid && self.fix_valid && self.sample.gps.is_some()
    }
}

/// Reconciliation result. Read-only input for the rewriter,
/// the muxer and the GPX exporter.
#[derive(Debug, Clone)]
pub struct CorrectedTimeline {
    /// Non-decreasing in `time`.
    pub samples: Vec<CorrectedSample>,
    pub correction: ClockCorrection,
    pub warnings: Vec<Warning>,
    pub gps_kind: GpsStreamKind,
    /// Cadence of the source telemetry track.
    pub layout: PayloadLayout,
    /// Container (`mvhd`) duration in seconds.
    pub container_duration: f64,
}

impl CorrectedTimeline {
    /// Corrected time of the first sample.
    pub fn start(&self) -> Option<OffsetDateTime> {
        self.samples.first().map(|s| s.time)
    }

    /// Corrected time of the last sample.
    pub fn end(&self) -> Option<OffsetDateTime> {
        self.samples.last().map(|s| s.time)
    }

    /// Seconds between first and last sample.
    pub fn span_secs(&self) -> f64 {
        match (self.start(), self.end()) {
            (Some(s), Some(e)) => to_unix_seconds(e) - to_unix_seconds(s),
            _ => 0.0,
        }
    }

    /// GPS-bearing samples with valid timing and fix.
    pub fn geo_samples(&self) -> impl Iterator<Item = &CorrectedSample> {
        self.samples.iter().filter(|s| s.is_geo())
    }

    /// Seconds since timeline start for `time`.
    pub fn seconds_since_start(&self, time: OffsetDateTime) -> f64 {
        match self.start() {
            Some(s) => to_unix_seconds(time) - to_unix_seconds(s),
            None => 0.0,
        }
    }
}

/// Unix seconds to datetime, falling back to `fallback`
/// for values outside the representable range.
pub(crate) fn to_datetime(seconds: f64, fallback: OffsetDateTime) -> OffsetDateTime {
    from_unix_seconds(seconds).unwrap_or(fallback)
}
