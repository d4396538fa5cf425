//! Telemetry samples as extracted from the GPMF track,
//! still on the raw device clock.

mod extractor;

pub use extractor::{extract, ExtractorParams};

use std::fmt;

use time::OffsetDateTime;

use crate::{gpmf::GpsStreamKind, Warning};

/// Originating stream: telemetry track and GPMF device.
/// Dual lens cameras may deliver one stream per lens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StreamId {
    /// Position of the `trak` in `moov`.
    pub track: usize,
    /// GPMF `DVID`.
    pub device: u32,
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "trak{}/dev{}", self.track, self.device)
    }
}

/// GPS fix quality (`GPSF`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FixQuality {
    NoFix,
    TwoD,
    ThreeD,
}

impl FixQuality {
    /// Absent `GPSF` (very old firmware) is taken as a 3D fix.
    pub fn from_gpsf(value: Option<u32>) -> Self {
        match value {
            Some(0) | Some(1) => Self::NoFix,
            Some(2) => Self::TwoD,
            _ => Self::ThreeD,
        }
    }

    pub fn to_gpsf(&self) -> u32 {
        match self {
            Self::NoFix => 0,
            Self::TwoD => 2,
            Self::ThreeD => 3,
        }
    }
}

/// Single GPS fix.
#[derive(Debug, Clone, PartialEq)]
pub struct GpsFix {
    pub latitude: f64,
    pub longitude: f64,
    /// Metres.
    pub altitude: f64,
    /// m/s
    pub speed_2d: f64,
    /// m/s
    pub speed_3d: f64,
    /// Fix timestamp, if the receiver reported one for this row.
    pub time: Option<OffsetDateTime>,
    pub quality: FixQuality,
    /// Dilution of precision.
    pub dop: Option<f64>,
    /// Set when lens streams disagree.
    pub stream_tag: Option<StreamId>,
}

impl GpsFix {
    /// Fix usable as a clock anchor or track point.
    pub fn is_valid(&self, max_dop: f64) -> bool {
        self.quality >= FixQuality::TwoD
            && self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0 ..= 90.0).contains(&self.latitude)
            && (-180.0 ..= 180.0).contains(&self.longitude)
            && !(self.latitude == 0.0 && self.longitude == 0.0)
            && self.dop.map(|d| d <= max_dop).unwrap_or(true)
    }
}

/// Camera orientation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Orientation {
    /// Unit quaternion (w, x, y, z).
    Quaternion([f64; 4]),
    /// Radians.
    Euler { roll: f64, pitch: f64, yaw: f64 },
}

impl Orientation {
    /// As quaternion (w, x, y, z).
    pub fn quaternion(&self) -> [f64; 4] {
        match *self {
            Self::Quaternion(q) => q,
            Self::Euler { roll, pitch, yaw } => {
                let (sr, cr) = (roll / 2.0).sin_cos();
                let (sp, cp) = (pitch / 2.0).sin_cos();
                let (sy, cy) = (yaw / 2.0).sin_cos();
                [
                    cr * cp * cy + sr * sp * sy,
                    sr * cp * cy - cr * sp * sy,
                    cr * sp * cy + sr * cp * sy,
                    cr * cp * sy - sr * sp * cy,
                ]
            }
        }
    }
}

/// One telemetry sample on the raw device clock.
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetrySample {
    /// Position in the merged sequence, strictly increasing.
    pub index: usize,
    /// Device clock in seconds. Monotonic within a chapter.
    pub device_time: f64,
    pub gps: Option<GpsFix>,
    pub orientation: Option<Orientation>,
    pub stream: StreamId,
    /// Index of the source GPMF payload (track sample).
    pub payload: usize,
}

/// Time scale and per-payload durations of the source telemetry track.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PayloadLayout {
    pub time_scale: u32,
    pub durations: Vec<u32>,
}

/// Extraction result.
#[derive(Debug, Clone)]
pub struct Telemetry {
    pub samples: Vec<TelemetrySample>,
    pub warnings: Vec<Warning>,
    pub layout: PayloadLayout,
    pub gps_kind: GpsStreamKind,
    /// Container (`mvhd`) duration in seconds.
    pub container_duration: f64,
    /// Nominal video frame rate.
    pub frame_rate: Option<f64>,
    /// Number of distinct streams merged.
    pub streams: usize,
}
