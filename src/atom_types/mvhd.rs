//! Movie header atom (`mvhd`).
//!
//! Location: `moov/mvhd`
//!
//! See: <https://developer.apple.com/documentation/quicktime-file-format/movie_header_atom>

use binrw::BinRead;
use time::OffsetDateTime;

use crate::support::from_mp4_seconds;

use super::{versioned, TimingLayout};

/// Movie header atom (`mvhd`).
///
/// Location: `moov/mvhd`
///
/// See: <https://developer.apple.com/documentation/quicktime-file-format/movie_header_atom>
#[derive(Debug, Clone, BinRead)]
#[br(big)]
pub struct Mvhd {
    pub(crate) version: u8,
    _flags: [u8; 3],
    /// Seconds since midnight, 1904-01-01 UTC
    #[br(parse_with = versioned, args(version))]
    pub(crate) creation_time: u64,
    /// Seconds since midnight, 1904-01-01 UTC
    #[br(parse_with = versioned, args(version))]
    pub(crate) modification_time: u64,
    /// Number of time units that pass in one second
    pub(crate) time_scale: u32,
    /// Unscaled duration. I.e. "time units"
    /// that require dividing by time scale
    /// to derive a value in seconds.
    ///
    /// Corresponds to the longest track.
    #[br(parse_with = versioned, args(version))]
    pub(crate) duration: u64,
    /// Fixed point number (16.16)
    /// representing preferred play rate
    /// (1.0 = normal playback).
    pub(crate) preferred_rate: u32,
    /// Fixed point number (8.8)
    /// representing preferred volume
    /// (1.0 = full volume).
    pub(crate) preferred_volume: u16,
    _reserved: [u8; 10],
    _matrix: [u8; 36],
    _predefined: [u8; 24],
    pub(crate) next_track_id: u32,
}

impl Mvhd {
    /// Creation time as UTC datetime.
    /// May default to MP4 default time
    /// `1904-01-01 00:00:00` depending on device and settings.
    pub fn creation_time(&self) -> OffsetDateTime {
        from_mp4_seconds(self.creation_time)
    }

    /// Modification time as UTC datetime.
    pub fn modification_time(&self) -> OffsetDateTime {
        from_mp4_seconds(self.modification_time)
    }

    pub fn time_scale(&self) -> u32 {
        self.time_scale
    }

    /// Duration of the longest track in seconds.
    pub fn duration_secs(&self) -> f64 {
        match self.time_scale {
            0 => 0.0,
            ts => self.duration as f64 / ts as f64,
        }
    }

    /// Byte positions of timing fields in data load.
    pub fn layout(&self) -> TimingLayout {
        TimingLayout::mvhd(self.version)
    }
}
