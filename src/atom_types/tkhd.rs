//! Track header atom (`tkhd`).
//!
//! Location: `moov/trak[multiple]/tkhd`
//!
//! See: <https://developer.apple.com/documentation/quicktime-file-format/track_header_atom>

use binrw::BinRead;

use super::{versioned, TimingLayout};

/// Track header atom (`tkhd`).
///
/// Location: `moov/trak[multiple]/tkhd`
#[derive(Debug, Clone, BinRead)]
#[br(big)]
pub struct Tkhd {
    pub(crate) version: u8,
    _flags: [u8; 3],
    /// Seconds since midnight, January 1, 1904 (UTC).
    #[br(parse_with = versioned, args(version))]
    pub(crate) creation_time: u64,
    /// Seconds since midnight, January 1, 1904 (UTC).
    #[br(parse_with = versioned, args(version))]
    pub(crate) modification_time: u64,
    /// Uniquely identifies the track.
    /// Value 0 cannot be used.
    pub(crate) track_id: u32,
    _reserved1: [u8; 4],
    /// Duration of this track in the movie's time scale.
    /// If there is no edit list, then the duration is the sum of the sample durations,
    /// converted into the movie timescale.
    #[br(parse_with = versioned, args(version))]
    pub(crate) duration: u64,
}

impl Tkhd {
    pub fn track_id(&self) -> u32 {
        self.track_id
    }

    /// This track's unscaled duration.
    pub fn duration(&self) -> u64 {
        self.duration
    }

    /// Byte positions of timing fields in data load.
    pub fn layout(&self) -> TimingLayout {
        TimingLayout::tkhd(self.version)
    }
}
