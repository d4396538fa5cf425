use time::{macros::datetime, OffsetDateTime};

/// FourCC:s for known "container" atoms.
/// These are nested and contains more atoms,
/// within its specified, total size.
///
/// Only container atoms in the main MP4 tree are listed.
/// `udta` and `tref` are kept as opaque leaves,
/// since their contents vary by device.
///
/// - `moov`: offset tables, timing, metadata, telemetry
/// - `trak`: moov.trak (multiple)
/// - `edts`: moov.trak.edts
/// - `mdia`: moov.trak.mdia
/// - `minf`: moov.trak.mdia.minf
/// - `dinf`: moov.trak.mdia.minf.dinf
/// - `stbl`: moov.trak.mdia.minf.stbl, contains timing (stts), offsets (stco)
pub const CONTAINER: [&str; 7] = [
    "moov",
    "trak",
    "edts",
    "mdia",
    "minf",
    "dinf",
    "stbl",
];

/// Top-level atoms a supported container may consist of.
pub const SUPPORTED_TOP_LEVEL: [&str; 6] = [
    "ftyp",
    "moov",
    "mdat",
    "free",
    "skip",
    "wide",
];

/// Top-level atoms every supported container must have.
pub const MANDATORY_TOP_LEVEL: [&str; 2] = ["moov", "mdat"];

/// Handler name for GoPro GPMF telemetry tracks.
pub const GPMF_HANDLER_NAME: &str = "GoPro MET";

/// Max nesting depth for GPMF KLV data.
pub const GPMF_MAX_DEPTH: usize = 8;

/// Two lens streams whose fixes differ by more than this (seconds)
/// are considered to disagree.
pub const STREAM_DISAGREEMENT_SECS: f64 = 2.0;

/// A secondary lens fix this close (seconds) to a primary fix
/// is the same position and is left out of the exported track.
pub const LENS_MERGE_SECS: f64 = 0.05;

/// Corrected span may differ this much (seconds) from the
/// container duration before a warning is raised.
pub const DURATION_TOLERANCE_SECS: f64 = 2.0;

/// Suffix for nadir patched outputs.
pub const NADIR_SUFFIX: &str = "_nadir";

/// Suffix for Street View Studio outputs.
pub const SVS_SUFFIX: &str = "_SVS";

/// Sub-directory for Street View Studio outputs.
pub const SVS_DIR: &str = "SVS_Fixed_Headers";

/// Sub-directory for sampled frames.
pub const FRAMES_DIR: &str = "mapillary_sampled_video_frames";

/// Append-only result log in target directory.
pub const RESULT_LOG: &str = "geoprep_results.jsonl";

/// Time zero for MP4 containers. Midnight January 1, 1904.
pub fn mp4_time_zero() -> OffsetDateTime {
    datetime!(1904-01-01 0:00 UTC)
}

/// Time zero for GPS9 day counts. Midnight January 1, 2000.
pub fn gps9_time_zero() -> OffsetDateTime {
    datetime!(2000-01-01 0:00 UTC)
}
