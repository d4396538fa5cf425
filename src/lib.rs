//! Prepares GoPro footage for street-imagery platforms.
//!
//! Extracts the GPMF telemetry embedded in an MP4, reconciles the device
//! clock against GPS time, then writes three outputs from the corrected
//! timeline without re-encoding any media:
//! - a copy of the container with corrected telemetry re-muxed as GPMF,
//! - a copy with corrected creation dates and durations in `mvhd`,
//!   `tkhd` and `mdhd` (for Street View Studio),
//! - a GPX 1.1 track.
//!
//! MP4 parsing follows
//! <https://developer.apple.com/library/archive/documentation/QuickTime/QTFF/QTFFPreface/qtffPreface.html>,
//! GPMF follows <https://github.com/gopro/gpmf-parser>.
//!
//! ```rs
//! use geoprep::{clock, geotrack, telemetry};
//! use std::path::Path;
//!
//! fn main() -> Result<(), geoprep::PrepError> {
//!     let path = Path::new("GX010001.MP4");
//!     let telemetry = telemetry::extract(path, &Default::default())?;
//!     let timeline = clock::reconcile(&telemetry, &Default::default())?;
//!     geotrack::export_gpx(&timeline, Path::new("GX010001.gpx"), "GX010001")?;
//!     Ok(())
//! }
//! ```

pub mod fourcc;
pub mod atom;
pub mod atom_types;
pub mod consts;
pub mod track;
pub mod errors;
pub mod warning;
pub mod gpmf;
pub mod telemetry;
pub mod clock;
pub mod rewrite;
pub mod mux;
pub mod geotrack;
pub mod tools;
pub mod pipeline;

// Internal reader, remux and helpers
pub(crate) mod reader;
pub(crate) mod remux;
pub(crate) mod support;

pub use fourcc::FourCC;
pub use atom::{Atom, AtomHeader, Mp4Layout};
pub use atom_types::{
    Co64,
    Hdlr,
    Mdhd,
    Mvhd,
    SampleToChunk,
    Stco,
    Stsc,
    Stsz,
    Stts,
    TimeToSample,
    TimingLayout,
    Tkhd,
};
pub use consts::{
    CONTAINER,
    DURATION_TOLERANCE_SECS,
    FRAMES_DIR,
    GPMF_HANDLER_NAME,
    GPMF_MAX_DEPTH,
    LENS_MERGE_SECS,
    MANDATORY_TOP_LEVEL,
    NADIR_SUFFIX,
    RESULT_LOG,
    STREAM_DISAGREEMENT_SECS,
    SUPPORTED_TOP_LEVEL,
    SVS_DIR,
    SVS_SUFFIX,
    gps9_time_zero,
    mp4_time_zero,
};
pub use errors::{ErrorKind, PrepError};
pub use warning::Warning;

#[cfg(test)]
pub(crate) mod testdata;
