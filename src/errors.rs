//! Errors raised while reading, correcting and writing assets.
//!
//! `PrepError` carries the detail, `ErrorKind` is the stable, serialisable
//! classification recorded in pipeline results.

use std::{fmt, path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

/// Classification of a failed asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// No telemetry track, or a telemetry track with zero samples.
    MetadataAbsent,
    /// Telemetry track present but structurally unreadable.
    MetadataCorrupt,
    /// Fewer than two valid GPS fixes to anchor the clock.
    ReconciliationImpossible,
    /// Container layout can not be handled.
    ContainerUnsupported,
    /// Post-write validation of a rewritten container failed.
    ContainerWriteFailed,
    /// Too many samples could not be represented in GPMF.
    MuxEncodingFailed,
    /// No GPS-bearing sample left to export.
    NoGeoFixesAvailable,
    /// External tool exceeded its timeout (after one retry).
    ExternalToolTimeout,
    /// External tool exited with non-zero status.
    ExternalToolNonZeroExit,
    /// Plain IO failure.
    Io,
    /// Invalid options.
    Config,
    /// Run cancelled before the asset completed.
    Cancelled,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::MetadataAbsent => "MetadataAbsent",
            ErrorKind::MetadataCorrupt => "MetadataCorrupt",
            ErrorKind::ReconciliationImpossible => "ReconciliationImpossible",
            ErrorKind::ContainerUnsupported => "ContainerUnsupported",
            ErrorKind::ContainerWriteFailed => "ContainerWriteFailed",
            ErrorKind::MuxEncodingFailed => "MuxEncodingFailed",
            ErrorKind::NoGeoFixesAvailable => "NoGeoFixesAvailable",
            ErrorKind::ExternalToolTimeout => "ExternalToolTimeout",
            ErrorKind::ExternalToolNonZeroExit => "ExternalToolNonZeroExit",
            ErrorKind::Io => "Io",
            ErrorKind::Config => "Config",
            ErrorKind::Cancelled => "Cancelled",
        };
        write!(f, "{s}")
    }
}

/// Various read, parse, correction and write errors.
#[derive(Debug)]
pub enum PrepError {
    /// Converted `BinResult` error.
    BinReadError(binrw::Error),
    /// IO error
    IOError(std::io::Error),
    /// Converted `serde_json` error (options, result log).
    JsonError(serde_json::Error),
    /// Filesizes of e.g. 0 sized place holders.
    ReadMismatch{got: u64, expected: u64},
    /// Atom extends past its parent or the end of file.
    BoundsError((u64, u64)),
    /// MP4 atom with impossible size,
    /// e.g. 1k Dropbox place holders.
    UnexpectedAtomSize{len: u64, offset: u64},
    /// No such atom.
    NoSuchAtom(String),
    /// Sample tables disagree on the number of samples.
    SampleTableMismatch{atom: String, got: usize, expected: usize},
    /// Exceeded recurse depth when parsing GPMF.
    RecurseDepthExceeded((usize, usize)),
    /// No `GoPro MET` track, or one without samples.
    MetadataAbsent(String),
    /// Telemetry track could not be parsed.
    MetadataCorrupt(String),
    /// Fewer than two usable GPS fixes.
    ReconciliationImpossible{valid_fixes: usize},
    /// Unsupported container layout.
    ContainerUnsupported(String),
    /// Rewritten container did not validate.
    ContainerWriteFailed(String),
    /// Fraction of unencodable samples over the configured limit.
    MuxEncodingFailed{failed: usize, total: usize},
    /// Nothing to put in a GPX track.
    NoGeoFixesAvailable,
    /// GPX serialisation/deserialisation error.
    GpxError(String),
    /// External tool was killed after exceeding its timeout.
    ExternalToolTimeout{tool: String, timeout: Duration},
    /// External tool failed.
    ExternalToolNonZeroExit{tool: String, code: Option<i32>, stderr: String},
    /// Invalid options.
    InvalidConfig(String),
    /// Missing input or output location.
    NoSuchPath(PathBuf),
    /// Cancellation observed between stages.
    Cancelled,
}

impl PrepError {
    /// Stable classification for results and logs.
    pub fn kind(&self) -> ErrorKind {
        match self {
            PrepError::IOError(_)
            | PrepError::NoSuchPath(_) => ErrorKind::Io,
            PrepError::JsonError(_)
            | PrepError::InvalidConfig(_) => ErrorKind::Config,
            PrepError::BinReadError(_)
            | PrepError::ReadMismatch{..}
            | PrepError::BoundsError(_)
            | PrepError::UnexpectedAtomSize{..}
            | PrepError::NoSuchAtom(_)
            | PrepError::SampleTableMismatch{..}
            | PrepError::ContainerUnsupported(_) => ErrorKind::ContainerUnsupported,
            PrepError::RecurseDepthExceeded(_)
            | PrepError::MetadataCorrupt(_) => ErrorKind::MetadataCorrupt,
            PrepError::MetadataAbsent(_) => ErrorKind::MetadataAbsent,
            PrepError::ReconciliationImpossible{..} => ErrorKind::ReconciliationImpossible,
            PrepError::ContainerWriteFailed(_) => ErrorKind::ContainerWriteFailed,
            PrepError::MuxEncodingFailed{..} => ErrorKind::MuxEncodingFailed,
            PrepError::NoGeoFixesAvailable => ErrorKind::NoGeoFixesAvailable,
            PrepError::GpxError(_) => ErrorKind::Io,
            PrepError::ExternalToolTimeout{..} => ErrorKind::ExternalToolTimeout,
            PrepError::ExternalToolNonZeroExit{..} => ErrorKind::ExternalToolNonZeroExit,
            PrepError::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Re-classifies low-level structural errors raised
    /// while reading the telemetry track as `MetadataCorrupt`.
    pub(crate) fn into_metadata_corrupt(self) -> Self {
        match self.kind() {
            ErrorKind::ContainerUnsupported | ErrorKind::MetadataCorrupt => {
                PrepError::MetadataCorrupt(self.to_string())
            },
            _ => self,
        }
    }

    /// Re-classifies any error raised while validating
    /// a freshly written container as `ContainerWriteFailed`.
    pub(crate) fn into_write_failed(self) -> Self {
        match self {
            PrepError::ContainerWriteFailed(_) => self,
            other => PrepError::ContainerWriteFailed(other.to_string()),
        }
    }
}

impl std::error::Error for PrepError {}

impl fmt::Display for PrepError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrepError::BinReadError(err) => write!(f, "{err}"),
            PrepError::IOError(err) => write!(f, "IO error: {}", err),
            PrepError::JsonError(err) => write!(f, "JSON error: {err}"),
            PrepError::ReadMismatch{got, expected} => write!(f, "Read {got} bytes, expected {expected} bytes."),
            PrepError::BoundsError((got, max)) => write!(f, "Bounds error: tried to read at {got} with max {max}."),
            PrepError::UnexpectedAtomSize{len, offset} => write!(f, "Unexpected MP4 atom size of {len} bytes @ offset {offset}."),
            PrepError::NoSuchAtom(name) => write!(f, "No such atom {name}."),
            PrepError::SampleTableMismatch{atom, got, expected} => write!(f, "Sample table '{atom}' lists {got} samples, expected {expected}."),
            PrepError::RecurseDepthExceeded((depth, max)) => write!(f, "Recurse depth {depth} exceeds max recurse depth {max}"),
            PrepError::MetadataAbsent(msg) => write!(f, "No telemetry: {msg}"),
            PrepError::MetadataCorrupt(msg) => write!(f, "Corrupt telemetry: {msg}"),
            PrepError::ReconciliationImpossible{valid_fixes} => write!(f, "Clock reconciliation requires at least 2 valid GPS fixes, found {valid_fixes}."),
            PrepError::ContainerUnsupported(msg) => write!(f, "Unsupported container: {msg}"),
            PrepError::ContainerWriteFailed(msg) => write!(f, "Container validation failed after write: {msg}"),
            PrepError::MuxEncodingFailed{failed, total} => write!(f, "{failed} of {total} telemetry samples could not be encoded."),
            PrepError::NoGeoFixesAvailable => write!(f, "No valid GPS fixes to export."),
            PrepError::GpxError(msg) => write!(f, "GPX error: {msg}"),
            PrepError::ExternalToolTimeout{tool, timeout} => write!(f, "'{tool}' timed out after {:.1}s.", timeout.as_secs_f64()),
            PrepError::ExternalToolNonZeroExit{tool, code, stderr} => match code {
                Some(c) => write!(f, "'{tool}' exited with status {c}: {}", stderr.trim()),
                None => write!(f, "'{tool}' terminated by signal: {}", stderr.trim()),
            },
            PrepError::InvalidConfig(msg) => write!(f, "Invalid options: {msg}"),
            PrepError::NoSuchPath(path) => write!(f, "No such path '{}'", path.display()),
            PrepError::Cancelled => write!(f, "Cancelled"),
        }
    }
}

/// Converts std::io::Error to PrepError
impl From<std::io::Error> for PrepError {
    fn from(err: std::io::Error) -> Self {
        PrepError::IOError(err)
    }
}

/// Converts binrw::Error to PrepError
impl From<binrw::Error> for PrepError {
    fn from(err: binrw::Error) -> PrepError {
        PrepError::BinReadError(err)
    }
}

/// Converts serde_json::Error to PrepError
impl From<serde_json::Error> for PrepError {
    fn from(err: serde_json::Error) -> PrepError {
        PrepError::JsonError(err)
    }
}

/// Converts a failed `NamedTempFile::persist` to PrepError
impl From<tempfile::PersistError> for PrepError {
    fn from(err: tempfile::PersistError) -> PrepError {
        PrepError::IOError(err.error)
    }
}

/// Converts PrepError to std::io::Error
impl From<PrepError> for std::io::Error {
    fn from(err: PrepError) -> Self {
        std::io::Error::new(std::io::ErrorKind::Other, err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn low_level_errors_reclassify() {
        let err = PrepError::BoundsError((120, 100));
        assert_eq!(err.kind(), ErrorKind::ContainerUnsupported);
        assert_eq!(err.into_metadata_corrupt().kind(), ErrorKind::MetadataCorrupt);

        let err = PrepError::NoSuchAtom("mvhd".to_owned()).into_write_failed();
        assert_eq!(err.kind(), ErrorKind::ContainerWriteFailed);

        let err = PrepError::Cancelled.into_metadata_corrupt();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
    }

    #[test]
    fn kind_serialises_as_name() {
        let json = serde_json::to_string(&ErrorKind::NoGeoFixesAvailable).unwrap();
        assert_eq!(json, "\"NoGeoFixesAvailable\"");
    }
}
