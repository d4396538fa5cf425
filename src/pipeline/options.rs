//! Options record, persisted as JSON.

use std::{
    io::{BufWriter, Write},
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::{rewrite::output_dir, tools::ToolPaths, PrepError};

use super::CameraProfile;

/// Frame stage settings. The stage is skipped when absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameOptions {
    pub tools: ToolPaths,
    /// Metres between sampled frames.
    pub sample_distance: f64,
    /// Image overlaid on the bottom of every frame
    /// when `enable_nadir_patch` is set.
    pub nadir_image: Option<PathBuf>,
    /// Upload account. No upload when absent.
    pub account: Option<String>,
}

impl Default for FrameOptions {
    fn default() -> Self {
        Self {
            tools: ToolPaths::default(),
            sample_distance: 3.0,
            nadir_image: None,
            account: None,
        }
    }
}

/// Run options. Immutable once the run starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    pub source_dir: PathBuf,
    pub target_dir: PathBuf,
    /// Inferred per asset from the file extension when absent.
    pub camera_profile: Option<CameraProfile>,
    pub enable_nadir_patch: bool,
    /// Seconds a sample may lie beyond the first or last anchor.
    pub extrapolation_margin: f64,
    pub max_invalid_sample_fraction: f64,
    /// Seconds.
    pub per_tool_timeout: f64,
    /// Appended to output names, e.g. `GX010001_fixed.mp4`.
    pub file_suffix: String,
    /// Parallel assets. Available cores when 0.
    pub workers: usize,
    /// Upper bound on assets in flight, since each may run external tools.
    pub max_tool_processes: usize,
    pub export_geotrack: bool,
    pub frames: Option<FrameOptions>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            source_dir: PathBuf::from("."),
            target_dir: PathBuf::from("geoprep_output"),
            camera_profile: None,
            enable_nadir_patch: false,
            extrapolation_margin: 2.0,
            max_invalid_sample_fraction: 0.05,
            per_tool_timeout: 600.0,
            file_suffix: String::new(),
            workers: 0,
            max_tool_processes: 4,
            export_geotrack: true,
            frames: None,
        }
    }
}

impl Options {
    pub fn load(path: &Path) -> Result<Self, PrepError> {
        let bytes = std::fs::read(path)?;
        let options: Self = serde_json::from_slice(&bytes)?;
        Ok(options)
    }

    /// Writes options as pretty JSON, atomically.
    pub fn save(&self, path: &Path) -> Result<(), PrepError> {
        let mut temp = NamedTempFile::new_in(output_dir(path)?)?;
        {
            let mut writer = BufWriter::new(temp.as_file_mut());
            serde_json::to_writer_pretty(&mut writer, self)?;
            writer.write_all(b"\n")?;
            writer.flush()?;
        }
        temp.persist(path)?;
        Ok(())
    }

    /// Checks ranges and required paths.
    pub fn validate(&self) -> Result<(), PrepError> {
        if !self.source_dir.is_dir() {
            return Err(PrepError::NoSuchPath(self.source_dir.to_owned()));
        }
        if !self.extrapolation_margin.is_finite() || self.extrapolation_margin < 0.0 {
            return Err(invalid(format!("extrapolation_margin {} must be >= 0", self.extrapolation_margin)));
        }
        if !(0.0 ..= 1.0).contains(&self.max_invalid_sample_fraction) {
            return Err(invalid(format!("max_invalid_sample_fraction {} outside 0..1", self.max_invalid_sample_fraction)));
        }
        if !self.per_tool_timeout.is_finite() || self.per_tool_timeout <= 0.0 {
            return Err(invalid(format!("per_tool_timeout {} must be > 0", self.per_tool_timeout)));
        }
        if self.max_tool_processes == 0 {
            return Err(invalid("max_tool_processes must be at least 1".to_owned()));
        }
        if let Some(frames) = self.frames.as_ref() {
            if !frames.sample_distance.is_finite() || frames.sample_distance <= 0.0 {
                return Err(invalid(format!("sample_distance {} must be > 0", frames.sample_distance)));
            }
        }
        if self.enable_nadir_patch {
            match self.frames.as_ref().and_then(|f| f.nadir_image.as_ref()) {
                Some(image) if image.is_file() => (),
                Some(image) => return Err(PrepError::NoSuchPath(image.to_owned())),
                None => return Err(invalid("enable_nadir_patch requires frames.nadir_image".to_owned())),
            }
        }
        Ok(())
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.per_tool_timeout)
    }

    /// Suffix with leading underscore, empty if unset.
    pub fn suffix(&self) -> String {
        match self.file_suffix.trim_start_matches('_') {
            "" => String::new(),
            s => format!("_{s}"),
        }
    }

    /// Nadir patch applies only with a frame stage to patch.
    pub fn nadir_patch(&self) -> bool {
        self.enable_nadir_patch && self.frames.is_some()
    }
}

fn invalid(msg: String) -> PrepError {
    PrepError::InvalidConfig(msg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    #[test]
    fn missing_fields_take_defaults() {
        let options: Options = serde_json::from_str(r#"{"source_dir": "in", "camera_profile": "max_gen2"}"#).unwrap();
        assert_eq!(options.source_dir, PathBuf::from("in"));
        assert_eq!(options.camera_profile, Some(CameraProfile::MaxGen2));
        assert_eq!(options.extrapolation_margin, 2.0);
        assert_eq!(options.max_tool_processes, 4);
        assert!(options.frames.is_none());
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("geoprep.json");
        let options = Options {
            source_dir: dir.path().to_owned(),
            file_suffix: "fixed".to_owned(),
            frames: Some(FrameOptions { account: Some("someone".to_owned()), ..Default::default() }),
            ..Default::default()
        };
        options.save(&path).unwrap();
        assert_eq!(Options::load(&path).unwrap(), options);
        assert_eq!(options.suffix(), "_fixed");
    }

    #[test]
    fn validate_rejects_bad_ranges() {
        let dir = tempfile::tempdir().unwrap();
        let base = Options { source_dir: dir.path().to_owned(), ..Default::default() };
        assert!(base.validate().is_ok());

        let bad = Options { max_invalid_sample_fraction: 1.5, ..base.clone() };
        assert_eq!(bad.validate().unwrap_err().kind(), ErrorKind::Config);
        let bad = Options { extrapolation_margin: -1.0, ..base.clone() };
        assert_eq!(bad.validate().unwrap_err().kind(), ErrorKind::Config);
        let bad = Options { enable_nadir_patch: true, ..base.clone() };
        assert_eq!(bad.validate().unwrap_err().kind(), ErrorKind::Config);
        let bad = Options { source_dir: dir.path().join("missing"), ..base };
        assert_eq!(bad.validate().unwrap_err().kind(), ErrorKind::Io);
    }
}
