use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::PrepError;

use super::{run_with_retry, Invocation, ProcessRunner, ToolOutput, ToolRunner};

/// Executables for the external collaborators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolPaths {
    pub mapillary_tools: PathBuf,
    /// ImageMagick, used for the nadir overlay.
    pub magick: PathBuf,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            mapillary_tools: PathBuf::from("mapillary_tools"),
            magick: PathBuf::from("magick"),
        }
    }
}

/// Frame sampler, tagger, uploader and compositor.
#[derive(Clone)]
pub struct Collaborators {
    paths: ToolPaths,
    runner: Arc<dyn ToolRunner>,
    timeout: Duration,
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators")
            .field("paths", &self.paths)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl Collaborators {
    /// Collaborators spawning real processes.
    pub fn new(paths: ToolPaths, timeout: Duration) -> Self {
        Self::with_runner(paths, timeout, Arc::new(ProcessRunner))
    }

    pub fn with_runner(paths: ToolPaths, timeout: Duration, runner: Arc<dyn ToolRunner>) -> Self {
        Self { paths, runner, timeout }
    }

    /// Samples frames every `distance` metres of `video` into `out_dir`.
    pub fn sample_frames(&self, video: &Path, out_dir: &Path, distance: f64) -> Result<ToolOutput, PrepError> {
        let invocation = Invocation::new("sample_video", &self.paths.mapillary_tools)
            .arg("sample_video")
            .arg(video)
            .arg(out_dir)
            .arg(format!("--video_sample_distance={distance}"));
        self.checked(&invocation)
    }

    /// Geotags and sequences sampled frames in `dir`.
    pub fn tag_frames(&self, dir: &Path) -> Result<ToolOutput, PrepError> {
        let invocation = Invocation::new("process", &self.paths.mapillary_tools)
            .arg("process")
            .arg(dir);
        self.checked(&invocation)
    }

    /// Uploads processed frames in `dir` for `user`.
    pub fn upload(&self, dir: &Path, user: &str) -> Result<ToolOutput, PrepError> {
        let invocation = Invocation::new("upload", &self.paths.mapillary_tools)
            .arg("upload")
            .arg("--user_name")
            .arg(user)
            .arg(dir);
        self.checked(&invocation)
    }

    /// Overlays `nadir` at the bottom of `frame`, in place.
    pub fn composite_nadir(&self, frame: &Path, nadir: &Path) -> Result<ToolOutput, PrepError> {
        let invocation = Invocation::new("composite", &self.paths.magick)
            .arg("composite")
            .arg("-gravity")
            .arg("south")
            .arg(nadir)
            .arg(frame)
            .arg(frame);
        self.checked(&invocation)
    }

    /// Composites `nadir` into every JPEG below `dir`.
    /// Returns the number of frames patched.
    pub fn composite_all(&self, dir: &Path, nadir: &Path) -> Result<usize, PrepError> {
        let mut frames = Vec::new();
        for entry in WalkDir::new(dir).sort_by_file_name() {
            let entry = entry.map_err(|e| PrepError::IOError(e.into()))?;
            let is_jpeg = entry.path().extension()
                .map(|e| e.eq_ignore_ascii_case("jpg") || e.eq_ignore_ascii_case("jpeg"))
                .unwrap_or(false);
            if entry.file_type().is_file() && is_jpeg {
                frames.push(entry.into_path());
            }
        }
        for frame in frames.iter() {
            self.composite_nadir(frame, nadir)?;
        }
        Ok(frames.len())
    }

    /// Runs with one retry on timeout. Non-zero exit is an error.
    fn checked(&self, invocation: &Invocation) -> Result<ToolOutput, PrepError> {
        let output = run_with_retry(self.runner.as_ref(), invocation, self.timeout)?;
        match output.success() {
            true => Ok(output),
            false => Err(PrepError::ExternalToolNonZeroExit {
                tool: invocation.tool.clone(),
                code: output.code,
                stderr: output.stderr,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::ErrorKind;

    /// Records invocations, fails those whose tool is in `fail`.
    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<Invocation>>,
        fail: Vec<&'static str>,
    }

    impl ToolRunner for Recorder {
        fn run(&self, invocation: &Invocation, _timeout: Duration) -> Result<ToolOutput, PrepError> {
            if let Ok(mut calls) = self.calls.lock() {
                calls.push(invocation.to_owned());
            }
            let code = match self.fail.contains(&invocation.tool.as_str()) {
                true => 2,
                false => 0,
            };
            Ok(ToolOutput { code: Some(code), stderr: "boom".to_owned(), ..Default::default() })
        }
    }

    #[test]
    fn commands_follow_mapillary_tools_cli() {
        let recorder = Arc::new(Recorder::default());
        let tools = Collaborators::with_runner(ToolPaths::default(), Duration::from_secs(5), recorder.clone());

        tools.sample_frames(Path::new("in.mp4"), Path::new("frames"), 3.0).unwrap();
        tools.upload(Path::new("frames"), "someone").unwrap();

        let calls = recorder.calls.lock().unwrap();
        assert_eq!(calls[0].display(), "mapillary_tools sample_video in.mp4 frames --video_sample_distance=3");
        assert_eq!(calls[1].display(), "mapillary_tools upload --user_name someone frames");
    }

    #[test]
    fn non_zero_exit_is_an_error() {
        let recorder = Arc::new(Recorder { fail: vec!["process"], ..Default::default() });
        let tools = Collaborators::with_runner(ToolPaths::default(), Duration::from_secs(5), recorder);
        let err = tools.tag_frames(Path::new("frames")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ExternalToolNonZeroExit);
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn nadir_goes_into_every_frame() {
        let dir = tempfile::tempdir().unwrap();
        let seq = dir.path().join("GX010001");
        std::fs::create_dir_all(&seq).unwrap();
        for name in ["0001.jpg", "0002.JPG", "notes.txt"] {
            std::fs::write(seq.join(name), b"x").unwrap();
        }

        let recorder = Arc::new(Recorder::default());
        let tools = Collaborators::with_runner(ToolPaths::default(), Duration::from_secs(5), recorder.clone());
        let patched = tools.composite_all(dir.path(), Path::new("nadir.png")).unwrap();
        assert_eq!(patched, 2);

        let calls = recorder.calls.lock().unwrap();
        assert!(calls.iter().all(|c| c.tool == "composite" && c.args[3] == "nadir.png"));
    }
}
