//! Per-asset results, the append-only result log and the batch summary.

use std::{
    fmt,
    fs::{File, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
    sync::Mutex,
};

use serde::Serialize;

use crate::{ErrorKind, PrepError, Warning, RESULT_LOG};

use super::{AssetState, CameraProfile};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Outcome {
    Success,
    /// Done, with warnings.
    PartialSuccess,
    Failure,
}

/// Final result for one asset.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineResult {
    /// File stem.
    pub asset: String,
    pub source: PathBuf,
    pub profile: Option<CameraProfile>,
    /// `Done`, `Failed` or `Skipped`.
    pub state: AssetState,
    pub outcome: Outcome,
    pub outputs: Vec<PathBuf>,
    pub warnings: Vec<Warning>,
    pub error: Option<ErrorKind>,
    pub message: Option<String>,
}

impl PipelineResult {
    pub(crate) fn done(asset: &str, source: &Path, profile: CameraProfile, outputs: Vec<PathBuf>, warnings: Vec<Warning>) -> Self {
        Self {
            asset: asset.to_owned(),
            source: source.to_owned(),
            profile: Some(profile),
            state: AssetState::Done,
            outcome: match warnings.is_empty() {
                true => Outcome::Success,
                false => Outcome::PartialSuccess,
            },
            outputs,
            warnings,
            error: None,
            message: None,
        }
    }

    pub(crate) fn failed(asset: &str, source: &Path, profile: Option<CameraProfile>, err: &PrepError, warnings: Vec<Warning>) -> Self {
        Self {
            asset: asset.to_owned(),
            source: source.to_owned(),
            profile,
            state: AssetState::Failed(err.kind()),
            outcome: Outcome::Failure,
            outputs: Vec::new(),
            warnings,
            error: Some(err.kind()),
            message: Some(err.to_string()),
        }
    }

    pub(crate) fn skipped(asset: &str, source: &Path, profile: Option<CameraProfile>, outputs: Vec<PathBuf>) -> Self {
        Self {
            asset: asset.to_owned(),
            source: source.to_owned(),
            profile,
            state: AssetState::Skipped,
            outcome: Outcome::Success,
            outputs,
            warnings: Vec::new(),
            error: None,
            message: None,
        }
    }
}

/// Append-only JSON lines log in the target directory.
#[derive(Debug)]
pub struct ResultLog {
    path: PathBuf,
    file: Mutex<File>,
}

impl ResultLog {
    pub fn open(target_dir: &Path) -> Result<Self, PrepError> {
        let path = target_dir.join(RESULT_LOG);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;
        Ok(Self { path, file: Mutex::new(file) })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one line. Each line is a complete JSON record.
    pub fn append(&self, result: &PipelineResult) -> Result<(), PrepError> {
        let mut line = serde_json::to_vec(result)?;
        line.push(b'\n');
        let mut file = self.file.lock()
            .map_err(|_| PrepError::InvalidConfig("result log lock poisoned".to_owned()))?;
        file.write_all(&line)?;
        file.flush()?;
        Ok(())
    }
}

/// All results of a run, in input order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub results: Vec<PipelineResult>,
}

impl BatchReport {
    pub fn count(&self, outcome: Outcome) -> usize {
        self.results.iter().filter(|r| r.outcome == outcome).count()
    }

    pub fn skipped(&self) -> usize {
        self.results.iter().filter(|r| r.state == AssetState::Skipped).count()
    }

    pub fn failures(&self) -> impl Iterator<Item = &PipelineResult> {
        self.results.iter().filter(|r| r.outcome == Outcome::Failure)
    }
}

impl fmt::Display for BatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let width = self.results.iter()
            .map(|r| r.asset.len())
            .max()
            .unwrap_or(5)
            .max(5);
        writeln!(f, "{:<width$}  {:<9}  {:<26}  {:>8}  DETAIL", "ASSET", "PROFILE", "STATE", "WARNINGS")?;
        for r in self.results.iter() {
            let profile = r.profile.map(|p| p.to_string()).unwrap_or_else(|| "-".to_owned());
            let detail = match (&r.message, r.warnings.first()) {
                (Some(msg), _) => msg.to_owned(),
                (None, Some(w)) => w.to_string(),
                (None, None) => String::new(),
            };
            writeln!(f, "{:<width$}  {:<9}  {:<26}  {:>8}  {detail}",
                r.asset,
                profile,
                r.state.to_string(),
                r.warnings.len()
            )?;
        }
        write!(f, "{} done, {} with warnings, {} failed, {} skipped",
            self.count(Outcome::Success) - self.skipped(),
            self.count(Outcome::PartialSuccess),
            self.count(Outcome::Failure),
            self.skipped()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_appends_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let log = ResultLog::open(dir.path()).unwrap();
        let ok = PipelineResult::done("A", Path::new("A.mp4"), CameraProfile::Hero, Vec::new(), Vec::new());
        let failed = PipelineResult::failed("B", Path::new("B.mp4"), None, &PrepError::NoGeoFixesAvailable, Vec::new());
        log.append(&ok).unwrap();
        log.append(&failed).unwrap();

        let text = std::fs::read_to_string(log.path()).unwrap();
        let lines: Vec<serde_json::Value> = text.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["outcome"], "Success");
        assert_eq!(lines[1]["error"], "NoGeoFixesAvailable");
        assert_eq!(lines[1]["state"]["Failed"], "NoGeoFixesAvailable");
    }

    #[test]
    fn summary_counts_outcomes() {
        let warned = vec![Warning::ClampedTimestamps { count: 1 }];
        let report = BatchReport {
            results: vec![
                PipelineResult::done("A", Path::new("A.mp4"), CameraProfile::Hero, Vec::new(), Vec::new()),
                PipelineResult::done("B", Path::new("B.mp4"), CameraProfile::Hero, Vec::new(), warned),
                PipelineResult::skipped("C", Path::new("C.mp4"), None, Vec::new()),
                PipelineResult::failed("D", Path::new("D.mp4"), None, &PrepError::Cancelled, Vec::new()),
            ],
        };
        let table = report.to_string();
        assert!(table.ends_with("1 done, 1 with warnings, 1 failed, 1 skipped"));
        assert!(table.contains("Failed(Cancelled)"));
        assert_eq!(report.failures().count(), 1);
    }
}
