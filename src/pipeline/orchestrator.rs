//! Batch driver: discovers assets, runs each through extraction,
//! reconciliation and the three writers, and records a result per asset.
//!
//! Assets run in parallel on a bounded `rayon` pool. Within an asset the
//! stages are sequential, except the container rewrite, telemetry mux and
//! GPX export, which share the corrected timeline read-only and run
//! concurrently. A failing asset never stops the batch.

use std::{
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use rayon::prelude::*;
use walkdir::WalkDir;

use crate::{
    clock::reconcile,
    geotrack::export_gpx,
    mux::{mux_timeline, MuxParams},
    rewrite::{rewrite_container, RewriteOptions},
    telemetry::extract,
    tools::{Collaborators, ProcessRunner, ToolRunner},
    PrepError,
    Warning,
    FRAMES_DIR,
    NADIR_SUFFIX,
    SVS_DIR,
    SVS_SUFFIX,
};

use super::{
    state::StateTracker,
    AssetState,
    BatchReport,
    CameraProfile,
    Options,
    PipelineResult,
    ResultLog,
};

/// Cooperative cancellation, checked between assets and between stages.
/// Writes in flight always complete or roll back.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<(), PrepError> {
        match self.is_cancelled() {
            true => Err(PrepError::Cancelled),
            false => Ok(()),
        }
    }
}

/// An input video.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceAsset {
    pub path: PathBuf,
    pub profile: CameraProfile,
    pub stem: String,
}

/// Output locations for one asset.
#[derive(Debug, Clone, PartialEq)]
pub struct AssetOutputs {
    /// Source with corrected telemetry.
    pub muxed: PathBuf,
    /// Source with corrected headers, for Street View Studio.
    pub svs: PathBuf,
    pub gpx: Option<PathBuf>,
    pub frames: Option<PathBuf>,
}

impl AssetOutputs {
    /// Files that must exist for the asset to count as processed.
    pub fn files(&self) -> Vec<&Path> {
        let mut files = vec![self.muxed.as_path(), self.svs.as_path()];
        if let Some(gpx) = self.gpx.as_ref() {
            files.push(gpx);
        }
        files
    }

    fn exist(&self) -> bool {
        self.files().iter().all(|f| f.is_file())
    }

    /// Removes anything already written. Best effort.
    fn remove(&self) {
        for file in self.files() {
            if file.is_file() {
                if let Err(err) = std::fs::remove_file(file) {
                    log::warn!("could not remove '{}': {err}", file.display());
                }
            }
        }
        if let Some(dir) = self.frames.as_ref().filter(|d| d.is_dir()) {
            if let Err(err) = std::fs::remove_dir_all(dir) {
                log::warn!("could not remove '{}': {err}", dir.display());
            }
        }
    }
}

#[derive(Debug)]
pub struct Orchestrator {
    options: Options,
    collaborators: Option<Collaborators>,
    cancel: CancelToken,
}

impl Orchestrator {
    /// Validates `options`. External tools are spawned as real processes.
    pub fn new(options: Options) -> Result<Self, PrepError> {
        Self::with_runner(options, Arc::new(ProcessRunner))
    }

    pub fn with_runner(options: Options, runner: Arc<dyn ToolRunner>) -> Result<Self, PrepError> {
        options.validate()?;
        let collaborators = options.frames.as_ref()
            .map(|f| Collaborators::with_runner(f.tools.to_owned(), options.tool_timeout(), runner));
        Ok(Self { options, collaborators, cancel: CancelToken::new() })
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Token for cancelling a running batch from another thread.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Video files directly in `source_dir`, sorted by name.
    /// Files with an extension no profile covers are ignored.
    pub fn discover(&self) -> Result<Vec<SourceAsset>, PrepError> {
        let mut assets = Vec::new();
        for entry in WalkDir::new(&self.options.source_dir).min_depth(1).max_depth(1).sort_by_file_name() {
            let entry = entry.map_err(|e| PrepError::IOError(e.into()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.into_path();
            let Some(inferred) = CameraProfile::infer(&path) else {
                log::debug!("ignoring '{}'", path.display());
                continue;
            };
            let stem = path.file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            assets.push(SourceAsset {
                profile: self.options.camera_profile.unwrap_or(inferred),
                stem,
                path,
            });
        }
        Ok(assets)
    }

    /// Output locations for `asset`: `<stem><suffix>[_nadir]`.
    pub fn outputs(&self, asset: &SourceAsset) -> AssetOutputs {
        let target = &self.options.target_dir;
        let mut name = format!("{}{}", asset.stem, self.options.suffix());
        if self.options.nadir_patch() {
            name.push_str(NADIR_SUFFIX);
        }
        AssetOutputs {
            muxed: target.join(format!("{name}.mp4")),
            svs: target.join(SVS_DIR).join(format!("{name}{SVS_SUFFIX}.mp4")),
            gpx: self.options.export_geotrack
                .then(|| target.join(SVS_DIR).join(format!("{name}{SVS_SUFFIX}.gpx"))),
            frames: self.options.frames.as_ref()
                .map(|_| target.join(FRAMES_DIR).join(&name)),
        }
    }

    /// Processes all assets in `source_dir`. Only fails if the batch
    /// can not start at all. Per-asset failures are in the report.
    pub fn run(&self) -> Result<BatchReport, PrepError> {
        let assets = self.discover()?;
        std::fs::create_dir_all(self.options.target_dir.join(SVS_DIR))?;
        let log = ResultLog::open(&self.options.target_dir)?;

        let cores = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        let workers = match self.options.workers {
            0 => cores,
            n => n,
        }.min(self.options.max_tool_processes).max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .build()
            .map_err(|e| PrepError::InvalidConfig(format!("worker pool: {e}")))?;

        log::info!("{} assets in '{}', {workers} workers", assets.len(), self.options.source_dir.display());

        let results: Vec<PipelineResult> = pool.install(|| {
            assets.par_iter()
                .map(|asset| {
                    let result = self.process_asset(asset);
                    if let Err(err) = log.append(&result) {
                        log::error!("{}: could not write result log: {err}", asset.stem);
                    }
                    result
                })
                .collect()
        });

        let report = BatchReport { results };
        log::info!("{}", report);
        Ok(report)
    }

    /// Runs one asset to a terminal state.
    pub fn process_asset(&self, asset: &SourceAsset) -> PipelineResult {
        let outputs = self.outputs(asset);
        let mut tracker = StateTracker::new(&asset.stem);

        if let Err(err) = self.cancel.check() {
            return PipelineResult::failed(&asset.stem, &asset.path, Some(asset.profile), &err, Vec::new());
        }
        if outputs.exist() {
            log::info!("{}: outputs exist, skipping", asset.stem);
            if let Err(err) = tracker.enter(AssetState::Skipped) {
                log::error!("{err}");
            }
            let files = outputs.files().iter().map(|p| p.to_path_buf()).collect();
            return PipelineResult::skipped(&asset.stem, &asset.path, Some(asset.profile), files);
        }

        let mut warnings = Vec::new();
        match self.stages(asset, &outputs, &mut tracker, &mut warnings) {
            Ok(files) => {
                log::info!("{}: done, {} warnings", asset.stem, warnings.len());
                PipelineResult::done(&asset.stem, &asset.path, asset.profile, files, warnings)
            },
            Err(err) => {
                log::error!("{}: {err}", asset.stem);
                tracker.fail(err.kind());
                outputs.remove();
                PipelineResult::failed(&asset.stem, &asset.path, Some(asset.profile), &err, warnings)
            },
        }
    }

    fn stages(
        &self,
        asset: &SourceAsset,
        outputs: &AssetOutputs,
        tracker: &mut StateTracker,
        warnings: &mut Vec<Warning>,
    ) -> Result<Vec<PathBuf>, PrepError> {
        tracker.enter(AssetState::Extracting)?;
        self.cancel.check()?;
        let telemetry = extract(&asset.path, &asset.profile.extractor_params())?;
        warnings.extend(telemetry.warnings.iter().cloned());

        tracker.enter(AssetState::Reconciling)?;
        self.cancel.check()?;
        let params = asset.profile.reconciler_params(self.options.extrapolation_margin);
        let timeline = reconcile(&telemetry, &params)?;
        warnings.extend(timeline.warnings.iter().cloned());
        let (start, end) = match (timeline.start(), timeline.end()) {
            (Some(s), Some(e)) => (s, e),
            _ => return Err(PrepError::ReconciliationImpossible { valid_fixes: 0 }),
        };

        tracker.enter(AssetState::Writing)?;
        self.cancel.check()?;
        let rewrite_options = RewriteOptions {
            strip_telemetry: asset.profile.params().strip_telemetry_for_svs,
        };
        let mux_params = MuxParams {
            max_invalid_sample_fraction: self.options.max_invalid_sample_fraction,
            ..MuxParams::default()
        };
        let ((svs, muxed), gpx) = rayon::join(
            || rayon::join(
                || rewrite_container(&asset.path, &outputs.svs, start, end, &rewrite_options),
                || mux_timeline(&asset.path, &outputs.muxed, &timeline, &mux_params),
            ),
            || outputs.gpx.as_ref()
                .map(|path| export_gpx(&timeline, path, &asset.stem))
                .transpose(),
        );
        // collect every writer's result before failing,
        // so the cleanup sees all persisted files
        let (svs, muxed, gpx) = (svs?, muxed?, gpx?);
        warnings.extend(svs.warnings);
        warnings.extend(muxed.warnings);
        let mut files = vec![muxed.output, svs.output];
        if let Some(gpx) = gpx {
            warnings.extend(gpx.warnings);
            files.push(gpx.output);
        }

        tracker.enter(AssetState::Validated)?;

        if let (Some(tools), Some(frames), Some(dir)) = (self.collaborators.as_ref(), self.options.frames.as_ref(), outputs.frames.as_ref()) {
            tracker.enter(AssetState::Sampling)?;
            self.cancel.check()?;
            std::fs::create_dir_all(dir)?;
            tools.sample_frames(&outputs.muxed, dir, frames.sample_distance)?;
            if self.options.nadir_patch() {
                if let Some(nadir) = frames.nadir_image.as_ref() {
                    let patched = tools.composite_all(dir, nadir)?;
                    log::info!("{}: nadir patched into {patched} frames", asset.stem);
                }
            }
            self.cancel.check()?;
            tools.tag_frames(dir)?;
            if let Some(account) = frames.account.as_ref() {
                self.cancel.check()?;
                tools.upload(dir, account)?;
            }
            files.push(dir.to_owned());
        }

        tracker.enter(AssetState::Done)?;
        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::{
        pipeline::{FrameOptions, Outcome},
        testdata::Mp4Builder,
        tools::{Invocation, ToolOutput},
        ErrorKind,
    };

    #[derive(Default)]
    struct FakeTools {
        calls: Mutex<Vec<String>>,
    }

    impl ToolRunner for FakeTools {
        fn run(&self, invocation: &Invocation, _timeout: std::time::Duration) -> Result<ToolOutput, PrepError> {
            if let Ok(mut calls) = self.calls.lock() {
                calls.push(invocation.tool.to_owned());
            }
            Ok(ToolOutput { code: Some(0), ..Default::default() })
        }
    }

    fn options(source: &Path, target: &Path) -> Options {
        Options {
            source_dir: source.to_owned(),
            target_dir: target.to_owned(),
            workers: 2,
            ..Default::default()
        }
    }

    #[test]
    fn output_names_follow_suffix_and_nadir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("nadir.png"), b"png").unwrap();
        let options = Options {
            file_suffix: "fixed".to_owned(),
            enable_nadir_patch: true,
            frames: Some(FrameOptions {
                nadir_image: Some(dir.path().join("nadir.png")),
                ..Default::default()
            }),
            ..options(dir.path(), Path::new("out"))
        };
        let orchestrator = Orchestrator::new(options).unwrap();
        let asset = SourceAsset {
            path: dir.path().join("GS010001.360"),
            profile: CameraProfile::MaxGen1,
            stem: "GS010001".to_owned(),
        };
        let outputs = orchestrator.outputs(&asset);
        assert_eq!(outputs.muxed, Path::new("out/GS010001_fixed_nadir.mp4"));
        assert_eq!(outputs.svs, Path::new("out/SVS_Fixed_Headers/GS010001_fixed_nadir_SVS.mp4"));
        assert_eq!(outputs.gpx.as_deref(), Some(Path::new("out/SVS_Fixed_Headers/GS010001_fixed_nadir_SVS.gpx")));
        assert_eq!(outputs.frames.as_deref(), Some(Path::new("out/mapillary_sampled_video_frames/GS010001_fixed_nadir")));
    }

    #[test]
    fn batch_continues_past_failures_and_skips_on_rerun() {
        let source = tempfile::tempdir().unwrap();
        let target = tempfile::tempdir().unwrap();
        Mp4Builder::default().write(source.path(), "GX010001.MP4");
        Mp4Builder::default().without_telemetry(true).write(source.path(), "GX010002.MP4");
        std::fs::write(source.path().join("readme.txt"), b"not a video").unwrap();

        let orchestrator = Orchestrator::new(options(source.path(), target.path())).unwrap();
        let report = orchestrator.run().unwrap();
        assert_eq!(report.results.len(), 2);
        assert_eq!(report.results[0].state, AssetState::Done);
        assert_eq!(report.results[0].outputs.len(), 3);
        assert!(report.results[0].outputs.iter().all(|p| p.is_file()));
        assert_eq!(report.results[1].error, Some(ErrorKind::MetadataAbsent));
        assert!(!target.path().join("GX010002.mp4").exists());

        let rerun = orchestrator.run().unwrap();
        assert_eq!(rerun.results[0].state, AssetState::Skipped);
        assert_eq!(rerun.results[1].outcome, Outcome::Failure);

        let log = std::fs::read_to_string(target.path().join(crate::RESULT_LOG)).unwrap();
        assert_eq!(log.lines().count(), 4);
    }

    #[test]
    fn frame_stage_calls_collaborators_in_order() {
        let source = tempfile::tempdir().unwrap();
        let target = tempfile::tempdir().unwrap();
        Mp4Builder::default().write(source.path(), "GX010001.MP4");
        let options = Options {
            frames: Some(FrameOptions { account: Some("someone".to_owned()), ..Default::default() }),
            ..options(source.path(), target.path())
        };

        let tools = Arc::new(FakeTools::default());
        let orchestrator = Orchestrator::with_runner(options, tools.clone()).unwrap();
        let report = orchestrator.run().unwrap();
        assert_eq!(report.results[0].state, AssetState::Done, "{report}");

        let calls = tools.calls.lock().unwrap();
        assert_eq!(calls.as_slice(), ["sample_video", "process", "upload"]);
    }

    /// Fails `sample_video` for one asset, by exit code or by timing out.
    struct BrokenSampler {
        asset: &'static str,
        timeout: bool,
        calls: Mutex<Vec<String>>,
    }

    impl ToolRunner for BrokenSampler {
        fn run(&self, invocation: &Invocation, timeout: std::time::Duration) -> Result<ToolOutput, PrepError> {
            if let Ok(mut calls) = self.calls.lock() {
                calls.push(invocation.tool.to_owned());
            }
            let hit = invocation.tool == "sample_video"
                && invocation.args.iter().any(|a| a.to_string_lossy().contains(self.asset));
            match (hit, self.timeout) {
                (true, true) => Err(PrepError::ExternalToolTimeout { tool: invocation.tool.to_owned(), timeout }),
                (true, false) => Ok(ToolOutput { code: Some(1), stderr: "no frames".to_owned(), ..Default::default() }),
                (false, _) => Ok(ToolOutput { code: Some(0), ..Default::default() }),
            }
        }
    }

    #[test]
    fn collaborator_failure_removes_asset_outputs() {
        for (timeout, kind) in [(false, ErrorKind::ExternalToolNonZeroExit), (true, ErrorKind::ExternalToolTimeout)] {
            let source = tempfile::tempdir().unwrap();
            let target = tempfile::tempdir().unwrap();
            Mp4Builder::default().write(source.path(), "GX010001.MP4");
            Mp4Builder::default().write(source.path(), "GX010002.MP4");
            let options = Options {
                frames: Some(FrameOptions::default()),
                ..options(source.path(), target.path())
            };

            let tools = Arc::new(BrokenSampler { asset: "GX010001", timeout, calls: Mutex::default() });
            let orchestrator = Orchestrator::with_runner(options, tools.clone()).unwrap();
            let report = orchestrator.run().unwrap();

            assert_eq!(report.results[0].state, AssetState::Failed(kind), "{report}");
            assert_eq!(report.results[1].state, AssetState::Done, "{report}");

            let assets = orchestrator.discover().unwrap();
            let failed = orchestrator.outputs(&assets[0]);
            assert!(failed.files().iter().all(|p| !p.exists()));
            assert!(!failed.frames.as_ref().unwrap().exists());
            let done = orchestrator.outputs(&assets[1]);
            assert!(done.files().iter().all(|p| p.exists()));

            // a timeout is retried once, an exit code is not
            let calls = tools.calls.lock().unwrap();
            let sampled = calls.iter().filter(|t| *t == "sample_video").count();
            assert_eq!(sampled, if timeout { 3 } else { 2 });
        }
    }

    #[test]
    fn cancelled_batch_records_cancellation() {
        let source = tempfile::tempdir().unwrap();
        let target = tempfile::tempdir().unwrap();
        Mp4Builder::default().write(source.path(), "GX010001.MP4");

        let orchestrator = Orchestrator::new(options(source.path(), target.path())).unwrap();
        orchestrator.cancel_token().cancel();
        let report = orchestrator.run().unwrap();
        assert_eq!(report.results[0].state, AssetState::Failed(ErrorKind::Cancelled));
        assert!(!target.path().join("GX010001.mp4").exists());
    }
}
