//! Pipeline orchestration: options, camera profiles,
//! the per-asset state machine and batch results.

mod options;
mod orchestrator;
mod profile;
mod result;
mod state;

pub use options::{FrameOptions, Options};
pub use orchestrator::{AssetOutputs, CancelToken, Orchestrator, SourceAsset};
pub use profile::{CameraProfile, ProfileParams};
pub use result::{BatchReport, Outcome, PipelineResult, ResultLog};
pub use state::AssetState;
