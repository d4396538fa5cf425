//! External collaborators: frame sampler, geotagger, uploader and
//! nadir compositor. All of them run behind `ToolRunner`, so tests
//! substitute fakes and never spawn processes.

mod collaborators;
mod runner;

pub use collaborators::{Collaborators, ToolPaths};
pub use runner::{run_with_retry, Invocation, ProcessRunner, ToolOutput, ToolRunner};
