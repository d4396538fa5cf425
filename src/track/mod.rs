//! Tracks (`trak`) with resolved sample byte offsets, sizes and durations.

mod offset;
mod sample;
mod track;

pub use offset::SampleOffset;
pub use sample::Sample;
pub use track::Track;

pub(crate) use offset::chunk_offsets;
