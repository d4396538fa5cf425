//! Raw track sample, complete with duration and relative timestamp.

/// Raw sample data load.
#[derive(Debug, Default, Clone)]
pub struct Sample {
    /// Index in track.
    pub index: usize,
    /// Start time relative to track start in seconds.
    pub relative_time: f64,
    /// Duration in seconds.
    pub duration: f64,
    /// Raw bytes.
    pub data: Vec<u8>,
}
