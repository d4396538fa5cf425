//! Time-to-sample atom (`stts`).
//!
//! Location: `moov/trak[multiple]/mdia/minf/stbl/stts`
//!
//! See <https://developer.apple.com/documentation/quicktime-file-format/time-to-sample_atom>

use binrw::binrw;

#[binrw]
#[brw(big)]
#[derive(Debug, Clone, PartialEq)]
pub struct TimeToSample {
    pub(crate) sample_count: u32,
    pub(crate) sample_duration: u32,
}

/// Time to sample atom (`stts`).
///
/// Path: `moov/trak[multiple]/mdia/minf/stbl/stts`
#[binrw]
#[brw(big)]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Stts {
    _version: u8,
    _flags: [u8; 3],
    #[br(temp)]
    #[bw(calc = table.len() as u32)]
    no_of_entries: u32,
    #[br(count = no_of_entries)]
    table: Vec<TimeToSample>
}

impl Stts {
    /// Run-length encodes unscaled sample durations.
    pub fn from_durations(durations: &[u32]) -> Self {
        let mut table: Vec<TimeToSample> = Vec::new();
        for d in durations.iter() {
            match table.last_mut() {
                Some(t) if t.sample_duration == *d => t.sample_count += 1,
                _ => table.push(TimeToSample { sample_count: 1, sample_duration: *d }),
            }
        }
        Self { table, ..Self::default() }
    }

    /// Returns total number of samples.
    ///
    /// If an entry lists a duration for four samples,
    /// it counts as four entries towards the total.
    pub fn len(&self) -> usize {
        self.table.iter()
            .map(|t| t.sample_count as usize)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns discrete list of unscaled duration values.
    pub fn durations(&self) -> Vec<u32> {
        self.table.iter()
            .flat_map(|t| vec![t.sample_duration; t.sample_count as usize])
            .collect()
    }

    /// Sum of all unscaled sample durations.
    pub fn duration_sum(&self) -> u64 {
        self.table.iter()
            .map(|t| t.sample_duration as u64 * t.sample_count as u64)
            .sum()
    }
}
