//! Sample size atom (`stsz`).
//!
//! Location: `moov/trak[multiple]/mdia/minf/stbl/stsz`
//!
//! See: <https://developer.apple.com/documentation/quicktime-file-format/sample_size_atom>

use binrw::binrw;

/// Sample size atom (`stsz`).
#[binrw]
#[brw(big)]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Stsz {
    _version: u8,
    _flags: [u8; 3],
    /// If all samples are the same size,
    /// this is the size. Otherwise 0
    /// and sizes are listed in `sizes`.
    pub(crate) sample_size: u32,
    pub(crate) no_of_entries: u32,
    #[br(count = if sample_size == 0 {no_of_entries} else {0})]
    pub(crate) sizes: Vec<u32>,
}

impl Stsz {
    pub fn from_sizes(sizes: Vec<u32>) -> Self {
        Self {
            sample_size: 0,
            no_of_entries: sizes.len() as u32,
            sizes,
            ..Self::default()
        }
    }

    /// Number of samples.
    pub fn len(&self) -> usize {
        self.no_of_entries as usize
    }

    pub fn is_empty(&self) -> bool {
        self.no_of_entries == 0
    }

    /// Size of each sample, expanding
    /// a uniform sample size.
    pub fn sizes(&self) -> Vec<u32> {
        match self.sample_size {
            0 => self.sizes.to_owned(),
            n => vec![n; self.no_of_entries as usize],
        }
    }
}
