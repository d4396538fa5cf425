//! Chunk offset atom for file sizes below the 32bit limit (`stco`).
//!
//! Location: `moov/trak[multiple]/mdia/minf/stbl/stco`
//!
//! See: <https://developer.apple.com/documentation/quicktime-file-format/chunk_offset_atom>

use binrw::binrw;

/// Chunk offset atom for file sizes below the 32bit limit (`stco`).
#[binrw]
#[brw(big)]
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Stco {
    pub(crate) version: u8,
    pub(crate) flags: [u8; 3],
    #[br(temp)]
    #[bw(calc = offsets.len() as u32)]
    no_of_entries: u32,
    /// Chunk offset table consisting of an array of offset values.
    #[br(count = no_of_entries)]
    pub(crate) offsets: Vec<u32>
}

impl Stco {
    /// Returns `None` if any offset exceeds 32 bits.
    pub fn from_offsets(offsets: &[u64]) -> Option<Self> {
        let offsets = offsets.iter()
            .map(|o| u32::try_from(*o).ok())
            .collect::<Option<Vec<u32>>>()?;
        Some(Self { offsets, ..Self::default() })
    }

    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    pub fn offsets(&self) -> Vec<u64> {
        self.offsets.iter().map(|o| *o as u64).collect()
    }
}
