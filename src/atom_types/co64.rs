//! Chunk to offset atom for file sizes above the 32bit limit (`co64`).
//! The 64-bit equivalent of the `stco` atom.
//!
//! Path: `moov/trak[multiple]/mdia/minf/stbl/co64`

use binrw::binrw;

use crate::Stco;

/// Chunk to offset atom for file sizes above the 32bit limit (`co64`).
#[binrw]
#[brw(big)]
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Co64 {
    _version: u8,
    _flags: [u8; 3],
    #[br(temp)]
    #[bw(calc = offsets.len() as u32)]
    no_of_entries: u32,
    #[br(count = no_of_entries)]
    offsets: Vec<u64>
}

impl Co64 {
    pub fn from_offsets(offsets: Vec<u64>) -> Self {
        Self { offsets, ..Self::default() }
    }

    /// Returns number of chunks.
    /// (each chunk correspinds to one or more samples).
    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// Returns chunk byte offsets.
    pub fn offsets(&self) -> &[u64] {
        &self.offsets
    }
}

impl From<Stco> for Co64 {
    fn from(value: Stco) -> Self {
        Self::from_offsets(value.offsets())
    }
}
