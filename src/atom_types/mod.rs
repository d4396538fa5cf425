//! Fixed-layout atom bodies, parsed (and where needed written) with `binrw`.
//!
//! Each struct parses the data load of its atom, i.e. what follows the header.

mod co64;
mod hdlr;
mod mdhd;
mod mvhd;
mod stco;
mod stsc;
mod stsz;
mod stts;
mod timing;
mod tkhd;

pub use co64::Co64;
pub use hdlr::Hdlr;
pub use mdhd::Mdhd;
pub use mvhd::Mvhd;
pub use stco::Stco;
pub use stsc::{SampleToChunk, Stsc};
pub use stsz::Stsz;
pub use stts::{Stts, TimeToSample};
pub use timing::TimingLayout;
pub use tkhd::Tkhd;

use std::io::Cursor;

use binrw::{BinRead, BinReaderExt, BinWriterExt};

use crate::PrepError;

/// Adds `parse()` for atom data loads
/// (Big Endian, no arguments).
macro_rules! impl_parse {
    ($($atom:ty),*) => {
        $(
            impl $atom {
                pub fn parse(data: &[u8]) -> Result<Self, PrepError> {
                    Ok(Cursor::new(data).read_be::<$atom>()?)
                }
            }
        )*
    };
}

/// Adds `to_bytes()` for atom data loads that are re-written.
macro_rules! impl_to_bytes {
    ($($atom:ty),*) => {
        $(
            impl $atom {
                pub fn to_bytes(&self) -> Result<Vec<u8>, PrepError> {
                    let mut cursor = Cursor::new(Vec::new());
                    cursor.write_be(self)?;
                    Ok(cursor.into_inner())
                }
            }
        )*
    };
}

impl_parse!(Co64, Mdhd, Mvhd, Stco, Stsc, Stsz, Stts, Tkhd);
impl_to_bytes!(Co64, Stco, Stsc, Stsz, Stts);

/// Reads a 32-bit value for version 0 atoms,
/// 64-bit for version 1.
#[binrw::parser(reader, endian)]
pub(crate) fn versioned(version: u8) -> binrw::BinResult<u64> {
    match version {
        1 => u64::read_options(reader, endian, ()),
        _ => u32::read_options(reader, endian, ()).map(u64::from),
    }
}
