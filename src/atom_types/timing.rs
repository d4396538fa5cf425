//! Byte layout of the creation, modification and duration fields
//! shared by `mvhd`, `tkhd` and `mdhd`, for patching in place.
//!
//! ```ignore
//! mvhd/mdhd: [ver][flags x3][creation][modification][time_scale u32][duration]...
//! tkhd:      [ver][flags x3][creation][modification][track_id u32][reserved u32][duration]...
//! ```
//! Timing fields are 32-bit for version 0, 64-bit for version 1.

use std::io::Cursor;

use binrw::BinWriterExt;

use crate::PrepError;

/// Positions of timing fields relative to start of data load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimingLayout {
    pub version: u8,
    pub creation: usize,
    pub modification: usize,
    pub duration: usize,
}

impl TimingLayout {
    fn new(version: u8, between: usize) -> Self {
        let w = Self::field_width(version);
        Self {
            version,
            creation: 4,
            modification: 4 + w,
            duration: 4 + 2 * w + between,
        }
    }

    pub fn mvhd(version: u8) -> Self {
        Self::new(version, 4)
    }

    pub fn mdhd(version: u8) -> Self {
        Self::new(version, 4)
    }

    pub fn tkhd(version: u8) -> Self {
        Self::new(version, 8)
    }

    fn field_width(version: u8) -> usize {
        match version {
            1 => 8,
            _ => 4,
        }
    }

    /// Timing field width in bytes.
    pub fn width(&self) -> usize {
        Self::field_width(self.version)
    }

    /// Returns `true` if `value` fits a timing field.
    pub fn fits(&self, value: u64) -> bool {
        self.version == 1 || value <= u32::MAX as u64
    }

    /// Writes `value` at field position `pos` in `data`.
    pub fn patch(&self, data: &mut [u8], pos: usize, value: u64) -> Result<(), PrepError> {
        if !self.fits(value) {
            return Err(PrepError::ContainerUnsupported(format!(
                "value {value} does not fit a version {} timing field", self.version
            )));
        }
        if pos + self.width() > data.len() {
            return Err(PrepError::BoundsError(((pos + self.width()) as u64, data.len() as u64)));
        }
        let mut cursor = Cursor::new(data);
        cursor.set_position(pos as u64);
        match self.version {
            1 => cursor.write_be(&value)?,
            _ => cursor.write_be(&(value as u32))?,
        }
        Ok(())
    }

    /// Converts a version 0 data load to version 1,
    /// widening the three timing fields. Returns the new data load
    /// and its layout. Version 1 data is returned as is.
    pub fn upgrade(&self, data: &[u8]) -> Result<(Vec<u8>, TimingLayout), PrepError> {
        if self.version == 1 {
            return Ok((data.to_vec(), *self));
        }
        let end = self.duration + 4;
        if data.len() < end {
            return Err(PrepError::BoundsError((end as u64, data.len() as u64)));
        }
        let read = |pos: usize| u32::from_be_bytes([data[pos], data[pos + 1], data[pos + 2], data[pos + 3]]) as u64;

        let mut out = Vec::with_capacity(data.len() + 12);
        out.push(1);
        out.extend_from_slice(&data[1 .. 4]);
        out.extend_from_slice(&read(self.creation).to_be_bytes());
        out.extend_from_slice(&read(self.modification).to_be_bytes());
        out.extend_from_slice(&data[self.modification + 4 .. self.duration]);
        out.extend_from_slice(&read(self.duration).to_be_bytes());
        out.extend_from_slice(&data[end ..]);

        let between = self.duration - (self.modification + 4);
        Ok((out, Self::new(1, between)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layouts() {
        assert_eq!(TimingLayout::mvhd(0).duration, 16);
        assert_eq!(TimingLayout::mvhd(1).duration, 24);
        assert_eq!(TimingLayout::tkhd(0).duration, 20);
        assert_eq!(TimingLayout::tkhd(1).duration, 28);
    }

    #[test]
    fn patch_and_upgrade() {
        let mut data = vec![0_u8; 24];
        let layout = TimingLayout::tkhd(0);
        layout.patch(&mut data, layout.creation, 7).unwrap();
        layout.patch(&mut data, layout.duration, 9).unwrap();
        assert_eq!(&data[4 .. 8], &[0, 0, 0, 7]);
        assert!(layout.patch(&mut data, layout.modification, u32::MAX as u64 + 1).is_err());

        let (wide, v1) = layout.upgrade(&data).unwrap();
        assert_eq!(wide.len(), 36);
        assert_eq!(wide[0], 1);
        assert_eq!(&wide[v1.creation .. v1.creation + 8], &7_u64.to_be_bytes());
        assert_eq!(&wide[v1.duration .. v1.duration + 8], &9_u64.to_be_bytes());
        assert_eq!(v1, TimingLayout::tkhd(1));
    }
}
