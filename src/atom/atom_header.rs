use std::{io::{Read, Seek, Write}, ops::Range};

use binrw::{BinReaderExt, BinWriterExt};

use crate::{FourCC, PrepError, CONTAINER};

/// Atom header.
/// 8 or 16 bytes in MP4, depending on whether
/// 32 or 64-bit sized.
///
/// ```ignore
/// | [X X X X] [Y Y Y Y] [Z Z Z Z Z Z Z Z] |
///    |         |         |
///    |         |         64bit size (optional, only if 32 bit size == 1)
///    |         FourCC
///    32bit size
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AtomHeader {
    /// Total atom size in bytes including 8/16 byte header.
    pub(crate) atom_size: u64,
    /// FourCC
    pub(crate) name: FourCC,
    /// Absolute byte offset for start of atom in MP4,
    /// i.e. byte offset for its header,
    /// starting with 32-bit size.
    pub(crate) offset: u64,
    /// Set to `true` if atom size specified
    /// in 64 bit area. E.g. insta360 seems to
    /// specify all sizes as 64 bit regardless
    /// of actual atom size. Kept so that a rewritten
    /// atom keeps its header size.
    pub(crate) size_64bit: bool
}

impl AtomHeader {
    /// Reads header at current position.
    ///
    /// `base` is the absolute file offset that position 0 in `reader`
    /// corresponds to, `end` the (relative) end of the enclosing
    /// atom or file. A 32-bit size of 0 means the atom extends to `end`.
    pub(crate) fn read<R: Read + Seek>(
        reader: &mut R,
        base: u64,
        end: u64,
    ) -> Result<Self, PrepError> {
        let rel = reader.stream_position()?;
        let offset = base + rel;

        // Read 32bit total atom size
        let size32 = reader.read_be::<u32>()?;

        // Can not read fourcc name as utf-8 since some
        // manufacturers use single-byte extended ascii/ISO8859-1
        let name = FourCC::from_slice(&reader.read_be::<[u8; 4]>()?);

        let (atom_size, size_64bit) = match size32 {
            0 => (end - rel, false),
            1 => (reader.read_be::<u64>()?, true),
            n => (n as u64, false),
        };

        let hdr = Self {
            atom_size,
            name,
            offset,
            size_64bit,
        };

        if hdr.atom_size < hdr.header_size() as u64 {
            return Err(PrepError::UnexpectedAtomSize {
                len: hdr.atom_size,
                offset: hdr.offset,
            });
        }
        if rel + hdr.atom_size > end {
            return Err(PrepError::BoundsError((base + rel + hdr.atom_size, base + end)));
        }

        Ok(hdr)
    }

    /// Writes an atom header for `data_size` bytes of data.
    /// A 64-bit size is used if `size_64bit` is set or the total
    /// size does not fit in 32 bits. Returns header size.
    pub(crate) fn write<W: Write + Seek>(
        writer: &mut W,
        name: &FourCC,
        data_size: u64,
        size_64bit: bool,
    ) -> Result<u64, PrepError> {
        let hdr_size = Self::required_header_size(data_size, size_64bit);
        let total = data_size + hdr_size;
        match hdr_size {
            16 => {
                writer.write_be(&1_u32)?;
                writer.write_be(&name.to_bytes())?;
                writer.write_be(&total)?;
            },
            _ => {
                writer.write_be(&(total as u32))?;
                writer.write_be(&name.to_bytes())?;
            }
        }
        Ok(hdr_size)
    }

    /// Header size needed for `data_size` bytes of data.
    pub(crate) fn required_header_size(data_size: u64, size_64bit: bool) -> u64 {
        match size_64bit || data_size + 8 > u32::MAX as u64 {
            true => 16,
            false => 8,
        }
    }

    /// Convenience method to check whether atom at current offset is
    /// a container or not.
    pub fn is_container(&self) -> bool {
        CONTAINER.contains(&self.name.to_str())
    }

    pub fn start(&self) -> u64 {
        self.offset
    }

    pub fn end(&self) -> u64 {
        self.offset + self.atom_size
    }

    pub fn atom_size(&self) -> u64 {
        self.atom_size
    }

    pub fn name(&self) -> &FourCC {
        &self.name
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Header size in bytes in MP4.
    /// Returns 8 or 16 bytes.
    pub fn header_size(&self) -> u8 {
        match self.size_64bit {
            true => 16,
            false => 8,
        }
    }

    /// Data load absolute offset,
    /// i.e. position after header
    /// adjusted for optional 64bit size value.
    pub fn data_offset(&self) -> u64 {
        self.offset + self.header_size() as u64
    }

    /// Size of data load, adjusted for header size
    /// (excludes header size).
    pub fn data_size(&self) -> u64 {
        self.atom_size - self.header_size() as u64
    }

    /// Returns start, end offset range for atom.
    pub fn bounds(&self) -> Range<u64> {
        self.offset .. self.end()
    }

    /// Returns `true` is absolute offset `pos`
    /// is contained within atom span.
    ///
    /// Inclusive lower bound, exclusive upper bound.
    pub fn contains(&self, pos: u64) -> bool {
        self.offset <= pos && self.end() > pos
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    #[test]
    fn read_32_and_64_bit_headers() {
        let mut data = Vec::new();
        data.extend_from_slice(&16_u32.to_be_bytes());
        data.extend_from_slice(b"free");
        data.extend_from_slice(&[0; 8]);
        data.extend_from_slice(&1_u32.to_be_bytes());
        data.extend_from_slice(b"mdat");
        data.extend_from_slice(&20_u64.to_be_bytes());
        data.extend_from_slice(&[0; 4]);

        let len = data.len() as u64;
        let mut cursor = Cursor::new(data);
        let free = AtomHeader::read(&mut cursor, 100, len).unwrap();
        assert_eq!(free.name(), &FourCC::Free);
        assert_eq!(free.offset(), 100);
        assert_eq!(free.data_offset(), 108);

        cursor.set_position(16);
        let mdat = AtomHeader::read(&mut cursor, 100, len).unwrap();
        assert!(mdat.size_64bit);
        assert_eq!(mdat.data_size(), 4);
        assert!(mdat.contains(135));
        assert!(!mdat.contains(136));
    }

    #[test]
    fn zero_size_extends_to_end() {
        let mut data = vec![0, 0, 0, 0];
        data.extend_from_slice(b"mdat");
        data.extend_from_slice(&[7; 12]);
        let len = data.len() as u64;
        let hdr = AtomHeader::read(&mut Cursor::new(data), 0, len).unwrap();
        assert_eq!(hdr.atom_size(), 20);
    }

    #[test]
    fn oversized_atom_is_rejected() {
        let mut data = 64_u32.to_be_bytes().to_vec();
        data.extend_from_slice(b"free");
        let len = data.len() as u64;
        let result = AtomHeader::read(&mut Cursor::new(data), 0, len);
        assert!(matches!(result, Err(PrepError::BoundsError(_))));
    }
}
