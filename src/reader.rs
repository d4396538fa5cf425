use std::{
    fs::File,
    io::{BufReader, Read, Seek, SeekFrom, Write},
    path::Path,
};

use crate::{AtomHeader, PrepError};

/// `BufReader` over an MP4 file,
/// for reading top-level atom headers
/// and sized data loads without loading `mdat`.
#[derive(Debug)]
pub(crate) struct Mp4Reader {
    /// File size.
    pub(crate) len: u64,
    /// Reader over the full MP4 file.
    pub(crate) file_reader: BufReader<File>,
}

impl Mp4Reader {
    pub(crate) fn open(path: &Path) -> Result<Self, PrepError> {
        // GoPro often stores telemetry with chunk sizes
        // just above the default 8KiB buffer size
        Self::with_capacity(File::open(path)?, Some(64 * 1024))
    }

    pub(crate) fn with_capacity(
        file: File,
        capacity: Option<usize>
    ) -> Result<Self, PrepError> {
        let len = file.metadata()?.len();
        let file_reader = match capacity {
            Some(cap) => BufReader::with_capacity(cap, file),
            None => BufReader::new(file),
        };
        Ok(Self { len, file_reader })
    }

    /// Seeks to position `pos`.
    pub(crate) fn seek(&mut self, pos: SeekFrom) -> Result<u64, PrepError> {
        Ok(self.file_reader.seek(pos)?)
    }

    /// Returns current position.
    pub(crate) fn pos(&mut self) -> Result<u64, PrepError> {
        Ok(self.file_reader.stream_position()?)
    }

    /// Reads atom header at current position,
    /// or at `pos` if specified.
    pub(crate) fn header(&mut self, pos: Option<SeekFrom>) -> Result<AtomHeader, PrepError> {
        if let Some(p) = pos {
            self.seek(p)?;
        }
        AtomHeader::read(&mut self.file_reader, 0, self.len)
    }

    /// Reads `len` bytes at absolute position `pos`.
    /// Raises a bounds error rather than reading past end of file.
    pub(crate) fn read_at(&mut self, pos: u64, len: u64) -> Result<Vec<u8>, PrepError> {
        if pos + len > self.len {
            return Err(PrepError::BoundsError((pos + len, self.len)))
        }
        self.seek(SeekFrom::Start(pos))?;
        let mut buf = vec![0_u8; len as usize];
        self.file_reader.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// Copies `len` bytes at absolute position `pos` to `writer`
    /// without buffering the full range.
    pub(crate) fn copy_to<W: Write>(&mut self, pos: u64, len: u64, writer: &mut W) -> Result<u64, PrepError> {
        if pos + len > self.len {
            return Err(PrepError::BoundsError((pos + len, self.len)))
        }
        self.seek(SeekFrom::Start(pos))?;
        let copied = std::io::copy(&mut (&mut self.file_reader).take(len), writer)?;
        if copied != len {
            return Err(PrepError::ReadMismatch { got: copied, expected: len })
        }
        Ok(copied)
    }

    /// Reads all top-level headers, seeking past each data load.
    pub(crate) fn top_level(&mut self) -> Result<Vec<AtomHeader>, PrepError> {
        let mut headers = Vec::new();
        let mut pos = 0;
        while pos < self.len {
            if self.len - pos < 8 {
                return Err(PrepError::UnexpectedAtomSize { len: self.len - pos, offset: pos });
            }
            let hdr = self.header(Some(SeekFrom::Start(pos)))?;
            pos = hdr.end();
            headers.push(hdr);
        }
        Ok(headers)
    }
}
