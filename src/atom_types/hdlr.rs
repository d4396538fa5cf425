//! Handler reference atom (`hdlr`).
//!
//! See: <https://developer.apple.com/documentation/quicktime-file-format/handler_reference_atom>

use std::io::Cursor;

use binrw::{BinRead, BinReaderExt};

use crate::{support::{chars_from_bytes, counted_string, null_terminated_string}, PrepError};

/// Handler reference atom (`hdlr`)
#[derive(Debug, Default, BinRead)]
#[br(big)]
pub struct Hdlr {
    _version: u8,
    _flags: [u8; 3],
    /// Possible values:
    /// - `mhlr`: media handler
    /// - `dhlr`: data handler
    /// - `[0, 0, 0, 0]` (MP4)
    #[br(map(|data: [u8; 4]| chars_from_bytes(data)))]
    pub(crate) component_type: [char; 4],
    /// Four CC for the type of media or data handler,
    /// e.g. `vide`, `soun`, `meta`.
    #[br(map(|data: [u8; 4]| chars_from_bytes(data)))]
    pub(crate) component_sub_type: [char; 4],
    /// Reserved, should be set to 0.
    _component_manufacturer: u32,
    /// Reserved, should be set to 0.
    _component_flags: u32,
    /// Reserved, should be set to 0.
    _component_flags_mask: u32,
    /// May be a counted string (first byte specifies size),
    /// null terminated string, or neither.
    ///
    /// Parsed separately, since for some old MP4/Quicktimes
    /// `component_name` is not a counted string.
    #[br(ignore)]
    pub(crate) component_name: String,
}

impl Hdlr {
    /// Parses `hdlr` data load including the component name.
    pub fn parse(data: &[u8]) -> Result<Self, PrepError> {
        let mut cursor = Cursor::new(data);
        let mut hdlr = cursor.read_be::<Hdlr>()?;
        let rem = &data[cursor.position() as usize ..];
        hdlr.component_name = match rem.first() {
            // control char as first byte: counted string
            Some(n) if *n < 0x20 => counted_string(rem, true)
                .unwrap_or_else(|| null_terminated_string(&rem[1..])),
            Some(_) => null_terminated_string(rem),
            None => String::new(),
        };
        Ok(hdlr)
    }

    /// Returns component sub type as `String`,
    /// e.g. `vide` for video tracks.
    pub fn component_sub_type(&self) -> String {
        self.component_sub_type.iter().collect()
    }

    pub fn component_type(&self) -> String {
        self.component_type.iter().collect()
    }

    /// Handler name, trailing whitespace removed.
    pub fn component_name(&self) -> &str {
        self.component_name.trim_end()
    }
}

#[cfg(test)]
mod tests {
    use super::Hdlr;

    fn hdlr(sub_type: &[u8; 4], name: &[u8]) -> Vec<u8> {
        let mut data = vec![0; 8];
        data.extend_from_slice(sub_type);
        data.extend_from_slice(&[0; 12]);
        data.extend_from_slice(name);
        data
    }

    #[test]
    fn counted_and_null_terminated_names() {
        let counted = Hdlr::parse(&hdlr(b"meta", b"\x0AGoPro MET ")).unwrap();
        assert_eq!(counted.component_name(), "GoPro MET");
        assert_eq!(counted.component_sub_type(), "meta");

        let terminated = Hdlr::parse(&hdlr(b"vide", b"GoPro H.265\0")).unwrap();
        assert_eq!(terminated.component_name(), "GoPro H.265");
    }
}
