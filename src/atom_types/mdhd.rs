//! Media header atom (`mdhd`).
//!
//! Similar to `mvhd`,
//! but only describes a single track (`trak`).
//!
//! Location: `moov/trak/mdia/mdhd`
//!
//! See: <https://developer.apple.com/documentation/quicktime-file-format/media_header_atom>

use binrw::BinRead;

use super::{versioned, TimingLayout};

/// Media header atom ('mdhd'). One per track (`trak`).
/// Specifies the characteristics of a media (`mdia`), including time scale and duration.
///
/// Path: `moov/trak/mdia/mdhd`
#[derive(Debug, Clone, BinRead)]
#[br(big)]
pub struct Mdhd {
    pub(crate) version: u8,
    _flags: [u8; 3],
    #[br(parse_with = versioned, args(version))]
    pub(crate) creation_time: u64,
    #[br(parse_with = versioned, args(version))]
    pub(crate) modification_time: u64,
    pub(crate) time_scale: u32,
    /// Unscaled duration. I.e. "ticks"
    /// that require dividing by time scale
    /// to derive a value in seconds.
    #[br(parse_with = versioned, args(version))]
    pub(crate) duration: u64,
    /// ISO-639-2/T language code, unpacked from three 5-bit letters.
    #[br(map = |data: u16| language_code(data))]
    pub(crate) language: String,
    pub(crate) quality: u16,
}

impl Mdhd {
    pub fn time_scale(&self) -> u32 {
        self.time_scale
    }

    pub fn duration(&self) -> u64 {
        self.duration
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    pub fn quality(&self) -> u16 {
        self.quality
    }

    /// Byte positions of timing fields in data load.
    pub fn layout(&self) -> TimingLayout {
        TimingLayout::mdhd(self.version)
    }
}

/// Three letter language code. Values below 0x400 are
/// old Macintosh codes and have no letters.
fn language_code(data: u16) -> String {
    if data < 0x400 {
        return String::new()
    }
    [10_u16, 5, 0].iter()
        .map(|shift| (((data >> shift) & 0x1f) as u8 + 0x60) as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::Mdhd;

    #[test]
    fn language_and_quality() {
        let mut data = vec![0_u8; 12];
        data.extend_from_slice(&1000_u32.to_be_bytes());
        data.extend_from_slice(&3000_u32.to_be_bytes());
        data.extend_from_slice(&0x55c4_u16.to_be_bytes());
        data.extend_from_slice(&7_u16.to_be_bytes());
        let mdhd = Mdhd::parse(&data).unwrap();
        assert_eq!(mdhd.language(), "und");
        assert_eq!(mdhd.quality(), 7);
        assert_eq!(mdhd.time_scale(), 1000);
        assert_eq!(mdhd.duration(), 3000);
    }
}
