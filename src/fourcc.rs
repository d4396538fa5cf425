//! MP4 atom FourCC.
//!
//! Only atoms the rewriters create or relocate have their own variant.
//! Everything else is kept as `Custom` and written back unchanged.

use std::fmt;

/// MP4 atom Four CC.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FourCC {
    /// Chunk offset, 64-bit values
    Co64,
    Free,
    /// Media data
    Mdat,
    Moov,
    /// Chunk offset, 32-bit values
    Stco,
    Stsc,
    Stsz,
    Stts,
    Trak,
    Custom(String)
}

impl FourCC {
    /// Single-byte chars, so that e.g. '©xyz' survives a rewrite.
    pub fn from_slice(fourcc: &[u8]) -> Self {
        match fourcc {
            b"co64" => Self::Co64,
            b"free" => Self::Free,
            b"mdat" => Self::Mdat,
            b"moov" => Self::Moov,
            b"stco" => Self::Stco,
            b"stsc" => Self::Stsc,
            b"stsz" => Self::Stsz,
            b"stts" => Self::Stts,
            b"trak" => Self::Trak,
            _ => Self::Custom(fourcc.iter().map(|b| *b as char).collect()),
        }
    }

    pub fn to_str(&self) -> &str {
        match self {
            Self::Co64 => "co64",
            Self::Free => "free",
            Self::Mdat => "mdat",
            Self::Moov => "moov",
            Self::Stco => "stco",
            Self::Stsc => "stsc",
            Self::Stsz => "stsz",
            Self::Stts => "stts",
            Self::Trak => "trak",
            Self::Custom(s) => s.as_str()
        }
    }

    /// Bytes for the atom header. Short names are space padded.
    pub fn to_bytes(&self) -> [u8; 4] {
        let mut bytes = [b' '; 4];
        for (i, c) in self.to_str().chars().take(4).enumerate() {
            bytes[i] = c as u32 as u8;
        }
        bytes
    }
}

impl Default for FourCC {
    fn default() -> Self {
        Self::Custom(String::from("    "))
    }
}

impl fmt::Display for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_str())
    }
}

#[cfg(test)]
mod tests {
    use super::FourCC;

    #[test]
    fn extended_ascii_survives() {
        let raw = [0xA9, b'x', b'y', b'z'];
        let fourcc = FourCC::from_slice(&raw);
        assert_eq!(fourcc.to_bytes(), raw);
        assert_eq!(FourCC::from_slice(b"moov"), FourCC::Moov);
        assert_eq!(FourCC::from_slice(b"uuid").to_string(), "uuid");
    }
}
