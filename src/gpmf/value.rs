//! GPMF value types and numeric decoding.

use time::{Date, Month, OffsetDateTime, PrimitiveDateTime, Time};

/// GPMF base types. Nested data (type `0`) is
/// represented by `Value::Nested` instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    /// `b`
    I8,
    /// `B`
    U8,
    /// `c`, single byte chars
    Char,
    /// `s`
    I16,
    /// `S`
    U16,
    /// `l`
    I32,
    /// `L`
    U32,
    /// `f`
    F32,
    /// `d`
    F64,
    /// `j`
    I64,
    /// `J`
    U64,
    /// `U`, UTC date time string `yymmddhhmmss.sss`
    Utc,
    /// `F`
    FourCC,
    /// `q`, Q15.16 fixed point
    Q15_16,
    /// `Q`, Q31.32 fixed point
    Q31_32,
    /// `?`, structure defined by a preceding `TYPE`
    Complex,
    /// Unknown type, raw data kept as is.
    Unknown(u8),
}

impl From<u8> for ValueType {
    fn from(value: u8) -> Self {
        match value {
            b'b' => Self::I8,
            b'B' => Self::U8,
            b'c' => Self::Char,
            b's' => Self::I16,
            b'S' => Self::U16,
            b'l' => Self::I32,
            b'L' => Self::U32,
            b'f' => Self::F32,
            b'd' => Self::F64,
            b'j' => Self::I64,
            b'J' => Self::U64,
            b'U' => Self::Utc,
            b'F' => Self::FourCC,
            b'q' => Self::Q15_16,
            b'Q' => Self::Q31_32,
            b'?' => Self::Complex,
            other => Self::Unknown(other),
        }
    }
}

impl ValueType {
    pub fn to_u8(&self) -> u8 {
        match self {
            Self::I8 => b'b',
            Self::U8 => b'B',
            Self::Char => b'c',
            Self::I16 => b's',
            Self::U16 => b'S',
            Self::I32 => b'l',
            Self::U32 => b'L',
            Self::F32 => b'f',
            Self::F64 => b'd',
            Self::I64 => b'j',
            Self::U64 => b'J',
            Self::Utc => b'U',
            Self::FourCC => b'F',
            Self::Q15_16 => b'q',
            Self::Q31_32 => b'Q',
            Self::Complex => b'?',
            Self::Unknown(b) => *b,
        }
    }

    /// Size in bytes of a single value.
    /// `None` for complex and unknown types.
    pub fn size(&self) -> Option<usize> {
        match self {
            Self::I8 | Self::U8 | Self::Char => Some(1),
            Self::I16 | Self::U16 => Some(2),
            Self::I32 | Self::U32 | Self::F32 | Self::FourCC | Self::Q15_16 => Some(4),
            Self::F64 | Self::I64 | Self::U64 | Self::Q31_32 => Some(8),
            Self::Utc => Some(16),
            Self::Complex | Self::Unknown(_) => None,
        }
    }

    /// Decodes one Big Endian value as `f64`.
    /// `None` for non-numeric types or too few bytes.
    pub(crate) fn read_f64(&self, bytes: &[u8]) -> Option<f64> {
        let b = bytes.get(.. self.size()?)?;
        let value = match self {
            Self::I8 => b[0] as i8 as f64,
            Self::U8 | Self::Char => b[0] as f64,
            Self::I16 => i16::from_be_bytes([b[0], b[1]]) as f64,
            Self::U16 => u16::from_be_bytes([b[0], b[1]]) as f64,
            Self::I32 => i32::from_be_bytes(b.try_into().ok()?) as f64,
            Self::U32 | Self::FourCC => u32::from_be_bytes(b.try_into().ok()?) as f64,
            Self::F32 => f32::from_be_bytes(b.try_into().ok()?) as f64,
            Self::F64 => f64::from_be_bytes(b.try_into().ok()?),
            Self::I64 => i64::from_be_bytes(b.try_into().ok()?) as f64,
            Self::U64 => u64::from_be_bytes(b.try_into().ok()?) as f64,
            Self::Q15_16 => i32::from_be_bytes(b.try_into().ok()?) as f64 / 65536.0,
            Self::Q31_32 => i64::from_be_bytes(b.try_into().ok()?) as f64 / 4294967296.0,
            Self::Utc | Self::Complex | Self::Unknown(_) => return None,
        };
        Some(value)
    }
}

/// Parses GPMF UTC string `yymmddhhmmss.sss`.
pub fn parse_gpsu(s: &str) -> Option<OffsetDateTime> {
    let s = s.trim_matches(char::from(0));
    if !s.is_ascii() || s.len() < 16 {
        return None
    }
    let yy: i32 = s[0..2].parse().ok()?;
    let month: u8 = s[2..4].parse().ok()?;
    let day: u8 = s[4..6].parse().ok()?;
    let hour: u8 = s[6..8].parse().ok()?;
    let minute: u8 = s[8..10].parse().ok()?;
    let second: u8 = s[10..12].parse().ok()?;
    let milli: u16 = s[13..16].parse().ok()?;

    let date = Date::from_calendar_date(2000 + yy, Month::try_from(month).ok()?, day).ok()?;
    let time = Time::from_hms_milli(hour, minute, second, milli).ok()?;
    Some(PrimitiveDateTime::new(date, time).assume_utc())
}

/// Formats datetime as GPMF UTC string `yymmddhhmmss.sss`.
/// `None` outside years 2000-2099.
pub fn format_gpsu(datetime: OffsetDateTime) -> Option<String> {
    let year = datetime.year();
    if !(2000..=2099).contains(&year) {
        return None
    }
    Some(format!(
        "{:02}{:02}{:02}{:02}{:02}{:02}.{:03}",
        year - 2000,
        u8::from(datetime.month()),
        datetime.day(),
        datetime.hour(),
        datetime.minute(),
        datetime.second(),
        datetime.millisecond()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn gpsu() {
        let dt = parse_gpsu("230601120005.250").unwrap();
        assert_eq!(dt, datetime!(2023-06-01 12:00:05.250 UTC));
        assert_eq!(format_gpsu(dt).as_deref(), Some("230601120005.250"));
        assert_eq!(parse_gpsu("231301120005.250"), None);
        assert_eq!(format_gpsu(datetime!(2100-01-01 0:00 UTC)), None);
    }

    #[test]
    fn numeric() {
        assert_eq!(ValueType::from(b'l').read_f64(&(-5_i32).to_be_bytes()), Some(-5.0));
        assert_eq!(ValueType::from(b'q').read_f64(&65536_i32.to_be_bytes()), Some(1.0));
        assert_eq!(ValueType::from(b'x'), ValueType::Unknown(b'x'));
        assert_eq!(ValueType::Utc.read_f64(&[0; 16]), None);
    }
}
