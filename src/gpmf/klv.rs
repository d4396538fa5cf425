//! GPMF Key-Length-Value records.
//!
//! ```ignore
//! | [K K K K] [T] [S] [R R] [D D D ... padding] |
//!    |         |   |   |     |
//!    |         |   |   |     data, struct size x repeat, padded to 32 bits
//!    |         |   |   repeat, Big Endian u16
//!    |         |   struct size in bytes
//!    |         type, 0 = nested
//!    FourCC key
//! ```

use std::fmt;

use time::OffsetDateTime;

use crate::{support::pad32, PrepError, GPMF_MAX_DEPTH};

use super::value::{parse_gpsu, ValueType};

/// GPMF FourCC key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Key(pub [u8; 4]);

impl Key {
    /// Device container.
    pub const DEVC: Key = Key(*b"DEVC");
    /// Device ID.
    pub const DVID: Key = Key(*b"DVID");
    /// Device name.
    pub const DVNM: Key = Key(*b"DVNM");
    /// Stream container.
    pub const STRM: Key = Key(*b"STRM");
    /// Stream name.
    pub const STNM: Key = Key(*b"STNM");
    /// Device clock, microseconds.
    pub const STMP: Key = Key(*b"STMP");
    /// Total samples delivered.
    pub const TSMP: Key = Key(*b"TSMP");
    /// Scaling divisors.
    pub const SCAL: Key = Key(*b"SCAL");
    /// SI units.
    pub const SIUN: Key = Key(*b"SIUN");
    /// Display units.
    pub const UNIT: Key = Key(*b"UNIT");
    /// Structure of complex type `?`.
    pub const TYPE: Key = Key(*b"TYPE");
    /// GPS UTC time of first GPS5 row.
    pub const GPSU: Key = Key(*b"GPSU");
    /// GPS fix: 0 none, 2 2D, 3 3D.
    pub const GPSF: Key = Key(*b"GPSF");
    /// GPS dilution of precision x 100.
    pub const GPSP: Key = Key(*b"GPSP");
    /// Lat, lon, alt, 2D speed, 3D speed.
    pub const GPS5: Key = Key(*b"GPS5");
    /// GPS5 plus days, seconds, DOP, fix per row.
    pub const GPS9: Key = Key(*b"GPS9");
    /// Camera orientation quaternions.
    pub const CORI: Key = Key(*b"CORI");

    /// Keys are printable ASCII.
    pub fn is_valid(&self) -> bool {
        self.0.iter().all(|b| b.is_ascii_alphanumeric() || *b == b' ' || *b == b'_')
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s: String = self.0.iter().map(|b| *b as char).collect();
        write!(f, "{s}")
    }
}

/// Counts collected while parsing.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct ParseStats {
    /// Records parsed.
    pub records: usize,
    /// Malformed records skipped.
    pub skipped: usize,
}

/// Typed data load of a non-nested record.
#[derive(Debug, Clone, PartialEq)]
pub struct Payload {
    pub value_type: ValueType,
    /// Size of one structure in bytes.
    pub struct_size: u8,
    /// Number of structures.
    pub repeat: u16,
    /// Raw data, excluding padding.
    pub raw: Vec<u8>,
}

impl Payload {
    /// Decodes numeric structures row by row.
    ///
    /// Complex types (`?`) require the type definition from a preceding `TYPE`.
    /// Returns `None` if types and struct size disagree.
    pub fn rows(&self, complex: Option<&[ValueType]>) -> Option<Vec<Vec<f64>>> {
        let types: Vec<ValueType> = match self.value_type {
            ValueType::Complex => complex?.to_vec(),
            t => {
                let size = t.size()?;
                if self.struct_size as usize % size != 0 {
                    return None
                }
                vec![t; self.struct_size as usize / size]
            }
        };
        let row_size = types.iter()
            .map(|t| t.size())
            .sum::<Option<usize>>()?;
        if row_size == 0 || row_size != self.struct_size as usize {
            return None
        }

        self.raw.chunks_exact(row_size)
            .map(|row| {
                let mut pos = 0;
                types.iter()
                    .map(|t| {
                        let value = t.read_f64(&row[pos ..]);
                        pos += t.size().unwrap_or(0);
                        value
                    })
                    .collect::<Option<Vec<f64>>>()
            })
            .collect()
    }

    /// All numeric values in order.
    pub fn values(&self) -> Option<Vec<f64>> {
        Some(self.rows(None)?.into_iter().flatten().collect())
    }

    /// First numeric value.
    pub fn first(&self) -> Option<f64> {
        self.values()?.first().copied()
    }

    /// Data as single-byte chars, nulls dropped.
    pub fn as_string(&self) -> String {
        self.raw.iter()
            .filter(|b| **b != 0)
            .map(|b| *b as char)
            .collect()
    }

    /// `U` or `c` data as a GPMF UTC datetime.
    pub fn as_utc(&self) -> Option<OffsetDateTime> {
        parse_gpsu(&self.as_string())
    }

    /// `TYPE` definition as value types.
    pub fn as_types(&self) -> Vec<ValueType> {
        self.raw.iter()
            .filter(|b| **b != 0)
            .map(|b| ValueType::from(*b))
            .collect()
    }
}

/// Record value: nested records, or typed data.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Nested(Vec<Klv>),
    Data(Payload),
}

/// A single GPMF record.
#[derive(Debug, Clone, PartialEq)]
pub struct Klv {
    pub key: Key,
    pub value: Value,
}

impl Klv {
    /// Nested record.
    pub fn nested(key: Key, children: Vec<Klv>) -> Self {
        Self { key, value: Value::Nested(children) }
    }

    /// Data record. `raw` must hold `struct_size` x `repeat` bytes.
    pub fn data(key: Key, value_type: ValueType, struct_size: u8, repeat: u16, raw: Vec<u8>) -> Self {
        Self {
            key,
            value: Value::Data(Payload { value_type, struct_size, repeat, raw }),
        }
    }

    /// Parses all records in `data`.
    ///
    /// Malformed records are skipped and counted in `stats`.
    /// A record whose length runs past its parent ends parsing
    /// of that level, since there is no way to resynchronise.
    pub fn parse(data: &[u8], stats: &mut ParseStats) -> Result<Vec<Klv>, PrepError> {
        Self::parse_level(data, 0, stats)
    }

    fn parse_level(data: &[u8], depth: usize, stats: &mut ParseStats) -> Result<Vec<Klv>, PrepError> {
        if depth > GPMF_MAX_DEPTH {
            return Err(PrepError::RecurseDepthExceeded((depth, GPMF_MAX_DEPTH)));
        }

        let mut records = Vec::new();
        let mut pos = 0;

        while pos < data.len() {
            let rem = &data[pos ..];
            if rem.len() < 8 {
                // zero padding is fine
                if rem.iter().any(|b| *b != 0) {
                    stats.skipped += 1;
                }
                break;
            }
            let key = Key([rem[0], rem[1], rem[2], rem[3]]);
            if key.0 == [0; 4] {
                break;
            }
            let type_char = rem[4];
            let struct_size = rem[5];
            let repeat = u16::from_be_bytes([rem[6], rem[7]]);
            let len = struct_size as usize * repeat as usize;

            if 8 + len > rem.len() {
                log::debug!("GPMF record '{key}' @ {pos}: {len} bytes exceeds parent");
                stats.skipped += 1;
                break;
            }
            let advance = (8 + len + pad32(len)).min(rem.len());

            if !key.is_valid() {
                stats.skipped += 1;
                pos += advance;
                continue;
            }

            let body = &rem[8 .. 8 + len];
            let value = match type_char {
                0 => Value::Nested(Self::parse_level(body, depth + 1, stats)?),
                t => Value::Data(Payload {
                    value_type: ValueType::from(t),
                    struct_size,
                    repeat,
                    raw: body.to_vec(),
                }),
            };

            stats.records += 1;
            records.push(Klv { key, value });
            pos += advance;
        }

        Ok(records)
    }

    /// Appends the encoded record, padded to 32 bits.
    pub fn encode(&self, out: &mut Vec<u8>) -> Result<(), PrepError> {
        out.extend_from_slice(&self.key.0);
        match &self.value {
            Value::Nested(children) => {
                let mut body = Vec::new();
                for child in children.iter() {
                    child.encode(&mut body)?;
                }
                // children are padded, so the length is a multiple of 4
                let (struct_size, repeat) = match u16::try_from(body.len()) {
                    Ok(n) => (1_u8, n),
                    Err(_) => (4_u8, u16::try_from(body.len() / 4).map_err(|_| too_large(&self.key, body.len()))?),
                };
                out.push(0);
                out.push(struct_size);
                out.extend_from_slice(&repeat.to_be_bytes());
                out.extend_from_slice(&body);
            },
            Value::Data(payload) => {
                let expected = payload.struct_size as usize * payload.repeat as usize;
                if payload.raw.len() != expected {
                    return Err(PrepError::MetadataCorrupt(format!(
                        "GPMF record '{}' holds {} bytes, header declares {expected}",
                        self.key, payload.raw.len()
                    )));
                }
                out.push(payload.value_type.to_u8());
                out.push(payload.struct_size);
                out.extend_from_slice(&payload.repeat.to_be_bytes());
                out.extend_from_slice(&payload.raw);
                out.extend(std::iter::repeat(0).take(pad32(payload.raw.len())));
            },
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, PrepError> {
        let mut out = Vec::new();
        self.encode(&mut out)?;
        Ok(out)
    }

    /// Nested records. Empty for data records.
    pub fn children(&self) -> &[Klv] {
        match &self.value {
            Value::Nested(children) => children,
            Value::Data(_) => &[],
        }
    }

    pub fn payload(&self) -> Option<&Payload> {
        match &self.value {
            Value::Nested(_) => None,
            Value::Data(payload) => Some(payload),
        }
    }

    /// First direct child with `key`.
    pub fn find(&self, key: &Key) -> Option<&Klv> {
        self.children().iter().find(|k| &k.key == key)
    }
}

fn too_large(key: &Key, len: usize) -> PrepError {
    PrepError::MetadataCorrupt(format!("GPMF record '{key}' too large ({len} bytes)"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_devc() -> Klv {
        Klv::nested(Key::DEVC, vec![
            Klv::data(Key::DVID, ValueType::U32, 4, 1, 1_u32.to_be_bytes().to_vec()),
            Klv::data(Key::DVNM, ValueType::Char, 1, 6, b"Camera".to_vec()),
            Klv::nested(Key::STRM, vec![
                Klv::data(Key::STMP, ValueType::U64, 8, 1, 1_000_000_u64.to_be_bytes().to_vec()),
                // unknown type and key are kept as is
                Klv::data(Key(*b"ZZZZ"), ValueType::Unknown(b'x'), 3, 1, vec![1, 2, 3]),
            ]),
        ])
    }

    #[test]
    fn encode_parse() {
        let devc = sample_devc();
        let bytes = devc.to_bytes().unwrap();
        assert_eq!(bytes.len() % 4, 0);
        // nested: type 0, struct size 1, repeat = body length
        assert_eq!(&bytes[4 .. 6], &[0, 1]);
        assert_eq!(u16::from_be_bytes([bytes[6], bytes[7]]) as usize, bytes.len() - 8);

        let mut stats = ParseStats::default();
        let parsed = Klv::parse(&bytes, &mut stats).unwrap();
        assert_eq!(parsed, vec![devc]);
        assert_eq!(stats.skipped, 0);
        assert_eq!(stats.records, 6);

        let strm = parsed[0].find(&Key::STRM).unwrap();
        assert_eq!(strm.find(&Key::STMP).unwrap().payload().unwrap().first(), Some(1e6));
        assert_eq!(parsed[0].find(&Key::DVNM).unwrap().payload().unwrap().as_string(), "Camera");
    }

    #[test]
    fn truncated_record_is_skipped() {
        let mut bytes = sample_devc().to_bytes().unwrap();
        // second top-level record claims more data than there is
        bytes.extend_from_slice(b"GPS5l\x14\x00\x10");
        bytes.extend_from_slice(&[0; 20]);

        let mut stats = ParseStats::default();
        let parsed = Klv::parse(&bytes, &mut stats).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(stats.skipped, 1);
    }

    #[test]
    fn invalid_key_is_skipped() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"\x01\x02\x03\x04L\x04\x00\x01");
        bytes.extend_from_slice(&[0; 4]);
        Klv::data(Key::GPSF, ValueType::U32, 4, 1, 3_u32.to_be_bytes().to_vec())
            .encode(&mut bytes)
            .unwrap();

        let mut stats = ParseStats::default();
        let parsed = Klv::parse(&bytes, &mut stats).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].key, Key::GPSF);
        assert_eq!(stats.skipped, 1);
    }

    #[test]
    fn complex_rows() {
        let mut raw = Vec::new();
        raw.extend_from_slice(&10_i32.to_be_bytes());
        raw.extend_from_slice(&7_u16.to_be_bytes());
        let payload = Payload { value_type: ValueType::Complex, struct_size: 6, repeat: 1, raw };
        assert_eq!(payload.rows(None), None);
        let types = [ValueType::I32, ValueType::U16];
        assert_eq!(payload.rows(Some(&types)), Some(vec![vec![10.0, 7.0]]));
    }
}
