//! Interprets parsed `DEVC` records as GPS and orientation streams.

use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};

use crate::gps9_time_zero;

use super::{Key, Klv, ParseStats, Payload, ValueType};

/// GPS stream flavour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GpsStreamKind {
    /// `GPS5`: one fix time and quality per payload.
    Gps5,
    /// `GPS9`: fix time, DOP and quality per row (Hero 11 and later, Max 2).
    Gps9,
}

/// Scaled GPS row.
#[derive(Debug, Clone, PartialEq)]
pub struct GpsRow {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
    pub speed_2d: f64,
    pub speed_3d: f64,
    /// Per row fix time (`GPS9` only).
    pub time: Option<OffsetDateTime>,
    /// Per row DOP (`GPS9` only).
    pub dop: Option<f64>,
    /// Per row fix (`GPS9` only).
    pub fix: Option<u32>,
}

/// GPS rows of one stream in one payload.
#[derive(Debug, Clone, PartialEq)]
pub struct GpsBlock {
    pub kind: GpsStreamKind,
    /// Device clock in microseconds.
    pub stmp: Option<u64>,
    /// Fix time of first row (`GPSU`).
    pub utc: Option<OffsetDateTime>,
    /// `GPSF`
    pub fix: Option<u32>,
    /// `GPSP` / 100
    pub dop: Option<f64>,
    pub rows: Vec<GpsRow>,
}

/// Orientation quaternions (w, x, y, z) of one stream in one payload.
#[derive(Debug, Clone, PartialEq)]
pub struct OrientationBlock {
    /// Device clock in microseconds.
    pub stmp: Option<u64>,
    pub quaternions: Vec<[f64; 4]>,
}

/// Streams for a single device (`DEVC`) in one payload.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceStreams {
    pub device_id: u32,
    pub name: Option<String>,
    pub gps: Vec<GpsBlock>,
    pub orientation: Vec<OrientationBlock>,
}

/// Interprets top-level `DEVC` records.
/// Streams that can not be decoded are counted as skipped.
pub fn devices(klvs: &[Klv], stats: &mut ParseStats) -> Vec<DeviceStreams> {
    klvs.iter()
        .filter(|k| k.key == Key::DEVC)
        .enumerate()
        .map(|(i, devc)| {
            let device_id = devc.find(&Key::DVID)
                .and_then(|k| k.payload())
                .and_then(|p| p.first())
                .map(|v| v as u32)
                .unwrap_or(i as u32 + 1);
            let name = devc.find(&Key::DVNM)
                .and_then(|k| k.payload())
                .map(|p| p.as_string());

            let mut streams = DeviceStreams {
                device_id,
                name,
                gps: Vec::new(),
                orientation: Vec::new(),
            };

            for strm in devc.children().iter().filter(|k| k.key == Key::STRM) {
                read_stream(strm, &mut streams, stats);
            }

            streams
        })
        .collect()
}

fn read_stream(strm: &Klv, streams: &mut DeviceStreams, stats: &mut ParseStats) {
    let payload = |key: &Key| strm.find(key).and_then(|k| k.payload());

    let stmp = payload(&Key::STMP).and_then(|p| p.first()).map(|v| v as u64);
    let scale = payload(&Key::SCAL).and_then(|p| p.values()).unwrap_or_default();
    let complex = payload(&Key::TYPE).map(|p| p.as_types());

    if let Some(gps5) = payload(&Key::GPS5) {
        let utc = match payload(&Key::GPSU) {
            Some(p) => {
                let utc = p.as_utc();
                if utc.is_none() {
                    stats.skipped += 1;
                }
                utc
            },
            None => None,
        };
        match scaled_rows(gps5, None, &scale, 5) {
            Some(rows) => streams.gps.push(GpsBlock {
                kind: GpsStreamKind::Gps5,
                stmp,
                utc,
                fix: payload(&Key::GPSF).and_then(|p| p.first()).map(|v| v as u32),
                dop: payload(&Key::GPSP).and_then(|p| p.first()).map(|v| v / 100.0),
                rows: rows.iter().map(|r| gps_row(r, None, None, None)).collect(),
            }),
            None => stats.skipped += 1,
        }
    }

    if let Some(gps9) = payload(&Key::GPS9) {
        match scaled_rows(gps9, complex.as_deref(), &scale, 9) {
            Some(rows) => {
                let rows: Vec<GpsRow> = rows.iter()
                    .map(|r| {
                        let secs = r[5] * 86400.0 + r[6];
                        let time = Duration::checked_seconds_f64(secs)
                            .and_then(|d| gps9_time_zero().checked_add(d));
                        gps_row(r, time, Some(r[7]), Some(r[8] as u32))
                    })
                    .collect();
                streams.gps.push(GpsBlock {
                    kind: GpsStreamKind::Gps9,
                    stmp,
                    utc: rows.first().and_then(|r| r.time),
                    fix: rows.first().and_then(|r| r.fix),
                    dop: rows.first().and_then(|r| r.dop),
                    rows,
                })
            },
            None => stats.skipped += 1,
        }
    }

    if let Some(cori) = payload(&Key::CORI) {
        match scaled_rows(cori, None, &scale, 4) {
            Some(rows) => streams.orientation.push(OrientationBlock {
                stmp,
                quaternions: rows.iter().map(|r| [r[0], r[1], r[2], r[3]]).collect(),
            }),
            None => stats.skipped += 1,
        }
    }
}

fn gps_row(r: &[f64], time: Option<OffsetDateTime>, dop: Option<f64>, fix: Option<u32>) -> GpsRow {
    GpsRow {
        latitude: r[0],
        longitude: r[1],
        altitude: r[2],
        speed_2d: r[3],
        speed_3d: r[4],
        time,
        dop,
        fix,
    }
}

/// Decodes rows with at least `min_width` values each and
/// divides by `SCAL` (a single divisor applies to all values).
fn scaled_rows(payload: &Payload, complex: Option<&[ValueType]>, scale: &[f64], min_width: usize) -> Option<Vec<Vec<f64>>> {
    let rows = payload.rows(complex)?;
    if rows.iter().any(|r| r.len() < min_width) {
        return None
    }
    Some(rows.into_iter()
        .map(|row| {
            row.into_iter()
                .enumerate()
                .map(|(i, v)| {
                    let divisor = match scale.len() {
                        0 => 1.0,
                        1 => scale[0],
                        _ => scale.get(i).copied().unwrap_or(1.0),
                    };
                    match divisor == 0.0 {
                        true => v,
                        false => v / divisor,
                    }
                })
                .collect()
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn i32s(values: &[i32]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_be_bytes()).collect()
    }

    #[test]
    fn gps5_stream() {
        let strm = Klv::nested(Key::STRM, vec![
            Klv::data(Key::STMP, ValueType::U64, 8, 1, 2_000_000_u64.to_be_bytes().to_vec()),
            Klv::data(Key::GPSF, ValueType::U32, 4, 1, 3_u32.to_be_bytes().to_vec()),
            Klv::data(Key::GPSU, ValueType::Utc, 16, 1, b"230601120005.250".to_vec()),
            Klv::data(Key::GPSP, ValueType::U16, 2, 1, 150_u16.to_be_bytes().to_vec()),
            Klv::data(Key::SCAL, ValueType::I32, 4, 5, i32s(&[10_000_000, 10_000_000, 1000, 1000, 100])),
            Klv::data(Key::GPS5, ValueType::I32, 20, 1, i32s(&[594_000_000, 180_000_000, 12_500, 3000, 310])),
        ]);
        let devc = Klv::nested(Key::DEVC, vec![
            Klv::data(Key::DVID, ValueType::U32, 4, 1, 1_u32.to_be_bytes().to_vec()),
            strm,
        ]);
        let mut stats = ParseStats::default();
        let devices = devices(&[devc], &mut stats);
        assert_eq!(devices.len(), 1);
        let gps = &devices[0].gps[0];
        assert_eq!(gps.stmp, Some(2_000_000));
        assert_eq!(gps.fix, Some(3));
        assert_eq!(gps.dop, Some(1.5));
        assert_eq!(gps.utc, Some(datetime!(2023-06-01 12:00:05.250 UTC)));
        assert_eq!(gps.rows[0].latitude, 59.4);
        assert_eq!(gps.rows[0].longitude, 18.0);
        assert_eq!(gps.rows[0].altitude, 12.5);
        assert_eq!(stats.skipped, 0);
    }

    #[test]
    fn gps9_stream() {
        let mut row = i32s(&[594_000_000, 180_000_000, 12_500, 3000, 310, 8552, 43_205_250]);
        row.extend_from_slice(&150_u16.to_be_bytes());
        row.extend_from_slice(&3_u16.to_be_bytes());
        let strm = Klv::nested(Key::STRM, vec![
            Klv::data(Key::SCAL, ValueType::I32, 4, 9, i32s(&[10_000_000, 10_000_000, 1000, 1000, 100, 1, 1000, 100, 1])),
            Klv::data(Key::TYPE, ValueType::Char, 1, 9, b"lllllllSS".to_vec()),
            Klv::data(Key::GPS9, ValueType::Complex, 32, 1, row),
        ]);
        let devc = Klv::nested(Key::DEVC, vec![strm]);
        let mut stats = ParseStats::default();
        let devices = devices(&[devc], &mut stats);
        let gps = &devices[0].gps[0];
        assert_eq!(gps.kind, GpsStreamKind::Gps9);
        assert_eq!(gps.rows[0].time, Some(datetime!(2023-06-01 12:00:05.250 UTC)));
        assert_eq!(gps.rows[0].fix, Some(3));
        assert_eq!(gps.dop, Some(1.5));
    }

    #[test]
    fn bad_gps_width_counts_as_skipped() {
        let strm = Klv::nested(Key::STRM, vec![
            Klv::data(Key::GPS5, ValueType::I32, 8, 1, i32s(&[1, 2])),
        ]);
        let mut stats = ParseStats::default();
        let devices = devices(&[Klv::nested(Key::DEVC, vec![strm])], &mut stats);
        assert!(devices[0].gps.is_empty());
        assert_eq!(stats.skipped, 1);
    }
}
