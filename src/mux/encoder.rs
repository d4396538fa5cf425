//! Corrected timeline to GPMF payloads.
//!
//! Each payload holds one `DEVC` per device with a GPS stream
//! (`GPS5` or `GPS9`, same scaling as the camera writes) and, where
//! present, a `CORI` orientation stream. `STMP` is the corrected time
//! since timeline start in microseconds.

use std::collections::BTreeMap;

use crate::{
    clock::{CorrectedSample, CorrectedTimeline},
    gpmf::{format_gpsu, GpsStreamKind, Key, Klv, ValueType},
    gps9_time_zero,
    PrepError,
    Warning,
};

/// `GPS5` divisors: lat, lon, alt, 2D speed, 3D speed.
const GPS5_SCALE: [i32; 5] = [10_000_000, 10_000_000, 1000, 1000, 100];
/// `GPS9` divisors: `GPS5` plus days, seconds, DOP, fix.
const GPS9_SCALE: [i32; 9] = [10_000_000, 10_000_000, 1000, 1000, 100, 1, 1000, 100, 1];
/// `GPS9` row structure.
const GPS9_TYPE: &[u8; 9] = b"lllllllSS";
/// Q15 scale for `CORI`.
const CORI_SCALE: i16 = 32767;

/// Encoded payloads, one per source payload.
#[derive(Debug, Clone, Default)]
pub(crate) struct Encoded {
    pub(crate) payloads: Vec<Vec<u8>>,
    pub(crate) warnings: Vec<Warning>,
    /// Samples left out.
    pub(crate) failed: usize,
    /// Samples attempted.
    pub(crate) total: usize,
}

impl Encoded {
    pub(crate) fn failed_fraction(&self) -> f64 {
        match self.total {
            0 => 0.0,
            n => self.failed as f64 / n as f64,
        }
    }
}

/// A sample as GPMF rows.
struct EncodedSample<'a> {
    sample: &'a CorrectedSample,
    /// Microseconds since timeline start.
    stmp: u64,
    gps: Option<Vec<u8>>,
    orientation: Option<[u8; 8]>,
}

/// Encodes `timeline` with the payload count of the source track.
pub(crate) fn encode_timeline(timeline: &CorrectedTimeline, device_name: &str) -> Result<Encoded, PrepError> {
    let count = timeline.layout.durations.len();
    if count == 0 {
        return Err(PrepError::MetadataCorrupt("telemetry track lists no payload durations".to_owned()));
    }

    let mut encoded = Encoded::default();
    // payload -> device -> samples
    let mut payloads: Vec<BTreeMap<u32, Vec<EncodedSample>>> = (0 .. count).map(|_| BTreeMap::new()).collect();

    for sample in timeline.samples.iter().filter(|s| s.valid) {
        if sample.sample.gps.is_none() && sample.sample.orientation.is_none() {
            continue;
        }
        encoded.total += 1;
        match encode_sample(timeline, sample) {
            Ok(enc) => {
                let payload = sample.sample.payload.min(count - 1);
                payloads[payload]
                    .entry(sample.sample.stream.device)
                    .or_default()
                    .push(enc);
            },
            Err(reason) => {
                log::debug!("sample {} not encodable: {reason}", sample.sample.index);
                encoded.failed += 1;
                encoded.warnings.push(Warning::SampleNotEncodable { index: sample.sample.index, reason });
            },
        }
    }

    // samples delivered so far, per device
    let mut tsmp: BTreeMap<u32, u32> = BTreeMap::new();
    // devices seen anywhere, so every payload lists them
    let devices: Vec<u32> = timeline.samples.iter()
        .map(|s| s.sample.stream.device)
        .collect::<std::collections::BTreeSet<_>>()
        .into_iter()
        .collect();

    for devs in payloads.iter() {
        let mut bytes = Vec::new();
        for device in devices.iter() {
            let samples = devs.get(device).map(|s| s.as_slice()).unwrap_or(&[]);
            let total = tsmp.entry(*device).or_insert(0);
            *total += samples.iter().filter(|s| s.gps.is_some()).count() as u32;
            device_klv(*device, device_name, samples, timeline.gps_kind, *total)?
                .encode(&mut bytes)?;
        }
        encoded.payloads.push(bytes);
    }

    Ok(encoded)
}

fn encode_sample<'a>(timeline: &CorrectedTimeline, sample: &'a CorrectedSample) -> Result<EncodedSample<'a>, String> {
    let since_start = timeline.seconds_since_start(sample.time);
    if since_start < 0.0 {
        return Err(format!("negative STMP ({since_start:.6}s)"));
    }
    let micros = (since_start * 1e6).round();
    if !micros.is_finite() || micros >= u64::MAX as f64 {
        return Err("STMP overflow".to_owned());
    }
    if format_gpsu(sample.time).is_none() {
        return Err(format!("time {} outside 2000-2099", sample.time));
    }

    let gps = match sample.sample.gps.as_ref() {
        Some(fix) => {
            let mut row = Vec::with_capacity(32);
            let values = [
                fix.latitude * GPS5_SCALE[0] as f64,
                fix.longitude * GPS5_SCALE[1] as f64,
                fix.altitude * GPS5_SCALE[2] as f64,
                fix.speed_2d * GPS5_SCALE[3] as f64,
                fix.speed_3d * GPS5_SCALE[4] as f64,
            ];
            for v in values.iter() {
                row.extend_from_slice(&to_i32(*v)?.to_be_bytes());
            }
            if timeline.gps_kind == GpsStreamKind::Gps9 {
                let elapsed = sample.time - gps9_time_zero();
                let days = elapsed.whole_days();
                let millis = (elapsed - time::Duration::days(days)).whole_milliseconds();
                row.extend_from_slice(&to_i32(days as f64)?.to_be_bytes());
                row.extend_from_slice(&to_i32(millis as f64)?.to_be_bytes());
                row.extend_from_slice(&to_u16(fix.dop.unwrap_or(0.0) * 100.0)?.to_be_bytes());
                row.extend_from_slice(&(fix.quality.to_gpsf() as u16).to_be_bytes());
            }
            Some(row)
        },
        None => None,
    };

    let orientation = match sample.sample.orientation {
        Some(o) => {
            let mut q = [0_u8; 8];
            for (i, v) in o.quaternion().iter().enumerate() {
                if !v.is_finite() || v.abs() > 1.0 + 1e-6 {
                    return Err(format!("quaternion component {v} outside Q15 range"));
                }
                let value = (v.clamp(-1.0, 1.0) * CORI_SCALE as f64).round() as i16;
                q[i * 2 .. i * 2 + 2].copy_from_slice(&value.to_be_bytes());
            }
            Some(q)
        },
        None => None,
    };

    Ok(EncodedSample { sample, stmp: micros as u64, gps, orientation })
}

fn to_i32(value: f64) -> Result<i32, String> {
    let v = value.round();
    match v.is_finite() && v >= i32::MIN as f64 && v <= i32::MAX as f64 {
        true => Ok(v as i32),
        false => Err(format!("scaled value {value} outside i32")),
    }
}

fn to_u16(value: f64) -> Result<u16, String> {
    let v = value.round();
    match v.is_finite() && v >= 0.0 && v <= u16::MAX as f64 {
        true => Ok(v as u16),
        false => Err(format!("scaled value {value} outside u16")),
    }
}

fn i32_bytes(values: &[i32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_be_bytes()).collect()
}

/// `DEVC` for one device in one payload.
fn device_klv(device: u32, name: &str, samples: &[EncodedSample], kind: GpsStreamKind, tsmp: u32) -> Result<Klv, PrepError> {
    let mut children = vec![
        Klv::data(Key::DVID, ValueType::U32, 4, 1, device.to_be_bytes().to_vec()),
        Klv::data(Key::DVNM, ValueType::Char, 1, repeat(name.len())?, name.as_bytes().to_vec()),
    ];

    let gps: Vec<&EncodedSample> = samples.iter().filter(|s| s.gps.is_some()).collect();
    if let Some(first) = gps.first() {
        let mut strm = vec![
            Klv::data(Key::STMP, ValueType::U64, 8, 1, first.stmp.to_be_bytes().to_vec()),
            Klv::data(Key::TSMP, ValueType::U32, 4, 1, tsmp.to_be_bytes().to_vec()),
        ];
        let fix = first.sample.sample.gps.as_ref();
        let (stnm, scale, key, row_size): (&str, &[i32], Key, u8) = match kind {
            GpsStreamKind::Gps5 => ("GPS (Lat., Long., Alt., 2D speed, 3D speed)", &GPS5_SCALE, Key::GPS5, 20),
            GpsStreamKind::Gps9 => ("GPS (Lat., Long., Alt., 2D, 3D, days, secs, DOP, fix)", &GPS9_SCALE, Key::GPS9, 32),
        };
        strm.push(Klv::data(Key::STNM, ValueType::Char, 1, repeat(stnm.len())?, stnm.as_bytes().to_vec()));
        if let Some(fix) = fix {
            strm.push(Klv::data(Key::GPSF, ValueType::U32, 4, 1, fix.quality.to_gpsf().to_be_bytes().to_vec()));
            if let Some(dop) = fix.dop {
                let dop = to_u16(dop * 100.0).map_err(PrepError::MetadataCorrupt)?;
                strm.push(Klv::data(Key::GPSP, ValueType::U16, 2, 1, dop.to_be_bytes().to_vec()));
            }
        }
        if let Some(gpsu) = format_gpsu(first.sample.time) {
            strm.push(Klv::data(Key::GPSU, ValueType::Utc, 16, 1, gpsu.into_bytes()));
        }
        strm.push(Klv::data(Key::SCAL, ValueType::I32, 4, repeat(scale.len())?, i32_bytes(scale)));
        let value_type = match kind {
            GpsStreamKind::Gps5 => ValueType::I32,
            GpsStreamKind::Gps9 => {
                strm.push(Klv::data(Key::TYPE, ValueType::Char, 1, GPS9_TYPE.len() as u16, GPS9_TYPE.to_vec()));
                ValueType::Complex
            },
        };
        let rows: Vec<u8> = gps.iter()
            .filter_map(|s| s.gps.as_deref())
            .flatten()
            .copied()
            .collect();
        strm.push(Klv::data(key, value_type, row_size, repeat(gps.len())?, rows));
        children.push(Klv::nested(Key::STRM, strm));
    }

    let orientation: Vec<&EncodedSample> = samples.iter().filter(|s| s.orientation.is_some()).collect();
    if let Some(first) = orientation.first() {
        let quaternions: Vec<u8> = orientation.iter()
            .filter_map(|s| s.orientation)
            .flatten()
            .collect();
        children.push(Klv::nested(Key::STRM, vec![
            Klv::data(Key::STMP, ValueType::U64, 8, 1, first.stmp.to_be_bytes().to_vec()),
            Klv::data(Key::STNM, ValueType::Char, 1, 18, b"CameraOrientation\0".to_vec()),
            Klv::data(Key::SCAL, ValueType::I16, 2, 1, CORI_SCALE.to_be_bytes().to_vec()),
            Klv::data(Key::CORI, ValueType::I16, 8, repeat(orientation.len())?, quaternions),
        ]));
    }

    Ok(Klv::nested(Key::DEVC, children))
}

fn repeat(n: usize) -> Result<u16, PrepError> {
    u16::try_from(n)
        .map_err(|_| PrepError::MetadataCorrupt(format!("{n} GPMF structures exceed a single record")))
}
