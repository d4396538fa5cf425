//! Locates GPMF telemetry tracks and decodes them into
//! an ordered sequence of samples on the raw device clock.

use std::{collections::BTreeMap, path::Path};

use crate::{
    gpmf::{devices, DeviceStreams, GpsStreamKind, Klv, ParseStats},
    track::{Sample, Track},
    Hdlr,
    Mp4Layout,
    PrepError,
    Warning,
    GPMF_HANDLER_NAME,
    STREAM_DISAGREEMENT_SECS,
};

use super::{FixQuality, GpsFix, Orientation, PayloadLayout, StreamId, Telemetry, TelemetrySample};

/// Extraction settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExtractorParams {
    /// Seconds two lens streams may differ before fixes are tagged.
    pub disagreement_threshold: f64,
    /// Assumed stream kind if the track holds no GPS at all.
    pub default_kind: GpsStreamKind,
}

impl Default for ExtractorParams {
    fn default() -> Self {
        Self {
            disagreement_threshold: STREAM_DISAGREEMENT_SECS,
            default_kind: GpsStreamKind::Gps5,
        }
    }
}

/// Extracts telemetry from the MP4 at `path`.
///
/// Fails with `MetadataAbsent` if there is no `GoPro MET` track or it
/// holds no samples, and with `MetadataCorrupt` if the track's tables
/// are broken or none of its payloads parse.
pub fn extract(path: &Path, params: &ExtractorParams) -> Result<Telemetry, PrepError> {
    let layout = Mp4Layout::read(path)?;
    let container_duration = layout.mvhd()?.duration_secs();

    let mut tracks: Vec<Track> = Vec::new();
    let mut frame_rate = None;
    for (i, trak) in layout.traks().enumerate() {
        let hdlr = Hdlr::parse(trak.path(&["mdia", "hdlr"])?.leaf_data()?)?;
        if hdlr.component_name() == GPMF_HANDLER_NAME {
            tracks.push(Track::from_trak(trak, i).map_err(PrepError::into_metadata_corrupt)?);
        } else if frame_rate.is_none() && hdlr.component_sub_type() == "vide" {
            frame_rate = Track::from_trak(trak, i).ok().and_then(|t| t.sample_rate());
        }
    }

    if tracks.is_empty() {
        return Err(PrepError::MetadataAbsent(format!(
            "'{}' has no '{GPMF_HANDLER_NAME}' track", path.display()
        )));
    }

    let mut skipped = 0;
    let mut gps_kind: Option<GpsStreamKind> = None;
    let mut samples: Vec<TelemetrySample> = Vec::new();

    for track in tracks.iter() {
        let payloads = track.read_samples(path)
            .map_err(PrepError::into_metadata_corrupt)?;
        let mut parsed = 0;
        let mut non_empty = 0;

        for payload in payloads.iter() {
            if payload.data.is_empty() {
                continue;
            }
            non_empty += 1;

            let mut stats = ParseStats::default();
            let klvs = match Klv::parse(&payload.data, &mut stats) {
                Ok(klvs) => klvs,
                Err(err) => {
                    log::warn!("{}: payload {} skipped: {err}", path.display(), payload.index);
                    skipped += 1;
                    continue;
                }
            };
            if klvs.is_empty() {
                skipped += 1;
                continue;
            }
            parsed += 1;

            for device in devices(&klvs, &mut stats).iter() {
                let stream = StreamId { track: track.index(), device: device.device_id };
                if gps_kind.is_none() {
                    gps_kind = device.gps.first().map(|g| g.kind);
                }
                samples.extend(device_samples(device, stream, payload));
            }
            skipped += stats.skipped;
        }

        if non_empty > 0 && parsed == 0 {
            return Err(PrepError::MetadataCorrupt(format!(
                "'{}': none of {non_empty} telemetry payloads in track {} could be parsed",
                path.display(), track.index()
            )));
        }
    }

    if samples.is_empty() {
        return Err(PrepError::MetadataAbsent(format!(
            "'{}': telemetry track has zero samples", path.display()
        )));
    }

    // Payload order first, so that device clock resets between
    // chapters survive. Streams interleave by device clock within a payload.
    samples.sort_by(|a, b| a.payload.cmp(&b.payload)
        .then(a.device_time.total_cmp(&b.device_time)));
    for (i, sample) in samples.iter_mut().enumerate() {
        sample.index = i;
    }

    let mut warnings = Vec::new();
    if skipped > 0 {
        log::warn!("{}: skipped {skipped} malformed telemetry records", path.display());
        warnings.push(Warning::SkippedRecords { count: skipped });
    }

    let streams = samples.iter()
        .map(|s| s.stream)
        .collect::<std::collections::BTreeSet<_>>()
        .len();
    if streams > 1 {
        if let Some(w) = tag_disagreements(&mut samples, params.disagreement_threshold) {
            log::warn!("{}: {w}", path.display());
            warnings.push(w);
        }
    }

    // cadence of the densest telemetry track
    let primary = tracks.iter()
        .max_by_key(|t| t.samples().len())
        .map(|t| PayloadLayout {
            time_scale: t.time_scale(),
            durations: t.samples().iter().map(|s| s.duration).collect(),
        })
        .unwrap_or_default();

    log::info!("{}: {} telemetry samples from {} stream(s)", path.display(), samples.len(), streams);

    Ok(Telemetry {
        samples,
        warnings,
        layout: primary,
        gps_kind: gps_kind.unwrap_or(params.default_kind),
        container_duration,
        frame_rate,
        streams,
    })
}

/// Samples for one device in one payload.
///
/// Row `i` of `n` is placed at `STMP + i * payload duration / n`,
/// or relative to the payload's track time if `STMP` is absent.
fn device_samples(device: &DeviceStreams, stream: StreamId, payload: &Sample) -> Vec<TelemetrySample> {
    let base = |stmp: Option<u64>| stmp
        .map(|us| us as f64 / 1e6)
        .unwrap_or(payload.relative_time);

    let quaternions: Vec<[f64; 4]> = device.orientation.iter()
        .flat_map(|o| o.quaternions.iter().copied())
        .collect();
    let orientation_at = |i: usize, n: usize| {
        match quaternions.is_empty() {
            true => None,
            false => Some(Orientation::Quaternion(quaternions[(i * quaternions.len() / n.max(1)).min(quaternions.len() - 1)])),
        }
    };

    let mut out = Vec::new();

    for block in device.gps.iter() {
        let n = block.rows.len();
        let start = base(block.stmp);
        let step = payload.duration / n.max(1) as f64;
        for (i, row) in block.rows.iter().enumerate() {
            let time = match block.kind {
                GpsStreamKind::Gps5 if i == 0 => block.utc,
                GpsStreamKind::Gps5 => None,
                GpsStreamKind::Gps9 => row.time,
            };
            out.push(TelemetrySample {
                index: 0,
                device_time: start + i as f64 * step,
                gps: Some(GpsFix {
                    latitude: row.latitude,
                    longitude: row.longitude,
                    altitude: row.altitude,
                    speed_2d: row.speed_2d,
                    speed_3d: row.speed_3d,
                    time,
                    quality: FixQuality::from_gpsf(row.fix.or(block.fix)),
                    dop: row.dop.or(block.dop),
                    stream_tag: None,
                }),
                orientation: orientation_at(i, n),
                stream,
                payload: payload.index,
            });
        }
    }

    // orientation only device
    if device.gps.is_empty() && !quaternions.is_empty() {
        out.push(TelemetrySample {
            index: 0,
            device_time: base(device.orientation.first().and_then(|o| o.stmp)),
            gps: None,
            orientation: orientation_at(0, 1),
            stream,
            payload: payload.index,
        });
    }

    out
}

/// Compares the first timed fix of each stream per payload.
/// Where they differ by more than `threshold` seconds, all fixes of
/// that payload are tagged with their originating stream.
fn tag_disagreements(samples: &mut [TelemetrySample], threshold: f64) -> Option<Warning> {
    // payload -> stream -> first fix time (unix seconds)
    let mut first: BTreeMap<usize, BTreeMap<StreamId, f64>> = BTreeMap::new();
    for s in samples.iter() {
        if let Some(t) = s.gps.as_ref().and_then(|g| g.time) {
            first.entry(s.payload)
                .or_default()
                .entry(s.stream)
                .or_insert(t.unix_timestamp_nanos() as f64 / 1e9);
        }
    }

    let mut disagreeing: Vec<usize> = Vec::new();
    let mut max_seconds: f64 = 0.0;
    for (payload, streams) in first.iter() {
        let times: Vec<f64> = streams.values().copied().collect();
        let spread = times.iter().copied().fold(f64::MIN, f64::max)
            - times.iter().copied().fold(f64::MAX, f64::min);
        if times.len() > 1 && spread > threshold {
            disagreeing.push(*payload);
            max_seconds = max_seconds.max(spread);
        }
    }

    if disagreeing.is_empty() {
        return None
    }

    for s in samples.iter_mut().filter(|s| disagreeing.contains(&s.payload)) {
        let stream = s.stream;
        if let Some(gps) = s.gps.as_mut() {
            gps.stream_tag = Some(stream);
        }
    }

    Some(Warning::StreamDisagreement { payloads: disagreeing.len(), max_seconds })
}
