//! GPX 1.1 track export of the corrected timeline.
//!
//! Only samples with valid timing and a usable fix become track points.
//! With two lens streams the first one is the track; the other only fills
//! in where the first has no fix within `LENS_MERGE_SECS`. Timestamps are
//! truncated to milliseconds, and points that end up sharing a timestamp
//! collapse to the latest one so the track is strictly increasing in time.

use std::{
    fs::File,
    io::{BufReader, BufWriter, Write},
    path::{Path, PathBuf},
};

use gpx::{Fix, Gpx, GpxVersion, Track, TrackSegment, Waypoint};
use tempfile::NamedTempFile;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

use crate::{
    clock::{CorrectedSample, CorrectedTimeline},
    rewrite::output_dir,
    support::{quantize_millis, to_unix_seconds},
    telemetry::{FixQuality, StreamId},
    PrepError,
    Warning,
    LENS_MERGE_SECS,
};

/// A single exported track point.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackPoint {
    pub time: OffsetDateTime,
    pub latitude: f64,
    pub longitude: f64,
    pub elevation: Option<f64>,
    pub fix: Option<FixQuality>,
    /// Horizontal DOP.
    pub dop: Option<f64>,
}

/// Outcome of a successful export.
#[derive(Debug, Clone)]
pub struct GpxReport {
    pub output: PathBuf,
    pub points: usize,
    pub warnings: Vec<Warning>,
}

/// Track points for `timeline`, deduplicated on millisecond timestamps.
/// Returns the points and the number of dropped duplicates. Secondary lens
/// fixes merged into a primary fix are not counted as duplicates.
pub fn points(timeline: &CorrectedTimeline) -> (Vec<TrackPoint>, usize) {
    let primary: Option<StreamId> = timeline.geo_samples()
        .map(|s| s.sample.stream)
        .min();
    // non-decreasing, as is the timeline
    let primary_times: Vec<f64> = timeline.geo_samples()
        .filter(|s| Some(s.sample.stream) == primary)
        .map(|s| to_unix_seconds(s.time))
        .collect();

    let mut points: Vec<TrackPoint> = Vec::new();
    let mut dropped = 0;

    for sample in timeline.geo_samples() {
        if Some(sample.sample.stream) != primary && near(&primary_times, to_unix_seconds(sample.time)) {
            continue;
        }
        let Some(point) = track_point(sample) else { continue };
        match points.last_mut() {
            Some(last) if last.time >= point.time => {
                *last = TrackPoint { time: last.time, ..point };
                dropped += 1;
            },
            _ => points.push(point),
        }
    }

    (points, dropped)
}

/// `true` if sorted `times` has a value within `LENS_MERGE_SECS` of `t`.
fn near(times: &[f64], t: f64) -> bool {
    let i = times.partition_point(|x| *x < t);
    let after = times.get(i).map(|x| x - t);
    let before = i.checked_sub(1).and_then(|j| times.get(j)).map(|x| t - x);
    [after, before].iter()
        .flatten()
        .any(|d| *d <= LENS_MERGE_SECS)
}

fn track_point(sample: &CorrectedSample) -> Option<TrackPoint> {
    let fix = sample.sample.gps.as_ref()?;
    Some(TrackPoint {
        time: quantize_millis(sample.time),
        latitude: fix.latitude,
        longitude: fix.longitude,
        elevation: fix.altitude.is_finite().then_some(fix.altitude),
        fix: Some(fix.quality),
        dop: fix.dop,
    })
}

/// Writes `timeline` as a single-track GPX file to `output`.
///
/// Written through a temporary file in the target directory and read back
/// before it is persisted.
pub fn export_gpx(timeline: &CorrectedTimeline, output: &Path, name: &str) -> Result<GpxReport, PrepError> {
    let (points, dropped) = points(timeline);
    if points.is_empty() {
        return Err(PrepError::NoGeoFixesAvailable);
    }

    let mut segment = TrackSegment::new();
    for point in points.iter() {
        let mut waypoint = Waypoint::new(geo_types::Point::new(point.longitude, point.latitude));
        waypoint.elevation = point.elevation;
        waypoint.time = Some(gpx::Time::from(point.time));
        waypoint.hdop = point.dop;
        waypoint.fix = match point.fix {
            Some(FixQuality::ThreeD) => Some(Fix::ThreeDimensional),
            Some(FixQuality::TwoD) => Some(Fix::TwoDimensional),
            Some(FixQuality::NoFix) => Some(Fix::None),
            None => None,
        };
        segment.points.push(waypoint);
    }

    let mut track = Track::new();
    track.name = Some(name.to_owned());
    track.segments.push(segment);

    let gpx = Gpx {
        version: GpxVersion::Gpx11,
        creator: Some(format!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))),
        tracks: vec![track],
        ..Default::default()
    };

    let mut temp = NamedTempFile::new_in(output_dir(output)?)?;
    {
        let mut writer = BufWriter::new(temp.as_file_mut());
        gpx::write(&gpx, &mut writer).map_err(|e| PrepError::GpxError(e.to_string()))?;
        writer.flush()?;
    }

    let written = read_gpx(temp.path())
        .map_err(PrepError::into_write_failed)?;
    if written.len() != points.len() {
        return Err(PrepError::ContainerWriteFailed(format!(
            "GPX holds {} points, expected {}", written.len(), points.len()
        )));
    }
    temp.persist(output)?;

    let mut warnings = Vec::new();
    if dropped > 0 {
        warnings.push(Warning::DuplicateTrackPoints { count: dropped });
    }

    log::info!("{}: {} track points", output.display(), points.len());

    Ok(GpxReport { output: output.to_owned(), points: points.len(), warnings })
}

/// Reads all track points of all tracks in the GPX file at `path`.
/// Points without a timestamp are left out.
pub fn read_gpx(path: &Path) -> Result<Vec<TrackPoint>, PrepError> {
    let reader = BufReader::new(File::open(path)?);
    let gpx = gpx::read(reader).map_err(|e| PrepError::GpxError(e.to_string()))?;

    let mut points = Vec::new();
    for track in gpx.tracks {
        for segment in track.segments {
            for waypoint in segment.points {
                let Some(time) = waypoint.time else { continue };
                let iso = time.format()
                    .map_err(|e| PrepError::GpxError(e.to_string()))?;
                let time = OffsetDateTime::parse(&iso, &Rfc3339)
                    .map_err(|e| PrepError::GpxError(e.to_string()))?;
                let point = waypoint.point();
                points.push(TrackPoint {
                    time,
                    latitude: point.y(),
                    longitude: point.x(),
                    elevation: waypoint.elevation,
                    fix: match waypoint.fix {
                        Some(Fix::ThreeDimensional) => Some(FixQuality::ThreeD),
                        Some(Fix::TwoDimensional) => Some(FixQuality::TwoD),
                        Some(Fix::None) => Some(FixQuality::NoFix),
                        _ => None,
                    },
                    dop: waypoint.hdop,
                });
            }
        }
    }

    Ok(points)
}

/// Time of the first track point. Used to check a rewritten
/// container's creation time against the exported track.
pub fn first_fix_time(path: &Path) -> Result<OffsetDateTime, PrepError> {
    read_gpx(path)?
        .first()
        .map(|p| p.time)
        .ok_or(PrepError::NoGeoFixesAvailable)
}
