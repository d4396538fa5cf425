use std::ops::Range;

use rayon::iter::{IndexedParallelIterator, IntoParallelRefIterator, ParallelIterator};
use time::OffsetDateTime;

use crate::{
    support::to_unix_seconds,
    telemetry::{StreamId, Telemetry},
    PrepError,
    Warning,
    DURATION_TOLERANCE_SECS,
};

use super::{to_datetime, ClockCorrection, CorrectedSample, CorrectedTimeline, Segment};

/// Reconciliation settings, usually taken from the camera profile.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReconcilerParams {
    /// Device clock gap in seconds that starts a new segment.
    pub discontinuity_threshold: f64,
    /// Seconds a sample may be extrapolated past the first
    /// or last anchor before it is flagged invalid.
    pub extrapolation_margin: f64,
    /// Max deviation of the fitted drift from 1.0.
    pub max_drift: f64,
    /// Max dilution of precision for a valid fix.
    pub max_dop: f64,
}

impl Default for ReconcilerParams {
    fn default() -> Self {
        Self {
            discontinuity_threshold: 5.0,
            extrapolation_margin: 2.0,
            max_drift: 0.01,
            max_dop: 10.0,
        }
    }
}

/// Reconciles the device clock against GPS fix times.
///
/// Requires at least two valid, timestamped fixes. The returned timeline
/// is non-decreasing in corrected time; samples too far outside the
/// anchored range are flagged invalid rather than extrapolated freely.
pub fn reconcile(telemetry: &Telemetry, params: &ReconcilerParams) -> Result<CorrectedTimeline, PrepError> {
    let samples = &telemetry.samples;
    let mut warnings = Vec::new();

    let fix_valid: Vec<bool> = samples.iter()
        .map(|s| s.gps.as_ref().map(|g| g.is_valid(params.max_dop)).unwrap_or(false))
        .collect();
    let invalid = samples.iter()
        .zip(fix_valid.iter())
        .filter(|(s, valid)| s.gps.is_some() && !**valid)
        .count();
    if invalid > 0 {
        warnings.push(Warning::InvalidFixes { count: invalid });
    }

    // When lens streams disagree only the first stream anchors the clock.
    let primary: Option<StreamId> = samples.iter()
        .filter_map(|s| s.gps.as_ref()?.stream_tag)
        .min();

    let anchors: Vec<(usize, OffsetDateTime)> = samples.iter()
        .enumerate()
        .filter(|(i, _)| fix_valid[*i])
        .filter_map(|(i, s)| {
            let gps = s.gps.as_ref()?;
            match gps.stream_tag {
                Some(tag) if Some(tag) != primary => None,
                _ => gps.time.map(|t| (i, t)),
            }
        })
        .collect();

    let (first_anchor, last_anchor) = match (anchors.first(), anchors.last()) {
        (Some(first), Some(last)) if anchors.len() >= 2 => (*first, *last),
        _ => return Err(PrepError::ReconciliationImpossible { valid_fixes: anchors.len() }),
    };

    let raw: Vec<f64> = samples.iter().map(|s| s.device_time).collect();
    let ranges = segment_ranges(&raw, params.discontinuity_threshold);
    let interval = median_interval(&raw, &ranges);

    // anchors per segment as (sample index, unix seconds)
    let seg_anchors: Vec<Vec<(usize, f64)>> = ranges.iter()
        .map(|r| anchors.iter()
            .filter(|(i, _)| r.contains(i))
            .map(|(i, t)| (*i, to_unix_seconds(*t)))
            .collect())
        .collect();

    let mut models: Vec<Option<(f64, f64)>> = seg_anchors.iter()
        .map(|a| {
            let points: Vec<(f64, f64)> = a.iter().map(|(i, u)| (raw[*i], *u)).collect();
            fit(&points, params.max_drift)
        })
        .collect();

    // Segments without anchors continue their neighbour
    // at the nominal sample interval.
    for k in 1 .. ranges.len() {
        if let (None, Some((offset, drift))) = (models[k], models[k - 1]) {
            let prev_end = offset + drift * raw[ranges[k - 1].end - 1];
            models[k] = Some((prev_end + interval - raw[ranges[k].start], 1.0));
        }
    }
    for k in (0 .. ranges.len().saturating_sub(1)).rev() {
        if let (None, Some((offset, drift))) = (models[k], models[k + 1]) {
            let next_start = offset + drift * raw[ranges[k + 1].start];
            models[k] = Some((next_start - interval - raw[ranges[k].end - 1], 1.0));
        }
    }

    let segments: Vec<Segment> = ranges.iter()
        .zip(models.iter())
        .zip(seg_anchors.iter())
        .map(|((range, model), anchors)| {
            let (offset, drift) = model.unwrap_or((0.0, 1.0));
            Segment { range: range.to_owned(), offset, drift, anchors: anchors.len() }
        })
        .collect();

    for seg in segments.iter() {
        log::debug!("segment {:?}: drift {:.6}, {} anchors", seg.range, seg.drift, seg.anchors);
    }

    let raw_ref = &raw;
    let mut times: Vec<f64> = segments.par_iter()
        .zip(seg_anchors.par_iter())
        .flat_map_iter(|(seg, anchors)| {
            seg.range.clone().map(move |i| interpolate(raw_ref, seg, anchors, i))
        })
        .collect();

    // Bounded extrapolation at sequence boundaries.
    let first_u = to_unix_seconds(first_anchor.1);
    let last_u = to_unix_seconds(last_anchor.1);
    let margin = params.extrapolation_margin.max(0.0);
    let mut valid = vec![true; times.len()];
    for (i, t) in times.iter_mut().enumerate() {
        if i < first_anchor.0 && first_u - *t > margin {
            *t = first_u - margin;
            valid[i] = false;
        } else if i > last_anchor.0 && *t - last_u > margin {
            *t = last_u + margin;
            valid[i] = false;
        }
    }
    let exceeded = valid.iter().filter(|v| !**v).count();
    if exceeded > 0 {
        warnings.push(Warning::ExtrapolationExceeded { count: exceeded });
    }

    let mut clamped = 0;
    let mut latest = f64::MIN;
    for t in times.iter_mut() {
        if *t < latest {
            *t = latest;
            clamped += 1;
        } else {
            latest = *t;
        }
    }
    if clamped > 0 {
        warnings.push(Warning::ClampedTimestamps { count: clamped });
    }

    let mut fallback = first_anchor.1;
    let corrected: Vec<CorrectedSample> = samples.iter()
        .zip(times.iter())
        .enumerate()
        .map(|(i, (sample, t))| {
            let time = to_datetime(*t, fallback);
            fallback = time;
            CorrectedSample {
                sample: sample.to_owned(),
                time,
                valid: valid[i],
                fix_valid: fix_valid[i],
            }
        })
        .collect();

    let mut timeline = CorrectedTimeline {
        samples: corrected,
        correction: ClockCorrection { segments },
        warnings,
        gps_kind: telemetry.gps_kind,
        layout: telemetry.layout.to_owned(),
        container_duration: telemetry.container_duration,
    };

    let span = timeline.span_secs();
    let container = telemetry.container_duration;
    if container > 0.0 && (span - container).abs() > DURATION_TOLERANCE_SECS.max(0.05 * container) {
        log::warn!("corrected span {span:.3}s, container duration {container:.3}s");
        timeline.warnings.push(Warning::DurationMismatch { timeline: span, container });
    }

    Ok(timeline)
}

/// Splits where the device clock steps back or jumps forward
/// by more than `threshold` seconds.
fn segment_ranges(raw: &[f64], threshold: f64) -> Vec<Range<usize>> {
    let mut bounds = vec![0];
    for i in 1 .. raw.len() {
        let delta = raw[i] - raw[i - 1];
        if delta < 0.0 || delta > threshold {
            bounds.push(i);
        }
    }
    bounds.push(raw.len());
    bounds.windows(2)
        .map(|w| w[0] .. w[1])
        .filter(|r| !r.is_empty())
        .collect()
}

/// Median positive device clock step within segments.
fn median_interval(raw: &[f64], ranges: &[Range<usize>]) -> f64 {
    let mut deltas = Vec::new();
    for r in ranges.iter() {
        for w in raw[r.to_owned()].windows(2) {
            let d = w[1] - w[0];
            if d > 0.0 {
                deltas.push(d);
            }
        }
    }
    deltas.sort_by(f64::total_cmp);
    deltas.get(deltas.len() / 2).copied().unwrap_or(0.0)
}

/// Least-squares drift over (device time, unix seconds) points, with
/// the offset chosen so that the first point maps exactly.
/// Returns `(offset, drift)`.
fn fit(points: &[(f64, f64)], max_drift: f64) -> Option<(f64, f64)> {
    let (t0, u0) = *points.first()?;
    let n = points.len() as f64;
    // relative to the first point to keep precision
    let mean_t = points.iter().map(|(t, _)| t - t0).sum::<f64>() / n;
    let mean_u = points.iter().map(|(_, u)| u - u0).sum::<f64>() / n;
    let (cov, var) = points.iter()
        .fold((0.0, 0.0), |(cov, var), (t, u)| {
            let dt = t - t0 - mean_t;
            let du = u - u0 - mean_u;
            (cov + dt * du, var + dt * dt)
        });
    let drift = match var > 0.0 {
        true => cov / var,
        false => 1.0,
    };
    let drift = match drift.is_finite() && (drift - 1.0).abs() <= max_drift {
        true => drift,
        false => 1.0,
    };
    Some((u0 - drift * t0, drift))
}

/// Linear interpolation between the nearest anchors around sample `i`,
/// or the segment model outside them.
fn interpolate(raw: &[f64], segment: &Segment, anchors: &[(usize, f64)], i: usize) -> f64 {
    let t = raw[i];
    let next = anchors.partition_point(|(a, _)| *a < i);
    let before = next.checked_sub(1).and_then(|p| anchors.get(p));
    match (before, anchors.get(next)) {
        (_, Some((a, u))) if *a == i => *u,
        (Some((a0, u0)), Some((a1, u1))) => {
            let (t0, t1) = (raw[*a0], raw[*a1]);
            match t1 > t0 {
                true => u0 + (t - t0) * (u1 - u0) / (t1 - t0),
                false => *u0,
            }
        },
        _ => segment.map(t),
    }
}
