//! Metadata track muxer.
//!
//! Re-encodes the corrected timeline as GPMF and writes it into a copy of
//! the source as the single `GoPro MET` track. Payload count and cadence
//! follow the source track, so players that index telemetry by sample
//! keep working. All other tracks are carried over untouched.

mod encoder;

use std::{
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use tempfile::NamedTempFile;

use crate::{
    clock::CorrectedTimeline,
    remux::{rescale, repair_timing, write_remux, Appended},
    rewrite::{is_same_file, output_dir},
    Atom,
    FourCC,
    Hdlr,
    Mdhd,
    Mp4Layout,
    PrepError,
    Stsc,
    Stsz,
    Stts,
    Warning,
    GPMF_HANDLER_NAME,
};

use encoder::encode_timeline;

/// Muxer settings.
#[derive(Debug, Clone, PartialEq)]
pub struct MuxParams {
    /// Largest fraction of samples that may fail to encode
    /// before the asset fails with `MuxEncodingFailed`.
    pub max_invalid_sample_fraction: f64,
    /// Written as `DVNM`.
    pub device_name: String,
}

impl Default for MuxParams {
    fn default() -> Self {
        Self {
            max_invalid_sample_fraction: 0.05,
            device_name: "Camera".to_owned(),
        }
    }
}

/// Outcome of a successful mux.
#[derive(Debug, Clone)]
pub struct MuxReport {
    pub output: PathBuf,
    /// Payloads in the new telemetry track.
    pub payloads: usize,
    /// Samples encoded.
    pub encoded: usize,
    /// Extra telemetry tracks dropped, e.g. the second lens stream.
    pub removed_tracks: usize,
    pub warnings: Vec<Warning>,
}

/// Writes `source` with its telemetry replaced by `timeline` to `output`.
///
/// The output goes through a temporary file in the target directory and
/// is only persisted once it re-validates and holds the expected number
/// of telemetry samples.
pub fn mux_timeline(
    source: &Path,
    output: &Path,
    timeline: &CorrectedTimeline,
    params: &MuxParams,
) -> Result<MuxReport, PrepError> {
    if is_same_file(source, output)? {
        return Err(PrepError::InvalidConfig(format!(
            "output '{}' would overwrite the source", output.display()
        )));
    }

    let encoded = encode_timeline(timeline, &params.device_name)?;
    if encoded.failed_fraction() > params.max_invalid_sample_fraction {
        return Err(PrepError::MuxEncodingFailed { failed: encoded.failed, total: encoded.total });
    }

    let layout = Mp4Layout::read(source)?;
    let mut moov = layout.moov().to_owned();
    let (trak, removed) = replace_telemetry_tracks(&mut moov, timeline, &encoded.payloads)?;
    repair_timing(&mut moov, None)?;

    let mut chunk_offsets = Vec::with_capacity(encoded.payloads.len());
    let mut pos = 0_u64;
    for payload in encoded.payloads.iter() {
        chunk_offsets.push(pos);
        pos += payload.len() as u64;
    }
    let appended = Appended {
        trak,
        data: encoded.payloads.concat(),
        chunk_offsets,
    };

    let mut temp = NamedTempFile::new_in(output_dir(output)?)?;
    {
        let mut writer = BufWriter::new(temp.as_file_mut());
        write_remux(&layout, moov, Some(&appended), &mut writer)?;
        writer.flush()?;
    }
    verify(temp.path(), encoded.payloads.len())
        .map_err(PrepError::into_write_failed)?;
    temp.persist(output)?;

    let samples = encoded.total - encoded.failed;
    log::info!("{} -> {}: {} telemetry payloads, {samples} samples{}",
        source.display(),
        output.display(),
        encoded.payloads.len(),
        match encoded.failed {
            0 => String::new(),
            n => format!(", {n} left out"),
        }
    );

    Ok(MuxReport {
        output: output.to_owned(),
        payloads: encoded.payloads.len(),
        encoded: samples,
        removed_tracks: removed,
        warnings: encoded.warnings,
    })
}

/// Keeps the first telemetry `trak`, removes any others and rebuilds the
/// kept one's sample tables for `payloads`. Chunk offsets are set
/// during the remux. Returns the kept track's index among
/// `moov/trak` atoms and the number of removed tracks.
fn replace_telemetry_tracks(
    moov: &mut Atom,
    timeline: &CorrectedTimeline,
    payloads: &[Vec<u8>],
) -> Result<(usize, usize), PrepError> {
    let is_telemetry = moov.children().iter()
        .map(|a| match a.name() {
            FourCC::Trak => {
                let hdlr = Hdlr::parse(a.path(&["mdia", "hdlr"])?.leaf_data()?)?;
                Ok(hdlr.component_name() == GPMF_HANDLER_NAME)
            },
            _ => Ok(false),
        })
        .collect::<Result<Vec<bool>, PrepError>>()?;

    let first = is_telemetry.iter()
        .position(|t| *t)
        .ok_or_else(|| PrepError::MetadataAbsent(format!("no '{GPMF_HANDLER_NAME}' track to replace")))?;
    let removed = is_telemetry.iter().filter(|t| **t).count() - 1;

    let children = moov.children_mut()
        .ok_or_else(|| PrepError::NoSuchAtom("moov".to_owned()))?;
    let mut flags = is_telemetry.iter().enumerate();
    children.retain(|_| match flags.next() {
        Some((i, t)) => !*t || i == first,
        None => true,
    });

    let trak_index = children[.. first].iter()
        .filter(|a| a.name() == &FourCC::Trak)
        .count();
    let trak = &mut children[first];

    let time_scale = Mdhd::parse(trak.path(&["mdia", "mdhd"])?.leaf_data()?)?.time_scale();
    let durations = timeline.layout.durations.iter()
        .map(|d| {
            let scaled = rescale(*d as u64, timeline.layout.time_scale, time_scale);
            u32::try_from(scaled).map_err(|_| PrepError::MetadataCorrupt(format!("payload duration {scaled} overflows")))
        })
        .collect::<Result<Vec<u32>, PrepError>>()?;
    let sizes = payloads.iter()
        .map(|p| u32::try_from(p.len()).map_err(|_| PrepError::MetadataCorrupt(format!("{} byte payload", p.len()))))
        .collect::<Result<Vec<u32>, PrepError>>()?;

    let tables = [
        Atom::leaf(FourCC::Stts, Stts::from_durations(&durations).to_bytes()?),
        Atom::leaf(FourCC::Stsc, Stsc::one_sample_per_chunk().to_bytes()?),
        Atom::leaf(FourCC::Stsz, Stsz::from_sizes(sizes).to_bytes()?),
    ];
    let stbl = trak.find_path_mut(&["mdia", "minf", "stbl"])
        .and_then(|stbl| stbl.children_mut())
        .ok_or_else(|| PrepError::NoSuchAtom("mdia/minf/stbl".to_owned()))?;

    // sync samples, dependency flags and composition offsets
    // no longer describe the new payloads
    stbl.retain(|a| !matches!(a.name().to_str(), "stss" | "sdtp" | "ctts"));
    for table in tables {
        match stbl.iter_mut().find(|a| a.name() == table.name()) {
            Some(existing) => *existing = table,
            None => stbl.push(table),
        }
    }

    Ok((trak_index, removed))
}

fn verify(path: &Path, payloads: usize) -> Result<Mp4Layout, PrepError> {
    let layout = Mp4Layout::validate(path)?;
    let tracks = layout.tracks()?;
    let telemetry: Vec<_> = tracks.iter()
        .filter(|t| t.handler_name() == GPMF_HANDLER_NAME)
        .collect();
    match telemetry.as_slice() {
        [track] if track.samples.len() == payloads => Ok(layout),
        [track] => Err(PrepError::ContainerWriteFailed(format!(
            "telemetry track holds {} samples, expected {payloads}", track.samples.len()
        ))),
        other => Err(PrepError::ContainerWriteFailed(format!("{} telemetry tracks, expected 1", other.len()))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        clock::{reconcile, ReconcilerParams},
        telemetry::{extract, ExtractorParams},
        testdata::Mp4Builder,
        ErrorKind,
    };

    fn corrected(path: &Path) -> CorrectedTimeline {
        let telemetry = extract(path, &ExtractorParams::default()).unwrap();
        reconcile(&telemetry, &ReconcilerParams::default()).unwrap()
    }

    #[test]
    fn muxed_track_extracts_to_the_corrected_timeline() {
        let dir = tempfile::tempdir().unwrap();
        let source = Mp4Builder::default().write(dir.path(), "GX010001.MP4");
        let timeline = corrected(&source);
        let output = dir.path().join("muxed.mp4");

        let report = mux_timeline(&source, &output, &timeline, &MuxParams::default()).unwrap();
        assert_eq!(report.payloads, timeline.layout.durations.len());
        assert_eq!(report.removed_tracks, 0);
        assert!(report.warnings.is_empty());

        let telemetry = extract(&output, &ExtractorParams::default()).unwrap();
        assert_eq!(telemetry.layout.durations.len(), report.payloads);
        let geo: Vec<_> = telemetry.samples.iter().filter(|s| s.gps.is_some()).collect();
        assert_eq!(geo.len(), timeline.geo_samples().count());

        let first_fix = geo[0].gps.as_ref().and_then(|g| g.time).unwrap();
        let expected = timeline.geo_samples().next().unwrap().time;
        assert!((first_fix - expected).abs() <= time::Duration::milliseconds(1));

        // video samples survive byte-for-byte
        let video = |p: &Path| {
            let layout = Mp4Layout::read(p).unwrap();
            let track = layout.tracks().unwrap().into_iter().find(|t| t.sub_type() == "vide").unwrap();
            track.read_samples(p).unwrap().into_iter().map(|s| s.data).collect::<Vec<_>>()
        };
        assert_eq!(video(&source), video(&output));
    }

    #[test]
    fn too_many_unencodable_samples_fail() {
        let dir = tempfile::tempdir().unwrap();
        let source = Mp4Builder::default().write(dir.path(), "GX010002.MP4");
        let mut timeline = corrected(&source);
        for s in timeline.samples.iter_mut() {
            s.time += time::Duration::days(365 * 80);
        }
        let output = dir.path().join("muxed.mp4");

        let err = mux_timeline(&source, &output, &timeline, &MuxParams::default()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MuxEncodingFailed);
        assert!(!output.exists());
    }

    #[test]
    fn refuses_to_overwrite_source() {
        let dir = tempfile::tempdir().unwrap();
        let source = Mp4Builder::default().write(dir.path(), "GX010003.MP4");
        let timeline = corrected(&source);
        let err = mux_timeline(&source, &source, &timeline, &MuxParams::default()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
    }
}
