//! Container header rewrite.
//!
//! Ingestion services such as Street View Studio validate the creation
//! time and durations of `mvhd`, `tkhd` and `mdhd` against the GPS track.
//! All six creation/modification dates are set to the corrected start time
//! and durations are rebuilt from the sample tables. Fields are patched
//! at their absolute byte offsets in a copy of the source, so every media
//! sample keeps its position. A full remux is only done if a value needs
//! a version 1 header, or if non-media tracks are stripped.

use std::{
    io::{BufWriter, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
};

use tempfile::NamedTempFile;
use time::OffsetDateTime;

use crate::{
    reader::Mp4Reader,
    remux::{repair_timing, write_remux},
    support::{from_mp4_seconds, to_mp4_seconds, to_unix_seconds},
    Atom,
    FourCC,
    Hdlr,
    Mdhd,
    Mp4Layout,
    PrepError,
    Tkhd,
    Warning,
    DURATION_TOLERANCE_SECS,
};

/// Rewrite settings.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RewriteOptions {
    /// Remove all tracks that are neither audio nor video,
    /// so that the ingestion service relies on an external GPX.
    pub strip_telemetry: bool,
}

/// Outcome of a successful rewrite.
#[derive(Debug, Clone)]
pub struct RewriteReport {
    pub output: PathBuf,
    /// `true` if the container was remuxed rather than patched in place.
    pub remuxed: bool,
    /// Value written to all creation and modification dates.
    pub creation_time: OffsetDateTime,
    /// New `mvhd` duration in seconds.
    pub duration_secs: f64,
    pub stripped_tracks: usize,
    pub warnings: Vec<Warning>,
}

/// Rewrites timing headers of `source` into `output`.
///
/// `start` and `end` are the corrected timeline bounds. The source is only
/// ever read. `output` is written via a temporary file in the same
/// directory and only appears once it has been re-validated.
pub fn rewrite_container(
    source: &Path,
    output: &Path,
    start: OffsetDateTime,
    end: OffsetDateTime,
    options: &RewriteOptions,
) -> Result<RewriteReport, PrepError> {
    if is_same_file(source, output)? {
        return Err(PrepError::InvalidConfig(format!(
            "output '{}' would overwrite the source", output.display()
        )));
    }

    let layout = Mp4Layout::read(source)?;
    let secs = to_mp4_seconds(start)
        .ok_or_else(|| PrepError::ContainerUnsupported(format!("start time {start} precedes 1904-01-01")))?;

    let mut moov = layout.moov().to_owned();
    let stripped = match options.strip_telemetry {
        true => strip_non_media(&mut moov)?,
        false => 0,
    };
    let repair = repair_timing(&mut moov, Some(secs))?;
    let remuxed = repair.upgraded || stripped > 0;
    let expected_traks = moov.find_all("trak").count();

    let mut temp = NamedTempFile::new_in(output_dir(output)?)?;
    {
        let mut writer = BufWriter::new(temp.as_file_mut());
        match remuxed {
            true => {
                write_remux(&layout, moov, None, &mut writer)?;
            },
            false => patch_in_place(&layout, &moov, &mut writer)?,
        }
        writer.flush()?;
    }

    verify(temp.path(), secs, expected_traks)
        .map_err(PrepError::into_write_failed)?;
    temp.persist(output)?;

    let mut warnings = Vec::new();
    let span = to_unix_seconds(end) - to_unix_seconds(start);
    let duration_secs = repair.duration_secs();
    if (span - duration_secs).abs() > DURATION_TOLERANCE_SECS.max(0.05 * duration_secs) {
        warnings.push(Warning::DurationMismatch { timeline: span, container: duration_secs });
    }

    log::info!("{} -> {}: dates set to {}, duration {duration_secs:.3}s{}",
        source.display(),
        output.display(),
        from_mp4_seconds(secs),
        if remuxed { " (remuxed)" } else { "" }
    );

    Ok(RewriteReport {
        output: output.to_owned(),
        remuxed,
        creation_time: from_mp4_seconds(secs),
        duration_secs,
        stripped_tracks: stripped,
        warnings,
    })
}

/// Copies the source, then overwrites the data loads of all
/// `mvhd`, `tkhd` and `mdhd` atoms at their original offsets.
fn patch_in_place<W: Write + Seek>(layout: &Mp4Layout, moov: &Atom, writer: &mut W) -> Result<(), PrepError> {
    let mut reader = Mp4Reader::open(layout.path())?;
    reader.copy_to(0, layout.len(), writer)?;

    let mut atoms = vec![moov.path(&["mvhd"])?];
    for trak in moov.find_all("trak") {
        atoms.push(trak.path(&["tkhd"])?);
        atoms.push(trak.path(&["mdia", "mdhd"])?);
    }

    for atom in atoms.iter() {
        let hdr = atom.header();
        let data = atom.leaf_data()?;
        if data.len() as u64 != hdr.data_size() {
            return Err(PrepError::ContainerWriteFailed(format!(
                "'{}' @ {} changed size in place", hdr.name(), hdr.offset()
            )));
        }
        writer.seek(SeekFrom::Start(hdr.data_offset()))?;
        writer.write_all(data)?;
    }

    Ok(())
}

/// Removes tracks that are neither audio nor video.
/// Returns the number of removed tracks.
fn strip_non_media(moov: &mut Atom) -> Result<usize, PrepError> {
    let keep = moov.children().iter()
        .map(|a| match a.name() {
            FourCC::Trak => is_media_trak(a),
            _ => Ok(true),
        })
        .collect::<Result<Vec<bool>, PrepError>>()?;

    let media = moov.children().iter()
        .zip(keep.iter())
        .filter(|(a, k)| a.name() == &FourCC::Trak && **k)
        .count();
    if media == 0 {
        return Err(PrepError::ContainerUnsupported("no audio or video track".to_owned()));
    }

    let children = moov.children_mut()
        .ok_or_else(|| PrepError::NoSuchAtom("moov".to_owned()))?;
    let mut flags = keep.iter();
    children.retain(|_| *flags.next().unwrap_or(&true));

    Ok(keep.iter().filter(|k| !**k).count())
}

fn is_media_trak(trak: &Atom) -> Result<bool, PrepError> {
    let hdlr = Hdlr::parse(trak.path(&["mdia", "hdlr"])?.leaf_data()?)?;
    Ok(matches!(hdlr.component_sub_type().as_str(), "vide" | "soun"))
}

/// Structural validation plus all six dates equal to `secs`.
fn verify(path: &Path, secs: u64, traks: usize) -> Result<Mp4Layout, PrepError> {
    let layout = Mp4Layout::validate(path)?;

    let mvhd = layout.mvhd()?;
    let mut dates = vec![("mvhd", mvhd.creation_time, mvhd.modification_time)];
    for trak in layout.traks() {
        let tkhd = Tkhd::parse(trak.path(&["tkhd"])?.leaf_data()?)?;
        let mdhd = Mdhd::parse(trak.path(&["mdia", "mdhd"])?.leaf_data()?)?;
        dates.push(("tkhd", tkhd.creation_time, tkhd.modification_time));
        dates.push(("mdhd", mdhd.creation_time, mdhd.modification_time));
    }

    if let Some((name, created, modified)) = dates.iter().find(|(_, c, m)| *c != secs || *m != secs) {
        return Err(PrepError::ContainerWriteFailed(format!(
            "'{name}' dates {created}/{modified}, expected {secs}"
        )));
    }
    let found = layout.traks().count();
    if found != traks {
        return Err(PrepError::ContainerWriteFailed(format!("{found} tracks, expected {traks}")));
    }

    Ok(layout)
}

/// Directory for the temporary file. Must exist.
pub(crate) fn output_dir(output: &Path) -> Result<&Path, PrepError> {
    let dir = output.parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    match dir.is_dir() {
        true => Ok(dir),
        false => Err(PrepError::NoSuchPath(dir.to_owned())),
    }
}

pub(crate) fn is_same_file(a: &Path, b: &Path) -> Result<bool, PrepError> {
    if a == b {
        return Ok(true)
    }
    match b.exists() {
        true => Ok(std::fs::canonicalize(a)? == std::fs::canonicalize(b)?),
        false => Ok(false),
    }
}
