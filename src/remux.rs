//! Structural remux and timing header repair shared by
//! the container rewriter and the telemetry muxer.
//!
//! A remux copies every top-level atom except `moov` byte-for-byte
//! in file order, optionally appends a new `mdat`, then writes the
//! edited `moov` last. Chunk offsets are shifted by however far
//! their enclosing atom moved, so media samples are never re-encoded.

use std::{io::{Seek, Write}, ops::Range};

use crate::{
    reader::Mp4Reader,
    track::chunk_offsets,
    Atom,
    AtomHeader,
    Co64,
    FourCC,
    Mdhd,
    Mp4Layout,
    Mvhd,
    PrepError,
    Stco,
    Stts,
    Tkhd,
    TimingLayout,
};

/// Data for a new `mdat`, owned by a single track.
#[derive(Debug, Clone, Default)]
pub(crate) struct Appended {
    /// Index of the owning `trak` among `moov/trak` atoms.
    pub(crate) trak: usize,
    pub(crate) data: Vec<u8>,
    /// Chunk offsets relative to the start of `data`.
    pub(crate) chunk_offsets: Vec<u64>,
}

/// Outcome of `repair_timing()`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct TimingRepair {
    /// Some header was widened to version 1.
    pub(crate) upgraded: bool,
    /// New `mvhd` duration, movie time scale.
    pub(crate) duration: u64,
    pub(crate) time_scale: u32,
}

impl TimingRepair {
    pub(crate) fn duration_secs(&self) -> f64 {
        self.duration as f64 / self.time_scale.max(1) as f64
    }
}

/// Writes `moov` and all other top-level atoms of `layout` to `writer`.
/// Returns bytes written.
pub(crate) fn write_remux<W: Write + Seek>(
    layout: &Mp4Layout,
    mut moov: Atom,
    appended: Option<&Appended>,
    writer: &mut W,
) -> Result<u64, PrepError> {
    let copied: Vec<&AtomHeader> = layout.top_level().iter()
        .filter(|h| h.name() != &FourCC::Moov)
        .collect();

    // old data load range -> new data load offset
    let mut moves: Vec<(Range<u64>, u64)> = Vec::with_capacity(copied.len());
    let mut pos = 0;
    for hdr in copied.iter() {
        let hdr_size = AtomHeader::required_header_size(hdr.data_size(), hdr.size_64bit);
        moves.push((hdr.data_offset() .. hdr.end(), pos + hdr_size));
        pos += hdr_size + hdr.data_size();
    }
    let appended_start = appended
        .map(|a| pos + AtomHeader::required_header_size(a.data.len() as u64, false));

    let children = moov.children_mut()
        .ok_or_else(|| PrepError::NoSuchAtom("moov".to_owned()))?;
    for (i, trak) in children.iter_mut().filter(|a| a.name() == &FourCC::Trak).enumerate() {
        let (offsets, force_co64) = match (appended, appended_start) {
            (Some(a), Some(start)) if a.trak == i => {
                (a.chunk_offsets.iter().map(|o| start + o).collect(), true)
            },
            _ => {
                let stbl = trak.path(&["mdia", "minf", "stbl"])?;
                let offsets = chunk_offsets(stbl)?.iter()
                    .map(|o| relocate(*o, &moves))
                    .collect::<Result<Vec<u64>, PrepError>>()?;
                (offsets, false)
            },
        };
        set_chunk_offsets(trak, &offsets, force_co64)?;
    }

    let mut reader = Mp4Reader::open(layout.path())?;
    let mut written = 0;
    for hdr in copied.iter() {
        written += AtomHeader::write(writer, hdr.name(), hdr.data_size(), hdr.size_64bit)?;
        written += reader.copy_to(hdr.data_offset(), hdr.data_size(), writer)?;
    }
    if let Some(a) = appended {
        written += AtomHeader::write(writer, &FourCC::Mdat, a.data.len() as u64, false)?;
        writer.write_all(&a.data)?;
        written += a.data.len() as u64;
    }
    written += moov.write(writer)?;

    log::debug!("{}: remuxed {} top-level atoms, {written} bytes", layout.path().display(), copied.len() + 1);

    Ok(written)
}

/// New absolute position for a chunk offset in the source file.
fn relocate(offset: u64, moves: &[(Range<u64>, u64)]) -> Result<u64, PrepError> {
    moves.iter()
        .find(|(old, _)| old.start <= offset && offset <= old.end)
        .map(|(old, new)| new + (offset - old.start))
        .ok_or_else(|| PrepError::ContainerUnsupported(format!(
            "chunk offset {offset} is outside all data atoms"
        )))
}

/// Replaces the chunk offset table of `trak`. Writes `stco` when
/// all offsets fit 32 bits, unless `force_co64` is set.
pub(crate) fn set_chunk_offsets(trak: &mut Atom, offsets: &[u64], force_co64: bool) -> Result<(), PrepError> {
    let atom = match Stco::from_offsets(offsets).filter(|_| !force_co64) {
        Some(stco) => Atom::leaf(FourCC::Stco, stco.to_bytes()?),
        None => Atom::leaf(FourCC::Co64, Co64::from_offsets(offsets.to_vec()).to_bytes()?),
    };
    let children = trak.find_path_mut(&["mdia", "minf", "stbl"])
        .and_then(|stbl| stbl.children_mut())
        .ok_or_else(|| PrepError::NoSuchAtom("mdia/minf/stbl".to_owned()))?;

    let is_offsets = |a: &Atom| matches!(a.name(), FourCC::Stco | FourCC::Co64);
    let pos = children.iter().position(is_offsets).unwrap_or(children.len());
    children.retain(|a| !is_offsets(a));
    children.insert(pos.min(children.len()), atom);
    Ok(())
}

/// Sets the duration and, if `dates` is set, the creation and
/// modification time of a `mvhd`, `tkhd` or `mdhd` atom. Widens the
/// atom to version 1 if a value does not fit. Returns `true` if widened.
pub(crate) fn patch_timing(
    atom: &mut Atom,
    layout: TimingLayout,
    dates: Option<u64>,
    duration: u64,
) -> Result<bool, PrepError> {
    let name = atom.name().to_string();
    let data = atom.data_mut()
        .ok_or(PrepError::NoSuchAtom(name))?;

    let mut layout = layout;
    let mut upgraded = false;
    if !layout.fits(duration) || dates.map(|d| !layout.fits(d)).unwrap_or(false) {
        let (wide, wide_layout) = layout.upgrade(data.as_slice())?;
        *data = wide;
        layout = wide_layout;
        upgraded = true;
    }

    if let Some(secs) = dates {
        layout.patch(data.as_mut_slice(), layout.creation, secs)?;
        layout.patch(data.as_mut_slice(), layout.modification, secs)?;
    }
    layout.patch(data.as_mut_slice(), layout.duration, duration)?;

    Ok(upgraded)
}

/// Repairs durations from the sample tables:
/// - `mdhd`: sum of `stts` durations
/// - `tkhd`: the same in movie time scale, unless the track has an edit list
/// - `mvhd`: the longest track
///
/// With `dates` set, all creation and modification times are set too.
/// Time scales are never changed.
pub(crate) fn repair_timing(moov: &mut Atom, dates: Option<u64>) -> Result<TimingRepair, PrepError> {
    let time_scale = Mvhd::parse(moov.path(&["mvhd"])?.leaf_data()?)?.time_scale();
    let mut upgraded = false;
    let mut longest = 0;

    let children = moov.children_mut()
        .ok_or_else(|| PrepError::NoSuchAtom("moov".to_owned()))?;
    for trak in children.iter_mut().filter(|a| a.name() == &FourCC::Trak) {
        let media_duration = Stts::parse(trak.path(&["mdia", "minf", "stbl", "stts"])?.leaf_data()?)?
            .duration_sum();
        let has_edit_list = trak.find("edts").is_some();

        let mdhd_atom = trak.find_path_mut(&["mdia", "mdhd"])
            .ok_or_else(|| PrepError::NoSuchAtom("mdia/mdhd".to_owned()))?;
        let mdhd = Mdhd::parse(mdhd_atom.leaf_data()?)?;
        upgraded |= patch_timing(mdhd_atom, mdhd.layout(), dates, media_duration)?;

        let tkhd_atom = trak.find_path_mut(&["tkhd"])
            .ok_or_else(|| PrepError::NoSuchAtom("tkhd".to_owned()))?;
        let tkhd = Tkhd::parse(tkhd_atom.leaf_data()?)?;
        let duration = match has_edit_list {
            true => tkhd.duration(),
            false => rescale(media_duration, mdhd.time_scale(), time_scale),
        };
        upgraded |= patch_timing(tkhd_atom, tkhd.layout(), dates, duration)?;

        longest = longest.max(duration);
    }

    let mvhd_atom = moov.find_path_mut(&["mvhd"])
        .ok_or_else(|| PrepError::NoSuchAtom("mvhd".to_owned()))?;
    let mvhd = Mvhd::parse(mvhd_atom.leaf_data()?)?;
    upgraded |= patch_timing(mvhd_atom, mvhd.layout(), dates, longest)?;

    Ok(TimingRepair { upgraded, duration: longest, time_scale })
}

/// Converts `value` from time scale `from` to `to`, rounding.
pub(crate) fn rescale(value: u64, from: u32, to: u32) -> u64 {
    let from = from.max(1) as u128;
    let scaled = (value as u128 * to as u128 + from / 2) / from;
    u64::try_from(scaled).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::testdata::Mp4Builder;

    #[test]
    fn rescale_rounds() {
        assert_eq!(rescale(1001, 30000, 600), 20);
        assert_eq!(rescale(90_000, 90_000, 1000), 1000);
        assert_eq!(rescale(5, 0, 10), 50);
    }

    #[test]
    fn remux_moves_moov_last_and_keeps_samples() {
        let dir = tempfile::tempdir().unwrap();
        let path = Mp4Builder::default().moov_first(true).write(dir.path(), "moov_first.mp4");
        let layout = Mp4Layout::read(&path).unwrap();
        let before = layout.tracks().unwrap();

        let mut out = Cursor::new(Vec::new());
        let written = write_remux(&layout, layout.moov().to_owned(), None, &mut out).unwrap();
        assert_eq!(written, out.get_ref().len() as u64);

        let remuxed = dir.path().join("remuxed.mp4");
        std::fs::write(&remuxed, out.into_inner()).unwrap();
        let layout2 = Mp4Layout::validate(&remuxed).unwrap();
        assert_eq!(layout2.top_level().last().map(|h| h.name().to_str()), Some("moov"));

        for (a, b) in before.iter().zip(layout2.tracks().unwrap().iter()) {
            assert_eq!(a.read_samples(&path).unwrap().iter().map(|s| s.data.clone()).collect::<Vec<_>>(),
                b.read_samples(&remuxed).unwrap().iter().map(|s| s.data.clone()).collect::<Vec<_>>());
        }
    }

    #[test]
    fn oversized_values_widen_headers() {
        let dir = tempfile::tempdir().unwrap();
        let path = Mp4Builder::default().write(dir.path(), "v0.mp4");
        let layout = Mp4Layout::read(&path).unwrap();
        let mut moov = layout.moov().to_owned();

        let repair = repair_timing(&mut moov, Some(u32::MAX as u64 + 10)).unwrap();
        assert!(repair.upgraded);
        let mvhd = Mvhd::parse(moov.path(&["mvhd"]).unwrap().leaf_data().unwrap()).unwrap();
        assert_eq!(mvhd.version, 1);
        assert_eq!(mvhd.creation_time, u32::MAX as u64 + 10);
        assert_eq!(mvhd.duration, repair.duration);
    }
}
