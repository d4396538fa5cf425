//! Whole-file MP4 layout: top-level atom headers plus
//! the parsed `moov` tree. `mdat` data loads are never read into memory.

use std::path::{Path, PathBuf};

use crate::{
    reader::Mp4Reader,
    track::Track,
    Atom,
    AtomHeader,
    Hdlr,
    Mdhd,
    Mvhd,
    PrepError,
    Tkhd,
    MANDATORY_TOP_LEVEL,
    SUPPORTED_TOP_LEVEL,
};

/// Top-level structure of an MP4 file.
#[derive(Debug, Clone)]
pub struct Mp4Layout {
    pub(crate) path: PathBuf,
    /// File size.
    pub(crate) len: u64,
    /// Top-level headers in file order.
    pub(crate) top_level: Vec<AtomHeader>,
    /// Parsed `moov` atom.
    pub(crate) moov: Atom,
}

impl Mp4Layout {
    /// Reads top-level atoms and the `moov` tree.
    ///
    /// Any top-level atom not in `SUPPORTED_TOP_LEVEL`,
    /// a missing `moov` or `mdat`, or a structurally broken
    /// `moov` raises `ContainerUnsupported`.
    pub fn read(path: &Path) -> Result<Self, PrepError> {
        let mut reader = Mp4Reader::open(path)?;
        let top_level = reader.top_level()
            .map_err(|e| unsupported(path, e))?;

        if let Some(hdr) = top_level.iter().find(|h| !SUPPORTED_TOP_LEVEL.contains(&h.name().to_str())) {
            return Err(PrepError::ContainerUnsupported(format!(
                "'{}': unsupported top-level atom '{}' @ offset {}",
                path.display(), hdr.name(), hdr.offset()
            )));
        }
        for name in MANDATORY_TOP_LEVEL.iter() {
            if !top_level.iter().any(|h| h.name().to_str() == *name) {
                return Err(PrepError::ContainerUnsupported(format!(
                    "'{}': missing top-level atom '{name}'", path.display()
                )));
            }
        }

        let moov_headers: Vec<&AtomHeader> = top_level.iter()
            .filter(|h| h.name().to_str() == "moov")
            .collect();
        let moov_hdr = match moov_headers.as_slice() {
            [hdr] => (*hdr).to_owned(),
            _ => return Err(PrepError::ContainerUnsupported(format!(
                "'{}': {} 'moov' atoms", path.display(), moov_headers.len()
            ))),
        };

        let data = reader.read_at(moov_hdr.data_offset(), moov_hdr.data_size())?;
        let children = Atom::parse(&data, moov_hdr.data_offset())
            .map_err(|e| unsupported(path, e))?;

        log::debug!("{}: {} top-level atoms, moov @ {}", path.display(), top_level.len(), moov_hdr.offset());

        Ok(Self {
            path: path.to_owned(),
            len: reader.len,
            top_level,
            moov: Atom::Container { header: moov_hdr, children },
        })
    }

    /// Structural validation of a written file:
    /// sizes sum to the file length, `moov` children fill their
    /// parents, mandatory atoms present, sample tables consistent
    /// and every sample inside the file.
    pub fn validate(path: &Path) -> Result<Self, PrepError> {
        let layout = Self::read(path)?;

        layout.mvhd()?;
        let traks: Vec<&Atom> = layout.traks().collect();
        if traks.is_empty() {
            return Err(PrepError::NoSuchAtom("moov/trak".to_owned()));
        }
        for trak in traks.iter() {
            Tkhd::parse(trak.path(&["tkhd"])?.leaf_data()?)?;
            Mdhd::parse(trak.path(&["mdia", "mdhd"])?.leaf_data()?)?;
            Hdlr::parse(trak.path(&["mdia", "hdlr"])?.leaf_data()?)?;
        }
        for track in layout.tracks()?.iter() {
            if let Some(s) = track.samples.iter().find(|s| s.position + s.size as u64 > layout.len) {
                return Err(PrepError::BoundsError((s.position + s.size as u64, layout.len)));
            }
        }

        Ok(layout)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn moov(&self) -> &Atom {
        &self.moov
    }

    pub fn top_level(&self) -> &[AtomHeader] {
        &self.top_level
    }

    /// Movie header (`moov/mvhd`).
    pub fn mvhd(&self) -> Result<Mvhd, PrepError> {
        Mvhd::parse(self.moov.path(&["mvhd"])?.leaf_data()?)
    }

    /// All `trak` atoms in file order.
    pub fn traks(&self) -> impl Iterator<Item = &Atom> {
        self.moov.find_all("trak")
    }

    /// All tracks with resolved sample offsets.
    pub fn tracks(&self) -> Result<Vec<Track>, PrepError> {
        self.traks()
            .enumerate()
            .map(|(i, trak)| Track::from_trak(trak, i))
            .collect()
    }
}

fn unsupported(path: &Path, err: PrepError) -> PrepError {
    match err {
        PrepError::IOError(_) | PrepError::ContainerUnsupported(_) => err,
        other => PrepError::ContainerUnsupported(format!("'{}': {other}", path.display())),
    }
}
