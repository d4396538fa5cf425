//! An MP4 "track", containing compiled information such as time scale,
//! handler and byte offsets for its data load in `mdat`.
//! Use `Track::samples()` to read raw sample data for the track.

use std::path::Path;

use crate::{reader::Mp4Reader, Atom, Hdlr, Mdhd, PrepError, Tkhd, GPMF_HANDLER_NAME};

use super::{offset::SampleOffset, Sample};

#[derive(Debug, Clone)]
pub struct Track {
    /// Position among `trak` atoms in `moov`.
    pub(crate) index: usize,
    /// Track ID from `tkhd`.
    pub(crate) id: u32,
    /// Handler name, e.g. "GoPro MET".
    pub(crate) handler_name: String,
    /// Handler sub type, e.g. `vide`, `meta`.
    pub(crate) sub_type: String,
    /// Media time scale from `mdhd`.
    pub(crate) time_scale: u32,
    /// Unscaled media duration from `mdhd`.
    pub(crate) duration: u64,
    /// Track has an edit list (`edts`).
    pub(crate) has_edit_list: bool,
    pub(crate) samples: Vec<SampleOffset>,
}

impl Track {
    /// Compiles track information from a `trak` atom.
    pub fn from_trak(trak: &Atom, index: usize) -> Result<Self, PrepError> {
        let tkhd = Tkhd::parse(trak.path(&["tkhd"])?.leaf_data()?)?;
        let mdhd = Mdhd::parse(trak.path(&["mdia", "mdhd"])?.leaf_data()?)?;
        let hdlr = Hdlr::parse(trak.path(&["mdia", "hdlr"])?.leaf_data()?)?;
        let stbl = trak.path(&["mdia", "minf", "stbl"])?;

        Ok(Self {
            index,
            id: tkhd.track_id(),
            handler_name: hdlr.component_name().to_owned(),
            sub_type: hdlr.component_sub_type(),
            time_scale: mdhd.time_scale(),
            duration: mdhd.duration(),
            has_edit_list: trak.find("edts").is_some(),
            samples: SampleOffset::from_stbl(stbl)?,
        })
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn handler_name(&self) -> &str {
        &self.handler_name
    }

    pub fn sub_type(&self) -> &str {
        &self.sub_type
    }

    pub fn time_scale(&self) -> u32 {
        self.time_scale
    }

    pub fn samples(&self) -> &[SampleOffset] {
        &self.samples
    }

    /// GoPro GPMF telemetry track.
    pub fn is_telemetry(&self) -> bool {
        self.handler_name == GPMF_HANDLER_NAME
    }

    /// Sum of sample durations in media time scale units.
    pub fn sample_duration_sum(&self) -> u64 {
        self.samples.iter().map(|s| s.duration as u64).sum()
    }

    /// Duration in seconds.
    pub fn duration_secs(&self) -> f64 {
        match self.time_scale {
            0 => 0.0,
            ts => self.duration as f64 / ts as f64,
        }
    }

    /// Samples per second, e.g. video frame rate.
    pub fn sample_rate(&self) -> Option<f64> {
        let secs = self.sample_duration_sum() as f64 / self.time_scale.max(1) as f64;
        match secs > 0.0 {
            true => Some(self.samples.len() as f64 / secs),
            false => None,
        }
    }

    /// Reads raw samples from the file at `path`.
    pub fn read_samples(&self, path: &Path) -> Result<Vec<Sample>, PrepError> {
        let mut reader = Mp4Reader::open(path)?;
        let time_scale = self.time_scale.max(1) as f64;
        let mut ticks: u64 = 0;
        let mut samples = Vec::with_capacity(self.samples.len());
        for (index, offset) in self.samples.iter().enumerate() {
            let data = reader.read_at(offset.position, offset.size as u64)?;
            samples.push(Sample {
                index,
                relative_time: ticks as f64 / time_scale,
                duration: offset.duration as f64 / time_scale,
                data,
            });
            ticks += offset.duration as u64;
        }
        Ok(samples)
    }
}
