//! Sample offsets consisting of byte offsets, extracted from `stco` (32bit) or `co64` (64bit) atom),
//! size in bytes (extracted from `stsz` atom), and duration (extracted from `stts` atom).

use rayon::iter::{IndexedParallelIterator, IntoParallelRefIterator, ParallelIterator};

use crate::{Atom, Co64, PrepError, Stco, Stsc, Stsz, Stts};

/// Sample location and unscaled duration.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct SampleOffset {
    /// Absolute byte offset.
    pub position: u64,
    /// Sample size in bytes.
    pub size: u32,
    /// Sample duration in media time scale units.
    pub duration: u32,
}

impl SampleOffset {
    /// Resolves all samples for a sample table atom (`stbl`).
    ///
    /// - Sample byte offset via `stsc` (samples per chunk) and `stco`/`co64` (chunk offsets)
    /// - Sample size via `stsz` (sample sizes)
    /// - Sample duration via `stts` (sample durations)
    ///
    /// Agnostic to the order of the sample atoms.
    pub(crate) fn from_stbl(stbl: &Atom) -> Result<Vec<Self>, PrepError> {
        let chunk_offsets = chunk_offsets(stbl)?;
        let stsc = Stsc::parse(stbl.path(&["stsc"])?.leaf_data()?)?;
        let sizes = Stsz::parse(stbl.path(&["stsz"])?.leaf_data()?)?.sizes();
        let durations = Stts::parse(stbl.path(&["stts"])?.leaf_data()?)?.durations();

        if durations.len() != sizes.len() {
            return Err(PrepError::SampleTableMismatch {
                atom: "stts".to_owned(),
                got: durations.len(),
                expected: sizes.len(),
            });
        }

        let per_chunk = stsc.samples_per_chunk(chunk_offsets.len());
        let total: usize = per_chunk.iter().map(|n| *n as usize).sum();
        if total != sizes.len() || per_chunk.len() != chunk_offsets.len() {
            return Err(PrepError::SampleTableMismatch {
                atom: "stsc".to_owned(),
                got: total,
                expected: sizes.len(),
            });
        }

        // index of first sample in each chunk
        let first_sample: Vec<usize> = per_chunk.iter()
            .scan(0, |acc, n| {
                let first = *acc;
                *acc += *n as usize;
                Some(first)
            })
            .collect();

        let sizes = &sizes;
        let durations = &durations;

        let offsets = chunk_offsets.par_iter()
            .zip(per_chunk.par_iter())
            .zip(first_sample.par_iter())
            .flat_map_iter(|((chunk_offset, count), first)| {
                let mut position = *chunk_offset;
                (*first .. *first + *count as usize).map(move |i| {
                    let offset = SampleOffset {
                        position,
                        size: sizes[i],
                        duration: durations[i],
                    };
                    position += sizes[i] as u64;
                    offset
                })
            })
            .collect();

        Ok(offsets)
    }
}

/// Chunk offsets from either `stco` or `co64`.
pub(crate) fn chunk_offsets(stbl: &Atom) -> Result<Vec<u64>, PrepError> {
    if let Some(stco) = stbl.find("stco") {
        return Ok(Stco::parse(stco.leaf_data()?)?.offsets());
    }
    match stbl.find("co64") {
        Some(co64) => Ok(Co64::parse(co64.leaf_data()?)?.offsets().to_vec()),
        None => Err(PrepError::NoSuchAtom("stco/co64".to_owned())),
    }
}
