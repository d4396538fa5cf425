//! Sample-to-chunk atom (`stsc`).
//!
//! Location: `moov/trak[multiple]/mdia/minf/stbl/stsc`
//!
//! See: <https://developer.apple.com/documentation/quicktime-file-format/sample-to-chunk_atom>

use binrw::binrw;

/// Sample-to-chunk atom (`stsc`).
#[binrw]
#[brw(big)]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Stsc {
    _version: u8,
    _flags: [u8; 3],
    #[br(temp)]
    #[bw(calc = sample_to_chunk_table.len() as u32)]
    no_of_entries: u32,
    #[br(count = no_of_entries)]
    pub(crate) sample_to_chunk_table: Vec<SampleToChunk>
}

impl Stsc {
    /// Table with a single entry: one sample per chunk.
    pub fn one_sample_per_chunk() -> Self {
        Self {
            sample_to_chunk_table: vec![SampleToChunk {
                first_chunk: 1,
                samples_per_chunk: 1,
                sample_description_id: 1,
            }],
            ..Self::default()
        }
    }

    /// Number of samples in each of `chunk_count` chunks.
    pub fn samples_per_chunk(&self, chunk_count: usize) -> Vec<u32> {
        let mut counts = Vec::with_capacity(chunk_count);
        for (i, entry) in self.sample_to_chunk_table.iter().enumerate() {
            // 1-based, so this is also the exclusive 0-based end
            let last = self.sample_to_chunk_table.get(i + 1)
                .map(|next| next.first_chunk as usize - 1)
                .unwrap_or(chunk_count)
                .min(chunk_count);
            let first = (entry.first_chunk as usize).saturating_sub(1);
            for _ in first.max(counts.len()) .. last {
                counts.push(entry.samples_per_chunk);
            }
        }
        counts
    }
}

#[binrw]
#[brw(big)]
#[derive(Debug, Clone, PartialEq)]
pub struct SampleToChunk {
    /// 1-based index of first chunk
    /// that contains the number of
    /// samples specified in `samples_per_chunk`.
    /// The following chunks will all contain the
    /// same number of samples until the next
    /// sample to chunk entry.
    pub(crate) first_chunk: u32,
    /// Number of samples for chunk number
    /// specified by `first_chunk` and on,
    /// until the next sample to chunk entry.
    pub(crate) samples_per_chunk: u32,
    pub(crate) sample_description_id: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expand_chunks() {
        let stsc = Stsc {
            sample_to_chunk_table: vec![
                SampleToChunk { first_chunk: 1, samples_per_chunk: 3, sample_description_id: 1 },
                SampleToChunk { first_chunk: 3, samples_per_chunk: 1, sample_description_id: 1 },
            ],
            ..Stsc::default()
        };
        assert_eq!(stsc.samples_per_chunk(5), vec![3, 3, 1, 1, 1]);
        assert_eq!(Stsc::one_sample_per_chunk().samples_per_chunk(2), vec![1, 1]);
    }
}
