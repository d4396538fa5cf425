//! Synthetic GoPro recordings and telemetry for tests.
//!
//! `Mp4Builder` writes a small but complete MP4: a 3 second video track
//! (90 frames at 30 fps) interleaved with a "GoPro MET" track holding
//! one GPMF payload per second. Each payload carries ten `GPS5` rows,
//! with `GPSU` placing payload `k` at `T0 + k` seconds.

use std::path::{Path, PathBuf};

use time::{macros::datetime, Duration, OffsetDateTime};

use crate::{
    gpmf::{format_gpsu, GpsStreamKind, Key, Klv, ValueType},
    telemetry::{FixQuality, GpsFix, PayloadLayout, StreamId, Telemetry, TelemetrySample},
    Atom,
    AtomHeader,
    FourCC,
    Stco,
    Stsc,
    Stsz,
    Stts,
};

/// Start of the synthetic recordings.
pub(crate) const T0: OffsetDateTime = datetime!(2023-06-01 12:00:00 UTC);

/// 2016-01-01, seconds since 1904. What a camera with
/// an unset clock tends to write.
const STALE_DATE: u32 = 3_534_451_200;

const VIDEO_TIME_SCALE: u32 = 3000;
const FRAME_DURATION: u32 = 100;
const FRAMES_PER_SECOND: usize = 30;
const SECONDS: usize = 3;
const GPMF_TIME_SCALE: u32 = 1000;
const MOVIE_TIME_SCALE: u32 = 1000;
const ROWS_PER_PAYLOAD: usize = 10;

/// In-memory telemetry with one valid 3D fix per row.
///
/// `rows` are `(device_time, seconds after T0)`, where only rows with
/// a time are anchors. Ten rows go in each payload.
pub(crate) fn telemetry(rows: &[(f64, Option<f64>)], container_duration: f64) -> Telemetry {
    let stream = StreamId { track: 1, device: 1 };
    let samples = rows.iter()
        .enumerate()
        .map(|(i, (device_time, secs))| TelemetrySample {
            index: i,
            device_time: *device_time,
            gps: Some(GpsFix {
                latitude: 59.3 + i as f64 * 1e-5,
                longitude: 18.0 + i as f64 * 1e-5,
                altitude: 20.0,
                speed_2d: 5.0,
                speed_3d: 5.0,
                time: secs.map(|s| T0 + Duration::seconds_f64(s)),
                quality: FixQuality::ThreeD,
                dop: Some(1.5),
                stream_tag: None,
            }),
            orientation: None,
            stream,
            payload: i / ROWS_PER_PAYLOAD,
        })
        .collect();

    Telemetry {
        samples,
        warnings: Vec::new(),
        layout: PayloadLayout {
            time_scale: GPMF_TIME_SCALE,
            durations: vec![GPMF_TIME_SCALE; rows.len().div_ceil(ROWS_PER_PAYLOAD)],
        },
        gps_kind: GpsStreamKind::Gps5,
        container_duration,
        frame_rate: None,
        streams: 1,
    }
}

/// Writes synthetic GoPro MP4 files.
#[derive(Debug, Clone)]
pub(crate) struct Mp4Builder {
    moov_first: bool,
    stale_durations: bool,
    extra_top_level: Option<[u8; 4]>,
    without_telemetry: bool,
    payloads: usize,
    second_device: Option<f64>,
    garbage: Garbage,
    dangling_offset: bool,
}

/// Malformed GPMF to put in the telemetry payloads.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Garbage {
    Clean,
    /// A record with an invalid key follows the `DEVC`.
    Trailing,
    /// Payloads hold nothing but an invalid record.
    Only,
}

/// Record with a key no GPMF writer produces.
const INVALID_RECORD: [u8; 12] = [1, 2, 3, 4, b'L', 4, 0, 1, 0, 0, 0, 0];

impl Default for Mp4Builder {
    fn default() -> Self {
        Self {
            moov_first: false,
            stale_durations: false,
            extra_top_level: None,
            without_telemetry: false,
            payloads: SECONDS,
            second_device: None,
            garbage: Garbage::Clean,
            dangling_offset: false,
        }
    }
}

impl Mp4Builder {
    /// Places `moov` before `mdat`.
    pub(crate) fn moov_first(mut self, value: bool) -> Self {
        self.moov_first = value;
        self
    }

    /// Writes durations that do not match the sample tables.
    pub(crate) fn stale_durations(mut self, value: bool) -> Self {
        self.stale_durations = value;
        self
    }

    /// Appends a top-level atom after `moov` and `mdat`.
    pub(crate) fn extra_top_level(mut self, name: [u8; 4]) -> Self {
        self.extra_top_level = Some(name);
        self
    }

    /// Video track only.
    pub(crate) fn without_telemetry(mut self, value: bool) -> Self {
        self.without_telemetry = value;
        self
    }

    /// Number of GPMF payloads. Zero keeps an empty telemetry track.
    pub(crate) fn payloads(mut self, count: usize) -> Self {
        self.payloads = count;
        self
    }

    /// Adds a second GPS device whose clock reads `shift` seconds
    /// ahead of the first.
    pub(crate) fn second_device(mut self, shift: Option<f64>) -> Self {
        self.second_device = shift;
        self
    }

    pub(crate) fn garbage(mut self, garbage: Garbage) -> Self {
        self.garbage = garbage;
        self
    }

    /// Points the last video sample past the end of the file.
    pub(crate) fn dangling_offset(mut self, value: bool) -> Self {
        self.dangling_offset = value;
        self
    }

    pub(crate) fn write(&self, dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, self.to_bytes()).unwrap();
        path
    }

    pub(crate) fn to_bytes(&self) -> Vec<u8> {
        let frames: Vec<Vec<u8>> = (0 .. SECONDS * FRAMES_PER_SECOND).map(frame).collect();
        let payloads: Vec<Vec<u8>> = match self.without_telemetry {
            true => Vec::new(),
            false => (0 .. self.payloads).map(|k| self.payload(k)).collect(),
        };

        // Interleaved per second: frames, then that second's payload.
        let mut chunks: Vec<(bool, &[u8])> = Vec::new();
        for s in 0 .. SECONDS.max(payloads.len()) {
            let video = frames.iter().skip(s * FRAMES_PER_SECOND).take(FRAMES_PER_SECOND);
            chunks.extend(video.map(|f| (true, f.as_slice())));
            if let Some(p) = payloads.get(s) {
                chunks.push((false, p.as_slice()));
            }
        }

        let ftyp = leaf(b"ftyp", [b"mp41".as_slice(), &[0; 4], b"mp41isom"].concat()).to_bytes().unwrap();
        let moov_size = self.moov(&vec![0; frames.len()], &vec![0; payloads.len()])
            .encoded_size();
        let mdat_data_size: usize = chunks.iter().map(|(_, c)| c.len()).sum();

        let mut pos = ftyp.len() as u64 + 8;
        if self.moov_first {
            pos += moov_size;
        }
        let mut video_offsets = Vec::new();
        let mut gpmf_offsets = Vec::new();
        for (is_video, chunk) in chunks.iter() {
            match is_video {
                true => video_offsets.push(pos),
                false => gpmf_offsets.push(pos),
            }
            pos += chunk.len() as u64;
        }
        if self.dangling_offset {
            if let Some(last) = video_offsets.last_mut() {
                *last += 1_000_000;
            }
        }
        let moov = self.moov(&video_offsets, &gpmf_offsets).to_bytes().unwrap();
        assert_eq!(moov.len() as u64, moov_size);

        let mut mdat = ((mdat_data_size + 8) as u32).to_be_bytes().to_vec();
        mdat.extend_from_slice(b"mdat");
        for (_, chunk) in chunks.iter() {
            mdat.extend_from_slice(chunk);
        }

        let mut out = ftyp;
        match self.moov_first {
            true => {
                out.extend_from_slice(&moov);
                out.extend_from_slice(&mdat);
            },
            false => {
                out.extend_from_slice(&mdat);
                out.extend_from_slice(&moov);
            }
        }
        if let Some(name) = self.extra_top_level {
            out.extend_from_slice(&leaf(&name, vec![0; 8]).to_bytes().unwrap());
        }
        out
    }

    fn duration(&self, value: u32) -> u32 {
        match self.stale_durations {
            true => 1,
            false => value,
        }
    }

    fn moov(&self, video_offsets: &[u64], gpmf_offsets: &[u64]) -> Atom {
        let movie_duration = self.duration(SECONDS as u32 * MOVIE_TIME_SCALE);
        let mut children = vec![
            leaf(b"mvhd", mvhd(movie_duration, 3)),
            trak(
                tkhd(1, movie_duration),
                mdhd(VIDEO_TIME_SCALE, self.duration(video_offsets.len() as u32 * FRAME_DURATION)),
                hdlr(b"vide", "GoPro AVC  "),
                leaf(b"vmhd", vec![0, 0, 0, 1, 0, 0, 0, 0, 0, 0, 0, 0]),
                stsd(b"avc1"),
                &vec![FRAME_DURATION; video_offsets.len()],
                (0 .. video_offsets.len()).map(|i| frame(i).len() as u32).collect(),
                video_offsets,
            ),
        ];
        if !self.without_telemetry {
            let sizes = (0 .. gpmf_offsets.len()).map(|k| self.payload(k).len() as u32).collect();
            children.push(trak(
                tkhd(2, movie_duration),
                mdhd(GPMF_TIME_SCALE, self.duration(gpmf_offsets.len() as u32 * GPMF_TIME_SCALE)),
                hdlr(b"meta", "GoPro MET"),
                leaf(b"nmhd", vec![0; 4]),
                stsd(b"gpmd"),
                &vec![GPMF_TIME_SCALE; gpmf_offsets.len()],
                sizes,
                gpmf_offsets,
            ));
        }
        container(b"moov", children)
    }

    /// GPMF payload for second `k`.
    fn payload(&self, k: usize) -> Vec<u8> {
        let mut devices = vec![device(1, k, 0.0)];
        if let Some(shift) = self.second_device {
            devices.push(device(2, k, shift));
        }
        let mut out = Vec::new();
        if self.garbage == Garbage::Only {
            out.extend_from_slice(&INVALID_RECORD);
            return out
        }
        for devc in devices.iter() {
            devc.encode(&mut out).unwrap();
        }
        if self.garbage == Garbage::Trailing {
            out.extend_from_slice(&INVALID_RECORD);
        }
        out
    }
}

/// `DEVC` with a single `GPS5` stream for second `k`.
fn device(id: u32, k: usize, shift: f64) -> Klv {
    let scale: [i32; 5] = [10_000_000, 10_000_000, 1000, 1000, 100];
    let mut rows = Vec::new();
    for i in 0 .. ROWS_PER_PAYLOAD {
        let n = (k * ROWS_PER_PAYLOAD + i) as f64;
        let values = [59.3 + n * 1e-5, 18.0 + n * 1e-5, 20.0, 5.0, 5.0];
        for (v, s) in values.iter().zip(scale.iter()) {
            rows.extend_from_slice(&((v * *s as f64).round() as i32).to_be_bytes());
        }
    }
    let gpsu = format_gpsu(T0 + Duration::seconds_f64(k as f64 + shift)).unwrap();
    let name = format!("Camera{id}");
    let scal: Vec<u8> = scale.iter().flat_map(|s| s.to_be_bytes()).collect();

    Klv::nested(Key::DEVC, vec![
        Klv::data(Key::DVID, ValueType::U32, 4, 1, id.to_be_bytes().to_vec()),
        Klv::data(Key::DVNM, ValueType::Char, 1, name.len() as u16, name.into_bytes()),
        Klv::nested(Key::STRM, vec![
            Klv::data(Key::STMP, ValueType::U64, 8, 1, (k as u64 * 1_000_000).to_be_bytes().to_vec()),
            Klv::data(Key::TSMP, ValueType::U32, 4, 1, (((k + 1) * ROWS_PER_PAYLOAD) as u32).to_be_bytes().to_vec()),
            Klv::data(Key::STNM, ValueType::Char, 1, 3, b"GPS".to_vec()),
            Klv::data(Key::GPSF, ValueType::U32, 4, 1, 3_u32.to_be_bytes().to_vec()),
            Klv::data(Key::GPSU, ValueType::Utc, 16, 1, gpsu.into_bytes()),
            Klv::data(Key::GPSP, ValueType::U16, 2, 1, 150_u16.to_be_bytes().to_vec()),
            Klv::data(Key::SCAL, ValueType::I32, 4, 5, scal),
            Klv::data(Key::GPS5, ValueType::I32, 20, ROWS_PER_PAYLOAD as u16, rows),
        ]),
    ])
}

/// Deterministic video frame, sizes vary between 64 and 70 bytes.
fn frame(i: usize) -> Vec<u8> {
    (0 .. 64 + i % 7).map(|j| (i * 31 + j) as u8).collect()
}

fn leaf(name: &[u8; 4], data: Vec<u8>) -> Atom {
    Atom::leaf(FourCC::from_slice(name), data)
}

fn container(name: &[u8; 4], children: Vec<Atom>) -> Atom {
    Atom::Container {
        header: AtomHeader { name: FourCC::from_slice(name), ..AtomHeader::default() },
        children,
    }
}

#[allow(clippy::too_many_arguments)]
fn trak(
    tkhd: Atom,
    mdhd: Atom,
    hdlr: Atom,
    media_header: Atom,
    stsd: Atom,
    durations: &[u32],
    sizes: Vec<u32>,
    offsets: &[u64],
) -> Atom {
    let stco = Stco::from_offsets(offsets).unwrap();
    let stbl = container(b"stbl", vec![
        stsd,
        leaf(b"stts", Stts::from_durations(durations).to_bytes().unwrap()),
        leaf(b"stsc", Stsc::one_sample_per_chunk().to_bytes().unwrap()),
        leaf(b"stsz", Stsz::from_sizes(sizes).to_bytes().unwrap()),
        leaf(b"stco", stco.to_bytes().unwrap()),
    ]);
    // single self-contained data reference (`url ` with flag 1)
    let dref = [
        [0, 0, 0, 0, 0, 0, 0, 1].as_slice(),
        &12_u32.to_be_bytes(),
        b"url ",
        &[0, 0, 0, 1],
    ].concat();
    let minf = container(b"minf", vec![
        media_header,
        container(b"dinf", vec![leaf(b"dref", dref)]),
        stbl,
    ]);
    container(b"trak", vec![
        tkhd,
        container(b"mdia", vec![mdhd, hdlr, minf]),
    ])
}

/// Version 0 `mvhd`, 100 bytes.
fn mvhd(duration: u32, next_track_id: u32) -> Vec<u8> {
    let mut data = vec![0; 4];
    data.extend_from_slice(&STALE_DATE.to_be_bytes());
    data.extend_from_slice(&STALE_DATE.to_be_bytes());
    data.extend_from_slice(&MOVIE_TIME_SCALE.to_be_bytes());
    data.extend_from_slice(&duration.to_be_bytes());
    data.extend_from_slice(&0x0001_0000_u32.to_be_bytes());
    data.extend_from_slice(&0x0100_u16.to_be_bytes());
    data.extend_from_slice(&[0; 10]);
    data.extend_from_slice(&identity_matrix());
    data.extend_from_slice(&[0; 24]);
    data.extend_from_slice(&next_track_id.to_be_bytes());
    data
}

/// Version 0 `tkhd`, 84 bytes.
fn tkhd(track_id: u32, duration: u32) -> Atom {
    let mut data = vec![0, 0, 0, 3];
    data.extend_from_slice(&STALE_DATE.to_be_bytes());
    data.extend_from_slice(&STALE_DATE.to_be_bytes());
    data.extend_from_slice(&track_id.to_be_bytes());
    data.extend_from_slice(&[0; 4]);
    data.extend_from_slice(&duration.to_be_bytes());
    data.extend_from_slice(&[0; 16]);
    data.extend_from_slice(&identity_matrix());
    data.extend_from_slice(&[0; 8]);
    leaf(b"tkhd", data)
}

/// Version 0 `mdhd`, 24 bytes.
fn mdhd(time_scale: u32, duration: u32) -> Atom {
    let mut data = vec![0; 4];
    data.extend_from_slice(&STALE_DATE.to_be_bytes());
    data.extend_from_slice(&STALE_DATE.to_be_bytes());
    data.extend_from_slice(&time_scale.to_be_bytes());
    data.extend_from_slice(&duration.to_be_bytes());
    data.extend_from_slice(&0x55c4_u16.to_be_bytes());
    data.extend_from_slice(&[0; 2]);
    leaf(b"mdhd", data)
}

/// `hdlr` with a counted component name.
fn hdlr(sub_type: &[u8; 4], name: &str) -> Atom {
    let mut data = b"\0\0\0\0mhlr".to_vec();
    data.extend_from_slice(sub_type);
    data.extend_from_slice(&[0; 12]);
    data.push(name.len() as u8);
    data.extend_from_slice(name.as_bytes());
    leaf(b"hdlr", data)
}

/// Single entry sample description.
fn stsd(format: &[u8; 4]) -> Atom {
    let mut data = vec![0, 0, 0, 0, 0, 0, 0, 1];
    data.extend_from_slice(&16_u32.to_be_bytes());
    data.extend_from_slice(format);
    data.extend_from_slice(&[0; 6]);
    data.extend_from_slice(&1_u16.to_be_bytes());
    leaf(b"stsd", data)
}

fn identity_matrix() -> [u8; 36] {
    let mut matrix = [0; 36];
    matrix[0 .. 4].copy_from_slice(&0x0001_0000_u32.to_be_bytes());
    matrix[16 .. 20].copy_from_slice(&0x0001_0000_u32.to_be_bytes());
    matrix[32 .. 36].copy_from_slice(&0x4000_0000_u32.to_be_bytes());
    matrix
}

#[test]
fn synthetic_file_parses() {
    let dir = tempfile::tempdir().unwrap();
    let path = Mp4Builder::default().write(dir.path(), "GX010001.MP4");
    let layout = crate::Mp4Layout::validate(&path).unwrap();
    let tracks = layout.tracks().unwrap();
    assert_eq!(tracks.len(), 2);
    assert_eq!(tracks[0].samples().len(), 90);
    assert!(tracks[1].is_telemetry());
    assert_eq!(tracks[1].samples().len(), 3);
    assert_eq!(tracks[1].read_samples(&path).unwrap()[2].data, Mp4Builder::default().payload(2));
}
