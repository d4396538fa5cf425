use time::OffsetDateTime;

use crate::mp4_time_zero;

/// Single-byte chars from `[u8; 4]`.
/// Maps 0-255 to `char`, exceeding ascii.
pub(crate) fn chars_from_bytes(bytes: [u8; 4]) -> [char; 4] {
    [
        bytes[0] as char,
        bytes[1] as char,
        bytes[2] as char,
        bytes[3] as char,
    ]
}

/// Counted string (first byte specifies length).
/// Returns `None` if the count exceeds the data.
pub(crate) fn counted_string(bytes: &[u8], ignore_null: bool) -> Option<String> {
    let count = *bytes.first()? as usize;
    let data = bytes.get(1 .. count + 1)?;
    Some(match ignore_null {
        true => data.iter()
            .filter_map(|b| if b != &0 {Some(*b as char)} else {None})
            .collect(),
        false => data.iter()
            .map(|b| *b as char)
            .collect(),
    })
}

/// Null terminated string, or all bytes if there is no terminator.
pub(crate) fn null_terminated_string(bytes: &[u8]) -> String {
    bytes.iter()
        .take_while(|b| **b != 0)
        .map(|b| *b as char)
        .collect()
}

/// Number of bytes needed to pad `len` to a 32-bit boundary.
pub(crate) fn pad32(len: usize) -> usize {
    (4 - len % 4) % 4
}

/// Seconds since MP4 time zero. `None` if before 1904.
pub(crate) fn to_mp4_seconds(datetime: OffsetDateTime) -> Option<u64> {
    u64::try_from((datetime - mp4_time_zero()).whole_seconds()).ok()
}

/// Datetime from seconds since MP4 time zero.
pub(crate) fn from_mp4_seconds(seconds: u64) -> OffsetDateTime {
    mp4_time_zero() + time::Duration::seconds(seconds as i64)
}

/// Unix time as fractional seconds.
pub(crate) fn to_unix_seconds(datetime: OffsetDateTime) -> f64 {
    datetime.unix_timestamp_nanos() as f64 / 1e9
}

/// Datetime from fractional Unix seconds, rounded to microseconds.
pub(crate) fn from_unix_seconds(seconds: f64) -> Option<OffsetDateTime> {
    if !seconds.is_finite() {
        return None
    }
    let micros = (seconds * 1e6).round() as i128;
    OffsetDateTime::from_unix_timestamp_nanos(micros * 1000).ok()
}

/// Truncates sub-millisecond precision.
pub(crate) fn quantize_millis(datetime: OffsetDateTime) -> OffsetDateTime {
    let ms = datetime.millisecond();
    datetime.replace_millisecond(ms).unwrap_or(datetime)
}
