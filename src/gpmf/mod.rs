//! GoPro Metadata Format (GPMF) KLV codec and stream interpretation.
//!
//! See: <https://github.com/gopro/gpmf-parser>

mod klv;
mod stream;
mod value;

pub use klv::{Key, Klv, ParseStats, Payload, Value};
pub use stream::{devices, DeviceStreams, GpsBlock, GpsRow, GpsStreamKind, OrientationBlock};
pub use value::{format_gpsu, parse_gpsu, ValueType};
