//! MP4 atom headers, the in-memory `moov` tree and whole-file layout.

mod atom;
mod atom_header;
mod layout;

pub use atom::Atom;
pub use atom_header::AtomHeader;
pub use layout::Mp4Layout;
