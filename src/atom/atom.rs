//! In-memory MP4 atom tree.
//!
//! Used for `moov` and everything below it. Container atoms
//! (see `CONTAINER`) are parsed recursively, all other atoms are
//! kept as raw data loads so that unknown atoms survive
//! a rewrite byte-for-byte.

use std::io::{Cursor, Seek, Write};

use crate::{AtomHeader, FourCC, PrepError};

/// MP4 atom, either a container or a leaf.
#[derive(Debug, Clone, PartialEq)]
pub enum Atom {
    /// Atom containing other atoms.
    Container {
        header: AtomHeader,
        children: Vec<Atom>,
    },
    /// Atom with raw data load.
    Leaf {
        header: AtomHeader,
        data: Vec<u8>,
    },
}

impl Atom {
    /// Parses all atoms in `data`, where `data[0]` is located
    /// at absolute file offset `base`.
    ///
    /// Child atoms must exactly fill their parent.
    pub fn parse(data: &[u8], base: u64) -> Result<Vec<Atom>, PrepError> {
        let end = data.len() as u64;
        let mut cursor = Cursor::new(data);
        let mut atoms = Vec::new();

        while cursor.position() < end {
            let rel = cursor.position();
            if end - rel < 8 {
                return Err(PrepError::UnexpectedAtomSize { len: end - rel, offset: base + rel });
            }
            let header = AtomHeader::read(&mut cursor, base, end)?;
            let start = (rel + header.header_size() as u64) as usize;
            let stop = (rel + header.atom_size) as usize;
            let load = &data[start .. stop];

            let atom = match header.is_container() {
                true => Atom::Container {
                    children: Self::parse(load, header.data_offset())?,
                    header,
                },
                false => Atom::Leaf {
                    data: load.to_vec(),
                    header,
                },
            };
            atoms.push(atom);
            cursor.set_position(stop as u64);
        }

        Ok(atoms)
    }

    /// New leaf atom. Offset is unknown until written.
    pub fn leaf(name: FourCC, data: Vec<u8>) -> Self {
        Atom::Leaf {
            header: AtomHeader { name, ..AtomHeader::default() },
            data,
        }
    }

    pub fn header(&self) -> &AtomHeader {
        match self {
            Atom::Container { header, .. } => header,
            Atom::Leaf { header, .. } => header,
        }
    }

    pub fn name(&self) -> &FourCC {
        &self.header().name
    }

    /// Child atoms. Empty for leaves.
    pub fn children(&self) -> &[Atom] {
        match self {
            Atom::Container { children, .. } => children,
            Atom::Leaf { .. } => &[],
        }
    }

    pub fn children_mut(&mut self) -> Option<&mut Vec<Atom>> {
        match self {
            Atom::Container { children, .. } => Some(children),
            Atom::Leaf { .. } => None,
        }
    }

    /// Raw data load for leaves.
    pub fn data(&self) -> Option<&[u8]> {
        match self {
            Atom::Container { .. } => None,
            Atom::Leaf { data, .. } => Some(data),
        }
    }

    pub fn data_mut(&mut self) -> Option<&mut Vec<u8>> {
        match self {
            Atom::Container { .. } => None,
            Atom::Leaf { data, .. } => Some(data),
        }
    }

    /// Raw data for leaf, error if missing or a container.
    pub fn leaf_data(&self) -> Result<&[u8], PrepError> {
        self.data()
            .ok_or_else(|| PrepError::NoSuchAtom(self.name().to_string()))
    }

    /// First direct child with FourCC `name`.
    pub fn find(&self, name: &str) -> Option<&Atom> {
        self.children().iter()
            .find(|a| a.name().to_str() == name)
    }

    /// All direct children with FourCC `name`.
    pub fn find_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Atom> + 'a {
        self.children().iter()
            .filter(move |a| a.name().to_str() == name)
    }

    /// Descends `path`, e.g. `["mdia", "minf", "stbl"]`.
    pub fn find_path(&self, path: &[&str]) -> Option<&Atom> {
        path.iter().try_fold(self, |atom, name| atom.find(name))
    }

    /// Same as `find_path()`, or `NoSuchAtom` error.
    pub fn path(&self, path: &[&str]) -> Result<&Atom, PrepError> {
        self.find_path(path)
            .ok_or_else(|| PrepError::NoSuchAtom(path.join("/")))
    }

    pub fn find_path_mut(&mut self, path: &[&str]) -> Option<&mut Atom> {
        let mut atom = self;
        for name in path {
            atom = atom.children_mut()?
                .iter_mut()
                .find(|a| a.name().to_str() == *name)?;
        }
        Some(atom)
    }

    /// Size in bytes of the serialised data load, excluding header.
    pub fn encoded_data_size(&self) -> u64 {
        match self {
            Atom::Container { children, .. } => children.iter().map(|c| c.encoded_size()).sum(),
            Atom::Leaf { data, .. } => data.len() as u64,
        }
    }

    /// Size in bytes once serialised, including header.
    pub fn encoded_size(&self) -> u64 {
        let data_size = self.encoded_data_size();
        data_size + AtomHeader::required_header_size(data_size, self.header().size_64bit)
    }

    /// Serialises atom and any children. Returns bytes written.
    pub fn write<W: Write + Seek>(&self, writer: &mut W) -> Result<u64, PrepError> {
        let header = self.header();
        let data_size = self.encoded_data_size();
        let hdr_size = AtomHeader::write(writer, &header.name, data_size, header.size_64bit)?;
        match self {
            Atom::Container { children, .. } => {
                for child in children.iter() {
                    child.write(writer)?;
                }
            },
            Atom::Leaf { data, .. } => writer.write_all(data)?,
        }
        Ok(hdr_size + data_size)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, PrepError> {
        let mut cursor = Cursor::new(Vec::with_capacity(self.encoded_size() as usize));
        self.write(&mut cursor)?;
        Ok(cursor.into_inner())
    }
}
