use byteorder::{BigEndian, ByteOrder};
use log::trace;

use crate::common::bytes::ByteVector;
use crate::common::error::{MetaError, Result};
use crate::common::file::TagFile;
use crate::common::header::{resized, DiskHeader};

/// Box names that have children.
const CONTAINER_ATOMS: &[&[u8; 4]] = &[
    b"moov", b"udta", b"trak", b"mdia", b"minf", b"stbl", b"meta", b"moof", b"traf", b"edts", b"dinf",
];

pub fn is_container(kind: &[u8; 4]) -> bool {
    CONTAINER_ATOMS.contains(&kind)
}

/// An MP4 box header: 32-bit size and FourCC, optionally followed by a
/// 64-bit size and a 16-byte extended type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoxHeader {
    pub kind: [u8; 4],
    pub uuid: Option<[u8; 16]>,
    position: Option<u64>,
    /// Total size including the header.
    size: u64,
    long: bool,
    /// Size field 0: the box runs to the end of the file.
    to_eof: bool,
}

impl BoxHeader {
    /// A header that has never been on disk.
    pub fn new(kind: &[u8; 4], payload_size: u64) -> Self {
        let long = payload_size + 8 > u32::MAX as u64;
        let header = if long { 16 } else { 8 };
        BoxHeader {
            kind: *kind,
            uuid: None,
            position: None,
            size: payload_size + header,
            long,
            to_eof: false,
        }
    }

    /// Parse the header at the start of `data`, which sits at `position`
    /// in a container ending at `limit`.
    pub fn parse(data: &[u8], position: u64, limit: u64) -> Result<Self> {
        if data.len() < 8 {
            return Err(MetaError::corrupt("MP4", format!("box header at {} truncated", position)));
        }
        let raw_size = BigEndian::read_u32(&data[0..4]) as u64;
        let mut kind = [0u8; 4];
        kind.copy_from_slice(&data[4..8]);

        let (size, long, to_eof) = match raw_size {
            1 => {
                let ext = data
                    .get(8..16)
                    .ok_or_else(|| MetaError::corrupt("MP4", "64-bit box size truncated"))?;
                (BigEndian::read_u64(ext), true, false)
            }
            0 => (limit.saturating_sub(position), false, true),
            n => (n, false, false),
        };

        let mut header = BoxHeader {
            kind,
            uuid: None,
            position: Some(position),
            size,
            long,
            to_eof,
        };
        if &kind == b"uuid" {
            let start = if long { 16 } else { 8 };
            let raw = data
                .get(start..start + 16)
                .ok_or_else(|| MetaError::corrupt("MP4", "uuid box type truncated"))?;
            let mut uuid = [0u8; 16];
            uuid.copy_from_slice(raw);
            header.uuid = Some(uuid);
        }

        if size < header.header_len() {
            return Err(MetaError::corrupt(
                "MP4",
                format!("{} box at {} smaller than its header", header.name(), position),
            ));
        }
        if position + size > limit {
            return Err(MetaError::corrupt(
                "MP4",
                format!("{} box at {} overruns its container ({} > {})", header.name(), position, position + size, limit),
            ));
        }
        trace!("MP4: {} box at {}, {} bytes", header.name(), position, size);
        Ok(header)
    }

    pub fn read(file: &mut TagFile, position: u64, limit: u64) -> Result<Self> {
        let data = file.read_at(position, 32)?;
        BoxHeader::parse(&data, position, limit)
    }

    pub fn name(&self) -> String {
        kind_name(&self.kind)
    }

    pub fn header_len(&self) -> u64 {
        let base = if self.long { 16 } else { 8 };
        base + if self.uuid.is_some() { 16 } else { 0 }
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn payload_size(&self) -> u64 {
        self.size - self.header_len()
    }

    pub fn offset(&self) -> u64 {
        self.position.unwrap_or(0)
    }

    pub fn payload_start(&self) -> u64 {
        self.offset() + self.header_len()
    }

    pub fn end(&self) -> u64 {
        self.offset() + self.size
    }

    /// Header bytes for a payload of `payload_size`. Switches to the 64-bit
    /// form when the size no longer fits 32 bits.
    pub fn render_with(&self, payload_size: u64) -> ByteVector {
        let extra = if self.uuid.is_some() { 16 } else { 0 };
        let long = self.long || payload_size + 8 + extra > u32::MAX as u64;
        let header_len = if long { 16 } else { 8 } + extra;
        let mut out = ByteVector::with_capacity(header_len as usize);
        if self.to_eof {
            out.add(&0u32.to_be_bytes());
            out.add(&self.kind);
        } else if long {
            out.add(&1u32.to_be_bytes());
            out.add(&self.kind);
            out.add(&(payload_size + header_len).to_be_bytes());
        } else {
            out.add(&((payload_size + header_len) as u32).to_be_bytes());
            out.add(&self.kind);
        }
        if let Some(uuid) = &self.uuid {
            out.add(uuid);
        }
        out
    }
}

impl DiskHeader for BoxHeader {
    fn position(&self) -> Option<u64> {
        self.position
    }

    fn header_size(&self) -> u64 {
        self.header_len()
    }

    fn render_resized(&self, delta: i64) -> Result<ByteVector> {
        let payload = resized(self.payload_size(), delta, "MP4")?;
        Ok(self.render_with(payload))
    }
}

/// `©nam` style names print with the copyright sign.
pub fn kind_name(kind: &[u8; 4]) -> String {
    if kind[0] == 0xA9 {
        format!("\u{00a9}{}", String::from_utf8_lossy(&kind[1..]))
    } else {
        String::from_utf8_lossy(kind).to_string()
    }
}

/// Header iterator over a payload held in memory. `base` is the file
/// offset of `data[0]`.
pub struct AtomIter<'a> {
    data: &'a [u8],
    base: u64,
    pos: usize,
}

impl<'a> AtomIter<'a> {
    pub fn new(data: &'a [u8], base: u64) -> Self {
        AtomIter { data, base, pos: 0 }
    }
}

impl<'a> Iterator for AtomIter<'a> {
    type Item = Result<BoxHeader>;

    fn next(&mut self) -> Option<Self::Item> {
        // Trailing bytes shorter than a header are tolerated as slack.
        if self.pos + 8 > self.data.len() {
            return None;
        }
        let limit = self.base + self.data.len() as u64;
        let header = BoxHeader::parse(&self.data[self.pos..], self.base + self.pos as u64, limit);
        match &header {
            Ok(h) => self.pos += h.size() as usize,
            Err(_) => self.pos = self.data.len(),
        }
        Some(header)
    }
}

/// A box with its children (containers) or its payload (leaves).
#[derive(Debug, Clone)]
pub struct Mp4Box {
    pub header: BoxHeader,
    pub children: Vec<Mp4Box>,
    pub payload: Vec<u8>,
}

impl Mp4Box {
    /// Build the subtree for `header` from its payload bytes.
    pub fn parse(header: BoxHeader, payload: &[u8]) -> Result<Self> {
        if !is_container(&header.kind) {
            return Ok(Mp4Box {
                header,
                children: Vec::new(),
                payload: payload.to_vec(),
            });
        }
        let skip = if &header.kind == b"meta" { meta_skip(payload) } else { 0 };
        let base = header.payload_start() + skip as u64;
        let body = payload.get(skip..).unwrap_or_default();
        let mut children = Vec::new();
        for child in AtomIter::new(body, base) {
            let child = child?;
            let start = (child.offset() - base) as usize;
            let end = start + child.size() as usize;
            let child_payload = &body[start + child.header_len() as usize..end];
            children.push(Mp4Box::parse(child, child_payload)?);
        }
        Ok(Mp4Box {
            header,
            children,
            payload: payload[..skip].to_vec(),
        })
    }

    pub fn child(&self, kind: &[u8; 4]) -> Option<&Mp4Box> {
        self.children.iter().find(|c| &c.header.kind == kind)
    }

    /// Follow `path` downward, returning every box found on the way,
    /// outermost first. Stops at the first missing name.
    pub fn path<'a>(&'a self, path: &[&[u8; 4]]) -> Vec<&'a Mp4Box> {
        let mut found = Vec::new();
        let mut current = self;
        for kind in path {
            match current.child(kind) {
                Some(next) => {
                    found.push(next);
                    current = next;
                }
                None => break,
            }
        }
        found
    }

    /// All boxes of `kind` anywhere below this one.
    pub fn descendants<'a>(&'a self, kind: &[u8; 4], out: &mut Vec<&'a Mp4Box>) {
        for child in &self.children {
            if &child.header.kind == kind {
                out.push(child);
            }
            child.descendants(kind, out);
        }
    }
}

/// `meta` is a full box in ISO files but a plain container in some
/// QuickTime files. Returns the number of bytes before the first child.
fn meta_skip(payload: &[u8]) -> usize {
    if payload.len() >= 8 && &payload[4..8] == b"hdlr" {
        0
    } else {
        4.min(payload.len())
    }
}

/// Render a complete box from its kind and payload.
pub fn render_box(kind: &[u8; 4], payload: &[u8]) -> Vec<u8> {
    let mut out = BoxHeader::new(kind, payload.len() as u64).render_with(payload.len() as u64).into_inner();
    out.extend_from_slice(payload);
    out
}
