use byteorder::{BigEndian, ByteOrder, LittleEndian};
use log::trace;

use crate::common::bytes::ByteVector;
use crate::common::error::{MetaError, Result};
use crate::common::file::TagFile;
use crate::common::header::{resized, DiskHeader};

pub const HEADER_SIZE: u64 = 8;

/// FourCC plus a 32-bit payload size, little endian in RIFF and big
/// endian in RIFX and AIFF. Odd payloads are followed by a pad byte that
/// the size does not count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkHeader {
    pub id: [u8; 4],
    pub size: u32,
    pub big_endian: bool,
    position: Option<u64>,
}

impl ChunkHeader {
    pub fn new(id: &[u8; 4], size: u32, big_endian: bool) -> Self {
        ChunkHeader {
            id: *id,
            size,
            big_endian,
            position: None,
        }
    }

    pub fn parse(data: &[u8], position: u64, big_endian: bool) -> Result<Self> {
        if data.len() < HEADER_SIZE as usize {
            return Err(MetaError::corrupt("RIFF", format!("chunk header at {} truncated", position)));
        }
        let mut id = [0u8; 4];
        id.copy_from_slice(&data[0..4]);
        let size = if big_endian {
            BigEndian::read_u32(&data[4..8])
        } else {
            LittleEndian::read_u32(&data[4..8])
        };
        Ok(ChunkHeader {
            id,
            size,
            big_endian,
            position: Some(position),
        })
    }

    pub fn read(file: &mut TagFile, position: u64, big_endian: bool) -> Result<Self> {
        let data = file.read_exact_at(position, HEADER_SIZE as usize, "RIFF")?;
        ChunkHeader::parse(&data, position, big_endian)
    }

    pub fn id_str(&self) -> String {
        String::from_utf8_lossy(&self.id).into_owned()
    }

    pub fn offset(&self) -> u64 {
        self.position.unwrap_or(0)
    }

    pub fn payload_start(&self) -> u64 {
        self.offset() + HEADER_SIZE
    }

    /// Header, payload and pad byte.
    pub fn padded_size(&self) -> u64 {
        HEADER_SIZE + self.size as u64 + (self.size & 1) as u64
    }

    pub fn end(&self) -> u64 {
        self.offset() + self.padded_size()
    }

    pub fn render_with(&self, size: u32) -> ByteVector {
        let mut out = ByteVector::with_capacity(HEADER_SIZE as usize);
        out.add(&self.id);
        out.add(&ByteVector::from_uint(size, self.big_endian));
        out
    }
}

impl DiskHeader for ChunkHeader {
    fn position(&self) -> Option<u64> {
        self.position
    }

    fn header_size(&self) -> u64 {
        HEADER_SIZE
    }

    fn render_resized(&self, delta: i64) -> Result<ByteVector> {
        let size = resized(self.size as u64, delta, "RIFF")?;
        let size = u32::try_from(size)
            .map_err(|_| MetaError::unsupported("RIFF", format!("{} chunk larger than 4 GiB", self.id_str())))?;
        Ok(self.render_with(size))
    }
}

/// A complete chunk with its pad byte.
pub fn render_chunk(id: &[u8; 4], payload: &[u8], big_endian: bool) -> Result<Vec<u8>> {
    let size = u32::try_from(payload.len())
        .map_err(|_| MetaError::ValueError("chunk payload larger than 4 GiB".into()))?;
    let mut out = ChunkHeader::new(id, size, big_endian).render_with(size).into_inner();
    out.extend_from_slice(payload);
    if size & 1 == 1 {
        out.push(0);
    }
    Ok(out)
}

/// Chunk headers from `start` to `end`. A chunk that runs past `end`
/// marks the file possibly corrupt and ends the walk; the chunks before it
/// are kept.
pub fn read_chunks(file: &mut TagFile, start: u64, end: u64, big_endian: bool) -> Result<Vec<ChunkHeader>> {
    let mut chunks = Vec::new();
    let mut pos = start;
    while pos + HEADER_SIZE <= end {
        let chunk = ChunkHeader::read(file, pos, big_endian)?;
        trace!("RIFF: {} chunk at {}, {} bytes", chunk.id_str(), pos, chunk.size);
        // the last pad byte is often missing
        if pos + HEADER_SIZE + chunk.size as u64 > end {
            file.mark_corrupt(format!("{} chunk at {} runs past its container", chunk.id_str(), pos));
            break;
        }
        pos = chunk.end();
        chunks.push(chunk);
    }
    Ok(chunks)
}

/// Sub-chunks of an in-memory payload, for `LIST` bodies.
pub fn parse_chunks(data: &[u8], big_endian: bool) -> Result<Vec<(ChunkHeader, &[u8])>> {
    let mut chunks = Vec::new();
    let mut pos = 0usize;
    while pos + HEADER_SIZE as usize <= data.len() {
        let chunk = ChunkHeader::parse(&data[pos..], pos as u64, big_endian)?;
        let body_start = pos + HEADER_SIZE as usize;
        let body = data
            .get(body_start..body_start + chunk.size as usize)
            .ok_or_else(|| MetaError::corrupt("RIFF", format!("{} sub-chunk overruns its list", chunk.id_str())))?;
        pos = chunk.end() as usize;
        chunks.push((chunk, body));
    }
    Ok(chunks)
}
