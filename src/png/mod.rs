//! PNG text chunks.
//!
//! `tEXt`, `zTXt` and `iTXt` chunks carry keyword/value pairs. Every chunk
//! ends in a CRC-32 over its type and data, checked on read and recomputed
//! on write.

use std::io::{Read, Write};

use byteorder::{BigEndian, ByteOrder};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use log::{debug, trace};

use crate::common::bytes::{decode_string, encode_string, StringType};
use crate::common::config::{ReadStyle, WriteOptions};
use crate::common::error::{MetaError, Result};
use crate::common::file::TagFile;
use crate::common::media::MediaFile;
use crate::common::stream::FileAbstraction;
use crate::common::tag::{CombinedTag, Tag, TagType};

pub const SIGNATURE: &[u8; 8] = b"\x89PNG\r\n\x1a\n";

const CRC_TABLE: [u32; 256] = crc_table();

const fn crc_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut n = 0;
    while n < 256 {
        let mut c = n as u32;
        let mut k = 0;
        while k < 8 {
            c = if c & 1 != 0 { 0xEDB8_8320 ^ (c >> 1) } else { c >> 1 };
            k += 1;
        }
        table[n] = c;
        n += 1;
    }
    table
}

/// CRC-32 over `parts` in order.
pub fn crc32(parts: &[&[u8]]) -> u32 {
    let mut c = 0xFFFF_FFFFu32;
    for part in parts {
        for &b in *part {
            c = CRC_TABLE[((c ^ b as u32) & 0xFF) as usize] ^ (c >> 8);
        }
    }
    c ^ 0xFFFF_FFFF
}

/// A chunk as found in the file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PngChunk {
    pub kind: [u8; 4],
    pub position: u64,
    pub length: u32,
}

impl PngChunk {
    pub fn kind_str(&self) -> String {
        String::from_utf8_lossy(&self.kind).into_owned()
    }

    pub fn data_start(&self) -> u64 {
        self.position + 8
    }

    /// Length field, type, data and CRC.
    pub fn total_size(&self) -> u64 {
        12 + self.length as u64
    }

    pub fn end(&self) -> u64 {
        self.position + self.total_size()
    }

    /// Critical chunks have an uppercase first letter.
    pub fn is_critical(&self) -> bool {
        self.kind[0].is_ascii_uppercase()
    }
}

pub fn render_chunk(kind: &[u8; 4], data: &[u8]) -> Result<Vec<u8>> {
    let length = u32::try_from(data.len())
        .ok()
        .filter(|&l| l <= i32::MAX as u32)
        .ok_or_else(|| MetaError::ValueError("PNG chunk larger than 2 GiB".into()))?;
    let mut out = Vec::with_capacity(12 + data.len());
    out.extend_from_slice(&length.to_be_bytes());
    out.extend_from_slice(kind);
    out.extend_from_slice(data);
    out.extend_from_slice(&crc32(&[kind, data]).to_be_bytes());
    Ok(out)
}

/// `IHDR`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageHeader {
    pub width: u32,
    pub height: u32,
    pub bit_depth: u8,
    pub color_type: u8,
    pub interlaced: bool,
}

impl ImageHeader {
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() != 13 {
            return Err(MetaError::corrupt("PNG", format!("IHDR of {} bytes", data.len())));
        }
        let header = ImageHeader {
            width: BigEndian::read_u32(&data[0..4]),
            height: BigEndian::read_u32(&data[4..8]),
            bit_depth: data[8],
            color_type: data[9],
            interlaced: data[12] == 1,
        };
        if header.width == 0 || header.height == 0 {
            return Err(MetaError::corrupt("PNG", "zero image dimension"));
        }
        Ok(header)
    }
}

/// One text chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TextChunk {
    /// `tEXt`: Latin-1, uncompressed.
    Plain { keyword: String, text: String },
    /// `zTXt`: Latin-1, zlib compressed.
    Compressed { keyword: String, text: String },
    /// `iTXt`: UTF-8, optionally compressed.
    International {
        keyword: String,
        compressed: bool,
        language: String,
        translated_keyword: String,
        text: String,
    },
}

impl TextChunk {
    pub fn keyword(&self) -> &str {
        match self {
            TextChunk::Plain { keyword, .. }
            | TextChunk::Compressed { keyword, .. }
            | TextChunk::International { keyword, .. } => keyword,
        }
    }

    pub fn text(&self) -> &str {
        match self {
            TextChunk::Plain { text, .. } | TextChunk::Compressed { text, .. } | TextChunk::International { text, .. } => {
                text
            }
        }
    }

    pub fn kind(&self) -> &'static [u8; 4] {
        match self {
            TextChunk::Plain { .. } => b"tEXt",
            TextChunk::Compressed { .. } => b"zTXt",
            TextChunk::International { .. } => b"iTXt",
        }
    }

    /// Plain Latin-1 text when possible, `iTXt` otherwise.
    pub fn new(keyword: &str, text: &str) -> Self {
        if crate::common::bytes::is_latin1(text) {
            TextChunk::Plain {
                keyword: keyword.to_string(),
                text: text.to_string(),
            }
        } else {
            TextChunk::International {
                keyword: keyword.to_string(),
                compressed: false,
                language: String::new(),
                translated_keyword: String::new(),
                text: text.to_string(),
            }
        }
    }

    /// Decode the data of a text chunk of type `kind`.
    pub fn parse(kind: &[u8; 4], data: &[u8]) -> Result<Self> {
        let nul = memchr::memchr(0, data).ok_or_else(|| MetaError::corrupt("PNG", "text chunk without keyword"))?;
        let keyword = decode_string(&data[..nul], StringType::Latin1);
        if keyword.is_empty() || keyword.len() > 79 {
            return Err(MetaError::corrupt("PNG", format!("keyword of {} characters", keyword.len())));
        }
        let rest = &data[nul + 1..];
        match kind {
            b"tEXt" => Ok(TextChunk::Plain {
                keyword,
                text: decode_string(rest, StringType::Latin1),
            }),
            b"zTXt" => {
                let (&method, compressed) = rest
                    .split_first()
                    .ok_or_else(|| MetaError::corrupt("PNG", "zTXt without compression method"))?;
                if method != 0 {
                    return Err(MetaError::unsupported("PNG", format!("compression method {}", method)));
                }
                Ok(TextChunk::Compressed {
                    keyword,
                    text: decode_string(&inflate(compressed)?, StringType::Latin1),
                })
            }
            b"iTXt" => {
                if rest.len() < 2 {
                    return Err(MetaError::corrupt("PNG", "iTXt truncated"));
                }
                let compressed = rest[0] == 1;
                if compressed && rest[1] != 0 {
                    return Err(MetaError::unsupported("PNG", format!("compression method {}", rest[1])));
                }
                let rest = &rest[2..];
                let lang_end = memchr::memchr(0, rest).ok_or_else(|| MetaError::corrupt("PNG", "iTXt truncated"))?;
                let language = String::from_utf8_lossy(&rest[..lang_end]).into_owned();
                let rest = &rest[lang_end + 1..];
                let tk_end = memchr::memchr(0, rest).ok_or_else(|| MetaError::corrupt("PNG", "iTXt truncated"))?;
                let translated_keyword = String::from_utf8_lossy(&rest[..tk_end]).into_owned();
                let body = &rest[tk_end + 1..];
                let text = if compressed { inflate(body)? } else { body.to_vec() };
                Ok(TextChunk::International {
                    keyword,
                    compressed,
                    language,
                    translated_keyword,
                    text: String::from_utf8(text).map_err(|_| MetaError::corrupt("PNG", "iTXt text is not UTF-8"))?,
                })
            }
            other => Err(MetaError::ValueError(format!(
                "{} is not a text chunk",
                String::from_utf8_lossy(other)
            ))),
        }
    }

    /// Chunk data, without length, type and CRC.
    pub fn render(&self) -> Result<Vec<u8>> {
        let mut out = encode_string(self.keyword(), StringType::Latin1);
        out.push(0);
        match self {
            TextChunk::Plain { text, .. } => out.extend_from_slice(&encode_string(text, StringType::Latin1)),
            TextChunk::Compressed { text, .. } => {
                out.push(0);
                out.extend_from_slice(&deflate(&encode_string(text, StringType::Latin1))?);
            }
            TextChunk::International {
                compressed,
                language,
                translated_keyword,
                text,
                ..
            } => {
                out.extend_from_slice(&[*compressed as u8, 0]);
                out.extend_from_slice(language.as_bytes());
                out.push(0);
                out.extend_from_slice(translated_keyword.as_bytes());
                out.push(0);
                if *compressed {
                    out.extend_from_slice(&deflate(text.as_bytes())?);
                } else {
                    out.extend_from_slice(text.as_bytes());
                }
            }
        }
        Ok(out)
    }
}

fn inflate(data: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    ZlibDecoder::new(data)
        .read_to_end(&mut out)
        .map_err(|e| MetaError::corrupt("PNG", format!("bad zlib stream: {}", e)))?;
    Ok(out)
}

fn deflate(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

/// Read the chunk at `chunk`, verify its CRC and decode it as text.
pub fn read_text_chunk(file: &mut TagFile, chunk: &PngChunk) -> Result<TextChunk> {
    let raw = file.read_exact_at(chunk.position + 4, chunk.length as usize + 8, "PNG")?;
    let (typed, crc) = raw.split_at(raw.len() - 4);
    if crc32(&[typed]) != BigEndian::read_u32(crc) {
        return Err(MetaError::corrupt("PNG", format!("CRC mismatch in {} chunk at {}", chunk.kind_str(), chunk.position)));
    }
    TextChunk::parse(&chunk.kind, &typed[4..])
}

/// The text chunks of a PNG as a tag.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PngTag {
    pub chunks: Vec<TextChunk>,
}

impl PngTag {
    pub fn get(&self, keyword: &str) -> Option<&str> {
        self.chunks.iter().find(|c| c.keyword() == keyword).map(TextChunk::text)
    }

    /// Replace `keyword`; empty removes it.
    pub fn set(&mut self, keyword: &str, text: &str) {
        self.chunks.retain(|c| c.keyword() != keyword);
        if !text.is_empty() {
            self.chunks.push(TextChunk::new(keyword, text));
        }
    }
}

impl Tag for PngTag {
    fn tag_type(&self) -> TagType {
        TagType::Png
    }

    fn title(&self) -> Option<String> {
        self.get("Title").map(str::to_string)
    }

    fn artist(&self) -> Option<String> {
        self.get("Author").map(str::to_string)
    }

    fn album(&self) -> Option<String> {
        None
    }

    fn comment(&self) -> Option<String> {
        self.get("Comment").or_else(|| self.get("Description")).map(str::to_string)
    }

    fn genre(&self) -> Option<String> {
        None
    }

    fn year(&self) -> Option<u32> {
        let text = self.get("Creation Time")?;
        text.split(|c: char| !c.is_ascii_digit())
            .find(|part| part.len() == 4)
            .and_then(|y| y.parse().ok())
    }

    fn track(&self) -> Option<u32> {
        None
    }

    fn set_title(&mut self, value: &str) {
        self.set("Title", value);
    }

    fn set_artist(&mut self, value: &str) {
        self.set("Author", value);
    }

    fn set_album(&mut self, _value: &str) {}

    fn set_comment(&mut self, value: &str) {
        self.set("Comment", value);
    }

    fn set_genre(&mut self, _value: &str) {}

    fn set_year(&mut self, value: u32) {
        let text = if value == 0 { String::new() } else { value.to_string() };
        self.set("Creation Time", &text);
    }

    fn set_track(&mut self, _value: u32) {}

    fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    fn clear(&mut self) {
        self.chunks.clear();
    }
}

pub struct PngFile {
    file: TagFile,
    chunks: Vec<PngChunk>,
    header: Option<ImageHeader>,
    pub tag: PngTag,
}

impl PngFile {
    pub fn open(abstraction: impl FileAbstraction + 'static, style: ReadStyle) -> Result<Self> {
        let mut file = TagFile::new(abstraction);
        if file.read_at(0, 8)?.data() != SIGNATURE {
            return Err(MetaError::NoHeader("PNG"));
        }
        let chunks = scan(&mut file)?;
        match chunks.first() {
            Some(c) if &c.kind == b"IHDR" => {}
            _ => return Err(MetaError::corrupt("PNG", "first chunk is not IHDR")),
        }

        let mut tag = PngTag::default();
        for chunk in chunks.iter().filter(|c| matches!(&c.kind, b"tEXt" | b"zTXt" | b"iTXt")) {
            match read_text_chunk(&mut file, chunk) {
                Ok(text) => tag.chunks.push(text),
                Err(err) if err.is_unsupported() => debug!("PNG: skipping {}: {}", chunk.kind_str(), err),
                Err(err) => {
                    file.mark_corrupt(err.to_string());
                }
            }
        }

        let header = if style.properties {
            let ihdr = &chunks[0];
            let raw = file.read_exact_at(ihdr.data_start(), ihdr.length as usize, "PNG")?;
            Some(ImageHeader::parse(&raw)?)
        } else {
            None
        };
        if let (Some(first), Some(last)) = (
            chunks.iter().find(|c| &c.kind == b"IDAT"),
            chunks.iter().rev().find(|c| &c.kind == b"IDAT"),
        ) {
            file.set_invariant_region(first.position, last.end());
        }
        Ok(PngFile {
            file,
            chunks,
            header,
            tag,
        })
    }

    pub fn header(&self) -> Option<&ImageHeader> {
        self.header.as_ref()
    }

    pub fn chunks(&self) -> &[PngChunk] {
        &self.chunks
    }
}

fn scan(file: &mut TagFile) -> Result<Vec<PngChunk>> {
    let file_len = file.length()?;
    let mut chunks = Vec::new();
    let mut pos = 8u64;
    while pos + 12 <= file_len {
        let head = file.read_exact_at(pos, 8, "PNG")?;
        let length = head.uint_at(0, true);
        let kind = [head[4], head[5], head[6], head[7]];
        if !kind.iter().all(u8::is_ascii_alphabetic) {
            return Err(MetaError::corrupt("PNG", format!("invalid chunk type at {}", pos)));
        }
        let chunk = PngChunk {
            kind,
            position: pos,
            length,
        };
        if chunk.end() > file_len {
            return Err(MetaError::corrupt("PNG", format!("{} chunk at {} runs past the end", chunk.kind_str(), pos)));
        }
        trace!("PNG: {} chunk at {}, {} bytes", chunk.kind_str(), pos, length);
        pos = chunk.end();
        let last = &chunk.kind == b"IEND";
        chunks.push(chunk);
        if last {
            break;
        }
    }
    Ok(chunks)
}

impl MediaFile for PngFile {
    fn tag_file(&self) -> &TagFile {
        &self.file
    }

    fn tags(&mut self) -> CombinedTag<'_> {
        let tag: &mut dyn Tag = &mut self.tag;
        CombinedTag::new(vec![tag])
    }

    /// Text chunks are rewritten as one run right after `IHDR`.
    fn save_with(&mut self, _options: &WriteOptions) -> Result<()> {
        self.file.ensure_writable()?;
        let mut bytes = Vec::new();
        for chunk in &self.tag.chunks {
            bytes.extend_from_slice(&render_chunk(chunk.kind(), &chunk.render()?)?);
        }

        // Chunks this reader cannot decode stay where they are.
        let mut text_chunks = Vec::new();
        for chunk in self.chunks.iter().filter(|c| matches!(&c.kind, b"tEXt" | b"zTXt" | b"iTXt")) {
            match read_text_chunk(&mut self.file, chunk) {
                Err(err) if err.is_unsupported() => debug!("PNG: keeping {} at {}", chunk.kind_str(), chunk.position),
                _ => text_chunks.push(chunk.clone()),
            }
        }
        // IHDR is always first, so every text chunk sits after it.
        for chunk in text_chunks.iter().rev() {
            self.file.remove_block(chunk.position, chunk.total_size())?;
            self.file.shift_invariant_region(chunk.position, -(chunk.total_size() as i64));
        }
        let at = self.chunks[0].end();
        self.file.insert(&bytes, at, 0)?;
        self.file.shift_invariant_region(at, bytes.len() as i64);
        self.chunks = scan(&mut self.file)?;
        Ok(())
    }
}
