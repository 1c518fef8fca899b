use std::fmt;
use std::io::{Cursor, Read};

use byteorder::{LittleEndian, ReadBytesExt};
use log::{debug, trace};

use crate::common::bytes::{decode_string, encode_string, StringType};
use crate::common::error::{MetaError, Result};

/// A GUID as stored on disk: the first three fields little endian.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Guid(pub [u8; 16]);

impl Guid {
    pub const fn new(d1: u32, d2: u16, d3: u16, d4: [u8; 8]) -> Guid {
        let a = d1.to_le_bytes();
        let b = d2.to_le_bytes();
        let c = d3.to_le_bytes();
        Guid([
            a[0], a[1], a[2], a[3], b[0], b[1], c[0], c[1], d4[0], d4[1], d4[2], d4[3], d4[4], d4[5], d4[6], d4[7],
        ])
    }

    pub fn from_slice(data: &[u8]) -> Option<Guid> {
        let bytes: [u8; 16] = data.get(..16)?.try_into().ok()?;
        Some(Guid(bytes))
    }
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:08X}-{:04X}-{:04X}-{:02X}{:02X}-",
            u32::from_le_bytes([b[0], b[1], b[2], b[3]]),
            u16::from_le_bytes([b[4], b[5]]),
            u16::from_le_bytes([b[6], b[7]]),
            b[8],
            b[9]
        )?;
        for byte in &b[10..] {
            write!(f, "{:02X}", byte)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Guid({})", self)
    }
}

pub const HEADER: Guid = Guid::new(0x75B22630, 0x668E, 0x11CF, [0xA6, 0xD9, 0x00, 0xAA, 0x00, 0x62, 0xCE, 0x6C]);
pub const DATA: Guid = Guid::new(0x75B22636, 0x668E, 0x11CF, [0xA6, 0xD9, 0x00, 0xAA, 0x00, 0x62, 0xCE, 0x6C]);
pub const FILE_PROPERTIES: Guid =
    Guid::new(0x8CABDCA1, 0xA947, 0x11CF, [0x8E, 0xE4, 0x00, 0xC0, 0x0C, 0x20, 0x53, 0x65]);
pub const STREAM_PROPERTIES: Guid =
    Guid::new(0xB7DC0791, 0xA9B7, 0x11CF, [0x8E, 0xE6, 0x00, 0xC0, 0x0C, 0x20, 0x53, 0x65]);
pub const CONTENT_DESCRIPTION: Guid =
    Guid::new(0x75B22633, 0x668E, 0x11CF, [0xA6, 0xD9, 0x00, 0xAA, 0x00, 0x62, 0xCE, 0x6C]);
pub const EXTENDED_CONTENT_DESCRIPTION: Guid =
    Guid::new(0xD2D0A440, 0xE307, 0x11D2, [0x97, 0xF0, 0x00, 0xA0, 0xC9, 0x5E, 0xA8, 0x50]);
pub const HEADER_EXTENSION: Guid =
    Guid::new(0x5FBF03B5, 0xA92E, 0x11CF, [0x8E, 0xE3, 0x00, 0xC0, 0x0C, 0x20, 0x53, 0x65]);
/// The fixed "reserved 1" field of a header extension object.
pub const HEADER_EXTENSION_RESERVED: Guid =
    Guid::new(0xABD3D211, 0xA9BA, 0x11CF, [0x8E, 0xE6, 0x00, 0xC0, 0x0C, 0x20, 0x53, 0x65]);
pub const METADATA: Guid = Guid::new(0xC5F8CBEA, 0x5BAF, 0x4877, [0x84, 0x67, 0xAA, 0x8C, 0x44, 0xFA, 0x4C, 0xCA]);
pub const METADATA_LIBRARY: Guid =
    Guid::new(0x44231C94, 0x9498, 0x49D1, [0xA1, 0x41, 0x1D, 0x13, 0x4E, 0x45, 0x70, 0x54]);
pub const PADDING: Guid = Guid::new(0x1806D474, 0xCADF, 0x4509, [0xA4, 0xBA, 0x9A, 0xAB, 0xCB, 0x96, 0xAA, 0xE8]);
pub const AUDIO_MEDIA: Guid = Guid::new(0xF8699E40, 0x5B4D, 0x11CF, [0xA8, 0xFD, 0x00, 0x80, 0x5F, 0x5C, 0x44, 0x2B]);
pub const VIDEO_MEDIA: Guid = Guid::new(0xBC19EFC0, 0x5B4D, 0x11CF, [0xA8, 0xFD, 0x00, 0x80, 0x5F, 0x5C, 0x44, 0x2B]);

/// GUID plus 64-bit little-endian size (header included).
pub const OBJECT_HEADER_SIZE: u64 = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectHeader {
    pub guid: Guid,
    pub size: u64,
    pub position: u64,
}

impl ObjectHeader {
    pub fn parse(data: &[u8], position: u64) -> Result<Self> {
        let guid = Guid::from_slice(data)
            .ok_or_else(|| MetaError::corrupt("ASF", format!("object header at {} truncated", position)))?;
        let size = data
            .get(16..24)
            .map(|b| u64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
            .ok_or_else(|| MetaError::corrupt("ASF", format!("object header at {} truncated", position)))?;
        if size < OBJECT_HEADER_SIZE {
            return Err(MetaError::corrupt("ASF", format!("object {} at {} has size {}", guid, position, size)));
        }
        Ok(ObjectHeader { guid, size, position })
    }

    pub fn payload_size(&self) -> u64 {
        self.size - OBJECT_HEADER_SIZE
    }
}

fn truncated(err: std::io::Error) -> MetaError {
    MetaError::corrupt("ASF", format!("object payload truncated: {}", err))
}

fn read_vec(cursor: &mut Cursor<&[u8]>, len: usize) -> Result<Vec<u8>> {
    let remaining = cursor.get_ref().len() as u64 - cursor.position().min(cursor.get_ref().len() as u64);
    if len as u64 > remaining {
        return Err(MetaError::corrupt("ASF", format!("field of {} bytes with {} left", len, remaining)));
    }
    let mut out = vec![0u8; len];
    cursor.read_exact(&mut out).map_err(truncated)?;
    Ok(out)
}

/// UTF-16LE text with its terminating NUL stripped.
fn utf16(data: &[u8]) -> String {
    let mut text = decode_string(data, StringType::Utf16Le);
    while text.ends_with('\0') {
        text.pop();
    }
    text
}

/// UTF-16LE text with a terminating NUL.
fn utf16_z(text: &str) -> Vec<u8> {
    let mut out = encode_string(text, StringType::Utf16Le);
    out.extend_from_slice(&[0, 0]);
    out
}

/// Attribute value types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AsfValue {
    Unicode(String),
    Bytes(Vec<u8>),
    Bool(bool),
    DWord(u32),
    QWord(u64),
    Word(u16),
    Guid(Guid),
}

impl AsfValue {
    pub fn type_code(&self) -> u16 {
        match self {
            AsfValue::Unicode(_) => 0,
            AsfValue::Bytes(_) => 1,
            AsfValue::Bool(_) => 2,
            AsfValue::DWord(_) => 3,
            AsfValue::QWord(_) => 4,
            AsfValue::Word(_) => 5,
            AsfValue::Guid(_) => 6,
        }
    }

    /// `bool_width` is 4 in the extended content description and 2 in
    /// the metadata objects.
    pub fn parse(code: u16, data: &[u8], bool_width: usize) -> Result<Self> {
        let need = |n: usize| {
            if data.len() < n {
                Err(MetaError::corrupt("ASF", format!("attribute of type {} with {} bytes", code, data.len())))
            } else {
                Ok(())
            }
        };
        Ok(match code {
            0 => AsfValue::Unicode(utf16(data)),
            1 => AsfValue::Bytes(data.to_vec()),
            2 => {
                need(bool_width)?;
                AsfValue::Bool(data[..bool_width].iter().any(|&b| b != 0))
            }
            3 => {
                need(4)?;
                AsfValue::DWord(u32::from_le_bytes([data[0], data[1], data[2], data[3]]))
            }
            4 => {
                need(8)?;
                AsfValue::QWord(u64::from_le_bytes([
                    data[0], data[1], data[2], data[3], data[4], data[5], data[6], data[7],
                ]))
            }
            5 => {
                need(2)?;
                AsfValue::Word(u16::from_le_bytes([data[0], data[1]]))
            }
            6 => AsfValue::Guid(
                Guid::from_slice(data).ok_or_else(|| MetaError::corrupt("ASF", "GUID attribute truncated"))?,
            ),
            other => return Err(MetaError::unsupported("ASF", format!("attribute type {}", other))),
        })
    }

    pub fn render(&self, bool_width: usize) -> Vec<u8> {
        match self {
            AsfValue::Unicode(text) => utf16_z(text),
            AsfValue::Bytes(data) => data.clone(),
            AsfValue::Bool(value) => {
                let mut out = vec![0u8; bool_width];
                out[0] = *value as u8;
                out
            }
            AsfValue::DWord(v) => v.to_le_bytes().to_vec(),
            AsfValue::QWord(v) => v.to_le_bytes().to_vec(),
            AsfValue::Word(v) => v.to_le_bytes().to_vec(),
            AsfValue::Guid(g) => g.0.to_vec(),
        }
    }

    pub fn as_text(&self) -> Option<String> {
        match self {
            AsfValue::Unicode(text) => Some(text.clone()),
            AsfValue::DWord(v) => Some(v.to_string()),
            AsfValue::QWord(v) => Some(v.to_string()),
            AsfValue::Word(v) => Some(v.to_string()),
            AsfValue::Bool(v) => Some(v.to_string()),
            AsfValue::Bytes(_) | AsfValue::Guid(_) => None,
        }
    }

    pub fn as_number(&self) -> Option<u64> {
        match self {
            AsfValue::DWord(v) => Some(*v as u64),
            AsfValue::QWord(v) => Some(*v),
            AsfValue::Word(v) => Some(*v as u64),
            AsfValue::Unicode(text) => {
                let digits: String = text.trim().chars().take_while(char::is_ascii_digit).collect();
                digits.parse().ok()
            }
            _ => None,
        }
    }
}

/// A named value from one of the three attribute objects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: String,
    pub value: AsfValue,
    pub stream: u16,
    pub language: u16,
}

impl Attribute {
    pub fn new(name: impl Into<String>, value: AsfValue) -> Self {
        Attribute {
            name: name.into(),
            value,
            stream: 0,
            language: 0,
        }
    }

    /// Whether the extended content description can store this value.
    pub fn fits_extended(&self) -> bool {
        self.stream == 0
            && self.language == 0
            && !matches!(self.value, AsfValue::Guid(_))
            && self.value.render(4).len() <= u16::MAX as usize
    }
}

/// The five fixed strings of a content description object.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContentDescription {
    pub title: String,
    pub author: String,
    pub copyright: String,
    pub description: String,
    pub rating: String,
}

impl ContentDescription {
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(payload);
        let mut lens = [0u16; 5];
        for len in lens.iter_mut() {
            *len = cursor.read_u16::<LittleEndian>().map_err(truncated)?;
        }
        let mut fields = Vec::with_capacity(5);
        for len in lens {
            fields.push(utf16(&read_vec(&mut cursor, len as usize)?));
        }
        let mut fields = fields.into_iter();
        let mut next = || fields.next().unwrap_or_default();
        Ok(ContentDescription {
            title: next(),
            author: next(),
            copyright: next(),
            description: next(),
            rating: next(),
        })
    }

    pub fn render(&self) -> Result<Vec<u8>> {
        let fields = [&self.title, &self.author, &self.copyright, &self.description, &self.rating];
        let encoded: Vec<Vec<u8>> = fields
            .iter()
            .map(|f| if f.is_empty() { Vec::new() } else { utf16_z(f) })
            .collect();
        let mut out = Vec::new();
        for field in &encoded {
            let len = u16::try_from(field.len())
                .map_err(|_| MetaError::ValueError("content description field longer than 64 KiB".into()))?;
            out.extend_from_slice(&len.to_le_bytes());
        }
        for field in encoded {
            out.extend_from_slice(&field);
        }
        Ok(out)
    }

    pub fn is_empty(&self) -> bool {
        self.title.is_empty()
            && self.author.is_empty()
            && self.copyright.is_empty()
            && self.description.is_empty()
            && self.rating.is_empty()
    }
}

/// Extended content description: `count, (name, type, value)*` with
/// 16-bit lengths.
pub fn parse_extended(payload: &[u8]) -> Result<Vec<Attribute>> {
    let mut cursor = Cursor::new(payload);
    let count = cursor.read_u16::<LittleEndian>().map_err(truncated)?;
    let mut out = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let name_len = cursor.read_u16::<LittleEndian>().map_err(truncated)?;
        let name = utf16(&read_vec(&mut cursor, name_len as usize)?);
        let code = cursor.read_u16::<LittleEndian>().map_err(truncated)?;
        let value_len = cursor.read_u16::<LittleEndian>().map_err(truncated)?;
        let raw = read_vec(&mut cursor, value_len as usize)?;
        match AsfValue::parse(code, &raw, 4) {
            Ok(value) => out.push(Attribute::new(name, value)),
            Err(err) if err.is_unsupported() => debug!("ASF: skipping attribute {}: {}", name, err),
            Err(err) => return Err(err),
        }
    }
    Ok(out)
}

pub fn render_extended(attributes: &[Attribute]) -> Result<Vec<u8>> {
    let count = u16::try_from(attributes.len())
        .map_err(|_| MetaError::ValueError("too many extended content attributes".into()))?;
    let mut out = count.to_le_bytes().to_vec();
    for attr in attributes {
        let name = utf16_z(&attr.name);
        let value = attr.value.render(4);
        let too_long = |what: &str| MetaError::ValueError(format!("{} of {} longer than 64 KiB", what, attr.name));
        out.extend_from_slice(&u16::try_from(name.len()).map_err(|_| too_long("name"))?.to_le_bytes());
        out.extend_from_slice(&name);
        out.extend_from_slice(&attr.value.type_code().to_le_bytes());
        out.extend_from_slice(&u16::try_from(value.len()).map_err(|_| too_long("value"))?.to_le_bytes());
        out.extend_from_slice(&value);
    }
    Ok(out)
}

/// Metadata and metadata library objects share one record layout:
/// language, stream, name length, type, 32-bit data length, name, data.
pub fn parse_metadata(payload: &[u8]) -> Result<Vec<Attribute>> {
    let mut cursor = Cursor::new(payload);
    let count = cursor.read_u16::<LittleEndian>().map_err(truncated)?;
    let mut out = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let language = cursor.read_u16::<LittleEndian>().map_err(truncated)?;
        let stream = cursor.read_u16::<LittleEndian>().map_err(truncated)?;
        let name_len = cursor.read_u16::<LittleEndian>().map_err(truncated)?;
        let code = cursor.read_u16::<LittleEndian>().map_err(truncated)?;
        let data_len = cursor.read_u32::<LittleEndian>().map_err(truncated)?;
        let name = utf16(&read_vec(&mut cursor, name_len as usize)?);
        let raw = read_vec(&mut cursor, data_len as usize)?;
        match AsfValue::parse(code, &raw, 2) {
            Ok(value) => out.push(Attribute {
                name,
                value,
                stream,
                language,
            }),
            Err(err) if err.is_unsupported() => debug!("ASF: skipping metadata {}: {}", name, err),
            Err(err) => return Err(err),
        }
    }
    Ok(out)
}

pub fn render_metadata(attributes: &[Attribute]) -> Result<Vec<u8>> {
    let count = u16::try_from(attributes.len())
        .map_err(|_| MetaError::ValueError("too many metadata attributes".into()))?;
    let mut out = count.to_le_bytes().to_vec();
    for attr in attributes {
        let name = utf16_z(&attr.name);
        let value = attr.value.render(2);
        let name_len = u16::try_from(name.len())
            .map_err(|_| MetaError::ValueError(format!("attribute name {} too long", attr.name)))?;
        let value_len = u32::try_from(value.len())
            .map_err(|_| MetaError::ValueError(format!("attribute {} larger than 4 GiB", attr.name)))?;
        out.extend_from_slice(&attr.language.to_le_bytes());
        out.extend_from_slice(&attr.stream.to_le_bytes());
        out.extend_from_slice(&name_len.to_le_bytes());
        out.extend_from_slice(&attr.value.type_code().to_le_bytes());
        out.extend_from_slice(&value_len.to_le_bytes());
        out.extend_from_slice(&name);
        out.extend_from_slice(&value);
    }
    Ok(out)
}

/// File properties. Only the fields used for properties are decoded; the
/// object is written back verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileProperties {
    /// 100 ns units, preroll included.
    pub play_duration: u64,
    /// Milliseconds.
    pub preroll: u64,
    pub max_bitrate: u32,
    raw: Vec<u8>,
}

impl FileProperties {
    pub fn parse(payload: &[u8]) -> Result<Self> {
        if payload.len() < 80 {
            return Err(MetaError::corrupt("ASF", "file properties object truncated"));
        }
        let u64_at = |i: usize| {
            u64::from_le_bytes([
                payload[i],
                payload[i + 1],
                payload[i + 2],
                payload[i + 3],
                payload[i + 4],
                payload[i + 5],
                payload[i + 6],
                payload[i + 7],
            ])
        };
        Ok(FileProperties {
            play_duration: u64_at(40),
            preroll: u64_at(56),
            max_bitrate: u32::from_le_bytes([payload[76], payload[77], payload[78], payload[79]]),
            raw: payload.to_vec(),
        })
    }

    pub fn duration_ms(&self) -> u64 {
        (self.play_duration / 10_000).saturating_sub(self.preroll)
    }
}

/// Stream properties with the type-specific data split out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamProperties {
    pub stream_type: Guid,
    pub stream_number: u16,
    pub type_specific: Vec<u8>,
    raw: Vec<u8>,
}

impl StreamProperties {
    pub fn parse(payload: &[u8]) -> Result<Self> {
        if payload.len() < 54 {
            return Err(MetaError::corrupt("ASF", "stream properties object truncated"));
        }
        let stream_type = Guid::from_slice(payload)
            .ok_or_else(|| MetaError::corrupt("ASF", "stream properties object truncated"))?;
        let specific_len = u32::from_le_bytes([payload[40], payload[41], payload[42], payload[43]]) as usize;
        let flags = u16::from_le_bytes([payload[48], payload[49]]);
        let type_specific = payload
            .get(54..54 + specific_len)
            .ok_or_else(|| MetaError::corrupt("ASF", "stream type data overruns its object"))?
            .to_vec();
        Ok(StreamProperties {
            stream_type,
            stream_number: flags & 0x7F,
            type_specific,
            raw: payload.to_vec(),
        })
    }
}

/// Child objects of the header object and of the header extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderObject {
    FileProperties(FileProperties),
    StreamProperties(StreamProperties),
    ContentDescription(ContentDescription),
    ExtendedContentDescription(Vec<Attribute>),
    HeaderExtension(Vec<HeaderObject>),
    Metadata(Vec<Attribute>),
    MetadataLibrary(Vec<Attribute>),
    /// Payload size.
    Padding(u64),
    Unknown { guid: Guid, payload: Vec<u8> },
}

impl HeaderObject {
    pub fn parse(guid: Guid, payload: &[u8]) -> Result<Self> {
        Ok(match guid {
            FILE_PROPERTIES => HeaderObject::FileProperties(FileProperties::parse(payload)?),
            STREAM_PROPERTIES => HeaderObject::StreamProperties(StreamProperties::parse(payload)?),
            CONTENT_DESCRIPTION => HeaderObject::ContentDescription(ContentDescription::parse(payload)?),
            EXTENDED_CONTENT_DESCRIPTION => HeaderObject::ExtendedContentDescription(parse_extended(payload)?),
            HEADER_EXTENSION => {
                if payload.len() < 22 {
                    return Err(MetaError::corrupt("ASF", "header extension object truncated"));
                }
                let size = u32::from_le_bytes([payload[18], payload[19], payload[20], payload[21]]) as usize;
                let body = payload
                    .get(22..22 + size)
                    .ok_or_else(|| MetaError::corrupt("ASF", "header extension data overruns its object"))?;
                HeaderObject::HeaderExtension(parse_objects(body, None)?)
            }
            METADATA => HeaderObject::Metadata(parse_metadata(payload)?),
            METADATA_LIBRARY => HeaderObject::MetadataLibrary(parse_metadata(payload)?),
            PADDING => HeaderObject::Padding(payload.len() as u64),
            guid => HeaderObject::Unknown {
                guid,
                payload: payload.to_vec(),
            },
        })
    }

    pub fn guid(&self) -> Guid {
        match self {
            HeaderObject::FileProperties(_) => FILE_PROPERTIES,
            HeaderObject::StreamProperties(_) => STREAM_PROPERTIES,
            HeaderObject::ContentDescription(_) => CONTENT_DESCRIPTION,
            HeaderObject::ExtendedContentDescription(_) => EXTENDED_CONTENT_DESCRIPTION,
            HeaderObject::HeaderExtension(_) => HEADER_EXTENSION,
            HeaderObject::Metadata(_) => METADATA,
            HeaderObject::MetadataLibrary(_) => METADATA_LIBRARY,
            HeaderObject::Padding(_) => PADDING,
            HeaderObject::Unknown { guid, .. } => *guid,
        }
    }

    fn payload(&self) -> Result<Vec<u8>> {
        Ok(match self {
            HeaderObject::FileProperties(p) => p.raw.clone(),
            HeaderObject::StreamProperties(p) => p.raw.clone(),
            HeaderObject::ContentDescription(c) => c.render()?,
            HeaderObject::ExtendedContentDescription(attrs) => render_extended(attrs)?,
            HeaderObject::HeaderExtension(children) => {
                let body = render_objects(children)?;
                let size = u32::try_from(body.len())
                    .map_err(|_| MetaError::ValueError("header extension larger than 4 GiB".into()))?;
                let mut out = HEADER_EXTENSION_RESERVED.0.to_vec();
                out.extend_from_slice(&6u16.to_le_bytes());
                out.extend_from_slice(&size.to_le_bytes());
                out.extend_from_slice(&body);
                out
            }
            HeaderObject::Metadata(attrs) | HeaderObject::MetadataLibrary(attrs) => render_metadata(attrs)?,
            HeaderObject::Padding(size) => vec![0u8; *size as usize],
            HeaderObject::Unknown { payload, .. } => payload.clone(),
        })
    }

    /// The complete object, header included.
    pub fn render(&self) -> Result<Vec<u8>> {
        let payload = self.payload()?;
        let mut out = self.guid().0.to_vec();
        out.extend_from_slice(&(payload.len() as u64 + OBJECT_HEADER_SIZE).to_le_bytes());
        out.extend_from_slice(&payload);
        Ok(out)
    }
}

/// Walk consecutive objects. With `expected`, stop after that many.
pub fn parse_objects(data: &[u8], expected: Option<u32>) -> Result<Vec<HeaderObject>> {
    let mut objects = Vec::new();
    let mut pos = 0usize;
    while pos + OBJECT_HEADER_SIZE as usize <= data.len() {
        if expected.is_some_and(|n| objects.len() as u32 >= n) {
            break;
        }
        let header = ObjectHeader::parse(&data[pos..], pos as u64)?;
        let end = usize::try_from(header.size)
            .ok()
            .and_then(|size| pos.checked_add(size))
            .filter(|&end| end <= data.len())
            .ok_or_else(|| MetaError::corrupt("ASF", format!("object {} at {} overruns its parent", header.guid, pos)))?;
        trace!("ASF: object {} at {}, {} bytes", header.guid, pos, header.size);
        objects.push(HeaderObject::parse(header.guid, &data[pos + OBJECT_HEADER_SIZE as usize..end])?);
        pos = end;
    }
    Ok(objects)
}

pub fn render_objects(objects: &[HeaderObject]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    for object in objects {
        out.extend_from_slice(&object.render()?);
    }
    Ok(out)
}
