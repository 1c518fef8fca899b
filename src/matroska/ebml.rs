use log::trace;

use crate::common::bytes::ByteVector;
use crate::common::error::{MetaError, Result};
use crate::common::file::TagFile;
use crate::common::header::{resized, DiskHeader};

pub const EBML_HEADER: u32 = 0x1A45_DFA3;
pub const DOC_TYPE: u32 = 0x4282;
pub const SEGMENT: u32 = 0x1853_8067;
pub const SEEK_HEAD: u32 = 0x114D_9B74;
pub const SEEK: u32 = 0x4DBB;
pub const SEEK_ID: u32 = 0x53AB;
pub const SEEK_POSITION: u32 = 0x53AC;
pub const INFO: u32 = 0x1549_A966;
pub const TIMECODE_SCALE: u32 = 0x2A_D7B1;
pub const DURATION: u32 = 0x4489;
pub const SEGMENT_TITLE: u32 = 0x7BA9;
pub const MUXING_APP: u32 = 0x4D80;
pub const WRITING_APP: u32 = 0x5741;
pub const TRACKS: u32 = 0x1654_AE6B;
pub const TRACK_ENTRY: u32 = 0xAE;
pub const TRACK_NUMBER: u32 = 0xD7;
pub const TRACK_UID: u32 = 0x73C5;
pub const TRACK_TYPE: u32 = 0x83;
pub const CODEC_ID: u32 = 0x86;
pub const AUDIO: u32 = 0xE1;
pub const SAMPLING_FREQUENCY: u32 = 0xB5;
pub const CHANNELS: u32 = 0x9F;
pub const BIT_DEPTH: u32 = 0x6264;
pub const VIDEO: u32 = 0xE0;
pub const PIXEL_WIDTH: u32 = 0xB0;
pub const PIXEL_HEIGHT: u32 = 0xBA;
pub const TAGS: u32 = 0x1254_C367;
pub const TAG: u32 = 0x7373;
pub const TARGETS: u32 = 0x63C0;
pub const TARGET_TYPE_VALUE: u32 = 0x68CA;
pub const TARGET_TYPE: u32 = 0x63CA;
pub const TAG_TRACK_UID: u32 = 0x63C5;
pub const TAG_EDITION_UID: u32 = 0x63C9;
pub const TAG_CHAPTER_UID: u32 = 0x63C4;
pub const TAG_ATTACHMENT_UID: u32 = 0x63C6;
pub const SIMPLE_TAG: u32 = 0x67C8;
pub const TAG_NAME: u32 = 0x45A3;
pub const TAG_LANGUAGE: u32 = 0x447A;
pub const TAG_DEFAULT: u32 = 0x4484;
pub const TAG_STRING: u32 = 0x4487;
pub const TAG_BINARY: u32 = 0x4485;
pub const CLUSTER: u32 = 0x1F43_B675;
pub const CUES: u32 = 0x1C53_BB6B;
pub const VOID: u32 = 0xEC;

/// Longest element header: 4-byte ID plus 8-byte size.
pub const MAX_HEADER_SIZE: usize = 12;

/// Decode a variable-length size. Returns the value (`None` for the
/// all-ones "unknown size") and its width.
pub fn read_vint(data: &[u8]) -> Result<(Option<u64>, usize)> {
    let first = *data.first().ok_or_else(|| MetaError::corrupt("Matroska", "empty variable-length integer"))?;
    if first == 0 {
        return Err(MetaError::corrupt("Matroska", "variable-length integer wider than 8 bytes"));
    }
    let width = first.leading_zeros() as usize + 1;
    let bytes = data
        .get(..width)
        .ok_or_else(|| MetaError::corrupt("Matroska", "variable-length integer truncated"))?;
    let mut value = (first as u64) & (0xFF >> width);
    for &b in &bytes[1..] {
        value = (value << 8) | b as u64;
    }
    let all_ones = (1u64 << (7 * width)) - 1;
    Ok(((value != all_ones).then_some(value), width))
}

/// Decode an element ID, marker bits kept. IDs are 1 to 4 bytes.
pub fn read_id(data: &[u8]) -> Result<(u32, usize)> {
    let first = *data.first().ok_or_else(|| MetaError::corrupt("Matroska", "empty element ID"))?;
    let width = first.leading_zeros() as usize + 1;
    if first == 0 || width > 4 {
        return Err(MetaError::corrupt("Matroska", format!("invalid element ID lead byte {:#04x}", first)));
    }
    let bytes = data
        .get(..width)
        .ok_or_else(|| MetaError::corrupt("Matroska", "element ID truncated"))?;
    Ok((bytes.iter().fold(0u32, |id, &b| (id << 8) | b as u32), width))
}

pub fn id_width(id: u32) -> usize {
    match id {
        0..=0xFF => 1,
        0x100..=0xFFFF => 2,
        0x1_0000..=0xFF_FFFF => 3,
        _ => 4,
    }
}

pub fn encode_id(id: u32) -> Vec<u8> {
    id.to_be_bytes()[4 - id_width(id)..].to_vec()
}

/// Narrowest width that can hold `value` (the all-ones pattern is
/// reserved).
pub fn vint_width(value: u64) -> usize {
    (1..=8).find(|&w| value < (1u64 << (7 * w)) - 1).unwrap_or(8)
}

/// Encode `value` in exactly `width` bytes, or `None` if it does not fit.
pub fn encode_vint(value: u64, width: usize) -> Option<Vec<u8>> {
    if !(1..=8).contains(&width) || value >= (1u64 << (7 * width)) - 1 {
        return None;
    }
    let mut out = value.to_be_bytes()[8 - width..].to_vec();
    out[0] |= 0x80 >> (width - 1);
    Some(out)
}

pub fn encode_unknown_size(width: usize) -> Vec<u8> {
    let mut out = vec![0xFF; width];
    out[0] = 0xFF >> (width - 1);
    out
}

/// An element header read from disk or synthesized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EbmlElement {
    pub id: u32,
    /// `None` for unknown-size (live streamed) elements.
    pub size: Option<u64>,
    position: Option<u64>,
    id_len: usize,
    size_len: usize,
}

impl EbmlElement {
    pub fn new(id: u32, size: u64) -> Self {
        EbmlElement {
            id,
            size: Some(size),
            position: None,
            id_len: id_width(id),
            size_len: vint_width(size),
        }
    }

    pub fn parse(data: &[u8], position: u64) -> Result<Self> {
        let (id, id_len) = read_id(data)?;
        let (size, size_len) = read_vint(&data[id_len..])?;
        Ok(EbmlElement {
            id,
            size,
            position: Some(position),
            id_len,
            size_len,
        })
    }

    /// Read a header at `position`, rejecting a size that runs past `limit`.
    pub fn read(file: &mut TagFile, position: u64, limit: u64) -> Result<Self> {
        let head = file.read_at(position, MAX_HEADER_SIZE)?;
        let element = EbmlElement::parse(&head, position)?;
        if let Some(size) = element.size {
            if element.payload_start().checked_add(size).map_or(true, |end| end > limit) {
                return Err(MetaError::corrupt(
                    "Matroska",
                    format!("element {:#x} at {} of {} bytes overruns its parent", element.id, position, size),
                ));
            }
        }
        trace!("EBML {:#x} at {}, size {:?}", element.id, position, element.size);
        Ok(element)
    }

    pub fn offset(&self) -> u64 {
        self.position.unwrap_or(0)
    }

    pub fn header_len(&self) -> usize {
        self.id_len + self.size_len
    }

    pub fn payload_start(&self) -> u64 {
        self.offset() + self.header_len() as u64
    }

    /// End of the element; unknown-size elements end at `limit`.
    pub fn end(&self, limit: u64) -> u64 {
        match self.size {
            Some(size) => self.payload_start() + size,
            None => limit,
        }
    }

    pub fn is_unknown_size(&self) -> bool {
        self.size.is_none()
    }

    /// Header bytes for a payload of `size`, keeping the current size width
    /// when it fits.
    pub fn render_with(&self, size: Option<u64>) -> Vec<u8> {
        let mut out = encode_id(self.id);
        match size {
            None => out.extend_from_slice(&encode_unknown_size(self.size_len)),
            Some(size) => {
                let width = self.size_len.max(vint_width(size));
                out.extend_from_slice(&encode_vint(size, width).unwrap_or_else(|| encode_unknown_size(8)));
            }
        }
        out
    }
}

impl DiskHeader for EbmlElement {
    fn position(&self) -> Option<u64> {
        self.position
    }

    fn header_size(&self) -> u64 {
        self.header_len() as u64
    }

    fn render_resized(&self, delta: i64) -> Result<ByteVector> {
        let size = match self.size {
            Some(size) => Some(resized(size, delta, "Matroska")?),
            None => None,
        };
        Ok(ByteVector::from(self.render_with(size)))
    }
}

/// A complete element.
pub fn render_element(id: u32, payload: &[u8]) -> Vec<u8> {
    let mut out = EbmlElement::new(id, payload.len() as u64).render_with(Some(payload.len() as u64));
    out.extend_from_slice(payload);
    out
}

pub fn render_uint(id: u32, value: u64) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let skip = bytes.iter().take(7).take_while(|&&b| b == 0).count();
    render_element(id, &bytes[skip..])
}

pub fn render_string(id: u32, value: &str) -> Vec<u8> {
    render_element(id, value.as_bytes())
}

/// A `Void` element of exactly `total` bytes.
pub fn render_void(total: u64) -> Result<Vec<u8>> {
    if total < 2 {
        return Err(MetaError::ValueError(format!("no Void element is {} bytes long", total)));
    }
    let width = if total - 2 < 127 { 1 } else { 8 };
    let payload = total - 1 - width as u64;
    let mut out = vec![VOID as u8];
    out.extend_from_slice(&encode_vint(payload, width).unwrap_or_else(|| encode_unknown_size(width)));
    out.resize(total as usize, 0);
    Ok(out)
}

/// Children of an in-memory master element payload. Offsets are relative
/// to `data`.
pub fn children(data: &[u8]) -> Result<Vec<(EbmlElement, &[u8])>> {
    let mut out = Vec::new();
    let mut pos = 0usize;
    while pos < data.len() {
        let element = EbmlElement::parse(&data[pos..], pos as u64)?;
        let start = pos + element.header_len();
        let size = element
            .size
            .ok_or_else(|| MetaError::corrupt("Matroska", format!("unknown size for nested element {:#x}", element.id)))?;
        let end = usize::try_from(size)
            .ok()
            .and_then(|s| start.checked_add(s))
            .filter(|&end| end <= data.len())
            .ok_or_else(|| {
                MetaError::corrupt("Matroska", format!("element {:#x} at {} overruns its parent", element.id, pos))
            })?;
        out.push((element, &data[start..end]));
        pos = end;
    }
    Ok(out)
}

pub fn uint(data: &[u8]) -> u64 {
    data.iter().take(8).fold(0u64, |v, &b| (v << 8) | b as u64)
}

pub fn float(data: &[u8]) -> f64 {
    match data.len() {
        4 => f32::from_be_bytes([data[0], data[1], data[2], data[3]]) as f64,
        8 => f64::from_be_bytes([data[0], data[1], data[2], data[3], data[4], data[5], data[6], data[7]]),
        _ => 0.0,
    }
}

pub fn string(data: &[u8]) -> String {
    let end = memchr::memchr(0, data).unwrap_or(data.len());
    String::from_utf8_lossy(&data[..end]).into_owned()
}
