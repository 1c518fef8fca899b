//! AIFF and AIFF-C.
//!
//! A big-endian `FORM` chunk holding `COMM` (stream description), `SSND`
//! (samples) and optionally an `ID3 ` chunk carrying an ID3v2 tag.

use byteorder::{BigEndian, ByteOrder};
use log::{debug, warn};

use crate::common::config::{ReadStyle, WriteOptions};
use crate::common::error::{MetaError, Result};
use crate::common::file::TagFile;
use crate::common::media::{AudioProperties, MediaFile};
use crate::common::stream::FileAbstraction;
use crate::common::tag::{CombinedTag, Tag};
use crate::id3::tags::Id3v2Tag;
use crate::id3::writer;
use crate::riff::chunk::{read_chunks, render_chunk, ChunkHeader, HEADER_SIZE};
use crate::riff::{apply_edits, ChunkEdit};

/// Decode the 80-bit IEEE 754 extended float AIFF stores sample rates in.
pub fn decode_extended(data: &[u8; 10]) -> f64 {
    let exponent = (BigEndian::read_u16(&data[0..2]) & 0x7FFF) as i32;
    let mantissa = BigEndian::read_u64(&data[2..10]);
    if exponent == 0 && mantissa == 0 {
        return 0.0;
    }
    let value = mantissa as f64 * 2f64.powi(exponent - 16383 - 63);
    if data[0] & 0x80 != 0 {
        -value
    } else {
        value
    }
}

/// Encode a whole sample rate as an 80-bit extended float.
pub fn encode_extended(rate: u32) -> [u8; 10] {
    let mut out = [0u8; 10];
    if rate == 0 {
        return out;
    }
    let shift = (rate as u64).leading_zeros();
    let exponent = (16383 + 63 - shift) as u16;
    BigEndian::write_u16(&mut out[0..2], exponent);
    BigEndian::write_u64(&mut out[2..10], (rate as u64) << shift);
    out
}

/// The `COMM` chunk.
#[derive(Debug, Clone, PartialEq)]
pub struct CommonChunk {
    pub channels: u16,
    pub sample_frames: u32,
    pub sample_size: u16,
    pub sample_rate: f64,
    /// AIFF-C only: compression type and its display name.
    pub compression: Option<([u8; 4], String)>,
}

impl CommonChunk {
    pub fn parse(data: &[u8], aifc: bool) -> Result<Self> {
        if data.len() < 18 {
            return Err(MetaError::corrupt("AIFF", format!("COMM chunk of {} bytes", data.len())));
        }
        let mut rate = [0u8; 10];
        rate.copy_from_slice(&data[8..18]);
        let compression = if aifc && data.len() >= 22 {
            let kind = [data[18], data[19], data[20], data[21]];
            // Pascal string: length byte then text
            let name = match data.get(22) {
                Some(&len) => {
                    let end = (23 + len as usize).min(data.len());
                    String::from_utf8_lossy(&data[23..end]).into_owned()
                }
                None => String::new(),
            };
            Some((kind, name))
        } else {
            None
        };
        Ok(CommonChunk {
            channels: BigEndian::read_u16(&data[0..2]),
            sample_frames: BigEndian::read_u32(&data[2..6]),
            sample_size: BigEndian::read_u16(&data[6..8]),
            sample_rate: decode_extended(&rate),
            compression,
        })
    }

    pub fn properties(&self) -> AudioProperties {
        let rate = if self.sample_rate.is_finite() && self.sample_rate > 0.0 {
            self.sample_rate as u32
        } else {
            0
        };
        let mut props = AudioProperties {
            sample_rate: rate,
            channels: self.channels as u8,
            bits_per_sample: self.sample_size as u8,
            ..Default::default()
        };
        if rate > 0 {
            props.duration_ms = self.sample_frames as u64 * 1000 / rate as u64;
            props.bitrate = (rate as u64 * self.sample_size as u64 * self.channels as u64 / 1000) as u32;
        }
        props
    }
}

/// An AIFF or AIFF-C file.
pub struct AiffFile {
    file: TagFile,
    form: ChunkHeader,
    aifc: bool,
    chunks: Vec<ChunkHeader>,
    id3_chunk: Option<ChunkHeader>,
    common: Option<CommonChunk>,
    properties: Option<AudioProperties>,
    pub id3v2: Option<Id3v2Tag>,
}

impl AiffFile {
    pub fn open(abstraction: impl FileAbstraction + 'static, style: ReadStyle) -> Result<Self> {
        let mut file = TagFile::new(abstraction);
        let (form, aifc, chunks) = scan(&mut file)?;

        let id3_chunk = chunks.iter().find(|c| &c.id == b"ID3 " || &c.id == b"id3 ").cloned();
        let id3v2 = match &id3_chunk {
            Some(chunk) => match Id3v2Tag::read(&mut file, chunk.payload_start(), style) {
                Ok(tag) => Some(tag),
                Err(err) if err.is_corrupt() => {
                    warn!("AIFF: unreadable ID3 chunk: {}", err);
                    file.mark_corrupt(format!("ID3 chunk at {}: {}", chunk.offset(), err));
                    None
                }
                Err(err) => {
                    debug!("AIFF: ID3 chunk skipped: {}", err);
                    None
                }
            },
            None => None,
        };

        if let Some(ssnd) = chunks.iter().find(|c| &c.id == b"SSND") {
            file.set_invariant_region(ssnd.payload_start(), ssnd.payload_start() + ssnd.size as u64);
        }

        let common = match chunks.iter().find(|c| &c.id == b"COMM") {
            Some(comm) => {
                let raw = file.read_exact_at(comm.payload_start(), comm.size as usize, "AIFF")?;
                Some(CommonChunk::parse(&raw, aifc)?)
            }
            None => {
                file.mark_corrupt("AIFF without a COMM chunk");
                None
            }
        };
        let properties = match &common {
            Some(common) if style.properties => Some(common.properties()),
            _ => None,
        };

        Ok(AiffFile {
            file,
            form,
            aifc,
            chunks,
            id3_chunk,
            common,
            properties,
            id3v2,
        })
    }

    pub fn is_aifc(&self) -> bool {
        self.aifc
    }

    pub fn common(&self) -> Option<&CommonChunk> {
        self.common.as_ref()
    }

    pub fn properties(&self) -> Option<&AudioProperties> {
        self.properties.as_ref()
    }

    pub fn chunks(&self) -> &[ChunkHeader] {
        &self.chunks
    }

    pub fn id3v2_mut(&mut self) -> &mut Id3v2Tag {
        self.id3v2.get_or_insert_with(Id3v2Tag::new)
    }
}

fn scan(file: &mut TagFile) -> Result<(ChunkHeader, bool, Vec<ChunkHeader>)> {
    let head = file.read_at(0, 12)?;
    if head.len() < 12 || &head[0..4] != b"FORM" {
        return Err(MetaError::NoHeader("AIFF"));
    }
    let aifc = match &head[8..12] {
        b"AIFF" => false,
        b"AIFC" => true,
        _ => return Err(MetaError::NoHeader("AIFF")),
    };
    let form = ChunkHeader::parse(&head, 0, true)?;
    let file_len = file.length()?;
    let declared_end = HEADER_SIZE + form.size as u64;
    if declared_end > file_len {
        file.mark_corrupt(format!("FORM size {} exceeds file length {}", form.size, file_len));
    }
    let chunks = read_chunks(file, 12, declared_end.min(file_len), true)?;
    Ok((form, aifc, chunks))
}

impl MediaFile for AiffFile {
    fn tag_file(&self) -> &TagFile {
        &self.file
    }

    fn tags(&mut self) -> CombinedTag<'_> {
        let id3: &mut dyn Tag = self.id3v2.get_or_insert_with(Id3v2Tag::new);
        CombinedTag::new(vec![id3])
    }

    fn save_with(&mut self, options: &WriteOptions) -> Result<()> {
        self.file.ensure_writable()?;
        let bytes = match self.id3v2.as_mut() {
            Some(tag) if !tag.is_empty() => {
                tag.set_original_size(self.id3_chunk.as_ref().map(|c| c.size as u64));
                let id = self.id3_chunk.as_ref().map_or(*b"ID3 ", |c| c.id);
                render_chunk(&id, &writer::render_tag(tag, options)?, true)?
            }
            _ => Vec::new(),
        };
        let append_at = self.chunks.last().map_or(12, |c| c.end());
        let edits = ChunkEdit::new(self.id3_chunk.as_ref(), bytes, append_at).into_iter().collect();
        let total = apply_edits(&mut self.file, &self.form, edits)?;
        debug!("AIFF: ID3 chunk rewritten, FORM size changed by {}", total);

        let (form, aifc, chunks) = scan(&mut self.file)?;
        self.id3_chunk = chunks.iter().find(|c| &c.id == b"ID3 " || &c.id == b"id3 ").cloned();
        if let (Some(tag), Some(chunk)) = (self.id3v2.as_mut(), self.id3_chunk.as_ref()) {
            tag.set_original_size(Some(chunk.size as u64));
        }
        self.form = form;
        self.aifc = aifc;
        self.chunks = chunks;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::stream::MemoryFile;
    use pretty_assertions::assert_eq;

    const SAMPLES: [u8; 40] = [0x11; 40];

    fn comm() -> Vec<u8> {
        let mut raw = Vec::new();
        raw.extend_from_slice(&2u16.to_be_bytes());
        raw.extend_from_slice(&88_200u32.to_be_bytes());
        raw.extend_from_slice(&16u16.to_be_bytes());
        raw.extend_from_slice(&encode_extended(44_100));
        raw
    }

    fn aiff(extra: &[Vec<u8>]) -> Vec<u8> {
        let mut body = b"AIFF".to_vec();
        body.extend_from_slice(&render_chunk(b"COMM", &comm(), true).unwrap());
        let mut ssnd = vec![0u8; 8];
        ssnd.extend_from_slice(&SAMPLES);
        body.extend_from_slice(&render_chunk(b"SSND", &ssnd, true).unwrap());
        for chunk in extra {
            body.extend_from_slice(chunk);
        }
        render_chunk(b"FORM", &body, true).unwrap()
    }

    #[test]
    fn extended_float_sample_rates() {
        assert_eq!(decode_extended(&encode_extended(44_100)), 44_100.0);
        assert_eq!(decode_extended(&encode_extended(8_000)), 8_000.0);
        // 48 kHz as written by common encoders
        let raw = [0x40, 0x0E, 0xBB, 0x80, 0, 0, 0, 0, 0, 0];
        assert_eq!(decode_extended(&raw), 48_000.0);
        assert_eq!(decode_extended(&[0; 10]), 0.0);
    }

    #[test]
    fn reads_common_chunk() {
        let f = AiffFile::open(MemoryFile::new("a.aif", aiff(&[])), ReadStyle::default()).unwrap();
        let props = f.properties().unwrap();
        assert_eq!(props.duration_ms, 2000);
        assert_eq!(props.sample_rate, 44_100);
        assert_eq!(props.channels, 2);
        assert_eq!(props.bitrate, 1411);
        assert!(!f.is_aifc());
    }

    #[test]
    fn aifc_compression_name() {
        let mut raw = comm();
        raw.extend_from_slice(b"sowt");
        raw.push(4);
        raw.extend_from_slice(b"none");
        let common = CommonChunk::parse(&raw, true).unwrap();
        assert_eq!(common.compression, Some((*b"sowt", "none".to_string())));
    }

    #[test]
    fn id3_chunk_is_added_and_removed() {
        let mem = MemoryFile::new("a.aif", aiff(&[]));
        let mut f = AiffFile::open(mem.clone(), ReadStyle::NONE).unwrap();
        let region = f.tag_file().invariant_region().unwrap();
        f.tags().set_title("Sine");
        f.save().unwrap();
        assert_eq!(f.tag_file().invariant_region(), Some(region));

        let data = mem.contents();
        assert_eq!(BigEndian::read_u32(&data[4..8]) as usize, data.len() - 8);
        let mut again = AiffFile::open(mem.clone(), ReadStyle::NONE).unwrap();
        assert_eq!(again.tags().title().as_deref(), Some("Sine"));

        again.tags().clear();
        again.save().unwrap();
        assert_eq!(mem.contents(), aiff(&[]));
    }

    #[test]
    fn truncated_form_is_possibly_corrupt() {
        let mut data = aiff(&[]);
        data.truncate(data.len() - 10);
        let mut f = AiffFile::open(MemoryFile::new("a.aif", data), ReadStyle::NONE).unwrap();
        assert!(f.tag_file().is_possibly_corrupt());
        assert!(matches!(f.save(), Err(MetaError::PossiblyCorrupt(_))));
    }

    #[test]
    fn not_aiff() {
        let err = AiffFile::open(MemoryFile::new("a.aif", b"FORMxxxxWAVE".to_vec()), ReadStyle::NONE).err();
        assert!(matches!(err, Some(MetaError::NoHeader("AIFF"))));
    }
}
