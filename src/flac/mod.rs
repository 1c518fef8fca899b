//! Native FLAC: `fLaC` followed by metadata blocks, then audio frames.

use byteorder::{BigEndian, ByteOrder};
use log::{debug, trace};

use crate::common::config::{ReadStyle, WriteOptions};
use crate::common::error::{MetaError, Result};
use crate::common::file::TagFile;
use crate::common::media::{AudioProperties, MediaFile};
use crate::common::picture::Picture;
use crate::common::stream::FileAbstraction;
use crate::common::tag::{CombinedTag, Tag};
use crate::id3::id3v1::{Id3v1Tag, TAG_SIZE as ID3V1_SIZE};
use crate::id3::tag_size_at;
use crate::id3::tags::Id3v2Tag;
use crate::vorbis::XiphComment;

const MAGIC: &[u8; 4] = b"fLaC";
pub const BLOCK_HEADER_SIZE: usize = 4;
const MAX_BLOCK_SIZE: usize = (1 << 24) - 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockType {
    StreamInfo,
    Padding,
    Application,
    SeekTable,
    VorbisComment,
    CueSheet,
    Picture,
    Unknown(u8),
}

impl BlockType {
    pub fn from_byte(b: u8) -> Self {
        match b {
            0 => BlockType::StreamInfo,
            1 => BlockType::Padding,
            2 => BlockType::Application,
            3 => BlockType::SeekTable,
            4 => BlockType::VorbisComment,
            5 => BlockType::CueSheet,
            6 => BlockType::Picture,
            n => BlockType::Unknown(n),
        }
    }

    pub fn to_byte(self) -> u8 {
        match self {
            BlockType::StreamInfo => 0,
            BlockType::Padding => 1,
            BlockType::Application => 2,
            BlockType::SeekTable => 3,
            BlockType::VorbisComment => 4,
            BlockType::CueSheet => 5,
            BlockType::Picture => 6,
            BlockType::Unknown(n) => n,
        }
    }
}

/// One byte of type and last-block flag, three bytes of big-endian size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    pub block_type: BlockType,
    pub is_last: bool,
    pub size: u32,
}

impl BlockHeader {
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < BLOCK_HEADER_SIZE {
            return Err(MetaError::corrupt("FLAC", "block header truncated"));
        }
        Ok(BlockHeader {
            block_type: BlockType::from_byte(data[0] & 0x7F),
            is_last: data[0] & 0x80 != 0,
            size: BigEndian::read_u24(&data[1..4]),
        })
    }

    pub fn render(&self) -> [u8; BLOCK_HEADER_SIZE] {
        let mut out = [0u8; BLOCK_HEADER_SIZE];
        out[0] = self.block_type.to_byte() | if self.is_last { 0x80 } else { 0 };
        BigEndian::write_u24(&mut out[1..4], self.size);
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamInfo {
    pub min_block_size: u16,
    pub max_block_size: u16,
    pub min_frame_size: u32,
    pub max_frame_size: u32,
    pub sample_rate: u32,
    pub channels: u8,
    pub bits_per_sample: u8,
    pub total_samples: u64,
    pub md5: [u8; 16],
}

impl StreamInfo {
    pub const SIZE: usize = 34;

    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            return Err(MetaError::corrupt("FLAC", "STREAMINFO block too short"));
        }
        let packed = BigEndian::read_u64(&data[10..18]);
        let mut md5 = [0u8; 16];
        md5.copy_from_slice(&data[18..34]);
        Ok(StreamInfo {
            min_block_size: BigEndian::read_u16(&data[0..2]),
            max_block_size: BigEndian::read_u16(&data[2..4]),
            min_frame_size: BigEndian::read_u24(&data[4..7]),
            max_frame_size: BigEndian::read_u24(&data[7..10]),
            // 20 bits rate, 3 bits channels-1, 5 bits depth-1, 36 bits samples
            sample_rate: (packed >> 44) as u32,
            channels: ((packed >> 41) & 0x7) as u8 + 1,
            bits_per_sample: ((packed >> 36) & 0x1F) as u8 + 1,
            total_samples: packed & 0xF_FFFF_FFFF,
            md5,
        })
    }

    pub fn properties(&self, stream_bytes: u64) -> AudioProperties {
        AudioProperties {
            channels: self.channels,
            bits_per_sample: self.bits_per_sample,
            ..AudioProperties::from_samples(self.total_samples, self.sample_rate, stream_bytes)
        }
    }
}

/// A block kept verbatim (STREAMINFO, SEEKTABLE, APPLICATION, ...).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawBlock {
    pub block_type: BlockType,
    pub data: Vec<u8>,
}

pub struct FlacFile {
    file: TagFile,
    /// Offset of the `fLaC` marker.
    flac_start: u64,
    /// Bytes between the marker and the first audio frame.
    metadata_size: u64,
    blocks: Vec<RawBlock>,
    stream_info: StreamInfo,
    pub xiph: Option<XiphComment>,
    pub pictures: Vec<Picture>,
    id3v2: Option<Id3v2Tag>,
    id3v1: Option<Id3v1Tag>,
    properties: Option<AudioProperties>,
}

impl FlacFile {
    pub fn open(abstraction: impl FileAbstraction + 'static, style: ReadStyle) -> Result<Self> {
        let mut file = TagFile::new(abstraction);
        let file_len = file.length()?;

        // Tolerate an ID3v2 tag in front of the stream.
        let mut flac_start = 0;
        let mut id3v2 = None;
        if let Some(size) = tag_size_at(&mut file, 0)? {
            match Id3v2Tag::read(&mut file, 0, style) {
                Ok(tag) => id3v2 = Some(tag),
                Err(err) => debug!("FLAC: ignoring ID3v2 tag: {}", err),
            }
            flac_start = size;
        }
        let magic = file.read_at(flac_start, MAGIC.len())?;
        if magic.data() != MAGIC {
            return Err(MetaError::NoHeader("FLAC"));
        }

        let mut stream_end = file_len;
        let mut id3v1 = None;
        if file_len >= flac_start + ID3V1_SIZE as u64 {
            let raw = file.read_at(file_len - ID3V1_SIZE as u64, ID3V1_SIZE)?;
            if let Ok(tag) = Id3v1Tag::parse(&raw) {
                id3v1 = Some(tag);
                stream_end -= ID3V1_SIZE as u64;
            }
        }

        let mut pos = flac_start + MAGIC.len() as u64;
        let mut blocks = Vec::new();
        let mut xiph = None;
        let mut pictures = Vec::new();
        loop {
            let header = BlockHeader::parse(&file.read_exact_at(pos, BLOCK_HEADER_SIZE, "FLAC")?)?;
            pos += BLOCK_HEADER_SIZE as u64;
            if pos + header.size as u64 > stream_end {
                return Err(MetaError::corrupt(
                    "FLAC",
                    format!("block of {} bytes at {} runs past end of stream", header.size, pos),
                ));
            }
            if blocks.is_empty() && header.block_type != BlockType::StreamInfo {
                return Err(MetaError::corrupt("FLAC", "first block is not STREAMINFO"));
            }
            trace!("FLAC block {:?} at {}, {} bytes", header.block_type, pos, header.size);

            let data = file.read_block(header.size as usize)?.into_inner();
            match header.block_type {
                BlockType::VorbisComment if xiph.is_none() => {
                    xiph = Some(XiphComment::parse(&data, false)?);
                }
                BlockType::Picture => match Picture::parse_flac(&data) {
                    Ok(picture) => pictures.push(picture),
                    Err(err) => {
                        debug!("FLAC: keeping unreadable PICTURE block as is: {}", err);
                        blocks.push(RawBlock { block_type: BlockType::Picture, data });
                    }
                },
                BlockType::Padding => {}
                block_type => blocks.push(RawBlock { block_type, data }),
            }
            pos += header.size as u64;
            if header.is_last {
                break;
            }
        }

        let stream_info = StreamInfo::parse(&blocks[0].data)?;
        let metadata_size = pos - flac_start - MAGIC.len() as u64;
        file.set_invariant_region(pos, stream_end);
        let properties = style
            .properties
            .then(|| stream_info.properties(stream_end - pos));

        Ok(FlacFile {
            file,
            flac_start,
            metadata_size,
            blocks,
            stream_info,
            xiph,
            pictures,
            id3v2,
            id3v1,
            properties,
        })
    }

    pub fn stream_info(&self) -> &StreamInfo {
        &self.stream_info
    }

    pub fn properties(&self) -> Option<&AudioProperties> {
        self.properties.as_ref()
    }

    /// Blocks carried through a save unchanged.
    pub fn blocks(&self) -> &[RawBlock] {
        &self.blocks
    }

    pub fn xiph_mut(&mut self) -> &mut XiphComment {
        self.xiph.get_or_insert_with(|| XiphComment {
            vendor: "mediameta".into(),
            comments: Vec::new(),
        })
    }

    pub fn id3v2(&self) -> Option<&Id3v2Tag> {
        self.id3v2.as_ref()
    }

    pub fn id3v1(&self) -> Option<&Id3v1Tag> {
        self.id3v1.as_ref()
    }

    fn render_metadata(&self, options: &WriteOptions) -> Result<Vec<u8>> {
        let mut blocks: Vec<(BlockType, Vec<u8>)> = self
            .blocks
            .iter()
            .map(|b| (b.block_type, b.data.clone()))
            .collect();
        if let Some(xiph) = &self.xiph {
            blocks.insert(1, (BlockType::VorbisComment, xiph.render(false)));
        }
        for picture in &self.pictures {
            blocks.push((BlockType::Picture, picture.render_flac()));
        }

        let mut out = Vec::new();
        for (block_type, data) in &blocks {
            if data.len() > MAX_BLOCK_SIZE {
                return Err(MetaError::ValueError(format!("{:?} block too large for FLAC", block_type)));
            }
            let header = BlockHeader {
                block_type: *block_type,
                is_last: false,
                size: data.len() as u32,
            };
            out.extend_from_slice(&header.render());
            out.extend_from_slice(data);
        }

        // Fill the old metadata area exactly when the new blocks fit.
        let old = self.metadata_size as usize;
        let padding = if out.len() == old {
            None
        } else if out.len() + BLOCK_HEADER_SIZE <= old {
            Some(old - out.len() - BLOCK_HEADER_SIZE)
        } else {
            Some(options.padding.min(MAX_BLOCK_SIZE))
        };
        match padding {
            Some(size) => {
                let header = BlockHeader {
                    block_type: BlockType::Padding,
                    is_last: true,
                    size: size as u32,
                };
                out.extend_from_slice(&header.render());
                out.resize(out.len() + size, 0);
            }
            None => mark_last(&mut out),
        }
        Ok(out)
    }
}

/// Set the last-block flag on the final header in `metadata`.
fn mark_last(metadata: &mut [u8]) {
    let mut pos = 0;
    let mut last = 0;
    while pos + BLOCK_HEADER_SIZE <= metadata.len() {
        last = pos;
        pos += BLOCK_HEADER_SIZE + BigEndian::read_u24(&metadata[pos + 1..pos + 4]) as usize;
    }
    if let Some(b) = metadata.get_mut(last) {
        *b |= 0x80;
    }
}

impl MediaFile for FlacFile {
    fn tag_file(&self) -> &TagFile {
        &self.file
    }

    fn tags(&mut self) -> CombinedTag<'_> {
        let xiph: &mut dyn Tag = self.xiph_mut();
        CombinedTag::new(vec![xiph])
    }

    fn save_with(&mut self, options: &WriteOptions) -> Result<()> {
        self.file.ensure_writable()?;
        let metadata = self.render_metadata(options)?;
        let start = self.flac_start + MAGIC.len() as u64;
        self.file.insert(&metadata, start, self.metadata_size)?;
        let delta = metadata.len() as i64 - self.metadata_size as i64;
        self.file.shift_invariant_region(start, delta);
        self.metadata_size = metadata.len() as u64;
        Ok(())
    }
}
