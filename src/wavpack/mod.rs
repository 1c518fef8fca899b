//! WavPack with sandwich tags.
//!
//! Properties come from the 32-byte `wvpk` block headers at the start of
//! the stream. Multichannel audio is stored as a run of stereo and mono
//! blocks sharing one block index, so the first run is walked to count
//! channels.

use log::{debug, trace};

use crate::common::bytes::ByteVector;
use crate::common::config::{ReadStyle, WriteOptions};
use crate::common::error::{MetaError, Result};
use crate::common::file::TagFile;
use crate::common::media::{AudioProperties, MediaFile};
use crate::common::sandwich::Sandwich;
use crate::common::stream::FileAbstraction;
use crate::common::tag::CombinedTag;

pub const BLOCK_HEADER_SIZE: usize = 32;

const SAMPLE_RATES: [u32; 15] = [
    6000, 8000, 9600, 11025, 12000, 16000, 22050, 24000, 32000, 44100, 48000, 64000, 88200, 96000, 192000,
];

const FLAG_MONO: u32 = 0x4;
const FLAG_INITIAL: u32 = 0x800;
const FLAG_FINAL: u32 = 0x1000;
/// Blocks of the first run read before giving up on the final flag.
const MAX_RUN: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    /// Block size minus eight.
    pub size: u32,
    pub version: u16,
    pub total_samples: Option<u32>,
    pub block_index: u32,
    pub block_samples: u32,
    pub flags: u32,
}

impl BlockHeader {
    pub fn parse(data: &ByteVector) -> Result<Self> {
        if data.len() < BLOCK_HEADER_SIZE || !data.starts_with(b"wvpk") {
            return Err(MetaError::NoHeader("WavPack"));
        }
        let total = data.uint_at(12, false);
        let header = BlockHeader {
            size: data.uint_at(4, false),
            version: data.ushort_at(8, false),
            total_samples: (total != u32::MAX).then_some(total),
            block_index: data.uint_at(16, false),
            block_samples: data.uint_at(20, false),
            flags: data.uint_at(24, false),
        };
        if (header.size as usize) < BLOCK_HEADER_SIZE - 8 {
            return Err(MetaError::corrupt("WavPack", format!("block size {}", header.size)));
        }
        Ok(header)
    }

    /// Bytes from this header to the next one.
    pub fn block_len(&self) -> u64 {
        self.size as u64 + 8
    }

    pub fn bits_per_sample(&self) -> u8 {
        ((self.flags & 3) as u8 + 1) * 8
    }

    pub fn channels(&self) -> u8 {
        if self.flags & FLAG_MONO != 0 {
            1
        } else {
            2
        }
    }

    /// `None` for the custom rate index.
    pub fn sample_rate(&self) -> Option<u32> {
        SAMPLE_RATES.get(((self.flags >> 23) & 0xF) as usize).copied()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WavPackProperties {
    pub audio: AudioProperties,
    pub version: u16,
    pub samples: Option<u32>,
}

pub struct WavPackFile {
    file: TagFile,
    pub tags: Sandwich,
    properties: Option<WavPackProperties>,
}

impl WavPackFile {
    pub fn open(abstraction: impl FileAbstraction + 'static, style: ReadStyle) -> Result<Self> {
        let mut file = TagFile::new(abstraction);
        let tags = Sandwich::read(&mut file, style)?;
        let region = file
            .invariant_region()
            .ok_or_else(|| MetaError::corrupt("WavPack", "no audio stream"))?;
        let first = BlockHeader::parse(&file.read_at(region.start, BLOCK_HEADER_SIZE)?)?;
        if !(0x402..=0x410).contains(&first.version) {
            return Err(MetaError::unsupported("WavPack", format!("version {:#x}", first.version)));
        }
        let properties = if style.properties {
            Some(read_properties(&mut file, region.start, region.end, first)?)
        } else {
            None
        };
        Ok(WavPackFile {
            file,
            tags,
            properties,
        })
    }

    pub fn properties(&self) -> Option<&WavPackProperties> {
        self.properties.as_ref()
    }
}

fn read_properties(file: &mut TagFile, start: u64, end: u64, first: BlockHeader) -> Result<WavPackProperties> {
    let mut channels = 0u8;
    let mut block = first;
    let mut pos = start;
    for _ in 0..MAX_RUN {
        trace!("WavPack: block at {}, flags {:#x}", pos, block.flags);
        channels = channels.saturating_add(block.channels());
        if block.flags & FLAG_FINAL != 0 {
            break;
        }
        pos += block.block_len();
        if pos + BLOCK_HEADER_SIZE as u64 > end {
            break;
        }
        let next = match BlockHeader::parse(&file.read_at(pos, BLOCK_HEADER_SIZE)?) {
            Ok(next) => next,
            Err(err) => {
                debug!("WavPack: first block run ends early: {}", err);
                break;
            }
        };
        if next.block_index != first.block_index || next.flags & FLAG_INITIAL != 0 {
            break;
        }
        block = next;
    }

    let rate = first.sample_rate().unwrap_or(0);
    let samples = first.total_samples;
    let mut audio = AudioProperties::from_samples(samples.unwrap_or(0) as u64, rate, end - start);
    audio.channels = channels;
    audio.bits_per_sample = first.bits_per_sample();
    Ok(WavPackProperties {
        audio,
        version: first.version,
        samples,
    })
}

impl MediaFile for WavPackFile {
    fn tag_file(&self) -> &TagFile {
        &self.file
    }

    fn tags(&mut self) -> CombinedTag<'_> {
        self.tags.combined()
    }

    fn save_with(&mut self, options: &WriteOptions) -> Result<()> {
        self.tags.save(&mut self.file, options)
    }
}
