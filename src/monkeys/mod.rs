//! Monkey's Audio (`MAC `) with sandwich tags.

use log::trace;

use crate::common::bytes::ByteVector;
use crate::common::config::{ReadStyle, WriteOptions};
use crate::common::error::{MetaError, Result};
use crate::common::file::TagFile;
use crate::common::media::{AudioProperties, MediaFile};
use crate::common::sandwich::Sandwich;
use crate::common::stream::FileAbstraction;
use crate::common::tag::CombinedTag;

/// First version with a separate descriptor in front of the header.
pub const DESCRIPTOR_VERSION: u16 = 3980;
const HEADER_WINDOW: usize = 128;
const EXTRA_HIGH: u16 = 4000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MacHeader {
    pub version: u16,
    pub compression_level: u16,
    pub blocks_per_frame: u32,
    pub final_frame_blocks: u32,
    pub total_frames: u32,
    pub bits_per_sample: u16,
    pub channels: u16,
    pub sample_rate: u32,
}

impl MacHeader {
    pub fn parse(data: &ByteVector) -> Result<Self> {
        if !data.starts_with(b"MAC ") {
            return Err(MetaError::NoHeader("Monkey's Audio"));
        }
        let version = data.ushort_at(4, false);
        let header = if version >= DESCRIPTOR_VERSION {
            Self::parse_current(data, version)?
        } else {
            Self::parse_legacy(data, version)?
        };
        if header.sample_rate == 0 || header.channels == 0 {
            return Err(MetaError::corrupt("Monkey's Audio", "zero sample rate or channel count"));
        }
        Ok(header)
    }

    fn parse_current(data: &ByteVector, version: u16) -> Result<Self> {
        let descriptor_len = data.uint_at(8, false) as usize;
        let h = descriptor_len;
        if data.len() < h + 24 {
            return Err(MetaError::corrupt("Monkey's Audio", "header truncated"));
        }
        Ok(MacHeader {
            version,
            compression_level: data.ushort_at(h, false),
            blocks_per_frame: data.uint_at(h + 4, false),
            final_frame_blocks: data.uint_at(h + 8, false),
            total_frames: data.uint_at(h + 12, false),
            bits_per_sample: data.ushort_at(h + 16, false),
            channels: data.ushort_at(h + 18, false),
            sample_rate: data.uint_at(h + 20, false),
        })
    }

    fn parse_legacy(data: &ByteVector, version: u16) -> Result<Self> {
        if data.len() < 32 {
            return Err(MetaError::corrupt("Monkey's Audio", "header truncated"));
        }
        let compression_level = data.ushort_at(6, false);
        let flags = data.ushort_at(8, false);
        let blocks_per_frame = if version >= 3950 {
            73728 * 4
        } else if version >= 3900 || (version >= 3800 && compression_level == EXTRA_HIGH) {
            73728
        } else {
            9216
        };
        let bits_per_sample = if flags & 1 != 0 {
            8
        } else if flags & 8 != 0 {
            24
        } else {
            16
        };
        Ok(MacHeader {
            version,
            compression_level,
            blocks_per_frame,
            final_frame_blocks: data.uint_at(28, false),
            total_frames: data.uint_at(24, false),
            bits_per_sample,
            channels: data.ushort_at(10, false),
            sample_rate: data.uint_at(12, false),
        })
    }

    pub fn total_samples(&self) -> u64 {
        match self.total_frames {
            0 => 0,
            n => (n as u64 - 1) * self.blocks_per_frame as u64 + self.final_frame_blocks as u64,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonkeysProperties {
    pub audio: AudioProperties,
    pub version: u16,
    pub samples: u64,
}

pub struct MonkeysFile {
    file: TagFile,
    pub tags: Sandwich,
    properties: Option<MonkeysProperties>,
}

impl MonkeysFile {
    pub fn open(abstraction: impl FileAbstraction + 'static, style: ReadStyle) -> Result<Self> {
        let mut file = TagFile::new(abstraction);
        let tags = Sandwich::read(&mut file, style)?;
        let region = file
            .invariant_region()
            .ok_or_else(|| MetaError::corrupt("Monkey's Audio", "no audio stream"))?;
        let raw = file.read_at(region.start, HEADER_WINDOW.min(region.len() as usize))?;
        let header = MacHeader::parse(&raw)?;
        trace!("Monkey's Audio: version {}, {} frames", header.version, header.total_frames);

        let properties = style.properties.then(|| {
            let samples = header.total_samples();
            let mut audio = AudioProperties::from_samples(samples, header.sample_rate, region.len());
            audio.channels = header.channels.min(u8::MAX as u16) as u8;
            audio.bits_per_sample = header.bits_per_sample.min(u8::MAX as u16) as u8;
            MonkeysProperties {
                audio,
                version: header.version,
                samples,
            }
        });
        Ok(MonkeysFile {
            file,
            tags,
            properties,
        })
    }

    pub fn properties(&self) -> Option<&MonkeysProperties> {
        self.properties.as_ref()
    }
}

impl MediaFile for MonkeysFile {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::stream::MemoryFile;
    use crate::common::tag::Tag;
    use pretty_assertions::assert_eq;

    fn current() -> Vec<u8> {
        let mut data = b"MAC ".to_vec();
        data.extend_from_slice(&3990u16.to_le_bytes());
        data.extend_from_slice(&[0, 0]);
        data.extend_from_slice(&52u32.to_le_bytes());
        data.resize(52, 0);
        data.extend_from_slice(&2000u16.to_le_bytes());
        data.extend_from_slice(&0u16.to_le_bytes());
        data.extend_from_slice(&73728u32.to_le_bytes());
        data.extend_from_slice(&1000u32.to_le_bytes());
        data.extend_from_slice(&7u32.to_le_bytes());
        data.extend_from_slice(&16u16.to_le_bytes());
        data.extend_from_slice(&2u16.to_le_bytes());
        data.extend_from_slice(&44100u32.to_le_bytes());
        data.resize(400, 0x33);
        data
    }

    #[test]
    fn descriptor_header() {
        let file = MonkeysFile::open(MemoryFile::new("a.ape", current()), ReadStyle::default()).unwrap();
        let props = file.properties().unwrap();
        assert_eq!(props.version, 3990);
        assert_eq!(props.samples, 6 * 73728 + 1000);
        assert_eq!(props.audio.channels, 2);
        assert_eq!(props.audio.bits_per_sample, 16);
        assert_eq!(props.audio.duration_ms, (6 * 73728 + 1000) * 1000 / 44100);
    }

    #[test]
    fn legacy_header() {
        let mut data = b"MAC ".to_vec();
        data.extend_from_slice(&3970u16.to_le_bytes());
        data.extend_from_slice(&2000u16.to_le_bytes());
        data.extend_from_slice(&8u16.to_le_bytes());
        data.extend_from_slice(&1u16.to_le_bytes());
        data.extend_from_slice(&48000u32.to_le_bytes());
        data.extend_from_slice(&[0; 8]);
        data.extend_from_slice(&2u32.to_le_bytes());
        data.extend_from_slice(&500u32.to_le_bytes());
        data.resize(200, 0);
        let header = MacHeader::parse(&ByteVector::from(data)).unwrap();
        assert_eq!(header.blocks_per_frame, 73728 * 4);
        assert_eq!(header.bits_per_sample, 24);
        assert_eq!(header.channels, 1);
        assert_eq!(header.total_samples(), 73728 * 4 + 500);
    }

    #[test]
    fn tags_keep_the_header_in_place() {
        let mem = MemoryFile::new("a.ape", current());
        let mut file = MonkeysFile::open(mem.clone(), ReadStyle::NONE).unwrap();
        assert!(file.properties().is_none());
        file.tags.ape_mut().set_title("Etude");
        file.save().unwrap();
        let bytes = mem.contents();
        assert_eq!(&bytes[..400], current().as_slice());
        let mut reopened = MonkeysFile::open(mem, ReadStyle::default()).unwrap();
        assert_eq!(reopened.tags().title().as_deref(), Some("Etude"));
    }
}
