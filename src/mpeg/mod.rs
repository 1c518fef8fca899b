//! MPEG audio (MP1/MP2/MP3) with sandwich tags.

pub mod header;

use log::debug;

use crate::common::config::{ReadStyle, WriteOptions};
use crate::common::error::Result;
use crate::common::file::TagFile;
use crate::common::media::{AudioProperties, MediaFile};
use crate::common::sandwich::Sandwich;
use crate::common::stream::FileAbstraction;
use crate::common::tag::CombinedTag;
use crate::mpeg::header::{find_sync, ChannelMode, FrameHeader, Layer, MpegVersion};

/// How far into the audio to look for the first frame.
const SYNC_SEARCH: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MpegProperties {
    pub audio: AudioProperties,
    pub version: MpegVersion,
    pub layer: Layer,
    pub channel_mode: ChannelMode,
    pub protected: bool,
    /// Offset of the first frame.
    pub first_frame: u64,
}

impl MpegProperties {
    /// Constant-bitrate estimate from the first frame.
    fn from_first_frame(frame: &FrameHeader, offset: u64, stream_bytes: u64) -> Self {
        let duration_ms = stream_bytes * 8 / frame.bitrate as u64;
        MpegProperties {
            audio: AudioProperties {
                duration_ms,
                bitrate: frame.bitrate,
                sample_rate: frame.sample_rate,
                channels: frame.channels(),
                bits_per_sample: 0,
            },
            version: frame.version,
            layer: frame.layer,
            channel_mode: frame.channel_mode,
            protected: frame.protected,
            first_frame: offset,
        }
    }
}

pub struct MpegFile {
    file: TagFile,
    pub tags: Sandwich,
    properties: Option<MpegProperties>,
}

impl MpegFile {
    pub fn open(abstraction: impl FileAbstraction + 'static, style: ReadStyle) -> Result<Self> {
        let mut file = TagFile::new(abstraction);
        let tags = Sandwich::read(&mut file, style)?;
        let properties = if style.properties {
            read_properties(&mut file)?
        } else {
            None
        };
        Ok(MpegFile {
            file,
            tags,
            properties,
        })
    }

    pub fn properties(&self) -> Option<&MpegProperties> {
        self.properties.as_ref()
    }
}

fn read_properties(file: &mut TagFile) -> Result<Option<MpegProperties>> {
    let Some(region) = file.invariant_region() else {
        return Ok(None);
    };
    let window = (region.len() as usize).min(SYNC_SEARCH);
    let data = file.read_at(region.start, window)?;
    match find_sync(&data, 0) {
        Some((offset, frame)) => {
            let first = region.start + offset as u64;
            Ok(Some(MpegProperties::from_first_frame(&frame, first, region.end - first)))
        }
        None => {
            debug!("{}: no MPEG frame sync in the first {} bytes", file.name(), window);
            Ok(None)
        }
    }
}

impl MediaFile for MpegFile {
    fn tag_file(&self) -> &TagFile {
        &self.file
    }

    fn tags(&mut self) -> CombinedTag<'_> {
        self.tags.combined()
    }

    fn save_with(&mut self, options: &WriteOptions) -> Result<()> {
        self.tags.save(&mut self.file, options)?;
        if let Some(props) = self.properties.as_mut() {
            if let Some(region) = self.file.invariant_region() {
                props.first_frame = region.start;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::stream::MemoryFile;
    use crate::common::tag::Tag;

    fn frames(count: usize) -> Vec<u8> {
        let mut data = Vec::new();
        for _ in 0..count {
            let mut frame = vec![0x55u8; 417];
            frame[..4].copy_from_slice(&[0xFF, 0xFB, 0x90, 0x00]);
            data.extend_from_slice(&frame);
        }
        data
    }

    #[test]
    fn properties_of_bare_stream() {
        let file = MpegFile::open(MemoryFile::new("a.mp3", frames(10)), ReadStyle::default()).unwrap();
        let props = file.properties().unwrap();
        assert_eq!(props.audio.sample_rate, 44100);
        assert_eq!(props.audio.bitrate, 128);
        assert_eq!(props.first_frame, 0);
        assert_eq!(props.audio.duration_ms, 4170 * 8 / 128);
    }

    #[test]
    fn tagging_moves_the_first_frame() {
        let mem = MemoryFile::new("a.mp3", frames(4));
        let mut file = MpegFile::open(mem.clone(), ReadStyle::default()).unwrap();
        file.tags.id3v2_mut().set_artist("Someone");
        file.save().unwrap();

        let reopened = MpegFile::open(mem.clone(), ReadStyle::default()).unwrap();
        let props = reopened.properties().unwrap();
        assert!(props.first_frame > 0);
        assert_eq!(props.first_frame, file.properties().unwrap().first_frame);
        assert_eq!(&mem.contents()[props.first_frame as usize..], frames(4).as_slice());
        assert_eq!(reopened.tags.id3v2().and_then(|t| t.artist()).as_deref(), Some("Someone"));
    }

    #[test]
    fn no_properties_when_not_asked() {
        let file = MpegFile::open(MemoryFile::new("a.mp3", frames(2)), ReadStyle::NONE).unwrap();
        assert!(file.properties().is_none());
    }
}
