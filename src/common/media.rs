use crate::common::config::WriteOptions;
use crate::common::error::Result;
use crate::common::file::TagFile;
use crate::common::tag::CombinedTag;

/// Codec facts read from a stream header. Fields a format does not encode
/// stay at zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AudioProperties {
    pub duration_ms: u64,
    /// kbit/s
    pub bitrate: u32,
    pub sample_rate: u32,
    pub channels: u8,
    pub bits_per_sample: u8,
}

impl AudioProperties {
    /// Duration from a sample count, bitrate from the stream size.
    pub fn from_samples(samples: u64, sample_rate: u32, stream_bytes: u64) -> Self {
        let mut props = AudioProperties {
            sample_rate,
            ..Default::default()
        };
        if sample_rate > 0 {
            props.duration_ms = samples * 1000 / sample_rate as u64;
        }
        if props.duration_ms > 0 {
            props.bitrate = (stream_bytes * 8 / props.duration_ms) as u32;
        }
        props
    }
}

/// A parsed file that can hand out its tags and write them back.
pub trait MediaFile {
    fn tag_file(&self) -> &TagFile;

    /// All tags of the file, highest priority first.
    fn tags(&mut self) -> CombinedTag<'_>;

    fn save_with(&mut self, options: &WriteOptions) -> Result<()>;

    fn save(&mut self) -> Result<()> {
        self.save_with(&WriteOptions::default())
    }
}
