use byteorder::{BigEndian, ByteOrder};

use crate::common::error::{MetaError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MpegVersion {
    V1,
    V2,
    V25,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layer {
    One,
    Two,
    Three,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelMode {
    Stereo,
    JointStereo,
    DualChannel,
    Mono,
}

// [V1 | V2/V2.5][layer][index], kbit/s
const BITRATES: [[[u16; 16]; 3]; 2] = [
    [
        [0, 32, 64, 96, 128, 160, 192, 224, 256, 288, 320, 352, 384, 416, 448, 0],
        [0, 32, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320, 384, 0],
        [0, 32, 40, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320, 0],
    ],
    [
        [0, 32, 48, 56, 64, 80, 96, 112, 128, 144, 160, 176, 192, 224, 256, 0],
        [0, 8, 16, 24, 32, 40, 48, 56, 64, 80, 96, 112, 128, 144, 160, 0],
        [0, 8, 16, 24, 32, 40, 48, 56, 64, 80, 96, 112, 128, 144, 160, 0],
    ],
];

const SAMPLE_RATES: [[u32; 3]; 3] = [
    [44100, 48000, 32000],
    [22050, 24000, 16000],
    [11025, 12000, 8000],
];

/// A decoded 4-byte MPEG audio frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub version: MpegVersion,
    pub layer: Layer,
    pub protected: bool,
    pub bitrate: u32,
    pub sample_rate: u32,
    pub padding: bool,
    pub channel_mode: ChannelMode,
    pub frame_length: u32,
    pub samples_per_frame: u32,
}

impl FrameHeader {
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < 4 {
            return Err(MetaError::corrupt("MPEG", "frame header truncated"));
        }
        let h = BigEndian::read_u32(data);
        if h & 0xFFE0_0000 != 0xFFE0_0000 {
            return Err(MetaError::corrupt("MPEG", "no frame sync"));
        }

        let version = match (h >> 19) & 3 {
            0 => MpegVersion::V25,
            2 => MpegVersion::V2,
            3 => MpegVersion::V1,
            _ => return Err(MetaError::corrupt("MPEG", "reserved version")),
        };
        let layer = match (h >> 17) & 3 {
            1 => Layer::Three,
            2 => Layer::Two,
            3 => Layer::One,
            _ => return Err(MetaError::corrupt("MPEG", "reserved layer")),
        };
        let v = usize::from(version != MpegVersion::V1);
        let l = match layer {
            Layer::One => 0,
            Layer::Two => 1,
            Layer::Three => 2,
        };

        let bitrate = BITRATES[v][l][((h >> 12) & 0xF) as usize] as u32;
        if bitrate == 0 {
            return Err(MetaError::corrupt("MPEG", "free or bad bitrate"));
        }
        let sr_index = ((h >> 10) & 3) as usize;
        if sr_index == 3 {
            return Err(MetaError::corrupt("MPEG", "reserved sample rate"));
        }
        let sample_rate = SAMPLE_RATES[match version {
            MpegVersion::V1 => 0,
            MpegVersion::V2 => 1,
            MpegVersion::V25 => 2,
        }][sr_index];

        let padding = (h >> 9) & 1 != 0;
        let channel_mode = match (h >> 6) & 3 {
            0 => ChannelMode::Stereo,
            1 => ChannelMode::JointStereo,
            2 => ChannelMode::DualChannel,
            _ => ChannelMode::Mono,
        };
        let samples_per_frame = match (layer, v) {
            (Layer::One, _) => 384,
            (Layer::Three, 1) => 576,
            _ => 1152,
        };
        let frame_length = match layer {
            Layer::One => (12 * bitrate * 1000 / sample_rate + u32::from(padding)) * 4,
            _ => samples_per_frame / 8 * bitrate * 1000 / sample_rate + u32::from(padding),
        };

        Ok(FrameHeader {
            version,
            layer,
            protected: (h >> 16) & 1 == 0,
            bitrate,
            sample_rate,
            padding,
            channel_mode,
            frame_length,
            samples_per_frame,
        })
    }

    pub fn channels(&self) -> u8 {
        if self.channel_mode == ChannelMode::Mono {
            1
        } else {
            2
        }
    }
}

/// First offset at or after `start` holding a frame header whose
/// successor also syncs (or that runs to the end of `data`).
pub fn find_sync(data: &[u8], start: usize) -> Option<(usize, FrameHeader)> {
    let mut pos = start;
    while pos + 4 <= data.len() {
        pos += memchr::memchr(0xFF, &data[pos..])?;
        if pos + 4 > data.len() {
            return None;
        }
        if data[pos + 1] & 0xE0 == 0xE0 {
            if let Ok(frame) = FrameHeader::parse(&data[pos..pos + 4]) {
                let next = pos + frame.frame_length as usize;
                if next + 2 > data.len() || (data[next] == 0xFF && data[next + 1] & 0xE0 == 0xE0) {
                    return Some((pos, frame));
                }
            }
        }
        pos += 1;
    }
    None
}
