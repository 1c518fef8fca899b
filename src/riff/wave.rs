use byteorder::{ByteOrder, LittleEndian};

use crate::common::error::{MetaError, Result};
use crate::common::media::AudioProperties;

pub const FORMAT_PCM: u16 = 0x0001;
pub const FORMAT_IEEE_FLOAT: u16 = 0x0003;
pub const FORMAT_EXTENSIBLE: u16 = 0xFFFE;

/// `WAVEFORMATEX`, the body of a WAV `fmt ` chunk and of an AVI audio
/// stream's `strf` chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaveFormat {
    /// For `WAVE_FORMAT_EXTENSIBLE` this is the sub-format's tag.
    pub format_tag: u16,
    pub channels: u16,
    pub sample_rate: u32,
    pub avg_bytes_per_sec: u32,
    pub block_align: u16,
    pub bits_per_sample: u16,
}

impl WaveFormat {
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < 16 {
            return Err(MetaError::corrupt("WAV", format!("format chunk of {} bytes", data.len())));
        }
        let mut format_tag = LittleEndian::read_u16(&data[0..2]);
        if format_tag == FORMAT_EXTENSIBLE && data.len() >= 26 {
            format_tag = LittleEndian::read_u16(&data[24..26]);
        }
        Ok(WaveFormat {
            format_tag,
            channels: LittleEndian::read_u16(&data[2..4]),
            sample_rate: LittleEndian::read_u32(&data[4..8]),
            avg_bytes_per_sec: LittleEndian::read_u32(&data[8..12]),
            block_align: LittleEndian::read_u16(&data[12..14]),
            bits_per_sample: LittleEndian::read_u16(&data[14..16]),
        })
    }

    pub fn is_pcm(&self) -> bool {
        self.format_tag == FORMAT_PCM || self.format_tag == FORMAT_IEEE_FLOAT
    }

    /// Properties for `data_size` bytes of audio. `fact_samples` is the
    /// sample count from a `fact` chunk, which compressed formats carry.
    pub fn properties(&self, data_size: u64, fact_samples: Option<u32>) -> AudioProperties {
        let samples = if self.is_pcm() && self.block_align > 0 {
            Some(data_size / self.block_align as u64)
        } else {
            fact_samples.map(u64::from)
        };
        let mut props = AudioProperties {
            sample_rate: self.sample_rate,
            channels: self.channels as u8,
            bits_per_sample: self.bits_per_sample as u8,
            bitrate: self.avg_bytes_per_sec * 8 / 1000,
            ..Default::default()
        };
        props.duration_ms = match samples {
            Some(samples) if self.sample_rate > 0 => samples * 1000 / self.sample_rate as u64,
            _ if self.avg_bytes_per_sec > 0 => data_size * 1000 / self.avg_bytes_per_sec as u64,
            _ => 0,
        };
        props
    }

    pub fn render(&self) -> Vec<u8> {
        let mut out = vec![0u8; 16];
        LittleEndian::write_u16(&mut out[0..2], self.format_tag);
        LittleEndian::write_u16(&mut out[2..4], self.channels);
        LittleEndian::write_u32(&mut out[4..8], self.sample_rate);
        LittleEndian::write_u32(&mut out[8..12], self.avg_bytes_per_sec);
        LittleEndian::write_u16(&mut out[12..14], self.block_align);
        LittleEndian::write_u16(&mut out[14..16], self.bits_per_sample);
        out
    }
}
