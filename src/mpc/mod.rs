//! MusePack SV7 and SV8 streams with sandwich tags.

use log::{debug, trace};

use crate::common::bytes::ByteVector;
use crate::common::config::{ReadStyle, WriteOptions};
use crate::common::error::{MetaError, Result};
use crate::common::file::TagFile;
use crate::common::media::{AudioProperties, MediaFile};
use crate::common::sandwich::Sandwich;
use crate::common::stream::FileAbstraction;
use crate::common::tag::CombinedTag;

const SAMPLE_RATES: [u32; 4] = [44100, 48000, 37800, 32000];
const SV7_FRAME_SAMPLES: u64 = 1152;
/// SV8 packets read before giving up on finding the stream header.
const MAX_PACKETS: usize = 32;
const HEADER_WINDOW: usize = 1024;

/// Base-128 size, most significant group first, high bit set on every byte
/// but the last. Returns the value and the number of bytes used.
pub fn read_size(data: &[u8]) -> Option<(u64, usize)> {
    let mut value = 0u64;
    for (i, &b) in data.iter().enumerate().take(9) {
        value = (value << 7) | (b & 0x7F) as u64;
        if b & 0x80 == 0 {
            return Some((value, i + 1));
        }
    }
    None
}

pub fn encode_size(mut value: u64) -> Vec<u8> {
    let mut out = vec![(value & 0x7F) as u8];
    value >>= 7;
    while value > 0 {
        out.push((value & 0x7F) as u8 | 0x80);
        value >>= 7;
    }
    out.reverse();
    out
}

/// ReplayGain in dB as stored.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Gain {
    pub title: Option<f32>,
    pub album: Option<f32>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MpcProperties {
    pub audio: AudioProperties,
    pub version: u8,
    pub samples: u64,
    pub gain: Gain,
}

fn sample_rate(index: u32) -> u32 {
    SAMPLE_RATES[(index & 3) as usize]
}

fn parse_sv7(header: &ByteVector, stream_bytes: u64) -> Result<MpcProperties> {
    if header.len() < 20 {
        return Err(MetaError::corrupt("MusePack", "SV7 header truncated"));
    }
    let version = header[3] & 0x0F;
    if version != 7 {
        return Err(MetaError::unsupported("MusePack", format!("stream version {}", version)));
    }
    let frames = header.uint_at(4, false) as u64;
    let flags = header.uint_at(8, false);
    let rate = sample_rate(flags >> 16);
    let samples = (frames * SV7_FRAME_SAMPLES).saturating_sub(SV7_FRAME_SAMPLES / 2);
    let gain_of = |offset: usize| {
        let raw = header.ushort_at(offset, false) as i16;
        (raw != 0).then(|| raw as f32 / 100.0)
    };
    let mut audio = AudioProperties::from_samples(samples, rate, stream_bytes);
    audio.channels = 2;
    Ok(MpcProperties {
        audio,
        version,
        samples,
        gain: Gain {
            title: gain_of(14),
            album: gain_of(18),
        },
    })
}

/// Walk SV8 packets after `MPCK` until the audio starts.
fn parse_sv8(data: &[u8], stream_bytes: u64) -> Result<MpcProperties> {
    let mut pos = 4usize;
    let mut found: Option<MpcProperties> = None;
    let mut gain = Gain::default();
    for _ in 0..MAX_PACKETS {
        let Some(key) = data.get(pos..pos + 2) else {
            break;
        };
        if !key.iter().all(u8::is_ascii_uppercase) {
            return Err(MetaError::corrupt("MusePack", format!("invalid packet key at {}", pos)));
        }
        let (size, width) = read_size(&data[pos + 2..])
            .ok_or_else(|| MetaError::corrupt("MusePack", "packet size truncated"))?;
        let body_start = pos + 2 + width;
        let end = pos + size as usize;
        if (size as usize) < 2 + width {
            return Err(MetaError::corrupt("MusePack", format!("packet at {} smaller than its header", pos)));
        }
        trace!("MusePack: packet {} of {} bytes", String::from_utf8_lossy(key), size);
        match key {
            b"SH" => {
                let body = data
                    .get(body_start..end.min(data.len()))
                    .ok_or_else(|| MetaError::corrupt("MusePack", "stream header truncated"))?;
                found = Some(parse_stream_header(body, stream_bytes)?);
            }
            b"RG" => {
                if let Some(body) = data.get(body_start..end) {
                    if body.len() >= 9 && body[0] == 1 {
                        let at = |i: usize| i16::from_be_bytes([body[i], body[i + 1]]);
                        gain.title = Some(at(1)).filter(|&g| g != 0).map(|g| g as f32 / 256.0);
                        gain.album = Some(at(5)).filter(|&g| g != 0).map(|g| g as f32 / 256.0);
                    }
                }
            }
            b"AP" | b"SE" => break,
            _ => debug!("MusePack: skipping packet {}", String::from_utf8_lossy(key)),
        }
        pos = end;
    }
    let mut props = found.ok_or_else(|| MetaError::corrupt("MusePack", "no stream header packet"))?;
    props.gain = gain;
    Ok(props)
}

fn parse_stream_header(body: &[u8], stream_bytes: u64) -> Result<MpcProperties> {
    // CRC, version, sample count, beginning silence, two packed bytes.
    let truncated = || MetaError::corrupt("MusePack", "stream header truncated");
    let version = *body.get(4).ok_or_else(truncated)?;
    if version != 8 {
        return Err(MetaError::unsupported("MusePack", format!("stream version {}", version)));
    }
    let (samples, w1) = read_size(body.get(5..).ok_or_else(truncated)?).ok_or_else(truncated)?;
    let (silence, w2) = read_size(body.get(5 + w1..).ok_or_else(truncated)?).ok_or_else(truncated)?;
    let packed = body.get(5 + w1 + w2..7 + w1 + w2).ok_or_else(truncated)?;
    let rate = sample_rate((packed[0] >> 5) as u32);
    let channels = (packed[1] >> 4) + 1;
    let samples = samples.saturating_sub(silence);
    let mut audio = AudioProperties::from_samples(samples, rate, stream_bytes);
    audio.channels = channels;
    Ok(MpcProperties {
        audio,
        version,
        samples,
        gain: Gain::default(),
    })
}

pub struct MpcFile {
    file: TagFile,
    pub tags: Sandwich,
    properties: Option<MpcProperties>,
}

impl MpcFile {
    pub fn open(abstraction: impl FileAbstraction + 'static, style: ReadStyle) -> Result<Self> {
        let mut file = TagFile::new(abstraction);
        let tags = Sandwich::read(&mut file, style)?;
        let region = file
            .invariant_region()
            .ok_or_else(|| MetaError::corrupt("MusePack", "no audio stream"))?;
        let header = file.read_at(region.start, HEADER_WINDOW.min(region.len() as usize))?;
        let sv8 = header.starts_with(b"MPCK");
        if !sv8 && !header.starts_with(b"MP+") {
            return Err(MetaError::NoHeader("MusePack"));
        }
        let properties = if style.properties {
            let parsed = if sv8 {
                parse_sv8(&header, region.len())
            } else {
                parse_sv7(&header, region.len())
            };
            match parsed {
                Ok(props) => Some(props),
                Err(err) if err.is_unsupported() => {
                    debug!("{}: {}", file.name(), err);
                    None
                }
                Err(err) => return Err(err),
            }
        } else {
            None
        };
        Ok(MpcFile {
            file,
            tags,
            properties,
        })
    }

    pub fn properties(&self) -> Option<&MpcProperties> {
        self.properties.as_ref()
    }
}

impl MediaFile for MpcFile {
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

    fn sv7() -> Vec<u8> {
        let mut data = b"MP+\x17".to_vec();
        data.extend_from_slice(&100u32.to_le_bytes());
        data.extend_from_slice(&(1u32 << 16).to_le_bytes());
        data.extend_from_slice(&[0, 0]);
        data.extend_from_slice(&(-350i16).to_le_bytes());
        data.extend_from_slice(&[0; 4]);
        data.resize(4000, 0x11);
        data
    }

    fn packet(key: &[u8; 2], body: &[u8]) -> Vec<u8> {
        let mut size = 2 + 1 + body.len();
        if encode_size(size as u64).len() > 1 {
            size += 1;
        }
        let mut out = key.to_vec();
        out.extend_from_slice(&encode_size(size as u64));
        out.extend_from_slice(body);
        out
    }

    fn sv8() -> Vec<u8> {
        let mut sh = vec![0, 0, 0, 0, 8];
        sh.extend_from_slice(&encode_size(441_000 + 1000));
        sh.extend_from_slice(&encode_size(1000));
        sh.extend_from_slice(&[0b000_00000, 0b0001_0000]);
        let mut data = b"MPCK".to_vec();
        data.extend_from_slice(&packet(b"SH", &sh));
        data.extend_from_slice(&packet(b"RG", &[1, 0xFC, 0x00, 0, 0, 0, 0, 0, 0]));
        data.extend_from_slice(&packet(b"AP", &[0x22; 40]));
        data
    }

    #[test]
    fn base128_sizes() {
        assert_eq!(read_size(&[0x05]), Some((5, 1)));
        assert_eq!(read_size(&[0x81, 0x00]), Some((128, 2)));
        assert_eq!(read_size(&[0x80, 0x80]), None);
        assert_eq!(encode_size(128), vec![0x81, 0x00]);
        assert_eq!(encode_size(0x3FFF), vec![0xFF, 0x7F]);
    }

    #[test]
    fn sv7_header() {
        let file = MpcFile::open(MemoryFile::new("a.mpc", sv7()), ReadStyle::default()).unwrap();
        let props = file.properties().unwrap();
        assert_eq!(props.version, 7);
        assert_eq!(props.audio.sample_rate, 48000);
        assert_eq!(props.samples, 100 * 1152 - 576);
        assert_eq!(props.audio.duration_ms, (100 * 1152 - 576) * 1000 / 48000);
        assert_eq!(props.gain.title, Some(-3.5));
        assert_eq!(props.gain.album, None);
    }

    #[test]
    fn sv8_packets() {
        let file = MpcFile::open(MemoryFile::new("a.mpc", sv8()), ReadStyle::default()).unwrap();
        let props = file.properties().unwrap();
        assert_eq!(props.version, 8);
        assert_eq!(props.samples, 441_000);
        assert_eq!(props.audio.sample_rate, 44100);
        assert_eq!(props.audio.channels, 2);
        assert_eq!(props.audio.duration_ms, 10_000);
        assert_eq!(props.gain.title, Some(-4.0));
    }

    #[test]
    fn tags_around_the_stream() {
        let mem = MemoryFile::new("a.mpc", sv8());
        let mut file = MpcFile::open(mem.clone(), ReadStyle::default()).unwrap();
        file.tags.ape_mut().set_title("Sonata");
        file.save().unwrap();
        assert!(mem.contents().starts_with(b"MPCK"));

        let mut reopened = MpcFile::open(mem, ReadStyle::default()).unwrap();
        assert_eq!(reopened.tags().title().as_deref(), Some("Sonata"));
        assert_eq!(reopened.properties().unwrap().samples, 441_000);
    }

    #[test]
    fn other_streams_are_rejected() {
        let err = MpcFile::open(MemoryFile::new("a.mpc", vec![0x42; 64]), ReadStyle::NONE).err();
        assert!(matches!(err, Some(MetaError::NoHeader("MusePack"))));
    }
}
