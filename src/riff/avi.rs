use byteorder::{ByteOrder, LittleEndian};
use log::debug;

use crate::common::error::{MetaError, Result};
use crate::common::media::AudioProperties;
use crate::riff::chunk::parse_chunks;
use crate::riff::wave::WaveFormat;

/// `avih`, the main AVI header.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AviHeader {
    pub micro_sec_per_frame: u32,
    pub max_bytes_per_sec: u32,
    pub total_frames: u32,
    pub streams: u32,
    pub width: u32,
    pub height: u32,
}

impl AviHeader {
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < 40 {
            return Err(MetaError::corrupt("AVI", "avih chunk truncated"));
        }
        let at = |i: usize| LittleEndian::read_u32(&data[i..i + 4]);
        Ok(AviHeader {
            micro_sec_per_frame: at(0),
            max_bytes_per_sec: at(4),
            total_frames: at(16),
            streams: at(24),
            width: at(32),
            height: at(36),
        })
    }

    pub fn duration_ms(&self) -> u64 {
        self.total_frames as u64 * self.micro_sec_per_frame as u64 / 1000
    }
}

/// One `strl` list, by stream kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AviStream {
    Video {
        handler: [u8; 4],
        compression: [u8; 4],
        width: i32,
        height: i32,
        bit_count: u16,
        /// Frames per `scale` seconds.
        rate: u32,
        scale: u32,
    },
    Audio(WaveFormat),
    Text {
        handler: [u8; 4],
    },
    Other {
        kind: [u8; 4],
    },
}

impl AviStream {
    /// Parse the sub-chunks of a `strl` list (after the list type).
    pub fn parse(body: &[u8]) -> Result<Self> {
        let chunks = parse_chunks(body, false)?;
        let strh = chunks
            .iter()
            .find(|(c, _)| &c.id == b"strh")
            .map(|(_, d)| *d)
            .ok_or_else(|| MetaError::corrupt("AVI", "stream list without strh"))?;
        if strh.len() < 28 {
            return Err(MetaError::corrupt("AVI", "strh chunk truncated"));
        }
        let strf = chunks.iter().find(|(c, _)| &c.id == b"strf").map(|(_, d)| *d);
        let fourcc = |d: &[u8], i: usize| [d[i], d[i + 1], d[i + 2], d[i + 3]];
        let kind = fourcc(strh, 0);
        let handler = fourcc(strh, 4);

        Ok(match &kind {
            b"vids" => {
                let strf = strf
                    .filter(|d| d.len() >= 20)
                    .ok_or_else(|| MetaError::corrupt("AVI", "video stream without BITMAPINFOHEADER"))?;
                AviStream::Video {
                    handler,
                    compression: fourcc(strf, 16),
                    width: LittleEndian::read_i32(&strf[4..8]),
                    height: LittleEndian::read_i32(&strf[8..12]),
                    bit_count: LittleEndian::read_u16(&strf[14..16]),
                    scale: LittleEndian::read_u32(&strh[20..24]),
                    rate: LittleEndian::read_u32(&strh[24..28]),
                }
            }
            b"auds" => {
                let strf = strf.ok_or_else(|| MetaError::corrupt("AVI", "audio stream without format"))?;
                AviStream::Audio(WaveFormat::parse(strf)?)
            }
            b"txts" => AviStream::Text { handler },
            _ => AviStream::Other { kind },
        })
    }
}

/// The `hdrl` list: main header and stream descriptions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AviInfo {
    pub header: AviHeader,
    pub streams: Vec<AviStream>,
}

impl AviInfo {
    /// Parse a `hdrl` list body (after the list type). Streams that fail
    /// to parse are skipped.
    pub fn parse(body: &[u8]) -> Result<Self> {
        let mut header = None;
        let mut streams = Vec::new();
        for (chunk, data) in parse_chunks(body, false)? {
            match &chunk.id {
                b"avih" => header = Some(AviHeader::parse(data)?),
                b"LIST" if data.starts_with(b"strl") => match AviStream::parse(&data[4..]) {
                    Ok(stream) => streams.push(stream),
                    Err(err) => debug!("AVI: skipping stream: {}", err),
                },
                _ => debug!("AVI: ignoring {} in hdrl", chunk.id_str()),
            }
        }
        let header = header.ok_or_else(|| MetaError::corrupt("AVI", "hdrl without avih"))?;
        Ok(AviInfo { header, streams })
    }

    /// Duration from the main header, audio facts from the first audio
    /// stream.
    pub fn properties(&self) -> AudioProperties {
        let mut props = AudioProperties {
            duration_ms: self.header.duration_ms(),
            ..Default::default()
        };
        if let Some(fmt) = self.streams.iter().find_map(|s| match s {
            AviStream::Audio(fmt) => Some(fmt),
            _ => None,
        }) {
            props.sample_rate = fmt.sample_rate;
            props.channels = fmt.channels as u8;
            props.bits_per_sample = fmt.bits_per_sample as u8;
            props.bitrate = fmt.avg_bytes_per_sec * 8 / 1000;
        }
        props
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::riff::chunk::render_chunk;
    use crate::riff::wave::tests::cd_audio;
    use pretty_assertions::assert_eq;

    fn list(kind: &[u8; 4], body: &[u8]) -> Vec<u8> {
        let mut payload = kind.to_vec();
        payload.extend_from_slice(body);
        render_chunk(b"LIST", &payload, false).unwrap()
    }

    /// A `hdrl` list body with one video and one audio stream: 250 frames
    /// at 40 ms.
    pub(crate) fn hdrl_body() -> Vec<u8> {
        let mut avih = vec![0u8; 56];
        avih[0..4].copy_from_slice(&40_000u32.to_le_bytes());
        avih[16..20].copy_from_slice(&250u32.to_le_bytes());
        avih[24..28].copy_from_slice(&2u32.to_le_bytes());
        avih[32..36].copy_from_slice(&320u32.to_le_bytes());
        avih[36..40].copy_from_slice(&240u32.to_le_bytes());

        let mut vids = vec![0u8; 56];
        vids[0..4].copy_from_slice(b"vids");
        vids[4..8].copy_from_slice(b"XVID");
        vids[20..24].copy_from_slice(&1u32.to_le_bytes());
        vids[24..28].copy_from_slice(&25u32.to_le_bytes());
        let mut bih = vec![0u8; 40];
        bih[4..8].copy_from_slice(&320i32.to_le_bytes());
        bih[8..12].copy_from_slice(&240i32.to_le_bytes());
        bih[14..16].copy_from_slice(&24u16.to_le_bytes());
        bih[16..20].copy_from_slice(b"XVID");
        let video = [render_chunk(b"strh", &vids, false).unwrap(), render_chunk(b"strf", &bih, false).unwrap()].concat();

        let mut auds = vec![0u8; 56];
        auds[0..4].copy_from_slice(b"auds");
        let audio = [
            render_chunk(b"strh", &auds, false).unwrap(),
            render_chunk(b"strf", &cd_audio().render(), false).unwrap(),
        ]
        .concat();

        [render_chunk(b"avih", &avih, false).unwrap(), list(b"strl", &video), list(b"strl", &audio)].concat()
    }

    #[test]
    fn header_list_yields_typed_streams() {
        let info = AviInfo::parse(&hdrl_body()).unwrap();
        assert_eq!(info.header.total_frames, 250);
        assert_eq!(info.streams.len(), 2);
        assert!(matches!(
            info.streams[0],
            AviStream::Video { width: 320, height: 240, rate: 25, scale: 1, .. }
        ));
        assert_eq!(info.streams[1], AviStream::Audio(cd_audio()));

        let props = info.properties();
        assert_eq!(props.duration_ms, 10_000);
        assert_eq!(props.sample_rate, 44100);
    }

    #[test]
    fn missing_main_header_is_corrupt() {
        assert!(AviInfo::parse(&[]).unwrap_err().is_corrupt());
    }
}
