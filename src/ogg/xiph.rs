use byteorder::{ByteOrder, LittleEndian};
use log::debug;

use crate::common::config::{ReadStyle, WriteOptions};
use crate::common::error::{MetaError, Result};
use crate::common::file::TagFile;
use crate::common::media::{AudioProperties, MediaFile};
use crate::common::stream::FileAbstraction;
use crate::common::tag::{CombinedTag, Tag};
use crate::ogg::{last_granule, HeaderPackets};
use crate::vorbis::XiphComment;

/// Codecs whose second header packet is a Xiph comment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OggCodec {
    Vorbis,
    Opus,
    Speex,
}

impl OggCodec {
    fn detect(id_packet: &[u8]) -> Result<Self> {
        if id_packet.starts_with(b"\x01vorbis") {
            Ok(OggCodec::Vorbis)
        } else if id_packet.starts_with(b"OpusHead") {
            Ok(OggCodec::Opus)
        } else if id_packet.starts_with(b"Speex   ") {
            Ok(OggCodec::Speex)
        } else {
            Err(MetaError::unsupported("Ogg", "unknown codec in identification packet"))
        }
    }

    /// Number of header packets, including the comment packet.
    fn header_count(self, id_packet: &[u8]) -> usize {
        match self {
            OggCodec::Vorbis => 3,
            OggCodec::Opus => 2,
            OggCodec::Speex => {
                let extra = if id_packet.len() >= 80 {
                    LittleEndian::read_u32(&id_packet[76..80]) as usize
                } else {
                    0
                };
                2 + extra.min(16)
            }
        }
    }

    fn comment_prefix(self) -> &'static [u8] {
        match self {
            OggCodec::Vorbis => b"\x03vorbis",
            OggCodec::Opus => b"OpusTags",
            OggCodec::Speex => b"",
        }
    }

    fn framing(self) -> bool {
        self == OggCodec::Vorbis
    }

    fn properties(self, id: &[u8], granule: Option<i64>, stream_bytes: u64) -> Result<AudioProperties> {
        let short = || MetaError::corrupt("Ogg", "identification packet too short");
        let samples = |granule: i64| u64::try_from(granule).unwrap_or(0);
        match self {
            OggCodec::Vorbis => {
                if id.len() < 28 {
                    return Err(short());
                }
                let rate = LittleEndian::read_u32(&id[12..16]);
                let mut props = AudioProperties::from_samples(granule.map_or(0, samples), rate, stream_bytes);
                props.channels = id[11];
                let nominal = LittleEndian::read_i32(&id[20..24]);
                if props.bitrate == 0 && nominal > 0 {
                    props.bitrate = nominal as u32 / 1000;
                }
                Ok(props)
            }
            OggCodec::Opus => {
                if id.len() < 19 {
                    return Err(short());
                }
                let pre_skip = LittleEndian::read_u16(&id[10..12]) as u64;
                let total = granule.map_or(0, samples).saturating_sub(pre_skip);
                let mut props = AudioProperties::from_samples(total, 48_000, stream_bytes);
                props.sample_rate = LittleEndian::read_u32(&id[12..16]);
                props.channels = id[9];
                Ok(props)
            }
            OggCodec::Speex => {
                if id.len() < 56 {
                    return Err(short());
                }
                let rate = LittleEndian::read_u32(&id[36..40]);
                let mut props = AudioProperties::from_samples(granule.map_or(0, samples), rate, stream_bytes);
                props.channels = LittleEndian::read_u32(&id[48..52]) as u8;
                Ok(props)
            }
        }
    }
}

/// An Ogg Vorbis, Opus or Speex file.
pub struct OggFile {
    file: TagFile,
    codec: OggCodec,
    headers: HeaderPackets,
    pub xiph: XiphComment,
    properties: Option<AudioProperties>,
}

impl OggFile {
    pub fn open(abstraction: impl FileAbstraction + 'static, style: ReadStyle) -> Result<Self> {
        let mut file = TagFile::new(abstraction);
        let probe = HeaderPackets::read(&mut file, 1)?;
        let id_packet = &probe.packets[0];
        let codec = OggCodec::detect(id_packet)?;
        let headers = HeaderPackets::read(&mut file, codec.header_count(id_packet))?;

        let comment = &headers.packets[1];
        let prefix = codec.comment_prefix();
        if !comment.starts_with(prefix) {
            return Err(MetaError::corrupt("Ogg", "comment packet has the wrong signature"));
        }
        let xiph = XiphComment::parse(&comment[prefix.len()..], codec.framing())?;

        let file_len = file.length()?;
        file.set_invariant_region(headers.end(), file_len);
        let properties = if style.properties {
            let granule = last_granule(&mut file, headers.serial)?;
            match codec.properties(&headers.packets[0], granule, file_len - headers.end()) {
                Ok(props) => Some(props),
                Err(err) => {
                    debug!("Ogg: no properties: {}", err);
                    None
                }
            }
        } else {
            None
        };

        Ok(OggFile {
            file,
            codec,
            headers,
            xiph,
            properties,
        })
    }

    pub fn codec(&self) -> OggCodec {
        self.codec
    }

    pub fn properties(&self) -> Option<&AudioProperties> {
        self.properties.as_ref()
    }

    pub fn header_packets(&self) -> &[Vec<u8>] {
        &self.headers.packets
    }
}

impl MediaFile for OggFile {
    fn tag_file(&self) -> &TagFile {
        &self.file
    }

    fn tags(&mut self) -> CombinedTag<'_> {
        let xiph: &mut dyn Tag = &mut self.xiph;
        CombinedTag::new(vec![xiph])
    }

    fn save_with(&mut self, _options: &WriteOptions) -> Result<()> {
        let mut comment = self.codec.comment_prefix().to_vec();
        comment.extend_from_slice(&self.xiph.render(self.codec.framing()));
        let mut packets = self.headers.packets.clone();
        packets[1] = comment;
        self.headers.write(&mut self.file, packets)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::stream::MemoryFile;
    use crate::ogg::tests::build;
    use pretty_assertions::assert_eq;

    fn vorbis_id() -> Vec<u8> {
        let mut id = b"\x01vorbis".to_vec();
        id.extend_from_slice(&[0, 0, 0, 0]); // version
        id.push(2);
        id.extend_from_slice(&44100u32.to_le_bytes());
        id.extend_from_slice(&0i32.to_le_bytes());
        id.extend_from_slice(&128_000i32.to_le_bytes());
        id.extend_from_slice(&0i32.to_le_bytes());
        id.push(0xB8);
        id.push(1);
        id
    }

    fn vorbis_file(comment: &XiphComment) -> Vec<u8> {
        let mut packet = b"\x03vorbis".to_vec();
        packet.extend_from_slice(&comment.render(true));
        build(
            42,
            &[
                (0x02, 0, vec![(vorbis_id(), true)]),
                (0x00, 0, vec![(packet, true), (b"\x05vorbis-setup".to_vec(), true)]),
                (0x00, 44100, vec![(vec![0x11; 50], true)]),
                (0x04, 88200, vec![(vec![0x22; 50], true)]),
            ],
        )
    }

    #[test]
    fn reads_vorbis_comment_and_length() {
        let mut xc = XiphComment::new();
        xc.vendor = "enc".into();
        xc.set_title("Ogg song");
        let f = OggFile::open(MemoryFile::new("a.ogg", vorbis_file(&xc)), ReadStyle::default()).unwrap();
        assert_eq!(f.codec(), OggCodec::Vorbis);
        assert_eq!(f.xiph.title().as_deref(), Some("Ogg song"));
        let props = f.properties().unwrap();
        assert_eq!(props.duration_ms, 2000);
        assert_eq!(props.channels, 2);
        assert_eq!(f.header_packets().len(), 3);
    }

    #[test]
    fn save_keeps_audio_pages_and_setup_packet() {
        let mem = MemoryFile::new("a.ogg", vorbis_file(&XiphComment::new()));
        let mut f = OggFile::open(mem.clone(), ReadStyle::default()).unwrap();
        let audio_before = {
            let bytes = mem.contents();
            let region = f.tag_file().invariant_region().unwrap();
            bytes[region.start as usize..].to_vec()
        };
        f.tags().set_artist(&"x".repeat(600));
        f.save().unwrap();

        let again = OggFile::open(mem.clone(), ReadStyle::default()).unwrap();
        assert_eq!(again.xiph.artist().map(|a| a.len()), Some(600));
        assert_eq!(again.header_packets()[2], b"\x05vorbis-setup".to_vec());
        let region = again.tag_file().invariant_region().unwrap();
        assert_eq!(f.tag_file().invariant_region(), Some(region));
        assert_eq!(&mem.contents()[region.start as usize..], audio_before.as_slice());
    }

    #[test]
    fn opus_comment_has_no_framing_bit() {
        let mut head = b"OpusHead".to_vec();
        head.extend_from_slice(&[1, 2]);
        head.extend_from_slice(&312u16.to_le_bytes());
        head.extend_from_slice(&48000u32.to_le_bytes());
        head.extend_from_slice(&[0, 0, 0]);
        let mut tags = b"OpusTags".to_vec();
        tags.extend_from_slice(&XiphComment::new().render(false));
        let data = build(
            1,
            &[
                (0x02, 0, vec![(head, true)]),
                (0x00, 0, vec![(tags, true)]),
                (0x04, 48312, vec![(vec![0; 10], true)]),
            ],
        );
        let mem = MemoryFile::new("a.opus", data);
        let mut f = OggFile::open(mem.clone(), ReadStyle::default()).unwrap();
        assert_eq!(f.codec(), OggCodec::Opus);
        assert_eq!(f.properties().unwrap().duration_ms, 1000);
        f.xiph.set_title("t");
        f.save().unwrap();
        let again = OggFile::open(mem, ReadStyle::default()).unwrap();
        assert_eq!(*again.header_packets()[1].last().unwrap(), b't');
    }

    #[test]
    fn unknown_codec_is_unsupported() {
        let data = build(1, &[(0x02, 0, vec![(b"\x80theora".to_vec(), true)])]);
        let err = OggFile::open(MemoryFile::new("a.ogv", data), ReadStyle::default()).err().unwrap();
        assert!(err.is_unsupported());
    }
}
