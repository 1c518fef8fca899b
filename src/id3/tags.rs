use std::borrow::Cow;
use std::io::Read;

use log::{debug, trace, warn};

use crate::common::config::ReadStyle;
use crate::common::error::{MetaError, Result};
use crate::common::file::TagFile;
use crate::common::picture::Picture;
use crate::common::tag::{Tag, TagType};
use crate::id3::frame_header::{convert_id, FrameFlags, FrameHeader};
use crate::id3::frames::{self, CommentFrame, Frame, HashKey, PictureFrame, TextFrame};
use crate::id3::header::{determine_bpi, extended_header_size, Id3v2Header, HEADER_SIZE};
use crate::id3::specs::{self, Encoding};
use crate::id3::unsynch;

/// A frame that is either still in its on-disk form or decoded.
#[derive(Debug, Clone, PartialEq)]
pub enum LazyFrame {
    /// Body as read (unsynchronisation and compression already undone unless
    /// `flags` is non-zero, in which case the body is kept exactly as on disk).
    Raw {
        id: String,
        data: Vec<u8>,
        version: u8,
        flags: u16,
    },
    Decoded(Frame),
}

impl LazyFrame {
    pub fn frame_id(&self) -> &str {
        match self {
            LazyFrame::Raw { id, .. } => id,
            LazyFrame::Decoded(f) => f.frame_id(),
        }
    }

    pub fn hash_key(&self) -> HashKey {
        match self {
            LazyFrame::Raw { id, data, version, flags } if *flags == 0 => quick_hash_key(id, data, *version),
            LazyFrame::Raw { id, .. } => HashKey::new(id),
            LazyFrame::Decoded(f) => f.hash_key(),
        }
    }

    pub fn is_decoded(&self) -> bool {
        matches!(self, LazyFrame::Decoded(_))
    }

    /// Decode without changing state.
    pub fn peek(&self) -> Result<Cow<'_, Frame>> {
        match self {
            LazyFrame::Decoded(f) => Ok(Cow::Borrowed(f)),
            LazyFrame::Raw { flags, .. } if *flags != 0 => Err(MetaError::unsupported(
                "ID3v2",
                format!("frame {} is encrypted or could not be decompressed", self.frame_id()),
            )),
            LazyFrame::Raw { id, data, version, .. } => {
                Ok(Cow::Owned(frames::parse_frame(id, data, *version)?))
            }
        }
    }

    /// Decode in place. The raw bytes are discarded on success.
    pub fn force(&mut self) -> Result<&mut Frame> {
        if let LazyFrame::Raw { .. } = self {
            let frame = self.peek()?.into_owned();
            *self = LazyFrame::Decoded(frame);
        }
        match self {
            LazyFrame::Decoded(f) => Ok(f),
            LazyFrame::Raw { .. } => Err(MetaError::ValueError("frame decode did not stick".into())),
        }
    }

    /// Render header and body for a v2.`target` tag, or `None` if the frame
    /// has no representation in that version.
    pub fn render(&self, target: u8) -> Result<Option<Vec<u8>>> {
        let Some(id) = convert_id(self.frame_id().as_bytes(), target, true) else {
            debug!("ID3v2: frame {} has no v2.{} form, dropped", self.frame_id(), target);
            return Ok(None);
        };

        let (body, flags) = match self {
            LazyFrame::Raw { data, version, flags, .. } if *version == target => (Cow::Borrowed(data.as_slice()), *flags),
            LazyFrame::Raw { flags, .. } if *flags != 0 => {
                warn!("ID3v2: frame {} cannot be converted to v2.{}, dropped", self.frame_id(), target);
                return Ok(None);
            }
            _ => {
                let frame = self.peek()?;
                (Cow::Owned(render_converted(&frame, &id, target)?), 0)
            }
        };

        let mut out = FrameHeader::render(&id, body.len(), flags, target)?;
        out.extend_from_slice(&body);
        Ok(Some(out))
    }
}

/// Body of a decoded frame, adjusted for IDs whose value format narrows
/// in v2.3 (TYER and TORY only hold a year).
fn render_converted(frame: &Frame, target_id: &[u8], target: u8) -> Result<Vec<u8>> {
    match frame {
        Frame::Text(t) if target == 3 && (target_id == b"TYER" || target_id == b"TORY") => {
            let year: String = t.text.first().map(|s| s.chars().take(4).collect()).unwrap_or_default();
            Frame::Text(TextFrame {
                id: t.id.clone(),
                encoding: t.encoding,
                text: vec![year],
            })
            .write_data(target)
        }
        _ => frame.write_data(target),
    }
}

/// Read only the discriminating prefix of a raw body to build its key.
fn quick_hash_key(id: &str, data: &[u8], version: u8) -> HashKey {
    let keyed = |f: Result<Frame>| f.map(|f| f.hash_key()).unwrap_or_else(|_| HashKey::new(id));
    match id {
        "TXXX" | "WXXX" | "POPM" | "UFID" | "PRIV" => keyed(frames::parse_frame(id, data, version)),
        "COMM" | "USLT" => {
            if data.len() < 4 {
                return HashKey::new(id);
            }
            match Encoding::from_byte(data[0]) {
                Ok(enc) => {
                    let (desc, _) = specs::read_encoded_text(&data[4..], enc);
                    HashKey(format!("{}:{}:{}", id, desc, String::from_utf8_lossy(&data[1..4])))
                }
                Err(_) => HashKey::new(id),
            }
        }
        "APIC" => {
            // Skip the picture bytes: decode up to the description only.
            let Some((&enc, rest)) = data.split_first() else {
                return HashKey::new(id);
            };
            let Ok(enc) = Encoding::from_byte(enc) else {
                return HashKey::new(id);
            };
            let after_mime = if version == 2 {
                3.min(rest.len())
            } else {
                specs::read_latin1_text(rest).1
            };
            let desc_start = (after_mime + 1).min(rest.len());
            let (desc, _) = specs::read_encoded_text(&rest[desc_start..], enc);
            HashKey(format!("APIC:{}", desc))
        }
        _ => HashKey::new(id),
    }
}

fn decompress_zlib(data: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = flate2::read::ZlibDecoder::new(data);
    let mut result = Vec::new();
    decoder
        .read_to_end(&mut result)
        .map_err(|e| MetaError::corrupt("ID3v2", format!("bad compressed frame: {}", e)))?;
    Ok(result)
}

/// An ID3v2 tag: header plus ordered frames.
#[derive(Debug, Clone, PartialEq)]
pub struct Id3v2Tag {
    pub header: Id3v2Header,
    frames: Vec<LazyFrame>,
    /// Full size on disk when read; a re-rendered tag that fits reuses it.
    original_size: Option<u64>,
}

impl Default for Id3v2Tag {
    fn default() -> Self {
        Self::new()
    }
}

impl Id3v2Tag {
    pub fn new() -> Self {
        Id3v2Tag {
            header: Id3v2Header::new(4),
            frames: Vec::new(),
            original_size: None,
        }
    }

    /// Read a tag whose header starts at `position`.
    pub fn read(file: &mut TagFile, position: u64, style: ReadStyle) -> Result<Self> {
        let head = file.read_at(position, HEADER_SIZE)?;
        let header = Id3v2Header::parse(&head)?;
        let file_len = file.length()?;
        if position + header.full_size() > file_len {
            return Err(MetaError::corrupt(
                "ID3v2",
                format!("tag of {} bytes at {} runs past end of file", header.full_size(), position),
            ));
        }
        let body = file.read_block(header.size as usize)?;
        trace!("ID3v2.{} tag at {}, {} bytes", header.major, position, header.full_size());
        Self::from_parts(header, &body, style)
    }

    /// Parse a complete tag (header first) from memory.
    pub fn parse(data: &[u8], style: ReadStyle) -> Result<Self> {
        let header = Id3v2Header::parse(data)?;
        let end = HEADER_SIZE + header.size as usize;
        if data.len() < end {
            return Err(MetaError::corrupt("ID3v2", "tag size exceeds data"));
        }
        Self::from_parts(header, &data[HEADER_SIZE..end], style)
    }

    fn from_parts(header: Id3v2Header, body: &[u8], style: ReadStyle) -> Result<Self> {
        let mut tag = Id3v2Tag {
            original_size: Some(header.full_size()),
            header,
            frames: Vec::new(),
        };
        tag.read_frames(body)?;
        if !style.lazy_pictures {
            for frame in tag.frames.iter_mut().filter(|f| f.frame_id() == "APIC") {
                if let Err(err) = frame.force() {
                    debug!("ID3v2: leaving picture undecoded: {}", err);
                }
            }
        }
        Ok(tag)
    }

    fn read_frames(&mut self, body: &[u8]) -> Result<()> {
        let major = self.header.major;
        let body: Cow<[u8]> = if self.header.flags.unsynchronisation && major < 4 {
            Cow::Owned(unsynch::decode(body))
        } else {
            Cow::Borrowed(body)
        };

        let mut pos = if self.header.flags.extended {
            extended_header_size(&body, major)?
        } else {
            0
        };
        let bits = if major == 4 { determine_bpi(&body[pos..]) } else { 8 };
        let header_size = FrameHeader::size_for(major);

        while pos < body.len() {
            let Some(fh) = FrameHeader::parse(&body[pos..], major, bits)? else {
                break;
            };
            let start = pos + header_size;
            let end = start + fh.size as usize;
            if end > body.len() {
                return Err(MetaError::corrupt(
                    "ID3v2",
                    format!(
                        "frame {} declares {} bytes, only {} remain",
                        String::from_utf8_lossy(&fh.id),
                        fh.size,
                        body.len().saturating_sub(start)
                    ),
                ));
            }
            pos = end;

            let Some(id) = convert_id(&fh.id, major, false) else {
                debug!("ID3v2: frame {} has no v2.4 form, dropped", String::from_utf8_lossy(&fh.id));
                continue;
            };
            let id = String::from_utf8_lossy(&id).into_owned();
            if fh.size == 0 {
                debug!("ID3v2: skipping empty frame {}", id);
                continue;
            }
            self.frames.push(decode_body(id, &body[start..end], major, fh.flags));
        }
        Ok(())
    }

    // ---- frame access ----

    pub fn frames(&self) -> &[LazyFrame] {
        &self.frames
    }

    pub fn frames_mut(&mut self) -> &mut Vec<LazyFrame> {
        &mut self.frames
    }

    pub fn version(&self) -> u8 {
        self.header.major
    }

    pub fn original_size(&self) -> Option<u64> {
        self.original_size
    }

    /// Forget the on-disk size, e.g. after the tag moved.
    pub fn set_original_size(&mut self, size: Option<u64>) {
        self.original_size = size;
    }

    pub fn add(&mut self, frame: Frame) {
        self.frames.push(LazyFrame::Decoded(frame));
    }

    /// Decoded frames whose key is `key`; frames that fail to decode are skipped.
    pub fn get_all(&mut self, key: &str) -> Vec<&Frame> {
        let mut out = Vec::new();
        for lf in self.frames.iter_mut() {
            if lf.hash_key().as_str() != key {
                continue;
            }
            match lf.force() {
                Ok(frame) => out.push(&*frame),
                Err(err) => debug!("ID3v2: {}", err),
            }
        }
        out
    }

    pub fn get(&mut self, key: &str) -> Option<&Frame> {
        self.get_all(key).into_iter().next()
    }

    /// First frame with this ID, decoded without mutating the tag.
    pub fn peek(&self, id: &str) -> Option<Frame> {
        self.frames
            .iter()
            .filter(|lf| lf.frame_id() == id)
            .find_map(|lf| lf.peek().ok().map(Cow::into_owned))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.frames.iter().any(|lf| lf.hash_key().as_str() == key)
    }

    pub fn remove(&mut self, key: &str) {
        self.frames.retain(|lf| lf.hash_key().as_str() != key);
    }

    pub fn remove_id(&mut self, id: &str) {
        self.frames.retain(|lf| lf.frame_id() != id);
    }

    /// Replace every frame with `frame`'s key by `frame`.
    pub fn set(&mut self, frame: Frame) {
        let key = frame.hash_key();
        match self.frames.iter().position(|lf| lf.hash_key() == key) {
            Some(index) => {
                self.frames[index] = LazyFrame::Decoded(frame);
                let mut seen = 0usize;
                self.frames.retain(|lf| {
                    if lf.hash_key() == key {
                        seen += 1;
                        seen == 1
                    } else {
                        true
                    }
                });
            }
            None => self.add(frame),
        }
    }

    pub fn text(&self, id: &str) -> Option<String> {
        self.peek(id)
            .and_then(|f| f.as_text().and_then(|t| t.text.first().cloned()))
            .filter(|s| !s.is_empty())
    }

    pub fn set_text(&mut self, id: &str, value: &str) {
        if value.is_empty() {
            self.remove_id(id);
        } else {
            self.remove_id(id);
            self.add(Frame::text(id, value));
        }
    }

    pub fn pictures(&self) -> Vec<Picture> {
        self.frames
            .iter()
            .filter(|lf| lf.frame_id() == "APIC")
            .filter_map(|lf| match lf.peek() {
                Ok(frame) => match frame.into_owned() {
                    Frame::Picture(p) => Some(p.picture),
                    _ => None,
                },
                Err(_) => None,
            })
            .collect()
    }

    pub fn add_picture(&mut self, picture: Picture) {
        self.set(Frame::Picture(PictureFrame {
            encoding: Encoding::Latin1,
            picture,
        }));
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    fn first_comment(&self) -> Option<CommentFrame> {
        let comments: Vec<CommentFrame> = self
            .frames
            .iter()
            .filter(|lf| lf.frame_id() == "COMM")
            .filter_map(|lf| match lf.peek().ok()?.into_owned() {
                Frame::Comment(c) => Some(c),
                _ => None,
            })
            .collect();
        comments
            .iter()
            .find(|c| c.desc.is_empty())
            .or_else(|| comments.first())
            .cloned()
    }
}

/// Undo per-frame transformations. Frames that cannot be undone are kept
/// verbatim together with their flags.
fn decode_body(id: String, raw: &[u8], major: u8, flags: FrameFlags) -> LazyFrame {
    let verbatim = |id: String| LazyFrame::Raw {
        id,
        data: raw.to_vec(),
        version: major,
        flags: flags.raw,
    };
    if !flags.needs_decoding() {
        return LazyFrame::Raw {
            id,
            data: raw.to_vec(),
            version: major,
            flags: 0,
        };
    }
    if flags.encryption {
        return verbatim(id);
    }

    let mut skip = 0usize;
    if flags.grouping {
        skip += 1;
    }
    if flags.data_length_indicator {
        skip += 4;
    }
    if skip > raw.len() {
        return verbatim(id);
    }
    let mut data: Cow<[u8]> = Cow::Borrowed(&raw[skip..]);
    if flags.unsynchronisation {
        data = Cow::Owned(unsynch::decode(&data));
    }
    if flags.compression {
        match decompress_zlib(&data) {
            Ok(inflated) => data = Cow::Owned(inflated),
            Err(err) => {
                warn!("ID3v2: frame {}: {}", id, err);
                return verbatim(id);
            }
        }
    }
    LazyFrame::Raw {
        id,
        data: data.into_owned(),
        version: major,
        flags: 0,
    }
}

impl Tag for Id3v2Tag {
    fn tag_type(&self) -> TagType {
        TagType::Id3v2
    }

    fn title(&self) -> Option<String> {
        self.text("TIT2")
    }

    fn artist(&self) -> Option<String> {
        self.text("TPE1")
    }

    fn album(&self) -> Option<String> {
        self.text("TALB")
    }

    fn comment(&self) -> Option<String> {
        self.first_comment().map(|c| c.text).filter(|s| !s.is_empty())
    }

    fn genre(&self) -> Option<String> {
        self.text("TCON")
            .and_then(|g| specs::parse_genre(&g).into_iter().next())
    }

    fn year(&self) -> Option<u32> {
        self.text("TDRC")
            .and_then(|d| d.get(..4).and_then(|y| y.parse().ok()))
    }

    fn track(&self) -> Option<u32> {
        self.text("TRCK")
            .and_then(|t| t.split('/').next().and_then(|n| n.trim().parse().ok()))
    }

    fn set_title(&mut self, value: &str) {
        self.set_text("TIT2", value);
    }

    fn set_artist(&mut self, value: &str) {
        self.set_text("TPE1", value);
    }

    fn set_album(&mut self, value: &str) {
        self.set_text("TALB", value);
    }

    fn set_comment(&mut self, value: &str) {
        self.frames.retain(|lf| {
            lf.frame_id() != "COMM"
                || !matches!(lf.peek().as_deref(), Ok(Frame::Comment(c)) if c.desc.is_empty())
        });
        if !value.is_empty() {
            self.add(Frame::Comment(CommentFrame::new("eng", "", value)));
        }
    }

    fn set_genre(&mut self, value: &str) {
        self.set_text("TCON", value);
    }

    fn set_year(&mut self, value: u32) {
        let text = if value == 0 { String::new() } else { value.to_string() };
        self.set_text("TDRC", &text);
    }

    fn set_track(&mut self, value: u32) {
        let text = if value == 0 { String::new() } else { value.to_string() };
        self.set_text("TRCK", &text);
    }

    fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    fn clear(&mut self) {
        self.frames.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id3::header::BitPaddedInt;

    fn frame_v(id: &[u8], body: &[u8], major: u8, flags: u16) -> Vec<u8> {
        let mut out = id.to_vec();
        if major == 4 {
            out.extend_from_slice(&BitPaddedInt::encode(body.len() as u32, 4, 7));
        } else {
            out.extend_from_slice(&(body.len() as u32).to_be_bytes());
        }
        out.extend_from_slice(&flags.to_be_bytes());
        out.extend_from_slice(body);
        out
    }

    fn tag_bytes(major: u8, flags: u8, frames: &[u8], padding: usize) -> Vec<u8> {
        let mut out = vec![b'I', b'D', b'3', major, 0, flags];
        out.extend_from_slice(&BitPaddedInt::encode((frames.len() + padding) as u32, 4, 7));
        out.extend_from_slice(frames);
        out.extend(std::iter::repeat(0).take(padding));
        out
    }

    #[test]
    fn frames_stay_raw_until_forced() {
        let mut frames = frame_v(b"TIT2", b"\x00Song", 4, 0);
        frames.extend(frame_v(b"TPE1", b"\x00Band", 4, 0));
        let data = tag_bytes(4, 0, &frames, 16);
        let mut tag = Id3v2Tag::parse(&data, ReadStyle::default()).unwrap();
        assert!(tag.frames().iter().all(|f| !f.is_decoded()));
        assert_eq!(tag.title().as_deref(), Some("Song"));
        assert!(!tag.frames()[0].is_decoded());
        assert!(tag.get("TIT2").is_some());
        assert!(tag.frames()[0].is_decoded());
        assert_eq!(tag.artist().as_deref(), Some("Band"));
    }

    #[test]
    fn raw_frame_renders_verbatim_in_source_version() {
        // Trailing NUL would not survive a decode/encode cycle.
        let body = b"\x00Song\x00";
        let data = tag_bytes(3, 0, &frame_v(b"TIT2", body, 3, 0), 0);
        let tag = Id3v2Tag::parse(&data, ReadStyle::default()).unwrap();
        let rendered = tag.frames()[0].render(3).unwrap().unwrap();
        assert_eq!(rendered, frame_v(b"TIT2", body, 3, 0));
        let upgraded = tag.frames()[0].render(4).unwrap().unwrap();
        assert_eq!(upgraded, frame_v(b"TIT2", b"\x00Song", 4, 0));
    }

    #[test]
    fn v23_ids_are_normalised() {
        let data = tag_bytes(3, 0, &frame_v(b"TYER", b"\x001999", 3, 0), 4);
        let tag = Id3v2Tag::parse(&data, ReadStyle::default()).unwrap();
        assert_eq!(tag.frames()[0].frame_id(), "TDRC");
        assert_eq!(tag.year(), Some(1999));
        let back = tag.frames()[0].render(3).unwrap().unwrap();
        assert_eq!(&back[..4], b"TYER");
    }

    #[test]
    fn tdrc_narrows_to_year_for_v23() {
        let mut tag = Id3v2Tag::new();
        tag.set_text("TDRC", "2004-05-06");
        let out = tag.frames()[0].render(3).unwrap().unwrap();
        assert_eq!(out, frame_v(b"TYER", b"\x002004", 3, 0));
    }

    #[test]
    fn v22_frames_convert() {
        let mut frames = b"TT2".to_vec();
        frames.extend_from_slice(&[0, 0, 5]);
        frames.extend_from_slice(b"\x00Song");
        frames.extend_from_slice(b"COM");
        frames.extend_from_slice(&[0, 0, 9]);
        frames.extend_from_slice(b"\x00eng\x00note");
        let data = tag_bytes(2, 0, &frames, 0);
        let tag = Id3v2Tag::parse(&data, ReadStyle::default()).unwrap();
        assert_eq!(tag.title().as_deref(), Some("Song"));
        assert_eq!(tag.comment().as_deref(), Some("note"));
        assert_eq!(tag.frames()[1].hash_key().as_str(), "COMM::eng");
    }

    #[test]
    fn whole_tag_unsynchronisation() {
        let frame = frame_v(b"TIT2", b"\x00\xFF\xE0x", 3, 0);
        let encoded = unsynch::encode(&frame);
        let data = tag_bytes(3, 0x80, &encoded, 0);
        let tag = Id3v2Tag::parse(&data, ReadStyle::default()).unwrap();
        assert_eq!(tag.title().as_deref(), Some("ÿàx"));
    }

    #[test]
    fn compressed_frame_with_length_indicator() {
        use flate2::write::ZlibEncoder;
        use flate2::Compression;
        use std::io::Write;

        let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
        enc.write_all(b"\x00Compressed").unwrap();
        let packed = enc.finish().unwrap();
        let mut body = BitPaddedInt::encode(11, 4, 7);
        body.extend_from_slice(&packed);
        let data = tag_bytes(4, 0, &frame_v(b"TIT2", &body, 4, 0x0009), 0);
        let tag = Id3v2Tag::parse(&data, ReadStyle::default()).unwrap();
        assert_eq!(tag.title().as_deref(), Some("Compressed"));
    }

    #[test]
    fn overlong_frame_is_corrupt() {
        let mut frames = frame_v(b"TIT2", b"\x00ok", 4, 0);
        let mut bad = frame_v(b"TALB", b"\x00x", 4, 0);
        bad[7] = 100;
        frames.extend(bad);
        let data = tag_bytes(4, 0, &frames, 0);
        let err = Id3v2Tag::parse(&data, ReadStyle::default()).unwrap_err();
        assert!(err.is_corrupt(), "{:?}", err);
    }

    #[test]
    fn comment_keys_match_before_and_after_decoding() {
        let data = tag_bytes(4, 0, &frame_v(b"COMM", b"\x00deu\x00notiz", 4, 0), 0);
        let mut tag = Id3v2Tag::parse(&data, ReadStyle::default()).unwrap();
        let lazy_key = tag.frames()[0].hash_key();
        assert_eq!(lazy_key.as_str(), "COMM::deu");
        tag.frames_mut()[0].force().unwrap();
        assert_eq!(tag.frames()[0].hash_key(), lazy_key);
    }

    #[test]
    fn set_replaces_by_key() {
        let mut tag = Id3v2Tag::new();
        tag.add(Frame::Comment(CommentFrame::new("eng", "", "one")));
        tag.add(Frame::Comment(CommentFrame::new("eng", "other", "two")));
        tag.set(Frame::Comment(CommentFrame::new("eng", "", "three")));
        assert_eq!(tag.len(), 2);
        assert_eq!(tag.comment().as_deref(), Some("three"));
        tag.set_comment("");
        assert_eq!(tag.comment().as_deref(), Some("two"));
    }

    #[test]
    fn pictures_decode_lazily_when_asked() {
        let body = b"\x00image/jpeg\x00\x03\x00\xFF\xD8";
        let data = tag_bytes(4, 0, &frame_v(b"APIC", body, 4, 0), 0);
        let lazy = Id3v2Tag::parse(&data, ReadStyle::NONE).unwrap();
        assert!(!lazy.frames()[0].is_decoded());
        let eager = Id3v2Tag::parse(&data, ReadStyle::default()).unwrap();
        assert!(eager.frames()[0].is_decoded());
        assert_eq!(lazy.pictures(), eager.pictures());
        assert_eq!(lazy.frames()[0].hash_key().as_str(), "APIC:");
    }
}
