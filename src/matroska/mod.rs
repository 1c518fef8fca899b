//! Matroska and WebM.
//!
//! Only the level-1 children of the segment are walked on open. Tags are
//! rewritten without moving clusters: the new `Tags` element goes where the
//! old one was, into a large enough `Void`, or at the end of the segment,
//! and the seek head entry for it is patched in place.

pub mod ebml;
pub mod tag;

use log::{debug, trace, warn};

pub use ebml::EbmlElement;
pub use tag::{MatroskaTag, SimpleTag, SimpleValue, TagEntry, Targets};

use crate::common::config::{ReadStyle, WriteOptions};
use crate::common::error::{MetaError, Result};
use crate::common::file::TagFile;
use crate::common::header::propagate_size_delta;
use crate::common::media::{AudioProperties, MediaFile};
use crate::common::stream::FileAbstraction;
use crate::common::tag::{CombinedTag, Tag};
use ebml::{children, render_void};

/// `Info` fields.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentInfo {
    /// Nanoseconds per timestamp tick.
    pub timecode_scale: u64,
    /// In ticks.
    pub duration: Option<f64>,
    pub title: Option<String>,
    pub muxing_app: Option<String>,
    pub writing_app: Option<String>,
}

impl Default for SegmentInfo {
    fn default() -> Self {
        SegmentInfo {
            timecode_scale: 1_000_000,
            duration: None,
            title: None,
            muxing_app: None,
            writing_app: None,
        }
    }
}

impl SegmentInfo {
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let mut info = SegmentInfo::default();
        for (el, data) in children(payload)? {
            match el.id {
                ebml::TIMECODE_SCALE => info.timecode_scale = ebml::uint(data),
                ebml::DURATION => info.duration = Some(ebml::float(data)),
                ebml::SEGMENT_TITLE => info.title = Some(ebml::string(data)),
                ebml::MUXING_APP => info.muxing_app = Some(ebml::string(data)),
                ebml::WRITING_APP => info.writing_app = Some(ebml::string(data)),
                _ => {}
            }
        }
        Ok(info)
    }

    pub fn duration_ms(&self) -> u64 {
        match self.duration {
            Some(ticks) if ticks.is_finite() && ticks > 0.0 => (ticks * self.timecode_scale as f64 / 1e6) as u64,
            _ => 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TrackKind {
    Video { width: u64, height: u64 },
    Audio { sample_rate: f64, channels: u64, bit_depth: u64 },
    Other(u64),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    pub number: u64,
    pub uid: u64,
    pub codec_id: String,
    pub kind: TrackKind,
}

impl Track {
    fn parse(payload: &[u8]) -> Result<Self> {
        let mut number = 0;
        let mut uid = 0;
        let mut codec_id = String::new();
        let mut track_type = 0;
        let mut audio = (8000.0, 1, 0);
        let mut video = (0, 0);
        for (el, data) in children(payload)? {
            match el.id {
                ebml::TRACK_NUMBER => number = ebml::uint(data),
                ebml::TRACK_UID => uid = ebml::uint(data),
                ebml::TRACK_TYPE => track_type = ebml::uint(data),
                ebml::CODEC_ID => codec_id = ebml::string(data),
                ebml::AUDIO => {
                    for (sub, value) in children(data)? {
                        match sub.id {
                            ebml::SAMPLING_FREQUENCY => audio.0 = ebml::float(value),
                            ebml::CHANNELS => audio.1 = ebml::uint(value),
                            ebml::BIT_DEPTH => audio.2 = ebml::uint(value),
                            _ => {}
                        }
                    }
                }
                ebml::VIDEO => {
                    for (sub, value) in children(data)? {
                        match sub.id {
                            ebml::PIXEL_WIDTH => video.0 = ebml::uint(value),
                            ebml::PIXEL_HEIGHT => video.1 = ebml::uint(value),
                            _ => {}
                        }
                    }
                }
                _ => {}
            }
        }
        let kind = match track_type {
            1 => TrackKind::Video {
                width: video.0,
                height: video.1,
            },
            2 => TrackKind::Audio {
                sample_rate: audio.0,
                channels: audio.1,
                bit_depth: audio.2,
            },
            other => TrackKind::Other(other),
        };
        Ok(Track {
            number,
            uid,
            codec_id,
            kind,
        })
    }
}

/// A seek head entry with the file offset of its position value.
#[derive(Debug, Clone, PartialEq, Eq)]
struct SeekEntry {
    id: u32,
    position: u64,
    /// Offset and width of the `SeekPosition` payload.
    value_at: u64,
    value_len: usize,
}

pub struct MatroskaFile {
    file: TagFile,
    doc_type: String,
    segment: EbmlElement,
    /// Level-1 children of the segment, in file order.
    elements: Vec<EbmlElement>,
    seeks: Vec<SeekEntry>,
    info: SegmentInfo,
    tracks: Vec<Track>,
    properties: Option<AudioProperties>,
    pub tag: MatroskaTag,
}

impl MatroskaFile {
    pub fn open(abstraction: impl FileAbstraction + 'static, style: ReadStyle) -> Result<Self> {
        let mut file = TagFile::new(abstraction);
        let file_len = file.length()?;
        let head = file.read_at(0, 4)?;
        if head.data() != ebml::EBML_HEADER.to_be_bytes() {
            return Err(MetaError::NoHeader("Matroska"));
        }
        let header = EbmlElement::read(&mut file, 0, file_len)?;
        let header_size = header
            .size
            .ok_or_else(|| MetaError::corrupt("Matroska", "EBML header of unknown size"))?;
        let body = file.read_exact_at(header.payload_start(), header_size as usize, "Matroska")?;
        let doc_type = children(&body)?
            .into_iter()
            .find(|(el, _)| el.id == ebml::DOC_TYPE)
            .map(|(_, data)| ebml::string(data))
            .unwrap_or_else(|| "matroska".to_string());
        if doc_type != "matroska" && doc_type != "webm" {
            return Err(MetaError::unsupported("Matroska", format!("doc type {}", doc_type)));
        }

        let segment_at = header.end(file_len);
        let segment = match EbmlElement::read(&mut file, segment_at, u64::MAX) {
            Ok(segment) if segment.id == ebml::SEGMENT => segment,
            Ok(other) => {
                return Err(MetaError::corrupt("Matroska", format!("expected a segment, found {:#x}", other.id)))
            }
            Err(err) => return Err(err),
        };
        if segment.end(file_len) > file_len {
            file.mark_corrupt(format!("segment of {:?} bytes runs past the end of the file", segment.size));
        }

        let mut mkv = MatroskaFile {
            file,
            doc_type,
            segment,
            elements: Vec::new(),
            seeks: Vec::new(),
            info: SegmentInfo::default(),
            tracks: Vec::new(),
            properties: None,
            tag: MatroskaTag::new(),
        };
        mkv.scan()?;
        if style.properties {
            mkv.properties = Some(mkv.read_properties()?);
        }
        Ok(mkv)
    }

    fn segment_end(&mut self) -> Result<u64> {
        let file_len = self.file.length()?;
        Ok(self.segment.end(file_len).min(file_len))
    }

    /// Walk the segment's level-1 elements and load seek head, info, tracks
    /// and tags.
    fn scan(&mut self) -> Result<()> {
        let end = self.segment_end()?;
        self.elements.clear();
        self.seeks.clear();
        let mut first_cluster: Option<u64> = None;
        let mut last_cluster_end = 0;
        let mut pos = self.segment.payload_start();
        let mut tags: Option<MatroskaTag> = None;
        while pos < end {
            let el = match EbmlElement::read(&mut self.file, pos, end) {
                Ok(el) => el,
                Err(err) if err.is_corrupt() => {
                    warn!("Matroska: segment walk stopped at {}: {}", pos, err);
                    self.file.mark_corrupt(format!("segment child at {}: {}", pos, err));
                    break;
                }
                Err(err) => return Err(err),
            };
            if el.id == ebml::CLUSTER {
                first_cluster.get_or_insert(pos);
                last_cluster_end = el.end(end);
            }
            if el.is_unknown_size() {
                if el.id != ebml::CLUSTER {
                    self.file.mark_corrupt(format!("level-1 element {:#x} of unknown size", el.id));
                }
                debug!("Matroska: unknown-size {:#x} at {} ends the walk", el.id, pos);
                self.elements.push(el);
                break;
            }
            match el.id {
                ebml::SEEK_HEAD => self.load_seek_head(&el)?,
                ebml::INFO => self.info = SegmentInfo::parse(&self.payload(&el)?)?,
                ebml::TRACKS => {
                    let payload = self.payload(&el)?;
                    self.tracks = children(&payload)?
                        .into_iter()
                        .filter(|(t, _)| t.id == ebml::TRACK_ENTRY)
                        .map(|(_, data)| Track::parse(data))
                        .collect::<Result<_>>()?;
                }
                ebml::TAGS if tags.is_none() => match MatroskaTag::parse(&self.payload(&el)?) {
                    Ok(tag) => tags = Some(tag),
                    Err(err) if err.is_corrupt() => {
                        self.file.mark_corrupt(format!("Tags at {}: {}", pos, err));
                    }
                    Err(err) => return Err(err),
                },
                other => trace!("Matroska: level-1 {:#x} at {}", other, pos),
            }
            pos = el.end(end);
            self.elements.push(el);
        }
        // Media runs from the first cluster to the end of the last one.
        if let Some(start) = first_cluster {
            self.file.set_invariant_region(start, last_cluster_end);
        }
        self.tag = tags.unwrap_or_default();
        Ok(())
    }

    fn payload(&mut self, el: &EbmlElement) -> Result<Vec<u8>> {
        let size = el.size.unwrap_or(0) as usize;
        Ok(self.file.read_exact_at(el.payload_start(), size, "Matroska")?.into_inner())
    }

    fn load_seek_head(&mut self, el: &EbmlElement) -> Result<()> {
        let payload = self.payload(el)?;
        for (seek, body) in children(&payload)? {
            if seek.id != ebml::SEEK {
                continue;
            }
            let mut entry = SeekEntry {
                id: 0,
                position: 0,
                value_at: 0,
                value_len: 0,
            };
            let body_start = el.payload_start() + seek.payload_start();
            for (field, value) in children(body)? {
                match field.id {
                    ebml::SEEK_ID => entry.id = ebml::uint(value) as u32,
                    ebml::SEEK_POSITION => {
                        entry.position = ebml::uint(value);
                        entry.value_at = body_start + field.payload_start();
                        entry.value_len = value.len();
                    }
                    _ => {}
                }
            }
            self.seeks.push(entry);
        }
        Ok(())
    }

    fn read_properties(&mut self) -> Result<AudioProperties> {
        let mut props = AudioProperties {
            duration_ms: self.info.duration_ms(),
            ..Default::default()
        };
        if let Some(TrackKind::Audio {
            sample_rate,
            channels,
            bit_depth,
        }) = self.tracks.iter().map(|t| &t.kind).find(|k| matches!(k, TrackKind::Audio { .. }))
        {
            props.sample_rate = *sample_rate as u32;
            props.channels = (*channels).min(255) as u8;
            props.bits_per_sample = (*bit_depth).min(255) as u8;
        }
        if props.duration_ms > 0 {
            let end = self.segment_end()?;
            let bytes = end - self.segment.payload_start();
            props.bitrate = (bytes * 8 / props.duration_ms) as u32;
        }
        Ok(props)
    }

    pub fn doc_type(&self) -> &str {
        &self.doc_type
    }

    pub fn info(&self) -> &SegmentInfo {
        &self.info
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn properties(&self) -> Option<&AudioProperties> {
        self.properties.as_ref()
    }

    /// Level-1 elements of the segment.
    pub fn elements(&self) -> &[EbmlElement] {
        &self.elements
    }

    /// The old `Tags` element and any `Void`s right behind it, as one
    /// reusable slot.
    fn tags_slot(&self) -> Option<(u64, u64)> {
        let index = self.elements.iter().position(|e| e.id == ebml::TAGS)?;
        let start = self.elements[index].offset();
        let mut end = self.elements[index].end(u64::MAX);
        for el in &self.elements[index + 1..] {
            if el.id != ebml::VOID || el.offset() != end {
                break;
            }
            end = el.end(u64::MAX);
        }
        Some((start, end - start))
    }

    /// Patch the seek head entry for `Tags` to point at `offset`.
    fn update_seek_head(&mut self, offset: Option<u64>) -> Result<()> {
        let Some(entry) = self.seeks.iter().find(|s| s.id == ebml::TAGS).cloned() else {
            if offset.is_some() && !self.seeks.is_empty() {
                warn!("Matroska: seek head has no Tags entry; not adding one");
            }
            return Ok(());
        };
        let Some(offset) = offset else {
            warn!("Matroska: Tags removed, seek head entry left in place");
            return Ok(());
        };
        let relative = offset - self.segment.payload_start();
        let bytes = relative.to_be_bytes();
        let needed = 8 - bytes.iter().take(7).take_while(|&&b| b == 0).count();
        if needed > entry.value_len || entry.value_len > 8 {
            warn!(
                "Matroska: seek position {} needs {} bytes, entry has {}; update skipped",
                relative, needed, entry.value_len
            );
            return Ok(());
        }
        self.file.write_at(entry.value_at, &bytes[8 - entry.value_len..])?;
        Ok(())
    }
}

impl MediaFile for MatroskaFile {
    fn tag_file(&self) -> &TagFile {
        &self.file
    }

    fn tags(&mut self) -> CombinedTag<'_> {
        let tag: &mut dyn Tag = &mut self.tag;
        CombinedTag::new(vec![tag])
    }

    fn save_with(&mut self, options: &WriteOptions) -> Result<()> {
        self.file.ensure_writable()?;
        let rendered = self.tag.render();
        let new_len = rendered.len() as u64;
        let fits = |slot: u64| slot == new_len || slot >= new_len + 2;

        let old = self.tags_slot();
        let target = match old {
            Some((start, len)) if fits(len) => Some(start),
            _ if rendered.is_empty() => None,
            _ => self
                .elements
                .iter()
                .filter(|e| e.id == ebml::VOID)
                .map(|e| (e.offset(), e.end(u64::MAX) - e.offset()))
                .find(|&(start, len)| fits(len) && old.map_or(true, |(o, _)| o != start))
                .map(|(start, _)| start),
        };

        // Blank out the old slot unless the new element goes there.
        if let Some((start, len)) = old {
            if target != Some(start) {
                self.file.write_at(start, &render_void(len)?)?;
            }
        }

        let written_at = match target {
            Some(start) => {
                let slot = match old {
                    Some((old_start, len)) if old_start == start => len,
                    _ => self
                        .elements
                        .iter()
                        .find(|e| e.offset() == start)
                        .map_or(new_len, |e| e.end(u64::MAX) - start),
                };
                let mut bytes = rendered;
                if slot > new_len {
                    bytes.extend_from_slice(&render_void(slot - new_len)?);
                }
                self.file.write_at(start, &bytes)?;
                (new_len > 0).then_some(start)
            }
            None if rendered.is_empty() => None,
            None => {
                let end = self.segment_end()?;
                let mut bytes = rendered;
                bytes.extend_from_slice(&render_void(options.padding.max(2) as u64)?);
                self.file.insert(&bytes, end, 0)?;
                self.file.shift_invariant_region(end, bytes.len() as i64);
                propagate_size_delta(&mut self.file, &[&self.segment], bytes.len() as i64)?;
                debug!("Matroska: Tags appended at {}", end);
                Some(end)
            }
        };

        if let Some(new_at) = written_at {
            if old.map(|(start, _)| start) != Some(new_at) {
                self.update_seek_head(Some(new_at))?;
            }
        } else if old.is_some() {
            self.update_seek_head(None)?;
        }

        let file_len = self.file.length()?;
        self.segment = EbmlElement::read(&mut self.file, self.segment.offset(), u64::MAX)?;
        if self.segment.end(file_len) > file_len {
            return Err(MetaError::corrupt("Matroska", "segment size inconsistent after save"));
        }
        let tag = std::mem::take(&mut self.tag);
        self.scan()?;
        self.tag = tag;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::stream::MemoryFile;
    use ebml::{render_element, render_string, render_uint};
    use pretty_assertions::assert_eq;

    const CLUSTER_DATA: [u8; 32] = [0x5A; 32];

    fn ebml_header(doc_type: &str) -> Vec<u8> {
        render_element(ebml::EBML_HEADER, &render_string(ebml::DOC_TYPE, doc_type))
    }

    fn info() -> Vec<u8> {
        let mut body = render_uint(ebml::TIMECODE_SCALE, 1_000_000);
        body.extend_from_slice(&render_element(ebml::DURATION, &2500.0f64.to_be_bytes()));
        render_element(ebml::INFO, &body)
    }

    fn tracks() -> Vec<u8> {
        let mut audio = render_element(ebml::SAMPLING_FREQUENCY, &48_000.0f32.to_be_bytes());
        audio.extend_from_slice(&render_uint(ebml::CHANNELS, 2));
        let mut entry = render_uint(ebml::TRACK_NUMBER, 1);
        entry.extend_from_slice(&render_uint(ebml::TRACK_TYPE, 2));
        entry.extend_from_slice(&render_string(ebml::CODEC_ID, "A_OPUS"));
        entry.extend_from_slice(&render_element(ebml::AUDIO, &audio));
        render_element(ebml::TRACKS, &render_element(ebml::TRACK_ENTRY, &entry))
    }

    /// Seek head with a Tags entry; its 4-byte position is patched by
    /// `build`.
    fn seek_head(tags_at: u32) -> Vec<u8> {
        let mut seek = render_element(ebml::SEEK_ID, &ebml::encode_id(ebml::TAGS));
        seek.extend_from_slice(&render_element(ebml::SEEK_POSITION, &tags_at.to_be_bytes()));
        render_element(ebml::SEEK_HEAD, &render_element(ebml::SEEK, &seek))
    }

    /// EBML header, then a segment with seek head, info, tracks, `middle`
    /// and one cluster. Returns the file and the segment payload offset.
    fn build(middle: &[u8], tags_at: u32) -> (Vec<u8>, u64) {
        let mut body = seek_head(tags_at);
        body.extend_from_slice(&info());
        body.extend_from_slice(&tracks());
        body.extend_from_slice(middle);
        body.extend_from_slice(&render_element(ebml::CLUSTER, &CLUSTER_DATA));
        let mut out = ebml_header("matroska");
        let segment_payload = out.len() + 4 + 8;
        out.extend_from_slice(&encode_id_and_size(ebml::SEGMENT, body.len() as u64));
        out.extend_from_slice(&body);
        (out, segment_payload as u64)
    }

    fn encode_id_and_size(id: u32, size: u64) -> Vec<u8> {
        let mut out = ebml::encode_id(id);
        out.extend_from_slice(&ebml::encode_vint(size, 8).unwrap());
        out
    }

    fn tags_with_title(title: &str) -> Vec<u8> {
        let mut tag = MatroskaTag::new();
        tag.set_title(title);
        tag.render()
    }

    fn cluster_bytes(data: &[u8], file: &MatroskaFile) -> Vec<u8> {
        let region = file.tag_file().invariant_region().unwrap();
        data[region.start as usize..region.end as usize].to_vec()
    }

    #[test]
    fn reads_info_tracks_and_tags() {
        let (data, _) = build(&tags_with_title("Film"), 0);
        let mut f = MatroskaFile::open(MemoryFile::new("a.mkv", data), ReadStyle::default()).unwrap();
        assert_eq!(f.doc_type(), "matroska");
        let props = *f.properties().unwrap();
        assert_eq!(props.duration_ms, 2500);
        assert_eq!(props.sample_rate, 48_000);
        assert_eq!(props.channels, 2);
        assert_eq!(f.tracks()[0].codec_id, "A_OPUS");
        assert_eq!(f.tags().title().as_deref(), Some("Film"));
    }

    #[test]
    fn smaller_tags_leave_a_void_in_place() {
        let mut middle = tags_with_title("A fairly long title");
        middle.extend_from_slice(&render_void(20).unwrap());
        let (data, _) = build(&middle, 0);
        let mem = MemoryFile::new("a.mkv", data.clone());
        let mut f = MatroskaFile::open(mem.clone(), ReadStyle::NONE).unwrap();
        f.tags().set_title("Short");
        f.save().unwrap();

        let after = mem.contents();
        assert_eq!(after.len(), data.len());
        assert_eq!(cluster_bytes(&after, &f), render_element(ebml::CLUSTER, &CLUSTER_DATA));
        let mut again = MatroskaFile::open(mem, ReadStyle::NONE).unwrap();
        assert_eq!(again.tags().title().as_deref(), Some("Short"));
    }

    #[test]
    fn larger_tags_move_to_the_end_and_update_seek_head() {
        let (data, segment_payload) = build(&tags_with_title("T"), 0);
        let mem = MemoryFile::new("a.mkv", data.clone());
        let mut f = MatroskaFile::open(mem.clone(), ReadStyle::NONE).unwrap();
        let region = f.tag_file().invariant_region().unwrap();
        f.tags().set_title("A title that no longer fits");
        f.save_with(&WriteOptions::default().padding(16)).unwrap();

        // clusters did not move
        assert_eq!(f.tag_file().invariant_region(), Some(region));
        let after = mem.contents();
        let cluster = render_element(ebml::CLUSTER, &CLUSTER_DATA);
        assert_eq!(&after[region.start as usize..region.end as usize], &cluster[..]);
        let old_tags_at = region.start as usize - tags_with_title("T").len();
        assert_eq!(after[old_tags_at], ebml::VOID as u8);
        let segment_size = ebml::read_vint(&after[segment_payload as usize - 8..]).unwrap().0;
        assert_eq!(segment_size, Some(after.len() as u64 - segment_payload));

        let mut again = MatroskaFile::open(mem.clone(), ReadStyle::NONE).unwrap();
        assert_eq!(again.tags().title().as_deref(), Some("A title that no longer fits"));
        let tags_el = again.elements().iter().find(|e| e.id == ebml::TAGS).unwrap();
        assert_eq!(tags_el.offset(), region.end);
        // appended tags stay outside the media region
        assert_eq!(again.tag_file().invariant_region(), Some(region));
        let seek = again.seeks.iter().find(|s| s.id == ebml::TAGS).unwrap();
        assert_eq!(seek.position, region.end - segment_payload);
    }

    #[test]
    fn resave_is_stable() {
        let (data, _) = build(&tags_with_title("Same"), 0);
        let mem = MemoryFile::new("a.mkv", data.clone());
        let mut f = MatroskaFile::open(mem.clone(), ReadStyle::NONE).unwrap();
        f.save().unwrap();
        assert_eq!(mem.contents(), data);
    }

    #[test]
    fn unknown_doc_type_and_missing_magic() {
        let mut data = ebml_header("dvd");
        data.extend_from_slice(&encode_id_and_size(ebml::SEGMENT, 0));
        let err = MatroskaFile::open(MemoryFile::new("a.mkv", data), ReadStyle::NONE).err().unwrap();
        assert!(err.is_unsupported());
        let err = MatroskaFile::open(MemoryFile::new("a.mkv", vec![0; 16]), ReadStyle::NONE).err();
        assert!(matches!(err, Some(MetaError::NoHeader("Matroska"))));
    }

    #[test]
    fn unknown_size_cluster_ends_walk() {
        let (mut data, _) = build(&[], 0);
        let cluster_at = data.len() - (CLUSTER_DATA.len() + 5);
        // cluster size byte -> unknown
        data[cluster_at + 4] = 0xFF;
        let f = MatroskaFile::open(MemoryFile::new("a.mkv", data.clone()), ReadStyle::NONE).unwrap();
        assert!(!f.tag_file().is_possibly_corrupt());
        assert_eq!(f.elements().last().unwrap().id, ebml::CLUSTER);
        assert_eq!(f.tag_file().invariant_region().unwrap().end, data.len() as u64);
    }
}
