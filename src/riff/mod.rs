//! RIFF containers: WAV and AVI.
//!
//! Tags live in `LIST INFO`, `LIST MID ` and `id3 ` chunks inside the
//! RIFF chunk, and in a DivX footer after it.

pub mod avi;
pub mod chunk;
pub mod divx;
pub mod info;
pub mod wave;

use log::{debug, trace};

pub use avi::{AviHeader, AviInfo, AviStream};
pub use chunk::ChunkHeader;
pub use divx::DivxTag;
pub use info::ListTag;
pub use wave::WaveFormat;

use crate::common::config::{ReadStyle, WriteOptions};
use crate::common::error::{MetaError, Result};
use crate::common::file::TagFile;
use crate::common::header::propagate_size_delta;
use crate::common::media::{AudioProperties, MediaFile};
use crate::common::stream::FileAbstraction;
use crate::common::tag::{CombinedTag, Tag};
use crate::id3::tags::Id3v2Tag;
use crate::id3::writer;
use chunk::{read_chunks, render_chunk, HEADER_SIZE};

/// Chunk ids an embedded ID3v2 tag is found under.
const ID3_CHUNKS: &[&[u8; 4]] = &[b"id3 ", b"ID3 ", b"ID32"];

/// A pending rewrite inside a container: `replace` bytes at `start`
/// become `bytes`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ChunkEdit {
    pub start: u64,
    pub replace: u64,
    pub bytes: Vec<u8>,
}

impl ChunkEdit {
    /// Replace `existing` with `bytes`, or append `bytes` at `append_at`.
    /// Nothing to do when neither exists.
    pub fn new(existing: Option<&ChunkHeader>, bytes: Vec<u8>, append_at: u64) -> Option<Self> {
        match existing {
            Some(chunk) => Some(ChunkEdit {
                start: chunk.offset(),
                replace: chunk.padded_size(),
                bytes,
            }),
            None if bytes.is_empty() => None,
            None => Some(ChunkEdit {
                start: append_at,
                replace: 0,
                bytes,
            }),
        }
    }
}

/// Apply `edits` back to front so earlier offsets stay valid, then resize
/// `container` by the total. Returns the total size change.
pub(crate) fn apply_edits(file: &mut TagFile, container: &ChunkHeader, mut edits: Vec<ChunkEdit>) -> Result<i64> {
    edits.sort_by(|a, b| b.start.cmp(&a.start));
    let mut total = 0i64;
    for edit in edits {
        trace!("chunk edit at {}: {} -> {} bytes", edit.start, edit.replace, edit.bytes.len());
        file.insert(&edit.bytes, edit.start, edit.replace)?;
        let delta = edit.bytes.len() as i64 - edit.replace as i64;
        file.shift_invariant_region(edit.start + edit.replace, delta);
        total += delta;
    }
    propagate_size_delta(file, &[container], total)?;
    Ok(total)
}

/// Where the pieces of a RIFF file are.
#[derive(Debug, Clone)]
struct Layout {
    riff: ChunkHeader,
    form: [u8; 4],
    chunks: Vec<ChunkHeader>,
    info: Option<ChunkHeader>,
    movie_id: Option<ChunkHeader>,
    id3: Option<ChunkHeader>,
    /// Offset of a DivX footer.
    divx: Option<u64>,
}

impl Layout {
    fn scan(file: &mut TagFile) -> Result<Self> {
        let head = file.read_at(0, 12)?;
        let big_endian = match head.get(0..4) {
            Some(b"RIFF") => false,
            Some(b"RIFX") => true,
            _ => return Err(MetaError::NoHeader("RIFF")),
        };
        if head.len() < 12 {
            return Err(MetaError::corrupt("RIFF", "header truncated"));
        }
        let riff = ChunkHeader::parse(&head, 0, big_endian)?;
        let form = [head[8], head[9], head[10], head[11]];

        let file_len = file.length()?;
        let declared_end = HEADER_SIZE + riff.size as u64;
        if declared_end > file_len {
            file.mark_corrupt(format!("RIFF size {} exceeds file length {}", riff.size, file_len));
        }
        let riff_end = declared_end.min(file_len);
        let chunks = read_chunks(file, 12, riff_end, big_endian)?;

        let mut layout = Layout {
            riff,
            form,
            chunks: Vec::new(),
            info: None,
            movie_id: None,
            id3: None,
            divx: None,
        };
        for chunk in &chunks {
            if &chunk.id == b"LIST" {
                let list_type = file.read_at(chunk.payload_start(), 4)?;
                match list_type.data() {
                    b"INFO" => layout.info = Some(chunk.clone()),
                    b"MID " => layout.movie_id = Some(chunk.clone()),
                    _ => {}
                }
            } else if ID3_CHUNKS.contains(&&chunk.id) && layout.id3.is_none() {
                layout.id3 = Some(chunk.clone());
            }
        }
        layout.chunks = chunks;

        let tail = riff_end + (riff_end & 1).min(file_len - riff_end);
        if file_len >= tail + divx::TAG_SIZE as u64 {
            let at = file_len - divx::TAG_SIZE as u64;
            if file.read_at(at + 121, 7)?.data() == divx::MAGIC {
                layout.divx = Some(at);
            }
        }
        Ok(layout)
    }

    fn big_endian(&self) -> bool {
        self.riff.big_endian
    }

    fn chunk(&self, id: &[u8; 4]) -> Option<&ChunkHeader> {
        self.chunks.iter().find(|c| &c.id == id)
    }

    /// Where new chunks go: the end of the RIFF payload.
    fn append_at(&self) -> u64 {
        self.chunks.last().map_or(12, |c| c.end())
    }
}

/// What a RIFF file carries besides tags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RiffContent {
    Wave { format: WaveFormat, data_size: u64 },
    Avi(AviInfo),
    Other([u8; 4]),
}

impl RiffContent {
    pub fn properties(&self, fact_samples: Option<u32>) -> Option<AudioProperties> {
        match self {
            RiffContent::Wave { format, data_size } => Some(format.properties(*data_size, fact_samples)),
            RiffContent::Avi(info) => Some(info.properties()),
            RiffContent::Other(_) => None,
        }
    }
}

/// A WAV or AVI file.
pub struct RiffFile {
    file: TagFile,
    layout: Layout,
    content: Option<RiffContent>,
    properties: Option<AudioProperties>,
    pub info: Option<ListTag>,
    pub movie_id: Option<ListTag>,
    pub id3v2: Option<Id3v2Tag>,
    pub divx: Option<DivxTag>,
}

impl RiffFile {
    pub fn open(abstraction: impl FileAbstraction + 'static, style: ReadStyle) -> Result<Self> {
        let mut file = TagFile::new(abstraction);
        let layout = Layout::scan(&mut file)?;
        let be = layout.big_endian();

        let read_list = |file: &mut TagFile, chunk: Option<&ChunkHeader>| -> Result<Option<ListTag>> {
            let Some(chunk) = chunk else { return Ok(None) };
            let payload = file.read_exact_at(chunk.payload_start(), chunk.size as usize, "RIFF")?;
            match ListTag::parse(&payload, be) {
                Ok(tag) => Ok(Some(tag)),
                Err(err) if err.is_corrupt() => {
                    file.mark_corrupt(format!("LIST at {}: {}", chunk.offset(), err));
                    Ok(None)
                }
                Err(err) => Err(err),
            }
        };
        let info = read_list(&mut file, layout.info.as_ref())?;
        let movie_id = read_list(&mut file, layout.movie_id.as_ref())?;

        let id3v2 = match &layout.id3 {
            Some(chunk) => match Id3v2Tag::read(&mut file, chunk.payload_start(), style) {
                Ok(tag) => Some(tag),
                Err(err) if err.is_corrupt() => {
                    file.mark_corrupt(format!("ID3v2 chunk at {}: {}", chunk.offset(), err));
                    None
                }
                Err(err) => {
                    debug!("RIFF: ID3v2 chunk skipped: {}", err);
                    None
                }
            },
            None => None,
        };

        let divx = match layout.divx {
            Some(at) => Some(DivxTag::parse(&file.read_exact_at(at, divx::TAG_SIZE, "DivX")?)?),
            None => None,
        };

        let media = match &layout.form {
            b"WAVE" => layout.chunk(b"data"),
            b"AVI " => {
                let mut movi = None;
                for chunk in layout.chunks.iter().filter(|c| &c.id == b"LIST") {
                    if file.read_at(chunk.payload_start(), 4)?.data() == b"movi" {
                        movi = Some(chunk);
                        break;
                    }
                }
                movi
            }
            _ => None,
        };
        if let Some(media) = media {
            file.set_invariant_region(media.payload_start(), media.payload_start() + media.size as u64);
        }

        let (content, properties) = if style.properties {
            let (content, fact) = read_content(&mut file, &layout)?;
            let properties = content.as_ref().and_then(|c| c.properties(fact));
            (content, properties)
        } else {
            (None, None)
        };

        Ok(RiffFile {
            file,
            layout,
            content,
            properties,
            info,
            movie_id,
            id3v2,
            divx,
        })
    }

    /// The RIFF form type, `WAVE` or `AVI `.
    pub fn form(&self) -> [u8; 4] {
        self.layout.form
    }

    pub fn content(&self) -> Option<&RiffContent> {
        self.content.as_ref()
    }

    pub fn properties(&self) -> Option<&AudioProperties> {
        self.properties.as_ref()
    }

    pub fn chunks(&self) -> &[ChunkHeader] {
        &self.layout.chunks
    }

    pub fn info_mut(&mut self) -> &mut ListTag {
        self.info.get_or_insert_with(|| ListTag::new(info::INFO))
    }

    pub fn id3v2_mut(&mut self) -> &mut Id3v2Tag {
        self.id3v2.get_or_insert_with(Id3v2Tag::new)
    }
}

fn read_content(file: &mut TagFile, layout: &Layout) -> Result<(Option<RiffContent>, Option<u32>)> {
    let be = layout.big_endian();
    match &layout.form {
        b"WAVE" => {
            let Some(fmt) = layout.chunk(b"fmt ") else {
                debug!("WAV: no fmt chunk");
                return Ok((None, None));
            };
            let raw = file.read_exact_at(fmt.payload_start(), fmt.size as usize, "WAV")?;
            let format = WaveFormat::parse(&raw)?;
            let data_size = layout.chunk(b"data").map_or(0, |c| c.size as u64);
            let fact = match layout.chunk(b"fact") {
                Some(c) if c.size >= 4 => Some(file.read_at(c.payload_start(), 4)?.to_uint(be)),
                _ => None,
            };
            Ok((Some(RiffContent::Wave { format, data_size }), fact))
        }
        b"AVI " => {
            for chunk in layout.chunks.iter().filter(|c| &c.id == b"LIST") {
                let payload = file.read_exact_at(chunk.payload_start(), chunk.size as usize, "AVI")?;
                if payload.starts_with(b"hdrl") {
                    return Ok((Some(RiffContent::Avi(AviInfo::parse(&payload[4..])?)), None));
                }
            }
            debug!("AVI: no hdrl list");
            Ok((None, None))
        }
        other => Ok((Some(RiffContent::Other(*other)), None)),
    }
}

impl MediaFile for RiffFile {
    fn tag_file(&self) -> &TagFile {
        &self.file
    }

    fn tags(&mut self) -> CombinedTag<'_> {
        let mut tags: Vec<&mut dyn Tag> = Vec::new();
        if let Some(id3) = self.id3v2.as_mut() {
            tags.push(id3);
        }
        let info: &mut dyn Tag = self.info.get_or_insert_with(|| ListTag::new(info::INFO));
        tags.push(info);
        if let Some(movie_id) = self.movie_id.as_mut() {
            tags.push(movie_id);
        }
        if let Some(divx) = self.divx.as_mut() {
            tags.push(divx);
        }
        CombinedTag::new(tags)
    }

    fn save_with(&mut self, options: &WriteOptions) -> Result<()> {
        self.file.ensure_writable()?;
        let be = self.layout.big_endian();

        // The DivX footer sits outside the RIFF chunk.
        if let Some(at) = self.layout.divx {
            let bytes = match &self.divx {
                Some(tag) if !tag.is_empty() => tag.render(),
                _ => Vec::new(),
            };
            self.file.insert(&bytes, at, divx::TAG_SIZE as u64)?;
        } else if let Some(tag) = self.divx.as_ref().filter(|t| !t.is_empty()) {
            let end = self.file.length()?;
            self.file.insert(&tag.render(), end, 0)?;
        }

        let list_bytes = |tag: &Option<ListTag>| -> Result<Vec<u8>> {
            match tag {
                Some(tag) if !tag.is_empty() => render_chunk(b"LIST", &tag.render(be)?, be),
                _ => Ok(Vec::new()),
            }
        };
        let id3_bytes = match self.id3v2.as_mut() {
            Some(tag) if !tag.is_empty() => {
                tag.set_original_size(self.layout.id3.as_ref().map(|c| c.size as u64));
                let id = self.layout.id3.as_ref().map_or(*b"id3 ", |c| c.id);
                render_chunk(&id, &writer::render_tag(tag, options)?, be)?
            }
            _ => Vec::new(),
        };

        let append_at = self.layout.append_at();
        let edits: Vec<ChunkEdit> = [
            ChunkEdit::new(self.layout.info.as_ref(), list_bytes(&self.info)?, append_at),
            ChunkEdit::new(self.layout.movie_id.as_ref(), list_bytes(&self.movie_id)?, append_at),
            ChunkEdit::new(self.layout.id3.as_ref(), id3_bytes, append_at),
        ]
        .into_iter()
        .flatten()
        .collect();
        let total = apply_edits(&mut self.file, &self.layout.riff, edits)?;
        debug!("RIFF: tags rewritten, RIFF size changed by {}", total);

        self.layout = Layout::scan(&mut self.file)?;
        if let (Some(tag), Some(chunk)) = (self.id3v2.as_mut(), self.layout.id3.as_ref()) {
            tag.set_original_size(Some(chunk.size as u64));
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::common::stream::MemoryFile;
    use crate::riff::wave::tests::cd_audio;
    use pretty_assertions::assert_eq;

    pub(crate) const AUDIO: [u8; 64] = [0x3C; 64];

    /// RIFF/WAVE around `chunks`, followed by fmt and data.
    pub(crate) fn wav(chunks: &[Vec<u8>]) -> Vec<u8> {
        let mut body = b"WAVE".to_vec();
        for chunk in chunks {
            body.extend_from_slice(chunk);
        }
        body.extend_from_slice(&render_chunk(b"fmt ", &cd_audio().render(), false).unwrap());
        body.extend_from_slice(&render_chunk(b"data", &AUDIO, false).unwrap());
        render_chunk(b"RIFF", &body, false).unwrap()
    }

    fn riff_size(bytes: &[u8]) -> u32 {
        u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]])
    }

    #[test]
    fn reads_wave_properties() {
        let f = RiffFile::open(MemoryFile::new("a.wav", wav(&[])), ReadStyle::default()).unwrap();
        assert_eq!(&f.form(), b"WAVE");
        let props = f.properties().unwrap();
        assert_eq!(props.sample_rate, 44100);
        assert_eq!(props.channels, 2);
        assert!(f.info.is_none());
    }

    #[test]
    fn adding_info_appends_a_list_and_grows_riff() {
        let mem = MemoryFile::new("a.wav", wav(&[]));
        let before = mem.contents();
        let mut f = RiffFile::open(mem.clone(), ReadStyle::NONE).unwrap();
        f.tags().set_title("Take 1");
        f.save().unwrap();

        let after = mem.contents();
        let again = RiffFile::open(mem.clone(), ReadStyle::NONE).unwrap();
        assert_eq!(again.info.as_ref().and_then(|t| t.title()).as_deref(), Some("Take 1"));
        assert_eq!(riff_size(&after) as usize, after.len() - 8);
        assert_eq!(&after[8..before.len()], &before[8..]);
        let region = again.tag_file().invariant_region().unwrap();
        assert_eq!(&after[region.start as usize..region.end as usize], &AUDIO[..]);
    }

    #[test]
    fn clearing_tags_removes_chunks() {
        let mut tag = ListTag::new(info::INFO);
        tag.set_artist("X");
        let list = render_chunk(b"LIST", &tag.render(false).unwrap(), false).unwrap();
        let mem = MemoryFile::new("a.wav", wav(&[list]));
        let mut f = RiffFile::open(mem.clone(), ReadStyle::NONE).unwrap();
        assert_eq!(f.tags().artist().as_deref(), Some("X"));
        f.tags().clear();
        f.save().unwrap();
        assert_eq!(mem.contents(), wav(&[]));
    }

    #[test]
    fn id3_chunk_growth_shifts_audio() {
        let mut id3 = Id3v2Tag::new();
        id3.set_title("a");
        let raw = writer::render_tag(&id3, &WriteOptions::default().padding(0)).unwrap();
        let chunk = render_chunk(b"id3 ", &raw, false).unwrap();
        let mem = MemoryFile::new("a.wav", wav(&[chunk]));
        let mut f = RiffFile::open(mem.clone(), ReadStyle::NONE).unwrap();
        let start = f.tag_file().invariant_region().unwrap().start;

        f.id3v2_mut().set_title("a much longer title");
        f.save_with(&WriteOptions::default().padding(0)).unwrap();
        let grown = ("a much longer title".len() - 1) as u64;
        let region = f.tag_file().invariant_region().unwrap();
        assert_eq!(region.start, start + grown);
        assert_eq!(&mem.contents()[region.start as usize..region.end as usize], &AUDIO[..]);

        let again = RiffFile::open(mem, ReadStyle::NONE).unwrap();
        assert_eq!(again.id3v2.as_ref().and_then(|t| t.title()).as_deref(), Some("a much longer title"));
    }

    #[test]
    fn divx_footer_is_read_and_rewritten() {
        let mut data = wav(&[]);
        let mut divx = DivxTag::new();
        divx.set_title("Clip");
        data.extend_from_slice(&divx.render());
        let mem = MemoryFile::new("a.avi", data);
        let mut f = RiffFile::open(mem.clone(), ReadStyle::NONE).unwrap();
        assert_eq!(f.divx.as_ref().and_then(|d| d.title()).as_deref(), Some("Clip"));
        f.divx.as_mut().unwrap().set_title("");
        f.save().unwrap();
        assert_eq!(mem.contents(), wav(&[]));
    }

    #[test]
    fn avi_streams_and_movi_region() {
        let hdrl = {
            let mut p = b"hdrl".to_vec();
            p.extend_from_slice(&avi::tests::hdrl_body());
            render_chunk(b"LIST", &p, false).unwrap()
        };
        let movi = {
            let mut p = b"movi".to_vec();
            p.extend_from_slice(&[7u8; 20]);
            render_chunk(b"LIST", &p, false).unwrap()
        };
        let mut body = b"AVI ".to_vec();
        body.extend_from_slice(&hdrl);
        body.extend_from_slice(&movi);
        let data = render_chunk(b"RIFF", &body, false).unwrap();
        let movi_start = (12 + hdrl.len() + 8) as u64;

        let f = RiffFile::open(MemoryFile::new("a.avi", data), ReadStyle::default()).unwrap();
        assert_eq!(f.properties().unwrap().duration_ms, 10_000);
        assert!(matches!(f.content(), Some(RiffContent::Avi(info)) if info.streams.len() == 2));
        assert_eq!(f.tag_file().invariant_region().unwrap().start, movi_start);
    }

    #[test]
    fn not_riff() {
        let err = RiffFile::open(MemoryFile::new("a.wav", vec![0; 32]), ReadStyle::NONE).err().unwrap();
        assert!(matches!(err, MetaError::NoHeader("RIFF")));
    }
}
