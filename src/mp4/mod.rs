//! ISO base media files (MP4, M4A, M4B): box tree, Apple `ilst` items and
//! chunk offset fix-ups after a resize.

pub mod atom;
pub mod ilst;

use byteorder::{BigEndian, ByteOrder};
use log::{debug, trace};

pub use atom::{BoxHeader, Mp4Box};
pub use ilst::{Mp4Cover, Mp4CoverFormat, Mp4FreeForm, Mp4Tag, Mp4Value};

use crate::common::config::{ReadStyle, WriteOptions};
use crate::common::error::{MetaError, Result};
use crate::common::file::TagFile;
use crate::common::header::propagate_size_delta;
use crate::common::media::{AudioProperties, MediaFile};
use crate::common::stream::FileAbstraction;
use crate::common::tag::{CombinedTag, Tag};
use atom::render_box;

/// MP4 audio information.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mp4Properties {
    pub audio: AudioProperties,
    /// Sample entry FourCC, e.g. `mp4a` or `alac`.
    pub codec: String,
}

/// An MP4 file with its `moov` tree loaded.
pub struct Mp4File {
    file: TagFile,
    moov: Mp4Box,
    pub tag: Mp4Tag,
    properties: Option<Mp4Properties>,
}

impl Mp4File {
    pub fn open(abstraction: impl FileAbstraction + 'static, style: ReadStyle) -> Result<Self> {
        let mut file = TagFile::new(abstraction);
        let file_len = file.length()?;
        let top = top_level(&mut file, file_len)?;

        let moov_header = top
            .iter()
            .find(|h| &h.kind == b"moov")
            .cloned()
            .ok_or_else(|| MetaError::corrupt("MP4", "no moov box"))?;
        let moov = load_moov(&mut file, moov_header)?;

        let mdat: Vec<&BoxHeader> = top.iter().filter(|h| &h.kind == b"mdat").collect();
        if let Some(first) = mdat.first() {
            file.set_invariant_region(first.payload_start(), first.end());
        }

        let tag = match moov.path(&[b"udta", b"meta", b"ilst"]).get(2) {
            Some(ilst) => Mp4Tag::parse(&ilst.payload)?,
            None => Mp4Tag::new(),
        };

        let properties = if style.properties {
            let stream_bytes = mdat.iter().map(|h| h.payload_size()).sum();
            read_properties(&moov, stream_bytes)
        } else {
            None
        };

        Ok(Mp4File {
            file,
            moov,
            tag,
            properties,
        })
    }

    pub fn properties(&self) -> Option<&Mp4Properties> {
        self.properties.as_ref()
    }

    pub fn moov(&self) -> &Mp4Box {
        &self.moov
    }
}

/// Read the top-level boxes. A first box that does not parse means this
/// is not an MP4 file; a later one marks the file possibly corrupt.
fn top_level(file: &mut TagFile, file_len: u64) -> Result<Vec<BoxHeader>> {
    let mut boxes: Vec<BoxHeader> = Vec::new();
    let mut pos = 0;
    while pos + 8 <= file_len {
        match BoxHeader::read(file, pos, file_len) {
            Ok(header) if boxes.is_empty() && !header.kind.iter().all(|b| b.is_ascii_graphic() || *b == b' ') => {
                return Err(MetaError::NoHeader("MP4"));
            }
            Ok(header) => {
                pos = header.end();
                boxes.push(header);
            }
            Err(err) if boxes.is_empty() => {
                debug!("MP4: first box unreadable: {}", err);
                return Err(MetaError::NoHeader("MP4"));
            }
            Err(err) => {
                file.mark_corrupt(format!("top-level box at {}: {}", pos, err));
                break;
            }
        }
    }
    Ok(boxes)
}

fn load_moov(file: &mut TagFile, header: BoxHeader) -> Result<Mp4Box> {
    let payload = file.read_exact_at(header.payload_start(), header.payload_size() as usize, "MP4")?;
    Mp4Box::parse(header, &payload)
}

fn read_properties(moov: &Mp4Box, stream_bytes: u64) -> Option<Mp4Properties> {
    let mvhd = moov.child(b"mvhd")?;
    let d = &mvhd.payload;
    let (timescale, duration) = match *d.first()? {
        0 if d.len() >= 20 => (BigEndian::read_u32(&d[12..16]), BigEndian::read_u32(&d[16..20]) as u64),
        1 if d.len() >= 32 => (BigEndian::read_u32(&d[20..24]), BigEndian::read_u64(&d[24..32])),
        version => {
            debug!("MP4: mvhd version {} unsupported", version);
            return None;
        }
    };

    let mut audio = AudioProperties::default();
    if timescale > 0 {
        audio.duration_ms = duration * 1000 / timescale as u64;
    }
    if audio.duration_ms > 0 {
        audio.bitrate = (stream_bytes * 8 / audio.duration_ms) as u32;
    }

    let mut codec = String::new();
    for trak in moov.children.iter().filter(|c| &c.header.kind == b"trak") {
        let is_audio = trak
            .path(&[b"mdia", b"hdlr"])
            .get(1)
            .map_or(false, |hdlr| hdlr.payload.get(8..12) == Some(b"soun".as_slice()));
        if !is_audio {
            continue;
        }
        let Some(stsd) = trak.path(&[b"mdia", b"minf", b"stbl", b"stsd"]).get(3).copied() else {
            continue;
        };
        // full box header and entry count, then the first sample entry
        let Some(entry) = stsd.payload.get(8..) else { continue };
        if entry.len() < 36 {
            debug!("MP4: audio sample entry too short");
            continue;
        }
        codec = String::from_utf8_lossy(&entry[4..8]).into_owned();
        audio.channels = BigEndian::read_u16(&entry[24..26]) as u8;
        audio.bits_per_sample = BigEndian::read_u16(&entry[26..28]) as u8;
        audio.sample_rate = BigEndian::read_u32(&entry[32..36]) >> 16;
        break;
    }
    Some(Mp4Properties { audio, codec })
}

/// `content` followed by a `free` box filling `available`, or by
/// `padding` bytes of new `free` box when it does not fit.
fn pad(mut content: Vec<u8>, available: u64, padding: usize) -> Vec<u8> {
    let len = content.len() as u64;
    let free = if len == available {
        None
    } else if len + 8 <= available {
        Some(available - len - 8)
    } else if padding >= 8 {
        Some(padding as u64 - 8)
    } else {
        None
    };
    if let Some(free) = free {
        content.extend_from_slice(&render_box(b"free", &vec![0; free as usize]));
    }
    content
}

/// A new `meta` box: full box header, `mdir` handler and `ilst`.
fn new_meta(ilst: &[u8]) -> Vec<u8> {
    let mut hdlr = vec![0u8; 8];
    hdlr.extend_from_slice(b"mdirappl");
    hdlr.extend_from_slice(&[0; 9]);
    let mut payload = vec![0u8; 4];
    payload.extend_from_slice(&render_box(b"hdlr", &hdlr));
    payload.extend_from_slice(ilst);
    render_box(b"meta", &payload)
}

/// Shift every `stco`/`co64` entry at or past `threshold` by `delta`.
fn patch_chunk_offsets(file: &mut TagFile, moov: &Mp4Box, threshold: u64, delta: i64) -> Result<()> {
    let mut tables = Vec::new();
    moov.descendants(b"stco", &mut tables);
    moov.descendants(b"co64", &mut tables);
    for table in tables {
        let wide = &table.header.kind == b"co64";
        let width = if wide { 8 } else { 4 };
        let mut payload = table.payload.clone();
        let count = payload.get(4..8).map_or(0, BigEndian::read_u32) as usize;
        if payload.len() < 8 + count * width {
            return Err(MetaError::corrupt("MP4", format!("{} table truncated", table.header.name())));
        }
        for i in 0..count {
            let at = 8 + i * width;
            let offset = if wide {
                BigEndian::read_u64(&payload[at..at + 8])
            } else {
                BigEndian::read_u32(&payload[at..at + 4]) as u64
            };
            if offset < threshold {
                continue;
            }
            let moved = offset
                .checked_add_signed(delta)
                .ok_or_else(|| MetaError::corrupt("MP4", "chunk offset underflow"))?;
            if wide {
                BigEndian::write_u64(&mut payload[at..at + 8], moved);
            } else {
                let moved = u32::try_from(moved)
                    .map_err(|_| MetaError::unsupported("MP4", "chunk offset no longer fits stco"))?;
                BigEndian::write_u32(&mut payload[at..at + 4], moved);
            }
        }
        trace!("MP4: patched {} entries of {} at {}", count, table.header.name(), table.header.offset());
        file.write_at(table.header.payload_start(), &payload)?;
    }
    Ok(())
}

impl MediaFile for Mp4File {
    fn tag_file(&self) -> &TagFile {
        &self.file
    }

    fn tags(&mut self) -> CombinedTag<'_> {
        let tag: &mut dyn Tag = &mut self.tag;
        CombinedTag::new(vec![tag])
    }

    fn save_with(&mut self, options: &WriteOptions) -> Result<()> {
        self.file.ensure_writable()?;
        let moov_offset = self.moov.header.offset();
        let old_moov_end = self.moov.header.end();
        let path = self.moov.path(&[b"udta", b"meta", b"ilst"]);
        if path.len() < 3 && self.tag.is_empty() {
            return Ok(());
        }
        let ilst = render_box(b"ilst", &self.tag.render()?);

        // ancestors innermost first
        let mut ancestors: Vec<&BoxHeader> = path.iter().take(2).rev().map(|b| &b.header).collect();
        ancestors.push(&self.moov.header);
        let (start, replace, bytes) = match path.len() {
            3 => {
                let (meta, old) = (path[1], path[2]);
                let mut replace = old.header.size();
                // a free box right after ilst is ours to reuse
                let next = meta
                    .children
                    .iter()
                    .position(|c| c.header == old.header)
                    .and_then(|i| meta.children.get(i + 1));
                if let Some(free) = next.filter(|c| &c.header.kind == b"free") {
                    replace += free.header.size();
                }
                (old.header.offset(), replace, pad(ilst, replace, options.padding))
            }
            2 => (path[1].header.end(), 0, pad(ilst, 0, options.padding)),
            1 => (path[0].header.end(), 0, new_meta(&pad(ilst, 0, options.padding))),
            _ => (
                self.moov.header.end(),
                0,
                render_box(b"udta", &new_meta(&pad(ilst, 0, options.padding))),
            ),
        };

        self.file.insert(&bytes, start, replace)?;
        let delta = bytes.len() as i64 - replace as i64;
        let net = propagate_size_delta(&mut self.file, &ancestors, delta)?;
        debug!("MP4: ilst rewritten at {}, moov changed by {}", start, net);

        let file_len = self.file.length()?;
        let moov_header = BoxHeader::read(&mut self.file, moov_offset, file_len)?;
        let moov = load_moov(&mut self.file, moov_header.clone())?;
        if net != 0 {
            self.file.shift_invariant_region(start, net);
            patch_chunk_offsets(&mut self.file, &moov, old_moov_end, net)?;
            self.moov = load_moov(&mut self.file, moov_header)?;
        } else {
            self.moov = moov;
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::common::stream::MemoryFile;
    use pretty_assertions::assert_eq;

    const AUDIO: [u8; 100] = [0x5A; 100];

    fn full_box(kind: &[u8; 4], body: &[u8]) -> Vec<u8> {
        let mut payload = vec![0u8; 4];
        payload.extend_from_slice(body);
        render_box(kind, &payload)
    }

    fn moov(chunk_offset: u32, udta: Option<Vec<u8>>) -> Vec<u8> {
        let mut mvhd = vec![0u8; 12];
        mvhd.extend_from_slice(&1000u32.to_be_bytes());
        mvhd.extend_from_slice(&5000u32.to_be_bytes());
        mvhd.extend_from_slice(&[0; 80]);

        let mut entry = vec![0u8; 6];
        entry.extend_from_slice(&1u16.to_be_bytes());
        entry.extend_from_slice(&[0; 8]);
        entry.extend_from_slice(&2u16.to_be_bytes());
        entry.extend_from_slice(&16u16.to_be_bytes());
        entry.extend_from_slice(&[0; 4]);
        entry.extend_from_slice(&(44100u32 << 16).to_be_bytes());
        let mut stsd = 1u32.to_be_bytes().to_vec();
        stsd.extend_from_slice(&render_box(b"mp4a", &entry));
        let mut stco = 1u32.to_be_bytes().to_vec();
        stco.extend_from_slice(&chunk_offset.to_be_bytes());
        let stbl = render_box(b"stbl", &[full_box(b"stsd", &stsd), full_box(b"stco", &stco)].concat());

        let mut hdlr = vec![0u8; 4];
        hdlr.extend_from_slice(b"soun");
        hdlr.extend_from_slice(&[0; 13]);
        let mdia = render_box(b"mdia", &[full_box(b"hdlr", &hdlr), render_box(b"minf", &stbl)].concat());
        let trak = render_box(b"trak", &mdia);

        let mut payload = [render_box(b"mvhd", &mvhd), trak].concat();
        if let Some(udta) = udta {
            payload.extend_from_slice(&udta);
        }
        render_box(b"moov", &payload)
    }

    /// ftyp, moov, mdat with the chunk offset pointing at the audio.
    pub(crate) fn build(ilst: Option<&[u8]>) -> Vec<u8> {
        let ftyp = render_box(b"ftyp", b"M4A \0\0\0\0");
        let udta = ilst.map(|payload| render_box(b"udta", &new_meta(&render_box(b"ilst", payload))));
        let moov_len = moov(0, udta.clone()).len();
        let offset = (ftyp.len() + moov_len + 8) as u32;
        [ftyp, moov(offset, udta), render_box(b"mdat", &AUDIO)].concat()
    }

    fn chunk_offset(f: &Mp4File) -> u64 {
        let mut tables = Vec::new();
        f.moov().descendants(b"stco", &mut tables);
        BigEndian::read_u32(&tables[0].payload[8..12]) as u64
    }

    fn title_ilst(title: &str) -> Vec<u8> {
        let mut tag = Mp4Tag::new();
        tag.set_title(title);
        tag.render().unwrap()
    }

    #[test]
    fn reads_tags_and_properties() {
        let f = Mp4File::open(MemoryFile::new("a.m4a", build(Some(&title_ilst("Old")))), ReadStyle::default()).unwrap();
        assert_eq!(f.tag.title().as_deref(), Some("Old"));
        let props = f.properties().unwrap();
        assert_eq!(props.codec, "mp4a");
        assert_eq!(props.audio.duration_ms, 5000);
        assert_eq!(props.audio.sample_rate, 44100);
        assert_eq!(props.audio.channels, 2);
        assert_eq!(props.audio.bits_per_sample, 16);
    }

    #[test]
    fn growing_ilst_resizes_every_ancestor_and_moves_chunks() {
        let mem = MemoryFile::new("a.m4a", build(Some(&title_ilst("Old"))));
        let mut f = Mp4File::open(mem.clone(), ReadStyle::NONE).unwrap();
        let before: Vec<u64> = f
            .moov()
            .path(&[b"udta", b"meta"])
            .iter()
            .map(|b| b.header.size())
            .chain(std::iter::once(f.moov().header.size()))
            .collect();
        let region = f.tag_file().invariant_region().unwrap();

        f.tag.set_title("A much longer title than before");
        f.save_with(&WriteOptions::default().padding(0)).unwrap();
        let delta = ("A much longer title than before".len() - "Old".len()) as u64;

        let again = Mp4File::open(mem.clone(), ReadStyle::NONE).unwrap();
        let after: Vec<u64> = again
            .moov()
            .path(&[b"udta", b"meta"])
            .iter()
            .map(|b| b.header.size())
            .chain(std::iter::once(again.moov().header.size()))
            .collect();
        assert_eq!(after, before.iter().map(|s| s + delta).collect::<Vec<_>>());

        let moved = again.tag_file().invariant_region().unwrap();
        assert_eq!(moved.start, region.start + delta);
        assert_eq!(f.tag_file().invariant_region(), Some(moved));
        assert_eq!(chunk_offset(&again), moved.start);
        let bytes = mem.contents();
        assert_eq!(&bytes[moved.start as usize..moved.end as usize], &AUDIO[..]);
    }

    #[test]
    fn resave_is_idempotent() {
        let mem = MemoryFile::new("a.m4a", build(None));
        let mut f = Mp4File::open(mem.clone(), ReadStyle::NONE).unwrap();
        f.tag.set_artist("Someone");
        f.save().unwrap();
        let first = mem.contents();

        let mut again = Mp4File::open(mem.clone(), ReadStyle::NONE).unwrap();
        assert_eq!(again.tag.artist().as_deref(), Some("Someone"));
        again.save().unwrap();
        assert_eq!(mem.contents(), first);
        assert_eq!(chunk_offset(&again), again.tag_file().invariant_region().unwrap().start);
    }

    #[test]
    fn shrinking_reuses_the_space_as_free() {
        let mem = MemoryFile::new("a.m4a", build(Some(&title_ilst("A fairly long title"))));
        let len = mem.len();
        let mut f = Mp4File::open(mem.clone(), ReadStyle::NONE).unwrap();
        f.tag.set_title("Short");
        f.save().unwrap();
        assert_eq!(mem.len(), len);
        let again = Mp4File::open(mem, ReadStyle::NONE).unwrap();
        assert_eq!(again.tag.title().as_deref(), Some("Short"));
        assert!(again.moov().path(&[b"udta", b"meta", b"free"]).len() == 3);
    }

    #[test]
    fn garbage_is_not_mp4() {
        let err = Mp4File::open(MemoryFile::new("a.m4a", vec![0xFF; 64]), ReadStyle::NONE).err().unwrap();
        assert!(matches!(err, MetaError::NoHeader("MP4")));
    }
}
