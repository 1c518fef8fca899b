//! ASF (WMA/WMV).
//!
//! Everything taggable sits in the header object at the start of the file,
//! so a save re-renders that object and splices it over the old one. The
//! data object after it is the invariant region.

pub mod object;
pub mod tag;

use log::{debug, warn};

pub use object::{AsfValue, Attribute, Guid, HeaderObject};
pub use tag::AsfTag;

use crate::common::config::{ReadStyle, WriteOptions};
use crate::common::error::{MetaError, Result};
use crate::common::file::TagFile;
use crate::common::media::{AudioProperties, MediaFile};
use crate::common::stream::FileAbstraction;
use crate::common::tag::{CombinedTag, Tag};
use crate::riff::wave::WaveFormat;
use object::{parse_objects, render_objects, ObjectHeader, OBJECT_HEADER_SIZE};

/// Header object: object header, child count, two reserved bytes.
const HEADER_OBJECT_SIZE: u64 = 30;

pub struct AsfFile {
    file: TagFile,
    header_size: u64,
    /// Children of the header object in file order.
    objects: Vec<HeaderObject>,
    properties: Option<AudioProperties>,
    pub tag: AsfTag,
}

impl AsfFile {
    pub fn open(abstraction: impl FileAbstraction + 'static, style: ReadStyle) -> Result<Self> {
        let mut file = TagFile::new(abstraction);
        let head = file.read_at(0, HEADER_OBJECT_SIZE as usize)?;
        if head.len() < HEADER_OBJECT_SIZE as usize || head.get(..16) != Some(&object::HEADER.0[..]) {
            return Err(MetaError::NoHeader("ASF"));
        }
        let header = ObjectHeader::parse(&head, 0)?;
        let count = head.uint_at(24, false);
        let file_len = file.length()?;
        if header.size > file_len || header.size < HEADER_OBJECT_SIZE {
            return Err(MetaError::corrupt(
                "ASF",
                format!("header object of {} bytes in a {} byte file", header.size, file_len),
            ));
        }

        let body = file.read_exact_at(HEADER_OBJECT_SIZE, (header.size - HEADER_OBJECT_SIZE) as usize, "ASF")?;
        let objects = parse_objects(&body, Some(count))?;
        if objects.len() as u32 != count {
            file.mark_corrupt(format!("header object announces {} children, found {}", count, objects.len()));
        }

        let data = file.read_at(header.size, OBJECT_HEADER_SIZE as usize)?;
        match ObjectHeader::parse(&data, header.size) {
            Ok(data) if data.guid == object::DATA => {
                let end = (header.size + data.size).min(file_len);
                file.set_invariant_region(header.size, end);
            }
            _ => warn!("ASF: no data object after the header"),
        }

        let tag = collect_tag(&objects);
        let properties = if style.properties {
            Some(read_properties(&objects))
        } else {
            None
        };
        Ok(AsfFile {
            file,
            header_size: header.size,
            objects,
            properties,
            tag,
        })
    }

    pub fn properties(&self) -> Option<&AudioProperties> {
        self.properties.as_ref()
    }

    pub fn objects(&self) -> &[HeaderObject] {
        &self.objects
    }

    /// Children of the header object with the tag written into them and
    /// top-level padding dropped.
    fn updated_objects(&self) -> Vec<HeaderObject> {
        let mut has_content = false;
        let mut has_extended = false;
        let mut has_extension = false;
        let mut objects = Vec::with_capacity(self.objects.len() + 3);
        for object in &self.objects {
            match object {
                HeaderObject::Padding(_) => {}
                HeaderObject::ContentDescription(_) => {
                    has_content = true;
                    if !self.tag.content.is_empty() {
                        objects.push(HeaderObject::ContentDescription(self.tag.content.clone()));
                    }
                }
                HeaderObject::ExtendedContentDescription(_) => {
                    has_extended = true;
                    if !self.tag.extended.is_empty() {
                        objects.push(HeaderObject::ExtendedContentDescription(self.tag.extended.clone()));
                    }
                }
                HeaderObject::HeaderExtension(children) => {
                    has_extension = true;
                    objects.push(HeaderObject::HeaderExtension(self.updated_extension(children)));
                }
                other => objects.push(other.clone()),
            }
        }
        if !has_content && !self.tag.content.is_empty() {
            objects.push(HeaderObject::ContentDescription(self.tag.content.clone()));
        }
        if !has_extended && !self.tag.extended.is_empty() {
            objects.push(HeaderObject::ExtendedContentDescription(self.tag.extended.clone()));
        }
        if !has_extension && !(self.tag.metadata.is_empty() && self.tag.library.is_empty()) {
            objects.push(HeaderObject::HeaderExtension(self.updated_extension(&[])));
        }
        objects
    }

    fn updated_extension(&self, children: &[HeaderObject]) -> Vec<HeaderObject> {
        let mut out: Vec<HeaderObject> = children
            .iter()
            .filter(|c| !matches!(c, HeaderObject::Metadata(_) | HeaderObject::MetadataLibrary(_)))
            .cloned()
            .collect();
        if !self.tag.metadata.is_empty() {
            out.push(HeaderObject::Metadata(self.tag.metadata.clone()));
        }
        if !self.tag.library.is_empty() {
            out.push(HeaderObject::MetadataLibrary(self.tag.library.clone()));
        }
        out
    }
}

fn collect_tag(objects: &[HeaderObject]) -> AsfTag {
    let mut tag = AsfTag::new();
    for object in objects {
        match object {
            HeaderObject::ContentDescription(content) => tag.content = content.clone(),
            HeaderObject::ExtendedContentDescription(attrs) => tag.extended.extend(attrs.iter().cloned()),
            HeaderObject::HeaderExtension(children) => {
                for child in children {
                    match child {
                        HeaderObject::Metadata(attrs) => tag.metadata.extend(attrs.iter().cloned()),
                        HeaderObject::MetadataLibrary(attrs) => tag.library.extend(attrs.iter().cloned()),
                        _ => {}
                    }
                }
            }
            _ => {}
        }
    }
    tag
}

fn read_properties(objects: &[HeaderObject]) -> AudioProperties {
    let mut props = AudioProperties::default();
    for child in objects {
        match child {
            HeaderObject::FileProperties(fp) => {
                props.duration_ms = fp.duration_ms();
                if props.bitrate == 0 {
                    props.bitrate = fp.max_bitrate / 1000;
                }
            }
            HeaderObject::StreamProperties(sp) if sp.stream_type == object::AUDIO_MEDIA && props.sample_rate == 0 => {
                match WaveFormat::parse(&sp.type_specific) {
                    Ok(fmt) => {
                        props.sample_rate = fmt.sample_rate;
                        props.channels = fmt.channels as u8;
                        props.bits_per_sample = fmt.bits_per_sample as u8;
                        props.bitrate = fmt.avg_bytes_per_sec * 8 / 1000;
                    }
                    Err(err) => debug!("ASF: audio stream {} without a usable format: {}", sp.stream_number, err),
                }
            }
            _ => {}
        }
    }
    props
}

impl MediaFile for AsfFile {
    fn tag_file(&self) -> &TagFile {
        &self.file
    }

    fn tags(&mut self) -> CombinedTag<'_> {
        let tag: &mut dyn Tag = &mut self.tag;
        CombinedTag::new(vec![tag])
    }

    fn save_with(&mut self, options: &WriteOptions) -> Result<()> {
        self.file.ensure_writable()?;
        let mut objects = self.updated_objects();
        let body = render_objects(&objects)?;
        let needed = HEADER_OBJECT_SIZE + body.len() as u64;

        // Fill the old header exactly when the leftover fits a padding object.
        let padding = match self.header_size.checked_sub(needed) {
            Some(0) => None,
            Some(left) if left >= OBJECT_HEADER_SIZE => Some(left - OBJECT_HEADER_SIZE),
            _ => Some(options.padding as u64),
        };
        if let Some(size) = padding {
            objects.push(HeaderObject::Padding(size));
        }

        let body = render_objects(&objects)?;
        let count = u32::try_from(objects.len())
            .map_err(|_| MetaError::ValueError("too many header objects".into()))?;
        let size = HEADER_OBJECT_SIZE + body.len() as u64;
        let mut out = object::HEADER.0.to_vec();
        out.extend_from_slice(&size.to_le_bytes());
        out.extend_from_slice(&count.to_le_bytes());
        out.extend_from_slice(&[0x01, 0x02]);
        out.extend_from_slice(&body);

        self.file.insert(&out, 0, self.header_size)?;
        let delta = size as i64 - self.header_size as i64;
        self.file.shift_invariant_region(self.header_size, delta);
        debug!("ASF: header object rewritten, {} -> {} bytes", self.header_size, size);
        self.header_size = size;
        self.objects = objects;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asf::object::{ContentDescription, AUDIO_MEDIA, DATA, FILE_PROPERTIES, STREAM_PROPERTIES};
    use crate::common::stream::MemoryFile;
    use crate::riff::wave::tests::cd_audio;
    use pretty_assertions::assert_eq;

    fn raw_object(guid: Guid, payload: &[u8]) -> Vec<u8> {
        HeaderObject::parse(guid, payload).unwrap().render().unwrap()
    }

    fn file_properties() -> Vec<u8> {
        let mut p = vec![0u8; 80];
        // 3 s play duration plus 1.5 s preroll
        p[40..48].copy_from_slice(&45_000_000u64.to_le_bytes());
        p[56..64].copy_from_slice(&1500u64.to_le_bytes());
        p[76..80].copy_from_slice(&128_000u32.to_le_bytes());
        raw_object(FILE_PROPERTIES, &p)
    }

    fn stream_properties() -> Vec<u8> {
        let fmt = cd_audio().render();
        let mut p = vec![0u8; 54];
        p[..16].copy_from_slice(&AUDIO_MEDIA.0);
        p[40..44].copy_from_slice(&(fmt.len() as u32).to_le_bytes());
        p[48] = 1;
        p.extend_from_slice(&fmt);
        raw_object(STREAM_PROPERTIES, &p)
    }

    fn asf(children: &[Vec<u8>]) -> Vec<u8> {
        let body = children.concat();
        let mut out = object::HEADER.0.to_vec();
        out.extend_from_slice(&(HEADER_OBJECT_SIZE + body.len() as u64).to_le_bytes());
        out.extend_from_slice(&(children.len() as u32).to_le_bytes());
        out.extend_from_slice(&[1, 2]);
        out.extend_from_slice(&body);
        out.extend_from_slice(&DATA.0);
        out.extend_from_slice(&(24u64 + 16).to_le_bytes());
        out.extend_from_slice(&[0xAB; 16]);
        out
    }

    fn header_size(data: &[u8]) -> u64 {
        u64::from_le_bytes(data[16..24].try_into().unwrap())
    }

    #[test]
    fn reads_properties_and_content() {
        let content = ContentDescription {
            title: "Song".into(),
            author: "Band".into(),
            ..Default::default()
        };
        let data = asf(&[
            file_properties(),
            stream_properties(),
            HeaderObject::ContentDescription(content).render().unwrap(),
        ]);
        let mut f = AsfFile::open(MemoryFile::new("a.wma", data), ReadStyle::default()).unwrap();
        let props = *f.properties().unwrap();
        assert_eq!(props.duration_ms, 3000);
        assert_eq!(props.sample_rate, 44_100);
        assert_eq!(props.channels, 2);
        assert_eq!(f.tags().title().as_deref(), Some("Song"));
        assert_eq!(f.tags().artist().as_deref(), Some("Band"));
    }

    #[test]
    fn growing_adds_padding_and_moves_data() {
        let mem = MemoryFile::new("a.wma", asf(&[file_properties()]));
        let mut f = AsfFile::open(mem.clone(), ReadStyle::NONE).unwrap();
        f.tags().set_album("Record");
        f.tag.set("WM/MediaClassPrimaryID", vec![AsfValue::Guid(AUDIO_MEDIA)]);
        f.save_with(&WriteOptions::default().padding(100)).unwrap();

        let data = mem.contents();
        let size = header_size(&data);
        assert_eq!(&data[size as usize..size as usize + 16], &DATA.0);
        let region = f.tag_file().invariant_region().unwrap();
        assert_eq!(region.start, size);

        let again = AsfFile::open(mem.clone(), ReadStyle::NONE).unwrap();
        assert_eq!(again.tag, f.tag);
        assert!(matches!(again.objects().last(), Some(HeaderObject::Padding(100))));
    }

    #[test]
    fn shrinking_fills_with_padding_and_resave_is_stable() {
        let mut tag = AsfTag::new();
        tag.set_album("A rather long album title");
        let data = asf(&[file_properties(), HeaderObject::ExtendedContentDescription(tag.extended).render().unwrap()]);
        let original_size = header_size(&data);
        let mem = MemoryFile::new("a.wma", data);

        let mut f = AsfFile::open(mem.clone(), ReadStyle::NONE).unwrap();
        f.tags().set_album("");
        f.save().unwrap();
        let first = mem.contents();
        assert_eq!(header_size(&first), original_size);

        let mut f = AsfFile::open(mem.clone(), ReadStyle::NONE).unwrap();
        f.save().unwrap();
        assert_eq!(mem.contents(), first);
    }

    #[test]
    fn child_count_mismatch_blocks_save() {
        let mut data = asf(&[file_properties()]);
        data[24] = 3;
        let mut f = AsfFile::open(MemoryFile::new("a.wma", data), ReadStyle::NONE).unwrap();
        assert!(f.tag_file().is_possibly_corrupt());
        assert!(matches!(f.save(), Err(MetaError::PossiblyCorrupt(_))));
    }

    #[test]
    fn not_asf() {
        let err = AsfFile::open(MemoryFile::new("a.wma", vec![0; 64]), ReadStyle::NONE).err();
        assert!(matches!(err, Some(MetaError::NoHeader("ASF"))));
    }
}
