//! APEv2 tags, found at the end of MPEG, MusePack, WavPack and Monkey's
//! Audio files (and occasionally at the start).

pub mod item;

use byteorder::{ByteOrder, LittleEndian};
use log::{debug, trace};

pub use item::{ApeItem, ApeValue};

use crate::common::error::{MetaError, Result};
use crate::common::file::TagFile;
use crate::common::tag::{Tag, TagType};

pub const FOOTER_SIZE: usize = 32;
const MAGIC: &[u8; 8] = b"APETAGEX";

const HAS_HEADER: u32 = 1 << 31;
const HAS_NO_FOOTER: u32 = 1 << 30;
const IS_HEADER: u32 = 1 << 29;

/// The 32-byte block that ends (and optionally starts) an APE tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApeFooter {
    pub version: u32,
    /// Items plus footer, header excluded.
    pub tag_size: u32,
    pub item_count: u32,
    pub flags: u32,
}

impl ApeFooter {
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < FOOTER_SIZE || &data[0..8] != MAGIC {
            return Err(MetaError::NoHeader("APE"));
        }
        let footer = ApeFooter {
            version: LittleEndian::read_u32(&data[8..12]),
            tag_size: LittleEndian::read_u32(&data[12..16]),
            item_count: LittleEndian::read_u32(&data[16..20]),
            flags: LittleEndian::read_u32(&data[20..24]),
        };
        if (footer.tag_size as usize) < FOOTER_SIZE {
            return Err(MetaError::corrupt("APE", format!("tag size {} too small", footer.tag_size)));
        }
        Ok(footer)
    }

    pub fn has_header(&self) -> bool {
        self.flags & HAS_HEADER != 0
    }

    pub fn has_footer(&self) -> bool {
        self.flags & HAS_NO_FOOTER == 0
    }

    pub fn is_header(&self) -> bool {
        self.flags & IS_HEADER != 0
    }

    /// Bytes on disk including the optional header.
    pub fn complete_size(&self) -> u64 {
        self.tag_size as u64 + if self.has_header() { FOOTER_SIZE as u64 } else { 0 }
    }

    fn render(&self, is_header: bool) -> [u8; FOOTER_SIZE] {
        let mut out = [0u8; FOOTER_SIZE];
        out[0..8].copy_from_slice(MAGIC);
        LittleEndian::write_u32(&mut out[8..12], self.version);
        LittleEndian::write_u32(&mut out[12..16], self.tag_size);
        LittleEndian::write_u32(&mut out[16..20], self.item_count);
        let flags = if is_header {
            self.flags | IS_HEADER
        } else {
            self.flags & !IS_HEADER
        };
        LittleEndian::write_u32(&mut out[20..24], flags);
        out
    }
}

/// An APEv2 tag. Item keys compare case-insensitively.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApeTag {
    items: Vec<ApeItem>,
}

impl ApeTag {
    pub fn new() -> Self {
        ApeTag::default()
    }

    /// Parse the item area described by `footer`.
    pub fn parse_items(data: &[u8], footer: &ApeFooter) -> Result<Self> {
        let mut tag = ApeTag::new();
        let mut pos = 0;
        for _ in 0..footer.item_count {
            if pos >= data.len() {
                return Err(MetaError::corrupt(
                    "APE",
                    format!("{} items declared, {} found", footer.item_count, tag.items.len()),
                ));
            }
            let (item, used) = ApeItem::parse(&data[pos..])?;
            pos += used;
            tag.items.push(item);
        }
        Ok(tag)
    }

    /// Read a tag whose footer ends at `end`. Returns the tag and the offset
    /// of its first byte (header included), or `None` when there is no tag.
    pub fn read_before(file: &mut TagFile, end: u64) -> Result<Option<(Self, u64)>> {
        if end < FOOTER_SIZE as u64 {
            return Ok(None);
        }
        let footer_pos = end - FOOTER_SIZE as u64;
        let raw = file.read_at(footer_pos, FOOTER_SIZE)?;
        let footer = match ApeFooter::parse(&raw) {
            Ok(footer) => footer,
            Err(MetaError::NoHeader(_)) => return Ok(None),
            Err(err) => return Err(err),
        };
        let start = end
            .checked_sub(footer.complete_size())
            .ok_or_else(|| MetaError::corrupt("APE", "tag larger than file"))?;
        let items_pos = end - footer.tag_size as u64;
        let items_len = footer.tag_size as usize - FOOTER_SIZE;
        let data = file.read_exact_at(items_pos, items_len, "APE")?;
        trace!("APE tag at {}, {} items", start, footer.item_count);
        Ok(Some((Self::parse_items(&data, &footer)?, start)))
    }

    /// Read a tag that starts with a header at `position`. Returns the tag
    /// and its size on disk.
    pub fn read_header_at(file: &mut TagFile, position: u64) -> Result<Option<(Self, u64)>> {
        let raw = file.read_at(position, FOOTER_SIZE)?;
        let header = match ApeFooter::parse(&raw) {
            Ok(h) if h.is_header() => h,
            Ok(_) | Err(MetaError::NoHeader(_)) => return Ok(None),
            Err(err) => return Err(err),
        };
        let items_len = header.tag_size as usize - if header.has_footer() { FOOTER_SIZE } else { 0 };
        let data = file.read_exact_at(position + FOOTER_SIZE as u64, items_len, "APE")?;
        let size = FOOTER_SIZE as u64 + header.tag_size as u64;
        Ok(Some((Self::parse_items(&data, &header)?, size)))
    }

    pub fn items(&self) -> &[ApeItem] {
        &self.items
    }

    pub fn get(&self, key: &str) -> Option<&ApeItem> {
        self.items.iter().find(|i| i.key.eq_ignore_ascii_case(key))
    }

    /// Insert or replace an item.
    pub fn set(&mut self, item: ApeItem) -> Result<()> {
        if !ApeItem::is_valid_key(&item.key) {
            return Err(MetaError::ValueError(format!("invalid APE key {:?}", item.key)));
        }
        match self.items.iter_mut().find(|i| i.key.eq_ignore_ascii_case(&item.key)) {
            Some(existing) => *existing = item,
            None => self.items.push(item),
        }
        Ok(())
    }

    pub fn remove(&mut self, key: &str) {
        self.items.retain(|i| !i.key.eq_ignore_ascii_case(key));
    }

    pub fn text(&self, key: &str) -> Option<String> {
        let values = self.get(key)?.as_text()?;
        values.first().filter(|s| !s.is_empty()).cloned()
    }

    fn set_text(&mut self, key: &str, value: &str) {
        if value.is_empty() {
            self.remove(key);
        } else if let Err(err) = self.set(ApeItem::text(key, value)) {
            debug!("APE: {}", err);
        }
    }

    /// Header, items and footer.
    pub fn render(&self) -> Vec<u8> {
        let items: Vec<u8> = self.items.iter().flat_map(ApeItem::render).collect();
        let footer = ApeFooter {
            version: 2000,
            tag_size: (items.len() + FOOTER_SIZE) as u32,
            item_count: self.items.len() as u32,
            flags: HAS_HEADER,
        };
        let mut out = Vec::with_capacity(items.len() + 2 * FOOTER_SIZE);
        out.extend_from_slice(&footer.render(true));
        out.extend_from_slice(&items);
        out.extend_from_slice(&footer.render(false));
        out
    }
}

impl Tag for ApeTag {
    fn tag_type(&self) -> TagType {
        TagType::Ape
    }

    fn title(&self) -> Option<String> {
        self.text("Title")
    }

    fn artist(&self) -> Option<String> {
        self.text("Artist")
    }

    fn album(&self) -> Option<String> {
        self.text("Album")
    }

    fn comment(&self) -> Option<String> {
        self.text("Comment")
    }

    fn genre(&self) -> Option<String> {
        self.text("Genre")
    }

    fn year(&self) -> Option<u32> {
        self.text("Year")?.get(..4)?.parse().ok()
    }

    fn track(&self) -> Option<u32> {
        self.text("Track")?.split('/').next()?.trim().parse().ok()
    }

    fn set_title(&mut self, value: &str) {
        self.set_text("Title", value);
    }

    fn set_artist(&mut self, value: &str) {
        self.set_text("Artist", value);
    }

    fn set_album(&mut self, value: &str) {
        self.set_text("Album", value);
    }

    fn set_comment(&mut self, value: &str) {
        self.set_text("Comment", value);
    }

    fn set_genre(&mut self, value: &str) {
        self.set_text("Genre", value);
    }

    fn set_year(&mut self, value: u32) {
        let text = if value == 0 { String::new() } else { value.to_string() };
        self.set_text("Year", &text);
    }

    fn set_track(&mut self, value: u32) {
        let text = if value == 0 { String::new() } else { value.to_string() };
        self.set_text("Track", &text);
    }

    fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn clear(&mut self) {
        self.items.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::stream::MemoryFile;
    use pretty_assertions::assert_eq;

    fn sample() -> ApeTag {
        let mut tag = ApeTag::new();
        tag.set_title("Song");
        tag.set_track(3);
        tag.set(ApeItem::binary("Cover Art (Front)", vec![1, 2, 3])).unwrap();
        tag
    }

    #[test]
    fn render_has_header_and_footer() {
        let raw = sample().render();
        assert_eq!(&raw[..8], MAGIC);
        let header = ApeFooter::parse(&raw[..32]).unwrap();
        assert!(header.is_header());
        let footer = ApeFooter::parse(&raw[raw.len() - 32..]).unwrap();
        assert!(!footer.is_header());
        assert_eq!(footer.complete_size(), raw.len() as u64);
        assert_eq!(footer.item_count, 3);
    }

    #[test]
    fn read_from_end_of_file() {
        let mut bytes = b"audio-bytes".to_vec();
        bytes.extend_from_slice(&sample().render());
        bytes.extend_from_slice(&[0u8; 128]);
        let end = bytes.len() as u64 - 128;
        let mut file = TagFile::new(MemoryFile::new("a.mp3", bytes));
        let (tag, start) = ApeTag::read_before(&mut file, end).unwrap().unwrap();
        assert_eq!(start, 11);
        assert_eq!(tag, sample());
        assert_eq!(tag.track(), Some(3));
        assert_eq!(tag.title().as_deref(), Some("Song"));
    }

    #[test]
    fn keys_are_case_insensitive() {
        let mut tag = sample();
        tag.set(ApeItem::text("TITLE", "Other")).unwrap();
        assert_eq!(tag.items().len(), 3);
        assert_eq!(tag.text("title").as_deref(), Some("Other"));
        tag.set_title("");
        assert!(tag.get("Title").is_none());
    }

    #[test]
    fn no_tag_is_not_an_error() {
        let mut file = TagFile::new(MemoryFile::new("a", vec![0u8; 64]));
        assert!(ApeTag::read_before(&mut file, 64).unwrap().is_none());
    }
}
