use crate::common::bytes::{decode_string, encode_string, StringType};
use crate::common::error::{MetaError, Result};
use crate::common::tag::{Tag, TagType};

pub const TAG_SIZE: usize = 128;
pub const MAGIC: &[u8; 7] = b"DIVXTAG";

/// The 128-byte DivX footer some AVI writers append after the RIFF chunk.
///
/// Layout: title 32, artist 28, year 4, comment 48, genre 3 (decimal
/// code), rating 1, reserved 5, `DIVXTAG`. Text is space padded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DivxTag {
    pub title: String,
    pub artist: String,
    pub year: String,
    pub comment: String,
    pub genre: String,
    pub rating: u8,
}

impl DivxTag {
    pub fn new() -> Self {
        DivxTag::default()
    }

    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() != TAG_SIZE || &data[121..128] != MAGIC {
            return Err(MetaError::NoHeader("DivX"));
        }
        Ok(DivxTag {
            title: field(&data[0..32]),
            artist: field(&data[32..60]),
            year: field(&data[60..64]),
            comment: field(&data[64..112]),
            genre: field(&data[112..115]),
            rating: data[115],
        })
    }

    pub fn render(&self) -> Vec<u8> {
        let mut out = vec![b' '; TAG_SIZE];
        put(&mut out[0..32], &self.title);
        put(&mut out[32..60], &self.artist);
        put(&mut out[60..64], &self.year);
        put(&mut out[64..112], &self.comment);
        put(&mut out[112..115], &self.genre);
        out[115] = self.rating;
        out[116..121].fill(0);
        out[121..128].copy_from_slice(MAGIC);
        out
    }
}

fn field(data: &[u8]) -> String {
    let end = memchr::memchr(0, data).unwrap_or(data.len());
    decode_string(&data[..end], StringType::Latin1).trim_end().to_string()
}

fn put(slot: &mut [u8], text: &str) {
    let raw = encode_string(text, StringType::Latin1);
    let n = raw.len().min(slot.len());
    slot[..n].copy_from_slice(&raw[..n]);
}

impl Tag for DivxTag {
    fn tag_type(&self) -> TagType {
        TagType::DivX
    }

    fn title(&self) -> Option<String> {
        Some(self.title.clone()).filter(|s| !s.is_empty())
    }

    fn artist(&self) -> Option<String> {
        Some(self.artist.clone()).filter(|s| !s.is_empty())
    }

    fn album(&self) -> Option<String> {
        None
    }

    fn comment(&self) -> Option<String> {
        Some(self.comment.clone()).filter(|s| !s.is_empty())
    }

    fn genre(&self) -> Option<String> {
        Some(self.genre.clone()).filter(|s| !s.is_empty())
    }

    fn year(&self) -> Option<u32> {
        self.year.parse().ok()
    }

    fn track(&self) -> Option<u32> {
        None
    }

    fn set_title(&mut self, value: &str) {
        self.title = value.to_string();
    }

    fn set_artist(&mut self, value: &str) {
        self.artist = value.to_string();
    }

    fn set_album(&mut self, _value: &str) {}

    fn set_comment(&mut self, value: &str) {
        self.comment = value.to_string();
    }

    fn set_genre(&mut self, value: &str) {
        self.genre = value.to_string();
    }

    fn set_year(&mut self, value: u32) {
        self.year = if value == 0 { String::new() } else { value.to_string() };
    }

    fn set_track(&mut self, _value: u32) {}

    fn is_empty(&self) -> bool {
        self.title.is_empty()
            && self.artist.is_empty()
            && self.year.is_empty()
            && self.comment.is_empty()
            && self.genre.is_empty()
            && self.rating == 0
    }

    fn clear(&mut self) {
        *self = DivxTag::new();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn footer_round_trips() {
        let mut tag = DivxTag::new();
        tag.set_title("Holiday");
        tag.set_year(2003);
        tag.genre = "12".into();
        let raw = tag.render();
        assert_eq!(raw.len(), TAG_SIZE);
        assert_eq!(&raw[121..], MAGIC);
        assert_eq!(DivxTag::parse(&raw).unwrap(), tag);
    }

    #[test]
    fn missing_magic_is_no_header() {
        assert!(matches!(DivxTag::parse(&[0u8; TAG_SIZE]), Err(MetaError::NoHeader("DivX"))));
    }
}
