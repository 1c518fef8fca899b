use log::debug;

use crate::common::bytes::{decode_string, StringType};
use crate::common::error::{MetaError, Result};
use crate::common::tag::{Tag, TagType};
use crate::riff::chunk::{parse_chunks, render_chunk};

pub const INFO: &[u8; 4] = b"INFO";
/// Movie ID list found in some AVI files.
pub const MOVIE_ID: &[u8; 4] = b"MID ";

/// Field ids behind the common tag surface, per list type:
/// title, artist, album, comment, genre, year, track.
const INFO_FIELDS: [&[u8; 4]; 7] = [b"INAM", b"IART", b"IPRD", b"ICMT", b"IGNR", b"ICRD", b"IPRT"];
const MOVIE_ID_FIELDS: [&[u8; 4]; 7] = [b"TITL", b"AUTH", b"COLL", b"COMM", b"GENR", b"YEAR", b"PRT1"];

/// A `LIST` chunk of NUL-terminated text sub-chunks: `INFO` or `MID `.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListTag {
    pub list_type: [u8; 4],
    pub fields: Vec<([u8; 4], String)>,
}

impl ListTag {
    pub fn new(list_type: &[u8; 4]) -> Self {
        ListTag {
            list_type: *list_type,
            fields: Vec::new(),
        }
    }

    /// Parse a `LIST` payload, list type included.
    pub fn parse(payload: &[u8], big_endian: bool) -> Result<Self> {
        let list_type = payload
            .get(0..4)
            .ok_or_else(|| MetaError::corrupt("RIFF", "LIST chunk without a type"))?;
        let mut tag = ListTag::new(&[list_type[0], list_type[1], list_type[2], list_type[3]]);
        for (chunk, body) in parse_chunks(&payload[4..], big_endian)? {
            let end = memchr::memchr(0, body).unwrap_or(body.len());
            let text = match std::str::from_utf8(&body[..end]) {
                Ok(text) => text.to_string(),
                Err(_) => decode_string(&body[..end], StringType::Latin1),
            };
            if text.is_empty() {
                debug!("RIFF: empty {} field", chunk.id_str());
                continue;
            }
            tag.fields.push((chunk.id, text));
        }
        Ok(tag)
    }

    /// The `LIST` payload: list type, then one padded sub-chunk per field.
    pub fn render(&self, big_endian: bool) -> Result<Vec<u8>> {
        let mut out = self.list_type.to_vec();
        for (id, value) in &self.fields {
            let mut body = value.as_bytes().to_vec();
            body.push(0);
            out.extend_from_slice(&render_chunk(id, &body, big_endian)?);
        }
        Ok(out)
    }

    pub fn get(&self, id: &[u8; 4]) -> Option<&str> {
        self.fields.iter().find(|(k, _)| k == id).map(|(_, v)| v.as_str())
    }

    /// Replace `id`; an empty value removes it.
    pub fn set(&mut self, id: &[u8; 4], value: &str) {
        if value.is_empty() {
            self.fields.retain(|(k, _)| k != id);
            return;
        }
        match self.fields.iter_mut().find(|(k, _)| k == id) {
            Some(field) => field.1 = value.to_string(),
            None => self.fields.push((*id, value.to_string())),
        }
    }

    fn field(&self, index: usize) -> &'static [u8; 4] {
        if &self.list_type == MOVIE_ID {
            MOVIE_ID_FIELDS[index]
        } else {
            INFO_FIELDS[index]
        }
    }

    fn text(&self, index: usize) -> Option<String> {
        self.get(self.field(index)).map(str::to_string)
    }

    fn number(&self, index: usize) -> Option<u32> {
        let text = self.get(self.field(index))?;
        let digits: String = text.trim().chars().take_while(char::is_ascii_digit).collect();
        digits.parse().ok()
    }

    fn set_number(&mut self, index: usize, value: u32) {
        let text = if value == 0 { String::new() } else { value.to_string() };
        self.set(self.field(index), &text);
    }
}

impl Tag for ListTag {
    fn tag_type(&self) -> TagType {
        if &self.list_type == MOVIE_ID {
            TagType::MovieId
        } else {
            TagType::RiffInfo
        }
    }

    fn title(&self) -> Option<String> {
        self.text(0)
    }

    fn artist(&self) -> Option<String> {
        self.text(1)
    }

    fn album(&self) -> Option<String> {
        self.text(2)
    }

    fn comment(&self) -> Option<String> {
        self.text(3)
    }

    fn genre(&self) -> Option<String> {
        self.text(4)
    }

    fn year(&self) -> Option<u32> {
        self.number(5)
    }

    fn track(&self) -> Option<u32> {
        self.number(6)
    }

    fn set_title(&mut self, value: &str) {
        self.set(self.field(0), value);
    }

    fn set_artist(&mut self, value: &str) {
        self.set(self.field(1), value);
    }

    fn set_album(&mut self, value: &str) {
        self.set(self.field(2), value);
    }

    fn set_comment(&mut self, value: &str) {
        self.set(self.field(3), value);
    }

    fn set_genre(&mut self, value: &str) {
        self.set(self.field(4), value);
    }

    fn set_year(&mut self, value: u32) {
        self.set_number(5, value);
    }

    fn set_track(&mut self, value: u32) {
        self.set_number(6, value);
    }

    fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    fn clear(&mut self) {
        self.fields.clear();
    }
}
