//! Xiph comments, shared by FLAC and the Ogg codecs.

use std::collections::HashMap;

use byteorder::{ByteOrder, LittleEndian};
use data_encoding::BASE64;
use log::debug;

use crate::common::error::{MetaError, Result};
use crate::common::picture::Picture;
use crate::common::tag::{Tag, TagType};

/// Field holding a base64 FLAC picture block.
pub const PICTURE_FIELD: &str = "METADATA_BLOCK_PICTURE";

/// A Vorbis comment: vendor string plus ordered `KEY=value` fields.
/// Keys are stored upper case.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct XiphComment {
    pub vendor: String,
    pub comments: Vec<(String, String)>,
}

fn read_u32(data: &[u8], pos: usize, what: &str) -> Result<usize> {
    data.get(pos..pos + 4)
        .map(|b| LittleEndian::read_u32(b) as usize)
        .ok_or_else(|| MetaError::corrupt("Xiph", format!("{} truncated", what)))
}

impl XiphComment {
    pub fn new() -> Self {
        XiphComment::default()
    }

    /// Parse a comment packet body. `framing` expects the trailing framing
    /// bit Vorbis streams carry; FLAC and Opus do not have one.
    pub fn parse(data: &[u8], framing: bool) -> Result<Self> {
        let vendor_len = read_u32(data, 0, "vendor length")?;
        let mut pos = 4;
        let vendor = data
            .get(pos..pos + vendor_len)
            .ok_or_else(|| MetaError::corrupt("Xiph", "vendor string overruns packet"))?;
        let vendor = String::from_utf8_lossy(vendor).into_owned();
        pos += vendor_len;

        let count = read_u32(data, pos, "field count")?;
        pos += 4;

        let mut comments = Vec::with_capacity(count.min(1024));
        for index in 0..count {
            let len = read_u32(data, pos, "field length")?;
            pos += 4;
            let raw = data.get(pos..pos + len).ok_or_else(|| {
                MetaError::corrupt("Xiph", format!("field {} of {} overruns packet", index, count))
            })?;
            pos += len;

            let field = String::from_utf8_lossy(raw);
            match field.split_once('=') {
                Some((key, value)) if is_valid_key(key) => {
                    comments.push((key.to_ascii_uppercase(), value.to_string()))
                }
                _ => debug!("Xiph: skipping malformed field {}", index),
            }
        }

        if framing && data.get(pos).map_or(true, |b| b & 1 == 0) {
            debug!("Xiph: framing bit not set");
        }

        Ok(XiphComment { vendor, comments })
    }

    pub fn render(&self, framing: bool) -> Vec<u8> {
        fn push_u32(data: &mut Vec<u8>, v: usize) {
            let mut buf = [0u8; 4];
            LittleEndian::write_u32(&mut buf, v as u32);
            data.extend_from_slice(&buf);
        }

        let mut data = Vec::new();

        push_u32(&mut data, self.vendor.len());
        data.extend_from_slice(self.vendor.as_bytes());
        push_u32(&mut data, self.comments.len());
        for (key, value) in &self.comments {
            push_u32(&mut data, key.len() + 1 + value.len());
            data.extend_from_slice(key.as_bytes());
            data.push(b'=');
            data.extend_from_slice(value.as_bytes());
        }
        if framing {
            data.push(1);
        }
        data
    }

    /// Values grouped by key.
    pub fn as_dict(&self) -> HashMap<String, Vec<String>> {
        let mut dict: HashMap<String, Vec<String>> = HashMap::new();
        for (key, value) in &self.comments {
            dict.entry(key.clone()).or_default().push(value.clone());
        }
        dict
    }

    pub fn get(&self, key: &str) -> Vec<&str> {
        let upper = key.to_ascii_uppercase();
        self.comments
            .iter()
            .filter(|(k, _)| *k == upper)
            .map(|(_, v)| v.as_str())
            .collect()
    }

    pub fn first(&self, key: &str) -> Option<String> {
        self.get(key).first().map(|s| s.to_string())
    }

    /// Replace every value of `key`.
    pub fn set(&mut self, key: &str, values: Vec<String>) -> Result<()> {
        if !is_valid_key(key) {
            return Err(MetaError::ValueError(format!("invalid Xiph field name {:?}", key)));
        }
        self.delete(key);
        let upper = key.to_ascii_uppercase();
        self.comments.extend(values.into_iter().map(|v| (upper.clone(), v)));
        Ok(())
    }

    pub fn add(&mut self, key: &str, value: &str) -> Result<()> {
        if !is_valid_key(key) {
            return Err(MetaError::ValueError(format!("invalid Xiph field name {:?}", key)));
        }
        self.comments.push((key.to_ascii_uppercase(), value.to_string()));
        Ok(())
    }

    pub fn delete(&mut self, key: &str) {
        let upper = key.to_ascii_uppercase();
        self.comments.retain(|(k, _)| *k != upper);
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = Vec::new();
        for (k, _) in &self.comments {
            if !keys.contains(k) {
                keys.push(k.clone());
            }
        }
        keys
    }

    /// Pictures stored as base64 FLAC picture blocks. Undecodable entries
    /// are skipped.
    pub fn pictures(&self) -> Vec<Picture> {
        self.get(PICTURE_FIELD)
            .into_iter()
            .filter_map(|v| match BASE64.decode(v.as_bytes()) {
                Ok(block) => Picture::parse_flac(&block).ok(),
                Err(err) => {
                    debug!("Xiph: bad picture field: {}", err);
                    None
                }
            })
            .collect()
    }

    pub fn add_picture(&mut self, picture: &Picture) {
        let encoded = BASE64.encode(&picture.render_flac());
        self.comments.push((PICTURE_FIELD.to_string(), encoded));
    }

    pub fn remove_pictures(&mut self) {
        self.delete(PICTURE_FIELD);
    }

    fn set_text(&mut self, key: &str, value: &str) {
        if value.is_empty() {
            self.delete(key);
        } else if let Err(err) = self.set(key, vec![value.to_string()]) {
            debug!("Xiph: {}", err);
        }
    }
}

/// Field names are printable ASCII 0x20..=0x7D without '='.
pub fn is_valid_key(key: &str) -> bool {
    !key.is_empty() && key.bytes().all(|b| (0x20..=0x7D).contains(&b) && b != b'=')
}

impl Tag for XiphComment {
    fn tag_type(&self) -> TagType {
        TagType::Xiph
    }

    fn title(&self) -> Option<String> {
        self.first("TITLE")
    }

    fn artist(&self) -> Option<String> {
        self.first("ARTIST")
    }

    fn album(&self) -> Option<String> {
        self.first("ALBUM")
    }

    fn comment(&self) -> Option<String> {
        self.first("DESCRIPTION").or_else(|| self.first("COMMENT"))
    }

    fn genre(&self) -> Option<String> {
        self.first("GENRE")
    }

    fn year(&self) -> Option<u32> {
        self.first("DATE")?.get(..4)?.parse().ok()
    }

    fn track(&self) -> Option<u32> {
        self.first("TRACKNUMBER")?.split('/').next()?.trim().parse().ok()
    }

    fn set_title(&mut self, value: &str) {
        self.set_text("TITLE", value);
    }

    fn set_artist(&mut self, value: &str) {
        self.set_text("ARTIST", value);
    }

    fn set_album(&mut self, value: &str) {
        self.set_text("ALBUM", value);
    }

    fn set_comment(&mut self, value: &str) {
        self.delete("COMMENT");
        self.set_text("DESCRIPTION", value);
    }

    fn set_genre(&mut self, value: &str) {
        self.set_text("GENRE", value);
    }

    fn set_year(&mut self, value: u32) {
        let text = if value == 0 { String::new() } else { value.to_string() };
        self.set_text("DATE", &text);
    }

    fn set_track(&mut self, value: u32) {
        let text = if value == 0 { String::new() } else { value.to_string() };
        self.set_text("TRACKNUMBER", &text);
    }

    fn is_empty(&self) -> bool {
        self.comments.is_empty()
    }

    fn clear(&mut self) {
        self.comments.clear();
    }
}
