use crate::asf::object::{AsfValue, Attribute, ContentDescription};
use crate::common::bytes::{decode_string, encode_string, StringType};
use crate::common::error::{MetaError, Result};
use crate::common::picture::{Picture, PictureType};
use crate::common::tag::{Tag, TagType};

pub const PICTURE: &str = "WM/Picture";

/// Where an attribute is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Location {
    Extended,
    Metadata,
    Library,
}

/// Tags of an ASF header: the content description strings plus the
/// attributes of the extended content description, metadata and metadata
/// library objects.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AsfTag {
    pub content: ContentDescription,
    pub extended: Vec<Attribute>,
    pub metadata: Vec<Attribute>,
    pub library: Vec<Attribute>,
}

impl AsfTag {
    pub fn new() -> Self {
        AsfTag::default()
    }

    pub fn attributes(&self) -> impl Iterator<Item = (Location, &Attribute)> {
        self.extended
            .iter()
            .map(|a| (Location::Extended, a))
            .chain(self.metadata.iter().map(|a| (Location::Metadata, a)))
            .chain(self.library.iter().map(|a| (Location::Library, a)))
    }

    pub fn get(&self, name: &str) -> Option<&AsfValue> {
        self.attributes().find(|(_, a)| a.name == name).map(|(_, a)| &a.value)
    }

    pub fn get_all(&self, name: &str) -> Vec<&AsfValue> {
        self.attributes().filter(|(_, a)| a.name == name).map(|(_, a)| &a.value).collect()
    }

    pub fn remove(&mut self, name: &str) {
        for list in [&mut self.extended, &mut self.metadata, &mut self.library] {
            list.retain(|a| a.name != name);
        }
    }

    /// Replace every value of `name` with `values`. Values the extended
    /// content description cannot hold go to the metadata objects.
    pub fn set(&mut self, name: &str, values: Vec<AsfValue>) {
        self.remove(name);
        for value in values {
            self.push(Attribute::new(name, value));
        }
    }

    pub fn push(&mut self, attribute: Attribute) {
        if attribute.fits_extended() {
            self.extended.push(attribute);
        } else if attribute.language == 0 && !matches!(attribute.value, AsfValue::Guid(_)) {
            self.metadata.push(attribute);
        } else {
            self.library.push(attribute);
        }
    }

    fn text(&self, name: &str) -> Option<String> {
        self.get(name).and_then(AsfValue::as_text).filter(|s| !s.is_empty())
    }

    fn set_text(&mut self, name: &str, value: &str) {
        if value.is_empty() {
            self.remove(name);
        } else {
            self.set(name, vec![AsfValue::Unicode(value.to_string())]);
        }
    }

    /// Decoded `WM/Picture` attributes; malformed ones are skipped.
    pub fn pictures(&self) -> Vec<Picture> {
        self.get_all(PICTURE)
            .into_iter()
            .filter_map(|v| match v {
                AsfValue::Bytes(data) => parse_picture(data).ok(),
                _ => None,
            })
            .collect()
    }

    pub fn add_picture(&mut self, picture: &Picture) {
        self.push(Attribute::new(PICTURE, AsfValue::Bytes(render_picture(picture))));
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty() && self.extended.is_empty() && self.metadata.is_empty() && self.library.is_empty()
    }
}

/// `WM/Picture`: type, 32-bit size, UTF-16 MIME and description, data.
pub fn parse_picture(data: &[u8]) -> Result<Picture> {
    let short = || MetaError::corrupt("ASF", "WM/Picture truncated");
    if data.len() < 5 {
        return Err(short());
    }
    let pic_type = PictureType::from_u8(data[0]);
    let size = u32::from_le_bytes([data[1], data[2], data[3], data[4]]) as usize;
    let mut pos = 5;
    let utf16_z = |pos: &mut usize| -> Result<String> {
        let rest = &data[*pos..];
        let end = rest
            .chunks_exact(2)
            .position(|pair| pair == [0, 0])
            .ok_or_else(short)?;
        *pos += end * 2 + 2;
        Ok(decode_string(&rest[..end * 2], StringType::Utf16Le))
    };
    let mime = utf16_z(&mut pos)?;
    let description = utf16_z(&mut pos)?;
    let body = data.get(pos..pos + size).ok_or_else(short)?;
    let mut picture = Picture::new(mime, pic_type, body.to_vec());
    picture.description = description;
    Ok(picture)
}

pub fn render_picture(picture: &Picture) -> Vec<u8> {
    let mut out = vec![picture.pic_type.as_u8()];
    out.extend_from_slice(&(picture.data.len() as u32).to_le_bytes());
    for text in [&picture.mime, &picture.description] {
        out.extend_from_slice(&encode_string(text, StringType::Utf16Le));
        out.extend_from_slice(&[0, 0]);
    }
    out.extend_from_slice(&picture.data);
    out
}

impl Tag for AsfTag {
    fn tag_type(&self) -> TagType {
        TagType::Asf
    }

    fn title(&self) -> Option<String> {
        Some(self.content.title.clone()).filter(|s| !s.is_empty())
    }

    fn artist(&self) -> Option<String> {
        Some(self.content.author.clone()).filter(|s| !s.is_empty())
    }

    fn album(&self) -> Option<String> {
        self.text("WM/AlbumTitle")
    }

    fn comment(&self) -> Option<String> {
        Some(self.content.description.clone()).filter(|s| !s.is_empty())
    }

    fn genre(&self) -> Option<String> {
        self.text("WM/Genre")
    }

    fn year(&self) -> Option<u32> {
        self.get("WM/Year").and_then(AsfValue::as_number).and_then(|n| u32::try_from(n).ok())
    }

    fn track(&self) -> Option<u32> {
        self.get("WM/TrackNumber")
            .and_then(AsfValue::as_number)
            .and_then(|n| u32::try_from(n).ok())
            .filter(|&n| n > 0)
    }

    fn set_title(&mut self, value: &str) {
        self.content.title = value.to_string();
    }

    fn set_artist(&mut self, value: &str) {
        self.content.author = value.to_string();
    }

    fn set_album(&mut self, value: &str) {
        self.set_text("WM/AlbumTitle", value);
    }

    fn set_comment(&mut self, value: &str) {
        self.content.description = value.to_string();
    }

    fn set_genre(&mut self, value: &str) {
        self.set_text("WM/Genre", value);
    }

    fn set_year(&mut self, value: u32) {
        let text = if value == 0 { String::new() } else { value.to_string() };
        self.set_text("WM/Year", &text);
    }

    fn set_track(&mut self, value: u32) {
        if value == 0 {
            self.remove("WM/TrackNumber");
        } else {
            self.set("WM/TrackNumber", vec![AsfValue::DWord(value)]);
        }
    }

    fn is_empty(&self) -> bool {
        AsfTag::is_empty(self)
    }

    fn clear(&mut self) {
        *self = AsfTag::new();
    }
}
