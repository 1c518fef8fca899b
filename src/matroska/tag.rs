use log::debug;

use crate::common::error::Result;
use crate::common::tag::{Tag, TagType};
use crate::matroska::ebml::{self, children, render_element, render_string, render_uint};

/// Target levels from the Matroska tagging guidelines.
pub const TARGET_COLLECTION: u64 = 70;
pub const TARGET_ALBUM: u64 = 50;
pub const TARGET_TRACK: u64 = 30;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimpleValue {
    String(String),
    Binary(Vec<u8>),
}

/// A `SimpleTag`, possibly with nested ones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimpleTag {
    pub name: String,
    pub language: Option<String>,
    pub default: bool,
    pub value: Option<SimpleValue>,
    pub children: Vec<SimpleTag>,
}

impl SimpleTag {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        SimpleTag {
            name: name.into(),
            language: None,
            default: true,
            value: Some(SimpleValue::String(value.into())),
            children: Vec::new(),
        }
    }

    fn parse(payload: &[u8]) -> Result<Self> {
        let mut tag = SimpleTag {
            name: String::new(),
            language: None,
            default: true,
            value: None,
            children: Vec::new(),
        };
        for (el, data) in children(payload)? {
            match el.id {
                ebml::TAG_NAME => tag.name = ebml::string(data),
                ebml::TAG_LANGUAGE => tag.language = Some(ebml::string(data)),
                ebml::TAG_DEFAULT => tag.default = ebml::uint(data) != 0,
                ebml::TAG_STRING => tag.value = Some(SimpleValue::String(ebml::string(data))),
                ebml::TAG_BINARY => tag.value = Some(SimpleValue::Binary(data.to_vec())),
                ebml::SIMPLE_TAG => tag.children.push(SimpleTag::parse(data)?),
                other => debug!("Matroska: ignoring {:#x} in SimpleTag", other),
            }
        }
        Ok(tag)
    }

    fn render(&self) -> Vec<u8> {
        let mut body = render_string(ebml::TAG_NAME, &self.name);
        if let Some(lang) = &self.language {
            body.extend_from_slice(&render_string(ebml::TAG_LANGUAGE, lang));
        }
        if !self.default {
            body.extend_from_slice(&render_uint(ebml::TAG_DEFAULT, 0));
        }
        match &self.value {
            Some(SimpleValue::String(text)) => body.extend_from_slice(&render_string(ebml::TAG_STRING, text)),
            Some(SimpleValue::Binary(data)) => body.extend_from_slice(&render_element(ebml::TAG_BINARY, data)),
            None => {}
        }
        for child in &self.children {
            body.extend_from_slice(&child.render());
        }
        render_element(ebml::SIMPLE_TAG, &body)
    }

    pub fn text(&self) -> Option<&str> {
        match &self.value {
            Some(SimpleValue::String(text)) => Some(text),
            _ => None,
        }
    }
}

/// What a `Tag` applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Targets {
    pub type_value: u64,
    pub target_type: Option<String>,
    /// Track, edition, chapter and attachment UIDs as (element ID, UID).
    pub uids: Vec<(u32, u64)>,
}

impl Default for Targets {
    fn default() -> Self {
        Targets {
            type_value: TARGET_ALBUM,
            target_type: None,
            uids: Vec::new(),
        }
    }
}

impl Targets {
    pub fn level(type_value: u64) -> Self {
        Targets {
            type_value,
            ..Default::default()
        }
    }

    fn parse(payload: &[u8]) -> Result<Self> {
        let mut targets = Targets::default();
        for (el, data) in children(payload)? {
            match el.id {
                ebml::TARGET_TYPE_VALUE => targets.type_value = ebml::uint(data),
                ebml::TARGET_TYPE => targets.target_type = Some(ebml::string(data)),
                ebml::TAG_TRACK_UID | ebml::TAG_EDITION_UID | ebml::TAG_CHAPTER_UID | ebml::TAG_ATTACHMENT_UID => {
                    targets.uids.push((el.id, ebml::uint(data)))
                }
                other => debug!("Matroska: ignoring {:#x} in Targets", other),
            }
        }
        Ok(targets)
    }

    fn render(&self) -> Vec<u8> {
        let mut body = Vec::new();
        if self.type_value != TARGET_ALBUM {
            body.extend_from_slice(&render_uint(ebml::TARGET_TYPE_VALUE, self.type_value));
        }
        if let Some(kind) = &self.target_type {
            body.extend_from_slice(&render_string(ebml::TARGET_TYPE, kind));
        }
        for (id, uid) in &self.uids {
            body.extend_from_slice(&render_uint(*id, *uid));
        }
        render_element(ebml::TARGETS, &body)
    }

    /// Applies to the whole file rather than to one track or chapter.
    fn is_global(&self) -> bool {
        self.uids.is_empty()
    }
}

/// One `Tag` element.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagEntry {
    pub targets: Targets,
    pub simple: Vec<SimpleTag>,
}

/// The `Tags` element of a segment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatroskaTag {
    pub entries: Vec<TagEntry>,
}

impl MatroskaTag {
    pub fn new() -> Self {
        MatroskaTag::default()
    }

    /// Parse the payload of a `Tags` element.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let mut tag = MatroskaTag::new();
        for (el, data) in children(payload)? {
            if el.id != ebml::TAG {
                debug!("Matroska: ignoring {:#x} in Tags", el.id);
                continue;
            }
            let mut entry = TagEntry::default();
            for (child, body) in children(data)? {
                match child.id {
                    ebml::TARGETS => entry.targets = Targets::parse(body)?,
                    ebml::SIMPLE_TAG => entry.simple.push(SimpleTag::parse(body)?),
                    other => debug!("Matroska: ignoring {:#x} in Tag", other),
                }
            }
            tag.entries.push(entry);
        }
        Ok(tag)
    }

    /// The complete `Tags` element, or nothing when there is nothing to
    /// write.
    pub fn render(&self) -> Vec<u8> {
        let mut body = Vec::new();
        for entry in self.entries.iter().filter(|e| !e.simple.is_empty()) {
            let mut tag = entry.targets.render();
            for simple in &entry.simple {
                tag.extend_from_slice(&simple.render());
            }
            body.extend_from_slice(&render_element(ebml::TAG, &tag));
        }
        if body.is_empty() {
            Vec::new()
        } else {
            render_element(ebml::TAGS, &body)
        }
    }

    fn global(&self, level: u64) -> Option<&TagEntry> {
        self.entries
            .iter()
            .find(|e| e.targets.type_value == level && e.targets.is_global())
    }

    fn global_mut(&mut self, level: u64) -> &mut TagEntry {
        let index = match self
            .entries
            .iter()
            .position(|e| e.targets.type_value == level && e.targets.is_global())
        {
            Some(index) => index,
            None => {
                self.entries.push(TagEntry {
                    targets: Targets::level(level),
                    simple: Vec::new(),
                });
                self.entries.len() - 1
            }
        };
        &mut self.entries[index]
    }

    /// First string value of `name` at a file-wide target `level`.
    pub fn get(&self, level: u64, name: &str) -> Option<&str> {
        self.global(level)?
            .simple
            .iter()
            .find(|s| s.name.eq_ignore_ascii_case(name))
            .and_then(SimpleTag::text)
    }

    /// Replace `name` at a file-wide target `level`; empty removes it.
    pub fn set(&mut self, level: u64, name: &str, value: &str) {
        let entry = self.global_mut(level);
        entry.simple.retain(|s| !s.name.eq_ignore_ascii_case(name));
        if !value.is_empty() {
            entry.simple.push(SimpleTag::new(name, value));
        }
        self.entries.retain(|e| !e.simple.is_empty() || !e.targets.is_global());
    }

    fn number(&self, level: u64, name: &str) -> Option<u32> {
        let text = self.get(level, name)?;
        let digits: String = text.trim().chars().take_while(char::is_ascii_digit).collect();
        digits.parse().ok()
    }

    fn set_number(&mut self, level: u64, name: &str, value: u32) {
        let text = if value == 0 { String::new() } else { value.to_string() };
        self.set(level, name, &text);
    }
}

impl Tag for MatroskaTag {
    fn tag_type(&self) -> TagType {
        TagType::Matroska
    }

    fn title(&self) -> Option<String> {
        self.get(TARGET_ALBUM, "TITLE").map(str::to_string)
    }

    fn artist(&self) -> Option<String> {
        self.get(TARGET_ALBUM, "ARTIST").map(str::to_string)
    }

    fn album(&self) -> Option<String> {
        self.get(TARGET_COLLECTION, "TITLE").map(str::to_string)
    }

    fn comment(&self) -> Option<String> {
        self.get(TARGET_ALBUM, "COMMENT").map(str::to_string)
    }

    fn genre(&self) -> Option<String> {
        self.get(TARGET_ALBUM, "GENRE").map(str::to_string)
    }

    fn year(&self) -> Option<u32> {
        self.number(TARGET_ALBUM, "DATE_RELEASED")
    }

    fn track(&self) -> Option<u32> {
        self.number(TARGET_ALBUM, "PART_NUMBER")
    }

    fn set_title(&mut self, value: &str) {
        self.set(TARGET_ALBUM, "TITLE", value);
    }

    fn set_artist(&mut self, value: &str) {
        self.set(TARGET_ALBUM, "ARTIST", value);
    }

    fn set_album(&mut self, value: &str) {
        self.set(TARGET_COLLECTION, "TITLE", value);
    }

    fn set_comment(&mut self, value: &str) {
        self.set(TARGET_ALBUM, "COMMENT", value);
    }

    fn set_genre(&mut self, value: &str) {
        self.set(TARGET_ALBUM, "GENRE", value);
    }

    fn set_year(&mut self, value: u32) {
        self.set_number(TARGET_ALBUM, "DATE_RELEASED", value);
    }

    fn set_track(&mut self, value: u32) {
        self.set_number(TARGET_ALBUM, "PART_NUMBER", value);
    }

    fn is_empty(&self) -> bool {
        self.entries.iter().all(|e| e.simple.is_empty())
    }

    fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn tags_round_trip_with_nested_simple_tags() {
        let mut tag = MatroskaTag::new();
        tag.set_title("Movie");
        tag.set_year(1999);
        let mut actor = SimpleTag::new("ACTOR", "Someone");
        actor.children.push(SimpleTag::new("CHARACTER", "Hero"));
        actor.language = Some("eng".into());
        tag.entries.push(TagEntry {
            targets: Targets {
                type_value: TARGET_TRACK,
                target_type: Some("TRACK".into()),
                uids: vec![(ebml::TAG_TRACK_UID, 0xDEAD_BEEF)],
            },
            simple: vec![actor],
        });

        let raw = tag.render();
        let (el, payload) = children(&raw).unwrap().remove(0);
        assert_eq!(el.id, ebml::TAGS);
        assert_eq!(MatroskaTag::parse(payload).unwrap(), tag);
    }

    #[test]
    fn common_fields_live_at_file_targets() {
        let mut tag = MatroskaTag::new();
        tag.set_album("Box Set");
        tag.set_title("Disc");
        assert_eq!(tag.entries.len(), 2);
        assert_eq!(tag.album().as_deref(), Some("Box Set"));
        tag.set_album("");
        assert_eq!(tag.entries.len(), 1);
        tag.clear();
        assert!(tag.render().is_empty());
    }

    #[test]
    fn names_match_case_insensitively() {
        let mut tag = MatroskaTag::new();
        tag.global_mut(TARGET_ALBUM).simple.push(SimpleTag::new("title", "x"));
        assert_eq!(tag.title().as_deref(), Some("x"));
    }
}
