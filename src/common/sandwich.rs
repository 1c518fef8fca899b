//! Tags that sit before and after a raw audio stream.
//!
//! Formats without a container (MPEG, MusePack, WavPack, Monkey's Audio)
//! carry ID3v2 or APE tags in front of the audio and APE or ID3v1 tags
//! behind it. Everything in between is the invariant region.

use log::{debug, trace};

use crate::ape::ApeTag;
use crate::common::config::{ReadStyle, WriteOptions};
use crate::common::error::Result;
use crate::common::file::TagFile;
use crate::common::tag::{CombinedTag, Tag};
use crate::id3::id3v1::{Id3v1Tag, TAG_SIZE as ID3V1_SIZE};
use crate::id3::tags::Id3v2Tag;
use crate::id3::{tag_size_at, writer};

#[derive(Debug, Clone, PartialEq)]
pub enum StartTag {
    Id3v2(Id3v2Tag),
    Ape(ApeTag),
}

#[derive(Debug, Clone, PartialEq)]
pub enum EndTag {
    Ape(ApeTag),
    Id3v1(Id3v1Tag),
}

/// Start and end tags of one file plus the on-disk sizes they replace.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Sandwich {
    pub start: Vec<StartTag>,
    /// In file order.
    pub end: Vec<EndTag>,
    start_size: u64,
    end_size: u64,
}

impl Sandwich {
    /// Read every start and end tag and record the invariant region.
    pub fn read(file: &mut TagFile, style: ReadStyle) -> Result<Self> {
        let mut sandwich = Sandwich::default();
        let file_len = file.length()?;

        // Several ID3v2 tags in a row happen in the wild.
        let mut pos = 0u64;
        loop {
            if let Some(size) = tag_size_at(file, pos)? {
                match Id3v2Tag::read(file, pos, style) {
                    Ok(tag) => sandwich.start.push(StartTag::Id3v2(tag)),
                    Err(err) if err.is_corrupt() => {
                        file.mark_corrupt(format!("ID3v2 tag at {}: {}", pos, err));
                        break;
                    }
                    Err(err) => {
                        // left in place as part of the stream
                        debug!("ID3v2 tag at {} not understood: {}", pos, err);
                        break;
                    }
                }
                pos += size;
            } else if let Some((tag, size)) = ApeTag::read_header_at(file, pos)? {
                sandwich.start.push(StartTag::Ape(tag));
                pos += size;
            } else {
                break;
            }
        }
        sandwich.start_size = pos;

        let mut end = file_len;
        if end >= pos + ID3V1_SIZE as u64 {
            let raw = file.read_at(end - ID3V1_SIZE as u64, ID3V1_SIZE)?;
            if let Ok(tag) = Id3v1Tag::parse(&raw) {
                sandwich.end.push(EndTag::Id3v1(tag));
                end -= ID3V1_SIZE as u64;
            }
        }
        if let Some((tag, start)) = ApeTag::read_before(file, end)? {
            if start >= pos {
                sandwich.end.insert(0, EndTag::Ape(tag));
                end = start;
            } else {
                file.mark_corrupt("APE tag overlaps the start tags");
            }
        }
        sandwich.end_size = file_len - end;

        trace!("sandwich: {} start bytes, {} end bytes", sandwich.start_size, sandwich.end_size);
        file.set_invariant_region(pos, end);
        Ok(sandwich)
    }

    pub fn id3v2(&self) -> Option<&Id3v2Tag> {
        self.start.iter().find_map(|t| match t {
            StartTag::Id3v2(tag) => Some(tag),
            _ => None,
        })
    }

    /// The first ID3v2 tag, created in front when missing.
    pub fn id3v2_mut(&mut self) -> &mut Id3v2Tag {
        let index = match self.start.iter().position(|t| matches!(t, StartTag::Id3v2(_))) {
            Some(i) => i,
            None => {
                self.start.insert(0, StartTag::Id3v2(Id3v2Tag::new()));
                0
            }
        };
        match &mut self.start[index] {
            StartTag::Id3v2(tag) => tag,
            StartTag::Ape(_) => unreachable!("index points at an ID3v2 tag"),
        }
    }

    pub fn ape(&self) -> Option<&ApeTag> {
        self.end.iter().find_map(|t| match t {
            EndTag::Ape(tag) => Some(tag),
            _ => None,
        })
    }

    /// The end APE tag, created before any ID3v1 tag when missing.
    pub fn ape_mut(&mut self) -> &mut ApeTag {
        let index = match self.end.iter().position(|t| matches!(t, EndTag::Ape(_))) {
            Some(i) => i,
            None => {
                self.end.insert(0, EndTag::Ape(ApeTag::new()));
                0
            }
        };
        match &mut self.end[index] {
            EndTag::Ape(tag) => tag,
            EndTag::Id3v1(_) => unreachable!("index points at an APE tag"),
        }
    }

    pub fn id3v1(&self) -> Option<&Id3v1Tag> {
        self.end.iter().find_map(|t| match t {
            EndTag::Id3v1(tag) => Some(tag),
            _ => None,
        })
    }

    /// The ID3v1 tag, created at the very end when missing.
    pub fn id3v1_mut(&mut self) -> &mut Id3v1Tag {
        if !self.end.iter().any(|t| matches!(t, EndTag::Id3v1(_))) {
            self.end.push(EndTag::Id3v1(Id3v1Tag::new()));
        }
        self.end
            .iter_mut()
            .find_map(|t| match t {
                EndTag::Id3v1(tag) => Some(tag),
                _ => None,
            })
            .unwrap_or_else(|| unreachable!("ID3v1 tag was just added"))
    }

    /// Every tag as one, in the order start tags then end tags.
    pub fn combined(&mut self) -> CombinedTag<'_> {
        let mut tags: Vec<&mut dyn Tag> = Vec::new();
        for tag in self.start.iter_mut() {
            match tag {
                StartTag::Id3v2(t) => tags.push(t),
                StartTag::Ape(t) => tags.push(t),
            }
        }
        for tag in self.end.iter_mut() {
            match tag {
                EndTag::Ape(t) => tags.push(t),
                EndTag::Id3v1(t) => tags.push(t),
            }
        }
        CombinedTag::new(tags)
    }

    /// Rewrite the tags around the invariant region. Empty tags are
    /// removed from the file.
    pub fn save(&mut self, file: &mut TagFile, options: &WriteOptions) -> Result<()> {
        file.ensure_writable()?;
        let file_len = file.length()?;
        let end_start = file_len - self.end_size;

        let mut end_bytes = Vec::new();
        for tag in &self.end {
            match tag {
                EndTag::Ape(t) if !t.is_empty() => end_bytes.extend_from_slice(&t.render()),
                EndTag::Id3v1(t) if !t.is_empty() => end_bytes.extend_from_slice(&t.render()),
                _ => {}
            }
        }
        file.insert(&end_bytes, end_start, self.end_size)?;
        self.end_size = end_bytes.len() as u64;

        let mut start_bytes = Vec::new();
        for tag in self.start.iter_mut() {
            match tag {
                StartTag::Id3v2(t) if t.is_empty() => t.set_original_size(None),
                StartTag::Id3v2(t) => {
                    let rendered = writer::render_tag(t, options)?;
                    t.set_original_size(Some(rendered.len() as u64));
                    start_bytes.extend_from_slice(&rendered);
                }
                StartTag::Ape(t) if !t.is_empty() => start_bytes.extend_from_slice(&t.render()),
                StartTag::Ape(_) => {}
            }
        }
        file.insert(&start_bytes, 0, self.start_size)?;
        let delta = start_bytes.len() as i64 - self.start_size as i64;
        file.shift_invariant_region(self.start_size, delta);
        trace!("sandwich saved: {} start bytes, {} end bytes", start_bytes.len(), self.end_size);
        self.start_size = start_bytes.len() as u64;
        Ok(())
    }
}
