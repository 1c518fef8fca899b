use crate::common::bytes::{decode_string, encode_string, StringType};
use crate::common::error::{MetaError, Result};
use crate::common::tag::{Tag, TagType};
use crate::id3::specs::{genre_index, parse_genre, GENRES};

pub const TAG_SIZE: usize = 128;

/// Fixed 128-byte ID3v1 / ID3v1.1 tag.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Id3v1Tag {
    pub title: String,
    pub artist: String,
    pub album: String,
    pub year: String,
    pub comment: String,
    /// Only present in v1.1 (comment shortened to 28 bytes).
    pub track: Option<u8>,
    /// 255 means no genre.
    pub genre: u8,
}

impl Id3v1Tag {
    pub fn new() -> Self {
        Id3v1Tag {
            genre: 255,
            ..Default::default()
        }
    }

    /// Parse a 128-byte block starting with "TAG".
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < TAG_SIZE || &data[0..3] != b"TAG" {
            return Err(MetaError::NoHeader("ID3v1"));
        }
        let data = &data[..TAG_SIZE];

        // v1.1: a zero at 125 followed by a non-zero track byte
        let (comment, track) = if data[125] == 0 && data[126] != 0 {
            (decode_field(&data[97..125]), Some(data[126]))
        } else {
            (decode_field(&data[97..127]), None)
        };

        Ok(Id3v1Tag {
            title: decode_field(&data[3..33]),
            artist: decode_field(&data[33..63]),
            album: decode_field(&data[63..93]),
            year: decode_field(&data[93..97]),
            comment,
            track,
            genre: data[127],
        })
    }

    pub fn render(&self) -> Vec<u8> {
        let mut tag = vec![0u8; TAG_SIZE];
        tag[0..3].copy_from_slice(b"TAG");
        write_field(&mut tag[3..33], &self.title);
        write_field(&mut tag[33..63], &self.artist);
        write_field(&mut tag[63..93], &self.album);
        write_field(&mut tag[93..97], &self.year);
        match self.track {
            Some(n) if n != 0 => {
                write_field(&mut tag[97..125], &self.comment);
                tag[126] = n;
            }
            _ => write_field(&mut tag[97..127], &self.comment),
        }
        tag[127] = self.genre;
        tag
    }

    pub fn genre_name(&self) -> Option<&'static str> {
        GENRES.get(self.genre as usize).copied()
    }
}

/// Fields are Latin-1, NUL padded; trailing spaces are trimmed.
fn decode_field(data: &[u8]) -> String {
    let end = memchr::memchr(0, data).unwrap_or(data.len());
    decode_string(&data[..end], StringType::Latin1).trim_end().to_string()
}

fn write_field(dest: &mut [u8], text: &str) {
    let bytes = encode_string(text, StringType::Latin1);
    let len = bytes.len().min(dest.len());
    dest[..len].copy_from_slice(&bytes[..len]);
}

fn non_empty(s: &str) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

impl Tag for Id3v1Tag {
    fn tag_type(&self) -> TagType {
        TagType::Id3v1
    }

    fn title(&self) -> Option<String> {
        non_empty(&self.title)
    }

    fn artist(&self) -> Option<String> {
        non_empty(&self.artist)
    }

    fn album(&self) -> Option<String> {
        non_empty(&self.album)
    }

    fn comment(&self) -> Option<String> {
        non_empty(&self.comment)
    }

    fn genre(&self) -> Option<String> {
        self.genre_name().map(str::to_string)
    }

    fn year(&self) -> Option<u32> {
        self.year.parse().ok()
    }

    fn track(&self) -> Option<u32> {
        self.track.map(u32::from)
    }

    fn set_title(&mut self, value: &str) {
        self.title = value.to_string();
    }

    fn set_artist(&mut self, value: &str) {
        self.artist = value.to_string();
    }

    fn set_album(&mut self, value: &str) {
        self.album = value.to_string();
    }

    fn set_comment(&mut self, value: &str) {
        self.comment = value.to_string();
    }

    fn set_genre(&mut self, value: &str) {
        self.genre = parse_genre(value)
            .first()
            .and_then(|g| genre_index(g))
            .unwrap_or(255);
    }

    fn set_year(&mut self, value: u32) {
        self.year = if value == 0 { String::new() } else { value.to_string() };
    }

    fn set_track(&mut self, value: u32) {
        self.track = u8::try_from(value).ok().filter(|&n| n != 0);
    }

    fn is_empty(&self) -> bool {
        self.title.is_empty()
            && self.artist.is_empty()
            && self.album.is_empty()
            && self.year.is_empty()
            && self.comment.is_empty()
            && self.track.is_none()
            && self.genre == 255
    }

    fn clear(&mut self) {
        *self = Id3v1Tag::new();
    }
}
