use crate::common::bytes::{decode_string, encode_string, is_latin1, StringType};
use crate::common::error::{MetaError, Result};

/// Text encoding byte used in ID3v2 frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Encoding {
    Latin1 = 0,
    Utf16 = 1,
    Utf16Be = 2,
    Utf8 = 3,
}

impl Encoding {
    pub fn from_byte(b: u8) -> Result<Self> {
        match b {
            0 => Ok(Encoding::Latin1),
            1 => Ok(Encoding::Utf16),
            2 => Ok(Encoding::Utf16Be),
            3 => Ok(Encoding::Utf8),
            _ => Err(MetaError::corrupt("ID3v2", format!("invalid text encoding byte {}", b))),
        }
    }

    pub fn string_type(self) -> StringType {
        match self {
            Encoding::Latin1 => StringType::Latin1,
            Encoding::Utf16 => StringType::Utf16,
            Encoding::Utf16Be => StringType::Utf16Be,
            Encoding::Utf8 => StringType::Utf8,
        }
    }

    /// The encoding actually written for `text` under `version`. Versions
    /// before 2.4 have no UTF-8 or UTF-16BE, and Latin-1 is widened when the
    /// text does not fit it.
    pub fn for_version(self, version: u8, text: &str) -> Encoding {
        let enc = if version < 4 && matches!(self, Encoding::Utf8 | Encoding::Utf16Be) {
            Encoding::Utf16
        } else {
            self
        };
        if enc == Encoding::Latin1 && !is_latin1(text) {
            if version >= 4 {
                Encoding::Utf8
            } else {
                Encoding::Utf16
            }
        } else {
            enc
        }
    }
}

pub fn decode_text(data: &[u8], encoding: Encoding) -> String {
    decode_string(data, encoding.string_type())
}

pub fn encode_text(text: &str, encoding: Encoding) -> Vec<u8> {
    encode_string(text, encoding.string_type())
}

/// Position of the terminator, aligned to code units for UTF-16.
pub fn find_null_terminator(data: &[u8], encoding: Encoding) -> Option<usize> {
    match encoding {
        Encoding::Latin1 | Encoding::Utf8 => memchr::memchr(0, data),
        Encoding::Utf16 | Encoding::Utf16Be => data
            .chunks_exact(2)
            .position(|unit| unit == [0, 0])
            .map(|i| i * 2),
    }
}

pub fn null_terminator_size(encoding: Encoding) -> usize {
    match encoding {
        Encoding::Latin1 | Encoding::Utf8 => 1,
        Encoding::Utf16 | Encoding::Utf16Be => 2,
    }
}

/// Read a terminated string, returning (text, bytes consumed). A missing
/// terminator consumes the rest of the data.
pub fn read_encoded_text(data: &[u8], encoding: Encoding) -> (String, usize) {
    match find_null_terminator(data, encoding) {
        Some(pos) => (decode_text(&data[..pos], encoding), pos + null_terminator_size(encoding)),
        None => (decode_text(data, encoding), data.len()),
    }
}

pub fn read_latin1_text(data: &[u8]) -> (String, usize) {
    read_encoded_text(data, Encoding::Latin1)
}

/// Split a multi-value text payload on NUL separators.
pub fn split_values(text: &str) -> Vec<String> {
    text.split('\0')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// ID3v1 genre list, indexed by genre byte.
pub const GENRES: &[&str] = &[
    "Blues", "Classic Rock", "Country", "Dance", "Disco", "Funk", "Grunge",
    "Hip-Hop", "Jazz", "Metal", "New Age", "Oldies", "Other", "Pop", "R&B",
    "Rap", "Reggae", "Rock", "Techno", "Industrial", "Alternative", "Ska",
    "Death Metal", "Pranks", "Soundtrack", "Euro-Techno", "Ambient",
    "Trip-Hop", "Vocal", "Jazz+Funk", "Fusion", "Trance", "Classical",
    "Instrumental", "Acid", "House", "Game", "Sound Clip", "Gospel", "Noise",
    "AlternRock", "Bass", "Soul", "Punk", "Space", "Meditative",
    "Instrumental Pop", "Instrumental Rock", "Ethnic", "Gothic", "Darkwave",
    "Techno-Industrial", "Electronic", "Pop-Folk", "Eurodance", "Dream",
    "Southern Rock", "Comedy", "Cult", "Gangsta", "Top 40", "Christian Rap",
    "Pop/Funk", "Jungle", "Native American", "Cabaret", "New Wave",
    "Psychedelic", "Rave", "Showtunes", "Trailer", "Lo-Fi", "Tribal",
    "Acid Punk", "Acid Jazz", "Polka", "Retro", "Musical", "Rock & Roll",
    "Hard Rock", "Folk", "Folk-Rock", "National Folk", "Swing", "Fast Fusion",
    "Bebop", "Latin", "Revival", "Celtic", "Bluegrass", "Avantgarde",
    "Gothic Rock", "Progressive Rock", "Psychedelic Rock", "Symphonic Rock",
    "Slow Rock", "Big Band", "Chorus", "Easy Listening", "Acoustic", "Humour",
    "Speech", "Chanson", "Opera", "Chamber Music", "Sonata", "Symphony",
    "Booty Bass", "Primus", "Porn Groove", "Satire", "Slow Jam", "Club",
    "Tango", "Samba", "Folklore", "Ballad", "Power Ballad", "Rhythmic Soul",
    "Freestyle", "Duet", "Punk Rock", "Drum Solo", "A capella", "Euro-House",
    "Dance Hall", "Goa", "Drum & Bass", "Club-House", "Hardcore Techno",
    "Terror", "Indie", "BritPop", "Negerpunk", "Polsk Punk", "Beat",
    "Christian Gangsta Rap", "Heavy Metal", "Black Metal", "Crossover",
    "Contemporary Christian", "Christian Rock", "Merengue", "Salsa",
    "Thrash Metal", "Anime", "Jpop", "Synthpop", "Abstract", "Art Rock",
    "Baroque", "Bhangra", "Big Beat", "Breakbeat", "Chillout", "Downtempo",
    "Dub", "EBM", "Eclectic", "Electro", "Electroclash", "Emo", "Experimental",
    "Garage", "Global", "IDM", "Illbient", "Industro-Goth", "Jam Band",
    "Krautrock", "Leftfield", "Lounge", "Math Rock", "New Romantic",
    "Nu-Breakz", "Post-Punk", "Post-Rock", "Psytrance", "Shoegaze",
    "Space Rock", "Trop Rock", "World Music", "Neoclassical", "Audiobook",
    "Audio Theatre", "Neue Deutsche Welle", "Podcast", "Indie Rock",
    "G-Funk", "Dubstep", "Garage Rock", "Psybient",
];

pub fn genre_index(name: &str) -> Option<u8> {
    GENRES
        .iter()
        .position(|g| g.eq_ignore_ascii_case(name))
        .map(|i| i as u8)
}

fn genre_name(num: usize) -> Option<String> {
    GENRES.get(num).map(|g| g.to_string())
}

/// Expand a TCON value. Handles "Rock", "(17)", "(17)Rock", "17",
/// "(RX)", "(CR)" and NUL-separated v2.4 lists.
pub fn parse_genre(text: &str) -> Vec<String> {
    let mut genres = Vec::new();
    for part in text.split('\0') {
        let mut remaining = part.trim();
        while let Some(rest) = remaining.strip_prefix('(') {
            if rest.starts_with('(') {
                // "((" escapes a literal parenthesis
                break;
            }
            let Some(close) = rest.find(')') else { break };
            let inner = &rest[..close];
            match inner {
                "RX" => genres.push("Remix".to_string()),
                "CR" => genres.push("Cover".to_string()),
                _ => match inner.parse::<usize>().ok().and_then(genre_name) {
                    Some(name) => genres.push(name),
                    None => genres.push(inner.to_string()),
                },
            }
            remaining = &rest[close + 1..];
        }
        let remaining = if remaining.starts_with("((") {
            &remaining[1..]
        } else {
            remaining
        };
        if remaining.is_empty() {
            continue;
        }
        match remaining.parse::<usize>().ok().and_then(genre_name) {
            Some(name) => genres.push(name),
            None => {
                if !genres.iter().any(|g| g == remaining) {
                    genres.push(remaining.to_string());
                }
            }
        }
    }
    genres
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn genre_forms() {
        assert_eq!(parse_genre("(17)"), vec!["Rock"]);
        assert_eq!(parse_genre("17"), vec!["Rock"]);
        assert_eq!(parse_genre("(17)Rock"), vec!["Rock"]);
        assert_eq!(parse_genre("(RX)(9)"), vec!["Remix", "Metal"]);
        assert_eq!(parse_genre("Shoegaze\0Dream"), vec!["Shoegaze", "Dream"]);
        assert_eq!(parse_genre("((Paren)"), vec!["(Paren)"]);
        assert_eq!(genre_index("rock"), Some(17));
    }

    #[test]
    fn utf16_terminator_is_aligned() {
        // 'a' 0x00 followed by 0x00 'b': the zero pair straddles units.
        let data = [b'a', 0, 0, b'b', 0, 0, b'x', 0];
        assert_eq!(find_null_terminator(&data, Encoding::Utf16Be), Some(4));
        let (text, used) = read_encoded_text(&[b'h', b'i', 0, b'x'], Encoding::Latin1);
        assert_eq!((text.as_str(), used), ("hi", 3));
    }

    #[test]
    fn encoding_downgrades_for_v23() {
        assert_eq!(Encoding::Utf8.for_version(3, "x"), Encoding::Utf16);
        assert_eq!(Encoding::Latin1.for_version(4, "€"), Encoding::Utf8);
        assert_eq!(Encoding::Latin1.for_version(3, "é"), Encoding::Latin1);
    }
}
