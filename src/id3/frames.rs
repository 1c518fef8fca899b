use crate::common::error::{MetaError, Result};
use crate::common::picture::{Picture, PictureType};
use crate::id3::specs::{self, Encoding};

/// Dictionary key for a frame. Most frames use their ID; some add a
/// discriminator (TXXX:description, COMM:description:language).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HashKey(pub String);

impl HashKey {
    pub fn new(s: &str) -> Self {
        HashKey(s.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A decoded ID3v2 frame. IDs are always v2.4 names.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Text(TextFrame),
    UserText(UserTextFrame),
    Url(UrlFrame),
    UserUrl(UserUrlFrame),
    Comment(CommentFrame),
    Lyrics(CommentFrame),
    Picture(PictureFrame),
    Popularimeter(PopularimeterFrame),
    PlayCounter(PlayCounterFrame),
    UniqueFileId(OwnerDataFrame),
    Private(OwnerDataFrame),
    PairedText(PairedTextFrame),
    Binary(BinaryFrame),
}

impl Frame {
    pub fn frame_id(&self) -> &str {
        match self {
            Frame::Text(f) => &f.id,
            Frame::UserText(_) => "TXXX",
            Frame::Url(f) => &f.id,
            Frame::UserUrl(_) => "WXXX",
            Frame::Comment(_) => "COMM",
            Frame::Lyrics(_) => "USLT",
            Frame::Picture(_) => "APIC",
            Frame::Popularimeter(_) => "POPM",
            Frame::PlayCounter(_) => "PCNT",
            Frame::UniqueFileId(_) => "UFID",
            Frame::Private(_) => "PRIV",
            Frame::PairedText(f) => &f.id,
            Frame::Binary(f) => &f.id,
        }
    }

    pub fn hash_key(&self) -> HashKey {
        match self {
            Frame::UserText(f) => HashKey(format!("TXXX:{}", f.desc)),
            Frame::UserUrl(f) => HashKey(format!("WXXX:{}", f.desc)),
            Frame::Comment(f) => HashKey(format!("COMM:{}:{}", f.desc, String::from_utf8_lossy(&f.lang))),
            Frame::Lyrics(f) => HashKey(format!("USLT:{}:{}", f.desc, String::from_utf8_lossy(&f.lang))),
            Frame::Picture(f) => HashKey(format!("APIC:{}", f.picture.description)),
            Frame::Popularimeter(f) => HashKey(format!("POPM:{}", f.email)),
            Frame::UniqueFileId(f) => HashKey(format!("UFID:{}", f.owner)),
            Frame::Private(f) => HashKey(format!("PRIV:{}", f.owner)),
            _ => HashKey::new(self.frame_id()),
        }
    }

    /// Text values for generic field access.
    pub fn text_values(&self) -> Vec<String> {
        match self {
            Frame::Text(f) => f.text.clone(),
            Frame::UserText(f) => f.text.clone(),
            Frame::Url(f) => vec![f.url.clone()],
            Frame::UserUrl(f) => vec![f.url.clone()],
            Frame::Comment(f) | Frame::Lyrics(f) => vec![f.text.clone()],
            Frame::PairedText(f) => f
                .people
                .iter()
                .map(|(role, name)| format!("{}={}", role, name))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Serialize the frame body (no header) for a v2.`version` tag.
    pub fn write_data(&self, version: u8) -> Result<Vec<u8>> {
        match self {
            Frame::Text(f) => Ok(write_text_frame(f, version)),
            Frame::UserText(f) => Ok(write_user_text_frame(f, version)),
            Frame::Url(f) => Ok(specs::encode_text(&f.url, Encoding::Latin1)),
            Frame::UserUrl(f) => Ok(write_user_url_frame(f, version)),
            Frame::Comment(f) | Frame::Lyrics(f) => Ok(write_comment_frame(f, version)),
            Frame::Picture(f) => Ok(write_picture_frame(f, version)),
            Frame::Popularimeter(f) => Ok(write_popm_frame(f)),
            Frame::PlayCounter(f) => Ok(write_counter(f.count, 4)),
            Frame::UniqueFileId(f) | Frame::Private(f) => Ok(write_owner_frame(f)),
            Frame::PairedText(f) => Ok(write_paired_text_frame(f, version)),
            Frame::Binary(f) => Ok(f.data.clone()),
        }
    }

    pub fn text(id: &str, value: &str) -> Frame {
        Frame::Text(TextFrame {
            id: id.to_string(),
            encoding: Encoding::Latin1,
            text: vec![value.to_string()],
        })
    }
}

/// Standard text frame (TIT2, TPE1, TALB, TRCK, TCON, TDRC, ...).
#[derive(Debug, Clone, PartialEq)]
pub struct TextFrame {
    pub id: String,
    pub encoding: Encoding,
    pub text: Vec<String>,
}

/// TXXX.
#[derive(Debug, Clone, PartialEq)]
pub struct UserTextFrame {
    pub encoding: Encoding,
    pub desc: String,
    pub text: Vec<String>,
}

/// URL link frame (WOAR, WORS, ...).
#[derive(Debug, Clone, PartialEq)]
pub struct UrlFrame {
    pub id: String,
    pub url: String,
}

/// WXXX.
#[derive(Debug, Clone, PartialEq)]
pub struct UserUrlFrame {
    pub encoding: Encoding,
    pub desc: String,
    pub url: String,
}

/// COMM and USLT share a layout.
#[derive(Debug, Clone, PartialEq)]
pub struct CommentFrame {
    pub encoding: Encoding,
    pub lang: [u8; 3],
    pub desc: String,
    pub text: String,
}

impl CommentFrame {
    pub fn new(lang: &str, desc: &str, text: &str) -> Self {
        let mut code = *b"XXX";
        for (slot, b) in code.iter_mut().zip(lang.bytes()) {
            *slot = b;
        }
        CommentFrame {
            encoding: Encoding::Latin1,
            lang: code,
            desc: desc.to_string(),
            text: text.to_string(),
        }
    }

    pub fn language(&self) -> String {
        String::from_utf8_lossy(&self.lang).into_owned()
    }
}

/// APIC (and v2.2 PIC).
#[derive(Debug, Clone, PartialEq)]
pub struct PictureFrame {
    pub encoding: Encoding,
    pub picture: Picture,
}

/// POPM.
#[derive(Debug, Clone, PartialEq)]
pub struct PopularimeterFrame {
    pub email: String,
    pub rating: u8,
    pub count: u64,
}

/// PCNT.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayCounterFrame {
    pub count: u64,
}

/// UFID and PRIV: an owner identifier followed by opaque bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct OwnerDataFrame {
    pub owner: String,
    pub data: Vec<u8>,
}

/// TIPL, TMCL (and v2.3 IPLS, read as TIPL).
#[derive(Debug, Clone, PartialEq)]
pub struct PairedTextFrame {
    pub id: String,
    pub encoding: Encoding,
    pub people: Vec<(String, String)>,
}

/// Any frame this library does not interpret.
#[derive(Debug, Clone, PartialEq)]
pub struct BinaryFrame {
    pub id: String,
    pub data: Vec<u8>,
}

impl Frame {
    pub fn as_text(&self) -> Option<&TextFrame> {
        match self {
            Frame::Text(f) => Some(f),
            _ => None,
        }
    }
}

fn corrupt(reason: &str) -> MetaError {
    MetaError::corrupt("ID3v2", reason.to_string())
}

// ---- Parsing ----

fn split_encoding(data: &[u8]) -> Result<(Encoding, &[u8])> {
    match data.split_first() {
        Some((&b, rest)) => Ok((Encoding::from_byte(b)?, rest)),
        None => Err(corrupt("frame body is empty")),
    }
}

pub fn parse_text_frame(id: &str, data: &[u8]) -> Result<Frame> {
    if data.is_empty() {
        return Ok(Frame::Text(TextFrame {
            id: id.to_string(),
            encoding: Encoding::Latin1,
            text: vec![],
        }));
    }
    let (encoding, rest) = split_encoding(data)?;
    let text = specs::split_values(&specs::decode_text(rest, encoding));
    Ok(Frame::Text(TextFrame {
        id: id.to_string(),
        encoding,
        text,
    }))
}

pub fn parse_user_text_frame(data: &[u8]) -> Result<Frame> {
    let (encoding, rest) = split_encoding(data)?;
    let (desc, consumed) = specs::read_encoded_text(rest, encoding);
    let text = specs::split_values(&specs::decode_text(&rest[consumed..], encoding));
    Ok(Frame::UserText(UserTextFrame { encoding, desc, text }))
}

pub fn parse_url_frame(id: &str, data: &[u8]) -> Frame {
    let url = specs::decode_text(data, Encoding::Latin1);
    Frame::Url(UrlFrame {
        id: id.to_string(),
        url: url.trim_end_matches('\0').to_string(),
    })
}

pub fn parse_user_url_frame(data: &[u8]) -> Result<Frame> {
    let (encoding, rest) = split_encoding(data)?;
    let (desc, consumed) = specs::read_encoded_text(rest, encoding);
    let url = specs::decode_text(&rest[consumed..], Encoding::Latin1);
    Ok(Frame::UserUrl(UserUrlFrame {
        encoding,
        desc,
        url: url.trim_end_matches('\0').to_string(),
    }))
}

pub fn parse_comment_frame(data: &[u8]) -> Result<CommentFrame> {
    if data.len() < 4 {
        return Err(corrupt("COMM/USLT frame too short"));
    }
    let encoding = Encoding::from_byte(data[0])?;
    let lang = [data[1], data[2], data[3]];
    let rest = &data[4..];
    let (desc, consumed) = specs::read_encoded_text(rest, encoding);
    let text = specs::decode_text(&rest[consumed..], encoding);
    Ok(CommentFrame {
        encoding,
        lang,
        desc,
        text: text.trim_end_matches('\0').to_string(),
    })
}

pub fn parse_picture_frame(data: &[u8]) -> Result<Frame> {
    let (encoding, rest) = split_encoding(data)?;
    let (mime, consumed) = specs::read_latin1_text(rest);
    let rest = &rest[consumed..];
    let Some((&pic_type, rest)) = rest.split_first() else {
        return Err(corrupt("APIC frame too short"));
    };
    let (description, consumed) = specs::read_encoded_text(rest, encoding);
    Ok(Frame::Picture(PictureFrame {
        encoding,
        picture: Picture {
            mime,
            pic_type: PictureType::from_u8(pic_type),
            description,
            data: rest[consumed..].to_vec(),
            ..Default::default()
        },
    }))
}

/// v2.2 PIC: a three-letter image format instead of a MIME type.
pub fn parse_v22_picture_frame(data: &[u8]) -> Result<Frame> {
    if data.len() < 5 {
        return Err(corrupt("PIC frame too short"));
    }
    let encoding = Encoding::from_byte(data[0])?;
    let format = String::from_utf8_lossy(&data[1..4]).to_ascii_uppercase();
    let mime = match format.as_str() {
        "JPG" => "image/jpeg".to_string(),
        "PNG" => "image/png".to_string(),
        other => format!("image/{}", other.to_ascii_lowercase()),
    };
    let rest = &data[5..];
    let (description, consumed) = specs::read_encoded_text(rest, encoding);
    Ok(Frame::Picture(PictureFrame {
        encoding,
        picture: Picture {
            mime,
            pic_type: PictureType::from_u8(data[4]),
            description,
            data: rest[consumed..].to_vec(),
            ..Default::default()
        },
    }))
}

fn read_counter(data: &[u8]) -> u64 {
    data.iter().take(8).fold(0u64, |acc, &b| (acc << 8) | b as u64)
}

pub fn parse_popm_frame(data: &[u8]) -> Frame {
    let (email, consumed) = specs::read_latin1_text(data);
    let rest = &data[consumed..];
    let rating = rest.first().copied().unwrap_or(0);
    let count = rest.get(1..).map_or(0, read_counter);
    Frame::Popularimeter(PopularimeterFrame { email, rating, count })
}

pub fn parse_owner_frame(data: &[u8]) -> OwnerDataFrame {
    let (owner, consumed) = specs::read_latin1_text(data);
    OwnerDataFrame {
        owner,
        data: data[consumed..].to_vec(),
    }
}

pub fn parse_paired_text_frame(id: &str, data: &[u8]) -> Result<Frame> {
    if data.is_empty() {
        return Ok(Frame::PairedText(PairedTextFrame {
            id: id.to_string(),
            encoding: Encoding::Latin1,
            people: vec![],
        }));
    }
    let (encoding, rest) = split_encoding(data)?;
    let text = specs::decode_text(rest, encoding);
    let text = text.trim_end_matches('\0');
    let parts: Vec<&str> = text.split('\0').collect();
    let people = parts
        .chunks_exact(2)
        .map(|pair| (pair[0].to_string(), pair[1].to_string()))
        .collect();
    Ok(Frame::PairedText(PairedTextFrame {
        id: id.to_string(),
        encoding,
        people,
    }))
}

/// Decode a frame body. `id` is the v2.4 name; `version` is the major
/// version the body was written under (v2.2 pictures differ).
pub fn parse_frame(id: &str, data: &[u8], version: u8) -> Result<Frame> {
    match id {
        "APIC" if version == 2 => parse_v22_picture_frame(data),
        "APIC" => parse_picture_frame(data),
        "TXXX" => parse_user_text_frame(data),
        "TIPL" | "TMCL" | "IPLS" => parse_paired_text_frame(if id == "IPLS" { "TIPL" } else { id }, data),
        s if s.starts_with('T') => parse_text_frame(id, data),
        "WXXX" => parse_user_url_frame(data),
        s if s.starts_with('W') => Ok(parse_url_frame(id, data)),
        "COMM" => Ok(Frame::Comment(parse_comment_frame(data)?)),
        "USLT" => Ok(Frame::Lyrics(parse_comment_frame(data)?)),
        "POPM" => Ok(parse_popm_frame(data)),
        "PCNT" => Ok(Frame::PlayCounter(PlayCounterFrame { count: read_counter(data) })),
        "UFID" => Ok(Frame::UniqueFileId(parse_owner_frame(data))),
        "PRIV" => Ok(Frame::Private(parse_owner_frame(data))),
        _ => Ok(Frame::Binary(BinaryFrame {
            id: id.to_string(),
            data: data.to_vec(),
        })),
    }
}

// ---- Rendering ----

fn terminated(out: &mut Vec<u8>, text: &str, encoding: Encoding) {
    out.extend_from_slice(&specs::encode_text(text, encoding));
    out.extend(std::iter::repeat(0u8).take(specs::null_terminator_size(encoding)));
}

fn write_text_frame(f: &TextFrame, version: u8) -> Vec<u8> {
    let joined = f.text.join("\0");
    let encoding = f.encoding.for_version(version, &joined);
    let mut data = vec![encoding as u8];
    data.extend_from_slice(&specs::encode_text(&joined, encoding));
    data
}

fn write_user_text_frame(f: &UserTextFrame, version: u8) -> Vec<u8> {
    let joined = f.text.join("\0");
    let encoding = f.encoding.for_version(version, &format!("{}{}", f.desc, joined));
    let mut data = vec![encoding as u8];
    terminated(&mut data, &f.desc, encoding);
    data.extend_from_slice(&specs::encode_text(&joined, encoding));
    data
}

fn write_user_url_frame(f: &UserUrlFrame, version: u8) -> Vec<u8> {
    let encoding = f.encoding.for_version(version, &f.desc);
    let mut data = vec![encoding as u8];
    terminated(&mut data, &f.desc, encoding);
    data.extend_from_slice(&specs::encode_text(&f.url, Encoding::Latin1));
    data
}

fn write_comment_frame(f: &CommentFrame, version: u8) -> Vec<u8> {
    let encoding = f.encoding.for_version(version, &format!("{}{}", f.desc, f.text));
    let mut data = vec![encoding as u8];
    data.extend_from_slice(&f.lang);
    terminated(&mut data, &f.desc, encoding);
    data.extend_from_slice(&specs::encode_text(&f.text, encoding));
    data
}

fn write_picture_frame(f: &PictureFrame, version: u8) -> Vec<u8> {
    let pic = &f.picture;
    let encoding = f.encoding.for_version(version, &pic.description);
    let mut data = vec![encoding as u8];
    terminated(&mut data, &pic.mime, Encoding::Latin1);
    data.push(pic.pic_type.as_u8());
    terminated(&mut data, &pic.description, encoding);
    data.extend_from_slice(&pic.data);
    data
}

/// Big-endian counter, at least `min_width` bytes wide.
fn write_counter(count: u64, min_width: usize) -> Vec<u8> {
    let bytes = count.to_be_bytes();
    let significant = bytes.iter().position(|&b| b != 0).unwrap_or(8);
    let start = significant.min(8 - min_width);
    bytes[start..].to_vec()
}

fn write_popm_frame(f: &PopularimeterFrame) -> Vec<u8> {
    let mut data = Vec::new();
    terminated(&mut data, &f.email, Encoding::Latin1);
    data.push(f.rating);
    if f.count > 0 {
        data.extend_from_slice(&write_counter(f.count, 4));
    }
    data
}

fn write_owner_frame(f: &OwnerDataFrame) -> Vec<u8> {
    let mut data = Vec::new();
    terminated(&mut data, &f.owner, Encoding::Latin1);
    data.extend_from_slice(&f.data);
    data
}

fn write_paired_text_frame(f: &PairedTextFrame, version: u8) -> Vec<u8> {
    let joined = f
        .people
        .iter()
        .flat_map(|(a, b)| [a.as_str(), b.as_str()])
        .collect::<Vec<_>>()
        .join("\0");
    let encoding = f.encoding.for_version(version, &joined);
    let mut data = vec![encoding as u8];
    data.extend_from_slice(&specs::encode_text(&joined, encoding));
    data
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_frame_splits_values() {
        let frame = parse_frame("TPE1", b"\x00Alpha\x00Beta", 4).unwrap();
        assert_eq!(frame.text_values(), vec!["Alpha", "Beta"]);
        assert_eq!(frame.write_data(4).unwrap(), b"\x00Alpha\x00Beta");
    }

    #[test]
    fn comment_keyed_by_description_and_language() {
        let frame = parse_frame("COMM", b"\x00engdesc\x00hello", 3).unwrap();
        assert_eq!(frame.hash_key().as_str(), "COMM:desc:eng");
        assert_eq!(frame.text_values(), vec!["hello"]);
        assert_eq!(frame.write_data(3).unwrap(), b"\x00engdesc\x00hello");
    }

    #[test]
    fn utf8_text_downgrades_for_v23() {
        let frame = Frame::Text(TextFrame {
            id: "TIT2".into(),
            encoding: Encoding::Utf8,
            text: vec!["ab".into()],
        });
        assert_eq!(frame.write_data(3).unwrap(), vec![1, 0xFF, 0xFE, b'a', 0, b'b', 0]);
    }

    #[test]
    fn picture_round_trip() {
        let body = b"\x00image/png\x00\x03cover\x00\x89PNG";
        let frame = parse_frame("APIC", body, 4).unwrap();
        let Frame::Picture(ref pic) = frame else { panic!("not a picture") };
        assert_eq!(pic.picture.mime, "image/png");
        assert_eq!(pic.picture.pic_type, PictureType::FrontCover);
        assert_eq!(pic.picture.data, b"\x89PNG");
        assert_eq!(frame.write_data(4).unwrap(), body.to_vec());
    }

    #[test]
    fn v22_picture_maps_format_to_mime() {
        let frame = parse_frame("APIC", b"\x00JPG\x04\x00\xFF\xD8", 2).unwrap();
        let Frame::Picture(pic) = frame else { panic!("not a picture") };
        assert_eq!(pic.picture.mime, "image/jpeg");
        assert_eq!(pic.picture.pic_type, PictureType::BackCover);
    }

    #[test]
    fn counters_and_owner_frames() {
        let frame = parse_frame("POPM", b"me@x\x00\xC8\x00\x00\x01\x00", 4).unwrap();
        assert_eq!(frame.hash_key().as_str(), "POPM:me@x");
        assert_eq!(frame.write_data(4).unwrap(), b"me@x\x00\xC8\x00\x00\x01\x00");

        let frame = parse_frame("PCNT", &[0, 0, 0, 7], 4).unwrap();
        assert_eq!(frame, Frame::PlayCounter(PlayCounterFrame { count: 7 }));
        assert_eq!(frame.write_data(4).unwrap(), vec![0, 0, 0, 7]);

        let frame = parse_frame("PRIV", b"owner\x00\x01\x02", 4).unwrap();
        assert_eq!(frame.hash_key().as_str(), "PRIV:owner");
    }

    #[test]
    fn paired_text_from_ipls() {
        let frame = parse_frame("IPLS", b"\x00drums\x00Ann\x00bass\x00Bo\x00", 3).unwrap();
        let Frame::PairedText(f) = frame else { panic!("not paired text") };
        assert_eq!(f.id, "TIPL");
        assert_eq!(f.people, vec![("drums".into(), "Ann".into()), ("bass".into(), "Bo".into())]);
    }

    #[test]
    fn empty_comment_is_corrupt() {
        assert!(parse_frame("COMM", b"\x00en", 4).unwrap_err().is_corrupt());
    }
}
