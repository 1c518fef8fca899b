use crate::common::error::{MetaError, Result};

/// Synchsafe integer codec used in ID3v2 tags.
/// Each byte carries only `bits` significant bits (7 for synchsafe).
pub struct BitPaddedInt;

impl BitPaddedInt {
    pub fn decode(data: &[u8], bits: u8) -> u32 {
        let mask = (1u32 << bits) - 1;
        data.iter()
            .fold(0u32, |acc, &b| (acc << bits) | (b as u32 & mask))
    }

    pub fn syncsafe(data: &[u8]) -> u32 {
        Self::decode(data, 7)
    }

    pub fn normal(data: &[u8]) -> u32 {
        Self::decode(data, 8)
    }

    pub fn encode(value: u32, width: usize, bits: u8) -> Vec<u8> {
        let mask = (1u32 << bits) - 1;
        let mut result = vec![0u8; width];
        let mut val = value;
        for byte in result.iter_mut().rev() {
            *byte = (val & mask) as u8;
            val >>= bits;
        }
        result
    }

    /// Largest value a 4-byte synchsafe integer can hold.
    pub const MAX_SYNCHSAFE: u32 = (1 << 28) - 1;

    pub fn has_valid_padding(data: &[u8]) -> bool {
        data.iter().all(|&b| b & 0x80 == 0)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Id3Flags {
    pub unsynchronisation: bool,
    pub extended: bool,
    pub experimental: bool,
    pub footer: bool,
}

impl Id3Flags {
    fn to_byte(self) -> u8 {
        let mut b = 0;
        if self.unsynchronisation {
            b |= 0x80;
        }
        if self.extended {
            b |= 0x40;
        }
        if self.experimental {
            b |= 0x20;
        }
        if self.footer {
            b |= 0x10;
        }
        b
    }
}

pub const HEADER_SIZE: usize = 10;

/// ID3v2 header or footer (10 bytes each).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Id3v2Header {
    pub major: u8,
    pub revision: u8,
    pub flags: Id3Flags,
    /// Tag size excluding header and footer.
    pub size: u32,
}

impl Id3v2Header {
    pub fn new(major: u8) -> Self {
        Id3v2Header {
            major,
            revision: 0,
            flags: Id3Flags::default(),
            size: 0,
        }
    }

    /// Parse the 10-byte header at the start of `data`.
    pub fn parse(data: &[u8]) -> Result<Self> {
        Self::parse_with_magic(data, b"ID3")
    }

    /// Parse a v2.4 footer ("3DI").
    pub fn parse_footer(data: &[u8]) -> Result<Self> {
        Self::parse_with_magic(data, b"3DI")
    }

    fn parse_with_magic(data: &[u8], magic: &[u8; 3]) -> Result<Self> {
        if data.len() < HEADER_SIZE || &data[0..3] != magic {
            return Err(MetaError::NoHeader("ID3v2"));
        }

        let major = data[3];
        let revision = data[4];
        if !(2..=4).contains(&major) || major == 0xFF || revision == 0xFF {
            return Err(MetaError::unsupported(
                "ID3v2",
                format!("version 2.{}.{}", major, revision),
            ));
        }

        if !BitPaddedInt::has_valid_padding(&data[6..10]) {
            return Err(MetaError::corrupt("ID3v2", "tag size is not synchsafe"));
        }

        let flag_byte = data[5];
        let flags = Id3Flags {
            unsynchronisation: flag_byte & 0x80 != 0,
            extended: major >= 3 && flag_byte & 0x40 != 0,
            experimental: major >= 3 && flag_byte & 0x20 != 0,
            footer: major == 4 && flag_byte & 0x10 != 0,
        };

        Ok(Id3v2Header {
            major,
            revision,
            flags,
            size: BitPaddedInt::syncsafe(&data[6..10]),
        })
    }

    /// Full on-disk size including header and optional footer.
    pub fn full_size(&self) -> u64 {
        let mut s = self.size as u64 + HEADER_SIZE as u64;
        if self.flags.footer {
            s += HEADER_SIZE as u64;
        }
        s
    }

    pub fn render(&self) -> Vec<u8> {
        self.render_with_magic(b"ID3")
    }

    pub fn render_footer(&self) -> Vec<u8> {
        self.render_with_magic(b"3DI")
    }

    fn render_with_magic(&self, magic: &[u8; 3]) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_SIZE);
        out.extend_from_slice(magic);
        out.push(self.major);
        out.push(self.revision);
        out.push(self.flags.to_byte());
        out.extend_from_slice(&BitPaddedInt::encode(self.size, 4, 7));
        out
    }
}

/// Bytes taken by an extended header at the start of the tag body.
pub fn extended_header_size(body: &[u8], major: u8) -> Result<usize> {
    if body.len() < 4 {
        return Err(MetaError::corrupt("ID3v2", "extended header truncated"));
    }
    let size = match major {
        // v2.3 excludes the size field itself
        3 => BitPaddedInt::normal(&body[0..4]) as usize + 4,
        _ => BitPaddedInt::syncsafe(&body[0..4]) as usize,
    };
    if size < 4 || size > body.len() {
        return Err(MetaError::corrupt("ID3v2", "extended header size exceeds tag"));
    }
    Ok(size)
}

fn plausible_frame_id(id: &[u8]) -> bool {
    id.iter().all(|&b| b.is_ascii_uppercase() || b.is_ascii_digit())
}

/// Walk frame headers reading sizes with `bits` bits per byte. True when
/// the walk lands exactly on the end of the data or on padding.
fn walks_cleanly(data: &[u8], bits: u8) -> bool {
    let mut pos = 0usize;
    while pos + 10 <= data.len() && data[pos] != 0 {
        if !plausible_frame_id(&data[pos..pos + 4]) {
            return false;
        }
        let size = BitPaddedInt::decode(&data[pos + 4..pos + 8], bits) as usize;
        if pos + 10 + size > data.len() {
            return false;
        }
        pos += 10 + size;
    }
    pos >= data.len() || data[pos] == 0 || data.len() - pos < 10
}

/// Bits per byte of v2.4 frame sizes. Some encoders (notably iTunes) write
/// plain integers where synchsafe ones are required.
pub fn determine_bpi(frames: &[u8]) -> u8 {
    if walks_cleanly(frames, 7) || !walks_cleanly(frames, 8) {
        7
    } else {
        8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synchsafe_round_trip() {
        assert_eq!(BitPaddedInt::encode(257, 4, 7), vec![0, 0, 2, 1]);
        assert_eq!(BitPaddedInt::syncsafe(&[0, 0, 2, 1]), 257);
        assert_eq!(BitPaddedInt::normal(&[0, 0, 1, 1]), 257);
    }

    #[test]
    fn header_parse_and_render() {
        let raw = [b'I', b'D', b'3', 4, 0, 0x10, 0, 0, 2, 1];
        let h = Id3v2Header::parse(&raw).unwrap();
        assert_eq!(h.major, 4);
        assert!(h.flags.footer);
        assert_eq!(h.size, 257);
        assert_eq!(h.full_size(), 277);
        assert_eq!(h.render(), raw.to_vec());
        assert_eq!(&h.render_footer()[..3], b"3DI");
    }

    #[test]
    fn high_bit_in_size_is_corrupt() {
        let raw = [b'I', b'D', b'3', 3, 0, 0, 0x80, 0, 0, 0];
        assert!(Id3v2Header::parse(&raw).unwrap_err().is_corrupt());
    }

    #[test]
    fn missing_magic_is_no_header() {
        assert!(matches!(
            Id3v2Header::parse(b"TAG0000000"),
            Err(MetaError::NoHeader("ID3v2"))
        ));
    }

    #[test]
    fn itunes_style_frame_sizes_detected() {
        // One frame of 200 bytes written as a plain integer.
        let mut frames = b"TIT2".to_vec();
        frames.extend_from_slice(&200u32.to_be_bytes());
        frames.extend_from_slice(&[0, 0]);
        frames.extend(std::iter::repeat(b'a').take(200));
        assert_eq!(determine_bpi(&frames), 8);

        let mut frames = b"TIT2".to_vec();
        frames.extend_from_slice(&BitPaddedInt::encode(200, 4, 7));
        frames.extend_from_slice(&[0, 0]);
        frames.extend(std::iter::repeat(b'a').take(200));
        assert_eq!(determine_bpi(&frames), 7);
    }
}
