use std::fmt;
use std::ops::{Deref, DerefMut};

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use memchr::memmem;

use crate::common::error::{MetaError, Result};

/// Text encodings found across the supported tag formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringType {
    Latin1,
    /// UTF-16 with a byte order mark (little endian when rendered).
    Utf16,
    Utf16Be,
    Utf8,
    /// UTF-16 little endian without a byte order mark.
    Utf16Le,
}

/// An owned, mutable run of bytes with value semantics.
///
/// Integer helpers never assume a byte order: every call names it. Reads past
/// the end behave as if the vector were padded with zero bytes, so a short
/// buffer yields a small number rather than a panic.
#[derive(Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ByteVector(Vec<u8>);

impl ByteVector {
    pub fn new() -> Self {
        ByteVector(Vec::new())
    }

    pub fn with_capacity(capacity: usize) -> Self {
        ByteVector(Vec::with_capacity(capacity))
    }

    /// A vector of `len` copies of `value`.
    pub fn filled(len: usize, value: u8) -> Self {
        ByteVector(vec![value; len])
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.0
    }

    pub fn data(&self) -> &[u8] {
        &self.0
    }

    /// Copy out `length` bytes starting at `offset`.
    pub fn mid(&self, offset: usize, length: usize) -> Result<ByteVector> {
        match offset.checked_add(length) {
            Some(end) if end <= self.0.len() => Ok(ByteVector(self.0[offset..end].to_vec())),
            _ => Err(MetaError::OutOfRange {
                offset,
                length,
                size: self.0.len(),
            }),
        }
    }

    /// Like [`mid`](Self::mid) but clamps the range to the available bytes.
    pub fn mid_clamped(&self, offset: usize, length: usize) -> ByteVector {
        let start = offset.min(self.0.len());
        let end = start.saturating_add(length).min(self.0.len());
        ByteVector(self.0[start..end].to_vec())
    }

    /// Everything from `offset` to the end (empty if out of range).
    pub fn tail(&self, offset: usize) -> ByteVector {
        self.mid_clamped(offset, usize::MAX)
    }

    pub fn find(&self, pattern: &[u8], start: usize) -> Option<usize> {
        if pattern.is_empty() || start >= self.0.len() {
            return None;
        }
        memmem::find(&self.0[start..], pattern).map(|pos| pos + start)
    }

    pub fn rfind(&self, pattern: &[u8]) -> Option<usize> {
        self.rfind_before(pattern, self.0.len())
    }

    /// Last occurrence of `pattern` lying entirely before `end`.
    pub fn rfind_before(&self, pattern: &[u8], end: usize) -> Option<usize> {
        if pattern.is_empty() {
            return None;
        }
        let end = end.min(self.0.len());
        memmem::rfind(&self.0[..end], pattern)
    }

    pub fn contains_at(&self, pattern: &[u8], offset: usize) -> bool {
        self.0
            .get(offset..offset.saturating_add(pattern.len()))
            .is_some_and(|window| window == pattern)
    }

    fn padded<const N: usize>(&self, offset: usize) -> [u8; N] {
        let mut buf = [0u8; N];
        if offset < self.0.len() {
            let available = (self.0.len() - offset).min(N);
            buf[..available].copy_from_slice(&self.0[offset..offset + available]);
        }
        buf
    }

    pub fn to_ushort(&self, big_endian: bool) -> u16 {
        self.ushort_at(0, big_endian)
    }

    pub fn to_uint(&self, big_endian: bool) -> u32 {
        self.uint_at(0, big_endian)
    }

    pub fn to_ulong(&self, big_endian: bool) -> u64 {
        self.ulong_at(0, big_endian)
    }

    pub fn ushort_at(&self, offset: usize, big_endian: bool) -> u16 {
        let buf: [u8; 2] = self.padded(offset);
        if big_endian {
            BigEndian::read_u16(&buf)
        } else {
            LittleEndian::read_u16(&buf)
        }
    }

    pub fn uint_at(&self, offset: usize, big_endian: bool) -> u32 {
        let buf: [u8; 4] = self.padded(offset);
        if big_endian {
            BigEndian::read_u32(&buf)
        } else {
            LittleEndian::read_u32(&buf)
        }
    }

    pub fn ulong_at(&self, offset: usize, big_endian: bool) -> u64 {
        let buf: [u8; 8] = self.padded(offset);
        if big_endian {
            BigEndian::read_u64(&buf)
        } else {
            LittleEndian::read_u64(&buf)
        }
    }

    /// 24-bit big-endian integer (FLAC block sizes, ID3v2.2 frame sizes).
    pub fn u24_be_at(&self, offset: usize) -> u32 {
        let buf: [u8; 3] = self.padded(offset);
        BigEndian::read_u24(&buf)
    }

    pub fn from_ushort(value: u16, big_endian: bool) -> ByteVector {
        let mut buf = [0u8; 2];
        if big_endian {
            BigEndian::write_u16(&mut buf, value);
        } else {
            LittleEndian::write_u16(&mut buf, value);
        }
        ByteVector(buf.to_vec())
    }

    pub fn from_uint(value: u32, big_endian: bool) -> ByteVector {
        let mut buf = [0u8; 4];
        if big_endian {
            BigEndian::write_u32(&mut buf, value);
        } else {
            LittleEndian::write_u32(&mut buf, value);
        }
        ByteVector(buf.to_vec())
    }

    pub fn from_ulong(value: u64, big_endian: bool) -> ByteVector {
        let mut buf = [0u8; 8];
        if big_endian {
            BigEndian::write_u64(&mut buf, value);
        } else {
            LittleEndian::write_u64(&mut buf, value);
        }
        ByteVector(buf.to_vec())
    }

    pub fn add(&mut self, data: &[u8]) {
        self.0.extend_from_slice(data);
    }

    pub fn push(&mut self, byte: u8) {
        self.0.push(byte);
    }

    pub fn insert_at(&mut self, index: usize, data: &[u8]) {
        let index = index.min(self.0.len());
        self.0.splice(index..index, data.iter().copied());
    }

    pub fn remove_range(&mut self, start: usize, length: usize) {
        let start = start.min(self.0.len());
        let end = start.saturating_add(length).min(self.0.len());
        self.0.drain(start..end);
    }

    pub fn resize(&mut self, len: usize, fill: u8) {
        self.0.resize(len, fill);
    }

    /// Decode as text. Decoding is lenient: invalid sequences are replaced.
    pub fn to_string_with(&self, string_type: StringType) -> String {
        decode_string(&self.0, string_type)
    }

    pub fn from_string(text: &str, string_type: StringType) -> ByteVector {
        ByteVector(encode_string(text, string_type))
    }
}

/// Decode `data` as text of the given type.
pub fn decode_string(data: &[u8], string_type: StringType) -> String {
    match string_type {
        StringType::Latin1 => data.iter().map(|&b| b as char).collect(),
        StringType::Utf8 => String::from_utf8_lossy(data).into_owned(),
        StringType::Utf16 => {
            if data.len() >= 2 && data[0] == 0xFE && data[1] == 0xFF {
                encoding_rs::UTF_16BE.decode_without_bom_handling(&data[2..]).0.into_owned()
            } else if data.len() >= 2 && data[0] == 0xFF && data[1] == 0xFE {
                encoding_rs::UTF_16LE.decode_without_bom_handling(&data[2..]).0.into_owned()
            } else {
                encoding_rs::UTF_16LE.decode_without_bom_handling(data).0.into_owned()
            }
        }
        StringType::Utf16Be => encoding_rs::UTF_16BE.decode_without_bom_handling(data).0.into_owned(),
        StringType::Utf16Le => encoding_rs::UTF_16LE.decode_without_bom_handling(data).0.into_owned(),
    }
}

/// Encode `text`; Latin-1 maps unrepresentable characters to `?`.
pub fn encode_string(text: &str, string_type: StringType) -> Vec<u8> {
    match string_type {
        StringType::Latin1 => text
            .chars()
            .map(|c| if (c as u32) <= 0xFF { c as u8 } else { b'?' })
            .collect(),
        StringType::Utf8 => text.as_bytes().to_vec(),
        StringType::Utf16 => {
            let mut out = vec![0xFF, 0xFE];
            for unit in text.encode_utf16() {
                out.extend_from_slice(&unit.to_le_bytes());
            }
            out
        }
        StringType::Utf16Be => text.encode_utf16().flat_map(|u| u.to_be_bytes()).collect(),
        StringType::Utf16Le => text.encode_utf16().flat_map(|u| u.to_le_bytes()).collect(),
    }
}

/// True when every character survives a Latin-1 round trip.
pub fn is_latin1(text: &str) -> bool {
    text.chars().all(|c| (c as u32) <= 0xFF)
}

impl Deref for ByteVector {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.0
    }
}

impl DerefMut for ByteVector {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.0
    }
}

impl AsRef<[u8]> for ByteVector {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<Vec<u8>> for ByteVector {
    fn from(v: Vec<u8>) -> Self {
        ByteVector(v)
    }
}

impl From<&[u8]> for ByteVector {
    fn from(v: &[u8]) -> Self {
        ByteVector(v.to_vec())
    }
}

impl<const N: usize> From<&[u8; N]> for ByteVector {
    fn from(v: &[u8; N]) -> Self {
        ByteVector(v.to_vec())
    }
}

impl From<&str> for ByteVector {
    fn from(v: &str) -> Self {
        ByteVector(v.as_bytes().to_vec())
    }
}

impl From<ByteVector> for Vec<u8> {
    fn from(v: ByteVector) -> Self {
        v.0
    }
}

impl Extend<u8> for ByteVector {
    fn extend<T: IntoIterator<Item = u8>>(&mut self, iter: T) {
        self.0.extend(iter);
    }
}

impl FromIterator<u8> for ByteVector {
    fn from_iter<T: IntoIterator<Item = u8>>(iter: T) -> Self {
        ByteVector(iter.into_iter().collect())
    }
}

impl fmt::Debug for ByteVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.len() <= 32 {
            write!(f, "ByteVector({:02x?})", self.0)
        } else {
            write!(f, "ByteVector({:02x?}.. {} bytes)", &self.0[..32], self.0.len())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mid_rejects_out_of_range() {
        let v = ByteVector::from(&b"abcdef"[..]);
        assert_eq!(v.mid(2, 3).unwrap().data(), b"cde");
        assert!(matches!(v.mid(4, 3), Err(MetaError::OutOfRange { .. })));
        assert_eq!(v.mid_clamped(4, 3).data(), b"ef");
        assert!(v.mid_clamped(10, 3).is_empty());
    }

    #[test]
    fn integers_respect_requested_byte_order() {
        let v = ByteVector::from(&[0x01, 0x02, 0x03, 0x04][..]);
        assert_eq!(v.to_uint(true), 0x0102_0304);
        assert_eq!(v.to_uint(false), 0x0403_0201);
        assert_eq!(v.to_ushort(true), 0x0102);
        assert_eq!(v.ushort_at(2, false), 0x0403);
        assert_eq!(v.u24_be_at(1), 0x0002_0304);
        // Short buffers read as zero padded.
        assert_eq!(v.ushort_at(3, true), 0x0400);
        assert_eq!(v.uint_at(8, true), 0);
    }

    #[test]
    fn integer_encoding_is_symmetric() {
        assert_eq!(ByteVector::from_uint(0xDEAD_BEEF, false).to_uint(false), 0xDEAD_BEEF);
        assert_eq!(ByteVector::from_ulong(1 << 40, true).data(), &[0, 0, 1, 0, 0, 0, 0, 0]);
        assert_eq!(ByteVector::from_ushort(0x1234, true).data(), &[0x12, 0x34]);
    }

    #[test]
    fn find_and_rfind() {
        let v = ByteVector::from("xxOggSyyOggSzz");
        assert_eq!(v.find(b"OggS", 0), Some(2));
        assert_eq!(v.find(b"OggS", 3), Some(8));
        assert_eq!(v.find(b"OggS", 9), None);
        assert_eq!(v.rfind(b"OggS"), Some(8));
        assert_eq!(v.rfind_before(b"OggS", 11), Some(2));
        assert_eq!(v.find(b"", 0), None);
    }

    #[test]
    fn equality_is_by_value() {
        let a = ByteVector::from("abc");
        let mut b = ByteVector::new();
        b.add(b"ab");
        b.push(b'c');
        assert_eq!(a, b);
        b.remove_range(0, 1);
        assert_ne!(a, b);
        b.insert_at(0, b"a");
        assert_eq!(a, b);
    }

    #[test]
    fn utf16_round_trip_with_bom() {
        let v = ByteVector::from_string("héllo", StringType::Utf16);
        assert_eq!(&v[..2], &[0xFF, 0xFE]);
        assert_eq!(v.to_string_with(StringType::Utf16), "héllo");
        let be = ByteVector::from_string("ab", StringType::Utf16Be);
        assert_eq!(be.data(), &[0, b'a', 0, b'b']);
    }

    #[test]
    fn latin1_replaces_wide_characters() {
        assert_eq!(encode_string("a€", StringType::Latin1), b"a?");
        assert!(is_latin1("café"));
        assert!(!is_latin1("€"));
    }
}
