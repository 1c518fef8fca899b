use std::collections::HashSet;

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use log::{debug, trace};

use crate::common::error::{MetaError, Result};
use crate::common::file::TagFile;

pub const IMAGE_WIDTH: u16 = 0x0100;
pub const IMAGE_LENGTH: u16 = 0x0101;
pub const IMAGE_DESCRIPTION: u16 = 0x010E;
pub const STRIP_OFFSETS: u16 = 0x0111;
pub const STRIP_BYTE_COUNTS: u16 = 0x0117;
pub const SOFTWARE: u16 = 0x0131;
pub const DATE_TIME: u16 = 0x0132;
pub const ARTIST: u16 = 0x013B;
pub const TILE_OFFSETS: u16 = 0x0144;
pub const TILE_BYTE_COUNTS: u16 = 0x0145;
pub const JPEG_OFFSET: u16 = 0x0201;
pub const JPEG_LENGTH: u16 = 0x0202;
pub const COPYRIGHT: u16 = 0x8298;
pub const EXIF_IFD: u16 = 0x8769;
pub const GPS_IFD: u16 = 0x8825;
pub const DATE_TIME_ORIGINAL: u16 = 0x9003;
pub const USER_COMMENT: u16 = 0x9286;
pub const INTEROP_IFD: u16 = 0xA005;

pub const GPS_VERSION_ID: u16 = 0x0000;
pub const GPS_LATITUDE_REF: u16 = 0x0001;
pub const GPS_LATITUDE: u16 = 0x0002;
pub const GPS_LONGITUDE_REF: u16 = 0x0003;
pub const GPS_LONGITUDE: u16 = 0x0004;

/// Entries whose value is the offset of a child IFD.
pub const SUB_IFD_TAGS: [u16; 3] = [EXIF_IFD, GPS_IFD, INTEROP_IFD];

/// (offsets, byte counts) pairs locating image data.
pub const IMAGE_DATA_TAGS: [(u16, u16); 3] = [
    (STRIP_OFFSETS, STRIP_BYTE_COUNTS),
    (TILE_OFFSETS, TILE_BYTE_COUNTS),
    (JPEG_OFFSET, JPEG_LENGTH),
];

const ENTRY_SIZE: usize = 12;

/// Size of one element of field type `kind`.
pub fn type_size(kind: u16) -> Option<u32> {
    match kind {
        1 | 2 | 6 | 7 => Some(1),
        3 | 8 => Some(2),
        4 | 9 | 11 | 13 => Some(4),
        5 | 10 | 12 => Some(8),
        _ => None,
    }
}

/// A typed entry value.
#[derive(Debug, Clone, PartialEq)]
pub enum EntryValue {
    Byte(Vec<u8>),
    Ascii(String),
    Short(Vec<u16>),
    Long(Vec<u32>),
    Rational(Vec<(u32, u32)>),
    SByte(Vec<i8>),
    Undefined(Vec<u8>),
    SShort(Vec<i16>),
    SLong(Vec<i32>),
    SRational(Vec<(i32, i32)>),
    Float(Vec<f32>),
    Double(Vec<f64>),
    Ifd(Vec<u32>),
    /// A field type this reader does not know. `field` is the entry's
    /// 4-byte value field, written back unchanged.
    Unknown { kind: u16, count: u32, field: [u8; 4] },
}

impl EntryValue {
    pub fn type_code(&self) -> u16 {
        match self {
            EntryValue::Byte(_) => 1,
            EntryValue::Ascii(_) => 2,
            EntryValue::Short(_) => 3,
            EntryValue::Long(_) => 4,
            EntryValue::Rational(_) => 5,
            EntryValue::SByte(_) => 6,
            EntryValue::Undefined(_) => 7,
            EntryValue::SShort(_) => 8,
            EntryValue::SLong(_) => 9,
            EntryValue::SRational(_) => 10,
            EntryValue::Float(_) => 11,
            EntryValue::Double(_) => 12,
            EntryValue::Ifd(_) => 13,
            EntryValue::Unknown { kind, .. } => *kind,
        }
    }

    /// Element count as stored in the entry.
    pub fn count(&self) -> u32 {
        let n = match self {
            EntryValue::Unknown { count, .. } => return *count,
            EntryValue::Byte(v) | EntryValue::Undefined(v) => v.len(),
            EntryValue::Ascii(s) => s.chars().count() + 1,
            EntryValue::Short(v) => v.len(),
            EntryValue::Long(v) | EntryValue::Ifd(v) => v.len(),
            EntryValue::Rational(v) => v.len(),
            EntryValue::SByte(v) => v.len(),
            EntryValue::SShort(v) => v.len(),
            EntryValue::SLong(v) => v.len(),
            EntryValue::SRational(v) => v.len(),
            EntryValue::Float(v) => v.len(),
            EntryValue::Double(v) => v.len(),
        };
        n as u32
    }

    pub fn parse(kind: u16, data: &[u8], big_endian: bool) -> Option<Self> {
        if big_endian {
            Self::parse_with::<BigEndian>(kind, data)
        } else {
            Self::parse_with::<LittleEndian>(kind, data)
        }
    }

    fn parse_with<E: ByteOrder>(kind: u16, data: &[u8]) -> Option<Self> {
        let value = match kind {
            1 => EntryValue::Byte(data.to_vec()),
            2 => {
                let end = data.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
                EntryValue::Ascii(data[..end].iter().map(|&b| b as char).collect())
            }
            3 => EntryValue::Short(data.chunks_exact(2).map(E::read_u16).collect()),
            4 => EntryValue::Long(data.chunks_exact(4).map(E::read_u32).collect()),
            5 => EntryValue::Rational(
                data.chunks_exact(8)
                    .map(|c| (E::read_u32(&c[..4]), E::read_u32(&c[4..])))
                    .collect(),
            ),
            6 => EntryValue::SByte(data.iter().map(|&b| b as i8).collect()),
            7 => EntryValue::Undefined(data.to_vec()),
            8 => EntryValue::SShort(data.chunks_exact(2).map(E::read_i16).collect()),
            9 => EntryValue::SLong(data.chunks_exact(4).map(E::read_i32).collect()),
            10 => EntryValue::SRational(
                data.chunks_exact(8)
                    .map(|c| (E::read_i32(&c[..4]), E::read_i32(&c[4..])))
                    .collect(),
            ),
            11 => EntryValue::Float(data.chunks_exact(4).map(E::read_f32).collect()),
            12 => EntryValue::Double(data.chunks_exact(8).map(E::read_f64).collect()),
            13 => EntryValue::Ifd(data.chunks_exact(4).map(E::read_u32).collect()),
            _ => return None,
        };
        Some(value)
    }

    pub fn render(&self, big_endian: bool) -> Vec<u8> {
        if big_endian {
            self.render_with::<BigEndian>()
        } else {
            self.render_with::<LittleEndian>()
        }
    }

    fn render_with<E: ByteOrder>(&self) -> Vec<u8> {
        match self {
            EntryValue::Unknown { field, .. } => field.to_vec(),
            EntryValue::Byte(v) | EntryValue::Undefined(v) => v.clone(),
            EntryValue::Ascii(s) => {
                let mut out: Vec<u8> = s.chars().map(|c| if (c as u32) < 256 { c as u8 } else { b'?' }).collect();
                out.push(0);
                out
            }
            EntryValue::SByte(v) => v.iter().map(|&b| b as u8).collect(),
            EntryValue::Short(v) => {
                let mut out = vec![0; v.len() * 2];
                E::write_u16_into(v, &mut out);
                out
            }
            EntryValue::SShort(v) => {
                let mut out = vec![0; v.len() * 2];
                E::write_i16_into(v, &mut out);
                out
            }
            EntryValue::Long(v) | EntryValue::Ifd(v) => {
                let mut out = vec![0; v.len() * 4];
                E::write_u32_into(v, &mut out);
                out
            }
            EntryValue::SLong(v) => {
                let mut out = vec![0; v.len() * 4];
                E::write_i32_into(v, &mut out);
                out
            }
            EntryValue::Rational(v) => {
                let flat: Vec<u32> = v.iter().flat_map(|&(n, d)| [n, d]).collect();
                let mut out = vec![0; flat.len() * 4];
                E::write_u32_into(&flat, &mut out);
                out
            }
            EntryValue::SRational(v) => {
                let flat: Vec<i32> = v.iter().flat_map(|&(n, d)| [n, d]).collect();
                let mut out = vec![0; flat.len() * 4];
                E::write_i32_into(&flat, &mut out);
                out
            }
            EntryValue::Float(v) => {
                let mut out = vec![0; v.len() * 4];
                E::write_f32_into(v, &mut out);
                out
            }
            EntryValue::Double(v) => {
                let mut out = vec![0; v.len() * 8];
                E::write_f64_into(v, &mut out);
                out
            }
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            EntryValue::Ascii(s) => Some(s),
            _ => None,
        }
    }

    /// Unsigned integer values widened to `u32`.
    pub fn as_u32s(&self) -> Option<Vec<u32>> {
        match self {
            EntryValue::Byte(v) => Some(v.iter().map(|&x| x as u32).collect()),
            EntryValue::Short(v) => Some(v.iter().map(|&x| x as u32).collect()),
            EntryValue::Long(v) | EntryValue::Ifd(v) => Some(v.clone()),
            _ => None,
        }
    }

    pub fn as_rationals(&self) -> Option<&[(u32, u32)]> {
        match self {
            EntryValue::Rational(v) => Some(v),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IfdEntry {
    pub tag: u16,
    pub value: EntryValue,
}

/// One image file directory. Sub-IFD pointers are held as `children`
/// keyed by their pointer tag and rewritten on render.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Ifd {
    pub entries: Vec<IfdEntry>,
    pub children: Vec<(u16, Ifd)>,
}

impl Ifd {
    pub fn new() -> Self {
        Ifd::default()
    }

    pub fn get(&self, tag: u16) -> Option<&EntryValue> {
        self.entries.iter().find(|e| e.tag == tag).map(|e| &e.value)
    }

    pub fn set(&mut self, tag: u16, value: EntryValue) {
        match self.entries.iter_mut().find(|e| e.tag == tag) {
            Some(entry) => entry.value = value,
            None => self.entries.push(IfdEntry { tag, value }),
        }
    }

    pub fn remove(&mut self, tag: u16) -> Option<EntryValue> {
        let index = self.entries.iter().position(|e| e.tag == tag)?;
        Some(self.entries.remove(index).value)
    }

    pub fn child(&self, tag: u16) -> Option<&Ifd> {
        self.children.iter().find(|(t, _)| *t == tag).map(|(_, ifd)| ifd)
    }

    /// The child IFD behind `tag`, created empty when missing.
    pub fn child_mut(&mut self, tag: u16) -> &mut Ifd {
        let index = match self.children.iter().position(|(t, _)| *t == tag) {
            Some(index) => index,
            None => {
                self.children.push((tag, Ifd::new()));
                self.children.len() - 1
            }
        };
        &mut self.children[index].1
    }

    pub fn remove_child(&mut self, tag: u16) -> Option<Ifd> {
        let index = self.children.iter().position(|(t, _)| *t == tag)?;
        Some(self.children.remove(index).1)
    }

    /// (start, end) ranges of the image data this IFD points at.
    pub fn image_extents(&self) -> Vec<(u64, u64)> {
        let mut extents = Vec::new();
        for (offsets_tag, counts_tag) in IMAGE_DATA_TAGS {
            let offsets = self.get(offsets_tag).and_then(EntryValue::as_u32s);
            let counts = self.get(counts_tag).and_then(EntryValue::as_u32s);
            if let (Some(offsets), Some(counts)) = (offsets, counts) {
                for (offset, count) in offsets.into_iter().zip(counts) {
                    if count > 0 {
                        extents.push((offset as u64, offset as u64 + count as u64));
                    }
                }
            }
        }
        extents
    }

    /// Append this directory, its out-of-line values and its children to
    /// `out`, which will be placed at file offset `base`. Returns the index
    /// in `out` of the next-IFD pointer, left zero.
    fn render_into(&self, out: &mut Vec<u8>, base: u64, big_endian: bool) -> Result<usize> {
        align(out);
        let mut slots: Vec<(u16, Option<&EntryValue>)> = self
            .entries
            .iter()
            .filter(|e| !SUB_IFD_TAGS.contains(&e.tag))
            .map(|e| (e.tag, Some(&e.value)))
            .chain(self.children.iter().map(|(tag, _)| (*tag, None)))
            .collect();
        slots.sort_by_key(|(tag, _)| *tag);

        let count = u16::try_from(slots.len()).map_err(|_| MetaError::ValueError("too many IFD entries".into()))?;
        let start = out.len();
        let dir_len = 2 + slots.len() * ENTRY_SIZE + 4;
        out.resize(start + dir_len, 0);
        write_u16(&mut out[start..], count, big_endian);

        for (i, (tag, value)) in slots.into_iter().enumerate() {
            let slot = start + 2 + i * ENTRY_SIZE;
            let (kind, n, field) = match value {
                Some(value) => {
                    let data = value.render(big_endian);
                    let field = if data.len() <= 4 {
                        let mut inline = [0u8; 4];
                        inline[..data.len()].copy_from_slice(&data);
                        inline
                    } else {
                        align(out);
                        let at = offset_of(base, out.len())?;
                        out.extend_from_slice(&data);
                        u32_bytes(at, big_endian)
                    };
                    (value.type_code(), value.count(), field)
                }
                None => {
                    let child = self
                        .child(tag)
                        .ok_or_else(|| MetaError::ValueError(format!("missing child IFD {:#06x}", tag)))?;
                    align(out);
                    let at = offset_of(base, out.len())?;
                    child.render_into(out, base, big_endian)?;
                    (4, 1, u32_bytes(at, big_endian))
                }
            };
            write_u16(&mut out[slot..], tag, big_endian);
            write_u16(&mut out[slot + 2..], kind, big_endian);
            out[slot + 4..slot + 8].copy_from_slice(&u32_bytes(n, big_endian));
            out[slot + 8..slot + 12].copy_from_slice(&field);
        }
        Ok(start + dir_len - 4)
    }
}

fn align(out: &mut Vec<u8>) {
    if out.len() % 2 == 1 {
        out.push(0);
    }
}

fn offset_of(base: u64, index: usize) -> Result<u32> {
    u32::try_from(base + index as u64).map_err(|_| MetaError::ValueError("IFD offset beyond 4 GiB".into()))
}

fn write_u16(out: &mut [u8], value: u16, big_endian: bool) {
    if big_endian {
        BigEndian::write_u16(out, value)
    } else {
        LittleEndian::write_u16(out, value)
    }
}

fn u32_bytes(value: u32, big_endian: bool) -> [u8; 4] {
    if big_endian {
        value.to_be_bytes()
    } else {
        value.to_le_bytes()
    }
}

fn read_u16(data: &[u8], big_endian: bool) -> u16 {
    if big_endian {
        BigEndian::read_u16(data)
    } else {
        LittleEndian::read_u16(data)
    }
}

fn read_u32(data: &[u8], big_endian: bool) -> u32 {
    if big_endian {
        BigEndian::read_u32(data)
    } else {
        LittleEndian::read_u32(data)
    }
}

/// Render an IFD chain to be placed at `base` (even). The first IFD starts
/// at `base`.
pub fn render_chain(ifds: &[Ifd], base: u64, big_endian: bool) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let mut next_slot: Option<usize> = None;
    for ifd in ifds {
        align(&mut out);
        let at = offset_of(base, out.len())?;
        if let Some(slot) = next_slot {
            out[slot..slot + 4].copy_from_slice(&u32_bytes(at, big_endian));
        }
        next_slot = Some(ifd.render_into(&mut out, base, big_endian)?);
    }
    Ok(out)
}

/// Walks IFDs on disk, remembering which byte ranges they occupy.
pub(crate) struct IfdReader<'a> {
    file: &'a mut TagFile,
    big_endian: bool,
    file_len: u64,
    visited: HashSet<u64>,
    pub extents: Vec<(u64, u64)>,
}

impl<'a> IfdReader<'a> {
    pub fn new(file: &'a mut TagFile, big_endian: bool) -> Result<Self> {
        let file_len = file.length()?;
        Ok(IfdReader {
            file,
            big_endian,
            file_len,
            visited: HashSet::new(),
            extents: Vec::new(),
        })
    }

    /// Read the IFD at `offset`. Returns it with the next-IFD offset.
    pub fn read(&mut self, offset: u64) -> Result<(Ifd, u32)> {
        if !self.visited.insert(offset) {
            return Err(MetaError::corrupt("TIFF", format!("IFD loop at {}", offset)));
        }
        let be = self.big_endian;
        let count = read_u16(&self.file.read_exact_at(offset, 2, "TIFF")?, be) as usize;
        let dir_len = count * ENTRY_SIZE + 4;
        let dir = self.file.read_exact_at(offset + 2, dir_len, "TIFF")?;
        self.extents.push((offset, offset + 2 + dir_len as u64));
        trace!("TIFF: IFD at {} with {} entries", offset, count);

        let mut ifd = Ifd::new();
        for raw in dir[..count * ENTRY_SIZE].chunks_exact(ENTRY_SIZE) {
            let tag = read_u16(&raw[0..2], be);
            let kind = read_u16(&raw[2..4], be);
            let n = read_u32(&raw[4..8], be);
            let Some(size) = type_size(kind) else {
                if SUB_IFD_TAGS.contains(&tag) {
                    self.file.mark_corrupt(format!("sub-IFD pointer {:#06x} of type {}", tag, kind));
                    continue;
                }
                debug!("TIFF: entry {:#06x} has unknown type {}, kept as is", tag, kind);
                let field = [raw[8], raw[9], raw[10], raw[11]];
                ifd.entries.push(IfdEntry {
                    tag,
                    value: EntryValue::Unknown { kind, count: n, field },
                });
                continue;
            };
            let len = size as u64 * n as u64;
            let data = if len <= 4 {
                raw[8..8 + len as usize].to_vec()
            } else {
                let at = read_u32(&raw[8..12], be) as u64;
                if at + len > self.file_len {
                    return Err(MetaError::corrupt(
                        "TIFF",
                        format!("entry {:#06x} points past the end of the file", tag),
                    ));
                }
                self.extents.push((at, at + len));
                self.file.read_exact_at(at, len as usize, "TIFF")?.into_inner()
            };
            let Some(value) = EntryValue::parse(kind, &data, be) else {
                return Err(MetaError::unsupported("TIFF", format!("field type {}", kind)));
            };

            if SUB_IFD_TAGS.contains(&tag) {
                let Some(child_offset) = value.as_u32s().and_then(|v| v.first().copied()) else {
                    self.file.mark_corrupt(format!("sub-IFD pointer {:#06x} without an offset", tag));
                    continue;
                };
                match self.read(child_offset as u64) {
                    Ok((child, _)) => ifd.children.push((tag, child)),
                    Err(err) if err.is_corrupt() => {
                        self.file.mark_corrupt(format!("sub-IFD {:#06x}: {}", tag, err));
                    }
                    Err(err) => return Err(err),
                }
                continue;
            }
            ifd.entries.push(IfdEntry { tag, value });
        }
        let next = read_u32(&dir[count * ENTRY_SIZE..], be);
        Ok((ifd, next))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::stream::MemoryFile;
    use pretty_assertions::assert_eq;

    #[test]
    fn short_inline_value_is_left_justified() {
        let data = b"MM\x00\x2a\x00\x00\x00\x08\x00\x01\x01\x00\x00\x03\x00\x00\x00\x01\x00\x10\x00\x00\x00\x00\x00\x00".to_vec();
        let mut file = TagFile::new(MemoryFile::new("a.tif", data));
        let mut reader = IfdReader::new(&mut file, true).unwrap();
        let (ifd, next) = reader.read(8).unwrap();
        assert_eq!(next, 0);
        assert_eq!(ifd.get(IMAGE_WIDTH), Some(&EntryValue::Short(vec![16])));
        assert_eq!(reader.extents, vec![(8, 26)]);
    }

    #[test]
    fn values_render_in_declared_order() {
        let v = EntryValue::Rational(vec![(1, 2)]);
        assert_eq!(v.render(true), vec![0, 0, 0, 1, 0, 0, 0, 2]);
        assert_eq!(v.render(false), vec![1, 0, 0, 0, 2, 0, 0, 0]);
        assert_eq!(EntryValue::parse(5, &v.render(false), false), Some(v));
        assert_eq!(EntryValue::Ascii("ab".into()).count(), 3);
        assert_eq!(EntryValue::parse(2, b"ab\0\0", true), Some(EntryValue::Ascii("ab".into())));
    }

    #[test]
    fn chain_with_children_reads_back() {
        let mut ifd0 = Ifd::new();
        ifd0.set(IMAGE_WIDTH, EntryValue::Long(vec![640]));
        ifd0.set(IMAGE_DESCRIPTION, EntryValue::Ascii("A long description".into()));
        let exif = ifd0.child_mut(EXIF_IFD);
        exif.set(USER_COMMENT, EntryValue::Undefined(b"ASCII\0\0\0hi there".to_vec()));
        exif.child_mut(INTEROP_IFD).set(0x0001, EntryValue::Ascii("R98".into()));
        let mut ifd1 = Ifd::new();
        ifd1.set(IMAGE_WIDTH, EntryValue::Short(vec![160]));

        for be in [false, true] {
            let mut data = if be { b"MM\0\x2a\0\0\0\x08".to_vec() } else { b"II\x2a\0\x08\0\0\0".to_vec() };
            data.extend_from_slice(&render_chain(&[ifd0.clone(), ifd1.clone()], 8, be).unwrap());
            let mut file = TagFile::new(MemoryFile::new("a.tif", data));
            let mut reader = IfdReader::new(&mut file, be).unwrap();
            let (first, next) = reader.read(8).unwrap();
            assert_eq!(first, ifd0);
            let (second, last) = reader.read(next as u64).unwrap();
            assert_eq!(second, ifd1);
            assert_eq!(last, 0);
        }
    }

    #[test]
    fn self_referencing_chain_is_corrupt() {
        let data = b"II\x2a\0\x08\0\0\0\0\0\x08\0\0\0".to_vec();
        let mut file = TagFile::new(MemoryFile::new("a.tif", data));
        let mut reader = IfdReader::new(&mut file, false).unwrap();
        let (_, next) = reader.read(8).unwrap();
        assert_eq!(next, 8);
        assert!(reader.read(8).unwrap_err().is_corrupt());
    }
}
