//! TIFF and its EXIF/GPS directories.
//!
//! Saving renders the whole IFD tree again and places it after the image
//! data. When the existing directories already form the tail of the file
//! they are overwritten, otherwise the new tree is appended and the header
//! pointer moved to it. Image data is never touched.

pub mod ifd;

pub use ifd::{render_chain, EntryValue, Ifd, IfdEntry};

use log::debug;

use crate::common::bytes::{decode_string, encode_string, StringType};
use crate::common::config::{ReadStyle, WriteOptions};
use crate::common::error::{MetaError, Result};
use crate::common::file::TagFile;
use crate::common::media::MediaFile;
use crate::common::stream::FileAbstraction;
use crate::common::tag::{CombinedTag, Tag, TagType};
use ifd::IfdReader;

pub const HEADER_SIZE: u64 = 8;

/// Degrees, minutes and seconds as rationals.
pub fn to_dms(value: f64) -> [(u32, u32); 3] {
    let value = value.abs();
    let degrees = value.trunc();
    let minutes = ((value - degrees) * 60.0).trunc();
    let seconds = (value - degrees - minutes / 60.0) * 3600.0;
    [
        (degrees as u32, 1),
        (minutes as u32, 1),
        ((seconds * 10_000.0).round() as u32, 10_000),
    ]
}

pub fn from_dms(parts: &[(u32, u32)]) -> Option<f64> {
    if parts.len() != 3 || parts.iter().any(|&(_, d)| d == 0) {
        return None;
    }
    let [d, m, s] = [0, 1, 2].map(|i| parts[i].0 as f64 / parts[i].1 as f64);
    Some(d + m / 60.0 + s / 3600.0)
}

/// The IFD chain of a TIFF file as a tag.
#[derive(Debug, Clone, PartialEq)]
pub struct ExifTag {
    pub ifds: Vec<Ifd>,
    big_endian: bool,
}

const DESCRIPTIVE: [u16; 5] = [ifd::IMAGE_DESCRIPTION, ifd::ARTIST, ifd::DATE_TIME, ifd::COPYRIGHT, ifd::SOFTWARE];

impl ExifTag {
    pub fn new(big_endian: bool) -> Self {
        ExifTag {
            ifds: Vec::new(),
            big_endian,
        }
    }

    pub fn is_big_endian(&self) -> bool {
        self.big_endian
    }

    pub fn ifd0(&self) -> Option<&Ifd> {
        self.ifds.first()
    }

    pub fn ifd0_mut(&mut self) -> &mut Ifd {
        if self.ifds.is_empty() {
            self.ifds.push(Ifd::new());
        }
        &mut self.ifds[0]
    }

    pub fn exif(&self) -> Option<&Ifd> {
        self.ifd0()?.child(ifd::EXIF_IFD)
    }

    pub fn gps(&self) -> Option<&Ifd> {
        self.ifd0()?.child(ifd::GPS_IFD)
    }

    fn text(&self, tag: u16) -> Option<String> {
        self.ifd0()?.get(tag)?.as_text().map(str::to_string)
    }

    fn set_text(&mut self, tag: u16, value: &str) {
        if value.is_empty() {
            self.ifd0_mut().remove(tag);
        } else {
            self.ifd0_mut().set(tag, EntryValue::Ascii(value.to_string()));
        }
    }

    /// Exif `UserComment`, decoded by its 8-byte character code.
    pub fn user_comment(&self) -> Option<String> {
        let raw = match self.exif()?.get(ifd::USER_COMMENT)? {
            EntryValue::Undefined(raw) if raw.len() >= 8 => raw,
            _ => return None,
        };
        let (code, body) = raw.split_at(8);
        let text = match code {
            b"UNICODE\0" => {
                let kind = if self.big_endian { StringType::Utf16Be } else { StringType::Utf16Le };
                decode_string(body, kind)
            }
            _ => decode_string(body, StringType::Latin1),
        };
        let text = text.trim_end_matches(['\0', ' ']).to_string();
        Some(text).filter(|t| !t.is_empty())
    }

    pub fn set_user_comment(&mut self, value: &str) {
        if value.is_empty() {
            if let Some((_, exif)) = self
                .ifds
                .first_mut()
                .and_then(|i| i.children.iter_mut().find(|(t, _)| *t == ifd::EXIF_IFD))
            {
                exif.remove(ifd::USER_COMMENT);
            }
            return;
        }
        let mut raw = Vec::with_capacity(8 + value.len() * 2);
        if value.is_ascii() {
            raw.extend_from_slice(b"ASCII\0\0\0");
            raw.extend_from_slice(value.as_bytes());
        } else {
            raw.extend_from_slice(b"UNICODE\0");
            let kind = if self.big_endian { StringType::Utf16Be } else { StringType::Utf16Le };
            raw.extend_from_slice(&encode_string(value, kind));
        }
        self.ifd0_mut()
            .child_mut(ifd::EXIF_IFD)
            .set(ifd::USER_COMMENT, EntryValue::Undefined(raw));
    }

    /// Latitude and longitude in signed decimal degrees.
    pub fn gps_position(&self) -> Option<(f64, f64)> {
        let gps = self.gps()?;
        let coordinate = |ref_tag, value_tag, negative: &str| {
            let value = from_dms(gps.get(value_tag)?.as_rationals()?)?;
            let hemisphere = gps.get(ref_tag).and_then(EntryValue::as_text).unwrap_or("");
            Some(if hemisphere.eq_ignore_ascii_case(negative) { -value } else { value })
        };
        Some((
            coordinate(ifd::GPS_LATITUDE_REF, ifd::GPS_LATITUDE, "S")?,
            coordinate(ifd::GPS_LONGITUDE_REF, ifd::GPS_LONGITUDE, "W")?,
        ))
    }

    pub fn set_gps_position(&mut self, latitude: f64, longitude: f64) -> Result<()> {
        if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
            return Err(MetaError::ValueError(format!(
                "GPS position {}, {} out of range",
                latitude, longitude
            )));
        }
        let gps = self.ifd0_mut().child_mut(ifd::GPS_IFD);
        if gps.get(ifd::GPS_VERSION_ID).is_none() {
            gps.set(ifd::GPS_VERSION_ID, EntryValue::Byte(vec![2, 2, 0, 0]));
        }
        let lat_ref = if latitude < 0.0 { "S" } else { "N" };
        let lon_ref = if longitude < 0.0 { "W" } else { "E" };
        gps.set(ifd::GPS_LATITUDE_REF, EntryValue::Ascii(lat_ref.into()));
        gps.set(ifd::GPS_LATITUDE, EntryValue::Rational(to_dms(latitude).to_vec()));
        gps.set(ifd::GPS_LONGITUDE_REF, EntryValue::Ascii(lon_ref.into()));
        gps.set(ifd::GPS_LONGITUDE, EntryValue::Rational(to_dms(longitude).to_vec()));
        Ok(())
    }

    pub fn clear_gps(&mut self) {
        if let Some(ifd0) = self.ifds.first_mut() {
            ifd0.remove_child(ifd::GPS_IFD);
        }
    }
}

impl Tag for ExifTag {
    fn tag_type(&self) -> TagType {
        TagType::Tiff
    }

    fn title(&self) -> Option<String> {
        self.text(ifd::IMAGE_DESCRIPTION)
    }

    fn artist(&self) -> Option<String> {
        self.text(ifd::ARTIST)
    }

    fn album(&self) -> Option<String> {
        None
    }

    fn comment(&self) -> Option<String> {
        self.user_comment()
    }

    fn genre(&self) -> Option<String> {
        None
    }

    /// From `DateTime`, falling back to Exif `DateTimeOriginal`.
    fn year(&self) -> Option<u32> {
        let text = self.text(ifd::DATE_TIME).or_else(|| {
            self.exif()?
                .get(ifd::DATE_TIME_ORIGINAL)?
                .as_text()
                .map(str::to_string)
        })?;
        text.get(..4)?.parse().ok().filter(|&y| y > 0)
    }

    fn track(&self) -> Option<u32> {
        None
    }

    fn set_title(&mut self, value: &str) {
        self.set_text(ifd::IMAGE_DESCRIPTION, value);
    }

    fn set_artist(&mut self, value: &str) {
        self.set_text(ifd::ARTIST, value);
    }

    fn set_album(&mut self, _value: &str) {}

    fn set_comment(&mut self, value: &str) {
        self.set_user_comment(value);
    }

    fn set_genre(&mut self, _value: &str) {}

    fn set_year(&mut self, value: u32) {
        let text = if value == 0 { String::new() } else { format!("{:04}:01:01 00:00:00", value) };
        self.set_text(ifd::DATE_TIME, &text);
    }

    fn set_track(&mut self, _value: u32) {}

    fn is_empty(&self) -> bool {
        let Some(ifd0) = self.ifd0() else {
            return true;
        };
        !DESCRIPTIVE.iter().any(|&t| ifd0.get(t).is_some()) && self.user_comment().is_none() && self.gps().is_none()
    }

    /// Removes descriptive fields only; the image structure stays.
    fn clear(&mut self) {
        if let Some(ifd0) = self.ifds.first_mut() {
            ifd0.entries.retain(|e| !DESCRIPTIVE.contains(&e.tag));
        }
        self.set_user_comment("");
        self.clear_gps();
    }
}

pub struct TiffFile {
    file: TagFile,
    /// Start of the directory bytes when they run to the end of the file.
    tail: Option<u64>,
    width: Option<u32>,
    height: Option<u32>,
    pub tag: ExifTag,
}

impl TiffFile {
    pub fn open(abstraction: impl FileAbstraction + 'static, style: ReadStyle) -> Result<Self> {
        let mut file = TagFile::new(abstraction);
        let header = file.read_at(0, HEADER_SIZE as usize)?;
        let big_endian = match header.get(..2) {
            Some(b"II") => false,
            Some(b"MM") => true,
            _ => return Err(MetaError::NoHeader("TIFF")),
        };
        match header.ushort_at(2, big_endian) {
            42 if header.len() == 8 => {}
            43 => return Err(MetaError::unsupported("TIFF", "BigTIFF")),
            _ => return Err(MetaError::NoHeader("TIFF")),
        }
        let first = header.uint_at(4, big_endian) as u64;
        let file_len = file.length()?;

        let mut tag = ExifTag::new(big_endian);
        let mut reader = IfdReader::new(&mut file, big_endian)?;
        let mut next = first;
        let mut failure = None;
        while next != 0 {
            match reader.read(next) {
                Ok((ifd, following)) => {
                    tag.ifds.push(ifd);
                    next = following as u64;
                }
                Err(err) if err.is_corrupt() => {
                    failure = Some(format!("IFD at {}: {}", next, err));
                    break;
                }
                Err(err) => return Err(err),
            }
        }
        let mut extents = std::mem::take(&mut reader.extents);
        if let Some(reason) = failure {
            file.mark_corrupt(reason);
        }
        if tag.ifds.is_empty() && !file.is_possibly_corrupt() {
            return Err(MetaError::corrupt("TIFF", "no image file directory"));
        }

        let image: Vec<(u64, u64)> = tag.ifds.iter().flat_map(Ifd::image_extents).collect();
        let image_start = image.iter().map(|e| e.0).min();
        let image_end = image.iter().map(|e| e.1).max().unwrap_or(HEADER_SIZE);
        if let Some(start) = image_start {
            file.set_invariant_region(start, image_end);
        }

        extents.sort_unstable();
        let tail = tail_start(&extents, image_end, file_len);
        debug!("TIFF: {} IFDs, rewritable tail {:?}", tag.ifds.len(), tail);

        let (width, height) = if style.properties {
            let dimension = |t| {
                tag.ifd0()
                    .and_then(|i| i.get(t))
                    .and_then(EntryValue::as_u32s)
                    .and_then(|v| v.first().copied())
            };
            (dimension(ifd::IMAGE_WIDTH), dimension(ifd::IMAGE_LENGTH))
        } else {
            (None, None)
        };

        Ok(TiffFile {
            file,
            tail,
            width,
            height,
            tag,
        })
    }

    pub fn is_big_endian(&self) -> bool {
        self.tag.big_endian
    }

    pub fn dimensions(&self) -> Option<(u32, u32)> {
        Some((self.width?, self.height?))
    }
}

/// Where the directory bytes begin if they, and nothing else, fill the file
/// from after the image data to its end.
fn tail_start(extents: &[(u64, u64)], image_end: u64, file_len: u64) -> Option<u64> {
    let start = extents.first()?.0;
    if start < image_end {
        return None;
    }
    let mut covered = start;
    for &(s, e) in extents {
        // Word alignment leaves single pad bytes between values.
        if s > covered + 1 {
            return None;
        }
        covered = covered.max(e);
    }
    (covered + 1 >= file_len).then_some(start)
}

impl MediaFile for TiffFile {
    fn tag_file(&self) -> &TagFile {
        &self.file
    }

    fn tags(&mut self) -> CombinedTag<'_> {
        let tag: &mut dyn Tag = &mut self.tag;
        CombinedTag::new(vec![tag])
    }

    fn save_with(&mut self, _options: &WriteOptions) -> Result<()> {
        self.file.ensure_writable()?;
        if self.tag.ifds.is_empty() {
            return Err(MetaError::ValueError("TIFF needs at least one IFD".into()));
        }
        let file_len = self.file.length()?;
        let base = self.tail.unwrap_or(file_len).max(HEADER_SIZE);
        let base = base + base % 2;
        let blob = render_chain(&self.tag.ifds, base, self.tag.big_endian)?;
        let first = u32::try_from(base).map_err(|_| MetaError::ValueError("IFD offset beyond 4 GiB".into()))?;

        self.file.insert(&blob, base, file_len.saturating_sub(base))?;
        let pointer = if self.tag.big_endian { first.to_be_bytes() } else { first.to_le_bytes() };
        self.file.write_at(4, &pointer)?;
        self.tail = Some(base);
        Ok(())
    }
}
