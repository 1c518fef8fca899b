use byteorder::{BigEndian, ByteOrder};
use log::debug;

use crate::common::error::{MetaError, Result};
use crate::common::tag::{Tag, TagType};
use crate::id3::specs::GENRES;
use crate::mp4::atom::{kind_name, render_box, AtomIter};

/// Well-known type indicators of a `data` box.
pub const TYPE_IMPLICIT: u32 = 0;
pub const TYPE_UTF8: u32 = 1;
pub const TYPE_UTF16: u32 = 2;
pub const TYPE_JPEG: u32 = 13;
pub const TYPE_PNG: u32 = 14;
pub const TYPE_INTEGER: u32 = 21;
pub const TYPE_BMP: u32 = 27;

/// MP4 cover art format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mp4CoverFormat {
    Jpeg,
    Png,
    Bmp,
    Other(u32),
}

impl Mp4CoverFormat {
    fn from_type(code: u32) -> Self {
        match code {
            TYPE_JPEG => Mp4CoverFormat::Jpeg,
            TYPE_PNG => Mp4CoverFormat::Png,
            TYPE_BMP => Mp4CoverFormat::Bmp,
            other => Mp4CoverFormat::Other(other),
        }
    }

    fn type_code(self) -> u32 {
        match self {
            Mp4CoverFormat::Jpeg => TYPE_JPEG,
            Mp4CoverFormat::Png => TYPE_PNG,
            Mp4CoverFormat::Bmp => TYPE_BMP,
            Mp4CoverFormat::Other(code) => code,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mp4Cover {
    pub data: Vec<u8>,
    pub format: Mp4CoverFormat,
}

/// One `data` box of a freeform item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mp4FreeForm {
    pub data: Vec<u8>,
    pub dataformat: u32,
}

/// Tag value types in MP4.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mp4Value {
    Text(Vec<String>),
    Integer(Vec<i64>),
    /// Track or disc number and total.
    IntPair(u16, u16),
    Cover(Vec<Mp4Cover>),
    FreeForm(Vec<Mp4FreeForm>),
    /// Implicit or unknown payloads, kept verbatim with their type.
    Data(u32, Vec<u8>),
}

/// Integer items stored in one byte.
const INT8_KEYS: &[&str] = &["cpil", "pgap", "pcst", "hdvd", "stik", "rtng", "akID", "shwm"];
/// Integer items stored in two bytes.
const INT16_KEYS: &[&str] = &["tmpo", "\u{a9}mvi", "\u{a9}mvc"];
/// Integer items stored in eight bytes.
const INT64_KEYS: &[&str] = &["plID"];

/// The `ilst` item list. Keys are box names (`©nam`, `trkn`) or
/// `----:mean:name` for freeform items.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Mp4Tag {
    pub items: Vec<(String, Mp4Value)>,
}

impl Mp4Tag {
    pub fn new() -> Self {
        Mp4Tag::default()
    }

    /// Parse the payload of an `ilst` box. Items that fail to parse are
    /// skipped with a debug record.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let mut tag = Mp4Tag::new();
        for item in AtomIter::new(payload, 0) {
            let item = item?;
            let start = (item.offset() + item.header_len()) as usize;
            let end = item.end() as usize;
            let key = kind_name(&item.kind);
            match parse_item(&key, &payload[start..end]) {
                Ok(Some((key, value))) => tag.insert(key, value),
                Ok(None) => debug!("MP4: item {} has no data", key),
                Err(err) => debug!("MP4: skipping item {}: {}", key, err),
            }
        }
        Ok(tag)
    }

    /// Values of a repeated key are merged into one entry.
    fn insert(&mut self, key: String, value: Mp4Value) {
        let Some(index) = self.items.iter().position(|(k, _)| *k == key) else {
            self.items.push((key, value));
            return;
        };
        match (&mut self.items[index].1, value) {
            (Mp4Value::Text(existing), Mp4Value::Text(more)) => existing.extend(more),
            (Mp4Value::Integer(existing), Mp4Value::Integer(more)) => existing.extend(more),
            (Mp4Value::Cover(existing), Mp4Value::Cover(more)) => existing.extend(more),
            (Mp4Value::FreeForm(existing), Mp4Value::FreeForm(more)) => existing.extend(more),
            (existing, value) => *existing = value,
        }
    }

    /// Payload of the `ilst` box.
    pub fn render(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        for (key, value) in &self.items {
            out.extend_from_slice(&render_item(key, value)?);
        }
        Ok(out)
    }

    pub fn keys(&self) -> Vec<String> {
        self.items.iter().map(|(k, _)| k.clone()).collect()
    }

    pub fn get(&self, key: &str) -> Option<&Mp4Value> {
        self.items.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Mp4Value> {
        self.items.iter_mut().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.items.iter().any(|(k, _)| k == key)
    }

    /// Replace the value of `key`. Keys must map to a four-byte box name
    /// or be a `----:mean:name` freeform key.
    pub fn set(&mut self, key: &str, value: Mp4Value) -> Result<()> {
        if !key.starts_with("----:") {
            key_to_kind(key)?;
        }
        match self.get_mut(key) {
            Some(existing) => *existing = value,
            None => self.items.push((key.to_string(), value)),
        }
        Ok(())
    }

    pub fn remove(&mut self, key: &str) {
        self.items.retain(|(k, _)| k != key);
    }

    pub fn text(&self, key: &str) -> Option<String> {
        match self.get(key)? {
            Mp4Value::Text(values) => values.first().cloned(),
            Mp4Value::FreeForm(values) => values
                .iter()
                .find(|v| v.dataformat == TYPE_UTF8)
                .map(|v| String::from_utf8_lossy(&v.data).into_owned()),
            _ => None,
        }
    }

    pub fn covers(&self) -> &[Mp4Cover] {
        match self.get("covr") {
            Some(Mp4Value::Cover(covers)) => covers,
            _ => &[],
        }
    }

    fn set_text(&mut self, key: &str, value: &str) {
        if value.is_empty() {
            self.remove(key);
        } else if let Err(err) = self.set(key, Mp4Value::Text(vec![value.to_string()])) {
            debug!("MP4: {}", err);
        }
    }
}

/// Inverse of `kind_name`.
pub fn key_to_kind(key: &str) -> Result<[u8; 4]> {
    let mut kind = [0u8; 4];
    let bytes: Vec<u8> = key
        .chars()
        .map(|c| match c {
            '\u{a9}' => Ok(0xA9),
            c if c.is_ascii() => Ok(c as u8),
            c => Err(MetaError::ValueError(format!("MP4 item key {:?} has non-ASCII {:?}", key, c))),
        })
        .collect::<Result<_>>()?;
    if bytes.len() != 4 {
        return Err(MetaError::ValueError(format!("MP4 item key {:?} is not four bytes", key)));
    }
    kind.copy_from_slice(&bytes);
    Ok(kind)
}

fn parse_item(key: &str, payload: &[u8]) -> Result<Option<(String, Mp4Value)>> {
    let mut mean = None;
    let mut name = None;
    let mut datas: Vec<(u32, &[u8])> = Vec::new();
    for child in AtomIter::new(payload, 0) {
        let child = child?;
        let body = &payload[(child.offset() + child.header_len()) as usize..child.end() as usize];
        match &child.kind {
            b"data" => {
                if body.len() < 8 {
                    return Err(MetaError::corrupt("MP4", format!("data box of {} truncated", key)));
                }
                // version byte, 24-bit type, 4-byte locale
                datas.push((BigEndian::read_u32(&body[0..4]) & 0x00FF_FFFF, &body[8..]));
            }
            b"mean" if body.len() >= 4 => mean = Some(String::from_utf8_lossy(&body[4..]).into_owned()),
            b"name" if body.len() >= 4 => name = Some(String::from_utf8_lossy(&body[4..]).into_owned()),
            _ => debug!("MP4: ignoring {} box inside {}", child.name(), key),
        }
    }

    if key == "----" {
        let (Some(mean), Some(name)) = (mean, name) else {
            return Err(MetaError::corrupt("MP4", "freeform item without mean or name"));
        };
        let values = datas
            .into_iter()
            .map(|(dataformat, data)| Mp4FreeForm {
                data: data.to_vec(),
                dataformat,
            })
            .collect::<Vec<_>>();
        if values.is_empty() {
            return Ok(None);
        }
        return Ok(Some((format!("----:{}:{}", mean, name), Mp4Value::FreeForm(values))));
    }

    let Some(&(first_type, _)) = datas.first() else {
        return Ok(None);
    };
    let value = match (key, first_type) {
        ("trkn" | "disk", _) => {
            let data = datas[0].1;
            if data.len() < 4 {
                return Err(MetaError::corrupt("MP4", format!("{} pair too short", key)));
            }
            let total = if data.len() >= 6 { BigEndian::read_u16(&data[4..6]) } else { 0 };
            Mp4Value::IntPair(BigEndian::read_u16(&data[2..4]), total)
        }
        ("gnre", TYPE_IMPLICIT) => {
            // ID3v1 genre index plus one
            let data = datas[0].1;
            let index = if data.len() >= 2 { BigEndian::read_u16(&data[0..2]) as usize } else { 0 };
            match index.checked_sub(1).and_then(|i| GENRES.get(i)) {
                Some(genre) => Mp4Value::Text(vec![genre.to_string()]),
                None => Mp4Value::Data(TYPE_IMPLICIT, data.to_vec()),
            }
        }
        ("covr", _) => Mp4Value::Cover(
            datas
                .iter()
                .map(|&(code, data)| Mp4Cover {
                    data: data.to_vec(),
                    format: Mp4CoverFormat::from_type(code),
                })
                .collect(),
        ),
        (_, TYPE_UTF8) => Mp4Value::Text(
            datas
                .iter()
                .map(|(_, data)| String::from_utf8_lossy(data).into_owned())
                .collect(),
        ),
        (_, TYPE_UTF16) => Mp4Value::Text(
            datas
                .iter()
                .map(|(_, data)| encoding_rs::UTF_16BE.decode_without_bom_handling(data).0.into_owned())
                .collect(),
        ),
        (_, TYPE_INTEGER) => Mp4Value::Integer(
            datas
                .iter()
                .map(|(_, data)| read_signed(data))
                .collect::<Result<_>>()?,
        ),
        (_, code) => Mp4Value::Data(code, datas[0].1.to_vec()),
    };
    let key = if key == "gnre" && matches!(value, Mp4Value::Text(_)) {
        "\u{a9}gen".to_string()
    } else {
        key.to_string()
    };
    Ok(Some((key, value)))
}

fn read_signed(data: &[u8]) -> Result<i64> {
    Ok(match data.len() {
        1 => data[0] as i8 as i64,
        2 => BigEndian::read_i16(data) as i64,
        3 => BigEndian::read_i24(data) as i64,
        4 => BigEndian::read_i32(data) as i64,
        8 => BigEndian::read_i64(data),
        n => return Err(MetaError::corrupt("MP4", format!("{}-byte integer", n))),
    })
}

fn data_box(type_code: u32, value: &[u8]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(8 + value.len());
    payload.extend_from_slice(&type_code.to_be_bytes());
    payload.extend_from_slice(&[0; 4]);
    payload.extend_from_slice(value);
    render_box(b"data", &payload)
}

fn render_item(key: &str, value: &Mp4Value) -> Result<Vec<u8>> {
    if let Some(rest) = key.strip_prefix("----:") {
        let (mean, name) = rest
            .split_once(':')
            .ok_or_else(|| MetaError::ValueError(format!("freeform key {:?} lacks a name", key)))?;
        let mut payload = Vec::new();
        let mut mean_payload = vec![0u8; 4];
        mean_payload.extend_from_slice(mean.as_bytes());
        payload.extend_from_slice(&render_box(b"mean", &mean_payload));
        let mut name_payload = vec![0u8; 4];
        name_payload.extend_from_slice(name.as_bytes());
        payload.extend_from_slice(&render_box(b"name", &name_payload));
        match value {
            Mp4Value::FreeForm(values) => {
                for v in values {
                    payload.extend_from_slice(&data_box(v.dataformat, &v.data));
                }
            }
            Mp4Value::Text(values) => {
                for v in values {
                    payload.extend_from_slice(&data_box(TYPE_UTF8, v.as_bytes()));
                }
            }
            other => {
                return Err(MetaError::ValueError(format!("freeform item cannot hold {:?}", other)));
            }
        }
        return Ok(render_box(b"----", &payload));
    }

    let kind = key_to_kind(key)?;
    let mut payload = Vec::new();
    match value {
        Mp4Value::Text(values) => {
            for v in values {
                payload.extend_from_slice(&data_box(TYPE_UTF8, v.as_bytes()));
            }
        }
        Mp4Value::Integer(values) => {
            for &v in values {
                let bytes = if INT8_KEYS.contains(&key) {
                    vec![v as u8]
                } else if INT16_KEYS.contains(&key) {
                    (v as i16).to_be_bytes().to_vec()
                } else if INT64_KEYS.contains(&key) {
                    v.to_be_bytes().to_vec()
                } else {
                    (v as i32).to_be_bytes().to_vec()
                };
                payload.extend_from_slice(&data_box(TYPE_INTEGER, &bytes));
            }
        }
        Mp4Value::IntPair(number, total) => {
            let mut bytes = vec![0, 0];
            bytes.extend_from_slice(&number.to_be_bytes());
            bytes.extend_from_slice(&total.to_be_bytes());
            if key == "trkn" {
                bytes.extend_from_slice(&[0, 0]);
            }
            payload.extend_from_slice(&data_box(TYPE_IMPLICIT, &bytes));
        }
        Mp4Value::Cover(covers) => {
            for cover in covers {
                payload.extend_from_slice(&data_box(cover.format.type_code(), &cover.data));
            }
        }
        Mp4Value::FreeForm(values) => {
            for v in values {
                payload.extend_from_slice(&data_box(v.dataformat, &v.data));
            }
        }
        Mp4Value::Data(code, data) => payload.extend_from_slice(&data_box(*code, data)),
    }
    Ok(render_box(&kind, &payload))
}

impl Tag for Mp4Tag {
    fn tag_type(&self) -> TagType {
        TagType::Mp4
    }

    fn title(&self) -> Option<String> {
        self.text("\u{a9}nam")
    }

    fn artist(&self) -> Option<String> {
        self.text("\u{a9}ART")
    }

    fn album(&self) -> Option<String> {
        self.text("\u{a9}alb")
    }

    fn comment(&self) -> Option<String> {
        self.text("\u{a9}cmt")
    }

    fn genre(&self) -> Option<String> {
        self.text("\u{a9}gen")
    }

    fn year(&self) -> Option<u32> {
        self.text("\u{a9}day")?.get(..4)?.parse().ok()
    }

    fn track(&self) -> Option<u32> {
        match self.get("trkn")? {
            Mp4Value::IntPair(number, _) if *number > 0 => Some(*number as u32),
            _ => None,
        }
    }

    fn set_title(&mut self, value: &str) {
        self.set_text("\u{a9}nam", value);
    }

    fn set_artist(&mut self, value: &str) {
        self.set_text("\u{a9}ART", value);
    }

    fn set_album(&mut self, value: &str) {
        self.set_text("\u{a9}alb", value);
    }

    fn set_comment(&mut self, value: &str) {
        self.set_text("\u{a9}cmt", value);
    }

    fn set_genre(&mut self, value: &str) {
        self.remove("gnre");
        self.set_text("\u{a9}gen", value);
    }

    fn set_year(&mut self, value: u32) {
        let text = if value == 0 { String::new() } else { value.to_string() };
        self.set_text("\u{a9}day", &text);
    }

    fn set_track(&mut self, value: u32) {
        if value == 0 {
            self.remove("trkn");
            return;
        }
        let total = match self.get("trkn") {
            Some(Mp4Value::IntPair(_, total)) => *total,
            _ => 0,
        };
        let number = value.min(u16::MAX as u32) as u16;
        self.items.retain(|(k, _)| k != "trkn");
        self.items.push(("trkn".to_string(), Mp4Value::IntPair(number, total)));
    }

    fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn clear(&mut self) {
        self.items.clear();
    }
}
