use byteorder::{ByteOrder, LittleEndian};

use crate::common::error::{MetaError, Result};

const FLAG_READ_ONLY: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApeValue {
    /// UTF-8, several values separated by NUL.
    Text(Vec<String>),
    Binary(Vec<u8>),
    /// A URL or file name.
    Locator(String),
}

impl ApeValue {
    fn kind(&self) -> u32 {
        match self {
            ApeValue::Text(_) => 0,
            ApeValue::Binary(_) => 1,
            ApeValue::Locator(_) => 2,
        }
    }

    fn render(&self) -> Vec<u8> {
        match self {
            ApeValue::Text(values) => values.join("\0").into_bytes(),
            ApeValue::Binary(data) => data.clone(),
            ApeValue::Locator(url) => url.as_bytes().to_vec(),
        }
    }
}

/// One APEv2 item: key, flags, value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApeItem {
    pub key: String,
    pub value: ApeValue,
    pub read_only: bool,
}

impl ApeItem {
    pub fn text(key: &str, value: &str) -> Self {
        ApeItem {
            key: key.to_string(),
            value: ApeValue::Text(vec![value.to_string()]),
            read_only: false,
        }
    }

    pub fn binary(key: &str, data: Vec<u8>) -> Self {
        ApeItem {
            key: key.to_string(),
            value: ApeValue::Binary(data),
            read_only: false,
        }
    }

    /// Keys are 2..=255 printable ASCII characters, excluding a few
    /// reserved words.
    pub fn is_valid_key(key: &str) -> bool {
        const RESERVED: [&str; 4] = ["ID3", "TAG", "OGGS", "MP+"];
        (2..=255).contains(&key.len())
            && key.bytes().all(|b| (0x20..=0x7E).contains(&b))
            && !RESERVED.iter().any(|r| r.eq_ignore_ascii_case(key))
    }

    pub fn as_text(&self) -> Option<&[String]> {
        match &self.value {
            ApeValue::Text(values) => Some(values),
            _ => None,
        }
    }

    /// Parse one item at the start of `data`. Returns the item and the
    /// number of bytes it occupied.
    pub fn parse(data: &[u8]) -> Result<(Self, usize)> {
        if data.len() < 11 {
            return Err(MetaError::corrupt("APE", "item header truncated"));
        }
        let size = LittleEndian::read_u32(&data[0..4]) as usize;
        let flags = LittleEndian::read_u32(&data[4..8]);
        let key_end = memchr::memchr(0, &data[8..])
            .map(|i| i + 8)
            .ok_or_else(|| MetaError::corrupt("APE", "item key not terminated"))?;
        let key = String::from_utf8_lossy(&data[8..key_end]).into_owned();
        if !Self::is_valid_key(&key) {
            return Err(MetaError::corrupt("APE", format!("invalid item key {:?}", key)));
        }
        let start = key_end + 1;
        let end = start
            .checked_add(size)
            .filter(|&end| end <= data.len())
            .ok_or_else(|| MetaError::corrupt("APE", format!("item {} overruns tag", key)))?;
        let raw = &data[start..end];

        let value = match (flags >> 1) & 3 {
            0 => ApeValue::Text(
                String::from_utf8_lossy(raw)
                    .split('\0')
                    .map(str::to_string)
                    .collect(),
            ),
            2 => ApeValue::Locator(String::from_utf8_lossy(raw).into_owned()),
            _ => ApeValue::Binary(raw.to_vec()),
        };
        Ok((
            ApeItem {
                key,
                value,
                read_only: flags & FLAG_READ_ONLY != 0,
            },
            end,
        ))
    }

    pub fn render(&self) -> Vec<u8> {
        let value = self.value.render();
        let flags = (self.value.kind() << 1) | u32::from(self.read_only);
        let mut out = Vec::with_capacity(9 + self.key.len() + value.len());
        let mut head = [0u8; 8];
        LittleEndian::write_u32(&mut head[0..4], value.len() as u32);
        LittleEndian::write_u32(&mut head[4..8], flags);
        out.extend_from_slice(&head);
        out.extend_from_slice(self.key.as_bytes());
        out.push(0);
        out.extend_from_slice(&value);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_item_with_two_values() {
        let item = ApeItem {
            key: "Artist".into(),
            value: ApeValue::Text(vec!["A".into(), "B".into()]),
            read_only: false,
        };
        let raw = item.render();
        assert_eq!(&raw[0..4], &[3, 0, 0, 0]);
        assert_eq!(&raw[8..15], b"Artist\0");
        let (back, used) = ApeItem::parse(&raw).unwrap();
        assert_eq!(used, raw.len());
        assert_eq!(back, item);
    }

    #[test]
    fn rejects_reserved_key() {
        assert!(!ApeItem::is_valid_key("tag"));
        assert!(!ApeItem::is_valid_key("x"));
        assert!(ApeItem::is_valid_key("Cover Art (Front)"));
    }

    #[test]
    fn overrunning_item_is_corrupt() {
        let mut raw = ApeItem::text("Title", "abc").render();
        raw.truncate(raw.len() - 1);
        assert!(ApeItem::parse(&raw).unwrap_err().is_corrupt());
    }
}
