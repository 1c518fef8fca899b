use crate::common::error::{MetaError, Result};
use crate::id3::header::BitPaddedInt;

/// Frame format flags, normalised across v2.3 and v2.4 bit layouts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameFlags {
    pub grouping: bool,
    pub compression: bool,
    pub encryption: bool,
    pub unsynchronisation: bool,
    pub data_length_indicator: bool,
    /// The raw two flag bytes as found on disk.
    pub raw: u16,
}

impl FrameFlags {
    pub fn parse(raw: u16, major: u8) -> Self {
        match major {
            4 => FrameFlags {
                grouping: raw & 0x0040 != 0,
                compression: raw & 0x0008 != 0,
                encryption: raw & 0x0004 != 0,
                unsynchronisation: raw & 0x0002 != 0,
                data_length_indicator: raw & 0x0001 != 0,
                raw,
            },
            3 => FrameFlags {
                compression: raw & 0x0080 != 0,
                encryption: raw & 0x0040 != 0,
                grouping: raw & 0x0020 != 0,
                unsynchronisation: false,
                // v2.3 compressed frames carry the decompressed size up front
                data_length_indicator: raw & 0x0080 != 0,
                raw,
            },
            _ => FrameFlags::default(),
        }
    }

    /// Frames whose body must be decoded before the payload is usable.
    pub fn needs_decoding(&self) -> bool {
        self.grouping
            || self.compression
            || self.encryption
            || self.unsynchronisation
            || self.data_length_indicator
    }
}

/// A parsed frame header: 6 bytes in v2.2, 10 bytes in v2.3/v2.4.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameHeader {
    /// Frame ID as found on disk (3 or 4 bytes).
    pub id: Vec<u8>,
    pub size: u32,
    pub flags: FrameFlags,
}

impl FrameHeader {
    pub fn size_for(major: u8) -> usize {
        if major == 2 {
            6
        } else {
            10
        }
    }

    /// Parse a frame header. `bits` is 7 for synchsafe v2.4 sizes, 8 otherwise.
    /// Returns `None` at padding or an implausible frame ID.
    pub fn parse(data: &[u8], major: u8, bits: u8) -> Result<Option<Self>> {
        let header_size = Self::size_for(major);
        if data.len() < header_size || data[0] == 0 {
            return Ok(None);
        }
        let id_len = if major == 2 { 3 } else { 4 };
        let id = &data[..id_len];
        if !id.iter().all(|&b| b.is_ascii_uppercase() || b.is_ascii_digit()) {
            return Ok(None);
        }

        let (size, flags) = match major {
            2 => (BitPaddedInt::normal(&data[3..6]), FrameFlags::default()),
            3 | 4 => {
                let size = BitPaddedInt::decode(&data[4..8], bits);
                let raw = u16::from_be_bytes([data[8], data[9]]);
                (size, FrameFlags::parse(raw, major))
            }
            _ => {
                return Err(MetaError::unsupported("ID3v2", format!("frame header for v2.{}", major)));
            }
        };

        Ok(Some(FrameHeader {
            id: id.to_vec(),
            size,
            flags,
        }))
    }

    /// Render a v2.3/v2.4 header for `id` with `size` payload bytes.
    pub fn render(id: &[u8], size: usize, raw_flags: u16, major: u8) -> Result<Vec<u8>> {
        if id.len() != 4 {
            return Err(MetaError::ValueError(format!(
                "frame id {:?} cannot be written as v2.{}",
                String::from_utf8_lossy(id),
                major
            )));
        }
        let mut out = Vec::with_capacity(10);
        out.extend_from_slice(id);
        match major {
            4 => {
                if size as u64 > BitPaddedInt::MAX_SYNCHSAFE as u64 {
                    return Err(MetaError::ValueError("frame too large for ID3v2.4".into()));
                }
                out.extend_from_slice(&BitPaddedInt::encode(size as u32, 4, 7));
            }
            3 => {
                let size = u32::try_from(size)
                    .map_err(|_| MetaError::ValueError("frame too large for ID3v2.3".into()))?;
                out.extend_from_slice(&size.to_be_bytes());
            }
            _ => {
                return Err(MetaError::unsupported("ID3v2", format!("writing v2.{}", major)));
            }
        }
        out.extend_from_slice(&raw_flags.to_be_bytes());
        Ok(out)
    }
}

/// v2.2 three-letter IDs and their v2.4 names.
const VERSION2_FRAMES: &[(&[u8; 3], &[u8; 4])] = &[
    (b"BUF", b"RBUF"), (b"CNT", b"PCNT"), (b"COM", b"COMM"), (b"CRA", b"AENC"),
    (b"ETC", b"ETCO"), (b"GEO", b"GEOB"), (b"IPL", b"TIPL"), (b"MCI", b"MCDI"),
    (b"MLL", b"MLLT"), (b"PIC", b"APIC"), (b"POP", b"POPM"), (b"REV", b"RVRB"),
    (b"SLT", b"SYLT"), (b"STC", b"SYTC"), (b"TAL", b"TALB"), (b"TBP", b"TBPM"),
    (b"TCM", b"TCOM"), (b"TCO", b"TCON"), (b"TCP", b"TCMP"), (b"TCR", b"TCOP"),
    (b"TDY", b"TDLY"), (b"TEN", b"TENC"), (b"TFT", b"TFLT"), (b"TKE", b"TKEY"),
    (b"TLA", b"TLAN"), (b"TLE", b"TLEN"), (b"TMT", b"TMED"), (b"TOA", b"TOPE"),
    (b"TOF", b"TOFN"), (b"TOL", b"TOLY"), (b"TOR", b"TDOR"), (b"TOT", b"TOAL"),
    (b"TP1", b"TPE1"), (b"TP2", b"TPE2"), (b"TP3", b"TPE3"), (b"TP4", b"TPE4"),
    (b"TPA", b"TPOS"), (b"TPB", b"TPUB"), (b"TRC", b"TSRC"), (b"TRD", b"TDRC"),
    (b"TRK", b"TRCK"), (b"TS2", b"TSO2"), (b"TSA", b"TSOA"), (b"TSC", b"TSOC"),
    (b"TSP", b"TSOP"), (b"TSS", b"TSSE"), (b"TST", b"TSOT"), (b"TT1", b"TIT1"),
    (b"TT2", b"TIT2"), (b"TT3", b"TIT3"), (b"TXT", b"TEXT"), (b"TXX", b"TXXX"),
    (b"TYE", b"TDRC"), (b"UFI", b"UFID"), (b"ULT", b"USLT"), (b"WAF", b"WOAF"),
    (b"WAR", b"WOAR"), (b"WAS", b"WOAS"), (b"WCM", b"WCOM"), (b"WCP", b"WCOP"),
    (b"WPB", b"WPUB"), (b"WXX", b"WXXX"),
];

/// v2.3 IDs that were renamed in v2.4.
const VERSION3_FRAMES: &[(&[u8; 4], &[u8; 4])] = &[
    (b"IPLS", b"TIPL"), (b"TORY", b"TDOR"), (b"TYER", b"TDRC"), (b"XSOA", b"TSOA"),
    (b"XSOP", b"TSOP"), (b"XSOT", b"TSOT"),
];

/// IDs without any v2.4 counterpart; dropped when converting up.
const DISCARDED_BY_V24: &[&[u8; 4]] = &[b"EQUA", b"RVAD", b"TDAT", b"TIME", b"TRDA", b"TSIZ"];

/// v2.4 IDs that have no v2.3 representation.
const V24_ONLY: &[&[u8; 4]] = &[
    b"ASPI", b"EQU2", b"RVA2", b"SEEK", b"SIGN", b"TDEN", b"TDRL", b"TDTG",
    b"TMCL", b"TMOO", b"TPRO", b"TSST",
];

/// Convert a frame ID between `version` and v2.4.
///
/// With `to_version == false` the ID is read as a `version` ID and the v2.4
/// name comes back; with `to_version == true` a v2.4 ID is mapped down to
/// `version`. `None` means the frame has no counterpart. v2.4 IDs pass
/// through unchanged.
pub fn convert_id(id: &[u8], version: u8, to_version: bool) -> Option<Vec<u8>> {
    if version >= 4 {
        return Some(id.to_vec());
    }
    match (version, to_version) {
        (2, false) => VERSION2_FRAMES
            .iter()
            .find(|(v2, _)| v2.as_slice() == id)
            .map(|(_, v4)| v4.to_vec()),
        (2, true) => VERSION2_FRAMES
            .iter()
            .find(|(_, v4)| v4.as_slice() == id)
            .map(|(v2, _)| v2.to_vec()),
        (3, false) => {
            if DISCARDED_BY_V24.iter().any(|d| d.as_slice() == id) {
                return None;
            }
            let mapped = VERSION3_FRAMES
                .iter()
                .find(|(v3, _)| v3.as_slice() == id)
                .map(|(_, v4)| v4.to_vec());
            Some(mapped.unwrap_or_else(|| id.to_vec()))
        }
        (3, true) => {
            if let Some((v3, _)) = VERSION3_FRAMES.iter().find(|(_, v4)| v4.as_slice() == id) {
                return Some(v3.to_vec());
            }
            if V24_ONLY.iter().any(|d| d.as_slice() == id) {
                return None;
            }
            Some(id.to_vec())
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_comment_id_converts_up() {
        assert_eq!(convert_id(b"COM", 2, false).as_deref(), Some(&b"COMM"[..]));
        assert_eq!(convert_id(b"COMM", 2, true).as_deref(), Some(&b"COM"[..]));
        assert_eq!(convert_id(b"ZZZ", 2, false), None);
    }

    #[test]
    fn v23_renames() {
        assert_eq!(convert_id(b"TYER", 3, false).as_deref(), Some(&b"TDRC"[..]));
        assert_eq!(convert_id(b"TDRC", 3, true).as_deref(), Some(&b"TYER"[..]));
        assert_eq!(convert_id(b"TIT2", 3, false).as_deref(), Some(&b"TIT2"[..]));
        assert_eq!(convert_id(b"TDAT", 3, false), None);
        assert_eq!(convert_id(b"TMOO", 3, true), None);
        assert_eq!(convert_id(b"TMOO", 4, true).as_deref(), Some(&b"TMOO"[..]));
    }

    #[test]
    fn parses_v24_and_v22_headers() {
        let raw = [b'T', b'I', b'T', b'2', 0, 0, 1, 0, 0x00, 0x01];
        let h = FrameHeader::parse(&raw, 4, 7).unwrap().unwrap();
        assert_eq!(h.id, b"TIT2");
        assert_eq!(h.size, 128);
        assert!(h.flags.data_length_indicator);

        let raw = [b'T', b'T', b'2', 0, 1, 0];
        let h = FrameHeader::parse(&raw, 2, 8).unwrap().unwrap();
        assert_eq!(h.id, b"TT2");
        assert_eq!(h.size, 256);

        assert_eq!(FrameHeader::parse(&[0; 10], 4, 7).unwrap(), None);
    }

    #[test]
    fn render_uses_version_size_encoding() {
        let v4 = FrameHeader::render(b"TALB", 200, 0, 4).unwrap();
        assert_eq!(&v4[4..8], &[0, 0, 1, 0x48]);
        let v3 = FrameHeader::render(b"TALB", 200, 0, 3).unwrap();
        assert_eq!(&v3[4..8], &[0, 0, 0, 200]);
        assert!(FrameHeader::render(b"TAL", 1, 0, 4).is_err());
    }
}
