use byteorder::{ByteOrder, LittleEndian};

use crate::common::error::{MetaError, Result};
use crate::common::file::TagFile;

pub const MAGIC: &[u8; 4] = b"OggS";
pub const HEADER_SIZE: usize = 27;
const MAX_SEGMENTS: usize = 255;

const CONTINUED: u8 = 0x01;
const FIRST: u8 = 0x02;
const LAST: u8 = 0x04;

/// Ogg page checksum: CRC-32, polynomial 0x04C11DB7, no reflection,
/// zero initial value, computed with the checksum field zeroed.
pub fn crc(data: &[u8]) -> u32 {
    data.iter().fold(0u32, |crc, &byte| {
        (crc << 8) ^ CRC_TABLE[((crc >> 24) as u8 ^ byte) as usize]
    })
}

const CRC_TABLE: [u32; 256] = {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut r = (i as u32) << 24;
        let mut j = 0;
        while j < 8 {
            r = if r & 0x8000_0000 != 0 { (r << 1) ^ 0x04C1_1DB7 } else { r << 1 };
            j += 1;
        }
        table[i] = r;
        i += 1;
    }
    table
};

/// The fixed 27-byte page header plus its lacing table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageHeader {
    pub version: u8,
    pub header_type: u8,
    /// -1 when no packet finishes on this page.
    pub granule: i64,
    pub serial: u32,
    pub sequence: u32,
    pub checksum: u32,
    pub lacing: Vec<u8>,
}

impl PageHeader {
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_SIZE {
            return Err(MetaError::corrupt("Ogg", "page header truncated"));
        }
        if &data[0..4] != MAGIC {
            return Err(MetaError::corrupt("Ogg", "missing OggS capture pattern"));
        }
        if data[4] != 0 {
            return Err(MetaError::unsupported("Ogg", format!("stream structure version {}", data[4])));
        }
        let segments = data[26] as usize;
        let lacing = data
            .get(HEADER_SIZE..HEADER_SIZE + segments)
            .ok_or_else(|| MetaError::corrupt("Ogg", "lacing table truncated"))?
            .to_vec();
        Ok(PageHeader {
            version: data[4],
            header_type: data[5],
            granule: LittleEndian::read_i64(&data[6..14]),
            serial: LittleEndian::read_u32(&data[14..18]),
            sequence: LittleEndian::read_u32(&data[18..22]),
            checksum: LittleEndian::read_u32(&data[22..26]),
            lacing,
        })
    }

    pub fn size(&self) -> usize {
        HEADER_SIZE + self.lacing.len()
    }

    pub fn data_size(&self) -> usize {
        self.lacing.iter().map(|&l| l as usize).sum()
    }

    pub fn is_continued(&self) -> bool {
        self.header_type & CONTINUED != 0
    }

    pub fn is_first(&self) -> bool {
        self.header_type & FIRST != 0
    }

    pub fn is_last(&self) -> bool {
        self.header_type & LAST != 0
    }

    /// Whether the final packet on this page ends here.
    pub fn last_packet_complete(&self) -> bool {
        self.lacing.last().map_or(true, |&l| l < 255)
    }

    /// Header bytes with the checksum field zeroed.
    fn render_unchecked(&self) -> Vec<u8> {
        let mut out = vec![0u8; HEADER_SIZE];
        out[0..4].copy_from_slice(MAGIC);
        out[4] = self.version;
        out[5] = self.header_type;
        LittleEndian::write_i64(&mut out[6..14], self.granule);
        LittleEndian::write_u32(&mut out[14..18], self.serial);
        LittleEndian::write_u32(&mut out[18..22], self.sequence);
        out[26] = self.lacing.len() as u8;
        out.extend_from_slice(&self.lacing);
        out
    }
}

/// A page with its payload split into packet fragments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    pub header: PageHeader,
    pub offset: u64,
    pub fragments: Vec<Vec<u8>>,
}

impl Page {
    pub fn read(file: &mut TagFile, offset: u64) -> Result<Self> {
        let fixed = file.read_exact_at(offset, HEADER_SIZE, "Ogg")?;
        let lacing_len = fixed[26] as usize;
        let mut raw = fixed.into_inner();
        raw.extend_from_slice(&file.read_exact_at(offset + HEADER_SIZE as u64, lacing_len, "Ogg")?);
        let header = PageHeader::parse(&raw)?;
        let data = file.read_exact_at(offset + header.size() as u64, header.data_size(), "Ogg")?;

        let mut fragments = Vec::new();
        let mut current = Vec::new();
        let mut pos = 0;
        for &len in &header.lacing {
            current.extend_from_slice(&data[pos..pos + len as usize]);
            pos += len as usize;
            if len < 255 {
                fragments.push(std::mem::take(&mut current));
            }
        }
        if !header.last_packet_complete() {
            fragments.push(current);
        }
        Ok(Page {
            header,
            offset,
            fragments,
        })
    }

    pub fn size(&self) -> u64 {
        (self.header.size() + self.header.data_size()) as u64
    }

    /// Serialize with a freshly computed checksum.
    pub fn render(&self) -> Vec<u8> {
        let mut out = self.header.render_unchecked();
        for fragment in &self.fragments {
            out.extend_from_slice(fragment);
        }
        let checksum = crc(&out);
        LittleEndian::write_u32(&mut out[22..26], checksum);
        out
    }
}

/// Lay `packets` out on pages of one logical stream, starting at
/// `sequence`. Every page but the last gets granule -1 unless a packet
/// ends on it, in which case it gets 0; the last page gets `granule`.
pub fn paginate(packets: &[Vec<u8>], serial: u32, sequence: u32, granule: i64) -> Vec<Page> {
    let mut pages = Vec::new();
    let mut lacing: Vec<u8> = Vec::new();
    let mut fragments: Vec<Vec<u8>> = Vec::new();
    let mut fragment: Vec<u8> = Vec::new();
    let mut continued = false;
    let mut packet_ended = false;

    let flush = |lacing: &mut Vec<u8>,
                 fragments: &mut Vec<Vec<u8>>,
                 continued: bool,
                 packet_ended: bool,
                 pages: &mut Vec<Page>| {
        pages.push(Page {
            header: PageHeader {
                version: 0,
                header_type: if continued { CONTINUED } else { 0 },
                granule: if packet_ended { 0 } else { -1 },
                serial,
                sequence: sequence + pages.len() as u32,
                checksum: 0,
                lacing: std::mem::take(lacing),
            },
            offset: 0,
            fragments: std::mem::take(fragments),
        });
    };

    for packet in packets {
        let mut rest: &[u8] = packet;
        loop {
            let take = rest.len().min(255);
            lacing.push(take as u8);
            fragment.extend_from_slice(&rest[..take]);
            rest = &rest[take..];
            let done = take < 255;
            if done {
                fragments.push(std::mem::take(&mut fragment));
                packet_ended = true;
            }
            if lacing.len() == MAX_SEGMENTS {
                if !done {
                    fragments.push(std::mem::take(&mut fragment));
                }
                flush(&mut lacing, &mut fragments, continued, packet_ended, &mut pages);
                continued = !done;
                packet_ended = false;
            }
            if done {
                break;
            }
        }
    }
    if !lacing.is_empty() {
        flush(&mut lacing, &mut fragments, continued, packet_ended, &mut pages);
    }
    if let Some(last) = pages.last_mut() {
        last.header.granule = granule;
    }
    pages
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crc_of_known_page() {
        // CRC-32/MPEG-2 style without the final xor: "123456789" -> 0x89A1897F
        assert_eq!(crc(b"123456789"), 0x89A1_897F);
    }

    #[test]
    fn paginate_splits_long_packets() {
        let big = vec![7u8; 255 * 255 + 10];
        let pages = paginate(&[vec![1, 2, 3], big.clone()], 9, 1, 4096);
        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0].header.lacing.len(), 255);
        assert_eq!(pages[0].header.granule, 0);
        assert!(pages[1].header.is_continued());
        assert_eq!(pages[1].header.sequence, 2);
        assert_eq!(pages[1].header.granule, 4096);
        let joined: Vec<u8> = pages[0].fragments[1]
            .iter()
            .chain(pages[1].fragments[0].iter())
            .copied()
            .collect();
        assert_eq!(joined, big);
    }

    #[test]
    fn exact_multiple_of_255_gets_zero_terminator() {
        let pages = paginate(&[vec![0u8; 510]], 1, 0, 0);
        assert_eq!(pages[0].header.lacing, vec![255, 255, 0]);
    }

    #[test]
    fn rendered_page_parses_back() {
        let pages = paginate(&[b"hello".to_vec()], 3, 5, 0);
        let raw = pages[0].render();
        let header = PageHeader::parse(&raw).unwrap();
        assert_eq!(header.serial, 3);
        assert_eq!(header.sequence, 5);
        let mut zeroed = raw.clone();
        zeroed[22..26].fill(0);
        assert_eq!(header.checksum, crc(&zeroed));
    }
}
