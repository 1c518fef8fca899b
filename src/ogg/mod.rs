//! Ogg bitstreams: pages, packet reassembly and header rewriting.

pub mod page;
pub mod xiph;

use byteorder::{ByteOrder, LittleEndian};
use log::{debug, trace};

pub use page::{Page, PageHeader};
pub use xiph::{OggCodec, OggFile};

use crate::common::error::{MetaError, Result};
use crate::common::file::TagFile;

/// The header packets of the first logical stream and the pages they
/// occupy.
#[derive(Debug, Clone)]
pub struct HeaderPackets {
    pub serial: u32,
    pub packets: Vec<Vec<u8>>,
    /// Pages holding the packets, in file order.
    pub pages: Vec<Page>,
    /// Packets that share the last header page but are not headers.
    trailing: Vec<Vec<u8>>,
}

impl HeaderPackets {
    /// Read pages from the start of the file until `count` packets are
    /// complete and the page holding the last of them ends.
    pub fn read(file: &mut TagFile, count: usize) -> Result<Self> {
        let first = Page::read(file, 0)?;
        if !first.header.is_first() {
            return Err(MetaError::corrupt("Ogg", "first page lacks the beginning-of-stream flag"));
        }
        let serial = first.header.serial;
        let mut packets: Vec<Vec<u8>> = Vec::new();
        let mut partial: Option<Vec<u8>> = None;
        let mut pages = Vec::new();
        let mut offset = 0u64;
        let mut page = first;

        loop {
            offset += page.size();
            let complete = page.header.last_packet_complete();
            let fragment_count = page.fragments.len();
            for (i, fragment) in page.fragments.iter().enumerate() {
                let is_last = i + 1 == fragment_count;
                let mut data = if i == 0 && page.header.is_continued() {
                    match partial.take() {
                        Some(mut head) => {
                            head.extend_from_slice(fragment);
                            head
                        }
                        None => {
                            debug!("Ogg: continued page {} without a packet to continue", page.header.sequence);
                            fragment.clone()
                        }
                    }
                } else {
                    fragment.clone()
                };
                if is_last && !complete {
                    partial = Some(std::mem::take(&mut data));
                } else {
                    packets.push(data);
                }
            }
            pages.push(page);

            if packets.len() >= count && partial.is_none() {
                break;
            }
            // Skip pages of other logical streams.
            page = loop {
                let next = Page::read(file, offset)?;
                if next.header.serial == serial {
                    break next;
                }
                offset += next.size();
            };
        }

        let trailing = packets.split_off(count);
        trace!("Ogg: {} header packets on {} pages", packets.len(), pages.len());
        Ok(HeaderPackets {
            serial,
            packets,
            pages,
            trailing,
        })
    }

    /// Offset just past the last header page.
    pub fn end(&self) -> u64 {
        self.pages.last().map_or(0, |p| p.offset + p.size())
    }

    /// Rewrite the header pages from the second packet on with `packets`,
    /// keeping the first page untouched. Later pages of the same stream
    /// are renumbered. Returns the size change.
    pub fn write(&mut self, file: &mut TagFile, packets: Vec<Vec<u8>>) -> Result<i64> {
        file.ensure_writable()?;
        if packets.len() != self.packets.len() {
            return Err(MetaError::ValueError("header packet count cannot change".into()));
        }
        // The identification packet owns the first page.
        let first = &self.pages[0];
        if first.fragments.len() != 1 || !first.header.last_packet_complete() {
            return Err(MetaError::unsupported("Ogg", "first page holds more than one packet"));
        }
        let old_pages = &self.pages[1..];
        let Some(old_last) = old_pages.last() else {
            return Err(MetaError::corrupt("Ogg", "no pages after the identification page"));
        };
        let start = old_pages[0].offset;
        let end = old_last.offset + old_last.size();
        let old_count = old_pages.len() as u32;
        let first_sequence = old_pages[0].header.sequence;
        let granule = old_last.header.granule;

        let mut to_write: Vec<Vec<u8>> = packets[1..].to_vec();
        to_write.extend(self.trailing.iter().cloned());
        let mut new_pages = page::paginate(&to_write, self.serial, first_sequence, granule);
        let mut bytes = Vec::new();
        let mut offset = start;
        for p in new_pages.iter_mut() {
            p.offset = offset;
            let rendered = p.render();
            offset += rendered.len() as u64;
            bytes.extend_from_slice(&rendered);
        }

        file.insert(&bytes, start, end - start)?;
        let delta = bytes.len() as i64 - (end - start) as i64;
        file.shift_invariant_region(end, delta);

        let shift = new_pages.len() as i64 - old_count as i64;
        if shift != 0 {
            renumber(file, offset, self.serial, shift)?;
        }

        self.packets = packets;
        self.pages.truncate(1);
        self.pages.extend(new_pages);
        Ok(delta)
    }
}

/// Add `shift` to the sequence number of every page of `serial` from
/// `offset` to the end of the file, fixing checksums as we go.
fn renumber(file: &mut TagFile, mut offset: u64, serial: u32, shift: i64) -> Result<()> {
    let file_len = file.length()?;
    let mut count = 0;
    while offset + page::HEADER_SIZE as u64 <= file_len {
        let mut page = match Page::read(file, offset) {
            Ok(page) => page,
            Err(err) => {
                file.mark_corrupt(format!("Ogg page at {} unreadable while renumbering: {}", offset, err));
                return Err(err);
            }
        };
        if page.header.serial == serial {
            let sequence = (page.header.sequence as i64 + shift).max(0) as u32;
            page.header.sequence = sequence;
            let rendered = page.render();
            file.write_at(offset, &rendered)?;
            count += 1;
        }
        offset += page.size();
    }
    debug!("Ogg: renumbered {} pages by {}", count, shift);
    Ok(())
}

/// Granule position of the last page of `serial`.
pub fn last_granule(file: &mut TagFile, serial: u32) -> Result<Option<i64>> {
    let mut end = None;
    while let Some(pos) = file.rfind(page::MAGIC, end, None)? {
        let head = file.read_at(pos, page::HEADER_SIZE)?;
        if head.len() == page::HEADER_SIZE && LittleEndian::read_u32(&head[14..18]) == serial {
            return Ok(Some(LittleEndian::read_i64(&head[6..14])));
        }
        if pos == 0 {
            break;
        }
        end = Some(pos + page::MAGIC.len() as u64 - 1);
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::stream::MemoryFile;
    use pretty_assertions::assert_eq;

    /// Build a stream from explicit page layouts: each page is a list of
    /// (bytes, ends_packet) pieces.
    pub(crate) fn build(serial: u32, pages: &[(u8, i64, Vec<(Vec<u8>, bool)>)]) -> Vec<u8> {
        let mut out = Vec::new();
        for (sequence, (flags, granule, pieces)) in pages.iter().enumerate() {
            let mut lacing = Vec::new();
            let mut fragments = Vec::new();
            for (bytes, ends) in pieces {
                let mut n = bytes.len();
                while n >= 255 {
                    lacing.push(255);
                    n -= 255;
                }
                if *ends {
                    lacing.push(n as u8);
                } else {
                    assert_eq!(n, 0, "an unfinished piece must be a multiple of 255");
                }
                fragments.push(bytes.clone());
            }
            let page = Page {
                header: PageHeader {
                    version: 0,
                    header_type: *flags,
                    granule: *granule,
                    serial,
                    sequence: sequence as u32,
                    checksum: 0,
                    lacing,
                },
                offset: 0,
                fragments,
            };
            out.extend_from_slice(&page.render());
        }
        out
    }

    #[test]
    fn packet_continued_on_next_page_is_reassembled() {
        let head = vec![1u8; 20];
        let part1 = vec![2u8; 255 * 2];
        let part2 = vec![3u8; 40];
        let data = build(
            7,
            &[
                (0x02, 0, vec![(head.clone(), true)]),
                (0x00, -1, vec![(part1.clone(), false)]),
                (0x01, 0, vec![(part2.clone(), true)]),
                (0x04, 1000, vec![(vec![9u8; 5], true)]),
            ],
        );
        let mut file = TagFile::new(MemoryFile::new("a.ogg", data));
        let headers = HeaderPackets::read(&mut file, 2).unwrap();
        assert_eq!(headers.packets.len(), 2);
        assert_eq!(headers.packets[0], head);
        let mut joined = part1.clone();
        joined.extend_from_slice(&part2);
        assert_eq!(headers.packets[1], joined);
        assert_eq!(headers.pages.len(), 3);
        assert_eq!(last_granule(&mut file, 7).unwrap(), Some(1000));
    }

    #[test]
    fn rewrite_renumbers_following_pages() {
        let data = build(
            5,
            &[
                (0x02, 0, vec![(vec![1u8; 10], true)]),
                (0x00, 0, vec![(vec![2u8; 10], true)]),
                (0x00, 100, vec![(vec![3u8; 10], true)]),
                (0x04, 200, vec![(vec![4u8; 10], true)]),
            ],
        );
        let mem = MemoryFile::new("a.ogg", data);
        let mut file = TagFile::new(mem.clone());
        let mut headers = HeaderPackets::read(&mut file, 2).unwrap();
        let audio_start = headers.end();
        let len = file.length().unwrap();
        file.set_invariant_region(audio_start, len);

        // force the comment packet across two pages
        let big = vec![8u8; 255 * 255 + 3];
        let delta = headers.write(&mut file, vec![vec![1u8; 10], big.clone()]).unwrap();
        assert!(delta > 0);

        let mut reread = TagFile::new(mem.clone());
        let again = HeaderPackets::read(&mut reread, 2).unwrap();
        assert_eq!(again.packets[1], big);
        assert_eq!(again.pages.len(), 3);

        let region = file.invariant_region().unwrap();
        let tail = Page::read(&mut reread, region.start).unwrap();
        assert_eq!(tail.header.sequence, 3);
        assert_eq!(tail.fragments[0], vec![3u8; 10]);
        let last = Page::read(&mut reread, region.start + tail.size()).unwrap();
        assert_eq!(last.header.sequence, 4);
        let raw = reread.read_at(last.offset, last.size() as usize).unwrap().into_inner();
        assert_eq!(last.render(), raw);
    }

    #[test]
    fn bad_capture_pattern_is_corrupt() {
        let mut file = TagFile::new(MemoryFile::new("a.ogg", vec![0u8; 64]));
        assert!(HeaderPackets::read(&mut file, 2).unwrap_err().is_corrupt());
    }
}
