use std::io::{Read, Seek, SeekFrom, Write};

use log::{trace, warn};
use memchr::memmem;

use crate::common::bytes::ByteVector;
use crate::common::error::{MetaError, Result};
use crate::common::stream::{FileAbstraction, Stream, WriteStream};

/// Chunk size used by every streaming primitive.
pub const BUFFER_SIZE: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Closed,
    Read,
    Write,
}

/// Byte range of opaque media payload that tag rewrites never touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvariantRegion {
    pub start: u64,
    pub end: u64,
}

impl InvariantRegion {
    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }
}

/// A seekable file with splice primitives and corruption bookkeeping.
///
/// Every format reader works against a `TagFile`. Reading opens the backing
/// stream read-only on demand; the first write primitive reopens it writable.
/// While any corruption reason is recorded, write primitives refuse to run.
pub struct TagFile {
    abstraction: Box<dyn FileAbstraction>,
    stream: Option<Stream>,
    mode: Mode,
    corruption: Vec<String>,
    invariant: Option<InvariantRegion>,
}

impl TagFile {
    pub fn new(abstraction: impl FileAbstraction + 'static) -> Self {
        TagFile {
            abstraction: Box::new(abstraction),
            stream: None,
            mode: Mode::Closed,
            corruption: Vec::new(),
            invariant: None,
        }
    }

    pub fn name(&self) -> &str {
        self.abstraction.name()
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Switch modes. `Write -> Read` keeps the writable handle.
    pub fn set_mode(&mut self, mode: Mode) -> Result<()> {
        match (self.mode, mode) {
            (current, wanted) if current == wanted => Ok(()),
            (Mode::Write, Mode::Read) => Ok(()),
            (_, Mode::Closed) => self.close(),
            (_, Mode::Read) => {
                self.close()?;
                let stream = self.abstraction.read_stream()?;
                self.stream = Some(Stream::Read(stream));
                self.mode = Mode::Read;
                Ok(())
            }
            (_, Mode::Write) => {
                let position = match self.stream.as_mut() {
                    Some(stream) => stream.stream_position()?,
                    None => 0,
                };
                self.close()?;
                let mut stream = self.abstraction.write_stream()?;
                stream.seek(SeekFrom::Start(position))?;
                self.stream = Some(Stream::Write(stream));
                self.mode = Mode::Write;
                Ok(())
            }
        }
    }

    pub fn close(&mut self) -> Result<()> {
        self.mode = Mode::Closed;
        match self.stream.take() {
            Some(stream) => self.abstraction.close_stream(stream),
            None => Ok(()),
        }
    }

    fn stream(&mut self) -> Result<&mut Stream> {
        if self.stream.is_none() {
            self.set_mode(Mode::Read)?;
        }
        self.stream.as_mut().ok_or(MetaError::AccessMode("reading"))
    }

    fn writer(&mut self) -> Result<&mut Box<dyn WriteStream>> {
        self.ensure_writable()?;
        if self.mode != Mode::Write {
            self.set_mode(Mode::Write)?;
        }
        match self.stream.as_mut() {
            Some(Stream::Write(w)) => Ok(w),
            _ => Err(MetaError::AccessMode("writing")),
        }
    }

    // ---- corruption bookkeeping ----

    /// Record a reason this file must not be saved. Reasons are sticky.
    pub fn mark_corrupt(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        warn!("{}: possibly corrupt: {}", self.abstraction.name(), reason);
        self.corruption.push(reason);
    }

    pub fn is_possibly_corrupt(&self) -> bool {
        !self.corruption.is_empty()
    }

    pub fn corruption_reasons(&self) -> &[String] {
        &self.corruption
    }

    pub fn ensure_writable(&self) -> Result<()> {
        if self.corruption.is_empty() {
            Ok(())
        } else {
            Err(MetaError::PossiblyCorrupt(self.corruption.clone()))
        }
    }

    pub fn invariant_region(&self) -> Option<InvariantRegion> {
        self.invariant
    }

    pub fn set_invariant_region(&mut self, start: u64, end: u64) {
        self.invariant = Some(InvariantRegion { start, end });
    }

    /// Move the recorded invariant region after a splice at `at`.
    pub fn shift_invariant_region(&mut self, at: u64, delta: i64) {
        if let Some(region) = self.invariant.as_mut() {
            let moved = region.start >= at;
            if moved {
                region.start = region.start.saturating_add_signed(delta);
            }
            // A splice right at the exclusive end leaves the region alone.
            if moved || region.end > at {
                region.end = region.end.saturating_add_signed(delta);
            }
        }
    }

    // ---- positioning and reading ----

    pub fn length(&mut self) -> Result<u64> {
        let stream = self.stream()?;
        let current = stream.stream_position()?;
        let end = stream.seek(SeekFrom::End(0))?;
        stream.seek(SeekFrom::Start(current))?;
        Ok(end)
    }

    pub fn seek(&mut self, position: u64) -> Result<()> {
        self.stream()?.seek(SeekFrom::Start(position))?;
        Ok(())
    }

    pub fn tell(&mut self) -> Result<u64> {
        Ok(self.stream()?.stream_position()?)
    }

    /// Read up to `length` bytes from the current position. Fewer bytes
    /// come back only at end of stream.
    pub fn read_block(&mut self, length: usize) -> Result<ByteVector> {
        let stream = self.stream()?;
        let mut buf = Vec::with_capacity(length.min(1 << 20));
        stream.take(length as u64).read_to_end(&mut buf)?;
        Ok(ByteVector::from(buf))
    }

    pub fn read_at(&mut self, position: u64, length: usize) -> Result<ByteVector> {
        self.seek(position)?;
        self.read_block(length)
    }

    /// Read exactly `length` bytes at `position` or fail as corrupt.
    pub fn read_exact_at(
        &mut self,
        position: u64,
        length: usize,
        format: &'static str,
    ) -> Result<ByteVector> {
        let block = self.read_at(position, length)?;
        if block.len() < length {
            return Err(MetaError::corrupt(
                format,
                format!("truncated: wanted {} bytes at {}, got {}", length, position, block.len()),
            ));
        }
        Ok(block)
    }

    // ---- write primitives ----

    pub fn write_block(&mut self, data: &[u8]) -> Result<()> {
        self.writer()?.write_all(data)?;
        Ok(())
    }

    pub fn write_at(&mut self, position: u64, data: &[u8]) -> Result<()> {
        let w = self.writer()?;
        w.seek(SeekFrom::Start(position))?;
        w.write_all(data)?;
        Ok(())
    }

    pub fn truncate(&mut self, length: u64) -> Result<()> {
        self.writer()?.set_len(length)?;
        Ok(())
    }

    /// Replace `replace` bytes at `start` with `data`, shifting the rest of
    /// the file. Only a bounded buffer is held in memory.
    pub fn insert(&mut self, data: &[u8], start: u64, replace: u64) -> Result<()> {
        let file_len = self.length()?;
        self.ensure_writable()?;

        if start > file_len {
            let gap = (start - file_len) as usize;
            trace!("insert: zero filling {} bytes past end", gap);
            let w = self.writer()?;
            w.seek(SeekFrom::Start(file_len))?;
            w.write_all(&vec![0u8; gap])?;
            w.write_all(data)?;
            return Ok(());
        }

        let replace = replace.min(file_len - start);
        let new_len = data.len() as u64;

        if new_len == replace {
            return self.write_at(start, data);
        }

        if new_len < replace {
            self.write_at(start, data)?;
            return self.remove_block(start + new_len, replace - new_len);
        }

        let delta = (new_len - replace) as usize;
        let buffer_len = delta.div_ceil(BUFFER_SIZE).max(1) * BUFFER_SIZE;
        trace!("insert: growing by {} with a {} byte buffer", delta, buffer_len);

        let w = self.writer()?;
        let mut read_pos = start + replace;
        let mut write_pos = start;

        let mut pending = read_chunk(w, read_pos, buffer_len)?;
        read_pos += buffer_len as u64;

        w.seek(SeekFrom::Start(write_pos))?;
        w.write_all(data)?;
        write_pos += new_len;

        while !pending.is_empty() {
            let next = read_chunk(w, read_pos, buffer_len)?;
            read_pos += buffer_len as u64;

            w.seek(SeekFrom::Start(write_pos))?;
            w.write_all(&pending)?;
            write_pos += pending.len() as u64;

            pending = next;
        }

        w.set_len(file_len + delta as u64)?;
        Ok(())
    }

    /// Remove `length` bytes at `start`, shifting the remainder backward.
    pub fn remove_block(&mut self, start: u64, length: u64) -> Result<()> {
        if length == 0 {
            return Ok(());
        }
        let file_len = self.length()?;
        if start >= file_len {
            return Ok(());
        }
        let length = length.min(file_len - start);

        let w = self.writer()?;
        let mut read_pos = start + length;
        let mut write_pos = start;
        loop {
            let chunk = read_chunk(w, read_pos, BUFFER_SIZE)?;
            if chunk.is_empty() {
                break;
            }
            read_pos += chunk.len() as u64;
            w.seek(SeekFrom::Start(write_pos))?;
            w.write_all(&chunk)?;
            write_pos += chunk.len() as u64;
        }
        w.set_len(file_len - length)?;
        Ok(())
    }

    // ---- searching ----

    /// First offset at or after `start` where `pattern` occurs. If `before`
    /// is met first the search gives up.
    pub fn find(&mut self, pattern: &[u8], start: u64, before: Option<&[u8]>) -> Result<Option<u64>> {
        if pattern.is_empty() {
            return Ok(None);
        }
        let saved = self.tell()?;
        let longest = pattern.len().max(before.map_or(0, <[u8]>::len));
        let overlap = longest - 1;
        let mut pos = start;

        let result = loop {
            let chunk = self.read_at(pos, BUFFER_SIZE + overlap)?;
            if chunk.len() < pattern.len() && before.map_or(true, |b| chunk.len() < b.len()) {
                break None;
            }
            // Only starts before `owned` are fully inside this window; the
            // rest belong to the next one.
            let last = chunk.len() < BUFFER_SIZE + overlap;
            let owned = if last { chunk.len() } else { BUFFER_SIZE };
            let found = memmem::find(&chunk, pattern).filter(|&f| f < owned);
            let boundary = before.and_then(|b| memmem::find(&chunk, b)).filter(|&b| b < owned);
            match (found, boundary) {
                (Some(f), Some(b)) if b < f => break None,
                (Some(f), _) => break Some(pos + f as u64),
                (None, Some(_)) => break None,
                (None, None) => {}
            }
            if last {
                break None;
            }
            pos += BUFFER_SIZE as u64;
        };

        self.seek(saved)?;
        Ok(result)
    }

    /// Last offset whose match ends at or before `end` (default: end of
    /// file). If `after` is met later in the file than the match, gives up.
    pub fn rfind(&mut self, pattern: &[u8], end: Option<u64>, after: Option<&[u8]>) -> Result<Option<u64>> {
        if pattern.is_empty() {
            return Ok(None);
        }
        let saved = self.tell()?;
        let file_len = self.length()?;
        let mut window_end = end.unwrap_or(file_len).min(file_len);
        let longest = pattern.len().max(after.map_or(0, <[u8]>::len));
        let overlap = (longest - 1) as u64;

        let result = loop {
            if window_end < pattern.len() as u64 {
                break None;
            }
            let window_start = window_end.saturating_sub(BUFFER_SIZE as u64 + overlap);
            let chunk = self.read_at(window_start, (window_end - window_start) as usize)?;
            let found = memmem::rfind(&chunk, pattern);
            let boundary = after.and_then(|a| memmem::rfind(&chunk, a));
            match (found, boundary) {
                (Some(f), Some(b)) if b > f => break None,
                (Some(f), _) => break Some(window_start + f as u64),
                (None, Some(_)) => break None,
                (None, None) => {}
            }
            if window_start == 0 {
                break None;
            }
            window_end = window_start + overlap;
        };

        self.seek(saved)?;
        Ok(result)
    }
}

fn read_chunk(w: &mut Box<dyn WriteStream>, position: u64, length: usize) -> Result<Vec<u8>> {
    w.seek(SeekFrom::Start(position))?;
    let mut buf = Vec::with_capacity(length);
    w.take(length as u64).read_to_end(&mut buf)?;
    Ok(buf)
}

impl Drop for TagFile {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            warn!("{}: error closing stream: {}", self.abstraction.name(), err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::stream::MemoryFile;

    fn numbered(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    fn open(bytes: Vec<u8>) -> (TagFile, MemoryFile) {
        let mem = MemoryFile::new("test", bytes);
        (TagFile::new(mem.clone()), mem)
    }

    fn expected_splice(original: &[u8], data: &[u8], start: usize, replace: usize) -> Vec<u8> {
        let replace = replace.min(original.len() - start);
        let mut out = original[..start].to_vec();
        out.extend_from_slice(data);
        out.extend_from_slice(&original[start + replace..]);
        out
    }

    #[test]
    fn read_block_is_short_only_at_end() {
        let (mut file, _) = open(numbered(10));
        file.seek(6).unwrap();
        assert_eq!(file.read_block(8).unwrap().len(), 4);
        assert_eq!(file.read_block(8).unwrap().len(), 0);
        assert_eq!(file.mode(), Mode::Read);
    }

    #[test]
    fn insert_grow_crosses_buffer_boundaries() {
        let original = numbered(5000);
        for &(start, replace, grow) in &[(0, 0, 1), (10, 3, 1023), (100, 0, 1024), (4000, 10, 3000), (4999, 1, 2048)] {
            let data: Vec<u8> = (0..replace + grow).map(|i| 0xA0 ^ (i as u8)).collect();
            let (mut file, mem) = open(original.clone());
            file.insert(&data, start as u64, replace as u64).unwrap();
            assert_eq!(mem.contents(), expected_splice(&original, &data, start, replace));
        }
    }

    #[test]
    fn insert_shrink_and_equal() {
        let original = numbered(3000);
        let (mut file, mem) = open(original.clone());
        file.insert(b"xyz", 50, 3).unwrap();
        assert_eq!(mem.contents(), expected_splice(&original, b"xyz", 50, 3));

        let (mut file, mem) = open(original.clone());
        file.insert(b"xyz", 50, 2000).unwrap();
        assert_eq!(mem.contents(), expected_splice(&original, b"xyz", 50, 2000));
    }

    #[test]
    fn insert_beyond_end_zero_fills() {
        let (mut file, mem) = open(b"abc".to_vec());
        file.insert(b"Z", 5, 0).unwrap();
        assert_eq!(mem.contents(), b"abc\0\0Z");
    }

    #[test]
    fn remove_block_shifts_and_truncates() {
        let original = numbered(4000);
        let (mut file, mem) = open(original.clone());
        file.remove_block(1000, 1500).unwrap();
        let mut expected = original[..1000].to_vec();
        expected.extend_from_slice(&original[2500..]);
        assert_eq!(mem.contents(), expected);

        file.remove_block(0, 0).unwrap();
        assert_eq!(mem.len(), 2500);
    }

    #[test]
    fn find_spans_window_boundaries() {
        let mut bytes = vec![0u8; 3000];
        bytes[1022..1026].copy_from_slice(b"OggS");
        bytes[2500..2504].copy_from_slice(b"OggS");
        let (mut file, _) = open(bytes);
        assert_eq!(file.find(b"OggS", 0, None).unwrap(), Some(1022));
        assert_eq!(file.find(b"OggS", 1023, None).unwrap(), Some(2500));
        assert_eq!(file.rfind(b"OggS", None, None).unwrap(), Some(2500));
        assert_eq!(file.rfind(b"OggS", Some(2503), None).unwrap(), Some(1022));
        assert_eq!(file.find(b"nope", 0, None).unwrap(), None);
    }

    #[test]
    fn find_stops_at_boundary_pattern() {
        let mut bytes = vec![0u8; 2000];
        bytes[100..104].copy_from_slice(b"STOP");
        bytes[1500..1504].copy_from_slice(b"FIND");
        let (mut file, _) = open(bytes);
        assert_eq!(file.find(b"FIND", 0, Some(b"STOP")).unwrap(), None);
        assert_eq!(file.find(b"FIND", 200, Some(b"STOP")).unwrap(), Some(1500));
    }

    #[test]
    fn boundary_in_window_tail_is_ordered_by_offset() {
        // "ABCDEF" at 1024 runs past the first window; its "DE" does not.
        let mut bytes = vec![0u8; 2000];
        bytes[1024..1030].copy_from_slice(b"ABCDEF");
        let (mut file, _) = open(bytes);
        assert_eq!(file.find(b"ABCDEF", 0, Some(b"DE")).unwrap(), Some(1024));

        // "QRABU" at 1025 starts before the "AB" inside it.
        let mut bytes = vec![0u8; 2000];
        bytes[1025..1030].copy_from_slice(b"QRABU");
        let (mut file, _) = open(bytes);
        assert_eq!(file.find(b"AB", 0, Some(b"QRABU")).unwrap(), None);
        assert_eq!(file.find(b"AB", 0, None).unwrap(), Some(1027));
    }

    #[test]
    fn corrupt_file_refuses_writes() {
        let (mut file, mem) = open(b"abcdef".to_vec());
        file.mark_corrupt("bad header");
        let err = file.insert(b"x", 0, 0).unwrap_err();
        assert!(matches!(err, MetaError::PossiblyCorrupt(ref r) if r == &["bad header".to_string()]));
        assert!(file.remove_block(0, 1).is_err());
        assert_eq!(mem.contents(), b"abcdef");
    }

    #[test]
    fn write_then_read_keeps_write_mode() {
        let (mut file, _) = open(b"abc".to_vec());
        file.write_at(0, b"x").unwrap();
        assert_eq!(file.mode(), Mode::Write);
        file.set_mode(Mode::Read).unwrap();
        assert_eq!(file.mode(), Mode::Write);
        assert_eq!(file.read_at(0, 3).unwrap().data(), b"xbc");
        file.close().unwrap();
        assert_eq!(file.mode(), Mode::Closed);
    }

    #[test]
    fn invariant_region_follows_splices() {
        let (mut file, _) = open(numbered(100));
        file.set_invariant_region(40, 90);
        file.shift_invariant_region(12, 20);
        assert_eq!(file.invariant_region(), Some(InvariantRegion { start: 60, end: 110 }));
        file.shift_invariant_region(110, 8);
        assert_eq!(file.invariant_region(), Some(InvariantRegion { start: 60, end: 110 }));
    }
}
