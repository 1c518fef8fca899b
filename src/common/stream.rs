use std::cell::RefCell;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use crate::common::error::Result;

/// A seekable byte source.
pub trait ReadStream: Read + Seek {}

impl<T: Read + Seek> ReadStream for T {}

/// A seekable byte sink that can also be read back and truncated.
pub trait WriteStream: Read + Write + Seek {
    fn set_len(&mut self, len: u64) -> io::Result<()>;
}

impl WriteStream for File {
    fn set_len(&mut self, len: u64) -> io::Result<()> {
        File::set_len(self, len)
    }
}

/// An open handle, tagged with the mode it was opened for.
pub enum Stream {
    Read(Box<dyn ReadStream>),
    Write(Box<dyn WriteStream>),
}

impl Stream {
    pub fn is_writable(&self) -> bool {
        matches!(self, Stream::Write(_))
    }
}

impl Read for Stream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Stream::Read(s) => s.read(buf),
            Stream::Write(s) => s.read(buf),
        }
    }
}

impl Seek for Stream {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        match self {
            Stream::Read(s) => s.seek(pos),
            Stream::Write(s) => s.seek(pos),
        }
    }
}

/// Where a file's bytes live. The core only reaches storage through this.
pub trait FileAbstraction {
    fn name(&self) -> &str;
    fn read_stream(&mut self) -> Result<Box<dyn ReadStream>>;
    fn write_stream(&mut self) -> Result<Box<dyn WriteStream>>;
    fn close_stream(&mut self, stream: Stream) -> Result<()>;
}

/// A file on the local filesystem.
pub struct LocalFile {
    path: PathBuf,
    name: String,
}

impl LocalFile {
    pub fn new(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let name = path.to_string_lossy().into_owned();
        LocalFile { path, name }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl FileAbstraction for LocalFile {
    fn name(&self) -> &str {
        &self.name
    }

    fn read_stream(&mut self) -> Result<Box<dyn ReadStream>> {
        Ok(Box::new(File::open(&self.path)?))
    }

    fn write_stream(&mut self) -> Result<Box<dyn WriteStream>> {
        let file = OpenOptions::new().read(true).write(true).open(&self.path)?;
        Ok(Box::new(file))
    }

    fn close_stream(&mut self, stream: Stream) -> Result<()> {
        if let Stream::Write(mut s) = stream {
            s.flush()?;
        }
        Ok(())
    }
}

/// Cursor over a buffer shared with the owning [`MemoryFile`].
pub struct SharedCursor {
    data: Rc<RefCell<Vec<u8>>>,
    pos: u64,
}

impl Read for SharedCursor {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let data = self.data.borrow();
        let len = data.len() as u64;
        if self.pos >= len {
            return Ok(0);
        }
        let start = self.pos as usize;
        let n = buf.len().min(data.len() - start);
        buf[..n].copy_from_slice(&data[start..start + n]);
        self.pos += n as u64;
        Ok(n)
    }
}

impl Write for SharedCursor {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut data = self.data.borrow_mut();
        let start = self.pos as usize;
        let end = start + buf.len();
        if data.len() < end {
            data.resize(end, 0);
        }
        data[start..end].copy_from_slice(buf);
        self.pos = end as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Seek for SharedCursor {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let len = self.data.borrow().len() as i64;
        let target = match pos {
            SeekFrom::Start(p) => p as i64,
            SeekFrom::End(off) => len + off,
            SeekFrom::Current(off) => self.pos as i64 + off,
        };
        if target < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before start of buffer",
            ));
        }
        self.pos = target as u64;
        Ok(self.pos)
    }
}

impl WriteStream for SharedCursor {
    fn set_len(&mut self, len: u64) -> io::Result<()> {
        self.data.borrow_mut().resize(len as usize, 0);
        Ok(())
    }
}

/// An in-memory file. Clones share the same buffer, so a test can keep one
/// handle and inspect the bytes after a save went through another.
#[derive(Clone)]
pub struct MemoryFile {
    name: String,
    data: Rc<RefCell<Vec<u8>>>,
}

impl MemoryFile {
    pub fn new(name: impl Into<String>, data: Vec<u8>) -> Self {
        MemoryFile {
            name: name.into(),
            data: Rc::new(RefCell::new(data)),
        }
    }

    /// Snapshot of the current contents.
    pub fn contents(&self) -> Vec<u8> {
        self.data.borrow().clone()
    }

    pub fn len(&self) -> usize {
        self.data.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.borrow().is_empty()
    }

    fn cursor(&self) -> SharedCursor {
        SharedCursor {
            data: Rc::clone(&self.data),
            pos: 0,
        }
    }
}

impl FileAbstraction for MemoryFile {
    fn name(&self) -> &str {
        &self.name
    }

    fn read_stream(&mut self) -> Result<Box<dyn ReadStream>> {
        Ok(Box::new(self.cursor()))
    }

    fn write_stream(&mut self) -> Result<Box<dyn WriteStream>> {
        Ok(Box::new(self.cursor()))
    }

    fn close_stream(&mut self, _stream: Stream) -> Result<()> {
        Ok(())
    }
}
