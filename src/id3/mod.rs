//! ID3v1 and ID3v2 tags.
//!
//! ID3v2 frames are kept in their on-disk form until something asks for
//! them, so an unchanged tag re-renders byte for byte.

pub mod header;
pub mod frame_header;
pub mod unsynch;
pub mod specs;
pub mod frames;
pub mod tags;
pub mod id3v1;
pub mod writer;

pub use frames::Frame;
pub use id3v1::Id3v1Tag;
pub use tags::{Id3v2Tag, LazyFrame};

use crate::common::error::Result;
use crate::common::file::TagFile;
use crate::id3::header::{Id3v2Header, HEADER_SIZE};

/// Full size of an ID3v2 tag whose header sits at `position`, or `None`
/// when there is no header there.
pub fn tag_size_at(file: &mut TagFile, position: u64) -> Result<Option<u64>> {
    let head = file.read_at(position, HEADER_SIZE)?;
    if head.len() < HEADER_SIZE || &head[0..3] != b"ID3" {
        return Ok(None);
    }
    Ok(Some(Id3v2Header::parse(&head)?.full_size()))
}
