//! Read and rewrite tag metadata embedded in media containers.
//!
//! Every format module exposes a `*File` type implementing [`MediaFile`]:
//! open it over a [`FileAbstraction`] ([`LocalFile`] or [`MemoryFile`]),
//! edit its tags, and `save()`. Saving splices the re-rendered tags into
//! the file, fixes up every enclosing size field and leaves the audio,
//! video or image data byte for byte as it was.

pub mod common;

pub mod ape;
pub mod id3;
pub mod vorbis;

pub mod aiff;
pub mod asf;
pub mod flac;
pub mod matroska;
pub mod monkeys;
pub mod mp4;
pub mod mpc;
pub mod mpeg;
pub mod ogg;
pub mod png;
pub mod riff;
pub mod tiff;
pub mod wavpack;

pub use common::bytes::{ByteVector, StringType};
pub use common::config::{ReadStyle, WriteOptions};
pub use common::error::{MetaError, Result};
pub use common::file::{InvariantRegion, TagFile};
pub use common::media::{AudioProperties, MediaFile};
pub use common::picture::{Picture, PictureType};
pub use common::stream::{FileAbstraction, LocalFile, MemoryFile};
pub use common::tag::{CombinedTag, Tag, TagType};

pub use aiff::AiffFile;
pub use asf::AsfFile;
pub use flac::FlacFile;
pub use matroska::MatroskaFile;
pub use monkeys::MonkeysFile;
pub use mp4::Mp4File;
pub use mpc::MpcFile;
pub use mpeg::MpegFile;
pub use ogg::OggFile;
pub use png::PngFile;
pub use riff::RiffFile;
pub use tiff::TiffFile;
pub use wavpack::WavPackFile;
