use byteorder::{BigEndian, ByteOrder};

use crate::common::error::{MetaError, Result};

/// The ID3v2 APIC picture types, shared by FLAC, Xiph and ASF.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PictureType {
    Other,
    FileIcon,
    OtherFileIcon,
    #[default]
    FrontCover,
    BackCover,
    LeafletPage,
    Media,
    LeadArtist,
    Artist,
    Conductor,
    Band,
    Composer,
    Lyricist,
    RecordingLocation,
    DuringRecording,
    DuringPerformance,
    MovieScreenCapture,
    ColouredFish,
    Illustration,
    BandLogo,
    PublisherLogo,
    Undefined(u8),
}

impl PictureType {
    pub fn from_u8(b: u8) -> Self {
        match b {
            0 => PictureType::Other,
            1 => PictureType::FileIcon,
            2 => PictureType::OtherFileIcon,
            3 => PictureType::FrontCover,
            4 => PictureType::BackCover,
            5 => PictureType::LeafletPage,
            6 => PictureType::Media,
            7 => PictureType::LeadArtist,
            8 => PictureType::Artist,
            9 => PictureType::Conductor,
            10 => PictureType::Band,
            11 => PictureType::Composer,
            12 => PictureType::Lyricist,
            13 => PictureType::RecordingLocation,
            14 => PictureType::DuringRecording,
            15 => PictureType::DuringPerformance,
            16 => PictureType::MovieScreenCapture,
            17 => PictureType::ColouredFish,
            18 => PictureType::Illustration,
            19 => PictureType::BandLogo,
            20 => PictureType::PublisherLogo,
            n => PictureType::Undefined(n),
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            PictureType::Other => 0,
            PictureType::FileIcon => 1,
            PictureType::OtherFileIcon => 2,
            PictureType::FrontCover => 3,
            PictureType::BackCover => 4,
            PictureType::LeafletPage => 5,
            PictureType::Media => 6,
            PictureType::LeadArtist => 7,
            PictureType::Artist => 8,
            PictureType::Conductor => 9,
            PictureType::Band => 10,
            PictureType::Composer => 11,
            PictureType::Lyricist => 12,
            PictureType::RecordingLocation => 13,
            PictureType::DuringRecording => 14,
            PictureType::DuringPerformance => 15,
            PictureType::MovieScreenCapture => 16,
            PictureType::ColouredFish => 17,
            PictureType::Illustration => 18,
            PictureType::BandLogo => 19,
            PictureType::PublisherLogo => 20,
            PictureType::Undefined(n) => *n,
        }
    }
}

/// An embedded picture. The image geometry fields are only carried by
/// FLAC-style picture blocks and default to zero elsewhere.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Picture {
    pub mime: String,
    pub pic_type: PictureType,
    pub description: String,
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub color_depth: u32,
    pub indexed_colors: u32,
}

impl Picture {
    pub fn new(mime: impl Into<String>, pic_type: PictureType, data: Vec<u8>) -> Self {
        Picture {
            mime: mime.into(),
            pic_type,
            data,
            ..Default::default()
        }
    }

    /// Parse a FLAC PICTURE block body (also the payload of a Xiph
    /// `METADATA_BLOCK_PICTURE` comment).
    pub fn parse_flac(block: &[u8]) -> Result<Self> {
        let mut pos = 0usize;
        let pic_type = read_u32(block, &mut pos)?;
        let mime_len = read_u32(block, &mut pos)? as usize;
        let mime = String::from_utf8_lossy(read_bytes(block, &mut pos, mime_len)?).into_owned();
        let desc_len = read_u32(block, &mut pos)? as usize;
        let description = String::from_utf8_lossy(read_bytes(block, &mut pos, desc_len)?).into_owned();
        let width = read_u32(block, &mut pos)?;
        let height = read_u32(block, &mut pos)?;
        let color_depth = read_u32(block, &mut pos)?;
        let indexed_colors = read_u32(block, &mut pos)?;
        let data_len = read_u32(block, &mut pos)? as usize;
        let data = read_bytes(block, &mut pos, data_len)?.to_vec();

        Ok(Picture {
            mime,
            pic_type: PictureType::from_u8(pic_type.min(255) as u8),
            description,
            data,
            width,
            height,
            color_depth,
            indexed_colors,
        })
    }

    pub fn render_flac(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(32 + self.mime.len() + self.description.len() + self.data.len());
        out.extend_from_slice(&(self.pic_type.as_u8() as u32).to_be_bytes());
        out.extend_from_slice(&(self.mime.len() as u32).to_be_bytes());
        out.extend_from_slice(self.mime.as_bytes());
        out.extend_from_slice(&(self.description.len() as u32).to_be_bytes());
        out.extend_from_slice(self.description.as_bytes());
        for v in [self.width, self.height, self.color_depth, self.indexed_colors, self.data.len() as u32] {
            out.extend_from_slice(&v.to_be_bytes());
        }
        out.extend_from_slice(&self.data);
        out
    }
}

fn read_u32(data: &[u8], pos: &mut usize) -> Result<u32> {
    let bytes = read_bytes(data, pos, 4)?;
    Ok(BigEndian::read_u32(bytes))
}

fn read_bytes<'a>(data: &'a [u8], pos: &mut usize, len: usize) -> Result<&'a [u8]> {
    let end = pos
        .checked_add(len)
        .filter(|&end| end <= data.len())
        .ok_or_else(|| MetaError::corrupt("FLAC", "picture block field extends past block"))?;
    let slice = &data[*pos..end];
    *pos = end;
    Ok(slice)
}

/// Guess a MIME type from the leading magic bytes of an image.
pub fn sniff_mime(data: &[u8]) -> &'static str {
    if data.starts_with(&[0xFF, 0xD8, 0xFF]) {
        "image/jpeg"
    } else if data.starts_with(b"\x89PNG\r\n\x1a\n") {
        "image/png"
    } else if data.starts_with(b"GIF8") {
        "image/gif"
    } else if data.starts_with(b"BM") {
        "image/bmp"
    } else {
        "application/octet-stream"
    }
}
