use log::debug;

use crate::common::config::WriteOptions;
use crate::common::error::{MetaError, Result};
use crate::id3::frames::{Frame, TextFrame};
use crate::id3::header::{BitPaddedInt, Id3Flags, Id3v2Header, HEADER_SIZE};
use crate::id3::specs;
use crate::id3::tags::{Id3v2Tag, LazyFrame};

/// Version a tag is written as: the version it was read as, unless the
/// options force one or the source version cannot be written.
pub fn target_version(tag: &Id3v2Tag, options: &WriteOptions) -> u8 {
    match tag.version() {
        3 | 4 if !options.force_id3v2_version => tag.version(),
        _ => options.target_id3v2_version(),
    }
}

fn numeric_genre(frame: &LazyFrame, version: u8) -> Option<LazyFrame> {
    let Ok(Frame::Text(tcon)) = frame.peek().as_deref().cloned() else {
        return None;
    };
    let text = tcon
        .text
        .iter()
        .map(|g| match specs::genre_index(g) {
            Some(n) if version == 3 => format!("({})", n),
            Some(n) => n.to_string(),
            None => g.clone(),
        })
        .collect();
    Some(LazyFrame::Decoded(Frame::Text(TextFrame { text, ..tcon })))
}

/// Serialize every frame for v2.`version`.
pub fn render_frames(tag: &Id3v2Tag, version: u8, options: &WriteOptions) -> Result<Vec<u8>> {
    let mut data = Vec::with_capacity(4096);
    for lf in tag.frames() {
        let converted;
        let lf = if options.use_numeric_genres && lf.frame_id() == "TCON" {
            converted = numeric_genre(lf, version);
            converted.as_ref().unwrap_or(lf)
        } else {
            lf
        };
        match lf.render(version)? {
            Some(bytes) => data.extend_from_slice(&bytes),
            None => debug!("ID3v2: skipped frame {}", lf.frame_id()),
        }
    }
    Ok(data)
}

/// Build the complete tag (header, frames, padding, optional footer).
///
/// When the tag was read from disk and the new frames fit in its old size,
/// the old size is kept so the file does not have to be shifted.
pub fn render_tag(tag: &Id3v2Tag, options: &WriteOptions) -> Result<Vec<u8>> {
    let version = target_version(tag, options);
    let frames = render_frames(tag, version, options)?;
    let footer = version == 4 && tag.header.flags.footer;

    let padding = if footer {
        0
    } else {
        match tag.original_size() {
            Some(old) if (HEADER_SIZE + frames.len()) as u64 <= old => {
                old as usize - HEADER_SIZE - frames.len()
            }
            _ => options.padding,
        }
    };

    let size = frames.len() + padding;
    if size as u64 > BitPaddedInt::MAX_SYNCHSAFE as u64 {
        return Err(MetaError::ValueError("tag too large for ID3v2".into()));
    }
    let header = Id3v2Header {
        major: version,
        revision: 0,
        flags: Id3Flags {
            footer,
            ..Default::default()
        },
        size: size as u32,
    };

    let mut out = Vec::with_capacity(HEADER_SIZE * 2 + size);
    out.extend_from_slice(&header.render());
    out.extend_from_slice(&frames);
    out.resize(out.len() + padding, 0);
    if footer {
        out.extend_from_slice(&header.render_footer());
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::config::ReadStyle;
    use crate::common::tag::Tag;

    #[test]
    fn new_tag_gets_default_padding() {
        let mut tag = Id3v2Tag::new();
        tag.set_title("T");
        let out = render_tag(&tag, &WriteOptions::default()).unwrap();
        assert_eq!(&out[..5], b"ID3\x04\x00");
        // 10 header + 12 frame + 1024 padding
        assert_eq!(out.len(), 10 + 12 + 1024);
        let back = Id3v2Tag::parse(&out, ReadStyle::default()).unwrap();
        assert_eq!(back.title().as_deref(), Some("T"));
    }

    #[test]
    fn rerender_reuses_old_size_and_is_idempotent() {
        let mut tag = Id3v2Tag::new();
        tag.set_title("Title");
        let first = render_tag(&tag, &WriteOptions::default().padding(64)).unwrap();
        let mut reread = Id3v2Tag::parse(&first, ReadStyle::default()).unwrap();
        let second = render_tag(&reread, &WriteOptions::default()).unwrap();
        assert_eq!(first, second);

        reread.set_title("Shorter");
        let third = render_tag(&reread, &WriteOptions::default()).unwrap();
        assert_eq!(third.len(), first.len());
    }

    #[test]
    fn source_version_is_kept_unless_forced() {
        let mut tag = Id3v2Tag::new();
        tag.header.major = 3;
        tag.set_artist("A");
        assert_eq!(render_tag(&tag, &WriteOptions::default()).unwrap()[3], 3);
        let forced = WriteOptions {
            force_id3v2_version: true,
            ..Default::default()
        };
        assert_eq!(render_tag(&tag, &forced).unwrap()[3], 4);
    }

    #[test]
    fn numeric_genres() {
        let mut tag = Id3v2Tag::new();
        tag.header.major = 3;
        tag.set_genre("Rock");
        let opts = WriteOptions {
            use_numeric_genres: true,
            padding: 0,
            ..Default::default()
        };
        let out = render_tag(&tag, &opts).unwrap();
        assert_eq!(&out[10..14], b"TCON");
        assert_eq!(&out[20..], b"\x00(17)");
        let back = Id3v2Tag::parse(&out, ReadStyle::default()).unwrap();
        assert_eq!(back.genre().as_deref(), Some("Rock"));
    }

    #[test]
    fn footer_replaces_padding() {
        let mut tag = Id3v2Tag::new();
        tag.header.flags.footer = true;
        tag.set_title("x");
        let out = render_tag(&tag, &WriteOptions::default()).unwrap();
        assert_eq!(&out[out.len() - 10..out.len() - 7], b"3DI");
        assert_eq!(out.len(), 10 + 12 + 10);
    }
}
