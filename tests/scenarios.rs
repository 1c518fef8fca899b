mod support;

use mediameta::id3::frame_header::convert_id;
use mediameta::id3::{writer, Id3v1Tag, Id3v2Tag};
use mediameta::ogg::page::Page;
use mediameta::png::{read_text_chunk, render_chunk as png_chunk, PngChunk};
use mediameta::riff::chunk::render_chunk;
use mediameta::vorbis::XiphComment;
use mediameta::{MediaFile, MemoryFile, MetaError, OggFile, ReadStyle, RiffFile, Tag, TagFile, WriteOptions};
use pretty_assertions::assert_eq;
use support::{riff_size, wav, AUDIO};

#[test]
fn id3v1_without_track_keeps_a_30_byte_comment() {
    let mut block = vec![0u8; 128];
    block[..3].copy_from_slice(b"TAG");
    block[3..7].copy_from_slice(b"Test");
    block[97..127].copy_from_slice(&[b'c'; 30]);
    assert_ne!(block[125], 0);

    let tag = Id3v1Tag::parse(&block).unwrap();
    assert_eq!(tag.title, "Test");
    assert_eq!(tag.comment.len(), 30);
    assert_eq!(tag.track, None);
}

#[test]
fn v22_comment_id_converts_to_comm() {
    assert_eq!(convert_id(b"COM", 2, false), Some(b"COMM".to_vec()));
}

#[test]
fn png_text_with_bad_crc_is_corrupt() {
    let mut chunk = png_chunk(b"tEXt", b"Title\0Hello").unwrap();
    let last = chunk.len() - 1;
    chunk[last] ^= 0x5A;
    let mut file = TagFile::new(MemoryFile::new("bad.png", chunk));
    let header = PngChunk {
        kind: *b"tEXt",
        position: 0,
        length: 11,
    };
    let err = read_text_chunk(&mut file, &header).unwrap_err();
    match err {
        MetaError::Corrupt { reason, .. } => assert!(reason.contains("CRC mismatch"), "{}", reason),
        other => panic!("unexpected error {:?}", other),
    }
}

#[test]
fn ogg_comment_continued_on_next_page_is_reassembled() {
    let mut comment = XiphComment::new();
    comment.vendor = "synthetic".into();
    let title = "t".repeat(70_000);
    comment.set_title(&title);
    let data = support::ogg_vorbis(&comment);

    let mut raw = TagFile::new(MemoryFile::new("long.ogg", data.clone()));
    let first = Page::read(&mut raw, 0).unwrap();
    let second = Page::read(&mut raw, first.size()).unwrap();
    let third = Page::read(&mut raw, first.size() + second.size()).unwrap();
    assert!(!second.header.last_packet_complete());
    assert!(third.header.is_continued());

    let file = OggFile::open(MemoryFile::new("long.ogg", data), ReadStyle::default()).unwrap();
    assert_eq!(file.xiph.title(), Some(title));
    assert_eq!(file.header_packets()[2], b"\x05vorbis-setup".to_vec());
    assert_eq!(file.properties().unwrap().duration_ms, 2000);
}

#[test]
fn grown_id3_chunk_propagates_to_riff_and_audio() {
    let mut tag = Id3v2Tag::new();
    tag.set_title("a");
    let no_padding = WriteOptions::default().padding(0);
    let raw = writer::render_tag(&tag, &no_padding).unwrap();
    let chunk = render_chunk(b"id3 ", &raw, false).unwrap();
    assert_eq!(chunk.len(), 30);

    let mem = MemoryFile::new("grow.wav", wav(&[chunk]));
    let before = mem.contents();
    let mut file = RiffFile::open(mem.clone(), ReadStyle::default()).unwrap();
    assert_eq!(file.chunks()[0].offset(), 12);
    let region = file.tag_file().invariant_region().unwrap();

    file.id3v2_mut().set_title(&"b".repeat(21));
    file.save_with(&no_padding).unwrap();
    let after = mem.contents();

    assert_eq!(after.len(), before.len() + 20);
    assert_eq!(riff_size(&after), riff_size(&before) + 20);
    assert_eq!(u32::from_le_bytes([after[16], after[17], after[18], after[19]]), 42);
    let moved = file.tag_file().invariant_region().unwrap();
    assert_eq!(moved.start, region.start + 20);
    assert_eq!(moved.end, region.end + 20);
    assert_eq!(&after[moved.start as usize..moved.end as usize], &AUDIO[..]);
}
