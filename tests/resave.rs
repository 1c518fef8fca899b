mod support;

use std::fs;

use mediameta::riff::chunk::render_chunk;
use mediameta::vorbis::XiphComment;
use mediameta::{
    LocalFile, MediaFile, MemoryFile, MetaError, MpegFile, OggFile, PngFile, ReadStyle, RiffFile, Tag, TagType,
    WriteOptions,
};
use pretty_assertions::assert_eq;
use support::{mp3_frames, ogg_vorbis, png, wav, AUDIO};

/// Save twice without changes in between and compare.
fn assert_stable<F: MediaFile>(mem: &MemoryFile, mut open: impl FnMut() -> F) {
    open().save().unwrap();
    let first = mem.contents();
    let region = open().tag_file().invariant_region();
    open().save().unwrap();
    assert_eq!(mem.contents(), first);
    assert_eq!(open().tag_file().invariant_region(), region);
}

#[test]
fn mp3_resave_is_stable() {
    let mem = MemoryFile::new("a.mp3", mp3_frames(8));
    let mut file = MpegFile::open(mem.clone(), ReadStyle::default()).unwrap();
    file.tags.id3v2_mut().set_title("Stable");
    file.tags.ape_mut().set_artist("Twice");
    file.tags.id3v1_mut().set_album("Same");
    file.save().unwrap();
    assert_stable(&mem, || MpegFile::open(mem.clone(), ReadStyle::default()).unwrap());
}

#[test]
fn wav_resave_is_stable() {
    let mem = MemoryFile::new("a.wav", wav(&[]));
    let mut file = RiffFile::open(mem.clone(), ReadStyle::default()).unwrap();
    file.info_mut().set_title("Stable");
    file.id3v2_mut().set_artist("Twice");
    file.save().unwrap();
    assert_stable(&mem, || RiffFile::open(mem.clone(), ReadStyle::default()).unwrap());
}

#[test]
fn ogg_resave_is_stable() {
    let mem = MemoryFile::new("a.ogg", ogg_vorbis(&XiphComment::new()));
    let mut file = OggFile::open(mem.clone(), ReadStyle::default()).unwrap();
    file.tags().set_title("Stable");
    file.save().unwrap();
    assert_stable(&mem, || OggFile::open(mem.clone(), ReadStyle::default()).unwrap());
}

#[test]
fn png_resave_is_stable() {
    let mem = MemoryFile::new("a.png", png(&[("Title", "Stable"), ("Author", "Twice")]));
    assert_stable(&mem, || PngFile::open(mem.clone(), ReadStyle::default()).unwrap());
}

#[test]
fn combined_tag_reads_by_priority_and_writes_everywhere() {
    let mem = MemoryFile::new("a.mp3", mp3_frames(4));
    let mut file = MpegFile::open(mem.clone(), ReadStyle::default()).unwrap();
    file.tags.id3v2_mut().set_title("From ID3v2");
    file.tags.ape_mut().set_title("From APE");
    file.tags.id3v1_mut();

    let mut tags = file.tags();
    assert_eq!(tags.len(), 3);
    assert_eq!(tags.title().as_deref(), Some("From ID3v2"));
    tags.set_artist("Everyone");
    drop(tags);
    assert_eq!(file.tags.ape().and_then(|t| t.artist()).as_deref(), Some("Everyone"));
    assert_eq!(file.tags.id3v1().map(|t| t.tag_type()), Some(TagType::Id3v1));
    assert_eq!(file.tags.id3v1().and_then(|t| t.artist()).as_deref(), Some("Everyone"));

    file.tags().clear();
    file.save().unwrap();
    assert_eq!(mem.contents(), mp3_frames(4));
}

#[test]
fn oversized_riff_refuses_to_save() {
    let mut data = wav(&[]);
    let declared = support::riff_size(&data) + 1000;
    data[4..8].copy_from_slice(&declared.to_le_bytes());
    let mem = MemoryFile::new("big.wav", data.clone());
    let mut file = RiffFile::open(mem.clone(), ReadStyle::NONE).unwrap();
    assert!(file.tag_file().is_possibly_corrupt());
    file.info_mut().set_title("Nope");
    assert!(matches!(file.save(), Err(MetaError::PossiblyCorrupt(_))));
    assert_eq!(mem.contents(), data);
}

#[test]
fn truncated_chunk_flags_the_file() {
    let mut data = wav(&[render_chunk(b"junk", &[0; 16], false).unwrap()]);
    data.truncate(30);
    let riff_len = (data.len() - 8) as u32;
    data[4..8].copy_from_slice(&riff_len.to_le_bytes());
    let mut file = RiffFile::open(MemoryFile::new("short.wav", data), ReadStyle::NONE).unwrap();
    let reasons = file.tag_file().corruption_reasons().to_vec();
    assert!(reasons.iter().any(|r| r.contains("junk chunk at 12")), "{:?}", reasons);
    assert!(matches!(file.save(), Err(MetaError::PossiblyCorrupt(_))));
}

#[test]
fn truncated_riff_header_is_corrupt() {
    let err = RiffFile::open(MemoryFile::new("tiny.wav", b"RIFF\x04\0\0\0WA".to_vec()), ReadStyle::NONE)
        .err()
        .unwrap();
    assert!(err.is_corrupt(), "{:?}", err);
}

#[test]
fn local_file_save_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("song.wav");
    fs::write(&path, wav(&[])).unwrap();

    {
        let mut file = RiffFile::open(LocalFile::new(&path), ReadStyle::default()).unwrap();
        file.tags().set_title("On disk");
        file.save_with(&WriteOptions::default().padding(64)).unwrap();
    }

    let bytes = fs::read(&path).unwrap();
    assert_eq!(support::riff_size(&bytes) as usize, bytes.len() - 8);
    let mut file = RiffFile::open(LocalFile::new(&path), ReadStyle::default()).unwrap();
    assert_eq!(file.tags().title().as_deref(), Some("On disk"));
    assert_eq!(file.properties().map(|p| p.sample_rate), Some(44100));
    let region = file.tag_file().invariant_region().unwrap();
    assert_eq!(&bytes[region.start as usize..region.end as usize], &AUDIO[..]);
}

#[test]
fn overrunning_id3_frame_blocks_saving() {
    let mut frames = b"TIT2\0\0\0\x05\0\0\0Song".to_vec();
    frames.extend_from_slice(b"TPE1\0\0\0\x64\0\0");
    frames.extend_from_slice(&[b'a'; 10]);
    let mut data = b"ID3\x03\0\0\0\0\0".to_vec();
    data.push(frames.len() as u8);
    data.extend_from_slice(&frames);
    data.extend_from_slice(&mp3_frames(4));

    let mem = MemoryFile::new("overrun.mp3", data.clone());
    let mut file = MpegFile::open(mem.clone(), ReadStyle::default()).unwrap();
    let reasons = file.tag_file().corruption_reasons().to_vec();
    assert!(reasons.iter().any(|r| r.contains("TPE1")), "{:?}", reasons);
    file.tags().set_title("Replaced");
    assert!(matches!(file.save(), Err(MetaError::PossiblyCorrupt(_))));
    assert_eq!(mem.contents(), data);
}
