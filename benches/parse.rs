use criterion::{black_box, criterion_group, criterion_main, Criterion};

use mediameta::png::{render_chunk, SIGNATURE};
use mediameta::tiff::{ifd, render_chain, EntryValue, Ifd};
use mediameta::{MediaFile, MemoryFile, MpegFile, PngFile, ReadStyle, RiffFile, Tag, TagFile, TiffFile};

/// 1000 MPEG-1 layer III frames at 128 kbit/s, 44.1 kHz.
fn mp3_stream() -> Vec<u8> {
    let mut data = Vec::with_capacity(417 * 1000);
    for _ in 0..1000 {
        let mut frame = vec![0x55u8; 417];
        frame[..4].copy_from_slice(&[0xFF, 0xFB, 0x90, 0x00]);
        data.extend_from_slice(&frame);
    }
    data
}

fn tagged_mp3() -> Vec<u8> {
    let mem = MemoryFile::new("bench.mp3", mp3_stream());
    let mut file = MpegFile::open(mem.clone(), ReadStyle::default()).unwrap();
    file.tags.id3v2_mut().set_title("Benchmark");
    file.tags.id3v2_mut().set_artist("Someone");
    file.tags.ape_mut().set_album("Numbers");
    file.tags.id3v1_mut().set_track(7);
    file.save().unwrap();
    mem.contents()
}

fn tagged_wav() -> Vec<u8> {
    let mut fmt = Vec::new();
    fmt.extend_from_slice(&1u16.to_le_bytes());
    fmt.extend_from_slice(&2u16.to_le_bytes());
    fmt.extend_from_slice(&44100u32.to_le_bytes());
    fmt.extend_from_slice(&176_400u32.to_le_bytes());
    fmt.extend_from_slice(&4u16.to_le_bytes());
    fmt.extend_from_slice(&16u16.to_le_bytes());
    let audio = vec![0u8; 176_400];

    let mut body = b"WAVE".to_vec();
    for (id, payload) in [(b"fmt ", &fmt), (b"data", &audio)] {
        body.extend_from_slice(id);
        body.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        body.extend_from_slice(payload);
    }
    let mut data = b"RIFF".to_vec();
    data.extend_from_slice(&(body.len() as u32).to_le_bytes());
    data.extend_from_slice(&body);

    let mem = MemoryFile::new("bench.wav", data);
    let mut file = RiffFile::open(mem.clone(), ReadStyle::default()).unwrap();
    file.info_mut().set_title("Benchmark");
    file.id3v2_mut().set_artist("Someone");
    file.save().unwrap();
    mem.contents()
}

fn tagged_tiff() -> Vec<u8> {
    let mut ifd0 = Ifd::new();
    ifd0.set(ifd::IMAGE_WIDTH, EntryValue::Short(vec![64]));
    ifd0.set(ifd::IMAGE_LENGTH, EntryValue::Short(vec![64]));
    ifd0.set(ifd::STRIP_OFFSETS, EntryValue::Long(vec![8]));
    ifd0.set(ifd::STRIP_BYTE_COUNTS, EntryValue::Long(vec![4096]));
    ifd0.set(ifd::IMAGE_DESCRIPTION, EntryValue::Ascii("Benchmark image".into()));
    ifd0.child_mut(ifd::EXIF_IFD)
        .set(ifd::DATE_TIME_ORIGINAL, EntryValue::Ascii("2020:01:01 00:00:00".into()));
    let mut data = b"II\x2a\0".to_vec();
    data.extend_from_slice(&(8u32 + 4096).to_le_bytes());
    data.resize(8 + 4096, 0x80);
    data.extend_from_slice(&render_chain(&[ifd0], 8 + 4096, false).unwrap());
    data
}

fn tagged_png() -> Vec<u8> {
    let mut ihdr = Vec::new();
    ihdr.extend_from_slice(&64u32.to_be_bytes());
    ihdr.extend_from_slice(&64u32.to_be_bytes());
    ihdr.extend_from_slice(&[8, 6, 0, 0, 0]);
    let mut data = SIGNATURE.to_vec();
    data.extend_from_slice(&render_chunk(b"IHDR", &ihdr).unwrap());
    for text in [&b"Title\0Benchmark"[..], &b"Author\0Someone"[..], &b"Comment\0Synthetic"[..]] {
        data.extend_from_slice(&render_chunk(b"tEXt", text).unwrap());
    }
    data.extend_from_slice(&render_chunk(b"IDAT", &[0u8; 8192]).unwrap());
    data.extend_from_slice(&render_chunk(b"IEND", &[]).unwrap());
    data
}

fn bench_open(c: &mut Criterion) {
    let mp3 = tagged_mp3();
    let wav = tagged_wav();
    let tiff = tagged_tiff();
    let png = tagged_png();

    let mut group = c.benchmark_group("open");
    group.bench_function("mp3", |b| {
        b.iter(|| MpegFile::open(MemoryFile::new("a.mp3", black_box(mp3.clone())), ReadStyle::default()).unwrap())
    });
    group.bench_function("wav", |b| {
        b.iter(|| RiffFile::open(MemoryFile::new("a.wav", black_box(wav.clone())), ReadStyle::default()).unwrap())
    });
    group.bench_function("tiff", |b| {
        b.iter(|| TiffFile::open(MemoryFile::new("a.tif", black_box(tiff.clone())), ReadStyle::default()).unwrap())
    });
    group.bench_function("png", |b| {
        b.iter(|| PngFile::open(MemoryFile::new("a.png", black_box(png.clone())), ReadStyle::default()).unwrap())
    });
    group.finish();
}

fn bench_splice(c: &mut Criterion) {
    let base = vec![0xA5u8; 4 * 1024 * 1024];
    let mut group = c.benchmark_group("splice_4mib");
    group.bench_function("grow", |b| {
        b.iter(|| {
            let mut file = TagFile::new(MemoryFile::new("a.bin", base.clone()));
            file.insert(black_box(&[1u8; 3000]), 10, 1000).unwrap();
        })
    });
    group.bench_function("shrink", |b| {
        b.iter(|| {
            let mut file = TagFile::new(MemoryFile::new("a.bin", base.clone()));
            file.insert(black_box(&[1u8; 1000]), 10, 3000).unwrap();
        })
    });
    group.finish();
}

fn bench_save(c: &mut Criterion) {
    let mp3 = tagged_mp3();
    c.bench_function("save_mp3_resized_tag", |b| {
        b.iter(|| {
            let mut file = MpegFile::open(MemoryFile::new("a.mp3", mp3.clone()), ReadStyle::NONE).unwrap();
            file.tags.id3v2_mut().set_comment(&"x".repeat(4000));
            file.save().unwrap();
        })
    });
}

criterion_group!(benches, bench_open, bench_splice, bench_save);
criterion_main!(benches);
