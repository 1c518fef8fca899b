//! Synthetic media files for the integration tests.

#![allow(dead_code)]

use mediameta::ogg::page::paginate;
use mediameta::png::{render_chunk as png_chunk, SIGNATURE};
use mediameta::riff::chunk::render_chunk;
use mediameta::vorbis::XiphComment;

pub const AUDIO: [u8; 64] = [0x3C; 64];

/// A recognizable byte pattern.
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 % 251) as u8).collect()
}

/// `count` MPEG-1 layer III frames, 128 kbit/s at 44.1 kHz.
pub fn mp3_frames(count: usize) -> Vec<u8> {
    let mut data = Vec::with_capacity(417 * count);
    for _ in 0..count {
        let mut frame = vec![0x55u8; 417];
        frame[..4].copy_from_slice(&[0xFF, 0xFB, 0x90, 0x00]);
        data.extend_from_slice(&frame);
    }
    data
}

fn cd_format() -> Vec<u8> {
    let mut fmt = Vec::new();
    fmt.extend_from_slice(&1u16.to_le_bytes());
    fmt.extend_from_slice(&2u16.to_le_bytes());
    fmt.extend_from_slice(&44100u32.to_le_bytes());
    fmt.extend_from_slice(&176_400u32.to_le_bytes());
    fmt.extend_from_slice(&4u16.to_le_bytes());
    fmt.extend_from_slice(&16u16.to_le_bytes());
    fmt
}

/// RIFF/WAVE with `chunks` first, then `fmt ` and `data`.
pub fn wav(chunks: &[Vec<u8>]) -> Vec<u8> {
    let mut body = b"WAVE".to_vec();
    for chunk in chunks {
        body.extend_from_slice(chunk);
    }
    body.extend_from_slice(&render_chunk(b"fmt ", &cd_format(), false).unwrap());
    body.extend_from_slice(&render_chunk(b"data", &AUDIO, false).unwrap());
    render_chunk(b"RIFF", &body, false).unwrap()
}

pub fn riff_size(bytes: &[u8]) -> u32 {
    u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]])
}

/// A 4x4 RGBA PNG with the given text chunks.
pub fn png(texts: &[(&str, &str)]) -> Vec<u8> {
    let mut ihdr = Vec::new();
    ihdr.extend_from_slice(&4u32.to_be_bytes());
    ihdr.extend_from_slice(&4u32.to_be_bytes());
    ihdr.extend_from_slice(&[8, 6, 0, 0, 0]);
    let mut data = SIGNATURE.to_vec();
    data.extend_from_slice(&png_chunk(b"IHDR", &ihdr).unwrap());
    for (keyword, text) in texts {
        let mut body = keyword.as_bytes().to_vec();
        body.push(0);
        body.extend_from_slice(text.as_bytes());
        data.extend_from_slice(&png_chunk(b"tEXt", &body).unwrap());
    }
    data.extend_from_slice(&png_chunk(b"IDAT", &AUDIO).unwrap());
    data.extend_from_slice(&png_chunk(b"IEND", &[]).unwrap());
    data
}

fn vorbis_id() -> Vec<u8> {
    let mut id = b"\x01vorbis".to_vec();
    id.extend_from_slice(&[0, 0, 0, 0]);
    id.push(2);
    id.extend_from_slice(&44100u32.to_le_bytes());
    id.extend_from_slice(&0i32.to_le_bytes());
    id.extend_from_slice(&128_000i32.to_le_bytes());
    id.extend_from_slice(&0i32.to_le_bytes());
    id.push(0xB8);
    id.push(1);
    id
}

/// Ogg Vorbis: identification page, comment and setup pages, two audio
/// pages of one second each.
pub fn ogg_vorbis(comment: &XiphComment) -> Vec<u8> {
    const SERIAL: u32 = 0x5EED;
    let mut packet = b"\x03vorbis".to_vec();
    packet.extend_from_slice(&comment.render(true));

    let mut pages = paginate(&[vorbis_id()], SERIAL, 0, 0);
    pages[0].header.header_type = 0x02;
    let headers = paginate(&[packet, b"\x05vorbis-setup".to_vec()], SERIAL, 1, 0);
    let mut sequence = 1 + headers.len() as u32;
    pages.extend(headers);
    for (granule, last) in [(44100, false), (88200, true)] {
        let mut audio = paginate(&[vec![0x11; 50]], SERIAL, sequence, granule);
        if last {
            audio[0].header.header_type |= 0x04;
        }
        sequence += 1;
        pages.extend(audio);
    }
    pages.iter().flat_map(|p| p.render()).collect()
}
