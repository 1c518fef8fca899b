/// Undo unsynchronisation: drop the 0x00 inserted after every 0xFF.
pub fn decode(data: &[u8]) -> Vec<u8> {
    let mut output = Vec::with_capacity(data.len());
    let mut i = 0;
    while i < data.len() {
        output.push(data[i]);
        if data[i] == 0xFF && data.get(i + 1) == Some(&0x00) {
            i += 2;
        } else {
            i += 1;
        }
    }
    output
}

/// Apply unsynchronisation so no false MPEG sync (0xFF 0xE0+) survives.
pub fn encode(data: &[u8]) -> Vec<u8> {
    let mut output = Vec::with_capacity(data.len() + data.len() / 10);
    for (i, &b) in data.iter().enumerate() {
        output.push(b);
        if b == 0xFF {
            match data.get(i + 1) {
                Some(&next) if next < 0xE0 && next != 0x00 => {}
                _ => output.push(0x00),
            }
        }
    }
    output
}
