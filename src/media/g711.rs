//! G.711 mu-law (ITU-T G.711), the codec the doorbell speaks.

/// Compress one 16-bit linear sample to mu-law.
pub fn ulaw_compress(sample: i16) -> u8 {
    let absno = if sample < 0 {
        ((!sample) >> 2) + 33
    } else {
        (sample >> 2) + 33
    };
    let absno = absno.min(0x1FFF);

    let mut i = absno >> 6;
    let mut segno: i16 = 1;
    while i != 0 {
        segno += 1;
        i >>= 1;
    }

    let high_nibble = 0x0008 - segno;
    let low_nibble = 0x000F - ((absno >> segno) & 0x000F);
    let mut result = (high_nibble << 4) | low_nibble;
    if sample >= 0 {
        result |= 0x0080;
    }
    result as u8
}

/// Expand one mu-law byte to 16-bit linear.
pub fn ulaw_expand(compressed: u8) -> i16 {
    let sign: i16 = if compressed < 0x80 { -1 } else { 1 };
    let mantissa = !compressed as i16;
    let exponent = (mantissa >> 4) & 0x0007;
    let segment = exponent + 1;
    let mantissa = mantissa & 0x000F;
    let step = 4 << segment;

    sign * ((0x0080 << exponent) + step * mantissa + step / 2 - 4 * 33)
}

pub fn encode(samples: &[i16]) -> Vec<u8> {
    samples.iter().map(|&s| ulaw_compress(s)).collect()
}

pub fn decode(payload: &[u8]) -> Vec<i16> {
    payload.iter().map(|&b| ulaw_expand(b)).collect()
}
