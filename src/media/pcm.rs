//! PCM helpers: WAV in and out, down-mixing and rate conversion.

use crate::error::Result;
use crate::media::g711;
use bytes::{BufMut, BytesMut};
use hound::{SampleFormat, WavReader};
use std::io::Read;
use std::path::Path;
use tracing::debug;

/// Mono 16-bit PCM at a known rate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PcmBuffer {
    pub sample_rate: u32,
    pub samples: Vec<i16>,
}

impl PcmBuffer {
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// Read a WAV file and convert it to mono at `target_rate`.
pub fn load_wav(path: impl AsRef<Path>, target_rate: u32) -> Result<PcmBuffer> {
    let reader = WavReader::open(path.as_ref())?;
    decode_wav(reader, target_rate)
}

fn decode_wav<R: Read>(mut reader: WavReader<R>, target_rate: u32) -> Result<PcmBuffer> {
    let spec = reader.spec();
    let interleaved: Vec<i16> = match (spec.sample_format, spec.bits_per_sample) {
        (SampleFormat::Int, 16) => reader.samples::<i16>().collect::<std::result::Result<_, _>>()?,
        (SampleFormat::Int, bits) => {
            let shift = bits.saturating_sub(16) as u32;
            let widen = 16u32.saturating_sub(bits as u32);
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| ((v >> shift) << widen) as i16))
                .collect::<std::result::Result<_, _>>()?
        }
        (SampleFormat::Float, _) => reader
            .samples::<f32>()
            .map(|s| s.map(|v| (v.clamp(-1.0, 1.0) * i16::MAX as f32) as i16))
            .collect::<std::result::Result<_, _>>()?,
    };

    let mono = downmix(&interleaved, spec.channels);
    let samples = resample(&mono, spec.sample_rate, target_rate);
    debug!(
        channels = spec.channels,
        from = spec.sample_rate,
        to = target_rate,
        samples = samples.len(),
        "decoded WAV input"
    );
    Ok(PcmBuffer {
        sample_rate: target_rate,
        samples,
    })
}

/// Average interleaved channels into one.
pub fn downmix(interleaved: &[i16], channels: u16) -> Vec<i16> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks(channels as usize)
        .map(|frame| {
            let sum: i32 = frame.iter().map(|&s| s as i32).sum();
            (sum / frame.len() as i32) as i16
        })
        .collect()
}

/// Linear-interpolation rate conversion. Good enough for speech at 8 kHz.
pub fn resample(samples: &[i16], from: u32, to: u32) -> Vec<i16> {
    if from == to || samples.is_empty() || from == 0 || to == 0 {
        return samples.to_vec();
    }
    let out_len = (samples.len() as u64 * to as u64 / from as u64) as usize;
    let step = from as f64 / to as f64;
    (0..out_len)
        .map(|i| {
            let pos = i as f64 * step;
            let idx = pos as usize;
            let frac = pos - idx as f64;
            let a = samples[idx.min(samples.len() - 1)] as f64;
            let b = samples[(idx + 1).min(samples.len() - 1)] as f64;
            (a + (b - a) * frac).round() as i16
        })
        .collect()
}

/// WAV `fmt ` format tag of G.711 mu-law.
pub const WAVE_FORMAT_MULAW: u16 = 7;

/// Encode mono PCM as a G.711 mu-law WAV file (8 bits per sample, with a `fact` chunk).
pub fn mulaw_wav_bytes(pcm: &PcmBuffer) -> Vec<u8> {
    let data = g711::encode(&pcm.samples);
    let data_len = data.len() as u32;
    let pad = data.len() % 2;
    // "WAVE" + fmt (8 + 18) + fact (8 + 4) + data header (8)
    let riff_len = 4 + 26 + 12 + 8 + data_len + pad as u32;

    let mut out = BytesMut::with_capacity(riff_len as usize + 8);
    out.put_slice(b"RIFF");
    out.put_u32_le(riff_len);
    out.put_slice(b"WAVE");

    out.put_slice(b"fmt ");
    out.put_u32_le(18);
    out.put_u16_le(WAVE_FORMAT_MULAW);
    out.put_u16_le(1); // channels
    out.put_u32_le(pcm.sample_rate);
    out.put_u32_le(pcm.sample_rate); // byte rate
    out.put_u16_le(1); // block align
    out.put_u16_le(8); // bits per sample
    out.put_u16_le(0); // no extension

    out.put_slice(b"fact");
    out.put_u32_le(4);
    out.put_u32_le(data_len);

    out.put_slice(b"data");
    out.put_u32_le(data_len);
    out.put_slice(&data);
    if pad == 1 {
        out.put_u8(0);
    }
    out.to_vec()
}

/// Turn any WAV file into the 8 kHz mono mu-law clip the doorbell plays.
pub fn prepare_announcement(path: impl AsRef<Path>) -> Result<Vec<u8>> {
    let pcm = load_wav(path, 8000)?;
    debug!(seconds = pcm.duration_secs(), "encoding announcement as mu-law");
    Ok(mulaw_wav_bytes(&pcm))
}
