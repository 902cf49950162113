use crate::media::{g711, PCMU_PAYLOAD_TYPE};
use hound::{SampleFormat, WavSpec, WavWriter};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use webrtc::track::track_remote::TrackRemote;

/// Receives the doorbell's audio. Volume, muting and device choice belong to the implementor.
pub trait AudioPlayout: Send + Sync {
    fn play(&self, track: Arc<TrackRemote>);
}

/// Reads and drops incoming RTP so the receive side keeps flowing.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiscardPlayout;

impl AudioPlayout for DiscardPlayout {
    fn play(&self, track: Arc<TrackRemote>) {
        tokio::spawn(async move {
            let mut packets = 0u64;
            while track.read_rtp().await.is_ok() {
                packets += 1;
            }
            debug!(packets, "remote track ended");
        });
    }
}

/// Decodes the remote PCMU stream into an 8 kHz mono WAV file.
#[derive(Debug, Clone)]
pub struct WavRecorder {
    path: PathBuf,
}

impl WavRecorder {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl AudioPlayout for WavRecorder {
    fn play(&self, track: Arc<TrackRemote>) {
        let (tx, mut rx) = mpsc::channel::<Vec<i16>>(64);

        tokio::spawn(async move {
            loop {
                match track.read_rtp().await {
                    Ok((packet, _)) => {
                        if packet.header.payload_type != PCMU_PAYLOAD_TYPE {
                            warn!(
                                payload_type = packet.header.payload_type,
                                "skipping non-PCMU packet"
                            );
                            continue;
                        }
                        if tx.send(g711::decode(&packet.payload)).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        debug!("remote track read finished: {e}");
                        break;
                    }
                }
            }
        });

        let path = self.path.clone();
        tokio::task::spawn_blocking(move || {
            let spec = WavSpec {
                channels: 1,
                sample_rate: 8000,
                bits_per_sample: 16,
                sample_format: SampleFormat::Int,
            };
            let mut writer = match WavWriter::create(&path, spec) {
                Ok(w) => w,
                Err(e) => {
                    error!("cannot record to {}: {e}", path.display());
                    return;
                }
            };
            let mut written = 0usize;
            while let Some(samples) = rx.blocking_recv() {
                for s in samples {
                    if let Err(e) = writer.write_sample(s) {
                        error!("recording to {} failed: {e}", path.display());
                        return;
                    }
                }
                written += 1;
            }
            match writer.finalize() {
                Ok(()) => info!(packets = written, "saved remote audio to {}", path.display()),
                Err(e) => error!("finalising {} failed: {e}", path.display()),
            }
        });
    }
}
