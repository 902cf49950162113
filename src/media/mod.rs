//! Local capture and remote play-out.
//!
//! The microphone is an exclusive resource: whoever holds a [`LocalTrack`]
//! holds the device, and the device is released exactly once, either through
//! [`LocalTrack::release`] or when the track is dropped.

pub mod capture;
pub mod g711;
#[cfg(feature = "microphone")]
pub mod microphone;
pub mod pcm;
pub mod playout;

use crate::config::CaptureConstraints;
use crate::error::Result;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tracing::debug;
use webrtc::api::media_engine::MIME_TYPE_PCMU;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTCRtpCodecParameters};
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

pub use capture::{
    CaptureDevice, ChannelSource, DeviceAcquirer, PcmSource, SilenceDevice, WavFileDevice,
};
#[cfg(feature = "microphone")]
pub use microphone::CpalMicrophone;
pub use playout::{AudioPlayout, DiscardPlayout, WavRecorder};

/// Static payload type of G.711 mu-law.
pub const PCMU_PAYLOAD_TYPE: u8 = 0;

/// Obtains a local audio capture stream.
#[async_trait]
pub trait MediaAcquirer: Send + Sync {
    /// Fails with `MediaAccess` when the device is denied or cannot satisfy the request.
    async fn acquire(&self, constraints: &CaptureConstraints) -> Result<LocalTrack>;
}

/// Releases whatever hardware stands behind a [`LocalTrack`].
pub trait CaptureGuard: Send + Sync {
    fn release(&mut self);
}

/// Outgoing audio track plus the capture resource feeding it.
pub struct LocalTrack {
    track: Arc<TrackLocalStaticSample>,
    guard: Option<Box<dyn CaptureGuard>>,
}

impl LocalTrack {
    pub fn new(track: Arc<TrackLocalStaticSample>, guard: Box<dyn CaptureGuard>) -> Self {
        Self {
            track,
            guard: Some(guard),
        }
    }

    pub fn id(&self) -> &str {
        self.track.id()
    }

    pub fn rtp_track(&self) -> Arc<TrackLocalStaticSample> {
        self.track.clone()
    }

    pub fn is_released(&self) -> bool {
        self.guard.is_none()
    }

    pub fn release(mut self) {
        self.release_capture();
    }

    fn release_capture(&mut self) {
        if let Some(mut guard) = self.guard.take() {
            debug!(track = %self.track.id(), "releasing capture device");
            guard.release();
        }
    }
}

impl Drop for LocalTrack {
    fn drop(&mut self) {
        self.release_capture();
    }
}

impl fmt::Debug for LocalTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalTrack")
            .field("id", &self.track.id())
            .field("released", &self.is_released())
            .finish()
    }
}

pub fn pcmu_capability() -> RTCRtpCodecCapability {
    RTCRtpCodecCapability {
        mime_type: MIME_TYPE_PCMU.to_owned(),
        clock_rate: 8000,
        channels: 1,
        sdp_fmtp_line: String::new(),
        rtcp_feedback: vec![],
    }
}

pub fn pcmu_parameters() -> RTCRtpCodecParameters {
    RTCRtpCodecParameters {
        capability: pcmu_capability(),
        payload_type: PCMU_PAYLOAD_TYPE,
        ..Default::default()
    }
}

/// New PCMU sample track with the given stream id.
pub fn pcmu_track(stream_id: impl Into<String>) -> Arc<TrackLocalStaticSample> {
    Arc::new(TrackLocalStaticSample::new(
        pcmu_capability(),
        "audio".to_owned(),
        stream_id.into(),
    ))
}
