// Application configuration.
// Logging can only be switched off in development builds.

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[cfg(debug_assertions)]
pub const LOGGING_ENABLED: bool = true; // debug builds log by default

#[cfg(not(debug_assertions))]
pub const LOGGING_ENABLED: bool = false; // release builds stay quiet

#[cfg(debug_assertions)]
pub mod dev {
    // Flip to false to silence logging completely while developing.
    // Only honoured in debug builds.
    pub const ENABLE_LOGGING: bool = true;
}

#[cfg(not(debug_assertions))]
pub mod dev {
    pub const ENABLE_LOGGING: bool = false;
}

/// Default filter when `RUST_LOG` is not set.
pub const DEFAULT_LOG_FILTER: &str = "intercom=info,webrtc=warn";

/// Well-known signaling path under the remote endpoint.
pub const OFFER_PATH: &str = "/api/webrtc/offer";

/// Runtime knobs for the controller and its HTTP clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntercomConfig {
    /// Upper bound on ICE candidate gathering. Gathering that has not completed
    /// by then fails the attempt as a negotiation error.
    pub gathering_timeout_secs: u64,
    /// Per-request timeout for the signaling exchange and middleware calls.
    pub request_timeout_secs: u64,
    /// Capacity of the status broadcast channel.
    pub status_buffer: usize,
}

impl Default for IntercomConfig {
    fn default() -> Self {
        Self {
            gathering_timeout_secs: 10,
            request_timeout_secs: 10,
            status_buffer: 64,
        }
    }
}

impl IntercomConfig {
    pub fn gathering_timeout(&self) -> Duration {
        Duration::from_secs(self.gathering_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Capture settings requested from the microphone.
///
/// These are fixed for bandwidth and latency on the doorbell link; a device is
/// free to substitute the nearest values it supports and nobody re-checks them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureConstraints {
    pub channel_count: u16,
    pub sample_rate: u32,
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
    /// Packetisation interval in milliseconds.
    pub ptime_ms: u32,
}

impl CaptureConstraints {
    pub const fn intercom() -> Self {
        Self {
            channel_count: 1,
            sample_rate: 8000,
            echo_cancellation: true,
            noise_suppression: true,
            auto_gain_control: true,
            ptime_ms: 20,
        }
    }

    /// Samples per channel in one packet.
    pub fn frame_len(&self) -> usize {
        (self.sample_rate as usize * self.ptime_ms as usize) / 1000
    }

    pub fn ptime(&self) -> Duration {
        Duration::from_millis(self.ptime_ms as u64)
    }
}
