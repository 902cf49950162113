//! Two-way audio with a local-network intercom over WebRTC.
//!
//! [`IntercomController`] runs the whole call: it acquires the microphone,
//! negotiates a peer transport, exchanges descriptions with the doorbell over
//! a single HTTP request and watches the connection until it is stopped or lost.

pub mod config;
pub mod controller;
pub mod error;
pub mod logger;
pub mod media;
pub mod middleware;
pub mod peer;
pub mod session;
pub mod signaling;
pub mod utils;

pub use config::{CaptureConstraints, IntercomConfig};
pub use controller::{Collaborators, IntercomController};
pub use error::{ErrorKind, IntercomError, Result};
pub use middleware::MiddlewareClient;
pub use session::{SessionId, SessionState, StatusEvent};
