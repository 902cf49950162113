use crate::peer::types::ConnectivityState;
use crate::session::SessionState;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, IntercomError>;

#[derive(Debug, Error)]
pub enum IntercomError {
    /// Capture device denied or unavailable.
    #[error("microphone unavailable: {0}")]
    MediaAccess(String),

    /// Local negotiation machinery failed (offer, commit, gathering, remote apply).
    #[error("negotiation failed: {0}")]
    Negotiation(String),

    /// Signaling endpoint answered with a non-2xx status. `body` is kept verbatim.
    #[error("server returned {status}: {body}")]
    SignalingStatus { status: u16, body: String },

    /// Signaling round trip failed before a usable answer arrived.
    #[error("signaling failed: {0}")]
    Signaling(String),

    /// Transport dropped after it had been connected.
    #[error("connection lost ({0})")]
    ConnectionLost(ConnectivityState),

    #[error("a session is already in progress ({0})")]
    SessionInProgress(SessionState),

    #[error("invalid endpoint {endpoint:?}: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    #[error("intercom controller is no longer running")]
    ControllerClosed,

    #[error("middleware returned {status}: {body}")]
    Middleware { status: u16, body: String },

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Wav(#[from] hound::Error),
}

/// Error classes reported to status observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    MediaAccess,
    Negotiation,
    Signaling,
    ConnectionLost,
}

impl IntercomError {
    /// Classification for a failed session attempt; `None` for errors that never
    /// end a session (rejections, middleware and file errors).
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Self::MediaAccess(_) => Some(ErrorKind::MediaAccess),
            Self::Negotiation(_) => Some(ErrorKind::Negotiation),
            Self::SignalingStatus { .. } | Self::Signaling(_) => Some(ErrorKind::Signaling),
            Self::ConnectionLost(_) => Some(ErrorKind::ConnectionLost),
            _ => None,
        }
    }

    pub(crate) fn negotiation(context: &str, err: impl std::fmt::Display) -> Self {
        Self::Negotiation(format!("{context}: {err}"))
    }
}
