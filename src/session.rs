use crate::error::ErrorKind;
use crate::media::LocalTrack;
use crate::peer::transport::PeerTransport;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Identity of one call attempt. Completions are matched against it, so a late
/// callback from a stopped attempt can never touch a newer one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(u64);

impl SessionId {
    pub fn random() -> Self {
        Self(rand::rng().random())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0.to_be_bytes()))
    }
}

/// Controller state. `Acquiring` through `Signaling` are the sub-states of starting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Acquiring,
    Negotiating,
    Gathering,
    Signaling,
    Active,
    Stopping,
    Failed,
}

impl SessionState {
    pub fn is_starting(self) -> bool {
        matches!(
            self,
            Self::Acquiring | Self::Negotiating | Self::Gathering | Self::Signaling
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Acquiring => "acquiring",
            Self::Negotiating => "negotiating",
            Self::Gathering => "gathering",
            Self::Signaling => "signaling",
            Self::Active => "active",
            Self::Stopping => "stopping",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Pushed to observers on every state transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEvent {
    pub state: SessionState,
    pub message: String,
    pub is_error: bool,
    /// Set together with `is_error`.
    pub error: Option<ErrorKind>,
    /// Attempt this event belongs to; `None` once back at rest.
    pub session: Option<SessionId>,
    pub at: DateTime<Utc>,
}

impl StatusEvent {
    pub(crate) fn progress(
        state: SessionState,
        session: Option<SessionId>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            state,
            message: message.into(),
            is_error: false,
            error: None,
            session,
            at: Utc::now(),
        }
    }

    pub(crate) fn failure(
        session: SessionId,
        kind: Option<ErrorKind>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            state: SessionState::Failed,
            message: message.into(),
            is_error: true,
            error: kind,
            session: Some(session),
            at: Utc::now(),
        }
    }
}

/// One call attempt. Owns the capture track and the transport exclusively;
/// both are given back through [`Session::take_resources`] on teardown.
pub(crate) struct Session {
    pub id: SessionId,
    pub state: SessionState,
    pub remote_endpoint: String,
    pub started_at: DateTime<Utc>,
    pub track: Option<LocalTrack>,
    pub transport: Option<Arc<dyn PeerTransport>>,
    /// The answer has been handed to the transport.
    pub remote_applied: bool,
    /// `connected` has been reported at least once.
    pub was_connected: bool,
}

impl Session {
    pub fn new(remote_endpoint: String) -> Self {
        Self {
            id: SessionId::random(),
            state: SessionState::Acquiring,
            remote_endpoint,
            started_at: Utc::now(),
            track: None,
            transport: None,
            remote_applied: false,
            was_connected: false,
        }
    }

    pub fn take_resources(&mut self) -> (Option<LocalTrack>, Option<Arc<dyn PeerTransport>>) {
        (self.track.take(), self.transport.take())
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("remote_endpoint", &self.remote_endpoint)
            .field("started_at", &self.started_at)
            .field("has_track", &self.track.is_some())
            .field("has_transport", &self.transport.is_some())
            .field("remote_applied", &self.remote_applied)
            .field("was_connected", &self.was_connected)
            .finish()
    }
}
