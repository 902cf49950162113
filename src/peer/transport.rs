use crate::error::Result;
use crate::media::LocalTrack;
use crate::peer::types::{ConnectivityState, SessionDescription};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// Sink for connectivity notifications of one transport.
#[derive(Clone)]
pub struct ConnectivityReporter {
    notify: Arc<dyn Fn(ConnectivityState) + Send + Sync>,
}

impl ConnectivityReporter {
    pub fn new(notify: impl Fn(ConnectivityState) + Send + Sync + 'static) -> Self {
        Self {
            notify: Arc::new(notify),
        }
    }

    pub fn report(&self, state: ConnectivityState) {
        (self.notify)(state)
    }
}

impl fmt::Debug for ConnectivityReporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ConnectivityReporter")
    }
}

/// Creates one peer transport per session.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    /// New transport with no relay or reflection servers. Every connectivity
    /// change for its whole lifetime goes to `reporter`.
    async fn create_session(
        &self,
        reporter: ConnectivityReporter,
    ) -> Result<Arc<dyn PeerTransport>>;
}

/// A single negotiated media transport.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    async fn attach_track(&self, track: &LocalTrack) -> Result<()>;

    /// Create an offer and commit it as the local description. Candidate
    /// gathering starts here.
    async fn create_local_offer(&self) -> Result<()>;

    /// Resolves once gathering has reached `complete`.
    async fn gathering_complete(&self) -> Result<()>;

    /// Local description including every gathered candidate.
    async fn local_description(&self) -> Result<SessionDescription>;

    async fn set_remote(&self, description: SessionDescription) -> Result<()>;

    async fn close(&self) -> Result<()>;
}
