//! Audio session controller.
//!
//! One task owns the (at most one) live [`Session`] and processes commands one
//! at a time. The slow steps (microphone acquisition, candidate gathering and
//! the signaling round trip) run as separate futures and post their result
//! back tagged with the session id. A result is applied only while that
//! session is still live and still in the state waiting for it; anything else
//! is stale and is dropped, after releasing whatever resource it carries.

use crate::config::{CaptureConstraints, IntercomConfig};
use crate::error::{IntercomError, Result};
use crate::media::{AudioPlayout, CaptureDevice, DeviceAcquirer, LocalTrack, MediaAcquirer};
use crate::peer::connection::WebRtcTransportFactory;
use crate::peer::ice::wait_for_gathering;
use crate::peer::transport::{ConnectivityReporter, PeerTransport, TransportFactory};
use crate::peer::types::{ConnectivityState, SdpKind, SessionDescription};
use crate::session::{Session, SessionId, SessionState, StatusEvent};
use crate::signaling::{HttpSignaling, SignalingChannel};
use crate::utils::normalize_endpoint;
use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::SendError, UnboundedReceiver, WeakUnboundedSender};
use tokio::sync::{broadcast, oneshot, watch};
use tracing::{debug, info, trace, warn};

/// Status message once the call is up.
const CONNECTED: &str = "Connected - speaking";

/// Everything the controller drives.
#[derive(Clone)]
pub struct Collaborators {
    pub media: Arc<dyn MediaAcquirer>,
    pub transports: Arc<dyn TransportFactory>,
    pub signaling: Arc<dyn SignalingChannel>,
}

impl Collaborators {
    /// WebRTC transport and HTTP signaling around the given capture device and play-out.
    pub fn webrtc(
        config: &IntercomConfig,
        device: Arc<dyn CaptureDevice>,
        playout: Arc<dyn AudioPlayout>,
    ) -> Result<Self> {
        Ok(Self {
            media: Arc::new(DeviceAcquirer::new(device)),
            transports: Arc::new(WebRtcTransportFactory::new(playout)),
            signaling: Arc::new(HttpSignaling::new(config.request_timeout())?),
        })
    }
}

// ========== PUBLIC HANDLE ==========

/// Handle to a running controller. Cheap to clone; the controller task ends
/// (tearing down any live session) once every handle is gone.
#[derive(Clone)]
pub struct IntercomController {
    commands: mpsc::UnboundedSender<Command>,
    status: broadcast::Sender<StatusEvent>,
    state: watch::Receiver<SessionState>,
}

impl IntercomController {
    /// Spawn the controller task. Must be called inside a tokio runtime.
    pub fn spawn(config: IntercomConfig, parts: Collaborators) -> Self {
        let (commands, rx) = mpsc::unbounded_channel();
        let (status, _) = broadcast::channel(config.status_buffer.max(1));
        let (state_tx, state) = watch::channel(SessionState::Idle);

        let controller = Controller {
            config,
            parts,
            session: None,
            commands: commands.downgrade(),
            status: status.clone(),
            state: state_tx,
        };
        tokio::spawn(controller.run(rx));

        Self {
            commands,
            status,
            state,
        }
    }

    /// Begin a session with the peer at `remote_endpoint`.
    ///
    /// Returns once the attempt is accepted; progress and the outcome arrive
    /// on the status stream. Rejected without side effects while another
    /// session exists.
    pub async fn start(&self, remote_endpoint: &str) -> Result<SessionId> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Start {
            endpoint: remote_endpoint.to_owned(),
            reply,
        })?;
        rx.await.map_err(|_| IntercomError::ControllerClosed)?
    }

    /// Tear down the current session, if any. Resolves after teardown.
    pub async fn stop(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Stop { reply })?;
        rx.await.map_err(|_| IntercomError::ControllerClosed)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.status.subscribe()
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// A session is established (`Active`).
    pub fn is_active(&self) -> bool {
        self.state() == SessionState::Active
    }

    /// Watch channel over the controller state.
    pub fn state_changes(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    fn send(&self, cmd: Command) -> Result<()> {
        self.commands
            .send(cmd)
            .map_err(|_| IntercomError::ControllerClosed)
    }
}

// ========== CONTROLLER TASK ==========

enum Command {
    Start {
        endpoint: String,
        reply: oneshot::Sender<Result<SessionId>>,
    },
    Stop {
        reply: oneshot::Sender<()>,
    },
    Step {
        session: SessionId,
        step: Step,
    },
    Connectivity {
        session: SessionId,
        state: ConnectivityState,
    },
}

/// Completion of a suspended step.
enum Step {
    Acquired(Result<LocalTrack>),
    Gathered(Result<SessionDescription>),
    Answered(Result<SessionDescription>),
}

impl Step {
    /// State the session has to be in for this completion to apply.
    fn awaited_in(&self) -> SessionState {
        match self {
            Self::Acquired(_) => SessionState::Acquiring,
            Self::Gathered(_) => SessionState::Gathering,
            Self::Answered(_) => SessionState::Signaling,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::Acquired(_) => "acquire",
            Self::Gathered(_) => "gathering",
            Self::Answered(_) => "signaling",
        }
    }

    /// Drop a stale completion without leaking what it carries.
    fn discard(self) {
        if let Self::Acquired(Ok(track)) = self {
            track.release();
        }
    }
}

struct Controller {
    config: IntercomConfig,
    parts: Collaborators,
    session: Option<Session>,
    commands: WeakUnboundedSender<Command>,
    status: broadcast::Sender<StatusEvent>,
    state: watch::Sender<SessionState>,
}

impl Controller {
    async fn run(mut self, mut rx: UnboundedReceiver<Command>) {
        while let Some(cmd) = rx.recv().await {
            match cmd {
                Command::Start { endpoint, reply } => {
                    let _ = reply.send(self.start(endpoint));
                }
                Command::Stop { reply } => {
                    self.stop().await;
                    let _ = reply.send(());
                }
                Command::Step { session, step } => self.on_step(session, step).await,
                Command::Connectivity { session, state } => {
                    self.on_connectivity(session, state).await
                }
            }
        }

        // every handle is gone
        self.stop().await;
        debug!("intercom controller finished");
    }

    fn start(&mut self, endpoint: String) -> Result<SessionId> {
        if let Some(current) = &self.session {
            debug!(session = %current.id, state = %current.state, "start rejected");
            return Err(IntercomError::SessionInProgress(current.state));
        }
        let endpoint = normalize_endpoint(&endpoint)?;

        let session = Session::new(endpoint);
        let id = session.id;
        info!(session = %id, endpoint = %session.remote_endpoint, "starting intercom session");
        self.session = Some(session);
        self.transition(SessionState::Acquiring, "Requesting microphone access");

        let media = self.parts.media.clone();
        self.spawn_step(id, async move {
            Step::Acquired(media.acquire(&CaptureConstraints::intercom()).await)
        });
        Ok(id)
    }

    async fn stop(&mut self) {
        let Some(id) = self.session.as_ref().map(|s| s.id) else {
            return;
        };
        info!(session = %id, "stopping intercom session");
        self.transition(SessionState::Stopping, "Stopping");
        self.teardown().await;
        self.rest("Disconnected");
    }

    async fn on_step(&mut self, id: SessionId, step: Step) {
        let live = matches!(&self.session, Some(s) if s.id == id && s.state == step.awaited_in());
        if !live {
            debug!(session = %id, step = step.name(), "ignoring stale completion");
            step.discard();
            return;
        }

        match step {
            Step::Acquired(Ok(track)) => {
                if let Some(session) = self.session.as_mut() {
                    session.track = Some(track);
                }
                self.transition(SessionState::Negotiating, "Setting up connection");
                match self.negotiate(id).await {
                    Ok(transport) => self.begin_gathering(id, transport),
                    Err(e) => self.fail(id, e).await,
                }
            }
            Step::Gathered(Ok(local)) => self.begin_signaling(id, local),
            Step::Answered(Ok(answer)) => match self.complete(id, answer).await {
                Ok(()) => {
                    let Some(session) = self.session.as_mut() else {
                        return;
                    };
                    session.remote_applied = true;
                    if session.was_connected {
                        self.transition(SessionState::Active, CONNECTED);
                    } else {
                        debug!(session = %id, "answer applied, waiting for connectivity");
                    }
                }
                Err(e) => self.fail(id, e).await,
            },
            Step::Acquired(Err(e)) | Step::Gathered(Err(e)) | Step::Answered(Err(e)) => {
                self.fail(id, e).await
            }
        }
    }

    /// Create the transport, attach the microphone and commit the local offer.
    async fn negotiate(&mut self, id: SessionId) -> Result<Arc<dyn PeerTransport>> {
        let reporter = self.reporter(id);
        let transport = self.parts.transports.create_session(reporter).await?;

        let session = self
            .session
            .as_mut()
            .ok_or_else(|| IntercomError::Negotiation("session vanished".into()))?;
        // stored before anything else can fail so teardown closes it
        session.transport = Some(transport.clone());

        let track = session
            .track
            .as_ref()
            .ok_or_else(|| IntercomError::Negotiation("no local track".into()))?;
        transport.attach_track(track).await?;
        transport.create_local_offer().await?;
        Ok(transport)
    }

    fn begin_gathering(&mut self, id: SessionId, transport: Arc<dyn PeerTransport>) {
        self.transition(SessionState::Gathering, "Gathering connection candidates");
        let limit = self.config.gathering_timeout();
        self.spawn_step(id, async move {
            Step::Gathered(wait_for_gathering(transport.as_ref(), limit).await)
        });
    }

    fn begin_signaling(&mut self, id: SessionId, local: SessionDescription) {
        let Some(endpoint) = self.session.as_ref().map(|s| s.remote_endpoint.clone()) else {
            return;
        };
        self.transition(SessionState::Signaling, "Connecting to server");
        let signaling = self.parts.signaling.clone();
        self.spawn_step(id, async move {
            Step::Answered(signaling.exchange(&endpoint, &local).await)
        });
    }

    /// Hand the answer to the transport.
    async fn complete(&mut self, id: SessionId, answer: SessionDescription) -> Result<()> {
        if answer.kind != SdpKind::Answer {
            return Err(IntercomError::Signaling(format!(
                "expected an answer, got {:?}",
                answer.kind
            )));
        }
        let transport = self
            .session
            .as_ref()
            .filter(|s| s.id == id)
            .and_then(|s| s.transport.clone())
            .ok_or_else(|| IntercomError::Negotiation("no transport".into()))?;
        transport.set_remote(answer).await
    }

    async fn on_connectivity(&mut self, id: SessionId, state: ConnectivityState) {
        let Some(session) = self.session.as_mut().filter(|s| s.id == id) else {
            trace!(session = %id, %state, "connectivity change for a finished session");
            return;
        };

        match state {
            ConnectivityState::New => {}
            ConnectivityState::Checking => debug!(session = %id, "checking connectivity"),
            ConnectivityState::Connected => {
                if session.was_connected {
                    return;
                }
                session.was_connected = true;
                info!(session = %id, "transport connected");
                // Active needs both the applied answer and connectivity, in either order
                if session.state == SessionState::Signaling && session.remote_applied {
                    self.transition(SessionState::Active, CONNECTED);
                }
            }
            lost => {
                // before the first `connected` this is still a negotiation failure
                let err = if session.was_connected {
                    IntercomError::ConnectionLost(lost)
                } else {
                    IntercomError::Negotiation(format!("transport {lost} before connecting"))
                };
                self.fail(id, err).await;
            }
        }
    }

    /// Report `err` once, tear down and return to idle.
    async fn fail(&mut self, id: SessionId, err: IntercomError) {
        let Some(session) = self.session.as_mut().filter(|s| s.id == id) else {
            return;
        };
        warn!(session = %id, state = %session.state, "session failed: {err}");
        session.state = SessionState::Failed;
        self.state.send_replace(SessionState::Failed);
        self.emit(StatusEvent::failure(id, err.kind(), err.to_string()));

        self.teardown().await;
        self.rest("Ready");
    }

    /// Close the transport and release the microphone. Idempotent.
    async fn teardown(&mut self) {
        let Some(mut session) = self.session.take() else {
            return;
        };
        let (track, transport) = session.take_resources();
        if let Some(transport) = transport {
            if let Err(e) = transport.close().await {
                warn!(session = %session.id, "closing transport: {e}");
            }
        }
        if let Some(track) = track {
            track.release();
        }
        let lasted = Utc::now() - session.started_at;
        info!(
            session = %session.id,
            lasted_ms = lasted.num_milliseconds(),
            "session torn down"
        );
    }

    fn transition(&mut self, state: SessionState, message: &str) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        session.state = state;
        let id = session.id;
        self.state.send_replace(state);
        self.emit(StatusEvent::progress(state, Some(id), message));
    }

    fn rest(&mut self, message: &str) {
        self.state.send_replace(SessionState::Idle);
        self.emit(StatusEvent::progress(SessionState::Idle, None, message));
    }

    fn emit(&self, event: StatusEvent) {
        info!(state = %event.state, is_error = event.is_error, "{}", event.message);
        // no subscribers is fine
        let _ = self.status.send(event);
    }

    fn reporter(&self, id: SessionId) -> ConnectivityReporter {
        let commands = self.commands.clone();
        ConnectivityReporter::new(move |state| {
            if let Some(tx) = commands.upgrade() {
                let _ = tx.send(Command::Connectivity { session: id, state });
            }
        })
    }

    fn spawn_step<F>(&self, id: SessionId, work: F)
    where
        F: Future<Output = Step> + Send + 'static,
    {
        let Some(commands) = self.commands.upgrade() else {
            return;
        };
        tokio::spawn(async move {
            let step = work.await;
            if let Err(SendError(Command::Step { step, .. })) =
                commands.send(Command::Step { session: id, step })
            {
                step.discard();
            }
        });
    }
}
