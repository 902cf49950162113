// Fake collaborators for driving the controller without a network or a microphone.

#![allow(dead_code)]

use async_trait::async_trait;
use intercom::config::CaptureConstraints;
use intercom::media::{pcmu_track, CaptureGuard, LocalTrack, MediaAcquirer};
use intercom::peer::{
    ConnectivityReporter, ConnectivityState, PeerTransport, SdpKind, SessionDescription,
    TransportFactory,
};
use intercom::signaling::SignalingChannel;
use intercom::{Collaborators, IntercomConfig, IntercomController, IntercomError, Result};
use intercom::{SessionState, StatusEvent};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, Notify};

pub const OFFER_SDP: &str =
    "v=0\r\na=candidate:1 1 udp 2130706431 192.168.1.20 50000 typ host\r\n";
pub const ANSWER_SDP: &str = "v=0\r\ns=doorbell\r\n";

/// Ordered record of every collaborator call.
#[derive(Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<&'static str>>>);

impl CallLog {
    pub fn push(&self, call: &'static str) {
        self.0.lock().unwrap().push(call);
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self, call: &str) -> usize {
        self.0.lock().unwrap().iter().filter(|c| **c == call).count()
    }

    pub fn position(&self, call: &str) -> Option<usize> {
        self.0.lock().unwrap().iter().position(|c| *c == call)
    }
}

// ---------- media ----------

struct LoggedGuard(CallLog);

impl CaptureGuard for LoggedGuard {
    fn release(&mut self) {
        self.0.push("release");
    }
}

pub struct FakeMedia {
    log: CallLog,
    deny: bool,
    /// Held by the first acquire only.
    first_gate: Mutex<Option<Arc<Notify>>>,
}

#[async_trait]
impl MediaAcquirer for FakeMedia {
    async fn acquire(&self, constraints: &CaptureConstraints) -> Result<LocalTrack> {
        assert_eq!(*constraints, CaptureConstraints::intercom());
        self.log.push("acquire");
        let gate = self.first_gate.lock().unwrap().take();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if self.deny {
            return Err(IntercomError::MediaAccess("permission denied".into()));
        }
        Ok(LocalTrack::new(
            pcmu_track("fake"),
            Box::new(LoggedGuard(self.log.clone())),
        ))
    }
}

// ---------- transport ----------

pub struct FakeTransport {
    log: CallLog,
    reporter: ConnectivityReporter,
    gathering_gate: Option<Arc<Notify>>,
    fail_offer: bool,
    /// Report `connected` as soon as the answer is applied.
    connect_on_answer: bool,
    pub remote: Mutex<Option<SessionDescription>>,
}

impl FakeTransport {
    pub fn report(&self, state: ConnectivityState) {
        self.reporter.report(state);
    }
}

#[async_trait]
impl PeerTransport for FakeTransport {
    async fn attach_track(&self, _track: &LocalTrack) -> Result<()> {
        self.log.push("attach");
        Ok(())
    }

    async fn create_local_offer(&self) -> Result<()> {
        self.log.push("offer");
        if self.fail_offer {
            return Err(IntercomError::Negotiation("create offer: boom".into()));
        }
        Ok(())
    }

    async fn gathering_complete(&self) -> Result<()> {
        if let Some(gate) = &self.gathering_gate {
            gate.notified().await;
        }
        self.log.push("gathered");
        Ok(())
    }

    async fn local_description(&self) -> Result<SessionDescription> {
        Ok(SessionDescription::new(SdpKind::Offer, OFFER_SDP))
    }

    async fn set_remote(&self, description: SessionDescription) -> Result<()> {
        self.log.push("set_remote");
        *self.remote.lock().unwrap() = Some(description);
        if self.connect_on_answer {
            self.reporter.report(ConnectivityState::Connected);
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.log.push("close");
        Ok(())
    }
}

pub struct FakeTransports {
    log: CallLog,
    gathering_gate: Option<Arc<Notify>>,
    fail_offer: bool,
    connect_on_answer: bool,
    created: Mutex<Vec<Arc<FakeTransport>>>,
}

impl FakeTransports {
    pub fn last(&self) -> Arc<FakeTransport> {
        self.created
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("no transport created")
    }
}

#[async_trait]
impl TransportFactory for FakeTransports {
    async fn create_session(
        &self,
        reporter: ConnectivityReporter,
    ) -> Result<Arc<dyn PeerTransport>> {
        self.log.push("create");
        let transport = Arc::new(FakeTransport {
            log: self.log.clone(),
            reporter,
            gathering_gate: self.gathering_gate.clone(),
            fail_offer: self.fail_offer,
            connect_on_answer: self.connect_on_answer,
            remote: Mutex::new(None),
        });
        self.created.lock().unwrap().push(transport.clone());
        Ok(transport)
    }
}

// ---------- signaling ----------

#[derive(Clone)]
pub enum Reply {
    Answer,
    Status(u16, &'static str),
    WrongKind,
}

pub struct FakeSignaling {
    log: CallLog,
    reply: Reply,
    pub offers: Mutex<Vec<(String, SessionDescription)>>,
}

#[async_trait]
impl SignalingChannel for FakeSignaling {
    async fn exchange(
        &self,
        endpoint: &str,
        offer: &SessionDescription,
    ) -> Result<SessionDescription> {
        self.log.push("exchange");
        self.offers
            .lock()
            .unwrap()
            .push((endpoint.to_owned(), offer.clone()));
        match &self.reply {
            Reply::Answer => Ok(SessionDescription::new(SdpKind::Answer, ANSWER_SDP)),
            Reply::WrongKind => Ok(SessionDescription::new(SdpKind::Offer, ANSWER_SDP)),
            Reply::Status(status, body) => Err(IntercomError::SignalingStatus {
                status: *status,
                body: (*body).to_owned(),
            }),
        }
    }
}

// ---------- harness ----------

pub struct Harness {
    pub log: CallLog,
    pub controller: IntercomController,
    pub status: broadcast::Receiver<StatusEvent>,
    pub transports: Arc<FakeTransports>,
    pub signaling: Arc<FakeSignaling>,
}

pub struct Builder {
    config: IntercomConfig,
    deny_media: bool,
    acquire_gate: Option<Arc<Notify>>,
    gathering_gate: Option<Arc<Notify>>,
    fail_offer: bool,
    connect_on_answer: bool,
    reply: Reply,
}

impl Default for Builder {
    fn default() -> Self {
        Self {
            config: IntercomConfig::default(),
            deny_media: false,
            acquire_gate: None,
            gathering_gate: None,
            fail_offer: false,
            connect_on_answer: true,
            reply: Reply::Answer,
        }
    }
}

impl Builder {
    pub fn deny_media(mut self) -> Self {
        self.deny_media = true;
        self
    }

    pub fn hold_first_acquire(mut self, gate: Arc<Notify>) -> Self {
        self.acquire_gate = Some(gate);
        self
    }

    pub fn hold_gathering(mut self, gate: Arc<Notify>) -> Self {
        self.gathering_gate = Some(gate);
        self
    }

    pub fn fail_offer(mut self) -> Self {
        self.fail_offer = true;
        self
    }

    /// Leave connectivity reports to the test.
    pub fn manual_connectivity(mut self) -> Self {
        self.connect_on_answer = false;
        self
    }

    pub fn reply(mut self, reply: Reply) -> Self {
        self.reply = reply;
        self
    }

    pub fn gathering_timeout_secs(mut self, secs: u64) -> Self {
        self.config.gathering_timeout_secs = secs;
        self
    }

    pub fn spawn(self) -> Harness {
        let log = CallLog::default();
        let media = Arc::new(FakeMedia {
            log: log.clone(),
            deny: self.deny_media,
            first_gate: Mutex::new(self.acquire_gate),
        });
        let transports = Arc::new(FakeTransports {
            log: log.clone(),
            gathering_gate: self.gathering_gate,
            fail_offer: self.fail_offer,
            connect_on_answer: self.connect_on_answer,
            created: Mutex::new(Vec::new()),
        });
        let signaling = Arc::new(FakeSignaling {
            log: log.clone(),
            reply: self.reply,
            offers: Mutex::new(Vec::new()),
        });

        let controller = IntercomController::spawn(
            self.config,
            Collaborators {
                media,
                transports: transports.clone(),
                signaling: signaling.clone(),
            },
        );
        let status = controller.subscribe();
        Harness {
            log,
            controller,
            status,
            transports,
            signaling,
        }
    }
}

impl Harness {
    pub async fn next_event(&mut self) -> StatusEvent {
        tokio::time::timeout(Duration::from_secs(5), self.status.recv())
            .await
            .expect("timed out waiting for a status event")
            .expect("status stream closed")
    }

    /// Collect events up to and including the first one in `state`.
    pub async fn events_until(&mut self, state: SessionState) -> Vec<StatusEvent> {
        let mut events = Vec::new();
        loop {
            let ev = self.next_event().await;
            let done = ev.state == state;
            events.push(ev);
            if done {
                return events;
            }
        }
    }

    /// Nothing further is published for a while.
    pub async fn assert_quiet(&mut self) {
        let res = tokio::time::timeout(Duration::from_millis(150), self.status.recv()).await;
        assert!(res.is_err(), "unexpected status event: {:?}", res);
    }
}

pub fn states(events: &[StatusEvent]) -> Vec<SessionState> {
    events.iter().map(|e| e.state).collect()
}

/// Let spawned tasks run.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}
