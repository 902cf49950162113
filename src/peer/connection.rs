use crate::error::{IntercomError, Result};
use crate::logger::{dump_candidate, dump_selected_pair};
use crate::media::playout::AudioPlayout;
use crate::media::{pcmu_parameters, LocalTrack};
use crate::peer::transport::{ConnectivityReporter, PeerTransport, TransportFactory};
use crate::peer::types::{ConnectivityState, SessionDescription};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, trace};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::setting_engine::SettingEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::ice::network_type::NetworkType;
use webrtc::ice_transport::ice_candidate::RTCIceCandidate;
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_gatherer_state::RTCIceGathererState;
use webrtc::ice_transport::ice_gathering_state::RTCIceGatheringState;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

/// Builds WebRTC peer connections restricted to the local network.
pub struct WebRtcTransportFactory {
    playout: Arc<dyn AudioPlayout>,
}

impl WebRtcTransportFactory {
    pub fn new(playout: Arc<dyn AudioPlayout>) -> Self {
        Self { playout }
    }
}

#[async_trait]
impl TransportFactory for WebRtcTransportFactory {
    async fn create_session(
        &self,
        reporter: ConnectivityReporter,
    ) -> Result<Arc<dyn PeerTransport>> {
        let api = build_api()?;
        let pc = Arc::new(
            api.new_peer_connection(rtc_config())
                .await
                .map_err(|e| IntercomError::negotiation("create peer connection", e))?,
        );

        pc.on_ice_candidate(Box::new(move |cand: Option<RTCIceCandidate>| {
            Box::pin(async move {
                match cand {
                    Some(c) => dump_candidate("LOCAL", &c),
                    // None marks the end of gathering
                    None => debug!("end of local candidates"),
                }
            })
        }));

        pc.on_ice_gathering_state_change(Box::new(move |state: RTCIceGathererState| {
            debug!(?state, "ICE gathering state changed");
            Box::pin(async {})
        }));

        let pc_stats = Arc::downgrade(&pc);
        pc.on_ice_connection_state_change(Box::new(move |st: RTCIceConnectionState| {
            info!(state = ?st, "ICE connection state changed");
            let state = ConnectivityState::from(st);
            if matches!(state, ConnectivityState::Disconnected | ConnectivityState::Failed) {
                if let Some(pc) = pc_stats.upgrade() {
                    tokio::spawn(async move {
                        dump_selected_pair(&pc, "BEFORE-FAIL").await;
                    });
                }
            }
            reporter.report(state);
            Box::pin(async {})
        }));

        let playout = self.playout.clone();
        pc.on_track(Box::new(
            move |track: Arc<TrackRemote>, _: Arc<RTCRtpReceiver>, _: Arc<RTCRtpTransceiver>| {
                info!(kind = %track.kind(), ssrc = track.ssrc(), "received remote track");
                if track.kind() == RTPCodecType::Audio {
                    playout.play(track);
                }
                Box::pin(async {})
            },
        ));

        Ok(Arc::new(WebRtcTransport {
            pc,
            gathering: Mutex::new(None),
        }))
    }
}

/// API with a narrowband audio-only media engine: the doorbell speaks G.711 mu-law.
fn build_api() -> Result<API> {
    let mut media_engine = MediaEngine::default();
    media_engine
        .register_codec(pcmu_parameters(), RTPCodecType::Audio)
        .map_err(|e| IntercomError::negotiation("register PCMU codec", e))?;

    let registry = register_default_interceptors(Registry::new(), &mut media_engine)
        .map_err(|e| IntercomError::negotiation("register interceptors", e))?;

    // doorbells sit on the IPv4 LAN
    let mut settings = SettingEngine::default();
    settings.set_network_types(vec![NetworkType::Udp4]);

    Ok(APIBuilder::new()
        .with_setting_engine(settings)
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .build())
}

/// No STUN/TURN: reachability is local network only.
fn rtc_config() -> RTCConfiguration {
    RTCConfiguration {
        ice_servers: vec![],
        ..Default::default()
    }
}

pub struct WebRtcTransport {
    pc: Arc<RTCPeerConnection>,
    gathering: Mutex<Option<mpsc::Receiver<()>>>,
}

#[async_trait]
impl PeerTransport for WebRtcTransport {
    async fn attach_track(&self, track: &LocalTrack) -> Result<()> {
        let sender = self
            .pc
            .add_track(track.rtp_track() as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(|e| IntercomError::negotiation("attach local audio track", e))?;

        // RTCP has to be drained for the interceptors to keep working
        tokio::spawn(async move {
            let mut rtcp_buf = vec![0u8; 1500];
            while sender.read(&mut rtcp_buf).await.is_ok() {}
            trace!("RTCP reader for local track finished");
        });
        Ok(())
    }

    async fn create_local_offer(&self) -> Result<()> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(|e| IntercomError::negotiation("create offer", e))?;

        // subscribe before committing, otherwise a fast gather is missed
        let done = self.pc.gathering_complete_promise().await;
        *self.gathering.lock().await = Some(done);

        self.pc
            .set_local_description(offer)
            .await
            .map_err(|e| IntercomError::negotiation("set local description", e))
    }

    async fn gathering_complete(&self) -> Result<()> {
        let done = self.gathering.lock().await.take();
        let Some(mut done) = done else {
            return Err(IntercomError::Negotiation(
                "gathering was never started".into(),
            ));
        };
        // the sender is dropped on completion and on close alike
        let _ = done.recv().await;

        match self.pc.ice_gathering_state() {
            RTCIceGatheringState::Complete => Ok(()),
            other => Err(IntercomError::Negotiation(format!(
                "ICE gathering ended in state {other:?}"
            ))),
        }
    }

    async fn local_description(&self) -> Result<SessionDescription> {
        let desc = self
            .pc
            .local_description()
            .await
            .ok_or_else(|| IntercomError::Negotiation("no local description".into()))?;
        SessionDescription::try_from(desc)
    }

    async fn set_remote(&self, description: SessionDescription) -> Result<()> {
        let desc = RTCSessionDescription::try_from(description)?;
        self.pc
            .set_remote_description(desc)
            .await
            .map_err(|e| IntercomError::negotiation("set remote description", e))
    }

    async fn close(&self) -> Result<()> {
        self.pc
            .close()
            .await
            .map_err(|e| IntercomError::negotiation("close peer connection", e))
    }
}
