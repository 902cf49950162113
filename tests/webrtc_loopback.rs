// The real WebRTC transport against a plain webrtc-rs answerer on this host.

use intercom::config::CaptureConstraints;
use intercom::media::{
    pcmu_parameters, DeviceAcquirer, DiscardPlayout, MediaAcquirer, SilenceDevice,
};
use intercom::peer::ice::{summarize_candidates, wait_for_gathering};
use intercom::peer::{
    ConnectivityReporter, ConnectivityState, PeerTransport, SdpKind, SessionDescription,
    TransportFactory, WebRtcTransportFactory,
};
use intercom::IntercomError;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::setting_engine::SettingEngine;
use webrtc::api::APIBuilder;
use webrtc::ice::network_type::NetworkType;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;

const LIMIT: Duration = Duration::from_secs(10);

fn factory() -> WebRtcTransportFactory {
    WebRtcTransportFactory::new(Arc::new(DiscardPlayout))
}

fn reporter() -> (ConnectivityReporter, UnboundedReceiver<ConnectivityState>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let reporter = ConnectivityReporter::new(move |state| {
        let _ = tx.send(state);
    });
    (reporter, rx)
}

/// Stand-in for the doorbell: a bare peer connection that answers PCMU offers.
async fn doorbell() -> Arc<RTCPeerConnection> {
    let mut media_engine = MediaEngine::default();
    media_engine
        .register_codec(pcmu_parameters(), RTPCodecType::Audio)
        .unwrap();
    let registry = register_default_interceptors(Registry::new(), &mut media_engine).unwrap();
    let mut settings = SettingEngine::default();
    settings.set_network_types(vec![NetworkType::Udp4]);

    let api = APIBuilder::new()
        .with_setting_engine(settings)
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .build();
    Arc::new(
        api.new_peer_connection(RTCConfiguration::default())
            .await
            .unwrap(),
    )
}

async fn answer(pc: &RTCPeerConnection, offer: &SessionDescription) -> SessionDescription {
    let offer = RTCSessionDescription::offer(offer.sdp.clone()).unwrap();
    pc.set_remote_description(offer).await.unwrap();

    let answer = pc.create_answer(None).await.unwrap();
    let mut gathered = pc.gathering_complete_promise().await;
    pc.set_local_description(answer).await.unwrap();
    let _ = gathered.recv().await;

    let local = pc.local_description().await.unwrap();
    SessionDescription::try_from(local).unwrap()
}

async fn wait_for_state(
    rx: &mut UnboundedReceiver<ConnectivityState>,
    wanted: ConnectivityState,
) -> Vec<ConnectivityState> {
    let mut seen = Vec::new();
    let res = tokio::time::timeout(LIMIT, async {
        while let Some(state) = rx.recv().await {
            seen.push(state);
            if state == wanted {
                return true;
            }
        }
        false
    })
    .await;
    assert!(matches!(res, Ok(true)), "never reached {wanted}, saw {seen:?}");
    seen
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn offer_carries_host_candidates_and_connects() {
    let acquirer = DeviceAcquirer::new(Arc::new(SilenceDevice));
    let track = acquirer
        .acquire(&CaptureConstraints::intercom())
        .await
        .unwrap();

    let (reporter, mut states) = reporter();
    let transport = factory().create_session(reporter).await.unwrap();
    transport.attach_track(&track).await.unwrap();
    transport.create_local_offer().await.unwrap();

    let offer = wait_for_gathering(transport.as_ref(), LIMIT).await.unwrap();
    assert_eq!(offer.kind, SdpKind::Offer);
    assert!(offer.sdp.contains("m=audio"), "{}", offer.sdp);
    assert!(offer.sdp.contains("a=rtpmap:0 PCMU/8000"), "{}", offer.sdp);
    assert!(!offer.sdp.to_lowercase().contains("opus"), "{}", offer.sdp);
    let candidates = summarize_candidates(&offer);
    assert!(candidates.host > 0, "no host candidates in {}", offer.sdp);
    assert_eq!(candidates.relay, 0);

    let doorbell = doorbell().await;
    let answer = answer(&doorbell, &offer).await;
    assert_eq!(answer.kind, SdpKind::Answer);
    transport.set_remote(answer).await.unwrap();

    let seen = wait_for_state(&mut states, ConnectivityState::Connected).await;
    assert!(seen.iter().all(|s| !s.is_terminal()), "{seen:?}");

    track.release();
    transport.close().await.unwrap();
    doorbell.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn gathering_before_offer_is_an_error() {
    let (reporter, _states) = reporter();
    let transport = factory().create_session(reporter).await.unwrap();

    let err = transport.gathering_complete().await.unwrap_err();
    assert!(matches!(err, IntercomError::Negotiation(_)), "{err:?}");
    transport.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn malformed_answer_is_rejected() {
    let acquirer = DeviceAcquirer::new(Arc::new(SilenceDevice));
    let track = acquirer
        .acquire(&CaptureConstraints::intercom())
        .await
        .unwrap();

    let (reporter, _states) = reporter();
    let transport = factory().create_session(reporter).await.unwrap();
    transport.attach_track(&track).await.unwrap();
    transport.create_local_offer().await.unwrap();
    wait_for_gathering(transport.as_ref(), LIMIT).await.unwrap();

    let err = transport
        .set_remote(SessionDescription::new(SdpKind::Answer, "not sdp"))
        .await
        .unwrap_err();
    assert!(matches!(err, IntercomError::Negotiation(_)), "{err:?}");

    track.release();
    transport.close().await.unwrap();
}
