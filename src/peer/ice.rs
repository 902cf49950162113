use crate::error::{IntercomError, Result};
use crate::peer::transport::PeerTransport;
use crate::peer::types::SessionDescription;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{info, warn};

/// Candidate counts by type, taken from the `a=candidate` lines of a description.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CandidateSummary {
    pub host: usize,
    pub srflx: usize,
    pub relay: usize,
}

impl CandidateSummary {
    pub fn total(&self) -> usize {
        self.host + self.srflx + self.relay
    }
}

/// Wait for gathering to finish, then hand back the fully resolved local description.
///
/// The signaling channel is one request/response with no way to trickle
/// candidates afterwards, so nothing may be sent before gathering is complete.
pub async fn wait_for_gathering(
    transport: &dyn PeerTransport,
    limit: Duration,
) -> Result<SessionDescription> {
    match timeout(limit, transport.gathering_complete()).await {
        Ok(res) => res?,
        Err(_) => {
            return Err(IntercomError::Negotiation(format!(
                "ICE gathering did not complete within {}s",
                limit.as_secs()
            )))
        }
    }

    let local = transport.local_description().await?;
    analyze_candidates(&local);
    Ok(local)
}

pub fn summarize_candidates(desc: &SessionDescription) -> CandidateSummary {
    let mut summary = CandidateSummary::default();
    for line in desc.sdp.lines() {
        let Some(cand) = line.trim().strip_prefix("a=candidate:") else {
            continue;
        };
        if cand.contains("typ host") {
            summary.host += 1;
        } else if cand.contains("typ srflx") {
            summary.srflx += 1;
        } else if cand.contains("typ relay") {
            summary.relay += 1;
        }
    }
    summary
}

pub fn analyze_candidates(desc: &SessionDescription) {
    let summary = summarize_candidates(desc);
    info!(
        host = summary.host,
        srflx = summary.srflx,
        relay = summary.relay,
        "gathered local candidates"
    );

    // local network only: without a host candidate the doorbell cannot reach us
    if summary.host == 0 {
        warn!("no host candidates gathered, the peer will not be able to connect");
    }
}
