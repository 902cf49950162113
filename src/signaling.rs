use crate::config::OFFER_PATH;
use crate::error::{IntercomError, Result};
use crate::peer::types::SessionDescription;
use crate::utils::endpoint_url;
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, info, warn};

/// One-shot hand-off of the local description for the remote one.
#[async_trait]
pub trait SignalingChannel: Send + Sync {
    async fn exchange(
        &self,
        endpoint: &str,
        offer: &SessionDescription,
    ) -> Result<SessionDescription>;
}

/// `POST {endpoint}/api/webrtc/offer` with the offer as JSON. No retries.
#[derive(Debug, Clone)]
pub struct HttpSignaling {
    client: reqwest::Client,
}

impl HttpSignaling {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SignalingChannel for HttpSignaling {
    async fn exchange(
        &self,
        endpoint: &str,
        offer: &SessionDescription,
    ) -> Result<SessionDescription> {
        let url = endpoint_url(endpoint, OFFER_PATH);
        debug!(%url, sdp_len = offer.sdp.len(), "posting offer");

        let response = self
            .client
            .post(&url)
            .json(offer)
            .send()
            .await
            .map_err(|e| IntercomError::Signaling(format!("POST {url}: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| IntercomError::Signaling(format!("reading answer body: {e}")))?;

        if !status.is_success() {
            warn!(status = status.as_u16(), %body, "signaling rejected the offer");
            return Err(IntercomError::SignalingStatus {
                status: status.as_u16(),
                body,
            });
        }

        let answer: SessionDescription = serde_json::from_str(&body)
            .map_err(|e| IntercomError::Signaling(format!("malformed answer: {e}")))?;
        info!(kind = ?answer.kind, sdp_len = answer.sdp.len(), "received remote description");
        Ok(answer)
    }
}
