//! Client for the doorbell middleware's housekeeping endpoints.

use crate::error::{IntercomError, Result};
use crate::utils::{endpoint_url, normalize_endpoint};
use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;
use std::time::Duration;
use tracing::{error, info};

pub const HEALTH_PATH: &str = "/healthz";
pub const ABORT_PATH: &str = "/api/abort";
pub const PLAY_FILE_PATH: &str = "/api/audio/play-file";

#[derive(Debug, Clone)]
pub struct MiddlewareClient {
    base: String,
    client: reqwest::Client,
}

impl MiddlewareClient {
    pub fn new(server_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base: normalize_endpoint(server_url)?,
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base
    }

    /// `true` when the server answers its health probe with 200.
    pub async fn health_check(&self) -> Result<bool> {
        let response = self
            .client
            .get(endpoint_url(&self.base, HEALTH_PATH))
            .send()
            .await
            .map_err(|e| {
                error!("error connecting to server: {e}");
                e
            })?;
        Ok(response.status() == StatusCode::OK)
    }

    /// Cancel play-file jobs and close every WebRTC session on the server.
    pub async fn abort_operations(&self) -> Result<()> {
        let response = self
            .client
            .post(endpoint_url(&self.base, ABORT_PATH))
            .send()
            .await?;
        expect_ok(response, "abort operations").await?;
        info!("all operations aborted");
        Ok(())
    }

    /// Upload an audio clip for the doorbell speaker.
    pub async fn play_file(&self, audio: Vec<u8>) -> Result<()> {
        let part = Part::bytes(audio)
            .file_name("audio_file")
            .mime_str("application/octet-stream")?;
        let form = Form::new().part("audio", part);

        let response = self
            .client
            .post(endpoint_url(&self.base, PLAY_FILE_PATH))
            .multipart(form)
            .send()
            .await?;
        expect_ok(response, "send audio file").await?;
        info!("audio file sent");
        Ok(())
    }
}

async fn expect_ok(response: reqwest::Response, what: &str) -> Result<()> {
    let status = response.status();
    if status == StatusCode::OK {
        return Ok(());
    }
    let body = response.text().await.unwrap_or_default();
    error!("failed to {what}: {} - {body}", status.as_u16());
    Err(IntercomError::Middleware {
        status: status.as_u16(),
        body,
    })
}
