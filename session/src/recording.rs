use anyhow::{anyhow, Context, Result};
use reqwest::Url;
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use tracing::info;

/// 録画URLの受け取り先（予約システム側）
#[async_trait]
pub trait RecordingSink: Send + Sync {
    async fn submit(&self, appointment_id: &str, recording_url: &str) -> Result<()>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RecordingUpdate<'a> {
    recording_url: &'a str,
}

/// `PUT {base}/appointments/{id}/recording` で録画URLを渡す
///
/// 予約IDはパスの1セグメントとしてエスケープされる。
pub struct HttpRecordingSink {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpRecordingSink {
    pub fn new(base_url: impl AsRef<str>) -> Result<Self> {
        let base_url = base_url.as_ref();
        let base_url = Url::parse(base_url)
            .with_context(|| format!("Invalid recording sink URL: {}", base_url))?;
        if base_url.cannot_be_a_base() {
            return Err(anyhow!("Recording sink URL cannot have a path: {}", base_url));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { client, base_url })
    }

    fn endpoint(&self, appointment_id: &str) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow!("Recording sink URL cannot have a path: {}", self.base_url))?
            .pop_if_empty()
            .extend(["appointments", appointment_id, "recording"]);
        Ok(url)
    }
}

#[async_trait]
impl RecordingSink for HttpRecordingSink {
    async fn submit(&self, appointment_id: &str, recording_url: &str) -> Result<()> {
        let endpoint = self.endpoint(appointment_id)?;
        self.client
            .put(endpoint.clone())
            .json(&RecordingUpdate { recording_url })
            .send()
            .await
            .with_context(|| format!("Failed to send recording URL to {}", endpoint))?
            .error_for_status()
            .with_context(|| format!("Recording URL rejected by {}", endpoint))?;

        info!("Recording URL submitted for appointment {}", appointment_id);
        Ok(())
    }
}
