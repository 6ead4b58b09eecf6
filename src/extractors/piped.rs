use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use url::Url;

use super::{whole_seconds, MetadataSource, VideoMetadata, VideoRef};
use crate::{Result, TubetoneError};

/// `GET /streams/{id}` response of a Piped API instance
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PipedStreams {
    title: String,
    duration: Option<f64>,
    uploader: Option<String>,
    thumbnail_url: Option<String>,
    #[serde(default)]
    audio_streams: Vec<serde_json::Value>,
}

/// Metadata through the HTTP API of a Piped instance
pub struct PipedSource {
    client: Client,
    base_url: Url,
}

impl PipedSource {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let mut base_url = Url::parse(base_url)
            .map_err(|e| TubetoneError::MetadataFetchFailed(format!("Invalid Piped URL {}: {}", base_url, e)))?;

        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(TubetoneError::MetadataFetchFailed(
                "Piped URL must use HTTP or HTTPS protocol".to_string(),
            ));
        }

        // Url::join drops the last segment unless the path ends with a slash
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TubetoneError::MetadataFetchFailed(e.to_string()))?;

        Ok(Self { client, base_url })
    }

    /// Check whether the instance answers at all
    pub async fn probe(&self) -> bool {
        let Ok(url) = self.base_url.join("healthcheck") else {
            return false;
        };

        match self.client.get(url).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                tracing::debug!("Piped probe failed: {}", e);
                false
            }
        }
    }

    fn streams_url(&self, video: &VideoRef) -> Result<Url> {
        self.base_url
            .join(&format!("streams/{}", video.id()))
            .map_err(|e| TubetoneError::MetadataFetchFailed(e.to_string()))
    }
}

#[async_trait]
impl MetadataSource for PipedSource {
    async fn fetch(&self, video: &VideoRef) -> Result<VideoMetadata> {
        let url = self.streams_url(video)?;
        tracing::debug!("Fetching Piped streams: {}", url);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| TubetoneError::MetadataFetchFailed(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(TubetoneError::MetadataFetchFailed(format!(
                "Piped API returned HTTP {}: {}",
                status,
                crate::utils::tail_lines(&body, super::ytdlp::STDERR_TAIL_LINES)
            )));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| TubetoneError::MetadataFetchFailed(e.to_string()))?;

        parse_streams(&body)
    }

    fn name(&self) -> &'static str {
        "Piped API"
    }
}

fn parse_streams(body: &[u8]) -> Result<VideoMetadata> {
    let streams: PipedStreams = serde_json::from_slice(body)
        .map_err(|e| TubetoneError::MetadataParseFailed(e.to_string()))?;

    Ok(VideoMetadata {
        title: streams.title,
        duration_seconds: whole_seconds(streams.duration),
        author: streams.uploader.unwrap_or_default(),
        thumbnail_url: streams.thumbnail_url,
        formats: streams.audio_streams,
    })
}
