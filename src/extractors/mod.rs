use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use url::Url;

pub mod piped;
pub mod ytdlp;

pub use piped::PipedSource;
pub use ytdlp::YtDlpSource;

use crate::config::Config;
use crate::{Result, TubetoneError};

/// Longest video id accepted from a request path
const MAX_VIDEO_ID_LEN: usize = 64;

/// A platform video id together with its canonical watch URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoRef {
    id: String,
    url: Url,
}

impl VideoRef {
    /// Validate an id and derive its watch URL.
    ///
    /// Ids are restricted to `[A-Za-z0-9_-]` so they can never be read as an
    /// option by the extraction program.
    pub fn new(id: &str) -> Result<Self> {
        let valid = !id.is_empty()
            && id.len() <= MAX_VIDEO_ID_LEN
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(TubetoneError::InvalidVideoId(id.to_string()));
        }

        let mut url = Url::parse("https://www.youtube.com/watch")
            .map_err(|e| TubetoneError::InvalidVideoId(e.to_string()))?;
        url.query_pairs_mut().append_pair("v", id);

        Ok(Self {
            id: id.to_string(),
            url,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn url(&self) -> &str {
        self.url.as_str()
    }
}

/// Metadata for a single video
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoMetadata {
    pub title: String,

    /// Duration in whole seconds, 0 when unknown (live streams)
    pub duration_seconds: u64,

    pub author: String,

    pub thumbnail_url: Option<String>,

    /// Format descriptors passed through as reported by the source
    pub formats: Vec<serde_json::Value>,
}

/// Capability to fetch metadata for a video
#[async_trait]
pub trait MetadataSource: Send + Sync {
    /// Fetch metadata in a single round-trip
    async fn fetch(&self, video: &VideoRef) -> Result<VideoMetadata>;

    /// Name used in logs
    fn name(&self) -> &'static str;
}

/// Pick the metadata source once at startup.
///
/// A configured Piped API wins when it answers the probe; otherwise metadata
/// comes from running the extraction program directly.
pub async fn select_source(config: &Config) -> Arc<dyn MetadataSource> {
    let direct = YtDlpSource::new(&config.tools.ytdlp_path);

    if let Some(base_url) = &config.tools.piped_url {
        match PipedSource::new(base_url, config.tools.probe_timeout()) {
            Ok(piped) if piped.probe().await => {
                tracing::info!("Using Piped API at {} for metadata", base_url);
                return Arc::new(piped);
            }
            Ok(_) => tracing::warn!("Piped API at {} is unreachable, falling back to {}", base_url, direct.name()),
            Err(e) => tracing::warn!("Ignoring Piped API: {}", e),
        }
    }

    tracing::info!("Using {} for metadata", config.tools.ytdlp_path);
    Arc::new(direct)
}

/// Convert a fractional duration into whole seconds
pub(crate) fn whole_seconds(duration: Option<f64>) -> u64 {
    match duration {
        Some(d) if d.is_finite() && d > 0.0 => d.round() as u64,
        _ => 0,
    }
}
