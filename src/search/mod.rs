use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::process;
use crate::utils::{format_ago, format_timestamp};
use crate::{Result, TubetoneError};

/// One search hit as returned to clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    pub id: String,
    pub title: String,
    pub description: String,
    pub thumbnail: Option<String>,
    pub channel_title: String,

    /// Duration in seconds
    pub duration: u64,

    /// Duration as `m:ss` / `h:mm:ss`
    pub timestamp: String,

    pub views: u64,

    /// Relative upload age, when known
    pub ago: Option<String>,
}

/// Something that turns a query into search results
#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchResult>>;
}

#[derive(Debug, Deserialize)]
struct Thumbnail {
    url: String,
}

/// Flat-playlist entry printed by `yt-dlp --flat-playlist -j`
#[derive(Debug, Deserialize)]
struct FlatEntry {
    id: Option<String>,
    title: Option<String>,
    description: Option<String>,
    duration: Option<f64>,
    channel: Option<String>,
    uploader: Option<String>,
    view_count: Option<u64>,
    timestamp: Option<i64>,
    release_timestamp: Option<i64>,
    thumbnail: Option<String>,
    #[serde(default)]
    thumbnails: Vec<Thumbnail>,
}

/// Search through yt-dlp's `ytsearch` pseudo-URL
pub struct YtDlpSearch {
    yt_dlp_path: String,
}

impl YtDlpSearch {
    pub fn new(yt_dlp_path: &str) -> Self {
        Self {
            yt_dlp_path: yt_dlp_path.to_string(),
        }
    }
}

#[async_trait]
impl SearchProvider for YtDlpSearch {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchResult>> {
        let query = query.trim();
        if query.is_empty() {
            return Err(TubetoneError::MissingQuery);
        }

        tracing::debug!("Searching for: {}", query);

        let output = process::capture(
            &self.yt_dlp_path,
            [
                format!("ytsearch{}:{}", limit, query),
                "--flat-playlist".to_string(),
                "-j".to_string(),
                "--no-warnings".to_string(),
            ],
            5,
        )
        .await?;

        if !output.exit.success() {
            return Err(TubetoneError::SearchFailed(format!(
                "{} failed with {}: {}",
                self.yt_dlp_path,
                output.exit,
                output.stderr_tail.join("\n")
            )));
        }

        let results = parse_entries(&output.stdout, Utc::now());
        tracing::debug!("{} results for: {}", results.len(), query);
        Ok(results)
    }
}

/// Parse newline-delimited flat-playlist entries, skipping unusable lines.
pub fn parse_entries(stdout: &[u8], now: DateTime<Utc>) -> Vec<SearchResult> {
    String::from_utf8_lossy(stdout)
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| match serde_json::from_str::<FlatEntry>(line) {
            Ok(entry) => to_result(entry, now),
            Err(e) => {
                tracing::debug!("Skipping unparsable search entry: {}", e);
                None
            }
        })
        .collect()
}

fn to_result(entry: FlatEntry, now: DateTime<Utc>) -> Option<SearchResult> {
    let id = entry.id?;
    let duration = crate::extractors::whole_seconds(entry.duration);

    let thumbnail = entry
        .thumbnails
        .last()
        .map(|t| t.url.clone())
        .or(entry.thumbnail)
        .or_else(|| Some(format!("https://i.ytimg.com/vi/{}/hqdefault.jpg", id)));

    let ago = entry
        .timestamp
        .or(entry.release_timestamp)
        .and_then(|ts| Utc.timestamp_opt(ts, 0).single())
        .map(|then| format_ago(then, now));

    Some(SearchResult {
        title: entry.title.unwrap_or_default(),
        description: entry.description.unwrap_or_default(),
        thumbnail,
        channel_title: entry.channel.or(entry.uploader).unwrap_or_default(),
        duration,
        timestamp: format_timestamp(duration),
        views: entry.view_count.unwrap_or(0),
        ago,
        id,
    })
}
