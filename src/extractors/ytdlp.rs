use async_trait::async_trait;
use serde::Deserialize;

use super::{whole_seconds, MetadataSource, VideoMetadata, VideoRef};
use crate::process::{self, Input, ProcessHandle};
use crate::{Result, TubetoneError};

/// Lines of stderr kept for error messages
pub const STDERR_TAIL_LINES: usize = 5;

/// Subset of the `--dump-json` document we care about
#[derive(Debug, Deserialize)]
struct YtDlpInfo {
    title: String,
    duration: Option<f64>,
    uploader: Option<String>,
    channel: Option<String>,
    thumbnail: Option<String>,
    #[serde(default)]
    formats: Vec<serde_json::Value>,
}

/// Metadata and audio extraction by running yt-dlp directly
pub struct YtDlpSource {
    yt_dlp_path: String,
}

impl YtDlpSource {
    pub fn new(yt_dlp_path: &str) -> Self {
        Self {
            yt_dlp_path: yt_dlp_path.to_string(),
        }
    }

    /// Start streaming the best audio format of a video to stdout.
    pub fn spawn_audio_stream(&self, video: &VideoRef) -> Result<ProcessHandle> {
        tracing::debug!("Streaming best audio for: {}", video.url());

        process::spawn(
            &self.yt_dlp_path,
            [
                "-f",
                "bestaudio",
                "-o",
                "-",
                "--no-playlist",
                "--quiet",
                "--no-warnings",
                "--",
                video.url(),
            ],
            Input::Null,
        )
    }
}

#[async_trait]
impl MetadataSource for YtDlpSource {
    async fn fetch(&self, video: &VideoRef) -> Result<VideoMetadata> {
        tracing::debug!("Extracting video info for: {}", video.url());

        let output = process::capture(
            &self.yt_dlp_path,
            ["-j", "--no-playlist", "--", video.url()],
            STDERR_TAIL_LINES,
        )
        .await?;

        if !output.exit.success() {
            return Err(TubetoneError::MetadataFetchFailed(format!(
                "{} failed with {}: {}",
                self.yt_dlp_path,
                output.exit,
                output.stderr_tail.join("\n")
            )));
        }

        parse_info(&output.stdout)
    }

    fn name(&self) -> &'static str {
        "yt-dlp"
    }
}

/// Parse the single JSON document printed by `yt-dlp -j`
pub fn parse_info(stdout: &[u8]) -> Result<VideoMetadata> {
    let info: YtDlpInfo = serde_json::from_slice(stdout)
        .map_err(|e| TubetoneError::MetadataParseFailed(e.to_string()))?;

    Ok(VideoMetadata {
        title: info.title,
        duration_seconds: whole_seconds(info.duration),
        author: info.uploader.or(info.channel).unwrap_or_default(),
        thumbnail_url: info.thumbnail,
        formats: info.formats,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_info() {
        let json = br#"{
            "id": "abc",
            "title": "Some Song",
            "duration": 215,
            "uploader": "Some Artist",
            "thumbnail": "https://i.ytimg.com/vi/abc/hq.jpg",
            "formats": [{"format_id": "251", "acodec": "opus"}, {"format_id": "140"}]
        }"#;

        let metadata = parse_info(json).unwrap();
        assert_eq!(metadata.title, "Some Song");
        assert_eq!(metadata.duration_seconds, 215);
        assert_eq!(metadata.author, "Some Artist");
        assert_eq!(metadata.thumbnail_url.as_deref(), Some("https://i.ytimg.com/vi/abc/hq.jpg"));
        assert_eq!(metadata.formats.len(), 2);
        assert_eq!(metadata.formats[0]["format_id"], "251");
    }

    #[test]
    fn test_parse_info_falls_back_to_channel() {
        let metadata = parse_info(br#"{"title": "Live", "channel": "Radio"}"#).unwrap();
        assert_eq!(metadata.author, "Radio");
        assert_eq!(metadata.duration_seconds, 0);
        assert!(metadata.formats.is_empty());
    }

    #[test]
    fn test_parse_info_rejects_garbage() {
        for input in [&b"ERROR: not json"[..], b"", br#"{"duration": 10}"#] {
            assert!(matches!(parse_info(input), Err(TubetoneError::MetadataParseFailed(_))));
        }
    }
}
