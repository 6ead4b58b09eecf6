//! Shared helpers for integration tests.
//!
//! The media tools are replaced by small shell scripts written into a
//! temporary directory, so the tests exercise real child processes and pipes
//! without needing yt-dlp or ffmpeg installed.

#![allow(dead_code)]

use async_trait::async_trait;
use mockall::mock;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tempfile::TempDir;

use tubetone::config::Config;
use tubetone::extractors::{MetadataSource, VideoMetadata, VideoRef};
use tubetone::search::{SearchProvider, SearchResult};

mock! {
    pub Source {}

    #[async_trait]
    impl MetadataSource for Source {
        async fn fetch(&self, video: &VideoRef) -> tubetone::Result<VideoMetadata>;
        fn name(&self) -> &'static str;
    }
}

mock! {
    pub Search {}

    #[async_trait]
    impl SearchProvider for Search {
        async fn search(&self, query: &str, limit: usize) -> tubetone::Result<Vec<SearchResult>>;
    }
}

/// A directory of fake media tools
pub struct FakeTools {
    pub dir: TempDir,
}

impl FakeTools {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("failed to create tools dir"),
        }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Write an executable `/bin/sh` script and return its path
    pub fn script(&self, name: &str, body: &str) -> String {
        let path = self.path(name);
        fs::write(&path, format!("#!/bin/sh\n{}\n", body)).expect("failed to write script");
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755))
            .expect("failed to make script executable");
        path.to_string_lossy().into_owned()
    }

    /// Default configuration pointing at the given programs
    pub fn config(&self, ytdlp: &str, ffmpeg: &str) -> Config {
        let mut config = Config::default();
        config.tools.ytdlp_path = ytdlp.to_string();
        config.tools.ffmpeg_path = ffmpeg.to_string();
        config.app.temp_dir = Some(self.path("scratch"));
        config
    }
}

pub fn video(id: &str) -> VideoRef {
    VideoRef::new(id).expect("valid video id")
}

pub fn metadata(title: &str, duration_seconds: u64) -> VideoMetadata {
    VideoMetadata {
        title: title.to_string(),
        duration_seconds,
        author: "Some Artist".to_string(),
        thumbnail_url: Some("https://i.ytimg.com/vi/abc/hqdefault.jpg".to_string()),
        formats: vec![serde_json::json!({"format_id": "251", "acodec": "opus"})],
    }
}

/// A metadata source that always returns `metadata`
pub fn source_returning(metadata: VideoMetadata) -> MockSource {
    let mut source = MockSource::new();
    source
        .expect_fetch()
        .returning(move |_| Ok(metadata.clone()));
    source.expect_name().return_const("mock");
    source
}

/// The bytes `yes <word> | head -c <len>` prints
pub fn repeated(word: &str, len: usize) -> Vec<u8> {
    format!("{}\n", word).into_bytes().into_iter().cycle().take(len).collect()
}

/// Poll `check` until it holds or `timeout` passes
pub async fn wait_until(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if check() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Wait for a script to write its pid to `path`
pub async fn read_pid(path: &Path) -> u32 {
    let mut pid = None;
    wait_until(Duration::from_secs(5), || {
        pid = fs::read_to_string(path)
            .ok()
            .and_then(|s| s.trim().parse().ok());
        pid.is_some()
    })
    .await;
    pid.unwrap_or_else(|| panic!("no pid written to {}", path.display()))
}

/// Whether a process still exists (Linux)
pub fn process_exists(pid: u32) -> bool {
    Path::new(&format!("/proc/{}", pid)).exists()
}
