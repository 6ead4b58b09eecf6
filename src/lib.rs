//! Tubetone - A Rust HTTP service that streams video audio as MP3
//!
//! This library wraps two external programs, an extraction tool (yt-dlp) and an
//! audio transcoder (ffmpeg), and exposes search, metadata and streaming download
//! endpoints on top of them.

pub mod cli;
pub mod config;
pub mod download;
pub mod extractors;
pub mod output;
pub mod process;
pub mod search;
pub mod server;
pub mod transcode;
pub mod utils;

pub use cli::{Cli, Commands, OutputFormat};
pub use config::Config;
pub use download::{AudioBody, AudioStream, DownloadSession, Downloader, SessionState};
pub use extractors::{MetadataSource, VideoMetadata, VideoRef};
pub use search::{SearchProvider, SearchResult};
pub use transcode::{TranscodeEvent, TranscodeOptions};

/// Result type used throughout the library
pub type Result<T> = std::result::Result<T, TubetoneError>;

/// Error types specific to tubetone
#[derive(thiserror::Error, Debug)]
pub enum TubetoneError {
    #[error("Invalid video id: {0}")]
    InvalidVideoId(String),

    #[error("Missing search query")]
    MissingQuery,

    #[error("Failed to start {program}: {source}")]
    ProcessSpawnFailed {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Metadata fetch failed: {0}")]
    MetadataFetchFailed(String),

    #[error("Metadata parse failed: {0}")]
    MetadataParseFailed(String),

    #[error("Video is too long: {duration}s exceeds the {limit}s limit")]
    VideoTooLong { duration: u64, limit: u64 },

    #[error("Audio extraction failed: {0}")]
    ExtractionFailed(String),

    #[error("Transcode failed: {message}")]
    TranscodeFailed { message: String, diagnostics: String },

    #[error("Search failed: {0}")]
    SearchFailed(String),

    #[error("Client disconnected")]
    ClientDisconnected,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
