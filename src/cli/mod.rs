use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "tubetone",
    about = "Tubetone - Search videos and stream their audio as MP3",
    version,
    long_about = "An HTTP service that searches videos, reports their metadata and streams their audio transcoded to MP3. Uses yt-dlp for extraction and ffmpeg for transcoding."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file (defaults to ./tubetone.yaml, then the user config directory)
    #[arg(short, long, global = true, env = "TUBETONE_CONFIG", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value = "text")]
    pub log_format: LogFormat,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP server
    Serve {
        /// Address to listen on
        #[arg(long, env = "HOST")]
        host: Option<String>,

        /// Port to listen on
        #[arg(short, long, env = "PORT")]
        port: Option<u16>,

        /// Include internal error details in responses
        #[arg(long, env = "TUBETONE_DEV")]
        dev: bool,

        /// yt-dlp executable
        #[arg(long, env = "YTDLP_PATH", value_name = "PROGRAM")]
        ytdlp: Option<String>,

        /// ffmpeg executable
        #[arg(long, env = "FFMPEG_PATH", value_name = "PROGRAM")]
        ffmpeg: Option<String>,

        /// Piped API base URL to use for metadata
        #[arg(long, env = "PIPED_URL", value_name = "URL")]
        piped_url: Option<String>,
    },

    /// Print the metadata of a video
    Info {
        /// Video id
        #[arg(value_name = "ID")]
        id: String,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Show or initialize the configuration
    Config {
        /// Write the effective configuration to the config file
        #[arg(long)]
        init: bool,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human readable text
    Text,
    /// JSON
    Json,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogFormat {
    /// Human readable lines
    Text,
    /// One JSON object per line
    Json,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}
