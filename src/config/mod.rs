use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::transcode::TranscodeOptions;

/// Local config file checked before the user config directory
const LOCAL_CONFIG_FILE: &str = "tubetone.yaml";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP server settings
    pub server: ServerConfig,

    /// External programs
    pub tools: ToolsConfig,

    /// Download pipeline settings
    pub download: DownloadConfig,

    /// Search settings
    pub search: SearchConfig,

    /// Application settings
    pub app: AppConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,

    pub port: u16,

    /// Allowed CORS origin, any origin if unset
    pub cors_origin: Option<String>,

    /// Include internal error details in responses
    pub dev_mode: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    /// Extraction program
    pub ytdlp_path: String,

    /// Transcoding program
    pub ffmpeg_path: String,

    /// Base URL of a Piped API instance used for metadata when reachable
    pub piped_url: Option<String>,

    /// Timeout for the Piped probe and requests
    pub probe_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    /// Longest video accepted for download
    pub max_duration_secs: u64,

    pub audio_bitrate_kbps: u32,

    pub audio_codec: String,

    pub container_format: String,

    /// Maximum filename length before the extension
    pub filename_max_len: usize,

    /// Chunks buffered between the transcoder and a slow client
    pub channel_depth: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Number of results per query
    pub limit: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Parent of the process-wide temporary directory
    pub temp_dir: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3001,
            cors_origin: None,
            dev_mode: false,
        }
    }
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            ytdlp_path: "yt-dlp".to_string(),
            ffmpeg_path: "ffmpeg".to_string(),
            piped_url: None,
            probe_timeout_secs: 5,
        }
    }
}

impl ToolsConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}

impl Default for DownloadConfig {
    fn default() -> Self {
        let transcode = TranscodeOptions::default();
        Self {
            max_duration_secs: 3600,
            audio_bitrate_kbps: transcode.audio_bitrate_kbps,
            audio_codec: transcode.audio_codec,
            container_format: transcode.container_format,
            filename_max_len: 60,
            channel_depth: 16,
        }
    }
}

impl DownloadConfig {
    pub fn transcode_options(&self) -> TranscodeOptions {
        TranscodeOptions {
            audio_bitrate_kbps: self.audio_bitrate_kbps,
            audio_codec: self.audio_codec.clone(),
            container_format: self.container_format.clone(),
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self { limit: 10 }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            tools: ToolsConfig::default(),
            download: DownloadConfig::default(),
            search: SearchConfig::default(),
            app: AppConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from `path`, the default locations, or defaults
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(path) if path.exists() => Some(path.to_path_buf()),
            Some(path) => {
                // `config --init` writes this file, so a missing one is not an error
                tracing::warn!("Config file {} does not exist, using defaults", path.display());
                None
            }
            None => Self::config_path().ok().filter(|p| p.exists()),
        };

        let config = match config_path {
            Some(config_path) => {
                tracing::debug!("Loading config from {}", config_path.display());
                let content = fs_err::read_to_string(&config_path)
                    .context("Failed to read config file")?;
                Self::from_yaml(&content)?
            }
            None => Self::default(),
        };

        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from YAML; missing keys take default values
    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).context("Failed to parse config file")
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs_err::create_dir_all(parent)?;
        }

        let content = serde_yaml::to_string(self)
            .context("Failed to serialize config")?;

        fs_err::write(path, content)
            .context("Failed to write config file")?;

        Ok(())
    }

    /// Get configuration file path
    pub fn config_path() -> Result<PathBuf> {
        // First try current directory for easy testing
        let local_config = PathBuf::from(LOCAL_CONFIG_FILE);
        if local_config.exists() {
            return Ok(local_config);
        }

        let config_dir = dirs::config_dir()
            .context("Could not determine config directory")?;

        Ok(config_dir.join("tubetone").join("config.yaml"))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            anyhow::bail!("Server port must not be 0");
        }

        if self.tools.ytdlp_path.trim().is_empty() || self.tools.ffmpeg_path.trim().is_empty() {
            anyhow::bail!("yt-dlp and ffmpeg programs must be configured");
        }

        if self.download.audio_bitrate_kbps == 0 {
            anyhow::bail!("Audio bitrate must be greater than 0");
        }

        if self.download.filename_max_len == 0 {
            anyhow::bail!("Filename length limit must be greater than 0");
        }

        if self.search.limit == 0 {
            anyhow::bail!("Search limit must be greater than 0");
        }

        if let Some(origin) = &self.server.cors_origin {
            if origin.parse::<axum::http::HeaderValue>().is_err() {
                anyhow::bail!("Invalid CORS origin: {:?}", origin);
            }
        }

        Ok(())
    }

    /// Display current configuration
    pub fn display(&self) {
        println!("Current Configuration:");
        println!("  Listen: {}:{}", self.server.host, self.server.port);
        println!("  CORS Origin: {}", self.server.cors_origin.as_deref().unwrap_or("*"));
        println!("  Dev Mode: {}", self.server.dev_mode);
        println!("  yt-dlp: {}", self.tools.ytdlp_path);
        println!("  ffmpeg: {}", self.tools.ffmpeg_path);
        if let Some(piped) = &self.tools.piped_url {
            println!("  Piped API: {}", piped);
        }
        println!("  Max Duration: {}s", self.download.max_duration_secs);
        println!(
            "  Output: {} {} @ {} kbps",
            self.download.container_format, self.download.audio_codec, self.download.audio_bitrate_kbps
        );
        println!("  Search Limit: {}", self.search.limit);
        if let Some(temp_dir) = &self.app.temp_dir {
            println!("  Temp Dir: {}", temp_dir.display());
        }
    }
}
