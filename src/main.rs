use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tubetone::cli::{Cli, Commands, LogFormat};
use tubetone::config::Config;
use tubetone::extractors::{self, VideoRef};
use tubetone::server::{self, AppContext};
use tubetone::{output, utils};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_tracing(cli.verbose, cli.log_format);

    let mut config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Serve {
            host,
            port,
            dev,
            ytdlp,
            ffmpeg,
            piped_url,
        } => {
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            if dev {
                config.server.dev_mode = true;
            }
            if let Some(ytdlp) = ytdlp {
                config.tools.ytdlp_path = ytdlp;
            }
            if let Some(ffmpeg) = ffmpeg {
                config.tools.ffmpeg_path = ffmpeg;
            }
            if piped_url.is_some() {
                config.tools.piped_url = piped_url;
            }
            config.validate()?;

            warn_missing_dependencies(&config).await;

            let ctx = AppContext::new(config).await?;
            server::start_server(ctx).await?;
        }
        Commands::Info { id, format } => {
            let video = VideoRef::new(&id)?;
            let source = extractors::select_source(&config).await;

            tracing::info!("Fetching metadata for {} with {}", video.id(), source.name());
            let metadata = source.fetch(&video).await?;

            output::print_to_console(&metadata, format)?;
        }
        Commands::Config { init } => {
            config.display();
            if init {
                let path = match &cli.config {
                    Some(path) => path.clone(),
                    None => Config::config_path()?,
                };
                config.save(&path).context("Failed to initialize config")?;
                println!("Configuration written to: {}", path.display());
            }
        }
    }

    Ok(())
}

fn init_tracing(verbose: bool, format: LogFormat) {
    let default_filter = if verbose {
        "tubetone=debug,tower_http=debug"
    } else {
        "tubetone=info,tower_http=info"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.into());

    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
    }
}

/// Check for required external dependencies (non-fatal, tools may appear later)
async fn warn_missing_dependencies(config: &Config) {
    let missing = utils::check_dependencies(&config.tools.ytdlp_path, &config.tools.ffmpeg_path).await;
    if !missing.is_empty() {
        tracing::warn!("Dependency check warnings:");
        for dep in missing {
            tracing::warn!("  {}", dep);
        }
        tracing::warn!("Continuing anyway - tools may be available at request time");
    }
}
