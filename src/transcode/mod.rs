use serde::{Deserialize, Serialize};
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWriteExt};
use tokio::process::ChildStdout;
use tokio::task::JoinHandle;

use crate::process::{self, ExitWatch, Input, ProcessHandle, Terminator};
use crate::{Result, TubetoneError};

pub mod progress;

use progress::StderrLine;

/// Arguments shared by every ffmpeg invocation
pub const FFMPEG_DEFAULT_ARGS: [&str; 3] = ["-hide_banner", "-loglevel", "error"];

/// Lines of ffmpeg diagnostics kept for error reports
const DIAGNOSTIC_LINES: usize = 10;

/// How long the input copy may lag behind a successful transcoder exit
const FEEDER_GRACE: Duration = Duration::from_secs(5);

/// Target encoding of the transcoder output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscodeOptions {
    pub audio_bitrate_kbps: u32,

    /// ffmpeg encoder name, e.g. `libmp3lame`
    pub audio_codec: String,

    /// ffmpeg muxer name, e.g. `mp3`
    pub container_format: String,
}

impl Default for TranscodeOptions {
    fn default() -> Self {
        Self {
            audio_bitrate_kbps: 128,
            audio_codec: "libmp3lame".to_string(),
            container_format: "mp3".to_string(),
        }
    }
}

impl TranscodeOptions {
    /// MIME type of the container
    pub fn mime_type(&self) -> &'static str {
        match self.container_format.as_str() {
            "mp3" => "audio/mpeg",
            "ipod" | "mp4" | "m4a" => "audio/mp4",
            "ogg" | "opus" => "audio/ogg",
            "wav" => "audio/wav",
            "flac" => "audio/flac",
            "webm" => "audio/webm",
            _ => "application/octet-stream",
        }
    }

    /// File extension for the container
    pub fn extension(&self) -> &str {
        match self.container_format.as_str() {
            "ipod" | "mp4" => "m4a",
            other => other,
        }
    }

    /// Read from stdin, write the target container to stdout, progress to stderr
    pub fn ffmpeg_args(&self) -> Vec<String> {
        let mut args: Vec<String> = FFMPEG_DEFAULT_ARGS.iter().map(|s| s.to_string()).collect();
        args.extend(
            [
                "-nostats",
                "-progress",
                "pipe:2",
                "-i",
                "pipe:0",
                "-vn",
                "-acodec",
                &self.audio_codec,
                "-b:a",
                &format!("{}k", self.audio_bitrate_kbps),
                "-f",
                &self.container_format,
                "pipe:1",
            ]
            .iter()
            .map(|s| s.to_string()),
        );
        args
    }
}

/// Advisory events emitted while transcoding
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscodeEvent {
    /// The transcoder was spawned with this command line
    Started(String),
    /// Output position reported by the transcoder
    Progress(String),
    /// The transcoder exited successfully
    Completed,
}

/// Receives [`TranscodeEvent`]s
pub type EventObserver = Arc<dyn Fn(&TranscodeEvent) + Send + Sync>;

fn log_events() -> EventObserver {
    Arc::new(|event| match event {
        TranscodeEvent::Started(command) => tracing::debug!("Transcoder started: {}", command),
        TranscodeEvent::Progress(time) => tracing::trace!("Transcoder progress: {}", time),
        TranscodeEvent::Completed => tracing::debug!("Transcoder completed"),
    })
}

/// Spawns the transcoding program over an input byte stream
#[derive(Clone)]
pub struct Transcoder {
    ffmpeg_path: String,
    options: TranscodeOptions,
    observer: EventObserver,
}

impl Transcoder {
    pub fn new(ffmpeg_path: &str, options: TranscodeOptions) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.to_string(),
            options,
            observer: log_events(),
        }
    }

    /// Replace the default logging observer
    pub fn with_observer(mut self, observer: EventObserver) -> Self {
        self.observer = observer;
        self
    }

    pub fn options(&self) -> &TranscodeOptions {
        &self.options
    }

    /// Start transcoding `input`.
    ///
    /// `upstream` is the producer of `input`; it is terminated as soon as the
    /// transcoder stops accepting data or fails.
    pub fn transcode<R>(&self, input: R, upstream: Option<Terminator>) -> Result<TranscodeStream>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let args = self.options.ffmpeg_args();
        let mut process = process::spawn(&self.ffmpeg_path, &args, Input::Piped)?;

        (self.observer)(&TranscodeEvent::Started(format!(
            "{} {}",
            self.ffmpeg_path,
            args.join(" ")
        )));

        let output = process.take_stdout().ok_or_else(|| TubetoneError::TranscodeFailed {
            message: "transcoder stdout is not captured".to_string(),
            diagnostics: String::new(),
        })?;

        let feeder = match process.take_stdin() {
            Some(stdin) => spawn_feeder(input, stdin, upstream.clone()),
            None => tokio::spawn(async { Ok(0) }),
        };

        let observer = self.observer.clone();
        let diagnostics = match process.take_stderr() {
            Some(stderr) => process::spawn_line_reader(stderr, DIAGNOSTIC_LINES, move |line| {
                match progress::classify(line) {
                    StderrLine::Progress(time) => {
                        observer(&TranscodeEvent::Progress(time.to_string()));
                        false
                    }
                    StderrLine::ProgressField => false,
                    StderrLine::Diagnostic => {
                        tracing::debug!("ffmpeg: {}", line);
                        true
                    }
                }
            }),
            None => tokio::spawn(async { Vec::new() }),
        };

        Ok(TranscodeStream {
            output: Some(output),
            process,
            feeder,
            diagnostics,
            upstream,
            observer: self.observer.clone(),
        })
    }
}

/// Copy the input into the transcoder's stdin, then close it.
fn spawn_feeder<R>(
    mut input: R,
    mut stdin: tokio::process::ChildStdin,
    upstream: Option<Terminator>,
) -> JoinHandle<io::Result<u64>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let copied = tokio::io::copy(&mut input, &mut stdin).await;
        match copied {
            Ok(bytes) => {
                // Closing stdin is what tells the transcoder the input ended
                let _ = stdin.shutdown().await;
                drop(stdin);
                tracing::trace!("Fed {} bytes to transcoder", bytes);
                Ok(bytes)
            }
            Err(e) => {
                tracing::debug!("Transcoder input stopped: {}", e);
                if let Some(upstream) = &upstream {
                    upstream.terminate();
                }
                Err(e)
            }
        }
    })
}

/// A running transcoder: its stdout is the transcoded byte stream.
pub struct TranscodeStream {
    output: Option<ChildStdout>,
    process: ProcessHandle,
    feeder: JoinHandle<io::Result<u64>>,
    diagnostics: JoinHandle<Vec<String>>,
    upstream: Option<Terminator>,
    observer: EventObserver,
}

impl TranscodeStream {
    /// Take the transcoded output stream
    pub fn take_output(&mut self) -> Option<ChildStdout> {
        self.output.take()
    }

    pub fn terminator(&self) -> Terminator {
        self.process.terminator()
    }

    pub fn exit_watch(&self) -> ExitWatch {
        self.process.exit_watch()
    }

    pub fn pid(&self) -> Option<u32> {
        self.process.pid()
    }

    /// Wait for the transcoder to exit and report how it went.
    ///
    /// Call after the output reached EOF. Any failure terminates the upstream
    /// producer.
    pub async fn finish(mut self) -> Result<()> {
        let exit = self.process.wait().await;

        let failure = if !exit.success() {
            // The feeder may be parked on a read from an idle upstream
            self.terminate_upstream();
            self.feeder.abort();
            Some(format!("transcoder ended with {}", exit))
        } else {
            match tokio::time::timeout(FEEDER_GRACE, &mut self.feeder).await {
                Ok(Ok(Ok(_))) => None,
                Ok(Ok(Err(e))) => Some(format!("transcoder input failed: {}", e)),
                Ok(Err(e)) => Some(format!("transcoder input task failed: {}", e)),
                Err(_) => {
                    self.feeder.abort();
                    Some("transcoder exited before consuming its input".to_string())
                }
            }
        };

        let diagnostics = (&mut self.diagnostics).await.unwrap_or_default().join("\n");

        match failure {
            None => {
                (self.observer)(&TranscodeEvent::Completed);
                Ok(())
            }
            Some(message) => {
                self.terminate_upstream();
                Err(TubetoneError::TranscodeFailed { message, diagnostics })
            }
        }
    }

    fn terminate_upstream(&self) {
        if let Some(upstream) = &self.upstream {
            upstream.terminate();
        }
    }
}

impl Drop for TranscodeStream {
    fn drop(&mut self) {
        self.feeder.abort();
    }
}
