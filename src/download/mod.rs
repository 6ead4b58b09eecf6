//! Streaming download pipeline.
//!
//! A download chains the extraction program, whose stdout carries the best
//! audio format, into the transcoder, whose stdout is streamed to the client:
//!
//! ```text
//! yt-dlp -f bestaudio -o - ──stdin──▶ ffmpeg ──stdout──▶ bounded channel ──▶ HTTP body
//! ```
//!
//! Response headers are only committed once the transcoder produced its first
//! chunk, so anything failing before that is still reported as a JSON error.
//! Later failures abort the body, which ends the connection. A download only
//! counts as completed once the body consumer has read its end.

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::process::ChildStdout;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::io::ReaderStream;
use tracing::Instrument;

pub mod session;

pub use session::{DownloadSession, SessionState};

use crate::config::Config;
use crate::extractors::{MetadataSource, VideoMetadata, VideoRef, YtDlpSource};
use crate::process::{self, ExitReason, ProcessHandle};
use crate::transcode::{TranscodeStream, Transcoder};
use crate::utils::attachment_filename;
use crate::{Result, TubetoneError};

/// Read size for transcoder output
const CHUNK_SIZE: usize = 64 * 1024;

/// Lines of extractor stderr kept for error reports
const EXTRACTOR_STDERR_LINES: usize = 5;

/// Transcoded audio ready to be sent as a response body
#[derive(Debug)]
pub struct AudioStream {
    pub filename: String,
    pub content_type: &'static str,
    pub metadata: VideoMetadata,
    pub session: Arc<DownloadSession>,
    pub body: AudioBody,
}

/// What the pump hands to the body
#[derive(Debug)]
enum Frame {
    Chunk(Bytes),
    Error(io::Error),
    /// Both processes exited cleanly after the last chunk
    End,
}

/// The response body of a download.
///
/// The session completes when this stream yields its end, and is cancelled
/// when the stream is dropped before that.
#[derive(Debug)]
pub struct AudioBody {
    frames: ReceiverStream<Frame>,
    session: Arc<DownloadSession>,
    done: bool,
}

impl AudioBody {
    fn new(frames: mpsc::Receiver<Frame>, session: Arc<DownloadSession>) -> Self {
        Self {
            frames: ReceiverStream::new(frames),
            session,
            done: false,
        }
    }
}

impl Stream for AudioBody {
    type Item = io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.done {
            return Poll::Ready(None);
        }

        let frame = match self.frames.poll_next_unpin(cx) {
            Poll::Ready(frame) => frame,
            Poll::Pending => return Poll::Pending,
        };

        match frame {
            Some(Frame::Chunk(bytes)) => {
                self.session.add_bytes(bytes.len() as u64);
                Poll::Ready(Some(Ok(bytes)))
            }
            Some(Frame::Error(e)) => {
                self.done = true;
                Poll::Ready(Some(Err(e)))
            }
            Some(Frame::End) => {
                self.done = true;
                self.session.finish(SessionState::Completed);
                Poll::Ready(None)
            }
            None => {
                // The pump went away without a verdict
                self.done = true;
                self.session.finish(SessionState::Failed);
                Poll::Ready(Some(Err(io::Error::other("download ended unexpectedly"))))
            }
        }
    }
}

impl Drop for AudioBody {
    fn drop(&mut self) {
        if !self.done && self.session.terminate() {
            tracing::info!(session = %self.session.id(), "Client disconnected");
        }
    }
}

/// Builds download sessions
#[derive(Clone)]
pub struct Downloader {
    metadata: Arc<dyn MetadataSource>,
    extractor: Arc<YtDlpSource>,
    transcoder: Transcoder,
    max_duration_secs: u64,
    filename_max_len: usize,
    channel_depth: usize,
}

impl Downloader {
    pub fn new(config: &Config, metadata: Arc<dyn MetadataSource>) -> Self {
        Self {
            metadata,
            extractor: Arc::new(YtDlpSource::new(&config.tools.ytdlp_path)),
            transcoder: Transcoder::new(&config.tools.ffmpeg_path, config.download.transcode_options()),
            max_duration_secs: config.download.max_duration_secs,
            filename_max_len: config.download.filename_max_len,
            channel_depth: config.download.channel_depth.max(1),
        }
    }

    /// Replace the transcoder, e.g. to observe its events
    pub fn with_transcoder(mut self, transcoder: Transcoder) -> Self {
        self.transcoder = transcoder;
        self
    }

    pub fn metadata_source(&self) -> &Arc<dyn MetadataSource> {
        &self.metadata
    }

    /// Start a download and return its audio stream.
    ///
    /// Errors returned here happened before any audio byte was produced. The
    /// session is already in its terminal state when this returns an error.
    /// Dropping the returned future terminates whatever was spawned so far.
    pub async fn start(&self, video: VideoRef) -> Result<AudioStream> {
        let session = Arc::new(DownloadSession::new(&video));
        let span = tracing::info_span!("download", session = %session.id(), video = %video.id());

        match self.prepare(&session, &video).instrument(span).await {
            Ok(stream) => Ok(stream),
            Err(e) => {
                tracing::warn!(session = %session.id(), "Download of {} failed: {}", video.id(), e);
                session.finish(SessionState::Failed);
                Err(e)
            }
        }
    }

    async fn prepare(&self, session: &Arc<DownloadSession>, video: &VideoRef) -> Result<AudioStream> {
        session.advance(SessionState::MetadataFetching);
        let metadata = self.metadata.fetch(video).await?;

        session.advance(SessionState::DurationChecked);
        if metadata.duration_seconds > self.max_duration_secs {
            return Err(TubetoneError::VideoTooLong {
                duration: metadata.duration_seconds,
                limit: self.max_duration_secs,
            });
        }

        let filename = attachment_filename(
            &metadata.title,
            self.transcoder.options().extension(),
            self.filename_max_len,
        );
        session.set_filename(&filename);

        let mut extractor = self.extractor.spawn_audio_stream(video)?;
        session.attach(extractor.terminator());
        let extractor_stderr =
            process::collect_stderr(extractor.take_stderr(), extractor.program(), EXTRACTOR_STDERR_LINES);
        let audio = extractor.take_stdout().ok_or_else(|| {
            TubetoneError::ExtractionFailed("extractor stdout is not captured".to_string())
        })?;

        let mut transcode = self.transcoder.transcode(audio, Some(extractor.terminator()))?;
        session.attach(transcode.terminator());
        let output = transcode.take_output().ok_or_else(|| TubetoneError::TranscodeFailed {
            message: "transcoder stdout is not captured".to_string(),
            diagnostics: String::new(),
        })?;

        if !session.advance(SessionState::Streaming) {
            return Err(TubetoneError::ClientDisconnected);
        }
        tracing::info!("Streaming \"{}\" as {}", metadata.title, filename);

        let pipeline = Pipeline {
            extractor,
            extractor_stderr,
            transcode,
        };
        let mut chunks = ReaderStream::with_capacity(output, CHUNK_SIZE);
        let (tx, rx) = mpsc::channel(self.channel_depth);

        match chunks.next().await {
            Some(Ok(first)) => {
                let span = tracing::info_span!("stream", session = %session.id());
                tokio::spawn(pump(session.clone(), first, chunks, tx, pipeline).instrument(span));
            }
            Some(Err(e)) => {
                return Err(TubetoneError::TranscodeFailed {
                    message: format!("reading transcoder output failed: {}", e),
                    diagnostics: String::new(),
                })
            }
            None => {
                // Nothing was produced; settle now so a failure still becomes a JSON error
                pipeline.settle().await?;
                // The channel is empty and at least one deep
                let _ = tx.try_send(Frame::End);
            }
        }

        Ok(AudioStream {
            filename,
            content_type: self.transcoder.options().mime_type(),
            metadata,
            session: session.clone(),
            body: AudioBody::new(rx, session.clone()),
        })
    }
}

/// The two processes of a running download
struct Pipeline {
    extractor: ProcessHandle,
    extractor_stderr: JoinHandle<Vec<String>>,
    transcode: TranscodeStream,
}

impl Pipeline {
    /// Wait for both processes to exit and report the first real failure.
    ///
    /// Call once the transcoder output reached EOF. An extractor that exited
    /// with an error on its own is reported over the transcoder error it
    /// caused. An extractor we asked to stop, because the transcoder stopped
    /// reading, may still exit with an error of its own before the kill lands;
    /// the transcoder error wins then.
    async fn settle(mut self) -> Result<()> {
        let transcoded = self.transcode.finish().await;
        let exit = self.extractor.wait().await;
        let stopped_by_us = self.extractor.terminator().is_requested();

        match (transcoded, exit) {
            (Ok(()), ExitReason::Exited(0)) => Ok(()),
            (Err(e), _) if stopped_by_us => Err(e),
            (_, ExitReason::Exited(code)) if code != 0 => {
                let stderr = (&mut self.extractor_stderr).await.unwrap_or_default();
                Err(TubetoneError::ExtractionFailed(format!(
                    "{} ended with {}: {}",
                    self.extractor.program(),
                    exit,
                    stderr.join("\n")
                )))
            }
            (Err(e), _) => Err(e),
            (Ok(()), exit) => Err(TubetoneError::ExtractionFailed(format!(
                "{} ended with {}",
                self.extractor.program(),
                exit
            ))),
        }
    }
}

/// Forward transcoder output into the response channel.
///
/// The bounded channel provides backpressure: a slow client suspends the
/// pump, which stops draining the transcoder, which stops reading from the
/// extractor. A dropped receiver means the client went away.
async fn pump(
    session: Arc<DownloadSession>,
    first: Bytes,
    mut chunks: ReaderStream<ChildStdout>,
    tx: mpsc::Sender<Frame>,
    pipeline: Pipeline,
) {
    let mut next = Some(first);

    loop {
        if let Some(bytes) = next.take() {
            if tx.send(Frame::Chunk(bytes)).await.is_err() {
                disconnected(&session);
                return;
            }
        }

        let chunk = tokio::select! {
            biased;
            _ = tx.closed() => {
                disconnected(&session);
                return;
            }
            chunk = chunks.next() => chunk,
        };

        match chunk {
            Some(Ok(bytes)) => next = Some(bytes),
            Some(Err(e)) => {
                tracing::error!("Reading transcoder output failed: {}", e);
                session.finish(SessionState::Failed);
                let _ = tx.send(Frame::Error(e)).await;
                return;
            }
            None => break,
        }
    }

    match pipeline.settle().await {
        Ok(()) => {
            // The body completes the session once the client read everything
            if tx.send(Frame::End).await.is_err() {
                disconnected(&session);
            }
        }
        Err(e) => {
            tracing::error!("Download failed after headers were sent: {}", e);
            if let TubetoneError::TranscodeFailed { diagnostics, .. } = &e {
                if !diagnostics.is_empty() {
                    tracing::debug!("Transcoder diagnostics:\n{}", diagnostics);
                }
            }
            session.finish(SessionState::Failed);
            // An error item makes the server abort the body instead of ending it cleanly
            let _ = tx.send(Frame::Error(io::Error::other(e.to_string()))).await;
        }
    }
}

fn disconnected(session: &DownloadSession) {
    if session.terminate() {
        tracing::info!("Client disconnected");
    }
}
