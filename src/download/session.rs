//! Lifecycle of a single streamed download.

use serde::Serialize;
use std::fmt;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use crate::extractors::VideoRef;
use crate::process::Terminator;

/// States of a download, in order. The last three are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    MetadataFetching,
    DurationChecked,
    Streaming,
    Completed,
    Failed,
    Cancelled,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Completed | SessionState::Failed | SessionState::Cancelled)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::MetadataFetching => "metadata_fetching",
            SessionState::DurationChecked => "duration_checked",
            SessionState::Streaming => "streaming",
            SessionState::Completed => "completed",
            SessionState::Failed => "failed",
            SessionState::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
struct SessionInner {
    state: SessionState,
    filename: Option<String>,
    processes: Vec<Terminator>,
    bytes_sent: u64,
}

/// Live state of one in-flight download.
///
/// Exactly one terminal transition happens per session. The transition
/// terminates every attached process; later attempts are no-ops.
#[derive(Debug)]
pub struct DownloadSession {
    id: Uuid,
    video_id: String,
    inner: Mutex<SessionInner>,
}

impl DownloadSession {
    pub fn new(video: &VideoRef) -> Self {
        Self {
            id: Uuid::new_v4(),
            video_id: video.id().to_string(),
            inner: Mutex::new(SessionInner {
                state: SessionState::Idle,
                filename: None,
                processes: Vec::new(),
                bytes_sent: 0,
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn video_id(&self) -> &str {
        &self.video_id
    }

    pub fn state(&self) -> SessionState {
        self.lock().state
    }

    pub fn filename(&self) -> Option<String> {
        self.lock().filename.clone()
    }

    /// Bytes handed to the response sink so far
    pub fn bytes_sent(&self) -> u64 {
        self.lock().bytes_sent
    }

    fn lock(&self) -> MutexGuard<'_, SessionInner> {
        // The lock is never held across an await or a panic-prone call
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Move to a non-terminal state. Returns `false` once the session ended.
    pub(crate) fn advance(&self, next: SessionState) -> bool {
        debug_assert!(!next.is_terminal());
        let mut inner = self.lock();
        if inner.state.is_terminal() {
            return false;
        }
        tracing::debug!(session = %self.id, "{} -> {}", inner.state, next);
        inner.state = next;
        true
    }

    pub(crate) fn set_filename(&self, filename: &str) {
        self.lock().filename = Some(filename.to_string());
    }

    pub(crate) fn add_bytes(&self, bytes: u64) {
        self.lock().bytes_sent += bytes;
    }

    /// Register a process owned by this session.
    ///
    /// A process attached after the session ended is terminated immediately.
    pub(crate) fn attach(&self, process: Terminator) {
        let mut inner = self.lock();
        if inner.state.is_terminal() {
            drop(inner);
            process.terminate();
        } else {
            inner.processes.push(process);
        }
    }

    /// Perform the terminal transition.
    ///
    /// Returns `true` for the call that ended the session and `false` for any
    /// later call, which changes nothing.
    pub fn finish(&self, outcome: SessionState) -> bool {
        debug_assert!(outcome.is_terminal());
        let processes = {
            let mut inner = self.lock();
            if inner.state.is_terminal() {
                return false;
            }
            tracing::info!(
                session = %self.id,
                video = %self.video_id,
                bytes = inner.bytes_sent,
                "Download {} (was {})",
                outcome,
                inner.state
            );
            inner.state = outcome;
            std::mem::take(&mut inner.processes)
        };

        for process in processes {
            process.terminate();
        }
        true
    }

    /// Cancel the session. Safe to call repeatedly.
    pub fn terminate(&self) -> bool {
        self.finish(SessionState::Cancelled)
    }
}

impl Drop for DownloadSession {
    fn drop(&mut self) {
        self.terminate();
    }
}
