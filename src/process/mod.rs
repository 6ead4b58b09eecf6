//! Process management for the external programs.
//!
//! Each child is owned by a waiter task that races the natural exit against a
//! kill request. Terminating a process therefore only ever cancels a token: it
//! is safe to call any number of times, and a child that already exited is
//! never signalled.

use std::collections::VecDeque;
use std::ffi::OsStr;
use std::fmt;
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::{ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{Result, TubetoneError};

/// How a child process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// The program exited on its own with this code.
    Exited(i32),
    /// The program was killed by a signal we did not send.
    Signaled,
    /// The program was terminated through its [`Terminator`].
    Terminated,
    /// Waiting on the child failed, the status is unknown.
    Lost,
}

impl ExitReason {
    pub fn success(&self) -> bool {
        matches!(self, ExitReason::Exited(0))
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitReason::Exited(code) => write!(f, "exit code {}", code),
            ExitReason::Signaled => write!(f, "killed by signal"),
            ExitReason::Terminated => write!(f, "terminated"),
            ExitReason::Lost => write!(f, "unknown exit status"),
        }
    }
}

/// Standard input given to the child
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Input {
    Null,
    Piped,
}

/// Cloneable kill switch for one child process.
#[derive(Debug, Clone)]
pub struct Terminator {
    program: String,
    token: CancellationToken,
    exit: watch::Receiver<Option<ExitReason>>,
}

impl Terminator {
    /// Request a forced kill. No-op once requested or once the child exited.
    pub fn terminate(&self) {
        if self.exit.borrow().is_some() || self.token.is_cancelled() {
            return;
        }
        tracing::debug!(program = %self.program, "Terminating process");
        self.token.cancel();
    }

    /// Whether a kill was requested while the child was still running
    pub fn is_requested(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Observes the exit of a child process. Clones see the same exit.
#[derive(Debug, Clone)]
pub struct ExitWatch {
    rx: watch::Receiver<Option<ExitReason>>,
}

impl ExitWatch {
    /// Wait until the child has exited and been reaped.
    pub async fn wait(&mut self) -> ExitReason {
        match self.rx.wait_for(Option::is_some).await {
            Ok(exit) => exit.unwrap_or(ExitReason::Lost),
            Err(_) => ExitReason::Lost,
        }
    }

    /// The exit reason if the child has already exited
    pub fn current(&self) -> Option<ExitReason> {
        *self.rx.borrow()
    }
}

/// A spawned child process.
///
/// Dropping the handle terminates the process if it is still running.
#[derive(Debug)]
pub struct ProcessHandle {
    program: String,
    pid: Option<u32>,
    stdin: Option<ChildStdin>,
    stdout: Option<ChildStdout>,
    stderr: Option<ChildStderr>,
    terminator: Terminator,
    exit: ExitWatch,
}

impl ProcessHandle {
    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn take_stdin(&mut self) -> Option<ChildStdin> {
        self.stdin.take()
    }

    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.stdout.take()
    }

    pub fn take_stderr(&mut self) -> Option<ChildStderr> {
        self.stderr.take()
    }

    pub fn terminator(&self) -> Terminator {
        self.terminator.clone()
    }

    pub fn exit_watch(&self) -> ExitWatch {
        self.exit.clone()
    }

    pub fn terminate(&self) {
        self.terminator.terminate();
    }

    pub async fn wait(&mut self) -> ExitReason {
        self.exit.wait().await
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        if self.exit.current().is_none() {
            self.terminator.terminate();
        }
    }
}

/// Spawn `program` with `args`, piping stdout and stderr.
///
/// The program is resolved through `PATH`. A program that cannot be started
/// yields [`TubetoneError::ProcessSpawnFailed`]. The caller must drain stdout and
/// stderr, or the child stalls once the pipe buffers fill.
pub fn spawn<I, S>(program: &str, args: I, input: Input) -> Result<ProcessHandle>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(match input {
            Input::Null => Stdio::null(),
            Input::Piped => Stdio::piped(),
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    tracing::debug!("Executing command: {:?}", cmd.as_std());

    let mut child = cmd
        .spawn()
        .map_err(|source| TubetoneError::ProcessSpawnFailed {
            program: program.to_string(),
            source,
        })?;

    let pid = child.id();
    let stdin = child.stdin.take();
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let token = CancellationToken::new();
    let (tx, rx) = watch::channel(None);

    let kill_requested = token.clone();
    let name = program.to_string();
    tokio::spawn(async move {
        let reason = tokio::select! {
            // A child that already exited must win over a late kill request
            biased;
            status = child.wait() => match status {
                Ok(status) => match status.code() {
                    Some(code) => ExitReason::Exited(code),
                    None => ExitReason::Signaled,
                },
                Err(e) => {
                    tracing::error!(program = %name, "Error waiting for process: {}", e);
                    ExitReason::Lost
                }
            },
            _ = kill_requested.cancelled() => {
                if let Err(e) = child.kill().await {
                    tracing::warn!(program = %name, "Failed to kill process: {}", e);
                }
                ExitReason::Terminated
            }
        };
        tracing::debug!(program = %name, pid = ?pid, "Process ended: {}", reason);
        let _ = tx.send(Some(reason));
    });

    Ok(ProcessHandle {
        program: program.to_string(),
        pid,
        stdin,
        stdout,
        stderr,
        terminator: Terminator {
            program: program.to_string(),
            token,
            exit: rx.clone(),
        },
        exit: ExitWatch { rx },
    })
}

/// Read `reader` line by line on a background task.
///
/// Every line is handed to `on_line`; lines for which it returns `true` are kept
/// as diagnostics, of which only the last `keep` are returned.
pub fn spawn_line_reader<R, F>(reader: R, keep: usize, mut on_line: F) -> JoinHandle<Vec<String>>
where
    R: AsyncRead + Unpin + Send + 'static,
    F: FnMut(&str) -> bool + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut tail = VecDeque::with_capacity(keep);
        let mut buf = Vec::new();

        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf);
                    let line = line.trim_end();
                    if line.is_empty() || !on_line(line) {
                        continue;
                    }
                    if tail.len() == keep {
                        tail.pop_front();
                    }
                    if keep > 0 {
                        tail.push_back(line.to_string());
                    }
                }
                Err(e) => {
                    tracing::debug!("Stopped reading diagnostics: {}", e);
                    break;
                }
            }
        }

        tail.into()
    })
}

/// Drain a child's stderr, logging each line and keeping the last `keep`.
pub fn collect_stderr(stderr: Option<ChildStderr>, program: &str, keep: usize) -> JoinHandle<Vec<String>> {
    let program = program.to_string();
    match stderr {
        Some(stderr) => spawn_line_reader(stderr, keep, move |line| {
            tracing::trace!(program = %program, "stderr: {}", line);
            true
        }),
        None => tokio::spawn(async { Vec::new() }),
    }
}

/// Fully buffered result of a short-lived process.
#[derive(Debug)]
pub struct CapturedOutput {
    pub exit: ExitReason,
    pub stdout: Vec<u8>,
    pub stderr_tail: Vec<String>,
}

/// Run a program to completion, buffering stdout and the tail of stderr.
pub async fn capture<I, S>(program: &str, args: I, stderr_lines: usize) -> Result<CapturedOutput>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut handle = spawn(program, args, Input::Null)?;
    let stderr = collect_stderr(handle.take_stderr(), program, stderr_lines);

    let mut stdout = Vec::new();
    if let Some(mut out) = handle.take_stdout() {
        out.read_to_end(&mut stdout).await?;
    }

    let exit = handle.wait().await;
    let stderr_tail = stderr.await.unwrap_or_default();

    tracing::debug!(program, "{} stdout bytes, {}", stdout.len(), exit);

    Ok(CapturedOutput {
        exit,
        stdout,
        stderr_tail,
    })
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_capture_collects_stdout_and_exit_code() {
        let output = capture("sh", ["-c", "printf hello; echo oops >&2; exit 3"], 5)
            .await
            .unwrap();

        assert_eq!(output.stdout, b"hello");
        assert_eq!(output.exit, ExitReason::Exited(3));
        assert_eq!(output.stderr_tail, vec!["oops".to_string()]);
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_failure() {
        let err = spawn("tubetone-definitely-not-installed", ["--version"], Input::Null).unwrap_err();
        assert!(matches!(err, TubetoneError::ProcessSpawnFailed { .. }));
    }

    #[tokio::test]
    async fn test_terminate_twice_is_harmless() {
        let mut handle = spawn("sleep", ["30"], Input::Null).unwrap();

        handle.terminate();
        handle.terminate();

        let exit = tokio::time::timeout(Duration::from_secs(5), handle.wait())
            .await
            .unwrap();
        assert_eq!(exit, ExitReason::Terminated);
    }

    #[tokio::test]
    async fn test_terminate_after_exit_is_noop() {
        let mut handle = spawn("true", Vec::<&str>::new(), Input::Null).unwrap();
        assert_eq!(handle.wait().await, ExitReason::Exited(0));

        handle.terminate();
        handle.terminate();

        assert_eq!(handle.exit_watch().current(), Some(ExitReason::Exited(0)));
        assert!(!handle.terminator().is_requested());
    }

    #[tokio::test]
    async fn test_terminate_while_running_is_requested() {
        let mut handle = spawn("sleep", ["30"], Input::Null).unwrap();
        let terminator = handle.terminator();

        terminator.terminate();
        assert!(terminator.is_requested());

        let exit = tokio::time::timeout(Duration::from_secs(5), handle.wait())
            .await
            .unwrap();
        assert_eq!(exit, ExitReason::Terminated);
        assert!(handle.terminator().is_requested());
    }

    #[tokio::test]
    async fn test_stderr_tail_keeps_last_lines() {
        let output = capture("sh", ["-c", "for i in 1 2 3 4 5 6 7; do echo line$i >&2; done"], 5)
            .await
            .unwrap();

        assert_eq!(output.stderr_tail, vec!["line3", "line4", "line5", "line6", "line7"]);
    }
}
