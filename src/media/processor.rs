use async_trait::async_trait;
use bytes::BytesMut;
use std::collections::VecDeque;
use std::fmt;
use std::io::{ErrorKind, Write};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio_stream::StreamExt;
use tokio_util::codec::{Decoder, FramedRead};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ToolsConfig;
use crate::error::{Result, ToolkitError};
use super::MediaCommand;
use super::progress::{parse_elapsed, running_percent};

/// Live progress of one step
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepProgress {
    pub elapsed_seconds: f64,
    /// `None` when the input duration is unknown
    pub percent: Option<u8>,
}

/// Everything a runner needs besides the command itself
pub struct StepContext<'a> {
    /// Input duration, 0.0 when unknown
    pub duration_seconds: f64,
    pub cancel: &'a CancellationToken,
    pub on_progress: &'a (dyn Fn(StepProgress) + Send + Sync),
    /// Receives every output line, e.g. a job log file
    pub mirror: Option<&'a mut (dyn Write + Send)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    ToolNotFound(String),
    Spawn(String),
    Exit(Option<i32>),
    Io(String),
}

/// Why a step failed, with the last lines the tool printed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepFailure {
    pub reason: FailureReason,
    pub output_tail: Vec<String>,
}

impl StepFailure {
    fn new(reason: FailureReason, tail: VecDeque<String>) -> Self {
        Self {
            reason,
            output_tail: tail.into(),
        }
    }

    pub fn is_tool_missing(&self) -> bool {
        matches!(self.reason, FailureReason::ToolNotFound(_))
    }

    /// Last output line, usually the tool's error
    pub fn last_line(&self) -> Option<&str> {
        self.output_tail.last().map(String::as_str)
    }
}

impl fmt::Display for StepFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.reason {
            FailureReason::ToolNotFound(tool) => write!(f, "{} not found", tool),
            FailureReason::Spawn(e) => write!(f, "failed to start: {}", e),
            FailureReason::Exit(Some(code)) => write!(f, "exit code {}", code),
            FailureReason::Exit(None) => write!(f, "terminated by signal"),
            FailureReason::Io(e) => write!(f, "{}", e),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Succeeded,
    Failed(StepFailure),
    Canceled,
}

/// Executes one step of a job as a child process
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Program the argument vectors are handed to
    fn program(&self) -> &str;

    async fn run(&self, command: &MediaCommand, ctx: StepContext<'_>) -> StepOutcome;
}

/// ffmpeg-backed runner
pub struct FfmpegRunner {
    binary_path: String,
    grace_period: Duration,
    diagnostic_lines: usize,
}

impl FfmpegRunner {
    pub fn new<S: Into<String>>(binary_path: S, grace_period: Duration, diagnostic_lines: usize) -> Self {
        Self {
            binary_path: binary_path.into(),
            grace_period,
            diagnostic_lines: diagnostic_lines.max(1),
        }
    }

    pub fn from_config(config: &ToolsConfig) -> Result<Self> {
        Ok(Self::new(
            config.ffmpeg_path.clone(),
            config.cancel_grace()?,
            config.diagnostic_lines,
        ))
    }

    /// Check if the media tool can be started
    pub async fn check_availability(&self) -> Result<()> {
        self.get_version_info().await.map(|version| {
            info!("Media processor is available: {}", version);
        })
    }

    /// Get media processor version information
    pub async fn get_version_info(&self) -> Result<String> {
        let output = Command::new(&self.binary_path)
            .arg("-version")
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => ToolkitError::ToolNotFound(self.binary_path.clone()),
                _ => ToolkitError::StepFailed(format!("Failed to execute media processor: {}", e)),
            })?;

        if output.status.success() {
            let version_info = String::from_utf8_lossy(&output.stdout);
            let first_line = version_info.lines().next().unwrap_or("Unknown version");
            Ok(first_line.to_string())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(ToolkitError::StepFailed(format!("Media processor version check failed: {}", stderr)))
        }
    }

    /// SIGTERM first, SIGKILL once the grace period runs out
    async fn terminate(&self, child: &mut Child) {
        if let Ok(Some(_)) = child.try_wait() {
            return;
        }

        if self.request_stop(child) {
            if tokio::time::timeout(self.grace_period, child.wait()).await.is_ok() {
                return;
            }
            warn!("Media processor still running after {:?}, killing it", self.grace_period);
        }

        if let Err(e) = child.kill().await {
            warn!("Failed to kill media processor: {}", e);
        }
    }

    #[cfg(unix)]
    fn request_stop(&self, child: &Child) -> bool {
        use nix::sys::signal::{Signal, kill};
        use nix::unistd::Pid;

        let Some(pid) = child.id() else {
            return false;
        };
        debug!("Sending SIGTERM to {}", pid);
        match kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to signal process {}: {}", pid, e);
                false
            }
        }
    }

    #[cfg(not(unix))]
    fn request_stop(&self, _child: &Child) -> bool {
        false
    }
}

#[async_trait]
impl ProcessRunner for FfmpegRunner {
    fn program(&self) -> &str {
        &self.binary_path
    }

    async fn run(&self, command: &MediaCommand, mut ctx: StepContext<'_>) -> StepOutcome {
        let mut tail: VecDeque<String> = VecDeque::with_capacity(self.diagnostic_lines);

        if ctx.cancel.is_cancelled() {
            return StepOutcome::Canceled;
        }

        debug!("Executing media processing command: {}", command.command_line(&self.binary_path));

        let spawned = Command::new(&self.binary_path)
            .args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();
        let mut child = match spawned {
            Ok(child) => child,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                let reason = FailureReason::ToolNotFound(self.binary_path.clone());
                return StepOutcome::Failed(StepFailure::new(reason, tail));
            }
            Err(e) => {
                return StepOutcome::Failed(StepFailure::new(FailureReason::Spawn(e.to_string()), tail));
            }
        };

        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            self.terminate(&mut child).await;
            let reason = FailureReason::Io("output pipes unavailable".to_string());
            return StepOutcome::Failed(StepFailure::new(reason, tail));
        };
        let mut lines = FramedRead::new(stdout, OutputLineCodec)
            .merge(FramedRead::new(stderr, OutputLineCodec));

        loop {
            let next = tokio::select! {
                biased;
                _ = ctx.cancel.cancelled() => None,
                line = lines.next() => Some(line),
            };
            let line = match next {
                None => {
                    self.terminate(&mut child).await;
                    return StepOutcome::Canceled;
                }
                Some(None) => break,
                Some(Some(Ok(line))) => line,
                Some(Some(Err(e))) => {
                    debug!("Unreadable output from media processor: {}", e);
                    continue;
                }
            };

            if let Some(sink) = ctx.mirror.as_mut() {
                if let Err(e) = writeln!(sink, "{}", line) {
                    debug!("Failed to mirror output line: {}", e);
                }
            }
            if let Some(elapsed) = parse_elapsed(&line) {
                (ctx.on_progress)(StepProgress {
                    elapsed_seconds: elapsed,
                    percent: running_percent(elapsed, ctx.duration_seconds),
                });
            }
            if tail.len() == self.diagnostic_lines {
                tail.pop_front();
            }
            tail.push_back(line);
        }

        let status = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => None,
            status = child.wait() => Some(status),
        };
        match status {
            None => {
                self.terminate(&mut child).await;
                StepOutcome::Canceled
            }
            Some(Ok(status)) if status.success() => StepOutcome::Succeeded,
            Some(Ok(status)) => StepOutcome::Failed(StepFailure::new(FailureReason::Exit(status.code()), tail)),
            Some(Err(e)) => StepOutcome::Failed(StepFailure::new(FailureReason::Io(e.to_string()), tail)),
        }
    }
}

/// Longest run of bytes kept before a terminator is forced
const MAX_LINE_BYTES: usize = 64 * 1024;

/// Splits tool output on `\n` and on the bare `\r` ffmpeg uses for its stats line.
/// Empty lines are dropped and invalid UTF-8 is replaced.
#[derive(Debug, Default, Clone, Copy)]
pub struct OutputLineCodec;

impl Decoder for OutputLineCodec {
    type Item = String;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> std::io::Result<Option<String>> {
        loop {
            match src.iter().position(|b| *b == b'\n' || *b == b'\r') {
                Some(pos) => {
                    let raw = src.split_to(pos + 1);
                    if pos == 0 {
                        continue;
                    }
                    return Ok(Some(String::from_utf8_lossy(&raw[..pos]).into_owned()));
                }
                None if src.len() >= MAX_LINE_BYTES => {
                    let raw = src.split_to(src.len());
                    return Ok(Some(String::from_utf8_lossy(&raw).into_owned()));
                }
                None => return Ok(None),
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> std::io::Result<Option<String>> {
        if let Some(line) = self.decode(src)? {
            return Ok(Some(line));
        }
        if src.is_empty() {
            return Ok(None);
        }
        let raw = src.split_to(src.len());
        Ok(Some(String::from_utf8_lossy(&raw).into_owned()))
    }
}
