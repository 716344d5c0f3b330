use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use uuid::Uuid;

use crate::catalog::StreamCatalog;
use crate::container::{AudioCodec, Container, VideoCodec};
use crate::error::ToolkitError;
use crate::language::LanguageFilterSet;

pub type JobId = Uuid;

/// What to do with each input file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OperationKind {
    /// Video, every audio stream and matched subtitles each to their own file
    ExtractSeparate,
    /// Video plus all audio in one file, matched subtitles as separate files
    ExtractUnifiedAv,
    /// Video, all audio and matched subtitles in one file
    ExtractFullyUnified,
    /// Re-encode the primary video and first audio stream
    Reencode,
}

impl OperationKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::ExtractSeparate => "extract-separate",
            Self::ExtractUnifiedAv => "extract-unified-av",
            Self::ExtractFullyUnified => "extract-fully-unified",
            Self::Reencode => "reencode",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for OperationKind {
    type Err = ToolkitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('_', "-").as_str() {
            "extract-separate" | "separate" => Ok(Self::ExtractSeparate),
            "extract-unified-av" | "unified-av" => Ok(Self::ExtractUnifiedAv),
            "extract-fully-unified" | "fully-unified" | "unified" => Ok(Self::ExtractFullyUnified),
            "reencode" | "transcode" => Ok(Self::Reencode),
            _ => Err(ToolkitError::Config(format!(
                "Invalid operation '{}'. Valid operations: extract-separate, extract-unified-av, extract-fully-unified, reencode",
                s
            ))),
        }
    }
}

/// Target container and encoding parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetConfig {
    pub container: Container,
    pub video_codec: VideoCodec,
    pub audio_codec: AudioCodec,
    /// Constant rate factor for x264/x265 (lower = better quality)
    pub crf: u8,
    pub audio_bitrate_kbps: u32,
    /// Encoder speed preset for x264/x265
    pub preset: String,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            container: Container::Mp4,
            video_codec: VideoCodec::H264,
            audio_codec: AudioCodec::Aac,
            crf: 20,
            audio_bitrate_kbps: 192,
            preset: "veryfast".to_string(),
        }
    }
}

/// Immutable per-job configuration handed to selection and planning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSettings {
    pub output_dir: PathBuf,
    pub operation: OperationKind,
    pub target: TargetConfig,
    pub languages: LanguageFilterSet,
    pub overwrite: bool,
    pub skip_if_incompatible: bool,
}

impl JobSettings {
    pub fn new<P: Into<PathBuf>>(output_dir: P, operation: OperationKind) -> Self {
        Self {
            output_dir: output_dir.into(),
            operation,
            target: TargetConfig::default(),
            languages: LanguageFilterSet::new(["pt-BR", "en"]),
            overwrite: false,
            skip_if_incompatible: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Incompatible,
    Running,
    Done,
    Error,
    Canceled,
    Skipped,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Error | Self::Canceled | Self::Skipped)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Queued => "queued",
            Self::Incompatible => "incompatible",
            Self::Running => "running",
            Self::Done => "done",
            Self::Error => "error",
            Self::Canceled => "canceled",
            Self::Skipped => "skipped",
        };
        f.write_str(name)
    }
}

/// One input file, its configuration and its runtime state
#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub input_path: PathBuf,
    pub settings: JobSettings,
    pub streams: StreamCatalog,
    pub file_size_bytes: u64,
    /// 0.0 means unknown
    pub duration_seconds: f64,
    pub status: JobStatus,
    pub last_message: String,
    pub percent: Option<u8>,
    /// Output tail of the failing step
    pub diagnostic: Option<String>,
}

impl Job {
    /// A job that passed admission checks
    pub fn queued(
        input_path: PathBuf,
        settings: JobSettings,
        streams: StreamCatalog,
        file_size_bytes: u64,
        duration_seconds: f64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            input_path,
            settings,
            streams,
            file_size_bytes,
            duration_seconds: sanitize_duration(duration_seconds),
            status: JobStatus::Queued,
            last_message: String::new(),
            percent: None,
            diagnostic: None,
        }
    }

    /// A job that failed admission; it can only be skipped or removed
    pub fn incompatible<S: Into<String>>(
        input_path: PathBuf,
        settings: JobSettings,
        streams: StreamCatalog,
        file_size_bytes: u64,
        duration_seconds: f64,
        reason: S,
    ) -> Self {
        let mut job = Self::queued(input_path, settings, streams, file_size_bytes, duration_seconds);
        job.status = JobStatus::Incompatible;
        job.last_message = reason.into();
        job
    }

    pub fn file_name(&self) -> String {
        self.input_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.input_path.display().to_string())
    }

    /// Input file name without its extension
    pub fn stem(&self) -> String {
        input_stem(&self.input_path)
    }
}

pub fn input_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "output".to_string())
}

fn sanitize_duration(seconds: f64) -> f64 {
    if seconds.is_finite() && seconds > 0.0 {
        seconds
    } else {
        0.0
    }
}
