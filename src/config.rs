use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use crate::error::{Result, ToolkitError};
use crate::job::{JobSettings, OperationKind, TargetConfig};
use crate::language::LanguageFilterSet;

fn default_cancel_grace_secs() -> f64 {
    5.0
}

fn default_diagnostic_lines() -> usize {
    40
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub target: TargetConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Path to ffmpeg binary
    pub ffmpeg_path: String,
    /// Path to ffprobe binary
    pub ffprobe_path: String,
    /// Seconds between the graceful stop request and the forced kill
    #[serde(default = "default_cancel_grace_secs")]
    pub cancel_grace_secs: f64,
    /// Output lines kept for a failed step's diagnostic
    #[serde(default = "default_diagnostic_lines")]
    pub diagnostic_lines: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Where outputs go; defaults to `<input dir>/output`
    pub output_dir: Option<PathBuf>,
    pub operation: OperationKind,
    /// Subtitle languages to keep; `*` keeps every subtitle
    pub languages: LanguageFilterSet,
    pub overwrite: bool,
    pub skip_if_incompatible: bool,
    /// Write `logs/job_<name>_<time>.log` next to the outputs
    pub write_job_logs: bool,
    /// Scan input folders recursively
    #[serde(default)]
    pub recursive: bool,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: "ffmpeg".to_string(),
            ffprobe_path: "ffprobe".to_string(),
            cancel_grace_secs: default_cancel_grace_secs(),
            diagnostic_lines: default_diagnostic_lines(),
        }
    }
}

impl ToolsConfig {
    /// Grace period as a `Duration`; rejects negative, non-finite and out of range values
    pub fn cancel_grace(&self) -> Result<Duration> {
        Duration::try_from_secs_f64(self.cancel_grace_secs).map_err(|e| {
            ToolkitError::Config(format!(
                "cancel_grace_secs must be a non-negative number of seconds, got {}: {}",
                self.cancel_grace_secs, e
            ))
        })
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            output_dir: None,
            operation: OperationKind::ExtractUnifiedAv,
            languages: LanguageFilterSet::new(["pt-BR", "en"]),
            overwrite: false,
            skip_if_incompatible: false,
            write_job_logs: true,
            recursive: false,
        }
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ToolkitError::Config(format!("Failed to read config file: {}", e)))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| ToolkitError::Config(format!("Failed to parse config file: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ToolkitError::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| ToolkitError::Config(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.target.crf > 51 {
            return Err(ToolkitError::Config(format!(
                "crf must be between 0 and 51, got {}",
                self.target.crf
            )));
        }
        if self.target.audio_bitrate_kbps == 0 {
            return Err(ToolkitError::Config("audio bitrate must be positive".to_string()));
        }
        self.tools.cancel_grace()?;
        if self.tools.diagnostic_lines == 0 {
            return Err(ToolkitError::Config("diagnostic_lines must be at least 1".to_string()));
        }
        Ok(())
    }

    /// Settings for jobs admitted from `input_dir`
    pub fn job_settings(&self, input_dir: &Path) -> JobSettings {
        let output_dir = self
            .queue
            .output_dir
            .clone()
            .unwrap_or_else(|| input_dir.join("output"));
        JobSettings {
            output_dir,
            operation: self.queue.operation,
            target: self.target.clone(),
            languages: self.queue.languages.clone(),
            overwrite: self.queue.overwrite,
            skip_if_incompatible: self.queue.skip_if_incompatible,
        }
    }
}
