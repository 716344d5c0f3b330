use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::Path;
use tokio::process::Command;
use tracing::debug;

use crate::catalog::{StreamCatalog, StreamDescriptor, StreamKind};
use crate::error::{Result, ToolkitError};

/// Stream metadata and container duration for one file
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeReport {
    pub catalog: StreamCatalog,
    /// 0.0 when the container reports no usable duration
    pub duration_seconds: f64,
}

/// Source of stream metadata for input files
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, path: &Path) -> Result<ProbeReport>;
}

/// ffprobe-backed prober
pub struct FfprobeProber {
    binary_path: String,
}

impl FfprobeProber {
    pub fn new<S: Into<String>>(binary_path: S) -> Self {
        Self {
            binary_path: binary_path.into(),
        }
    }
}

#[async_trait]
impl Prober for FfprobeProber {
    async fn probe(&self, path: &Path) -> Result<ProbeReport> {
        debug!("Probing {}", path.display());

        let output = Command::new(&self.binary_path)
            .args(["-v", "error", "-print_format", "json", "-show_streams", "-show_format"])
            .arg(path)
            .output()
            .await
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => ToolkitError::ToolNotFound(self.binary_path.clone()),
                _ => ToolkitError::Probe(format!("Failed to execute {}: {}", self.binary_path, e)),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ToolkitError::Probe(stderr.trim().to_string()));
        }

        parse_probe_output(&String::from_utf8_lossy(&output.stdout))
    }
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    streams: Vec<FfprobeStream>,
    format: Option<FfprobeFormat>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    index: u32,
    codec_type: Option<String>,
    codec_name: Option<String>,
    #[serde(default)]
    tags: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
}

/// Turn ffprobe's JSON into a catalog. Output without any stream is unusable.
pub fn parse_probe_output(json: &str) -> Result<ProbeReport> {
    let parsed: FfprobeOutput = serde_json::from_str(json)
        .map_err(|e| ToolkitError::Probe(format!("Unreadable probe output: {}", e)))?;

    if parsed.streams.is_empty() {
        return Err(ToolkitError::Probe("no streams found".to_string()));
    }

    let streams = parsed
        .streams
        .into_iter()
        .filter_map(|s| {
            let kind = StreamKind::from_codec_type(s.codec_type.as_deref()?)?;
            let codec = s.codec_name.unwrap_or_else(|| "unknown".to_string());
            let language = s
                .tags
                .get("language")
                .or_else(|| s.tags.get("LANGUAGE"))
                .cloned()
                .unwrap_or_default();
            Some(StreamDescriptor::new(s.index, kind, codec).with_language(language))
        })
        .collect();

    let duration_seconds = parsed
        .format
        .and_then(|f| f.duration)
        .and_then(|d| d.trim().parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d > 0.0)
        .unwrap_or(0.0);

    Ok(ProbeReport {
        catalog: StreamCatalog::new(streams),
        duration_seconds,
    })
}
