use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::catalog::StreamCatalog;
use crate::error::{Result, ToolkitError};
use crate::job::{Job, JobSettings};
use crate::media::Prober;
use crate::selector::select_streams;

/// File extensions picked up when scanning an input folder
pub const VIDEO_EXTENSIONS: &[&str] = &["mkv", "mp4", "avi", "mov", "ts", "m2ts", "wmv", "flv"];

/// Free-space source for the output directory
pub trait DiskSpace: Send + Sync {
    /// Bytes available to unprivileged writers, `None` when it cannot be determined
    fn available_bytes(&self, dir: &Path) -> Option<u64>;
}

/// Queries the filesystem holding the directory (or its closest existing ancestor)
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemDiskSpace;

impl DiskSpace for SystemDiskSpace {
    #[cfg(unix)]
    fn available_bytes(&self, dir: &Path) -> Option<u64> {
        let existing = dir
            .ancestors()
            .map(|p| if p.as_os_str().is_empty() { Path::new(".") } else { p })
            .find(|p| p.exists())?;

        match nix::sys::statvfs::statvfs(existing) {
            Ok(stats) => Some((stats.blocks_available() as u64).saturating_mul(stats.fragment_size() as u64)),
            Err(e) => {
                debug!("statvfs failed for {}: {}", existing.display(), e);
                None
            }
        }
    }

    #[cfg(not(unix))]
    fn available_bytes(&self, _dir: &Path) -> Option<u64> {
        None
    }
}

/// Fail with `InsufficientSpace` when `dir` has less than `required` bytes free.
/// Unknown free space passes.
pub fn check_space(disk: &dyn DiskSpace, dir: &Path, required: u64) -> Result<()> {
    match disk.available_bytes(dir) {
        Some(available) if available < required => Err(ToolkitError::InsufficientSpace {
            dir: dir.display().to_string(),
            available,
            required,
        }),
        Some(_) => Ok(()),
        None => {
            debug!("Free space unknown for {}, skipping check", dir.display());
            Ok(())
        }
    }
}

/// Probe one file and turn it into a `queued` or `incompatible` job
pub async fn admit(input: &Path, settings: &JobSettings, prober: &dyn Prober, disk: &dyn DiskSpace) -> Job {
    let input_path = input.to_path_buf();
    let incompatible = |catalog: StreamCatalog, size: u64, duration: f64, reason: String| {
        warn!("{} is incompatible: {}", input.display(), reason);
        Job::incompatible(input_path.clone(), settings.clone(), catalog, size, duration, reason)
    };

    let file_size = match tokio::fs::metadata(input).await {
        Ok(meta) => meta.len(),
        Err(e) => return incompatible(StreamCatalog::default(), 0, 0.0, format!("cannot read file: {}", e)),
    };

    let report = match prober.probe(input).await {
        Ok(report) => report,
        Err(e) => return incompatible(StreamCatalog::default(), file_size, 0.0, format!("probe failed: {}", e)),
    };

    let selection = select_streams(&report.catalog, &settings.languages);
    if selection.primary_video.is_none() {
        return incompatible(report.catalog, file_size, report.duration_seconds, "no video stream".to_string());
    }

    if let Err(e) = check_space(disk, &settings.output_dir, file_size) {
        return incompatible(report.catalog, file_size, report.duration_seconds, e.to_string());
    }

    info!(
        "Queued {} ({}; {} subtitle(s) selected)",
        input.display(),
        report.catalog.codec_summary(),
        selection.subtitles.len()
    );
    Job::queued(input_path.clone(), settings.clone(), report.catalog, file_size, report.duration_seconds)
}

/// Admit every file in order
pub async fn admit_all(inputs: &[PathBuf], settings: &JobSettings, prober: &dyn Prober, disk: &dyn DiskSpace) -> Vec<Job> {
    let mut jobs = Vec::with_capacity(inputs.len());
    for input in inputs {
        jobs.push(admit(input, settings, prober, disk).await);
    }
    jobs
}

pub fn is_video_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| VIDEO_EXTENSIONS.contains(&e.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Video files under `dir`, sorted by path
pub fn scan_inputs(dir: &Path, recursive: bool) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(ToolkitError::FileNotFound(dir.display().to_string()));
    }

    let max_depth = if recursive { usize::MAX } else { 1 };
    let mut files = Vec::new();
    for entry in WalkDir::new(dir).max_depth(max_depth) {
        let entry = entry.map_err(|e| ToolkitError::Io(e.into()))?;
        if entry.file_type().is_file() && is_video_file(entry.path()) {
            files.push(entry.into_path());
        }
    }
    files.sort();
    Ok(files)
}
