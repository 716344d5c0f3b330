use chrono::Local;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::job::Job;
use crate::media::{FailureReason, MediaCommand, StepFailure, StepOutcome};

/// Per-job diagnostic log under `<output_dir>/logs`.
///
/// Receives the runner's output lines through its `Write` impl.
pub struct JobLog {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl JobLog {
    /// Create `logs/job_<stem>_<YYYYmmdd_HHMMSS>.log` in the job's output directory
    pub fn create(job: &Job) -> Result<Self> {
        let dir = job.settings.output_dir.join("logs");
        fs::create_dir_all(&dir)?;

        let base = format!("job_{}_{}", job.stem(), Local::now().format("%Y%m%d_%H%M%S"));
        let mut n = 1u32;
        let (path, file) = loop {
            let name = if n == 1 {
                format!("{}.log", base)
            } else {
                format!("{}_{}.log", base, n)
            };
            let path = dir.join(name);
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => break (path, file),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => n += 1,
                Err(e) => return Err(e.into()),
            }
        };

        let mut log = Self {
            path,
            writer: BufWriter::new(file),
        };
        log.write_header(job)?;
        Ok(log)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_header(&mut self, job: &Job) -> Result<()> {
        let settings = &job.settings;
        let w = &mut self.writer;
        writeln!(w, "Input: {}", job.input_path.display())?;
        writeln!(w, "Output dir: {}", settings.output_dir.display())?;
        writeln!(w, "Operation: {}", settings.operation)?;
        writeln!(
            w,
            "Target: {} video={} audio={} crf={} abr={}k preset={}",
            settings.target.container,
            settings.target.video_codec.encoder(),
            settings.target.audio_codec.encoder(),
            settings.target.crf,
            settings.target.audio_bitrate_kbps,
            settings.target.preset
        )?;
        writeln!(w, "Languages: {}", settings.languages)?;
        writeln!(
            w,
            "Overwrite: {}  Skip if incompatible: {}",
            settings.overwrite, settings.skip_if_incompatible
        )?;
        writeln!(w, "Size: {} bytes  Duration: {:.2}s", job.file_size_bytes, job.duration_seconds)?;
        writeln!(w, "Streams:")?;
        for stream in job.streams.streams() {
            writeln!(
                w,
                "  #{} {} {} [{}]",
                stream.index,
                stream.kind,
                stream.codec_name,
                stream.language_tag()
            )?;
        }
        Ok(())
    }

    pub fn begin_step(&mut self, program: &str, step: &MediaCommand) -> Result<()> {
        writeln!(self.writer, "\n=== {} ===", step.description)?;
        writeln!(self.writer, "=== CMD === {}", step.command_line(program))?;
        Ok(())
    }

    pub fn end_step(&mut self, outcome: &StepOutcome) -> Result<()> {
        match outcome {
            StepOutcome::Succeeded => writeln!(self.writer, "rc=0")?,
            StepOutcome::Failed(failure) => writeln!(self.writer, "rc={} ({})", rc(failure), failure)?,
            StepOutcome::Canceled => writeln!(self.writer, "rc=canceled")?,
        }
        self.writer.flush()?;
        Ok(())
    }

    pub fn note(&mut self, message: &str) -> Result<()> {
        writeln!(self.writer, "{}", message)?;
        self.writer.flush()?;
        Ok(())
    }
}

fn rc(failure: &StepFailure) -> String {
    match failure.reason {
        FailureReason::Exit(Some(code)) => code.to_string(),
        _ => "-".to_string(),
    }
}

impl Write for JobLog {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.writer.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{StreamCatalog, StreamDescriptor, StreamKind};
    use crate::job::{JobSettings, OperationKind};
    use assert_fs::TempDir;
    use assert_fs::prelude::*;

    fn job(output_dir: &Path) -> Job {
        let catalog = StreamCatalog::new(vec![
            StreamDescriptor::new(0, StreamKind::Video, "h264"),
            StreamDescriptor::new(1, StreamKind::Audio, "aac").with_language("eng"),
        ]);
        Job::queued(
            "/in/My Movie.mkv".into(),
            JobSettings::new(output_dir, OperationKind::Reencode),
            catalog,
            2048,
            60.0,
        )
    }

    #[test]
    fn test_log_records_steps_and_output() {
        let temp = TempDir::new().unwrap();
        let job = job(temp.path());
        let mut log = JobLog::create(&job).unwrap();
        let step = MediaCommand::new("Transcoding").args(["-i", "/in/My Movie.mkv"]).output("/out/x.mp4");

        log.begin_step("ffmpeg", &step).unwrap();
        writeln!(log, "frame=10 time=00:00:01.00").unwrap();
        log.end_step(&StepOutcome::Failed(StepFailure {
            reason: FailureReason::Exit(Some(1)),
            output_tail: vec!["Conversion failed!".to_string()],
        }))
        .unwrap();

        let path = log.path().to_path_buf();
        drop(log);
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("job_My Movie_"));
        assert!(name.ends_with(".log"));
        assert_eq!(path.parent().unwrap(), temp.child("logs").path());

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.contains("Operation: reencode"));
        assert!(text.contains("#1 audio aac [eng]"));
        assert!(text.contains("=== CMD === ffmpeg -i \"/in/My Movie.mkv\""));
        assert!(text.contains("frame=10 time=00:00:01.00"));
        assert!(text.contains("rc=1 (exit code 1)"));
    }

    #[test]
    fn test_same_second_logs_do_not_collide() {
        let temp = TempDir::new().unwrap();
        let job = job(temp.path());
        let first = JobLog::create(&job).unwrap();
        let second = JobLog::create(&job).unwrap();
        assert_ne!(first.path(), second.path());
    }
}
