use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;

use crate::config::Config;
use crate::container::{AudioCodec, Container, VideoCodec};
use crate::error::Result;
use crate::job::OperationKind;
use crate::language::LanguageFilterSet;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Admit every video file in a folder and run the queue
    Run {
        /// Folder containing the input files
        #[arg(short, long)]
        input_dir: PathBuf,

        /// Scan sub-folders too
        #[arg(short, long)]
        recursive: bool,

        #[command(flatten)]
        job: JobOptions,
    },

    /// Show the probed streams and the selection for one file
    Probe {
        /// Input video file
        #[arg(short, long)]
        input: PathBuf,

        /// Subtitle languages (comma-separated, `*` for all)
        #[arg(short, long)]
        langs: Option<String>,
    },

    /// Print the steps that would run for one file without running them
    Plan {
        /// Input video file
        #[arg(short, long)]
        input: PathBuf,

        #[command(flatten)]
        job: JobOptions,
    },

    /// Write a configuration file with default values
    InitConfig {
        /// Output configuration file
        #[arg(short, long, default_value = "config.toml")]
        output: PathBuf,

        /// Replace an existing file
        #[arg(long)]
        force: bool,
    },
}

/// Per-run overrides of the `[queue]` and `[target]` configuration
#[derive(ClapArgs, Default)]
pub struct JobOptions {
    /// Output directory for processed files
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,

    /// extract-separate, extract-unified-av, extract-fully-unified or reencode
    #[arg(long)]
    pub operation: Option<String>,

    /// Target container (mp4, mkv, mov)
    #[arg(long)]
    pub container: Option<String>,

    /// Target video codec for reencode (h264, hevc, mpeg2, mpeg1)
    #[arg(long)]
    pub vcodec: Option<String>,

    /// Target audio codec for reencode (aac, ac3, mp3, vorbis, opus)
    #[arg(long)]
    pub acodec: Option<String>,

    /// Constant rate factor for x264/x265
    #[arg(long)]
    pub crf: Option<u8>,

    /// Audio bitrate in kbps
    #[arg(long)]
    pub abr: Option<u32>,

    /// Subtitle languages (comma-separated, `*` for all)
    #[arg(short, long)]
    pub langs: Option<String>,

    /// Replace existing outputs instead of numbering new ones
    #[arg(long)]
    pub overwrite: bool,

    /// Skip incompatible files instead of stopping the queue at them
    #[arg(long)]
    pub skip_incompatible: bool,
}

impl JobOptions {
    /// Layer the flags over the loaded configuration
    pub fn apply(&self, config: &mut Config) -> Result<()> {
        if let Some(dir) = &self.output_dir {
            config.queue.output_dir = Some(dir.clone());
        }
        if let Some(operation) = &self.operation {
            config.queue.operation = operation.parse::<OperationKind>()?;
        }
        if let Some(container) = &self.container {
            config.target.container = container.parse::<Container>()?;
        }
        if let Some(vcodec) = &self.vcodec {
            config.target.video_codec = vcodec.parse::<VideoCodec>()?;
        }
        if let Some(acodec) = &self.acodec {
            config.target.audio_codec = acodec.parse::<AudioCodec>()?;
        }
        if let Some(crf) = self.crf {
            config.target.crf = crf;
        }
        if let Some(abr) = self.abr {
            config.target.audio_bitrate_kbps = abr;
        }
        if let Some(langs) = &self.langs {
            config.queue.languages = LanguageFilterSet::parse(langs);
        }
        if self.overwrite {
            config.queue.overwrite = true;
        }
        if self.skip_incompatible {
            config.queue.skip_if_incompatible = true;
        }
        config.validate()
    }
}
