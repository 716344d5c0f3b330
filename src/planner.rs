use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::container::{Container, FALLBACK_CONTAINER};
use crate::error::{Result, ToolkitError};
use crate::job::{Job, JobSettings, OperationKind, input_stem};
use crate::media::MediaCommand;
use crate::selector::{Selection, select_streams};

/// Ordered steps for one job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    pub steps: Vec<MediaCommand>,
    /// Container of the combined output, when the operation writes one
    pub container: Option<Container>,
    /// Conditions known to make a step fail, reported with its error
    pub warnings: Vec<String>,
}

/// Plan a job against the current contents of its output directory
pub fn plan_job(job: &Job) -> Result<Plan> {
    let selection = select_streams(&job.streams, &job.settings.languages);
    build_plan(&job.input_path, &selection, &job.settings, &|p: &Path| p.exists())
}

/// Synthesize the steps for one input file.
///
/// `exists` reports whether a destination is already taken on disk; it is a
/// parameter so the same inputs always produce the same plan.
pub fn build_plan(
    input: &Path,
    selection: &Selection,
    settings: &JobSettings,
    exists: &dyn Fn(&Path) -> bool,
) -> Result<Plan> {
    let video = selection
        .primary_video
        .as_ref()
        .ok_or(ToolkitError::NoVideoStream)?;
    let mut namer = DestinationNamer::new(input, &settings.output_dir, settings.overwrite, exists);
    let target = &settings.target;
    let mut steps = Vec::new();
    let mut warnings = Vec::new();
    let mut container = None;

    let base = || MediaCommand::new("").preamble(settings.overwrite).input(input);

    match settings.operation {
        OperationKind::ExtractSeparate => {
            // only the video goes into this file
            let video_container = if target.container.accepts_video(&video.codec_name) {
                target.container
            } else {
                FALLBACK_CONTAINER
            };
            let mut cmd = base().map_stream(video.index).copy_all();
            if video_container.is_quicktime_family() {
                cmd = cmd.faststart();
            }
            let dest = namer.claim(Some("video"), video_container.extension());
            steps.push(labelled(cmd.output(dest), "Extracting video".to_string()));

            for (n, audio) in selection.audio.iter().enumerate() {
                let dest = namer.claim(Some(format!("audio{}", n + 1).as_str()), "mka");
                let cmd = base().map_stream(audio.index).copy_all().output(dest);
                steps.push(labelled(cmd, format!("Extracting audio {}", n + 1)));
            }
            push_subtitle_steps(&mut steps, &mut namer, selection, &base);
        }
        OperationKind::ExtractUnifiedAv => {
            let chosen = selection.remux_container(target.container);
            if chosen != target.container {
                debug!(
                    "{} cannot hold the selected codecs, remuxing to {}",
                    target.container, chosen
                );
            }
            let mut cmd = base().map_stream(video.index);
            for audio in &selection.audio {
                cmd = cmd.map_stream(audio.index);
            }
            cmd = cmd.copy_all();
            if chosen.is_quicktime_family() {
                cmd = cmd.faststart();
            }
            let dest = namer.claim(None, chosen.extension());
            steps.push(labelled(cmd.output(dest), "Remuxing video+audio".to_string()));
            container = Some(chosen);

            push_subtitle_steps(&mut steps, &mut namer, selection, &base);
        }
        OperationKind::ExtractFullyUnified => {
            let chosen = selection.remux_container(target.container);
            let mut cmd = base().map_stream(video.index);
            for audio in &selection.audio {
                cmd = cmd.map_stream(audio.index);
            }
            for subtitle in &selection.subtitles {
                cmd = cmd.map_stream(subtitle.index);
            }
            cmd = cmd.copy_all();
            if chosen.is_quicktime_family() {
                cmd = cmd.faststart();
            }
            for conflict in selection.subtitle_conflicts(chosen) {
                let message = format!(
                    "subtitle #{} ({}) cannot be muxed into {}",
                    conflict.index, conflict.codec_name, chosen
                );
                warn!("{}: {}", input.display(), message);
                warnings.push(message);
            }
            let dest = namer.claim(None, chosen.extension());
            steps.push(labelled(cmd.output(dest), "Remuxing video+audio+subtitles".to_string()));
            container = Some(chosen);
        }
        OperationKind::Reencode => {
            let first_audio = selection.audio.first();
            let mut cmd = base().map_stream(video.index);
            if let Some(audio) = first_audio {
                cmd = cmd.map_stream(audio.index);
            }
            cmd = cmd.video_codec(target.video_codec.encoder());
            if target.video_codec.supports_crf() {
                cmd = cmd.crf(target.crf).preset(target.preset.clone());
            }
            if first_audio.is_some() {
                cmd = cmd
                    .audio_codec(target.audio_codec.encoder())
                    .audio_bitrate_kbps(target.audio_bitrate_kbps);
            }
            if target.container.is_quicktime_family() {
                cmd = cmd.faststart();
            }
            let dest = namer.claim(None, target.container.extension());
            steps.push(labelled(cmd.output(dest), "Transcoding".to_string()));
            container = Some(target.container);
        }
    }

    Ok(Plan {
        steps,
        container,
        warnings,
    })
}

fn push_subtitle_steps(
    steps: &mut Vec<MediaCommand>,
    namer: &mut DestinationNamer<'_>,
    selection: &Selection,
    base: &dyn Fn() -> MediaCommand,
) {
    for (n, subtitle) in selection.subtitles.iter().enumerate() {
        let role = format!("sub{}.{}", n + 1, subtitle.language_tag());
        let dest = namer.claim(Some(role.as_str()), "srt");
        let cmd = base()
            .map_stream(subtitle.index)
            .subtitle_codec("srt")
            .output(dest);
        steps.push(labelled(
            cmd,
            format!("Extracting subtitle {} ({})", n + 1, subtitle.language_tag()),
        ));
    }
}

fn labelled(mut cmd: MediaCommand, label: String) -> MediaCommand {
    cmd.description = label;
    cmd
}

/// Deterministic destination names: `<stem>[.<role>].<ext>`, then
/// `<stem>[.<role>] (<n>).<ext>` with the smallest free `n`.
struct DestinationNamer<'a> {
    input: &'a Path,
    dir: &'a Path,
    stem: String,
    overwrite: bool,
    exists: &'a dyn Fn(&Path) -> bool,
    claimed: HashSet<PathBuf>,
}

impl<'a> DestinationNamer<'a> {
    fn new(input: &'a Path, dir: &'a Path, overwrite: bool, exists: &'a dyn Fn(&Path) -> bool) -> Self {
        Self {
            input,
            dir,
            stem: input_stem(input),
            overwrite,
            exists,
            claimed: HashSet::new(),
        }
    }

    fn claim(&mut self, role: Option<&str>, ext: &str) -> PathBuf {
        let name = match role {
            Some(role) => format!("{}.{}", self.stem, role),
            None => self.stem.clone(),
        };
        let mut candidate = self.dir.join(format!("{}.{}", name, ext));
        let mut n = 1u32;
        while self.is_taken(&candidate) {
            candidate = self.dir.join(format!("{} ({}).{}", name, n, ext));
            n += 1;
        }
        self.claimed.insert(candidate.clone());
        candidate
    }

    fn is_taken(&self, path: &Path) -> bool {
        // never write over the input, even with overwrite on
        self.claimed.contains(path) || path == self.input || (!self.overwrite && (self.exists)(path))
    }
}
