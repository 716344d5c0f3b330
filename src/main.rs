//! dlnakit - batch remux, track extraction and transcoding queue
//!
//! Entry point for the command line front end. Every decision about streams,
//! steps and job state is made by the library; this file only wires it up.

use anyhow::{Result, bail};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{Level, info, warn};
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use dlnakit::admission::{SystemDiskSpace, admit, admit_all, scan_inputs};
use dlnakit::cli::{Args, Commands};
use dlnakit::config::Config;
use dlnakit::job::{Job, JobId, JobStatus};
use dlnakit::language::LanguageFilterSet;
use dlnakit::media::{FfmpegRunner, FfprobeProber, Prober};
use dlnakit::planner::plan_job;
use dlnakit::queue::{JobEvent, JobOutcome, JobQueue};
use dlnakit::selector::select_streams;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Setup logging to both console and file
    setup_logging(args.verbose)?;

    let mut config = match &args.config {
        Some(config_path) => Config::from_file(config_path)?,
        None => {
            if Path::new("config.toml").exists() {
                info!("Found config.toml in current directory, loading...");
                Config::from_file("config.toml")?
            } else {
                Config::default()
            }
        }
    };

    match args.command {
        Commands::InitConfig { output, force } => {
            if output.exists() && !force {
                bail!("{} already exists, use --force to replace it", output.display());
            }
            Config::default().save_to_file(&output)?;
            println!("Wrote default configuration to {}", output.display());
        }
        Commands::Probe { input, langs } => {
            let languages = langs
                .map(|l| LanguageFilterSet::parse(&l))
                .unwrap_or_else(|| config.queue.languages.clone());
            let prober = FfprobeProber::new(config.tools.ffprobe_path.clone());
            let report = prober.probe(&input).await?;

            println!("\n{}", input.display());
            println!("Duration: {:.2}s", report.duration_seconds);
            println!("{:<6} {:<10} {:<20} {:<8}", "Index", "Kind", "Codec", "Language");
            println!("{}", "-".repeat(48));
            for stream in report.catalog.streams() {
                println!(
                    "{:<6} {:<10} {:<20} {:<8}",
                    stream.index,
                    stream.kind.to_string(),
                    stream.codec_name,
                    stream.language_tag()
                );
            }

            let selection = select_streams(&report.catalog, &languages);
            let target = config.target.container;
            println!("\nLanguages: {}", languages);
            match &selection.primary_video {
                Some(video) => println!("Video: #{} ({})", video.index, video.codec_name),
                None => println!("Video: none (file is incompatible)"),
            }
            println!("Audio: {:?}", selection.audio_indices());
            println!("Subtitles: {:?}", selection.subtitle_indices());
            println!(
                "Stream copy into {}: {}",
                target,
                if selection.container_compatible(target) {
                    "yes".to_string()
                } else {
                    format!("no, falls back to {}", selection.remux_container(target))
                }
            );
        }
        Commands::Plan { input, job } => {
            job.apply(&mut config)?;
            let input_dir = input.parent().unwrap_or_else(|| Path::new("."));
            let settings = config.job_settings(input_dir);
            let prober = FfprobeProber::new(config.tools.ffprobe_path.clone());

            let admitted = admit(&input, &settings, &prober, &SystemDiskSpace).await;
            if admitted.status == JobStatus::Incompatible {
                bail!("{} is incompatible: {}", input.display(), admitted.last_message);
            }

            let plan = plan_job(&admitted)?;
            let total = plan.steps.len();
            for (n, step) in plan.steps.iter().enumerate() {
                println!("[{}/{}] {} -> {}", n + 1, total, step.description, step.destination.display());
                println!("    {}", step.command_line(&config.tools.ffmpeg_path));
            }
            for warning in &plan.warnings {
                println!("warning: {}", warning);
            }
        }
        Commands::Run {
            input_dir,
            recursive,
            job,
        } => {
            job.apply(&mut config)?;
            run_queue(&config, &input_dir, recursive || config.queue.recursive).await?;
        }
    }

    Ok(())
}

async fn run_queue(config: &Config, input_dir: &Path, recursive: bool) -> Result<()> {
    let runner = FfmpegRunner::from_config(&config.tools)?;
    runner.check_availability().await?;

    let inputs = scan_inputs(input_dir, recursive)?;
    if inputs.is_empty() {
        println!("No video files found in {}", input_dir.display());
        return Ok(());
    }
    info!("Found {} video file(s) in {}", inputs.len(), input_dir.display());

    let settings = config.job_settings(input_dir);
    let prober = FfprobeProber::new(config.tools.ffprobe_path.clone());
    let jobs = admit_all(&inputs, &settings, &prober, &SystemDiskSpace).await;
    let names: HashMap<JobId, String> = jobs.iter().map(|j| (j.id, j.file_name())).collect();

    let interrupt = CancellationToken::new();
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let mut queue = JobQueue::new(Arc::new(runner), Arc::new(SystemDiskSpace))
        .with_job_logs(config.queue.write_job_logs)
        .with_observer(events_tx)
        .with_stop_signal(interrupt.clone());
    queue.extend(jobs);

    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, canceling the running job");
            interrupt.cancel();
        }
    });
    let display = tokio::spawn(show_progress(events_rx, names));

    // No interactive operator here, so the command channel starts closed
    let (_, commands_rx) = mpsc::channel(1);
    let report = queue.run(commands_rx).await;
    ctrl_c.abort();
    let _ = display.await;

    print_summary(&report.jobs);
    if let Some((id, reason)) = report.blocked_by {
        let name = file_name_of(&report.jobs, id);
        bail!("Queue stopped at incompatible file {}: {} (use --skip-incompatible to pass it)", name, reason);
    }
    Ok(())
}

fn file_name_of(jobs: &[Job], id: JobId) -> String {
    jobs.iter()
        .find(|j| j.id == id)
        .map(|j| j.file_name())
        .unwrap_or_else(|| id.to_string())
}

/// One progress bar per running job, driven by queue events
async fn show_progress(mut events: mpsc::UnboundedReceiver<JobEvent>, names: HashMap<JobId, String>) -> Result<()> {
    let style = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos:>3}% {prefix} {msg}")?
        .progress_chars("#>-");
    let mut bar: Option<ProgressBar> = None;

    while let Some(event) = events.recv().await {
        match event {
            JobEvent::Started { id, .. } => {
                let pb = ProgressBar::new(100);
                pb.set_style(style.clone());
                pb.set_prefix(names.get(&id).cloned().unwrap_or_default());
                bar = Some(pb);
            }
            JobEvent::Phase { step, total_steps, label, .. } => {
                if let Some(pb) = &bar {
                    pb.set_position(0);
                    pb.set_message(format!("{} ({}/{})", label, step, total_steps));
                }
            }
            JobEvent::Progress { percent, .. } => {
                if let (Some(pb), Some(percent)) = (&bar, percent) {
                    pb.set_position(percent as u64);
                } else if let Some(pb) = &bar {
                    pb.tick();
                }
            }
            JobEvent::Finished { outcome, .. } => {
                if let Some(pb) = bar.take() {
                    match outcome {
                        JobOutcome::Done { outputs } => {
                            pb.set_position(100);
                            pb.finish_with_message(format!("done, {} output(s)", outputs.len()));
                        }
                        JobOutcome::Failed { message, .. } => pb.abandon_with_message(message),
                        JobOutcome::Canceled => pb.abandon_with_message("canceled"),
                    }
                }
            }
        }
    }
    Ok(())
}

fn print_summary(jobs: &[Job]) {
    println!("\n{:<14} {:<40} {}", "Status", "File", "Message");
    println!("{}", "-".repeat(90));
    for job in jobs {
        println!("{:<14} {:<40} {}", job.status.to_string(), job.file_name(), job.last_message);
    }

    let count = |status: JobStatus| jobs.iter().filter(|j| j.status == status).count();
    println!(
        "\n{} done, {} failed, {} canceled, {} skipped, {} incompatible",
        count(JobStatus::Done),
        count(JobStatus::Error),
        count(JobStatus::Canceled),
        count(JobStatus::Skipped),
        count(JobStatus::Incompatible)
    );
}

/// Setup logging to both console and file
fn setup_logging(verbose: bool) -> Result<()> {
    // Create log directory
    let log_dir = std::env::current_dir()?.join(".dlnakit").join("log");
    std::fs::create_dir_all(&log_dir)?;

    // Set up file appender with daily rotation
    let file_appender = rolling::daily(&log_dir, "dlnakit.log");
    let (non_blocking_file, guard) = non_blocking(file_appender);
    // Keep the guard alive for the duration of the program
    std::mem::forget(guard);

    let log_level = if verbose { Level::DEBUG } else { Level::INFO };

    let console_layer = fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);

    let file_layer = fmt::layer()
        .with_writer(non_blocking_file)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(false); // No ANSI colors in file

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(log_level.into()))
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    info!(
        "Logging initialized - console: {}, file: {}",
        log_level,
        log_dir.join("dlnakit.log").display()
    );

    Ok(())
}
