// Media tool plumbing
//
// - Commands: argument vector builder for one ffmpeg step
// - Processor: runs a step, streams progress, handles cancellation
// - Probe: ffprobe adapter producing a stream catalog
// - Progress: elapsed-time marker parsing

pub mod commands;
pub mod probe;
pub mod processor;
pub mod progress;

pub use commands::MediaCommand;
pub use probe::{FfprobeProber, ProbeReport, Prober};
pub use processor::{
    FailureReason, FfmpegRunner, OutputLineCodec, ProcessRunner, StepContext, StepFailure, StepOutcome,
    StepProgress,
};
