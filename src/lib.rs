//! dlnakit - batch job execution engine for ffmpeg
//!
//! Probes container files, picks the streams to act on, turns each file into
//! an ordered list of ffmpeg invocations and runs them one job at a time with
//! live progress, cancellation and per-job diagnostics.

pub mod admission;
pub mod catalog;
pub mod cli;
pub mod config;
pub mod container;
pub mod error;
pub mod job;
pub mod joblog;
pub mod language;
pub mod media;
pub mod planner;
pub mod queue;
pub mod selector;
