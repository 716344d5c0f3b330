use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::admission::{DiskSpace, check_space};
use crate::error::{Result, ToolkitError};
use crate::job::{Job, JobId, JobStatus};
use crate::joblog::JobLog;
use crate::media::{FailureReason, ProcessRunner, StepContext, StepFailure, StepOutcome, StepProgress};
use crate::planner::{Plan, plan_job};

/// Notifications from the execution task, in order per job. `Finished` is last.
#[derive(Debug, Clone, PartialEq)]
pub enum JobEvent {
    Started {
        id: JobId,
        total_steps: usize,
    },
    Phase {
        id: JobId,
        /// 1-based
        step: usize,
        total_steps: usize,
        label: String,
    },
    Progress {
        id: JobId,
        elapsed_seconds: f64,
        percent: Option<u8>,
    },
    Finished {
        id: JobId,
        outcome: JobOutcome,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Done { outputs: Vec<PathBuf> },
    Failed { message: String, diagnostic: Option<String> },
    Canceled,
}

/// Operator actions accepted while the queue runs
#[derive(Debug)]
pub enum QueueCommand {
    Cancel(JobId),
    Skip(JobId),
    SetSkipIfIncompatible(JobId, bool),
    Remove(JobId),
    Add(Box<Job>),
    ClearFinished,
    Shutdown,
}

/// Result of one dispatch scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    Started(JobId),
    /// An incompatible job without the skip flag stops the scan
    Blocked { id: JobId, reason: String },
    /// A job is already running
    Busy,
    /// Nothing left to start
    Drained,
}

/// Final job list of a `run`, plus the job that stopped the scan, if any
#[derive(Debug, Clone)]
pub struct QueueReport {
    pub jobs: Vec<Job>,
    pub blocked_by: Option<(JobId, String)>,
}

struct RunningJob {
    id: JobId,
    cancel: CancellationToken,
}

/// Ordered jobs with at most one running at a time.
///
/// The queue owns every `Job`; the execution task only reports back through
/// `JobEvent`s, so job state is never shared.
pub struct JobQueue {
    jobs: Vec<Job>,
    running: Option<RunningJob>,
    runner: Arc<dyn ProcessRunner>,
    disk: Arc<dyn DiskSpace>,
    events_tx: mpsc::UnboundedSender<JobEvent>,
    events_rx: mpsc::UnboundedReceiver<JobEvent>,
    observer: Option<mpsc::UnboundedSender<JobEvent>>,
    write_job_logs: bool,
    wait_when_blocked: bool,
    stop_signal: CancellationToken,
    stopping: bool,
}

impl JobQueue {
    pub fn new(runner: Arc<dyn ProcessRunner>, disk: Arc<dyn DiskSpace>) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            jobs: Vec::new(),
            running: None,
            runner,
            disk,
            events_tx,
            events_rx,
            observer: None,
            write_job_logs: false,
            wait_when_blocked: false,
            stop_signal: CancellationToken::new(),
            stopping: false,
        }
    }

    pub fn with_job_logs(mut self, enabled: bool) -> Self {
        self.write_job_logs = enabled;
        self
    }

    /// Keep waiting for operator commands while an incompatible job blocks the scan
    pub fn wait_when_blocked(mut self, wait: bool) -> Self {
        self.wait_when_blocked = wait;
        self
    }

    /// Shut the queue down once `signal` is cancelled
    pub fn with_stop_signal(mut self, signal: CancellationToken) -> Self {
        self.stop_signal = signal;
        self
    }

    /// Receive a copy of every event once the queue has applied it
    pub fn with_observer(mut self, observer: mpsc::UnboundedSender<JobEvent>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn jobs(&self) -> &[Job] {
        &self.jobs
    }

    pub fn job(&self, id: JobId) -> Option<&Job> {
        self.jobs.iter().find(|j| j.id == id)
    }

    pub fn running_id(&self) -> Option<JobId> {
        self.running.as_ref().map(|r| r.id)
    }

    pub fn push(&mut self, job: Job) -> JobId {
        let id = job.id;
        debug!("Adding job {} ({})", id, job.file_name());
        self.jobs.push(job);
        id
    }

    pub fn extend<I: IntoIterator<Item = Job>>(&mut self, jobs: I) {
        for job in jobs {
            self.push(job);
        }
    }

    fn job_mut(&mut self, id: JobId) -> Result<&mut Job> {
        self.jobs
            .iter_mut()
            .find(|j| j.id == id)
            .ok_or_else(|| ToolkitError::JobNotFound(id.to_string()))
    }

    fn is_running(&self, id: JobId) -> bool {
        self.running_id() == Some(id)
    }

    /// Cancel a running job, or skip one that has not started
    pub fn cancel(&mut self, id: JobId) -> Result<()> {
        if let Some(running) = self.running.as_ref().filter(|r| r.id == id) {
            info!("Canceling job {}", id);
            running.cancel.cancel();
            let job = self.job_mut(id)?;
            job.last_message = "Canceling".to_string();
            return Ok(());
        }
        self.skip_with(id, "Canceled before start")
    }

    pub fn skip(&mut self, id: JobId) -> Result<()> {
        if self.is_running(id) {
            return Err(ToolkitError::JobRunning(id.to_string()));
        }
        self.skip_with(id, "Skipped by operator")
    }

    fn skip_with(&mut self, id: JobId, message: &str) -> Result<()> {
        let job = self.job_mut(id)?;
        match job.status {
            JobStatus::Queued | JobStatus::Incompatible => {
                info!("Skipping {}", job.file_name());
                job.status = JobStatus::Skipped;
                job.last_message = message.to_string();
                Ok(())
            }
            status => Err(ToolkitError::InvalidTransition {
                id: id.to_string(),
                reason: format!("cannot skip a {} job", status),
            }),
        }
    }

    pub fn set_skip_if_incompatible(&mut self, id: JobId, skip: bool) -> Result<()> {
        self.job_mut(id)?.settings.skip_if_incompatible = skip;
        Ok(())
    }

    /// Remove a job that is not running
    pub fn remove(&mut self, id: JobId) -> Result<Job> {
        if self.is_running(id) {
            return Err(ToolkitError::JobRunning(id.to_string()));
        }
        let pos = self
            .jobs
            .iter()
            .position(|j| j.id == id)
            .ok_or_else(|| ToolkitError::JobNotFound(id.to_string()))?;
        Ok(self.jobs.remove(pos))
    }

    /// Drop every terminal job, returning how many were removed
    pub fn clear_finished(&mut self) -> usize {
        let before = self.jobs.len();
        self.jobs.retain(|j| !j.status.is_terminal());
        before - self.jobs.len()
    }

    /// Stop dispatching and cancel the running job
    pub fn shutdown(&mut self) {
        info!("Queue shutting down");
        self.stopping = true;
        if let Some(running) = &self.running {
            running.cancel.cancel();
        }
    }

    pub fn handle_command(&mut self, command: QueueCommand) -> Result<()> {
        match command {
            QueueCommand::Cancel(id) => self.cancel(id),
            QueueCommand::Skip(id) => self.skip(id),
            QueueCommand::SetSkipIfIncompatible(id, skip) => self.set_skip_if_incompatible(id, skip),
            QueueCommand::Remove(id) => self.remove(id).map(|_| ()),
            QueueCommand::Add(job) => {
                self.push(*job);
                Ok(())
            }
            QueueCommand::ClearFinished => {
                let removed = self.clear_finished();
                debug!("Cleared {} finished job(s)", removed);
                Ok(())
            }
            QueueCommand::Shutdown => {
                self.shutdown();
                Ok(())
            }
        }
    }

    /// Start the first runnable job in insertion order
    pub fn dispatch_next(&mut self) -> Dispatch {
        if self.running.is_some() {
            return Dispatch::Busy;
        }
        if self.stopping {
            return Dispatch::Drained;
        }

        for idx in 0..self.jobs.len() {
            match self.jobs[idx].status {
                JobStatus::Incompatible => {
                    if let Some(blocked) = self.skip_or_block(idx) {
                        return blocked;
                    }
                }
                JobStatus::Queued => {
                    let job = &mut self.jobs[idx];
                    if let Err(e) = check_space(self.disk.as_ref(), &job.settings.output_dir, job.file_size_bytes) {
                        warn!("{}: {}", job.file_name(), e);
                        job.status = JobStatus::Incompatible;
                        job.last_message = e.to_string();
                        if let Some(blocked) = self.skip_or_block(idx) {
                            return blocked;
                        }
                        continue;
                    }

                    match plan_job(job) {
                        Ok(plan) => return Dispatch::Started(self.start(idx, plan)),
                        Err(e) => {
                            error!("Cannot plan {}: {}", job.file_name(), e);
                            job.status = JobStatus::Error;
                            job.last_message = e.to_string();
                        }
                    }
                }
                _ => {}
            }
        }
        Dispatch::Drained
    }

    fn skip_or_block(&mut self, idx: usize) -> Option<Dispatch> {
        let job = &mut self.jobs[idx];
        if job.settings.skip_if_incompatible {
            info!("Skipping incompatible {}: {}", job.file_name(), job.last_message);
            job.status = JobStatus::Skipped;
            job.last_message = format!("Skipped: {}", job.last_message);
            None
        } else {
            Some(Dispatch::Blocked {
                id: job.id,
                reason: job.last_message.clone(),
            })
        }
    }

    fn start(&mut self, idx: usize, plan: Plan) -> JobId {
        let job = &mut self.jobs[idx];
        info!("Starting {} ({} step(s))", job.file_name(), plan.steps.len());
        job.status = JobStatus::Running;
        job.last_message = "Starting".to_string();
        job.percent = (job.duration_seconds > 0.0).then_some(0);
        job.diagnostic = None;

        let cancel = CancellationToken::new();
        tokio::spawn(execute(
            job.clone(),
            plan,
            Arc::clone(&self.runner),
            cancel.clone(),
            self.events_tx.clone(),
            self.write_job_logs,
        ));
        self.running = Some(RunningJob { id: job.id, cancel });
        job.id
    }

    /// Fold one execution event into job state. Returns true when a job finished.
    pub fn apply(&mut self, event: JobEvent) -> bool {
        let finished = match &event {
            JobEvent::Started { .. } => false,
            JobEvent::Phase {
                id,
                step,
                total_steps,
                label,
            } => {
                if let Ok(job) = self.job_mut(*id) {
                    job.last_message = format!("{} ({}/{})", label, step, total_steps);
                    job.percent = (job.duration_seconds > 0.0).then_some(0);
                }
                false
            }
            JobEvent::Progress { id, percent, .. } => {
                if let (Ok(job), Some(percent)) = (self.job_mut(*id), percent) {
                    job.percent = Some(*percent);
                }
                false
            }
            JobEvent::Finished { id, outcome } => {
                self.finish(*id, outcome.clone());
                true
            }
        };

        if let Some(observer) = &self.observer {
            let _ = observer.send(event);
        }
        finished
    }

    fn finish(&mut self, id: JobId, outcome: JobOutcome) {
        // the execution task sends Finished as its last act
        if self.is_running(id) {
            self.running = None;
        }

        let Ok(job) = self.job_mut(id) else {
            warn!("Finished event for unknown job {}", id);
            return;
        };
        match outcome {
            JobOutcome::Done { outputs } => {
                info!("Finished {}: {} output(s)", job.file_name(), outputs.len());
                job.status = JobStatus::Done;
                job.percent = Some(100);
                job.last_message = format!("Done: {} output(s)", outputs.len());
            }
            JobOutcome::Failed { message, diagnostic } => {
                error!("{} failed: {}", job.file_name(), message);
                job.status = JobStatus::Error;
                job.last_message = message;
                job.diagnostic = diagnostic;
            }
            JobOutcome::Canceled => {
                info!("Canceled {}", job.file_name());
                job.status = JobStatus::Canceled;
                job.last_message = "Canceled".to_string();
            }
        }
    }

    /// Drain the queue, reacting to operator commands while jobs run.
    ///
    /// Returns once nothing is left to start, after shutdown, or when an
    /// incompatible job blocks the scan. A blocked queue only keeps waiting
    /// with `wait_when_blocked` set and the command channel open.
    pub async fn run(mut self, mut commands: mpsc::Receiver<QueueCommand>) -> QueueReport {
        let mut commands_open = true;
        let mut reported_block = None;
        let mut blocked_by = None;

        loop {
            let dispatch = self.dispatch_next();
            match &dispatch {
                Dispatch::Started(id) => {
                    debug!("Dispatched job {}", id);
                    reported_block = None;
                    blocked_by = None;
                }
                Dispatch::Blocked { id, reason } => {
                    if reported_block != Some(*id) {
                        warn!("Queue blocked by incompatible job {}: {}", id, reason);
                        reported_block = Some(*id);
                    }
                    blocked_by = Some((*id, reason.clone()));
                }
                _ => blocked_by = None,
            }

            let idle = self.running.is_none();
            let keep_waiting = self.wait_when_blocked && commands_open && !self.stopping;
            if idle && (matches!(dispatch, Dispatch::Drained) || !keep_waiting) {
                break;
            }

            tokio::select! {
                _ = self.stop_signal.cancelled(), if !self.stopping => {
                    self.shutdown();
                }
                Some(event) = self.events_rx.recv(), if !idle => {
                    self.apply(event);
                }
                command = commands.recv(), if commands_open => match command {
                    Some(command) => {
                        if let Err(e) = self.handle_command(command) {
                            warn!("Queue command rejected: {}", e);
                        }
                    }
                    None => commands_open = false,
                },
                else => break,
            }
        }

        QueueReport {
            jobs: self.jobs,
            blocked_by,
        }
    }
}

/// Run a job's steps in order on the execution task
async fn execute(
    job: Job,
    plan: Plan,
    runner: Arc<dyn ProcessRunner>,
    cancel: CancellationToken,
    events: mpsc::UnboundedSender<JobEvent>,
    write_job_log: bool,
) {
    let id = job.id;
    let total_steps = plan.steps.len();
    let _ = events.send(JobEvent::Started { id, total_steps });

    let mut log = if write_job_log {
        match JobLog::create(&job) {
            Ok(log) => Some(log),
            Err(e) => {
                warn!("Cannot create job log for {}: {}", job.file_name(), e);
                None
            }
        }
    } else {
        None
    };

    let outcome = 'steps: {
        if let Err(e) = tokio::fs::create_dir_all(&job.settings.output_dir).await {
            break 'steps JobOutcome::Failed {
                message: format!("Cannot create {}: {}", job.settings.output_dir.display(), e),
                diagnostic: None,
            };
        }

        for (n, step) in plan.steps.iter().enumerate() {
            if cancel.is_cancelled() {
                break 'steps JobOutcome::Canceled;
            }
            let _ = events.send(JobEvent::Phase {
                id,
                step: n + 1,
                total_steps,
                label: step.description.clone(),
            });
            if let Some(log) = log.as_mut() {
                if let Err(e) = log.begin_step(runner.program(), step) {
                    debug!("Job log write failed: {}", e);
                }
            }

            let progress_events = events.clone();
            let on_progress = move |progress: StepProgress| {
                let _ = progress_events.send(JobEvent::Progress {
                    id,
                    elapsed_seconds: progress.elapsed_seconds,
                    percent: progress.percent,
                });
            };
            let ctx = StepContext {
                duration_seconds: job.duration_seconds,
                cancel: &cancel,
                on_progress: &on_progress,
                mirror: log.as_mut().map(|l| l as &mut (dyn Write + Send)),
            };
            let result = runner.run(step, ctx).await;

            if let Some(log) = log.as_mut() {
                if let Err(e) = log.end_step(&result) {
                    debug!("Job log write failed: {}", e);
                }
            }
            match result {
                StepOutcome::Succeeded => {}
                StepOutcome::Canceled => break 'steps JobOutcome::Canceled,
                StepOutcome::Failed(_) if cancel.is_cancelled() => break 'steps JobOutcome::Canceled,
                StepOutcome::Failed(failure) => {
                    break 'steps failed_outcome(&step.description, runner.program(), &failure, &plan.warnings);
                }
            }
        }

        JobOutcome::Done {
            outputs: plan.steps.iter().map(|s| s.destination.clone()).collect(),
        }
    };

    if let Some(log) = log.as_mut() {
        let summary = match &outcome {
            JobOutcome::Done { .. } => "Result: done".to_string(),
            JobOutcome::Failed { message, .. } => format!("Result: error: {}", message),
            JobOutcome::Canceled => "Result: canceled".to_string(),
        };
        if let Err(e) = log.note(&summary) {
            debug!("Job log write failed: {}", e);
        }
    }
    let _ = events.send(JobEvent::Finished { id, outcome });
}

fn failed_outcome(label: &str, program: &str, failure: &StepFailure, warnings: &[String]) -> JobOutcome {
    let mut message = match &failure.reason {
        FailureReason::ToolNotFound(_) => format!("{}: {} not found", label, program),
        _ => match failure.last_line() {
            Some(last) => format!("{} failed ({}): {}", label, failure, last),
            None => format!("{} failed ({})", label, failure),
        },
    };
    if !warnings.is_empty() {
        message.push_str("; ");
        message.push_str(&warnings.join("; "));
    }
    let diagnostic = (!failure.output_tail.is_empty()).then(|| failure.output_tail.join("\n"));
    JobOutcome::Failed { message, diagnostic }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{StreamCatalog, StreamDescriptor, StreamKind};
    use crate::job::{JobSettings, OperationKind};
    use crate::media::MediaCommand;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::path::Path;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    #[derive(Debug, Clone, Copy)]
    enum Script {
        Succeed,
        Fail,
        Hang,
    }

    #[derive(Default)]
    struct ScriptedRunner {
        script: Mutex<VecDeque<Script>>,
        calls: Mutex<Vec<PathBuf>>,
        active: AtomicUsize,
        max_active: AtomicUsize,
    }

    impl ScriptedRunner {
        fn new(script: impl IntoIterator<Item = Script>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into_iter().collect()),
                ..Default::default()
            })
        }

        fn calls(&self) -> Vec<PathBuf> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ProcessRunner for ScriptedRunner {
        fn program(&self) -> &str {
            "ffmpeg"
        }

        async fn run(&self, command: &MediaCommand, ctx: StepContext<'_>) -> StepOutcome {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(now, Ordering::SeqCst);
            self.calls.lock().unwrap().push(command.destination.clone());
            let next = self.script.lock().unwrap().pop_front().unwrap_or(Script::Succeed);

            (ctx.on_progress)(StepProgress {
                elapsed_seconds: 50.0,
                percent: crate::media::progress::running_percent(50.0, ctx.duration_seconds),
            });
            tokio::task::yield_now().await;

            let outcome = match next {
                Script::Succeed => StepOutcome::Succeeded,
                Script::Fail => StepOutcome::Failed(StepFailure {
                    reason: FailureReason::Exit(Some(1)),
                    output_tail: vec!["Invalid data found when processing input".to_string()],
                }),
                Script::Hang => {
                    // leave a partial output behind, as an interrupted ffmpeg does
                    let _ = std::fs::write(&command.destination, b"partial");
                    ctx.cancel.cancelled().await;
                    StepOutcome::Canceled
                }
            };
            self.active.fetch_sub(1, Ordering::SeqCst);
            outcome
        }
    }

    struct FixedSpace(Option<u64>);

    impl DiskSpace for FixedSpace {
        fn available_bytes(&self, _dir: &Path) -> Option<u64> {
            self.0
        }
    }

    fn job(out: &Path, name: &str, operation: OperationKind) -> Job {
        let catalog = StreamCatalog::new(vec![
            StreamDescriptor::new(0, StreamKind::Video, "h264"),
            StreamDescriptor::new(1, StreamKind::Audio, "aac").with_language("eng"),
            StreamDescriptor::new(2, StreamKind::Audio, "ac3").with_language("por"),
        ]);
        Job::queued(
            PathBuf::from("/in").join(name),
            JobSettings::new(out, operation),
            catalog,
            10,
            100.0,
        )
    }

    fn incompatible(out: &Path, name: &str, skip: bool) -> Job {
        let mut settings = JobSettings::new(out, OperationKind::Reencode);
        settings.skip_if_incompatible = skip;
        Job::incompatible(
            PathBuf::from("/in").join(name),
            settings,
            StreamCatalog::default(),
            10,
            0.0,
            "no video stream",
        )
    }

    fn queue(runner: Arc<ScriptedRunner>, space: Option<u64>) -> JobQueue {
        JobQueue::new(runner, Arc::new(FixedSpace(space)))
    }

    fn closed_commands() -> mpsc::Receiver<QueueCommand> {
        let (_tx, rx) = mpsc::channel(1);
        rx
    }

    fn statuses(jobs: &[Job]) -> Vec<JobStatus> {
        jobs.iter().map(|j| j.status).collect()
    }

    #[tokio::test]
    async fn test_jobs_run_serially_in_order() {
        let out = TempDir::new().unwrap();
        let runner = ScriptedRunner::new([]);
        let mut q = queue(Arc::clone(&runner), None);
        q.push(job(out.path(), "a.mkv", OperationKind::Reencode));
        q.push(job(out.path(), "b.mkv", OperationKind::ExtractSeparate));
        q.push(job(out.path(), "c.mkv", OperationKind::Reencode));

        let jobs = q.run(closed_commands()).await.jobs;

        assert_eq!(statuses(&jobs), vec![JobStatus::Done; 3]);
        assert!(jobs.iter().all(|j| j.percent == Some(100)));
        assert_eq!(runner.max_active.load(Ordering::SeqCst), 1);
        let calls = runner.calls();
        // reencode: 1 step, separate: video + 2 audio
        assert_eq!(calls.len(), 5);
        assert_eq!(calls[0], out.path().join("a.mp4"));
        assert_eq!(calls[1], out.path().join("b.video.mp4"));
        assert_eq!(calls[4], out.path().join("c.mp4"));
    }

    #[tokio::test]
    async fn test_failure_aborts_only_that_job() {
        let out = TempDir::new().unwrap();
        let runner = ScriptedRunner::new([Script::Fail]);
        let mut q = queue(Arc::clone(&runner), None);
        q.push(job(out.path(), "a.mkv", OperationKind::ExtractSeparate));
        q.push(job(out.path(), "b.mkv", OperationKind::Reencode));

        let jobs = q.run(closed_commands()).await.jobs;

        assert_eq!(statuses(&jobs), vec![JobStatus::Error, JobStatus::Done]);
        assert!(jobs[0].last_message.contains("Extracting video failed"));
        assert!(jobs[0].last_message.contains("Invalid data"));
        assert_eq!(
            jobs[0].diagnostic.as_deref(),
            Some("Invalid data found when processing input")
        );
        assert_ne!(jobs[0].percent, Some(100));
        // remaining steps of the failed job never ran
        assert_eq!(runner.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_incompatible_job_blocks_scan() {
        let out = TempDir::new().unwrap();
        let runner = ScriptedRunner::new([]);
        let mut q = queue(Arc::clone(&runner), None);
        q.push(job(out.path(), "a.mkv", OperationKind::Reencode));
        q.push(incompatible(out.path(), "b.mkv", false));
        q.push(job(out.path(), "c.mkv", OperationKind::Reencode));

        let jobs = q.run(closed_commands()).await.jobs;

        assert_eq!(
            statuses(&jobs),
            vec![JobStatus::Done, JobStatus::Incompatible, JobStatus::Queued]
        );
    }

    #[tokio::test]
    async fn test_skip_flag_passes_incompatible_job() {
        let out = TempDir::new().unwrap();
        let runner = ScriptedRunner::new([]);
        let mut q = queue(Arc::clone(&runner), None);
        q.push(incompatible(out.path(), "a.mkv", true));
        q.push(job(out.path(), "b.mkv", OperationKind::Reencode));

        let jobs = q.run(closed_commands()).await.jobs;

        assert_eq!(statuses(&jobs), vec![JobStatus::Skipped, JobStatus::Done]);
        assert_eq!(jobs[0].last_message, "Skipped: no video stream");
    }

    #[tokio::test]
    async fn test_dispatch_rechecks_free_space() {
        let out = TempDir::new().unwrap();
        let runner = ScriptedRunner::new([]);
        let mut q = queue(Arc::clone(&runner), Some(5));
        let id = q.push(job(out.path(), "a.mkv", OperationKind::Reencode));

        let dispatch = q.dispatch_next();

        assert!(matches!(dispatch, Dispatch::Blocked { id: blocked, .. } if blocked == id));
        let job = q.job(id).unwrap();
        assert_eq!(job.status, JobStatus::Incompatible);
        assert!(job.last_message.contains("Insufficient space"));
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_operator_unblocks_queue() {
        let out = TempDir::new().unwrap();
        let runner = ScriptedRunner::new([]);
        let mut q = queue(Arc::clone(&runner), None);
        let blocked = q.push(incompatible(out.path(), "a.mkv", false));
        q.push(job(out.path(), "b.mkv", OperationKind::Reencode));
        let q = q.wait_when_blocked(true);
        let (tx, rx) = mpsc::channel(4);
        tx.send(QueueCommand::Skip(blocked)).await.unwrap();
        drop(tx);

        let report = q.run(rx).await;

        assert_eq!(statuses(&report.jobs), vec![JobStatus::Skipped, JobStatus::Done]);
        assert!(report.blocked_by.is_none());
    }

    #[tokio::test]
    async fn test_blocked_queue_returns_while_sender_alive() {
        let out = TempDir::new().unwrap();
        let runner = ScriptedRunner::new([]);
        let mut q = queue(Arc::clone(&runner), None);
        q.push(job(out.path(), "a.mkv", OperationKind::Reencode));
        let blocked = q.push(incompatible(out.path(), "b.mkv", false));
        q.push(job(out.path(), "c.mkv", OperationKind::Reencode));
        let (_tx, rx) = mpsc::channel(4);

        let report = tokio::time::timeout(std::time::Duration::from_secs(2), q.run(rx))
            .await
            .expect("run should return at the blocked job");

        assert_eq!(
            statuses(&report.jobs),
            vec![JobStatus::Done, JobStatus::Incompatible, JobStatus::Queued]
        );
        assert_eq!(report.blocked_by, Some((blocked, "no video stream".to_string())));
        assert_eq!(runner.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_stop_signal_cancels_running_job() {
        let out = TempDir::new().unwrap();
        let runner = ScriptedRunner::new([Script::Hang]);
        let stop = CancellationToken::new();
        let (observer_tx, mut observer_rx) = mpsc::unbounded_channel();
        let mut q = queue(Arc::clone(&runner), None)
            .with_observer(observer_tx)
            .with_stop_signal(stop.clone());
        let first = q.push(job(out.path(), "a.mkv", OperationKind::Reencode));
        q.push(job(out.path(), "b.mkv", OperationKind::Reencode));
        let (_tx, rx) = mpsc::channel(4);
        let queue_task = tokio::spawn(q.run(rx));

        while let Some(event) = observer_rx.recv().await {
            if matches!(event, JobEvent::Phase { id, .. } if id == first) {
                break;
            }
        }
        stop.cancel();
        let report = tokio::time::timeout(std::time::Duration::from_secs(2), queue_task)
            .await
            .expect("run should return after the stop signal")
            .unwrap();

        assert_eq!(statuses(&report.jobs), vec![JobStatus::Canceled, JobStatus::Queued]);
        assert!(report.blocked_by.is_none());
        assert_eq!(runner.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_rerun_after_cancel_does_not_reuse_partial_output() {
        let out = TempDir::new().unwrap();
        let runner = ScriptedRunner::new([Script::Hang]);
        let (observer_tx, mut observer_rx) = mpsc::unbounded_channel();
        let mut q = queue(Arc::clone(&runner), None).with_observer(observer_tx);
        let first = q.push(job(out.path(), "a.mkv", OperationKind::Reencode));
        let (tx, rx) = mpsc::channel(4);
        let queue_task = tokio::spawn(q.run(rx));

        while let Some(event) = observer_rx.recv().await {
            if matches!(event, JobEvent::Phase { id, .. } if id == first) {
                break;
            }
        }
        tx.send(QueueCommand::Cancel(first)).await.unwrap();
        drop(tx);
        let jobs = queue_task.await.unwrap().jobs;
        assert_eq!(statuses(&jobs), vec![JobStatus::Canceled]);
        assert!(out.path().join("a.mp4").exists());

        let rerun = ScriptedRunner::new([]);
        let mut q = queue(Arc::clone(&rerun), None);
        q.push(job(out.path(), "a.mkv", OperationKind::Reencode));
        let jobs = q.run(closed_commands()).await.jobs;

        assert_eq!(statuses(&jobs), vec![JobStatus::Done]);
        assert_eq!(rerun.calls(), vec![out.path().join("a (1).mp4")]);
        assert_eq!(std::fs::read(out.path().join("a.mp4")).unwrap(), b"partial");
    }

    #[test]
    fn test_phase_resets_percent() {
        let out = TempDir::new().unwrap();
        let mut q = queue(ScriptedRunner::new([]), None);
        let id = q.push(job(out.path(), "a.mkv", OperationKind::ExtractSeparate));
        let mut no_duration = job(out.path(), "b.mkv", OperationKind::ExtractSeparate);
        no_duration.duration_seconds = 0.0;
        let unknown = q.push(no_duration);

        for target in [id, unknown] {
            q.apply(JobEvent::Progress {
                id: target,
                elapsed_seconds: 80.0,
                percent: Some(80),
            });
            q.apply(JobEvent::Phase {
                id: target,
                step: 2,
                total_steps: 3,
                label: "Extracting audio 1".to_string(),
            });
        }

        let first = q.job(id).unwrap();
        assert_eq!(first.percent, Some(0));
        assert_eq!(first.last_message, "Extracting audio 1 (2/3)");
        assert_eq!(q.job(unknown).unwrap().percent, None);
    }

    #[tokio::test]
    async fn test_cancel_running_job() {
        let out = TempDir::new().unwrap();
        let runner = ScriptedRunner::new([Script::Hang]);
        let (observer_tx, mut observer_rx) = mpsc::unbounded_channel();
        let mut q = queue(Arc::clone(&runner), None).with_observer(observer_tx);
        let first = q.push(job(out.path(), "a.mkv", OperationKind::ExtractSeparate));
        q.push(job(out.path(), "b.mkv", OperationKind::Reencode));
        let (tx, rx) = mpsc::channel(4);
        let queue_task = tokio::spawn(q.run(rx));

        while let Some(event) = observer_rx.recv().await {
            if matches!(event, JobEvent::Phase { id, .. } if id == first) {
                break;
            }
        }
        tx.send(QueueCommand::Cancel(first)).await.unwrap();
        drop(tx);
        let jobs = queue_task.await.unwrap().jobs;

        assert_eq!(statuses(&jobs), vec![JobStatus::Canceled, JobStatus::Done]);
        assert_eq!(jobs[0].last_message, "Canceled");
        // video step was canceled, audio steps never started
        assert_eq!(runner.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_percent_below_100_until_done() {
        let out = TempDir::new().unwrap();
        let runner = ScriptedRunner::new([]);
        let (observer_tx, mut observer_rx) = mpsc::unbounded_channel();
        let mut q = queue(Arc::clone(&runner), None).with_observer(observer_tx);
        let id = q.push(job(out.path(), "a.mkv", OperationKind::ExtractSeparate));

        let jobs = q.run(closed_commands()).await.jobs;

        let mut events = Vec::new();
        while let Ok(event) = observer_rx.try_recv() {
            events.push(event);
        }
        let percents: Vec<u8> = events
            .iter()
            .filter_map(|e| match e {
                JobEvent::Progress { percent, .. } => *percent,
                _ => None,
            })
            .collect();
        assert_eq!(percents, vec![50, 50, 50]);
        assert!(matches!(events.first(), Some(JobEvent::Started { total_steps: 3, .. })));
        assert!(matches!(events.last(), Some(JobEvent::Finished { id: done, .. }) if *done == id));
        assert_eq!(jobs[0].percent, Some(100));
    }

    #[tokio::test]
    async fn test_remove_rules() {
        let out = TempDir::new().unwrap();
        let runner = ScriptedRunner::new([Script::Hang]);
        let mut q = queue(Arc::clone(&runner), None);
        let running = q.push(job(out.path(), "a.mkv", OperationKind::Reencode));
        let waiting = q.push(job(out.path(), "b.mkv", OperationKind::Reencode));

        assert_eq!(q.dispatch_next(), Dispatch::Started(running));
        assert_eq!(q.dispatch_next(), Dispatch::Busy);
        assert!(matches!(q.remove(running), Err(ToolkitError::JobRunning(_))));
        assert!(matches!(q.skip(running), Err(ToolkitError::JobRunning(_))));
        assert_eq!(q.remove(waiting).unwrap().id, waiting);
        assert!(matches!(q.remove(waiting), Err(ToolkitError::JobNotFound(_))));

        q.cancel(running).unwrap();
        let jobs = q.run(closed_commands()).await.jobs;
        assert_eq!(statuses(&jobs), vec![JobStatus::Canceled]);
    }

    #[tokio::test]
    async fn test_cancel_unstarted_job_skips_it() {
        let out = TempDir::new().unwrap();
        let runner = ScriptedRunner::new([]);
        let mut q = queue(Arc::clone(&runner), None);
        let id = q.push(job(out.path(), "a.mkv", OperationKind::Reencode));

        q.cancel(id).unwrap();

        assert_eq!(q.job(id).unwrap().status, JobStatus::Skipped);
        assert!(matches!(q.skip(id), Err(ToolkitError::InvalidTransition { .. })));
        assert_eq!(q.clear_finished(), 1);
        assert!(q.jobs().is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_stops_dispatching() {
        let out = TempDir::new().unwrap();
        let runner = ScriptedRunner::new([Script::Hang]);
        let mut q = queue(Arc::clone(&runner), None);
        q.push(job(out.path(), "a.mkv", OperationKind::Reencode));
        q.push(job(out.path(), "b.mkv", OperationKind::Reencode));
        let (tx, rx) = mpsc::channel(4);
        let queue_task = tokio::spawn(q.run(rx));

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        tx.send(QueueCommand::Shutdown).await.unwrap();
        let jobs = queue_task.await.unwrap().jobs;

        assert_eq!(statuses(&jobs), vec![JobStatus::Canceled, JobStatus::Queued]);
    }

    #[tokio::test]
    async fn test_job_log_written_when_enabled() {
        let out = TempDir::new().unwrap();
        let runner = ScriptedRunner::new([]);
        let mut q = queue(Arc::clone(&runner), None).with_job_logs(true);
        q.push(job(out.path(), "a.mkv", OperationKind::Reencode));

        q.run(closed_commands()).await;

        let logs: Vec<_> = std::fs::read_dir(out.path().join("logs")).unwrap().collect();
        assert_eq!(logs.len(), 1);
    }

    #[test]
    fn test_failed_outcome_carries_plan_warnings() {
        let failure = StepFailure {
            reason: FailureReason::Exit(Some(1)),
            output_tail: vec![],
        };
        let warnings = vec!["subtitle #2 (hdmv_pgs_subtitle) cannot be muxed into mp4".to_string()];

        let JobOutcome::Failed { message, diagnostic } =
            failed_outcome("Remuxing video+audio+subtitles", "ffmpeg", &failure, &warnings)
        else {
            panic!("expected failure");
        };
        assert!(message.contains("cannot be muxed into mp4"));
        assert_eq!(diagnostic, None);

        let missing = StepFailure {
            reason: FailureReason::ToolNotFound("ffmpeg".to_string()),
            output_tail: vec![],
        };
        let JobOutcome::Failed { message, .. } = failed_outcome("Transcoding", "ffmpeg", &missing, &[]) else {
            panic!("expected failure");
        };
        assert_eq!(message, "Transcoding: ffmpeg not found");
    }
}
