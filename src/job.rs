//! Asynchronous grid job: submit, poll until terminal, download.
//!
//! ```text
//! SUBMITTING -> POLLING -> SUCCEEDED | FAILED | TIMED_OUT
//! ```
//!
//! The overall deadline is wall-clock time measured from submission and is
//! independent of the per-request HTTP timeouts. Between polls the loop sleeps
//! a fixed interval; there is no backoff.

use std::fmt;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::payload::ExtractionPayload;

pub const DEFAULT_JOB_TIMEOUT: Duration = Duration::from_secs(300);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Server-side job state as reported by the status endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum JobState {
    Pending,
    Running,
    Success,
    Failed,
    Other(String),
}

impl From<String> for JobState {
    fn from(s: String) -> Self {
        match s.to_ascii_uppercase().as_str() {
            "PENDING" => Self::Pending,
            "RUNNING" => Self::Running,
            "SUCCESS" => Self::Success,
            "FAILED" => Self::Failed,
            _ => Self::Other(s),
        }
    }
}

impl From<JobState> for String {
    fn from(state: JobState) -> Self {
        state.to_string()
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => f.write_str("PENDING"),
            Self::Running => f.write_str("RUNNING"),
            Self::Success => f.write_str("SUCCESS"),
            Self::Failed => f.write_str("FAILED"),
            Self::Other(s) => f.write_str(s),
        }
    }
}

impl Default for JobState {
    fn default() -> Self {
        Self::Other(String::new())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatus {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub status: JobState,
    #[serde(default)]
    pub progress: i64,
    #[serde(default)]
    pub file: Option<String>,
}

impl JobStatus {
    /// The artifact URL, once the job has really finished: SUCCESS, 100%
    /// progress and a non-empty file reference. Anything less is still running.
    pub fn artifact_url(&self) -> Option<&str> {
        if self.status != JobState::Success || self.progress < 100 {
            return None;
        }
        self.file.as_deref().filter(|f| !f.trim().is_empty())
    }

    pub fn is_failed(&self) -> bool {
        self.status == JobState::Failed
    }

    /// Overwrites this status with a fresh poll response. The job id is kept
    /// when the response omits it.
    pub fn update(&mut self, next: JobStatus) {
        let id = std::mem::take(&mut self.id);
        *self = next;
        if self.id.is_empty() {
            self.id = id;
        }
    }
}

/// Downloaded result of a successful job. Displays as `dssfile::<path>` so
/// callers reading stdout can tell it apart from other output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    path: PathBuf,
}

impl Artifact {
    pub const MARKER: &'static str = "dssfile::";

    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn into_path(self) -> PathBuf {
        self.path
    }
}

impl fmt::Display for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", Self::MARKER, self.path.display())
    }
}

/// The service operations the poller drives.
pub trait JobService {
    fn submit(&self, payload: &ExtractionPayload) -> Result<JobStatus>;
    fn status(&self, id: &str) -> Result<JobStatus>;
    fn download(&self, file: &str) -> Result<PathBuf>;
}

pub trait Clock {
    fn now(&self) -> Instant;
    fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

pub struct Poller<'a, S, C = SystemClock> {
    service: &'a S,
    clock: C,
    timeout: Duration,
    interval: Duration,
}

impl<'a, S: JobService> Poller<'a, S> {
    pub fn new(service: &'a S) -> Self {
        Self::with_clock(service, SystemClock)
    }
}

impl<'a, S: JobService, C: Clock> Poller<'a, S, C> {
    pub fn with_clock(service: &'a S, clock: C) -> Self {
        Self {
            service,
            clock,
            timeout: DEFAULT_JOB_TIMEOUT,
            interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Submits `payload`, waits for the job to finish and downloads its artifact.
    pub fn run(&self, payload: &ExtractionPayload) -> Result<Artifact> {
        let started = self.clock.now();
        let mut status = self.service.submit(payload)?;
        tracing::info!(job_id = %status.id, status = %status.status, "job submitted");

        let url = self.poll(&mut status, started)?;
        let path = self.service.download(&url)?;
        tracing::info!(job_id = %status.id, path = %path.display(), "file downloaded");
        Ok(Artifact::new(path))
    }

    /// Polls until the job succeeds (returning the artifact URL), fails, or
    /// the deadline measured from `started` passes.
    fn poll(&self, status: &mut JobStatus, started: Instant) -> Result<String> {
        let mut polls = 0usize;

        while self.clock.now().duration_since(started) < self.timeout {
            polls += 1;
            match self.service.status(&status.id) {
                Ok(next) => status.update(next),
                Err(err) if err.is_transient() => {
                    tracing::warn!(job_id = %status.id, poll = polls, error = %err, "status poll failed, retrying");
                    self.clock.sleep(self.interval);
                    continue;
                }
                Err(err) => return Err(err),
            }

            tracing::info!(
                job_id = %status.id,
                status = %status.status,
                progress = status.progress,
                file = status.file.as_deref().unwrap_or(""),
                "polled job status"
            );

            if status.is_failed() {
                return Err(Error::JobFailed {
                    id: status.id.clone(),
                    status: status.status.to_string(),
                    progress: status.progress,
                });
            }
            if let Some(url) = status.artifact_url() {
                return Ok(url.to_string());
            }

            self.clock.sleep(self.interval);
        }

        tracing::warn!(job_id = %status.id, polls, "job deadline passed without a result");
        Err(Error::TimedOut {
            id: status.id.clone(),
            timeout: self.timeout,
        })
    }
}
