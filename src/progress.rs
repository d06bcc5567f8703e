//! Indexing progress reporting.
//!
//! The job monitor emits one [`JobProgressEvent`] per status fetch. Reporters
//! decide where it goes. The CLI reporters write to **stderr** so stdout
//! remains parseable for scripts.

use std::io::Write;

use crate::models::{IndexingJob, JobStatus};

/// A single observation of an indexing job.
#[derive(Clone, Debug, PartialEq)]
pub struct JobProgressEvent {
    pub job_id: String,
    pub status: JobStatus,
    /// Fraction complete in `[0.0, 1.0]`, if the platform reports one.
    pub progress: Option<f64>,
    /// 1-based poll attempt that produced this observation.
    pub attempt: u32,
}

impl JobProgressEvent {
    pub fn from_job(job: &IndexingJob, attempt: u32) -> Self {
        Self {
            job_id: job.id.clone(),
            status: job.status,
            progress: job.progress,
            attempt,
        }
    }
}

/// Receives job progress. Called on every poll attempt, including the first.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: &JobProgressEvent);
}

impl<F> ProgressReporter for F
where
    F: Fn(&JobProgressEvent) + Send + Sync,
{
    fn report(&self, event: &JobProgressEvent) {
        self(event)
    }
}

/// Human-friendly progress on stderr: "index 3f2a…  RUNNING  42%  (attempt 7)".
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: &JobProgressEvent) {
        let line = match event.progress {
            Some(p) => format!(
                "index {}  {}  {}  (attempt {})\n",
                event.job_id,
                event.status,
                format_percent(p),
                event.attempt
            ),
            None => format!(
                "index {}  {}  (attempt {})\n",
                event.job_id, event.status, event.attempt
            ),
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, event: &JobProgressEvent) {
        let obj = serde_json::json!({
            "event": "progress",
            "job_id": event.job_id,
            "status": event.status,
            "progress": event.progress,
            "attempt": event.attempt,
        });
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: &JobProgressEvent) {}
}

fn format_percent(fraction: f64) -> String {
    format!("{:.0}%", (fraction * 100.0).clamp(0.0, 100.0))
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "off" => Some(ProgressMode::Off),
            "human" => Some(ProgressMode::Human),
            "json" => Some(ProgressMode::Json),
            _ => None,
        }
    }

    pub fn reporter(&self) -> Box<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
