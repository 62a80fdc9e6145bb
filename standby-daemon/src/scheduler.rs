//! Cooperative scheduler for periodic jobs ("sleepables").
//!
//! Jobs are declared once, before the daemon starts, and run on the
//! daemon's only thread. A job is due when it has never run or when at
//! least `interval` has passed since its last run; `last_run` is set to the
//! tick time after the handler returns, so a slow handler delays the next
//! run instead of causing catch-up runs.

use std::time::Duration;

use serde_json::{json, Value};
use tokio::time::Instant;

use crate::error::DaemonError;

pub type JobHandler = Box<dyn FnMut() -> Result<(), DaemonError>>;

struct Sleepable {
    name: String,
    interval: Duration,
    last_run: Option<Instant>,
    runs: u64,
    failures: u64,
    handler: JobHandler,
}

/// Declared jobs, in declaration order.
#[derive(Default)]
pub struct Scheduler {
    sleepables: Vec<Sleepable>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn declare(
        &mut self,
        name: impl Into<String>,
        interval: Duration,
        handler: impl FnMut() -> Result<(), DaemonError> + 'static,
    ) {
        self.sleepables.push(Sleepable {
            name: name.into(),
            interval,
            last_run: None,
            runs: 0,
            failures: 0,
            handler: Box::new(handler),
        });
    }

    pub fn len(&self) -> usize {
        self.sleepables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sleepables.is_empty()
    }

    pub fn min_interval(&self) -> Option<Duration> {
        self.sleepables.iter().map(|s| s.interval).min()
    }

    /// Run every due job, in declaration order. Returns how many ran.
    ///
    /// A failing job is logged and does not prevent the others from running.
    pub fn run_due(&mut self, now: Instant) -> usize {
        let mut ran = 0;
        for job in &mut self.sleepables {
            let due = match job.last_run {
                None => true,
                Some(last) => now.saturating_duration_since(last) >= job.interval,
            };
            if !due {
                continue;
            }

            let started = Instant::now();
            if let Err(err) = (job.handler)() {
                job.failures += 1;
                tracing::error!(job = %job.name, error = %err, "job failed");
            }
            job.runs += 1;
            job.last_run = Some(now);
            ran += 1;

            let elapsed = started.elapsed();
            if elapsed > job.interval {
                tracing::warn!(
                    job = %job.name,
                    elapsed_ms = elapsed.as_millis() as u64,
                    interval_ms = job.interval.as_millis() as u64,
                    "job ran longer than its interval",
                );
            }
        }
        ran
    }

    /// Per-job summary for the `status` command.
    pub fn snapshot(&self, now: Instant) -> Value {
        let jobs: Vec<Value> = self
            .sleepables
            .iter()
            .map(|job| {
                json!({
                    "name": job.name,
                    "interval_ms": job.interval.as_millis() as u64,
                    "runs": job.runs,
                    "failures": job.failures,
                    "last_run_ms_ago": job
                        .last_run
                        .map(|last| now.saturating_duration_since(last).as_millis() as u64),
                })
            })
            .collect();
        Value::Array(jobs)
    }
}
