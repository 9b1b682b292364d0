//! Background scheduling for recurring announcement jobs.
//!
//! Jobs are registered by name, started explicitly, and move through a
//! closed state machine: `Idle` -> `Running` -> `Cancelled`. A cancelled
//! job can be re-registered under the same name; there is no implicit
//! restart.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{Datelike, NaiveDate, Timelike, Utc};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

pub type JobFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
pub type JobFn = Arc<dyn Fn() -> JobFuture + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Idle,
    Running,
    Cancelled,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Idle => "idle",
            JobState::Running => "running",
            JobState::Cancelled => "cancelled",
        }
    }
}

/// When a running job fires. `Daily` fires once per calendar day at the
/// given UTC wall-clock minute; `EveryTick` fires on each scheduler tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    Daily { hour: u32, minute: u32 },
    EveryTick,
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("job {0} is already registered")]
    AlreadyRegistered(String),
    #[error("job {0} is already running")]
    AlreadyRunning(String),
    #[error("no job registered as {0}")]
    UnknownJob(String),
}

struct JobEntry {
    schedule: Schedule,
    job: JobFn,
    state: JobState,
    cancel: Option<watch::Sender<bool>>,
    // Bumped on every (re-)registration so an exiting task from a prior
    // registration cannot clobber the state of its replacement.
    generation: u64,
}

/// Owns the job table; started jobs run on spawned tokio tasks that poll
/// at the scheduler's tick resolution.
pub struct Scheduler {
    tick: Duration,
    jobs: Arc<Mutex<HashMap<String, JobEntry>>>,
    next_generation: AtomicU64,
}

impl Scheduler {
    pub fn new(tick: Duration) -> Self {
        Self {
            tick,
            jobs: Arc::new(Mutex::new(HashMap::new())),
            next_generation: AtomicU64::new(0),
        }
    }

    /// Registers a job in the `Idle` state. Re-registering replaces a
    /// cancelled job of the same name but never a live one.
    pub fn register(
        &self,
        name: &str,
        schedule: Schedule,
        job: JobFn,
    ) -> Result<(), SchedulerError> {
        let mut jobs = self.jobs.lock().unwrap();
        if let Some(entry) = jobs.get(name) {
            if entry.state != JobState::Cancelled {
                return Err(SchedulerError::AlreadyRegistered(name.to_string()));
            }
        }
        jobs.insert(
            name.to_string(),
            JobEntry {
                schedule,
                job,
                state: JobState::Idle,
                cancel: None,
                generation: self.next_generation.fetch_add(1, Ordering::Relaxed),
            },
        );
        debug!(job = name, "registered announcement job");
        Ok(())
    }

    /// Moves an idle job to `Running` and spawns its polling loop.
    pub fn start(&self, name: &str) -> Result<(), SchedulerError> {
        let (schedule, job, cancel_rx, generation) = {
            let mut jobs = self.jobs.lock().unwrap();
            let entry = jobs
                .get_mut(name)
                .ok_or_else(|| SchedulerError::UnknownJob(name.to_string()))?;
            if entry.state == JobState::Running {
                return Err(SchedulerError::AlreadyRunning(name.to_string()));
            }
            let (tx, rx) = watch::channel(false);
            entry.state = JobState::Running;
            entry.cancel = Some(tx);
            (entry.schedule, Arc::clone(&entry.job), rx, entry.generation)
        };

        let tick = self.tick;
        let jobs = Arc::clone(&self.jobs);
        let job_name = name.to_string();
        tokio::spawn(async move {
            run_job(&job_name, schedule, job, tick, cancel_rx).await;
            let mut jobs = jobs.lock().unwrap();
            if let Some(entry) = jobs.get_mut(&job_name) {
                if entry.generation == generation {
                    entry.state = JobState::Cancelled;
                    entry.cancel = None;
                }
            }
        });
        info!(job = name, "started announcement job");
        Ok(())
    }

    /// Signals a running job to stop. Returns false when the job is
    /// unknown or not running.
    pub fn stop(&self, name: &str) -> bool {
        let mut jobs = self.jobs.lock().unwrap();
        match jobs.get_mut(name) {
            Some(entry) if entry.state == JobState::Running => {
                if let Some(cancel) = entry.cancel.take() {
                    let _ = cancel.send(true);
                }
                entry.state = JobState::Cancelled;
                info!(job = name, "stopped announcement job");
                true
            }
            _ => false,
        }
    }

    pub fn state(&self, name: &str) -> Option<JobState> {
        self.jobs.lock().unwrap().get(name).map(|entry| entry.state)
    }

    pub fn jobs(&self) -> Vec<(String, JobState)> {
        let mut listed: Vec<(String, JobState)> = self
            .jobs
            .lock()
            .unwrap()
            .iter()
            .map(|(name, entry)| (name.clone(), entry.state))
            .collect();
        listed.sort_by(|a, b| a.0.cmp(&b.0));
        listed
    }
}

async fn run_job(
    name: &str,
    schedule: Schedule,
    job: JobFn,
    tick: Duration,
    mut cancel_rx: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(tick);
    // The daily guard keeps a minute-wide firing window from re-firing
    // on every tick inside that minute.
    let mut last_fired: Option<NaiveDate> = None;
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let fire = match schedule {
                    Schedule::EveryTick => true,
                    Schedule::Daily { hour, minute } => {
                        let now = Utc::now();
                        let today = now.date_naive();
                        now.hour() == hour
                            && now.minute() == minute
                            && last_fired != Some(today)
                    }
                };
                if fire {
                    if let Schedule::Daily { .. } = schedule {
                        last_fired = Some(Utc::now().date_naive());
                    }
                    debug!(job = name, "announcement job firing");
                    job().await;
                }
            }
            changed = cancel_rx.changed() => {
                if changed.is_err() || *cancel_rx.borrow() {
                    break;
                }
            }
        }
    }
    warn!(job = name, "announcement job loop exited");
}

/// Job names are keyed by month so a February announcer and a March
/// announcer can coexist.
pub fn monthly_job_name(year: i32, month: u32) -> String {
    format!("announce-{:04}-{:02}", year, month)
}

pub fn current_job_name() -> String {
    let today = Utc::now().date_naive();
    monthly_job_name(today.year(), today.month())
}
