use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::cache::ThumbnailCache;
use crate::config::Config;
use crate::decode;
use crate::error::{Error, Result};
use crate::models::{ImageFileRef, Thumbnail};
use crate::thumbnail;
use crate::timing::JobTimer;

/// Lifecycle of one decode-and-generate job. Transitions only move forward
/// (Queued → Running → terminal); a terminal state is never left.
#[derive(Debug, Clone, PartialEq)]
pub enum JobState {
    Queued,
    Running,
    Succeeded,
    Failed(Error),
    Cancelled,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Succeeded | JobState::Failed(_) | JobState::Cancelled
        )
    }
}

/// What a finished job hands through the drain point. `Cancelled` is
/// filtered out before the consumer callback ever sees it.
#[derive(Debug, Clone)]
pub enum JobOutcome {
    Success(Arc<Thumbnail>),
    Failure(Error),
    Cancelled,
}

/// Returned by [`Scheduler::submit`]. Submitting a file that is already
/// queued or running coalesces and returns the equivalent handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHandle {
    pub session_id: u64,
    pub file: ImageFileRef,
}

struct Job {
    file: ImageFileRef,
}

struct Delivery {
    session_id: u64,
    file: ImageFileRef,
    outcome: JobOutcome,
}

struct JobEntry {
    session_id: u64,
    state: JobState,
    /// Set when the owning session is cancelled or superseded while the job
    /// runs; checked again at every delivery boundary.
    cancelled: bool,
}

struct SchedulerShared {
    active_session: AtomicU64,
    table: Mutex<HashMap<ImageFileRef, JobEntry>>,
    cache: Arc<ThumbnailCache>,
    thumbnail_size: u32,
    job_timeout: Duration,
    timer: Option<Arc<dyn JobTimer>>,
}

/// Bounded worker pool that turns image files into cached thumbnails.
///
/// Workers block on file i/o and decoding only; they never touch consumer
/// state. Completed results queue up on an internal channel until the
/// consumer pumps [`Scheduler::drain`] from its own thread, which is the
/// single place where callbacks fire.
pub struct Scheduler {
    shared: Arc<SchedulerShared>,
    job_tx: Sender<Job>,
    result_rx: Receiver<Delivery>,
    workers: Vec<JoinHandle<()>>,
}

impl Scheduler {
    pub fn new(
        config: &Config,
        cache: Arc<ThumbnailCache>,
        timer: Option<Arc<dyn JobTimer>>,
    ) -> Self {
        let shared = Arc::new(SchedulerShared {
            active_session: AtomicU64::new(0),
            table: Mutex::new(HashMap::new()),
            cache,
            thumbnail_size: config.thumbnail_size,
            job_timeout: config.job_timeout(),
            timer,
        });

        let (job_tx, job_rx) = unbounded::<Job>();
        let (result_tx, result_rx) = unbounded::<Delivery>();

        let worker_count = config.worker_pool_size.max(1);
        let mut workers = Vec::with_capacity(worker_count);
        for index in 0..worker_count {
            let shared = shared.clone();
            let job_rx = job_rx.clone();
            let result_tx = result_tx.clone();
            let handle = thread::Builder::new()
                .name(format!("thumb-worker-{}", index))
                .spawn(move || worker_loop(&shared, &job_rx, &result_tx))
                .expect("Failed to spawn thumbnail worker");
            workers.push(handle);
        }

        Self {
            shared,
            job_tx,
            result_rx,
            workers,
        }
    }

    /// Open a new session, superseding every earlier one. Queued jobs of
    /// older sessions become `Cancelled` immediately; running ones are
    /// flagged so their results are discarded at delivery.
    pub fn begin_session(&self) -> u64 {
        let new_id = self.shared.active_session.fetch_add(1, Ordering::SeqCst) + 1;
        let mut table = self.shared.table.lock().unwrap();
        table.retain(|_, entry| !entry.state.is_terminal());
        for entry in table.values_mut() {
            if entry.session_id != new_id {
                entry.cancelled = true;
                if entry.state == JobState::Queued {
                    entry.state = JobState::Cancelled;
                }
            }
        }
        new_id
    }

    /// Queue a decode-and-generate job. At most one job per file is ever in
    /// flight: a duplicate submit coalesces with it, and an in-flight job
    /// left over from a superseded session is adopted into this one rather
    /// than re-executed.
    pub fn submit(&self, session_id: u64, file: ImageFileRef) -> JobHandle {
        let handle = JobHandle {
            session_id,
            file: file.clone(),
        };

        let mut table = self.shared.table.lock().unwrap();
        if let Some(entry) = table.get_mut(&file) {
            if !entry.state.is_terminal() {
                entry.session_id = session_id;
                entry.cancelled = false;
                return handle;
            }
        }
        table.insert(
            file.clone(),
            JobEntry {
                session_id,
                state: JobState::Queued,
                cancelled: false,
            },
        );
        drop(table);

        let _ = self.job_tx.send(Job { file });
        handle
    }

    /// Cancel one job. Queued jobs terminate immediately and never start;
    /// a running job keeps running but its result is discarded.
    pub fn cancel(&self, handle: &JobHandle) {
        let mut table = self.shared.table.lock().unwrap();
        if let Some(entry) = table.get_mut(&handle.file) {
            if entry.session_id == handle.session_id && !entry.state.is_terminal() {
                entry.cancelled = true;
                if entry.state == JobState::Queued {
                    entry.state = JobState::Cancelled;
                }
            }
        }
    }

    /// Cancel every non-terminal job belonging to a session.
    pub fn cancel_session(&self, session_id: u64) {
        let mut table = self.shared.table.lock().unwrap();
        for entry in table.values_mut() {
            if entry.session_id == session_id && !entry.state.is_terminal() {
                entry.cancelled = true;
                if entry.state == JobState::Queued {
                    entry.state = JobState::Cancelled;
                }
            }
        }
    }

    /// Pump completed results to `on_result`. Must be called from the
    /// consumer thread (once per UI tick); this is the only place callbacks
    /// run. Stale and cancelled results are dropped here, at the delivery
    /// boundary. Returns how many results were delivered.
    pub fn drain<F>(&self, mut on_result: F) -> usize
    where
        F: FnMut(&ImageFileRef, JobOutcome),
    {
        let active = self.shared.active_session.load(Ordering::SeqCst);
        let mut delivered = 0;
        while let Ok(delivery) = self.result_rx.try_recv() {
            if delivery.session_id != active {
                continue;
            }
            if matches!(delivery.outcome, JobOutcome::Cancelled) {
                continue;
            }
            let live = {
                let table = self.shared.table.lock().unwrap();
                table
                    .get(&delivery.file)
                    .map(|entry| !entry.cancelled && entry.session_id == delivery.session_id)
                    .unwrap_or(false)
            };
            if !live {
                continue;
            }
            on_result(&delivery.file, delivery.outcome);
            delivered += 1;
        }
        delivered
    }

    /// Current state of a file's job, if one was ever submitted since the
    /// last session change.
    pub fn job_state(&self, file: &ImageFileRef) -> Option<JobState> {
        let table = self.shared.table.lock().unwrap();
        table.get(file).map(|entry| entry.state.clone())
    }

    /// Close the job queue and wait for the workers to finish.
    pub fn shutdown(self) {
        let Scheduler {
            job_tx, workers, ..
        } = self;
        drop(job_tx);
        for worker in workers {
            let _ = worker.join();
        }
    }
}

fn worker_loop(shared: &SchedulerShared, jobs: &Receiver<Job>, results: &Sender<Delivery>) {
    for job in jobs.iter() {
        let file = job.file;

        // Claim the job. The table is authoritative: the queued entry may
        // have been cancelled, finished by an adopted duplicate, or replaced
        // since this message was enqueued.
        let claimed = {
            let mut table = shared.table.lock().unwrap();
            match table.get_mut(&file) {
                Some(entry) if !entry.cancelled && entry.state == JobState::Queued => {
                    entry.state = JobState::Running;
                    true
                }
                Some(entry) => {
                    if entry.cancelled && entry.state == JobState::Queued {
                        entry.state = JobState::Cancelled;
                    }
                    false
                }
                None => false,
            }
        };
        if !claimed {
            continue;
        }

        let started = Instant::now();
        let deadline = started + shared.job_timeout;
        let result = run_job(&file, shared.thumbnail_size, deadline);
        if let Some(timer) = &shared.timer {
            timer.on_job_timed(&file.path, started.elapsed());
        }

        // Publish under the table lock so a session switch can never
        // interleave between the liveness check and the cache write: stale
        // work must not overwrite the active session's entries.
        let delivery = {
            let mut table = shared.table.lock().unwrap();
            let active = shared.active_session.load(Ordering::SeqCst);
            let Some(entry) = table.get_mut(&file) else {
                continue;
            };
            if entry.cancelled || entry.session_id != active {
                entry.state = JobState::Cancelled;
                Delivery {
                    session_id: entry.session_id,
                    file,
                    outcome: JobOutcome::Cancelled,
                }
            } else {
                let outcome = match result {
                    Ok(thumbnail) => {
                        let thumbnail = Arc::new(thumbnail);
                        shared.cache.put(file.clone(), thumbnail.clone());
                        entry.state = JobState::Succeeded;
                        JobOutcome::Success(thumbnail)
                    }
                    Err(err) => {
                        eprintln!("Failed to decode {}: {}", file.path.display(), err);
                        entry.state = JobState::Failed(err.clone());
                        JobOutcome::Failure(err)
                    }
                };
                Delivery {
                    session_id: entry.session_id,
                    file,
                    outcome,
                }
            }
        };
        let _ = results.send(delivery);
    }
}

fn run_job(file: &ImageFileRef, thumbnail_size: u32, deadline: Instant) -> Result<Thumbnail> {
    let decoded = decode::decode_with_deadline(&file.path, Some(deadline))?;
    // The multi-megabyte float buffer dies here; only the preview survives.
    Ok(thumbnail::generate(&decoded, thumbnail_size))
}
