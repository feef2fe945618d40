//! Background consistency job.
//!
//! A single named worker thread makes a pass over every enrolled story, then
//! sleeps for the run interval (or the shorter failure backoff) until the
//! next tick or a stop signal. Scans of different stories within a pass run
//! concurrently up to `max_concurrent_scans`; a story that is already being
//! scanned (by the loop or by [`ConsistencyJob::run_once`]) is coalesced,
//! not queued.

use std::collections::{BTreeMap, HashSet};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::{DateTime, Utc};
use crossbeam_channel::{after, bounded, select, Receiver, Sender};
use serde::{Deserialize, Serialize};

use crate::config::JobConfig;
use crate::engine::{ConsistencyEngine, ContradictionReport, ScanSummary};
use crate::error::{ConsistencyError, ConsistencyResult};
use crate::ids::{StoryId, UserId};

/// Result of the most recent scan attempt for one story.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ScanOutcome {
    Succeeded {
        edges_created: usize,
        alerts_published: usize,
    },
    Failed {
        error: String,
    },
}

/// Per-story view inside [`JobStatus`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoryStatus {
    pub story_id: StoryId,
    pub user_id: Option<UserId>,
    pub enrolled: bool,
    pub scanning: bool,
    pub last_run: Option<DateTime<Utc>>,
    pub last_outcome: Option<ScanOutcome>,
}

/// Read-only snapshot returned by [`ConsistencyJob::get_status`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatus {
    pub is_running: bool,
    pub run_interval: Duration,
    /// End of the last completed pass.
    pub last_run: Option<DateTime<Utc>>,
    /// Report refreshed after each completed pass.
    pub contradiction_report: Option<ContradictionReport>,
    pub stories: Vec<StoryStatus>,
    pub scans_started: u64,
    pub scans_coalesced: u64,
    /// Passes that ran every enrolled story.
    pub passes_completed: u64,
    /// Passes cut short by `stop` between story chunks.
    pub passes_interrupted: u64,
}

#[derive(Debug, Clone, Default)]
struct StoryState {
    user_id: Option<UserId>,
    enrolled: bool,
    last_run: Option<DateTime<Utc>>,
    last_outcome: Option<ScanOutcome>,
}

enum Attempt {
    Ran(ConsistencyResult<ScanSummary>),
    Coalesced,
}

/// Removes the story from the in-flight set when the scan ends, however it ends.
struct InFlight<'a> {
    set: &'a Mutex<HashSet<StoryId>>,
    story_id: StoryId,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if let Ok(mut set) = self.set.lock() {
            set.remove(&self.story_id);
        }
    }
}

struct JobInner {
    engine: ConsistencyEngine,
    config: JobConfig,
    stories: RwLock<BTreeMap<StoryId, StoryState>>,
    in_flight: Mutex<HashSet<StoryId>>,
    last_run: RwLock<Option<DateTime<Utc>>>,
    report: RwLock<Option<ContradictionReport>>,
    running: AtomicBool,
    stopping: AtomicBool,
    scans_started: AtomicU64,
    scans_coalesced: AtomicU64,
    passes_completed: AtomicU64,
    passes_interrupted: AtomicU64,
}

fn lock_err(context: &str) -> ConsistencyError {
    ConsistencyError::internal(format!("poisoned lock: {context}"))
}

impl JobInner {
    fn claim(&self, story_id: &StoryId) -> ConsistencyResult<Option<InFlight<'_>>> {
        let mut set = self.in_flight.lock().map_err(|_| lock_err("in_flight"))?;
        if !set.insert(story_id.clone()) {
            return Ok(None);
        }
        Ok(Some(InFlight {
            set: &self.in_flight,
            story_id: story_id.clone(),
        }))
    }

    fn scan_story(&self, story_id: &StoryId, user_id: Option<&UserId>) -> Attempt {
        let _guard = match self.claim(story_id) {
            Ok(Some(guard)) => guard,
            Ok(None) => {
                self.scans_coalesced.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(story_id = %story_id, "scan already in flight; coalesced");
                return Attempt::Coalesced;
            }
            Err(e) => return Attempt::Ran(Err(e)),
        };
        self.scans_started.fetch_add(1, Ordering::Relaxed);

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            self.engine.run_consistency_scan(story_id, user_id)
        }))
        .unwrap_or_else(|_| Err(ConsistencyError::internal("scan panicked")));

        let outcome = match &result {
            Ok(summary) => ScanOutcome::Succeeded {
                edges_created: summary.edges_created,
                alerts_published: summary.alerts_published,
            },
            Err(e) => {
                tracing::error!(story_id = %story_id, error = %e, "story scan failed");
                ScanOutcome::Failed {
                    error: e.to_string(),
                }
            }
        };
        if let Ok(mut stories) = self.stories.write() {
            let state = stories.entry(story_id.clone()).or_default();
            state.last_run = Some(Utc::now());
            state.last_outcome = Some(outcome);
        }
        Attempt::Ran(result)
    }

    /// One pass over the enrolled stories. Returns the number of failed scans.
    fn run_pass(&self) -> usize {
        let targets: Vec<(StoryId, Option<UserId>)> = match self.stories.read() {
            Ok(stories) => stories
                .iter()
                .filter(|(_, s)| s.enrolled)
                .map(|(id, s)| (id.clone(), s.user_id.clone()))
                .collect(),
            Err(_) => {
                tracing::error!("story registry lock poisoned; pass skipped");
                return 1;
            }
        };

        let mut failures = 0;
        for chunk in targets.chunks(self.config.max_concurrent_scans.max(1)) {
            if self.stopping.load(Ordering::Acquire) {
                self.passes_interrupted.fetch_add(1, Ordering::Relaxed);
                tracing::info!(
                    stories = targets.len(),
                    failures,
                    "consistency pass interrupted by stop"
                );
                return failures;
            }
            failures += self.scan_chunk(chunk);
        }

        *self.last_run.write().unwrap_or_else(std::sync::PoisonError::into_inner) = Some(Utc::now());
        match self.engine.get_contradiction_report(None) {
            Ok(report) => {
                *self.report.write().unwrap_or_else(std::sync::PoisonError::into_inner) = Some(report);
            }
            Err(e) => tracing::warn!(error = %e, "report refresh failed; keeping previous"),
        }
        self.passes_completed.fetch_add(1, Ordering::Relaxed);
        tracing::info!(stories = targets.len(), failures, "consistency pass complete");
        failures
    }

    fn scan_chunk(&self, chunk: &[(StoryId, Option<UserId>)]) -> usize {
        let failed = |a: &Attempt| usize::from(matches!(a, Attempt::Ran(Err(_))));
        if chunk.len() == 1 {
            let (story_id, user_id) = &chunk[0];
            return failed(&self.scan_story(story_id, user_id.as_ref()));
        }

        thread::scope(|s| {
            let handles: Vec<_> = chunk
                .iter()
                .map(|(story_id, user_id)| {
                    let spawned = thread::Builder::new()
                        .name(format!("plotguard-scan-{story_id}"))
                        .spawn_scoped(s, move || self.scan_story(story_id, user_id.as_ref()));
                    match spawned {
                        Ok(handle) => Ok(handle),
                        // Could not get a thread; scan on this one instead.
                        Err(_) => Err(self.scan_story(story_id, user_id.as_ref())),
                    }
                })
                .collect();
            handles
                .into_iter()
                .map(|h| match h {
                    Ok(handle) => handle.join().map_or(1, |a| failed(&a)),
                    Err(attempt) => failed(&attempt),
                })
                .sum()
        })
    }
}

fn run_loop(inner: &JobInner, stop_rx: &Receiver<()>) {
    loop {
        let failures = inner.run_pass();
        let wait = if failures > 0 {
            inner.config.failure_backoff().min(inner.config.run_interval())
        } else {
            inner.config.run_interval()
        };
        select! {
            recv(stop_rx) -> _ => break,
            recv(after(wait)) -> _ => {}
        }
    }
}

struct Worker {
    stop_tx: Sender<()>,
    join: JoinHandle<()>,
}

/// Recoverable scheduling loop over enrolled stories.
///
/// States: `Stopped -> Running -> Stopped`.
pub struct ConsistencyJob {
    inner: Arc<JobInner>,
    worker: Mutex<Option<Worker>>,
}

impl std::fmt::Debug for ConsistencyJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsistencyJob")
            .field("config", &self.inner.config)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl ConsistencyJob {
    #[must_use]
    pub fn new(engine: ConsistencyEngine, config: JobConfig) -> Self {
        Self {
            inner: Arc::new(JobInner {
                engine,
                config,
                stories: RwLock::new(BTreeMap::new()),
                in_flight: Mutex::new(HashSet::new()),
                last_run: RwLock::new(None),
                report: RwLock::new(None),
                running: AtomicBool::new(false),
                stopping: AtomicBool::new(false),
                scans_started: AtomicU64::new(0),
                scans_coalesced: AtomicU64::new(0),
                passes_completed: AtomicU64::new(0),
                passes_interrupted: AtomicU64::new(0),
            }),
            worker: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn engine(&self) -> &ConsistencyEngine {
        &self.inner.engine
    }

    /// Adds a story to the periodic passes. Re-enrolling updates the user scope.
    ///
    /// # Errors
    ///
    /// Returns `ConsistencyError::Internal` if the registry lock is poisoned.
    pub fn enroll(&self, story_id: StoryId, user_id: Option<UserId>) -> ConsistencyResult<()> {
        let mut stories = self.inner.stories.write().map_err(|_| lock_err("stories"))?;
        let state = stories.entry(story_id).or_default();
        state.enrolled = true;
        state.user_id = user_id;
        Ok(())
    }

    /// Removes a story from the periodic passes; its status is kept.
    /// Returns true if it was enrolled.
    ///
    /// # Errors
    ///
    /// Returns `ConsistencyError::Internal` if the registry lock is poisoned.
    pub fn withdraw(&self, story_id: &StoryId) -> ConsistencyResult<bool> {
        let mut stories = self.inner.stories.write().map_err(|_| lock_err("stories"))?;
        Ok(stories
            .get_mut(story_id)
            .is_some_and(|s| std::mem::replace(&mut s.enrolled, false)))
    }

    #[must_use]
    pub fn enrolled(&self) -> Vec<StoryId> {
        self.inner
            .stories
            .read()
            .map(|s| {
                s.iter()
                    .filter(|(_, st)| st.enrolled)
                    .map(|(id, _)| id.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    /// Spawns the loop. Returns false, and does nothing, if already running.
    ///
    /// # Errors
    ///
    /// Returns `ConsistencyError::Internal` if a lock is poisoned or the
    /// thread cannot be spawned.
    pub fn start(&self) -> ConsistencyResult<bool> {
        let mut worker = self.worker.lock().map_err(|_| lock_err("worker"))?;
        if worker.is_some() {
            return Ok(false);
        }

        let (stop_tx, stop_rx) = bounded::<()>(1);
        let inner = Arc::clone(&self.inner);
        inner.stopping.store(false, Ordering::Release);
        let join = thread::Builder::new()
            .name("plotguard-consistency".to_string())
            .spawn(move || run_loop(&inner, &stop_rx))
            .map_err(|e| ConsistencyError::internal(format!("failed to spawn consistency job: {e}")))?;

        *worker = Some(Worker { stop_tx, join });
        self.inner.running.store(true, Ordering::Release);
        tracing::info!(
            interval_secs = self.inner.config.run_interval_secs,
            "consistency job started"
        );
        Ok(true)
    }

    /// Signals the loop and waits for the current pass to finish.
    /// Returns false if it was not running.
    ///
    /// # Errors
    ///
    /// Returns `ConsistencyError::Internal` if the worker lock is poisoned.
    pub fn stop(&self) -> ConsistencyResult<bool> {
        let taken = self.worker.lock().map_err(|_| lock_err("worker"))?.take();
        let Some(Worker { stop_tx, join }) = taken else {
            return Ok(false);
        };
        self.inner.stopping.store(true, Ordering::Release);
        let _ = stop_tx.try_send(());
        if join.join().is_err() {
            tracing::error!("consistency job thread panicked");
        }
        self.inner.running.store(false, Ordering::Release);
        tracing::info!("consistency job stopped");
        Ok(true)
    }

    /// Scans one story now, outside the timer. `Ok(None)` if a scan of that
    /// story is already in flight (coalesced).
    ///
    /// # Errors
    ///
    /// Whatever the scan itself fails with.
    pub fn run_once(
        &self,
        story_id: &StoryId,
        user_id: Option<&UserId>,
    ) -> ConsistencyResult<Option<ScanSummary>> {
        match self.inner.scan_story(story_id, user_id) {
            Attempt::Ran(result) => result.map(Some),
            Attempt::Coalesced => Ok(None),
        }
    }

    /// Snapshot of job state. Never waits for a running scan.
    #[must_use]
    pub fn get_status(&self) -> JobStatus {
        let inner = &self.inner;
        let scanning: HashSet<StoryId> = inner
            .in_flight
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default();
        let stories = inner
            .stories
            .read()
            .map(|s| {
                s.iter()
                    .map(|(id, st)| StoryStatus {
                        story_id: id.clone(),
                        user_id: st.user_id.clone(),
                        enrolled: st.enrolled,
                        scanning: scanning.contains(id),
                        last_run: st.last_run,
                        last_outcome: st.last_outcome.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default();

        JobStatus {
            is_running: self.is_running(),
            run_interval: inner.config.run_interval(),
            last_run: inner.last_run.read().map(|l| *l).unwrap_or(None),
            contradiction_report: inner.report.read().map(|r| r.clone()).unwrap_or(None),
            stories,
            scans_started: inner.scans_started.load(Ordering::Relaxed),
            scans_coalesced: inner.scans_coalesced.load(Ordering::Relaxed),
            passes_completed: inner.passes_completed.load(Ordering::Relaxed),
            passes_interrupted: inner.passes_interrupted.load(Ordering::Relaxed),
        }
    }
}

impl Drop for ConsistencyJob {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}
