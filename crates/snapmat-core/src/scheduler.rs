//! Request coalescing scheduler.
//!
//! Serializes access to the expensive rebuild and applies backpressure
//! instead of queueing without bound: at most one rebuild runs and at most
//! one more waits behind it. Further requests made while a rebuild is
//! already queued are dropped.
//!
//! # State machine
//!
//! ```text
//! Idle ──request──▶ Active ──request──▶ ActiveWithWaiting ──request──▶ (dropped)
//!  ▲                  │                        │
//!  └───complete───────┘                        │
//!                     ▲                        │
//!                     └────────complete────────┘  (queued rebuild starts)
//! ```
//!
//! The decision and the transition happen under one lock. The rebuild body
//! runs on a dedicated worker thread outside the lock, and completion
//! handling runs whether the rebuild succeeded, failed, or panicked.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;
use snapmat_common::{SnapshotRequest, QUEUED_REQUEST_TAG};
use tracing::{debug, error, info, warn};

use crate::job::RunSummary;

/// The expensive operation the scheduler guards.
pub trait Rebuild: Send + Sync + 'static {
    fn rebuild(&self, request: &SnapshotRequest) -> snapmat_common::Result<RunSummary>;
}

/// Immediate answer to a [`Scheduler::request`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestOutcome {
    /// No rebuild was running; one has been started.
    StartedImmediately,
    /// A rebuild is running; this request will run right after it.
    Queued,
    /// A rebuild is running and another is already queued.
    DroppedQueueFull,
}

impl RequestOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestOutcome::StartedImmediately => "started_immediately",
            RequestOutcome::Queued => "queued",
            RequestOutcome::DroppedQueueFull => "dropped_queue_full",
        }
    }
}

impl std::fmt::Display for RequestOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Advisory snapshot of the scheduler; may be stale as soon as it returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SchedulerStatus {
    pub is_active: bool,
    pub has_waiting: bool,
}

impl SchedulerStatus {
    pub fn is_idle(&self) -> bool {
        !self.is_active
    }
}

/// Run counters since the scheduler was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerStats {
    pub started: u64,
    pub completed: u64,
    pub failed: u64,
    pub dropped: u64,
}

/// Tri-state scheduler word. The only datum mutated under the lock.
#[derive(Debug)]
enum SchedulerState {
    Idle,
    Active,
    ActiveWithWaiting { queued: SnapshotRequest },
}

struct Shared<R> {
    rebuild: R,
    state: Mutex<SchedulerState>,
    idle: Condvar,
    started: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

impl<R: Rebuild> Shared<R> {
    fn lock_state(&self) -> MutexGuard<'_, SchedulerState> {
        // The state is a plain enum, so a poisoned lock still holds a valid value.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run one rebuild, converting errors and panics into a logged failure.
    fn execute(&self, request: &SnapshotRequest) {
        self.started.fetch_add(1, Ordering::SeqCst);
        info!(source_tag = %request.source_tag, requested_at = %request.requested_at, "rebuild started");
        let started = Instant::now();

        let result = panic::catch_unwind(AssertUnwindSafe(|| self.rebuild.rebuild(request)));
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(Ok(summary)) => {
                self.completed.fetch_add(1, Ordering::SeqCst);
                info!(
                    source_tag = %request.source_tag,
                    run_id = %summary.run_id,
                    rows = summary.rows,
                    row_groups = summary.row_groups,
                    elapsed_ms,
                    "rebuild completed"
                );
            }
            Ok(Err(e)) => {
                self.failed.fetch_add(1, Ordering::SeqCst);
                error!(
                    source_tag = %request.source_tag,
                    error = %e,
                    code = e.code(),
                    contract_violation = e.is_contract_violation(),
                    elapsed_ms,
                    "rebuild failed"
                );
            }
            Err(payload) => {
                self.failed.fetch_add(1, Ordering::SeqCst);
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "non-string panic payload".to_string());
                error!(
                    source_tag = %request.source_tag,
                    panic = %message,
                    elapsed_ms,
                    "rebuild panicked"
                );
            }
        }
    }
}

/// Worker loop: run, then either promote the queued request or go idle.
fn run_worker<R: Rebuild>(shared: Arc<Shared<R>>, first: SnapshotRequest) {
    let mut request = first;
    loop {
        shared.execute(&request);

        let mut state = shared.lock_state();
        match std::mem::replace(&mut *state, SchedulerState::Idle) {
            SchedulerState::ActiveWithWaiting { queued } => {
                *state = SchedulerState::Active;
                drop(state);
                info!(
                    source_tag = %queued.source_tag,
                    trigger = QUEUED_REQUEST_TAG,
                    "starting queued rebuild"
                );
                request = queued;
            }
            SchedulerState::Active | SchedulerState::Idle => {
                drop(state);
                shared.idle.notify_all();
                debug!("scheduler idle");
                return;
            }
        }
    }
}

/// Coalesces refresh requests into at most one running and one queued rebuild.
///
/// Cloning yields another handle to the same scheduler.
pub struct Scheduler<R: Rebuild> {
    shared: Arc<Shared<R>>,
}

impl<R: Rebuild> Clone for Scheduler<R> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<R: Rebuild> Scheduler<R> {
    pub fn new(rebuild: R) -> Self {
        Self {
            shared: Arc::new(Shared {
                rebuild,
                state: Mutex::new(SchedulerState::Idle),
                idle: Condvar::new(),
                started: AtomicU64::new(0),
                completed: AtomicU64::new(0),
                failed: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
            }),
        }
    }

    /// Ask for a rebuild tagged `source_tag`. Never waits for rebuild work.
    pub fn request(&self, source_tag: impl Into<String>) -> RequestOutcome {
        self.submit(SnapshotRequest::new(source_tag))
    }

    /// Submit a prepared request.
    pub fn submit(&self, request: SnapshotRequest) -> RequestOutcome {
        let mut state = self.shared.lock_state();
        let outcome = match &*state {
            SchedulerState::Idle => RequestOutcome::StartedImmediately,
            SchedulerState::Active => RequestOutcome::Queued,
            SchedulerState::ActiveWithWaiting { .. } => RequestOutcome::DroppedQueueFull,
        };
        match outcome {
            RequestOutcome::StartedImmediately => {
                *state = SchedulerState::Active;
                self.spawn_worker(&mut state, request.clone());
            }
            RequestOutcome::Queued => {
                *state = SchedulerState::ActiveWithWaiting {
                    queued: request.clone(),
                };
            }
            RequestOutcome::DroppedQueueFull => {
                self.shared.dropped.fetch_add(1, Ordering::SeqCst);
            }
        }
        drop(state);

        match outcome {
            RequestOutcome::StartedImmediately => {
                info!(source_tag = %request.source_tag, outcome = %outcome, "refresh request started immediately");
            }
            RequestOutcome::Queued => {
                info!(source_tag = %request.source_tag, outcome = %outcome, "refresh request queued");
            }
            RequestOutcome::DroppedQueueFull => {
                warn!(source_tag = %request.source_tag, outcome = %outcome, "refresh request dropped, queue full");
            }
        }
        outcome
    }

    /// Spawn the worker while holding the lock so no request can observe
    /// `Active` without a worker behind it.
    fn spawn_worker(&self, state: &mut MutexGuard<'_, SchedulerState>, request: SnapshotRequest) {
        let shared = Arc::clone(&self.shared);
        let tag = request.source_tag.clone();
        let spawned = thread::Builder::new()
            .name("snapmat-rebuild".to_string())
            .spawn(move || run_worker(shared, request));
        if let Err(e) = spawned {
            // Counted as a failed run; the request was already accepted.
            self.shared.failed.fetch_add(1, Ordering::SeqCst);
            **state = SchedulerState::Idle;
            error!(source_tag = %tag, error = %e, "failed to spawn rebuild worker");
            self.shared.idle.notify_all();
        }
    }

    pub fn status(&self) -> SchedulerStatus {
        match &*self.shared.lock_state() {
            SchedulerState::Idle => SchedulerStatus {
                is_active: false,
                has_waiting: false,
            },
            SchedulerState::Active => SchedulerStatus {
                is_active: true,
                has_waiting: false,
            },
            SchedulerState::ActiveWithWaiting { .. } => SchedulerStatus {
                is_active: true,
                has_waiting: true,
            },
        }
    }

    /// Block the calling thread until the scheduler is idle.
    ///
    /// Returns `false` if `timeout` elapsed first.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let state = self.shared.lock_state();
        let (state, result) = self
            .shared
            .idle
            .wait_timeout_while(state, timeout, |s| !matches!(s, SchedulerState::Idle))
            .unwrap_or_else(PoisonError::into_inner);
        drop(state);
        !result.timed_out()
    }

    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            started: self.shared.started.load(Ordering::SeqCst),
            completed: self.shared.completed.load(Ordering::SeqCst),
            failed: self.shared.failed.load(Ordering::SeqCst),
            dropped: self.shared.dropped.load(Ordering::SeqCst),
        }
    }

    pub fn runs_completed(&self) -> u64 {
        self.shared.completed.load(Ordering::SeqCst)
    }

    pub fn runs_failed(&self) -> u64 {
        self.shared.failed.load(Ordering::SeqCst)
    }

    /// The rebuild this scheduler drives.
    pub fn rebuild(&self) -> &R {
        &self.shared.rebuild
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use snapmat_common::RunId;
    use std::path::PathBuf;
    use std::sync::mpsc::{self, Receiver, Sender};

    /// Rebuild that blocks until the test releases it, recording each tag.
    struct Gated {
        release: Mutex<Receiver<()>>,
        started: Mutex<Sender<String>>,
        fail_on: Option<&'static str>,
    }

    impl Rebuild for Gated {
        fn rebuild(&self, request: &SnapshotRequest) -> snapmat_common::Result<RunSummary> {
            self.started
                .lock()
                .unwrap()
                .send(request.source_tag.clone())
                .unwrap();
            self.release.lock().unwrap().recv().unwrap();
            if self.fail_on == Some(request.source_tag.as_str()) {
                return Err(snapmat_common::Error::WriteIo("disk full".into()));
            }
            if request.source_tag == "panic" {
                panic!("rebuild blew up");
            }
            Ok(RunSummary {
                run_id: RunId::new(),
                source_tag: request.source_tag.clone(),
                rows: 0,
                row_groups: 0,
                path: Some(PathBuf::from("/dev/null")),
                elapsed: Duration::ZERO,
                finished_at: chrono::Utc::now(),
            })
        }
    }

    struct Harness {
        scheduler: Scheduler<Gated>,
        release: Sender<()>,
        started: Receiver<String>,
    }

    fn harness(fail_on: Option<&'static str>) -> Harness {
        let (release_tx, release_rx) = mpsc::channel();
        let (started_tx, started_rx) = mpsc::channel();
        let scheduler = Scheduler::new(Gated {
            release: Mutex::new(release_rx),
            started: Mutex::new(started_tx),
            fail_on,
        });
        Harness {
            scheduler,
            release: release_tx,
            started: started_rx,
        }
    }

    const WAIT: Duration = Duration::from_secs(10);

    #[test]
    fn test_nightly_manual_manual2_scenario() {
        let h = harness(None);

        assert_eq!(h.scheduler.request("nightly"), RequestOutcome::StartedImmediately);
        assert_eq!(h.scheduler.request("manual"), RequestOutcome::Queued);
        assert_eq!(h.scheduler.request("manual2"), RequestOutcome::DroppedQueueFull);
        assert_eq!(
            h.scheduler.status(),
            SchedulerStatus {
                is_active: true,
                has_waiting: true
            }
        );

        assert_eq!(h.started.recv_timeout(WAIT).unwrap(), "nightly");
        h.release.send(()).unwrap();

        // The queued request runs next, under its own tag.
        assert_eq!(h.started.recv_timeout(WAIT).unwrap(), "manual");
        let status = h.scheduler.status();
        assert!(status.is_active);
        assert!(!status.has_waiting);
        assert!(!h.scheduler.wait_idle(Duration::from_millis(50)));

        h.release.send(()).unwrap();
        assert!(h.scheduler.wait_idle(WAIT));
        assert!(h.scheduler.status().is_idle());

        // manual2 was dropped, never run.
        assert!(h.started.try_recv().is_err());
        let stats = h.scheduler.stats();
        assert_eq!(stats.started, 2);
        assert_eq!(stats.completed, 2);
        assert_eq!(stats.dropped, 1);
    }

    #[test]
    fn test_no_rerun_without_queued_request() {
        let h = harness(None);
        assert_eq!(h.scheduler.request("only"), RequestOutcome::StartedImmediately);
        assert_eq!(h.started.recv_timeout(WAIT).unwrap(), "only");
        h.release.send(()).unwrap();
        assert!(h.scheduler.wait_idle(WAIT));
        assert!(h.started.try_recv().is_err());
        assert_eq!(h.scheduler.stats().started, 1);
    }

    #[test]
    fn test_failed_rebuild_still_honors_queued_request() {
        let h = harness(Some("broken"));
        assert_eq!(h.scheduler.request("broken"), RequestOutcome::StartedImmediately);
        assert_eq!(h.scheduler.request("retry"), RequestOutcome::Queued);

        h.release.send(()).unwrap();
        assert_eq!(h.started.recv_timeout(WAIT).unwrap(), "broken");
        assert_eq!(h.started.recv_timeout(WAIT).unwrap(), "retry");
        h.release.send(()).unwrap();
        assert!(h.scheduler.wait_idle(WAIT));
        assert_eq!(h.scheduler.runs_failed(), 1);
        assert_eq!(h.scheduler.runs_completed(), 1);
    }

    #[test]
    fn test_panicking_rebuild_returns_scheduler_to_idle() {
        let h = harness(None);
        assert_eq!(h.scheduler.request("panic"), RequestOutcome::StartedImmediately);
        h.release.send(()).unwrap();
        assert!(h.scheduler.wait_idle(WAIT));
        assert_eq!(h.scheduler.runs_failed(), 1);

        // Still usable afterwards.
        assert_eq!(h.scheduler.request("after"), RequestOutcome::StartedImmediately);
        h.release.send(()).unwrap();
        assert!(h.scheduler.wait_idle(WAIT));
        assert_eq!(h.scheduler.runs_completed(), 1);
    }

    #[test]
    fn test_wait_idle_on_idle_scheduler_returns_immediately() {
        let h = harness(None);
        assert!(h.scheduler.wait_idle(Duration::ZERO));
        assert_eq!(h.scheduler.stats(), SchedulerStats::default());
    }

    #[test]
    fn test_outcome_serializes_snake_case() {
        let json = serde_json::to_string(&RequestOutcome::DroppedQueueFull).unwrap();
        assert_eq!(json, "\"dropped_queue_full\"");
        assert_eq!(RequestOutcome::Queued.to_string(), "queued");
    }
}
