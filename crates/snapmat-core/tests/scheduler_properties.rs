//! Property-based tests for request coalescing.
//!
//! A gated rebuild blocks until the test releases it, so the test decides
//! exactly when each run finishes and can compare the scheduler against a
//! three-state model after every step.

use proptest::prelude::*;
use snapmat_columnar::Row;
use snapmat_common::{Result, RunId, SnapshotRequest};
use snapmat_config::{MaterializerConfig, WriteStrategyKind};
use snapmat_core::{
    Rebuild, RequestOutcome, RowSource, RunSummary, Scheduler, SnapshotJob, VecSource,
};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Mutex;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(10);

struct Gated {
    started: Mutex<Sender<String>>,
    release: Mutex<Receiver<()>>,
}

impl Rebuild for Gated {
    fn rebuild(&self, request: &SnapshotRequest) -> Result<RunSummary> {
        self.started
            .lock()
            .unwrap()
            .send(request.source_tag.clone())
            .unwrap();
        self.release.lock().unwrap().recv().unwrap();
        Ok(RunSummary {
            run_id: RunId::new(),
            source_tag: request.source_tag.clone(),
            rows: 0,
            row_groups: 0,
            path: None,
            elapsed: Duration::ZERO,
            finished_at: chrono::Utc::now(),
        })
    }
}

fn gated() -> (Scheduler<Gated>, Receiver<String>, Sender<()>) {
    let (started_tx, started_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel();
    let scheduler = Scheduler::new(Gated {
        started: Mutex::new(started_tx),
        release: Mutex::new(release_rx),
    });
    (scheduler, started_rx, release_tx)
}

/// Reference model of the scheduler word.
#[derive(Debug, Clone, PartialEq)]
enum Model {
    Idle,
    Active,
    Waiting(String),
}

#[derive(Debug, Clone)]
enum Op {
    Request,
    FinishRun,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![3 => Just(Op::Request), 1 => Just(Op::FinishRun)]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn burst_while_busy_starts_queues_then_drops(n in 1usize..24) {
        let (scheduler, started, release) = gated();
        let outcomes: Vec<_> = (0..n).map(|i| scheduler.request(format!("r{i}"))).collect();

        prop_assert_eq!(outcomes[0], RequestOutcome::StartedImmediately);
        if n > 1 {
            prop_assert_eq!(outcomes[1], RequestOutcome::Queued);
        }
        prop_assert!(outcomes[2.min(n)..].iter().all(|o| *o == RequestOutcome::DroppedQueueFull));

        prop_assert_eq!(started.recv_timeout(WAIT).unwrap(), "r0");
        release.send(()).unwrap();
        if n > 1 {
            prop_assert_eq!(started.recv_timeout(WAIT).unwrap(), "r1");
            release.send(()).unwrap();
        }
        prop_assert!(scheduler.wait_idle(WAIT));
        prop_assert!(started.try_recv().is_err());

        let stats = scheduler.stats();
        prop_assert_eq!(stats.started as usize, n.min(2));
        prop_assert_eq!(stats.dropped as usize, n.saturating_sub(2));
    }

    #[test]
    fn scheduler_matches_three_state_model(ops in prop::collection::vec(op_strategy(), 1..30)) {
        let (scheduler, started, release) = gated();
        let mut model = Model::Idle;

        for (i, op) in ops.iter().enumerate() {
            match op {
                Op::Request => {
                    let tag = format!("t{i}");
                    let outcome = scheduler.request(tag.clone());
                    let expected = match model.clone() {
                        Model::Idle => {
                            prop_assert_eq!(started.recv_timeout(WAIT).unwrap(), tag);
                            model = Model::Active;
                            RequestOutcome::StartedImmediately
                        }
                        Model::Active => {
                            model = Model::Waiting(tag);
                            RequestOutcome::Queued
                        }
                        Model::Waiting(_) => RequestOutcome::DroppedQueueFull,
                    };
                    prop_assert_eq!(outcome, expected);
                }
                Op::FinishRun => match model.clone() {
                    Model::Idle => {}
                    Model::Active => {
                        release.send(()).unwrap();
                        prop_assert!(scheduler.wait_idle(WAIT));
                        prop_assert!(started.try_recv().is_err());
                        model = Model::Idle;
                    }
                    Model::Waiting(queued) => {
                        release.send(()).unwrap();
                        // Exactly one follow-up run, under the queued tag.
                        prop_assert_eq!(started.recv_timeout(WAIT).unwrap(), queued);
                        model = Model::Active;
                    }
                },
            }

            let status = scheduler.status();
            prop_assert_eq!(status.is_active, model != Model::Idle);
            prop_assert_eq!(status.has_waiting, matches!(model, Model::Waiting(_)));
        }

        // Drain whatever is still running.
        while model != Model::Idle {
            release.send(()).unwrap();
            model = match model {
                Model::Waiting(queued) => {
                    prop_assert_eq!(started.recv_timeout(WAIT).unwrap(), queued);
                    Model::Active
                }
                _ => Model::Idle,
            };
        }
        prop_assert!(scheduler.wait_idle(WAIT));
    }
}

#[test]
fn nightly_then_manual_runs_real_job_twice() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("snap.parquet");
    let config = MaterializerConfig {
        output_path: output.clone(),
        strategy: WriteStrategyKind::Buffered,
        row_group_size: 4,
        ..MaterializerConfig::default()
    };

    let (gate_tx, gate_rx) = mpsc::channel::<()>();
    let gate_rx = Mutex::new(gate_rx);
    let factory = move || -> Result<Box<dyn RowSource>> {
        gate_rx.lock().unwrap().recv().unwrap();
        let rows = (0..10i64).map(|i| Row::new().with("n", i)).collect();
        Ok(Box::new(VecSource::new(rows)))
    };

    let scheduler = Scheduler::new(SnapshotJob::new(config, factory).unwrap());
    assert_eq!(scheduler.request("nightly"), RequestOutcome::StartedImmediately);
    assert_eq!(scheduler.request("manual"), RequestOutcome::Queued);
    assert_eq!(scheduler.request("manual2"), RequestOutcome::DroppedQueueFull);

    gate_tx.send(()).unwrap();
    gate_tx.send(()).unwrap();
    assert!(scheduler.wait_idle(WAIT));
    assert!(scheduler.status().is_idle());

    let stats = scheduler.stats();
    assert_eq!((stats.started, stats.completed, stats.dropped), (2, 2, 1));
    let last = scheduler.rebuild().last_summary().expect("summary");
    assert_eq!(last.source_tag, "manual");
    assert_eq!(last.rows, 10);
    assert_eq!(last.row_groups, 3);
    assert!(output.exists());
}
