//! Per-agent worker lanes
//!
//! ```text
//!   submit ──► [id, id, id, ...] (unbounded FIFO) ──► worker 0 ─┐
//!                      │                              worker 1 ─┼─► Agent::execute
//!                      │                              worker N ─┘
//!                      └── one receiver, taken in turn under a mutex
//! ```
//!
//! A lane has exactly `max_concurrent_tasks` workers, so that many tasks of
//! the agent can be running at once. Everything else waits in the queue as
//! `pending`; nothing is rejected for lack of capacity.
//!
//! A worker holds the receiver while it dequeues an id and moves the task to
//! `running`, so tasks of one agent start in submission order. The
//! `pending → running` step runs under the emergency-stop gate; while the stop
//! is engaged the worker parks, still holding the receiver, and the rest of
//! the lane queues behind it.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant as StdInstant};

use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info_span, Instrument};

use super::store::{StartedTask, TaskStore};
use super::task::{TaskId, TaskPhase};
use crate::agent::{Agent, ExecutionContext};
use crate::error::{ControllerError, TaskFailure};
use crate::metrics::{QUEUE_DEPTH, TASKS_RUNNING, TASK_DURATION};
use crate::security::Lockdown;

/// Shared by every worker of a lane
#[derive(Clone)]
struct LaneShared {
    agent: Arc<Agent>,
    rx: Arc<tokio::sync::Mutex<UnboundedReceiver<TaskId>>>,
    queued: Arc<AtomicUsize>,
    store: Arc<TaskStore>,
    lockdown: Arc<Lockdown>,
    shutdown: CancellationToken,
    /// The agent's own execution limit
    task_timeout: Duration,
}

pub(crate) struct Lane {
    agent: Arc<Agent>,
    tx: UnboundedSender<TaskId>,
    queued: Arc<AtomicUsize>,
    /// Serializes the submission check and enqueue for this agent only
    submit_lock: Mutex<()>,
}

impl Lane {
    /// Create the lane and spawn its workers
    pub fn spawn(
        agent: Arc<Agent>,
        store: Arc<TaskStore>,
        lockdown: Arc<Lockdown>,
        shutdown: CancellationToken,
    ) -> (Self, Vec<JoinHandle<()>>) {
        let (tx, rx) = unbounded_channel();
        let queued = Arc::new(AtomicUsize::new(0));
        let workers = agent.descriptor().max_concurrent_tasks.max(1);
        let task_timeout = agent.descriptor().task_timeout();

        let shared = LaneShared {
            agent: Arc::clone(&agent),
            rx: Arc::new(tokio::sync::Mutex::new(rx)),
            queued: Arc::clone(&queued),
            store,
            lockdown,
            shutdown,
            task_timeout,
        };

        let handles = (0..workers)
            .map(|index| {
                let worker = Worker {
                    index,
                    shared: shared.clone(),
                };
                tokio::spawn(worker.run())
            })
            .collect();

        tracing::debug!(
            agent = %agent.kind(),
            workers,
            timeout_secs = task_timeout.as_secs(),
            "lane started"
        );

        let lane = Self {
            agent,
            tx,
            queued,
            submit_lock: Mutex::new(()),
        };
        (lane, handles)
    }

    pub fn agent(&self) -> &Arc<Agent> {
        &self.agent
    }

    pub fn submit_guard(&self) -> MutexGuard<'_, ()> {
        self.submit_lock.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn enqueue(&self, id: TaskId) -> Result<(), ControllerError> {
        self.queued.fetch_add(1, Ordering::SeqCst);
        if self.tx.send(id).is_err() {
            self.queued.fetch_sub(1, Ordering::SeqCst);
            return Err(ControllerError::ShuttingDown);
        }
        QUEUE_DEPTH.with_label_values(&[self.agent.kind().as_str()]).inc();
        Ok(())
    }

    /// Approved tasks not yet picked up by a worker
    pub fn queue_depth(&self) -> usize {
        self.queued.load(Ordering::SeqCst)
    }
}

enum Pickup {
    Admitted(StartedTask),
    /// Dequeued a task that was cancelled while it waited
    Skipped,
    Shutdown,
}

struct Worker {
    index: usize,
    shared: LaneShared,
}

impl Worker {
    async fn run(self) {
        loop {
            match self.pickup().await {
                Pickup::Admitted(started) => self.run_task(started).await,
                Pickup::Skipped => continue,
                Pickup::Shutdown => break,
            }
        }
        tracing::debug!(agent = %self.shared.agent.kind(), worker = self.index, "worker stopped");
    }

    async fn pickup(&self) -> Pickup {
        let shared = &self.shared;
        let mut rx = shared.rx.lock().await;

        let id = tokio::select! {
            biased;
            _ = shared.shutdown.cancelled() => return Pickup::Shutdown,
            id = rx.recv() => match id {
                Some(id) => id,
                None => return Pickup::Shutdown,
            },
        };
        shared.queued.fetch_sub(1, Ordering::SeqCst);
        QUEUE_DEPTH
            .with_label_values(&[shared.agent.kind().as_str()])
            .dec();

        loop {
            match shared.lockdown.try_admit(|| shared.store.start(id)) {
                Some(Some(started)) => return Pickup::Admitted(started),
                Some(None) => return Pickup::Skipped,
                None => {
                    tracing::debug!(task_id = %id, worker = self.index, "emergency stop engaged, holding task");
                    tokio::select! {
                        _ = shared.shutdown.cancelled() => return Pickup::Shutdown,
                        _ = shared.lockdown.wait_released() => {}
                    }
                }
            }
        }
    }

    async fn run_task(&self, started: StartedTask) {
        let shared = &self.shared;
        let agent = shared.agent.as_ref();
        let label = agent.kind().as_str();
        let id = started.id;

        TASKS_RUNNING.with_label_values(&[label]).inc();

        let span = info_span!(
            "task",
            task_id = %id,
            agent = label,
            worker = self.index,
            otel.name = "task"
        );

        let begun = StdInstant::now();
        let deadline = Instant::now() + shared.task_timeout;
        let store = &shared.store;
        let on_phase = |phase: TaskPhase| store.set_phase(id, phase);

        let ctx = ExecutionContext {
            task_id: id,
            payload: &started.payload,
            declared: started.declared,
            deadline,
            cancel: &started.cancel,
            on_phase: &on_phase,
        };

        let result = tokio::time::timeout_at(deadline, agent.execute(ctx))
            .instrument(span.clone())
            .await;
        let elapsed = begun.elapsed();

        let status = match result {
            Ok(outcome) => store.finish(id, outcome),
            Err(_) => {
                agent.record_timeout(elapsed);
                store.fail(
                    id,
                    TaskFailure::Timeout {
                        elapsed_ms: elapsed.as_millis() as u64,
                    },
                )
            }
        };

        TASKS_RUNNING.with_label_values(&[label]).dec();
        TASK_DURATION
            .with_label_values(&[label])
            .observe(elapsed.as_secs_f64());

        let reason = store.get(id).and_then(|task| task.reason());
        span.in_scope(|| match reason {
            Some(reason) => tracing::warn!(
                status = ?status,
                reason = %reason,
                elapsed_ms = elapsed.as_millis() as u64,
                "task finished"
            ),
            None => tracing::info!(
                status = ?status,
                elapsed_ms = elapsed.as_millis() as u64,
                "task finished"
            ),
        });
    }
}
