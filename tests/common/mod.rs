//! Shared fixtures for the integration tests
//!
//! Nothing here touches the network or runs shell commands: backends are
//! scripted and effects are recorded instead of executed.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;

use overseer::agent::{EffectOutcome, EffectRequest, Effector};
use overseer::error::{BackendError, EffectError};
use overseer::inference::{InferenceBackend, ProposedAction, RequestRouter};
use overseer::{AgentKind, Controller, HardwareProfile, OverseerConfig, Task, TaskId, TaskStatus};

/// Always proposes the same command
pub struct ScriptedBackend {
    pub command: &'static str,
}

#[async_trait]
impl InferenceBackend for ScriptedBackend {
    fn model(&self) -> &str {
        "scripted"
    }

    async fn interpret(&self, _prompt: &str) -> Result<ProposedAction, BackendError> {
        Ok(ProposedAction::new(self.command, "scripted answer", 0.9))
    }

    async fn is_available(&self) -> bool {
        true
    }
}

/// Answers only after `delay`, long past any sane inference timeout
pub struct SlowBackend {
    pub delay: Duration,
}

#[async_trait]
impl InferenceBackend for SlowBackend {
    fn model(&self) -> &str {
        "slow"
    }

    async fn interpret(&self, _prompt: &str) -> Result<ProposedAction, BackendError> {
        tokio::time::sleep(self.delay).await;
        Ok(ProposedAction::new("echo too late", "never used", 0.9))
    }

    async fn is_available(&self) -> bool {
        false
    }
}

/// Holds every interpretation until the test releases it, then proposes
/// `command`
pub struct GatedBackend {
    command: &'static str,
    gate: Semaphore,
    entered: AtomicUsize,
}

impl GatedBackend {
    pub fn new(command: &'static str) -> Arc<Self> {
        Arc::new(Self {
            command,
            gate: Semaphore::new(0),
            entered: AtomicUsize::new(0),
        })
    }

    pub fn release(&self, n: usize) {
        self.gate.add_permits(n);
    }

    /// Wait until `n` interpretations are blocked at the gate
    pub async fn wait_entered(&self, n: usize) {
        let waited = tokio::time::timeout(Duration::from_secs(5), async {
            while self.entered.load(Ordering::SeqCst) < n {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await;
        assert!(waited.is_ok(), "never saw {} interpretations start", n);
    }
}

#[async_trait]
impl InferenceBackend for GatedBackend {
    fn model(&self) -> &str {
        "gated"
    }

    async fn interpret(&self, _prompt: &str) -> Result<ProposedAction, BackendError> {
        self.entered.fetch_add(1, Ordering::SeqCst);
        let permit = self
            .gate
            .acquire()
            .await
            .map_err(|e| BackendError::Unavailable(e.to_string()))?;
        permit.forget();
        Ok(ProposedAction::new(self.command, "gated answer", 0.9))
    }

    async fn is_available(&self) -> bool {
        true
    }
}

/// Always picks the same agent
pub struct ScriptedRouter {
    pub kind: AgentKind,
}

#[async_trait]
impl RequestRouter for ScriptedRouter {
    fn model(&self) -> &str {
        "scripted-router"
    }

    async fn categorize(&self, _request: &str) -> Result<AgentKind, BackendError> {
        Ok(self.kind)
    }
}

/// Never reachable
pub struct FailingRouter;

#[async_trait]
impl RequestRouter for FailingRouter {
    fn model(&self) -> &str {
        "failing-router"
    }

    async fn categorize(&self, _request: &str) -> Result<AgentKind, BackendError> {
        Err(BackendError::Unavailable("connection refused".to_string()))
    }
}

/// Effector that blocks every effect until the test hands out permits.
///
/// Tracks how many effects are in flight at once and the order in which
/// tasks reached it.
pub struct GateEffector {
    gate: Semaphore,
    current: AtomicUsize,
    peak: AtomicUsize,
    seen: Mutex<Vec<TaskId>>,
}

impl GateEffector {
    /// Starts closed
    pub fn closed() -> Arc<Self> {
        Arc::new(Self {
            gate: Semaphore::new(0),
            current: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        })
    }

    /// Starts open for practically any number of effects
    pub fn open() -> Arc<Self> {
        let gate = Self::closed();
        gate.release(10_000);
        gate
    }

    pub fn release(&self, n: usize) {
        self.gate.add_permits(n);
    }

    pub fn in_flight(&self) -> usize {
        self.current.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn seen(&self) -> Vec<TaskId> {
        self.seen.lock().unwrap().clone()
    }

    /// Wait until `n` effects are blocked at the gate
    pub async fn wait_in_flight(&self, n: usize) {
        let waited = tokio::time::timeout(Duration::from_secs(5), async {
            while self.in_flight() < n {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await;
        assert!(waited.is_ok(), "never saw {} effects in flight", n);
    }
}

#[async_trait]
impl Effector for GateEffector {
    fn name(&self) -> &'static str {
        "gate"
    }

    async fn apply(&self, request: &EffectRequest) -> Result<EffectOutcome, EffectError> {
        self.seen.lock().unwrap().push(request.task_id);
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        let permit = self
            .gate
            .acquire()
            .await
            .map_err(|e| EffectError::Aborted(e.to_string()))?;
        permit.forget();

        self.current.fetch_sub(1, Ordering::SeqCst);
        Ok(EffectOutcome {
            applied: true,
            exit_code: Some(0),
            stdout: request.command.clone(),
            ..EffectOutcome::not_applied()
        })
    }
}

/// Rule-only configuration with short deadlines
pub fn config() -> OverseerConfig {
    let mut config = OverseerConfig::default();
    config.inference.enabled = false;
    config.task_timeout_secs = 10;
    config.inference_timeout_secs = 1;
    config
}

pub fn controller(config: OverseerConfig, effector: Arc<GateEffector>) -> Controller {
    Controller::builder(config)
        .hardware(HardwareProfile::fallback())
        .effector(effector)
        .build()
        .expect("controller should build")
}

/// Wait for a terminal status; fails the test if it never comes
pub async fn finished(controller: &Controller, id: TaskId) -> Task {
    let task = controller.wait(id, Duration::from_secs(8)).await.unwrap();
    assert!(task.status.is_terminal(), "task {} still {}", id, task.status);
    task
}

/// Wait until the task reaches `status`
pub async fn reaches(controller: &Controller, id: TaskId, status: TaskStatus) {
    let reached = tokio::time::timeout(Duration::from_secs(5), async {
        while controller.poll(id).unwrap().status != status {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(reached.is_ok(), "task {} never reached {}", id, status);
}
