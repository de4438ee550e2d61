//! Integration tests for dispatch: concurrency limits, ordering, emergency
//! stop, cancellation, deadlines and retention.

mod common;

use std::sync::Arc;
use std::time::Duration;

use overseer::agent::FallbackCause;
use overseer::config::AgentSettings;
use overseer::controller::CancellationState;
use overseer::{
    AgentKind, CancelOutcome, ControllerError, Provenance, TaskFailure, TaskPayload, TaskStatus,
};

use common::{
    config, controller, finished, reaches, FailingRouter, GateEffector, GatedBackend, ScriptedBackend,
    ScriptedRouter, SlowBackend,
};

fn single_worker(kind: AgentKind) -> overseer::OverseerConfig {
    let mut config = config();
    config.agents.insert(
        kind,
        AgentSettings {
            max_concurrent_tasks: Some(1),
            ..AgentSettings::default()
        },
    );
    config
}

/// Twice the limit submitted: exactly the limit runs, the rest waits pending
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrency_bounded_by_descriptor() {
    let gate = GateEffector::closed();
    let controller = controller(config(), Arc::clone(&gate));
    let limit = controller
        .descriptors()
        .into_iter()
        .find(|d| d.kind == AgentKind::ShellAssistant)
        .unwrap()
        .max_concurrent_tasks;

    let ids: Vec<_> = (0..limit * 2)
        .map(|_| {
            controller
                .submit(AgentKind::ShellAssistant, TaskPayload::new("pwd"))
                .unwrap()
        })
        .collect();

    gate.wait_in_flight(limit).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let statuses: Vec<_> = ids.iter().map(|id| controller.poll(*id).unwrap().status).collect();
    let running = statuses.iter().filter(|s| **s == TaskStatus::Running).count();
    let pending = statuses.iter().filter(|s| **s == TaskStatus::Pending).count();
    assert_eq!(running, limit);
    assert_eq!(pending, limit);
    assert_eq!(gate.peak(), limit);

    gate.release(ids.len());
    for id in &ids {
        assert_eq!(finished(&controller, *id).await.status, TaskStatus::Succeeded);
    }
    assert_eq!(gate.peak(), limit);
}

/// Agents do not share capacity: a saturated lane leaves others free
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_lanes_are_independent() {
    let gate = GateEffector::closed();
    let controller = controller(single_worker(AgentKind::ShellAssistant), Arc::clone(&gate));

    let blocked = controller
        .submit(AgentKind::ShellAssistant, TaskPayload::new("pwd"))
        .unwrap();
    gate.wait_in_flight(1).await;

    let other = controller
        .submit(AgentKind::System, TaskPayload::new("check memory"))
        .unwrap();
    reaches(&controller, other, TaskStatus::Running).await;
    gate.wait_in_flight(2).await;

    gate.release(2);
    assert_eq!(finished(&controller, blocked).await.status, TaskStatus::Succeeded);
    assert_eq!(finished(&controller, other).await.status, TaskStatus::Succeeded);
}

/// With one worker, tasks of one agent reach the effect in submission order
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_fifo_within_agent() {
    let gate = GateEffector::open();
    let controller = controller(single_worker(AgentKind::ShellAssistant), Arc::clone(&gate));

    let ids: Vec<_> = ["pwd", "whoami", "date", "uptime", "hostname"]
        .iter()
        .map(|request| {
            controller
                .submit(AgentKind::ShellAssistant, TaskPayload::new(*request))
                .unwrap()
        })
        .collect();

    for id in &ids {
        assert_eq!(finished(&controller, *id).await.status, TaskStatus::Succeeded);
    }
    assert_eq!(gate.seen(), ids);
}

/// Emergency stop: nothing new starts, submissions are refused, running work
/// finishes, and resume drains the queue
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_emergency_stop_holds_dispatch() {
    let gate = GateEffector::closed();
    let controller = controller(single_worker(AgentKind::ShellAssistant), Arc::clone(&gate));

    let first = controller
        .submit(AgentKind::ShellAssistant, TaskPayload::new("pwd"))
        .unwrap();
    let queued: Vec<_> = (0..2)
        .map(|_| {
            controller
                .submit(AgentKind::ShellAssistant, TaskPayload::new("date"))
                .unwrap()
        })
        .collect();
    gate.wait_in_flight(1).await;

    assert!(controller.emergency_stop());
    assert!(!controller.emergency_stop());
    assert!(controller.is_stopped());

    // Refused, but still a task with a reason
    let refused = controller
        .submit(AgentKind::ShellAssistant, TaskPayload::new("pwd"))
        .unwrap();
    let task = controller.poll(refused).unwrap();
    assert_eq!(task.status, TaskStatus::Denied);
    assert!(task.reason().unwrap().contains("system_locked"));

    // The effect already under way completes
    gate.release(10);
    assert_eq!(finished(&controller, first).await.status, TaskStatus::Succeeded);

    tokio::time::sleep(Duration::from_millis(200)).await;
    for id in &queued {
        assert_eq!(controller.poll(*id).unwrap().status, TaskStatus::Pending);
    }
    assert_eq!(gate.seen().len(), 1);

    assert!(controller.resume());
    for id in &queued {
        assert_eq!(finished(&controller, *id).await.status, TaskStatus::Succeeded);
    }
    assert_eq!(controller.poll(refused).unwrap().status, TaskStatus::Denied);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cancel_pending_task_never_runs() {
    let gate = GateEffector::closed();
    let controller = controller(single_worker(AgentKind::ShellAssistant), Arc::clone(&gate));

    let running = controller
        .submit(AgentKind::ShellAssistant, TaskPayload::new("pwd"))
        .unwrap();
    let waiting = controller
        .submit(AgentKind::ShellAssistant, TaskPayload::new("date"))
        .unwrap();
    gate.wait_in_flight(1).await;

    assert_eq!(controller.cancel(waiting).unwrap(), CancelOutcome::Cancelled);
    assert_eq!(controller.cancel(waiting).unwrap(), CancelOutcome::AlreadyTerminal);

    gate.release(10);
    assert_eq!(finished(&controller, running).await.status, TaskStatus::Succeeded);
    tokio::time::sleep(Duration::from_millis(100)).await;

    let task = controller.poll(waiting).unwrap();
    assert_eq!(task.status, TaskStatus::Cancelled);
    assert_eq!(task.cancellation, Some(CancellationState::Honored));
    assert!(controller.effects_for(waiting).is_empty());
    assert_eq!(gate.seen(), vec![running]);
}

/// A cancel that arrives while the effect runs is recorded as too late
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cancel_during_effect_is_too_late() {
    let gate = GateEffector::closed();
    let controller = controller(config(), Arc::clone(&gate));

    let id = controller
        .submit(AgentKind::ShellAssistant, TaskPayload::new("pwd"))
        .unwrap();
    gate.wait_in_flight(1).await;

    assert_eq!(controller.cancel(id).unwrap(), CancelOutcome::Requested);
    gate.release(1);

    let task = finished(&controller, id).await;
    assert_eq!(task.status, TaskStatus::Succeeded);
    assert_eq!(task.cancellation, Some(CancellationState::TooLate));
    assert_eq!(controller.effects_for(id).len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_task_deadline_fails_with_timeout() {
    let mut config = config();
    config.task_timeout_secs = 1;
    let gate = GateEffector::closed();
    let controller = controller(config, Arc::clone(&gate));

    let id = controller
        .submit(AgentKind::ShellAssistant, TaskPayload::new("pwd"))
        .unwrap();

    let task = finished(&controller, id).await;
    assert_eq!(task.status, TaskStatus::Failed);
    assert!(matches!(task.error, Some(TaskFailure::Timeout { elapsed_ms }) if elapsed_ms >= 1000));

    let health = controller.agent_health(AgentKind::ShellAssistant).unwrap();
    assert_eq!(health.tasks_failed, 1);
    assert!(health.last_error.unwrap().contains("timed out"));
    gate.release(1);
}

/// A backend slower than the inference timeout falls back to the rules and
/// the task still succeeds
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_backend_timeout_falls_back_to_rules() {
    let gate = GateEffector::open();
    let controller = overseer::Controller::builder(config())
        .hardware(overseer::HardwareProfile::fallback())
        .effector(gate)
        .backend(
            AgentKind::ShellAssistant,
            Arc::new(SlowBackend {
                delay: Duration::from_secs(5),
            }),
        )
        .build()
        .unwrap();

    let id = controller
        .submit(AgentKind::ShellAssistant, TaskPayload::new("show disk space"))
        .unwrap();
    let task = finished(&controller, id).await;

    assert_eq!(task.status, TaskStatus::Succeeded);
    let output = task.result.unwrap();
    assert_eq!(output.action, "df -h");
    assert_eq!(
        output.provenance,
        Provenance::Fallback {
            cause: FallbackCause::Timeout
        }
    );

    let health = controller.agent_health(AgentKind::ShellAssistant).unwrap();
    assert_eq!(health.fallback_uses, 1);
    assert_eq!(health.inference_calls, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_backend_answer_is_used() {
    let gate = GateEffector::open();
    let controller = overseer::Controller::builder(config())
        .hardware(overseer::HardwareProfile::fallback())
        .effector(Arc::clone(&gate) as Arc<dyn overseer::agent::Effector>)
        .backend(
            AgentKind::ShellAssistant,
            Arc::new(ScriptedBackend {
                command: "ls -la /tmp",
            }),
        )
        .build()
        .unwrap();

    let id = controller
        .submit(AgentKind::ShellAssistant, TaskPayload::new("what is in tmp"))
        .unwrap();
    let task = finished(&controller, id).await;

    assert_eq!(task.status, TaskStatus::Succeeded);
    let output = task.result.unwrap();
    assert_eq!(output.action, "ls -la /tmp");
    assert_eq!(
        output.provenance,
        Provenance::Inference {
            model: "scripted".to_string()
        }
    );
    assert_eq!(controller.effects_for(id)[0].command, "ls -la /tmp");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_unroutable_request_fails_without_effect() {
    let gate = GateEffector::open();
    let controller = controller(config(), Arc::clone(&gate));

    let id = controller
        .submit(AgentKind::ShellAssistant, TaskPayload::new("tell me a joke please"))
        .unwrap();
    let task = finished(&controller, id).await;

    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.error, Some(TaskFailure::NoApplicableAction));
    assert!(controller.effects_for(id).is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_acknowledge_and_retention() {
    let mut config = config();
    config.retention_secs = 1;
    let gate = GateEffector::open();
    let controller = controller(config, Arc::clone(&gate));

    let acked = controller
        .submit(AgentKind::ShellAssistant, TaskPayload::new("pwd"))
        .unwrap();
    finished(&controller, acked).await;
    assert!(controller.acknowledge(acked).unwrap());
    assert!(matches!(controller.poll(acked), Err(ControllerError::UnknownTask(_))));

    let expiring = controller
        .submit(AgentKind::ShellAssistant, TaskPayload::new("pwd"))
        .unwrap();
    finished(&controller, expiring).await;

    let evicted = tokio::time::timeout(Duration::from_secs(5), async {
        while controller.poll(expiring).is_ok() {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await;
    assert!(evicted.is_ok(), "terminal task outlived its retention");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_routing_and_snapshot() {
    let gate = GateEffector::open();
    let controller = controller(config(), Arc::clone(&gate));

    let id = controller
        .submit_routed(TaskPayload::new("check memory usage on this system"))
        .await
        .unwrap();
    let task = finished(&controller, id).await;
    assert_eq!(task.agent_kind, AgentKind::System);
    assert_eq!(
        task.routing,
        Some(Provenance::Fallback {
            cause: FallbackCause::NoBackend
        })
    );
    assert_eq!(task.result.unwrap().action, "free -h");

    let snapshot = controller.snapshot();
    assert!(!snapshot.emergency_stop);
    assert!(snapshot.accepting);
    assert_eq!(snapshot.agents.len(), AgentKind::ALL.len());
    assert_eq!(snapshot.tasks.get(&TaskStatus::Succeeded), Some(&1));

    controller.shutdown().await;
    assert!(!controller.snapshot().accepting);
}

/// Controller whose shell assistant interprets through `backend`
fn gated_controller(backend: Arc<GatedBackend>, gate: Arc<GateEffector>) -> overseer::Controller {
    let mut config = config();
    config.inference_timeout_secs = 10;
    overseer::Controller::builder(config)
        .hardware(overseer::HardwareProfile::fallback())
        .effector(gate)
        .backend(AgentKind::ShellAssistant, backend)
        .build()
        .unwrap()
}

/// A stop engaged while the model is still thinking denies the action the
/// model comes back with
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_emergency_stop_during_interpretation_denies_action() {
    let backend = GatedBackend::new("ls -la");
    let gate = GateEffector::open();
    let controller = gated_controller(Arc::clone(&backend), Arc::clone(&gate));

    let id = controller
        .submit(AgentKind::ShellAssistant, TaskPayload::new("list files"))
        .unwrap();
    backend.wait_entered(1).await;

    assert!(controller.emergency_stop());
    backend.release(1);

    let task = finished(&controller, id).await;
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(
        task.error,
        Some(TaskFailure::ActionDenied {
            reason: "system_locked".to_string()
        })
    );
    assert!(controller.effects_for(id).is_empty());
    assert!(gate.seen().is_empty());

    let decisions = controller.decisions_for(id);
    assert_eq!(decisions.len(), 2);
    assert!(decisions[0].allowed);
    assert!(!decisions[1].allowed);
    assert_eq!(decisions[1].reason, "system_locked");
}

/// A cancel that lands during interpretation is honored at the next
/// checkpoint, before the concrete check
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cancel_during_interpretation_is_honored() {
    let backend = GatedBackend::new("ls -la");
    let gate = GateEffector::open();
    let controller = gated_controller(Arc::clone(&backend), Arc::clone(&gate));

    let id = controller
        .submit(AgentKind::ShellAssistant, TaskPayload::new("list files"))
        .unwrap();
    backend.wait_entered(1).await;

    assert_eq!(controller.cancel(id).unwrap(), CancelOutcome::Requested);
    backend.release(1);

    let task = finished(&controller, id).await;
    assert_eq!(task.status, TaskStatus::Cancelled);
    assert_eq!(task.cancellation, Some(CancellationState::Honored));
    assert!(controller.effects_for(id).is_empty());
    assert_eq!(controller.decisions_for(id).len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_router_pick_is_used_and_recorded() {
    let gate = GateEffector::open();
    let controller = overseer::Controller::builder(config())
        .hardware(overseer::HardwareProfile::fallback())
        .effector(gate)
        .router(Arc::new(ScriptedRouter {
            kind: AgentKind::ShellAssistant,
        }))
        .build()
        .unwrap();

    // Keywords alone would pick the system agent
    let id = controller
        .submit_routed(TaskPayload::new("check memory usage on this system"))
        .await
        .unwrap();
    let task = finished(&controller, id).await;
    assert_eq!(task.agent_kind, AgentKind::ShellAssistant);
    assert_eq!(
        task.routing,
        Some(Provenance::Inference {
            model: "scripted-router".to_string()
        })
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_router_failure_falls_back_to_keywords() {
    let gate = GateEffector::open();
    let controller = overseer::Controller::builder(config())
        .hardware(overseer::HardwareProfile::fallback())
        .effector(gate)
        .router(Arc::new(FailingRouter))
        .build()
        .unwrap();

    let (kind, routing) = controller.route("install docker please").await;
    assert_eq!(kind, AgentKind::SoftwareInstall);
    assert_eq!(
        routing,
        Provenance::Fallback {
            cause: FallbackCause::Unavailable
        }
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_router_pick_of_disabled_agent_falls_back() {
    let mut config = config();
    config.agents.insert(
        AgentKind::ActivityTracker,
        AgentSettings {
            enabled: false,
            ..AgentSettings::default()
        },
    );
    let gate = GateEffector::open();
    let controller = overseer::Controller::builder(config)
        .hardware(overseer::HardwareProfile::fallback())
        .effector(gate)
        .router(Arc::new(ScriptedRouter {
            kind: AgentKind::ActivityTracker,
        }))
        .build()
        .unwrap();

    let (kind, routing) = controller.route("check memory usage").await;
    assert_eq!(kind, AgentKind::System);
    assert_eq!(
        routing,
        Provenance::Fallback {
            cause: FallbackCause::Malformed
        }
    );
}

/// Each agent's own execution limit bounds its tasks, under the global cap
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_agent_execution_limit_applies() {
    let mut config = config();
    config.agents.insert(
        AgentKind::ShellAssistant,
        AgentSettings {
            max_execution_secs: Some(1),
            ..AgentSettings::default()
        },
    );
    let gate = GateEffector::closed();
    let controller = controller(config, Arc::clone(&gate));

    let limits: Vec<_> = controller
        .descriptors()
        .into_iter()
        .map(|d| (d.kind, d.max_execution_secs))
        .collect();
    assert!(limits.contains(&(AgentKind::ShellAssistant, 1)));
    assert!(limits.contains(&(AgentKind::SoftwareInstall, 10)));

    let id = controller
        .submit(AgentKind::ShellAssistant, TaskPayload::new("pwd"))
        .unwrap();
    let task = finished(&controller, id).await;
    assert!(matches!(task.error, Some(TaskFailure::Timeout { .. })));
    gate.release(1);
}
