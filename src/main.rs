//! Overseer CLI
//!
//! Usage:
//!   overseer profile                       - Hardware profile and backend table
//!   overseer check <agent> <cap> <action>  - One permission decision
//!   overseer run [--agent A] <request...>  - Submit a task and wait for it

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::json;

use overseer::agent::AgentDescriptor;
use overseer::hardware::{self, recommended_models, SystemProbe};
use overseer::security::{CheckPhase, Lockdown, PermissionRequest};
use overseer::{
    metrics, telemetry, AgentKind, Capability, Controller, OverseerConfig, PermissionRegistry,
    TaskPayload, TaskStatus,
};

#[derive(Parser)]
#[command(name = "overseer")]
#[command(version)]
#[command(about = "Permission-gated multi-agent task controller", long_about = None)]
struct Cli {
    /// Configuration file (default: $OVERSEER_CONFIG, else built-in defaults)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    /// Export traces to this OTLP gRPC endpoint
    #[arg(long, global = true)]
    otlp_endpoint: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the hardware profile and the backend chosen for each agent
    Profile,

    /// Evaluate one permission decision without running anything
    Check {
        /// Agent kind, e.g. file_management
        agent: String,
        /// Capability, e.g. file_write
        capability: String,
        /// Action text to check
        #[arg(required = true, trailing_var_arg = true)]
        action: Vec<String>,
    },

    /// Submit a request and wait for the task to finish
    Run {
        /// Agent kind; routed by keywords when omitted
        #[arg(long)]
        agent: Option<String>,
        /// Declared capability; inferred from the request when omitted
        #[arg(long)]
        capability: Option<String>,
        /// Print Prometheus metrics after the task finishes
        #[arg(long)]
        metrics: bool,
        /// Free-form request
        #[arg(required = true, trailing_var_arg = true)]
        request: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = OverseerConfig::load(cli.config.as_deref()).context("loading configuration")?;
    if cli.json_logs {
        config.telemetry.json = true;
    }
    if let Some(endpoint) = cli.otlp_endpoint {
        config.telemetry.otlp_endpoint = Some(endpoint);
    }
    telemetry::init_tracing(&config.telemetry)
        .map_err(|e| anyhow::anyhow!("failed to initialise tracing: {}", e))?;

    // Exit code: 0 ok, 1 task did not succeed, 2 permission denied
    let result = match cli.command {
        Commands::Profile => profile(&config),
        Commands::Check {
            agent,
            capability,
            action,
        } => check(&config, &agent, &capability, &action.join(" ")),
        Commands::Run {
            agent,
            capability,
            metrics,
            request,
        } => run(config, agent, capability, metrics, request.join(" ")).await,
    };

    telemetry::shutdown_tracing();
    match result? {
        0 => Ok(()),
        code => std::process::exit(code),
    }
}

fn profile(config: &OverseerConfig) -> anyhow::Result<i32> {
    let profile = hardware::profile(&SystemProbe::new());

    let agents: Vec<_> = config
        .enabled_agents()
        .into_iter()
        .map(|kind| AgentDescriptor::configure(kind, config, &profile))
        .map(|d| {
            json!({
                "agent": d.kind,
                "max_concurrent_tasks": d.max_concurrent_tasks,
                "backend": d.assigned_backend,
            })
        })
        .collect();

    let report = json!({
        "hardware": profile,
        "inference_enabled": config.inference.enabled,
        "recommended_models": recommended_models(profile.tier),
        "agents": agents,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(0)
}

fn check(config: &OverseerConfig, agent: &str, capability: &str, action: &str) -> anyhow::Result<i32> {
    let agent: AgentKind = agent.parse()?;
    let capability: Capability = capability.parse()?;

    // Permission scope does not depend on hardware
    let descriptors: Vec<_> = config
        .enabled_agents()
        .into_iter()
        .map(|kind| AgentDescriptor::configure(kind, config, &hardware::HardwareProfile::fallback()))
        .collect();
    let registry = PermissionRegistry::new(&descriptors, Arc::new(Lockdown::new()), 1);

    let decision = registry.check(PermissionRequest {
        task_id: None,
        agent,
        capability,
        action_text: action,
        cwd: None,
        phase: CheckPhase::Operator,
    });
    println!("{}", serde_json::to_string_pretty(&decision)?);

    Ok(if decision.allowed { 0 } else { 2 })
}

async fn run(
    config: OverseerConfig,
    agent: Option<String>,
    capability: Option<String>,
    print_metrics: bool,
    request: String,
) -> anyhow::Result<i32> {
    let mut payload = TaskPayload::new(request);
    if let Some(capability) = capability {
        payload = payload.with_capability(capability.parse()?);
    }
    if let Ok(cwd) = std::env::current_dir() {
        payload = payload.with_context(json!({ "cwd": cwd.display().to_string() }));
    }

    let controller = Arc::new(Controller::builder(config).build()?);

    let stopper = Arc::clone(&controller);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("[OVERSEER] Ctrl-C received, engaging emergency stop");
            stopper.emergency_stop();
        }
    });

    let id = match agent {
        Some(agent) => controller.submit_named(&agent, payload)?,
        None => controller.submit_routed(payload).await?,
    };
    let submitted = controller.poll(id)?;
    eprintln!("[OVERSEER] Task {} submitted to {}", id, submitted.agent_kind);

    let wait_for = controller
        .descriptors()
        .iter()
        .find(|d| d.kind == submitted.agent_kind)
        .map(|d| d.task_timeout())
        .unwrap_or_else(|| controller.config().task_timeout())
        + Duration::from_secs(5);

    let task = controller.wait(id, wait_for).await?;
    let report = json!({
        "task": task,
        "decisions": controller.decisions_for(id),
        "effects": controller.effects_for(id),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);

    if print_metrics {
        println!("{}", metrics::gather_text());
    }

    controller.shutdown().await;

    Ok(if task.status == TaskStatus::Succeeded { 0 } else { 1 })
}
