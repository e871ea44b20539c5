//! Fabric runtime supervisor.
//!
//! Wires the components together (thread pool, security, recovery, preload,
//! balancer, one core kernel, four micro kernels, one orchestration
//! kernel), then runs the service loop: metrics refresh every 5 s, a
//! recovery checkpoint every 30 s, and a graceful stop on SIGINT/SIGTERM.
//!
//! Exit code 0 on graceful stop, 1 on fatal initialization error.

mod helpers;
mod security;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;

use fabric_balancer::{BalancingStrategy, EnergyController, LoadBalancer};
use fabric_core::platform::PlatformProfile;
use fabric_core::pool::ThreadPool;
use fabric_core::preload::{PreloadConfig, PreloadManager};
use fabric_core::recovery::{FsSink, RecoveryConfig, RecoveryManager};
use fabric_kernel::{CoreKernel, Kernel, MicroKernel, OrchestrationKernel};

use crate::security::SecurityManager;

const METRICS_INTERVAL: Duration = Duration::from_secs(5);
const CHECKPOINT_INTERVAL: Duration = Duration::from_secs(30);

struct Components {
    pool: ThreadPool,
    security: SecurityManager,
    recovery: RecoveryManager,
    preload: PreloadManager,
    #[allow(dead_code)]
    balancer: LoadBalancer,
    energy: EnergyController,
    kernels: Vec<Arc<dyn Kernel>>,
    orchestrator: Arc<OrchestrationKernel>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _log_guard = helpers::init_tracing("debug");
    tracing::info!("=== fabric runtime starting ===");

    let components = initialize_components().context("fatal initialization error")?;
    tracing::info!("all components initialized");

    run_service_loop(&components).await;
    shutdown(&components);

    tracing::info!("=== fabric runtime shutdown complete ===");
    Ok(())
}

fn initialize_components() -> anyhow::Result<Components> {
    let profile = PlatformProfile::detect();
    tracing::info!(platform = %profile.name, cores = profile.logical_cores, "host detected");

    let pool = ThreadPool::new(profile.pool_config()).context("thread pool")?;
    tracing::info!(
        workers = pool.metrics().total_threads,
        "thread pool initialized"
    );

    let security = SecurityManager::new();
    security.set_policy("production");

    let recovery = RecoveryManager::new(
        RecoveryConfig {
            max_recovery_points: 10,
            checkpoint_interval: CHECKPOINT_INTERVAL,
            ..RecoveryConfig::default()
        },
        Arc::new(FsSink::new("recovery_points").context("checkpoint storage")?),
    )
    .context("recovery manager")?;

    let preload = PreloadManager::new(PreloadConfig::default()).context("preload manager")?;
    preload.start();

    let balancer = LoadBalancer::new();
    balancer.set_strategy(BalancingStrategy::HybridAdaptive);
    balancer.set_resource_weights(0.3, 0.25, 0.25, 0.2);
    balancer.set_adaptive_thresholds(0.8, 0.7);
    tracing::info!("load balancer initialized with the hybrid adaptive strategy");

    let energy = EnergyController::new(100.0);
    energy.set_policy("balanced");

    let mut kernels: Vec<Arc<dyn Kernel>> = Vec::new();

    let core = CoreKernel::new("core-main");
    core.set_preload_manager(preload.clone());
    core.set_load_balancer(balancer.clone());
    if !core.initialize() {
        anyhow::bail!("core kernel failed to initialize");
    }
    kernels.push(Arc::new(core));

    for index in 0..4 {
        let micro = MicroKernel::new(format!("micro-{index}"));
        micro.set_preload_manager(preload.clone());
        micro.set_load_balancer(balancer.clone());
        if !micro.initialize() {
            anyhow::bail!("micro kernel {index} failed to initialize");
        }
        kernels.push(Arc::new(micro));
    }
    tracing::info!("4 micro kernels initialized");

    let orchestrator = Arc::new(OrchestrationKernel::new("orchestrator"));
    orchestrator.set_load_balancer(balancer.clone());
    if !orchestrator.initialize() {
        anyhow::bail!("orchestration kernel failed to initialize");
    }
    kernels.push(orchestrator.clone());

    // Checkpoint the fleet's metric snapshots; restoring simply replays the
    // snapshot into the log for operators.
    let capture_kernels = kernels.clone();
    recovery.set_state_capture(Arc::new(move || {
        let snapshot: BTreeMap<String, fabric_core::task::ExtendedKernelMetrics> = capture_kernels
            .iter()
            .map(|k| (k.id(), k.extended_metrics()))
            .collect();
        serde_json::to_vec(&snapshot).unwrap_or_default()
    }));
    recovery.set_state_restore(Arc::new(|bytes: &[u8]| {
        match serde_json::from_slice::<BTreeMap<String, fabric_core::task::ExtendedKernelMetrics>>(
            bytes,
        ) {
            Ok(snapshot) => {
                tracing::info!(kernels = snapshot.len(), "fleet snapshot restored");
                true
            }
            Err(err) => {
                tracing::error!(error = %err, "fleet snapshot is not decodable");
                false
            }
        }
    }));
    recovery.set_error_callback(Arc::new(|message: &str| {
        tracing::error!(target: "recovery", "{message}");
    }));

    security.audit_event("startup", "all components initialized");

    Ok(Components {
        pool,
        security,
        recovery,
        preload,
        balancer,
        energy,
        kernels,
        orchestrator,
    })
}

async fn run_service_loop(components: &Components) {
    tracing::info!("service loop started");

    let mut metrics_tick = tokio::time::interval(METRICS_INTERVAL);
    let mut checkpoint_tick = tokio::time::interval(CHECKPOINT_INTERVAL);
    // Consume the immediate first tick of each interval.
    metrics_tick.tick().await;
    checkpoint_tick.tick().await;

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = metrics_tick.tick() => refresh_metrics(components),
            _ = checkpoint_tick.tick() => {
                let id = components.recovery.create_recovery_point();
                if !id.is_empty() {
                    tracing::info!(checkpoint = %id, "recovery checkpoint created");
                }
            }
        }
    }

    tracing::info!("service loop stopped");
}

fn refresh_metrics(components: &Components) {
    for kernel in &components.kernels {
        kernel.update_metrics();
    }

    // The fleet's peak draw feeds the energy budget tracker.
    let peak_power = components
        .kernels
        .iter()
        .map(|k| k.metrics().power_consumption)
        .fold(0.0, f64::max);
    components.energy.record_power(peak_power);

    let pool = components.pool.metrics();
    let preload = components.preload.metrics();
    tracing::debug!(
        pool_active = pool.active_threads,
        pool_queue = pool.queue_size,
        preload_queue = preload.queue_size,
        preload_accuracy = preload.prediction_accuracy,
        backlog = components.orchestrator.backlog_len(),
        energy_utilization = components.energy.utilization(),
        "metrics refreshed"
    );
}

/// Resolves when the process receives SIGINT or SIGTERM.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = match signal(SignalKind::terminate()) {
            Ok(term) => term,
            Err(err) => {
                tracing::error!(error = %err, "cannot install SIGTERM handler");
                return std::future::pending().await;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => tracing::info!("received SIGINT, shutting down"),
            _ = term.recv() => tracing::info!("received SIGTERM, shutting down"),
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("received ctrl-c, shutting down");
    }
}

fn shutdown(components: &Components) {
    tracing::info!("initiating graceful shutdown");
    components.security.audit_event("shutdown", "graceful stop requested");

    let final_checkpoint = components.recovery.create_recovery_point();
    if !final_checkpoint.is_empty() {
        tracing::info!(checkpoint = %final_checkpoint, "final recovery checkpoint created");
    }

    for kernel in &components.kernels {
        kernel.shutdown();
    }
    components.preload.stop();
    components.pool.stop();

    tracing::info!("all components shut down");
}
