//! End-to-end wiring tests: preloader -> kernels -> orchestrator ->
//! balancer -> workers.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use fabric_balancer::{BalancingStrategy, LoadBalancer, TaskTarget};
use fabric_core::preload::{PreloadConfig, PreloadManager};
use fabric_core::recovery::{RecoveryConfig, RecoveryManager};
use fabric_kernel::{
    CoreKernel, EventPayload, Kernel, MicroKernel, OrchestrationKernel,
};

fn micro_fleet(count: usize) -> Vec<Arc<dyn Kernel>> {
    (0..count)
        .map(|i| {
            let kernel = MicroKernel::new(format!("fleet-{i}"));
            assert!(kernel.initialize());
            Arc::new(kernel) as Arc<dyn Kernel>
        })
        .collect()
}

#[test]
fn warmup_flows_from_preloader_into_kernel_cache() {
    let preload = PreloadManager::new(PreloadConfig::default()).expect("preload builds");
    preload.preload_data("alpha", b"alpha".to_vec());
    preload.preload_data("beta", b"beta".to_vec());

    let kernel = CoreKernel::new("warm-core");
    kernel.set_preload_manager(preload.clone());
    assert!(kernel.initialize());

    let cache = kernel.runtime().cache().expect("cache while running");
    assert_eq!(cache.get(&"alpha".to_string()), Some(b"alpha".to_vec()));
    assert_eq!(cache.get(&"beta".to_string()), Some(b"beta".to_vec()));

    kernel.shutdown();
    preload.stop();
}

#[test]
fn orchestrated_tasks_reach_worker_execution() {
    let balancer = LoadBalancer::new();
    let orchestrator = OrchestrationKernel::new("pipeline-orch");
    orchestrator.set_load_balancer(balancer.clone());
    assert!(orchestrator.initialize());

    let kernels = micro_fleet(3);

    // Watch task_processed on every kernel.
    let processed = Arc::new(Mutex::new(0usize));
    for kernel in &kernels {
        let sink = Arc::clone(&processed);
        kernel.set_event_callback(
            "task_processed",
            Arc::new(move |_: &str, _: &EventPayload| {
                *sink.lock() += 1;
            }),
        );
    }

    for i in 0..9 {
        orchestrator.enqueue_task(vec![i as u8], (i % 11) as i32);
    }
    orchestrator.orchestrate(&kernels);
    assert_eq!(orchestrator.backlog_len(), 0);

    // Workers pick the jobs up asynchronously.
    let deadline = std::time::Instant::now() + Duration::from_secs(3);
    while *processed.lock() < 9 && std::time::Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(20));
    }
    assert_eq!(*processed.lock(), 9, "every dispatched task must execute");

    for kernel in &kernels {
        kernel.shutdown();
    }
    orchestrator.shutdown();
}

#[test]
fn strategy_switch_is_visible_through_the_orchestrator() {
    let balancer = LoadBalancer::new();
    balancer.set_strategy(BalancingStrategy::ResourceAware);

    let orchestrator = OrchestrationKernel::new("switch-orch");
    orchestrator.set_load_balancer(balancer.clone());
    assert!(orchestrator.initialize());

    // Hand-built pressure snapshot: every kernel above the 0.9 cpu bar.
    let kernels = micro_fleet(2);
    let metrics: Vec<_> = kernels
        .iter()
        .map(|k| {
            let mut m: fabric_core::task::KernelMetrics = k.extended_metrics().into();
            m.cpu_usage = 0.95;
            m
        })
        .collect();
    balancer.balance(
        &kernels,
        vec![fabric_core::task::TaskDescriptor::new(vec![1])],
        &metrics,
    );
    assert_eq!(balancer.strategy_name(), "workload_specific");

    for kernel in &kernels {
        kernel.shutdown();
    }
    orchestrator.shutdown();
}

#[test]
fn kernel_state_survives_a_recovery_roundtrip() {
    // The supervisor pattern: capture a blob, restore it after a restart.
    let recovery = RecoveryManager::in_memory(RecoveryConfig::default()).expect("manager builds");
    recovery.set_state_capture(Arc::new(|| b"fabric-state".to_vec()));

    let restored = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&restored);
    recovery.set_state_restore(Arc::new(move |bytes: &[u8]| {
        *sink.lock() = bytes.to_vec();
        true
    }));

    let id = recovery.create_recovery_point();
    assert!(!id.is_empty());
    assert!(recovery.restore_from_point(&id));
    assert_eq!(*restored.lock(), b"fabric-state".to_vec());
    assert_eq!(recovery.metrics().successful_recoveries, 1);
}

#[test]
fn shutdown_is_idempotent_across_the_tree() {
    let parent = fabric_kernel::ParentKernel::new("tree-parent");
    assert!(parent.initialize());

    let child = Arc::new(MicroKernel::new("tree-child"));
    assert!(child.initialize());
    parent
        .add_child(child.clone() as Arc<dyn Kernel>)
        .expect("child attaches");

    parent.shutdown();
    parent.shutdown();
    assert!(!parent.is_running());
    assert!(!child.is_running());

    // Post-shutdown scheduling performs no work.
    child.schedule_task(Box::new(|| panic!("must never run")), 9);
    std::thread::sleep(Duration::from_millis(50));
}
