// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Reconciler tests for blockhost.

mod common;

use std::collections::HashMap;
use std::time::Duration;

use blockhost::reconciler::{Reconciler, ReconcilerConfig};
use blockhost::sandbox::{MockSandbox, ScriptEvent};
use common::TestContext;

fn reconciler(ctx: &TestContext, interval: Duration) -> Reconciler {
    Reconciler::new(ctx.manager.clone(), ReconcilerConfig { interval })
}

#[test]
fn test_config_default() {
    let config = ReconcilerConfig::default();
    assert_eq!(config.interval, Duration::from_secs(30));
}

#[tokio::test]
async fn test_reconcile_five_then_six() {
    let ctx = TestContext::new().await;
    let mut ids = Vec::new();
    for _ in 0..5 {
        ids.push(ctx.deployed_instance("weather", "1.0.0").await.id);
    }
    assert!(ctx.manager.list_all_instance_ids().is_empty());

    let reconciler = reconciler(&ctx, Duration::from_secs(60));

    let report = reconciler.reconcile_once().await.unwrap();
    assert_eq!(report.persisted, 5);
    assert_eq!(report.live, 0);
    assert_eq!(report.started.len(), 5);
    assert!(report.failed.is_empty());
    assert_eq!(ctx.manager.list_all_instance_ids(), ids);

    let first_handles: HashMap<_, _> = ids
        .iter()
        .map(|&id| (id, ctx.manager.get_handle(id).unwrap()))
        .collect();

    let sixth = ctx.deployed_instance("weather", "1.0.0").await;
    let report = reconciler.reconcile_once().await.unwrap();
    assert_eq!(report.persisted, 6);
    assert_eq!(report.live, 5);
    assert_eq!(report.started, vec![sixth.id]);
    assert_eq!(ctx.manager.list_all_instance_ids().len(), 6);

    // The original five were not restarted
    assert_eq!(ctx.sandbox.run_count().await, 6);
    assert!(ctx.sandbox.removed_handles().await.is_empty());
    for (id, handle) in first_handles {
        assert_eq!(ctx.manager.get_handle(id), Some(handle));
    }
}

#[tokio::test]
async fn test_reconcile_noop_when_converged() {
    let ctx = TestContext::new().await;
    let instance = ctx.deployed_instance("weather", "1.0.0").await;
    ctx.manager.start(instance.id).await.unwrap();

    let report = reconciler(&ctx, Duration::from_secs(60))
        .reconcile_once()
        .await
        .unwrap();

    assert!(report.is_noop());
    assert_eq!(report.persisted, 1);
    assert_eq!(report.live, 1);
    assert_eq!(ctx.sandbox.run_count().await, 1);
}

#[tokio::test]
async fn test_reconcile_isolates_failures() {
    let ctx = TestContext::with_sandbox(MockSandbox::new().failing_for("broken@1.0.0")).await;
    let good = ctx.deployed_instance("weather", "1.0.0").await;
    let broken = ctx.deployed_instance("broken", "1.0.0").await;

    // Version whose folder was never written
    let missing_dir = ctx.version_dir("gone", "1.0.0");
    ctx.associate_at("gone", "1.0.0", &missing_dir).await;
    let gone = ctx.manager.create("gone", "1.0.0").await.unwrap();

    let report = reconciler(&ctx, Duration::from_secs(60))
        .reconcile_once()
        .await
        .unwrap();

    assert_eq!(report.started, vec![good.id]);
    let failed: Vec<_> = report.failed.iter().map(|(id, _)| *id).collect();
    assert_eq!(failed, vec![broken.id, gone.id]);
    assert!(report.failed[1].1.contains("Version folder not found"));

    assert_eq!(ctx.manager.list_all_instance_ids(), vec![good.id]);
}

#[tokio::test]
async fn test_reconcile_restarts_exited_instance() {
    let ctx = TestContext::new().await;
    let instance = ctx.deployed_instance("weather", "1.0.0").await;
    let reconciler = reconciler(&ctx, Duration::from_secs(60));

    reconciler.reconcile_once().await.unwrap();
    let first = ctx.manager.get_handle(instance.id).unwrap();

    ctx.sandbox.simulate_exit(&first, Some(1)).await;
    ctx.manager
        .handle_runtime_event(&ScriptEvent::Exited {
            handle: first.clone(),
            exit_code: Some(1),
        })
        .await;
    assert!(ctx.manager.get_handle(instance.id).is_none());

    let report = reconciler.reconcile_once().await.unwrap();
    assert_eq!(report.started, vec![instance.id]);
    let second = ctx.manager.get_handle(instance.id).unwrap();
    assert_ne!(first, second);
}

#[tokio::test]
async fn test_reconcile_retries_script_exiting_during_startup() {
    let ctx = TestContext::with_sandbox(MockSandbox::new().crashing_for("broken@1.0.0")).await;
    let good = ctx.deployed_instance("weather", "1.0.0").await;
    let broken = ctx.deployed_instance("broken", "1.0.0").await;
    let reconciler = reconciler(&ctx, Duration::from_secs(60));

    let shutdown = std::sync::Arc::new(tokio::sync::Notify::new());
    let watcher = ctx.manager.watch_runtime_events(shutdown.clone());

    for pass in 1..=2 {
        let report = reconciler.reconcile_once().await.unwrap();
        let failed: Vec<_> = report.failed.iter().map(|(id, _)| *id).collect();
        assert_eq!(failed, vec![broken.id], "pass {pass}");
        assert_eq!(report.live, pass - 1, "pass {pass}");
    }

    // The dead instance is attempted on every pass, the healthy one once
    assert_eq!(ctx.sandbox.run_count().await, 3);
    assert_eq!(ctx.manager.list_all_instance_ids(), vec![good.id]);

    shutdown.notify_one();
    watcher.await.unwrap();
}

#[tokio::test]
async fn test_live_handle_without_row_is_left_alone() {
    let ctx = TestContext::new().await;
    let instance = ctx.deployed_instance("weather", "1.0.0").await;
    let reconciler = reconciler(&ctx, Duration::from_secs(60));
    reconciler.reconcile_once().await.unwrap();

    // Delete the row behind the manager's back
    sqlx::query("DELETE FROM block_instance WHERE id = ?")
        .bind(instance.id)
        .execute(&ctx.pool)
        .await
        .unwrap();

    let report = reconciler.reconcile_once().await.unwrap();
    assert_eq!(report.persisted, 0);
    assert!(report.is_noop());
    assert_eq!(ctx.manager.list_all_instance_ids(), vec![instance.id]);
    assert!(ctx.sandbox.removed_handles().await.is_empty());
}

#[tokio::test]
async fn test_run_reconciles_immediately_and_stops_on_shutdown() {
    let ctx = TestContext::new().await;
    let instance = ctx.deployed_instance("weather", "1.0.0").await;

    let reconciler = reconciler(&ctx, Duration::from_secs(3600));
    let shutdown = reconciler.shutdown_handle();
    let task = tokio::spawn(async move { reconciler.run().await });

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while ctx.manager.get_handle(instance.id).is_none() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "initial pass did not start the instance"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    shutdown.notify_one();
    tokio::time::timeout(Duration::from_secs(2), task)
        .await
        .expect("reconciler did not stop")
        .unwrap();
}

#[tokio::test]
async fn test_run_picks_up_new_instances_on_interval() {
    let ctx = TestContext::new().await;

    let reconciler = reconciler(&ctx, Duration::from_millis(20));
    let shutdown = reconciler.shutdown_handle();
    let task = tokio::spawn(async move { reconciler.run().await });

    let instance = ctx.deployed_instance("weather", "1.0.0").await;

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while ctx.manager.get_handle(instance.id).is_none() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "periodic pass did not start the instance"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    shutdown.notify_one();
    task.await.unwrap();
    assert_eq!(ctx.sandbox.run_count().await, 1);
}
