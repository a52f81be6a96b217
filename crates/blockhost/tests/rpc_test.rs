// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Instance RPC dispatch tests for blockhost.

mod common;

use serde_json::json;

use blockhost::rpc::{InstanceMethod, InstanceRpc, RpcRequest};
use blockhost::sandbox::MockSandbox;
use common::TestContext;

#[tokio::test]
async fn test_start_restart_remove_through_rpc() {
    let ctx = TestContext::new().await;
    let instance = ctx.deployed_instance("weather", "1.0.0").await;
    let rpc = InstanceRpc::new(ctx.manager.clone());

    let response = rpc
        .dispatch(RpcRequest::instance(InstanceMethod::Start, instance.id))
        .await;
    assert!(response.is_ok(), "start failed: {response:?}");
    let first = ctx.manager.get_handle(instance.id).expect("no handle after start");

    let response = rpc
        .dispatch(RpcRequest::instance(InstanceMethod::Restart, instance.id))
        .await;
    assert!(response.is_ok(), "restart failed: {response:?}");
    let second = ctx.manager.get_handle(instance.id).expect("no handle after restart");
    assert_ne!(first, second);

    let response = rpc
        .dispatch(RpcRequest::instance(InstanceMethod::Remove, instance.id))
        .await;
    assert!(response.is_ok(), "remove failed: {response:?}");
    assert!(ctx.manager.get_handle(instance.id).is_none());
    assert!(ctx.manager.get_instance(instance.id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_domain_errors_carry_codes() {
    let ctx = TestContext::new().await;
    let rpc = InstanceRpc::new(ctx.manager.clone());

    let response = rpc
        .dispatch(RpcRequest::instance(InstanceMethod::Start, 404))
        .await;
    let error = response.error.expect("expected an error");
    assert_eq!(error.code, "INSTANCE_NOT_FOUND");
    assert_eq!(error.message, "Instance not found: 404");

    // Removing an unknown instance is still a success
    let response = rpc
        .dispatch(RpcRequest::instance(InstanceMethod::Remove, 404))
        .await;
    assert!(response.is_ok());
}

#[tokio::test]
async fn test_preflight_error_code() {
    let ctx = TestContext::new().await;
    let dir = ctx.version_dir("weather", "1.0.0");
    std::fs::create_dir_all(&dir).unwrap();
    ctx.associate_at("weather", "1.0.0", &dir).await;
    let instance = ctx.manager.create("weather", "1.0.0").await.unwrap();
    let rpc = InstanceRpc::new(ctx.manager.clone());

    let response = rpc
        .dispatch(RpcRequest::instance(InstanceMethod::Start, instance.id))
        .await;
    assert_eq!(
        response.error.map(|e| e.code).as_deref(),
        Some("VERSION_ENTRY_FILE_NOT_FOUND")
    );
}

#[tokio::test]
async fn test_sandbox_error_code() {
    let ctx = TestContext::with_sandbox(MockSandbox::new().failing_for("weather@1.0.0")).await;
    let instance = ctx.deployed_instance("weather", "1.0.0").await;
    let rpc = InstanceRpc::new(ctx.manager.clone());

    let response = rpc
        .dispatch(RpcRequest::instance(InstanceMethod::Restart, instance.id))
        .await;
    assert_eq!(
        response.error.map(|e| e.code).as_deref(),
        Some("SANDBOX_ERROR")
    );
}

#[tokio::test]
async fn test_unknown_method() {
    let ctx = TestContext::new().await;
    let rpc = InstanceRpc::new(ctx.manager.clone());

    let response = rpc
        .dispatch(RpcRequest {
            method: "instance.stop".to_string(),
            params: json!({ "instance_id": 1 }),
        })
        .await;
    let error = response.error.expect("expected an error");
    assert_eq!(error.code, "UNKNOWN_METHOD");
    assert!(error.message.contains("instance.stop"));
}

#[tokio::test]
async fn test_invalid_params() {
    let ctx = TestContext::new().await;
    let rpc = InstanceRpc::new(ctx.manager.clone());

    for params in [
        json!({}),
        json!({ "instance_id": "seven" }),
        json!(null),
        json!({ "id": 1 }),
    ] {
        let response = rpc
            .dispatch(RpcRequest {
                method: "instance.start".to_string(),
                params: params.clone(),
            })
            .await;
        assert_eq!(
            response.error.map(|e| e.code).as_deref(),
            Some("INVALID_PARAMS"),
            "params {params} should be rejected"
        );
    }
    assert_eq!(ctx.sandbox.run_count().await, 0);
}

#[tokio::test]
async fn test_dispatch_json() {
    let ctx = TestContext::new().await;
    let instance = ctx.deployed_instance("weather", "1.0.0").await;
    let rpc = InstanceRpc::new(ctx.manager.clone());

    let response = rpc
        .dispatch_json(json!({
            "method": "instance.start",
            "params": { "instance_id": instance.id }
        }))
        .await;
    assert!(response.is_ok());
    assert!(ctx.manager.get_handle(instance.id).is_some());

    let response = rpc.dispatch_json(json!({ "params": {} })).await;
    assert_eq!(
        response.error.map(|e| e.code).as_deref(),
        Some("INVALID_REQUEST")
    );
}
