// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Kubernetes back-end against the in-memory orchestrator.

mod common;

use common::{ENGINE, Harness, request};
use host_provider_core::Error;
use serde_json::{Map, json};

const NAMESPACE: &str = "databases";

async fn harness() -> Harness {
    Harness::new()
        .with_credential(
            "k8s",
            json!({
                "endpoint": "https://k8s.example.com",
                "token": "secret",
                "namespace": NAMESPACE,
                "templates": {"mongodb_4_2_3": "mongo:4.2.3"},
                "configuration_files": {"mongodb_4_2_3": "storage:\n  engine: wiredTiger\n"}
            }),
        )
        .await
}

#[tokio::test]
async fn test_create_unzoned_stateful_set() {
    let h = harness().await;
    h.workload.pods_pending_for(2).await;

    let host = h
        .service
        .create_host(request("k8s", "cache-0", "infra-9"))
        .await
        .expect("Failed to create host");

    assert_eq!(host.zone, None);
    assert_eq!(host.identifier, "cache-0");
    assert_eq!(host.address, "cache-0");
    assert_eq!(host.engine, ENGINE);

    let spec = h.workload.spec(NAMESPACE, "cache-0").await.unwrap();
    assert_eq!(spec.image, "mongo:4.2.3");
    assert_eq!((spec.cpu, spec.memory), (2, 2048));
    assert!(spec.configuration_file.unwrap().contains("wiredTiger"));
    assert_eq!(spec.labels.get("origin").map(String::as_str), Some("dbaas"));
}

#[tokio::test]
async fn test_readiness_timeout_keeps_stateful_set() {
    let h = harness().await;
    h.workload.pods_pending_for(100).await;

    let err = h
        .service
        .create_host(request("k8s", "cache-0", "infra-9"))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        Error::ReadinessTimeout { ref name, zone: None, .. } if name == "cache-0"
    ));
    assert!(h.workload.stateful_set(NAMESPACE, "cache-0").await.is_some());
}

#[tokio::test]
async fn test_stop_and_start_scale_replicas() {
    let h = harness().await;
    let host = h
        .service
        .create_host(request("k8s", "cache-0", "infra-9"))
        .await
        .unwrap();
    let id = host.id.unwrap();

    h.service.stop_host(id).await.expect("Failed to stop");
    let set = h.workload.stateful_set(NAMESPACE, "cache-0").await.unwrap();
    assert_eq!(set.replicas, 0);

    h.service.start_host(id).await.expect("Failed to start");
    let set = h.workload.stateful_set(NAMESPACE, "cache-0").await.unwrap();
    assert_eq!(set.replicas, 1);
}

#[tokio::test]
async fn test_resize_patches_resources() {
    let h = harness().await;
    let host = h
        .service
        .create_host(request("k8s", "cache-0", "infra-9"))
        .await
        .unwrap();

    h.service.resize_host(host.id.unwrap(), 4, 8192).await.unwrap();

    let spec = h.workload.spec(NAMESPACE, "cache-0").await.unwrap();
    assert_eq!((spec.cpu, spec.memory), (4, 8192));
}

#[tokio::test]
async fn test_restore_recreates_stateful_set() {
    let h = harness().await;
    let host = h
        .service
        .create_host(request("k8s", "cache-0", "infra-9"))
        .await
        .unwrap();

    let restored = h
        .service
        .restore_host(host.id.unwrap(), None, &Map::new())
        .await
        .expect("Failed to restore");

    assert_eq!(restored.identifier, "cache-0");
    assert!(!restored.recreating);
    assert!(h.workload.stateful_set(NAMESPACE, "cache-0").await.is_some());
}

#[tokio::test]
async fn test_destroy_removes_stateful_set() {
    let h = harness().await;
    let host = h
        .service
        .create_host(request("k8s", "cache-0", "infra-9"))
        .await
        .unwrap();

    h.service.destroy_host(host.id.unwrap()).await.unwrap();

    assert!(h.workload.stateful_set(NAMESPACE, "cache-0").await.is_none());
    assert_eq!(h.workload.connects().await, 2);
}

#[tokio::test]
async fn test_static_ip_unsupported() {
    let h = harness().await;

    let err = h
        .service
        .create_static_ip("k8s", common::ENVIRONMENT, "infra-9", "cache-0")
        .await
        .unwrap_err();

    assert_eq!(err.error_code(), "UNSUPPORTED");
}
