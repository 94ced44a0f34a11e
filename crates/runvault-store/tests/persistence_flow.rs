// ABOUTME: End-to-end tests for the persistence service: save, load, retention, and recovery.
// ABOUTME: Exercises the full pipeline over a real SQLite file with the in-process cache.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use runvault_core::{
    OperationType, RecoveryRequest, RecoveryType, SaveRequest, StateShapeValidator,
    TransactionStatus,
};
use runvault_store::{
    CacheBackend, CacheError, Db, MemoryCache, PersistenceService, VaultConfig,
};
use serde_json::{Value, json};
use tempfile::TempDir;

fn make_service(dir: &TempDir) -> PersistenceService {
    PersistenceService::open(&dir.path().join("vault.db"), VaultConfig::default()).unwrap()
}

#[tokio::test]
async fn save_load_scenario() {
    let dir = TempDir::new().unwrap();
    let service = make_service(&dir);

    let snapshot_id = service
        .save(SaveRequest::new("r1", "t1", "u1", json!({"x": 1})))
        .await
        .unwrap()
        .expect("save should succeed");

    assert_eq!(service.load("r1", None).await, Some(json!({"x": 1})));
    assert_eq!(
        service.load("r1", Some(snapshot_id)).await,
        Some(json!({"x": 1}))
    );

    // Exactly one snapshot and one matching creation transaction.
    let snapshots = service.snapshots().list("r1", 0, 10).await.unwrap();
    assert_eq!(snapshots.len(), 1);
    assert_eq!(snapshots[0].snapshot_id, snapshot_id);

    let records = service.transactions().list("r1", 0, 10).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].snapshot_id, Some(snapshot_id));
    assert_eq!(records[0].status, TransactionStatus::Committed);
}

#[tokio::test]
async fn load_unknown_run_is_none() {
    let dir = TempDir::new().unwrap();
    let service = make_service(&dir);

    assert_eq!(service.load("no-such-run", None).await, None);
}

#[tokio::test]
async fn timestamp_round_trip_is_canonical() {
    let dir = TempDir::new().unwrap();
    let service = make_service(&dir);

    service
        .save(SaveRequest::new(
            "r1",
            "t1",
            "u1",
            json!({
                "ts": "2025-01-01T00:00:00Z",
                "name": "run-1",
                "steps": [1, 2, 3],
                "nested": {"flag": true},
            }),
        ))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(
        service.load("r1", None).await,
        Some(json!({
            "ts": "2025-01-01T00:00:00+00:00",
            "name": "run-1",
            "steps": [1, 2, 3],
            "nested": {"flag": true},
        }))
    );
}

#[tokio::test]
async fn large_payload_round_trips_compressed() {
    let dir = TempDir::new().unwrap();
    let service = make_service(&dir);

    let state = json!({"transcript": "word ".repeat(1000)});
    let snapshot_id = service
        .save(SaveRequest::new("r1", "t1", "u1", state.clone()))
        .await
        .unwrap()
        .unwrap();

    let snapshot = service
        .snapshots()
        .get("r1", Some(snapshot_id))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        snapshot.serialization_format,
        runvault_core::SerializationFormat::CompressedJson
    );
    assert_eq!(service.load("r1", Some(snapshot_id)).await, Some(state));
}

#[tokio::test]
async fn retention_caps_snapshots_at_fifty() {
    let dir = TempDir::new().unwrap();
    let service = make_service(&dir);

    let mut ids = Vec::new();
    for i in 0..51 {
        let id = service
            .save(SaveRequest::new("r1", "t1", "u1", json!({"step": i})))
            .await
            .unwrap()
            .unwrap();
        ids.push(id);
    }

    let snapshots = service.snapshots().list("r1", 0, 100).await.unwrap();
    assert_eq!(snapshots.len(), 50);

    // The oldest snapshot is gone, along with its creation transaction.
    assert!(
        service
            .snapshots()
            .get("r1", Some(ids[0]))
            .await
            .unwrap()
            .is_none()
    );
    let records = service.transactions().list("r1", 0, 100).await.unwrap();
    assert_eq!(records.len(), 50);
    assert!(records.iter().all(|r| r.snapshot_id != Some(ids[0])));

    // Enforcement with nothing beyond the limit is a no-op.
    let evicted = service.snapshots().enforce_retention("r1").await.unwrap();
    assert_eq!(evicted, 0);
    assert_eq!(service.snapshots().list("r1", 0, 100).await.unwrap().len(), 50);
}

#[tokio::test]
async fn invalid_payload_leaves_no_rows() {
    let dir = TempDir::new().unwrap();
    let service = make_service(&dir);

    let result = service
        .save(SaveRequest::new("r1", "t1", "u1", json!([1, 2, 3])))
        .await;
    assert!(result.is_err());

    assert!(service.snapshots().list("r1", 0, 10).await.unwrap().is_empty());
    assert!(service.transactions().list("r1", 0, 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn recovery_matrix() {
    let dir = TempDir::new().unwrap();
    let service = make_service(&dir);

    // Restart succeeds whether or not any snapshot exists.
    assert!(
        service
            .recover(&RecoveryRequest::new("r1", RecoveryType::Restart))
            .await
            .is_some()
    );

    // Resume with nothing saved fails.
    assert!(
        service
            .recover(&RecoveryRequest::new("r1", RecoveryType::Resume))
            .await
            .is_none()
    );

    // After a save, resume succeeds and rollback works against a real id.
    let snapshot_id = service
        .save(SaveRequest::new("r1", "t1", "u1", json!({"x": 1})))
        .await
        .unwrap()
        .unwrap();
    assert!(
        service
            .recover(&RecoveryRequest::new("r1", RecoveryType::Resume))
            .await
            .is_some()
    );
    assert!(
        service
            .recover(
                &RecoveryRequest::new("r1", RecoveryType::Rollback).with_target(snapshot_id)
            )
            .await
            .is_some()
    );

    // Rollback with a bogus target or no target at all fails.
    assert!(
        service
            .recover(
                &RecoveryRequest::new("r1", RecoveryType::Rollback)
                    .with_target(ulid::Ulid::new())
            )
            .await
            .is_none()
    );
    assert!(
        service
            .recover(&RecoveryRequest::new("r1", RecoveryType::Rollback))
            .await
            .is_none()
    );

    // Every attempt left a terminal recovery record.
    let recovery_records: Vec<_> = service
        .transactions()
        .list("r1", 0, 20)
        .await
        .unwrap()
        .into_iter()
        .filter(|record| record.operation_type == OperationType::Recovery)
        .collect();
    assert_eq!(recovery_records.len(), 6);
    assert!(recovery_records.iter().all(|r| r.status.is_terminal()));
}

#[tokio::test]
async fn unsupported_recovery_type_is_rejected_at_the_boundary() {
    let dir = TempDir::new().unwrap();
    let service = make_service(&dir);

    let result: Result<RecoveryRequest, _> = serde_json::from_value(json!({
        "run_id": "r1",
        "recovery_type": "teleport",
    }));
    let err = result.unwrap_err();
    assert!(err.to_string().contains("unsupported recovery type"));

    // The request never existed, so no transaction was logged at all.
    assert!(service.transactions().list("r1", 0, 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn cached_value_wins_over_older_durable_snapshot() {
    let dir = TempDir::new().unwrap();
    let cache = Arc::new(MemoryCache::new());
    let service = PersistenceService::new(
        Db::open(&dir.path().join("vault.db")).unwrap(),
        cache.clone(),
        Arc::new(StateShapeValidator),
        VaultConfig::default(),
    );

    service
        .save(SaveRequest::new("r1", "t1", "u1", json!({"version": "old"})))
        .await
        .unwrap()
        .unwrap();
    cache
        .set(
            "run_state:r1",
            json!({"version": "new"}),
            Duration::from_secs(60),
        )
        .await
        .unwrap();

    assert_eq!(
        service.load("r1", None).await,
        Some(json!({"version": "new"}))
    );
}

/// A backend that fails every call, standing in for an unreachable cache.
struct FailingCache;

#[async_trait]
impl CacheBackend for FailingCache {
    async fn get(&self, _key: &str) -> Result<Option<Value>, CacheError> {
        Err(CacheError::Unavailable("connection refused".to_string()))
    }

    async fn set(&self, _key: &str, _value: Value, _ttl: Duration) -> Result<(), CacheError> {
        Err(CacheError::Unavailable("connection refused".to_string()))
    }

    async fn delete(&self, _key: &str) -> Result<(), CacheError> {
        Err(CacheError::Unavailable("connection refused".to_string()))
    }

    async fn delete_prefix(&self, _prefix: &str) -> Result<(), CacheError> {
        Err(CacheError::Unavailable("connection refused".to_string()))
    }
}

#[tokio::test]
async fn everything_still_works_with_the_cache_down() {
    let dir = TempDir::new().unwrap();
    let service = PersistenceService::new(
        Db::open(&dir.path().join("vault.db")).unwrap(),
        Arc::new(FailingCache),
        Arc::new(StateShapeValidator),
        VaultConfig::default(),
    );

    let snapshot_id = service
        .save(SaveRequest::new("r1", "t1", "u1", json!({"x": 1})))
        .await
        .unwrap()
        .expect("save must not depend on the cache");

    assert_eq!(service.load("r1", None).await, Some(json!({"x": 1})));
    assert_eq!(
        service.load("r1", Some(snapshot_id)).await,
        Some(json!({"x": 1}))
    );

    // Restart only touches the cache, and the cache layer swallows the
    // failure, so the recovery still succeeds.
    assert!(
        service
            .recover(&RecoveryRequest::new("r1", RecoveryType::Restart))
            .await
            .is_some()
    );
}

#[tokio::test]
async fn state_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("vault.db");

    let snapshot_id = {
        let service =
            PersistenceService::open(&path, VaultConfig::default()).unwrap();
        service
            .save(SaveRequest::new("r1", "t1", "u1", json!({"x": 1})))
            .await
            .unwrap()
            .unwrap()
    };

    // A fresh service over the same file sees the committed state with an
    // empty cache.
    let service = PersistenceService::open(&path, VaultConfig::default()).unwrap();
    assert_eq!(service.load("r1", None).await, Some(json!({"x": 1})));
    assert_eq!(
        service.load("r1", Some(snapshot_id)).await,
        Some(json!({"x": 1}))
    );
}
