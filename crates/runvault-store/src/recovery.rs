// ABOUTME: Recovery coordinator executing the restart, resume, and rollback strategies.
// ABOUTME: Every attempt is bracketed by an audit transaction correlated by recovery id.

use runvault_core::{RecoveryRequest, RecoveryType, TransactionRecord, TransactionStatus};
use ulid::Ulid;

use crate::service::PersistenceService;

/// Runs one recovery attempt against the persistence service. The attempt's
/// audit transaction moves pending to committed or failed, never back.
pub struct RecoveryCoordinator<'a> {
    service: &'a PersistenceService,
}

impl<'a> RecoveryCoordinator<'a> {
    pub fn new(service: &'a PersistenceService) -> Self {
        Self { service }
    }

    /// Execute a recovery attempt. Returns the recovery correlation id on
    /// success and `None` on failure; the audit record carries the outcome
    /// either way.
    pub async fn execute(&self, request: &RecoveryRequest) -> Option<Ulid> {
        let recovery_id = Ulid::new();
        let record = TransactionRecord::pending_recovery(
            &request.run_id,
            &request.triggered_by,
            recovery_id,
            request.recovery_type,
        );
        if let Err(e) = self.service.txlog.log(&record).await {
            tracing::error!(
                "could not open recovery transaction for run {}: {}",
                request.run_id,
                e
            );
            return None;
        }
        tracing::info!(
            "recovery {} ({}) started for run {}",
            recovery_id,
            request.recovery_type.as_str(),
            request.run_id
        );

        let outcome = self.run_strategy(request).await;

        let (status, error_message) = match &outcome {
            Ok(()) => (TransactionStatus::Committed, None),
            Err(message) => (TransactionStatus::Failed, Some(message.as_str())),
        };
        // Completion is addressed by the correlation id in the record's
        // metadata, not by its primary key.
        if let Err(e) = self
            .service
            .txlog
            .complete_by_recovery_id(recovery_id, status, error_message)
            .await
        {
            tracing::warn!("could not complete recovery {}: {}", recovery_id, e);
        }

        match outcome {
            Ok(()) => {
                tracing::info!("recovery {} completed for run {}", recovery_id, request.run_id);
                Some(recovery_id)
            }
            Err(message) => {
                tracing::warn!(
                    "recovery {} failed for run {}: {}",
                    recovery_id,
                    request.run_id,
                    message
                );
                None
            }
        }
    }

    async fn run_strategy(&self, request: &RecoveryRequest) -> Result<(), String> {
        match request.recovery_type {
            RecoveryType::Restart => {
                // Drop the cached state; the next load falls through to the
                // durable store.
                self.service.cache.invalidate(&request.run_id).await;
                Ok(())
            }
            RecoveryType::Resume => match self.service.load(&request.run_id, None).await {
                Some(_) => Ok(()),
                None => Err(format!("no snapshot to resume for run {}", request.run_id)),
            },
            RecoveryType::Rollback => {
                // Fails before any storage lookup.
                let Some(target) = request.target_snapshot_id else {
                    return Err("rollback requires a target snapshot id".to_string());
                };
                match self.service.load(&request.run_id, Some(target)).await {
                    Some(_) => Ok(()),
                    None => Err(format!(
                        "snapshot {} not found for run {}",
                        target, request.run_id
                    )),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VaultConfig;
    use runvault_core::{OperationType, SaveRequest};
    use serde_json::json;

    fn make_service() -> PersistenceService {
        PersistenceService::open_in_memory(VaultConfig::default()).unwrap()
    }

    async fn latest_recovery_record(
        service: &PersistenceService,
        run_id: &str,
    ) -> TransactionRecord {
        service
            .transactions()
            .list(run_id, 0, 10)
            .await
            .unwrap()
            .into_iter()
            .find(|record| record.operation_type == OperationType::Recovery)
            .expect("a recovery transaction should exist")
    }

    #[tokio::test]
    async fn restart_succeeds_without_any_snapshot() {
        let service = make_service();

        let recovery_id = service
            .recover(&RecoveryRequest::new("r1", RecoveryType::Restart))
            .await
            .expect("restart should succeed");

        let record = latest_recovery_record(&service, "r1").await;
        assert_eq!(record.status, TransactionStatus::Committed);
        assert_eq!(
            record.metadata["recovery_id"],
            json!(recovery_id.to_string())
        );
        assert!(record.snapshot_id.is_none());
    }

    #[tokio::test]
    async fn restart_drops_cached_state() {
        let service = make_service();

        service
            .save(SaveRequest::new("r1", "t1", "u1", json!({"x": 1})))
            .await
            .unwrap()
            .unwrap();
        service.cache.write("r1", &json!({"stale": true})).await;

        service
            .recover(&RecoveryRequest::new("r1", RecoveryType::Restart))
            .await
            .unwrap();

        // The stale entry is gone; the next load comes from the store.
        assert_eq!(service.load("r1", None).await, Some(json!({"x": 1})));
    }

    #[tokio::test]
    async fn resume_succeeds_with_a_snapshot() {
        let service = make_service();

        service
            .save(SaveRequest::new("r1", "t1", "u1", json!({"x": 1})))
            .await
            .unwrap()
            .unwrap();

        let result = service
            .recover(&RecoveryRequest::new("r1", RecoveryType::Resume))
            .await;
        assert!(result.is_some());

        let record = latest_recovery_record(&service, "r1").await;
        assert_eq!(record.status, TransactionStatus::Committed);
    }

    #[tokio::test]
    async fn resume_fails_without_a_snapshot() {
        let service = make_service();

        let result = service
            .recover(&RecoveryRequest::new("r1", RecoveryType::Resume))
            .await;
        assert!(result.is_none());

        let record = latest_recovery_record(&service, "r1").await;
        assert_eq!(record.status, TransactionStatus::Failed);
        assert!(
            record
                .error_message
                .as_deref()
                .unwrap()
                .contains("no snapshot to resume")
        );
    }

    #[tokio::test]
    async fn rollback_succeeds_with_existing_target() {
        let service = make_service();

        let first = service
            .save(SaveRequest::new("r1", "t1", "u1", json!({"step": 1})))
            .await
            .unwrap()
            .unwrap();
        service
            .save(SaveRequest::new("r1", "t1", "u1", json!({"step": 2})))
            .await
            .unwrap()
            .unwrap();

        let result = service
            .recover(&RecoveryRequest::new("r1", RecoveryType::Rollback).with_target(first))
            .await;
        assert!(result.is_some());
    }

    #[tokio::test]
    async fn rollback_fails_on_missing_target() {
        let service = make_service();

        let result = service
            .recover(&RecoveryRequest::new("r1", RecoveryType::Rollback).with_target(Ulid::new()))
            .await;
        assert!(result.is_none());

        let record = latest_recovery_record(&service, "r1").await;
        assert_eq!(record.status, TransactionStatus::Failed);
    }

    #[tokio::test]
    async fn rollback_without_target_fails_before_storage() {
        let service = make_service();

        let result = service
            .recover(&RecoveryRequest::new("r1", RecoveryType::Rollback))
            .await;
        assert!(result.is_none());

        let record = latest_recovery_record(&service, "r1").await;
        assert_eq!(record.status, TransactionStatus::Failed);
        assert!(
            record
                .error_message
                .as_deref()
                .unwrap()
                .contains("requires a target snapshot id")
        );
    }

    #[tokio::test]
    async fn every_attempt_leaves_no_pending_record() {
        let service = make_service();

        service
            .recover(&RecoveryRequest::new("r1", RecoveryType::Restart))
            .await;
        service
            .recover(&RecoveryRequest::new("r1", RecoveryType::Resume))
            .await;
        service
            .recover(&RecoveryRequest::new("r1", RecoveryType::Rollback))
            .await;

        let records = service.transactions().list("r1", 0, 10).await.unwrap();
        assert_eq!(records.len(), 3);
        for record in records {
            assert!(record.status.is_terminal(), "record left pending");
            assert!(record.completed_at.is_some());
        }
    }
}
