// ABOUTME: Public persistence facade composing validation, serialization policy, the snapshot
// ABOUTME: store, the audit log, and the cache into the save, load, and recover operations.

use std::path::Path;
use std::sync::Arc;

use chrono::{Duration, Utc};
use runvault_core::{
    RecoveryRequest, SaveRequest, Snapshot, StateShapeValidator, TransactionRecord,
    TransactionStatus, ValidationError, Validator, choose_format, to_storage_safe,
};
use serde_json::Value;
use ulid::Ulid;

use crate::cache::{CacheBackend, CacheLayer, MemoryCache};
use crate::config::VaultConfig;
use crate::recovery::RecoveryCoordinator;
use crate::snapshot_store::SnapshotStore;
use crate::sqlite::{Db, StoreError};
use crate::txlog::TransactionLog;

/// The persistence service: one instance per process, constructed with its
/// collaborators injected and passed by reference to consumers.
pub struct PersistenceService {
    pub(crate) db: Db,
    pub(crate) snapshots: SnapshotStore,
    pub(crate) txlog: TransactionLog,
    pub(crate) cache: CacheLayer,
    validator: Arc<dyn Validator>,
    config: VaultConfig,
}

impl PersistenceService {
    pub fn new(
        db: Db,
        cache_backend: Arc<dyn CacheBackend>,
        validator: Arc<dyn Validator>,
        config: VaultConfig,
    ) -> Self {
        let snapshots = SnapshotStore::new(db.clone(), config.max_snapshots_per_run);
        let txlog = TransactionLog::new(db.clone());
        let cache = CacheLayer::new(cache_backend, config.cache_ttl);
        Self {
            db,
            snapshots,
            txlog,
            cache,
            validator,
            config,
        }
    }

    /// Open a service over a SQLite file with the in-process cache and the
    /// default payload validator.
    pub fn open(path: &Path, config: VaultConfig) -> Result<Self, StoreError> {
        Ok(Self::new(
            Db::open(path)?,
            Arc::new(MemoryCache::new()),
            Arc::new(StateShapeValidator),
            config,
        ))
    }

    /// An in-memory service, used by tests and ephemeral runs.
    pub fn open_in_memory(config: VaultConfig) -> Result<Self, StoreError> {
        Ok(Self::new(
            Db::open_in_memory()?,
            Arc::new(MemoryCache::new()),
            Arc::new(StateShapeValidator),
            config,
        ))
    }

    /// The snapshot store, exposed for audit and operational tooling.
    pub fn snapshots(&self) -> &SnapshotStore {
        &self.snapshots
    }

    /// The audit transaction log, exposed for audit and operational tooling.
    pub fn transactions(&self) -> &TransactionLog {
        &self.txlog
    }

    /// Persist a snapshot of an execution's state.
    ///
    /// An invalid payload is surfaced directly with nothing written. A
    /// storage failure rolls back the snapshot and its audit row together
    /// and yields `Ok(None)` with a logged diagnostic. Once the pair has
    /// committed, the save reports success even if post-commit bookkeeping
    /// fails: the data is durable.
    pub async fn save(&self, request: SaveRequest) -> Result<Option<Ulid>, ValidationError> {
        let validation = self.validator.validate(&request.state_data);
        if !validation.is_valid {
            return Err(ValidationError {
                errors: validation.errors,
            });
        }

        let run_id = request.run_id.clone();
        match self.try_save(request).await {
            Ok(snapshot_id) => Ok(Some(snapshot_id)),
            Err(e) => {
                tracing::error!("save failed for run {}: {}", run_id, e);
                Ok(None)
            }
        }
    }

    async fn try_save(&self, request: SaveRequest) -> Result<Ulid, StoreError> {
        let format = choose_format(&request.state_data);
        let state = to_storage_safe(request.state_data.clone());
        let expires_at = request
            .expires_at
            .unwrap_or_else(|| Utc::now() + Duration::days(self.config.default_retention_days));

        let snapshot = Snapshot::from_request(&request, format, state, expires_at);
        let record = TransactionRecord::pending_create(
            snapshot.snapshot_id,
            &request.run_id,
            &request.triggered_by,
            request.agent_phase,
        );

        // The snapshot and its creation audit row become visible together
        // or not at all.
        self.db
            .transaction(|tx| {
                SnapshotStore::insert(tx, &snapshot)?;
                TransactionLog::insert(tx, &record)
            })
            .await?;
        tracing::debug!(
            "snapshot {} committed for run {}",
            snapshot.snapshot_id,
            snapshot.run_id
        );

        // Post-commit steps are best-effort; the snapshot is already durable.
        self.cache.write(&snapshot.run_id, &snapshot.state_data).await;
        if let Err(e) = self.snapshots.enforce_retention(&snapshot.run_id).await {
            tracing::warn!(
                "retention enforcement failed for run {}: {}",
                snapshot.run_id,
                e
            );
        }
        if let Err(e) = self
            .txlog
            .complete(record.transaction_id, TransactionStatus::Committed, None)
            .await
        {
            tracing::warn!(
                "could not complete transaction {}: {}",
                record.transaction_id,
                e
            );
        }

        Ok(snapshot.snapshot_id)
    }

    /// Load an execution's state: the latest snapshot for the run, or one
    /// specific snapshot when an id is given. Missing data and internal
    /// failures both surface as `None`; callers that need the distinction
    /// consult the audit trail.
    pub async fn load(&self, run_id: &str, snapshot_id: Option<Ulid>) -> Option<Value> {
        match self.try_load(run_id, snapshot_id).await {
            Ok(state) => state,
            Err(e) => {
                tracing::error!("load failed for run {}: {}", run_id, e);
                None
            }
        }
    }

    async fn try_load(
        &self,
        run_id: &str,
        snapshot_id: Option<Ulid>,
    ) -> Result<Option<Value>, StoreError> {
        // The cache only ever mirrors the latest state, so historical
        // lookups go straight to the durable store.
        if snapshot_id.is_none()
            && let Some(state) = self.cache.read(run_id).await
        {
            tracing::debug!("cache hit for run {}", run_id);
            return Ok(Some(state));
        }

        let Some(snapshot) = self.snapshots.get(run_id, snapshot_id).await? else {
            return Ok(None);
        };

        self.cache.write(run_id, &snapshot.state_data).await;
        Ok(Some(snapshot.state_data))
    }

    /// Execute a recovery strategy for a run. Returns the recovery
    /// correlation id on success, `None` on a failed recovery; either way
    /// the attempt is recorded in the audit trail.
    pub async fn recover(&self, request: &RecoveryRequest) -> Option<Ulid> {
        RecoveryCoordinator::new(self).execute(request).await
    }
}
