// ABOUTME: Defines the append-only audit TransactionRecord for create and recovery operations.
// ABOUTME: Records start pending and are finalized exactly once; terminal status never reverts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use ulid::Ulid;

use crate::recovery::RecoveryType;
use crate::snapshot::AgentPhase;

/// The operation an audit record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
    Create,
    Recovery,
}

impl OperationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::Create => "create",
            OperationType::Recovery => "recovery",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "create" => Some(OperationType::Create),
            "recovery" => Some(OperationType::Recovery),
            _ => None,
        }
    }
}

/// Lifecycle of an audit record: pending until the operation settles, then
/// committed or failed, both terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Committed,
    Failed,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Committed => "committed",
            TransactionStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(TransactionStatus::Pending),
            "committed" => Some(TransactionStatus::Committed),
            "failed" => Some(TransactionStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransactionStatus::Pending)
    }
}

/// One append-only audit entry. Create records reference their snapshot;
/// recovery records carry a correlation id in `metadata.recovery_id` so the
/// coordinator can complete them without holding the primary key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub transaction_id: Ulid,
    pub snapshot_id: Option<Ulid>,
    pub run_id: String,
    pub operation_type: OperationType,
    pub triggered_by: String,
    pub execution_phase: Option<AgentPhase>,
    pub status: TransactionStatus,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub metadata: Value,
}

impl TransactionRecord {
    /// A pending audit entry for a snapshot creation.
    pub fn pending_create(
        snapshot_id: Ulid,
        run_id: &str,
        triggered_by: &str,
        execution_phase: Option<AgentPhase>,
    ) -> Self {
        Self {
            transaction_id: Ulid::new(),
            snapshot_id: Some(snapshot_id),
            run_id: run_id.to_string(),
            operation_type: OperationType::Create,
            triggered_by: triggered_by.to_string(),
            execution_phase,
            status: TransactionStatus::Pending,
            error_message: None,
            created_at: Utc::now(),
            completed_at: None,
            metadata: Value::Object(serde_json::Map::new()),
        }
    }

    /// A pending audit entry for a recovery attempt, correlated by
    /// `recovery_id` rather than by the record's own key.
    pub fn pending_recovery(
        run_id: &str,
        triggered_by: &str,
        recovery_id: Ulid,
        recovery_type: RecoveryType,
    ) -> Self {
        Self {
            transaction_id: Ulid::new(),
            snapshot_id: None,
            run_id: run_id.to_string(),
            operation_type: OperationType::Recovery,
            triggered_by: triggered_by.to_string(),
            execution_phase: None,
            status: TransactionStatus::Pending,
            error_message: None,
            created_at: Utc::now(),
            completed_at: None,
            metadata: json!({
                "recovery_id": recovery_id.to_string(),
                "recovery_type": recovery_type.as_str(),
            }),
        }
    }
}
