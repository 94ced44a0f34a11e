// ABOUTME: Recovery request types and the closed RecoveryType enum.
// ABOUTME: Unknown recovery types are rejected at the deserialization boundary, not at run time.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use ulid::Ulid;

/// A recovery type outside the supported set. This is a caller contract
/// violation, distinct from a recovery attempt that ran and failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unsupported recovery type: {0}")]
pub struct RecoveryTypeError(pub String);

/// The three supported recovery strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum RecoveryType {
    /// Discard the cached state so the next load hits the durable store.
    Restart,
    /// Reload the latest snapshot for the run.
    Resume,
    /// Reload one specific snapshot; requires a target snapshot id.
    Rollback,
}

impl RecoveryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecoveryType::Restart => "restart",
            RecoveryType::Resume => "resume",
            RecoveryType::Rollback => "rollback",
        }
    }
}

impl TryFrom<String> for RecoveryType {
    type Error = RecoveryTypeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "restart" => Ok(RecoveryType::Restart),
            "resume" => Ok(RecoveryType::Resume),
            "rollback" => Ok(RecoveryType::Rollback),
            other => Err(RecoveryTypeError(other.to_string())),
        }
    }
}

impl std::str::FromStr for RecoveryType {
    type Err = RecoveryTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::try_from(s.to_string())
    }
}

/// A request to recover an execution. `target_snapshot_id` is required only
/// for rollback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryRequest {
    pub run_id: String,
    pub recovery_type: RecoveryType,
    #[serde(default)]
    pub target_snapshot_id: Option<Ulid>,
    #[serde(default = "default_triggered_by")]
    pub triggered_by: String,
}

fn default_triggered_by() -> String {
    "system".to_string()
}

impl RecoveryRequest {
    pub fn new(run_id: &str, recovery_type: RecoveryType) -> Self {
        Self {
            run_id: run_id.to_string(),
            recovery_type,
            target_snapshot_id: None,
            triggered_by: default_triggered_by(),
        }
    }

    pub fn with_target(mut self, target_snapshot_id: Ulid) -> Self {
        self.target_snapshot_id = Some(target_snapshot_id);
        self
    }

    pub fn with_triggered_by(mut self, triggered_by: &str) -> Self {
        self.triggered_by = triggered_by.to_string();
        self
    }
}
