// ABOUTME: Defines the Snapshot record, the SaveRequest input type, and their closed enums.
// ABOUTME: A snapshot is an immutable point-in-time capture of one execution's state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use ulid::Ulid;

/// What triggered a snapshot: an explicit caller request or an automatic
/// checkpoint taken by the run loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointType {
    #[default]
    Manual,
    Auto,
}

impl CheckpointType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckpointType::Manual => "manual",
            CheckpointType::Auto => "auto",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "manual" => Some(CheckpointType::Manual),
            "auto" => Some(CheckpointType::Auto),
            _ => None,
        }
    }
}

/// Storage encoding for a snapshot's state payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SerializationFormat {
    Json,
    CompressedJson,
}

impl SerializationFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            SerializationFormat::Json => "json",
            SerializationFormat::CompressedJson => "compressed_json",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "json" => Some(SerializationFormat::Json),
            "compressed_json" => Some(SerializationFormat::CompressedJson),
            _ => None,
        }
    }
}

/// Where in the agent loop the execution was when the snapshot was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentPhase {
    Planning,
    Executing,
    Reflecting,
    Finalizing,
}

impl AgentPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentPhase::Planning => "planning",
            AgentPhase::Executing => "executing",
            AgentPhase::Reflecting => "reflecting",
            AgentPhase::Finalizing => "finalizing",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "planning" => Some(AgentPhase::Planning),
            "executing" => Some(AgentPhase::Executing),
            "reflecting" => Some(AgentPhase::Reflecting),
            "finalizing" => Some(AgentPhase::Finalizing),
            _ => None,
        }
    }
}

/// An immutable, versioned record of one execution's state at a point in
/// time. Never mutated after creation; deleted only by retention cleanup.
/// `expires_at` is advisory and reaped outside this crate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub snapshot_id: Ulid,
    pub run_id: String,
    pub thread_id: String,
    pub user_id: String,
    pub state_data: Value,
    pub serialization_format: SerializationFormat,
    pub checkpoint_type: CheckpointType,
    pub agent_phase: Option<AgentPhase>,
    pub execution_context: Value,
    pub is_recovery_point: bool,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Snapshot {
    /// Build a snapshot record from a save request, the chosen storage
    /// format, the storage-safe payload, and the resolved expiry. Generates
    /// a fresh ULID and stamps `created_at` with the current time.
    pub fn from_request(
        request: &SaveRequest,
        format: SerializationFormat,
        state_data: Value,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            snapshot_id: Ulid::new(),
            run_id: request.run_id.clone(),
            thread_id: request.thread_id.clone(),
            user_id: request.user_id.clone(),
            state_data,
            serialization_format: format,
            checkpoint_type: request.checkpoint_type,
            agent_phase: request.agent_phase,
            execution_context: request.execution_context.clone(),
            is_recovery_point: request.is_recovery_point,
            created_at: Utc::now(),
            expires_at,
        }
    }
}

/// A request to persist one snapshot of an execution's state. The one
/// explicit input shape for `PersistenceService::save`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveRequest {
    pub run_id: String,
    pub thread_id: String,
    pub user_id: String,
    pub state_data: Value,
    #[serde(default)]
    pub checkpoint_type: CheckpointType,
    #[serde(default)]
    pub agent_phase: Option<AgentPhase>,
    #[serde(default = "empty_object")]
    pub execution_context: Value,
    #[serde(default)]
    pub is_recovery_point: bool,
    #[serde(default = "default_triggered_by")]
    pub triggered_by: String,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}

fn default_triggered_by() -> String {
    "system".to_string()
}

impl SaveRequest {
    /// Create a save request with the required fields. Checkpoint type
    /// defaults to manual, the execution context to an empty map, and the
    /// expiry to the configured retention window.
    pub fn new(run_id: &str, thread_id: &str, user_id: &str, state_data: Value) -> Self {
        Self {
            run_id: run_id.to_string(),
            thread_id: thread_id.to_string(),
            user_id: user_id.to_string(),
            state_data,
            checkpoint_type: CheckpointType::default(),
            agent_phase: None,
            execution_context: empty_object(),
            is_recovery_point: false,
            triggered_by: default_triggered_by(),
            expires_at: None,
        }
    }

    pub fn with_checkpoint_type(mut self, checkpoint_type: CheckpointType) -> Self {
        self.checkpoint_type = checkpoint_type;
        self
    }

    pub fn with_agent_phase(mut self, phase: AgentPhase) -> Self {
        self.agent_phase = Some(phase);
        self
    }

    pub fn with_execution_context(mut self, context: Value) -> Self {
        self.execution_context = context;
        self
    }

    pub fn as_recovery_point(mut self) -> Self {
        self.is_recovery_point = true;
        self
    }

    pub fn with_triggered_by(mut self, triggered_by: &str) -> Self {
        self.triggered_by = triggered_by.to_string();
        self
    }

    pub fn with_expires_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }
}
