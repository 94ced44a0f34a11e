// ABOUTME: Core domain types for runvault: snapshots, audit transactions, recovery requests.
// ABOUTME: Pure data and policy with no I/O; persistence lives in the runvault-store crate.

pub mod recovery;
pub mod serialize;
pub mod snapshot;
pub mod transaction;
pub mod validate;

pub use recovery::{RecoveryRequest, RecoveryType, RecoveryTypeError};
pub use serialize::{COMPRESSION_THRESHOLD, choose_format, to_storage_safe};
pub use snapshot::{AgentPhase, CheckpointType, SaveRequest, SerializationFormat, Snapshot};
pub use transaction::{OperationType, TransactionRecord, TransactionStatus};
pub use validate::{StateShapeValidator, Validation, ValidationError, Validator};
