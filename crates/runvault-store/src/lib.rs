// ABOUTME: Persistence layer for runvault: SQLite snapshot store, audit log, cache, recovery.
// ABOUTME: Composes the durable store and cache into the save/load/recover service facade.

pub mod cache;
pub mod config;
pub mod recovery;
pub mod service;
pub mod snapshot_store;
pub mod sqlite;
pub mod txlog;

pub use cache::{CacheBackend, CacheError, CacheLayer, MemoryCache};
pub use config::{ConfigError, VaultConfig};
pub use recovery::RecoveryCoordinator;
pub use service::PersistenceService;
pub use snapshot_store::SnapshotStore;
pub use sqlite::{Db, StoreError};
pub use txlog::TransactionLog;
