// ABOUTME: Append-only audit log of create and recovery operations.
// ABOUTME: Records are inserted pending and finalized exactly once; terminal status never reverts.

use chrono::Utc;
use rusqlite::{Connection, params};
use runvault_core::{AgentPhase, OperationType, TransactionRecord, TransactionStatus};
use ulid::Ulid;

use crate::sqlite::{Db, StoreError, parse_timestamp, parse_ulid};

const TRANSACTION_COLUMNS: &str = "transaction_id, snapshot_id, run_id, operation_type,
    triggered_by, execution_phase, status, error_message, created_at, completed_at, metadata";

/// The audit trail. Every snapshot creation and every recovery attempt
/// leaves exactly one record here.
pub struct TransactionLog {
    db: Db,
}

impl TransactionLog {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Insert an audit row. Runs against the caller's connection so the
    /// persistence service can pair it with the snapshot insert.
    pub(crate) fn insert(conn: &Connection, record: &TransactionRecord) -> Result<(), StoreError> {
        conn.execute(
            &format!(
                "INSERT INTO transactions ({TRANSACTION_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
            ),
            params![
                record.transaction_id.to_string(),
                record.snapshot_id.map(|id| id.to_string()),
                record.run_id,
                record.operation_type.as_str(),
                record.triggered_by,
                record.execution_phase.map(|phase| phase.as_str()),
                record.status.as_str(),
                record.error_message,
                record.created_at.to_rfc3339(),
                record.completed_at.map(|ts| ts.to_rfc3339()),
                serde_json::to_string(&record.metadata)?,
            ],
        )?;
        Ok(())
    }

    /// Insert a pending audit row outside any snapshot transaction. Used by
    /// the recovery coordinator, whose records have no snapshot to pair with.
    pub async fn log(&self, record: &TransactionRecord) -> Result<(), StoreError> {
        self.db.with_conn(|conn| Self::insert(conn, record)).await
    }

    /// Finalize a pending record by primary key. Only a pending row
    /// transitions; returns whether a row changed.
    pub async fn complete(
        &self,
        transaction_id: Ulid,
        status: TransactionStatus,
        error_message: Option<&str>,
    ) -> Result<bool, StoreError> {
        debug_assert!(status.is_terminal());
        let changed = self
            .db
            .with_conn(|conn| {
                Ok(conn.execute(
                    "UPDATE transactions
                     SET status = ?1, error_message = ?2, completed_at = ?3
                     WHERE transaction_id = ?4 AND status = 'pending'",
                    params![
                        status.as_str(),
                        error_message,
                        Utc::now().to_rfc3339(),
                        transaction_id.to_string(),
                    ],
                )?)
            })
            .await?;

        if changed == 0 {
            tracing::warn!(
                "transaction {} is already terminal or missing",
                transaction_id
            );
        }
        Ok(changed > 0)
    }

    /// Finalize a pending recovery record by the correlation id carried in
    /// its metadata. The coordinator that completes a recovery may not hold
    /// the record's primary key.
    pub async fn complete_by_recovery_id(
        &self,
        recovery_id: Ulid,
        status: TransactionStatus,
        error_message: Option<&str>,
    ) -> Result<bool, StoreError> {
        debug_assert!(status.is_terminal());
        let changed = self
            .db
            .with_conn(|conn| {
                Ok(conn.execute(
                    "UPDATE transactions
                     SET status = ?1, error_message = ?2, completed_at = ?3
                     WHERE json_extract(metadata, '$.recovery_id') = ?4
                       AND status = 'pending'",
                    params![
                        status.as_str(),
                        error_message,
                        Utc::now().to_rfc3339(),
                        recovery_id.to_string(),
                    ],
                )?)
            })
            .await?;

        if changed == 0 {
            tracing::warn!(
                "no pending transaction found for recovery {}",
                recovery_id
            );
        }
        Ok(changed > 0)
    }

    /// Fetch one record by primary key.
    pub async fn get(&self, transaction_id: Ulid) -> Result<Option<TransactionRecord>, StoreError> {
        self.db
            .with_conn(|conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE transaction_id = ?1"
                ))?;

                match stmt.query_row(params![transaction_id.to_string()], read_row) {
                    Ok(raw) => Ok(Some(decode_row(raw)?)),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(StoreError::Sqlite(e)),
                }
            })
            .await
    }

    /// List records for a run, newest first, with offset/limit pagination
    /// for audit and operational tooling.
    pub async fn list(
        &self,
        run_id: &str,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<TransactionRecord>, StoreError> {
        self.db
            .with_conn(|conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE run_id = ?1
                     ORDER BY created_at DESC, transaction_id DESC LIMIT ?2 OFFSET ?3"
                ))?;
                let rows = stmt
                    .query_map(params![run_id, limit as i64, offset as i64], read_row)?
                    .collect::<Result<Vec<_>, _>>()?;

                rows.into_iter().map(decode_row).collect()
            })
            .await
    }
}

struct TransactionRow {
    transaction_id: String,
    snapshot_id: Option<String>,
    run_id: String,
    operation_type: String,
    triggered_by: String,
    execution_phase: Option<String>,
    status: String,
    error_message: Option<String>,
    created_at: String,
    completed_at: Option<String>,
    metadata: String,
}

fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<TransactionRow> {
    Ok(TransactionRow {
        transaction_id: row.get(0)?,
        snapshot_id: row.get(1)?,
        run_id: row.get(2)?,
        operation_type: row.get(3)?,
        triggered_by: row.get(4)?,
        execution_phase: row.get(5)?,
        status: row.get(6)?,
        error_message: row.get(7)?,
        created_at: row.get(8)?,
        completed_at: row.get(9)?,
        metadata: row.get(10)?,
    })
}

fn decode_row(raw: TransactionRow) -> Result<TransactionRecord, StoreError> {
    let operation_type = OperationType::parse(&raw.operation_type).ok_or_else(|| {
        StoreError::Decode(format!("unknown operation type: {}", raw.operation_type))
    })?;
    let status = TransactionStatus::parse(&raw.status)
        .ok_or_else(|| StoreError::Decode(format!("unknown transaction status: {}", raw.status)))?;
    let execution_phase = match raw.execution_phase {
        Some(phase) => Some(
            AgentPhase::parse(&phase)
                .ok_or_else(|| StoreError::Decode(format!("unknown agent phase: {}", phase)))?,
        ),
        None => None,
    };
    let snapshot_id = match raw.snapshot_id {
        Some(id) => Some(parse_ulid(&id)?),
        None => None,
    };
    let completed_at = match raw.completed_at {
        Some(ts) => Some(parse_timestamp(&ts)?),
        None => None,
    };

    Ok(TransactionRecord {
        transaction_id: parse_ulid(&raw.transaction_id)?,
        snapshot_id,
        run_id: raw.run_id,
        operation_type,
        triggered_by: raw.triggered_by,
        execution_phase,
        status,
        error_message: raw.error_message,
        created_at: parse_timestamp(&raw.created_at)?,
        completed_at,
        metadata: serde_json::from_str(&raw.metadata)?,
    })
}
