// ABOUTME: Durable, immutable, versioned snapshot records with per-run retention.
// ABOUTME: Inserts run inside the caller's transaction so snapshot and audit row commit together.

use std::io::{Read, Write};

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use rusqlite::{Connection, params};
use runvault_core::{AgentPhase, CheckpointType, SerializationFormat, Snapshot};
use serde_json::Value;
use ulid::Ulid;

use crate::sqlite::{Db, StoreError, parse_timestamp, parse_ulid};

const SNAPSHOT_COLUMNS: &str = "snapshot_id, run_id, thread_id, user_id, state_data,
    serialization_format, checkpoint_type, agent_phase, execution_context,
    is_recovery_point, created_at, expires_at";

/// Store of immutable snapshot records, ordered per run by creation time.
pub struct SnapshotStore {
    db: Db,
    max_snapshots_per_run: usize,
}

impl SnapshotStore {
    pub fn new(db: Db, max_snapshots_per_run: usize) -> Self {
        Self {
            db,
            max_snapshots_per_run,
        }
    }

    /// Insert a snapshot row. Runs against the caller's connection so the
    /// persistence service can put it in the same transaction as the
    /// creation audit row.
    pub(crate) fn insert(conn: &Connection, snapshot: &Snapshot) -> Result<(), StoreError> {
        let state = encode_state(&snapshot.state_data, snapshot.serialization_format)?;
        conn.execute(
            &format!(
                "INSERT INTO snapshots ({SNAPSHOT_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"
            ),
            params![
                snapshot.snapshot_id.to_string(),
                snapshot.run_id,
                snapshot.thread_id,
                snapshot.user_id,
                state,
                snapshot.serialization_format.as_str(),
                snapshot.checkpoint_type.as_str(),
                snapshot.agent_phase.map(|phase| phase.as_str()),
                serde_json::to_string(&snapshot.execution_context)?,
                snapshot.is_recovery_point,
                snapshot.created_at.to_rfc3339(),
                snapshot.expires_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Look up a snapshot. With an id: exact lookup, scoped to the run so a
    /// rollback can never resurrect another run's state. Without: the most
    /// recent snapshot for the run. Missing data is `Ok(None)`, not an error.
    pub async fn get(
        &self,
        run_id: &str,
        snapshot_id: Option<Ulid>,
    ) -> Result<Option<Snapshot>, StoreError> {
        self.db
            .with_conn(|conn| {
                let mut stmt = match snapshot_id {
                    Some(_) => conn.prepare(&format!(
                        "SELECT {SNAPSHOT_COLUMNS} FROM snapshots
                         WHERE run_id = ?1 AND snapshot_id = ?2"
                    ))?,
                    None => conn.prepare(&format!(
                        "SELECT {SNAPSHOT_COLUMNS} FROM snapshots WHERE run_id = ?1
                         ORDER BY created_at DESC, snapshot_id DESC LIMIT 1"
                    ))?,
                };

                let result = match snapshot_id {
                    Some(id) => stmt.query_row(params![run_id, id.to_string()], read_row),
                    None => stmt.query_row(params![run_id], read_row),
                };

                match result {
                    Ok(raw) => Ok(Some(decode_row(raw)?)),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(StoreError::Sqlite(e)),
                }
            })
            .await
    }

    /// List snapshots for a run, newest first, with offset/limit pagination
    /// for audit and operational tooling.
    pub async fn list(
        &self,
        run_id: &str,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Snapshot>, StoreError> {
        self.db
            .with_conn(|conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {SNAPSHOT_COLUMNS} FROM snapshots WHERE run_id = ?1
                     ORDER BY created_at DESC, snapshot_id DESC LIMIT ?2 OFFSET ?3"
                ))?;
                let rows = stmt
                    .query_map(params![run_id, limit as i64, offset as i64], read_row)?
                    .collect::<Result<Vec<_>, _>>()?;

                rows.into_iter().map(decode_row).collect()
            })
            .await
    }

    /// Delete everything beyond the newest `max_snapshots_per_run` snapshots
    /// for the run, each together with its audit transactions, in one batch.
    /// Calling this again with nothing beyond the limit is a no-op.
    pub async fn enforce_retention(&self, run_id: &str) -> Result<usize, StoreError> {
        let max = self.max_snapshots_per_run;
        let evicted = self
            .db
            .transaction(|tx| {
                let mut stmt = tx.prepare(
                    "SELECT snapshot_id FROM snapshots WHERE run_id = ?1
                     ORDER BY created_at DESC, snapshot_id DESC LIMIT -1 OFFSET ?2",
                )?;
                let ids = stmt
                    .query_map(params![run_id, max as i64], |row| row.get::<_, String>(0))?
                    .collect::<Result<Vec<_>, _>>()?;

                for id in &ids {
                    tx.execute("DELETE FROM transactions WHERE snapshot_id = ?1", params![id])?;
                    tx.execute("DELETE FROM snapshots WHERE snapshot_id = ?1", params![id])?;
                }
                Ok(ids.len())
            })
            .await?;

        if evicted > 0 {
            tracing::info!("retention evicted {} snapshot(s) for run {}", evicted, run_id);
        }
        Ok(evicted)
    }
}

fn encode_state(state: &Value, format: SerializationFormat) -> Result<Vec<u8>, StoreError> {
    let bytes = serde_json::to_vec(state)?;
    match format {
        SerializationFormat::Json => Ok(bytes),
        SerializationFormat::CompressedJson => {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(&bytes)?;
            Ok(encoder.finish()?)
        }
    }
}

fn decode_state(bytes: &[u8], format: SerializationFormat) -> Result<Value, StoreError> {
    match format {
        SerializationFormat::Json => Ok(serde_json::from_slice(bytes)?),
        SerializationFormat::CompressedJson => {
            let mut decoder = GzDecoder::new(bytes);
            let mut decompressed = Vec::new();
            decoder.read_to_end(&mut decompressed)?;
            Ok(serde_json::from_slice(&decompressed)?)
        }
    }
}

struct SnapshotRow {
    snapshot_id: String,
    run_id: String,
    thread_id: String,
    user_id: String,
    state_data: Vec<u8>,
    serialization_format: String,
    checkpoint_type: String,
    agent_phase: Option<String>,
    execution_context: String,
    is_recovery_point: bool,
    created_at: String,
    expires_at: String,
}

fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<SnapshotRow> {
    Ok(SnapshotRow {
        snapshot_id: row.get(0)?,
        run_id: row.get(1)?,
        thread_id: row.get(2)?,
        user_id: row.get(3)?,
        state_data: row.get(4)?,
        serialization_format: row.get(5)?,
        checkpoint_type: row.get(6)?,
        agent_phase: row.get(7)?,
        execution_context: row.get(8)?,
        is_recovery_point: row.get(9)?,
        created_at: row.get(10)?,
        expires_at: row.get(11)?,
    })
}

fn decode_row(raw: SnapshotRow) -> Result<Snapshot, StoreError> {
    let format = SerializationFormat::parse(&raw.serialization_format).ok_or_else(|| {
        StoreError::Decode(format!(
            "unknown serialization format: {}",
            raw.serialization_format
        ))
    })?;
    let checkpoint_type = CheckpointType::parse(&raw.checkpoint_type).ok_or_else(|| {
        StoreError::Decode(format!("unknown checkpoint type: {}", raw.checkpoint_type))
    })?;
    let agent_phase = match raw.agent_phase {
        Some(phase) => Some(
            AgentPhase::parse(&phase)
                .ok_or_else(|| StoreError::Decode(format!("unknown agent phase: {}", phase)))?,
        ),
        None => None,
    };

    Ok(Snapshot {
        snapshot_id: parse_ulid(&raw.snapshot_id)?,
        run_id: raw.run_id,
        thread_id: raw.thread_id,
        user_id: raw.user_id,
        state_data: decode_state(&raw.state_data, format)?,
        serialization_format: format,
        checkpoint_type,
        agent_phase,
        execution_context: serde_json::from_str(&raw.execution_context)?,
        is_recovery_point: raw.is_recovery_point,
        created_at: parse_timestamp(&raw.created_at)?,
        expires_at: parse_timestamp(&raw.expires_at)?,
    })
}
