//! Persistence sink for audit entries and final records
//!
//! Tables:
//! - `process_logs`: one audit row per trigger record lifecycle
//! - `data_logs`: final records, unique on (vin, trigger_timestamp, trigger_id)

use crate::record::{AuditEntry, AuditUpdate, FinalRecord, TriggerRecord};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use std::collections::BTreeMap;
use std::sync::Mutex;

/// Audit and final-record persistence
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Insert a new audit entry and return its id
    async fn create_audit_entry(&self, record: &TriggerRecord) -> Result<i64>;

    /// Set fields on an existing entry; safe to repeat
    async fn update_audit_entry(&self, id: i64, update: &AuditUpdate) -> Result<()>;

    /// Append a stage marker to the entry's transition log
    async fn append_audit_log(&self, id: i64, stage: &str) -> Result<()>;

    /// Store the final record; a repeated call for the same record overwrites
    async fn persist_final(&self, record: &TriggerRecord) -> Result<()>;
}

type FinalKey = (String, i64, String);

#[derive(Debug, Default)]
struct MemoryState {
    next_id: i64,
    entries: BTreeMap<i64, AuditEntry>,
    finals: BTreeMap<FinalKey, FinalRecord>,
}

/// In-process sink
#[derive(Debug, Default)]
pub struct MemorySink {
    state: Mutex<MemoryState>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn entry(&self, id: i64) -> Option<AuditEntry> {
        self.lock().entries.get(&id).cloned()
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        self.lock().entries.values().cloned().collect()
    }

    pub fn final_records(&self) -> Vec<FinalRecord> {
        self.lock().finals.values().cloned().collect()
    }
}

#[async_trait]
impl AuditSink for MemorySink {
    async fn create_audit_entry(&self, record: &TriggerRecord) -> Result<i64> {
        let mut state = self.lock();
        state.next_id += 1;
        let id = state.next_id;
        state.entries.insert(id, AuditEntry::for_record(id, record));
        Ok(id)
    }

    async fn update_audit_entry(&self, id: i64, update: &AuditUpdate) -> Result<()> {
        let mut state = self.lock();
        let Some(entry) = state.entries.get_mut(&id) else {
            bail!("no audit entry with id {}", id);
        };
        entry.apply(update);
        Ok(())
    }

    async fn append_audit_log(&self, id: i64, stage: &str) -> Result<()> {
        let mut state = self.lock();
        let Some(entry) = state.entries.get_mut(&id) else {
            bail!("no audit entry with id {}", id);
        };
        entry.process_log.push_str(" -> ");
        entry.process_log.push_str(stage);
        Ok(())
    }

    async fn persist_final(&self, record: &TriggerRecord) -> Result<()> {
        let row = FinalRecord::from(record);
        let key = (row.vin.clone(), row.trigger_timestamp, row.trigger_id.clone());
        self.lock().finals.insert(key, row);
        Ok(())
    }
}

/// SQLite-backed sink
#[derive(Debug, Clone)]
pub struct SqliteSink {
    pool: SqlitePool,
}

impl SqliteSink {
    /// Wrap a pool and create both tables if needed
    pub async fn new(pool: SqlitePool) -> Result<Self> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS process_logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                vin TEXT NOT NULL,
                trigger_timestamp INTEGER NOT NULL,
                car_type TEXT NOT NULL,
                use_type TEXT NOT NULL,
                trigger_id TEXT NOT NULL,
                process_status TEXT NOT NULL,
                stage TEXT NOT NULL DEFAULT '',
                process_log TEXT NOT NULL DEFAULT ''
            )",
        )
        .execute(&pool)
        .await
        .context("failed to create process_logs table")?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS data_logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                vin TEXT NOT NULL,
                trigger_timestamp INTEGER NOT NULL,
                car_type TEXT NOT NULL,
                use_type TEXT NOT NULL,
                trigger_id TEXT NOT NULL,
                is_crash INTEGER NOT NULL,
                crash_reason TEXT NOT NULL,
                criterion_judgment TEXT NOT NULL,
                UNIQUE (vin, trigger_timestamp, trigger_id)
            )",
        )
        .execute(&pool)
        .await
        .context("failed to create data_logs table")?;

        Ok(Self { pool })
    }

    /// Read one audit entry back
    pub async fn entry(&self, id: i64) -> Result<Option<AuditEntry>> {
        let row = sqlx::query(
            "SELECT id, vin, trigger_timestamp, car_type, use_type, trigger_id,
                    process_status, stage, process_log
             FROM process_logs WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("failed to load audit entry {}", id))?;

        Ok(row.map(|row| AuditEntry {
            id: row.get("id"),
            vin: row.get("vin"),
            trigger_timestamp: row.get("trigger_timestamp"),
            car_type: row.get("car_type"),
            use_type: row.get("use_type"),
            trigger_id: row.get("trigger_id"),
            process_status: row.get("process_status"),
            stage: row.get("stage"),
            process_log: row.get("process_log"),
        }))
    }

    /// Number of rows in `data_logs`
    pub async fn final_count(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM data_logs")
            .fetch_one(&self.pool)
            .await
            .context("failed to count data_logs")?;
        Ok(count)
    }
}

#[async_trait]
impl AuditSink for SqliteSink {
    async fn create_audit_entry(&self, record: &TriggerRecord) -> Result<i64> {
        let entry = AuditEntry::for_record(0, record);
        let now = chrono::Utc::now().timestamp();
        let result = sqlx::query(
            "INSERT INTO process_logs
                (created_at, updated_at, vin, trigger_timestamp, car_type, use_type,
                 trigger_id, process_status, stage, process_log)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(now)
        .bind(now)
        .bind(&entry.vin)
        .bind(entry.trigger_timestamp)
        .bind(&entry.car_type)
        .bind(&entry.use_type)
        .bind(&entry.trigger_id)
        .bind(&entry.process_status)
        .bind(&entry.stage)
        .bind(&entry.process_log)
        .execute(&self.pool)
        .await
        .context("failed to create audit entry")?;

        Ok(result.last_insert_rowid())
    }

    async fn update_audit_entry(&self, id: i64, update: &AuditUpdate) -> Result<()> {
        let result = sqlx::query(
            "UPDATE process_logs
             SET process_status = COALESCE(?, process_status),
                 stage = COALESCE(?, stage),
                 updated_at = ?
             WHERE id = ?",
        )
        .bind(update.status.map(|s| s.as_str()))
        .bind(update.stage.as_deref())
        .bind(chrono::Utc::now().timestamp())
        .bind(id)
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to update audit entry {}", id))?;

        if result.rows_affected() == 0 {
            bail!("no audit entry with id {}", id);
        }
        Ok(())
    }

    async fn append_audit_log(&self, id: i64, stage: &str) -> Result<()> {
        let result = sqlx::query(
            "UPDATE process_logs
             SET process_log = process_log || ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(format!(" -> {}", stage))
        .bind(chrono::Utc::now().timestamp())
        .bind(id)
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to append to audit entry {}", id))?;

        if result.rows_affected() == 0 {
            bail!("no audit entry with id {}", id);
        }
        Ok(())
    }

    async fn persist_final(&self, record: &TriggerRecord) -> Result<()> {
        let row = FinalRecord::from(record);
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            "INSERT INTO data_logs
                (created_at, updated_at, vin, trigger_timestamp, car_type, use_type,
                 trigger_id, is_crash, crash_reason, criterion_judgment)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT (vin, trigger_timestamp, trigger_id) DO UPDATE SET
                updated_at = excluded.updated_at,
                car_type = excluded.car_type,
                use_type = excluded.use_type,
                is_crash = excluded.is_crash,
                crash_reason = excluded.crash_reason,
                criterion_judgment = excluded.criterion_judgment",
        )
        .bind(now)
        .bind(now)
        .bind(&row.vin)
        .bind(row.trigger_timestamp)
        .bind(&row.car_type)
        .bind(&row.use_type)
        .bind(&row.trigger_id)
        .bind(row.is_crash)
        .bind(&row.crash_reason)
        .bind(&row.criterion_judgment)
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to persist final record {}", record.key()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::ProcessStatus;

    fn record() -> TriggerRecord {
        let mut record = TriggerRecord::new("LVIN0000000000001", 1_700_000_000, "A", "production", "101");
        record.is_crash = Some(1);
        record.crash_reason = Some("steering angle".into());
        record
    }

    #[tokio::test]
    async fn test_memory_sink_lifecycle() {
        let sink = MemorySink::new();
        let id = sink.create_audit_entry(&record()).await.unwrap();

        sink.append_audit_log(id, "production_car_triggers").await.unwrap();
        let update = AuditUpdate::status(ProcessStatus::Processing).with_stage("production_car_triggers");
        sink.update_audit_entry(id, &update).await.unwrap();
        sink.update_audit_entry(id, &update).await.unwrap();

        let entry = sink.entry(id).unwrap();
        assert_eq!(entry.process_log, " -> production_car_triggers");
        assert_eq!(entry.process_status, "Processing");
        assert_eq!(sink.entries().len(), 1);

        assert!(sink.update_audit_entry(99, &update).await.is_err());
    }

    #[tokio::test]
    async fn test_memory_persist_final_is_idempotent() {
        let sink = MemorySink::new();
        sink.persist_final(&record()).await.unwrap();
        sink.persist_final(&record()).await.unwrap();
        assert_eq!(sink.final_records().len(), 1);
    }

    #[tokio::test]
    async fn test_sqlite_sink_lifecycle() {
        let pool = crate::db::connect_in_memory().await.unwrap();
        let sink = SqliteSink::new(pool).await.unwrap();

        let id = sink.create_audit_entry(&record()).await.unwrap();
        sink.append_audit_log(id, "write_db_triggers").await.unwrap();
        sink.append_audit_log(id, "DB Write Success").await.unwrap();

        let update = AuditUpdate::status(ProcessStatus::Completed);
        sink.update_audit_entry(id, &update).await.unwrap();
        sink.update_audit_entry(id, &update).await.unwrap();

        let entry = sink.entry(id).await.unwrap().unwrap();
        assert_eq!(entry.process_status, "Completed");
        assert_eq!(entry.process_log, " -> write_db_triggers -> DB Write Success");
        assert_eq!(entry.vin, "LVIN0000000000001");

        sink.persist_final(&record()).await.unwrap();
        sink.persist_final(&record()).await.unwrap();
        assert_eq!(sink.final_count().await.unwrap(), 1);

        assert!(sink.append_audit_log(id + 100, "x").await.is_err());
    }
}
