//! Terminal stage: persist the final record and close its audit entry

use crate::pipeline::PipelineContext;
use crate::pool::Stage;
use crate::record::{AuditUpdate, ProcessStatus, TriggerRecord};
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// Audit log marker written after a successful final write
pub const WRITE_SUCCESS_MARKER: &str = "DB Write Success";

pub struct WriteDbStage {
    ctx: Arc<PipelineContext>,
}

impl WriteDbStage {
    pub fn new(ctx: Arc<PipelineContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Stage for WriteDbStage {
    fn name(&self) -> &str {
        "write-db"
    }

    async fn process(&self, payload: &str) -> Result<()> {
        let mut record = TriggerRecord::from_payload(payload)?;

        let sink = self.ctx.sink.clone();
        let snapshot = record.clone();
        self.ctx
            .retry
            .run(&self.ctx.shutdown, "persist final record", || {
                let sink = sink.clone();
                let snapshot = snapshot.clone();
                async move { sink.persist_final(&snapshot).await }
            })
            .await?;
        log::info!("Persisted {}", record.key());

        // The record is stored; audit problems are only reported from here on
        if let Err(e) = self.ctx.ensure_audit(&mut record).await {
            log::warn!("No audit entry for persisted record {}: {:#}", record.key(), e);
            return Ok(());
        }
        let update = AuditUpdate::status(ProcessStatus::Completed);
        if let Err(e) = self
            .ctx
            .record_stage(&record, WRITE_SUCCESS_MARKER, update)
            .await
        {
            log::warn!("Failed to complete audit entry for {}: {:#}", record.key(), e);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::test_support::harness;

    #[tokio::test]
    async fn test_persists_and_completes_audit() {
        let h = harness();
        let stage = WriteDbStage::new(h.ctx.clone());

        let mut record = TriggerRecord::new("V", 20, "A", "production", "11");
        h.ctx.advance(&mut record, "write_db_triggers").await.unwrap();
        record.is_crash = Some(1);
        record.crash_reason = Some("steering".into());

        stage.process(&record.to_payload().unwrap()).await.unwrap();
        stage.process(&record.to_payload().unwrap()).await.unwrap();

        let finals = h.sink.final_records();
        assert_eq!(finals.len(), 1);
        assert_eq!(finals[0].crash_reason, "steering");

        let entry = h.sink.entry(record.log_id.unwrap()).unwrap();
        assert_eq!(entry.process_status, "Completed");
        assert!(entry.process_log.starts_with(" -> write_db_triggers -> DB Write Success"));
        assert_eq!(h.sink.entries().len(), 1);
    }

    #[tokio::test]
    async fn test_record_without_audit_gets_one() {
        let h = harness();
        let stage = WriteDbStage::new(h.ctx.clone());
        let record = TriggerRecord::new("V", 21, "B", "media", "12");

        stage.process(&record.to_payload().unwrap()).await.unwrap();
        let entries = h.sink.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].process_status, "Completed");
    }
}
