//! Shared pipeline context and queue transitions
//!
//! `PipelineContext` is built once at start-up and handed to every stage in an
//! `Arc`. Its transition helpers pair each queue push with the audit update for
//! that record, reporting routing failures and audit failures separately.

use crate::config::{dead_letter_queue, PoolConfig, QueueNames};
use crate::error::Unrouted;
use crate::queue::QueueStore;
use crate::record::{AuditUpdate, ProcessStatus, TriggerRecord};
use crate::retry::RetryPolicy;
use crate::shutdown::ShutdownSignal;
use crate::sink::AuditSink;
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;

/// Everything a stage needs besides its own collaborators
pub struct PipelineContext {
    pub queues: Arc<dyn QueueStore>,
    pub sink: Arc<dyn AuditSink>,
    pub retry: RetryPolicy,
    pub names: QueueNames,
    pub pools: PoolConfig,
    pub shutdown: ShutdownSignal,
}

/// Outcome of a successful queue transition
#[derive(Debug)]
pub struct Transition {
    pub queue: String,
    /// Set when the record moved but its audit entry could not be updated
    pub audit_error: Option<anyhow::Error>,
}

impl Transition {
    /// Log the audit failure, if any
    pub fn log_audit(&self, record: &TriggerRecord) {
        if let Some(e) = &self.audit_error {
            log::warn!(
                "Record {} moved to {} but audit update failed: {:#}",
                record.key(),
                self.queue,
                e
            );
        }
    }
}

impl PipelineContext {
    pub fn pop_timeout(&self) -> Duration {
        Duration::from_millis(self.pools.pop_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.pools.shutdown_grace_secs)
    }

    /// Make sure `record` has an audit entry, creating it once
    ///
    /// An existing `log_id` is never replaced.
    pub async fn ensure_audit(&self, record: &mut TriggerRecord) -> Result<i64> {
        if let Some(id) = record.log_id {
            return Ok(id);
        }

        let sink = self.sink.clone();
        let snapshot = record.clone();
        let id = self
            .retry
            .run(&self.shutdown, "create audit entry", || {
                let sink = sink.clone();
                let snapshot = snapshot.clone();
                async move { sink.create_audit_entry(&snapshot).await }
            })
            .await?;

        log::debug!("Created audit entry {} for {}", id, record.key());
        record.log_id = Some(id);
        Ok(id)
    }

    /// Push a raw payload with retry
    pub async fn push_payload(&self, queue: &str, payload: String) -> Result<()> {
        let queues = self.queues.clone();
        self.retry
            .run(&self.shutdown, &format!("push to {}", queue), || {
                let queues = queues.clone();
                let payload = payload.clone();
                async move { queues.push(queue, payload).await }
            })
            .await
    }

    /// Move `record` to `queue` and record the transition in its audit entry
    ///
    /// Fails only if the push fails. A record without an audit entry gets one
    /// first; if that cannot be created the record still moves and a later
    /// stage tries again.
    pub async fn advance(&self, record: &mut TriggerRecord, queue: &str) -> Result<Transition> {
        let audit_ready = self.ensure_audit(record).await.map(|_| ());

        let payload = record.to_payload()?;
        if let Err(e) = self.push_payload(queue, payload.clone()).await {
            return Err(e.context(Unrouted {
                key: record.key(),
                queue: queue.to_string(),
                payload,
            }));
        }

        let audit_error = match audit_ready {
            Ok(()) => self
                .record_stage(record, queue, AuditUpdate::status(ProcessStatus::Processing))
                .await
                .err(),
            Err(e) => Some(e),
        };

        Ok(Transition {
            queue: queue.to_string(),
            audit_error,
        })
    }

    /// Append `stage` to the audit log and apply `update`, with retry
    pub async fn record_stage(
        &self,
        record: &TriggerRecord,
        stage: &str,
        update: AuditUpdate,
    ) -> Result<()> {
        let Some(id) = record.log_id else {
            anyhow::bail!("record {} has no audit entry", record.key());
        };

        let sink = self.sink.clone();
        self.retry
            .run(&self.shutdown, "append audit log", || {
                let sink = sink.clone();
                async move { sink.append_audit_log(id, stage).await }
            })
            .await?;

        let update = update.with_stage(stage);
        self.retry
            .run(&self.shutdown, "update audit entry", || {
                let sink = sink.clone();
                let update = update.clone();
                async move { sink.update_audit_entry(id, &update).await }
            })
            .await
    }

    /// Park a payload that could not be processed
    pub async fn dead_letter(&self, queue: &str, payload: String) {
        let target = dead_letter_queue(queue);
        match self.queues.push(&target, payload).await {
            Ok(()) => log::warn!("Moved failed item from {} to {}", queue, target),
            Err(e) => log::error!("Failed to dead-letter item from {}: {:#}", queue, e),
        }
    }

    /// Put an interrupted payload back on its own queue
    pub async fn requeue(&self, queue: &str, payload: String) {
        if let Err(e) = self.queues.push(queue, payload).await {
            log::error!("Failed to requeue interrupted item on {}: {:#}", queue, e);
        }
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::harness;
    use super::*;

    #[tokio::test]
    async fn test_advance_creates_audit_once() {
        let h = harness();
        let mut record = TriggerRecord::new("V1", 10, "A", "media", "7");

        let t = h.ctx.advance(&mut record, "media_car_triggers").await.unwrap();
        assert!(t.audit_error.is_none());
        let id = record.log_id.unwrap();

        h.ctx.advance(&mut record, "write_db_triggers").await.unwrap();
        assert_eq!(record.log_id, Some(id));
        assert_eq!(h.sink.entries().len(), 1);

        let entry = h.sink.entry(id).unwrap();
        assert_eq!(entry.process_log, " -> media_car_triggers -> write_db_triggers");
        assert_eq!(entry.stage, "write_db_triggers");

        let queued = h.queues.items("media_car_triggers");
        let payload = TriggerRecord::from_payload(&queued[0]).unwrap();
        assert_eq!(payload.log_id, Some(id));
    }

    #[tokio::test]
    async fn test_missing_audit_entry_reported_separately() {
        let h = harness();
        let mut record = TriggerRecord::new("V2", 11, "B", "internal", "8");
        record.log_id = Some(404);

        let t = h.ctx.advance(&mut record, "internal_car_triggers").await.unwrap();
        assert!(t.audit_error.is_some());
        assert_eq!(h.queues.items("internal_car_triggers").len(), 1);
        assert_eq!(record.log_id, Some(404));
    }

    #[tokio::test]
    async fn test_dead_letter_queue_name() {
        let h = harness();
        h.ctx.dead_letter("write_db_triggers", "{}".into()).await;
        assert_eq!(h.queues.items("write_db_triggers_dead_letter"), vec!["{}"]);
    }
}
