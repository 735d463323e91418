//! Default queue -> usage queue

use crate::pipeline::PipelineContext;
use crate::pool::Stage;
use crate::record::{TriggerRecord, UsageType};
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

pub struct UsageRouter {
    ctx: Arc<PipelineContext>,
}

impl UsageRouter {
    pub fn new(ctx: Arc<PipelineContext>) -> Self {
        Self { ctx }
    }

    /// Target queue for a record; unknown or empty usage goes to production
    pub fn target_queue(&self, record: &TriggerRecord) -> &str {
        let usage = record.usage().unwrap_or_else(|| {
            log::debug!(
                "Usage type '{}' of {} not recognised, using production",
                record.usage_type,
                record.key()
            );
            UsageType::Production
        });
        self.ctx.names.usage_queue(usage)
    }
}

#[async_trait]
impl Stage for UsageRouter {
    fn name(&self) -> &str {
        "usage-router"
    }

    async fn process(&self, payload: &str) -> Result<()> {
        let mut record = TriggerRecord::from_payload(payload)?;
        let queue = self.target_queue(&record).to_string();

        let transition = self.ctx.advance(&mut record, &queue).await?;
        transition.log_audit(&record);
        log::info!("Routed {} to {}", record.key(), queue);
        Ok(())
    }
}
