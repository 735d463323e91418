//! Negative-trigger routing by (car type, usage type)

use crate::config::NegativeConfig;
use crate::pipeline::PipelineContext;
use crate::pool::Stage;
use crate::record::TriggerRecord;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

pub struct NegativeRouter {
    ctx: Arc<PipelineContext>,
    table: NegativeConfig,
}

impl NegativeRouter {
    pub fn new(ctx: Arc<PipelineContext>, table: NegativeConfig) -> Self {
        Self { ctx, table }
    }

    /// Lookup "<car_type>_<usage_type>", falling back to the default queue
    pub fn target_queue(&self, car_type: &str, usage_type: &str) -> &str {
        let key = format!("{}_{}", car_type, usage_type);
        match self.table.routes.get(&key) {
            Some(queue) => queue,
            None => {
                log::debug!("No negative route for {}, using {}", key, self.table.default_queue);
                &self.table.default_queue
            }
        }
    }
}

#[async_trait]
impl Stage for NegativeRouter {
    fn name(&self) -> &str {
        "negative-router"
    }

    async fn process(&self, payload: &str) -> Result<()> {
        let mut record = TriggerRecord::from_payload(payload)?;
        let queue = self
            .target_queue(&record.car_type, &record.usage_type)
            .to_string();

        let transition = self.ctx.advance(&mut record, &queue).await?;
        transition.log_audit(&record);
        log::info!("Routed negative trigger {} to {}", record.key(), queue);
        Ok(())
    }
}
