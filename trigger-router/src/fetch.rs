//! Periodic pull of new trigger records from the trigger API

use crate::config::TriggerApiConfig;
use crate::pipeline::PipelineContext;
use crate::record::{TriggerRecord, USAGE_NONE};
use crate::shutdown::ShutdownSignal;
use crate::tasks::Job;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FetchRequest<'a> {
    use_type: &'a str,
    trigger_id_list: &'a [i64],
}

#[derive(Debug, Default, Deserialize)]
struct FetchResponse {
    #[serde(default)]
    data: Vec<TriggerRow>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TriggerRow {
    pub vin: String,
    /// Milliseconds, sent as a decimal string
    pub timestamp: String,
    #[serde(default)]
    pub car_type: String,
    #[serde(default)]
    pub usage_type: Option<String>,
    #[serde(default)]
    pub trigger_info: Vec<TriggerInfo>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TriggerInfo {
    pub trigger_id: i64,
    #[serde(default)]
    pub trigger_name: String,
}

/// First candidate that appears in `configured`
pub fn first_match(candidates: &[TriggerInfo], configured: &[i64]) -> Option<i64> {
    candidates
        .iter()
        .map(|info| info.trigger_id)
        .find(|id| configured.contains(id))
}

/// Turn one API row into a record, or `None` if the row must be skipped
pub fn row_to_record(row: &TriggerRow, configured: &[i64]) -> Option<TriggerRecord> {
    let timestamp = match row.timestamp.trim().parse::<i64>() {
        Ok(ts) => ts,
        Err(e) => {
            log::warn!(
                "Skipping trigger for {}: invalid timestamp '{}': {}",
                row.vin,
                row.timestamp,
                e
            );
            return None;
        }
    };

    let Some(trigger_id) = first_match(&row.trigger_info, configured) else {
        log::warn!("Skipping trigger for {}: no configured trigger id", row.vin);
        return None;
    };

    let usage = row
        .usage_type
        .as_deref()
        .filter(|u| !u.is_empty())
        .unwrap_or(USAGE_NONE);

    Some(TriggerRecord::new(
        row.vin.clone(),
        timestamp,
        row.car_type.clone(),
        usage,
        trigger_id.to_string(),
    ))
}

pub struct TriggerFetchJob {
    ctx: Arc<PipelineContext>,
    client: reqwest::Client,
    url: String,
    method: reqwest::Method,
    usage_type: String,
    trigger_ids: Vec<i64>,
}

impl TriggerFetchJob {
    pub fn new(ctx: Arc<PipelineContext>, config: &TriggerApiConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("failed to build HTTP client")?;
        let method = reqwest::Method::from_bytes(config.from_method.to_uppercase().as_bytes())
            .with_context(|| format!("invalid trigger API method '{}'", config.from_method))?;

        Ok(Self {
            ctx,
            client,
            url: config.from_url(),
            method,
            usage_type: config.usage_type.clone(),
            trigger_ids: config.trigger_ids.clone(),
        })
    }

    async fn fetch_rows(&self) -> Result<Vec<TriggerRow>> {
        let response = self
            .client
            .request(self.method.clone(), &self.url)
            .json(&FetchRequest {
                use_type: &self.usage_type,
                trigger_id_list: &self.trigger_ids,
            })
            .send()
            .await
            .with_context(|| format!("trigger API request to {} failed", self.url))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("trigger API returned {}: {}", status, body);
        }

        let body: FetchResponse = response
            .json()
            .await
            .context("failed to parse trigger API response")?;
        Ok(body.data)
    }

    /// Enqueue the usable rows; returns how many were queued
    pub async fn enqueue_rows(&self, rows: &[TriggerRow]) -> usize {
        let queue = &self.ctx.names.default;
        let mut queued = 0;

        for row in rows {
            let Some(mut record) = row_to_record(row, &self.trigger_ids) else {
                continue;
            };
            match self.ctx.advance(&mut record, queue).await {
                Ok(transition) => {
                    transition.log_audit(&record);
                    queued += 1;
                }
                Err(e) => log::error!("Failed to enqueue {}: {:#}", record.key(), e),
            }
        }
        queued
    }
}

#[async_trait]
impl Job for TriggerFetchJob {
    async fn run(&self, _signal: &ShutdownSignal) -> Result<()> {
        let rows = self.fetch_rows().await?;
        let queued = self.enqueue_rows(&rows).await;
        log::info!("Fetched {} triggers, queued {}", rows.len(), queued);
        Ok(())
    }
}
