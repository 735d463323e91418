//! Queue-depth alerting

use crate::queue::QueueStore;
use crate::shutdown::ShutdownSignal;
use crate::tasks::Job;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// Delivers a plain-text alert
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, text: &str) -> Result<()>;
}

#[derive(Debug, Serialize)]
struct WebhookMessage<'a> {
    msg_type: &'static str,
    content: WebhookContent<'a>,
}

#[derive(Debug, Serialize)]
struct WebhookContent<'a> {
    text: &'a str,
}

/// Posts text messages to a chat webhook
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, text: &str) -> Result<()> {
        let message = WebhookMessage {
            msg_type: "text",
            content: WebhookContent { text },
        };
        let response = self
            .client
            .post(&self.url)
            .json(&message)
            .send()
            .await
            .context("webhook request failed")?;

        let status = response.status();
        if !status.is_success() {
            bail!("webhook returned {}", status);
        }
        Ok(())
    }
}

/// Used when no webhook is configured
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, text: &str) -> Result<()> {
        log::warn!("{}", text);
        Ok(())
    }
}

pub fn depth_alert_text(queue: &str, depth: u64, threshold: u64) -> String {
    format!(
        "Alert: Queue {} length {} exceeds or equals threshold {}",
        queue, depth, threshold
    )
}

/// Checks an ordered list of (queue, threshold) pairs on every run
pub struct QueueDepthJob {
    queues: Arc<dyn QueueStore>,
    notifier: Arc<dyn Notifier>,
    monitored: Vec<(String, u64)>,
}

impl QueueDepthJob {
    pub fn new(
        queues: Arc<dyn QueueStore>,
        notifier: Arc<dyn Notifier>,
        monitored: Vec<(String, u64)>,
    ) -> Self {
        Self {
            queues,
            notifier,
            monitored,
        }
    }
}

#[async_trait]
impl Job for QueueDepthJob {
    async fn run(&self, _signal: &ShutdownSignal) -> Result<()> {
        let mut failures = 0;

        for (queue, threshold) in &self.monitored {
            let depth = match self.queues.len(queue).await {
                Ok(depth) => depth,
                Err(e) => {
                    log::error!("Failed to read length of {}: {:#}", queue, e);
                    failures += 1;
                    continue;
                }
            };
            log::trace!("Queue {} depth {}", queue, depth);

            if depth >= *threshold {
                let text = depth_alert_text(queue, depth, *threshold);
                if let Err(e) = self.notifier.notify(&text).await {
                    log::error!("Failed to send alert for {}: {:#}", queue, e);
                    failures += 1;
                }
            }
        }

        if failures > 0 {
            bail!("{} of {} queue checks failed", failures, self.monitored.len());
        }
        Ok(())
    }
}
