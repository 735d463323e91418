//! Wiring of the configured components into a running service

use crate::alert::{LogNotifier, Notifier, QueueDepthJob, WebhookNotifier};
use crate::config::{
    load_threshold_config, AppConfig, CanFileSourceKind, StorageBackend, StorageConfig,
};
use crate::db;
use crate::fetch::TriggerFetchJob;
use crate::pipeline::PipelineContext;
use crate::pool::Pipeline;
use crate::queue::{MemoryQueue, QueueStore, SqliteQueue};
use crate::shutdown::ShutdownSignal;
use crate::sink::{AuditSink, MemorySink, SqliteSink};
use crate::sources::{CanFileSource, HttpCanFileSource, LocalCanFileSource};
use crate::stages::{NegativeRouter, ThresholdStage, UsageRouter, WriteDbStage};
use crate::tasks::TaskRunner;
use anyhow::{Context, Result};
use can_signal_decoder::Decoder;
use std::sync::Arc;
use std::time::Duration;

/// Queue store and audit sink backed by the same storage
pub struct Storage {
    pub queues: Arc<dyn QueueStore>,
    pub sink: Arc<dyn AuditSink>,
}

pub async fn open_storage(config: &StorageConfig) -> Result<Storage> {
    match config.backend {
        StorageBackend::Memory => {
            log::warn!("Using in-memory storage; queued records are lost on exit");
            Ok(Storage {
                queues: Arc::new(MemoryQueue::new()),
                sink: Arc::new(MemorySink::new()),
            })
        }
        StorageBackend::Sqlite => {
            log::info!("Opening SQLite storage at {:?}", config.path);
            let pool = db::connect(&config.path).await?;
            Ok(Storage {
                queues: Arc::new(SqliteQueue::new(pool.clone()).await?),
                sink: Arc::new(SqliteSink::new(pool).await?),
            })
        }
    }
}

pub fn context(config: &AppConfig, storage: &Storage, shutdown: ShutdownSignal) -> PipelineContext {
    PipelineContext {
        queues: storage.queues.clone(),
        sink: storage.sink.clone(),
        retry: config.retry,
        names: config.queues.clone(),
        pools: config.pools.clone(),
        shutdown,
    }
}

pub fn can_file_source(config: &AppConfig) -> Result<Arc<dyn CanFileSource>> {
    let source: Arc<dyn CanFileSource> = match config.can_files.source {
        CanFileSourceKind::Local => Arc::new(LocalCanFileSource::new(&config.can_files.local_dir)),
        CanFileSourceKind::Http => Arc::new(HttpCanFileSource::new(
            &config.trigger_api,
            &config.decoder.download_dir,
        )?),
    };
    Ok(source)
}

/// One pool per queue kind
///
/// Usage queues without a threshold file get no pool; their records wait until
/// one is configured.
pub fn build_pipeline(
    config: &AppConfig,
    ctx: Arc<PipelineContext>,
    decoder: Arc<Decoder>,
    source: Arc<dyn CanFileSource>,
) -> Result<Pipeline> {
    let names = &config.queues;
    let pools = &config.pools;

    let mut pipeline = Pipeline::new(ctx.clone()).add_pool(
        names.default.clone(),
        pools.size_for(&names.default, pools.routing_workers),
        Arc::new(UsageRouter::new(ctx.clone())),
    );

    for (_, queue) in names.usage_queues() {
        let Some(path) = config.thresholds.get(queue) else {
            log::warn!("No threshold file for {}; queue will not be serviced", queue);
            continue;
        };
        let thresholds = load_threshold_config(path)
            .with_context(|| format!("Failed to load thresholds for {}", queue))?;
        log::info!("{} thresholds for {} from {:?}", thresholds.len(), queue, path);

        let stage = ThresholdStage::new(ctx.clone(), queue, decoder.clone(), source.clone(), thresholds);
        pipeline = pipeline.add_pool(
            queue.to_string(),
            pools.size_for(queue, pools.threshold_workers),
            Arc::new(stage),
        );
    }

    Ok(pipeline
        .add_pool(
            names.write_db.clone(),
            pools.size_for(&names.write_db, pools.write_db_workers),
            Arc::new(WriteDbStage::new(ctx.clone())),
        )
        .add_pool(
            names.negative_inbound.clone(),
            pools.size_for(&names.negative_inbound, pools.negative_workers),
            Arc::new(NegativeRouter::new(ctx, config.negative.clone())),
        ))
}

/// Register the trigger fetch and queue-depth alert tasks
pub fn build_tasks(config: &AppConfig, ctx: Arc<PipelineContext>) -> Result<TaskRunner> {
    let mut runner = TaskRunner::new(ctx.shutdown.clone());

    if config.trigger_api.trigger_ids.is_empty() {
        log::warn!("No trigger ids configured; trigger fetch task disabled");
    } else {
        let job = TriggerFetchJob::new(ctx.clone(), &config.trigger_api)?;
        runner.add_task_with_delay(
            "trigger-fetch",
            "Trigger API fetch",
            Duration::from_secs(config.tasks.fetch_interval_secs),
            config.tasks.fetch_start_delay_secs.map(Duration::from_secs),
            Arc::new(job),
        )?;
    }

    let notifier: Arc<dyn Notifier> = match &config.alert.webhook_url {
        Some(url) => Arc::new(WebhookNotifier::new(
            url.clone(),
            Duration::from_secs(config.trigger_api.timeout_secs),
        )?),
        None => Arc::new(LogNotifier),
    };
    let monitored = config.queues.monitored(config.alert.queue_threshold);
    runner.add_task(
        "queue-alert",
        "Queue depth alert",
        Duration::from_secs(config.tasks.alert_interval_secs),
        Arc::new(QueueDepthJob::new(ctx.queues.clone(), notifier, monitored)),
    )?;

    Ok(runner)
}
