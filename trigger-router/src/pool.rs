//! Worker pool harness
//!
//! Each queue is serviced by a fixed number of workers. A worker pops with a
//! short timeout, runs the queue's stage on the payload and goes back to
//! popping. A failing or panicking stage is logged and its payload is moved to
//! the queue's dead-letter queue; the worker itself keeps running. Workers
//! finish their current item before observing shutdown. Items still running
//! when the grace period ends are aborted along with their worker.

use crate::error::{is_cancelled, unrouted_payload};
use crate::pipeline::PipelineContext;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::{AbortHandle, JoinHandle};

/// The transform applied to every item of one queue
#[async_trait]
pub trait Stage: Send + Sync + 'static {
    /// Short name for log lines
    fn name(&self) -> &str;

    /// Handle one payload popped from the stage's queue
    async fn process(&self, payload: &str) -> Result<()>;
}

/// A queue, its pool size and its stage
pub struct PoolSpec {
    pub queue: String,
    pub workers: usize,
    pub stage: Arc<dyn Stage>,
}

/// Builder for the set of pools that make up the pipeline
pub struct Pipeline {
    ctx: Arc<PipelineContext>,
    pools: Vec<PoolSpec>,
}

impl Pipeline {
    pub fn new(ctx: Arc<PipelineContext>) -> Self {
        Self {
            ctx,
            pools: Vec::new(),
        }
    }

    /// Service `queue` with `workers` workers running `stage`
    pub fn add_pool(mut self, queue: impl Into<String>, workers: usize, stage: Arc<dyn Stage>) -> Self {
        self.pools.push(PoolSpec {
            queue: queue.into(),
            workers: workers.max(1),
            stage,
        });
        self
    }

    pub fn pools(&self) -> &[PoolSpec] {
        &self.pools
    }

    /// Spawn every worker
    pub fn start(self) -> RunningPipeline {
        let mut handles = Vec::new();
        for pool in &self.pools {
            log::info!(
                "Starting {} workers on {} ({})",
                pool.workers,
                pool.queue,
                pool.stage.name()
            );
            for index in 0..pool.workers {
                let ctx = self.ctx.clone();
                let queue = pool.queue.clone();
                let stage = pool.stage.clone();
                let current = CurrentItem::default();
                let handle = tokio::spawn(worker_loop(ctx, queue, index, stage, current.clone()));
                handles.push(WorkerHandle { handle, current });
            }
        }
        RunningPipeline {
            handles,
            grace: self.ctx.shutdown_grace(),
        }
    }
}

/// Abort handle of the item task a worker is waiting on
type CurrentItem = Arc<Mutex<Option<AbortHandle>>>;

struct WorkerHandle {
    handle: JoinHandle<()>,
    current: CurrentItem,
}

impl WorkerHandle {
    fn abort(&self) {
        self.handle.abort();
        if let Some(item) = self.current.lock().unwrap_or_else(|p| p.into_inner()).take() {
            item.abort();
        }
    }
}

/// Handles of the spawned workers
pub struct RunningPipeline {
    handles: Vec<WorkerHandle>,
    grace: Duration,
}

impl RunningPipeline {
    pub fn worker_count(&self) -> usize {
        self.handles.len()
    }

    /// Wait for every worker after shutdown was triggered
    ///
    /// Returns false if the grace period ran out first; stragglers and the
    /// items they were running are aborted.
    pub async fn join(mut self) -> bool {
        let total = self.handles.len();
        let workers = &mut self.handles;

        let wait_all = async {
            for worker in workers.iter_mut() {
                if let Err(e) = (&mut worker.handle).await {
                    if e.is_panic() {
                        log::error!("Worker panicked outside of a stage: {}", e);
                    }
                }
            }
        };

        match tokio::time::timeout(self.grace, wait_all).await {
            Ok(()) => {
                log::info!("All {} workers stopped", total);
                true
            }
            Err(_) => {
                let pending = self.handles.iter().filter(|w| !w.handle.is_finished()).count();
                log::warn!(
                    "{} of {} workers still running after {:?}; aborting them",
                    pending,
                    total,
                    self.grace
                );
                for worker in &self.handles {
                    worker.abort();
                }
                false
            }
        }
    }
}

async fn worker_loop(
    ctx: Arc<PipelineContext>,
    queue: String,
    index: usize,
    stage: Arc<dyn Stage>,
    current: CurrentItem,
) {
    log::debug!("Worker {}#{} started", queue, index);
    let timeout = ctx.pop_timeout();

    while !ctx.shutdown.is_shutdown() {
        let payload = match ctx.queues.pop(&queue, timeout).await {
            Ok(Some(payload)) => payload,
            Ok(None) => continue,
            Err(e) => {
                log::error!("Pop from {} failed: {:#}", queue, e);
                tokio::select! {
                    _ = tokio::time::sleep(timeout) => {}
                    _ = ctx.shutdown.cancelled() => {}
                }
                continue;
            }
        };

        run_item(&ctx, &queue, &stage, &current, payload).await;
    }

    log::debug!("Worker {}#{} stopped", queue, index);
}

/// Run one item in its own task so a panic stays contained
///
/// When routing failed after the stage updated the record, the updated record
/// is requeued or dead-lettered in place of the popped payload.
async fn run_item(
    ctx: &PipelineContext,
    queue: &str,
    stage: &Arc<dyn Stage>,
    current: &CurrentItem,
    payload: String,
) {
    let task = {
        let stage = stage.clone();
        let payload = payload.clone();
        tokio::spawn(async move { stage.process(&payload).await })
    };
    *current.lock().unwrap_or_else(|p| p.into_inner()) = Some(task.abort_handle());

    let result = task.await;
    current.lock().unwrap_or_else(|p| p.into_inner()).take();

    match result {
        Ok(Ok(())) => {}
        Ok(Err(e)) if is_cancelled(&e) => {
            log::info!("{} interrupted by shutdown; returning item to {}", stage.name(), queue);
            let payload = unrouted_payload(&e).map_or(payload, str::to_string);
            ctx.requeue(queue, payload).await;
        }
        Ok(Err(e)) => {
            log::error!("{} failed on item from {}: {:#}", stage.name(), queue, e);
            let payload = unrouted_payload(&e).map_or(payload, str::to_string);
            ctx.dead_letter(queue, payload).await;
        }
        Err(e) => {
            log::error!("{} panicked on item from {}: {}", stage.name(), queue, e);
            ctx.dead_letter(queue, payload).await;
        }
    }
}
