//! Scheduled task runner
//!
//! Each registered task waits its optional start delay, runs once, then runs on
//! every interval tick until it is stopped. A failing run is logged and
//! recorded in the task's state; the task keeps ticking.

use crate::shutdown::{Shutdown, ShutdownSignal};
use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// A unit of periodic work
#[async_trait]
pub trait Job: Send + Sync + 'static {
    async fn run(&self, signal: &ShutdownSignal) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Ready,
    Running,
    Error,
    Stopped,
}

/// Bookkeeping for one task, readable from outside the task
#[derive(Debug, Clone)]
pub struct TaskState {
    pub status: TaskStatus,
    pub runs: u64,
    pub last_run: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl Default for TaskState {
    fn default() -> Self {
        Self {
            status: TaskStatus::Ready,
            runs: 0,
            last_run: None,
            last_error: None,
        }
    }
}

struct TaskEntry {
    name: String,
    interval: Duration,
    start_delay: Option<Duration>,
    job: Arc<dyn Job>,
    state: Arc<Mutex<TaskState>>,
    stop: Shutdown,
    started: bool,
}

pub struct TaskRunner {
    tasks: BTreeMap<String, TaskEntry>,
    global: ShutdownSignal,
    handles: Vec<JoinHandle<()>>,
}

impl TaskRunner {
    /// Tasks also stop when `global` fires
    pub fn new(global: ShutdownSignal) -> Self {
        Self {
            tasks: BTreeMap::new(),
            global,
            handles: Vec::new(),
        }
    }

    /// Register a task that starts right away
    pub fn add_task(
        &mut self,
        id: &str,
        name: &str,
        interval: Duration,
        job: Arc<dyn Job>,
    ) -> Result<()> {
        self.add_task_with_delay(id, name, interval, None, job)
    }

    /// Register a task that waits `start_delay` before its first run
    pub fn add_task_with_delay(
        &mut self,
        id: &str,
        name: &str,
        interval: Duration,
        start_delay: Option<Duration>,
        job: Arc<dyn Job>,
    ) -> Result<()> {
        if self.tasks.contains_key(id) {
            bail!("task {} already exists", id);
        }
        self.tasks.insert(
            id.to_string(),
            TaskEntry {
                name: name.to_string(),
                interval,
                start_delay,
                job,
                state: Arc::new(Mutex::new(TaskState::default())),
                stop: Shutdown::new(),
                started: false,
            },
        );
        Ok(())
    }

    /// Start every registered task
    ///
    /// Returns the number started and the last failure, if any.
    pub fn start_all(&mut self) -> (usize, Option<anyhow::Error>) {
        let ids: Vec<String> = self.tasks.keys().cloned().collect();
        let mut started = 0;
        let mut last_err = None;

        for id in ids {
            match self.start_task(&id) {
                Ok(()) => started += 1,
                Err(e) => {
                    log::error!("Failed to start task {}: {:#}", id, e);
                    last_err = Some(e);
                }
            }
        }
        (started, last_err)
    }

    pub fn start_task(&mut self, id: &str) -> Result<()> {
        let entry = self
            .tasks
            .get_mut(id)
            .ok_or_else(|| anyhow!("task {} does not exist", id))?;
        if entry.started {
            bail!("task {} already started", id);
        }
        if entry.interval.is_zero() {
            bail!("task {} has a zero interval", id);
        }
        entry.started = true;

        let handle = tokio::spawn(task_loop(
            id.to_string(),
            entry.name.clone(),
            entry.interval,
            entry.start_delay,
            entry.job.clone(),
            entry.state.clone(),
            self.global.clone(),
            entry.stop.signal(),
        ));
        self.handles.push(handle);
        log::info!("Started task {} ({})", id, entry.name);
        Ok(())
    }

    /// Stop one task; repeated calls are no-ops
    pub fn stop_task(&self, id: &str) -> Result<()> {
        let entry = self
            .tasks
            .get(id)
            .ok_or_else(|| anyhow!("task {} does not exist", id))?;
        entry.stop.trigger();
        Ok(())
    }

    /// Stop a task and forget it
    pub fn remove_task(&mut self, id: &str) -> Result<()> {
        self.stop_task(id)?;
        self.tasks.remove(id);
        Ok(())
    }

    /// Stop every task and wait until all of them have exited
    pub async fn stop_all(&mut self) {
        for entry in self.tasks.values() {
            entry.stop.trigger();
        }
        for handle in self.handles.drain(..) {
            if let Err(e) = handle.await {
                log::error!("Task ended abnormally: {}", e);
            }
        }
        log::info!("All scheduled tasks stopped");
    }

    /// Snapshot of a task's bookkeeping
    pub fn state(&self, id: &str) -> Option<TaskState> {
        self.tasks
            .get(id)
            .map(|e| e.state.lock().unwrap_or_else(|p| p.into_inner()).clone())
    }

    pub fn task_ids(&self) -> Vec<String> {
        self.tasks.keys().cloned().collect()
    }
}

#[allow(clippy::too_many_arguments)]
async fn task_loop(
    id: String,
    name: String,
    interval: Duration,
    start_delay: Option<Duration>,
    job: Arc<dyn Job>,
    state: Arc<Mutex<TaskState>>,
    global: ShutdownSignal,
    own: ShutdownSignal,
) {
    set_status(&state, TaskStatus::Running);

    if let Some(delay) = start_delay.filter(|d| !d.is_zero()) {
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = global.cancelled() => return set_status(&state, TaskStatus::Stopped),
            _ = own.cancelled() => return set_status(&state, TaskStatus::Stopped),
        }
    }

    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    run_once(&id, &name, &job, &state, &global).await;
    loop {
        tokio::select! {
            _ = ticker.tick() => run_once(&id, &name, &job, &state, &global).await,
            _ = global.cancelled() => break,
            _ = own.cancelled() => break,
        }
    }

    set_status(&state, TaskStatus::Stopped);
    log::debug!("Task {} stopped", id);
}

async fn run_once(
    id: &str,
    name: &str,
    job: &Arc<dyn Job>,
    state: &Mutex<TaskState>,
    signal: &ShutdownSignal,
) {
    let result = job.run(signal).await;

    let mut state = state.lock().unwrap_or_else(|p| p.into_inner());
    state.runs += 1;
    state.last_run = Some(Utc::now());
    match result {
        Ok(()) => {
            state.status = TaskStatus::Running;
            state.last_error = None;
        }
        Err(e) => {
            log::error!("Task {} ({}) failed: {:#}", id, name, e);
            state.status = TaskStatus::Error;
            state.last_error = Some(format!("{:#}", e));
        }
    }
}

fn set_status(state: &Mutex<TaskState>, status: TaskStatus) {
    state.lock().unwrap_or_else(|p| p.into_inner()).status = status;
}
