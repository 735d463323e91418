//! Configuration loading and parsing

use crate::record::UsageType;
use crate::retry::RetryPolicy;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Main application configuration (loaded from config.toml)
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    pub queues: QueueNames,
    pub pools: PoolConfig,
    pub retry: RetryPolicy,
    pub storage: StorageConfig,
    pub decoder: DecoderSettings,
    /// Usage queue name -> threshold file
    pub thresholds: BTreeMap<String, PathBuf>,
    pub can_files: CanFilesConfig,
    pub trigger_api: TriggerApiConfig,
    pub alert: AlertConfig,
    pub tasks: TasksConfig,
    pub negative: NegativeConfig,
}

/// The fixed queue namespace
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct QueueNames {
    pub default: String,
    pub production: String,
    pub test_drive: String,
    pub media: String,
    pub internal: String,
    pub write_db: String,
    pub fusion: String,
    pub negative_inbound: String,
}

impl Default for QueueNames {
    fn default() -> Self {
        Self {
            default: "default_triggers".into(),
            production: "production_car_triggers".into(),
            test_drive: "test_drive_car_triggers".into(),
            media: "media_car_triggers".into(),
            internal: "internal_car_triggers".into(),
            write_db: "write_db_triggers".into(),
            fusion: "fusion_car_triggers".into(),
            negative_inbound: "negative_triggers".into(),
        }
    }
}

impl QueueNames {
    pub fn usage_queue(&self, usage: UsageType) -> &str {
        match usage {
            UsageType::Production => &self.production,
            UsageType::TestDrive => &self.test_drive,
            UsageType::Media => &self.media,
            UsageType::Internal => &self.internal,
        }
    }

    /// Usage queues in a fixed order
    pub fn usage_queues(&self) -> Vec<(UsageType, &str)> {
        UsageType::ALL
            .iter()
            .map(|usage| (*usage, self.usage_queue(*usage)))
            .collect()
    }

    /// Queues checked by the depth alert, in a fixed order
    pub fn monitored(&self, threshold: u64) -> Vec<(String, u64)> {
        [
            &self.default,
            &self.production,
            &self.test_drive,
            &self.media,
            &self.internal,
            &self.write_db,
            &self.fusion,
            &self.negative_inbound,
        ]
        .into_iter()
        .map(|name| (name.clone(), threshold))
        .collect()
    }
}

/// Name of the dead-letter queue paired with `queue`
pub fn dead_letter_queue(queue: &str) -> String {
    format!("{}_dead_letter", queue)
}

/// Worker pool sizing
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PoolConfig {
    pub routing_workers: usize,
    pub threshold_workers: usize,
    pub write_db_workers: usize,
    pub negative_workers: usize,
    /// Per-queue overrides by queue name
    pub overrides: BTreeMap<String, usize>,
    pub pop_timeout_ms: u64,
    pub shutdown_grace_secs: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            routing_workers: 10,
            threshold_workers: 10,
            write_db_workers: 2,
            negative_workers: 2,
            overrides: BTreeMap::new(),
            pop_timeout_ms: 1000,
            shutdown_grace_secs: 10,
        }
    }
}

impl PoolConfig {
    /// Pool size for `queue`, never zero
    pub fn size_for(&self, queue: &str, fallback: usize) -> usize {
        self.overrides.get(queue).copied().unwrap_or(fallback).max(1)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Memory,
    Sqlite,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Memory,
            path: PathBuf::from("data/trigger-router.db"),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DecoderSettings {
    pub dbc_path: PathBuf,
    pub download_dir: PathBuf,
}

impl Default for DecoderSettings {
    fn default() -> Self {
        Self {
            dbc_path: PathBuf::from("configs/chassis.dbc"),
            download_dir: PathBuf::from("downloads"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CanFileSourceKind {
    #[default]
    Http,
    Local,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CanFilesConfig {
    pub source: CanFileSourceKind,
    pub local_dir: PathBuf,
}

impl Default for CanFilesConfig {
    fn default() -> Self {
        Self {
            source: CanFileSourceKind::Http,
            local_dir: PathBuf::from("captures"),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TriggerApiConfig {
    pub base_url: String,
    pub from_path: String,
    pub from_method: String,
    pub download_path: String,
    pub download_method: String,
    pub trigger_ids: Vec<i64>,
    pub usage_type: String,
    pub timeout_secs: u64,
}

impl Default for TriggerApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".into(),
            from_path: "/api/v1/triggers".into(),
            from_method: "POST".into(),
            download_path: "/api/v1/trigger/files".into(),
            download_method: "POST".into(),
            trigger_ids: Vec::new(),
            usage_type: String::new(),
            timeout_secs: 30,
        }
    }
}

impl TriggerApiConfig {
    pub fn from_url(&self) -> String {
        join_url(&self.base_url, &self.from_path)
    }

    pub fn download_url(&self) -> String {
        join_url(&self.base_url, &self.download_path)
    }
}

fn join_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AlertConfig {
    pub webhook_url: Option<String>,
    pub queue_threshold: u64,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            queue_threshold: 1000,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TasksConfig {
    pub fetch_interval_secs: u64,
    pub alert_interval_secs: u64,
    pub fetch_start_delay_secs: Option<u64>,
}

impl Default for TasksConfig {
    fn default() -> Self {
        Self {
            fetch_interval_secs: 300,
            alert_interval_secs: 300,
            fetch_start_delay_secs: None,
        }
    }
}

/// Negative-trigger routing table
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct NegativeConfig {
    pub default_queue: String,
    /// "<car_type>_<usage_type>" -> queue name
    pub routes: BTreeMap<String, String>,
}

impl Default for NegativeConfig {
    fn default() -> Self {
        let mut routes = BTreeMap::new();
        for car_type in ["A", "B", "C"] {
            for usage in UsageType::ALL {
                let key = format!("{}_{}", car_type, usage.code());
                routes.insert(key.clone(), format!("negative_trigger_{}", key));
            }
        }
        Self {
            default_queue: "negative_trigger_default".into(),
            routes,
        }
    }
}

/// One entry of a threshold file
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SignalThreshold {
    /// Display name used in evidence strings
    pub name: String,
    pub signal_name: String,
    pub threshold: f64,
}

#[derive(Debug, Deserialize)]
struct ThresholdFile {
    #[serde(default)]
    signals: Vec<SignalThreshold>,
}

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config: AppConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    config.validate()?;
    Ok(config)
}

/// Load an ordered threshold list
pub fn load_threshold_config(path: &Path) -> Result<Vec<SignalThreshold>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read threshold file: {:?}", path))?;

    let file: ThresholdFile = toml::from_str(&content)
        .with_context(|| format!("Failed to parse threshold file: {:?}", path))?;

    if file.signals.is_empty() {
        bail!("Threshold file {:?} defines no signals", path);
    }
    Ok(file.signals)
}

impl AppConfig {
    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        let usage_queues: Vec<&str> = self.queues.usage_queues().into_iter().map(|(_, q)| q).collect();
        for queue in self.thresholds.keys() {
            if !usage_queues.contains(&queue.as_str()) {
                bail!("[thresholds] entry '{}' is not a usage queue", queue);
            }
        }
        if self.pools.pop_timeout_ms == 0 {
            bail!("[pools] pop_timeout_ms must be greater than zero");
        }
        if self.tasks.fetch_interval_secs == 0 || self.tasks.alert_interval_secs == 0 {
            bail!("[tasks] intervals must be greater than zero");
        }
        Ok(())
    }
}
