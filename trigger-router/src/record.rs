//! Queue payload and audit data model
//!
//! `TriggerRecord` is the JSON payload that travels between queues. Stages add
//! fields as the record advances; fields this version does not know about are
//! carried through untouched.

use crate::error::non_retryable;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Usage classification of a vehicle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UsageType {
    Production,
    TestDrive,
    Media,
    Internal,
}

impl UsageType {
    pub const ALL: [UsageType; 4] = [
        UsageType::Production,
        UsageType::TestDrive,
        UsageType::Media,
        UsageType::Internal,
    ];

    /// Exact match on the wire code; anything else is `None`
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "production" => Some(Self::Production),
            "test_drive" => Some(Self::TestDrive),
            "media" => Some(Self::Media),
            "internal" => Some(Self::Internal),
            _ => None,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Production => "production",
            Self::TestDrive => "test_drive",
            Self::Media => "media",
            Self::Internal => "internal",
        }
    }
}

impl fmt::Display for UsageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Usage code for records whose usage could not be determined
pub const USAGE_NONE: &str = "none";

/// One unit of vehicle-event data flowing through the pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerRecord {
    pub vin: String,
    pub timestamp: i64,
    #[serde(default)]
    pub car_type: String,
    #[serde(default)]
    pub usage_type: String,
    #[serde(default)]
    pub trigger_id: String,
    /// Audit entry id, assigned once on first enqueue
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_id: Option<i64>,
    /// 0 when no threshold was exceeded, otherwise the 1-based threshold index
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_crash: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crash_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold_log: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TriggerRecord {
    pub fn new(
        vin: impl Into<String>,
        timestamp: i64,
        car_type: impl Into<String>,
        usage_type: impl Into<String>,
        trigger_id: impl Into<String>,
    ) -> Self {
        Self {
            vin: vin.into(),
            timestamp,
            car_type: car_type.into(),
            usage_type: usage_type.into(),
            trigger_id: trigger_id.into(),
            log_id: None,
            is_crash: None,
            crash_reason: None,
            threshold_log: None,
            extra: Map::new(),
        }
    }

    /// Parse a queue payload; malformed payloads are not retryable
    pub fn from_payload(payload: &str) -> Result<Self> {
        serde_json::from_str(payload)
            .map_err(non_retryable)
            .context("malformed trigger record payload")
    }

    pub fn to_payload(&self) -> Result<String> {
        serde_json::to_string(self).context("failed to serialize trigger record")
    }

    pub fn usage(&self) -> Option<UsageType> {
        UsageType::from_code(&self.usage_type)
    }

    /// Short identity used in log lines
    pub fn key(&self) -> String {
        format!("{}@{}#{}", self.vin, self.timestamp, self.trigger_id)
    }
}

/// Processing status of an audit entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl ProcessStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Processing => "Processing",
            Self::Completed => "Completed",
            Self::Failed => "Failed",
        }
    }
}

impl fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Audit row for one record's lifecycle (`process_logs`)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditEntry {
    pub id: i64,
    pub vin: String,
    pub trigger_timestamp: i64,
    pub car_type: String,
    pub use_type: String,
    pub trigger_id: String,
    pub process_status: String,
    /// Current stage name
    pub stage: String,
    /// Append-only stage transition log (" -> a -> b")
    pub process_log: String,
}

impl AuditEntry {
    /// A fresh entry for `record`; the id is assigned by the sink
    pub fn for_record(id: i64, record: &TriggerRecord) -> Self {
        Self {
            id,
            vin: record.vin.clone(),
            trigger_timestamp: record.timestamp,
            car_type: record.car_type.clone(),
            use_type: record.usage_type.clone(),
            trigger_id: record.trigger_id.clone(),
            process_status: ProcessStatus::Pending.to_string(),
            stage: String::new(),
            process_log: String::new(),
        }
    }

    /// Apply an update in place
    pub fn apply(&mut self, update: &AuditUpdate) {
        if let Some(status) = update.status {
            self.process_status = status.to_string();
        }
        if let Some(stage) = &update.stage {
            self.stage = stage.clone();
        }
    }
}

/// Fields changed by `AuditSink::update_audit_entry`
///
/// Setting fields is idempotent: applying the same update twice leaves the
/// entry unchanged after the first application.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuditUpdate {
    pub status: Option<ProcessStatus>,
    pub stage: Option<String>,
}

impl AuditUpdate {
    pub fn status(status: ProcessStatus) -> Self {
        Self {
            status: Some(status),
            stage: None,
        }
    }

    pub fn with_stage(mut self, stage: impl Into<String>) -> Self {
        self.stage = Some(stage.into());
        self
    }
}

/// Final persisted record (`data_logs`)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FinalRecord {
    pub vin: String,
    pub trigger_timestamp: i64,
    pub car_type: String,
    pub use_type: String,
    pub trigger_id: String,
    pub is_crash: i64,
    pub crash_reason: String,
    pub criterion_judgment: String,
}

impl From<&TriggerRecord> for FinalRecord {
    fn from(record: &TriggerRecord) -> Self {
        Self {
            vin: record.vin.clone(),
            trigger_timestamp: record.timestamp,
            car_type: record.car_type.clone(),
            use_type: record.usage_type.clone(),
            trigger_id: record.trigger_id.clone(),
            is_crash: record.is_crash.unwrap_or(0) as i64,
            crash_reason: record.crash_reason.clone().unwrap_or_default(),
            criterion_judgment: record.threshold_log.clone().unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::is_non_retryable;

    #[test]
    fn test_usage_type_codes() {
        for usage in UsageType::ALL {
            assert_eq!(UsageType::from_code(usage.code()), Some(usage));
        }
        assert_eq!(UsageType::from_code("unknown_value"), None);
        assert_eq!(UsageType::from_code(""), None);
        assert_eq!(UsageType::from_code("Production"), None);
    }

    #[test]
    fn test_unknown_fields_are_preserved() {
        let payload = r#"{"vin":"LVIN1","timestamp":1700,"car_type":"A","usage_type":"media","trigger_id":"7","log_id":3,"tag":["x"],"source":"api"}"#;
        let record = TriggerRecord::from_payload(payload).unwrap();
        assert_eq!(record.log_id, Some(3));
        assert_eq!(record.usage(), Some(UsageType::Media));
        assert_eq!(record.extra["source"], "api");

        let again: Value = serde_json::from_str(&record.to_payload().unwrap()).unwrap();
        assert_eq!(again["tag"][0], "x");
        assert_eq!(again["log_id"], 3);
        assert!(again.get("is_crash").is_none());
    }

    #[test]
    fn test_missing_optional_fields_default() {
        let record = TriggerRecord::from_payload(r#"{"vin":"V","timestamp":1}"#).unwrap();
        assert_eq!(record.usage_type, "");
        assert!(record.log_id.is_none());
        assert!(record.usage().is_none());
    }

    #[test]
    fn test_malformed_payload_is_non_retryable() {
        let err = TriggerRecord::from_payload("{not json").unwrap_err();
        assert!(is_non_retryable(&err));
    }

    #[test]
    fn test_audit_update_is_idempotent() {
        let record = TriggerRecord::new("V", 1, "A", "production", "9");
        let mut entry = AuditEntry::for_record(1, &record);
        let update = AuditUpdate::status(ProcessStatus::Completed).with_stage("write_db_triggers");

        entry.apply(&update);
        let once = entry.clone();
        entry.apply(&update);
        assert_eq!(entry, once);
        assert_eq!(entry.process_status, "Completed");
    }

    #[test]
    fn test_final_record_from_trigger() {
        let mut record = TriggerRecord::new("V", 10, "B", "internal", "4");
        record.is_crash = Some(2);
        record.crash_reason = Some("yaw".into());
        let row = FinalRecord::from(&record);
        assert_eq!(row.is_crash, 2);
        assert_eq!(row.crash_reason, "yaw");
        assert_eq!(row.criterion_judgment, "");
    }
}
