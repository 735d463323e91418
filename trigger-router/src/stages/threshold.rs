//! Usage queue -> write-db or fusion queue
//!
//! Downloads the capture for the record, scans the configured signals and
//! checks them against the queue's ordered threshold list.

use crate::config::SignalThreshold;
use crate::error::non_retryable;
use crate::pipeline::PipelineContext;
use crate::pool::Stage;
use crate::record::TriggerRecord;
use crate::sources::CanFileSource;
use anyhow::{Context, Result};
use async_trait::async_trait;
use can_signal_decoder::{Decoder, SignalTable};
use std::sync::Arc;

/// Result of checking a signal table against a threshold list
#[derive(Debug, Clone, PartialEq)]
pub enum ThresholdVerdict {
    Exceeded {
        /// 1-based position in the threshold list
        index: usize,
        timestamp: i64,
        name: String,
        signal: String,
        value: f64,
        threshold: f64,
    },
    NotExceeded,
}

impl ThresholdVerdict {
    pub fn is_exceeded(&self) -> bool {
        matches!(self, Self::Exceeded { .. })
    }

    /// Human-readable evidence for the audit trail
    pub fn evidence(&self) -> String {
        match self {
            Self::Exceeded {
                timestamp,
                name,
                signal,
                value,
                threshold,
                ..
            } => format!(
                "signal {} ({}) = {} exceeds threshold {} at {}",
                name, signal, value, threshold, timestamp
            ),
            Self::NotExceeded => "no threshold exceeded".to_string(),
        }
    }

    /// Copy the verdict onto the record's stage fields
    pub fn apply(&self, record: &mut TriggerRecord) {
        match self {
            Self::Exceeded { index, name, .. } => {
                record.is_crash = Some(*index);
                record.crash_reason = Some(name.clone());
            }
            Self::NotExceeded => {
                record.is_crash = Some(0);
                record.crash_reason = None;
            }
        }
        record.threshold_log = Some(self.evidence());
    }
}

/// Scan timestamps in ascending order and thresholds in declared order;
/// the first value strictly above its threshold wins
///
/// A signal missing at a timestamp is skipped.
pub fn evaluate(table: &SignalTable, thresholds: &[SignalThreshold]) -> ThresholdVerdict {
    for (timestamp, signals) in table.rows() {
        for (position, threshold) in thresholds.iter().enumerate() {
            let Some(value) = signals.get(&threshold.signal_name).copied() else {
                continue;
            };
            if value > threshold.threshold {
                return ThresholdVerdict::Exceeded {
                    index: position + 1,
                    timestamp,
                    name: threshold.name.clone(),
                    signal: threshold.signal_name.clone(),
                    value,
                    threshold: threshold.threshold,
                };
            }
        }
    }
    ThresholdVerdict::NotExceeded
}

pub struct ThresholdStage {
    ctx: Arc<PipelineContext>,
    decoder: Arc<Decoder>,
    source: Arc<dyn CanFileSource>,
    thresholds: Arc<Vec<SignalThreshold>>,
    name: String,
}

impl ThresholdStage {
    pub fn new(
        ctx: Arc<PipelineContext>,
        queue: &str,
        decoder: Arc<Decoder>,
        source: Arc<dyn CanFileSource>,
        thresholds: Vec<SignalThreshold>,
    ) -> Self {
        Self {
            ctx,
            decoder,
            source,
            thresholds: Arc::new(thresholds),
            name: format!("threshold[{}]", queue),
        }
    }

    async fn scan(&self, record: &TriggerRecord) -> Result<SignalTable> {
        let source = self.source.clone();
        let (vin, timestamp) = (record.vin.clone(), record.timestamp);
        let file = self
            .ctx
            .retry
            .run(&self.ctx.shutdown, "fetch CAN file", || {
                let source = source.clone();
                let vin = vin.clone();
                async move { source.fetch(&vin, timestamp).await }
            })
            .await?;

        let decoder = self.decoder.clone();
        let targets: Vec<String> = self
            .thresholds
            .iter()
            .map(|t| t.signal_name.clone())
            .collect();
        let scan_file = file.clone();

        let scanned = tokio::task::spawn_blocking(move || {
            let result = decoder.scan_log(&scan_file.path, &targets);
            scan_file.release();
            result
        })
        .await
        .context("capture scan task failed")?;

        scanned
            .map_err(non_retryable)
            .with_context(|| format!("failed to scan capture {:?}", file.path))
    }
}

#[async_trait]
impl Stage for ThresholdStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn process(&self, payload: &str) -> Result<()> {
        let mut record = TriggerRecord::from_payload(payload)?;

        let table = self.scan(&record).await?;
        let verdict = evaluate(&table, &self.thresholds);
        verdict.apply(&mut record);

        let queue = if verdict.is_exceeded() {
            log::info!("{}: {}", record.key(), verdict.evidence());
            self.ctx.names.write_db.clone()
        } else {
            log::debug!("{}: no threshold exceeded over {} timestamps", record.key(), table.len());
            self.ctx.names.fusion.clone()
        };

        let transition = self.ctx.advance(&mut record, &queue).await?;
        transition.log_audit(&record);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::test_support::harness;
    use crate::sources::LocalCanFileSource;
    use std::io::Write;

    const DBC: &str = concat!(
        "BO_ 256 Chassis: 2 EPS\n",
        " SG_ angle : 0|8@1+ (1,0) [0|255] \"deg\" VCU\n",
        " SG_ rate : 8|8@1+ (1,0) [0|255] \"deg/s\" VCU\n",
    );

    fn threshold(name: &str, signal: &str, value: f64) -> SignalThreshold {
        SignalThreshold {
            name: name.to_string(),
            signal_name: signal.to_string(),
            threshold: value,
        }
    }

    fn table(lines: &[&str], targets: &[&str]) -> SignalTable {
        let mut decoder = Decoder::new();
        decoder.add_dbc_str(DBC).unwrap();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        for line in lines {
            writeln!(file, "{}", line).unwrap();
        }
        file.flush().unwrap();
        decoder.scan_log(file.path(), targets).unwrap()
    }

    #[test]
    fn test_first_exceeding_timestamp_in_ascending_order() {
        // angle=35 at t=20, angle=10 at t=10
        let table = table(&["(20) can0 100#2300", "(10) can0 100#0A00"], &["angle"]);
        let verdict = evaluate(&table, &[threshold("steering", "angle", 30.0)]);

        match verdict {
            ThresholdVerdict::Exceeded {
                index, timestamp, value, ..
            } => {
                assert_eq!(index, 1);
                assert_eq!(timestamp, 20);
                assert_eq!(value, 35.0);
            }
            other => panic!("expected exceeded, got {other:?}"),
        }
    }

    #[test]
    fn test_declared_order_breaks_ties() {
        let table = table(&["(5) can0 100#FFFF"], &["angle", "rate"]);
        let verdict = evaluate(
            &table,
            &[threshold("rate", "rate", 1.0), threshold("angle", "angle", 1.0)],
        );
        assert!(matches!(verdict, ThresholdVerdict::Exceeded { index: 1, .. }));
    }

    #[test]
    fn test_equal_value_is_not_exceeded() {
        let table = table(&["(5) can0 100#1E00"], &["angle"]);
        let verdict = evaluate(&table, &[threshold("steering", "angle", 30.0)]);
        assert_eq!(verdict, ThresholdVerdict::NotExceeded);
    }

    #[test]
    fn test_missing_signal_is_ignored() {
        let table = table(&["(5) can0 100#FF"], &["angle", "rate"]);
        let verdict = evaluate(
            &table,
            &[threshold("rate", "rate", 1.0), threshold("angle", "angle", 100.0)],
        );
        assert!(matches!(verdict, ThresholdVerdict::Exceeded { index: 2, .. }));
    }

    #[test]
    fn test_apply_sets_record_fields() {
        let mut record = TriggerRecord::new("V", 1, "A", "media", "1");
        ThresholdVerdict::NotExceeded.apply(&mut record);
        assert_eq!(record.is_crash, Some(0));
        assert_eq!(record.threshold_log.as_deref(), Some("no threshold exceeded"));
    }

    fn stage_with_capture(lines: &[&str]) -> (crate::pipeline::test_support::Harness, ThresholdStage, tempfile::TempDir) {
        let h = harness();
        let dir = tempfile::tempdir().unwrap();
        let source = LocalCanFileSource::new(dir.path());
        std::fs::write(source.path_for("VIN1", 1000), lines.join("\n")).unwrap();

        let mut decoder = Decoder::new();
        decoder.add_dbc_str(DBC).unwrap();
        let stage = ThresholdStage::new(
            h.ctx.clone(),
            "production_car_triggers",
            Arc::new(decoder),
            Arc::new(source),
            vec![threshold("steering", "angle", 30.0)],
        );
        (h, stage, dir)
    }

    #[tokio::test]
    async fn test_exceeded_goes_to_write_db() {
        let (h, stage, _dir) = stage_with_capture(&["(10) can0 100#0A00", "(20) can0 100#2300"]);
        let record = TriggerRecord::new("VIN1", 1000, "A", "production", "5");
        stage.process(&record.to_payload().unwrap()).await.unwrap();

        let queued = h.queues.items("write_db_triggers");
        assert_eq!(queued.len(), 1);
        let routed = TriggerRecord::from_payload(&queued[0]).unwrap();
        assert_eq!(routed.is_crash, Some(1));
        assert_eq!(routed.crash_reason.as_deref(), Some("steering"));
        assert!(routed.threshold_log.unwrap().contains("at 20"));
    }

    #[tokio::test]
    async fn test_not_exceeded_goes_to_fusion() {
        let (h, stage, _dir) = stage_with_capture(&["(10) can0 100#0A00"]);
        let record = TriggerRecord::new("VIN1", 1000, "A", "production", "5");
        stage.process(&record.to_payload().unwrap()).await.unwrap();

        assert_eq!(h.queues.items("fusion_car_triggers").len(), 1);
        assert!(h.queues.items("write_db_triggers").is_empty());
    }

    #[tokio::test]
    async fn test_malformed_capture_is_non_retryable() {
        let (_h, stage, _dir) = stage_with_capture(&["(10) can0 100#0A0"]);
        let record = TriggerRecord::new("VIN1", 1000, "A", "production", "5");
        let err = stage.process(&record.to_payload().unwrap()).await.unwrap_err();
        assert!(crate::error::is_non_retryable(&err));
    }
}
