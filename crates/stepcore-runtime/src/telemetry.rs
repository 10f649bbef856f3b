use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::info;

/// One telemetry event
#[derive(Debug, Clone, Serialize)]
pub struct TelemetryRecord {
    pub area: String,
    pub feature: String,
    pub data: Value,
    pub timestamp: DateTime<Utc>,
}

impl TelemetryRecord {
    pub fn new(area: &str, feature: &str, data: Value) -> Self {
        Self {
            area: area.to_string(),
            feature: feature.to_string(),
            data,
            timestamp: Utc::now(),
        }
    }
}

/// Best-effort telemetry channel; callers log failures and move on
pub trait TelemetryPublisher: Send + Sync {
    fn publish(&self, record: TelemetryRecord) -> Result<()>;
}

/// Emits telemetry as structured tracing events
pub struct TracingTelemetry;

impl TelemetryPublisher for TracingTelemetry {
    fn publish(&self, record: TelemetryRecord) -> Result<()> {
        let data = serde_json::to_string(&record.data)?;
        info!(
            target: "telemetry",
            area = %record.area,
            feature = %record.feature,
            timestamp = %record.timestamp.to_rfc3339(),
            data = %data,
            "telemetry published"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tracing_telemetry_accepts_record() {
        let record = TelemetryRecord::new(
            "PipelinesTasks",
            "ContainerHookManager",
            json!({"hookScriptPath": "/hooks/index.js"}),
        );
        assert!(TracingTelemetry.publish(record).is_ok());
    }
}
