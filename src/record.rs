use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::field::{ServiceContext, SourceLocation};
use crate::level::Severity;

pub const LABELS_KEY: &str = "logging.googleapis.com/labels";
pub const SOURCE_LOCATION_KEY: &str = "logging.googleapis.com/sourceLocation";
pub const SERVICE_CONTEXT_KEY: &str = "serviceContext";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogRecord {
    pub timestamp: DateTime<Utc>,
    pub severity: Severity,
    pub message: String,
    pub labels: BTreeMap<String, String>,
    pub source_location: Option<SourceLocation>,
    pub service_context: Option<ServiceContext>,
}

impl LogRecord {
    /// Encode the record as a Cloud Logging structured entry.
    ///
    /// **Parameters**
    /// - `timestamp_key`: name of the timestamp field (`"timestamp"` unless
    ///   reconfigured).
    ///
    /// Empty labels and absent source location / service context are omitted.
    pub fn to_cloud_json(&self, timestamp_key: &str) -> Value {
        let mut obj = Map::new();
        obj.insert(
            "severity".to_string(),
            Value::from(self.severity.cloud_severity()),
        );
        obj.insert(
            timestamp_key.to_string(),
            Value::from(self.timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true)),
        );
        obj.insert("message".to_string(), Value::from(self.message.clone()));

        if !self.labels.is_empty() {
            let labels = self
                .labels
                .iter()
                .map(|(k, v)| (k.clone(), Value::from(v.clone())))
                .collect::<Map<_, _>>();
            obj.insert(LABELS_KEY.to_string(), Value::Object(labels));
        }
        if let Some(loc) = &self.source_location {
            if let Ok(v) = serde_json::to_value(loc) {
                obj.insert(SOURCE_LOCATION_KEY.to_string(), v);
            }
        }
        if let Some(ctx) = &self.service_context {
            if let Ok(v) = serde_json::to_value(ctx) {
                obj.insert(SERVICE_CONTEXT_KEY.to_string(), v);
            }
        }
        Value::Object(obj)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn record() -> LogRecord {
        LogRecord {
            timestamp: Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap(),
            severity: Severity::Warn,
            message: "disk almost full".to_string(),
            labels: BTreeMap::new(),
            source_location: None,
            service_context: None,
        }
    }

    #[test]
    fn test_minimal_record() {
        let json = record().to_cloud_json("timestamp");
        assert_eq!(
            json,
            json!({
                "severity": "WARNING",
                "timestamp": "2024-05-01T12:30:00.000000000Z",
                "message": "disk almost full",
            })
        );
    }

    #[test]
    fn test_custom_timestamp_key() {
        let json = record().to_cloud_json("time");
        assert!(json.get("time").is_some());
        assert!(json.get("timestamp").is_none());
    }

    #[test]
    fn test_full_record() {
        let mut rec = record();
        rec.labels.insert("disk".to_string(), "sda1".to_string());
        rec.source_location = Some(SourceLocation::new("src/disk.rs", 40));
        rec.service_context = Some(ServiceContext::new("storage", "1.2.3"));

        let json = rec.to_cloud_json("timestamp");
        assert_eq!(json[LABELS_KEY], json!({"disk": "sda1"}));
        assert_eq!(json[SOURCE_LOCATION_KEY], json!({"file": "src/disk.rs", "line": "40"}));
        assert_eq!(json[SERVICE_CONTEXT_KEY], json!({"service": "storage", "version": "1.2.3"}));
    }
}
