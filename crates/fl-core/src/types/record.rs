use crate::event_key::derive_event_key;
use fl_events::LiveEvent;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    Api,
    Stream,
}

impl Origin {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Api => "api",
            Self::Stream => "stream",
        }
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Origin {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "api" => Ok(Self::Api),
            "stream" => Ok(Self::Stream),
            other => Err(format!("unknown origin: {other}")),
        }
    }
}

/// One event as it is persisted. `(resource_id, event_key, event_time)` is
/// the record's identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    pub resource_id: String,
    pub event_key: i64,
    pub event_time: i64,
    pub origin: Origin,
    pub code: String,
    pub value: String,
    pub status: String,
    pub raw: String,
}

impl EventRecord {
    pub fn from_api(resource_id: &str, entry: &Value) -> Self {
        Self {
            resource_id: resource_id.to_string(),
            event_key: int_field(entry, "event_id"),
            event_time: int_field(entry, "event_time"),
            origin: Origin::Api,
            code: text_field(entry, "code"),
            value: text_field(entry, "value"),
            status: text_field(entry, "status"),
            raw: entry.to_string(),
        }
    }

    pub fn from_live(event: &LiveEvent) -> Self {
        let data = event.canonical_data();
        Self {
            resource_id: event.resource_id.clone(),
            event_key: derive_event_key(
                &event.resource_id,
                event.timestamp,
                &event.event_type,
                &data,
            ),
            event_time: event.timestamp,
            origin: Origin::Stream,
            code: event.event_type.clone(),
            value: data,
            status: Origin::Stream.as_str().to_string(),
            raw: event.raw.to_string(),
        }
    }

    pub fn identity(&self) -> (&str, i64, i64) {
        (&self.resource_id, self.event_key, self.event_time)
    }
}

fn int_field(entry: &Value, key: &str) -> i64 {
    match entry.get(key) {
        Some(Value::Number(number)) => number.as_i64().unwrap_or_default(),
        Some(Value::String(text)) => text.trim().parse().unwrap_or_default(),
        _ => 0,
    }
}

fn text_field(entry: &Value, key: &str) -> String {
    match entry.get(key) {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(text)) => text.clone(),
        Some(other) => other.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredRecord {
    #[serde(flatten)]
    pub record: EventRecord,
    pub ingested_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bookmark {
    pub resource_id: String,
    pub last_event_time: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordFilter {
    pub resource_id: Option<String>,
    pub start_time: Option<i64>,
    pub end_time: Option<i64>,
    pub code: Option<String>,
    pub limit: u32,
    pub offset: u32,
}

impl Default for RecordFilter {
    fn default() -> Self {
        Self {
            resource_id: None,
            start_time: None,
            end_time: None,
            code: None,
            limit: 100,
            offset: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    pub total_records: u64,
    pub total_resources: u64,
    pub total_runs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventSummary {
    pub resource_id: String,
    pub event_type: String,
    pub data: Value,
    pub timestamp: i64,
    pub stored: bool,
}

impl EventSummary {
    pub fn new(event: &LiveEvent, stored: bool) -> Self {
        Self {
            resource_id: event.resource_id.clone(),
            event_type: event.event_type.clone(),
            data: event.data.clone(),
            timestamp: event.timestamp,
            stored,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fl_events::RawMessage;
    use serde_json::json;

    #[test]
    fn api_entry_maps_fields_leniently() {
        let entry = json!({
            "event_id": 7,
            "event_time": 1_700_000_001_000_i64,
            "event_from": "1",
            "code": "switch_1",
            "value": true,
            "status": 1
        });
        let record = EventRecord::from_api("dev1", &entry);
        assert_eq!(record.identity(), ("dev1", 7, 1_700_000_001_000));
        assert_eq!(record.origin, Origin::Api);
        assert_eq!(record.code, "switch_1");
        assert_eq!(record.value, "true");
        assert_eq!(record.status, "1");
        assert_eq!(serde_json::from_str::<Value>(&record.raw).unwrap(), entry);
    }

    #[test]
    fn api_entry_defaults_missing_fields() {
        let record = EventRecord::from_api("dev1", &json!({ "event_id": "12" }));
        assert_eq!(record.event_key, 12);
        assert_eq!(record.event_time, 0);
        assert!(record.code.is_empty());
        assert!(record.value.is_empty());
    }

    #[test]
    fn live_event_maps_to_stream_record() {
        let event = LiveEvent::decode(&RawMessage::new(
            "m-1",
            r#"{"bizCode":"dp_report","devId":"dev1","data":{"b":2,"a":1},"ts":1000}"#,
        ))
        .unwrap();
        let record = EventRecord::from_live(&event);
        assert_eq!(record.origin, Origin::Stream);
        assert_eq!(record.event_time, 1000);
        assert_eq!(record.code, "dp_report");
        assert_eq!(record.value, r#"{"a":1,"b":2}"#);
        assert_eq!(record.status, "stream");
        assert!(record.event_key >= 0);
    }

    #[test]
    fn origin_round_trips_through_text() {
        for origin in [Origin::Api, Origin::Stream] {
            assert_eq!(origin.as_str().parse::<Origin>().unwrap(), origin);
        }
        assert!("ws".parse::<Origin>().is_err());
    }
}
