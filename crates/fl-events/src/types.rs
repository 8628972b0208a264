use crate::error::FeedError;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    pub message_id: String,
    pub payload: Option<String>,
}

impl RawMessage {
    pub fn new(message_id: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
            payload: Some(payload.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveEvent {
    pub event_type: String,
    pub resource_id: String,
    pub product_id: String,
    pub data: Value,
    pub timestamp: i64,
    #[serde(skip)]
    pub raw: Value,
}

#[derive(Debug, Deserialize)]
struct WirePayload {
    #[serde(rename = "bizCode")]
    biz_code: Option<String>,
    #[serde(rename = "devId", default)]
    dev_id: String,
    #[serde(rename = "productKey", default)]
    product_key: String,
    #[serde(default = "empty_object")]
    data: Value,
    ts: Option<i64>,
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

impl LiveEvent {
    pub fn decode(message: &RawMessage) -> Result<Self, FeedError> {
        let Some(payload) = message.payload.as_deref().filter(|value| !value.is_empty()) else {
            return Err(FeedError::Decode {
                message: format!("message {} has no payload", message.message_id),
            });
        };
        let raw: Value = serde_json::from_str(payload).map_err(|err| FeedError::Decode {
            message: err.to_string(),
        })?;
        if !raw.is_object() {
            return Err(FeedError::Decode {
                message: format!("message {} payload is not an object", message.message_id),
            });
        }
        let wire: WirePayload =
            serde_json::from_value(raw.clone()).map_err(|err| FeedError::Decode {
                message: err.to_string(),
            })?;
        if wire.dev_id.trim().is_empty() {
            return Err(FeedError::Decode {
                message: format!("message {} has no devId", message.message_id),
            });
        }
        let data = match wire.data {
            Value::Object(map) => Value::Object(map),
            other => {
                let mut map = Map::new();
                map.insert("value".to_string(), other);
                Value::Object(map)
            }
        };
        Ok(Self {
            event_type: wire.biz_code.unwrap_or_else(|| "unknown".to_string()),
            resource_id: wire.dev_id,
            product_id: wire.product_key,
            data,
            timestamp: wire.ts.unwrap_or_else(|| Utc::now().timestamp_millis()),
            raw,
        })
    }

    pub fn canonical_data(&self) -> String {
        canonical_json(&self.data)
    }
}

pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|left, right| left.0.cmp(right.0));
            out.push('{');
            for (index, (key, item)) in entries.into_iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(item, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (index, item) in items.iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        other => out.push_str(&other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_wire_payload() {
        let message = RawMessage::new(
            "m-1",
            r#"{"bizCode":"dp_report","devId":"dev1","productKey":"p1","data":{"switch":true},"ts":1700000000000}"#,
        );
        let event = LiveEvent::decode(&message).unwrap();
        assert_eq!(event.event_type, "dp_report");
        assert_eq!(event.resource_id, "dev1");
        assert_eq!(event.product_id, "p1");
        assert_eq!(event.data, json!({ "switch": true }));
        assert_eq!(event.timestamp, 1_700_000_000_000);
        assert_eq!(event.raw["devId"], "dev1");
    }

    #[test]
    fn wraps_non_object_data_and_defaults_event_type() {
        let message = RawMessage::new("m-2", r#"{"devId":"dev1","data":42,"ts":5}"#);
        let event = LiveEvent::decode(&message).unwrap();
        assert_eq!(event.event_type, "unknown");
        assert_eq!(event.data, json!({ "value": 42 }));
    }

    #[test]
    fn missing_timestamp_uses_current_time() {
        let before = Utc::now().timestamp_millis();
        let message = RawMessage::new("m-3", r#"{"devId":"dev1"}"#);
        let event = LiveEvent::decode(&message).unwrap();
        assert!(event.timestamp >= before);
        assert_eq!(event.data, json!({}));
    }

    #[test]
    fn rejects_missing_or_malformed_payload() {
        let empty = RawMessage {
            message_id: "m-4".to_string(),
            payload: None,
        };
        assert!(matches!(
            LiveEvent::decode(&empty),
            Err(FeedError::Decode { .. })
        ));
        let garbage = RawMessage::new("m-5", "{not json");
        assert!(matches!(
            LiveEvent::decode(&garbage),
            Err(FeedError::Decode { .. })
        ));
        let scalar = RawMessage::new("m-6", "17");
        assert!(matches!(
            LiveEvent::decode(&scalar),
            Err(FeedError::Decode { .. })
        ));
    }

    #[test]
    fn rejects_payload_without_device_id() {
        let missing = RawMessage::new("m-8", r#"{"bizCode":"online","ts":1000,"data":{}}"#);
        assert!(matches!(
            LiveEvent::decode(&missing),
            Err(FeedError::Decode { .. })
        ));
        let blank = RawMessage::new("m-9", r#"{"bizCode":"online","devId":" ","ts":1000}"#);
        assert!(matches!(
            LiveEvent::decode(&blank),
            Err(FeedError::Decode { .. })
        ));
    }

    #[test]
    fn canonical_json_sorts_nested_keys() {
        let left = json!({ "b": 1, "a": { "z": [1, { "y": 2, "x": 3 }], "c": "s" } });
        assert_eq!(
            canonical_json(&left),
            r#"{"a":{"c":"s","z":[1,{"x":3,"y":2}]},"b":1}"#
        );
    }

    #[test]
    fn serialized_event_omits_raw_payload() {
        let message = RawMessage::new("m-7", r#"{"bizCode":"online","devId":"dev9","ts":10}"#);
        let event = LiveEvent::decode(&message).unwrap();
        let value: Value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["resource_id"], "dev9");
        assert!(value.get("raw").is_none());
    }
}
