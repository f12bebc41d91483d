//! Live change events published when a consumption row changes.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Event type carried by every consumption change.
pub const CONSUMO_UPDATE: &str = "consumo_update";

/// An application event derived from a database change notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    #[serde(rename = "type")]
    pub kind: String,
    pub data: Value,
}

impl ChangeEvent {
    /// Builds a `consumo_update` event from a raw notification payload.
    pub fn consumo_update(payload: Option<&str>) -> Self {
        Self {
            kind: CONSUMO_UPDATE.to_string(),
            data: parse_payload(payload),
        }
    }
}

/// Parses a notification payload.
///
/// A missing, blank or malformed payload becomes an empty object.
pub fn parse_payload(payload: Option<&str>) -> Value {
    payload
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .and_then(|p| serde_json::from_str(p).ok())
        .unwrap_or_else(|| Value::Object(Map::new()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_consumo_update_from_payload() {
        let event = ChangeEvent::consumo_update(Some(r#"{"codigo":5,"lectura":100}"#));
        assert_eq!(event.kind, "consumo_update");
        assert_eq!(event.data, json!({ "codigo": 5, "lectura": 100 }));
    }

    #[test]
    fn test_event_serializes_type_field() {
        let event = ChangeEvent::consumo_update(Some(r#"{"codigo":5}"#));
        let text = serde_json::to_string(&event).unwrap();
        assert_eq!(text, r#"{"type":"consumo_update","data":{"codigo":5}}"#);
    }

    #[test]
    fn test_missing_or_empty_payload_is_empty_object() {
        assert_eq!(parse_payload(None), json!({}));
        assert_eq!(parse_payload(Some("")), json!({}));
        assert_eq!(parse_payload(Some("   ")), json!({}));
    }

    #[test]
    fn test_malformed_payload_is_empty_object() {
        assert_eq!(parse_payload(Some("{not json")), json!({}));
    }
}
