//! Structured events emitted by the codec scripts.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One JSON object parsed from a single output line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FlowEvent(Map<String, Value>);

impl FlowEvent {
    /// Parse one output line.
    ///
    /// Returns `None` for blank lines and for anything that is not a JSON
    /// object. Scripts interleave events with plain log output, so this is
    /// the normal way noise is filtered out, not an error.
    pub fn parse_line(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        match serde_json::from_str::<Value>(line) {
            Ok(Value::Object(map)) => Some(Self(map)),
            _ => None,
        }
    }

    /// The `type` discriminator.
    pub fn event_type(&self) -> Option<&str> {
        self.str_field("type")
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Field value, with JSON `null` treated as absent.
    pub fn value(&self, key: &str) -> Option<Value> {
        self.0.get(key).filter(|v| !v.is_null()).cloned()
    }

    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    /// Numeric field; numeric strings are accepted.
    pub fn f64_field(&self, key: &str) -> Option<f64> {
        let value = match self.0.get(key)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        };
        value.filter(|v| v.is_finite())
    }

    /// Non-negative integer field. Floats are truncated and numeric strings
    /// are accepted.
    pub fn u64_field(&self, key: &str) -> Option<u64> {
        match self.0.get(key)? {
            Value::Number(n) => n
                .as_u64()
                .or_else(|| n.as_f64().filter(|f| f.is_finite() && *f >= 0.0).map(|f| f as u64)),
            Value::String(s) => s.trim().parse::<u64>().ok(),
            _ => None,
        }
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }
}

impl From<Map<String, Value>> for FlowEvent {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// First event of `event_type` in `events`.
pub fn find_by_type<'a>(events: &'a [FlowEvent], event_type: &str) -> Option<&'a FlowEvent> {
    events
        .iter()
        .find(|event| event.event_type() == Some(event_type))
}

/// Point query over the event log.
///
/// Finds the first event whose `type` is `event_type` and whose `key` field
/// equals `key`, and returns its `field` (defaulting to `key` itself).
/// Absent matches and absent fields both yield `None`.
pub fn find_keyed_value(
    events: &[FlowEvent],
    event_type: &str,
    key: &str,
    field: Option<&str>,
) -> Option<Value> {
    events
        .iter()
        .find(|event| event.event_type() == Some(event_type) && event.str_field("key") == Some(key))
        .and_then(|event| event.value(field.unwrap_or(key)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(value: Value) -> FlowEvent {
        match value {
            Value::Object(map) => FlowEvent::from(map),
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn test_parse_line_object() {
        let event = FlowEvent::parse_line(r#"  {"type": "decode", "batch_index": 3}  "#).unwrap();
        assert_eq!(event.event_type(), Some("decode"));
        assert_eq!(event.u64_field("batch_index"), Some(3));
    }

    #[test]
    fn test_parse_line_noise() {
        assert!(FlowEvent::parse_line("").is_none());
        assert!(FlowEvent::parse_line("   ").is_none());
        assert!(FlowEvent::parse_line("Loading checkpoint...").is_none());
        assert!(FlowEvent::parse_line("[1, 2, 3]").is_none());
        assert!(FlowEvent::parse_line("42").is_none());
        assert!(FlowEvent::parse_line(r#"{"type": "decode""#).is_none());
    }

    #[test]
    fn test_numeric_coercion() {
        let event = event(json!({
            "a": "7",
            "b": 7.9,
            "c": -1,
            "d": "1.5",
            "e": null,
            "f": "x",
        }));

        assert_eq!(event.u64_field("a"), Some(7));
        assert_eq!(event.u64_field("b"), Some(7));
        assert_eq!(event.u64_field("c"), None);
        assert_eq!(event.f64_field("d"), Some(1.5));
        assert_eq!(event.f64_field("e"), None);
        assert_eq!(event.f64_field("f"), None);
        assert_eq!(event.value("e"), None);
    }

    #[test]
    fn test_find_keyed_value_first_match() {
        let events = vec![
            event(json!({"type": "encode", "key": "target_size", "target_size": 10, "reconstruction_size": 4})),
            event(json!({"type": "encode", "key": "target_size", "target_size": 99})),
            event(json!({"type": "decode", "key": "device_used", "device_used": "cpu"})),
        ];

        assert_eq!(
            find_keyed_value(&events, "encode", "target_size", None),
            Some(json!(10))
        );
        assert_eq!(
            find_keyed_value(&events, "encode", "target_size", Some("reconstruction_size")),
            Some(json!(4))
        );
        // Type must match exactly.
        assert_eq!(find_keyed_value(&events, "encode", "device_used", None), None);
        assert_eq!(find_keyed_value(&[], "encode", "target_size", None), None);
    }
}
