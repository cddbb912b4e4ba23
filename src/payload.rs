//! Per-call JSON payload
//!
//! Only top-level scalars are consulted; nested values and keys a weapon
//! does not know about are ignored.

use crate::error::{KaboomError, Result};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Default)]
pub struct Payload {
    fields: Map<String, Value>,
}

impl Payload {
    /// Wrap a JSON document; `null` counts as an empty payload
    pub fn new(value: Option<Value>) -> Result<Self> {
        match value {
            None | Some(Value::Null) => Ok(Self::default()),
            Some(Value::Object(fields)) => Ok(Self { fields }),
            Some(other) => Err(KaboomError::InvalidArgument {
                message: format!("payload must be a JSON object, got {}", other),
                hint: Some(r#"e.g. {"signal": 15, "target": "backend"}"#.to_string()),
            }),
        }
    }

    /// Top-level string value
    pub fn str(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }

    /// Top-level integer, or a string holding one
    pub fn int(&self, key: &str) -> Option<i64> {
        match self.fields.get(key)? {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_scalars_are_read() {
        let payload = Payload::new(Some(json!({
            "target": "backend",
            "signal": 15,
            "max_age": "200000",
        })))
        .unwrap();
        assert_eq!(payload.str("target"), Some("backend"));
        assert_eq!(payload.int("signal"), Some(15));
        assert_eq!(payload.int("max_age"), Some(200000));
        assert_eq!(payload.str("missing"), None);
    }

    #[test]
    fn test_nested_values_ignored() {
        let payload = Payload::new(Some(json!({"target": {"kind": "backend"}, "signal": [9]}))).unwrap();
        assert_eq!(payload.str("target"), None);
        assert_eq!(payload.int("signal"), None);
    }

    #[test]
    fn test_null_and_absent_are_empty() {
        assert!(Payload::new(None).unwrap().str("x").is_none());
        assert!(Payload::new(Some(Value::Null)).unwrap().str("x").is_none());
    }

    #[test]
    fn test_non_object_rejected() {
        assert!(Payload::new(Some(json!([1, 2]))).is_err());
        assert!(Payload::new(Some(json!("backend"))).is_err());
    }
}
