//! The record produced for every labeled field of a poll cycle.
//!
//! On the wire a reading is a flat object: `{label, unit, value, error: false}`
//! on success or `{label, unit, error: "<message>"}` on failure. A value and an
//! error message are never present together.

use serde::{Deserialize, Serialize};

/// One labeled, unit-tagged value (or failure) from a poll cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ReadingRecord", into = "ReadingRecord")]
pub struct Reading {
    /// Public, globally unique field label.
    pub label: String,

    /// Display unit (may be empty for fixture data).
    pub unit: String,

    /// Scaled value or failure message.
    pub outcome: ReadingOutcome,
}

/// Result of reading one field.
#[derive(Debug, Clone, PartialEq)]
pub enum ReadingOutcome {
    /// Decoded and scaled value.
    Value(f64),
    /// Failure message of the request that should have produced the value.
    Error(String),
}

impl Reading {
    /// Create a successful reading.
    pub fn value(label: impl Into<String>, unit: impl Into<String>, value: f64) -> Self {
        Self {
            label: label.into(),
            unit: unit.into(),
            outcome: ReadingOutcome::Value(value),
        }
    }

    /// Create a failed reading.
    pub fn error(label: impl Into<String>, unit: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            unit: unit.into(),
            outcome: ReadingOutcome::Error(message.into()),
        }
    }

    /// The value, if the read succeeded.
    pub fn as_value(&self) -> Option<f64> {
        match self.outcome {
            ReadingOutcome::Value(v) => Some(v),
            ReadingOutcome::Error(_) => None,
        }
    }

    /// The failure message, if the read failed.
    pub fn error_message(&self) -> Option<&str> {
        match &self.outcome {
            ReadingOutcome::Value(_) => None,
            ReadingOutcome::Error(message) => Some(message),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.outcome, ReadingOutcome::Error(_))
    }
}

/// Flat wire shape of a [`Reading`].
#[derive(Serialize, Deserialize)]
struct ReadingRecord {
    label: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    unit: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    value: Option<f64>,
    #[serde(default)]
    error: ErrorField,
}

/// `error` is `false` on success and the failure message otherwise.
#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum ErrorField {
    Flag(bool),
    Message(String),
}

impl Default for ErrorField {
    fn default() -> Self {
        ErrorField::Flag(false)
    }
}

impl From<Reading> for ReadingRecord {
    fn from(reading: Reading) -> Self {
        let (value, error) = match reading.outcome {
            ReadingOutcome::Value(v) => (Some(v), ErrorField::Flag(false)),
            ReadingOutcome::Error(message) => (None, ErrorField::Message(message)),
        };
        Self {
            label: reading.label,
            unit: reading.unit,
            value,
            error,
        }
    }
}

impl TryFrom<ReadingRecord> for Reading {
    type Error = String;

    fn try_from(record: ReadingRecord) -> Result<Self, Self::Error> {
        let outcome = match (record.value, record.error) {
            (_, ErrorField::Message(message)) => ReadingOutcome::Error(message),
            (Some(value), ErrorField::Flag(false)) => ReadingOutcome::Value(value),
            (None, ErrorField::Flag(false)) => {
                return Err(format!(
                    "reading '{}' has neither a value nor an error",
                    record.label
                ));
            }
            (_, ErrorField::Flag(true)) => {
                return Err(format!(
                    "reading '{}' flags an error without a message",
                    record.label
                ));
            }
        };
        Ok(Self {
            label: record.label,
            unit: record.unit,
            outcome,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_serialization() {
        let reading = Reading::value("temp", "°C", 23.5);
        let json = serde_json::to_value(&reading).unwrap();

        assert_eq!(
            json,
            serde_json::json!({ "label": "temp", "unit": "°C", "value": 23.5, "error": false })
        );
    }

    #[test]
    fn test_error_serialization_has_no_value() {
        let reading = Reading::error("temp", "°C", "Timed out after 1000 ms");
        let json = serde_json::to_value(&reading).unwrap();

        assert_eq!(json["error"], "Timed out after 1000 ms");
        assert!(json.get("value").is_none());
    }

    #[test]
    fn test_accessors() {
        let ok = Reading::value("flow", "l/min", 4.2);
        assert_eq!(ok.as_value(), Some(4.2));
        assert!(ok.error_message().is_none());
        assert!(!ok.is_error());

        let failed = Reading::error("flow", "l/min", "Modbus exception: IllegalDataAddress");
        assert_eq!(failed.as_value(), None);
        assert!(failed.is_error());
    }

    #[test]
    fn test_rejects_empty_record() {
        let result: Result<Reading, _> = serde_json::from_str(r#"{"label":"x","error":false}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_fixture_shape_without_unit() {
        let reading: Reading = serde_json::from_str(r#"{"label":"tank","value":12}"#).unwrap();
        assert_eq!(reading.unit, "");
        assert_eq!(reading.as_value(), Some(12.0));
    }
}
