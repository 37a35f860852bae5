// ── Parameter entity ──

use serde::{Deserialize, Serialize};

use super::device_id::DeviceId;

/// The wire-level type tag carried alongside every parameter value.
/// Values are always stored as a canonical string; numeric conversions
/// happen at the boundary (operator call-in, device wire format).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ParamType {
    String,
    Int,
    UnsignedInt,
    Boolean,
    DateTime,
    Base64,
}

impl ParamType {
    /// Validate that `value` round-trips for this type. Used by
    /// `setParameters` before handing the value to an engine.
    #[must_use]
    pub fn validate(self, value: &str) -> bool {
        match self {
            Self::String | Self::Base64 | Self::DateTime => true,
            Self::Int => value.parse::<i64>().is_ok(),
            Self::UnsignedInt => value.parse::<u64>().is_ok(),
            Self::Boolean => matches!(value, "true" | "false" | "0" | "1"),
        }
    }
}

/// (DeviceId, Path, Value, Type, Writable, LastUpdate). `(DeviceId,
/// Path)` is unique within the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Parameter {
    pub device_id: DeviceId,
    pub path: String,
    pub value: String,
    pub param_type: ParamType,
    pub writable: bool,
    pub last_update: chrono::DateTime<chrono::Utc>,
}

impl Parameter {
    #[must_use]
    pub fn key(&self) -> String {
        format!("{}|{}", self.device_id.canonical(), self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boolean_validates_canonical_and_numeric_forms() {
        assert!(ParamType::Boolean.validate("true"));
        assert!(ParamType::Boolean.validate("0"));
        assert!(!ParamType::Boolean.validate("yes"));
    }

    #[test]
    fn unsigned_int_rejects_negative() {
        assert!(!ParamType::UnsignedInt.validate("-1"));
        assert!(ParamType::UnsignedInt.validate("42"));
    }

    #[test]
    fn parameter_key_combines_device_and_path() {
        let p = Parameter {
            device_id: DeviceId::modern_agent("a1"),
            path: "Device.Foo".into(),
            value: "1".into(),
            param_type: ParamType::Int,
            writable: true,
            last_update: chrono::Utc::now(),
        };
        assert_eq!(p.key(), "usp::a1|Device.Foo");
    }
}
