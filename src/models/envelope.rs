use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::FleetError;

/// Response envelope returned by every engine operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub success: bool,
    pub message: String,
    pub data: Value,
}

impl Envelope {
    pub fn ok(message: impl Into<String>, data: impl Serialize) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: serde_json::to_value(data).unwrap_or(Value::Null),
        }
    }

    pub fn from_error(err: &FleetError) -> Self {
        Self {
            success: false,
            message: err.to_string(),
            data: Value::Null,
        }
    }

    /// Collapse a fallible operation into an envelope
    pub fn from_result<T: Serialize>(
        message: impl Into<String>,
        result: crate::error::Result<T>,
    ) -> Self {
        match result {
            Ok(data) => Self::ok(message, data),
            Err(e) => Self::from_error(&e),
        }
    }

    /// Flatten an operation that already produced an envelope on success
    pub fn settle(result: crate::error::Result<Envelope>) -> Self {
        result.unwrap_or_else(|e| Self::from_error(&e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_envelope_shapes() {
        let ok = Envelope::ok("done", json!({"server_id": 3}));
        assert!(ok.success);
        assert_eq!(ok.data["server_id"], 3);

        let err = Envelope::from_result::<()>(
            "ignored",
            Err(FleetError::Capacity("no healthy servers".into())),
        );
        assert!(!err.success);
        assert!(err.message.contains("no healthy servers"));
        assert_eq!(err.data, Value::Null);
    }
}
