//! Acknowledgment envelope shared by all commands

use serde::{Deserialize, Serialize};

/// Machine-readable error code attached to some failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCode {
    /// The device is already handling a call
    Busy,
}

/// Acknowledgment of a command
///
/// `{"type":"success"}` or `{"type":"success","result":T}` on success,
/// `{"type":"error","result":"<message>","code":"busy"}` on failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DeviceResponse<T> {
    Success {
        #[serde(default = "none", skip_serializing_if = "Option::is_none")]
        result: Option<T>,
    },
    Error {
        result: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<ErrorCode>,
    },
}

fn none<T>() -> Option<T> {
    None
}

/// A failed acknowledgment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub message: String,
    pub code: Option<ErrorCode>,
}

impl Rejection {
    pub fn is_busy(&self) -> bool {
        self.code == Some(ErrorCode::Busy)
    }
}

impl<T> DeviceResponse<T> {
    pub fn ok() -> Self {
        DeviceResponse::Success { result: None }
    }

    pub fn success(result: T) -> Self {
        DeviceResponse::Success {
            result: Some(result),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        DeviceResponse::Error {
            result: message.into(),
            code: None,
        }
    }

    pub fn busy(message: impl Into<String>) -> Self {
        DeviceResponse::Error {
            result: message.into(),
            code: Some(ErrorCode::Busy),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, DeviceResponse::Success { .. })
    }

    /// Split into the success payload (if any) or the rejection
    pub fn into_result(self) -> Result<Option<T>, Rejection> {
        match self {
            DeviceResponse::Success { result } => Ok(result),
            DeviceResponse::Error { result, code } => Err(Rejection {
                message: result,
                code,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_success_without_result() {
        let resp: DeviceResponse<()> = serde_json::from_value(json!({ "type": "success" })).unwrap();
        assert_eq!(resp.into_result(), Ok(None));
    }

    #[test]
    fn test_success_with_result() {
        let resp: DeviceResponse<String> =
            serde_json::from_value(json!({ "type": "success", "result": "ABCD-EFGH" })).unwrap();
        assert_eq!(resp.into_result(), Ok(Some("ABCD-EFGH".to_string())));
    }

    #[test]
    fn test_busy_error() {
        let resp: DeviceResponse<()> = serde_json::from_value(json!({
            "type": "error",
            "result": "already in a call",
            "code": "busy"
        }))
        .unwrap();
        let rejection = resp.into_result().unwrap_err();
        assert!(rejection.is_busy());
        assert_eq!(rejection.message, "already in a call");
    }

    #[test]
    fn test_error_serializes_without_code() {
        let value = serde_json::to_value(DeviceResponse::<()>::error("nope")).unwrap();
        assert_eq!(value, json!({ "type": "error", "result": "nope" }));
    }

    #[test]
    fn test_unknown_type_rejected() {
        let resp: Result<DeviceResponse<()>, _> =
            serde_json::from_value(json!({ "type": "pending" }));
        assert!(resp.is_err());
    }

    proptest! {
        #[test]
        fn error_message_preserved(message in ".{0,64}", busy: bool) {
            let resp = if busy {
                DeviceResponse::<()>::busy(message.clone())
            } else {
                DeviceResponse::<()>::error(message.clone())
            };
            let value = serde_json::to_value(&resp).unwrap();
            let decoded: DeviceResponse<()> = serde_json::from_value(value).unwrap();
            let rejection = decoded.into_result().unwrap_err();
            prop_assert_eq!(rejection.is_busy(), busy);
            prop_assert_eq!(&rejection.message, &message);
        }
    }
}
