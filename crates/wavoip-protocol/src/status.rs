//! Device, call and media transport status enumerations

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// Connectivity status reported by a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceStatus {
    /// Container is up but the session is not yet open
    #[serde(rename = "UP")]
    Up,
    #[serde(rename = "disconnected")]
    Disconnected,
    #[serde(rename = "close")]
    Close,
    #[serde(rename = "connecting")]
    Connecting,
    /// Session open and ready to place or receive calls
    #[serde(rename = "open")]
    Open,
    #[serde(rename = "error")]
    Error,
    #[serde(rename = "restarting")]
    Restarting,
    /// Device is asleep and must be woken before it can call
    #[serde(rename = "hibernating")]
    Hibernating,
    #[serde(rename = "BUILDING")]
    Building,
    #[serde(rename = "WAITING_PAYMENT")]
    WaitingPayment,
    #[serde(rename = "EXTERNAL_INTEGRATION_ERROR")]
    ExternalIntegrationError,
}

impl DeviceStatus {
    /// All statuses in wire order
    pub const ALL: [DeviceStatus; 11] = [
        DeviceStatus::Up,
        DeviceStatus::Disconnected,
        DeviceStatus::Close,
        DeviceStatus::Connecting,
        DeviceStatus::Open,
        DeviceStatus::Error,
        DeviceStatus::Restarting,
        DeviceStatus::Hibernating,
        DeviceStatus::Building,
        DeviceStatus::WaitingPayment,
        DeviceStatus::ExternalIntegrationError,
    ];

    /// Wire spelling of the status
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceStatus::Up => "UP",
            DeviceStatus::Disconnected => "disconnected",
            DeviceStatus::Close => "close",
            DeviceStatus::Connecting => "connecting",
            DeviceStatus::Open => "open",
            DeviceStatus::Error => "error",
            DeviceStatus::Restarting => "restarting",
            DeviceStatus::Hibernating => "hibernating",
            DeviceStatus::Building => "BUILDING",
            DeviceStatus::WaitingPayment => "WAITING_PAYMENT",
            DeviceStatus::ExternalIntegrationError => "EXTERNAL_INTEGRATION_ERROR",
        }
    }

    /// Whether a device in this status may originate or accept a call
    pub fn is_callable(&self) -> bool {
        matches!(self, DeviceStatus::Open)
    }

    /// Whether the device must be woken up first
    pub fn is_hibernating(&self) -> bool {
        matches!(self, DeviceStatus::Hibernating)
    }

    /// Whether the device is moving between states and may settle shortly
    pub fn is_transitional(&self) -> bool {
        matches!(
            self,
            DeviceStatus::Connecting | DeviceStatus::Restarting | DeviceStatus::Building
        )
    }
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceStatus {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DeviceStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| ProtocolError::InvalidStatus(s.to_string()))
    }
}

/// Lifecycle status of a call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CallStatus {
    /// Initial status of an inbound offer
    Ringing,
    /// Initial status of an outgoing call
    Calling,
    NotAnswered,
    Active,
    Ended,
    Rejected,
    Failed,
    /// The device lost its connection during the call
    Disconnected,
    /// The device is restarting during the call
    DeviceRestarting,
}

impl CallStatus {
    /// All statuses in wire order
    pub const ALL: [CallStatus; 9] = [
        CallStatus::Ringing,
        CallStatus::Calling,
        CallStatus::NotAnswered,
        CallStatus::Active,
        CallStatus::Ended,
        CallStatus::Rejected,
        CallStatus::Failed,
        CallStatus::Disconnected,
        CallStatus::DeviceRestarting,
    ];

    /// Wire spelling of the status
    pub fn as_str(&self) -> &'static str {
        match self {
            CallStatus::Ringing => "RINGING",
            CallStatus::Calling => "CALLING",
            CallStatus::NotAnswered => "NOT_ANSWERED",
            CallStatus::Active => "ACTIVE",
            CallStatus::Ended => "ENDED",
            CallStatus::Rejected => "REJECTED",
            CallStatus::Failed => "FAILED",
            CallStatus::Disconnected => "DISCONNECTED",
            CallStatus::DeviceRestarting => "DEVICE_RESTARTING",
        }
    }

    /// Terminal statuses accept no further transition
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CallStatus::Ended | CallStatus::Rejected | CallStatus::Failed | CallStatus::NotAnswered
        )
    }

    /// Device connectivity surfaced on the call; recoverable
    pub fn is_connectivity(&self) -> bool {
        matches!(self, CallStatus::Disconnected | CallStatus::DeviceRestarting)
    }
}

impl fmt::Display for CallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CallStatus {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CallStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| ProtocolError::InvalidStatus(s.to_string()))
    }
}

/// Connection state of the media transport underneath an active call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_status_wire_spelling() {
        for status in DeviceStatus::ALL {
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{}\"", status.as_str()));
            assert_eq!(status.as_str().parse::<DeviceStatus>().unwrap(), status);
        }
        assert!("OPEN".parse::<DeviceStatus>().is_err());
    }

    #[test]
    fn test_only_open_is_callable() {
        let callable: Vec<_> = DeviceStatus::ALL
            .into_iter()
            .filter(DeviceStatus::is_callable)
            .collect();
        assert_eq!(callable, vec![DeviceStatus::Open]);
    }

    #[test]
    fn test_terminal_call_statuses() {
        let terminal: Vec<_> = CallStatus::ALL
            .into_iter()
            .filter(CallStatus::is_terminal)
            .collect();
        assert_eq!(terminal.len(), 4);
        assert!(!CallStatus::Disconnected.is_terminal());
        assert!(!CallStatus::DeviceRestarting.is_terminal());
        assert!(CallStatus::DeviceRestarting.is_connectivity());
    }

    #[test]
    fn test_call_status_serde() {
        let status: CallStatus = serde_json::from_str("\"NOT_ANSWERED\"").unwrap();
        assert_eq!(status, CallStatus::NotAnswered);
        assert_eq!(
            serde_json::to_string(&CallStatus::DeviceRestarting).unwrap(),
            "\"DEVICE_RESTARTING\""
        );
    }
}
