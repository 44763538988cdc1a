//! Error types for device sessions and call dispatch

use thiserror::Error;
use wavoip_protocol::{DeviceStatus, DeviceToken, Rejection};

/// Why a device-level operation did not succeed
///
/// The `Display` form is the human-readable reason surfaced to callers.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// No acknowledgment arrived within the configured timeout
    #[error("timeout")]
    Timeout,

    /// The signaling link is closed
    #[error("disconnected")]
    Disconnected,

    /// The device already holds a call or has a start pending
    #[error("device already has a call in progress")]
    InCall,

    /// The device status does not allow calling
    #[error("device is not ready to call (status: {})", status_name(.0))]
    NotCallable(Option<DeviceStatus>),

    /// The device answered with a busy error
    #[error("busy: {0}")]
    Busy(String),

    /// The device answered with an error
    #[error("{0}")]
    Rejected(String),

    /// The acknowledgment could not be decoded
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// The device was removed from the orchestrator
    #[error("device removed")]
    DeviceRemoved,

    /// The token is not registered with the orchestrator
    #[error("device not registered")]
    UnknownDevice,

    /// There was no device to try
    #[error("no devices available")]
    NoDevices,

    /// The call is in a view or status that does not allow the operation
    #[error("call is {0}")]
    InvalidCallState(String),
}

fn status_name(status: &Option<DeviceStatus>) -> &'static str {
    status.map(|s| s.as_str()).unwrap_or("unknown")
}

impl SessionError {
    /// Device answered busy, or is locally known to be in a call
    pub fn is_busy(&self) -> bool {
        matches!(self, SessionError::InCall | SessionError::Busy(_))
    }

    /// Device could not be reached at all
    pub fn is_unreachable(&self) -> bool {
        matches!(
            self,
            SessionError::Timeout | SessionError::Disconnected | SessionError::DeviceRemoved
        )
    }
}

impl From<Rejection> for SessionError {
    fn from(rejection: Rejection) -> Self {
        if rejection.is_busy() {
            SessionError::Busy(rejection.message)
        } else {
            SessionError::Rejected(rejection.message)
        }
    }
}

/// One device's failed attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceFailure {
    pub token: DeviceToken,
    pub reason: SessionError,
}

/// Every candidate device failed to originate a call
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct DispatchError {
    /// General message
    pub message: String,
    /// Per-device reasons, in attempt order
    pub devices: Vec<DeviceFailure>,
}

impl DispatchError {
    /// Every device reported busy
    pub fn all_busy(&self) -> bool {
        !self.devices.is_empty() && self.devices.iter().all(|d| d.reason.is_busy())
    }

    /// Every device was unreachable
    pub fn all_unreachable(&self) -> bool {
        !self.devices.is_empty() && self.devices.iter().all(|d| d.reason.is_unreachable())
    }

    /// Reason recorded for a device
    pub fn reason_for(&self, token: &DeviceToken) -> Option<&SessionError> {
        self.devices
            .iter()
            .find(|d| &d.token == token)
            .map(|d| &d.reason)
    }
}
