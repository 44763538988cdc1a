//! Wire events
//!
//! The signaling socket carries named events with positional JSON
//! arguments. This module maps those events to typed requests (client to
//! device) and pushes (device to client) and back, so a socket adapter only
//! moves `(event, args)` pairs.
//!
//! | Event | Direction | Arguments | Acknowledged |
//! |---|---|---|---|
//! | `call:start` | out | phone | yes |
//! | `call:accept` | out | `{id}` | yes |
//! | `call:sdp-answer` | out | SDP answer | no |
//! | `call:reject` | out | call id | yes |
//! | `call:mute` / `call:unmute` / `call:end` | out | none | yes |
//! | `device:qrcode` / `device:status` | both | none out, value in | yes |
//! | `whatsapp:pairing_code` | out | phone | yes |
//! | `device:info` / `device:restart` / `device:logout` | out | none | yes |
//! | `device:contact` | in | type, contact | |
//! | `call:offer` | in | `{id, peer, type}` | |
//! | `call:error` / `call:status` / `call:stats` | in | call id, value | |
//! | `peer:accepted_elsewhere` / `peer:rejected_elsewhere` | in | call id | |
//! | `peer:mute` | in | call id, bool | |

use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use crate::error::ProtocolError;
use crate::status::{CallStatus, DeviceStatus};
use crate::types::{CallId, CallType, Contact, OfferPayload, SdpDescription, Stats};

pub const CALL_START: &str = "call:start";
pub const CALL_ACCEPT: &str = "call:accept";
pub const CALL_SDP_ANSWER: &str = "call:sdp-answer";
pub const CALL_REJECT: &str = "call:reject";
pub const CALL_MUTE: &str = "call:mute";
pub const CALL_UNMUTE: &str = "call:unmute";
pub const CALL_END: &str = "call:end";
pub const DEVICE_QRCODE: &str = "device:qrcode";
pub const DEVICE_STATUS: &str = "device:status";
pub const DEVICE_CONTACT: &str = "device:contact";
pub const DEVICE_INFO: &str = "device:info";
pub const DEVICE_RESTART: &str = "device:restart";
pub const DEVICE_LOGOUT: &str = "device:logout";
pub const PAIRING_CODE: &str = "whatsapp:pairing_code";
pub const CALL_OFFER: &str = "call:offer";
pub const CALL_ERROR: &str = "call:error";
pub const CALL_STATUS: &str = "call:status";
pub const CALL_STATS: &str = "call:stats";
pub const PEER_ACCEPTED_ELSEWHERE: &str = "peer:accepted_elsewhere";
pub const PEER_REJECTED_ELSEWHERE: &str = "peer:rejected_elsewhere";
pub const PEER_MUTE: &str = "peer:mute";

/// Requests a client sends to a device
#[derive(Debug, Clone, PartialEq)]
pub enum ClientRequest {
    StartCall { phone: String },
    AcceptCall { id: CallId },
    SdpAnswer { answer: SdpDescription },
    RejectCall { id: CallId },
    Mute,
    Unmute,
    EndCall,
    QrCode,
    Status,
    PairingCode { phone: String },
    DeviceInfo,
    Restart,
    Logout,
}

impl ClientRequest {
    /// Wire event name
    pub fn event(&self) -> &'static str {
        match self {
            ClientRequest::StartCall { .. } => CALL_START,
            ClientRequest::AcceptCall { .. } => CALL_ACCEPT,
            ClientRequest::SdpAnswer { .. } => CALL_SDP_ANSWER,
            ClientRequest::RejectCall { .. } => CALL_REJECT,
            ClientRequest::Mute => CALL_MUTE,
            ClientRequest::Unmute => CALL_UNMUTE,
            ClientRequest::EndCall => CALL_END,
            ClientRequest::QrCode => DEVICE_QRCODE,
            ClientRequest::Status => DEVICE_STATUS,
            ClientRequest::PairingCode { .. } => PAIRING_CODE,
            ClientRequest::DeviceInfo => DEVICE_INFO,
            ClientRequest::Restart => DEVICE_RESTART,
            ClientRequest::Logout => DEVICE_LOGOUT,
        }
    }

    /// Whether the device answers this request with an acknowledgment
    pub fn expects_ack(&self) -> bool {
        !matches!(self, ClientRequest::SdpAnswer { .. })
    }

    /// Positional arguments (the acknowledgment callback is not included)
    pub fn args(&self) -> Vec<Value> {
        match self {
            ClientRequest::StartCall { phone } | ClientRequest::PairingCode { phone } => {
                vec![json!(phone)]
            }
            ClientRequest::AcceptCall { id } => vec![json!({ "id": id })],
            ClientRequest::SdpAnswer { answer } => vec![json!(answer)],
            ClientRequest::RejectCall { id } => vec![json!(id)],
            ClientRequest::Mute
            | ClientRequest::Unmute
            | ClientRequest::EndCall
            | ClientRequest::QrCode
            | ClientRequest::Status
            | ClientRequest::DeviceInfo
            | ClientRequest::Restart
            | ClientRequest::Logout => Vec::new(),
        }
    }

    /// Decode a request from its wire form
    pub fn decode(event: &str, args: &[Value]) -> Result<Self, ProtocolError> {
        let request = match event {
            CALL_START => ClientRequest::StartCall {
                phone: arg(event, args, 0)?,
            },
            CALL_ACCEPT => {
                let body: AcceptBody = arg(event, args, 0)?;
                ClientRequest::AcceptCall { id: body.id }
            }
            CALL_SDP_ANSWER => ClientRequest::SdpAnswer {
                answer: arg(event, args, 0)?,
            },
            CALL_REJECT => ClientRequest::RejectCall {
                id: arg(event, args, 0)?,
            },
            CALL_MUTE => ClientRequest::Mute,
            CALL_UNMUTE => ClientRequest::Unmute,
            CALL_END => ClientRequest::EndCall,
            DEVICE_QRCODE => ClientRequest::QrCode,
            DEVICE_STATUS => ClientRequest::Status,
            PAIRING_CODE => ClientRequest::PairingCode {
                phone: arg(event, args, 0)?,
            },
            DEVICE_INFO => ClientRequest::DeviceInfo,
            DEVICE_RESTART => ClientRequest::Restart,
            DEVICE_LOGOUT => ClientRequest::Logout,
            other => return Err(ProtocolError::UnknownEvent(other.to_string())),
        };
        Ok(request)
    }
}

#[derive(serde::Deserialize)]
struct AcceptBody {
    id: CallId,
}

/// Events a device pushes to the client
#[derive(Debug, Clone, PartialEq)]
pub enum ServerPush {
    QrCode(Option<String>),
    Status(Option<DeviceStatus>),
    Contact {
        call_type: CallType,
        contact: Option<Contact>,
    },
    Offer(OfferPayload),
    CallError {
        id: CallId,
        error: String,
    },
    CallStatus {
        id: CallId,
        status: CallStatus,
    },
    CallStats {
        id: CallId,
        stats: Stats,
    },
    AcceptedElsewhere {
        id: CallId,
    },
    RejectedElsewhere {
        id: CallId,
    },
    PeerMute {
        id: CallId,
        muted: bool,
    },
}

impl ServerPush {
    /// Wire event name
    pub fn event(&self) -> &'static str {
        match self {
            ServerPush::QrCode(_) => DEVICE_QRCODE,
            ServerPush::Status(_) => DEVICE_STATUS,
            ServerPush::Contact { .. } => DEVICE_CONTACT,
            ServerPush::Offer(_) => CALL_OFFER,
            ServerPush::CallError { .. } => CALL_ERROR,
            ServerPush::CallStatus { .. } => CALL_STATUS,
            ServerPush::CallStats { .. } => CALL_STATS,
            ServerPush::AcceptedElsewhere { .. } => PEER_ACCEPTED_ELSEWHERE,
            ServerPush::RejectedElsewhere { .. } => PEER_REJECTED_ELSEWHERE,
            ServerPush::PeerMute { .. } => PEER_MUTE,
        }
    }

    /// Call the push refers to, if it is call-scoped
    pub fn call_id(&self) -> Option<&CallId> {
        match self {
            ServerPush::CallError { id, .. }
            | ServerPush::CallStatus { id, .. }
            | ServerPush::CallStats { id, .. }
            | ServerPush::AcceptedElsewhere { id }
            | ServerPush::RejectedElsewhere { id }
            | ServerPush::PeerMute { id, .. } => Some(id),
            ServerPush::Offer(offer) => Some(&offer.id),
            ServerPush::QrCode(_) | ServerPush::Status(_) | ServerPush::Contact { .. } => None,
        }
    }

    /// Encode into `(event, args)`
    pub fn encode(&self) -> (&'static str, Vec<Value>) {
        let args = match self {
            ServerPush::QrCode(qrcode) => vec![json!(qrcode)],
            ServerPush::Status(status) => vec![json!(status)],
            ServerPush::Contact { call_type, contact } => vec![json!(call_type), json!(contact)],
            ServerPush::Offer(offer) => vec![json!(offer)],
            ServerPush::CallError { id, error } => vec![json!(id), json!(error)],
            ServerPush::CallStatus { id, status } => vec![json!(id), json!(status)],
            ServerPush::CallStats { id, stats } => vec![json!(id), json!(stats)],
            ServerPush::AcceptedElsewhere { id } | ServerPush::RejectedElsewhere { id } => {
                vec![json!(id)]
            }
            ServerPush::PeerMute { id, muted } => vec![json!(id), json!(muted)],
        };
        (self.event(), args)
    }

    /// Decode a push from its wire form
    pub fn decode(event: &str, args: &[Value]) -> Result<Self, ProtocolError> {
        let push = match event {
            DEVICE_QRCODE => ServerPush::QrCode(optional_arg(event, args, 0)?),
            DEVICE_STATUS => ServerPush::Status(decode_device_status(args.first())?),
            DEVICE_CONTACT => ServerPush::Contact {
                call_type: arg(event, args, 0)?,
                contact: optional_arg(event, args, 1)?,
            },
            CALL_OFFER => ServerPush::Offer(arg(event, args, 0)?),
            CALL_ERROR => ServerPush::CallError {
                id: arg(event, args, 0)?,
                error: arg(event, args, 1)?,
            },
            CALL_STATUS => ServerPush::CallStatus {
                id: arg(event, args, 0)?,
                status: arg(event, args, 1)?,
            },
            CALL_STATS => ServerPush::CallStats {
                id: arg(event, args, 0)?,
                stats: arg(event, args, 1)?,
            },
            PEER_ACCEPTED_ELSEWHERE => ServerPush::AcceptedElsewhere {
                id: arg(event, args, 0)?,
            },
            PEER_REJECTED_ELSEWHERE => ServerPush::RejectedElsewhere {
                id: arg(event, args, 0)?,
            },
            PEER_MUTE => ServerPush::PeerMute {
                id: arg(event, args, 0)?,
                muted: arg(event, args, 1)?,
            },
            other => return Err(ProtocolError::UnknownEvent(other.to_string())),
        };
        Ok(push)
    }
}

/// Decode a device status value
///
/// `device:status` answers carry an empty string when the device has no
/// status yet; that and `null` both decode to `None`.
pub fn decode_device_status(value: Option<&Value>) -> Result<Option<DeviceStatus>, ProtocolError> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.is_empty() => Ok(None),
        Some(Value::String(s)) => s.parse().map(Some),
        Some(other) => Err(ProtocolError::InvalidStatus(other.to_string())),
    }
}

fn arg<T: DeserializeOwned>(event: &str, args: &[Value], index: usize) -> Result<T, ProtocolError> {
    let value = args.get(index).ok_or_else(|| ProtocolError::MissingArgument {
        event: event.to_string(),
        index,
    })?;
    serde_json::from_value(value.clone()).map_err(|e| ProtocolError::InvalidPayload {
        event: event.to_string(),
        reason: e.to_string(),
    })
}

fn optional_arg<T: DeserializeOwned>(
    event: &str,
    args: &[Value],
    index: usize,
) -> Result<Option<T>, ProtocolError> {
    match args.get(index) {
        None | Some(Value::Null) => Ok(None),
        Some(_) => arg(event, args, index).map(Some),
    }
}
