//! Payload types carried by signaling events

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::status::DeviceStatus;

/// Opaque caller-supplied token identifying a device
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceToken(String);

impl DeviceToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceToken {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for DeviceToken {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Server-assigned call identifier, unique within its device
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallId(String);

impl CallId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CallId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Call technology; decides which transport payload a call carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallType {
    /// Standards-based calls negotiated with SDP
    Official,
    /// Calls carried through a proprietary relay server
    Unofficial,
}

impl CallType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallType::Official => "official",
            CallType::Unofficial => "unofficial",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CallDirection {
    Incoming,
    Outgoing,
}

/// The remote party of a call
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallPeer {
    pub phone: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub profile_picture: Option<String>,
}

impl CallPeer {
    pub fn new(phone: impl Into<String>) -> Self {
        Self {
            phone: phone.into(),
            display_name: None,
            profile_picture: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Answer,
    Pranswer,
    Rollback,
}

/// Session description exchanged with the media stack
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SdpDescription {
    #[serde(rename = "type")]
    pub kind: SdpKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp: Option<String>,
}

impl SdpDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: Some(sdp.into()),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: Some(sdp.into()),
        }
    }
}

/// Address of a proprietary media relay
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayServer {
    pub host: String,
    pub port: String,
}

/// Media transport for a call, shaped by its call technology
///
/// The two payloads are mutually exclusive; the tag decides which one is
/// present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum CallTransport {
    Official {
        #[serde(rename = "sdpOffer")]
        sdp_offer: SdpDescription,
    },
    Unofficial {
        server: RelayServer,
    },
}

impl CallTransport {
    pub fn call_type(&self) -> CallType {
        match self {
            CallTransport::Official { .. } => CallType::Official,
            CallTransport::Unofficial { .. } => CallType::Unofficial,
        }
    }

    pub fn relay(host: impl Into<String>, port: impl Into<String>) -> Self {
        CallTransport::Unofficial {
            server: RelayServer {
                host: host.into(),
                port: port.into(),
            },
        }
    }
}

/// Phone identity bound to a device for one call technology
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub phone: String,
}

/// Per-technology contact binding of a device
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ContactBinding {
    pub official: Option<Contact>,
    pub unofficial: Option<Contact>,
}

impl ContactBinding {
    pub fn get(&self, call_type: CallType) -> Option<&Contact> {
        match call_type {
            CallType::Official => self.official.as_ref(),
            CallType::Unofficial => self.unofficial.as_ref(),
        }
    }

    pub fn set(&mut self, call_type: CallType, contact: Option<Contact>) {
        match call_type {
            CallType::Official => self.official = contact,
            CallType::Unofficial => self.unofficial = contact,
        }
    }
}

/// Inbound call offer as pushed by the device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfferPayload {
    pub id: CallId,
    pub peer: CallPeer,
    #[serde(rename = "type")]
    pub call_type: CallType,
}

/// Successful `call:start` acknowledgment result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartCallPayload {
    pub id: CallId,
    pub peer: CallPeer,
    pub transport: CallTransport,
}

/// Round-trip-time aggregate in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RttSummary {
    pub min: f64,
    pub max: f64,
    pub avg: f64,
}

/// Directional packet counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PacketCounters {
    pub total: u64,
    pub total_bytes: u64,
    pub loss: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct StatsRtt {
    pub client: RttSummary,
    pub whatsapp: RttSummary,
}

/// Stats as pushed on the wire
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Stats {
    pub rtt: StatsRtt,
    pub tx: PacketCounters,
    pub rx: PacketCounters,
}

/// Stats snapshot attached to an active call
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CallStats {
    pub rtt: RttSummary,
    pub tx: PacketCounters,
    pub rx: PacketCounters,
}

impl From<Stats> for CallStats {
    fn from(stats: Stats) -> Self {
        Self {
            rtt: stats.rtt.client,
            tx: stats.tx,
            rx: stats.rx,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvolutionIntegration {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Integrations {
    #[serde(default)]
    pub baileys: Vec<serde_json::Value>,
    #[serde(default)]
    pub evolution: Vec<EvolutionIntegration>,
}

/// Call section of the device info snapshot
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CallSummary {
    pub call_id: Option<i64>,
    pub peer_made_call: Option<bool>,
    pub accepted_peer: Option<i64>,
    pub call_direction: Option<String>,
    pub call_active_date: Option<String>,
    pub call_duration_in_seconds: Option<i64>,
}

/// Aggregate device/account snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceAllInfo {
    pub name: String,
    pub profile_picture: String,
    pub status: DeviceStatus,
    pub phone: String,
    #[serde(default)]
    pub integrations: Integrations,
    #[serde(default)]
    pub call: CallSummary,
}
