//! Wavoip Signaling Protocol
//!
//! This crate defines the vocabulary spoken between a client and a remote
//! telephony device over the signaling channel:
//!
//! - **Statuses**: device connectivity and call lifecycle enumerations
//! - **Payloads**: peers, transports, contacts, stats and device info
//! - **Envelopes**: the `success` / `error` acknowledgment shape
//! - **Wire events**: outbound requests and inbound pushes, encoded as an
//!   event name plus positional JSON arguments
//!
//! # Architecture
//!
//! The channel is request/acknowledge based. A client emits a
//! [`ClientRequest`]; most requests are answered with a JSON acknowledgment
//! that decodes into a [`DeviceResponse`]. Independently, the device pushes
//! [`ServerPush`] events whenever its state or one of its calls changes.
//!
//! # Example
//!
//! ```rust
//! use wavoip_protocol::{CallStatus, ServerPush};
//! use serde_json::json;
//!
//! let push = ServerPush::decode("call:status", &[json!("call-1"), json!("ACTIVE")]).unwrap();
//! assert!(matches!(push, ServerPush::CallStatus { status: CallStatus::Active, .. }));
//! ```

pub mod envelope;
pub mod error;
pub mod status;
pub mod types;
pub mod wire;

pub use envelope::{DeviceResponse, ErrorCode, Rejection};
pub use error::ProtocolError;
pub use status::{CallStatus, DeviceStatus, TransportStatus};
pub use types::{
    CallDirection, CallId, CallPeer, CallStats, CallSummary, CallTransport, CallType, Contact,
    ContactBinding, DeviceAllInfo, DeviceToken, EvolutionIntegration, Integrations, OfferPayload,
    PacketCounters, RelayServer, RttSummary, SdpDescription, SdpKind, StartCallPayload, Stats,
    StatsRtt,
};
pub use wire::{decode_device_status, ClientRequest, ServerPush};
