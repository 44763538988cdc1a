//! Simulated device
//!
//! Pure state of one remote device. Requests are answered synchronously;
//! any pushes they trigger are queued and drained by the owning task.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use wavoip_protocol::{
    CallDirection, CallId, CallPeer, CallStatus, CallTransport, CallType, ClientRequest, Contact,
    ContactBinding, DeviceAllInfo, DeviceResponse, DeviceStatus, DeviceToken, OfferPayload,
    SdpDescription, ServerPush, StartCallPayload,
};

/// How the device answers `call:start`
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StartBehavior {
    /// Place the call
    #[default]
    Accept,
    /// Refuse with a busy error
    Busy,
    /// Refuse with a plain error
    Fail { reason: String },
    /// Never acknowledge
    Silent,
}

/// Configuration for creating a simulated device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimDeviceConfig {
    /// Initial device status
    pub status: DeviceStatus,
    /// Phone number bound to the device
    pub phone: String,
    /// Technology used for placed calls
    pub call_type: CallType,
    pub start: StartBehavior,
    /// Peer answers placed calls after this delay; never when `None`
    pub answer_after_ms: Option<u64>,
    /// Whether a `device:info` query wakes a hibernating device
    pub wakeable: bool,
}

impl Default for SimDeviceConfig {
    fn default() -> Self {
        Self {
            status: DeviceStatus::Open,
            phone: "5511000000000".to_string(),
            call_type: CallType::Unofficial,
            start: StartBehavior::Accept,
            answer_after_ms: None,
            wakeable: true,
        }
    }
}

impl SimDeviceConfig {
    pub fn with_status(mut self, status: DeviceStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_start(mut self, start: StartBehavior) -> Self {
        self.start = start;
        self
    }

    pub fn with_call_type(mut self, call_type: CallType) -> Self {
        self.call_type = call_type;
        self
    }

    pub fn answering_after(mut self, ms: u64) -> Self {
        self.answer_after_ms = Some(ms);
        self
    }

    pub fn unwakeable(mut self) -> Self {
        self.wakeable = false;
        self
    }
}

/// Call held by a simulated device
#[derive(Debug, Clone, PartialEq)]
pub struct SimCall {
    pub id: CallId,
    pub peer: CallPeer,
    pub direction: CallDirection,
    pub status: CallStatus,
    pub transport: CallTransport,
}

/// A simulated remote device
#[derive(Debug)]
pub struct SimDevice {
    token: DeviceToken,
    config: SimDeviceConfig,
    status: DeviceStatus,
    qrcode: Option<String>,
    contact: ContactBinding,
    call: Option<SimCall>,
    muted: bool,
    calls_placed: u32,
    sdp_answers: Vec<SdpDescription>,
    pending: VecDeque<ServerPush>,
}

impl SimDevice {
    pub fn new(token: impl Into<DeviceToken>, config: SimDeviceConfig) -> Self {
        let mut contact = ContactBinding::default();
        contact.set(
            config.call_type,
            Some(Contact {
                phone: config.phone.clone(),
            }),
        );
        Self {
            token: token.into(),
            status: config.status,
            qrcode: None,
            contact,
            call: None,
            muted: false,
            calls_placed: 0,
            sdp_answers: Vec::new(),
            pending: VecDeque::new(),
            config,
        }
    }

    pub fn token(&self) -> &DeviceToken {
        &self.token
    }

    pub fn config(&self) -> &SimDeviceConfig {
        &self.config
    }

    pub fn status(&self) -> DeviceStatus {
        self.status
    }

    pub fn call(&self) -> Option<&SimCall> {
        self.call.as_ref()
    }

    pub fn muted(&self) -> bool {
        self.muted
    }

    /// SDP answers received from the client
    pub fn sdp_answers(&self) -> &[SdpDescription] {
        &self.sdp_answers
    }

    pub fn contact(&self) -> &ContactBinding {
        &self.contact
    }

    /// Queue the contact bindings, as a device does when its link opens
    pub fn announce(&mut self) {
        for call_type in [CallType::Official, CallType::Unofficial] {
            if let Some(contact) = self.contact.get(call_type) {
                self.pending.push_back(ServerPush::Contact {
                    call_type,
                    contact: Some(contact.clone()),
                });
            }
        }
    }

    /// Next queued push
    pub fn take_push(&mut self) -> Option<ServerPush> {
        self.pending.pop_front()
    }

    /// Change status, queueing a push when it differs
    pub fn set_status(&mut self, status: DeviceStatus) {
        if self.status != status {
            self.status = status;
            self.pending.push_back(ServerPush::Status(Some(status)));
        }
    }

    /// Answer a request
    ///
    /// Returns the acknowledgment value, or `None` when nothing is sent back.
    pub fn handle(&mut self, request: &ClientRequest) -> Option<Value> {
        let ack = match request {
            ClientRequest::Status => json!(self.status),
            ClientRequest::QrCode => json!(self.qrcode),
            ClientRequest::StartCall { phone } => return self.start_call(phone),
            ClientRequest::AcceptCall { id } => self.accept_call(id),
            ClientRequest::RejectCall { id } => self.reject_call(id),
            ClientRequest::SdpAnswer { answer } => {
                self.sdp_answers.push(answer.clone());
                return None;
            }
            ClientRequest::Mute => self.set_muted(true),
            ClientRequest::Unmute => self.set_muted(false),
            ClientRequest::EndCall => self.end_call(),
            ClientRequest::PairingCode { phone } => self.pairing_code(phone),
            ClientRequest::DeviceInfo => self.device_info(),
            ClientRequest::Restart => self.restart(),
            ClientRequest::Logout => self.logout(),
        };
        Some(ack)
    }

    fn start_call(&mut self, phone: &str) -> Option<Value> {
        let response = match &self.config.start {
            StartBehavior::Silent => return None,
            StartBehavior::Busy => busy("device is busy"),
            StartBehavior::Fail { reason } => error(reason),
            StartBehavior::Accept if !self.status.is_callable() => {
                error(&format!("device is {}", self.status))
            }
            StartBehavior::Accept if self.call.is_some() => busy("call already in progress"),
            StartBehavior::Accept => {
                self.calls_placed += 1;
                let call = SimCall {
                    id: CallId::new(format!("{}-out-{}", self.token, self.calls_placed)),
                    peer: CallPeer::new(phone),
                    direction: CallDirection::Outgoing,
                    status: CallStatus::Calling,
                    transport: self.transport(),
                };
                let payload = StartCallPayload {
                    id: call.id.clone(),
                    peer: call.peer.clone(),
                    transport: call.transport.clone(),
                };
                self.call = Some(call);
                self.muted = false;
                success(payload)
            }
        };
        Some(response)
    }

    fn accept_call(&mut self, id: &CallId) -> Value {
        match &mut self.call {
            Some(call)
                if &call.id == id
                    && call.direction == CallDirection::Incoming
                    && call.status == CallStatus::Ringing =>
            {
                call.status = CallStatus::Active;
                let transport = call.transport.clone();
                self.pending.push_back(ServerPush::CallStatus {
                    id: id.clone(),
                    status: CallStatus::Active,
                });
                success(transport)
            }
            _ => error("call not found"),
        }
    }

    fn reject_call(&mut self, id: &CallId) -> Value {
        let ringing = self
            .call
            .as_ref()
            .is_some_and(|call| &call.id == id && call.status == CallStatus::Ringing);
        if !ringing {
            return error("call not found");
        }
        self.finish(CallStatus::Rejected);
        ok()
    }

    fn set_muted(&mut self, muted: bool) -> Value {
        if self.call.is_none() {
            return error("no call in progress");
        }
        self.muted = muted;
        ok()
    }

    fn end_call(&mut self) -> Value {
        if self.call.is_none() {
            return error("no call in progress");
        }
        self.finish(CallStatus::Ended);
        ok()
    }

    fn pairing_code(&mut self, phone: &str) -> Value {
        if self.status == DeviceStatus::Open {
            return error("device already paired");
        }
        let digits: String = phone.chars().filter(char::is_ascii_digit).collect();
        let tail = &digits[digits.len().saturating_sub(4)..];
        success(format!("WAVO-{:0>4}", tail))
    }

    fn device_info(&mut self) -> Value {
        if self.status.is_hibernating() && self.config.wakeable {
            self.set_status(DeviceStatus::Open);
        }
        success(DeviceAllInfo {
            name: format!("Simulated {}", self.token),
            profile_picture: String::new(),
            status: self.status,
            phone: self.config.phone.clone(),
            integrations: Default::default(),
            call: Default::default(),
        })
    }

    fn restart(&mut self) -> Value {
        if let Some(call) = &self.call {
            self.pending.push_back(ServerPush::CallStatus {
                id: call.id.clone(),
                status: CallStatus::DeviceRestarting,
            });
        }
        self.set_status(DeviceStatus::Restarting);
        self.set_status(DeviceStatus::Open);
        ok()
    }

    fn logout(&mut self) -> Value {
        if self.call.is_some() {
            self.finish(CallStatus::Ended);
        }
        self.set_status(DeviceStatus::Close);
        let qrcode = format!("sim-qrcode-{}", self.token);
        self.qrcode = Some(qrcode.clone());
        self.pending.push_back(ServerPush::QrCode(Some(qrcode)));
        ok()
    }

    /// An inbound call arrives from `phone`; `None` if the device is busy
    pub fn ring(&mut self, phone: &str) -> Option<CallId> {
        if self.call.is_some() || !self.status.is_callable() {
            return None;
        }
        self.calls_placed += 1;
        let call = SimCall {
            id: CallId::new(format!("{}-in-{}", self.token, self.calls_placed)),
            peer: CallPeer::new(phone),
            direction: CallDirection::Incoming,
            status: CallStatus::Ringing,
            transport: self.transport(),
        };
        let id = call.id.clone();
        self.pending.push_back(ServerPush::Offer(OfferPayload {
            id: id.clone(),
            peer: call.peer.clone(),
            call_type: self.config.call_type,
        }));
        self.call = Some(call);
        Some(id)
    }

    /// The peer picks up the outgoing call
    pub fn answer(&mut self) -> bool {
        match &mut self.call {
            Some(call)
                if call.direction == CallDirection::Outgoing
                    && call.status == CallStatus::Calling =>
            {
                call.status = CallStatus::Active;
                self.pending.push_back(ServerPush::CallStatus {
                    id: call.id.clone(),
                    status: CallStatus::Active,
                });
                true
            }
            _ => false,
        }
    }

    /// The remote side ends the call with `status`
    pub fn hang_up(&mut self, status: CallStatus) -> bool {
        if self.call.is_none() {
            return false;
        }
        self.finish(status);
        true
    }

    fn finish(&mut self, status: CallStatus) {
        if let Some(call) = self.call.take() {
            self.pending.push_back(ServerPush::CallStatus {
                id: call.id,
                status,
            });
        }
        self.muted = false;
    }

    fn transport(&self) -> CallTransport {
        match self.config.call_type {
            CallType::Official => CallTransport::Official {
                sdp_offer: SdpDescription::offer(format!(
                    "v=0\r\no=- 0 0 IN IP4 127.0.0.1\r\ns={}\r\n",
                    self.token
                )),
            },
            CallType::Unofficial => CallTransport::relay("relay.sim.local", "3478"),
        }
    }
}

fn ok() -> Value {
    json!(DeviceResponse::<()>::ok())
}

fn success<T: Serialize>(result: T) -> Value {
    json!(DeviceResponse::success(result))
}

fn error(message: &str) -> Value {
    json!(DeviceResponse::<()>::error(message))
}

fn busy(message: &str) -> Value {
    json!(DeviceResponse::<()>::busy(message))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(config: SimDeviceConfig) -> SimDevice {
        SimDevice::new("sim-a", config)
    }

    #[test]
    fn test_status_answer_uses_wire_spelling() {
        let mut d = device(SimDeviceConfig::default().with_status(DeviceStatus::WaitingPayment));
        assert_eq!(d.handle(&ClientRequest::Status), Some(json!("WAITING_PAYMENT")));
    }

    #[test]
    fn test_start_call_answers_payload() {
        let mut d = device(SimDeviceConfig::default());
        let ack = d
            .handle(&ClientRequest::StartCall {
                phone: "5511999999999".into(),
            })
            .unwrap();
        let response: DeviceResponse<StartCallPayload> = serde_json::from_value(ack).unwrap();
        let payload = response.into_result().unwrap().unwrap();
        assert_eq!(payload.id.as_str(), "sim-a-out-1");
        assert_eq!(payload.transport.call_type(), CallType::Unofficial);

        // A second start while the first call is held is busy
        let ack = d
            .handle(&ClientRequest::StartCall { phone: "1".into() })
            .unwrap();
        assert_eq!(ack["code"], "busy");
    }

    #[test]
    fn test_announce_queues_configured_contact() {
        let mut d = device(SimDeviceConfig::default().with_call_type(CallType::Official));
        d.announce();
        assert_eq!(
            d.take_push(),
            Some(ServerPush::Contact {
                call_type: CallType::Official,
                contact: Some(Contact {
                    phone: "5511000000000".into()
                }),
            })
        );
        assert_eq!(d.take_push(), None);
        assert!(d.contact().get(CallType::Unofficial).is_none());
    }

    #[test]
    fn test_silent_start_never_acknowledges() {
        let mut d = device(SimDeviceConfig::default().with_start(StartBehavior::Silent));
        assert_eq!(d.handle(&ClientRequest::StartCall { phone: "1".into() }), None);
    }

    #[test]
    fn test_hibernating_device_wakes_on_info() {
        let mut d = device(SimDeviceConfig::default().with_status(DeviceStatus::Hibernating));
        let ack = d.handle(&ClientRequest::DeviceInfo).unwrap();
        assert_eq!(ack["result"]["status"], "open");
        assert_eq!(d.take_push(), Some(ServerPush::Status(Some(DeviceStatus::Open))));
    }

    #[test]
    fn test_unwakeable_device_stays_hibernating() {
        let mut d = device(
            SimDeviceConfig::default()
                .with_status(DeviceStatus::Hibernating)
                .unwakeable(),
        );
        let ack = d.handle(&ClientRequest::DeviceInfo).unwrap();
        assert_eq!(ack["result"]["status"], "hibernating");
        assert_eq!(d.take_push(), None);
    }

    #[test]
    fn test_ring_accept_end() {
        let mut d = device(SimDeviceConfig::default());
        let id = d.ring("5521").unwrap();
        assert!(matches!(d.take_push(), Some(ServerPush::Offer(_))));
        assert_eq!(d.ring("5531"), None);

        let ack = d.handle(&ClientRequest::AcceptCall { id: id.clone() }).unwrap();
        assert_eq!(ack["type"], "success");
        assert_eq!(ack["result"]["type"], "unofficial");

        d.handle(&ClientRequest::EndCall);
        assert_eq!(
            d.take_push(),
            Some(ServerPush::CallStatus {
                id: id.clone(),
                status: CallStatus::Active
            })
        );
        assert_eq!(
            d.take_push(),
            Some(ServerPush::CallStatus {
                id,
                status: CallStatus::Ended
            })
        );
        assert!(d.call().is_none());
    }

    #[test]
    fn test_pairing_code_only_when_unpaired() {
        let mut d = device(SimDeviceConfig::default());
        let ack = d
            .handle(&ClientRequest::PairingCode {
                phone: "+55 11 99999-1234".into(),
            })
            .unwrap();
        assert_eq!(ack["type"], "error");

        d.handle(&ClientRequest::Logout);
        let ack = d
            .handle(&ClientRequest::PairingCode {
                phone: "+55 11 99999-1234".into(),
            })
            .unwrap();
        assert_eq!(ack["result"], "WAVO-1234");
    }

    #[test]
    fn test_config_from_partial_json() {
        let config: SimDeviceConfig = serde_json::from_value(json!({
            "status": "hibernating",
            "start": { "kind": "fail", "reason": "no credit" }
        }))
        .unwrap();
        assert_eq!(config.status, DeviceStatus::Hibernating);
        assert_eq!(
            config.start,
            StartBehavior::Fail {
                reason: "no credit".into()
            }
        );
        assert!(config.wakeable);
    }
}
