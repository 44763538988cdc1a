//! Device sessions
//!
//! A [`Device`] binds one device token to its signaling link. It owns a push
//! pump task that applies inbound pushes to the device state and to the
//! device's current call, and it exposes the call-control commands, each of
//! which waits for an acknowledgment bounded by the configured timeout.
//!
//! A device holds at most one call at a time: while a call exists, or while
//! an outbound start is still waiting for its acknowledgment, new starts are
//! refused and inbound offers are dropped.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use wavoip_protocol::{
    decode_device_status, CallId, CallTransport, CallType, ClientRequest, Contact, ContactBinding,
    DeviceAllInfo, DeviceResponse, DeviceStatus, DeviceToken, SdpDescription, ServerPush,
    StartCallPayload,
};

use crate::call::{CallHandle, CallInner, CallOffer, CallOrigin, CallOutgoing};
use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::events::{Event, EventChannel, Subscription};
use crate::link::{SignalRequest, SignalingLink};
use crate::multimedia::MediaStack;

/// Notifications published by a device session
#[derive(Debug, Clone)]
pub enum DeviceEvent {
    Status(Option<DeviceStatus>),
    QrCode(Option<String>),
    Contact {
        call_type: CallType,
        contact: Option<Contact>,
    },
    /// New inbound call
    Offer(CallOffer),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceEventKind {
    Status,
    QrCode,
    Contact,
    Offer,
}

impl Event for DeviceEvent {
    type Kind = DeviceEventKind;

    fn kind(&self) -> DeviceEventKind {
        match self {
            DeviceEvent::Status(_) => DeviceEventKind::Status,
            DeviceEvent::QrCode(_) => DeviceEventKind::QrCode,
            DeviceEvent::Contact { .. } => DeviceEventKind::Contact,
            DeviceEvent::Offer(_) => DeviceEventKind::Offer,
        }
    }
}

#[derive(Default)]
struct DeviceState {
    status: Option<DeviceStatus>,
    qrcode: Option<String>,
    contact: ContactBinding,
    call: Option<Arc<CallInner>>,
    /// An outbound start is waiting for its acknowledgment
    starting: bool,
    /// Call-scoped pushes that arrived while a start was pending
    early: Vec<ServerPush>,
    removed: bool,
}

pub(crate) struct DeviceInner {
    token: DeviceToken,
    requests: mpsc::Sender<SignalRequest>,
    config: SessionConfig,
    media: Arc<dyn MediaStack>,
    state: Mutex<DeviceState>,
    /// Serializes call-push delivery with the replay of early pushes
    delivery: Mutex<()>,
    events: EventChannel<DeviceEvent>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl DeviceInner {
    fn state(&self) -> MutexGuard<'_, DeviceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn delivery(&self) -> MutexGuard<'_, ()> {
        self.delivery.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn stop_pump(&self) {
        let handle = self
            .pump
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.abort();
        }
    }

    fn apply_push(self: &Arc<Self>, push: ServerPush) {
        match push {
            ServerPush::QrCode(qrcode) => self.apply_qrcode(qrcode),
            ServerPush::Status(status) => self.apply_status(status),
            ServerPush::Contact { call_type, contact } => {
                self.state().contact.set(call_type, contact.clone());
                self.events
                    .emit(&DeviceEvent::Contact { call_type, contact });
            }
            ServerPush::Offer(payload) => {
                let offer = {
                    let mut state = self.state();
                    if state.removed {
                        return;
                    }
                    if state.call.is_some() || state.starting {
                        warn!(
                            "Device {} is busy, dropping offer {} from {}",
                            self.token, payload.id, payload.peer.phone
                        );
                        return;
                    }
                    let call = CallInner::offer(
                        self.origin(),
                        payload.id,
                        payload.peer,
                        payload.call_type,
                    );
                    state.call = Some(Arc::clone(&call));
                    CallOffer::new(call)
                };
                info!(
                    "Incoming call {} on {} from {}",
                    offer.id(),
                    self.token,
                    offer.peer().phone
                );
                self.events.emit(&DeviceEvent::Offer(offer));
            }
            push => self.route_call_push(push),
        }
    }

    fn apply_status(&self, status: Option<DeviceStatus>) {
        {
            let mut state = self.state();
            if state.status == status {
                return;
            }
            state.status = status;
        }
        info!(
            "Device {} status: {}",
            self.token,
            status.map(|s| s.as_str()).unwrap_or("unknown")
        );
        self.events.emit(&DeviceEvent::Status(status));
    }

    fn apply_qrcode(&self, qrcode: Option<String>) {
        {
            let mut state = self.state();
            if state.qrcode == qrcode {
                return;
            }
            state.qrcode = qrcode.clone();
        }
        debug!("Device {} qrcode updated", self.token);
        self.events.emit(&DeviceEvent::QrCode(qrcode));
    }

    fn route_call_push(&self, push: ServerPush) {
        let Some(id) = push.call_id() else {
            return;
        };
        let _delivery = self.delivery();
        let call = {
            let mut state = self.state();
            let current = state
                .call
                .as_ref()
                .filter(|call| call.id() == id)
                .cloned();
            match current {
                Some(call) => call,
                None => {
                    if state.starting {
                        state.early.push(push);
                    } else {
                        debug!("Device {} ignoring {} for call {}", self.token, push.event(), id);
                    }
                    return;
                }
            }
        };
        self.deliver(&call, &push);
    }

    fn deliver(&self, call: &Arc<CallInner>, push: &ServerPush) {
        if call.handle_push(push) {
            self.release(call.id());
        }
    }

    /// Free the call slot if it still holds `id`
    fn release(&self, id: &CallId) {
        let mut state = self.state();
        if state.call.as_ref().is_some_and(|call| call.id() == id) {
            state.call = None;
            debug!("Device {} released call {}", self.token, id);
        }
    }

    fn origin(self: &Arc<Self>) -> CallOrigin {
        CallOrigin {
            device_token: self.token.clone(),
            device: Arc::downgrade(self),
            media: Arc::clone(&self.media),
        }
    }
}

impl Drop for DeviceInner {
    fn drop(&mut self) {
        self.stop_pump();
    }
}

/// Clears the pending-start flag however the start ends
struct StartGuard<'a>(&'a DeviceInner);

impl Drop for StartGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.0.state();
        state.starting = false;
        state.early.clear();
    }
}

async fn run_push_loop(device: Weak<DeviceInner>, mut pushes: mpsc::Receiver<ServerPush>) {
    while let Some(push) = pushes.recv().await {
        let Some(device) = device.upgrade() else {
            break;
        };
        device.apply_push(push);
    }
    debug!("Push stream closed");
}

/// Session for one remote device
#[derive(Clone)]
pub struct Device {
    inner: Arc<DeviceInner>,
}

impl Device {
    /// Open a session over an established link
    ///
    /// Spawns the push pump and an initial status/qrcode sync, so this must
    /// run inside a tokio runtime.
    pub fn open(
        token: DeviceToken,
        link: SignalingLink,
        media: Arc<dyn MediaStack>,
        config: SessionConfig,
    ) -> Self {
        let inner = Arc::new(DeviceInner {
            token,
            requests: link.requests,
            config,
            media,
            state: Mutex::new(DeviceState::default()),
            delivery: Mutex::new(()),
            events: EventChannel::new(),
            pump: Mutex::new(None),
        });

        let pump = tokio::spawn(run_push_loop(Arc::downgrade(&inner), link.pushes));
        *inner.pump.lock().unwrap_or_else(PoisonError::into_inner) = Some(pump);

        let device = Self { inner };
        let sync = device.clone();
        tokio::spawn(async move {
            if let Err(e) = sync.refresh().await {
                warn!("Initial sync of {} failed: {}", sync.token(), e);
            }
        });
        device
    }

    pub(crate) fn from_weak(inner: &Weak<DeviceInner>) -> Option<Self> {
        inner.upgrade().map(|inner| Self { inner })
    }

    pub fn token(&self) -> &DeviceToken {
        &self.inner.token
    }

    pub fn status(&self) -> Option<DeviceStatus> {
        self.inner.state().status
    }

    pub fn qrcode(&self) -> Option<String> {
        self.inner.state().qrcode.clone()
    }

    pub fn contact(&self) -> ContactBinding {
        self.inner.state().contact.clone()
    }

    /// The call currently held by the device
    pub fn current_call(&self) -> Option<CallHandle> {
        self.inner
            .state()
            .call
            .as_ref()
            .map(|call| CallHandle::from_inner(Arc::clone(call)))
    }

    pub fn is_removed(&self) -> bool {
        self.inner.state().removed
    }

    pub fn events(&self) -> &EventChannel<DeviceEvent> {
        &self.inner.events
    }

    /// Check whether a call could be started right now
    pub fn can_call(&self) -> Result<(), SessionError> {
        check_callable(&self.inner.state())
    }

    /// Query status and QR code and apply the answers as if pushed
    pub async fn refresh(&self) -> Result<(), SessionError> {
        let status = self.request(ClientRequest::Status).await?;
        let status = decode_device_status(Some(&status))
            .map_err(|e| SessionError::InvalidResponse(e.to_string()))?;
        self.inner.apply_status(status);

        let qrcode = self.request(ClientRequest::QrCode).await?;
        let qrcode: Option<String> = serde_json::from_value(qrcode)
            .map_err(|e| SessionError::InvalidResponse(e.to_string()))?;
        self.inner.apply_qrcode(qrcode);
        Ok(())
    }

    /// Place a call to `phone`
    pub async fn start_call(&self, phone: &str) -> Result<CallOutgoing, SessionError> {
        {
            let mut state = self.inner.state();
            check_callable(&state)?;
            state.starting = true;
        }
        let guard = StartGuard(&*self.inner);

        debug!("Starting call to {} on {}", phone, self.token());
        let payload: StartCallPayload = self
            .command(ClientRequest::StartCall {
                phone: phone.to_string(),
            })
            .await?
            .ok_or_else(|| SessionError::InvalidResponse("missing call payload".into()))?;

        let call = CallInner::outgoing(
            self.inner.origin(),
            payload.id,
            payload.peer,
            payload.transport,
        );
        {
            // Pushes for this call stay queued behind the replay
            let _delivery = self.inner.delivery();
            let early = {
                let mut state = self.inner.state();
                if state.removed {
                    return Err(SessionError::DeviceRemoved);
                }
                state.call = Some(Arc::clone(&call));
                std::mem::take(&mut state.early)
            };
            drop(guard);
            for push in early.iter().filter(|p| p.call_id() == Some(call.id())) {
                self.inner.deliver(&call, push);
            }
        }

        info!("Call {} to {} started on {}", call.id(), phone, self.token());
        Ok(CallOutgoing::new(call))
    }

    /// Answer an inbound call; yields the media transport
    pub async fn accept_call(&self, id: &CallId) -> Result<CallTransport, SessionError> {
        self.command(ClientRequest::AcceptCall { id: id.clone() })
            .await?
            .ok_or_else(|| SessionError::InvalidResponse("missing transport".into()))
    }

    pub async fn reject_call(&self, id: &CallId) -> Result<(), SessionError> {
        self.command::<Value>(ClientRequest::RejectCall { id: id.clone() })
            .await
            .map(drop)
    }

    pub async fn end_call(&self) -> Result<(), SessionError> {
        self.command::<Value>(ClientRequest::EndCall).await.map(drop)
    }

    pub async fn mute(&self) -> Result<(), SessionError> {
        self.command::<Value>(ClientRequest::Mute).await.map(drop)
    }

    pub async fn unmute(&self) -> Result<(), SessionError> {
        self.command::<Value>(ClientRequest::Unmute).await.map(drop)
    }

    /// Deliver an SDP answer; nothing is acknowledged
    pub async fn send_sdp_answer(&self, answer: SdpDescription) -> Result<(), SessionError> {
        self.inner
            .requests
            .send(SignalRequest {
                request: ClientRequest::SdpAnswer { answer },
                ack: None,
            })
            .await
            .map_err(|_| SessionError::Disconnected)
    }

    /// Request a one-time pairing code for `phone`
    pub async fn request_pairing_code(&self, phone: &str) -> Result<String, SessionError> {
        self.command(ClientRequest::PairingCode {
            phone: phone.to_string(),
        })
        .await?
        .ok_or_else(|| SessionError::InvalidResponse("missing pairing code".into()))
    }

    /// Aggregate device snapshot, or `None` if unavailable
    pub async fn get_infos(&self) -> Option<DeviceAllInfo> {
        match self.command(ClientRequest::DeviceInfo).await {
            Ok(info) => info,
            Err(e) => {
                debug!("No info from {}: {}", self.token(), e);
                None
            }
        }
    }

    /// Poke a hibernating device; true once it reports a non-hibernating status
    pub async fn wake_up(&self) -> bool {
        let Some(info) = self.get_infos().await else {
            return false;
        };
        self.inner.apply_status(Some(info.status));
        !info.status.is_hibernating()
    }

    pub async fn restart(&self) -> Result<(), SessionError> {
        self.command::<Value>(ClientRequest::Restart).await.map(drop)
    }

    pub async fn logout(&self) -> Result<(), SessionError> {
        self.command::<Value>(ClientRequest::Logout).await.map(drop)
    }

    /// Stop the push pump and refuse further commands
    pub fn delete(&self) {
        self.inner.state().removed = true;
        self.inner.stop_pump();
        info!("Device {} removed", self.token());
    }

    pub fn on_status<F>(&self, f: F) -> Subscription<DeviceEvent>
    where
        F: Fn(Option<DeviceStatus>) + Send + Sync + 'static,
    {
        self.inner.events.on(DeviceEventKind::Status, move |event| {
            if let DeviceEvent::Status(status) = event {
                f(*status);
            }
        })
    }

    pub fn on_qrcode<F>(&self, f: F) -> Subscription<DeviceEvent>
    where
        F: Fn(Option<&str>) + Send + Sync + 'static,
    {
        self.inner.events.on(DeviceEventKind::QrCode, move |event| {
            if let DeviceEvent::QrCode(qrcode) = event {
                f(qrcode.as_deref());
            }
        })
    }

    pub fn on_contact<F>(&self, f: F) -> Subscription<DeviceEvent>
    where
        F: Fn(CallType, Option<&Contact>) + Send + Sync + 'static,
    {
        self.inner.events.on(DeviceEventKind::Contact, move |event| {
            if let DeviceEvent::Contact { call_type, contact } = event {
                f(*call_type, contact.as_ref());
            }
        })
    }

    pub fn on_offer<F>(&self, f: F) -> Subscription<DeviceEvent>
    where
        F: Fn(&CallOffer) + Send + Sync + 'static,
    {
        self.inner.events.on(DeviceEventKind::Offer, move |event| {
            if let DeviceEvent::Offer(offer) = event {
                f(offer);
            }
        })
    }

    /// Send a request and wait for its raw acknowledgment
    async fn request(&self, request: ClientRequest) -> Result<Value, SessionError> {
        if self.is_removed() {
            return Err(SessionError::DeviceRemoved);
        }
        let event = request.event();
        let (tx, rx) = oneshot::channel();
        let exchange = async {
            self.inner
                .requests
                .send(SignalRequest {
                    request,
                    ack: Some(tx),
                })
                .await
                .map_err(|_| SessionError::Disconnected)?;
            rx.await.map_err(|_| SessionError::Disconnected)
        };

        match tokio::time::timeout(self.inner.config.ack_timeout(), exchange).await {
            Ok(result) => result,
            Err(_) => {
                warn!("{} on {} timed out", event, self.token());
                Err(SessionError::Timeout)
            }
        }
    }

    /// Send a command and decode its response envelope
    async fn command<T: DeserializeOwned>(
        &self,
        request: ClientRequest,
    ) -> Result<Option<T>, SessionError> {
        let value = self.request(request).await?;
        let response: DeviceResponse<T> = serde_json::from_value(value)
            .map_err(|e| SessionError::InvalidResponse(e.to_string()))?;
        Ok(response.into_result()?)
    }
}

fn check_callable(state: &DeviceState) -> Result<(), SessionError> {
    if state.removed {
        return Err(SessionError::DeviceRemoved);
    }
    if state.call.is_some() || state.starting {
        return Err(SessionError::InCall);
    }
    match state.status {
        Some(status) if status.is_callable() => Ok(()),
        other => Err(SessionError::NotCallable(other)),
    }
}

impl PartialEq for Device {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state();
        f.debug_struct("Device")
            .field("token", &self.inner.token)
            .field("status", &state.status)
            .field("in_call", &state.call.is_some())
            .field("removed", &state.removed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::{signaling_pair, LinkEndpoint};
    use crate::multimedia::NullMedia;
    use serde_json::json;
    use std::time::Duration;
    use wavoip_protocol::{CallPeer, CallStatus, OfferPayload};

    fn config() -> SessionConfig {
        SessionConfig {
            ack_timeout_ms: 200,
            ..SessionConfig::default()
        }
    }

    /// Open a device and answer its initial sync with `status`
    async fn open(status: &str) -> (Device, LinkEndpoint) {
        let (link, mut endpoint) = signaling_pair(8, 8);
        let device = Device::open("dev".into(), link, Arc::new(NullMedia), config());

        let req = endpoint.requests.recv().await.unwrap();
        assert_eq!(req.request, ClientRequest::Status);
        req.acknowledge(json!(status));
        let req = endpoint.requests.recv().await.unwrap();
        assert_eq!(req.request, ClientRequest::QrCode);
        req.acknowledge(json!(null));

        wait_until(|| device.status().is_some() || status.is_empty()).await;
        (device, endpoint)
    }

    async fn wait_until(mut check: impl FnMut() -> bool) {
        for _ in 0..100 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    fn start_ack(id: &str) -> Value {
        json!({
            "type": "success",
            "result": {
                "id": id,
                "peer": { "phone": "5511999999999" },
                "transport": { "type": "unofficial", "server": { "host": "relay", "port": "3478" } }
            }
        })
    }

    #[tokio::test]
    async fn test_initial_sync_sets_status() {
        let (device, _endpoint) = open("open").await;
        assert_eq!(device.status(), Some(DeviceStatus::Open));
        assert!(device.can_call().is_ok());
    }

    #[tokio::test]
    async fn test_hibernating_device_cannot_call() {
        let (device, _endpoint) = open("hibernating").await;
        assert_eq!(
            device.can_call(),
            Err(SessionError::NotCallable(Some(DeviceStatus::Hibernating)))
        );
        assert_eq!(
            device.start_call("5511").await.unwrap_err(),
            SessionError::NotCallable(Some(DeviceStatus::Hibernating))
        );
    }

    #[tokio::test]
    async fn test_start_call_registers_call() {
        let (device, mut endpoint) = open("open").await;

        let responder = tokio::spawn(async move {
            let req = endpoint.requests.recv().await.unwrap();
            assert_eq!(
                req.request,
                ClientRequest::StartCall {
                    phone: "5511999999999".into()
                }
            );
            req.acknowledge(start_ack("call-1"));
            endpoint
        });

        let call = device.start_call("5511999999999").await.unwrap();
        assert_eq!(call.id().as_str(), "call-1");
        assert_eq!(call.status(), CallStatus::Calling);
        assert_eq!(device.can_call(), Err(SessionError::InCall));

        let endpoint = responder.await.unwrap();
        endpoint
            .pushes
            .send(ServerPush::CallStatus {
                id: "call-1".into(),
                status: CallStatus::NotAnswered,
            })
            .await
            .unwrap();
        wait_until(|| device.current_call().is_none()).await;
        assert!(device.can_call().is_ok());
    }

    #[tokio::test]
    async fn test_busy_rejection_surfaces_as_error() {
        let (device, mut endpoint) = open("open").await;
        tokio::spawn(async move {
            let req = endpoint.requests.recv().await.unwrap();
            req.acknowledge(json!({ "type": "error", "result": "already in a call", "code": "busy" }));
            endpoint
        });

        let err = device.start_call("5511").await.unwrap_err();
        assert_eq!(err, SessionError::Busy("already in a call".into()));
        assert!(device.current_call().is_none());
        assert!(device.can_call().is_ok());
    }

    #[tokio::test]
    async fn test_unacknowledged_command_times_out() {
        let (device, _endpoint) = open("open").await;
        assert_eq!(device.restart().await, Err(SessionError::Timeout));
    }

    #[tokio::test]
    async fn test_closed_link_is_disconnected() {
        let (device, endpoint) = open("open").await;
        drop(endpoint);
        assert_eq!(device.logout().await, Err(SessionError::Disconnected));
    }

    #[tokio::test]
    async fn test_offer_dropped_while_busy() {
        let (device, endpoint) = open("open").await;
        let offers = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&offers);
        device.on_offer(move |offer| sink.lock().unwrap().push(offer.id().clone()));

        for id in ["in-1", "in-2"] {
            endpoint
                .pushes
                .send(ServerPush::Offer(OfferPayload {
                    id: id.into(),
                    peer: CallPeer::new("5521"),
                    call_type: CallType::Official,
                }))
                .await
                .unwrap();
        }
        wait_until(|| !offers.lock().unwrap().is_empty()).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(*offers.lock().unwrap(), vec![CallId::new("in-1")]);
    }

    #[tokio::test]
    async fn test_contact_push_updates_binding() {
        let (device, endpoint) = open("open").await;
        endpoint
            .pushes
            .send(ServerPush::Contact {
                call_type: CallType::Unofficial,
                contact: Some(Contact {
                    phone: "5511888888888".into(),
                }),
            })
            .await
            .unwrap();
        wait_until(|| device.contact().unofficial.is_some()).await;
        assert!(device.contact().official.is_none());
    }

    #[tokio::test]
    async fn test_deleted_device_refuses_commands() {
        let (device, _endpoint) = open("open").await;
        device.delete();
        assert!(device.is_removed());
        assert_eq!(device.mute().await, Err(SessionError::DeviceRemoved));
        assert_eq!(device.can_call(), Err(SessionError::DeviceRemoved));
    }
}
