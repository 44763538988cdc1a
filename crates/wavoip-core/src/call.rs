//! Call state objects
//!
//! A call is one shared record tagged with its current view: an inbound
//! [`CallOffer`], a self-initiated [`CallOutgoing`], or a [`CallActive`]
//! call. The three views are thin handles over the same record, so a call
//! keeps its id, its listeners and its state when it moves from one view to
//! the next.
//!
//! Status only moves on inbound pushes. Local commands (accept, mute, end)
//! report their acknowledgment but never change the status themselves.

use std::fmt;
use std::ops::Deref;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::sync::watch;
use tracing::{debug, info, warn};
use wavoip_protocol::{
    CallDirection, CallId, CallPeer, CallStats, CallStatus, CallTransport, CallType, DeviceToken,
    ServerPush, TransportStatus,
};

use crate::device::{Device, DeviceInner};
use crate::error::SessionError;
use crate::events::{Event, EventChannel, Subscription};
use crate::multimedia::{
    AnalyserHandle, AnalyserSlot, ErrorSource, MediaStack, MultimediaError, PlatformException,
};

/// Which view a call currently presents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallView {
    Offer,
    Outgoing,
    Active,
}

impl CallView {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallView::Offer => "offer",
            CallView::Outgoing => "outgoing",
            CallView::Active => "active",
        }
    }
}

/// Notifications published by a call
#[derive(Debug, Clone)]
pub enum CallEvent {
    /// Every observed status change
    Status(CallStatus),
    /// Another session of the callee answered the offer
    AcceptedElsewhere,
    /// Another session of the callee declined the offer
    RejectedElsewhere,
    Unanswered,
    Ended,
    /// The peer answered an outgoing call
    PeerAccepted(CallActive),
    PeerRejected,
    PeerMute,
    PeerUnmute,
    Stats(CallStats),
    Error(String),
    /// Media transport connection changed
    ConnectionStatus(TransportStatus),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallEventKind {
    Status,
    AcceptedElsewhere,
    RejectedElsewhere,
    Unanswered,
    Ended,
    PeerAccepted,
    PeerRejected,
    PeerMute,
    PeerUnmute,
    Stats,
    Error,
    ConnectionStatus,
}

impl Event for CallEvent {
    type Kind = CallEventKind;

    fn kind(&self) -> CallEventKind {
        match self {
            CallEvent::Status(_) => CallEventKind::Status,
            CallEvent::AcceptedElsewhere => CallEventKind::AcceptedElsewhere,
            CallEvent::RejectedElsewhere => CallEventKind::RejectedElsewhere,
            CallEvent::Unanswered => CallEventKind::Unanswered,
            CallEvent::Ended => CallEventKind::Ended,
            CallEvent::PeerAccepted(_) => CallEventKind::PeerAccepted,
            CallEvent::PeerRejected => CallEventKind::PeerRejected,
            CallEvent::PeerMute => CallEventKind::PeerMute,
            CallEvent::PeerUnmute => CallEventKind::PeerUnmute,
            CallEvent::Stats(_) => CallEventKind::Stats,
            CallEvent::Error(_) => CallEventKind::Error,
            CallEvent::ConnectionStatus(_) => CallEventKind::ConnectionStatus,
        }
    }
}

/// Mutable part of a call
struct CallRecord {
    view: CallView,
    status: CallStatus,
    peer: CallPeer,
    peer_muted: bool,
    muted: bool,
    transport: Option<CallTransport>,
    connection: TransportStatus,
    analyser: Option<watch::Receiver<AnalyserSlot>>,
    stats: Option<CallStats>,
}

pub(crate) struct CallInner {
    id: CallId,
    call_type: CallType,
    direction: CallDirection,
    device_token: DeviceToken,
    record: Mutex<CallRecord>,
    events: EventChannel<CallEvent>,
    device: Weak<DeviceInner>,
    media: Arc<dyn MediaStack>,
}

/// Where a new call comes from
pub(crate) struct CallOrigin {
    pub device_token: DeviceToken,
    pub device: Weak<DeviceInner>,
    pub media: Arc<dyn MediaStack>,
}

impl CallInner {
    /// Inbound call, ringing
    pub(crate) fn offer(
        origin: CallOrigin,
        id: CallId,
        peer: CallPeer,
        call_type: CallType,
    ) -> Arc<Self> {
        Self::build(
            origin,
            id,
            peer,
            call_type,
            CallDirection::Incoming,
            CallView::Offer,
            CallStatus::Ringing,
            None,
        )
    }

    /// Call placed by this device, calling
    pub(crate) fn outgoing(
        origin: CallOrigin,
        id: CallId,
        peer: CallPeer,
        transport: CallTransport,
    ) -> Arc<Self> {
        Self::build(
            origin,
            id,
            peer,
            transport.call_type(),
            CallDirection::Outgoing,
            CallView::Outgoing,
            CallStatus::Calling,
            Some(transport),
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn build(
        origin: CallOrigin,
        id: CallId,
        peer: CallPeer,
        call_type: CallType,
        direction: CallDirection,
        view: CallView,
        status: CallStatus,
        transport: Option<CallTransport>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            call_type,
            direction,
            device_token: origin.device_token,
            record: Mutex::new(CallRecord {
                view,
                status,
                peer,
                peer_muted: false,
                muted: false,
                transport,
                connection: TransportStatus::Disconnected,
                analyser: None,
                stats: None,
            }),
            events: EventChannel::new(),
            device: origin.device,
            media: origin.media,
        })
    }

    pub(crate) fn id(&self) -> &CallId {
        &self.id
    }

    fn record(&self) -> MutexGuard<'_, CallRecord> {
        self.record.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn is_terminal(&self) -> bool {
        self.record().status.is_terminal()
    }

    fn session(&self) -> Result<Device, SessionError> {
        Device::from_weak(&self.device).ok_or(SessionError::DeviceRemoved)
    }

    /// Apply a call-scoped push; returns true once the call is terminal
    pub(crate) fn handle_push(self: &Arc<Self>, push: &ServerPush) -> bool {
        match push {
            ServerPush::CallStatus { status, .. } => self.apply_status(*status),
            ServerPush::CallStats { stats, .. } => {
                let stats = CallStats::from(*stats);
                self.record().stats = Some(stats);
                self.events.emit(&CallEvent::Stats(stats));
            }
            ServerPush::CallError { error, .. } => {
                warn!("Call {} error: {}", self.id, error);
                self.events.emit(&CallEvent::Error(error.clone()));
            }
            ServerPush::PeerMute { muted, .. } => {
                self.record().peer_muted = *muted;
                let event = if *muted {
                    CallEvent::PeerMute
                } else {
                    CallEvent::PeerUnmute
                };
                self.events.emit(&event);
            }
            ServerPush::AcceptedElsewhere { .. } => {
                debug!("Call {} accepted elsewhere", self.id);
                self.events.emit(&CallEvent::AcceptedElsewhere);
            }
            ServerPush::RejectedElsewhere { .. } => {
                debug!("Call {} rejected elsewhere", self.id);
                self.events.emit(&CallEvent::RejectedElsewhere);
            }
            ServerPush::Offer(_)
            | ServerPush::QrCode(_)
            | ServerPush::Status(_)
            | ServerPush::Contact { .. } => {}
        }
        self.is_terminal()
    }

    /// Move to `status` unless the call is already there or already terminal
    fn apply_status(self: &Arc<Self>, status: CallStatus) {
        let (previous_view, activated) = {
            let mut record = self.record();
            if record.status == status || record.status.is_terminal() {
                return;
            }
            record.status = status;
            let previous_view = record.view;
            let activated = status == CallStatus::Active && previous_view == CallView::Outgoing;
            if activated {
                record.view = CallView::Active;
            }
            (previous_view, activated)
        };

        debug!("Call {} status -> {}", self.id, status);
        self.events.emit(&CallEvent::Status(status));

        match status {
            CallStatus::Active if activated => {
                info!("Call {} accepted by {}", self.id, self.record().peer.phone);
                self.attach_media();
                self.events
                    .emit(&CallEvent::PeerAccepted(CallActive(CallHandle(Arc::clone(self)))));
            }
            CallStatus::Rejected if previous_view == CallView::Outgoing => {
                self.events.emit(&CallEvent::PeerRejected);
            }
            CallStatus::Rejected | CallStatus::Ended | CallStatus::Failed => {
                self.events.emit(&CallEvent::Ended);
            }
            CallStatus::NotAnswered => {
                self.events.emit(&CallEvent::Unanswered);
            }
            _ => {}
        }

        if status.is_terminal() {
            info!("Call {} finished ({})", self.id, status);
            self.detach_media();
        }
    }

    /// Hand the transport to the media stack and relay what it reports
    fn attach_media(self: &Arc<Self>) {
        let Some(transport) = self.record().transport.clone() else {
            warn!("Call {} became active without a transport", self.id);
            return;
        };

        let attachment = self.media.attach(&self.id, &transport);
        let mut connection = attachment.connection;
        {
            let mut record = self.record();
            record.connection = *connection.borrow_and_update();
            record.analyser = Some(attachment.analyser);
        }

        let call = Arc::downgrade(self);
        tokio::spawn(async move {
            while connection.changed().await.is_ok() {
                let status = *connection.borrow_and_update();
                let Some(call) = call.upgrade() else { break };
                {
                    let mut record = call.record();
                    if record.status.is_terminal() || record.connection == status {
                        continue;
                    }
                    record.connection = status;
                }
                debug!("Call {} media {:?}", call.id, status);
                call.events.emit(&CallEvent::ConnectionStatus(status));
            }
        });

        if let Some(answer) = attachment.sdp_answer {
            let device = self.device.clone();
            let id = self.id.clone();
            tokio::spawn(async move {
                let Ok(answer) = answer.await else {
                    debug!("Call {} media produced no SDP answer", id);
                    return;
                };
                match Device::from_weak(&device) {
                    Some(device) => {
                        if let Err(e) = device.send_sdp_answer(answer).await {
                            warn!("Failed to send SDP answer for call {}: {}", id, e);
                        }
                    }
                    None => debug!("Device gone before SDP answer for call {}", id),
                }
            });
        }
    }

    fn detach_media(&self) {
        let attached = self.record().analyser.is_some();
        if attached {
            self.media.detach(&self.id);
        }
    }

    /// Offer → Active after a successful accept acknowledgment
    fn activate(self: &Arc<Self>, transport: CallTransport) {
        {
            let mut record = self.record();
            record.view = CallView::Active;
            record.transport = Some(transport);
        }
        self.attach_media();
    }

    fn ensure_view(&self, allowed: &[CallView]) -> Result<(), SessionError> {
        let record = self.record();
        if record.status.is_terminal() {
            return Err(SessionError::InvalidCallState(
                record.status.as_str().to_lowercase(),
            ));
        }
        if !allowed.contains(&record.view) {
            return Err(SessionError::InvalidCallState(record.view.as_str().to_string()));
        }
        Ok(())
    }
}

/// Shared handle onto one call, whatever its view
///
/// The view types deref to this, so identity and status accessors are
/// available on all of them.
#[derive(Clone)]
pub struct CallHandle(Arc<CallInner>);

impl CallHandle {
    pub(crate) fn from_inner(inner: Arc<CallInner>) -> Self {
        Self(inner)
    }

    fn inner(&self) -> &Arc<CallInner> {
        &self.0
    }

    pub fn id(&self) -> &CallId {
        &self.0.id
    }

    pub fn call_type(&self) -> CallType {
        self.0.call_type
    }

    pub fn direction(&self) -> CallDirection {
        self.0.direction
    }

    /// Token of the device that owns the call
    pub fn device_token(&self) -> &DeviceToken {
        &self.0.device_token
    }

    pub fn view(&self) -> CallView {
        self.0.record().view
    }

    pub fn status(&self) -> CallStatus {
        self.0.record().status
    }

    pub fn is_terminal(&self) -> bool {
        self.0.is_terminal()
    }

    pub fn peer(&self) -> CallPeer {
        self.0.record().peer.clone()
    }

    pub fn peer_muted(&self) -> bool {
        self.0.record().peer_muted
    }

    /// Local mute flag, as last confirmed by the device
    pub fn muted(&self) -> bool {
        self.0.record().muted
    }

    /// Transport payload, once known
    pub fn transport(&self) -> Option<CallTransport> {
        self.0.record().transport.clone()
    }

    /// The call's event channel
    pub fn events(&self) -> &EventChannel<CallEvent> {
        &self.0.events
    }

    /// Called on every status change, in arrival order
    pub fn on_status<F>(&self, f: F) -> Subscription<CallEvent>
    where
        F: Fn(CallStatus) + Send + Sync + 'static,
    {
        self.0.events.on(CallEventKind::Status, move |event| {
            if let CallEvent::Status(status) = event {
                f(*status);
            }
        })
    }

    pub fn on_end<F>(&self, f: F) -> Subscription<CallEvent>
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.0.events.on(CallEventKind::Ended, move |_| f())
    }

    pub fn on_unanswered<F>(&self, f: F) -> Subscription<CallEvent>
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.0.events.on(CallEventKind::Unanswered, move |_| f())
    }

    /// View this call as an active call, if it has become one
    pub fn as_active(&self) -> Option<CallActive> {
        (self.view() == CallView::Active).then(|| CallActive(self.clone()))
    }

    async fn set_muted(&self, muted: bool) -> Result<(), SessionError> {
        self.0.ensure_view(&[CallView::Outgoing, CallView::Active])?;
        let device = self.0.session()?;
        if muted {
            device.mute().await?;
        } else {
            device.unmute().await?;
        }
        self.0.record().muted = muted;
        Ok(())
    }

    async fn hang_up(&self) -> Result<(), SessionError> {
        self.0.ensure_view(&[CallView::Outgoing, CallView::Active])?;
        self.0.session()?.end_call().await
    }
}

impl PartialEq for CallHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for CallHandle {}

impl fmt::Debug for CallHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let record = self.0.record();
        f.debug_struct("Call")
            .field("id", &self.0.id)
            .field("device", &self.0.device_token)
            .field("view", &record.view)
            .field("status", &record.status)
            .finish()
    }
}

/// Inbound call that has not been answered yet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallOffer(CallHandle);

impl Deref for CallOffer {
    type Target = CallHandle;

    fn deref(&self) -> &CallHandle {
        &self.0
    }
}

impl CallOffer {
    pub(crate) fn new(inner: Arc<CallInner>) -> Self {
        Self(CallHandle(inner))
    }

    /// Answer the call
    ///
    /// On failure the offer stays usable, e.g. for a later [`reject`](Self::reject).
    pub async fn accept(&self) -> Result<CallActive, SessionError> {
        self.inner().ensure_view(&[CallView::Offer])?;
        let device = self.inner().session()?;
        let transport = device.accept_call(self.id()).await?;
        self.inner().activate(transport);
        info!("Accepted call {} on {}", self.id(), self.device_token());
        Ok(CallActive(self.0.clone()))
    }

    /// Decline the call
    pub async fn reject(&self) -> Result<(), SessionError> {
        self.inner().ensure_view(&[CallView::Offer])?;
        self.inner().session()?.reject_call(self.id()).await
    }

    pub fn on_accepted_elsewhere<F>(&self, f: F) -> Subscription<CallEvent>
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.events().on(CallEventKind::AcceptedElsewhere, move |_| f())
    }

    pub fn on_rejected_elsewhere<F>(&self, f: F) -> Subscription<CallEvent>
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.events().on(CallEventKind::RejectedElsewhere, move |_| f())
    }
}

/// Call placed by this device, waiting for the peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallOutgoing(CallHandle);

impl Deref for CallOutgoing {
    type Target = CallHandle;

    fn deref(&self) -> &CallHandle {
        &self.0
    }
}

impl CallOutgoing {
    pub(crate) fn new(inner: Arc<CallInner>) -> Self {
        Self(CallHandle(inner))
    }

    pub async fn mute(&self) -> Result<(), SessionError> {
        self.0.set_muted(true).await
    }

    pub async fn unmute(&self) -> Result<(), SessionError> {
        self.0.set_muted(false).await
    }

    pub async fn end(&self) -> Result<(), SessionError> {
        self.0.hang_up().await
    }

    /// Called with the active call once the peer answers
    pub fn on_peer_accept<F>(&self, f: F) -> Subscription<CallEvent>
    where
        F: Fn(&CallActive) + Send + Sync + 'static,
    {
        self.events().on(CallEventKind::PeerAccepted, move |event| {
            if let CallEvent::PeerAccepted(active) = event {
                f(active);
            }
        })
    }

    pub fn on_peer_reject<F>(&self, f: F) -> Subscription<CallEvent>
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.events().on(CallEventKind::PeerRejected, move |_| f())
    }
}

/// Call with media flowing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallActive(CallHandle);

impl Deref for CallActive {
    type Target = CallHandle;

    fn deref(&self) -> &CallHandle {
        &self.0
    }
}

impl CallActive {
    pub async fn mute(&self) -> Result<(), SessionError> {
        self.0.set_muted(true).await
    }

    pub async fn unmute(&self) -> Result<(), SessionError> {
        self.0.set_muted(false).await
    }

    pub async fn end(&self) -> Result<(), SessionError> {
        self.0.hang_up().await
    }

    /// Media transport connection status
    pub fn connection_status(&self) -> TransportStatus {
        self.inner().record().connection
    }

    /// Latest stats snapshot
    pub fn stats(&self) -> Option<CallStats> {
        self.inner().record().stats
    }

    /// Wait for the media stack to provide the audio analyser
    pub async fn audio_analyser(&self) -> Result<AnalyserHandle, MultimediaError> {
        let receiver = self.inner().record().analyser.clone();
        let Some(mut receiver) = receiver else {
            return Err(media_unavailable("media is not attached"));
        };
        let slot = receiver
            .wait_for(Option::is_some)
            .await
            .map_err(|_| media_unavailable("media stack went away"))?;
        match &*slot {
            Some(result) => result.clone(),
            None => Err(media_unavailable("analyser not resolved")),
        }
    }

    pub fn on_peer_mute<F>(&self, f: F) -> Subscription<CallEvent>
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.events().on(CallEventKind::PeerMute, move |_| f())
    }

    pub fn on_peer_unmute<F>(&self, f: F) -> Subscription<CallEvent>
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.events().on(CallEventKind::PeerUnmute, move |_| f())
    }

    pub fn on_stats<F>(&self, f: F) -> Subscription<CallEvent>
    where
        F: Fn(&CallStats) + Send + Sync + 'static,
    {
        self.events().on(CallEventKind::Stats, move |event| {
            if let CallEvent::Stats(stats) = event {
                f(stats);
            }
        })
    }

    pub fn on_error<F>(&self, f: F) -> Subscription<CallEvent>
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.events().on(CallEventKind::Error, move |event| {
            if let CallEvent::Error(message) = event {
                f(message);
            }
        })
    }

    pub fn on_connection_status<F>(&self, f: F) -> Subscription<CallEvent>
    where
        F: Fn(TransportStatus) + Send + Sync + 'static,
    {
        self.events().on(CallEventKind::ConnectionStatus, move |event| {
            if let CallEvent::ConnectionStatus(status) = event {
                f(*status);
            }
        })
    }
}

fn media_unavailable(message: &str) -> MultimediaError {
    MultimediaError::new(
        ErrorSource::Audio,
        PlatformException::new("InvalidStateError", message),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::multimedia::NullMedia;
    use wavoip_protocol::SdpDescription;

    fn origin() -> CallOrigin {
        CallOrigin {
            device_token: DeviceToken::new("dev-1"),
            device: Weak::new(),
            media: Arc::new(NullMedia),
        }
    }

    fn status_push(id: &str, status: CallStatus) -> ServerPush {
        ServerPush::CallStatus {
            id: CallId::new(id),
            status,
        }
    }

    fn recorded(handle: &CallHandle) -> Arc<Mutex<Vec<CallStatus>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        handle.on_status(move |s| sink.lock().unwrap().push(s));
        seen
    }

    #[test]
    fn test_offer_starts_ringing() {
        let inner = CallInner::offer(origin(), "c1".into(), CallPeer::new("5511"), CallType::Official);
        let offer = CallOffer::new(inner);
        assert_eq!(offer.status(), CallStatus::Ringing);
        assert_eq!(offer.view(), CallView::Offer);
        assert_eq!(offer.direction(), CallDirection::Incoming);
        assert!(offer.transport().is_none());
    }

    #[test]
    fn test_terminal_status_is_final() {
        let inner = CallInner::offer(origin(), "c1".into(), CallPeer::new("5511"), CallType::Unofficial);
        let handle = CallHandle::from_inner(Arc::clone(&inner));
        let seen = recorded(&handle);

        assert!(inner.handle_push(&status_push("c1", CallStatus::NotAnswered)));
        assert!(inner.handle_push(&status_push("c1", CallStatus::Active)));
        assert_eq!(*seen.lock().unwrap(), vec![CallStatus::NotAnswered]);
    }

    #[test]
    fn test_duplicate_status_ignored() {
        let inner = CallInner::offer(origin(), "c1".into(), CallPeer::new("5511"), CallType::Unofficial);
        let handle = CallHandle::from_inner(Arc::clone(&inner));
        let seen = recorded(&handle);

        inner.handle_push(&status_push("c1", CallStatus::Disconnected));
        inner.handle_push(&status_push("c1", CallStatus::Disconnected));
        assert!(!inner.handle_push(&status_push("c1", CallStatus::DeviceRestarting)));
        assert_eq!(
            *seen.lock().unwrap(),
            vec![CallStatus::Disconnected, CallStatus::DeviceRestarting]
        );
    }

    #[test]
    fn test_rejected_offer_reports_end() {
        let inner = CallInner::offer(origin(), "c1".into(), CallPeer::new("5511"), CallType::Unofficial);
        let offer = CallOffer::new(Arc::clone(&inner));
        let ended = Arc::new(Mutex::new(0));
        let sink = Arc::clone(&ended);
        offer.on_end(move || *sink.lock().unwrap() += 1);

        inner.handle_push(&status_push("c1", CallStatus::Rejected));
        assert_eq!(*ended.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_outgoing_becomes_active_on_peer_accept() {
        let transport = CallTransport::Official {
            sdp_offer: SdpDescription::offer("v=0"),
        };
        let inner = CallInner::outgoing(origin(), "c2".into(), CallPeer::new("5511"), transport);
        let outgoing = CallOutgoing::new(Arc::clone(&inner));

        let accepted = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&accepted);
        outgoing.on_peer_accept(move |active| *sink.lock().unwrap() = Some(active.id().clone()));

        inner.handle_push(&status_push("c2", CallStatus::Active));
        assert_eq!(outgoing.view(), CallView::Active);
        assert_eq!(accepted.lock().unwrap().as_ref(), Some(&CallId::new("c2")));

        let active = outgoing.as_active().unwrap();
        assert!(active.audio_analyser().await.is_err());
    }

    #[test]
    fn test_outgoing_rejected_by_peer() {
        let inner = CallInner::outgoing(
            origin(),
            "c3".into(),
            CallPeer::new("5511"),
            CallTransport::relay("relay.example", "3478"),
        );
        let outgoing = CallOutgoing::new(Arc::clone(&inner));
        let rejected = Arc::new(Mutex::new(false));
        let sink = Arc::clone(&rejected);
        outgoing.on_peer_reject(move || *sink.lock().unwrap() = true);

        inner.handle_push(&status_push("c3", CallStatus::Rejected));
        assert!(*rejected.lock().unwrap());
        assert!(outgoing.is_terminal());
    }

    #[test]
    fn test_peer_mute_and_stats() {
        let inner = CallInner::offer(origin(), "c4".into(), CallPeer::new("5511"), CallType::Official);
        let handle = CallHandle::from_inner(Arc::clone(&inner));

        inner.handle_push(&ServerPush::PeerMute {
            id: "c4".into(),
            muted: true,
        });
        assert!(handle.peer_muted());

        let counter = Arc::new(Mutex::new(0));
        let sink = Arc::clone(&counter);
        handle
            .events()
            .on(CallEventKind::Stats, move |_| *sink.lock().unwrap() += 1);
        inner.handle_push(&ServerPush::CallStats {
            id: "c4".into(),
            stats: Default::default(),
        });
        assert_eq!(*counter.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_commands_fail_without_device() {
        let inner = CallInner::offer(origin(), "c5".into(), CallPeer::new("5511"), CallType::Official);
        let offer = CallOffer::new(inner);
        assert_eq!(offer.accept().await, Err(SessionError::DeviceRemoved));
        assert_eq!(offer.view(), CallView::Offer);
    }

    #[tokio::test]
    async fn test_offer_view_cannot_mute() {
        let inner = CallInner::offer(origin(), "c6".into(), CallPeer::new("5511"), CallType::Official);
        let handle = CallHandle::from_inner(inner);
        assert_eq!(
            handle.set_muted(true).await,
            Err(SessionError::InvalidCallState("offer".into()))
        );
    }
}
