//! Orchestrator facade
//!
//! [`Wavoip`] owns the device registry, dispatches calls across devices and
//! republishes every device's inbound offers on one `offer` stream.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info};
use wavoip_protocol::DeviceToken;

use crate::call::{CallOffer, CallOutgoing};
use crate::config::SessionConfig;
use crate::device::{Device, DeviceEvent};
use crate::dispatch::{self, CallAttempts, CallRequest, Candidate};
use crate::error::DispatchError;
use crate::events::{Event, EventChannel, Subscription};
use crate::link::Connector;
use crate::multimedia::{MediaStack, MultimediaDevices, MultimediaError};
use crate::wakeup::{self, WakeHandle, WakeUps};

/// Notifications published by the orchestrator
#[derive(Debug, Clone)]
pub enum WavoipEvent {
    /// Inbound call on any registered device
    Offer(CallOffer),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WavoipEventKind {
    Offer,
}

impl Event for WavoipEvent {
    type Kind = WavoipEventKind;

    fn kind(&self) -> WavoipEventKind {
        match self {
            WavoipEvent::Offer(_) => WavoipEventKind::Offer,
        }
    }
}

struct Registered {
    device: Device,
    offers: Subscription<DeviceEvent>,
}

/// Multi-device call orchestrator
pub struct Wavoip {
    connector: Arc<dyn Connector>,
    media: Arc<dyn MediaStack>,
    config: SessionConfig,
    registry: Mutex<Vec<Registered>>,
    events: EventChannel<WavoipEvent>,
}

impl Wavoip {
    pub fn new(
        connector: Arc<dyn Connector>,
        media: Arc<dyn MediaStack>,
        config: SessionConfig,
    ) -> Self {
        Self {
            connector,
            media,
            config,
            registry: Mutex::new(Vec::new()),
            events: EventChannel::new(),
        }
    }

    fn registry(&self) -> MutexGuard<'_, Vec<Registered>> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn events(&self) -> &EventChannel<WavoipEvent> {
        &self.events
    }

    /// Called for every inbound call on any device
    pub fn on_offer<F>(&self, f: F) -> Subscription<WavoipEvent>
    where
        F: Fn(&CallOffer) + Send + Sync + 'static,
    {
        self.events.on(WavoipEventKind::Offer, move |event| {
            let WavoipEvent::Offer(offer) = event;
            f(offer);
        })
    }

    /// Register devices; tokens already registered are skipped
    ///
    /// Returns the sessions that were opened. Must run inside a tokio
    /// runtime.
    pub fn add_devices<I, T>(&self, tokens: I) -> Vec<Device>
    where
        I: IntoIterator<Item = T>,
        T: Into<DeviceToken>,
    {
        let mut registry = self.registry();
        let mut added = Vec::new();
        for token in tokens.into_iter().map(Into::into) {
            if registry.iter().any(|r| r.device.token() == &token) {
                debug!("Device {} already registered", token);
                continue;
            }

            let link = self.connector.connect(&token);
            let device = Device::open(token, link, Arc::clone(&self.media), self.config.clone());
            let events = self.events.clone();
            let offers = device.on_offer(move |offer| {
                events.emit(&WavoipEvent::Offer(offer.clone()));
            });

            info!("Registered device {}", device.token());
            added.push(device.clone());
            registry.push(Registered { device, offers });
        }
        added
    }

    /// Unregister devices; returns the devices that remain
    pub fn remove_devices<'a, I>(&self, tokens: I) -> Vec<Device>
    where
        I: IntoIterator<Item = &'a DeviceToken>,
    {
        let tokens: Vec<&DeviceToken> = tokens.into_iter().collect();
        let mut registry = self.registry();
        let (removed, kept): (Vec<_>, Vec<_>) = registry
            .drain(..)
            .partition(|r| tokens.contains(&r.device.token()));
        *registry = kept;

        for Registered { device, offers } in removed {
            offers.unsubscribe();
            device.delete();
            info!("Unregistered device {}", device.token());
        }
        registry.iter().map(|r| r.device.clone()).collect()
    }

    /// Registered devices, in registration order
    pub fn devices(&self) -> Vec<Device> {
        self.registry().iter().map(|r| r.device.clone()).collect()
    }

    pub fn device(&self, token: &DeviceToken) -> Option<Device> {
        self.registry()
            .iter()
            .find(|r| r.device.token() == token)
            .map(|r| r.device.clone())
    }

    /// Place a call from the first candidate device that can
    pub async fn start_call(&self, request: CallRequest) -> Result<CallOutgoing, DispatchError> {
        dispatch::settle(self.start_call_iterator(request)).await
    }

    /// Place a call, observing every attempt as it happens
    pub fn start_call_iterator(&self, request: CallRequest) -> CallAttempts {
        let candidates = self.candidates(request.from_tokens.as_deref());
        debug!(
            "Dispatching call to {} over {} candidate(s)",
            request.to,
            candidates.len()
        );
        dispatch::spawn_attempts(request.to, candidates)
    }

    /// Wake devices concurrently; one handle per target, in input order
    ///
    /// An empty token list targets every registered device.
    pub fn wake_up_devices(&self, tokens: &[DeviceToken]) -> Vec<WakeHandle> {
        wakeup::wake_all(self.wake_targets(tokens))
    }

    /// Wake devices concurrently; outcomes in completion order
    pub fn wake_up_devices_iterator(&self, tokens: &[DeviceToken]) -> WakeUps {
        wakeup::wake_progressive(self.wake_targets(tokens))
    }

    /// Audio input and output devices known to the media stack
    pub fn multimedia_devices(&self) -> Result<MultimediaDevices, MultimediaError> {
        self.media.devices()
    }

    fn candidates(&self, tokens: Option<&[DeviceToken]>) -> Vec<Candidate> {
        let registry = self.registry();
        match tokens {
            Some(tokens) => tokens
                .iter()
                .map(|token| {
                    registry
                        .iter()
                        .find(|r| r.device.token() == token)
                        .map(|r| Candidate::Registered(r.device.clone()))
                        .unwrap_or_else(|| Candidate::Unknown(token.clone()))
                })
                .collect(),
            None => registry
                .iter()
                .map(|r| Candidate::Registered(r.device.clone()))
                .collect(),
        }
    }

    fn wake_targets(&self, tokens: &[DeviceToken]) -> Vec<(DeviceToken, Option<Device>)> {
        let registry = self.registry();
        if tokens.is_empty() {
            return registry
                .iter()
                .map(|r| (r.device.token().clone(), Some(r.device.clone())))
                .collect();
        }
        tokens
            .iter()
            .map(|token| {
                let device = registry
                    .iter()
                    .find(|r| r.device.token() == token)
                    .map(|r| r.device.clone());
                (token.clone(), device)
            })
            .collect()
    }
}

impl fmt::Debug for Wavoip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Wavoip")
            .field("devices", &self.registry().len())
            .field("config", &self.config)
            .finish()
    }
}

impl Drop for Wavoip {
    fn drop(&mut self) {
        for registered in self.registry().iter() {
            registered.device.delete();
        }
    }
}
