//! Multi-device voice call orchestration
//!
//! This crate turns an acknowledgment-based signaling channel into typed
//! device sessions and call objects, and coordinates call attempts across
//! any number of devices.
//!
//! # Architecture
//!
//! - [`Wavoip`] holds the device registry, dispatches calls and republishes
//!   inbound offers on a single stream
//! - Each [`Device`] owns one [`SignalingLink`]; a pump task applies pushes
//!   to the device and to its current call
//! - A call is one record seen through three views: [`CallOffer`],
//!   [`CallOutgoing`] and [`CallActive`]
//! - Every stateful object publishes changes through its own
//!   [`EventChannel`]
//!
//! The transport and the media stack stay outside: a [`Connector`] supplies
//! signaling links and a [`MediaStack`] handles audio.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use wavoip_core::{CallAttempt, CallRequest, NullMedia, SessionConfig, Wavoip};
//!
//! let wavoip = Wavoip::new(connector, Arc::new(NullMedia), SessionConfig::default());
//! wavoip.add_devices(["device-a", "device-b"]);
//!
//! let mut attempts = wavoip.start_call_iterator(CallRequest::new("5511999999999"));
//! while let Some(attempt) = attempts.next().await {
//!     match attempt {
//!         CallAttempt::Failed { token, reason } => println!("{token}: {reason}"),
//!         CallAttempt::Connected { call, .. } => println!("calling {}", call.id()),
//!         CallAttempt::Exhausted { message } => println!("{message}"),
//!     }
//! }
//! ```

pub mod call;
pub mod config;
pub mod device;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod link;
pub mod multimedia;
pub mod orchestrator;
pub mod wakeup;

pub use call::{
    CallActive, CallEvent, CallEventKind, CallHandle, CallOffer, CallOutgoing, CallView,
};
pub use config::SessionConfig;
pub use device::{Device, DeviceEvent, DeviceEventKind};
pub use dispatch::{CallAttempt, CallAttempts, CallRequest, ALL_DEVICES_FAILED};
pub use error::{DeviceFailure, DispatchError, SessionError};
pub use events::{Event, EventChannel, ListenerId, Subscription};
pub use link::{signaling_pair, Connector, LinkEndpoint, SignalRequest, SignalingLink};
pub use multimedia::{
    AnalyserHandle, AnalyserSlot, AudioAnalyser, ErrorSource, MediaAttachment, MediaStack,
    MultimediaDevice, MultimediaDevices, MultimediaError, MultimediaKind, NullMedia,
    PlatformException,
};
pub use orchestrator::{Wavoip, WavoipEvent, WavoipEventKind};
pub use wakeup::{WakeHandle, WakeOutcome, WakeUps};

pub use wavoip_protocol as protocol;
