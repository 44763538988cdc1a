//! Multimedia capability
//!
//! Audio capture, playback and the media transport itself belong to an
//! external stack. The engine only needs to enumerate audio devices, attach
//! a call's transport to the stack and learn how that attachment is doing.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{oneshot, watch};
use wavoip_protocol::{CallId, CallTransport, SdpDescription, TransportStatus};

/// Kind of audio endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MultimediaKind {
    #[serde(rename = "audio-in")]
    AudioIn,
    #[serde(rename = "audio-out")]
    AudioOut,
}

/// One enumerated audio endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultimediaDevice {
    #[serde(rename = "type")]
    pub kind: MultimediaKind,
    pub label: String,
    #[serde(rename = "deviceId")]
    pub device_id: String,
}

/// Audio endpoints available to the media stack
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MultimediaDevices {
    pub microphones: Vec<MultimediaDevice>,
    pub speakers: Vec<MultimediaDevice>,
}

/// Which side of the audio path failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSource {
    Microphone,
    Audio,
}

/// Exception raised by the platform media API
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformException {
    /// Exception name, e.g. `NotAllowedError`
    pub name: String,
    pub message: String,
}

impl PlatformException {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
        }
    }
}

/// Permission or hardware failure reported by the media stack
///
/// Displays as a fixed human-readable message chosen from the origin and
/// the exception name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}", self.describe())]
pub struct MultimediaError {
    pub origin: ErrorSource,
    pub exception: PlatformException,
}

impl MultimediaError {
    pub fn new(origin: ErrorSource, exception: PlatformException) -> Self {
        Self { origin, exception }
    }

    pub fn describe(&self) -> &'static str {
        match (self.origin, self.exception.name.as_str()) {
            (ErrorSource::Audio, "NotAllowedError") => "Speaker permission was denied",
            (ErrorSource::Microphone, "NotAllowedError") => "Microphone permission was denied",
            (ErrorSource::Microphone, "OverconstrainedError") => {
                "Microphone does not support the audio requirements"
            }
            (ErrorSource::Microphone, "SecurityError") => {
                "Cannot access the microphone, the page is insecure"
            }
            (ErrorSource::Microphone, "AbortError") => "Could not access the microphone",
            (ErrorSource::Microphone, "NotFoundError") => "No microphone found",
            (ErrorSource::Microphone, "NotReadableError") => {
                "Microphone hardware could not be initialized"
            }
            _ => "Something failed",
        }
    }
}

/// Live audio analyser of an active call
pub trait AudioAnalyser: fmt::Debug + Send + Sync {
    /// Number of frequency bins
    fn frequency_bin_count(&self) -> usize;

    /// Fill `out` with the current byte frequency data
    fn byte_frequency_data(&self, out: &mut [u8]);
}

pub type AnalyserHandle = Arc<dyn AudioAnalyser>;

/// Result of the asynchronous analyser setup; `None` while pending
pub type AnalyserSlot = Option<Result<AnalyserHandle, MultimediaError>>;

/// What the media stack hands back when a call's transport is attached
pub struct MediaAttachment {
    /// Media transport connection status
    pub connection: watch::Receiver<TransportStatus>,
    /// Audio analyser, resolved asynchronously
    pub analyser: watch::Receiver<AnalyserSlot>,
    /// SDP answer to send back, for official transports
    pub sdp_answer: Option<oneshot::Receiver<SdpDescription>>,
}

impl fmt::Debug for MediaAttachment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaAttachment")
            .field("connection", &*self.connection.borrow())
            .field("sdp_answer", &self.sdp_answer.is_some())
            .finish()
    }
}

/// External media stack
pub trait MediaStack: Send + Sync + 'static {
    /// Enumerate audio input and output devices
    fn devices(&self) -> Result<MultimediaDevices, MultimediaError>;

    /// Start media for a call over the given transport
    fn attach(&self, call_id: &CallId, transport: &CallTransport) -> MediaAttachment;

    /// Stop media for a call that has ended
    fn detach(&self, call_id: &CallId);
}

/// Media stack that has no audio at all
#[derive(Debug, Clone, Copy, Default)]
pub struct NullMedia;

impl MediaStack for NullMedia {
    fn devices(&self) -> Result<MultimediaDevices, MultimediaError> {
        Ok(MultimediaDevices::default())
    }

    fn attach(&self, _call_id: &CallId, _transport: &CallTransport) -> MediaAttachment {
        let (_, connection) = watch::channel(TransportStatus::Disconnected);
        let no_device = MultimediaError::new(
            ErrorSource::Microphone,
            PlatformException::new("NotFoundError", "no media stack"),
        );
        let (_, analyser) = watch::channel(Some(Err(no_device)));
        MediaAttachment {
            connection,
            analyser,
            sdp_answer: None,
        }
    }

    fn detach(&self, _call_id: &CallId) {}
}
