//! Simulated media stack
//!
//! Attaching a call reports `Connecting`, then `Connected` after a short
//! delay, at which point the audio analyser resolves. Official transports
//! get an SDP answer straight away.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::debug;
use wavoip_core::{
    AnalyserSlot, AudioAnalyser, ErrorSource, MediaAttachment, MediaStack, MultimediaDevice,
    MultimediaDevices, MultimediaError, MultimediaKind, PlatformException,
};
use wavoip_protocol::{CallId, CallTransport, CallType, SdpDescription, TransportStatus};

/// Configuration for the simulated media stack
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimMediaConfig {
    /// Delay before the transport reports connected (ms)
    pub connect_after_ms: u64,
    /// Number of analyser frequency bins
    pub frequency_bins: usize,
    /// Platform exception raised when opening the microphone
    pub microphone_error: Option<String>,
}

impl Default for SimMediaConfig {
    fn default() -> Self {
        Self {
            connect_after_ms: 20,
            frequency_bins: 32,
            microphone_error: None,
        }
    }
}

/// What happened to the media stack, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaEvent {
    Attached(CallId, CallType),
    Detached(CallId),
}

/// Analyser producing a fixed ramp
#[derive(Debug)]
pub struct SimAnalyser {
    bins: usize,
}

impl AudioAnalyser for SimAnalyser {
    fn frequency_bin_count(&self) -> usize {
        self.bins
    }

    fn byte_frequency_data(&self, out: &mut [u8]) {
        let bins = self.bins.max(1);
        for (i, v) in out.iter_mut().take(bins).enumerate() {
            *v = (255 - (i * 255 / bins)) as u8;
        }
    }
}

struct Lines {
    connection: watch::Sender<TransportStatus>,
    analyser: watch::Sender<AnalyserSlot>,
}

struct Attached {
    lines: Arc<Lines>,
    task: JoinHandle<()>,
}

struct MediaInner {
    config: SimMediaConfig,
    attached: Mutex<HashMap<CallId, Attached>>,
    history: Mutex<Vec<MediaEvent>>,
}

#[derive(Clone)]
pub struct SimulatedMedia {
    inner: Arc<MediaInner>,
}

impl Default for SimulatedMedia {
    fn default() -> Self {
        Self::new(SimMediaConfig::default())
    }
}

impl SimulatedMedia {
    pub fn new(config: SimMediaConfig) -> Self {
        Self {
            inner: Arc::new(MediaInner {
                config,
                attached: Mutex::new(HashMap::new()),
                history: Mutex::new(Vec::new()),
            }),
        }
    }

    fn attached(&self) -> MutexGuard<'_, HashMap<CallId, Attached>> {
        self.inner.attached.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, event: MediaEvent) {
        self.inner
            .history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }

    pub fn history(&self) -> Vec<MediaEvent> {
        self.inner
            .history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Whether media is currently attached for `call_id`
    pub fn is_attached(&self, call_id: &CallId) -> bool {
        self.attached().contains_key(call_id)
    }

    fn microphone(&self) -> Result<(), MultimediaError> {
        match &self.inner.config.microphone_error {
            Some(name) => Err(MultimediaError::new(
                ErrorSource::Microphone,
                PlatformException::new(name.clone(), "simulated microphone failure"),
            )),
            None => Ok(()),
        }
    }
}

impl MediaStack for SimulatedMedia {
    fn devices(&self) -> Result<MultimediaDevices, MultimediaError> {
        self.microphone()?;
        Ok(MultimediaDevices {
            microphones: vec![MultimediaDevice {
                kind: MultimediaKind::AudioIn,
                label: "Simulated Microphone".to_string(),
                device_id: "sim-mic".to_string(),
            }],
            speakers: vec![MultimediaDevice {
                kind: MultimediaKind::AudioOut,
                label: "Simulated Speaker".to_string(),
                device_id: "sim-speaker".to_string(),
            }],
        })
    }

    fn attach(&self, call_id: &CallId, transport: &CallTransport) -> MediaAttachment {
        let (connection_tx, connection) = watch::channel(TransportStatus::Connecting);
        let (analyser_tx, analyser) = watch::channel(None);
        let lines = Arc::new(Lines {
            connection: connection_tx,
            analyser: analyser_tx,
        });

        let sdp_answer = match transport {
            CallTransport::Official { .. } => {
                let (tx, rx) = oneshot::channel();
                let _ = tx.send(SdpDescription::answer(format!(
                    "v=0\r\no=- 0 0 IN IP4 127.0.0.1\r\ns={}\r\n",
                    call_id
                )));
                Some(rx)
            }
            CallTransport::Unofficial { .. } => None,
        };

        let outcome = self.microphone().map(|()| {
            Arc::new(SimAnalyser {
                bins: self.inner.config.frequency_bins,
            }) as Arc<dyn AudioAnalyser>
        });
        let delay = Duration::from_millis(self.inner.config.connect_after_ms);
        let task_lines = Arc::clone(&lines);
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            task_lines.connection.send_replace(TransportStatus::Connected);
            task_lines.analyser.send_replace(Some(outcome));
        });

        debug!("Media attached for call {} ({})", call_id, transport.call_type().as_str());
        self.record(MediaEvent::Attached(call_id.clone(), transport.call_type()));
        if let Some(previous) = self.attached().insert(call_id.clone(), Attached { lines, task }) {
            previous.task.abort();
        }

        MediaAttachment {
            connection,
            analyser,
            sdp_answer,
        }
    }

    fn detach(&self, call_id: &CallId) {
        let Some(attached) = self.attached().remove(call_id) else {
            return;
        };
        attached.task.abort();
        attached.lines.connection.send_replace(TransportStatus::Disconnected);
        debug!("Media detached for call {}", call_id);
        self.record(MediaEvent::Detached(call_id.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_attach_connects_and_resolves_analyser() {
        let media = SimulatedMedia::default();
        let id = CallId::new("c1");
        let mut attachment = media.attach(&id, &CallTransport::relay("relay", "1"));
        assert!(attachment.sdp_answer.is_none());
        assert_eq!(*attachment.connection.borrow(), TransportStatus::Connecting);

        attachment
            .connection
            .wait_for(|s| *s == TransportStatus::Connected)
            .await
            .unwrap();
        let slot = attachment.analyser.wait_for(Option::is_some).await.unwrap().clone();
        let analyser = slot.unwrap().unwrap();
        assert_eq!(analyser.frequency_bin_count(), 32);

        let mut data = vec![0u8; 32];
        analyser.byte_frequency_data(&mut data);
        assert_eq!(data[0], 255);
    }

    #[tokio::test]
    async fn test_official_transport_gets_answer() {
        let media = SimulatedMedia::default();
        let transport = CallTransport::Official {
            sdp_offer: SdpDescription::offer("v=0"),
        };
        let attachment = media.attach(&CallId::new("c1"), &transport);
        let answer = attachment.sdp_answer.unwrap().await.unwrap();
        assert_eq!(answer.kind, wavoip_protocol::SdpKind::Answer);
    }

    #[tokio::test]
    async fn test_detach_disconnects() {
        let media = SimulatedMedia::default();
        let id = CallId::new("c1");
        let attachment = media.attach(&id, &CallTransport::relay("relay", "1"));
        media.detach(&id);
        media.detach(&id);

        assert_eq!(*attachment.connection.borrow(), TransportStatus::Disconnected);
        assert!(!media.is_attached(&id));
        assert_eq!(
            media.history(),
            vec![
                MediaEvent::Attached(id.clone(), CallType::Unofficial),
                MediaEvent::Detached(id)
            ]
        );
    }

    #[tokio::test]
    async fn test_microphone_failure_surfaces_everywhere() {
        let media = SimulatedMedia::new(SimMediaConfig {
            microphone_error: Some("NotAllowedError".into()),
            ..Default::default()
        });
        let err = media.devices().unwrap_err();
        assert_eq!(err.to_string(), "Microphone permission was denied");

        let mut attachment = media.attach(&CallId::new("c1"), &CallTransport::relay("relay", "1"));
        let slot = attachment.analyser.wait_for(Option::is_some).await.unwrap().clone();
        assert!(slot.unwrap().is_err());
    }
}
