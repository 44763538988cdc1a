//! Simulated device actor task
//!
//! Owns a [`SimDevice`] and drives it from the remote half of a signaling
//! link. The task uses a select! loop to:
//! - Answer requests arriving on the link and log them
//! - Apply remote-side commands (ring, answer, hang up, raw pushes)
//! - Fire the peer's scheduled answer for placed calls

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};
use wavoip_core::{LinkEndpoint, SignalRequest};
use wavoip_protocol::{CallDirection, CallId, CallStatus, ClientRequest, DeviceStatus, DeviceToken, ServerPush};

use crate::SimDevice;

/// Commands that can be sent to a simulated device actor
#[derive(Debug)]
pub enum SimCommand {
    /// An inbound call arrives; replies with its id, or `None` if busy
    Ring {
        phone: String,
        reply: oneshot::Sender<Option<CallId>>,
    },
    /// The peer picks up the outgoing call
    Answer,
    /// The remote side ends the call with the given status
    HangUp(CallStatus),
    /// Change the device status
    SetStatus(DeviceStatus),
    /// Send an arbitrary push
    Push(ServerPush),
    /// Shutdown the simulated device actor
    Shutdown,
}

/// Requests received by simulated devices, in arrival order
#[derive(Debug, Clone, Default)]
pub struct RequestLog {
    entries: Arc<Mutex<Vec<(DeviceToken, ClientRequest)>>>,
}

impl RequestLog {
    fn lock(&self) -> MutexGuard<'_, Vec<(DeviceToken, ClientRequest)>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn record(&self, token: &DeviceToken, request: &ClientRequest) {
        self.lock().push((token.clone(), request.clone()));
    }

    /// Every logged request
    pub fn entries(&self) -> Vec<(DeviceToken, ClientRequest)> {
        self.lock().clone()
    }

    /// Requests received by `token`
    pub fn for_device(&self, token: &DeviceToken) -> Vec<ClientRequest> {
        self.lock()
            .iter()
            .filter(|(t, _)| t == token)
            .map(|(_, r)| r.clone())
            .collect()
    }

    /// How many `event` requests `token` received
    pub fn count(&self, token: &DeviceToken, event: &str) -> usize {
        self.lock()
            .iter()
            .filter(|(t, r)| t == token && r.event() == event)
            .count()
    }
}

/// Run the simulated device actor task
///
/// Returns when the client drops its link, the command channel closes or a
/// [`SimCommand::Shutdown`] arrives. Requests the device declines to
/// acknowledge are held until then.
pub async fn run_sim_device(
    mut device: SimDevice,
    mut endpoint: LinkEndpoint,
    mut cmd_rx: mpsc::Receiver<SimCommand>,
    log: RequestLog,
) {
    let answer_delay = device.config().answer_after_ms.map(Duration::from_millis);
    let mut answer_at: Option<Instant> = None;
    let mut held: Vec<SignalRequest> = Vec::new();

    info!(
        "Starting simulated device {} ({})",
        device.token(),
        device.status()
    );

    device.announce();
    if !flush(&mut device, &endpoint).await {
        return;
    }

    loop {
        tokio::select! {
            request = endpoint.requests.recv() => {
                let Some(request) = request else {
                    info!("Simulated device {}: link closed", device.token());
                    break;
                };
                log.record(device.token(), &request.request);
                debug!("Simulated device {} <- {}", device.token(), request.request.event());

                let was_idle = device.call().is_none();
                match device.handle(&request.request) {
                    Some(ack) => {
                        if !request.acknowledge(ack) {
                            debug!("Simulated device {}: ack not awaited", device.token());
                        }
                    }
                    None if request.ack.is_some() => held.push(request),
                    None => {}
                }

                let placed = was_idle
                    && device
                        .call()
                        .is_some_and(|call| call.direction == CallDirection::Outgoing);
                if placed {
                    answer_at = answer_delay.map(|delay| Instant::now() + delay);
                }
            }
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(SimCommand::Ring { phone, reply }) => {
                        let id = device.ring(&phone);
                        if id.is_none() {
                            debug!("Simulated device {} busy, ring from {} dropped", device.token(), phone);
                        }
                        let _ = reply.send(id);
                    }
                    Some(SimCommand::Answer) => {
                        device.answer();
                    }
                    Some(SimCommand::HangUp(status)) => {
                        device.hang_up(status);
                    }
                    Some(SimCommand::SetStatus(status)) => device.set_status(status),
                    Some(SimCommand::Push(push)) => {
                        if endpoint.pushes.send(push).await.is_err() {
                            break;
                        }
                    }
                    Some(SimCommand::Shutdown) | None => {
                        info!("Simulated device {} shutting down", device.token());
                        break;
                    }
                }
            }
            _ = sleep_until(answer_at.unwrap_or_else(Instant::now)), if answer_at.is_some() => {
                answer_at = None;
                if device.answer() {
                    debug!("Simulated device {}: peer answered", device.token());
                }
            }
        }

        if !flush(&mut device, &endpoint).await {
            return;
        }
    }

    debug!(
        "Simulated device {} stopped with {} unanswered requests",
        device.token(),
        held.len()
    );
}

/// Send every queued push; false once the client is gone
async fn flush(device: &mut SimDevice, endpoint: &LinkEndpoint) -> bool {
    while let Some(push) = device.take_push() {
        debug!("Simulated device {} -> {}", device.token(), push.event());
        if endpoint.pushes.send(push).await.is_err() {
            warn!("Simulated device {}: client gone", device.token());
            return false;
        }
    }
    true
}
