//! Simulated signaling network
//!
//! A [`Connector`] that answers every `connect` with a fresh simulated
//! device task. Devices are configured per token up front; unknown tokens
//! get the network's default configuration.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;
use wavoip_core::{signaling_pair, Connector, SignalingLink};
use wavoip_protocol::{CallId, CallStatus, ClientRequest, DeviceStatus, DeviceToken, ServerPush};

use crate::device_task::{run_sim_device, RequestLog, SimCommand};
use crate::{SimDevice, SimDeviceConfig};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SimError {
    #[error("no simulated device connected as {0}")]
    NotConnected(DeviceToken),

    #[error("simulated device {0} has stopped")]
    Stopped(DeviceToken),
}

struct NetworkInner {
    default: SimDeviceConfig,
    configs: Mutex<HashMap<DeviceToken, SimDeviceConfig>>,
    controls: Mutex<HashMap<DeviceToken, mpsc::Sender<SimCommand>>>,
    log: RequestLog,
}

/// In-process network of simulated devices
#[derive(Clone)]
pub struct SimulatedNetwork {
    inner: Arc<NetworkInner>,
}

impl Default for SimulatedNetwork {
    fn default() -> Self {
        Self::new(SimDeviceConfig::default())
    }
}

impl SimulatedNetwork {
    /// Create a network whose unconfigured devices use `default`
    pub fn new(default: SimDeviceConfig) -> Self {
        Self {
            inner: Arc::new(NetworkInner {
                default,
                configs: Mutex::new(HashMap::new()),
                controls: Mutex::new(HashMap::new()),
                log: RequestLog::default(),
            }),
        }
    }

    fn configs(&self) -> MutexGuard<'_, HashMap<DeviceToken, SimDeviceConfig>> {
        self.inner.configs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn controls(&self) -> MutexGuard<'_, HashMap<DeviceToken, mpsc::Sender<SimCommand>>> {
        self.inner.controls.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Configure the device that will answer for `token`
    pub fn configure(&self, token: impl Into<DeviceToken>, config: SimDeviceConfig) -> &Self {
        self.configs().insert(token.into(), config);
        self
    }

    pub fn log(&self) -> &RequestLog {
        &self.inner.log
    }

    pub fn requests(&self, token: &DeviceToken) -> Vec<ClientRequest> {
        self.inner.log.for_device(token)
    }

    /// Remote-side control of a connected device
    pub fn control(&self, token: &DeviceToken) -> Result<SimControl, SimError> {
        self.controls()
            .get(token)
            .cloned()
            .map(|commands| SimControl {
                token: token.clone(),
                commands,
            })
            .ok_or_else(|| SimError::NotConnected(token.clone()))
    }
}

impl Connector for SimulatedNetwork {
    fn connect(&self, token: &DeviceToken) -> SignalingLink {
        let config = self
            .configs()
            .get(token)
            .cloned()
            .unwrap_or_else(|| self.inner.default.clone());
        debug!("Connecting simulated device {}", token);

        let (link, endpoint) = signaling_pair(32, 64);
        let (cmd_tx, cmd_rx) = mpsc::channel(16);
        self.controls().insert(token.clone(), cmd_tx);
        tokio::spawn(run_sim_device(
            SimDevice::new(token.clone(), config),
            endpoint,
            cmd_rx,
            self.inner.log.clone(),
        ));
        link
    }
}

/// Handle for acting as the remote side of one simulated device
#[derive(Debug, Clone)]
pub struct SimControl {
    token: DeviceToken,
    commands: mpsc::Sender<SimCommand>,
}

impl SimControl {
    pub fn token(&self) -> &DeviceToken {
        &self.token
    }

    async fn send(&self, cmd: SimCommand) -> Result<(), SimError> {
        self.commands
            .send(cmd)
            .await
            .map_err(|_| SimError::Stopped(self.token.clone()))
    }

    /// Ring the device from `phone`; `None` if it is busy
    pub async fn ring(&self, phone: &str) -> Result<Option<CallId>, SimError> {
        let (reply, rx) = oneshot::channel();
        self.send(SimCommand::Ring {
            phone: phone.to_string(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| SimError::Stopped(self.token.clone()))
    }

    pub async fn answer(&self) -> Result<(), SimError> {
        self.send(SimCommand::Answer).await
    }

    pub async fn hang_up(&self, status: CallStatus) -> Result<(), SimError> {
        self.send(SimCommand::HangUp(status)).await
    }

    pub async fn set_status(&self, status: DeviceStatus) -> Result<(), SimError> {
        self.send(SimCommand::SetStatus(status)).await
    }

    pub async fn push(&self, push: ServerPush) -> Result<(), SimError> {
        self.send(SimCommand::Push(push)).await
    }

    pub async fn shutdown(&self) -> Result<(), SimError> {
        self.send(SimCommand::Shutdown).await
    }
}
