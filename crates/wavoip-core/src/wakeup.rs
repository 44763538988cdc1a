//! Wake-up coordination for hibernating devices
//!
//! Every device gets its own request, all in flight at once. The batch form
//! hands back one handle per device in input order; the progressive form
//! yields outcomes as they complete.

use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, warn};
use wavoip_protocol::DeviceToken;

use crate::device::Device;

/// Result of one wake-up attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WakeOutcome {
    pub token: DeviceToken,
    pub waken: bool,
}

/// Pending wake-up of one device
#[derive(Debug)]
pub struct WakeHandle {
    token: DeviceToken,
    task: JoinHandle<bool>,
}

impl WakeHandle {
    pub fn token(&self) -> &DeviceToken {
        &self.token
    }

    /// Wait for the attempt; a failed task counts as not woken
    pub async fn outcome(self) -> WakeOutcome {
        let waken = match self.task.await {
            Ok(waken) => waken,
            Err(e) => {
                warn!("Wake-up of {} did not finish: {}", self.token, e);
                false
            }
        };
        WakeOutcome {
            token: self.token,
            waken,
        }
    }
}

/// Wake-up outcomes in completion order
#[derive(Debug)]
pub struct WakeUps {
    tasks: JoinSet<WakeOutcome>,
}

impl WakeUps {
    /// Next finished outcome, or `None` once every attempt has reported
    pub async fn next(&mut self) -> Option<WakeOutcome> {
        loop {
            match self.tasks.join_next().await? {
                Ok(outcome) => return Some(outcome),
                Err(e) => warn!("Wake-up task failed: {}", e),
            }
        }
    }

    /// Attempts not yet reported
    pub fn remaining(&self) -> usize {
        self.tasks.len()
    }
}

async fn wake(token: DeviceToken, device: Option<Device>) -> bool {
    match device {
        Some(device) => {
            let waken = device.wake_up().await;
            debug!("Wake-up of {}: {}", token, waken);
            waken
        }
        None => {
            debug!("Wake-up of unknown device {}", token);
            false
        }
    }
}

/// Start one wake-up per target
pub(crate) fn wake_all(targets: Vec<(DeviceToken, Option<Device>)>) -> Vec<WakeHandle> {
    targets
        .into_iter()
        .map(|(token, device)| WakeHandle {
            task: tokio::spawn(wake(token.clone(), device)),
            token,
        })
        .collect()
}

/// Start one wake-up per target, reporting in completion order
pub(crate) fn wake_progressive(targets: Vec<(DeviceToken, Option<Device>)>) -> WakeUps {
    let mut tasks = JoinSet::new();
    for (token, device) in targets {
        tasks.spawn(async move {
            let waken = wake(token.clone(), device).await;
            WakeOutcome { token, waken }
        });
    }
    WakeUps { tasks }
}
