//! Multi-device call dispatch
//!
//! Candidate devices are tried one at a time, in order, until one of them
//! starts the call. The attempts run in a background task driven by its
//! consumer: every [`CallAttempts::next`] hands the task a oneshot responder
//! and the task makes exactly one attempt to answer it. Once the consumer
//! stops pulling no further device is tried, while an attempt already in
//! flight still runs to completion.

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};
use wavoip_protocol::DeviceToken;

use crate::call::CallOutgoing;
use crate::device::Device;
use crate::error::{DeviceFailure, DispatchError, SessionError};

/// General message of an aggregated dispatch failure
pub const ALL_DEVICES_FAILED: &str = "no device could start the call";

/// What to call and from where
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRequest {
    /// Target phone number
    pub to: String,
    /// Candidate devices in order; every registered device when `None`
    pub from_tokens: Option<Vec<DeviceToken>>,
}

impl CallRequest {
    pub fn new(to: impl Into<String>) -> Self {
        Self {
            to: to.into(),
            from_tokens: None,
        }
    }

    /// Restrict the candidates to `tokens`, tried in the given order
    pub fn from_devices<I, T>(mut self, tokens: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<DeviceToken>,
    {
        self.from_tokens = Some(tokens.into_iter().map(Into::into).collect());
        self
    }
}

/// A resolved candidate: a registered device or a token nobody knows
#[derive(Debug, Clone)]
pub(crate) enum Candidate {
    Registered(Device),
    Unknown(DeviceToken),
}

impl Candidate {
    fn token(&self) -> DeviceToken {
        match self {
            Candidate::Registered(device) => device.token().clone(),
            Candidate::Unknown(token) => token.clone(),
        }
    }

    async fn attempt(&self, to: &str) -> Result<CallOutgoing, SessionError> {
        match self {
            Candidate::Registered(device) => device.start_call(to).await,
            Candidate::Unknown(_) => Err(SessionError::UnknownDevice),
        }
    }
}

/// One step of a progressive dispatch
#[derive(Debug)]
pub enum CallAttempt {
    /// A device failed; the next one will be tried
    Failed {
        token: DeviceToken,
        reason: SessionError,
    },
    /// A device started the call; the sequence ends here
    Connected {
        token: DeviceToken,
        call: CallOutgoing,
    },
    /// No candidates remain; the sequence ends here
    Exhausted { message: String },
}

impl CallAttempt {
    /// Whether the sequence ends with this entry
    pub fn is_final(&self) -> bool {
        !matches!(self, CallAttempt::Failed { .. })
    }
}

type Pull = oneshot::Sender<CallAttempt>;

/// Progressive dispatch, one entry per attempt
///
/// Each call to [`next`](Self::next) lets exactly one more device be tried.
/// Dropping it ends the sequence.
#[derive(Debug)]
pub struct CallAttempts {
    pulls: mpsc::Sender<Pull>,
    done: bool,
}

impl CallAttempts {
    /// Next attempt result, or `None` after the final entry
    pub async fn next(&mut self) -> Option<CallAttempt> {
        if self.done {
            return None;
        }
        let (tx, rx) = oneshot::channel();
        if self.pulls.send(tx).await.is_err() {
            self.done = true;
            return None;
        }
        match rx.await {
            Ok(attempt) => {
                self.done = attempt.is_final();
                Some(attempt)
            }
            Err(_) => {
                self.done = true;
                None
            }
        }
    }
}

/// Start the attempt task over `candidates`
pub(crate) fn spawn_attempts(to: String, candidates: Vec<Candidate>) -> CallAttempts {
    let (tx, rx) = mpsc::channel(1);
    tokio::spawn(run_attempts(to, candidates, rx));
    CallAttempts {
        pulls: tx,
        done: false,
    }
}

async fn run_attempts(to: String, candidates: Vec<Candidate>, mut pulls: mpsc::Receiver<Pull>) {
    let message = if candidates.is_empty() {
        SessionError::NoDevices.to_string()
    } else {
        ALL_DEVICES_FAILED.to_string()
    };
    let mut candidates = candidates.into_iter();

    while let Some(reply) = pulls.recv().await {
        let entry = match candidates.next() {
            Some(candidate) => {
                let token = candidate.token();
                match candidate.attempt(&to).await {
                    Ok(call) => {
                        info!("Call to {} placed from {}", to, token);
                        CallAttempt::Connected { token, call }
                    }
                    Err(reason) => {
                        debug!("Device {} could not call {}: {}", token, to, reason);
                        CallAttempt::Failed { token, reason }
                    }
                }
            }
            None => CallAttempt::Exhausted {
                message: message.clone(),
            },
        };

        let finished = entry.is_final();
        if reply.send(entry).is_err() {
            debug!("Dispatch to {} abandoned mid-attempt", to);
            return;
        }
        if finished {
            return;
        }
    }
    debug!("Dispatch to {} abandoned", to);
}

/// Drain a dispatch into its final outcome
pub(crate) async fn settle(mut attempts: CallAttempts) -> Result<CallOutgoing, DispatchError> {
    let mut failures = Vec::new();
    while let Some(attempt) = attempts.next().await {
        match attempt {
            CallAttempt::Failed { token, reason } => failures.push(DeviceFailure { token, reason }),
            CallAttempt::Connected { call, .. } => return Ok(call),
            CallAttempt::Exhausted { message } => {
                // Nothing was tried
                if failures.is_empty() {
                    failures.push(DeviceFailure {
                        token: DeviceToken::new(""),
                        reason: SessionError::NoDevices,
                    });
                }
                return Err(DispatchError {
                    message,
                    devices: failures,
                });
            }
        }
    }
    Err(DispatchError {
        message: ALL_DEVICES_FAILED.to_string(),
        devices: failures,
    })
}
