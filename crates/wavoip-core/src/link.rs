//! Signaling link types
//!
//! A device session talks to its remote device through a [`SignalingLink`]:
//! requests go out on an mpsc channel, each carrying an optional oneshot
//! responder for the acknowledgment, and pushes come back on a second
//! channel. The other half, a [`LinkEndpoint`], is driven by whatever owns
//! the actual socket (or by a simulator).

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use wavoip_protocol::{ClientRequest, DeviceToken, ServerPush};

/// One outbound request
#[derive(Debug)]
pub struct SignalRequest {
    /// The request to deliver
    pub request: ClientRequest,
    /// Responder for the acknowledgment (`None` for fire-and-forget events)
    pub ack: Option<oneshot::Sender<Value>>,
}

impl SignalRequest {
    /// Acknowledge with a raw JSON value
    ///
    /// Returns `false` if nobody is waiting any more, or the request
    /// expected no acknowledgment.
    pub fn acknowledge(self, value: Value) -> bool {
        match self.ack {
            Some(tx) => tx.send(value).is_ok(),
            None => false,
        }
    }
}

/// Client half of a device's signaling channel
#[derive(Debug)]
pub struct SignalingLink {
    /// Sender for outbound requests
    pub requests: mpsc::Sender<SignalRequest>,
    /// Receiver for inbound pushes
    pub pushes: mpsc::Receiver<ServerPush>,
}

/// Remote half of a device's signaling channel
#[derive(Debug)]
pub struct LinkEndpoint {
    /// Requests sent by the client
    pub requests: mpsc::Receiver<SignalRequest>,
    /// Sender for pushes towards the client
    pub pushes: mpsc::Sender<ServerPush>,
}

/// Create a connected link pair
///
/// Returns (SignalingLink for the session, LinkEndpoint for the transport task)
pub fn signaling_pair(request_buffer: usize, push_buffer: usize) -> (SignalingLink, LinkEndpoint) {
    let (req_tx, req_rx) = mpsc::channel(request_buffer.max(1));
    let (push_tx, push_rx) = mpsc::channel(push_buffer.max(1));
    (
        SignalingLink {
            requests: req_tx,
            pushes: push_rx,
        },
        LinkEndpoint {
            requests: req_rx,
            pushes: push_tx,
        },
    )
}

/// Opens signaling links for device tokens
///
/// This is the seam to the transport: connection, reconnection and
/// serialization all live behind it.
pub trait Connector: Send + Sync + 'static {
    fn connect(&self, token: &DeviceToken) -> SignalingLink;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_pair_carries_requests_and_acks() {
        let (link, mut endpoint) = signaling_pair(4, 4);

        let (ack_tx, ack_rx) = oneshot::channel();
        link.requests
            .send(SignalRequest {
                request: ClientRequest::Status,
                ack: Some(ack_tx),
            })
            .await
            .unwrap();

        let req = endpoint.requests.recv().await.unwrap();
        assert_eq!(req.request, ClientRequest::Status);
        assert!(req.acknowledge(json!("open")));
        assert_eq!(ack_rx.await.unwrap(), json!("open"));
    }

    #[test]
    fn test_fire_and_forget_has_no_responder() {
        let req = SignalRequest {
            request: ClientRequest::Mute,
            ack: None,
        };
        assert!(!req.acknowledge(json!(null)));
    }
}
