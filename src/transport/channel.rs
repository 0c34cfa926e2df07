//! In-process transport backed by `tokio::sync::mpsc`. Used by the demo
//! binary (which spawns its "worker" as a task rather than a process) and by
//! the integration tests, where a real socket would add nothing but
//! latency.

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{EndpointHalves, EndpointReceiver, EndpointSender};
use crate::error::BridgeError;
use crate::protocol::Envelope;

pub struct ChannelSender {
    tx: mpsc::UnboundedSender<Envelope>,
}

#[async_trait]
impl EndpointSender for ChannelSender {
    async fn send(&self, envelope: Envelope) -> Result<(), BridgeError> {
        self.tx
            .send(envelope)
            .map_err(|_| BridgeError::ConnectionClosed)
    }
}

pub struct ChannelReceiver {
    rx: mpsc::UnboundedReceiver<Envelope>,
}

#[async_trait]
impl EndpointReceiver for ChannelReceiver {
    async fn recv(&mut self) -> Result<Option<Envelope>, BridgeError> {
        Ok(self.rx.recv().await)
    }
}

/// Build a connected pair of in-process endpoints: sending on `a`'s sender
/// delivers to `b`'s receiver and vice versa.
pub fn pair() -> (EndpointHalves, EndpointHalves) {
    let (tx_a, rx_a) = mpsc::unbounded_channel();
    let (tx_b, rx_b) = mpsc::unbounded_channel();

    let a = EndpointHalves::new(
        Box::new(ChannelSender { tx: tx_a }),
        Box::new(ChannelReceiver { rx: rx_b }),
    );
    let b = EndpointHalves::new(
        Box::new(ChannelSender { tx: tx_b }),
        Box::new(ChannelReceiver { rx: rx_a }),
    );
    (a, b)
}
