//! # Transport Abstraction
//!
//! A half-duplex pair of "send one envelope" / "receive one envelope"
//! operations; this is the one shape the bridge actually needs out of a
//! transport. Concrete wire mechanisms live under this module;
//! [`channel`] is the in-process transport used by tests and the demo
//! binary, [`framed`] is the length-prefixed byte-stream transport used for
//! Unix domain sockets and TCP.

pub mod channel;
pub mod framed;

use async_trait::async_trait;

use crate::error::BridgeError;
use crate::protocol::Envelope;

/// The sending half of an endpoint. Distinct from [`EndpointReceiver`] so a
/// transport can hand out each half to a different task (the dispatcher's
/// read loop owns the receiver; callers posting new calls share the sender).
#[async_trait]
pub trait EndpointSender: Send + Sync {
    async fn send(&self, envelope: Envelope) -> Result<(), BridgeError>;
}

/// The receiving half of an endpoint. `recv` returns `Ok(None)` exactly once,
/// when the peer is gone and no further envelopes will arrive; the
/// dispatcher's read loop treats that as connection loss.
#[async_trait]
pub trait EndpointReceiver: Send {
    async fn recv(&mut self) -> Result<Option<Envelope>, BridgeError>;
}

/// A constructed, not-yet-split transport endpoint.
pub struct EndpointHalves {
    pub sender: Box<dyn EndpointSender>,
    pub receiver: Box<dyn EndpointReceiver>,
}

impl EndpointHalves {
    pub fn new(sender: Box<dyn EndpointSender>, receiver: Box<dyn EndpointReceiver>) -> Self {
        EndpointHalves { sender, receiver }
    }
}
