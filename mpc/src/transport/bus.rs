//! The message bus (component E): per-peer duplex channels, an identity
//! handshake, and a type-routed dispatcher.

use std::collections::HashMap;
use std::io;
use std::pin::Pin;
use std::sync::Arc;

use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::{oneshot, Mutex as AsyncMutex};

use super::envelope::{Envelope, MessageType, Payload, PRE_HANDSHAKE};
use super::peer_directory::{PeerDirectory, PeerInfo};
use crate::{PartyId, NUM_PARTIES};

/// Error raised by bus send/receive operations.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("no channel registered for party {0}")]
    NoChannel(PartyId),
    #[error("send to party {0} failed: {1}")]
    Send(PartyId, io::Error),
    #[error("channel to party {0} closed")]
    Closed(PartyId),
}

type BoxedSink = Pin<Box<dyn Sink<Envelope, Error = io::Error> + Send>>;
type BoxedStream = Pin<Box<dyn Stream<Item = io::Result<Envelope>> + Send>>;

/// A handler invoked for every envelope of the [`MessageType`] it was
/// registered under, in registration order. A handler returning `Err` is
/// logged and does not stop subsequent handlers or tear down the channel.
pub type Handler = Arc<dyn Fn(Envelope) -> Result<(), String> + Send + Sync>;

struct PendingRequest {
    session_id: String,
    variable: String,
    from: PartyId,
    reply: oneshot::Sender<Envelope>,
}

/// The running message bus for one party: owns the per-peer send halves,
/// the peer directory, and the handler registry that the receive loops
/// dispatch into.
pub struct MessageBus {
    party_id: PartyId,
    senders: Vec<AsyncMutex<Option<BoxedSink>>>,
    directory: PeerDirectory,
    handlers: std::sync::Mutex<HashMap<MessageType, Vec<Handler>>>,
    pending_reconstructions: std::sync::Mutex<Vec<PendingRequest>>,
}

impl MessageBus {
    pub fn new(party_id: PartyId) -> Arc<Self> {
        let mut senders = Vec::with_capacity(NUM_PARTIES);
        senders.resize_with(NUM_PARTIES, || AsyncMutex::new(None));
        Arc::new(MessageBus {
            party_id,
            senders,
            directory: PeerDirectory::new(),
            handlers: std::sync::Mutex::new(HashMap::new()),
            pending_reconstructions: std::sync::Mutex::new(Vec::new()),
        })
    }

    pub fn party_id(&self) -> PartyId {
        self.party_id
    }

    pub fn peer_directory(&self) -> &PeerDirectory {
        &self.directory
    }

    /// Register a handler for `message_type`, appended after any already
    /// registered for that type.
    pub fn on(&self, message_type: MessageType, handler: Handler) {
        self.handlers
            .lock()
            .expect("handler registry poisoned")
            .entry(message_type)
            .or_default()
            .push(handler);
    }

    /// Install a channel for `peer`, replacing (and dropping, closing) any
    /// existing one. `sink`/`stream` are the split halves of a connected
    /// duplex channel; `stream` is handed to a freshly spawned receive loop.
    pub async fn register_peer(
        self: &Arc<Self>,
        peer: PartyId,
        sink: BoxedSink,
        stream: BoxedStream,
    ) {
        {
            let mut guard = self.senders[peer].lock().await;
            *guard = Some(sink);
        }
        let bus = Arc::clone(self);
        tokio::spawn(async move { bus.receive_loop(peer, stream).await });
    }

    async fn receive_loop(self: Arc<Self>, peer: PartyId, mut stream: BoxedStream) {
        while let Some(received) = stream.next().await {
            match received {
                Ok(envelope) => self.dispatch(envelope),
                Err(error) => {
                    tracing::warn!(%peer, %error, "channel closed while receiving");
                    break;
                }
            }
        }
    }

    fn dispatch(&self, envelope: Envelope) {
        if let Payload::Handshake {
            party_id,
            blockchain_address,
        } = &envelope.payload
        {
            self.directory.update(
                *party_id,
                PeerInfo {
                    network_address: String::new(),
                    blockchain_address: blockchain_address.clone(),
                },
            );
        }

        if envelope.message_type == MessageType::ReconstructionResponse {
            if let Payload::ReconstructionResponse { variable, .. } = &envelope.payload {
                let mut pending = self
                    .pending_reconstructions
                    .lock()
                    .expect("pending reconstructions poisoned");
                if let Some(index) = pending.iter().position(|request| {
                    request.session_id == envelope.session_id
                        && request.variable == *variable
                        && request.from == envelope.from
                }) {
                    let request = pending.remove(index);
                    let _ = request.reply.send(envelope.clone());
                }
            }
        }

        let handlers = self.handlers.lock().expect("handler registry poisoned");
        if let Some(registered) = handlers.get(&envelope.message_type) {
            for handler in registered {
                if let Err(error) = handler(envelope.clone()) {
                    tracing::warn!(message_type = ?envelope.message_type, %error, "handler failed");
                }
            }
        }
    }

    /// Send `envelope` to a single peer.
    pub async fn send_to(&self, peer: PartyId, envelope: Envelope) -> Result<(), BusError> {
        let mut guard = self.senders[peer].lock().await;
        let sink = guard.as_mut().ok_or(BusError::NoChannel(peer))?;
        sink.send(envelope)
            .await
            .map_err(|error| BusError::Send(peer, error))
    }

    /// Send `envelope` (cloned per peer) to every peer but self.
    pub async fn broadcast(&self, mut make_envelope: impl FnMut(PartyId) -> Envelope) -> Vec<(PartyId, Result<(), BusError>)> {
        let mut results = Vec::with_capacity(NUM_PARTIES - 1);
        for peer in 0..NUM_PARTIES {
            if peer == self.party_id {
                continue;
            }
            let envelope = make_envelope(peer);
            results.push((peer, self.send_to(peer, envelope).await));
        }
        results
    }

    /// One-shot helper: send a RECONSTRUCTION_REQUEST to `peer` for
    /// `variable` under `session_id`, and resolve with the first matching
    /// RECONSTRUCTION_RESPONSE (matching `from`, `session_id`, `variable`).
    pub async fn request_shares(
        &self,
        peer: PartyId,
        session_id: &str,
        variable: &str,
    ) -> Result<Envelope, BusError> {
        let (reply, receiver) = oneshot::channel();
        self.pending_reconstructions.lock().expect("pending reconstructions poisoned").push(PendingRequest {
            session_id: session_id.to_string(),
            variable: variable.to_string(),
            from: peer,
            reply,
        });

        let request = Envelope::reconstruction_request(
            self.party_id,
            peer,
            session_id.to_string(),
            variable.to_string(),
        );
        self.send_to(peer, request).await?;

        receiver.await.map_err(|_| BusError::Closed(peer))
    }

    /// Perform the identity handshake on a freshly registered channel: send
    /// our own identity, matching the spec's "first message is
    /// HANDSHAKE_REQUEST from the accepting side, HANDSHAKE_RESPONSE from
    /// the connecting side" rule.
    pub async fn send_handshake(
        &self,
        peer: PartyId,
        blockchain_address: String,
        is_accepting_side: bool,
    ) -> Result<(), BusError> {
        let envelope = if is_accepting_side {
            Envelope::handshake_request(self.party_id, blockchain_address)
        } else {
            Envelope::handshake_response(self.party_id, blockchain_address)
        };
        self.send_to(peer, envelope).await
    }
}
