//! Live-stream transport abstraction.
//!
//! A room's real-time channel carries two kinds of traffic: binary CRDT
//! update frames, and JSON presence envelopes on text frames. The trait
//! keeps the session driver independent of the WebSocket implementation so
//! tests can feed scripted frames instead of opening sockets.
//!
//! Loss of this connection is the only trigger for the session's
//! `Disconnected` state; reconnection policy lives in the driver, not here.

use async_trait::async_trait;
use thiserror::Error;

use super::presence::{PresenceEnvelope, PresenceMap, PresenceRecord};

/// Errors from the live-stream transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The connection could not be established.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    /// A frame could not be sent.
    #[error("send failed: {0}")]
    SendFailed(String),
    /// The connection is closed.
    #[error("connection closed")]
    Closed,
    /// Any other transport failure.
    #[error("transport error: {0}")]
    Other(String),
}

/// A message received from the live stream.
#[derive(Debug)]
pub enum StreamMessage {
    /// Binary CRDT update frame.
    Update(Vec<u8>),
    /// The room's presence map, decoded from a text frame.
    Presence(PresenceMap),
    /// Keepalive pong.
    Pong,
    /// Server closed the connection.
    Close,
}

/// Transport for one room's live stream.
#[async_trait]
pub trait RoomTransport: Send {
    /// Send a binary CRDT update frame.
    async fn send_update(&mut self, data: Vec<u8>) -> Result<(), TransportError>;

    /// Publish (or clear, with `None`) the local presence record.
    async fn publish_presence(
        &mut self,
        record: Option<&PresenceRecord>,
    ) -> Result<(), TransportError>;

    /// Send a keepalive ping.
    async fn send_ping(&mut self) -> Result<(), TransportError>;

    /// Receive the next message. `None` means the stream ended.
    async fn recv(&mut self) -> Option<Result<StreamMessage, TransportError>>;

    /// Close the connection.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Factory for live-stream connections, one per room visit.
#[async_trait]
pub trait TransportConnector: Send + Sync {
    /// The transport type produced by this connector.
    type Transport: RoomTransport;

    /// Open a connection to `url`.
    async fn connect(&self, url: &str) -> Result<Self::Transport, TransportError>;
}

/// Serialize a presence record (or a clear marker) into its text-frame form.
pub(crate) fn presence_frame(record: Option<&PresenceRecord>) -> Result<String, TransportError> {
    let envelope = PresenceEnvelope {
        user: record.cloned(),
    };
    serde_json::to_string(&envelope).map_err(|e| TransportError::Other(e.to_string()))
}
