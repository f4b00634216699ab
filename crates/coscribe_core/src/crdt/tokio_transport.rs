//! Tokio-tungstenite implementation of the live-stream transport.
//!
//! Wraps `tokio_tungstenite::connect_async()` and implements the
//! `RoomTransport` trait.

use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::{connect_async, tungstenite::Message};

use super::presence::{PresenceMap, PresenceRecord};
use super::transport::{
    RoomTransport, StreamMessage, TransportConnector, TransportError, presence_frame,
};

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// A `RoomTransport` backed by tokio-tungstenite.
pub struct TokioTransport {
    ws: WsStream,
}

impl TokioTransport {
    /// Connect to a WebSocket URL and return a `TokioTransport`.
    pub async fn connect(url: &str) -> Result<Self, TransportError> {
        let (ws, _response) = connect_async(url)
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
        Ok(Self { ws })
    }
}

#[async_trait::async_trait]
impl RoomTransport for TokioTransport {
    async fn send_update(&mut self, data: Vec<u8>) -> Result<(), TransportError> {
        self.ws
            .send(Message::Binary(data.into()))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn publish_presence(
        &mut self,
        record: Option<&PresenceRecord>,
    ) -> Result<(), TransportError> {
        let text = presence_frame(record)?;
        self.ws
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn send_ping(&mut self) -> Result<(), TransportError> {
        self.ws
            .send(Message::Ping(vec![].into()))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<StreamMessage, TransportError>> {
        loop {
            match self.ws.next().await {
                Some(Ok(Message::Binary(data))) => {
                    return Some(Ok(StreamMessage::Update(data.to_vec())));
                }
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<PresenceMap>(&text) {
                        Ok(map) => return Some(Ok(StreamMessage::Presence(map))),
                        Err(_) => {
                            log::debug!("[TokioTransport] Ignoring unrecognized text frame");
                            continue;
                        }
                    }
                }
                Some(Ok(Message::Pong(_))) => return Some(Ok(StreamMessage::Pong)),
                // tungstenite answers pings itself.
                Some(Ok(Message::Ping(_))) => continue,
                Some(Ok(Message::Close(_))) => return Some(Ok(StreamMessage::Close)),
                // Raw frames are not expected; skip.
                Some(Ok(Message::Frame(_))) => continue,
                Some(Err(e)) => return Some(Err(TransportError::Other(e.to_string()))),
                None => return None,
            }
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.ws
            .close(None)
            .await
            .map_err(|e| TransportError::Other(e.to_string()))
    }
}

/// Connector that opens `TokioTransport` connections.
pub struct TokioConnector;

#[async_trait::async_trait]
impl TransportConnector for TokioConnector {
    type Transport = TokioTransport;

    async fn connect(&self, url: &str) -> Result<Self::Transport, TransportError> {
        TokioTransport::connect(url).await
    }
}
