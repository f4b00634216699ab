//! Collaborative document plumbing.
//!
//! The CRDT engine (`yrs`) and the live-stream provider are opaque
//! collaborators: [`RoomDoc`] exposes exactly the surface the session layer
//! needs (apply remote bytes, encode full state, observe local edits), and
//! [`RoomTransport`] abstracts the wire so tests can script it.

mod doc;
mod presence;
mod tokio_transport;
mod transport;

pub use doc::{RoomDoc, UpdateCallback};
pub use presence::{PresenceEnvelope, PresenceMap, PresenceRecord};
pub use tokio_transport::{TokioConnector, TokioTransport};
pub use transport::{RoomTransport, StreamMessage, TransportConnector, TransportError};
