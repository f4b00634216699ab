//! Room session: the reconciliation state machine and its tokio driver.
//!
//! The split mirrors the two halves of the problem: [`RoomSession`] is the
//! pure state machine (events in, actions out), [`RoomClient`] is the
//! platform layer that owns the transport, the reconnect/backoff loop, the
//! debounce timer, and the HTTP calls the machine asks for.

mod client;
mod debounce;
mod machine;

pub use client::{RoomClient, SessionCommand, SessionEventHandler};
pub use debounce::Debouncer;
pub use machine::{
    RoomSession, RoomState, SessionAction, SessionEvent, SessionInput, SnapshotOutcome,
};
