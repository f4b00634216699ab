//! # `coscribe_core`
//!
//! Client core for Coscribe, a multi-user collaborative document room.
//!
//! Real-time merging of concurrent edits is delegated to the external CRDT
//! engine (`yrs`); rendering belongs to the embedding frontend. What lives
//! here is the part that keeps a client honest about the true state of a
//! room despite network flakiness, storage limits, and concurrent activity:
//!
//! 1. [`cache::RoomCache`] - a compressed, capacity-bounded local cache used
//!    as a fast offline-first view of a room's content.
//! 2. [`session::RoomSession`] / [`session::RoomClient`] - the per-visit
//!    reconciliation state machine deciding whether to trust the cache, a
//!    server snapshot, or the live stream, and its tokio driver.
//! 3. [`transfer::TransferCoordinator`] - concurrent file uploads with live
//!    throughput estimation and cooperative cancellation.

#![warn(missing_docs)]

pub mod api;
pub mod cache;
pub mod config;
pub mod crdt;
pub mod error;
pub mod ids;
pub mod kv;
pub mod profile;
pub mod session;
pub mod transfer;

pub use error::{CoscribeError, Result};
