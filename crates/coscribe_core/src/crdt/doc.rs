//! Collaborative document handle.
//!
//! `RoomDoc` wraps the external CRDT engine. Merge semantics belong entirely
//! to the engine; this layer applies remote update frames, encodes full
//! state for snapshots, and observes locally-produced updates so the session
//! driver can forward them to the live stream.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use yrs::updates::decoder::Decode;
use yrs::{Doc, GetString, Map, ReadTxn, StateVector, Text, Transact, Update};

use crate::error::{CoscribeError, Result};

/// Name of the Y.Text holding the room content.
const CONTENT_TEXT_NAME: &str = "content";

/// Name of the Y.Map carrying cross-client signals.
const META_MAP_NAME: &str = "meta";

/// Meta key bumped whenever the room's file list changes.
const FILES_CHANGED_KEY: &str = "filesChanged";

/// Callback invoked with each locally-produced update (v1 encoding).
pub type UpdateCallback = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// A CRDT document for one room's content.
///
/// Exclusively owned by a single room session for its lifetime; torn down
/// with the session on every exit path.
pub struct RoomDoc {
    doc: Doc,
    content: yrs::TextRef,
    meta: yrs::MapRef,
    /// Set while applying a remote update so the update observer does not
    /// echo it back to the server as a local change.
    applying_remote: Arc<AtomicBool>,
    /// Stored observer subscription to keep it alive.
    /// With the yrs "sync" feature enabled, Subscription is Send+Sync.
    _update_subscription: RwLock<Option<yrs::Subscription>>,
}

impl RoomDoc {
    /// Create a fresh, empty document.
    pub fn new() -> Self {
        let doc = Doc::new();
        let content = doc.get_or_insert_text(CONTENT_TEXT_NAME);
        let meta = doc.get_or_insert_map(META_MAP_NAME);

        Self {
            doc,
            content,
            meta,
            applying_remote: Arc::new(AtomicBool::new(false)),
            _update_subscription: RwLock::new(None),
        }
    }

    /// Register a callback for locally-produced updates.
    ///
    /// The observer does not fire for updates applied via
    /// [`RoomDoc::apply_remote_update`]; the `applying_remote` flag prevents
    /// echoing server traffic back to the server.
    pub fn on_local_update(&self, callback: UpdateCallback) {
        if self._update_subscription.read().unwrap().is_some() {
            log::trace!("[RoomDoc] Update observer already registered, skipping");
            return;
        }

        let applying_remote = Arc::clone(&self.applying_remote);
        match self.doc.observe_update_v1(move |_txn, event| {
            if applying_remote.load(Ordering::SeqCst) {
                return;
            }
            callback(&event.update);
        }) {
            Ok(subscription) => {
                *self._update_subscription.write().unwrap() = Some(subscription);
            }
            Err(e) => {
                log::error!("[RoomDoc] Failed to observe document updates: {:?}", e);
            }
        }
    }

    /// Apply an update frame received from the live stream or a decoded
    /// server snapshot.
    pub fn apply_remote_update(&self, update: &[u8]) -> Result<()> {
        let decoded = Update::decode_v1(update)
            .map_err(|e| CoscribeError::Doc(format!("failed to decode update: {}", e)))?;

        self.applying_remote.store(true, Ordering::SeqCst);
        let result = {
            let mut txn = self.doc.transact_mut();
            txn.apply_update(decoded)
                .map_err(|e| CoscribeError::Doc(format!("failed to apply update: {}", e)))
        };
        self.applying_remote.store(false, Ordering::SeqCst);

        result
    }

    /// Encode the full current state as a single update.
    ///
    /// This is the payload of the explicit "save snapshot" action and the
    /// baseline a new session decodes on entry.
    pub fn encode_full_state(&self) -> Vec<u8> {
        let txn = self.doc.transact();
        txn.encode_state_as_update_v1(&StateVector::default())
    }

    /// The full room content.
    pub fn content(&self) -> String {
        let txn = self.doc.transact();
        self.content.get_string(&txn)
    }

    /// Length of the room content in engine units.
    pub fn content_len(&self) -> u32 {
        let txn = self.doc.transact();
        self.content.len(&txn)
    }

    /// Replace the entire content. Used to seed a fresh document from the
    /// local cache; counts as a local edit.
    pub fn replace_content(&self, content: &str) {
        let mut txn = self.doc.transact_mut();
        let len = self.content.len(&txn);
        if len > 0 {
            self.content.remove_range(&mut txn, 0, len);
        }
        if !content.is_empty() {
            self.content.insert(&mut txn, 0, content);
        }
    }

    /// Append text at the end of the content; a local edit.
    pub fn append(&self, text: &str) {
        let mut txn = self.doc.transact_mut();
        let len = self.content.len(&txn);
        self.content.insert(&mut txn, len, text);
    }

    /// Insert text at `index`; a local edit.
    pub fn insert_at(&self, index: u32, text: &str) {
        let mut txn = self.doc.transact_mut();
        self.content.insert(&mut txn, index, text);
    }

    /// Bump the shared files-changed signal so other participants refresh
    /// their file lists.
    pub fn mark_files_changed(&self, now_ms: i64) {
        let mut txn = self.doc.transact_mut();
        self.meta
            .insert(&mut txn, FILES_CHANGED_KEY, now_ms.to_string());
    }

    /// Last files-changed signal value, if any participant has set one.
    pub fn files_changed_at(&self) -> Option<i64> {
        let txn = self.doc.transact();
        self.meta
            .get(&txn, FILES_CHANGED_KEY)
            .and_then(|v| v.cast::<String>().ok())
            .and_then(|raw| raw.parse::<i64>().ok())
    }
}

impl Default for RoomDoc {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RoomDoc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoomDoc")
            .field("content_len", &self.content_len())
            .finish()
    }
}
