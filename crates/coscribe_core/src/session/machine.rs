//! Room-session reconciliation state machine.
//!
//! `RoomSession` decides, at any moment, whether to trust the local cache, a
//! server snapshot, or the live collaborative stream. It is pure: events go
//! in via [`RoomSession::process`], side effects come out as
//! [`SessionAction`]s for the driver to execute. No I/O happens here, which
//! is what makes every transition testable without sockets or clocks.
//!
//! State diagram:
//!
//! ```text
//! Connecting ──► Connected ◄──► Disconnected ──► NotFound (terminal)
//!     │              │                │
//!     └──────────────┴────────────────┴────────► Closed   (terminal)
//! ```
//!
//! `Connected ⇄ Disconnected` may cycle; nothing leaves a terminal state.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Serialize;

use crate::crdt::{PresenceMap, PresenceRecord, RoomDoc};

/// Connection state of one room visit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomState {
    /// Establishing the initial view and the stream attachment.
    Connecting,
    /// Live stream established; the stream is the source of truth.
    Connected,
    /// Live stream lost; awaiting the driver's reconnection.
    Disconnected,
    /// The room no longer exists. Terminal.
    NotFound,
    /// The session was torn down. Terminal.
    Closed,
}

impl RoomState {
    /// Whether no further transitions can happen.
    pub fn is_terminal(self) -> bool {
        matches!(self, RoomState::NotFound | RoomState::Closed)
    }
}

/// Result of the server snapshot fetch.
#[derive(Debug)]
pub enum SnapshotOutcome {
    /// The room exists; `content` holds its base64 snapshot if one was ever
    /// saved.
    Loaded {
        /// Base64-encoded CRDT update, absent for never-saved rooms.
        content: Option<String>,
    },
    /// The server reports the room does not exist.
    RoomGone,
    /// The fetch failed for a transient reason. The view stays empty until
    /// the live stream delivers state.
    Failed {
        /// Human-readable failure description.
        message: String,
    },
}

/// Events fed into the session by the driver.
#[derive(Debug)]
pub enum SessionInput {
    /// The session is starting; kicks off the cache probe.
    Started,
    /// Result of the cache load.
    CacheResult {
        /// Cached content, when present and intact.
        content: Option<String>,
    },
    /// Result of the server snapshot fetch.
    SnapshotResult(SnapshotOutcome),
    /// The live stream reported an established connection.
    StreamConnected,
    /// The live stream reported loss of connection.
    StreamDisconnected,
    /// A binary CRDT frame arrived on the stream.
    RemoteFrame(Vec<u8>),
    /// The room's presence map arrived on the stream.
    PresenceSnapshot(PresenceMap),
    /// The local document changed.
    LocalEdit,
    /// The debounced flush timer elapsed with no intervening edit.
    FlushTimerFired,
    /// Result of the existence probe issued on disconnect.
    ProbeResult {
        /// Whether the room still exists. Inconclusive probes (transient
        /// errors) are reported as `true`; only a definite 404 is `false`.
        exists: bool,
    },
    /// The user asked for an explicit server snapshot save.
    SaveRequested,
    /// The session is being torn down (navigation away or room deletion).
    CloseRequested,
}

impl SessionInput {
    /// Variant name for logging, without payload noise.
    fn name(&self) -> &'static str {
        match self {
            SessionInput::Started => "Started",
            SessionInput::CacheResult { .. } => "CacheResult",
            SessionInput::SnapshotResult(_) => "SnapshotResult",
            SessionInput::StreamConnected => "StreamConnected",
            SessionInput::StreamDisconnected => "StreamDisconnected",
            SessionInput::RemoteFrame(_) => "RemoteFrame",
            SessionInput::PresenceSnapshot(_) => "PresenceSnapshot",
            SessionInput::LocalEdit => "LocalEdit",
            SessionInput::FlushTimerFired => "FlushTimerFired",
            SessionInput::ProbeResult { .. } => "ProbeResult",
            SessionInput::SaveRequested => "SaveRequested",
            SessionInput::CloseRequested => "CloseRequested",
        }
    }
}

/// Actions returned by [`RoomSession::process`] for the driver to execute.
#[derive(Debug)]
pub enum SessionAction {
    /// Load this room's cached content, then feed `CacheResult`.
    LoadCache,
    /// Fetch the server snapshot, then feed `SnapshotResult`.
    FetchSnapshot,
    /// Probe room existence, then feed `ProbeResult`.
    ProbeRoom,
    /// Publish the local presence record to the stream.
    PublishPresence(PresenceRecord),
    /// Clear the local presence record so other participants drop the
    /// cursor immediately.
    ClearPresence,
    /// Release the stream connection.
    ReleaseStream,
    /// (Re)start the debounced flush timer.
    ScheduleFlush,
    /// Persist `content` to the cache.
    WriteCache {
        /// Full current document content.
        content: String,
    },
    /// Send the snapshot to the server's save endpoint.
    UploadSnapshot {
        /// Base64-encoded full CRDT state.
        content_b64: String,
    },
    /// Surface an event to session consumers.
    Emit(SessionEvent),
}

/// Events surfaced to session consumers (the embedding UI).
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// The session state changed.
    StateChanged {
        /// The new state.
        state: RoomState,
    },
    /// The room's participant roster changed.
    ParticipantsChanged {
        /// Deduplicated participants, stably ordered.
        participants: Vec<PresenceRecord>,
    },
    /// Another participant changed the file list; observers should refresh.
    FileListChanged,
    /// The explicit snapshot save finished.
    SaveCompleted,
    /// The explicit snapshot save failed. Not retried automatically; the
    /// user re-triggers if they still want it.
    SaveFailed {
        /// Human-readable failure description.
        message: String,
    },
    /// A non-fatal error occurred.
    Error {
        /// Human-readable description.
        message: String,
    },
}

/// The per-visit reconciliation state machine.
///
/// On entry the cache is consulted first; a hit is trusted over a server
/// snapshot because it reflects the last locally-applied debounced write,
/// which is at least as fresh as anything the server has. A miss falls back
/// to the snapshot fetch. Once the stream connects, it is the sole source
/// of subsequent changes.
pub struct RoomSession {
    room_slug: String,
    doc: Arc<RoomDoc>,
    presence: PresenceRecord,
    state: Mutex<RoomState>,
}

impl RoomSession {
    /// Create a session for one visit to `room_slug`.
    pub fn new(room_slug: String, doc: Arc<RoomDoc>, presence: PresenceRecord) -> Self {
        Self {
            room_slug,
            doc,
            presence,
            state: Mutex::new(RoomState::Connecting),
        }
    }

    /// The room this session is attached to.
    pub fn room_slug(&self) -> &str {
        &self.room_slug
    }

    /// The collaborative document handle, exclusively owned by this session.
    pub fn doc(&self) -> &Arc<RoomDoc> {
        &self.doc
    }

    /// Current session state.
    pub fn state(&self) -> RoomState {
        *self.state.lock().unwrap()
    }

    /// Process an incoming event and return the actions to execute.
    ///
    /// Terminal states ignore everything: a `NotFound` or `Closed` session
    /// performs no further network or cache activity.
    pub fn process(&self, input: SessionInput) -> Vec<SessionAction> {
        if self.state().is_terminal() {
            log::debug!(
                "[RoomSession] Ignoring {} for {} in terminal state",
                input.name(),
                self.room_slug
            );
            return Vec::new();
        }

        match input {
            SessionInput::Started => self.handle_started(),
            SessionInput::CacheResult { content } => self.handle_cache_result(content),
            SessionInput::SnapshotResult(outcome) => self.handle_snapshot_result(outcome),
            SessionInput::StreamConnected => self.handle_stream_connected(),
            SessionInput::StreamDisconnected => self.handle_stream_disconnected(),
            SessionInput::RemoteFrame(data) => self.handle_remote_frame(&data),
            SessionInput::PresenceSnapshot(map) => self.handle_presence_snapshot(map),
            SessionInput::LocalEdit => vec![SessionAction::ScheduleFlush],
            SessionInput::FlushTimerFired => vec![SessionAction::WriteCache {
                content: self.doc.content(),
            }],
            SessionInput::ProbeResult { exists } => self.handle_probe_result(exists),
            SessionInput::SaveRequested => self.handle_save_requested(),
            SessionInput::CloseRequested => self.handle_close_requested(),
        }
    }

    fn handle_started(&self) -> Vec<SessionAction> {
        vec![
            SessionAction::LoadCache,
            SessionAction::Emit(SessionEvent::StateChanged {
                state: RoomState::Connecting,
            }),
        ]
    }

    fn handle_cache_result(&self, content: Option<String>) -> Vec<SessionAction> {
        match content {
            Some(content) => {
                // Cache hit: the authoritative initial view. It reflects the
                // last debounced local write, so it short-circuits the
                // snapshot fetch entirely.
                log::info!("[RoomSession] Cache hit for {}, skipping snapshot", self.room_slug);
                self.doc.replace_content(&content);
                Vec::new()
            }
            None => vec![SessionAction::FetchSnapshot],
        }
    }

    fn handle_snapshot_result(&self, outcome: SnapshotOutcome) -> Vec<SessionAction> {
        match outcome {
            SnapshotOutcome::Loaded { content: None } => {
                log::debug!("[RoomSession] Room {} has no saved snapshot", self.room_slug);
                Vec::new()
            }
            SnapshotOutcome::Loaded {
                content: Some(encoded),
            } => match STANDARD.decode(&encoded) {
                Ok(update) => match self.doc.apply_remote_update(&update) {
                    Ok(()) => {
                        log::info!("[RoomSession] Snapshot merged for {}", self.room_slug);
                        Vec::new()
                    }
                    Err(e) => {
                        log::error!("[RoomSession] Failed to apply snapshot: {}", e);
                        vec![SessionAction::Emit(SessionEvent::Error {
                            message: format!("failed to apply snapshot: {}", e),
                        })]
                    }
                },
                Err(e) => {
                    log::error!("[RoomSession] Failed to decode snapshot: {}", e);
                    vec![SessionAction::Emit(SessionEvent::Error {
                        message: format!("failed to decode snapshot: {}", e),
                    })]
                }
            },
            SnapshotOutcome::RoomGone => self.transition_not_found(),
            SnapshotOutcome::Failed { message } => {
                // Transient: the stream will deliver state once it attaches.
                log::warn!(
                    "[RoomSession] Snapshot fetch failed for {}: {}",
                    self.room_slug,
                    message
                );
                vec![SessionAction::Emit(SessionEvent::Error { message })]
            }
        }
    }

    fn handle_stream_connected(&self) -> Vec<SessionAction> {
        self.set_state(RoomState::Connected);
        // Presence is (re)published on every connection: a reconnecting
        // stream may have dropped the prior announcement, and republishing
        // an identical record is idempotent.
        vec![
            SessionAction::PublishPresence(self.presence.clone()),
            SessionAction::Emit(SessionEvent::StateChanged {
                state: RoomState::Connected,
            }),
        ]
    }

    fn handle_stream_disconnected(&self) -> Vec<SessionAction> {
        if self.state() == RoomState::Disconnected {
            return Vec::new();
        }
        self.set_state(RoomState::Disconnected);
        // One probe per disconnect, to tell "transient network issue" apart
        // from "room deleted".
        vec![
            SessionAction::ProbeRoom,
            SessionAction::Emit(SessionEvent::StateChanged {
                state: RoomState::Disconnected,
            }),
        ]
    }

    fn handle_remote_frame(&self, data: &[u8]) -> Vec<SessionAction> {
        let files_before = self.doc.files_changed_at();
        if let Err(e) = self.doc.apply_remote_update(data) {
            log::warn!(
                "[RoomSession] Dropping undecodable frame for {}: {}",
                self.room_slug,
                e
            );
            return Vec::new();
        }
        if self.doc.files_changed_at() != files_before {
            return vec![SessionAction::Emit(SessionEvent::FileListChanged)];
        }
        Vec::new()
    }

    fn handle_presence_snapshot(&self, map: PresenceMap) -> Vec<SessionAction> {
        let mut by_user: HashMap<String, PresenceRecord> = HashMap::new();
        for envelope in map.into_values() {
            if let Some(record) = envelope.user {
                by_user.insert(record.user_id.clone(), record);
            }
        }
        let mut participants: Vec<PresenceRecord> = by_user.into_values().collect();
        participants.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.user_id.cmp(&b.user_id)));

        vec![SessionAction::Emit(SessionEvent::ParticipantsChanged {
            participants,
        })]
    }

    fn handle_probe_result(&self, exists: bool) -> Vec<SessionAction> {
        if exists {
            // Still there; stay Disconnected and let the driver's
            // reconnection take its course.
            Vec::new()
        } else {
            self.transition_not_found()
        }
    }

    fn handle_save_requested(&self) -> Vec<SessionAction> {
        let state = self.doc.encode_full_state();
        vec![SessionAction::UploadSnapshot {
            content_b64: STANDARD.encode(state),
        }]
    }

    fn handle_close_requested(&self) -> Vec<SessionAction> {
        self.set_state(RoomState::Closed);
        // Presence must clear before the stream handle is released, so
        // other participants never see a stale cursor after the owner
        // navigates away.
        vec![
            SessionAction::ClearPresence,
            SessionAction::ReleaseStream,
            SessionAction::Emit(SessionEvent::StateChanged {
                state: RoomState::Closed,
            }),
        ]
    }

    fn transition_not_found(&self) -> Vec<SessionAction> {
        self.set_state(RoomState::NotFound);
        log::info!("[RoomSession] Room {} no longer exists", self.room_slug);
        vec![
            SessionAction::ReleaseStream,
            SessionAction::Emit(SessionEvent::StateChanged {
                state: RoomState::NotFound,
            }),
        ]
    }

    fn set_state(&self, state: RoomState) {
        *self.state.lock().unwrap() = state;
    }
}

impl std::fmt::Debug for RoomSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoomSession")
            .field("room_slug", &self.room_slug)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crdt::PresenceEnvelope;

    fn presence(name: &str, user_id: &str) -> PresenceRecord {
        PresenceRecord {
            name: name.to_string(),
            user_id: user_id.to_string(),
            color: "#958DF1".to_string(),
        }
    }

    fn session() -> RoomSession {
        RoomSession::new(
            "quiet-otter".to_string(),
            Arc::new(RoomDoc::new()),
            presence("Ada", "u1"),
        )
    }

    fn has_state_emit(actions: &[SessionAction], expected: RoomState) -> bool {
        actions.iter().any(|a| {
            matches!(
                a,
                SessionAction::Emit(SessionEvent::StateChanged { state }) if *state == expected
            )
        })
    }

    #[test]
    fn test_start_probes_cache_first() {
        let session = session();
        let actions = session.process(SessionInput::Started);
        assert!(matches!(actions[0], SessionAction::LoadCache));
        assert!(has_state_emit(&actions, RoomState::Connecting));
        assert_eq!(session.state(), RoomState::Connecting);
    }

    #[test]
    fn test_cache_hit_short_circuits_snapshot() {
        let session = session();
        let actions = session.process(SessionInput::CacheResult {
            content: Some("cached text".to_string()),
        });
        assert!(actions.is_empty());
        assert_eq!(session.doc().content(), "cached text");
    }

    #[test]
    fn test_cache_miss_falls_back_to_snapshot() {
        let session = session();
        let actions = session.process(SessionInput::CacheResult { content: None });
        assert!(matches!(actions[0], SessionAction::FetchSnapshot));
        assert_eq!(actions.len(), 1);
    }

    #[test]
    fn test_snapshot_merges_as_baseline() {
        let source = RoomDoc::new();
        source.replace_content("server copy");
        let encoded = STANDARD.encode(source.encode_full_state());

        let session = session();
        let actions = session.process(SessionInput::SnapshotResult(SnapshotOutcome::Loaded {
            content: Some(encoded),
        }));
        assert!(actions.is_empty());
        assert_eq!(session.doc().content(), "server copy");
    }

    #[test]
    fn test_snapshot_gone_is_terminal_not_found() {
        let session = session();
        let actions = session.process(SessionInput::SnapshotResult(SnapshotOutcome::RoomGone));
        assert!(matches!(actions[0], SessionAction::ReleaseStream));
        assert!(has_state_emit(&actions, RoomState::NotFound));
        assert_eq!(session.state(), RoomState::NotFound);

        // Terminal: everything afterwards is ignored.
        assert!(session.process(SessionInput::StreamConnected).is_empty());
        assert!(session.process(SessionInput::LocalEdit).is_empty());
        assert_eq!(session.state(), RoomState::NotFound);
    }

    #[test]
    fn test_corrupt_snapshot_surfaces_error_but_continues() {
        let session = session();
        let actions = session.process(SessionInput::SnapshotResult(SnapshotOutcome::Loaded {
            content: Some("%%% not base64 %%%".to_string()),
        }));
        assert!(matches!(
            actions[0],
            SessionAction::Emit(SessionEvent::Error { .. })
        ));
        assert_eq!(session.state(), RoomState::Connecting);
    }

    #[test]
    fn test_connect_publishes_presence() {
        let session = session();
        let actions = session.process(SessionInput::StreamConnected);
        assert!(matches!(
            &actions[0],
            SessionAction::PublishPresence(record) if record.user_id == "u1"
        ));
        assert!(has_state_emit(&actions, RoomState::Connected));
        assert_eq!(session.state(), RoomState::Connected);
    }

    #[test]
    fn test_disconnect_probes_existence() {
        let session = session();
        session.process(SessionInput::StreamConnected);

        let actions = session.process(SessionInput::StreamDisconnected);
        assert!(matches!(actions[0], SessionAction::ProbeRoom));
        assert!(has_state_emit(&actions, RoomState::Disconnected));

        // A duplicate disconnect does not re-probe.
        assert!(session.process(SessionInput::StreamDisconnected).is_empty());
    }

    #[test]
    fn test_probe_alive_stays_disconnected() {
        let session = session();
        session.process(SessionInput::StreamConnected);
        session.process(SessionInput::StreamDisconnected);

        let actions = session.process(SessionInput::ProbeResult { exists: true });
        assert!(actions.is_empty());
        assert_eq!(session.state(), RoomState::Disconnected);
    }

    #[test]
    fn test_probe_gone_promotes_to_not_found() {
        let session = session();
        session.process(SessionInput::StreamConnected);
        session.process(SessionInput::StreamDisconnected);

        let actions = session.process(SessionInput::ProbeResult { exists: false });
        assert!(has_state_emit(&actions, RoomState::NotFound));
        assert_eq!(session.state(), RoomState::NotFound);
    }

    #[test]
    fn test_reconnect_republishes_presence() {
        let session = session();
        session.process(SessionInput::StreamConnected);
        session.process(SessionInput::StreamDisconnected);
        session.process(SessionInput::ProbeResult { exists: true });

        let actions = session.process(SessionInput::StreamConnected);
        assert!(matches!(&actions[0], SessionAction::PublishPresence(_)));
        assert_eq!(session.state(), RoomState::Connected);
    }

    #[test]
    fn test_edits_schedule_flush_and_fire_writes_cache() {
        let session = session();
        session.doc().append("draft");

        for _ in 0..3 {
            let actions = session.process(SessionInput::LocalEdit);
            assert!(matches!(actions[0], SessionAction::ScheduleFlush));
        }

        let actions = session.process(SessionInput::FlushTimerFired);
        assert!(matches!(
            &actions[0],
            SessionAction::WriteCache { content } if content == "draft"
        ));
    }

    #[test]
    fn test_save_uploads_decodable_full_state() {
        let session = session();
        session.doc().append("saved content");

        let actions = session.process(SessionInput::SaveRequested);
        let SessionAction::UploadSnapshot { content_b64 } = &actions[0] else {
            panic!("expected UploadSnapshot, got {:?}", actions);
        };

        let replica = RoomDoc::new();
        replica
            .apply_remote_update(&STANDARD.decode(content_b64).unwrap())
            .unwrap();
        assert_eq!(replica.content(), "saved content");
    }

    #[test]
    fn test_close_clears_presence_before_release() {
        let session = session();
        session.process(SessionInput::StreamConnected);

        let actions = session.process(SessionInput::CloseRequested);
        assert!(matches!(actions[0], SessionAction::ClearPresence));
        assert!(matches!(actions[1], SessionAction::ReleaseStream));
        assert!(has_state_emit(&actions, RoomState::Closed));
        assert_eq!(session.state(), RoomState::Closed);

        assert!(session.process(SessionInput::StreamConnected).is_empty());
    }

    #[test]
    fn test_remote_frame_applies_and_detects_file_signal() {
        let session = session();

        let peer = RoomDoc::new();
        peer.replace_content("from peer");
        let content_update = peer.encode_full_state();

        let actions = session.process(SessionInput::RemoteFrame(content_update));
        assert!(actions.is_empty());
        assert_eq!(session.doc().content(), "from peer");

        peer.mark_files_changed(7);
        let meta_update = peer.encode_full_state();
        let actions = session.process(SessionInput::RemoteFrame(meta_update));
        assert!(matches!(
            actions[0],
            SessionAction::Emit(SessionEvent::FileListChanged)
        ));
    }

    #[test]
    fn test_presence_snapshot_dedups_by_user() {
        let session = session();
        let mut map = PresenceMap::new();
        map.insert(
            "conn-1".to_string(),
            PresenceEnvelope {
                user: Some(presence("Ada", "u1")),
            },
        );
        map.insert(
            "conn-2".to_string(),
            PresenceEnvelope {
                user: Some(presence("Ada", "u1")),
            },
        );
        map.insert(
            "conn-3".to_string(),
            PresenceEnvelope {
                user: Some(presence("Grace", "u2")),
            },
        );
        map.insert("conn-4".to_string(), PresenceEnvelope { user: None });

        let actions = session.process(SessionInput::PresenceSnapshot(map));
        let SessionAction::Emit(SessionEvent::ParticipantsChanged { participants }) = &actions[0]
        else {
            panic!("expected ParticipantsChanged, got {:?}", actions);
        };
        assert_eq!(participants.len(), 2);
        assert_eq!(participants[0].name, "Ada");
        assert_eq!(participants[1].name, "Grace");
    }
}
