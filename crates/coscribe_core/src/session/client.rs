//! Tokio driver for a room session.
//!
//! `RoomClient` owns everything the state machine must not: the live-stream
//! connection (with guard delay and bounded exponential backoff), the
//! debounced cache flush, the outgoing-update channel fed by the document
//! observer, and the HTTP calls the machine requests through its actions.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::debounce::Debouncer;
use super::machine::{RoomSession, SessionAction, SessionEvent, SessionInput, SnapshotOutcome};
use crate::api::ApiClient;
use crate::cache::RoomCache;
use crate::config::ClientConfig;
use crate::crdt::{PresenceRecord, RoomDoc, RoomTransport, StreamMessage, TransportConnector};
use crate::error::CoscribeError;

/// Commands a frontend issues against a running client.
#[derive(Debug)]
pub enum SessionCommand {
    /// Serialize the full document state and persist it server-side.
    SaveSnapshot,
    /// Tear the session down.
    Close,
}

/// Receives session events.
///
/// Implementors translate [`SessionEvent`]s into frontend-specific actions
/// (view updates, toasts, navigation to the not-found screen).
pub trait SessionEventHandler: Send + Sync {
    /// Called for every surfaced session event.
    fn on_event(&self, event: SessionEvent);
}

/// Tokio driver for one room visit.
pub struct RoomClient<C: TransportConnector> {
    config: ClientConfig,
    api: ApiClient,
    cache: Arc<RoomCache>,
    session: Arc<RoomSession>,
    connector: C,
    handler: Arc<dyn SessionEventHandler>,
}

impl<C: TransportConnector> RoomClient<C> {
    /// Create a client for one visit to `room_slug`.
    ///
    /// The cache is injected, not ambient: one [`RoomCache`] instance is
    /// constructed at application startup and shared by every visit.
    pub fn new(
        config: ClientConfig,
        cache: Arc<RoomCache>,
        connector: C,
        handler: Arc<dyn SessionEventHandler>,
        room_slug: impl Into<String>,
        presence: PresenceRecord,
    ) -> Self {
        let api = ApiClient::new(config.server_url.clone());
        let session = Arc::new(RoomSession::new(
            room_slug.into(),
            Arc::new(RoomDoc::new()),
            presence,
        ));
        Self {
            config,
            api,
            cache,
            session,
            connector,
            handler,
        }
    }

    /// The session state machine (for state and document access).
    pub fn session(&self) -> &Arc<RoomSession> {
        &self.session
    }

    /// The HTTP client this session talks through.
    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    /// Run the session until it reaches a terminal state, `running` clears,
    /// or reconnection gives up.
    ///
    /// Entry ordering follows the reconciliation design: the cache probe
    /// (and on a miss, the snapshot fetch) starts immediately and runs
    /// concurrently with the stream attachment; neither blocks the other.
    pub async fn run(
        &self,
        running: Arc<AtomicBool>,
        mut commands: mpsc::UnboundedReceiver<SessionCommand>,
    ) {
        let room = self.session.room_slug().to_string();
        let ws_url = self.config.ws_url(&room);

        // Local edits: the document observer feeds update frames here; the
        // select loop forwards them to the stream and nudges the debounce.
        let (outgoing_tx, mut outgoing_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        {
            let outgoing_tx = outgoing_tx.clone();
            self.session.doc().on_local_update(Arc::new(move |update| {
                let _ = outgoing_tx.send(update.to_vec());
            }));
        }

        let mut debouncer = Debouncer::new(self.config.flush_delay);
        let mut snapshot_task: Option<JoinHandle<SnapshotOutcome>> = None;

        let actions = self.session.process(SessionInput::Started);
        self.execute::<C::Transport>(actions, &mut debouncer, &mut snapshot_task, None)
            .await;

        let rc = self.config.reconnect.clone();
        let mut attempt: u32 = 0;

        'outer: while running.load(Ordering::SeqCst) && !self.session.state().is_terminal() {
            if attempt > 0 {
                if !rc.enabled || (rc.max_attempts > 0 && attempt >= rc.max_attempts) {
                    log::info!("[RoomClient] Max reconnection attempts reached for {}", room);
                    break;
                }
                let delay = std::cmp::min(rc.base_delay_secs.pow(attempt), rc.max_delay_secs);
                log::info!(
                    "[RoomClient] Reconnecting to {} in {}s (attempt {}/{})",
                    room,
                    delay,
                    attempt,
                    if rc.max_attempts == 0 {
                        "∞".to_string()
                    } else {
                        rc.max_attempts.to_string()
                    }
                );
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_secs(delay)) => {}
                    cmd = commands.recv() => {
                        self.handle_command::<C::Transport>(
                            cmd, &mut debouncer, &mut snapshot_task, None,
                        )
                        .await;
                        continue 'outer;
                    }
                }
                if !running.load(Ordering::SeqCst) {
                    break;
                }
            }

            // Guard delay before (re)establishing: absorbs rapid
            // teardown/recreate cycles so a predecessor's presence entry is
            // gone before this connection announces itself.
            tokio::time::sleep(self.config.connect_guard).await;

            let mut transport = match self.connector.connect(&ws_url).await {
                Ok(transport) => {
                    log::info!("[RoomClient] Connected to {}", ws_url);
                    attempt = 0;
                    transport
                }
                Err(e) => {
                    log::error!("[RoomClient] Connection failed: {}", e);
                    attempt += 1;
                    let actions = self.session.process(SessionInput::StreamDisconnected);
                    self.execute::<C::Transport>(actions, &mut debouncer, &mut snapshot_task, None)
                        .await;
                    continue;
                }
            };

            let actions = self.session.process(SessionInput::StreamConnected);
            self.execute(actions, &mut debouncer, &mut snapshot_task, Some(&mut transport))
                .await;

            let mut ping_interval = tokio::time::interval(Duration::from_secs(30));
            ping_interval.tick().await; // consume the immediate first tick

            loop {
                if !running.load(Ordering::SeqCst) || self.session.state().is_terminal() {
                    break 'outer;
                }

                tokio::select! {
                    msg = transport.recv() => {
                        match msg {
                            Some(Ok(StreamMessage::Update(data))) => {
                                let actions =
                                    self.session.process(SessionInput::RemoteFrame(data));
                                self.execute(
                                    actions, &mut debouncer, &mut snapshot_task,
                                    Some(&mut transport),
                                )
                                .await;
                            }
                            Some(Ok(StreamMessage::Presence(map))) => {
                                let actions =
                                    self.session.process(SessionInput::PresenceSnapshot(map));
                                self.execute(
                                    actions, &mut debouncer, &mut snapshot_task,
                                    Some(&mut transport),
                                )
                                .await;
                            }
                            Some(Ok(StreamMessage::Pong)) => {}
                            Some(Ok(StreamMessage::Close)) | None => {
                                log::info!("[RoomClient] Stream closed for {}", room);
                                break;
                            }
                            Some(Err(e)) => {
                                log::error!("[RoomClient] Stream error: {}", e);
                                break;
                            }
                        }
                    }
                    update = outgoing_rx.recv() => {
                        if let Some(update) = update {
                            if let Err(e) = transport.send_update(update).await {
                                log::warn!("[RoomClient] Failed to send update: {}", e);
                                break;
                            }
                            let actions = self.session.process(SessionInput::LocalEdit);
                            self.execute(
                                actions, &mut debouncer, &mut snapshot_task,
                                Some(&mut transport),
                            )
                            .await;
                        }
                    }
                    _ = debouncer.fired(), if debouncer.is_armed() => {
                        let actions = self.session.process(SessionInput::FlushTimerFired);
                        self.execute(
                            actions, &mut debouncer, &mut snapshot_task, Some(&mut transport),
                        )
                        .await;
                    }
                    outcome = poll_snapshot(&mut snapshot_task), if snapshot_task.is_some() => {
                        let actions =
                            self.session.process(SessionInput::SnapshotResult(outcome));
                        self.execute(
                            actions, &mut debouncer, &mut snapshot_task, Some(&mut transport),
                        )
                        .await;
                    }
                    cmd = commands.recv() => {
                        self.handle_command(
                            cmd, &mut debouncer, &mut snapshot_task, Some(&mut transport),
                        )
                        .await;
                    }
                    _ = ping_interval.tick() => {
                        if let Err(e) = transport.send_ping().await {
                            log::warn!("[RoomClient] Ping failed: {}", e);
                            break;
                        }
                    }
                }
            }

            // Stream lost while the session is still live.
            if running.load(Ordering::SeqCst) && !self.session.state().is_terminal() {
                let actions = self.session.process(SessionInput::StreamDisconnected);
                self.execute::<C::Transport>(actions, &mut debouncer, &mut snapshot_task, None)
                    .await;
                attempt += 1;
            }
        }

        log::info!("[RoomClient] Session loop exited for {}", room);
    }

    async fn handle_command<T: RoomTransport>(
        &self,
        cmd: Option<SessionCommand>,
        debouncer: &mut Debouncer,
        snapshot_task: &mut Option<JoinHandle<SnapshotOutcome>>,
        transport: Option<&mut T>,
    ) {
        let input = match cmd {
            Some(SessionCommand::SaveSnapshot) => SessionInput::SaveRequested,
            // A dropped command channel means the owner went away; treat it
            // as teardown so presence clears on every exit path.
            Some(SessionCommand::Close) | None => SessionInput::CloseRequested,
        };
        let actions = self.session.process(input);
        self.execute(actions, debouncer, snapshot_task, transport)
            .await;
    }

    /// Execute machine actions. Actions that feed results back into the
    /// machine (cache load, probe) extend the queue with the follow-up
    /// actions, so one call drains the whole causal chain.
    async fn execute<T: RoomTransport>(
        &self,
        actions: Vec<SessionAction>,
        debouncer: &mut Debouncer,
        snapshot_task: &mut Option<JoinHandle<SnapshotOutcome>>,
        mut transport: Option<&mut T>,
    ) {
        let mut queue: VecDeque<SessionAction> = actions.into();
        while let Some(action) = queue.pop_front() {
            match action {
                SessionAction::LoadCache => {
                    let content = self.cache.load(self.session.room_slug());
                    queue.extend(self.session.process(SessionInput::CacheResult { content }));
                }
                SessionAction::FetchSnapshot => {
                    let api = self.api.clone();
                    let slug = self.session.room_slug().to_string();
                    *snapshot_task = Some(tokio::spawn(async move {
                        match api.fetch_room(&slug).await {
                            Ok(room) => SnapshotOutcome::Loaded {
                                content: room.content,
                            },
                            Err(CoscribeError::RoomNotFound) => SnapshotOutcome::RoomGone,
                            Err(e) => SnapshotOutcome::Failed {
                                message: e.to_string(),
                            },
                        }
                    }));
                }
                SessionAction::ProbeRoom => {
                    let exists = match self.api.room_exists(self.session.room_slug()).await {
                        Ok(exists) => exists,
                        Err(e) => {
                            // Inconclusive; the session stays Disconnected.
                            log::warn!("[RoomClient] Existence probe failed: {}", e);
                            true
                        }
                    };
                    queue.extend(self.session.process(SessionInput::ProbeResult { exists }));
                }
                SessionAction::PublishPresence(record) => {
                    if let Some(transport) = transport.as_mut() {
                        if let Err(e) = transport.publish_presence(Some(&record)).await {
                            log::warn!("[RoomClient] Failed to publish presence: {}", e);
                        }
                    }
                }
                SessionAction::ClearPresence => {
                    if let Some(transport) = transport.as_mut() {
                        if let Err(e) = transport.publish_presence(None).await {
                            log::debug!("[RoomClient] Failed to clear presence: {}", e);
                        }
                    }
                }
                SessionAction::ReleaseStream => {
                    if let Some(transport) = transport.as_mut() {
                        let _ = transport.close().await;
                    }
                }
                SessionAction::ScheduleFlush => debouncer.schedule(),
                SessionAction::WriteCache { content } => {
                    self.cache.save(self.session.room_slug(), &content);
                }
                SessionAction::UploadSnapshot { content_b64 } => {
                    match self
                        .api
                        .save_snapshot(self.session.room_slug(), &content_b64)
                        .await
                    {
                        Ok(()) => self.handler.on_event(SessionEvent::SaveCompleted),
                        Err(e) => {
                            // No automatic retry; the user re-triggers.
                            log::error!("[RoomClient] Snapshot save failed: {}", e);
                            self.handler.on_event(SessionEvent::SaveFailed {
                                message: e.to_string(),
                            });
                        }
                    }
                }
                SessionAction::Emit(event) => self.handler.on_event(event),
            }
        }
    }
}

/// Await the pending snapshot fetch, if any; pends forever otherwise.
/// Intended as a `select!` branch guarded by `snapshot_task.is_some()`.
async fn poll_snapshot(task: &mut Option<JoinHandle<SnapshotOutcome>>) -> SnapshotOutcome {
    match task.as_mut() {
        Some(handle) => {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(e) => SnapshotOutcome::Failed {
                    message: e.to_string(),
                },
            };
            *task = None;
            outcome
        }
        None => std::future::pending().await,
    }
}
