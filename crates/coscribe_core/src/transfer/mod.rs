//! Concurrent file-transfer coordination.
//!
//! [`TransferCoordinator`] tracks N simultaneous uploads into one room,
//! each with its own progress, throughput label, and cancellation token.
//! Tasks are fully independent: cancelling or failing one never disturbs
//! the others.
//!
//! The coordinator is deliberately decoupled from the room session; the
//! only thing they share is the file-list-changed notification. The
//! embedding layer forwards [`TransferEvent::FileListChanged`] to
//! [`crate::crdt::RoomDoc::mark_files_changed`] so remote participants
//! refresh too.

mod progress;
mod uploader;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::api::FileRecord;
use crate::config::ClientConfig;

pub use progress::RateEstimator;
pub use uploader::{HttpUploader, ProgressFn, UploadError, UploadSource, Uploader};

/// Snapshot view of one in-flight upload.
#[derive(Debug, Clone, Serialize)]
pub struct UploadTask {
    /// Coordinator-assigned task id.
    pub id: String,
    /// File name being transferred.
    pub file_name: String,
    /// Completion percentage, 0..=100.
    pub percent: u8,
    /// Human-readable throughput label.
    pub throughput: String,
}

/// Events emitted by the coordinator.
#[derive(Debug, Clone)]
pub enum TransferEvent {
    /// An upload advanced.
    Progress {
        /// Snapshot of the task.
        task: UploadTask,
    },
    /// An upload finished; the new file is part of the room.
    Completed {
        /// The created file's metadata.
        file: FileRecord,
    },
    /// An upload was cancelled. A neutral outcome, not an error.
    Cancelled {
        /// The cancelled task's id.
        task_id: String,
        /// The file that was being transferred.
        file_name: String,
    },
    /// An upload failed; user-visible, naming the offending file.
    Failed {
        /// The file that failed.
        file_name: String,
        /// Why.
        reason: String,
    },
    /// The room's file list changed; observers should refresh.
    FileListChanged,
}

/// Receives transfer events.
pub trait TransferEventHandler: Send + Sync {
    /// Called for every transfer event.
    fn on_event(&self, event: TransferEvent);
}

struct ActiveUpload {
    task: UploadTask,
    total_bytes: u64,
    rate: RateEstimator,
    cancel: CancellationToken,
}

/// Coordinates concurrent uploads into one room.
pub struct TransferCoordinator<U: Uploader + 'static> {
    uploader: Arc<U>,
    handler: Arc<dyn TransferEventHandler>,
    active: Arc<Mutex<HashMap<String, ActiveUpload>>>,
    room_slug: String,
    user_id: String,
    max_upload_bytes: u64,
    rate_window: Duration,
}

impl<U: Uploader + 'static> TransferCoordinator<U> {
    /// Create a coordinator for `room_slug`, uploading as `user_id`.
    pub fn new(
        config: &ClientConfig,
        uploader: Arc<U>,
        handler: Arc<dyn TransferEventHandler>,
        room_slug: impl Into<String>,
        user_id: impl Into<String>,
    ) -> Self {
        Self {
            uploader,
            handler,
            active: Arc::new(Mutex::new(HashMap::new())),
            room_slug: room_slug.into(),
            user_id: user_id.into(),
            max_upload_bytes: config.max_upload_bytes,
            rate_window: config.rate_window,
        }
    }

    /// Start an upload and return its task id.
    ///
    /// Oversized files fail fast with a user-visible message naming the
    /// file; nothing is transferred.
    pub fn start(&self, source: UploadSource) -> String {
        let task_id = crate::ids::new_task_id();
        let file_name = source.file_name.clone();

        if source.size() > self.max_upload_bytes {
            log::warn!(
                "[TransferCoordinator] Rejecting {} ({} bytes over limit)",
                file_name,
                source.size() - self.max_upload_bytes
            );
            self.handler.on_event(TransferEvent::Failed {
                file_name,
                reason: format!(
                    "exceeds the {} MB upload limit",
                    self.max_upload_bytes / (1024 * 1024)
                ),
            });
            return task_id;
        }

        let cancel = CancellationToken::new();
        let total_bytes = source.size().max(1);
        {
            let mut active = self.active.lock().unwrap();
            active.insert(
                task_id.clone(),
                ActiveUpload {
                    task: UploadTask {
                        id: task_id.clone(),
                        file_name: file_name.clone(),
                        percent: 0,
                        throughput: "0.0 KB/s".to_string(),
                    },
                    total_bytes,
                    rate: RateEstimator::new(self.rate_window, Instant::now()),
                    cancel: cancel.clone(),
                },
            );
        }

        let progress = self.progress_fn(task_id.clone(), cancel.clone());

        let uploader = Arc::clone(&self.uploader);
        let active = Arc::clone(&self.active);
        let handler = Arc::clone(&self.handler);
        let room_slug = self.room_slug.clone();
        let user_id = self.user_id.clone();
        let id = task_id.clone();
        tokio::spawn(async move {
            let result = uploader
                .upload(&room_slug, &user_id, source, progress, cancel.clone())
                .await;
            active.lock().unwrap().remove(&id);

            // Once the token fires, no completion or failure from this task
            // may be observed; `cancel()` already reported the outcome.
            if cancel.is_cancelled() {
                return;
            }
            match result {
                Ok(file) => {
                    log::info!("[TransferCoordinator] Upload complete: {}", file.name);
                    handler.on_event(TransferEvent::Completed { file });
                    handler.on_event(TransferEvent::FileListChanged);
                }
                Err(UploadError::Cancelled) => {}
                Err(e) => {
                    log::error!("[TransferCoordinator] Upload failed for {}: {}", file_name, e);
                    handler.on_event(TransferEvent::Failed {
                        file_name,
                        reason: e.to_string(),
                    });
                }
            }
        });

        task_id
    }

    /// Cancel an in-flight upload. Unknown ids are ignored.
    pub fn cancel(&self, task_id: &str) {
        let entry = self.active.lock().unwrap().remove(task_id);
        if let Some(upload) = entry {
            upload.cancel.cancel();
            log::info!(
                "[TransferCoordinator] Cancelled upload of {}",
                upload.task.file_name
            );
            self.handler.on_event(TransferEvent::Cancelled {
                task_id: task_id.to_string(),
                file_name: upload.task.file_name,
            });
        }
    }

    /// Snapshot of the in-flight uploads, stably ordered.
    pub fn active_tasks(&self) -> Vec<UploadTask> {
        let active = self.active.lock().unwrap();
        let mut tasks: Vec<UploadTask> = active.values().map(|u| u.task.clone()).collect();
        tasks.sort_by(|a, b| a.file_name.cmp(&b.file_name).then_with(|| a.id.cmp(&b.id)));
        tasks
    }

    fn progress_fn(&self, task_id: String, cancel: CancellationToken) -> ProgressFn {
        let active = Arc::clone(&self.active);
        let handler = Arc::clone(&self.handler);
        Arc::new(move |bytes_sent| {
            // A cancelled task surfaces nothing further.
            if cancel.is_cancelled() {
                return;
            }
            let snapshot = {
                let mut active = active.lock().unwrap();
                let Some(upload) = active.get_mut(&task_id) else {
                    return;
                };
                upload.task.percent = ((bytes_sent * 100) / upload.total_bytes).min(100) as u8;
                upload.task.throughput =
                    upload.rate.update(bytes_sent, Instant::now()).to_string();
                upload.task.clone()
            };
            handler.on_event(TransferEvent::Progress { task: snapshot });
        })
    }
}
