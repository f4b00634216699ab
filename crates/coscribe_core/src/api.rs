//! HTTP client for the room server.
//!
//! Seven endpoints: room CRUD, the durable snapshot save, and the file
//! listing/deletion pair. The live stream is not here; see
//! [`crate::crdt::RoomTransport`].

use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{CoscribeError, Result};

/// Header carrying the requesting user's stable id.
pub const USER_ID_HEADER: &str = "X-User-ID";

/// A room as described by the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomInfo {
    /// Room slug.
    pub slug: String,
    /// Stable user id of the room's creator.
    pub owner: String,
    /// Base64-encoded CRDT snapshot, when one has been saved.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl RoomInfo {
    /// Room-deletion gate: exact owner-id equality.
    ///
    /// Deliberately independent from the per-file rule in
    /// [`FileRecord::deletable_by`]; the two checks cover different scopes
    /// and are kept separate on purpose.
    pub fn is_owned_by(&self, user_id: &str) -> bool {
        self.owner == user_id
    }
}

/// A file attached to a room.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    /// Server-assigned file id.
    pub id: String,
    /// Original file name.
    pub name: String,
    /// Download URL, relative to the server base.
    pub url: String,
    /// File size in bytes.
    pub size: u64,
    /// Stable user id of the uploader, when the server recorded one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uploader_id: Option<String>,
}

impl FileRecord {
    /// File-deletion gate: the room owner may delete any file; everyone
    /// else only their own uploads.
    pub fn deletable_by(&self, user_id: &str, is_room_owner: bool) -> bool {
        is_room_owner || self.uploader_id.as_deref() == Some(user_id)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateRoomBody<'a> {
    owner: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    custom_slug: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct SaveSnapshotBody<'a> {
    content: &'a str,
}

/// HTTP client for the room server.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    /// Create a client against `base_url` (no trailing slash needed).
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// The configured server base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Create a room, optionally with a user-chosen slug (validated
    /// client-side before the request goes out).
    pub async fn create_room(&self, owner: &str, custom_slug: Option<&str>) -> Result<RoomInfo> {
        if let Some(slug) = custom_slug {
            crate::ids::validate_custom_slug(slug)?;
        }
        let response = self
            .http
            .post(format!("{}/api/rooms", self.base_url))
            .json(&CreateRoomBody { owner, custom_slug })
            .send()
            .await?;
        Self::expect_json(response).await
    }

    /// Fetch a room's metadata and saved snapshot.
    pub async fn fetch_room(&self, slug: &str) -> Result<RoomInfo> {
        let response = self
            .http
            .get(format!("{}/api/rooms/{}", self.base_url, slug))
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(CoscribeError::RoomNotFound);
        }
        Self::expect_json(response).await
    }

    /// Lightweight existence probe used to tell "transient network issue"
    /// apart from "room deleted": 404 means gone, any 2xx means alive, and
    /// anything else is a transient failure the caller should not act on.
    pub async fn room_exists(&self, slug: &str) -> Result<bool> {
        let response = self
            .http
            .get(format!("{}/api/rooms/{}", self.base_url, slug))
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        if response.status().is_success() {
            return Ok(true);
        }
        Err(Self::status_error(response).await)
    }

    /// Delete a room. The server enforces ownership; the UI additionally
    /// gates this behind [`RoomInfo::is_owned_by`].
    pub async fn delete_room(&self, slug: &str) -> Result<()> {
        let response = self
            .http
            .delete(format!("{}/api/rooms/{}", self.base_url, slug))
            .send()
            .await?;
        Self::expect_ok(response).await
    }

    /// Persist a base64-encoded CRDT snapshot server-side. This is the only
    /// durable server persistence path, distinct from the local cache.
    pub async fn save_snapshot(&self, slug: &str, content_b64: &str) -> Result<()> {
        let response = self
            .http
            .post(format!("{}/api/rooms/{}/save", self.base_url, slug))
            .json(&SaveSnapshotBody {
                content: content_b64,
            })
            .send()
            .await?;
        Self::expect_ok(response).await
    }

    /// List the room's files.
    pub async fn list_files(&self, slug: &str) -> Result<Vec<FileRecord>> {
        let response = self
            .http
            .get(format!("{}/api/rooms/{}/files", self.base_url, slug))
            .send()
            .await?;
        Self::expect_json(response).await
    }

    /// Delete a file. The server checks the `X-User-ID` header against the
    /// owner-or-uploader rule; see [`FileRecord::deletable_by`].
    pub async fn delete_file(&self, slug: &str, file_id: &str, user_id: &str) -> Result<()> {
        let response = self
            .http
            .delete(format!(
                "{}/api/rooms/{}/files/{}",
                self.base_url, slug, file_id
            ))
            .header(USER_ID_HEADER, user_id)
            .send()
            .await?;
        Self::expect_ok(response).await
    }

    async fn expect_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        if !response.status().is_success() {
            return Err(Self::status_error(response).await);
        }
        Ok(response.json().await?)
    }

    async fn expect_ok(response: reqwest::Response) -> Result<()> {
        if !response.status().is_success() {
            return Err(Self::status_error(response).await);
        }
        Ok(())
    }

    async fn status_error(response: reqwest::Response) -> CoscribeError {
        let status = response.status().as_u16();
        let message = response.text().await.unwrap_or_default();
        CoscribeError::Api { status, message }
    }
}
