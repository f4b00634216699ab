//! Compressed, capacity-bounded room content cache.
//!
//! The cache is an optimization, never the source of truth: the live
//! document always wins. Every failure path here resolves to a cache miss
//! or a dropped write, and nothing crosses this module's boundary as an
//! error.
//!
//! One entry per room slug, compressed (zlib) and base64-wrapped so any
//! text-valued [`KeyValueStore`] can hold it. An access ledger keyed by
//! slug records last-access times and picks eviction victims.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use serde::{Deserialize, Serialize};

use crate::config::CacheConfig;
use crate::kv::{KeyValueStore, StorageError};

/// Key prefix for cached room payloads.
const ENTRY_PREFIX: &str = "room/";

/// Key holding the access ledger.
const LEDGER_KEY: &str = "room-cache/ledger";

/// Slug -> last-access milliseconds.
type Ledger = HashMap<String, i64>;

/// A single cached room payload as stored.
#[derive(Debug, Serialize, Deserialize)]
struct CacheEntry {
    /// Base64 of the zlib-compressed content.
    payload: String,
    /// Stored payload size in bytes (length of the base64 text).
    size: u64,
    /// Milliseconds since epoch at write time.
    last_accessed: i64,
}

/// Why a stored entry could not be turned back into content.
#[derive(Debug, thiserror::Error)]
enum EntryError {
    #[error("entry json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("payload base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("payload inflate: {0}")]
    Inflate(#[from] std::io::Error),
}

/// Read-only usage snapshot over the cache namespace.
#[derive(Debug, Clone, Serialize)]
pub struct CacheUsage {
    /// Number of cached rooms.
    pub room_count: usize,
    /// Aggregate stored payload bytes.
    pub total_bytes: u64,
    /// Per-room stored sizes.
    pub rooms: Vec<RoomUsage>,
}

/// Stored size of one cached room.
#[derive(Debug, Clone, Serialize)]
pub struct RoomUsage {
    /// Room slug.
    pub slug: String,
    /// Stored payload bytes.
    pub bytes: u64,
}

/// Compressed, capacity-bounded content cache keyed by room slug.
///
/// Constructed once at application startup and injected wherever needed;
/// there is no ambient global instance.
pub struct RoomCache {
    store: Arc<dyn KeyValueStore>,
    config: CacheConfig,
}

impl RoomCache {
    /// Create a cache over `store` with the given capacity policy.
    pub fn new(store: Arc<dyn KeyValueStore>, config: CacheConfig) -> Self {
        Self { store, config }
    }

    /// Cache `content` for `room_slug`, evicting least-recently-accessed
    /// rooms as needed.
    ///
    /// A write the store still rejects after one eviction retry is dropped:
    /// the content lives in the live document, so losing the cached copy
    /// costs a snapshot fetch on the next visit, nothing more.
    pub fn save(&self, room_slug: &str, content: &str) {
        self.save_at(room_slug, content, now_ms());
    }

    /// Load the cached content for `room_slug`, if present and intact.
    ///
    /// A corrupt entry (unparseable, bad base64, bad deflate stream) is
    /// removed and reported as a miss.
    pub fn load(&self, room_slug: &str) -> Option<String> {
        self.load_at(room_slug, now_ms())
    }

    /// Drop the cached entry and its ledger row. Idempotent.
    pub fn remove(&self, room_slug: &str) {
        self.store.remove(&entry_key(room_slug));
        let mut ledger = self.load_ledger();
        if ledger.remove(room_slug).is_some() {
            self.write_ledger(&ledger);
        }
    }

    /// Drop every cached room under this store's namespace.
    pub fn clear_all(&self) {
        for key in self.store.list_keys(ENTRY_PREFIX) {
            self.store.remove(&key);
        }
        self.store.remove(LEDGER_KEY);
        log::debug!("[RoomCache] Cleared all cached rooms");
    }

    /// Usage diagnostics over the cache namespace.
    pub fn usage(&self) -> CacheUsage {
        let rooms: Vec<RoomUsage> = self
            .scan_entries()
            .into_iter()
            .map(|(slug, bytes)| RoomUsage { slug, bytes })
            .collect();
        CacheUsage {
            room_count: rooms.len(),
            total_bytes: rooms.iter().map(|r| r.bytes).sum(),
            rooms,
        }
    }

    fn save_at(&self, room_slug: &str, content: &str, now_ms: i64) {
        let payload = match compress(content) {
            Ok(payload) => payload,
            Err(e) => {
                log::warn!("[RoomCache] Failed to compress content for {}: {}", room_slug, e);
                return;
            }
        };
        let entry = CacheEntry {
            size: payload.len() as u64,
            payload,
            last_accessed: now_ms,
        };
        if entry.size > self.config.max_total_bytes {
            log::debug!(
                "[RoomCache] Content for {} exceeds the cache byte cap, not caching",
                room_slug
            );
            return;
        }
        let json = match serde_json::to_string(&entry) {
            Ok(json) => json,
            Err(e) => {
                log::warn!("[RoomCache] Failed to encode entry for {}: {}", room_slug, e);
                return;
            }
        };

        let mut ledger = self.load_ledger();
        self.enforce_capacity(&mut ledger, room_slug, entry.size);

        let key = entry_key(room_slug);
        match self.store.set(&key, &json) {
            Ok(()) => {}
            Err(StorageError::QuotaExceeded) => {
                // The backend is tighter than our soft caps: free the oldest
                // entry and retry exactly once.
                let retried = self.evict_oldest(&mut ledger, Some(room_slug))
                    && self.store.set(&key, &json).is_ok();
                if !retried {
                    log::warn!(
                        "[RoomCache] Quota exceeded, dropping cache write for {}",
                        room_slug
                    );
                    self.write_ledger(&ledger);
                    return;
                }
            }
            Err(e) => {
                log::warn!("[RoomCache] Cache write failed for {}: {}", room_slug, e);
                return;
            }
        }

        ledger.insert(room_slug.to_string(), now_ms);
        self.write_ledger(&ledger);
    }

    fn load_at(&self, room_slug: &str, now_ms: i64) -> Option<String> {
        let raw = self.store.get(&entry_key(room_slug))?;
        match decode_entry(&raw) {
            Ok(content) => {
                let mut ledger = self.load_ledger();
                ledger.insert(room_slug.to_string(), now_ms);
                self.write_ledger(&ledger);
                Some(content)
            }
            Err(e) => {
                // Unrecoverable; treat as a miss and drop the entry so the
                // next visit takes the snapshot path instead of failing again.
                log::warn!(
                    "[RoomCache] Removing corrupt cache entry for {}: {}",
                    room_slug,
                    e
                );
                self.remove(room_slug);
                None
            }
        }
    }

    /// Evict until `incoming_size` more bytes fit under both caps. The slug
    /// being written is never a victim; its old entry is about to be
    /// replaced anyway.
    fn enforce_capacity(&self, ledger: &mut Ledger, incoming_slug: &str, incoming_size: u64) {
        loop {
            let others: Vec<(String, u64)> = self
                .scan_entries()
                .into_iter()
                .filter(|(slug, _)| slug.as_str() != incoming_slug)
                .collect();
            let total: u64 = others.iter().map(|(_, bytes)| bytes).sum();
            if others.len() < self.config.max_entries
                && total + incoming_size <= self.config.max_total_bytes
            {
                return;
            }
            if !self.evict_oldest(ledger, Some(incoming_slug)) {
                return;
            }
        }
    }

    /// Remove the entry with the oldest last-access time. Entries missing a
    /// ledger row count as oldest; ties break by slug order so the victim is
    /// deterministic. Returns false when nothing is evictable.
    fn evict_oldest(&self, ledger: &mut Ledger, exclude: Option<&str>) -> bool {
        let mut candidates: Vec<(String, i64)> = self
            .scan_entries()
            .into_iter()
            .filter(|(slug, _)| Some(slug.as_str()) != exclude)
            .map(|(slug, _)| {
                let ts = ledger.get(&slug).copied().unwrap_or(0);
                (slug, ts)
            })
            .collect();
        candidates.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));

        let Some((victim, _)) = candidates.into_iter().next() else {
            return false;
        };
        log::debug!("[RoomCache] Evicting least-recently-accessed room {}", victim);
        self.store.remove(&entry_key(&victim));
        ledger.remove(&victim);
        true
    }

    /// Enumerate cached rooms with their stored sizes. Entries that no
    /// longer parse report their raw length; they stay evictable.
    fn scan_entries(&self) -> Vec<(String, u64)> {
        self.store
            .list_keys(ENTRY_PREFIX)
            .into_iter()
            .filter_map(|key| {
                let slug = key.strip_prefix(ENTRY_PREFIX)?.to_string();
                let raw = self.store.get(&key)?;
                let bytes = serde_json::from_str::<CacheEntry>(&raw)
                    .map(|entry| entry.size)
                    .unwrap_or(raw.len() as u64);
                Some((slug, bytes))
            })
            .collect()
    }

    fn load_ledger(&self) -> Ledger {
        self.store
            .get(LEDGER_KEY)
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default()
    }

    fn write_ledger(&self, ledger: &Ledger) {
        match serde_json::to_string(ledger) {
            Ok(json) => {
                if let Err(e) = self.store.set(LEDGER_KEY, &json) {
                    log::debug!("[RoomCache] Ledger write failed: {}", e);
                }
            }
            Err(e) => log::debug!("[RoomCache] Ledger encode failed: {}", e),
        }
    }
}

fn entry_key(room_slug: &str) -> String {
    format!("{}{}", ENTRY_PREFIX, room_slug)
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn compress(content: &str) -> std::io::Result<String> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(content.as_bytes())?;
    let compressed = encoder.finish()?;
    Ok(STANDARD.encode(compressed))
}

fn decode_entry(raw: &str) -> Result<String, EntryError> {
    let entry: CacheEntry = serde_json::from_str(raw)?;
    let compressed = STANDARD.decode(&entry.payload)?;
    let mut decoder = ZlibDecoder::new(compressed.as_slice());
    let mut content = String::new();
    decoder.read_to_string(&mut content)?;
    Ok(content)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::kv::MemoryStore;

    fn cache_with(max_entries: usize, max_total_bytes: u64) -> RoomCache {
        RoomCache::new(
            Arc::new(MemoryStore::new()),
            CacheConfig {
                max_entries,
                max_total_bytes,
            },
        )
    }

    #[test]
    fn test_round_trip() {
        let cache = cache_with(20, 5 * 1024 * 1024);
        for content in ["hello world", "", "多言語 content 🎉", "{\"doc\":[1,2,3]}"] {
            cache.save("alpha", content);
            assert_eq!(cache.load("alpha").as_deref(), Some(content));
        }
    }

    #[test]
    fn test_miss_on_unknown_room() {
        let cache = cache_with(20, 5 * 1024 * 1024);
        assert!(cache.load("nope").is_none());
    }

    #[test]
    fn test_eviction_prefers_oldest_access() {
        let cache = cache_with(3, 5 * 1024 * 1024);
        cache.save_at("a", "content a", 100);
        cache.save_at("b", "content b", 200);
        cache.save_at("c", "content c", 300);

        // Touch "a" so "b" becomes the oldest.
        assert!(cache.load_at("a", 400).is_some());

        cache.save_at("d", "content d", 500);

        assert_eq!(cache.usage().room_count, 3);
        assert!(cache.load("b").is_none());
        assert!(cache.load("a").is_some());
        assert!(cache.load("c").is_some());
        assert!(cache.load("d").is_some());
    }

    #[test]
    fn test_eviction_tie_break_is_deterministic() {
        let cache = cache_with(2, 5 * 1024 * 1024);
        cache.save_at("b", "x", 100);
        cache.save_at("a", "x", 100);
        cache.save_at("c", "x", 200);

        // Same timestamp: the slug-ordered first candidate goes.
        assert!(cache.load("a").is_none());
        assert!(cache.load("b").is_some());
    }

    #[test]
    fn test_byte_cap_triggers_eviction() {
        // Highly compressible 160-char contents store at ~25 payload bytes
        // each; a 60-byte cap holds two of them but not three.
        let cache = cache_with(20, 60);
        cache.save_at("a", &"aaaa".repeat(40), 100);
        cache.save_at("b", &"bbbb".repeat(40), 200);
        cache.save_at("c", &"cccc".repeat(40), 300);

        assert!(cache.usage().total_bytes <= 60);
        assert!(cache.load("a").is_none());
        assert!(cache.load("c").is_some());
    }

    #[test]
    fn test_oversized_content_is_not_cached() {
        let cache = cache_with(20, 64);
        // Random-ish content so deflate cannot fit it under the cap.
        let content: String = (0..4096).map(|i| ((i * 31 % 94) as u8 + 33) as char).collect();
        cache.save("huge", &content);
        assert!(cache.load("huge").is_none());
        assert_eq!(cache.usage().room_count, 0);
    }

    #[test]
    fn test_corrupt_entry_is_removed_and_stays_absent() {
        let store = Arc::new(MemoryStore::new());
        let cache = RoomCache::new(store.clone(), CacheConfig::default());

        store.set("room/broken", "not json at all").unwrap();
        assert!(cache.load("broken").is_none());
        // The entry was dropped, so the second load misses without parsing.
        assert!(store.get("room/broken").is_none());
        assert!(cache.load("broken").is_none());

        // Corrupt payload inside a well-formed envelope behaves the same.
        store
            .set(
                "room/mangled",
                r#"{"payload":"AAAA","size":4,"last_accessed":1}"#,
            )
            .unwrap();
        assert!(cache.load("mangled").is_none());
        assert!(store.get("room/mangled").is_none());
    }

    /// Store that reports a quota failure for the first N entry writes,
    /// standing in for a backend tighter than the configured soft caps.
    struct TightStore {
        inner: MemoryStore,
        failures_left: AtomicU32,
    }

    impl KeyValueStore for TightStore {
        fn get(&self, key: &str) -> Option<String> {
            self.inner.get(key)
        }
        fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
            if key.starts_with(ENTRY_PREFIX)
                && self
                    .failures_left
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok()
            {
                return Err(StorageError::QuotaExceeded);
            }
            self.inner.set(key, value)
        }
        fn remove(&self, key: &str) {
            self.inner.remove(key);
        }
        fn list_keys(&self, prefix: &str) -> Vec<String> {
            self.inner.list_keys(prefix)
        }
    }

    #[test]
    fn test_quota_failure_evicts_once_and_retries() {
        let store = Arc::new(TightStore {
            inner: MemoryStore::new(),
            failures_left: AtomicU32::new(0),
        });
        let cache = RoomCache::new(store.clone(), CacheConfig::default());
        cache.save_at("old", "old content", 100);

        store.failures_left.store(1, Ordering::SeqCst);
        cache.save_at("new", "new content", 200);

        // The oldest entry made room and the retried write landed.
        assert!(cache.load("old").is_none());
        assert_eq!(cache.load("new").as_deref(), Some("new content"));
    }

    #[test]
    fn test_persistent_quota_failure_drops_the_write() {
        let store = Arc::new(TightStore {
            inner: MemoryStore::new(),
            failures_left: AtomicU32::new(u32::MAX),
        });
        let cache = RoomCache::new(store.clone(), CacheConfig::default());
        cache.save("doomed", "content");
        assert!(cache.load("doomed").is_none());
    }

    #[test]
    fn test_remove_and_clear_all() {
        let cache = cache_with(20, 5 * 1024 * 1024);
        cache.save("a", "1");
        cache.save("b", "2");

        cache.remove("a");
        cache.remove("a"); // idempotent
        assert!(cache.load("a").is_none());
        assert!(cache.load("b").is_some());

        cache.clear_all();
        assert!(cache.load("b").is_none());
        assert_eq!(cache.usage().room_count, 0);
    }

    #[test]
    fn test_usage_reports_stored_sizes() {
        let cache = cache_with(20, 5 * 1024 * 1024);
        cache.save("a", "some content here");
        cache.save("b", "more content there");

        let usage = cache.usage();
        assert_eq!(usage.room_count, 2);
        assert!(usage.total_bytes > 0);
        assert_eq!(
            usage.total_bytes,
            usage.rooms.iter().map(|r| r.bytes).sum::<u64>()
        );
    }
}
