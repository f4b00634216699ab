//! Client configuration.

use std::time::Duration;

/// Environment variable overriding the API base URL.
const SERVER_URL_ENV: &str = "COSCRIBE_SERVER_URL";

/// Default API base URL for local development.
const DEFAULT_SERVER_URL: &str = "http://localhost:8080";

/// Top-level configuration for the room client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base server URL (e.g., "https://rooms.example.com").
    pub server_url: String,
    /// Quiet period after the last local edit before the debounced cache
    /// write fires.
    pub flush_delay: Duration,
    /// Delay before (re)establishing a stream connection. Absorbs rapid
    /// teardown/recreate cycles so a stale presence entry is gone before
    /// the replacement connection announces itself.
    pub connect_guard: Duration,
    /// Maximum accepted upload size in bytes.
    pub max_upload_bytes: u64,
    /// Minimum interval between throughput recomputations.
    pub rate_window: Duration,
    /// Cache capacity policy.
    pub cache: CacheConfig,
    /// Stream reconnection policy.
    pub reconnect: ReconnectConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            flush_delay: Duration::from_secs(2),
            connect_guard: Duration::from_millis(250),
            max_upload_bytes: 200 * 1024 * 1024,
            rate_window: Duration::from_millis(500),
            cache: CacheConfig::default(),
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Build a config from the environment, falling back to defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(url) = std::env::var(SERVER_URL_ENV) {
            let trimmed = url.trim_end_matches('/');
            if !trimmed.is_empty() {
                config.server_url = trimmed.to_string();
            }
        }
        config
    }

    /// WebSocket endpoint for a room's live stream, derived from the server
    /// URL by scheme rewrite.
    pub fn ws_url(&self, room_slug: &str) -> String {
        let ws_server = self
            .server_url
            .replace("https://", "wss://")
            .replace("http://", "ws://");
        format!("{}/ws?room={}", ws_server, room_slug)
    }
}

/// Capacity policy for the room content cache.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Soft cap on the number of cached rooms.
    pub max_entries: usize,
    /// Soft cap on aggregate stored payload size in bytes.
    pub max_total_bytes: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 20,
            max_total_bytes: 5 * 1024 * 1024,
        }
    }
}

/// Stream reconnection policy.
///
/// Reconnection is owned by the driver ([`crate::session::RoomClient`]);
/// the session state machine only ever observes connect/disconnect edges.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Whether to automatically reconnect on disconnect.
    pub enabled: bool,
    /// Maximum number of reconnection attempts (0 = infinite).
    pub max_attempts: u32,
    /// Base delay in seconds for exponential backoff.
    pub base_delay_secs: u64,
    /// Maximum delay in seconds for exponential backoff.
    pub max_delay_secs: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 10,
            base_delay_secs: 2,
            max_delay_secs: 32,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.server_url, "http://localhost:8080");
        assert_eq!(config.flush_delay, Duration::from_secs(2));
        assert_eq!(config.cache.max_entries, 20);
    }

    #[test]
    fn test_ws_url_scheme_rewrite() {
        let config = ClientConfig {
            server_url: "https://rooms.example.com".to_string(),
            ..Default::default()
        };
        assert_eq!(
            config.ws_url("quiet-otter"),
            "wss://rooms.example.com/ws?room=quiet-otter"
        );

        let config = ClientConfig::default();
        assert_eq!(
            config.ws_url("quiet-otter"),
            "ws://localhost:8080/ws?room=quiet-otter"
        );
    }
}
