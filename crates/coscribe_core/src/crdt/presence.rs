//! Presence records broadcast over the live stream.

use serde::{Deserialize, Serialize};

/// A participant's ephemeral presence state.
///
/// Broadcast on the room's shared presence channel whenever the stream
/// connects; never persisted anywhere.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceRecord {
    /// Display name chosen by the user.
    pub name: String,
    /// Stable per-profile user identifier.
    pub user_id: String,
    /// Stable per-profile cursor color (hex).
    pub color: String,
}

/// Wire envelope for presence updates.
///
/// `{"user": {...}}` announces or refreshes a participant; `{"user": null}`
/// clears the local entry so other participants drop the cursor immediately
/// instead of waiting for a timeout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceEnvelope {
    /// The presence payload; `None` announces departure.
    pub user: Option<PresenceRecord>,
}

/// The shared presence map as broadcast by the server: connection id ->
/// envelope. Connection ids are opaque; participants are deduplicated by
/// `user_id` before they reach consumers.
pub type PresenceMap = std::collections::HashMap<String, PresenceEnvelope>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_shape_is_camel_case() {
        let envelope = PresenceEnvelope {
            user: Some(PresenceRecord {
                name: "Ada".to_string(),
                user_id: "user_1".to_string(),
                color: "#958DF1".to_string(),
            }),
        };
        let json = serde_json::to_string(&envelope).unwrap();
        assert!(json.contains(r#""userId":"user_1""#));
        assert!(json.contains(r#""name":"Ada""#));

        let parsed: PresenceEnvelope = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.user, envelope.user);
    }

    #[test]
    fn test_clear_envelope() {
        let json = serde_json::to_string(&PresenceEnvelope { user: None }).unwrap();
        assert_eq!(json, r#"{"user":null}"#);
    }
}
