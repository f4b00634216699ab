//! Stable per-profile identity and preferences.
//!
//! These keys live outside the room cache namespace and are never evicted:
//! a stable random user id, the user-chosen display name, a stable cursor
//! color, and the presence-panel toggle. Each is read and written
//! independently through the [`KeyValueStore`] capability.

use std::sync::Arc;

use crate::crdt::PresenceRecord;
use crate::kv::KeyValueStore;

const USER_ID_KEY: &str = "profile/user_id";
const DISPLAY_NAME_KEY: &str = "profile/display_name";
const COLOR_KEY: &str = "profile/cursor_color";
const SHOW_PRESENCE_KEY: &str = "profile/show_presence";

/// Cursor colors assigned to new profiles.
const CURSOR_COLORS: [&str; 7] = [
    "#958DF1", "#F98181", "#FBBC88", "#FAF594", "#70CFF8", "#94FADB", "#B9F18D",
];

/// Identity and preferences persisted per device profile.
pub struct UserProfile {
    store: Arc<dyn KeyValueStore>,
    user_id: String,
    display_name: String,
    color: String,
    show_presence: bool,
}

impl UserProfile {
    /// Load the profile, creating the stable fields on first run.
    ///
    /// The user id and cursor color are generated once and reused on every
    /// subsequent load; the display name stays empty until the user picks
    /// one; the presence panel defaults to visible.
    pub fn load_or_init(store: Arc<dyn KeyValueStore>) -> Self {
        let user_id = match store.get(USER_ID_KEY) {
            Some(id) => id,
            None => {
                let id = crate::ids::new_user_id();
                if let Err(e) = store.set(USER_ID_KEY, &id) {
                    log::warn!("[UserProfile] Failed to persist user id: {}", e);
                }
                id
            }
        };
        let color = match store.get(COLOR_KEY) {
            Some(color) => color,
            None => {
                let color = pick_color(&user_id).to_string();
                if let Err(e) = store.set(COLOR_KEY, &color) {
                    log::warn!("[UserProfile] Failed to persist cursor color: {}", e);
                }
                color
            }
        };
        let display_name = store.get(DISPLAY_NAME_KEY).unwrap_or_default();
        let show_presence = store
            .get(SHOW_PRESENCE_KEY)
            .map(|v| v == "true")
            .unwrap_or(true);

        Self {
            store,
            user_id,
            display_name,
            color,
            show_presence,
        }
    }

    /// The stable per-profile user identifier.
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// The user-chosen display name; empty until set.
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// The stable per-profile cursor color (hex).
    pub fn color(&self) -> &str {
        &self.color
    }

    /// Whether the presence panel is shown.
    pub fn show_presence(&self) -> bool {
        self.show_presence
    }

    /// Set and persist the display name.
    pub fn set_display_name(&mut self, name: &str) {
        self.display_name = name.trim().to_string();
        if let Err(e) = self.store.set(DISPLAY_NAME_KEY, &self.display_name) {
            log::warn!("[UserProfile] Failed to persist display name: {}", e);
        }
    }

    /// Set and persist the presence-panel toggle.
    pub fn set_show_presence(&mut self, show: bool) {
        self.show_presence = show;
        let value = if show { "true" } else { "false" };
        if let Err(e) = self.store.set(SHOW_PRESENCE_KEY, value) {
            log::warn!("[UserProfile] Failed to persist presence toggle: {}", e);
        }
    }

    /// The presence record this profile broadcasts to rooms.
    pub fn presence_record(&self) -> PresenceRecord {
        PresenceRecord {
            name: self.display_name.clone(),
            user_id: self.user_id.clone(),
            color: self.color.clone(),
        }
    }
}

impl std::fmt::Debug for UserProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserProfile")
            .field("user_id", &self.user_id)
            .field("display_name", &self.display_name)
            .field("color", &self.color)
            .field("show_presence", &self.show_presence)
            .finish()
    }
}

/// Stable per profile: derive the palette index from the id itself.
fn pick_color(user_id: &str) -> &'static str {
    let sum: usize = user_id.bytes().map(usize::from).sum();
    CURSOR_COLORS[sum % CURSOR_COLORS.len()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryStore;

    #[test]
    fn test_identity_is_stable_across_loads() {
        let store = Arc::new(MemoryStore::new());
        let first = UserProfile::load_or_init(store.clone());
        let second = UserProfile::load_or_init(store.clone());

        assert_eq!(first.user_id(), second.user_id());
        assert_eq!(first.color(), second.color());
        assert!(CURSOR_COLORS.contains(&first.color()));
    }

    #[test]
    fn test_display_name_round_trip() {
        let store = Arc::new(MemoryStore::new());
        let mut profile = UserProfile::load_or_init(store.clone());
        assert_eq!(profile.display_name(), "");

        profile.set_display_name("  Ada  ");
        assert_eq!(profile.display_name(), "Ada");

        let reloaded = UserProfile::load_or_init(store);
        assert_eq!(reloaded.display_name(), "Ada");
    }

    #[test]
    fn test_presence_toggle_round_trip() {
        let store = Arc::new(MemoryStore::new());
        let mut profile = UserProfile::load_or_init(store.clone());
        assert!(profile.show_presence());

        profile.set_show_presence(false);
        let reloaded = UserProfile::load_or_init(store);
        assert!(!reloaded.show_presence());
    }

    #[test]
    fn test_presence_record_reflects_profile() {
        let store = Arc::new(MemoryStore::new());
        let mut profile = UserProfile::load_or_init(store);
        profile.set_display_name("Ada");

        let record = profile.presence_record();
        assert_eq!(record.name, "Ada");
        assert_eq!(record.user_id, profile.user_id());
        assert_eq!(record.color, profile.color());
    }
}
