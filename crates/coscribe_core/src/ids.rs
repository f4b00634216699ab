//! Identifier generation and room slug validation.

use thiserror::Error;
use uuid::Uuid;

/// Maximum length of a user-chosen room slug.
const MAX_SLUG_LEN: usize = 50;

/// Generate a stable per-profile user identifier.
///
/// 128 bits of randomness (UUID v4). Collision probability is negligible at
/// any realistic population, unlike short random-suffix schemes.
pub fn new_user_id() -> String {
    format!("user_{}", Uuid::new_v4().simple())
}

/// Generate an identifier for an upload task.
pub fn new_task_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Reasons a user-chosen room slug is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SlugError {
    /// The slug is empty.
    #[error("slug cannot be empty")]
    Empty,
    /// The slug exceeds the length limit.
    #[error("slug too long (max {MAX_SLUG_LEN} characters)")]
    TooLong,
    /// The slug is not lowercase alphanumeric words joined by single hyphens.
    #[error("slug must be lowercase alphanumeric with optional single hyphen")]
    BadFormat,
    /// More than two hyphen-separated words.
    #[error("slug can have at most two words")]
    TooManyWords,
    /// A word is shorter than two characters.
    #[error("each word must be at least two characters")]
    WordTooShort,
}

/// Validate a user-chosen room slug before submitting it to the server.
///
/// Server-generated slugs are two dictionary words; custom slugs must fit the
/// same shape: lowercase alphanumeric, at most two words joined by a single
/// hyphen, each word at least two characters, fifty characters total.
pub fn validate_custom_slug(slug: &str) -> Result<(), SlugError> {
    if slug.is_empty() {
        return Err(SlugError::Empty);
    }
    if slug.len() > MAX_SLUG_LEN {
        return Err(SlugError::TooLong);
    }

    let words: Vec<&str> = slug.split('-').collect();
    for word in &words {
        if word.is_empty()
            || !word
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        {
            return Err(SlugError::BadFormat);
        }
    }
    if words.len() > 2 {
        return Err(SlugError::TooManyWords);
    }
    if words.iter().any(|w| w.len() < 2) {
        return Err(SlugError::WordTooShort);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_ids_are_unique_and_prefixed() {
        let a = new_user_id();
        let b = new_user_id();
        assert!(a.starts_with("user_"));
        assert_ne!(a, b);
        // "user_" + 32 hex chars
        assert_eq!(a.len(), 5 + 32);
    }

    #[test]
    fn test_valid_slugs() {
        assert_eq!(validate_custom_slug("quiet-otter"), Ok(()));
        assert_eq!(validate_custom_slug("room42"), Ok(()));
        assert_eq!(validate_custom_slug("ab"), Ok(()));
    }

    #[test]
    fn test_invalid_slugs() {
        assert_eq!(validate_custom_slug(""), Err(SlugError::Empty));
        assert_eq!(
            validate_custom_slug(&"a".repeat(51)),
            Err(SlugError::TooLong)
        );
        assert_eq!(validate_custom_slug("Quiet-Otter"), Err(SlugError::BadFormat));
        assert_eq!(validate_custom_slug("quiet--otter"), Err(SlugError::BadFormat));
        assert_eq!(validate_custom_slug("-otter"), Err(SlugError::BadFormat));
        assert_eq!(
            validate_custom_slug("one-two-three"),
            Err(SlugError::TooManyWords)
        );
        assert_eq!(validate_custom_slug("a-bc"), Err(SlugError::WordTooShort));
    }
}
