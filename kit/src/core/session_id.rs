//! Session identifier generation and validation.
//!
//! Session ids become file names under the sessions directory, so any id that
//! did not come from [`generate_session_id`] must pass [`validate_session_id`]
//! before a path is built from it.

use anyhow::Result;
use chrono::{DateTime, Utc};
use rand::{Rng, distributions::Alphanumeric};

use crate::error::KitError;

/// Upper bound on accepted session id length.
pub const MAX_SESSION_ID_LEN: usize = 64;

const RANDOM_SUFFIX_LEN: usize = 8;

/// Generate a fresh session id: `<yyyymmdd>-<hhmmss>-<8 alphanumerics>`.
pub fn generate_session_id() -> String {
    session_id_at(Utc::now(), &random_suffix())
}

fn session_id_at(now: DateTime<Utc>, suffix: &str) -> String {
    format!("{}-{}", now.format("%Y%m%d-%H%M%S"), suffix)
}

fn random_suffix() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(RANDOM_SUFFIX_LEN)
        .map(char::from)
        .collect()
}

/// Validate that `id` is safe for use as a single path component.
///
/// Accepts `[A-Za-z0-9-]` only, 1..=64 characters. This rejects separators,
/// `..`, NUL, whitespace and anything else outside the allow-list.
pub fn validate_session_id(id: &str) -> Result<()> {
    if is_valid_session_id(id) {
        return Ok(());
    }
    Err(KitError::InvalidSessionId(id.to_string()).into())
}

pub fn is_valid_session_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_SESSION_ID_LEN
        && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn generated_ids_are_valid_and_distinct() {
        let a = generate_session_id();
        let b = generate_session_id();
        assert!(is_valid_session_id(&a), "{a}");
        assert!(is_valid_session_id(&b), "{b}");
        assert_ne!(a, b);
    }

    #[test]
    fn id_embeds_timestamp_prefix() {
        let now = Utc.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).single().expect("time");
        assert_eq!(session_id_at(now, "AbC123xy"), "20240309-070501-AbC123xy");
    }

    #[test]
    fn rejects_traversal_and_out_of_set_characters() {
        let bad = [
            "",
            "..",
            "../etc/passwd",
            "a/b",
            "a\\b",
            "name.json",
            "with space",
            "nul\0byte",
            "semi;colon",
            "ünicode",
        ];
        for id in bad {
            let err = validate_session_id(id).expect_err(id);
            assert!(
                matches!(
                    err.downcast_ref::<KitError>(),
                    Some(KitError::InvalidSessionId(_))
                ),
                "id {id:?} gave {err:#}"
            );
        }
    }

    #[test]
    fn rejects_overlong_ids() {
        let id = "a".repeat(MAX_SESSION_ID_LEN + 1);
        assert!(validate_session_id(&id).is_err());
        assert!(validate_session_id(&"a".repeat(MAX_SESSION_ID_LEN)).is_ok());
    }
}
