//! Internal helpers for input normalization and key generation.
//!
//! These utilities are **not** part of the public API. They centralize
//! validation so every entry point (HTTP or admin CLI) enforces the same
//! invariants.

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand_core::{OsRng, RngCore};
use unicode_normalization::UnicodeNormalization;

use crate::{EngineError, ResultEngine};

/// 30 random bytes encode to a 40 character token.
pub(crate) const TOKEN_BYTES: usize = 30;
/// 24 random bytes encode to a 32 character session key.
pub(crate) const SESSION_KEY_BYTES: usize = 24;

pub(crate) const USERNAME_MAX_CHARS: usize = 150;
const USERNAME_EXTRA_CHARS: &[char] = &['@', '.', '+', '-', '_'];

/// Random URL-safe key backed by the OS RNG.
pub(crate) fn random_key(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    OsRng.fill_bytes(&mut buf);
    URL_SAFE_NO_PAD.encode(buf)
}

/// NFKC-normalize and check a username.
///
/// Accepts letters, digits and `@ . + - _`, up to 150 characters.
pub(crate) fn normalize_username(raw: &str) -> ResultEngine<String> {
    let username: String = raw.trim().nfkc().collect();
    if username.is_empty() {
        return Err(EngineError::field("username", "This field may not be blank."));
    }
    if username.chars().count() > USERNAME_MAX_CHARS {
        return Err(EngineError::field(
            "username",
            "Ensure this field has no more than 150 characters.",
        ));
    }
    if !username
        .chars()
        .all(|c| c.is_alphanumeric() || USERNAME_EXTRA_CHARS.contains(&c))
    {
        return Err(EngineError::field(
            "username",
            "Enter a valid username. This value may contain only letters, numbers, and @/./+/-/_ characters.",
        ));
    }
    Ok(username)
}

pub(crate) fn normalize_text(value: &str) -> String {
    value.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_have_expected_length() {
        assert_eq!(random_key(TOKEN_BYTES).len(), 40);
        assert_eq!(random_key(SESSION_KEY_BYTES).len(), 32);
        assert_ne!(random_key(TOKEN_BYTES), random_key(TOKEN_BYTES));
    }

    #[test]
    fn username_is_trimmed_and_normalized() {
        assert_eq!(normalize_username("  alice ").unwrap(), "alice");
        // Fullwidth letters fold to ASCII under NFKC.
        assert_eq!(normalize_username("ａｌｉｃｅ").unwrap(), "alice");
    }

    #[test]
    fn username_rejects_spaces_and_symbols() {
        assert!(normalize_username("alice smith").is_err());
        assert!(normalize_username("alice!").is_err());
        assert!(normalize_username("a.l+i-c_e@x").is_ok());
    }

    #[test]
    fn username_rejects_blank_and_overlong() {
        assert!(normalize_username("   ").is_err());
        assert!(normalize_username(&"a".repeat(151)).is_err());
        assert!(normalize_username(&"a".repeat(150)).is_ok());
    }
}
