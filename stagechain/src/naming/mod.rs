//! Cloud resource naming: unique suffixes, length limits and labels.

use crate::errors::NamingError;
use rand::Rng;
use std::collections::BTreeMap;

/// Longest cluster name GKE accepts for the resources derived from it.
pub const MAX_NAME_LEN: usize = 30;

/// Longest label key or value GCP accepts.
pub const MAX_LABEL_LEN: usize = 63;

const SUFFIX_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Returns a random lowercase base-36 identifier of `len` characters.
#[must_use]
pub fn unique_id(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| char::from(SUFFIX_ALPHABET[rng.gen_range(0..SUFFIX_ALPHABET.len())]))
        .collect()
}

/// Returns true if `suffix` is non-empty lowercase alphanumeric.
#[must_use]
pub fn is_valid_suffix(suffix: &str) -> bool {
    !suffix.is_empty() && suffix.bytes().all(|b| b.is_ascii_lowercase() || b.is_ascii_digit())
}

/// Derives cluster names from a fixed prefix and a suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NamePolicy {
    /// Fixed name prefix, e.g. `terratest-complete-`.
    pub prefix: &'static str,
    /// Length of generated suffixes.
    pub suffix_len: usize,
    /// Maximum length of the derived name.
    pub max_len: usize,
}

impl NamePolicy {
    /// Creates a policy with the default length limit.
    #[must_use]
    pub const fn new(prefix: &'static str, suffix_len: usize) -> Self {
        Self {
            prefix,
            suffix_len,
            max_len: MAX_NAME_LEN,
        }
    }

    /// Generates a fresh suffix of the configured length.
    #[must_use]
    pub fn generate_suffix(&self) -> String {
        unique_id(self.suffix_len)
    }

    /// Returns `prefix + suffix`.
    ///
    /// # Errors
    ///
    /// Returns an error if the suffix is not lowercase alphanumeric or the
    /// name exceeds the length limit.
    pub fn cluster_name(&self, suffix: &str) -> Result<String, NamingError> {
        if !is_valid_suffix(suffix) {
            return Err(NamingError::InvalidSuffix {
                suffix: suffix.to_string(),
            });
        }

        let name = format!("{}{suffix}", self.prefix);
        if name.len() > self.max_len {
            return Err(NamingError::TooLong {
                len: name.len(),
                name,
                max: self.max_len,
            });
        }
        Ok(name)
    }
}

/// Makes a string usable as a GCP label value.
///
/// Lowercases, replaces anything outside `[a-z0-9_-]` with `-` and truncates.
#[must_use]
pub fn sanitize_label(value: &str) -> String {
    value
        .chars()
        .map(|c| c.to_ascii_lowercase())
        .map(|c| {
            if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-' {
                c
            } else {
                '-'
            }
        })
        .take(MAX_LABEL_LEN)
        .collect()
}

/// Returns the standard labels for resources of a scenario.
#[must_use]
pub fn generate_tags(name: &str) -> BTreeMap<String, String> {
    [
        ("resource-name", sanitize_label(name)),
        ("managed-by", "terraform".to_string()),
        ("created-by", "stagechain".to_string()),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect()
}
