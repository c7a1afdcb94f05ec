//! Deterministic record identifiers and submitter receipts.
//!
//! A record id is derived from the destination scope and the submitter's
//! identity attributes, so every retry or duplicate of the same submission
//! targets the same remote record. The destination must treat writes to that
//! id as a merge-upsert.

use std::fmt;

use rand::Rng;
use sha2::{Digest, Sha256};
use uuid::Uuid;

const RECORD_PREFIX: &str = "rec_";
const MIN_PHONE_DIGITS: usize = 7;
const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const CODE_LEN: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordId {
    value: String,
    deterministic: bool,
}

impl RecordId {
    pub fn as_str(&self) -> &str {
        &self.value
    }

    /// False when the id was randomly generated because no identity
    /// attributes were available. Such ids do not deduplicate retries.
    pub fn is_deterministic(&self) -> bool {
        self.deterministic
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

/// Derive the destination record id for a submission.
pub fn generate_record_id(scope: &str, attributes: &[&str]) -> RecordId {
    derive(scope, attributes).unwrap_or_else(|| {
        tracing::warn!("No identity attributes for scope {scope}; record id will not deduplicate");
        fallback(Uuid::now_v7())
    })
}

/// Record id for a queued submission, from the named fields of its payload
/// in field order. Strings and numbers count; anything else is skipped.
///
/// Without identity attributes the id falls back to one derived from
/// `entry_id`, so every attempt at the same entry still targets the same
/// record.
pub fn record_id_from_payload(
    scope: &str,
    payload: &serde_json::Value,
    fields: &[String],
    entry_id: Uuid,
) -> RecordId {
    let values: Vec<String> = fields
        .iter()
        .filter_map(|name| match payload.get(name)? {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
        .collect();
    let attributes: Vec<&str> = values.iter().map(String::as_str).collect();

    derive(scope, &attributes).unwrap_or_else(|| fallback(entry_id))
}

fn derive(scope: &str, attributes: &[&str]) -> Option<RecordId> {
    let normalized: Vec<String> = attributes.iter().filter_map(|a| normalize(a)).collect();
    if normalized.is_empty() {
        return None;
    }

    let mut hasher = Sha256::new();
    for part in std::iter::once(scope.trim()).chain(normalized.iter().map(String::as_str)) {
        hasher.update((part.len() as u64).to_be_bytes());
        hasher.update(part.as_bytes());
    }
    let digest = hasher.finalize();

    Some(RecordId {
        value: format!("{RECORD_PREFIX}{}", hex::encode(&digest[..16])),
        deterministic: true,
    })
}

fn fallback(seed: Uuid) -> RecordId {
    RecordId {
        value: format!("{RECORD_PREFIX}{}", seed.simple()),
        deterministic: false,
    }
}

/// Canonical form of one identity attribute, or `None` if it is blank.
///
/// Phone-like values reduce to their digits; everything else is trimmed,
/// whitespace-collapsed and lowercased.
pub fn normalize(attribute: &str) -> Option<String> {
    let trimmed = attribute.trim();
    if trimmed.is_empty() {
        return None;
    }

    if looks_like_phone(trimmed) {
        return Some(trimmed.chars().filter(char::is_ascii_digit).collect());
    }

    Some(
        trimmed
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase(),
    )
}

fn looks_like_phone(value: &str) -> bool {
    let digits = value.chars().filter(char::is_ascii_digit).count();
    digits >= MIN_PHONE_DIGITS
        && value
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, ' ' | '+' | '-' | '(' | ')' | '.'))
}

/// Short receipt code shown to the submitter, e.g. `K7QM-2XRP`. Not unique
/// and never used as a storage key.
pub fn generate_confirmation_code() -> String {
    let mut rng = rand::rng();
    let chars: String = (0..CODE_LEN)
        .map(|_| CODE_ALPHABET[rng.random_range(0..CODE_ALPHABET.len())] as char)
        .collect();
    format!("{}-{}", &chars[..CODE_LEN / 2], &chars[CODE_LEN / 2..])
}
