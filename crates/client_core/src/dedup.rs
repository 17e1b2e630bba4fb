//! Suppression of messages the backend re-delivers after the client already
//! surfaced them, e.g. human input echoed back through the normal event
//! stream after an optimistic local append.

use std::collections::HashSet;

/// Longest content prefix that participates in a fingerprint. Streaming can
/// change trailing content between deliveries, so matching is prefix-bounded.
const FINGERPRINT_PREFIX_CHARS: usize = 100;

/// Set of content fingerprints surfaced during the current session.
/// Cleared whenever a session is (re)created.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DedupLedger {
    seen: HashSet<String>,
}

fn content_prefix(content: &str) -> &str {
    match content.char_indices().nth(FINGERPRINT_PREFIX_CHARS) {
        Some((idx, _)) => &content[..idx],
        None => content,
    }
}

fn fingerprint(name: &str, content: &str) -> String {
    format!("{name}::{}", content_prefix(content))
}

impl DedupLedger {
    /// True when this (name, content) pair was already surfaced. Both the
    /// marker-qualified and the bare fingerprint are checked, so a
    /// redelivery with or without its sequence number is caught either way.
    pub fn should_suppress(&self, name: &str, content: &str, marker: Option<u64>) -> bool {
        let base = fingerprint(name, content);
        if self.seen.contains(&base) {
            return true;
        }
        match marker {
            Some(marker) => self.seen.contains(&format!("{base}:{marker}")),
            None => false,
        }
    }

    /// Records both fingerprint variants unconditionally.
    pub fn record(&mut self, name: &str, content: &str, marker: Option<u64>) {
        let base = fingerprint(name, content);
        if let Some(marker) = marker {
            self.seen.insert(format!("{base}:{marker}"));
        }
        self.seen.insert(base);
    }

    pub fn clear(&mut self) {
        self.seen.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}
