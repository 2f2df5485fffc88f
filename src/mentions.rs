//! Mention engine
//!
//! Client-side only, no storage.
//! - Detects the `@query` being typed under the caret.
//! - Rewrites completed `@DisplayName` references to canonical `@[id]`.
//! - Extracts canonical ids from stored text.
//!
//! All offsets are character offsets (Unicode scalar values), never bytes.
//! Whitespace is Unicode `White_Space`, as reported by `char::is_whitespace`.

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{trace, warn};

use crate::error::{MentionError, Result};

/// `@[id]` preceded by whitespace or the start of the text. The trailing
/// boundary is checked separately since the pattern cannot look ahead.
static CANONICAL_MENTION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:^|\s)@\[([^\]\s]+)\]").expect("canonical mention regex is valid")
});

/// Mention being typed: `start` is the `@`, `end` is the caret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MentionState {
    pub start: usize,
    pub end: usize,
    pub query: String,
}

impl MentionState {
    /// Replace the typed `@query` with `@display_name ` (trailing space included).
    ///
    /// Returns the new text and the caret position right after the inserted space.
    pub fn apply(&self, text: &str, display_name: &str) -> (String, usize) {
        let start = byte_offset(text, self.start);
        let end = byte_offset(text, self.end).max(start);

        let mut out = String::with_capacity(text.len() + display_name.len() + 2);
        out.push_str(&text[..start]);
        out.push('@');
        out.push_str(display_name);
        out.push(' ');
        out.push_str(&text[end..]);

        let caret = text[..start].chars().count() + display_name.chars().count() + 2;
        (out, caret)
    }
}

/// Detect the mention under the caret.
///
/// `None` caret means the end of the text. A caret past the end is clamped.
pub fn detect_mention_state(text: &str, caret: Option<usize>) -> Option<MentionState> {
    let len = text.chars().count();
    let caret = caret.map_or(len, |c| c.min(len));
    detect_at(text, caret)
}

/// Same as [`detect_mention_state`], but a caret past the end is an error.
pub fn try_detect_mention_state(text: &str, caret: Option<usize>) -> Result<Option<MentionState>> {
    let len = text.chars().count();
    let caret = match caret {
        Some(c) if c > len => return Err(MentionError::CaretOutOfRange { caret: c, len }),
        Some(c) => c,
        None => len,
    };
    Ok(detect_at(text, caret))
}

fn detect_at(text: &str, caret: usize) -> Option<MentionState> {
    let before = &text[..byte_offset(text, caret)];
    let at = before.rfind('@')?;

    // user@host is not a mention
    if !is_boundary_before(before, at) {
        trace!(caret, "mention rejected: no boundary before @");
        return None;
    }

    let after_at = &before[at + 1..];
    if after_at.starts_with('[') || after_at.chars().any(char::is_whitespace) {
        return None;
    }

    let state = MentionState {
        start: before[..at].chars().count(),
        end: caret,
        query: after_at.to_string(),
    };
    trace!(start = state.start, end = state.end, query = %state.query, "mention detected");
    Some(state)
}

/// Display name -> id lookup, iterated in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MentionMap {
    entries: IndexMap<String, String>,
}

impl MentionMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or update a name. Updating keeps the original position.
    pub fn insert(
        &mut self,
        display_name: impl Into<String>,
        id: impl Into<String>,
    ) -> Option<String> {
        self.entries.insert(display_name.into(), id.into())
    }

    pub fn get(&self, display_name: &str) -> Option<&str> {
        self.entries.get(display_name).map(String::as_str)
    }

    /// Reverse lookup (first name registered for `id`).
    pub fn name_for_id(&self, id: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(_, v)| v.as_str() == id)
            .map(|(k, _)| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<N: Into<String>, I: Into<String>> FromIterator<(N, I)> for MentionMap {
    fn from_iter<T: IntoIterator<Item = (N, I)>>(iter: T) -> Self {
        let mut map = MentionMap::new();
        for (name, id) in iter {
            map.insert(name, id);
        }
        map
    }
}

/// Rewrite `@DisplayName` to `@[id]` for every entry of `mentions`.
///
/// A name matches literally, only when preceded by whitespace or the start of
/// the text and followed by whitespace or the end of the text. Entries are
/// applied in insertion order, each one on the output of the previous. Empty
/// display names and ids rejected by [`is_valid_mention_id`] are skipped, so
/// every reference written here is found again by [`extract_mention_ids`].
///
/// Known limitation: a name containing whitespace that extends a shorter name
/// (`"Ana"` and `"Ana Maria"`) is resolved by insertion order only.
pub fn convert_names_to_ids(text: &str, mentions: &MentionMap) -> String {
    let mut out = text.to_string();
    for (name, id) in mentions.iter() {
        if name.is_empty() {
            continue;
        }
        if !is_valid_mention_id(id) {
            warn!(name, id, "mention id cannot be written as @[id], skipped");
            continue;
        }
        let needle = format!("@{}", name);
        let replacement = format!("@[{}]", id);
        if let Some(replaced) = replace_bounded(&out, &needle, &replacement) {
            trace!(name, id, "display name converted");
            out = replaced;
        }
    }
    out
}

/// Inverse of [`convert_names_to_ids`]: `@[id]` back to `@DisplayName`.
/// Ids missing from `mentions` stay canonical.
pub fn convert_ids_to_names(text: &str, mentions: &MentionMap) -> String {
    let mut out = text.to_string();
    for (name, id) in mentions.iter() {
        if name.is_empty() || !is_valid_mention_id(id) {
            continue;
        }
        let needle = format!("@[{}]", id);
        let replacement = format!("@{}", name);
        if let Some(replaced) = replace_bounded(&out, &needle, &replacement) {
            out = replaced;
        }
    }
    out
}

/// Whether `id` fits in a canonical `@[id]` reference: non-empty, no
/// whitespace, no `]`.
pub fn is_valid_mention_id(id: &str) -> bool {
    !id.is_empty() && !id.chars().any(|c| c == ']' || c.is_whitespace())
}

/// Ids of canonical `@[id]` mentions, deduplicated, in order of first appearance.
///
/// Same boundaries as the converters: whitespace or a text edge on both sides.
pub fn extract_mention_ids(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    CANONICAL_MENTION
        .captures_iter(text)
        .filter(|cap| cap.get(0).is_some_and(|m| is_boundary_after(text, m.end())))
        .filter_map(|cap| cap.get(1).map(|m| m.as_str().to_string()))
        .filter(|id| seen.insert(id.clone()))
        .collect()
}

/// Replace every occurrence of `needle` bounded by whitespace or text edges.
/// Returns `None` when nothing matched. `needle` must start with `@`.
fn replace_bounded(text: &str, needle: &str, replacement: &str) -> Option<String> {
    let mut out = String::with_capacity(text.len());
    let mut copied = 0;
    let mut search_from = 0;

    while let Some(offset) = text[search_from..].find(needle) {
        let pos = search_from + offset;
        let end = pos + needle.len();
        if is_boundary_before(text, pos) && is_boundary_after(text, end) {
            out.push_str(&text[copied..pos]);
            out.push_str(replacement);
            copied = end;
            search_from = end;
        } else {
            // '@' is a single byte
            search_from = pos + 1;
        }
    }

    if copied == 0 {
        return None;
    }
    out.push_str(&text[copied..]);
    Some(out)
}

fn is_boundary_before(text: &str, pos: usize) -> bool {
    text[..pos].chars().next_back().map_or(true, char::is_whitespace)
}

fn is_boundary_after(text: &str, pos: usize) -> bool {
    text[pos..].chars().next().map_or(true, char::is_whitespace)
}

/// Byte index of the `chars`-th character, or `text.len()` past the end.
fn byte_offset(text: &str, chars: usize) -> usize {
    text.char_indices().nth(chars).map_or(text.len(), |(i, _)| i)
}
