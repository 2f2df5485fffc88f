//! Collaborator directory
//!
//! Collaborators are the people that can be mentioned in tickets, tasks, atas
//! and HR workflows.
//! - `Directory`: seam to whatever store holds user records
//! - `CachedDirectory`: one mention map per scope, with explicit invalidation
//! - `suggest`: ranking for the mention popup

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tracing::{debug, warn};

use crate::config::DirectoryConfig;
use crate::error::Result;
use crate::mentions::{is_valid_mention_id, MentionMap};

/// Someone that can be mentioned
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Collaborator {
    pub id: String,
    pub display_name: String,
}

impl Collaborator {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
        }
    }
}

/// Source of collaborators, keyed by scope (workspace, tenant, ...).
pub trait Directory: Send + Sync {
    fn collaborators(&self, scope: &str) -> Result<Vec<Collaborator>>;
}

/// In-memory directory
#[derive(Default, Clone, Debug)]
pub struct StaticDirectory {
    scopes: HashMap<String, Vec<Collaborator>>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the collaborators of a scope
    pub fn set_scope(&mut self, scope: impl Into<String>, collaborators: Vec<Collaborator>) {
        self.scopes.insert(scope.into(), collaborators);
    }
}

impl Directory for StaticDirectory {
    /// Unknown scopes have no collaborators.
    fn collaborators(&self, scope: &str) -> Result<Vec<Collaborator>> {
        Ok(self.scopes.get(scope).cloned().unwrap_or_default())
    }
}

/// Build a mention map from a directory listing.
///
/// Blank names and ids that cannot be written as `@[id]` are skipped. On
/// duplicate names the first collaborator wins.
pub fn mention_map_from(collaborators: &[Collaborator]) -> MentionMap {
    let mut map = MentionMap::new();
    for c in collaborators {
        if c.display_name.trim().is_empty() {
            warn!(id = %c.id, "collaborator without display name skipped");
            continue;
        }
        if !is_valid_mention_id(&c.id) {
            warn!(name = %c.display_name, id = %c.id, "collaborator with unusable id skipped");
            continue;
        }
        if let Some(existing) = map.get(&c.display_name) {
            warn!(
                name = %c.display_name,
                kept = existing,
                dropped = %c.id,
                "duplicate display name"
            );
            continue;
        }
        map.insert(c.display_name.clone(), c.id.clone());
    }
    map
}

/// Cached listing of one scope.
#[derive(Debug)]
pub struct ScopeSnapshot {
    pub collaborators: Vec<Collaborator>,
    pub mentions: MentionMap,
}

struct CacheEntry {
    snapshot: Arc<ScopeSnapshot>,
    loaded_at: Instant,
}

/// Explicit keyed cache in front of a `Directory`.
pub struct CachedDirectory<D> {
    inner: D,
    config: DirectoryConfig,
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl<D: Directory> CachedDirectory<D> {
    pub fn new(inner: D, config: DirectoryConfig) -> Self {
        Self {
            inner,
            config,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Get the snapshot of a scope, loading it when missing or expired.
    pub fn snapshot(&self, scope: &str) -> Result<Arc<ScopeSnapshot>> {
        let ttl = self.config.ttl();
        {
            let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(entry) = entries.get(scope) {
                if entry.loaded_at.elapsed() < ttl {
                    debug!(scope, "directory cache hit");
                    return Ok(Arc::clone(&entry.snapshot));
                }
            }
        }

        // Load outside the lock, the directory may be slow.
        debug!(scope, "directory cache miss");
        let collaborators = self.inner.collaborators(scope)?;
        let mentions = mention_map_from(&collaborators);
        let snapshot = Arc::new(ScopeSnapshot {
            collaborators,
            mentions,
        });

        if ttl.is_zero() {
            return Ok(snapshot);
        }

        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if !entries.contains_key(scope) && entries.len() >= self.config.max_scopes {
            let oldest = entries
                .iter()
                .min_by_key(|(_, e)| e.loaded_at)
                .map(|(k, _)| k.clone());
            if let Some(oldest) = oldest {
                debug!(scope = %oldest, "directory cache eviction");
                entries.remove(&oldest);
            }
        }
        if self.config.max_scopes > 0 {
            entries.insert(
                scope.to_string(),
                CacheEntry {
                    snapshot: Arc::clone(&snapshot),
                    loaded_at: Instant::now(),
                },
            );
        }
        Ok(snapshot)
    }

    /// Mention map of a scope, ready for `convert_names_to_ids`.
    pub fn mention_map(&self, scope: &str) -> Result<MentionMap> {
        Ok(self.snapshot(scope)?.mentions.clone())
    }

    /// Ranked suggestions for the popup of an active mention.
    pub fn suggest(&self, scope: &str, query: &str, limit: usize) -> Result<Vec<Collaborator>> {
        Ok(suggest(&self.snapshot(scope)?.collaborators, query, limit))
    }

    /// Drop one scope. Returns whether it was cached.
    pub fn invalidate(&self, scope: &str) -> bool {
        let removed = self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(scope)
            .is_some();
        debug!(scope, removed, "directory cache invalidated");
        removed
    }

    pub fn invalidate_all(&self) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        debug!("directory cache cleared");
    }

    /// Whether a fresh entry exists for `scope`.
    pub fn is_cached(&self, scope: &str) -> bool {
        let ttl = self.config.ttl();
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(scope)
            .is_some_and(|e| e.loaded_at.elapsed() < ttl)
    }

    pub fn cached_scopes(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Rank collaborators against the typed query. Lower is better:
/// exact, exact ignoring case, prefix, prefix ignoring case, word start, anywhere.
fn match_priority(name: &str, query: &str) -> Option<u8> {
    let name_lower = name.to_lowercase();
    let query_lower = query.to_lowercase();

    if name == query {
        return Some(0);
    }
    if name_lower == query_lower {
        return Some(1);
    }
    if name.starts_with(query) {
        return Some(2);
    }
    if name_lower.starts_with(&query_lower) {
        return Some(3);
    }

    let mut found = false;
    for (pos, _) in name_lower.match_indices(&query_lower) {
        found = true;
        if name_lower[..pos]
            .chars()
            .next_back()
            .is_some_and(char::is_whitespace)
        {
            return Some(4);
        }
    }
    found.then_some(5)
}

/// Collaborators matching `query`, best first, at most `limit`.
///
/// An empty query lists everyone by display name.
pub fn suggest(collaborators: &[Collaborator], query: &str, limit: usize) -> Vec<Collaborator> {
    let mut ranked: Vec<(u8, &Collaborator)> = collaborators
        .iter()
        .filter_map(|c| {
            if query.is_empty() {
                Some((0, c))
            } else {
                match_priority(&c.display_name, query).map(|p| (p, c))
            }
        })
        .collect();

    ranked.sort_by(|(pa, a), (pb, b)| {
        pa.cmp(pb).then_with(|| a.display_name.cmp(&b.display_name))
    });

    ranked
        .into_iter()
        .take(limit)
        .map(|(_, c)| c.clone())
        .collect()
}
