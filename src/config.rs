//! Engine configuration
//!
//! Provides settings for:
//! - Caret handling (clamp or reject out-of-range carets)
//! - Directory cache freshness and size

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{MentionError, Result};

/// What to do with a caret that points past the end of the text
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaretPolicy {
    /// Move the caret back to the end of the text
    #[default]
    Clamp,
    /// Fail with `MentionError::CaretOutOfRange`
    Strict,
}

/// How stale a cached mention map may get before it is reloaded
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Freshness {
    /// Directory changes often (onboarding, HR admissions)
    Live,
    /// Default
    Balanced,
    /// Directory rarely changes
    Relaxed,
}

impl Freshness {
    /// Get recommended cache TTL in seconds
    pub fn recommended_ttl_secs(&self) -> u64 {
        match self {
            Freshness::Live => 30,
            Freshness::Balanced => 300,
            Freshness::Relaxed => 1800,
        }
    }

    /// Get recommended number of scopes kept in the cache
    pub fn recommended_max_scopes(&self) -> usize {
        match self {
            Freshness::Live => 4,
            Freshness::Balanced => 16,
            Freshness::Relaxed => 64,
        }
    }
}

/// Directory cache configuration
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectoryConfig {
    /// Entries older than this are reloaded. Zero disables caching.
    pub ttl_secs: u64,
    /// Oldest scope is evicted once this many are cached.
    pub max_scopes: usize,
}

impl DirectoryConfig {
    /// Create config from a freshness preset (uses recommended values)
    pub fn from_freshness(freshness: Freshness) -> Self {
        Self {
            ttl_secs: freshness.recommended_ttl_secs(),
            max_scopes: freshness.recommended_max_scopes(),
        }
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self::from_freshness(Freshness::Balanced)
    }
}

/// Top-level configuration handed over by the embedding application
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub caret_policy: CaretPolicy,
    pub directory: DirectoryConfig,
}

impl EngineConfig {
    /// Parse config from JSON. Missing fields fall back to defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| MentionError::Validation(format!("Invalid engine config: {}", e)))
    }
}
