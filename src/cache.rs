//! JSON entry cache. One document per run, rewritten whole.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info, warn};

use crate::entry::Entry;
use crate::error::{Result, SyncError};
use crate::fs::{stage, StagedWrite};
use crate::identity::identify;

pub type CacheMap = BTreeMap<String, Entry>;

#[derive(Debug, Serialize)]
struct CacheDocument<'a> {
    last_updated: String,
    entries: &'a CacheMap,
}

/// On-disk form as read back. Entries stay untyped until each one is checked
/// so a single bad record does not discard the rest.
#[derive(Debug, Deserialize)]
struct StoredDocument {
    #[serde(default)]
    last_updated: Option<String>,
    #[serde(default)]
    entries: BTreeMap<String, Value>,
}

impl StoredDocument {
    fn into_entries(self) -> CacheMap {
        let mut out = CacheMap::new();
        for (key, raw) in self.entries {
            match serde_json::from_value::<Entry>(raw) {
                Ok(entry) => {
                    out.insert(key, entry);
                }
                Err(e) => warn!(key = %key, error = %e, "dropping malformed cache entry"),
            }
        }
        out
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub path: PathBuf,
    pub exists: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub struct JsonCache {
    path: PathBuf,
}

impl JsonCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the cached entries. A missing or unreadable file is an empty cache.
    pub fn load(&self) -> CacheMap {
        if !self.path.exists() {
            info!(path = %self.path.display(), "no cache file, starting empty");
            return CacheMap::new();
        }
        match self.read_document() {
            Ok(doc) => {
                let last_updated = doc.last_updated.clone();
                let entries = rekey(doc.into_entries());
                info!(
                    path = %self.path.display(),
                    entries = entries.len(),
                    last_updated = last_updated.as_deref().unwrap_or("unknown"),
                    "loaded cache"
                );
                entries
            }
            Err(e) => {
                error!(path = %self.path.display(), error = %e, "cache unreadable, starting empty");
                CacheMap::new()
            }
        }
    }

    /// Overwrite the cache file with `entries`.
    pub fn save(&self, entries: &CacheMap) -> Result<()> {
        self.stage(entries)?.commit().map_err(|e| self.error(e))?;
        info!(path = %self.path.display(), entries = entries.len(), "saved cache");
        Ok(())
    }

    /// Serialise `entries` into a temp file beside the cache; the cache itself
    /// changes only when the returned write is committed.
    pub fn stage(&self, entries: &CacheMap) -> Result<StagedWrite> {
        let doc = CacheDocument { last_updated: Utc::now().to_rfc3339(), entries };
        let json = serde_json::to_vec_pretty(&doc)?;
        stage(&self.path, &json).map_err(|e| self.error(e))
    }

    fn error(&self, e: std::io::Error) -> SyncError {
        SyncError::Cache { path: self.path.clone(), reason: e.to_string() }
    }

    pub fn stats(&self) -> CacheStats {
        let mut stats = CacheStats {
            path: self.path.clone(),
            exists: self.path.exists(),
            file_size: None,
            entry_count: None,
            last_updated: None,
            error: None,
        };
        if !stats.exists {
            return stats;
        }
        stats.file_size = fs::metadata(&self.path).ok().map(|m| m.len());
        match self.read_document() {
            Ok(doc) => {
                stats.last_updated = doc.last_updated.clone();
                stats.entry_count = Some(doc.into_entries().len());
            }
            Err(e) => stats.error = Some(e.to_string()),
        }
        stats
    }

    fn read_document(&self) -> Result<StoredDocument> {
        let raw = fs::read(&self.path)?;
        Ok(serde_json::from_slice(&raw)?)
    }
}

/// Key every entry by the id of its own link. Older caches used a different
/// hash; their entries are carried over instead of being refetched.
fn rekey(entries: CacheMap) -> CacheMap {
    let mut out = CacheMap::new();
    for (key, mut entry) in entries {
        let id = identify(&entry.link);
        if id != key || entry.id != id {
            warn!(link = %entry.link, "re-keying cached entry");
            entry.id = id.clone();
        }
        out.insert(id, entry);
    }
    out
}
