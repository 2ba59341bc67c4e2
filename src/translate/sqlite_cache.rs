//! Persistent translation cache backed by SQLite.
//! One table, primary key (text_hash, language_code). Every operation opens
//! its own connection and transaction and drops both before returning, so a
//! deleted or replaced database file is picked up on the next call.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use tracing::{debug, info};

use super::cache::{CacheEntry, CacheStore};
use crate::config::CacheConfig;
use crate::error::CacheError;

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS translation_cache (
        text_hash TEXT NOT NULL,
        text_translation TEXT,
        created_at TIMESTAMP,
        language_code TEXT NOT NULL,
        PRIMARY KEY (text_hash, language_code)
    );";

/// SQLite-backed [`CacheStore`].
pub struct SqliteStore {
    path: PathBuf,
    busy_timeout: Duration,
}

impl SqliteStore {
    /// Open (or create) the cache database at `config.path`.
    pub fn open(config: &CacheConfig) -> Result<Self, CacheError> {
        if let Some(parent) = config.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| CacheError::Io(format!("{}: {e}", parent.display())))?;
        }

        let store = Self {
            path: config.path.clone(),
            busy_timeout: Duration::from_millis(config.busy_timeout_ms),
        };

        // Fail early on an unusable path instead of on the first lookup.
        let conn = store.connect()?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        drop(conn);

        info!(path = %store.path.display(), "SQLite translation cache opened");
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn connect(&self) -> Result<Connection, CacheError> {
        let conn = Connection::open(&self.path)
            .map_err(|e| CacheError::Io(format!("failed to open {}: {e}", self.path.display())))?;
        conn.busy_timeout(self.busy_timeout)?;
        conn.execute_batch("PRAGMA synchronous=NORMAL;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(conn)
    }
}

impl CacheStore for SqliteStore {
    fn lookup(&self, language: &str, hashes: &[&str]) -> Result<HashMap<String, String>, CacheError> {
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        let mut found = HashMap::new();
        {
            let mut stmt = tx.prepare_cached(
                "SELECT text_translation FROM translation_cache
                 WHERE text_hash = ?1 AND language_code = ?2",
            )?;
            for &hash in hashes {
                let translation: Option<Option<String>> = stmt
                    .query_row(params![hash, language], |row| row.get(0))
                    .optional()?;
                if let Some(Some(translation)) = translation {
                    found.insert(hash.to_string(), translation);
                }
            }
        }
        tx.commit()?;

        debug!(language, queried = hashes.len(), found = found.len(), "sqlite lookup");
        Ok(found)
    }

    fn insert_if_absent(&self, entries: &[CacheEntry]) -> Result<usize, CacheError> {
        let mut conn = self.connect()?;
        // Take the write lock up front so concurrent writers wait on busy_timeout.
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT OR IGNORE INTO translation_cache
                 (text_hash, text_translation, created_at, language_code)
                 VALUES (?1, ?2, ?3, ?4)",
            )?;
            for entry in entries {
                inserted += stmt.execute(params![
                    entry.text_hash,
                    entry.translation,
                    entry.created_at,
                    entry.language_code,
                ])?;
            }
        }
        tx.commit()?;
        Ok(inserted)
    }

    fn clear(&self) -> Result<usize, CacheError> {
        let conn = self.connect()?;
        let removed = conn.execute("DELETE FROM translation_cache", [])?;
        Ok(removed)
    }

    fn len(&self) -> Result<usize, CacheError> {
        let conn = self.connect()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM translation_cache", [], |row| row.get(0))?;
        Ok(count.max(0) as usize)
    }
}
