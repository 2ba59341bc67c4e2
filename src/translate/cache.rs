//! Content-addressed translation cache.
//! Key: (SHA-512 hex of the exact source text, normalized language code).
//! Writes are insert-or-ignore: the first translation stored for a key wins
//! and later stores for the same key are no-ops.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use sha2::{Digest, Sha512};
use tracing::{debug, info};

use crate::error::CacheError;
use crate::properties::PropertiesDocument;

/// One stored translation. Never mutated after insertion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub text_hash: String,
    pub language_code: String,
    pub translation: String,
    /// Unix seconds.
    pub created_at: i64,
}

/// Storage primitive behind [`ContentCache`]. Each call is one logical
/// operation and must not hold resources past its return.
pub trait CacheStore: Send + Sync {
    /// Stored translations for `language` among `hashes`, keyed by hash.
    fn lookup(&self, language: &str, hashes: &[&str]) -> Result<HashMap<String, String>, CacheError>;

    /// Insert entries whose (hash, language) is not stored yet. Existing
    /// keys are left untouched. Returns how many rows were new.
    fn insert_if_absent(&self, entries: &[CacheEntry]) -> Result<usize, CacheError>;

    /// Delete every entry. Returns how many were removed.
    fn clear(&self) -> Result<usize, CacheError>;

    fn len(&self) -> Result<usize, CacheError>;
}

/// Partition of a document into cached and uncached entries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheLookup {
    /// Keys with a stored translation; value is the translation.
    pub hits: PropertiesDocument,
    /// Keys without one; value is the untouched source text.
    pub misses: PropertiesDocument,
}

/// Shared, long-lived cache handle. Cheap to clone.
#[derive(Clone)]
pub struct ContentCache {
    store: Arc<dyn CacheStore>,
}

impl ContentCache {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self { store }
    }

    /// In-memory cache, lost on drop. Entries are never evicted.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    /// Split `document` into hits and misses for `language`.
    pub fn lookup_many(
        &self,
        document: &PropertiesDocument,
        language: &str,
    ) -> Result<CacheLookup, CacheError> {
        let language = normalize_language_code(language);
        let hashes: Vec<String> = document.values().map(text_hash).collect();
        let refs: Vec<&str> = hashes.iter().map(String::as_str).collect();
        let found = self.store.lookup(&language, &refs)?;

        let mut lookup = CacheLookup::default();
        for ((key, text), hash) in document.iter().zip(&hashes) {
            match found.get(hash) {
                Some(translation) => {
                    lookup.hits.insert(key, translation.as_str());
                }
                None => {
                    lookup.misses.insert(key, text);
                }
            }
        }

        debug!(
            language = %language,
            hits = lookup.hits.len(),
            misses = lookup.misses.len(),
            "cache lookup"
        );
        Ok(lookup)
    }

    /// Store `translations[key]` under the hash of `originals[key]` for every
    /// key both documents share. Empty translations are skipped so they stay
    /// retryable. Returns the number of new rows.
    pub fn store_many(
        &self,
        originals: &PropertiesDocument,
        translations: &PropertiesDocument,
        language: &str,
    ) -> Result<usize, CacheError> {
        let language = normalize_language_code(language);
        let created_at = now_unix();

        let entries: Vec<CacheEntry> = translations
            .iter()
            .filter(|(_, translation)| !translation.is_empty())
            .filter_map(|(key, translation)| {
                originals.get(key).map(|original| CacheEntry {
                    text_hash: text_hash(original),
                    language_code: language.clone(),
                    translation: translation.to_string(),
                    created_at,
                })
            })
            .collect();

        if entries.is_empty() {
            return Ok(0);
        }

        let inserted = self.store.insert_if_absent(&entries)?;
        debug!(
            language = %language,
            offered = entries.len(),
            inserted,
            "cache store"
        );
        Ok(inserted)
    }

    /// Remove every cached translation. Irreversible.
    pub fn reset(&self) -> Result<usize, CacheError> {
        let removed = self.store.clear()?;
        info!(removed, "translation cache reset");
        Ok(removed)
    }

    pub fn len(&self) -> Result<usize, CacheError> {
        self.store.len()
    }

    pub fn is_empty(&self) -> Result<bool, CacheError> {
        Ok(self.len()? == 0)
    }
}

/// SHA-512 of the exact UTF-8 bytes, lowercase hex (128 chars). No
/// normalization: a trailing space is a different text.
pub fn text_hash(text: &str) -> String {
    format!("{:x}", Sha512::digest(text.as_bytes()))
}

/// Lowercase, `-` → `_`: `pt-BR`, `PT_br` and `pt_br` share cache rows.
/// Idempotent: a code that is already lowercase with `_` separators is
/// stored and looked up unchanged.
pub fn normalize_language_code(code: &str) -> String {
    code.trim().to_lowercase().replace('-', "_")
}

/// Current time as Unix timestamp (seconds).
pub(crate) fn now_unix() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

/// Unbounded in-memory store. Like the SQLite store, entries leave only
/// through [`CacheStore::clear`].
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<HashMap<(String, String), CacheEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CacheStore for MemoryStore {
    fn lookup(&self, language: &str, hashes: &[&str]) -> Result<HashMap<String, String>, CacheError> {
        let cache = self.inner.lock();
        let mut found = HashMap::new();
        for &hash in hashes {
            let key = (hash.to_string(), language.to_string());
            if let Some(entry) = cache.get(&key) {
                found.insert(hash.to_string(), entry.translation.clone());
            }
        }
        Ok(found)
    }

    fn insert_if_absent(&self, entries: &[CacheEntry]) -> Result<usize, CacheError> {
        let mut cache = self.inner.lock();
        let mut inserted = 0;
        for entry in entries {
            let key = (entry.text_hash.clone(), entry.language_code.clone());
            if let std::collections::hash_map::Entry::Vacant(slot) = cache.entry(key) {
                slot.insert(entry.clone());
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    fn clear(&self) -> Result<usize, CacheError> {
        let mut cache = self.inner.lock();
        let removed = cache.len();
        cache.clear();
        Ok(removed)
    }

    fn len(&self) -> Result<usize, CacheError> {
        Ok(self.inner.lock().len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(pairs: &[(&str, &str)]) -> PropertiesDocument {
        pairs.iter().copied().collect()
    }

    #[test]
    fn hash_is_sha512_hex_and_whitespace_sensitive() {
        let h = text_hash("Good night");
        assert_eq!(h.len(), 128);
        assert!(h.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_eq!(h, text_hash("Good night"));
        assert_ne!(h, text_hash("Good night "));
        assert_ne!(h, text_hash("good night"));
    }

    #[test]
    fn language_codes_are_normalized() {
        assert_eq!(normalize_language_code("fr_FR"), "fr_fr");
        assert_eq!(normalize_language_code("pt-BR"), "pt_br");
        assert_eq!(normalize_language_code(" ES "), "es");

        for already in ["es", "pt_br", "zh_hant_tw"] {
            assert_eq!(normalize_language_code(already), already);
        }
    }

    #[test]
    fn lookup_splits_hits_and_misses_preserving_order() {
        let cache = ContentCache::in_memory();
        let originals = doc(&[("label", "Good night")]);
        let translations = doc(&[("label", "Buenas noches")]);
        cache.store_many(&originals, &translations, "es").unwrap();

        let input = doc(&[("label2", "Good morning"), ("label", "Good night"), ("label3", "Queso")]);
        let lookup = cache.lookup_many(&input, "ES").unwrap();

        assert_eq!(lookup.hits, doc(&[("label", "Buenas noches")]));
        assert_eq!(lookup.misses, doc(&[("label2", "Good morning"), ("label3", "Queso")]));
    }

    #[test]
    fn hits_are_per_language() {
        let cache = ContentCache::in_memory();
        cache
            .store_many(&doc(&[("k", "Cheese")]), &doc(&[("k", "Queso")]), "es")
            .unwrap();

        let lookup = cache.lookup_many(&doc(&[("k", "Cheese")]), "fr").unwrap();
        assert!(lookup.hits.is_empty());
        assert_eq!(lookup.misses.get("k"), Some("Cheese"));
    }

    #[test]
    fn second_store_for_same_key_is_a_no_op() {
        let cache = ContentCache::in_memory();
        let originals = doc(&[("k", "Cheese")]);

        assert_eq!(cache.store_many(&originals, &doc(&[("k", "Queso")]), "es").unwrap(), 1);
        assert_eq!(cache.store_many(&originals, &doc(&[("k", "Otro")]), "es").unwrap(), 0);
        assert_eq!(cache.len().unwrap(), 1);

        let lookup = cache.lookup_many(&originals, "es").unwrap();
        assert_eq!(lookup.hits.get("k"), Some("Queso"));
    }

    #[test]
    fn store_skips_empty_translations_and_keys_without_original() {
        let cache = ContentCache::in_memory();
        let originals = doc(&[("a", "One"), ("b", "Two")]);
        let translations = doc(&[("a", "Uno"), ("b", ""), ("c", "Tres")]);

        assert_eq!(cache.store_many(&originals, &translations, "es").unwrap(), 1);
        let lookup = cache.lookup_many(&originals, "es").unwrap();
        assert_eq!(lookup.hits.keys().collect::<Vec<_>>(), vec!["a"]);
        assert_eq!(lookup.misses.keys().collect::<Vec<_>>(), vec!["b"]);
    }

    #[test]
    fn identical_texts_under_different_keys_share_one_row() {
        let cache = ContentCache::in_memory();
        let originals = doc(&[("ok", "OK"), ("ok2", "OK")]);
        let translations = doc(&[("ok", "Vale"), ("ok2", "Vale")]);

        assert_eq!(cache.store_many(&originals, &translations, "es").unwrap(), 1);
        let lookup = cache.lookup_many(&originals, "es").unwrap();
        assert_eq!(lookup.hits.len(), 2);
    }

    #[test]
    fn reset_clears_everything() {
        let cache = ContentCache::in_memory();
        cache
            .store_many(&doc(&[("a", "One")]), &doc(&[("a", "Uno")]), "es")
            .unwrap();
        assert_eq!(cache.reset().unwrap(), 1);
        assert!(cache.is_empty().unwrap());
    }

    #[test]
    fn memory_store_keeps_every_entry_until_cleared() {
        let store = MemoryStore::new();
        let entries: Vec<CacheEntry> = (0..5_000)
            .map(|i| CacheEntry {
                text_hash: format!("h{i}"),
                language_code: "es".into(),
                translation: format!("t{i}"),
                created_at: 0,
            })
            .collect();
        assert_eq!(store.insert_if_absent(&entries).unwrap(), 5_000);

        let hashes: Vec<&str> = entries.iter().map(|e| e.text_hash.as_str()).collect();
        assert_eq!(store.lookup("es", &hashes).unwrap().len(), 5_000);
        assert_eq!(store.insert_if_absent(&entries[..10]).unwrap(), 0);

        assert_eq!(store.clear().unwrap(), 5_000);
        assert_eq!(store.len().unwrap(), 0);
    }
}
