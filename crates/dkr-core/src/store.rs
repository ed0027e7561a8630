//! Rule store — loads, hashes and caches parsed rule sets per source id
//!
//! # Loading
//!
//! `load(source_id)` fetches the raw text from a `RuleSource` and hashes it.
//! If the hash matches the cached rule set, the cached `Arc` is returned
//! without parsing. Otherwise the text is parsed and validated, and only a
//! successful parse replaces the cached entry. A failed reload leaves the
//! previous rule set active and returns the error.
//!
//! # Concurrency
//!
//! Each source id owns a slot with its own reload lock, held across
//! fetch, parse and swap. Callers that queue behind an in-flight load reuse
//! its outcome, success or error, instead of fetching again. The active rule set is an
//! `Arc<RuleSet>` swapped under a short write lock, so readers always see
//! either the old or the new set, never a mix.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::StoreConfig;
use crate::error::{Error, Result};
use crate::parser::ast::RuleSet;
use crate::parser::parse_source;
use crate::verifier;

pub use crate::parser::content_hash;

/// Default cache capacity
pub const DEFAULT_MAX_ENTRIES: usize = 64;

// ── Sources ───────────────────────────────────────────────

/// Where raw rule text comes from
pub trait RuleSource: Send + Sync {
    /// Fetch the full rule text for `source_id`
    ///
    /// # Errors
    /// `Error::NotFound` when the source cannot be read.
    fn fetch(&self, source_id: &str) -> Result<String>;
}

/// Rule files on the local filesystem
///
/// Source ids are paths. Relative ids are resolved against `root` when one
/// is set, and ids without an extension get the default one.
#[derive(Debug, Clone)]
pub struct FsSource {
    root: Option<PathBuf>,
    extension: String,
}

impl Default for FsSource {
    fn default() -> Self {
        Self::new()
    }
}

impl FsSource {
    /// Source ids are used as paths, relative to the working directory
    pub fn new() -> Self {
        FsSource {
            root: None,
            extension: "rules".to_string(),
        }
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        FsSource {
            root: Some(root.into()),
            ..Self::new()
        }
    }

    pub fn from_config(config: &StoreConfig) -> Self {
        Self::with_root(config.rules_dir.clone()).with_extension(config.extension.clone())
    }

    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into().trim_start_matches('.').to_string();
        self
    }

    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    /// Path a source id refers to
    pub fn resolve(&self, source_id: &str) -> PathBuf {
        let mut path = PathBuf::from(source_id);
        if path.extension().is_none() && !self.extension.is_empty() {
            path.set_extension(&self.extension);
        }
        match &self.root {
            Some(root) if path.is_relative() => root.join(path),
            _ => path,
        }
    }

    /// Source ids of every rule file in the root directory, sorted
    pub fn list(&self) -> Result<Vec<String>> {
        let dir = self.root.clone().unwrap_or_else(|| PathBuf::from("."));
        let entries = std::fs::read_dir(&dir)
            .map_err(|e| Error::not_found(&dir.display().to_string(), e.to_string()))?;

        let mut ids: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.is_file()
                    && path.extension().and_then(|e| e.to_str()) == Some(self.extension.as_str())
            })
            .filter_map(|path| path.file_stem().and_then(|s| s.to_str()).map(String::from))
            .collect();
        ids.sort();
        Ok(ids)
    }
}

impl RuleSource for FsSource {
    fn fetch(&self, source_id: &str) -> Result<String> {
        let path = self.resolve(source_id);
        std::fs::read_to_string(&path)
            .map_err(|e| Error::not_found(source_id, format!("{}: {}", path.display(), e)))
    }
}

/// Rule text held in memory, for hosts that embed their rules and for tests
#[derive(Debug, Default)]
pub struct MemorySource {
    entries: RwLock<HashMap<String, String>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the text for `source_id`
    pub fn insert(&self, source_id: impl Into<String>, text: impl Into<String>) {
        self.entries.write().insert(source_id.into(), text.into());
    }

    pub fn remove(&self, source_id: &str) -> Option<String> {
        self.entries.write().remove(source_id)
    }
}

impl RuleSource for MemorySource {
    fn fetch(&self, source_id: &str) -> Result<String> {
        self.entries
            .read()
            .get(source_id)
            .cloned()
            .ok_or_else(|| Error::not_found(source_id, "no such in-memory source"))
    }
}

// ── Store ─────────────────────────────────────────────────

/// Cache counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    /// Source ids with an active rule set
    pub entries: usize,
    /// Loads answered from cache without parsing
    pub hits: u64,
    /// Parser invocations
    pub parses: u64,
    /// Reloads that failed while a previous rule set stayed active
    pub reload_failures: u64,
}

#[derive(Default)]
struct Slot {
    active: RwLock<Option<Arc<RuleSet>>>,
    /// Held across fetch + parse + swap; keeps the latest outcome
    reload: Mutex<Option<Result<Arc<RuleSet>>>>,
    /// Bumped after every finished load attempt, failed or not
    attempts: AtomicU64,
    accesses: AtomicU64,
}

impl Slot {
    fn current(&self) -> Option<Arc<RuleSet>> {
        self.active.read().clone()
    }

    fn is_loading(&self) -> bool {
        self.reload.try_lock().is_none()
    }
}

/// Parsed rule sets keyed by source id
pub struct RuleStore<S: RuleSource> {
    source: S,
    slots: RwLock<HashMap<String, Arc<Slot>>>,
    max_entries: usize,
    hits: AtomicU64,
    parses: AtomicU64,
    reload_failures: AtomicU64,
}

impl<S: RuleSource> RuleStore<S> {
    pub fn new(source: S) -> Self {
        RuleStore {
            source,
            slots: RwLock::new(HashMap::new()),
            max_entries: DEFAULT_MAX_ENTRIES,
            hits: AtomicU64::new(0),
            parses: AtomicU64::new(0),
            reload_failures: AtomicU64::new(0),
        }
    }

    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries.max(1);
        self
    }

    pub fn from_config(source: S, config: &StoreConfig) -> Self {
        Self::new(source).with_max_entries(config.max_entries)
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Load the rule set for `source_id`, parsing only when its text changed
    ///
    /// # Errors
    /// `Error::NotFound` if the source cannot be fetched, `Error::Parse` if
    /// the text is malformed. In both cases a previously loaded rule set
    /// stays available through `current`.
    pub fn load(&self, source_id: &str) -> Result<Arc<RuleSet>> {
        let slot = self.slot(source_id);
        slot.accesses.fetch_add(1, Ordering::Relaxed);

        let seen = slot.attempts.load(Ordering::Acquire);
        let mut last = slot.reload.lock();

        // Another caller finished an attempt while we were waiting: share
        // its outcome, error included.
        if slot.attempts.load(Ordering::Acquire) != seen {
            if let Some(outcome) = last.as_ref() {
                if outcome.is_ok() {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                }
                return outcome.clone();
            }
        }

        let outcome = self.fetch_and_parse(source_id, &slot);
        *last = Some(outcome.clone());
        slot.attempts.fetch_add(1, Ordering::Release);
        outcome
    }

    /// One load attempt; the caller holds the slot's reload lock
    fn fetch_and_parse(&self, source_id: &str, slot: &Slot) -> Result<Arc<RuleSet>> {
        let previous = slot.current();

        let raw = match self.source.fetch(source_id) {
            Ok(raw) => raw,
            Err(e) => {
                if previous.is_some() {
                    self.reload_failures.fetch_add(1, Ordering::Relaxed);
                    warn!(source = source_id, error = %e, "reload failed, keeping previous rule set");
                }
                return Err(e);
            }
        };

        let hash = content_hash(&raw);
        if let Some(active) = previous.as_ref().filter(|a| a.content_hash() == hash) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            debug!(source = source_id, hash = %hash, "rule set unchanged");
            return Ok(Arc::clone(active));
        }

        self.parses.fetch_add(1, Ordering::Relaxed);
        let rules = match parse_source(source_id, &raw) {
            Ok(rules) => rules,
            Err(e) => {
                if previous.is_some() {
                    self.reload_failures.fetch_add(1, Ordering::Relaxed);
                    warn!(source = source_id, error = %e, "reload failed, keeping previous rule set");
                } else {
                    debug!(source = source_id, error = %e, "rule set failed to parse");
                }
                return Err(e.into());
            }
        };

        let report = verifier::validate(&rules);
        for error in &report.errors {
            warn!(source = source_id, "{}", error);
        }

        let rules = Arc::new(rules);
        *slot.active.write() = Some(Arc::clone(&rules));

        match previous {
            Some(old) => info!(
                source = source_id,
                old_hash = old.content_hash(),
                new_hash = rules.content_hash(),
                "rule set reloaded"
            ),
            None => debug!(source = source_id, hash = rules.content_hash(), "rule set loaded"),
        }

        Ok(rules)
    }

    /// Active rule set, without fetching
    pub fn current(&self, source_id: &str) -> Option<Arc<RuleSet>> {
        self.slots.read().get(source_id)?.current()
    }

    /// Content hash of the active rule set, if one is loaded
    pub fn rules_hash(&self, source_id: &str) -> Option<String> {
        self.current(source_id)
            .map(|rules| rules.content_hash().to_string())
    }

    /// Drop the cached entry; returns whether a rule set was active
    pub fn invalidate(&self, source_id: &str) -> bool {
        let removed = self.slots.write().remove(source_id);
        removed.map_or(false, |slot| slot.current().is_some())
    }

    /// Drop every cached entry; returns how many rule sets were active
    pub fn clear(&self) -> usize {
        let mut slots = self.slots.write();
        let active = slots.values().filter(|s| s.current().is_some()).count();
        slots.clear();
        active
    }

    pub fn stats(&self) -> StoreStats {
        let entries = self
            .slots
            .read()
            .values()
            .filter(|s| s.current().is_some())
            .count();
        StoreStats {
            entries,
            hits: self.hits.load(Ordering::Relaxed),
            parses: self.parses.load(Ordering::Relaxed),
            reload_failures: self.reload_failures.load(Ordering::Relaxed),
        }
    }

    fn slot(&self, source_id: &str) -> Arc<Slot> {
        if let Some(slot) = self.slots.read().get(source_id) {
            return Arc::clone(slot);
        }

        let mut slots = self.slots.write();
        if let Some(slot) = slots.get(source_id) {
            return Arc::clone(slot);
        }

        if slots.len() >= self.max_entries {
            // Never a slot with a load in flight; then empty slots, then
            // the least accessed
            let victim = slots
                .iter()
                .filter(|(_, s)| !s.is_loading())
                .min_by_key(|(_, s)| (s.current().is_some(), s.accesses.load(Ordering::Relaxed)))
                .map(|(id, _)| id.clone());
            if let Some(id) = victim {
                slots.remove(&id);
                debug!(source = %id, "evicted rule set");
            }
        }

        let slot = Arc::new(Slot::default());
        slots.insert(source_id.to_string(), Arc::clone(&slot));
        slot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use proptest::prelude::*;

    const GOOD: &str = "DOMÍNIO: Licenças\nFATOS CONHECIDOS:\nA licença MIT tem criticidade BAIXO.\n";
    const GOOD_V2: &str = "DOMÍNIO: Licenças\nFATOS CONHECIDOS:\nA licença MIT tem criticidade BAIXO.\nA licença AGPL-3.0 tem criticidade ALTO.\n";
    const MISSING_DOMAIN: &str = "FATOS CONHECIDOS:\nA licença MIT tem criticidade BAIXO.\n";

    fn memory_store() -> RuleStore<MemorySource> {
        let source = MemorySource::new();
        source.insert("x", GOOD);
        RuleStore::new(source)
    }

    // ── Caching ───────────────────────────────────────────

    #[test]
    fn test_unchanged_source_parsed_once() {
        let store = memory_store();
        let first = store.load("x").unwrap();
        let second = store.load("x").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(store.stats().parses, 1);
        assert_eq!(store.stats().hits, 1);
    }

    #[test]
    fn test_changed_source_reparsed_and_hash_changes() {
        let store = memory_store();
        store.load("x").unwrap();
        store.load("x").unwrap();
        let old_hash = store.rules_hash("x").unwrap();

        store.source().insert("x", GOOD_V2);
        let reloaded = store.load("x").unwrap();

        assert_eq!(store.stats().parses, 2);
        assert_eq!(reloaded.facts().len(), 2);
        let new_hash = store.rules_hash("x").unwrap();
        assert_ne!(old_hash, new_hash);
        assert_eq!(new_hash, content_hash(GOOD_V2));
    }

    #[test]
    fn test_failed_reload_keeps_previous_rule_set() {
        let store = memory_store();
        let good = store.load("x").unwrap();

        store.source().insert("x", MISSING_DOMAIN);
        match store.load("x") {
            Err(Error::Parse(e)) => assert_eq!(e.line, 1),
            other => panic!("expected parse error, got {:?}", other.map(|r| r.content_hash().to_string())),
        }

        let active = store.current("x").unwrap();
        assert!(Arc::ptr_eq(&good, &active));
        assert_eq!(store.rules_hash("x").unwrap(), content_hash(GOOD));
        assert_eq!(store.stats().reload_failures, 1);
    }

    #[test]
    fn test_first_load_parse_error_caches_nothing() {
        let source = MemorySource::new();
        source.insert("bad", MISSING_DOMAIN);
        let store = RuleStore::new(source);
        assert!(matches!(store.load("bad"), Err(Error::Parse(_))));
        assert!(store.current("bad").is_none());
        assert!(store.rules_hash("bad").is_none());
        assert_eq!(store.stats().entries, 0);
        assert_eq!(store.stats().reload_failures, 0);
    }

    #[test]
    fn test_missing_source_is_not_found() {
        let store = memory_store();
        match store.load("ausente") {
            Err(Error::NotFound { source_id, .. }) => assert_eq!(source_id, "ausente"),
            other => panic!("expected NotFound, got {:?}", other.is_ok()),
        }
    }

    #[test]
    fn test_removed_source_keeps_cached_set() {
        let store = memory_store();
        store.load("x").unwrap();
        store.source().remove("x");
        assert!(matches!(store.load("x"), Err(Error::NotFound { .. })));
        assert!(store.current("x").is_some());
        assert_eq!(store.stats().reload_failures, 1);
    }

    #[test]
    fn test_invalidate_and_clear() {
        let store = memory_store();
        store.source().insert("y", GOOD_V2);
        store.load("x").unwrap();
        store.load("y").unwrap();

        assert!(store.invalidate("x"));
        assert!(!store.invalidate("x"));
        assert!(store.current("x").is_none());

        store.load("x").unwrap();
        assert_eq!(store.stats().parses, 3);
        assert_eq!(store.clear(), 2);
        assert_eq!(store.stats().entries, 0);
    }

    #[test]
    fn test_eviction_respects_max_entries() {
        let source = MemorySource::new();
        for id in ["a", "b", "c"] {
            source.insert(id, GOOD);
        }
        let store = RuleStore::new(source).with_max_entries(2);

        store.load("a").unwrap();
        store.load("a").unwrap();
        store.load("b").unwrap();
        store.load("c").unwrap();

        assert_eq!(store.stats().entries, 2);
        assert!(store.current("a").is_some(), "most used entry survives");
        assert!(store.current("b").is_none(), "least used entry evicted");
        assert!(store.current("c").is_some());
    }

    // ── Concurrency ───────────────────────────────────────

    struct SlowSource {
        inner: MemorySource,
        fetches: AtomicUsize,
    }

    impl RuleSource for SlowSource {
        fn fetch(&self, source_id: &str) -> Result<String> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(20));
            self.inner.fetch(source_id)
        }
    }

    #[test]
    fn test_concurrent_first_load_parses_once() {
        let inner = MemorySource::new();
        inner.insert("x", GOOD);
        let store = RuleStore::new(SlowSource {
            inner,
            fetches: AtomicUsize::new(0),
        });

        let loaded: Vec<Arc<RuleSet>> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8).map(|_| scope.spawn(|| store.load("x").unwrap())).collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(store.stats().parses, 1);
        assert!(loaded.iter().all(|r| Arc::ptr_eq(r, &loaded[0])));
    }

    #[test]
    fn test_concurrent_failing_load_parses_once() {
        let inner = MemorySource::new();
        inner.insert("x", MISSING_DOMAIN);
        let store = RuleStore::new(SlowSource {
            inner,
            fetches: AtomicUsize::new(0),
        });

        let outcomes: Vec<Result<Arc<RuleSet>>> = std::thread::scope(|scope| {
            // Hold the reload lock so every thread queues behind one attempt
            let slot = store.slot("x");
            let guard = slot.reload.lock();
            let handles: Vec<_> = (0..8).map(|_| scope.spawn(|| store.load("x"))).collect();
            std::thread::sleep(Duration::from_millis(100));
            drop(guard);
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(store.stats().parses, 1);
        assert_eq!(store.source().fetches.load(Ordering::SeqCst), 1);
        for outcome in outcomes {
            match outcome {
                Err(Error::Parse(e)) => assert_eq!(e.line, 1),
                other => panic!("expected parse error, got ok={}", other.is_ok()),
            }
        }
    }

    #[test]
    fn test_failed_load_is_retried_by_later_caller() {
        let source = MemorySource::new();
        source.insert("x", MISSING_DOMAIN);
        let store = RuleStore::new(source);

        assert!(store.load("x").is_err());
        store.source().insert("x", GOOD);
        assert!(store.load("x").is_ok());
        assert_eq!(store.stats().parses, 2);
    }

    #[test]
    fn test_eviction_skips_slot_with_load_in_flight() {
        let source = MemorySource::new();
        source.insert("x", GOOD);
        source.insert("y", GOOD_V2);
        let store = RuleStore::new(source).with_max_entries(1);

        let in_flight = store.slot("x");
        let guard = in_flight.reload.lock();
        store.load("y").unwrap();
        drop(guard);

        assert!(Arc::ptr_eq(&store.slot("x"), &in_flight));
    }

    #[test]
    fn test_store_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<RuleStore<FsSource>>();
        assert_send_sync::<RuleStore<MemorySource>>();
    }

    // ── Filesystem ────────────────────────────────────────

    #[test]
    fn test_fs_source_resolves_extension_and_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("licencas.rules"), GOOD).unwrap();
        std::fs::write(dir.path().join("notas.txt"), "ignorado").unwrap();

        let source = FsSource::with_root(dir.path());
        assert_eq!(source.resolve("licencas"), dir.path().join("licencas.rules"));
        assert_eq!(source.fetch("licencas").unwrap(), GOOD);
        assert_eq!(source.fetch("licencas.rules").unwrap(), GOOD);
        assert_eq!(source.list().unwrap(), vec!["licencas".to_string()]);
        assert!(matches!(source.fetch("outro"), Err(Error::NotFound { .. })));
    }

    #[test]
    fn test_fs_store_detects_file_edit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("licencas.rules");
        std::fs::write(&path, GOOD).unwrap();

        let store = RuleStore::new(FsSource::with_root(dir.path()));
        let first = store.rules_hash("licencas");
        assert!(first.is_none());
        store.load("licencas").unwrap();
        std::fs::write(&path, GOOD_V2).unwrap();
        store.load("licencas").unwrap();
        assert_eq!(store.rules_hash("licencas").unwrap(), content_hash(GOOD_V2));
    }

    // ── Hash properties ───────────────────────────────────

    #[test]
    fn test_content_hash_deterministic() {
        assert_eq!(content_hash(GOOD), content_hash(GOOD));
        assert_ne!(content_hash(GOOD), content_hash(GOOD_V2));
    }

    proptest! {
        #[test]
        fn prop_single_char_edit_changes_hash(
            text in "[ -~À-ÿ\n]{1,200}",
            index in any::<prop::sample::Index>(),
            replacement in any::<char>(),
        ) {
            let chars: Vec<char> = text.chars().collect();
            let at = index.index(chars.len());
            prop_assume!(chars[at] != replacement);

            let mut edited = chars.clone();
            edited[at] = replacement;
            let edited: String = edited.into_iter().collect();

            prop_assert_eq!(content_hash(&text), content_hash(&text));
            prop_assert_ne!(content_hash(&text), content_hash(&edited));
        }
    }
}
