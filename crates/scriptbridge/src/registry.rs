//! Per-language engine cache.
//!
//! Maps a language id to a lazily created engine. Each entry owns its engine
//! behind a mutex so that an evaluate + invoke pair never interleaves with
//! another caller on the same interpreter state. Lookups for different
//! languages proceed in parallel.

use crate::ScriptEngine;
use crate::discovery::EngineDiscovery;
use parking_lot::{Mutex, MutexGuard, RwLock};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Shared reference to a cached engine.
///
/// Clones refer to the same engine. The engine itself is only reachable
/// through [`ScriptInvoker`](crate::ScriptInvoker).
#[derive(Clone)]
pub struct EngineHandle {
    language: Arc<str>,
    engine_name: Arc<str>,
    engine: Arc<Mutex<Box<dyn ScriptEngine>>>,
}

impl EngineHandle {
    fn new(language: &str, engine: Box<dyn ScriptEngine>) -> Self {
        Self {
            language: Arc::from(language),
            engine_name: Arc::from(engine.engine_name()),
            engine: Arc::new(Mutex::new(engine)),
        }
    }

    /// Language id this engine was resolved for.
    pub fn language(&self) -> &str {
        &self.language
    }

    pub fn engine_name(&self) -> &str {
        &self.engine_name
    }

    /// True when both handles refer to the same engine instance.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.engine, &other.engine)
    }

    /// Exclusive access for one evaluate + invoke sequence.
    pub(crate) fn lock(&self) -> MutexGuard<'_, Box<dyn ScriptEngine>> {
        self.engine.lock()
    }
}

impl fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineHandle")
            .field("language", &self.language)
            .field("engine_name", &self.engine_name)
            .finish_non_exhaustive()
    }
}

/// Process-scoped cache from language id to engine.
///
/// Create one per process and share it via `Arc`. Unknown languages are
/// cached too, so discovery runs at most once per distinct id.
pub struct EngineRegistry {
    discovery: Arc<dyn EngineDiscovery>,
    entries: RwLock<HashMap<String, Option<EngineHandle>>>,
}

impl EngineRegistry {
    pub fn new(discovery: Arc<dyn EngineDiscovery>) -> Self {
        Self {
            discovery,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Return the engine for `language`, creating it on first use.
    ///
    /// `None` means no engine answers to `language`; that outcome is cached.
    pub fn get_engine(&self, language: &str) -> Option<EngineHandle> {
        if let Some(entry) = self.entries.read().get(language) {
            return entry.clone();
        }

        let mut entries = self.entries.write();
        // Another caller may have published while we waited for the write lock.
        if let Some(entry) = entries.get(language) {
            return entry.clone();
        }

        let entry = self
            .discovery
            .discover(language)
            .map(|engine| EngineHandle::new(language, engine));
        tracing::debug!(
            language,
            found = entry.is_some(),
            engine = entry.as_ref().map(EngineHandle::engine_name),
            "cached script engine lookup"
        );
        entries.insert(language.to_string(), entry.clone());
        entry
    }

    /// True once `language` has been looked up, whether or not it resolved.
    pub fn is_cached(&self, language: &str) -> bool {
        self.entries.read().contains_key(language)
    }

    /// Language ids looked up so far, sorted.
    pub fn cached_languages(&self) -> Vec<String> {
        let mut languages = self.entries.read().keys().cloned().collect::<Vec<_>>();
        languages.sort();
        languages
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl fmt::Debug for EngineRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineRegistry")
            .field("languages", &self.cached_languages())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineResult;
    use crate::value::Bindings;
    use std::sync::Barrier;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    struct CountingEngine;

    impl ScriptEngine for CountingEngine {
        fn engine_name(&self) -> &str {
            "counting"
        }

        fn eval(&mut self, _source: &str) -> EngineResult<()> {
            Ok(())
        }

        fn eval_with_bindings(&mut self, _source: &str, _bindings: &Bindings) -> EngineResult<()> {
            Ok(())
        }
    }

    fn counting_registry(known: &'static [&'static str]) -> (EngineRegistry, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let discovery = move |language: &str| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            known
                .iter()
                .any(|name| *name == language)
                .then(|| Box::new(CountingEngine) as Box<dyn ScriptEngine>)
        };
        (EngineRegistry::new(Arc::new(discovery)), calls)
    }

    // ── cache behavior ───────────────────────────────────────

    #[test]
    fn repeated_lookup_returns_same_instance() {
        let (registry, calls) = counting_registry(&["toy"]);
        let first = registry.get_engine("toy").unwrap();
        let second = registry.get_engine("toy").unwrap();
        assert!(first.ptr_eq(&second));
        assert_eq!(first.language(), "toy");
        assert_eq!(first.engine_name(), "counting");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unknown_language_is_cached_negatively() {
        let (registry, calls) = counting_registry(&["toy"]);
        assert!(registry.get_engine("cobol").is_none());
        assert!(registry.get_engine("cobol").is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(registry.is_cached("cobol"));
    }

    #[test]
    fn distinct_ids_get_distinct_instances() {
        let (registry, _) = counting_registry(&["a", "b"]);
        let a = registry.get_engine("a").unwrap();
        let b = registry.get_engine("b").unwrap();
        assert!(!a.ptr_eq(&b));
        assert_eq!(registry.cached_languages(), vec!["a", "b"]);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn new_registry_is_empty() {
        let (registry, calls) = counting_registry(&[]);
        assert!(registry.is_empty());
        assert!(!registry.is_cached("toy"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    // ── concurrency ──────────────────────────────────────────

    #[test]
    fn concurrent_first_access_discovers_once() {
        let (registry, calls) = counting_registry(&["toy"]);
        let registry = Arc::new(registry);
        let barrier = Arc::new(Barrier::new(16));

        let handles = (0..16)
            .map(|_| {
                let registry = registry.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    registry.get_engine("toy").unwrap()
                })
            })
            .collect::<Vec<_>>();

        let engines = handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .collect::<Vec<_>>();
        assert!(engines.iter().all(|engine| engine.ptr_eq(&engines[0])));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn concurrent_mixed_languages_keep_map_consistent() {
        let (registry, calls) = counting_registry(&["a", "b", "c"]);
        let registry = Arc::new(registry);

        let handles = (0..24)
            .map(|idx| {
                let registry = registry.clone();
                thread::spawn(move || {
                    let language = ["a", "b", "c", "missing"][idx % 4];
                    registry.get_engine(language)
                })
            })
            .collect::<Vec<_>>();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(registry.cached_languages(), vec!["a", "b", "c", "missing"]);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        let a1 = registry.get_engine("a").unwrap();
        let a2 = registry.get_engine("a").unwrap();
        assert!(a1.ptr_eq(&a2));
    }
}
