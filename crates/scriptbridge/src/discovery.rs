use crate::ScriptEngine;
use crate::config::BridgeConfig;
use crate::error::{EngineResult, Result, ScriptError};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Looks up a script engine registered under a name.
///
/// Called by [`EngineRegistry`](crate::EngineRegistry) on a cache miss. A
/// `None` result means no engine answers to `language`.
pub trait EngineDiscovery: Send + Sync + 'static {
    fn discover(&self, language: &str) -> Option<Box<dyn ScriptEngine>>;
}

impl<F> EngineDiscovery for F
where
    F: Fn(&str) -> Option<Box<dyn ScriptEngine>> + Send + Sync + 'static,
{
    fn discover(&self, language: &str) -> Option<Box<dyn ScriptEngine>> {
        self(language)
    }
}

/// Creates engines of one kind and advertises the names it answers to.
pub trait EngineFactory: Send + Sync + 'static {
    /// Runtime name of the engines this factory creates.
    fn engine_name(&self) -> &str;

    /// Language ids this factory answers to, matched exactly.
    fn names(&self) -> Vec<String>;

    fn create(&self) -> EngineResult<Box<dyn ScriptEngine>>;
}

type CreateFn = dyn Fn() -> EngineResult<Box<dyn ScriptEngine>> + Send + Sync + 'static;

/// Closure-backed [`EngineFactory`] for host-provided engines.
#[derive(Clone)]
pub struct FnFactory {
    engine_name: String,
    names: Vec<String>,
    create: Arc<CreateFn>,
}

impl FnFactory {
    pub fn new<F>(engine_name: &str, names: &[&str], create: F) -> Self
    where
        F: Fn() -> EngineResult<Box<dyn ScriptEngine>> + Send + Sync + 'static,
    {
        Self {
            engine_name: engine_name.to_string(),
            names: names.iter().map(|name| (*name).to_string()).collect(),
            create: Arc::new(create),
        }
    }
}

impl fmt::Debug for FnFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnFactory")
            .field("engine_name", &self.engine_name)
            .field("names", &self.names)
            .finish_non_exhaustive()
    }
}

impl EngineFactory for FnFactory {
    fn engine_name(&self) -> &str {
        &self.engine_name
    }

    fn names(&self) -> Vec<String> {
        self.names.clone()
    }

    fn create(&self) -> EngineResult<Box<dyn ScriptEngine>> {
        (self.create)()
    }
}

/// Name-based engine lookup over an ordered list of factories.
///
/// The first registered factory answering to a name wins. Aliases map an
/// extra name onto one a factory already answers to.
#[derive(Default)]
pub struct EngineManager {
    factories: Vec<Arc<dyn EngineFactory>>,
    aliases: HashMap<String, String>,
}

impl EngineManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Manager with every engine compiled into this build.
    pub fn with_builtin_engines() -> Self {
        let mut manager = Self::new();
        for name in BUILTIN_ENGINES {
            if let Some(factory) = builtin_factory(name) {
                manager.register_arc(factory);
            }
        }
        manager
    }

    /// Manager with the engines and aliases named by `config`.
    pub fn from_config(config: &BridgeConfig) -> Result<Self> {
        let mut manager = Self::new();
        for name in &config.engines.enabled {
            if !BUILTIN_ENGINES.contains(&name.as_str()) {
                return Err(ScriptError::Config(format!(
                    "unknown built-in engine `{name}` (expected one of {})",
                    BUILTIN_ENGINES.join(", ")
                )));
            }
            let factory = builtin_factory(name).ok_or_else(|| {
                ScriptError::Config(format!(
                    "engine `{name}` is not compiled in; enable the `{name}` cargo feature"
                ))
            })?;
            manager.register_arc(factory);
        }

        let mut aliases = config.aliases.iter().collect::<Vec<_>>();
        aliases.sort();
        for (alias, target) in aliases {
            manager.alias(alias, target)?;
        }
        Ok(manager)
    }

    pub fn register(&mut self, factory: impl EngineFactory) -> &mut Self {
        self.register_arc(Arc::new(factory))
    }

    pub fn register_arc(&mut self, factory: Arc<dyn EngineFactory>) -> &mut Self {
        tracing::debug!(
            engine = factory.engine_name(),
            names = ?factory.names(),
            "registered script engine factory"
        );
        self.factories.push(factory);
        self
    }

    /// Make `alias` resolve to whatever factory answers to `target`.
    pub fn alias(&mut self, alias: &str, target: &str) -> Result<&mut Self> {
        if self.factory_for(target).is_none() {
            return Err(ScriptError::Config(format!(
                "alias `{alias}` points at `{target}`, which no registered engine answers to"
            )));
        }
        self.aliases.insert(alias.to_string(), target.to_string());
        Ok(self)
    }

    /// Every name this manager answers to, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names = self
            .factories
            .iter()
            .flat_map(|factory| factory.names())
            .chain(self.aliases.keys().cloned())
            .collect::<Vec<_>>();
        names.sort();
        names.dedup();
        names
    }

    fn factory_for(&self, name: &str) -> Option<&Arc<dyn EngineFactory>> {
        self.factories
            .iter()
            .find(|factory| factory.names().iter().any(|candidate| candidate == name))
    }

    fn resolve(&self, language: &str) -> Option<&Arc<dyn EngineFactory>> {
        self.factory_for(language).or_else(|| {
            self.aliases
                .get(language)
                .and_then(|target| self.factory_for(target))
        })
    }
}

impl fmt::Debug for EngineManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let engines = self
            .factories
            .iter()
            .map(|factory| factory.engine_name().to_string())
            .collect::<Vec<_>>();
        f.debug_struct("EngineManager")
            .field("engines", &engines)
            .field("aliases", &self.aliases)
            .finish()
    }
}

impl EngineDiscovery for EngineManager {
    /// Create an engine for `language` from the first factory answering to it.
    ///
    /// A factory whose `create` fails is treated as if it were not
    /// registered: the failure is logged at `warn` and `None` is returned.
    /// [`EngineRegistry`](crate::EngineRegistry) caches that miss, so the
    /// language reports `EngineNotFound` for the registry's whole lifetime and
    /// the factory is not retried.
    fn discover(&self, language: &str) -> Option<Box<dyn ScriptEngine>> {
        let factory = self.resolve(language)?;
        match factory.create() {
            Ok(engine) => {
                tracing::debug!(
                    language,
                    engine = engine.engine_name(),
                    "created script engine"
                );
                Some(engine)
            }
            Err(err) => {
                tracing::warn!(
                    language,
                    engine = factory.engine_name(),
                    error = %err,
                    "script engine factory failed"
                );
                None
            }
        }
    }
}

/// Names accepted in `[engines] enabled`.
pub(crate) const BUILTIN_ENGINES: &[&str] = &[crate::LUA, crate::JAVASCRIPT, crate::RHAI];

fn builtin_factory(name: &str) -> Option<Arc<dyn EngineFactory>> {
    match name {
        #[cfg(feature = "lua")]
        crate::LUA => Some(Arc::new(crate::lua_engine::LuaEngineFactory)),
        #[cfg(feature = "javascript")]
        crate::JAVASCRIPT => Some(Arc::new(crate::js_engine::JsEngineFactory)),
        #[cfg(feature = "rhai")]
        crate::RHAI => Some(Arc::new(crate::rhai_engine::RhaiEngineFactory)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use crate::value::Bindings;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct NamedEngine(String);

    impl ScriptEngine for NamedEngine {
        fn engine_name(&self) -> &str {
            &self.0
        }

        fn eval(&mut self, _source: &str) -> EngineResult<()> {
            Ok(())
        }

        fn eval_with_bindings(&mut self, _source: &str, _bindings: &Bindings) -> EngineResult<()> {
            Ok(())
        }
    }

    fn named_factory(engine: &'static str, names: &[&str]) -> FnFactory {
        FnFactory::new(engine, names, move || {
            Ok(Box::new(NamedEngine(engine.to_string())) as Box<dyn ScriptEngine>)
        })
    }

    #[test]
    fn discover_matches_names_exactly() {
        let mut manager = EngineManager::new();
        manager.register(named_factory("toy-1", &["toy", "Toy"]));

        assert_eq!(
            manager.discover("toy").map(|e| e.engine_name().to_string()),
            Some("toy-1".to_string())
        );
        assert!(manager.discover("Toy").is_some());
        assert!(manager.discover("TOY").is_none());
        assert!(manager.discover("").is_none());
    }

    #[test]
    fn first_registered_factory_wins() {
        let mut manager = EngineManager::new();
        manager
            .register(named_factory("first", &["shared"]))
            .register(named_factory("second", &["shared", "other"]));

        let engine = manager.discover("shared").unwrap();
        assert_eq!(engine.engine_name(), "first");
        assert_eq!(manager.discover("other").unwrap().engine_name(), "second");
    }

    #[test]
    fn alias_resolves_to_target_factory() {
        let mut manager = EngineManager::new();
        manager.register(named_factory("toy-1", &["toy"]));
        manager.alias("t", "toy").unwrap();

        assert_eq!(manager.discover("t").unwrap().engine_name(), "toy-1");
        assert_eq!(manager.names(), vec!["t".to_string(), "toy".to_string()]);
    }

    #[test]
    fn alias_to_unknown_target_is_config_error() {
        let mut manager = EngineManager::new();
        let err = manager.alias("t", "nothing").err().unwrap();
        assert_eq!(err.kind(), crate::ErrorKind::Config);
    }

    #[test]
    fn failing_factory_counts_as_not_found() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let mut manager = EngineManager::new();
        manager.register(FnFactory::new("broken", &["broken"], move || {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            Err(EngineError::Script("runtime allocation failed".to_string()))
        }));

        assert!(manager.discover("broken").is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn closures_act_as_discovery() {
        let discovery = |language: &str| {
            (language == "toy").then(|| Box::new(NamedEngine("toy".into())) as Box<dyn ScriptEngine>)
        };
        assert!(discovery.discover("toy").is_some());
        assert!(discovery.discover("lua").is_none());
    }

    #[test]
    fn from_config_rejects_unknown_engine() {
        let config = BridgeConfig::from_toml_str("[engines]\nenabled = [\"cobol\"]\n").unwrap();
        let err = EngineManager::from_config(&config).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Config);
        assert!(err.to_string().contains("cobol"));
    }

    #[test]
    fn from_config_with_no_engines_discovers_nothing() {
        let config = BridgeConfig::from_toml_str("[engines]\nenabled = []\n").unwrap();
        let manager = EngineManager::from_config(&config).unwrap();
        assert!(manager.names().is_empty());
        assert!(manager.discover("lua").is_none());
    }

    #[cfg(all(feature = "lua", feature = "javascript", feature = "rhai"))]
    #[test]
    fn builtin_engines_answer_to_documented_names() {
        let manager = EngineManager::with_builtin_engines();
        for name in ["lua", "javascript", "js", "JavaScript", "ECMAScript", "rhai"] {
            assert!(manager.discover(name).is_some(), "{name}");
        }
    }

    #[cfg(feature = "javascript")]
    #[test]
    fn from_config_applies_aliases() {
        let config = BridgeConfig::from_toml_str(
            "[engines]\nenabled = [\"javascript\"]\n[aliases]\njscript = \"javascript\"\n",
        )
        .unwrap();
        let manager = EngineManager::from_config(&config).unwrap();
        assert!(manager.discover("jscript").is_some());
        assert!(manager.discover("lua").is_none());
    }
}
