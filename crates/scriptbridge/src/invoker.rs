use crate::config::BridgeConfig;
use crate::discovery::EngineManager;
use crate::error::{EngineError, Result, ScriptError};
use crate::registry::{EngineHandle, EngineRegistry};
use crate::value::{Bindings, ScriptValue};
use std::fmt;
use std::io::Read;
use std::sync::Arc;

/// Where script source comes from. Consumed once per evaluation.
pub enum ScriptSource<'a> {
    Text(&'a str),
    Reader(&'a mut dyn Read),
}

impl ScriptSource<'_> {
    fn into_text(self, language: &str) -> Result<String> {
        let text = match self {
            Self::Text(text) => text.to_string(),
            Self::Reader(reader) => {
                let mut text = String::new();
                reader
                    .read_to_string(&mut text)
                    .map_err(|source| ScriptError::SourceRead {
                        language: language.to_string(),
                        source,
                    })?;
                text
            }
        };
        match text.strip_prefix('\u{FEFF}') {
            Some(stripped) => Ok(stripped.to_string()),
            None => Ok(text),
        }
    }
}

impl fmt::Debug for ScriptSource<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(text) => f.debug_tuple("Text").field(&text.len()).finish(),
            Self::Reader(_) => f.write_str("Reader"),
        }
    }
}

/// Evaluates script source and calls a function it defines.
///
/// Every call runs the same protocol: resolve the engine for the language,
/// read the source, evaluate it (in a fresh context when bindings are
/// supplied, in the engine's global context otherwise), check that the engine
/// can invoke functions, then call `function` with `args`. The engine stays
/// locked for the whole sequence.
///
/// Source is evaluated again on every call, even when the text is identical
/// to an earlier call. Without bindings that re-runs top-level statements in
/// the engine's persistent global context. Top-level state is reset each
/// time, and in JavaScript a top-level `const`, `let` or `class` makes every
/// call after the first fail with [`ErrorKind::EvaluationError`]
/// (`SyntaxError: redeclaration of ...`). Such scripts should use `var` or
/// go through a bindings variant, which evaluates in a fresh context.
///
/// [`ErrorKind::EvaluationError`]: crate::ErrorKind::EvaluationError
#[derive(Clone, Debug)]
pub struct ScriptInvoker {
    registry: Arc<EngineRegistry>,
}

impl ScriptInvoker {
    pub fn new(registry: Arc<EngineRegistry>) -> Self {
        Self { registry }
    }

    /// Invoker over a fresh registry holding every compiled-in engine.
    pub fn with_builtin_engines() -> Self {
        Self::new(Arc::new(EngineRegistry::new(Arc::new(
            EngineManager::with_builtin_engines(),
        ))))
    }

    /// Invoker over a fresh registry configured by `config`.
    pub fn from_config(config: &BridgeConfig) -> Result<Self> {
        let manager = EngineManager::from_config(config)?;
        Ok(Self::new(Arc::new(EngineRegistry::new(Arc::new(manager)))))
    }

    pub fn registry(&self) -> &Arc<EngineRegistry> {
        &self.registry
    }

    pub fn get_engine(&self, language: &str) -> Option<EngineHandle> {
        self.registry.get_engine(language)
    }

    /// Evaluate `source` globally and call `function(args...)`.
    pub fn invoke(
        &self,
        language: &str,
        source: &str,
        function: &str,
        args: &[ScriptValue],
    ) -> Result<ScriptValue> {
        self.invoke_source(language, ScriptSource::Text(source), function, None, args)
    }

    /// Evaluate `source` with `bindings` and call `function(args...)`.
    pub fn invoke_with_bindings(
        &self,
        language: &str,
        bindings: &Bindings,
        source: &str,
        function: &str,
        args: &[ScriptValue],
    ) -> Result<ScriptValue> {
        self.invoke_source(
            language,
            ScriptSource::Text(source),
            function,
            Some(bindings),
            args,
        )
    }

    /// Read the script from `reader`, evaluate it with `bindings` and call
    /// `function()` without arguments.
    pub fn invoke_reader_with_bindings<R: Read>(
        &self,
        language: &str,
        mut reader: R,
        function: &str,
        bindings: &Bindings,
    ) -> Result<ScriptValue> {
        self.invoke_source(
            language,
            ScriptSource::Reader(&mut reader),
            function,
            Some(bindings),
            &[],
        )
    }

    /// Read the script from `reader`, evaluate it globally and call
    /// `function(args...)`.
    pub fn invoke_reader<R: Read>(
        &self,
        language: &str,
        mut reader: R,
        function: &str,
        args: &[ScriptValue],
    ) -> Result<ScriptValue> {
        self.invoke_source(
            language,
            ScriptSource::Reader(&mut reader),
            function,
            None,
            args,
        )
    }

    /// Read the script from `reader`, evaluate it with `bindings` and call
    /// `function(args...)`.
    pub fn invoke_reader_with_bindings_and_args<R: Read>(
        &self,
        language: &str,
        bindings: &Bindings,
        mut reader: R,
        function: &str,
        args: &[ScriptValue],
    ) -> Result<ScriptValue> {
        self.invoke_source(
            language,
            ScriptSource::Reader(&mut reader),
            function,
            Some(bindings),
            args,
        )
    }

    /// The shared protocol behind every `invoke*` variant.
    pub fn invoke_source(
        &self,
        language: &str,
        source: ScriptSource<'_>,
        function: &str,
        bindings: Option<&Bindings>,
        args: &[ScriptValue],
    ) -> Result<ScriptValue> {
        let span = tracing::debug_span!("invoke", language, function);
        let _guard = span.enter();

        let handle =
            self.registry
                .get_engine(language)
                .ok_or_else(|| ScriptError::EngineNotFound {
                    language: language.to_string(),
                })?;
        let source = source.into_text(language)?;

        if let Some(bindings) = bindings {
            for (name, value) in bindings {
                value
                    .ensure_portable(&format!("bindings.{name}"))
                    .map_err(|msg| ScriptError::evaluation(language, EngineError::Conversion(msg)))?;
            }
        }

        let mut engine = handle.lock();
        tracing::trace!(
            engine = handle.engine_name(),
            source_len = source.len(),
            bindings = bindings.map_or(0, |b| b.len()),
            args = args.len(),
            "evaluating script"
        );
        match bindings {
            Some(bindings) => engine.eval_with_bindings(&source, bindings),
            None => engine.eval(&source),
        }
        .map_err(|err| ScriptError::evaluation(language, err))?;

        let invocable = engine
            .as_invocable()
            .ok_or_else(|| ScriptError::NotInvocable {
                language: language.to_string(),
                engine: handle.engine_name().to_string(),
            })?;

        for (idx, arg) in args.iter().enumerate() {
            arg.ensure_portable(&format!("args[{idx}]"))
                .map_err(|msg| ScriptError::invocation(language, function, msg))?;
        }

        invocable
            .invoke_function(function, args)
            .map_err(|err| ScriptError::from_invocation(language, function, err))
    }
}
