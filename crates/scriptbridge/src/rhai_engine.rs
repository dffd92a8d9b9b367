use crate::error::{EngineError, EngineResult};
use crate::value::{Bindings, OpaqueHandle, ScriptValue};
use crate::{EngineFactory, Invocable, ScriptEngine};
use rhai::{AST, CallFnOptions, Dynamic, Engine, Scope};
use std::collections::BTreeMap;

const ENGINE_NAME: &str = "rhai";

const MAX_VALUE_DEPTH: usize = 32;

/// `ScriptEngine` adapter for Rhai.
///
/// Unbound evaluation runs against one long-lived scope and accumulates
/// function definitions across calls. Bound evaluation runs against a fresh
/// scope holding the bindings. Rhai functions never see scope variables, so
/// bindings are only visible to top-level statements.
pub struct RhaiEngine {
    engine: Engine,
    scope: Scope<'static>,
    functions: AST,
    scoped: Option<(Scope<'static>, AST)>,
}

impl RhaiEngine {
    pub fn new() -> Self {
        Self::with_engine(Engine::new())
    }

    /// Wrap a preconfigured engine, e.g. one with host functions registered.
    pub fn with_engine(engine: Engine) -> Self {
        Self {
            engine,
            scope: Scope::new(),
            functions: AST::empty(),
            scoped: None,
        }
    }
}

impl Default for RhaiEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptEngine for RhaiEngine {
    fn engine_name(&self) -> &str {
        ENGINE_NAME
    }

    fn eval(&mut self, source: &str) -> EngineResult<()> {
        self.scoped = None;
        let ast = self
            .engine
            .compile_with_scope(&self.scope, source)
            .map_err(|err| EngineError::Script(err.to_string()))?;
        // Earlier definitions stay callable from the new statements.
        let merged = self.functions.merge(&ast);
        self.engine
            .run_ast_with_scope(&mut self.scope, &merged)
            .map_err(|err| EngineError::Script(err.to_string()))?;
        self.functions = merged.clone_functions_only();
        Ok(())
    }

    fn eval_with_bindings(&mut self, source: &str, bindings: &Bindings) -> EngineResult<()> {
        let mut scope = Scope::new();
        for (name, value) in bindings {
            scope.push_dynamic(name.clone(), to_dynamic(value, &format!("bindings.{name}"))?);
        }
        let ast = self
            .engine
            .compile_with_scope(&scope, source)
            .map_err(|err| EngineError::Script(err.to_string()))?;
        self.engine
            .run_ast_with_scope(&mut scope, &ast)
            .map_err(|err| EngineError::Script(err.to_string()))?;
        self.scoped = Some((scope, ast.clone_functions_only()));
        Ok(())
    }

    fn as_invocable(&mut self) -> Option<&mut dyn Invocable> {
        Some(self as &mut dyn Invocable)
    }
}

impl Invocable for RhaiEngine {
    fn invoke_function(&mut self, name: &str, args: &[ScriptValue]) -> EngineResult<ScriptValue> {
        let (scope, ast) = match &mut self.scoped {
            Some((scope, ast)) => (scope, &*ast),
            None => (&mut self.scope, &self.functions),
        };
        // Rhai overloads by arity, so a call with the wrong argument count has
        // no function to resolve to.
        if !ast
            .iter_functions()
            .any(|f| f.name == name && f.params.len() == args.len())
        {
            return Err(EngineError::MissingFunction);
        }

        let args = args
            .iter()
            .enumerate()
            .map(|(idx, arg)| to_dynamic(arg, &format!("args[{idx}]")))
            .collect::<EngineResult<Vec<_>>>()?;

        let options = CallFnOptions::new().eval_ast(false).rewind_scope(true);
        let result = self
            .engine
            .call_fn_with_options::<Dynamic>(options, scope, ast, name, args)
            .map_err(|err| EngineError::Script(err.to_string()))?;
        Ok(from_dynamic(&result, 0))
    }
}

/// Creates a [`RhaiEngine`] per language id.
#[derive(Debug, Clone, Copy, Default)]
pub struct RhaiEngineFactory;

impl EngineFactory for RhaiEngineFactory {
    fn engine_name(&self) -> &str {
        ENGINE_NAME
    }

    fn names(&self) -> Vec<String> {
        vec![crate::RHAI.to_string()]
    }

    fn create(&self) -> EngineResult<Box<dyn ScriptEngine>> {
        Ok(Box::new(RhaiEngine::new()))
    }
}

fn to_dynamic(value: &ScriptValue, path: &str) -> EngineResult<Dynamic> {
    Ok(match value {
        ScriptValue::Null => Dynamic::UNIT,
        ScriptValue::Bool(b) => Dynamic::from_bool(*b),
        ScriptValue::Int(i) => Dynamic::from_int(*i),
        ScriptValue::Float(f) => Dynamic::from_float(*f),
        ScriptValue::String(s) => Dynamic::from(s.clone()),
        ScriptValue::Array(items) => Dynamic::from_array(
            items
                .iter()
                .enumerate()
                .map(|(idx, item)| to_dynamic(item, &format!("{path}[{idx}]")))
                .collect::<EngineResult<rhai::Array>>()?,
        ),
        ScriptValue::Map(entries) => {
            let mut map = rhai::Map::new();
            for (key, item) in entries {
                map.insert(key.as_str().into(), to_dynamic(item, &format!("{path}.{key}"))?);
            }
            Dynamic::from_map(map)
        }
        ScriptValue::Opaque(handle) => {
            return Err(EngineError::Conversion(format!(
                "{path}: opaque {} value cannot be converted to a Rhai value",
                handle.type_name
            )));
        }
    })
}

fn from_dynamic(value: &Dynamic, depth: usize) -> ScriptValue {
    if value.is_unit() {
        return ScriptValue::Null;
    }
    if let Ok(b) = value.as_bool() {
        return ScriptValue::Bool(b);
    }
    if let Ok(i) = value.as_int() {
        return ScriptValue::Int(i);
    }
    if let Ok(f) = value.as_float() {
        return ScriptValue::Float(f);
    }
    if let Ok(c) = value.as_char() {
        return ScriptValue::String(c.to_string());
    }
    if value.is_string() {
        if let Ok(s) = value.clone().into_string() {
            return ScriptValue::String(s);
        }
    }
    if depth < MAX_VALUE_DEPTH {
        if let Some(items) = value.clone().try_cast::<rhai::Array>() {
            return ScriptValue::Array(items.iter().map(|item| from_dynamic(item, depth + 1)).collect());
        }
        if let Some(map) = value.clone().try_cast::<rhai::Map>() {
            return ScriptValue::Map(
                map.iter()
                    .map(|(key, item)| (key.to_string(), from_dynamic(item, depth + 1)))
                    .collect::<BTreeMap<_, _>>(),
            );
        }
    }
    ScriptValue::Opaque(OpaqueHandle::new(ENGINE_NAME, value.type_name()))
}
