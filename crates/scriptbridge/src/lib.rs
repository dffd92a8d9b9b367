//! Script invocation facade over pluggable interpreter engines.
//!
//! A host resolves a language id (`"lua"`, `"javascript"`, ...) to a cached,
//! reusable engine through [`EngineRegistry`], then uses [`ScriptInvoker`] to
//! evaluate script source, optionally with injected [`Bindings`], and call a
//! named function defined by that source.
//!
//! ```ignore
//! use scriptbridge::{EngineManager, EngineRegistry, ScriptInvoker, ScriptValue};
//! use std::sync::Arc;
//!
//! let registry = Arc::new(EngineRegistry::new(Arc::new(EngineManager::with_builtin_engines())));
//! let invoker = ScriptInvoker::new(registry);
//! let sum = invoker.invoke(
//!     "javascript",
//!     "function add(a, b) { return a + b; }",
//!     "add",
//!     &[ScriptValue::Int(2), ScriptValue::Int(3)],
//! )?;
//! assert_eq!(sum, ScriptValue::Int(5));
//! ```

pub mod config;
mod discovery;
mod error;
mod invoker;
#[cfg(feature = "javascript")]
mod js_engine;
pub mod logging;
#[cfg(feature = "lua")]
mod lua_engine;
mod registry;
#[cfg(feature = "rhai")]
mod rhai_engine;
mod value;

pub use config::BridgeConfig;
pub use discovery::{EngineDiscovery, EngineFactory, EngineManager, FnFactory};
pub use error::{EngineError, EngineResult, ErrorKind, Result, ScriptError};
pub use invoker::{ScriptInvoker, ScriptSource};
#[cfg(feature = "javascript")]
pub use js_engine::{JsEngine, JsEngineFactory};
#[cfg(feature = "lua")]
pub use lua_engine::{LuaEngine, LuaEngineFactory};
pub use registry::{EngineHandle, EngineRegistry};
#[cfg(feature = "rhai")]
pub use rhai_engine::{RhaiEngine, RhaiEngineFactory};
pub use value::{Bindings, OpaqueHandle, ScriptValue};

/// Language id of the built-in Lua engine.
pub const LUA: &str = "lua";
/// Canonical language id of the built-in JavaScript engine. It also answers
/// to `js`, `JavaScript`, `ecmascript` and `ECMAScript`.
pub const JAVASCRIPT: &str = "javascript";
/// Language id of the built-in Rhai engine.
pub const RHAI: &str = "rhai";

/// Unified interface for all script engines.
///
/// An engine keeps one persistent global context for the lifetime of the
/// process. Each evaluation also selects the context that a following
/// [`Invocable::invoke_function`] call resolves names in: the global one for
/// [`eval`](Self::eval), a fresh per-call one for
/// [`eval_with_bindings`](Self::eval_with_bindings).
pub trait ScriptEngine: Send + 'static {
    /// Human-readable runtime name (`lua-5.4`, `quickjs`, ...).
    fn engine_name(&self) -> &str;

    /// Evaluate `source` in the engine's persistent global context.
    fn eval(&mut self, source: &str) -> EngineResult<()>;

    /// Evaluate `source` in a fresh context holding a copy of `bindings`.
    fn eval_with_bindings(&mut self, source: &str, bindings: &Bindings) -> EngineResult<()>;

    /// Function-call capability, if the engine has one.
    fn as_invocable(&mut self) -> Option<&mut dyn Invocable> {
        None
    }
}

/// Engines that can call a function defined by previously evaluated source.
pub trait Invocable {
    /// Call `name` in the context selected by the last evaluation.
    ///
    /// Reports [`EngineError::MissingFunction`] when `name` is not bound to a
    /// callable value.
    fn invoke_function(&mut self, name: &str, args: &[ScriptValue]) -> EngineResult<ScriptValue>;
}
