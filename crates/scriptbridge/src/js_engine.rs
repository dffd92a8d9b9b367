use crate::error::{EngineError, EngineResult};
use crate::value::{Bindings, OpaqueHandle, ScriptValue};
use crate::{EngineFactory, Invocable, ScriptEngine};
use rquickjs::{Array, Context, Ctx, Function, Object, Runtime, Value};
use std::collections::BTreeMap;

const ENGINE_NAME: &str = "quickjs";

/// Nesting depth past which objects come back as opaque values.
const MAX_OBJECT_DEPTH: usize = 32;

/// `Number.MAX_SAFE_INTEGER`.
const MAX_SAFE_INTEGER: u64 = (1 << 53) - 1;

/// Calls `f` with the elements of `args` as positional arguments.
const SPREAD_CALL: &str = "(f, args) => f(...args)";

/// `ScriptEngine` adapter for QuickJS.
///
/// One runtime per engine. Evaluation without bindings uses the runtime's
/// long-lived global context; evaluation with bindings creates a new context
/// on the same runtime whose globals are the bindings, and function calls go
/// there until the next evaluation.
///
/// Integers pass as JavaScript numbers, so values beyond
/// `Number.MAX_SAFE_INTEGER` are rejected with a conversion error instead of
/// being rounded.
pub struct JsEngine {
    scoped: Option<Context>,
    global: Context,
    runtime: Runtime,
}

impl JsEngine {
    pub fn new() -> EngineResult<Self> {
        let runtime = Runtime::new().map_err(setup_error)?;
        let global = Context::full(&runtime).map_err(setup_error)?;
        Ok(Self {
            scoped: None,
            global,
            runtime,
        })
    }

    fn active_context(&self) -> &Context {
        self.scoped.as_ref().unwrap_or(&self.global)
    }
}

impl ScriptEngine for JsEngine {
    fn engine_name(&self) -> &str {
        ENGINE_NAME
    }

    fn eval(&mut self, source: &str) -> EngineResult<()> {
        self.scoped = None;
        self.global.with(|ctx| {
            let result = ctx.eval::<(), _>(source);
            result.map_err(|err| describe_error(&ctx, err))
        })
    }

    fn eval_with_bindings(&mut self, source: &str, bindings: &Bindings) -> EngineResult<()> {
        let context = Context::full(&self.runtime).map_err(setup_error)?;
        context.with(|ctx| {
            let globals = ctx.globals();
            for (name, value) in bindings {
                let value = to_js(&ctx, value, &format!("bindings.{name}"))?;
                globals
                    .set(name.as_str(), value)
                    .map_err(|err| describe_error(&ctx, err))?;
            }
            let result = ctx.eval::<(), _>(source);
            result.map_err(|err| describe_error(&ctx, err))
        })?;
        self.scoped = Some(context);
        Ok(())
    }

    fn as_invocable(&mut self) -> Option<&mut dyn Invocable> {
        Some(self as &mut dyn Invocable)
    }
}

impl Invocable for JsEngine {
    fn invoke_function(&mut self, name: &str, args: &[ScriptValue]) -> EngineResult<ScriptValue> {
        self.active_context().with(|ctx| {
            let target: Value = ctx
                .globals()
                .get(name)
                .map_err(|err| describe_error(&ctx, err))?;
            let Some(function) = target.into_function() else {
                return Err(EngineError::MissingFunction);
            };

            let js_args = Array::new(ctx.clone()).map_err(|err| describe_error(&ctx, err))?;
            for (idx, arg) in args.iter().enumerate() {
                let value = to_js(&ctx, arg, &format!("args[{idx}]"))?;
                js_args
                    .set(idx, value)
                    .map_err(|err| describe_error(&ctx, err))?;
            }

            let spread: Function = ctx
                .eval(SPREAD_CALL)
                .map_err(|err| describe_error(&ctx, err))?;
            let result = spread.call::<_, Value>((function, js_args));
            let result = result.map_err(|err| describe_error(&ctx, err))?;
            from_js(&result, 0)
        })
    }
}

/// Creates a [`JsEngine`] per language id.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsEngineFactory;

impl EngineFactory for JsEngineFactory {
    fn engine_name(&self) -> &str {
        ENGINE_NAME
    }

    fn names(&self) -> Vec<String> {
        [crate::JAVASCRIPT, "js", "JavaScript", "ecmascript", "ECMAScript"]
            .iter()
            .map(|name| (*name).to_string())
            .collect()
    }

    fn create(&self) -> EngineResult<Box<dyn ScriptEngine>> {
        Ok(Box::new(JsEngine::new()?))
    }
}

fn setup_error(err: rquickjs::Error) -> EngineError {
    EngineError::Script(format!("failed to initialize QuickJS: {err}"))
}

/// Turn a QuickJS error into a diagnostic, draining a pending exception.
fn describe_error(ctx: &Ctx<'_>, err: rquickjs::Error) -> EngineError {
    if !matches!(err, rquickjs::Error::Exception) {
        return EngineError::Script(err.to_string());
    }

    let caught = ctx.catch();
    if let Some(exception) = caught.as_exception() {
        let name = exception
            .get::<_, String>("name")
            .unwrap_or_else(|_| "Error".to_string());
        let message = exception.message().unwrap_or_default();
        return EngineError::Script(format!("{name}: {message}"));
    }
    match from_js(&caught, 0) {
        Ok(value) => EngineError::Script(format!("uncaught {value}")),
        Err(err) => err,
    }
}

fn to_js<'js>(ctx: &Ctx<'js>, value: &ScriptValue, path: &str) -> EngineResult<Value<'js>> {
    let js = |result: rquickjs::Result<Value<'js>>| result.map_err(|err| describe_error(ctx, err));
    match value {
        ScriptValue::Null => Ok(Value::new_null(ctx.clone())),
        ScriptValue::Bool(b) => Ok(Value::new_bool(ctx.clone(), *b)),
        ScriptValue::Int(i) => match i32::try_from(*i) {
            Ok(small) => Ok(Value::new_int(ctx.clone(), small)),
            Err(_) if i.unsigned_abs() <= MAX_SAFE_INTEGER => {
                Ok(Value::new_float(ctx.clone(), *i as f64))
            }
            Err(_) => Err(EngineError::Conversion(format!(
                "{path}: integer {i} is outside the range JavaScript numbers hold exactly"
            ))),
        },
        ScriptValue::Float(f) => Ok(Value::new_float(ctx.clone(), *f)),
        ScriptValue::String(s) => {
            js(rquickjs::String::from_str(ctx.clone(), s).map(rquickjs::String::into_value))
        }
        ScriptValue::Array(items) => {
            let array = Array::new(ctx.clone()).map_err(|err| describe_error(ctx, err))?;
            for (idx, item) in items.iter().enumerate() {
                let item = to_js(ctx, item, &format!("{path}[{idx}]"))?;
                array.set(idx, item).map_err(|err| describe_error(ctx, err))?;
            }
            Ok(array.into_value())
        }
        ScriptValue::Map(entries) => {
            let object = Object::new(ctx.clone()).map_err(|err| describe_error(ctx, err))?;
            for (key, item) in entries {
                let item = to_js(ctx, item, &format!("{path}.{key}"))?;
                object
                    .set(key.as_str(), item)
                    .map_err(|err| describe_error(ctx, err))?;
            }
            Ok(object.into_value())
        }
        ScriptValue::Opaque(handle) => Err(EngineError::Conversion(format!(
            "{path}: opaque {} value cannot be converted to a JavaScript value",
            handle.type_name
        ))),
    }
}

fn from_js(value: &Value<'_>, depth: usize) -> EngineResult<ScriptValue> {
    if value.is_undefined() || value.is_null() {
        return Ok(ScriptValue::Null);
    }
    if let Some(b) = value.as_bool() {
        return Ok(ScriptValue::Bool(b));
    }
    if let Some(i) = value.as_int() {
        return Ok(ScriptValue::Int(i64::from(i)));
    }
    if let Some(f) = value.as_float() {
        return Ok(ScriptValue::from_number(f));
    }
    if let Some(s) = value.as_string() {
        let text = s.to_string().map_err(|err| EngineError::Conversion(err.to_string()))?;
        return Ok(ScriptValue::String(text));
    }
    if depth >= MAX_OBJECT_DEPTH || value.is_function() {
        return Ok(opaque(value));
    }
    if let Some(array) = value.as_array() {
        let mut items = Vec::with_capacity(array.len());
        for item in array.iter::<Value>() {
            let item = item.map_err(|err| EngineError::Conversion(err.to_string()))?;
            items.push(from_js(&item, depth + 1)?);
        }
        return Ok(ScriptValue::Array(items));
    }
    if let Some(object) = value.as_object() {
        let mut entries = BTreeMap::new();
        for prop in object.props::<String, Value>() {
            let (key, item) = prop.map_err(|err| EngineError::Conversion(err.to_string()))?;
            entries.insert(key, from_js(&item, depth + 1)?);
        }
        return Ok(ScriptValue::Map(entries));
    }
    Ok(opaque(value))
}

fn opaque(value: &Value<'_>) -> ScriptValue {
    ScriptValue::Opaque(OpaqueHandle::new(ENGINE_NAME, value.type_name()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> JsEngine {
        JsEngine::new().unwrap()
    }

    fn call(engine: &mut JsEngine, name: &str, args: &[ScriptValue]) -> EngineResult<ScriptValue> {
        engine.invoke_function(name, args)
    }

    #[test]
    fn add_returns_integer_sum() {
        let mut engine = engine();
        engine.eval("function add(a,b){return a+b;}").unwrap();
        let sum = call(&mut engine, "add", &[ScriptValue::Int(2), ScriptValue::Int(3)]).unwrap();
        assert_eq!(sum, ScriptValue::Int(5));
    }

    #[test]
    fn integral_doubles_become_ints() {
        let mut engine = engine();
        engine.eval("function half(a){return a/2;}").unwrap();
        assert_eq!(call(&mut engine, "half", &[ScriptValue::Int(8)]).unwrap(), ScriptValue::Int(4));
        assert_eq!(
            call(&mut engine, "half", &[ScriptValue::Int(3)]).unwrap(),
            ScriptValue::Float(1.5)
        );
    }

    #[test]
    fn bindings_are_visible_to_functions() {
        let mut engine = engine();
        let bindings = Bindings::from([("x".to_string(), ScriptValue::Int(10))]);
        engine
            .eval_with_bindings("function getX(){return x;}", &bindings)
            .unwrap();
        assert_eq!(call(&mut engine, "getX", &[]).unwrap(), ScriptValue::Int(10));
    }

    #[test]
    fn unbound_reference_raises_reference_error_at_call() {
        let mut engine = engine();
        engine.eval("function getY(){return y;}").unwrap();
        let err = call(&mut engine, "getY", &[]).unwrap_err();
        assert!(
            matches!(err, EngineError::Script(ref msg) if msg.starts_with("ReferenceError")),
            "{err:?}"
        );
    }

    #[test]
    fn bound_context_is_discarded_by_next_global_eval() {
        let mut engine = engine();
        engine
            .eval_with_bindings("function scoped(){return 1;}", &Bindings::new())
            .unwrap();
        assert_eq!(call(&mut engine, "scoped", &[]).unwrap(), ScriptValue::Int(1));
        engine.eval("").unwrap();
        assert_eq!(call(&mut engine, "scoped", &[]), Err(EngineError::MissingFunction));
    }

    #[test]
    fn global_state_persists_between_evaluations() {
        let mut engine = engine();
        engine.eval("var total = 0; function bump(n){ total += n; return total; }").unwrap();
        call(&mut engine, "bump", &[ScriptValue::Int(4)]).unwrap();
        engine.eval("function read(){ return total; }").unwrap();
        assert_eq!(call(&mut engine, "read", &[]).unwrap(), ScriptValue::Int(4));
    }

    #[test]
    fn syntax_error_is_reported() {
        let mut engine = engine();
        let err = engine.eval("function broken( {").unwrap_err();
        assert!(matches!(err, EngineError::Script(ref msg) if msg.starts_with("SyntaxError")), "{err:?}");
    }

    #[test]
    fn thrown_values_are_described() {
        let mut engine = engine();
        engine
            .eval("function boom(){ throw new TypeError('bad input'); }\nfunction raw(){ throw 42; }")
            .unwrap();
        assert_eq!(
            call(&mut engine, "boom", &[]),
            Err(EngineError::Script("TypeError: bad input".to_string()))
        );
        assert_eq!(
            call(&mut engine, "raw", &[]),
            Err(EngineError::Script("uncaught 42".to_string()))
        );
    }

    #[test]
    fn non_function_global_is_missing() {
        let mut engine = engine();
        engine.eval("var answer = 42;").unwrap();
        assert_eq!(call(&mut engine, "answer", &[]), Err(EngineError::MissingFunction));
        assert_eq!(call(&mut engine, "nothing", &[]), Err(EngineError::MissingFunction));
    }

    #[test]
    fn structured_values_cross_the_boundary() {
        let mut engine = engine();
        engine
            .eval("function wrap(list, opts){ return { count: list.length, first: list[0], name: opts.name, none: null }; }")
            .unwrap();
        let result = call(
            &mut engine,
            "wrap",
            &[
                ScriptValue::from(vec!["a", "b"]),
                ScriptValue::Map(BTreeMap::from([("name".to_string(), ScriptValue::from("n"))])),
            ],
        )
        .unwrap();
        assert_eq!(
            result,
            ScriptValue::Map(BTreeMap::from([
                ("count".to_string(), ScriptValue::Int(2)),
                ("first".to_string(), ScriptValue::from("a")),
                ("name".to_string(), ScriptValue::from("n")),
                ("none".to_string(), ScriptValue::Null),
            ]))
        );
    }

    #[test]
    fn large_ints_pass_as_doubles() {
        let mut engine = engine();
        engine.eval("function id(v){ return v; }").unwrap();
        let big = ScriptValue::Int(1 << 40);
        assert_eq!(call(&mut engine, "id", &[big.clone()]).unwrap(), big);
        let edge = ScriptValue::Int(-((1 << 53) - 1));
        assert_eq!(call(&mut engine, "id", &[edge.clone()]).unwrap(), edge);
    }

    #[test]
    fn unsafe_integers_are_rejected() {
        let mut engine = engine();
        engine.eval("function id(v){ return v; }").unwrap();
        for unsafe_int in [(1_i64 << 53) + 1, i64::MIN] {
            let err = call(&mut engine, "id", &[ScriptValue::from(vec![unsafe_int])]).unwrap_err();
            assert!(
                matches!(err, EngineError::Conversion(ref msg) if msg.starts_with("args[0][0]")),
                "{err:?}"
            );
        }
    }

    #[test]
    fn functions_come_back_opaque() {
        let mut engine = engine();
        engine.eval("function f(){ return function(){}; }").unwrap();
        assert_eq!(
            call(&mut engine, "f", &[]).unwrap(),
            ScriptValue::Opaque(OpaqueHandle::new(ENGINE_NAME, "function"))
        );
    }

    #[test]
    fn opaque_arguments_are_rejected() {
        let mut engine = engine();
        engine.eval("function id(v){ return v; }").unwrap();
        let err = call(
            &mut engine,
            "id",
            &[ScriptValue::Opaque(OpaqueHandle::new("lua-5.4", "userdata"))],
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::Conversion(ref msg) if msg.starts_with("args[0]")));
    }
}
