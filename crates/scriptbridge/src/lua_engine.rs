use crate::error::{EngineError, EngineResult};
use crate::value::{Bindings, OpaqueHandle, ScriptValue};
use crate::{EngineFactory, Invocable, ScriptEngine};
use mlua::{Lua, MultiValue, RegistryKey, Table, Value as LuaValue};
use std::collections::BTreeMap;

const ENGINE_NAME: &str = "lua-5.4";

/// Nesting depth past which tables come back as opaque values.
const MAX_TABLE_DEPTH: usize = 32;

/// `__name` of the metatable attached to tables built from a `ScriptValue::Map`.
const MAP_MARKER: &str = "scriptbridge.map";

/// `ScriptEngine` adapter for an embedded Lua 5.4 state.
///
/// Evaluation without bindings runs chunks against the state's globals.
/// Evaluation with bindings runs the chunk with a fresh `_ENV` table that
/// holds the bindings and falls back to the globals for reads, so chunk-level
/// assignments stay in that table.
///
/// A `Null` inside an array or map reaches scripts as the `mlua` null light
/// userdata so the table keeps its length. Tables built from a map carry a
/// metatable named `scriptbridge.map` and come back as maps even when empty.
pub struct LuaEngine {
    lua: Lua,
    /// Environment selected by the last bound evaluation; `None` means globals.
    scope: Option<RegistryKey>,
}

impl Default for LuaEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl LuaEngine {
    pub fn new() -> Self {
        Self::with_lua(Lua::new())
    }

    /// Wrap a state the host already prepared (extra globals, libraries, ...).
    pub fn with_lua(lua: Lua) -> Self {
        Self { lua, scope: None }
    }

    fn active_scope(&self) -> mlua::Result<Table<'_>> {
        match &self.scope {
            Some(key) => self.lua.registry_value(key),
            None => Ok(self.lua.globals()),
        }
    }
}

impl ScriptEngine for LuaEngine {
    fn engine_name(&self) -> &str {
        ENGINE_NAME
    }

    fn eval(&mut self, source: &str) -> EngineResult<()> {
        self.scope = None;
        self.lua
            .load(source)
            .set_name("script")
            .exec()
            .map_err(script_error)
    }

    fn eval_with_bindings(&mut self, source: &str, bindings: &Bindings) -> EngineResult<()> {
        let lua = &self.lua;
        let env: Table = lua
            .load("return setmetatable({}, { __index = _G })")
            .set_name("=env")
            .eval()
            .map_err(script_error)?;
        for (name, value) in bindings {
            let value = to_lua(lua, value, &format!("bindings.{name}"))?;
            env.raw_set(name.as_str(), value).map_err(script_error)?;
        }

        lua.load(source)
            .set_name("script")
            .set_environment(env.clone())
            .exec()
            .map_err(script_error)?;

        let key = lua.create_registry_value(env).map_err(script_error)?;
        self.scope = Some(key);
        Ok(())
    }

    fn as_invocable(&mut self) -> Option<&mut dyn Invocable> {
        Some(self as &mut dyn Invocable)
    }
}

impl Invocable for LuaEngine {
    fn invoke_function(&mut self, name: &str, args: &[ScriptValue]) -> EngineResult<ScriptValue> {
        let scope = self.active_scope().map_err(script_error)?;
        let function = match scope.get::<_, LuaValue>(name).map_err(script_error)? {
            LuaValue::Function(function) => function,
            _ => return Err(EngineError::MissingFunction),
        };

        let lua_args = args
            .iter()
            .enumerate()
            .map(|(idx, arg)| to_lua(&self.lua, arg, &format!("args[{idx}]")))
            .collect::<EngineResult<Vec<_>>>()?;
        let result: LuaValue = function
            .call(MultiValue::from_vec(lua_args))
            .map_err(script_error)?;
        from_lua(result, 0)
    }
}

/// Creates a [`LuaEngine`] per language id.
#[derive(Debug, Clone, Copy, Default)]
pub struct LuaEngineFactory;

impl EngineFactory for LuaEngineFactory {
    fn engine_name(&self) -> &str {
        ENGINE_NAME
    }

    fn names(&self) -> Vec<String> {
        vec![crate::LUA.to_string()]
    }

    fn create(&self) -> EngineResult<Box<dyn ScriptEngine>> {
        Ok(Box::new(LuaEngine::new()))
    }
}

fn script_error(err: mlua::Error) -> EngineError {
    EngineError::Script(err.to_string())
}

fn to_lua<'lua>(lua: &'lua Lua, value: &ScriptValue, path: &str) -> EngineResult<LuaValue<'lua>> {
    Ok(match value {
        ScriptValue::Null => LuaValue::Nil,
        ScriptValue::Bool(b) => LuaValue::Boolean(*b),
        ScriptValue::Int(i) => LuaValue::Integer(*i),
        ScriptValue::Float(f) => LuaValue::Number(*f),
        ScriptValue::String(s) => LuaValue::String(lua.create_string(s).map_err(script_error)?),
        ScriptValue::Array(items) => {
            let table = lua.create_table().map_err(script_error)?;
            for (idx, item) in items.iter().enumerate() {
                let item = to_lua_element(lua, item, &format!("{path}[{idx}]"))?;
                table.raw_set(idx + 1, item).map_err(script_error)?;
            }
            LuaValue::Table(table)
        }
        ScriptValue::Map(entries) => {
            let table = lua.create_table().map_err(script_error)?;
            for (key, item) in entries {
                let item = to_lua_element(lua, item, &format!("{path}.{key}"))?;
                table.raw_set(key.as_str(), item).map_err(script_error)?;
            }
            let marker = lua.create_table().map_err(script_error)?;
            marker.raw_set("__name", MAP_MARKER).map_err(script_error)?;
            table.set_metatable(Some(marker));
            LuaValue::Table(table)
        }
        ScriptValue::Opaque(handle) => {
            return Err(EngineError::Conversion(format!(
                "{path}: opaque {} value cannot be converted to a Lua value",
                handle.type_name
            )));
        }
    })
}

/// Tables can't hold `nil`, so nulls inside arrays and maps travel as
/// `mlua::Value::NULL`.
fn to_lua_element<'lua>(
    lua: &'lua Lua,
    value: &ScriptValue,
    path: &str,
) -> EngineResult<LuaValue<'lua>> {
    match value {
        ScriptValue::Null => Ok(LuaValue::NULL),
        other => to_lua(lua, other, path),
    }
}

fn from_lua(value: LuaValue<'_>, depth: usize) -> EngineResult<ScriptValue> {
    Ok(match value {
        LuaValue::Nil => ScriptValue::Null,
        LuaValue::LightUserData(ud) if ud.0.is_null() => ScriptValue::Null,
        LuaValue::Boolean(b) => ScriptValue::Bool(b),
        LuaValue::Integer(i) => ScriptValue::Int(i),
        LuaValue::Number(n) => ScriptValue::Float(n),
        LuaValue::String(s) => ScriptValue::String(String::from_utf8_lossy(s.as_bytes()).into_owned()),
        LuaValue::Table(table) if depth < MAX_TABLE_DEPTH => table_to_value(table, depth)?,
        other => ScriptValue::Opaque(OpaqueHandle::new(ENGINE_NAME, other.type_name())),
    })
}

/// Sequences (keys exactly `1..=n`) become arrays, everything else a map
/// with stringified keys. An empty table is an empty array unless it carries
/// the map marker.
fn table_to_value(table: Table<'_>, depth: usize) -> EngineResult<ScriptValue> {
    let is_marked_map = match table.get_metatable() {
        Some(meta) => {
            meta.raw_get::<_, Option<String>>("__name").map_err(script_error)?.as_deref()
                == Some(MAP_MARKER)
        }
        None => false,
    };

    let mut entries = Vec::new();
    for pair in table.pairs::<LuaValue, LuaValue>() {
        let (key, value) = pair.map_err(script_error)?;
        entries.push((key, from_lua(value, depth + 1)?));
    }

    let len = entries.len();
    let mut sequence = vec![None; len];
    let is_sequence = entries.iter().all(|(key, _)| match key {
        LuaValue::Integer(i) => *i >= 1 && (*i as usize) <= len,
        _ => false,
    });
    if is_sequence && !is_marked_map {
        for (key, value) in entries {
            if let LuaValue::Integer(i) = key {
                sequence[i as usize - 1] = Some(value);
            }
        }
        return Ok(ScriptValue::Array(sequence.into_iter().flatten().collect()));
    }

    let map = entries
        .into_iter()
        .map(|(key, value)| (lua_key_to_string(&key), value))
        .collect::<BTreeMap<_, _>>();
    Ok(ScriptValue::Map(map))
}

fn lua_key_to_string(key: &LuaValue<'_>) -> String {
    match key {
        LuaValue::String(s) => String::from_utf8_lossy(s.as_bytes()).into_owned(),
        LuaValue::Integer(i) => i.to_string(),
        LuaValue::Number(n) => n.to_string(),
        LuaValue::Boolean(b) => b.to_string(),
        other => format!("<{}>", other.type_name()),
    }
}
