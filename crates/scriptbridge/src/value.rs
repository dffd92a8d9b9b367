use std::collections::BTreeMap;
use std::fmt;

/// Named variables injected into a fresh execution context before evaluation.
pub type Bindings = BTreeMap<String, ScriptValue>;

/// Value exchanged with a script engine, in either direction.
#[derive(Clone, Debug, PartialEq, Default)]
pub enum ScriptValue {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Array(Vec<ScriptValue>),
    Map(BTreeMap<String, ScriptValue>),
    /// Engine value with no portable representation (functions, userdata, ...).
    Opaque(OpaqueHandle),
}

/// Description of an engine-owned value that could not cross the boundary.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OpaqueHandle {
    pub engine: String,
    pub type_name: String,
}

impl OpaqueHandle {
    pub fn new(engine: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            engine: engine.into(),
            type_name: type_name.into(),
        }
    }
}

impl ScriptValue {
    /// Short type name used in conversion diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::Array(_) => "array",
            Self::Map(_) => "map",
            Self::Opaque(_) => "opaque",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Numeric view; ints are widened.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Map an engine number to `Int` when it is integral and fits in `i64`.
    ///
    /// Engines with a single number type (JavaScript) report `2 + 3` as a
    /// double; this keeps such results comparable to the integer engines.
    pub fn from_number(value: f64) -> Self {
        // 2^63 is exactly representable; anything at or above it overflows i64.
        const I64_BOUND: f64 = 9_223_372_036_854_775_808.0;
        let negative_zero = value == 0.0 && value.is_sign_negative();
        if value.fract() == 0.0 && !negative_zero && (-I64_BOUND..I64_BOUND).contains(&value) {
            Self::Int(value as i64)
        } else {
            Self::Float(value)
        }
    }

    /// Reject values that cannot be handed to an engine.
    ///
    /// Returns the offending path (`args[1].items[0]`, ...) on failure.
    pub fn ensure_portable(&self, path: &str) -> Result<(), String> {
        match self {
            Self::Opaque(handle) => Err(format!(
                "{path}: opaque {} value from {} cannot be passed back into a script",
                handle.type_name, handle.engine
            )),
            Self::Array(items) => items
                .iter()
                .enumerate()
                .try_for_each(|(idx, item)| item.ensure_portable(&format!("{path}[{idx}]"))),
            Self::Map(entries) => entries
                .iter()
                .try_for_each(|(key, item)| item.ensure_portable(&format!("{path}.{key}"))),
            _ => Ok(()),
        }
    }
}

impl fmt::Display for ScriptValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::String(s) => write!(f, "{s:?}"),
            Self::Array(items) => {
                f.write_str("[")?;
                for (idx, item) in items.iter().enumerate() {
                    if idx > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Self::Map(entries) => {
                f.write_str("{")?;
                for (idx, (key, item)) in entries.iter().enumerate() {
                    if idx > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{key}: {item}")?;
                }
                f.write_str("}")
            }
            Self::Opaque(handle) => write!(f, "<{} {}>", handle.engine, handle.type_name),
        }
    }
}

impl From<bool> for ScriptValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i32> for ScriptValue {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<i64> for ScriptValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for ScriptValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for ScriptValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for ScriptValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl<T: Into<ScriptValue>> From<Vec<T>> for ScriptValue {
    fn from(value: Vec<T>) -> Self {
        Self::Array(value.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<ScriptValue>> From<Option<T>> for ScriptValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

impl From<BTreeMap<String, ScriptValue>> for ScriptValue {
    fn from(value: BTreeMap<String, ScriptValue>) -> Self {
        Self::Map(value)
    }
}
