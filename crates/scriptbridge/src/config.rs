//! TOML configuration for the engine manager and logging.
//!
//! ```toml
//! [engines]
//! enabled = ["lua", "javascript", "rhai"]
//!
//! [aliases]
//! jscript = "javascript"
//!
//! [logging]
//! level = "info"
//! format = "pretty"
//! ```

use crate::discovery::BUILTIN_ENGINES;
use crate::error::{Result, ScriptError};
use crate::logging::LogConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BridgeConfig {
    pub engines: EnginesConfig,
    /// Extra language ids mapped onto names an engine already answers to.
    pub aliases: HashMap<String, String>,
    pub logging: LogConfig,
}

/// Which built-in engines the manager registers, in lookup order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EnginesConfig {
    pub enabled: Vec<String>,
}

impl Default for EnginesConfig {
    fn default() -> Self {
        Self {
            enabled: BUILTIN_ENGINES
                .iter()
                .filter(|name| compiled_in(name))
                .map(|name| (*name).to_string())
                .collect(),
        }
    }
}

fn compiled_in(name: &str) -> bool {
    match name {
        crate::LUA => cfg!(feature = "lua"),
        crate::JAVASCRIPT => cfg!(feature = "javascript"),
        crate::RHAI => cfg!(feature = "rhai"),
        _ => false,
    }
}

impl BridgeConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|err| {
            ScriptError::Config(format!("failed to read {}: {err}", path.display()))
        })?;
        Self::from_toml_str(&text)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|err| ScriptError::Config(err.to_string()))
    }
}
