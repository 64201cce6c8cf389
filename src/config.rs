//! Analyzer configuration loaded from TOML.
//!
//! ```toml
//! [operators]
//! disabled = ["Window", "Generate"]
//! forced_non_native = ["Expand"]
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};

use crate::error::{ConvertError, Result};
use crate::plan::physical::OpKind;

/// Environment variable naming a config file when no explicit path is given.
pub const CONFIG_ENV_VAR: &str = "PLAN_CONVERT_CONFIG";

/// Resolved analyzer configuration.
#[derive(Clone, Debug, Default)]
pub struct ConvertConfig {
    path: Option<PathBuf>,
    disabled: FxHashSet<OpKind>,
    forced_non_native: FxHashSet<OpKind>,
}

impl ConvertConfig {
    /// Loads configuration from `explicit`, else [`CONFIG_ENV_VAR`], else the
    /// per-user default path. A missing file yields the defaults.
    pub fn load(explicit: Option<PathBuf>) -> Result<Self> {
        let path = explicit
            .or_else(|| std::env::var_os(CONFIG_ENV_VAR).map(PathBuf::from))
            .or_else(default_config_path);
        let raw = match path.as_ref() {
            Some(config_path) if config_path.exists() => read_file(config_path)?,
            _ => RawConfig::default(),
        };
        let mut config = Self::from_raw(&raw)?;
        config.path = path;
        Ok(config)
    }

    /// Parses configuration from TOML text.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let raw: RawConfig = toml::from_str(contents).map_err(|source| ConvertError::ParseConfig {
            path: PathBuf::from("<inline>"),
            source,
        })?;
        Self::from_raw(&raw)
    }

    /// Path the configuration was resolved from, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Disables native execution of `kind`.
    pub fn with_disabled(mut self, kind: OpKind) -> Self {
        self.disabled.insert(kind);
        self
    }

    /// Makes native rewrites of `kind` interpreted wrappers.
    pub fn with_forced_non_native(mut self, kind: OpKind) -> Self {
        self.forced_non_native.insert(kind);
        self
    }

    /// Whether native execution of `kind` is disabled.
    pub fn is_disabled(&self, kind: OpKind) -> bool {
        self.disabled.contains(&kind)
    }

    /// Whether native rewrites of `kind` must run interpreted.
    pub fn is_forced_non_native(&self, kind: OpKind) -> bool {
        self.forced_non_native.contains(&kind)
    }

    /// Serializes the configuration back to TOML.
    pub fn to_toml_string(&self) -> String {
        let raw = RawConfig {
            operators: OperatorSection {
                disabled: sorted_names(&self.disabled),
                forced_non_native: sorted_names(&self.forced_non_native),
            },
        };
        toml::to_string_pretty(&raw).unwrap_or_default()
    }

    fn from_raw(raw: &RawConfig) -> Result<Self> {
        Ok(Self {
            path: None,
            disabled: parse_kinds(&raw.operators.disabled, "disabled")?,
            forced_non_native: parse_kinds(
                &raw.operators.forced_non_native,
                "forced_non_native",
            )?,
        })
    }
}

fn read_file(path: &Path) -> Result<RawConfig> {
    let contents = fs::read_to_string(path).map_err(|source| ConvertError::ReadConfig {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&contents).map_err(|source| ConvertError::ParseConfig {
        path: path.to_path_buf(),
        source,
    })
}

fn parse_kinds(names: &[String], list: &'static str) -> Result<FxHashSet<OpKind>> {
    names
        .iter()
        .map(|name| {
            name.parse::<OpKind>()
                .map_err(|name| ConvertError::unknown_operator(name, list))
        })
        .collect()
}

fn sorted_names(kinds: &FxHashSet<OpKind>) -> Vec<String> {
    let mut kinds: Vec<OpKind> = kinds.iter().copied().collect();
    kinds.sort();
    kinds.into_iter().map(|kind| kind.name().to_string()).collect()
}

#[derive(Debug, Default, Deserialize, Serialize)]
struct RawConfig {
    #[serde(default)]
    operators: OperatorSection,
}

#[derive(Debug, Default, Deserialize, Serialize)]
struct OperatorSection {
    #[serde(default)]
    disabled: Vec<String>,
    #[serde(default)]
    forced_non_native: Vec<String>,
}

/// Per-user configuration path.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|base| base.join("plan-convert").join("convert.toml"))
}
