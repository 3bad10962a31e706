use std::env;
use std::path::{Path, PathBuf};

use anyhow::Context;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::output::OutputFormat;

pub const API_KEY_ENV_VARS: [&str; 2] = ["REPLICATE_API_TOKEN", "REPLICATE_API_KEY"];

/// Contents of the JSON settings file.
///
/// ```json
/// {
///   "model": "Control Net",
///   "output_format": "png",
///   "parameters": { "Control Net": { "prompt": "a watercolor city", "steps": 30 } }
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub api_key: Option<String>,
    pub api_base: Option<String>,
    pub model: Option<String>,
    pub output_format: Option<OutputFormat>,
    pub project_dir: Option<PathBuf>,
    pub poll_interval: Option<f64>,
    pub events: Option<PathBuf>,
    pub parameters: IndexMap<String, Map<String, Value>>,
}

impl Settings {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed reading settings {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("invalid settings file {}", path.display()))
    }

    pub fn parameters_for(&self, model: &str) -> Option<&Map<String, Value>> {
        self.parameters.get(model)
    }

    /// The configured key, else the first non-empty credential variable.
    pub fn resolve_api_key(&self) -> Option<String> {
        self.resolve_api_key_with(|key| env::var(key).ok())
    }

    pub fn resolve_api_key_with(&self, lookup: impl Fn(&str) -> Option<String>) -> Option<String> {
        non_empty(self.api_key.clone()).or_else(|| {
            API_KEY_ENV_VARS
                .iter()
                .find_map(|key| non_empty(lookup(key)))
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
