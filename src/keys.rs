//! API key lookup for external adapters.
//!
//! Resolution order: process environment, then the installation's
//! `api_keys.json`, with `${VAR}` references substituted from the
//! environment. Keys are read only by external adapters at call time and
//! never enter prompts, logs, or audit events.

use std::path::PathBuf;

use regex::Regex;
use serde_json::Value;

pub struct ApiKeyLoader {
    keys_path: PathBuf,
}

impl ApiKeyLoader {
    pub fn new(keys_path: impl Into<PathBuf>) -> Self {
        Self {
            keys_path: keys_path.into(),
        }
    }

    /// Look up a key by name (e.g. `GEMINI_API_KEY`). Returns `None` when no
    /// source has a non-empty value.
    pub fn get(&self, key_name: &str) -> Option<String> {
        if let Ok(value) = std::env::var(key_name) {
            if !value.is_empty() {
                return Some(value);
            }
        }

        let content = std::fs::read_to_string(&self.keys_path).ok()?;
        let data: Value = serde_json::from_str(&content).ok()?;
        let raw = data.get(key_name)?.as_str()?;
        let resolved = substitute_env_vars(raw);
        if resolved.is_empty() {
            None
        } else {
            Some(resolved)
        }
    }

    pub fn has_key(&self, key_name: &str) -> bool {
        self.get(key_name).is_some()
    }
}

/// Replace `${VAR}` references with environment values, leaving unresolved
/// references as written.
fn substitute_env_vars(value: &str) -> String {
    let pattern = Regex::new(r"\$\{([^}]+)\}").expect("static pattern");
    pattern
        .replace_all(value, |caps: &regex::Captures<'_>| {
            std::env::var(&caps[1]).unwrap_or_else(|_| caps[0].to_string())
        })
        .into_owned()
}
