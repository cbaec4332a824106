//! Configuration loading for the hook.
//!
//! One JSON file (`config.json` under the hook root) is read once per
//! invocation. A missing or corrupt file yields the documented defaults —
//! configuration problems must never make the hook fail closed.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Filesystem layout rooted at the installation directory
/// (default `~/.claude/hooks`, overridable via `--root` or `REVIEWGATE_ROOT`).
#[derive(Debug, Clone)]
pub struct HookPaths {
    root: PathBuf,
}

impl HookPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve the root from an explicit override, the environment, or the
    /// default location under the home directory.
    pub fn resolve(explicit: Option<PathBuf>) -> Self {
        if let Some(root) = explicit {
            return Self::new(root);
        }
        if let Some(root) = std::env::var_os("REVIEWGATE_ROOT") {
            return Self::new(PathBuf::from(root));
        }
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        Self::new(home.join(".claude").join("hooks"))
    }

    pub fn config_path(&self) -> PathBuf {
        self.root.join("config.json")
    }

    pub fn state_dir(&self) -> PathBuf {
        self.root.join("state")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    pub fn prompts_dir(&self) -> PathBuf {
        self.root.join("prompts")
    }

    pub fn api_keys_path(&self) -> PathBuf {
        self.root.join("api_keys.json")
    }
}

/// Top-level hook configuration. Every field has a working default.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HookConfig {
    /// Names of external adapters to consider (e.g. `["gemini", "copilot"]`).
    pub enabled_adapters: Vec<String>,
    pub completion_review: CompletionReviewConfig,
    pub debate: DebateConfig,
    pub conflict_resolution: ConflictResolutionConfig,
    pub security: SecurityConfig,
    /// Per-adapter deadline in seconds.
    pub timeout_seconds: u64,
    pub gemini: GeminiConfig,
    #[serde(rename = "override")]
    pub override_: OverrideConfig,
    pub debounce: DebounceConfig,
    pub rework_settings: ReworkConfig,
    pub stage_settings: HashMap<String, StageSettings>,
}

impl Default for HookConfig {
    fn default() -> Self {
        Self {
            enabled_adapters: Vec::new(),
            completion_review: CompletionReviewConfig::default(),
            debate: DebateConfig::default(),
            conflict_resolution: ConflictResolutionConfig::default(),
            security: SecurityConfig::default(),
            timeout_seconds: 60,
            gemini: GeminiConfig::default(),
            override_: OverrideConfig::default(),
            debounce: DebounceConfig::default(),
            rework_settings: ReworkConfig::default(),
            stage_settings: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompletionReviewConfig {
    pub include_self_review: bool,
    pub include_external_review: bool,
    /// Selects the subagent variant of the self-review prompt.
    pub use_subagent: bool,
    /// Review budget per completion edge.
    pub max_reviews: u32,
}

impl Default for CompletionReviewConfig {
    fn default() -> Self {
        Self {
            include_self_review: true,
            include_external_review: true,
            use_subagent: true,
            max_reviews: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DebateConfig {
    pub enabled: bool,
    /// Extra rounds beyond the initial independent fan-out.
    pub max_rounds: u32,
    pub trigger_on_disagreement: bool,
    pub trigger_on_high_severity: bool,
}

impl Default for DebateConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_rounds: 2,
            trigger_on_disagreement: true,
            trigger_on_high_severity: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ConflictResolutionConfig {
    /// `conservative` | `highest_severity` | `majority_vote` | `weighted_vote`.
    pub policy: Option<String>,
    /// Adapter-name → weight. Missing names weigh 1.0.
    pub weights: HashMap<String, f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    pub mask_sensitive_data: bool,
    pub sensitive_patterns: Vec<String>,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            mask_sensitive_data: true,
            sensitive_patterns: [
                "password",
                "api_key",
                "secret",
                "token",
                "credential",
                "private_key",
                "access_key",
                "auth_token",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeminiConfig {
    pub model: String,
    /// Literal key, or a `${VAR}` reference resolved through the key loader.
    pub api_key: Option<String>,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            model: "gemini-2.5-flash-lite".to_string(),
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OverrideConfig {
    pub enabled: bool,
}

impl Default for OverrideConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DebounceConfig {
    pub enabled: bool,
    pub seconds: f64,
    /// Stages the debounce window applies to.
    pub stages: Vec<String>,
}

impl Default for DebounceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            seconds: 3.0,
            stages: vec!["code".to_string()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReworkConfig {
    pub max_retries: u32,
}

impl Default for ReworkConfig {
    fn default() -> Self {
        Self { max_retries: 3 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct StageSettings {
    pub max_retries: Option<u32>,
}

impl HookConfig {
    /// Load configuration from `path`. Missing file or invalid JSON fall
    /// back to defaults; the invalid case is logged.
    pub fn load(path: &Path) -> Self {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(_) => return Self::default(),
        };
        match serde_json::from_str(&content) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("ignoring malformed config {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    /// Effective retry budget for a stage: per-stage override, then the
    /// global rework setting.
    pub fn max_retries_for(&self, stage: &str) -> u32 {
        self.stage_settings
            .get(stage)
            .and_then(|s| s.max_retries)
            .unwrap_or(self.rework_settings.max_retries)
    }
}

impl HookConfig {
    /// Per-adapter deadline. A configured zero would make every adapter time
    /// out instantly; treat it as the documented default.
    pub fn timeout_seconds(&self) -> u64 {
        if self.timeout_seconds == 0 {
            60
        } else {
            self.timeout_seconds
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = HookConfig::default();
        assert!(config.enabled_adapters.is_empty());
        assert!(config.completion_review.include_self_review);
        assert!(config.completion_review.include_external_review);
        assert!(config.completion_review.use_subagent);
        assert_eq!(config.completion_review.max_reviews, 3);
        assert!(!config.debate.enabled);
        assert_eq!(config.debate.max_rounds, 2);
        assert!(config.debate.trigger_on_disagreement);
        assert!(config.debate.trigger_on_high_severity);
        assert!(config.conflict_resolution.weights.is_empty());
        assert!(config.security.mask_sensitive_data);
        assert_eq!(config.timeout_seconds(), 60);
    }

    #[test]
    fn test_partial_config_keeps_defaults() {
        let config: HookConfig = serde_json::from_str(
            r#"{"enabled_adapters":["gemini"],"debate":{"enabled":true}}"#,
        )
        .unwrap();
        assert_eq!(config.enabled_adapters, vec!["gemini"]);
        assert!(config.debate.enabled);
        // untouched sections keep their defaults
        assert_eq!(config.debate.max_rounds, 2);
        assert_eq!(config.completion_review.max_reviews, 3);
    }

    #[test]
    fn test_missing_file_is_default() {
        let config = HookConfig::load(Path::new("/nonexistent/config.json"));
        assert_eq!(config.completion_review.max_reviews, 3);
    }

    #[test]
    fn test_corrupt_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{not json").unwrap();
        let config = HookConfig::load(&path);
        assert_eq!(config.timeout_seconds(), 60);
    }

    #[test]
    fn test_stage_retry_override() {
        let config: HookConfig = serde_json::from_str(
            r#"{"rework_settings":{"max_retries":5},"stage_settings":{"code":{"max_retries":1}}}"#,
        )
        .unwrap();
        assert_eq!(config.max_retries_for("code"), 1);
        assert_eq!(config.max_retries_for("plan"), 5);
    }
}
