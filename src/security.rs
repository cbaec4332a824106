//! Sensitive-data masking for payloads bound to external reviewers.
//!
//! Best-effort defense in depth, not a security guarantee: values following
//! configured keywords in `KEY=VALUE`, `KEY: VALUE`, and `"KEY": "VALUE"`
//! shapes are replaced before `code` or `diff` leave the process.

use regex::Regex;

use crate::config::SecurityConfig;

const MASK: &str = "***MASKED***";

pub struct SensitiveMasker {
    enabled: bool,
    rules: Vec<MaskRule>,
}

struct MaskRule {
    key_value: Regex,
    json_value: Regex,
}

impl SensitiveMasker {
    pub fn new(config: &SecurityConfig) -> Self {
        let rules = config
            .sensitive_patterns
            .iter()
            .filter_map(|keyword| {
                let escaped = regex::escape(keyword);
                let key_value = Regex::new(&format!(
                    r#"(?i)({escaped}\s*[=:]\s*)["']?([^"'\s\n]+)["']?"#
                ))
                .ok()?;
                let json_value =
                    Regex::new(&format!(r#"(?i)("{escaped}"\s*:\s*)["']([^"']+)["']"#)).ok()?;
                Some(MaskRule {
                    key_value,
                    json_value,
                })
            })
            .collect();

        Self {
            enabled: config.mask_sensitive_data,
            rules,
        }
    }

    pub fn mask(&self, content: &str) -> String {
        if !self.enabled {
            return content.to_string();
        }
        let mut masked = content.to_string();
        for rule in &self.rules {
            masked = rule
                .key_value
                .replace_all(&masked, format!("${{1}}{MASK}"))
                .into_owned();
            masked = rule
                .json_value
                .replace_all(&masked, format!("${{1}}\"{MASK}\""))
                .into_owned();
        }
        masked
    }
}
