//! Gemini external reviewer, calling the REST API directly.

use std::time::{Duration, Instant};

use async_trait::async_trait;

use super::{build_external_prompt, verdict::parse_reply, ReviewAdapter};
use crate::config::HookConfig;
use crate::keys::ApiKeyLoader;
use crate::types::{ReviewContext, Verdict};

const API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

pub struct GeminiAdapter {
    model: String,
    api_key: Option<String>,
    base_url: String,
    client: reqwest::Client,
    timeout: Duration,
}

impl GeminiAdapter {
    /// Key resolution: a literal key in config wins, otherwise the loader
    /// (environment, then `api_keys.json`). A `${VAR}` placeholder in config
    /// is not a literal key.
    pub fn new(config: &HookConfig, keys: &ApiKeyLoader) -> Self {
        let api_key = config
            .gemini
            .api_key
            .as_deref()
            .filter(|k| !k.is_empty() && !k.starts_with("${"))
            .map(str::to_string)
            .or_else(|| keys.get("GEMINI_API_KEY"));

        let timeout = Duration::from_secs(config.timeout_seconds());
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            model: config.gemini.model.clone(),
            api_key,
            base_url: API_BASE.to_string(),
            client,
            timeout,
        }
    }

    async fn call_api(&self, key: &str, prompt: &str) -> Result<String, String> {
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, self.model, key
        );
        let body = serde_json::json!({
            "contents": [{ "parts": [{ "text": prompt }] }],
            "generationConfig": { "temperature": 0.1, "maxOutputTokens": 2000 }
        });

        // The URL carries the credential; it must never appear in errors or logs.
        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    "timeout".to_string()
                } else {
                    format!("request failed: {}", sanitize_error(&e))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(format!("API error {}: {}", status.as_u16(), error_body));
        }

        let data: serde_json::Value = response
            .json()
            .await
            .map_err(|e| format!("invalid response body: {}", sanitize_error(&e)))?;

        data.pointer("/candidates/0/content/parts/0/text")
            .and_then(serde_json::Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| "empty response from gemini".to_string())
    }
}

/// reqwest errors can echo the request URL, and ours carries the key as a
/// query parameter. Reduce the error to its kind so the credential cannot
/// leak into quota records or audit logs.
fn sanitize_error(e: &reqwest::Error) -> &'static str {
    if e.is_connect() {
        "connection error"
    } else if e.is_body() || e.is_decode() {
        "response decode error"
    } else if e.is_request() {
        "request error"
    } else {
        "transport error"
    }
}

#[async_trait]
impl ReviewAdapter for GeminiAdapter {
    fn name(&self) -> &str {
        "gemini"
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn available(&self) -> bool {
        self.api_key.is_some()
    }

    async fn review(&self, prompt: &str, context: &ReviewContext) -> Verdict {
        let Some(key) = self.api_key.clone() else {
            return Verdict::failure(self.name(), "gemini not available (no API key)");
        };

        let full_prompt = build_external_prompt(prompt, context);
        let start = Instant::now();

        match self.call_api(&key, &full_prompt).await {
            Ok(reply) => {
                let duration_ms = start.elapsed().as_millis() as u64;
                tracing::debug!(
                    adapter = self.name(),
                    duration_ms,
                    "gemini review completed"
                );
                parse_reply(self.name(), &reply).with_duration(duration_ms)
            }
            Err(error) => {
                let mut verdict = Verdict::failure(self.name(), error);
                verdict.duration_ms = start.elapsed().as_millis() as u64;
                verdict
            }
        }
    }
}
