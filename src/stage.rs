//! Stage review orchestrator: per-tool-call review with override, debounce,
//! retry budgets, and configurable conflict resolution.
//!
//! Runs independently of the completion flow over disjoint state keys; the
//! two never read each other's bookkeeping.

use std::sync::Arc;
use std::time::Duration;

use crate::audit::{AuditEvent, AuditSink};
use crate::config::{HookConfig, HookPaths};
use crate::executor::{FanOutExecutor, ReviewJob};
use crate::orchestrator::AdapterFactory;
use crate::prompts;
use crate::quota::QuotaMonitor;
use crate::security::SensitiveMasker;
use crate::state::{StateError, StateStore};
use crate::types::{HookInput, HookOutput, ReviewContext, Severity, Verdict};

/// Environment switch that skips every stage review for the invocation.
const SKIP_ENV: &str = "REVIEWGATE_SKIP";

pub struct StageOrchestrator {
    config: HookConfig,
    paths: HookPaths,
    store: Arc<StateStore>,
    quota: Arc<QuotaMonitor>,
    executor: FanOutExecutor,
    masker: SensitiveMasker,
    audit: AuditSink,
    adapter_factory: AdapterFactory,
}

impl StageOrchestrator {
    pub fn new(config: HookConfig, paths: HookPaths) -> Result<Self, StateError> {
        let store = Arc::new(StateStore::new(paths.state_dir())?);
        Self::with_store(config, paths, store)
    }

    pub fn with_store(
        config: HookConfig,
        paths: HookPaths,
        store: Arc<StateStore>,
    ) -> Result<Self, StateError> {
        let quota = Arc::new(QuotaMonitor::new(Arc::clone(&store)));
        let adapter_factory = crate::orchestrator::default_adapter_factory(&config, &paths);
        Ok(Self {
            executor: FanOutExecutor::new(Arc::clone(&quota)),
            masker: SensitiveMasker::new(&config.security),
            audit: AuditSink::stage(paths.log_dir()),
            store,
            quota,
            adapter_factory,
            config,
            paths,
        })
    }

    pub fn with_adapter_factory(mut self, factory: AdapterFactory) -> Self {
        self.adapter_factory = factory;
        self
    }

    pub async fn orchestrate(
        &self,
        stage: &str,
        input: HookInput,
    ) -> Result<HookOutput, StateError> {
        let context = self.extract_context(&input);
        let session_id = context.session_id.clone();

        if self.check_override(&session_id).await? {
            let mut event = AuditEvent::new("override", &session_id);
            event.stage = Some(stage.to_string());
            self.audit.log(event).await;
            return Ok(HookOutput::message(format!(
                "[review:{stage}] skipped by override"
            )));
        }

        if self.should_debounce(&session_id, stage).await? {
            return Ok(HookOutput::pass_through());
        }
        self.store.touch_stage(&session_id, stage).await?;

        let verdicts = self.run_reviews(stage, &context).await?;
        let final_severity = self.resolve_conflict(&verdicts);
        let mut message = build_system_message(&verdicts, final_severity, stage);

        // HIGH and above block until the per-stage retry budget runs out,
        // then degrade to a warning.
        let mut should_continue = true;
        if final_severity >= Severity::High {
            let max_retries = self.config.max_retries_for(stage);
            let retry_count = self.store.retry_count(&session_id, stage).await?;
            if retry_count < max_retries {
                self.store.increment_retry_count(&session_id, stage).await?;
                should_continue = false;
                message.push_str(&format!("\n\n(retry {}/{})", retry_count + 1, max_retries));
            } else {
                message.push_str(&format!(
                    "\n\nRetry budget ({max_retries}) reached; continuing with warnings."
                ));
            }
        }

        let mut event = AuditEvent::new("stage_review", &session_id);
        event.stage = Some(stage.to_string());
        event.llm_results = Some(
            verdicts
                .iter()
                .filter_map(|v| serde_json::to_value(v).ok())
                .collect(),
        );
        event.quota_status = self.quota.summary().await.ok();
        event.final_severity = Some(final_severity);
        event.continue_decision = Some(should_continue);
        self.audit.log(event).await;

        Ok(HookOutput {
            should_continue,
            system_message: message,
        })
    }

    /// Pull the reviewable payload out of the tool input. `code` and `diff`
    /// are masked here, before any adapter sees them.
    fn extract_context(&self, input: &HookInput) -> ReviewContext {
        let mut context = ReviewContext {
            session_id: input.session_id.clone(),
            cwd: input.cwd.clone().unwrap_or_default(),
            ..ReviewContext::default()
        };

        let tool_input = &input.tool_input;
        if let (Some(old), Some(new)) = (&tool_input.old_string, &tool_input.new_string) {
            context.file_path = tool_input.file_path.clone();
            context.diff = Some(self.masker.mask(&format!("- {old}\n+ {new}")));
            context.code = Some(self.masker.mask(new));
        } else if let Some(content) = &tool_input.content {
            context.file_path = tool_input.file_path.clone();
            context.code = Some(self.masker.mask(content));
        } else if !tool_input.todos.is_empty() {
            context.todos = tool_input.todos.clone();
        }

        context
    }

    async fn check_override(&self, session_id: &str) -> Result<bool, StateError> {
        if !self.config.override_.enabled {
            return Ok(false);
        }
        if std::env::var(SKIP_ENV).as_deref() == Ok("1") {
            return Ok(true);
        }
        self.store.check_and_consume_override(session_id).await
    }

    async fn should_debounce(&self, session_id: &str, stage: &str) -> Result<bool, StateError> {
        let debounce = &self.config.debounce;
        if !debounce.enabled || !debounce.stages.iter().any(|s| s == stage) {
            return Ok(false);
        }
        self.store
            .should_debounce(session_id, stage, Duration::from_secs_f64(debounce.seconds))
            .await
    }

    async fn run_reviews(
        &self,
        stage: &str,
        context: &ReviewContext,
    ) -> Result<Vec<Verdict>, StateError> {
        let available = self
            .quota
            .filter_available(&self.config.enabled_adapters)
            .await?;
        let mut adapters = (self.adapter_factory)(&available);
        adapters.retain(|adapter| adapter.available());
        if adapters.is_empty() {
            return Ok(Vec::new());
        }

        let prompt = prompts::load_prompt(&self.paths, stage);
        let jobs: Vec<ReviewJob> = adapters
            .into_iter()
            .map(|adapter| ReviewJob {
                adapter,
                prompt: prompt.clone(),
            })
            .collect();
        Ok(self.executor.execute(jobs, context).await)
    }

    /// Reconcile reviewer severities under the configured policy.
    fn resolve_conflict(&self, verdicts: &[Verdict]) -> Severity {
        let successful: Vec<&Verdict> = verdicts.iter().filter(|v| v.success).collect();
        if successful.is_empty() {
            return Severity::Ok;
        }
        let highest = successful
            .iter()
            .map(|v| v.severity)
            .max()
            .unwrap_or(Severity::Ok);

        match self
            .config
            .conflict_resolution
            .policy
            .as_deref()
            .unwrap_or("conservative")
        {
            "majority_vote" => {
                let mut counts = std::collections::HashMap::new();
                for verdict in &successful {
                    *counts.entry(verdict.severity).or_insert(0usize) += 1;
                }
                let max_count = counts.values().copied().max().unwrap_or(0);
                counts
                    .into_iter()
                    .filter(|(_, count)| *count == max_count)
                    .map(|(severity, _)| severity)
                    .max()
                    .unwrap_or(highest)
            }
            "weighted_vote" => {
                let weights = &self.config.conflict_resolution.weights;
                successful
                    .iter()
                    .max_by(|a, b| {
                        let score = |v: &Verdict| {
                            weights.get(&v.adapter_name).copied().unwrap_or(1.0)
                                * v.severity.score() as f64
                        };
                        score(a)
                            .partial_cmp(&score(b))
                            .unwrap_or(std::cmp::Ordering::Equal)
                    })
                    .map(|v| v.severity)
                    .unwrap_or(highest)
            }
            // "conservative" and "highest_severity"
            _ => highest,
        }
    }
}

fn build_system_message(verdicts: &[Verdict], final_severity: Severity, stage: &str) -> String {
    if final_severity == Severity::Ok {
        return format!("[review:{stage}] passed");
    }

    let mut messages = vec![format!(
        "[review:{stage}] {final_severity} issues found:"
    )];
    for verdict in verdicts.iter().filter(|v| v.success && !v.issues.is_empty()) {
        messages.push(format!("\n### {} feedback:", verdict.adapter_name));
        for issue in &verdict.issues {
            messages.push(format!("- [{}] {}", issue.severity, issue.description));
            if let Some(suggestion) = &issue.suggestion {
                messages.push(format!("  -> suggestion: {suggestion}"));
            }
        }
    }

    if final_severity >= Severity::High {
        messages.push("\nFix the issues above.".to_string());
    }

    messages.join("\n")
}
