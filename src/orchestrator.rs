//! Completion orchestrator: the top-level flow behind one hook invocation.
//!
//! Gates on the completion edge and the per-epoch review budget, assembles
//! the review context, fans review out to the self-review adapter and the
//! quota-filtered externals, escalates disagreement into a debate, and
//! assembles the continue/block decision. Exactly one audit event is emitted
//! per orchestration that passes the edge gate.

use std::sync::Arc;

use crate::adapters::{CopilotAdapter, GeminiAdapter, ReviewAdapter, SelfReviewAdapter};
use crate::audit::{AuditEvent, AuditSink, DebateAudit};
use crate::config::{HookConfig, HookPaths};
use crate::debate::{self, DebateEngine, DebateRound};
use crate::detector::CompletionDetector;
use crate::executor::{FanOutExecutor, ReviewJob};
use crate::intent::IntentExtractor;
use crate::keys::ApiKeyLoader;
use crate::prompts;
use crate::quota::QuotaMonitor;
use crate::state::{StateError, StateStore};
use crate::types::{HookInput, HookOutput, ReviewContext, Severity, Todo, Verdict};

/// Builds the external adapter set for a list of quota-approved names.
/// Re-invoked on every orchestration so cooldowns recorded earlier in the
/// process take effect on the next selection.
pub type AdapterFactory = Arc<dyn Fn(&[String]) -> Vec<Arc<dyn ReviewAdapter>> + Send + Sync>;

pub struct CompletionOrchestrator {
    config: HookConfig,
    paths: HookPaths,
    quota: Arc<QuotaMonitor>,
    detector: CompletionDetector,
    executor: FanOutExecutor,
    debate: DebateEngine,
    audit: AuditSink,
    self_adapter: SelfReviewAdapter,
    adapter_factory: AdapterFactory,
}

impl CompletionOrchestrator {
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
        let adapter_factory = default_adapter_factory(&config, &paths);
        Ok(Self {
            detector: CompletionDetector::new(store),
            executor: FanOutExecutor::new(Arc::clone(&quota)),
            debate: DebateEngine::from_config(&config),
            audit: AuditSink::completion(paths.log_dir()),
            self_adapter: SelfReviewAdapter::new(config.completion_review.use_subagent),
            quota,
            adapter_factory,
            config,
            paths,
        })
    }

    /// Replace the adapter construction, e.g. with scripted reviewers in
    /// tests.
    pub fn with_adapter_factory(mut self, factory: AdapterFactory) -> Self {
        self.adapter_factory = factory;
        self
    }

    pub async fn orchestrate(&self, input: HookInput) -> Result<HookOutput, StateError> {
        let session_id = input.session_id.clone();
        let todos = input.tool_input.todos.clone();

        // Gate 1: only the transition into "all done" triggers a review.
        let todo_state = self.detector.detect(&session_id, &todos).await?;
        if !todo_state.just_completed {
            return Ok(HookOutput::pass_through());
        }
        tracing::info!(
            session = %session_id,
            total = todo_state.total,
            "completion edge detected"
        );

        // Gate 2: bounded reviews per completion epoch.
        let max_reviews = self.config.completion_review.max_reviews;
        let review_count = self.detector.review_count(&session_id).await?;
        if review_count >= max_reviews {
            let mut event = AuditEvent::new("max_reviews_reached", &session_id);
            event.review_count = Some(review_count);
            self.audit.log(event).await;
            return Ok(HookOutput::message(format!(
                "[completion] review budget ({max_reviews}) reached, continuing."
            )));
        }
        self.detector.increment_review_count(&session_id).await?;

        let context = self.build_context(&input, todos);

        // Round 1: self-review inline, externals in parallel.
        let mut verdicts: Vec<Verdict> = Vec::new();
        if self.config.completion_review.include_self_review {
            verdicts.push(self.self_adapter.review("", &context).await);
        }
        let (adapters, externals) = self.run_external_round(&context).await?;
        verdicts.extend(externals);

        // Debate, when the round-1 externals disagree or find something severe.
        let mut debate_result: Option<(DebateRound, &'static str)> = None;
        let successful_externals: Vec<Verdict> = verdicts
            .iter()
            .filter(|v| v.success && !v.is_self_review)
            .cloned()
            .collect();
        if let Some(reason) = self.debate.needs_debate(&successful_externals) {
            tracing::info!(reason, "escalating to debate");
            let base_prompt = prompts::load_prompt(&self.paths, "completion_external");
            let round = self
                .debate
                .run(
                    &self.executor,
                    &adapters,
                    successful_externals,
                    &base_prompt,
                    &context,
                )
                .await;
            // debate verdicts replace the round-1 externals; self-review stays
            verdicts.retain(|v| v.is_self_review);
            verdicts.extend(round.verdicts.iter().cloned());
            debate_result = Some((round, reason));
        }

        self.log_audit(&session_id, review_count + 1, &context, &verdicts, &debate_result)
            .await;

        Ok(build_output(&verdicts, debate_result.as_ref().map(|(r, _)| r)))
    }

    fn build_context(&self, input: &HookInput, todos: Vec<Todo>) -> ReviewContext {
        let intent = input
            .transcript_path
            .as_deref()
            .map(|path| IntentExtractor.extract(path))
            .unwrap_or_default();

        ReviewContext {
            session_id: input.session_id.clone(),
            todos,
            combined_intent: intent.combined_intent,
            original_request: intent.original_request,
            message_count: intent.message_count,
            cwd: input.cwd.clone().unwrap_or_default(),
            ..ReviewContext::default()
        }
    }

    /// Select and run the external adapters: config-enabled, quota-available,
    /// locally available. The adapter set is rebuilt on every call.
    async fn run_external_round(
        &self,
        context: &ReviewContext,
    ) -> Result<(Vec<Arc<dyn ReviewAdapter>>, Vec<Verdict>), StateError> {
        if !self.config.completion_review.include_external_review {
            return Ok((Vec::new(), Vec::new()));
        }

        let enabled = &self.config.enabled_adapters;
        let available = self.quota.filter_available(enabled).await?;
        let mut adapters = (self.adapter_factory)(&available);
        adapters.retain(|adapter| adapter.available());
        if adapters.is_empty() {
            return Ok((Vec::new(), Vec::new()));
        }

        let base_prompt = prompts::load_prompt(&self.paths, "completion_external");
        let full_prompt = format!(
            "{}\n\n## Original user request:\n{}\n\n## Completed tasks:\n{}\n",
            base_prompt,
            if context.combined_intent.is_empty() {
                "N/A"
            } else {
                context.combined_intent.as_str()
            },
            crate::adapters::self_review::format_todos(&context.todos),
        );

        let jobs: Vec<ReviewJob> = adapters
            .iter()
            .map(|adapter| ReviewJob {
                adapter: Arc::clone(adapter),
                prompt: full_prompt.clone(),
            })
            .collect();

        let verdicts = self.executor.execute(jobs, context).await;
        Ok((adapters, verdicts))
    }

    async fn log_audit(
        &self,
        session_id: &str,
        review_count: u32,
        context: &ReviewContext,
        verdicts: &[Verdict],
        debate_result: &Option<(DebateRound, &'static str)>,
    ) {
        let mut event = AuditEvent::new("completion_review", session_id);
        event.review_count = Some(review_count);
        event.todo_count = Some(context.todos.len());
        event.intent_length = Some(context.combined_intent.chars().count());
        event.llm_results = Some(
            verdicts
                .iter()
                .filter(|v| !v.is_self_review)
                .filter_map(|v| serde_json::to_value(v).ok())
                .collect(),
        );
        event.quota_status = self.quota.summary().await.ok();
        if let Some((round, reason)) = debate_result {
            event.debate = Some(DebateAudit {
                triggered: true,
                reason: reason.to_string(),
                rounds: round.round_num,
                consensus_reached: round.consensus_reached,
                final_severity: round.final_severity,
            });
        }
        self.audit.log(event).await;
    }
}

/// Decision assembly: the self-review payload verbatim, findings when
/// anything surfaced, a debate summary when one ran. Only CRITICAL blocks.
fn build_output(verdicts: &[Verdict], debate_result: Option<&DebateRound>) -> HookOutput {
    let mut messages: Vec<String> = Vec::new();

    for verdict in verdicts.iter().filter(|v| v.is_self_review) {
        messages.push(verdict.raw_text.clone());
    }

    let successful_externals: Vec<&Verdict> = verdicts
        .iter()
        .filter(|v| !v.is_self_review && v.success)
        .collect();

    let mut final_severity = Severity::Ok;
    if let Some(round) = debate_result {
        final_severity = round.final_severity.unwrap_or(Severity::Ok);
        messages.push(debate::render_summary(round));
    } else if !successful_externals.is_empty() {
        final_severity = successful_externals
            .iter()
            .map(|v| v.severity)
            .max()
            .unwrap_or(Severity::Ok);

        if final_severity != Severity::Ok {
            messages.push(format!(
                "\n### External review findings ({final_severity}):"
            ));
            for verdict in &successful_externals {
                if verdict.issues.is_empty() {
                    continue;
                }
                messages.push(format!("\n**{}**:", verdict.adapter_name));
                for issue in &verdict.issues {
                    messages.push(format!("- [{}] {}", issue.severity, issue.description));
                    if let Some(suggestion) = &issue.suggestion {
                        messages.push(format!("  -> suggestion: {suggestion}"));
                    }
                }
            }
        }
    }

    let should_block = final_severity == Severity::Critical;
    if should_block {
        messages.push(
            "\n**CRITICAL issues found**: continuation is blocked. Resolve the issues above and retry."
                .to_string(),
        );
    }

    HookOutput {
        should_continue: !should_block,
        system_message: messages.join("\n"),
    }
}

pub(crate) fn default_adapter_factory(config: &HookConfig, paths: &HookPaths) -> AdapterFactory {
    let config = config.clone();
    let keys_path = paths.api_keys_path();
    Arc::new(move |names: &[String]| {
        let keys = ApiKeyLoader::new(&keys_path);
        let mut adapters: Vec<Arc<dyn ReviewAdapter>> = Vec::new();
        for name in names {
            match name.as_str() {
                "gemini" => adapters.push(Arc::new(GeminiAdapter::new(&config, &keys))),
                "copilot" => adapters.push(Arc::new(CopilotAdapter::new(&config))),
                other => tracing::warn!("unknown adapter '{other}' in enabled_adapters"),
            }
        }
        adapters
    })
}
