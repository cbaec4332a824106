//! End-to-end scenarios for the completion orchestrator, driven through
//! scripted reviewer adapters and a temp-dir installation root.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use reviewgate::adapters::ReviewAdapter;
use reviewgate::config::{HookConfig, HookPaths};
use reviewgate::orchestrator::{AdapterFactory, CompletionOrchestrator};
use reviewgate::quota::QuotaMonitor;
use reviewgate::state::{StateKey, StateStore};
use reviewgate::types::{HookInput, Issue, ReviewContext, Severity, Verdict};

/// Reviewer stand-in that replays a queue of scripted verdicts, one per
/// round, and counts how often it was actually called.
struct ScriptedAdapter {
    name: String,
    replies: Mutex<VecDeque<(Severity, Vec<Issue>)>>,
    calls: Arc<AtomicUsize>,
}

impl ScriptedAdapter {
    fn new(name: &str, replies: Vec<(Severity, Vec<Issue>)>, calls: Arc<AtomicUsize>) -> Self {
        Self {
            name: name.to_string(),
            replies: Mutex::new(replies.into()),
            calls,
        }
    }
}

#[async_trait]
impl ReviewAdapter for ScriptedAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(5)
    }

    fn available(&self) -> bool {
        true
    }

    async fn review(&self, _prompt: &str, _context: &ReviewContext) -> Verdict {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let (severity, issues) = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or((Severity::Ok, Vec::new()));
        Verdict {
            adapter_name: self.name.clone(),
            severity,
            issues,
            raw_text: String::new(),
            success: true,
            error: None,
            duration_ms: 1,
            is_self_review: false,
        }
    }
}

type Script = Vec<(String, Vec<(Severity, Vec<Issue>)>)>;

/// Factory that hands out scripted adapters for whatever names survive the
/// quota filter.
fn scripted_factory(script: Script, calls: Arc<AtomicUsize>) -> AdapterFactory {
    let script = Arc::new(script);
    Arc::new(move |names: &[String]| {
        script
            .iter()
            .filter(|(name, _)| names.contains(name))
            .map(|(name, replies)| {
                Arc::new(ScriptedAdapter::new(
                    name,
                    replies.clone(),
                    Arc::clone(&calls),
                )) as Arc<dyn ReviewAdapter>
            })
            .collect()
    })
}

fn hook_input(session_id: &str, todos: serde_json::Value) -> HookInput {
    serde_json::from_value(json!({
        "session_id": session_id,
        "tool_input": { "todos": todos },
    }))
    .unwrap()
}

fn issue(description: &str, severity: Severity) -> Issue {
    Issue::new(description, severity)
}

struct Harness {
    _dir: tempfile::TempDir,
    paths: HookPaths,
    orchestrator: CompletionOrchestrator,
    calls: Arc<AtomicUsize>,
}

fn harness(config: HookConfig, script: Script) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let paths = HookPaths::new(dir.path());
    let calls = Arc::new(AtomicUsize::new(0));
    let orchestrator = CompletionOrchestrator::new(config, paths.clone())
        .unwrap()
        .with_adapter_factory(scripted_factory(script, Arc::clone(&calls)));
    Harness {
        _dir: dir,
        paths,
        orchestrator,
        calls,
    }
}

fn audit_lines(paths: &HookPaths) -> Vec<serde_json::Value> {
    let path = paths.log_dir().join(format!(
        "completion-audit-{}.jsonl",
        chrono::Local::now().format("%Y-%m-%d")
    ));
    std::fs::read_to_string(path)
        .unwrap_or_default()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

async fn review_count(paths: &HookPaths, session_id: &str) -> u64 {
    let store = StateStore::new(paths.state_dir()).unwrap();
    store
        .read(session_id, StateKey::Todo)
        .await
        .unwrap()
        .get("review_count")
        .and_then(serde_json::Value::as_u64)
        .unwrap_or(0)
}

// S1: a list with an unfinished todo passes straight through, no audit line.
#[tokio::test]
async fn scenario_not_yet_complete_passes_through() {
    let h = harness(HookConfig::default(), vec![]);
    let input = hook_input(
        "s1",
        json!([
            {"content": "a", "status": "completed"},
            {"content": "b", "status": "in_progress"},
        ]),
    );

    let output = h.orchestrator.orchestrate(input).await.unwrap();
    assert!(output.should_continue);
    assert_eq!(output.system_message, "");
    assert!(audit_lines(&h.paths).is_empty());
}

// S2: the first full completion triggers a review; with no externals the
// message is the self-review prompt.
#[tokio::test]
async fn scenario_first_completion_triggers_self_review() {
    let h = harness(HookConfig::default(), vec![]);
    let input = hook_input("s2", json!([{"content": "a", "status": "completed"}]));

    let output = h.orchestrator.orchestrate(input).await.unwrap();
    assert!(output.should_continue);
    assert!(output.system_message.contains("code-reviewer"));
    assert_eq!(review_count(&h.paths, "s2").await, 1);

    let lines = audit_lines(&h.paths);
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0]["event_type"], "completion_review");
    assert_eq!(lines[0]["review_count"], 1);
    assert_eq!(lines[0]["todo_count"], 1);
}

// S3: repeating the identical completed list is idempotent.
#[tokio::test]
async fn scenario_repeat_invocation_is_idempotent() {
    let h = harness(HookConfig::default(), vec![]);
    let input = hook_input("s3", json!([{"content": "a", "status": "completed"}]));

    let first = h.orchestrator.orchestrate(input.clone()).await.unwrap();
    assert!(!first.system_message.is_empty());

    let second = h.orchestrator.orchestrate(input).await.unwrap();
    assert!(second.should_continue);
    assert_eq!(second.system_message, "");
    assert_eq!(review_count(&h.paths, "s3").await, 1);
    assert_eq!(audit_lines(&h.paths).len(), 1);
}

// S4: a CRITICAL external verdict blocks continuation.
#[tokio::test]
async fn scenario_critical_blocks() {
    let mut config = HookConfig::default();
    config.enabled_adapters = vec!["mock".to_string()];
    let script = vec![(
        "mock".to_string(),
        vec![(
            Severity::Critical,
            vec![issue("hard-coded credential", Severity::Critical)],
        )],
    )];
    let h = harness(config, script);

    let input = hook_input("s4", json!([{"content": "a", "status": "completed"}]));
    let output = h.orchestrator.orchestrate(input).await.unwrap();

    assert!(!output.should_continue);
    assert!(output.system_message.contains("CRITICAL"));
    assert!(output.system_message.contains("hard-coded credential"));
}

// S5: HIGH warns but does not block.
#[tokio::test]
async fn scenario_high_warns_without_blocking() {
    let mut config = HookConfig::default();
    config.enabled_adapters = vec!["mock".to_string()];
    let script = vec![(
        "mock".to_string(),
        vec![(
            Severity::High,
            vec![issue("missing error handling", Severity::High)],
        )],
    )];
    let h = harness(config, script);

    let input = hook_input("s5", json!([{"content": "a", "status": "completed"}]));
    let output = h.orchestrator.orchestrate(input).await.unwrap();

    assert!(output.should_continue);
    assert!(output.system_message.contains("HIGH"));
    assert!(output.system_message.contains("missing error handling"));
}

// S6: two-step disagreement escalates into a debate that converges on HIGH
// in round 2.
#[tokio::test]
async fn scenario_debate_resolves_disagreement() {
    let mut config = HookConfig::default();
    config.enabled_adapters = vec!["a".to_string(), "b".to_string()];
    config.debate.enabled = true;
    config.conflict_resolution.weights.insert("a".to_string(), 1.0);
    config.conflict_resolution.weights.insert("b".to_string(), 2.0);

    let script = vec![
        (
            "a".to_string(),
            vec![
                (Severity::Ok, vec![]),
                (Severity::Medium, vec![issue("agreed: risky unwrap", Severity::Medium)]),
            ],
        ),
        (
            "b".to_string(),
            vec![
                (Severity::High, vec![issue("risky unwrap", Severity::High)]),
                (Severity::High, vec![issue("risky unwrap", Severity::High)]),
            ],
        ),
    ];
    let h = harness(config, script);

    let input = hook_input("s6", json!([{"content": "a", "status": "completed"}]));
    let output = h.orchestrator.orchestrate(input).await.unwrap();

    // HIGH does not block, and the debate summary names round 2 and HIGH
    assert!(output.should_continue);
    assert!(output.system_message.contains("round 2"));
    assert!(output.system_message.contains("HIGH"));

    let lines = audit_lines(&h.paths);
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0]["debate"]["rounds"], 2);
    assert_eq!(lines[0]["debate"]["consensus_reached"], true);
    assert_eq!(lines[0]["debate"]["final_severity"], "HIGH");
}

// S7: an adapter in cooldown is filtered out before any transport attempt.
#[tokio::test]
async fn scenario_quota_exhaustion_short_circuits() {
    let mut config = HookConfig::default();
    config.enabled_adapters = vec!["x".to_string()];
    let script = vec![(
        "x".to_string(),
        vec![(Severity::Critical, vec![issue("should never appear", Severity::Critical)])],
    )];
    let h = harness(config, script);

    // pre-seed the quota store with a vendor-signalled quota failure
    let store = Arc::new(StateStore::new(h.paths.state_dir()).unwrap());
    let quota = QuotaMonitor::new(store);
    quota.record_failure("x", "quota exceeded").await.unwrap();
    assert!(!quota.is_available("x").await.unwrap());

    let input = hook_input("s7", json!([{"content": "a", "status": "completed"}]));
    let output = h.orchestrator.orchestrate(input).await.unwrap();

    assert!(output.should_continue);
    assert_eq!(h.calls.load(Ordering::SeqCst), 0);
    assert!(!output.system_message.contains("should never appear"));
}

// Budget gate: an edge arriving with the epoch's budget already spent passes
// through with the budget message and without calling reviewers.
#[tokio::test]
async fn scenario_review_budget_exhausts() {
    let mut config = HookConfig::default();
    config.enabled_adapters = vec!["mock".to_string()];
    let script = vec![(
        "mock".to_string(),
        vec![(Severity::Ok, vec![]), (Severity::Ok, vec![])],
    )];
    let h = harness(config, script);

    let done = hook_input("s8", json!([{"content": "a", "status": "completed"}]));
    h.orchestrator.orchestrate(done.clone()).await.unwrap();
    assert_eq!(h.calls.load(Ordering::SeqCst), 1);
    assert_eq!(review_count(&h.paths, "s8").await, 1);

    // re-arm the edge while pinning the counter at the cap, as a looping
    // assistant that keeps re-completing the same epoch would
    let store = StateStore::new(h.paths.state_dir()).unwrap();
    store
        .update("s8", StateKey::Todo, |map| {
            map.insert("all_completed".to_string(), json!(false));
            map.insert("review_count".to_string(), json!(3));
        })
        .await
        .unwrap();

    let output = h.orchestrator.orchestrate(done).await.unwrap();
    assert!(output.should_continue);
    assert!(output.system_message.contains("review budget"));
    // no reviewer ran for the budget-exhausted edge
    assert_eq!(h.calls.load(Ordering::SeqCst), 1);

    let lines = audit_lines(&h.paths);
    assert_eq!(lines.last().unwrap()["event_type"], "max_reviews_reached");
}

// A failed external yields a neutral verdict and never blocks.
#[tokio::test]
async fn scenario_all_externals_failing_is_ok() {
    struct FailingAdapter;

    #[async_trait]
    impl ReviewAdapter for FailingAdapter {
        fn name(&self) -> &str {
            "down"
        }
        fn timeout(&self) -> Duration {
            Duration::from_secs(5)
        }
        fn available(&self) -> bool {
            true
        }
        async fn review(&self, _prompt: &str, _context: &ReviewContext) -> Verdict {
            Verdict::failure("down", "connection refused")
        }
    }

    let mut config = HookConfig::default();
    config.enabled_adapters = vec!["down".to_string()];
    config.completion_review.include_self_review = false;

    let dir = tempfile::tempdir().unwrap();
    let paths = HookPaths::new(dir.path());
    let orchestrator = CompletionOrchestrator::new(config, paths.clone())
        .unwrap()
        .with_adapter_factory(Arc::new(|names: &[String]| {
            names
                .iter()
                .map(|_| Arc::new(FailingAdapter) as Arc<dyn ReviewAdapter>)
                .collect()
        }));

    let input = hook_input("s9", json!([{"content": "a", "status": "completed"}]));
    let output = orchestrator.orchestrate(input).await.unwrap();
    assert!(output.should_continue);

    // the failure reached the quota monitor
    let lines = audit_lines(&paths);
    assert_eq!(lines[0]["quota_status"]["adapters"]["down"]["failures"], 1);
    assert_eq!(lines[0]["llm_results"][0]["success"], false);
    assert_eq!(lines[0]["llm_results"][0]["severity"], "OK");
}
