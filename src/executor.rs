//! Parallel fan-out of review calls.
//!
//! Each external job runs as its own task under a shared deadline; results
//! come back in input order so downstream consumers can address them
//! positionally. Quota bookkeeping happens as each task finishes, not when
//! results are merged.

use std::sync::Arc;

use crate::adapters::ReviewAdapter;
use crate::quota::QuotaMonitor;
use crate::types::{ReviewContext, Verdict};

/// One unit of fan-out work. Debate rounds give every adapter its own
/// prompt; round 1 repeats the same prompt across the batch.
pub struct ReviewJob {
    pub adapter: Arc<dyn ReviewAdapter>,
    pub prompt: String,
}

pub struct FanOutExecutor {
    quota: Arc<QuotaMonitor>,
}

impl FanOutExecutor {
    pub fn new(quota: Arc<QuotaMonitor>) -> Self {
        Self { quota }
    }

    /// Run all jobs concurrently. Returns exactly one verdict per job, in
    /// job order. The shared deadline is the largest timeout in the batch;
    /// each adapter additionally honors its own timeout inside `review`.
    /// Tasks still in flight at the deadline are aborted and their slots
    /// become failed verdicts with `error="timeout"`.
    pub async fn execute(&self, jobs: Vec<ReviewJob>, context: &ReviewContext) -> Vec<Verdict> {
        if jobs.is_empty() {
            return Vec::new();
        }

        let deadline = jobs
            .iter()
            .map(|job| job.adapter.timeout())
            .max()
            .expect("non-empty batch");
        let context = Arc::new(context.clone());

        let handles: Vec<_> = jobs
            .into_iter()
            .map(|job| {
                let quota = Arc::clone(&self.quota);
                let context = Arc::clone(&context);
                let name = job.adapter.name().to_string();
                let handle = tokio::spawn(async move {
                    let verdict = job.adapter.review(&job.prompt, &context).await;
                    // record as the task finishes, regardless of merge order
                    let record = if verdict.success {
                        quota.record_success(&verdict.adapter_name).await
                    } else {
                        let error = verdict.error.as_deref().unwrap_or("unknown error");
                        quota.record_failure(&verdict.adapter_name, error).await
                    };
                    if let Err(e) = record {
                        tracing::warn!(adapter = %verdict.adapter_name, "quota update failed: {e}");
                    }
                    verdict
                });
                (name, handle)
            })
            .collect();

        let quota = Arc::clone(&self.quota);
        let slots = handles.into_iter().map(|(name, handle)| {
            let quota = Arc::clone(&quota);
            async move {
                let abort = handle.abort_handle();
                match tokio::time::timeout(deadline, handle).await {
                    Ok(Ok(verdict)) => verdict,
                    Ok(Err(join_error)) => {
                        tracing::error!(adapter = %name, "review task failed: {join_error}");
                        Verdict::failure(&name, format!("task failed: {join_error}"))
                    }
                    Err(_) => {
                        abort.abort();
                        if let Err(e) = quota.record_failure(&name, "timeout").await {
                            tracing::warn!(adapter = %name, "quota update failed: {e}");
                        }
                        Verdict::failure(&name, "timeout")
                    }
                }
            }
        });

        futures::future::join_all(slots).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::StateStore;
    use crate::types::{Issue, Severity};
    use async_trait::async_trait;
    use std::time::Duration;

    struct ScriptedAdapter {
        name: String,
        severity: Severity,
        delay: Duration,
        fail_with: Option<String>,
        timeout: Duration,
    }

    impl ScriptedAdapter {
        fn ok(name: &str, severity: Severity, delay: Duration) -> Self {
            Self {
                name: name.to_string(),
                severity,
                delay,
                fail_with: None,
                timeout: Duration::from_secs(5),
            }
        }

        fn failing(name: &str, error: &str) -> Self {
            Self {
                name: name.to_string(),
                severity: Severity::Ok,
                delay: Duration::ZERO,
                fail_with: Some(error.to_string()),
                timeout: Duration::from_secs(5),
            }
        }
    }

    #[async_trait]
    impl ReviewAdapter for ScriptedAdapter {
        fn name(&self) -> &str {
            &self.name
        }

        fn timeout(&self) -> Duration {
            self.timeout
        }

        fn available(&self) -> bool {
            true
        }

        async fn review(&self, _prompt: &str, _context: &ReviewContext) -> Verdict {
            tokio::time::sleep(self.delay).await;
            if let Some(error) = &self.fail_with {
                return Verdict::failure(&self.name, error.clone());
            }
            Verdict {
                adapter_name: self.name.clone(),
                severity: self.severity,
                issues: vec![Issue::new("finding", self.severity)],
                raw_text: String::new(),
                success: true,
                error: None,
                duration_ms: 1,
                is_self_review: false,
            }
        }
    }

    fn executor() -> (tempfile::TempDir, FanOutExecutor, Arc<QuotaMonitor>) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(StateStore::new(dir.path()).unwrap());
        let quota = Arc::new(QuotaMonitor::new(store));
        (dir, FanOutExecutor::new(Arc::clone(&quota)), quota)
    }

    fn job(adapter: ScriptedAdapter) -> ReviewJob {
        ReviewJob {
            adapter: Arc::new(adapter),
            prompt: "review".to_string(),
        }
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let (_dir, executor, _quota) = executor();
        let verdicts = executor.execute(vec![], &ReviewContext::default()).await;
        assert!(verdicts.is_empty());
    }

    #[tokio::test]
    async fn test_results_keep_input_order() {
        let (_dir, executor, _quota) = executor();
        // the slow adapter comes first; order must still match input
        let jobs = vec![
            job(ScriptedAdapter::ok(
                "slow",
                Severity::High,
                Duration::from_millis(150),
            )),
            job(ScriptedAdapter::ok(
                "fast",
                Severity::Low,
                Duration::ZERO,
            )),
        ];
        let verdicts = executor.execute(jobs, &ReviewContext::default()).await;
        assert_eq!(verdicts.len(), 2);
        assert_eq!(verdicts[0].adapter_name, "slow");
        assert_eq!(verdicts[1].adapter_name, "fast");
    }

    #[tokio::test]
    async fn test_failures_keep_their_slot() {
        let (_dir, executor, quota) = executor();
        let jobs = vec![
            job(ScriptedAdapter::failing("broken", "connection refused")),
            job(ScriptedAdapter::ok("good", Severity::Ok, Duration::ZERO)),
        ];
        let verdicts = executor.execute(jobs, &ReviewContext::default()).await;
        assert!(!verdicts[0].success);
        assert!(verdicts[1].success);

        // quota observed one failure and one success
        let summary = quota.summary().await.unwrap();
        assert_eq!(summary["adapters"]["broken"]["failures"], 1);
        assert_eq!(summary["adapters"]["good"]["success"], 1);
    }

    #[tokio::test]
    async fn test_shared_deadline_times_out_stragglers() {
        let (_dir, executor, quota) = executor();
        let mut straggler =
            ScriptedAdapter::ok("straggler", Severity::High, Duration::from_secs(30));
        straggler.timeout = Duration::from_millis(300);
        let mut prompt_fast = ScriptedAdapter::ok("quick", Severity::Low, Duration::ZERO);
        prompt_fast.timeout = Duration::from_millis(100);

        let verdicts = executor
            .execute(
                vec![job(straggler), job(prompt_fast)],
                &ReviewContext::default(),
            )
            .await;

        assert_eq!(verdicts[0].error.as_deref(), Some("timeout"));
        assert!(!verdicts[0].success);
        assert!(verdicts[1].success);

        let summary = quota.summary().await.unwrap();
        assert_eq!(summary["adapters"]["straggler"]["failures"], 1);
    }
}
