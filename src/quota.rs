//! Per-adapter quota tracking with cooldown-based circuit breaking.
//!
//! This is a circuit breaker, not a rate limiter: vendors enforce their own
//! quotas, the monitor only keeps the orchestrator from wasting latency on
//! adapters that are probably broken right now. State lives under the shared
//! `quota` key and rolls over daily.

use std::sync::Arc;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::state::{JsonMap, StateError, StateKey, StateStore};

/// Error-text fragments that indicate a vendor-signalled quota problem.
const QUOTA_KEYWORDS: [&str; 6] = ["quota", "limit", "exceeded", "rate", "429", "exhausted"];

/// Consecutive failures before an adapter is treated as exhausted.
const EXHAUSTION_THRESHOLD: u32 = 3;

/// How long an exhausted adapter stays out of rotation, in minutes.
const COOLDOWN_MINUTES: i64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum QuotaStatus {
    Available,
    Low,
    Exhausted,
    #[default]
    Unknown,
}

/// Per-adapter quota record, persisted per calendar day.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AdapterQuota {
    pub adapter_name: String,
    pub status: QuotaStatus,
    pub last_success: Option<String>,
    pub last_failure: Option<String>,
    pub success_count: u32,
    pub failure_count: u32,
    pub consecutive_failures: u32,
    pub cooldown_until: Option<String>,
}

pub struct QuotaMonitor {
    store: Arc<StateStore>,
}

impl QuotaMonitor {
    pub fn new(store: Arc<StateStore>) -> Self {
        Self { store }
    }

    /// Clear failure streak and cooldown after a successful call.
    pub async fn record_success(&self, adapter_name: &str) -> Result<(), StateError> {
        let name = adapter_name.to_string();
        self.mutate(move |quotas| {
            let quota = entry(quotas, &name);
            quota.success_count += 1;
            quota.consecutive_failures = 0;
            quota.last_success = Some(Local::now().to_rfc3339());
            quota.status = QuotaStatus::Available;
            quota.cooldown_until = None;
        })
        .await
    }

    /// Record a failed call and reclassify the adapter. Quota-keyword errors
    /// and long failure streaks open the circuit for [`COOLDOWN`].
    pub async fn record_failure(
        &self,
        adapter_name: &str,
        error: &str,
    ) -> Result<(), StateError> {
        let name = adapter_name.to_string();
        let error_lower = error.to_lowercase();
        self.mutate(move |quotas| {
            let quota = entry(quotas, &name);
            quota.failure_count += 1;
            quota.consecutive_failures += 1;
            quota.last_failure = Some(Local::now().to_rfc3339());

            let is_quota_error = QUOTA_KEYWORDS.iter().any(|kw| error_lower.contains(kw));
            if is_quota_error || quota.consecutive_failures >= EXHAUSTION_THRESHOLD {
                quota.status = QuotaStatus::Exhausted;
                let cooldown_end = Local::now() + chrono::Duration::minutes(COOLDOWN_MINUTES);
                quota.cooldown_until = Some(cooldown_end.to_rfc3339());
            } else if quota.consecutive_failures >= 2 {
                quota.status = QuotaStatus::Low;
            } else {
                quota.status = QuotaStatus::Unknown;
            }
        })
        .await
    }

    /// Whether the orchestrator should bother calling this adapter. An
    /// expired cooldown is cleared in place and re-opens the adapter.
    pub async fn is_available(&self, adapter_name: &str) -> Result<bool, StateError> {
        let name = adapter_name.to_string();
        self.mutate_with(move |quotas| {
            let Some(quota) = quotas.iter_mut().find(|q| q.adapter_name == name) else {
                return true;
            };

            if let Some(until) = quota
                .cooldown_until
                .as_deref()
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            {
                if Local::now() < until {
                    return false;
                }
                // cooldown expired: give the adapter another chance
                quota.status = QuotaStatus::Unknown;
                quota.consecutive_failures = 0;
                quota.cooldown_until = None;
            }

            quota.status != QuotaStatus::Exhausted
        })
        .await
    }

    /// Subset of `names` worth attempting right now.
    pub async fn filter_available(&self, names: &[String]) -> Result<Vec<String>, StateError> {
        let mut available = Vec::with_capacity(names.len());
        for name in names {
            if self.is_available(name).await? {
                available.push(name.clone());
            }
        }
        Ok(available)
    }

    /// Compact per-adapter summary for the audit event.
    pub async fn summary(&self) -> Result<Value, StateError> {
        let quotas = self
            .mutate_with(|quotas| quotas.clone())
            .await?;
        let mut adapters = serde_json::Map::new();
        for quota in quotas {
            adapters.insert(
                quota.adapter_name.clone(),
                serde_json::json!({
                    "status": quota.status,
                    "success": quota.success_count,
                    "failures": quota.failure_count,
                }),
            );
        }
        Ok(serde_json::json!({
            "date": today(),
            "adapters": adapters,
        }))
    }

    async fn mutate<F>(&self, f: F) -> Result<(), StateError>
    where
        F: FnOnce(&mut Vec<AdapterQuota>) + Send + 'static,
    {
        self.mutate_with(move |quotas| f(quotas)).await
    }

    /// All quota mutation funnels through here: load (with daily rollover),
    /// apply, persist — one locked read-modify-write on the shared key.
    async fn mutate_with<T, F>(&self, f: F) -> Result<T, StateError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Vec<AdapterQuota>) -> T + Send + 'static,
    {
        self.store
            .update("", StateKey::Quota, move |map| {
                let mut quotas = load_quotas(map);
                let out = f(&mut quotas);
                store_quotas(map, &quotas);
                out
            })
            .await
    }
}

fn entry<'a>(quotas: &'a mut Vec<AdapterQuota>, name: &str) -> &'a mut AdapterQuota {
    if let Some(idx) = quotas.iter().position(|q| q.adapter_name == name) {
        return &mut quotas[idx];
    }
    quotas.push(AdapterQuota {
        adapter_name: name.to_string(),
        ..AdapterQuota::default()
    });
    quotas.last_mut().expect("just pushed")
}

fn today() -> String {
    Local::now().format("%Y-%m-%d").to_string()
}

/// Deserialize the quota map, discarding it wholesale when the stored date is
/// not today.
fn load_quotas(map: &JsonMap) -> Vec<AdapterQuota> {
    let stored_date = map.get("date").and_then(Value::as_str);
    if stored_date != Some(today().as_str()) {
        return Vec::new();
    }
    let Some(Value::Object(entries)) = map.get("quotas") else {
        return Vec::new();
    };
    entries
        .iter()
        .map(|(name, value)| {
            let mut quota: AdapterQuota =
                serde_json::from_value(value.clone()).unwrap_or_default();
            quota.adapter_name = name.clone();
            quota
        })
        .collect()
}

fn store_quotas(map: &mut JsonMap, quotas: &[AdapterQuota]) {
    map.clear();
    map.insert("date".to_string(), Value::from(today()));
    map.insert(
        "updated_at".to_string(),
        Value::from(Local::now().to_rfc3339()),
    );
    let mut entries = serde_json::Map::new();
    for quota in quotas {
        if let Ok(value) = serde_json::to_value(quota) {
            entries.insert(quota.adapter_name.clone(), value);
        }
    }
    map.insert("quotas".to_string(), Value::Object(entries));
}
