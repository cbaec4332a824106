//! Completion-edge detection over the assistant's todo list.
//!
//! Distinguishes "just now completed" from "still complete since last time"
//! by comparing the current list against the snapshot persisted for the
//! session. The whole comparison-and-persist is one locked read-modify-write,
//! so concurrent invocations of the same session see exactly one edge.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::state::{StateError, StateKey, StateStore};
use crate::types::Todo;

/// Outcome of one detection call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TodoState {
    /// Every todo in a non-empty list is completed.
    pub all_completed: bool,
    /// This call observed the transition into `all_completed`.
    pub just_completed: bool,
    pub total: usize,
    pub completed: usize,
}

/// The snapshot persisted under the session's `todo` key.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TodoSnapshot {
    pub all_completed: bool,
    pub total: usize,
    pub completed: usize,
    #[serde(default)]
    pub todos: Vec<Todo>,
    #[serde(default)]
    pub updated_at: String,
    #[serde(default)]
    pub review_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_review_at: Option<String>,
}

pub struct CompletionDetector {
    store: Arc<StateStore>,
}

impl CompletionDetector {
    pub fn new(store: Arc<StateStore>) -> Self {
        Self { store }
    }

    /// Compare `todos` with the previous snapshot, persist the new snapshot,
    /// and report whether this call crossed the completion edge.
    ///
    /// `review_count` carries across complete observations and resets on a
    /// not-yet-complete one, so each completion epoch gets a fresh budget.
    /// An empty list never completes, and re-opening any todo re-arms the
    /// edge for the next full completion.
    pub async fn detect(
        &self,
        session_id: &str,
        todos: &[Todo],
    ) -> Result<TodoState, StateError> {
        let total = todos.len();
        let completed = todos.iter().filter(|t| t.is_completed()).count();
        let all_completed = total > 0 && completed == total;

        let snapshot_todos = todos.to_vec();
        let state = self
            .store
            .update(session_id, StateKey::Todo, move |map| {
                let prev_all_completed = map
                    .get("all_completed")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                let just_completed = all_completed && !prev_all_completed;

                let review_count = if all_completed {
                    map.get("review_count")
                        .and_then(Value::as_u64)
                        .unwrap_or(0)
                } else {
                    0
                };
                let last_review_at = map
                    .get("last_review_at")
                    .and_then(Value::as_str)
                    .map(str::to_string);

                let snapshot = TodoSnapshot {
                    all_completed,
                    total,
                    completed,
                    todos: snapshot_todos,
                    updated_at: chrono::Local::now().to_rfc3339(),
                    review_count: review_count as u32,
                    last_review_at,
                };
                if let Ok(Value::Object(next)) = serde_json::to_value(&snapshot) {
                    *map = next;
                }

                TodoState {
                    all_completed,
                    just_completed,
                    total,
                    completed,
                }
            })
            .await?;

        Ok(state)
    }

    /// The review budget already spent in the current complete epoch.
    pub async fn review_count(&self, session_id: &str) -> Result<u32, StateError> {
        let map = self.store.read(session_id, StateKey::Todo).await?;
        Ok(map
            .get("review_count")
            .and_then(Value::as_u64)
            .unwrap_or(0) as u32)
    }

    /// Bump the review counter and stamp `last_review_at`.
    pub async fn increment_review_count(&self, session_id: &str) -> Result<u32, StateError> {
        self.store
            .update(session_id, StateKey::Todo, |map| {
                let next = map
                    .get("review_count")
                    .and_then(Value::as_u64)
                    .unwrap_or(0) as u32
                    + 1;
                map.insert("review_count".to_string(), Value::from(next));
                map.insert(
                    "last_review_at".to_string(),
                    Value::from(chrono::Local::now().to_rfc3339()),
                );
                next
            })
            .await
    }

    /// Reset the budget when a new epoch of work begins.
    pub async fn reset_review_count(&self, session_id: &str) -> Result<(), StateError> {
        self.store
            .update(session_id, StateKey::Todo, |map| {
                map.insert("review_count".to_string(), Value::from(0));
            })
            .await
    }
}
