use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use relay_stream::CancelToken;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Identifies one relayed bot task.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskKey {
    pub bot_type: String,
    pub task_id: String,
}

impl TaskKey {
    pub fn new(bot_type: impl Into<String>, task_id: impl Into<String>) -> Self {
        Self {
            bot_type: bot_type.into(),
            task_id: task_id.into(),
        }
    }
}

impl fmt::Display for TaskKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.bot_type, self.task_id)
    }
}

/// Cancellation slots for active tasks, at most one per [`TaskKey`].
#[derive(Clone, Default)]
pub struct TaskRegistry {
    tasks: Arc<DashMap<TaskKey, CancelToken>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims the slot for `key`, cancelling whatever task held it before.
    pub fn register(&self, key: TaskKey) -> CancelToken {
        let token = CancelToken::new();
        if let Some(previous) = self.tasks.insert(key.clone(), token.clone()) {
            debug!(task = %key, "cancelling previous task with the same key");
            previous.cancel();
        }
        token
    }

    /// Cancels the active task for `key`. Returns false if none is registered.
    pub fn cancel(&self, key: &TaskKey) -> bool {
        match self.tasks.get(key) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_cancelled(&self, key: &TaskKey) -> bool {
        self.tasks
            .get(key)
            .is_some_and(|token| token.is_cancelled())
    }

    /// Frees the slot, unless a newer task has claimed it since.
    pub fn release(&self, key: &TaskKey, token: &CancelToken) {
        self.tasks.remove_if(key, |_, current| current.same_as(token));
    }

    pub fn active_len(&self) -> usize {
        self.tasks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registering_same_key_cancels_previous() {
        let registry = TaskRegistry::new();
        let key = TaskKey::new("langflow", "task-1");
        let first = registry.register(key.clone());
        let second = registry.register(key.clone());
        assert!(first.is_cancelled());
        assert!(!second.is_cancelled());
        assert_eq!(registry.active_len(), 1);
    }

    #[test]
    fn stale_release_keeps_newer_slot() {
        let registry = TaskRegistry::new();
        let key = TaskKey::new("n8n", "task-2");
        let first = registry.register(key.clone());
        let second = registry.register(key.clone());

        registry.release(&key, &first);
        assert_eq!(registry.active_len(), 1);
        registry.release(&key, &second);
        assert_eq!(registry.active_len(), 0);
    }

    #[test]
    fn cancel_by_key() {
        let registry = TaskRegistry::new();
        let key = TaskKey::new("agent", "task-3");
        assert!(!registry.cancel(&key));
        let token = registry.register(key.clone());
        assert!(registry.cancel(&key));
        assert!(token.is_cancelled());
        assert!(registry.is_cancelled(&key));
        assert!(!registry.is_cancelled(&TaskKey::new("agent", "other")));
    }
}
