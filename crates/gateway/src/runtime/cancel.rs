//! Per-task cancellation registry (§5). [`CancelToken`] itself lives in
//! `sw_domain` so the Orchestrator and Chunk Pipeline can observe it
//! without the pipeline crate depending on the gateway; this module only
//! tracks which task ids currently have one outstanding.

use std::collections::HashMap;
use std::sync::Mutex;

pub use sw_domain::cancel::CancelToken;

/// Tracks the active cancel token for each in-flight task id.
#[derive(Default)]
pub struct CancelMap {
    tokens: Mutex<HashMap<String, CancelToken>>,
}

impl CancelMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, task_id: &str) -> CancelToken {
        let token = CancelToken::new();
        self.tokens
            .lock()
            .expect("cancel map mutex poisoned")
            .insert(task_id.to_owned(), token.clone());
        token
    }

    pub fn cancel(&self, task_id: &str) -> bool {
        match self.tokens.lock().expect("cancel map mutex poisoned").get(task_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, task_id: &str) {
        self.tokens.lock().expect("cancel map mutex poisoned").remove(task_id);
    }

    pub fn is_running(&self, task_id: &str) -> bool {
        self.tokens.lock().expect("cancel map mutex poisoned").contains_key(task_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_map_register_and_cancel() {
        let map = CancelMap::new();
        let token = map.register("task-1");
        assert!(map.is_running("task-1"));
        assert!(map.cancel("task-1"));
        assert!(token.is_cancelled());
        map.remove("task-1");
        assert!(!map.is_running("task-1"));
    }

    #[test]
    fn cancel_nonexistent_task_returns_false() {
        let map = CancelMap::new();
        assert!(!map.cancel("ghost"));
    }

    #[test]
    fn remove_is_idempotent() {
        let map = CancelMap::new();
        map.register("task-1");
        map.remove("task-1");
        map.remove("task-1");
        assert!(!map.is_running("task-1"));
    }
}
