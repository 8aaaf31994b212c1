//! Event Bus (C8): a per-task bounded, append-only queue of progress
//! events, polled by the Stream Endpoint (C9) and replayable from any
//! `last_event_id` a client presents (§4.8).

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Instant;
use sw_domain::model::{Event, EventType};
use sw_domain::trace::TraceEvent;

struct TaskQueue {
    events: VecDeque<Event>,
    last_activity: Instant,
    /// Millisecond clock reading last handed out for this task, used to
    /// force strictly increasing IDs even when two events publish within
    /// the same wall-clock millisecond.
    last_assigned_ms: i64,
}

pub struct EventBus {
    max_per_task: usize,
    queues: Mutex<HashMap<String, TaskQueue>>,
}

impl EventBus {
    pub fn new(max_per_task: usize) -> Self {
        Self {
            max_per_task,
            queues: Mutex::new(HashMap::new()),
        }
    }

    /// Append an event, assigning it a bus-issued id if the caller did not
    /// format one. Evicts the oldest entries past `max_per_task`.
    pub fn publish(&self, task_id: &str, event_type: EventType, payload: serde_json::Value) -> Event {
        let mut queues = self.queues.lock().expect("event bus mutex poisoned");
        let queue = queues.entry(task_id.to_string()).or_insert_with(|| TaskQueue {
            events: VecDeque::new(),
            last_activity: Instant::now(),
            last_assigned_ms: 0,
        });

        let now_ms = chrono::Utc::now().timestamp_millis();
        let ms = now_ms.max(queue.last_assigned_ms + 1);
        queue.last_assigned_ms = ms;
        let id = format!("{task_id}_{ms}");

        let event = Event {
            id: id.clone(),
            event_type,
            timestamp: chrono::Utc::now(),
            payload,
        };

        queue.events.push_back(event.clone());
        while queue.events.len() > self.max_per_task {
            queue.events.pop_front();
        }
        queue.last_activity = Instant::now();

        TraceEvent::EventPublished {
            task_id: task_id.to_string(),
            event_id: id,
            event_type: format!("{:?}", event.event_type),
        }
        .emit();

        event
    }

    /// Events strictly after `after_id` (string-ordered, see [`Event::id`]),
    /// or the full retained history when `after_id` is `None`.
    pub fn fetch(&self, task_id: &str, after_id: Option<&str>) -> Vec<Event> {
        let queues = self.queues.lock().expect("event bus mutex poisoned");
        let Some(queue) = queues.get(task_id) else {
            return Vec::new();
        };
        match after_id {
            None => queue.events.iter().cloned().collect(),
            Some(after) => queue
                .events
                .iter()
                .filter(|e| e.id.as_str() > after)
                .cloned()
                .collect(),
        }
    }

    pub fn latest(&self, task_id: &str) -> Option<Event> {
        let queues = self.queues.lock().expect("event bus mutex poisoned");
        queues.get(task_id)?.events.back().cloned()
    }

    /// Drop queues idle longer than `ttl`. Run periodically from a
    /// background task (§4.10 step 5); never called from a request path.
    pub fn gc(&self, ttl: std::time::Duration) -> usize {
        let mut queues = self.queues.lock().expect("event bus mutex poisoned");
        let before = queues.len();
        queues.retain(|_, q| q.last_activity.elapsed() < ttl);
        before - queues.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_assigns_increasing_ids() {
        let bus = EventBus::new(100);
        let e1 = bus.publish("task-1", EventType::Started, serde_json::json!({}));
        let e2 = bus.publish("task-1", EventType::Progress, serde_json::json!({}));
        assert!(e2.id.as_str() > e1.id.as_str());
    }

    #[test]
    fn fetch_without_after_id_returns_full_history() {
        let bus = EventBus::new(100);
        bus.publish("task-1", EventType::Started, serde_json::json!({}));
        bus.publish("task-1", EventType::Progress, serde_json::json!({}));
        assert_eq!(bus.fetch("task-1", None).len(), 2);
    }

    #[test]
    fn fetch_after_id_returns_only_newer_events() {
        let bus = EventBus::new(100);
        let first = bus.publish("task-1", EventType::Started, serde_json::json!({}));
        bus.publish("task-1", EventType::Progress, serde_json::json!({}));
        bus.publish("task-1", EventType::Completed, serde_json::json!({}));
        let replay = bus.fetch("task-1", Some(&first.id));
        assert_eq!(replay.len(), 2);
    }

    #[test]
    fn fetch_unknown_task_is_empty() {
        let bus = EventBus::new(100);
        assert!(bus.fetch("ghost", None).is_empty());
    }

    #[test]
    fn latest_returns_most_recent_event() {
        let bus = EventBus::new(100);
        bus.publish("task-1", EventType::Started, serde_json::json!({}));
        let last = bus.publish("task-1", EventType::Completed, serde_json::json!({}));
        assert_eq!(bus.latest("task-1").unwrap().id, last.id);
    }

    #[test]
    fn queue_is_bounded_to_max_per_task() {
        let bus = EventBus::new(3);
        for _ in 0..10 {
            bus.publish("task-1", EventType::Progress, serde_json::json!({}));
        }
        assert_eq!(bus.fetch("task-1", None).len(), 3);
    }

    #[test]
    fn gc_evicts_idle_queues() {
        let bus = EventBus::new(100);
        bus.publish("task-1", EventType::Started, serde_json::json!({}));
        let evicted = bus.gc(std::time::Duration::from_secs(0));
        assert_eq!(evicted, 1);
        assert!(bus.fetch("task-1", None).is_empty());
    }

    #[test]
    fn gc_keeps_fresh_queues() {
        let bus = EventBus::new(100);
        bus.publish("task-1", EventType::Started, serde_json::json!({}));
        let evicted = bus.gc(std::time::Duration::from_secs(300));
        assert_eq!(evicted, 0);
    }
}
