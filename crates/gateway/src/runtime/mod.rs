//! Runtime state for the HTTP gateway: the Task Store (C7), Event Bus
//! (C8), and the per-task cancellation map that both the Orchestrator
//! and the task-deletion route observe.

pub mod cancel;
pub mod event_bus;
pub mod task_runner;
pub mod task_store;

pub use cancel::{CancelMap, CancelToken};
pub use event_bus::EventBus;
pub use task_runner::run_task;
pub use task_store::{TaskPatch, TaskStore};
