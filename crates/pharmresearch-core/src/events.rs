//! Progress event bus for node status transitions.
//!
//! Every transition of a task node is published as a [`ProgressEvent`].
//! Consumers (CLI progress output, trace collection, tests) subscribe to the
//! stream; a run with no subscribers simply drops its events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::planner::{NodeStatus, TaskId, TaskNode};
use crate::request::ModuleId;

/// Unique identifier for an event
pub type EventId = String;

const DEFAULT_CAPACITY: usize = 256;

/// One node status transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub event_id: EventId,
    pub task_id: TaskId,
    pub module: ModuleId,
    pub status: NodeStatus,
    /// Dispatch count of the node at the time of the transition
    pub attempt: u32,
    /// Failure or skip reason, when there is one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ProgressEvent {
    pub fn for_node(node: &TaskNode) -> Self {
        Self {
            event_id: generate_event_id(),
            task_id: node.id.clone(),
            module: node.module,
            status: node.status,
            attempt: node.attempts,
            detail: node.error.as_ref().map(|error| error.to_string()),
            timestamp: Utc::now(),
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Publishing side of the progress stream
#[derive(Debug, Clone)]
pub struct ProgressEmitter {
    sender: broadcast::Sender<ProgressEvent>,
}

impl ProgressEmitter {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Slow subscribers lose the oldest events once `capacity` is exceeded.
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.sender.subscribe()
    }

    /// Publish the node's current status.
    pub fn emit(&self, node: &TaskNode) {
        self.publish(ProgressEvent::for_node(node));
    }

    pub fn publish(&self, event: ProgressEvent) {
        tracing::trace!(
            task_id = %event.task_id,
            status = %event.status,
            attempt = event.attempt,
            "progress event"
        );
        // No receivers is not an error: progress is best effort.
        let _ = self.sender.send(event);
    }
}

impl Default for ProgressEmitter {
    fn default() -> Self {
        Self::new()
    }
}

/// Generate a unique event ID
fn generate_event_id() -> EventId {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let id = COUNTER.fetch_add(1, Ordering::SeqCst);
    format!("evt_{}", id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorInfo;

    #[tokio::test]
    async fn subscribers_receive_transitions() {
        let emitter = ProgressEmitter::new();
        let mut receiver = emitter.subscribe();

        let mut node = TaskNode::new(ModuleId::Clinical, "Clinical task".into());
        node.start();
        emitter.emit(&node);
        node.fail(ErrorInfo::transient(ModuleId::Clinical, "503"));
        emitter.emit(&node);

        let running = receiver.recv().await.unwrap();
        assert_eq!(running.status, NodeStatus::Running);
        assert_eq!(running.attempt, 1);
        assert!(running.detail.is_none());

        let failed = receiver.recv().await.unwrap();
        assert_eq!(failed.status, NodeStatus::Failed);
        assert!(failed.detail.unwrap().contains("503"));
        assert_ne!(running.event_id, failed.event_id);
    }

    #[test]
    fn emitting_without_subscribers_is_silent() {
        let emitter = ProgressEmitter::default();
        emitter.emit(&TaskNode::new(ModuleId::Web, "Web task".into()));
    }
}
