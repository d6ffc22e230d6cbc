//! Collects terminal node outcomes into the shared research context.

use std::collections::BTreeSet;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, error};

use crate::context::{ModuleEntry, ResearchContext};
use crate::error::{ErrorCause, ErrorInfo, ResearchError};
use crate::planner::{NodeStatus, TaskId, TaskNode};
use crate::request::ResearchRequest;

#[derive(Debug)]
struct Inner {
    context: ResearchContext,
    recorded: BTreeSet<TaskId>,
}

/// Cloneable handle; every clone writes into the same context.
#[derive(Debug, Clone)]
pub struct ResultAggregator {
    inner: Arc<Mutex<Inner>>,
}

impl ResultAggregator {
    pub fn new(request: &ResearchRequest) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                context: ResearchContext::for_request(request),
                recorded: BTreeSet::new(),
            })),
        }
    }

    /// Fold a terminal node into the context.
    ///
    /// Succeeded nodes become available entries, failed nodes unavailable
    /// ones. Skipped nodes are only remembered so they cannot be recorded
    /// twice. A node recorded a second time is rejected and the context is
    /// left untouched.
    pub async fn record(&self, node: &TaskNode) -> Result<(), ResearchError> {
        if !node.status.is_terminal() {
            error!(task_id = %node.id, status = %node.status, "refusing to record non-terminal node");
            return Err(ResearchError::NonTerminalRecord {
                task_id: node.id.clone(),
            });
        }

        let mut inner = self.inner.lock().await;
        if inner.recorded.contains(&node.id) {
            error!(task_id = %node.id, "node recorded twice");
            return Err(ResearchError::DuplicateRecord {
                task_id: node.id.clone(),
            });
        }

        let entry = match (node.status, &node.result, &node.error) {
            (NodeStatus::Succeeded, Some(record), _) => Some(ModuleEntry::Available(record.clone())),
            (NodeStatus::Failed, _, Some(info)) => Some(ModuleEntry::Unavailable(info.clone())),
            (NodeStatus::Failed, _, None) => Some(ModuleEntry::Unavailable(ErrorInfo::new(
                node.module,
                ErrorCause::TransientApi,
                "task failed without error details",
            ))),
            _ => None,
        };

        inner.recorded.insert(node.id.clone());
        if let Some(entry) = entry {
            debug!(task_id = %node.id, available = entry.is_available(), "result recorded");
            inner.context.insert(node.module, entry);
        }
        Ok(())
    }

    /// Point-in-time copy of the context.
    pub async fn snapshot(&self) -> ResearchContext {
        self.inner.lock().await.context.clone()
    }

    /// Drop everything collected so far. Used when a run is cancelled.
    pub async fn discard(&self) {
        let mut inner = self.inner.lock().await;
        inner.context.clear();
        inner.recorded.clear();
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.context.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::ResultRecord;
    use crate::request::ModuleId;

    fn request() -> ResearchRequest {
        ResearchRequest::new("Ivermectin", "respiratory", "repurposing", [ModuleId::Market])
    }

    fn succeeded(module: ModuleId) -> TaskNode {
        let mut node = TaskNode::new(module, format!("{} task", module.title()));
        node.start();
        node.succeed(ResultRecord::new(module, "done", Default::default(), vec![]));
        node
    }

    #[tokio::test]
    async fn duplicate_record_leaves_context_unchanged() {
        let aggregator = ResultAggregator::new(&request());
        aggregator.record(&succeeded(ModuleId::Market)).await.unwrap();
        let before = aggregator.snapshot().await;

        let mut again = succeeded(ModuleId::Market);
        again.result = Some(ResultRecord::new(
            ModuleId::Market,
            "overwritten",
            Default::default(),
            vec![],
        ));
        let err = aggregator.record(&again).await.unwrap_err();

        assert!(matches!(err, ResearchError::DuplicateRecord { task_id } if task_id == "market"));
        assert_eq!(aggregator.snapshot().await, before);
    }

    #[tokio::test]
    async fn non_terminal_node_is_rejected() {
        let aggregator = ResultAggregator::new(&request());
        let node = TaskNode::new(ModuleId::Trade, "trade".into());

        let err = aggregator.record(&node).await.unwrap_err();
        assert!(err.is_invariant_violation());
        assert!(aggregator.is_empty().await);
    }

    #[tokio::test]
    async fn failed_node_becomes_unavailable_entry() {
        let aggregator = ResultAggregator::new(&request());
        let mut node = TaskNode::new(ModuleId::Patent, "patent".into());
        node.start();
        node.fail(ErrorInfo::timeout(ModuleId::Patent, "deadline exceeded"));

        aggregator.record(&node).await.unwrap();
        let context = aggregator.snapshot().await;

        assert_eq!(context.unavailable().count(), 1);
        assert!(!context.get(ModuleId::Patent).unwrap().is_available());
    }

    #[tokio::test]
    async fn discard_clears_everything() {
        let aggregator = ResultAggregator::new(&request());
        aggregator.record(&succeeded(ModuleId::Web)).await.unwrap();
        aggregator.discard().await;

        assert!(aggregator.is_empty().await);
        // a discarded node may be recorded again
        aggregator.record(&succeeded(ModuleId::Web)).await.unwrap();
    }
}
