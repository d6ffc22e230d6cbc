//! Task planning and DAG construction for a research run.
//!
//! The planner decomposes a research request into one analysis task per
//! selected module and a single report task that depends on all of them.

use crate::error::{ErrorInfo, ResearchError};
use crate::record::ResultRecord;
use crate::request::{ModuleId, ResearchRequest};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;

/// Unique identifier for a task node
pub type TaskId = String;

/// Lifecycle state of a task node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

impl NodeStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            NodeStatus::Succeeded | NodeStatus::Failed | NodeStatus::Skipped
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            NodeStatus::Pending => "pending",
            NodeStatus::Running => "running",
            NodeStatus::Succeeded => "succeeded",
            NodeStatus::Failed => "failed",
            NodeStatus::Skipped => "skipped",
        }
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single task node in the execution graph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskNode {
    /// Unique task identifier
    pub id: TaskId,
    /// Human-readable description
    pub description: String,
    /// Module whose specialist executes this task
    pub module: ModuleId,
    /// IDs of tasks that must be terminal before this one starts
    pub depends_on: BTreeSet<TaskId>,
    pub status: NodeStatus,
    pub result: Option<ResultRecord>,
    pub error: Option<ErrorInfo>,
    /// Number of times the node has been dispatched
    pub attempts: u32,
}

impl TaskNode {
    pub fn new(module: ModuleId, description: String) -> Self {
        Self {
            id: module.as_str().to_string(),
            description,
            module,
            depends_on: BTreeSet::new(),
            status: NodeStatus::Pending,
            result: None,
            error: None,
            attempts: 0,
        }
    }

    pub fn with_dependency(mut self, dep_id: TaskId) -> Self {
        self.depends_on.insert(dep_id);
        self
    }

    pub(crate) fn start(&mut self) {
        debug_assert_eq!(self.status, NodeStatus::Pending, "start on {}", self.id);
        self.status = NodeStatus::Running;
        self.attempts += 1;
    }

    pub(crate) fn succeed(&mut self, record: ResultRecord) {
        debug_assert_eq!(self.status, NodeStatus::Running, "succeed on {}", self.id);
        self.status = NodeStatus::Succeeded;
        self.result = Some(record);
        self.error = None;
    }

    pub(crate) fn fail(&mut self, error: ErrorInfo) {
        debug_assert_eq!(self.status, NodeStatus::Running, "fail on {}", self.id);
        self.status = NodeStatus::Failed;
        self.result = None;
        self.error = Some(error);
    }

    /// Failed → Pending for another attempt.
    pub(crate) fn requeue(&mut self) {
        debug_assert_eq!(self.status, NodeStatus::Failed, "requeue on {}", self.id);
        self.status = NodeStatus::Pending;
        self.error = None;
    }

    pub(crate) fn skip(&mut self) {
        debug_assert!(!self.status.is_terminal(), "skip on terminal {}", self.id);
        self.status = NodeStatus::Skipped;
        self.result = None;
        self.error = None;
    }

    /// `result` is present exactly when Succeeded and `error` exactly when Failed.
    pub fn is_consistent(&self) -> bool {
        self.result.is_some() == (self.status == NodeStatus::Succeeded)
            && self.error.is_some() == (self.status == NodeStatus::Failed)
    }
}

/// Directed acyclic graph of tasks
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskGraph {
    /// All task nodes indexed by ID
    nodes: BTreeMap<TaskId, TaskNode>,
    /// Adjacency list: task_id -> [dependent_task_ids]
    edges: BTreeMap<TaskId, Vec<TaskId>>,
}

impl TaskGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a task node to the graph
    pub fn add_node(&mut self, node: TaskNode) -> Result<(), ResearchError> {
        if self.nodes.contains_key(&node.id) {
            return Err(ResearchError::invalid_request(format!(
                "task node with ID '{}' already exists",
                node.id
            )));
        }

        for dep_id in &node.depends_on {
            if !self.nodes.contains_key(dep_id) {
                return Err(ResearchError::invalid_request(format!(
                    "dependency '{}' not found for task '{}'",
                    dep_id, node.id
                )));
            }
        }

        for dep_id in &node.depends_on {
            self.edges
                .entry(dep_id.clone())
                .or_default()
                .push(node.id.clone());
        }

        self.nodes.insert(node.id.clone(), node);
        Ok(())
    }

    /// Validate that the graph is acyclic
    pub fn validate(&self) -> Result<(), ResearchError> {
        let order = self.kahn_order();
        if order.len() != self.nodes.len() {
            return Err(ResearchError::invalid_request("task graph contains cycles"));
        }
        Ok(())
    }

    /// Get topological ordering of tasks
    pub fn topological_order(&self) -> Result<Vec<TaskId>, ResearchError> {
        self.validate()?;
        Ok(self.kahn_order())
    }

    fn kahn_order(&self) -> Vec<TaskId> {
        let mut in_degree: BTreeMap<&TaskId, usize> = self
            .nodes
            .values()
            .map(|node| (&node.id, node.depends_on.len()))
            .collect();

        let mut queue: VecDeque<&TaskId> = in_degree
            .iter()
            .filter(|(_, deg)| **deg == 0)
            .map(|(id, _)| *id)
            .collect();

        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(node_id) = queue.pop_front() {
            order.push(node_id.clone());

            if let Some(dependents) = self.edges.get(node_id) {
                for dep_id in dependents {
                    if let Some(degree) = in_degree.get_mut(dep_id) {
                        *degree -= 1;
                        if *degree == 0 {
                            queue.push_back(dep_id);
                        }
                    }
                }
            }
        }
        order
    }

    /// Get a task node by ID
    pub fn get_node(&self, id: &str) -> Option<&TaskNode> {
        self.nodes.get(id)
    }

    pub(crate) fn node_mut(&mut self, id: &str) -> Option<&mut TaskNode> {
        self.nodes.get_mut(id)
    }

    /// Get all task nodes
    pub fn nodes(&self) -> impl Iterator<Item = &TaskNode> {
        self.nodes.values()
    }

    pub(crate) fn nodes_mut(&mut self) -> impl Iterator<Item = &mut TaskNode> {
        self.nodes.values_mut()
    }

    /// Nodes with no dependencies
    pub fn root_nodes(&self) -> Vec<&TaskNode> {
        self.nodes
            .values()
            .filter(|node| node.depends_on.is_empty())
            .collect()
    }

    /// Pending nodes whose dependencies are all terminal
    pub fn ready_nodes(&self) -> Vec<&TaskNode> {
        self.nodes
            .values()
            .filter(|node| node.status == NodeStatus::Pending)
            .filter(|node| {
                node.depends_on.iter().all(|dep| {
                    self.nodes
                        .get(dep)
                        .is_some_and(|dep| dep.status.is_terminal())
                })
            })
            .collect()
    }

    /// Get number of nodes in graph
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Check if graph is empty
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn into_nodes(self) -> Vec<TaskNode> {
        self.nodes.into_values().collect()
    }
}

/// Decomposes research requests into task graphs
#[derive(Debug, Default, Clone, Copy)]
pub struct TaskPlanner;

impl TaskPlanner {
    pub fn new() -> Self {
        Self
    }

    /// Build the task graph for a request.
    ///
    /// Pure function of the request: one dependency-free node per selected
    /// module plus a `report` node depending on all of them.
    pub fn plan(&self, request: &ResearchRequest) -> Result<TaskGraph, ResearchError> {
        let modules = request.selected_modules();
        if modules.is_empty() {
            return Err(ResearchError::invalid_request(
                "at least one research module must be selected",
            ));
        }
        if let Some(module) = modules.iter().find(|module| !module.is_analysis()) {
            return Err(ResearchError::invalid_request(format!(
                "'{module}' is synthesis-only and cannot be selected as an analysis module"
            )));
        }

        tracing::info!(
            molecule = %request.molecule(),
            therapy_area = %request.therapy_area(),
            modules = modules.len(),
            "planning research task graph"
        );

        let mut graph = TaskGraph::new();
        let mut report = TaskNode::new(
            ModuleId::Report,
            format!(
                "Synthesize report: {} for {}",
                request.molecule(),
                request.therapy_area()
            ),
        );

        for module in modules {
            let node = TaskNode::new(
                *module,
                format!(
                    "{}: {} in {}",
                    module.title(),
                    request.molecule(),
                    request.therapy_area()
                ),
            );
            report = report.with_dependency(node.id.clone());
            graph.add_node(node)?;
        }
        graph.add_node(report)?;
        graph.validate()?;

        tracing::debug!(task_count = graph.len(), "task graph constructed");
        Ok(graph)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(modules: &[ModuleId]) -> ResearchRequest {
        ResearchRequest::new(
            "metformin",
            "oncology",
            "Identify repurposing opportunities",
            modules.iter().copied(),
        )
    }

    #[test]
    fn report_depends_on_every_selected_module() {
        let selections: [&[ModuleId]; 3] = [
            &[ModuleId::Market],
            &[ModuleId::Market, ModuleId::Patent, ModuleId::Clinical],
            &ModuleId::ANALYSIS,
        ];

        for modules in selections {
            let graph = TaskPlanner::new().plan(&request(modules)).unwrap();
            let reports: Vec<_> = graph
                .nodes()
                .filter(|node| node.module == ModuleId::Report)
                .collect();
            assert_eq!(reports.len(), 1);

            let expected: BTreeSet<TaskId> =
                modules.iter().map(|m| m.as_str().to_string()).collect();
            assert_eq!(reports[0].depends_on, expected);
            assert_eq!(graph.len(), modules.len() + 1);

            for node in graph.nodes().filter(|n| n.module != ModuleId::Report) {
                assert!(node.depends_on.is_empty());
                assert_eq!(node.status, NodeStatus::Pending);
            }
        }
    }

    #[test]
    fn empty_selection_is_rejected() {
        let err = TaskPlanner::new().plan(&request(&[])).unwrap_err();
        assert!(matches!(err, ResearchError::InvalidRequest(_)));
    }

    #[test]
    fn report_cannot_be_selected() {
        let err = TaskPlanner::new()
            .plan(&request(&[ModuleId::Market, ModuleId::Report]))
            .unwrap_err();
        assert!(matches!(err, ResearchError::InvalidRequest(msg) if msg.contains("synthesis-only")));
    }

    #[test]
    fn report_is_last_in_topological_order() {
        let graph = TaskPlanner::new()
            .plan(&request(&[ModuleId::Web, ModuleId::Trade]))
            .unwrap();
        let order = graph.topological_order().unwrap();
        assert_eq!(order.last().map(String::as_str), Some("report"));
        assert_eq!(graph.root_nodes().len(), 2);
    }

    #[test]
    fn report_becomes_ready_once_dependencies_are_terminal() {
        let mut graph = TaskPlanner::new()
            .plan(&request(&[ModuleId::Market, ModuleId::Patent]))
            .unwrap();
        assert_eq!(graph.ready_nodes().len(), 2);

        let market = graph.node_mut("market").unwrap();
        market.start();
        market.succeed(ResultRecord::no_data(&ErrorInfo::not_found(
            ModuleId::Market,
            "none",
        )));
        assert!(graph.ready_nodes().iter().all(|n| n.module != ModuleId::Report));

        let patent = graph.node_mut("patent").unwrap();
        patent.start();
        patent.fail(ErrorInfo::timeout(ModuleId::Patent, "deadline"));

        let ready: Vec<_> = graph.ready_nodes().iter().map(|n| n.module).collect();
        assert_eq!(ready, vec![ModuleId::Report]);
    }

    #[test]
    fn transitions_keep_result_and_error_exclusive() {
        let mut node = TaskNode::new(ModuleId::Clinical, "Clinical".into());
        assert!(node.is_consistent());

        node.start();
        node.fail(ErrorInfo::transient(ModuleId::Clinical, "503"));
        assert!(node.is_consistent());
        assert!(node.error.is_some() && node.result.is_none());

        node.requeue();
        assert!(node.is_consistent());
        assert_eq!(node.status, NodeStatus::Pending);

        node.start();
        node.succeed(ResultRecord::no_data(&ErrorInfo::not_found(
            ModuleId::Clinical,
            "none",
        )));
        assert!(node.is_consistent());
        assert!(node.result.is_some() && node.error.is_none());
        assert_eq!(node.attempts, 2);
    }

    #[test]
    fn duplicate_and_dangling_nodes_are_rejected() {
        let mut graph = TaskGraph::new();
        graph
            .add_node(TaskNode::new(ModuleId::Market, "one".into()))
            .unwrap();
        assert!(graph
            .add_node(TaskNode::new(ModuleId::Market, "again".into()))
            .is_err());
        let dangling =
            TaskNode::new(ModuleId::Report, "report".into()).with_dependency("web".into());
        assert!(graph.add_node(dangling).is_err());
    }
}
