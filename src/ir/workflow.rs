//! Workflow definitions and the calls inside them.

use super::graph::DependencyGraph;
use super::io::{Binding, Input, Output};
use super::task::Task;
use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static DOTTED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:^|[^A-Za-z0-9_.])([A-Za-z_][A-Za-z0-9_]*)\.([A-Za-z_][A-Za-z0-9_]*)").unwrap()
});

static STRING_LITERAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""(?:[^"\\]|\\.)*"|'(?:[^'\\]|\\.)*'"#).unwrap());

/// `(call_id, output)` pairs written as `a.b` in an expression, ignoring the
/// contents of string literals.
pub(crate) fn dotted_references(expression: &str) -> Vec<(String, String)> {
    let stripped = STRING_LITERAL.replace_all(expression, "\"\"");
    DOTTED
        .captures_iter(&stripped)
        .filter_map(|caps| match (caps.get(1), caps.get(2)) {
            (Some(a), Some(b)) => Some((a.as_str().to_string(), b.as_str().to_string())),
            _ => None,
        })
        .collect()
}

/// Kind of a workflow document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowKind {
    #[default]
    Workflow,
    /// A document holding task definitions only
    Task,
    Subworkflow,
}

/// An external source reference such as `import "lib.wdl" as lib`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Import {
    pub uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

impl Import {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            alias: None,
        }
    }
}

/// One invocation of a task or subworkflow inside a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowCall {
    /// Unique within the workflow; the node identity in the dependency graph
    pub call_id: String,
    /// Key into the workflow's task set, or an externally defined task
    pub task_name: String,
    #[serde(default)]
    pub inputs: IndexMap<String, Binding>,
    /// Variable bound to each element when the call is scattered
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scatter: Option<String>,
    /// Collection the scatter variable iterates over
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scatter_items: Option<String>,
    /// Boolean expression gating execution
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conditional: Option<String>,
}

impl WorkflowCall {
    pub fn new(call_id: impl Into<String>, task_name: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            task_name: task_name.into(),
            inputs: IndexMap::new(),
            scatter: None,
            scatter_items: None,
            conditional: None,
        }
    }

    pub fn with_input(mut self, name: impl Into<String>, binding: Binding) -> Self {
        self.inputs.insert(name.into(), binding);
        self
    }

    pub fn with_scatter(mut self, variable: impl Into<String>, items: impl Into<String>) -> Self {
        self.scatter = Some(variable.into());
        self.scatter_items = Some(items.into());
        self
    }

    pub fn with_conditional(mut self, condition: impl Into<String>) -> Self {
        self.conditional = Some(condition.into());
        self
    }

    /// The `(call_id, output)` pairs read by this call's inputs, scatter
    /// collection and condition.
    pub fn references(&self) -> Vec<(String, String)> {
        let mut refs = Vec::new();
        for binding in self.inputs.values() {
            if let Some(text) = binding.as_expression() {
                refs.extend(dotted_references(text));
            }
        }
        if let Some(items) = &self.scatter_items {
            refs.extend(dotted_references(items));
        }
        if let Some(condition) = &self.conditional {
            refs.extend(dotted_references(condition));
        }
        refs
    }

    /// The call ids this call reads outputs from, deduplicated in order.
    pub fn upstream_calls(&self) -> Vec<String> {
        let mut ids: Vec<String> = Vec::new();
        for (call_id, _) in self.references() {
            if !ids.contains(&call_id) {
                ids.push(call_id);
            }
        }
        ids
    }
}

/// A named composition of calls plus its own inputs and outputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    pub name: String,
    #[serde(default)]
    pub kind: WorkflowKind,
    /// Language version declared by the source document
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default)]
    pub inputs: Vec<Input>,
    #[serde(default)]
    pub outputs: Vec<Output>,
    #[serde(default)]
    pub tasks: IndexMap<String, Task>,
    #[serde(default)]
    pub calls: Vec<WorkflowCall>,
    #[serde(default)]
    pub imports: Vec<Import>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Workflow {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: WorkflowKind::Workflow,
            version: None,
            inputs: Vec::new(),
            outputs: Vec::new(),
            tasks: IndexMap::new(),
            calls: Vec::new(),
            imports: Vec::new(),
            description: None,
        }
    }

    /// A task-only document wrapping one task.
    pub fn from_task(task: Task) -> Self {
        let mut workflow = Workflow::new(task.name.clone());
        workflow.kind = WorkflowKind::Task;
        workflow.add_task(task);
        workflow
    }

    /// Add or replace a task under its own name.
    pub fn add_task(&mut self, task: Task) {
        self.tasks.insert(task.name.clone(), task);
    }

    pub fn add_call(&mut self, call: WorkflowCall) {
        self.calls.push(call);
    }

    pub fn call(&self, call_id: &str) -> Option<&WorkflowCall> {
        self.calls.iter().find(|c| c.call_id == call_id)
    }

    pub fn input(&self, name: &str) -> Option<&Input> {
        self.inputs.iter().find(|i| i.name == name)
    }

    /// The task a call targets, if it is defined in this workflow.
    pub fn task_for(&self, call: &WorkflowCall) -> Option<&Task> {
        self.tasks.get(&call.task_name)
    }

    /// Calls whose task is not part of this workflow's task set.
    pub fn unresolved_calls(&self) -> Vec<&WorkflowCall> {
        self.calls
            .iter()
            .filter(|c| !self.tasks.contains_key(&c.task_name))
            .collect()
    }

    /// The single task of a task-only document.
    pub fn single_task(&self) -> Option<&Task> {
        if self.kind == WorkflowKind::Task && self.calls.is_empty() && self.tasks.len() == 1 {
            self.tasks.values().next()
        } else {
            None
        }
    }

    /// Build the call dependency graph from the current call inputs.
    pub fn dependency_graph(&self) -> DependencyGraph {
        DependencyGraph::from_workflow(self)
    }
}
