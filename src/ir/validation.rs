//! Structural checks over workflows and tasks.
//!
//! The validator never fails: every problem becomes a [`Finding`] in the
//! returned [`ValidationReport`], and only [`Level::Error`] findings make the
//! report invalid. Calls to tasks outside the workflow's own task set are
//! treated as external and produce a warning.

use super::task::{Task, INTERPOLATION};
use super::workflow::{dotted_references, Workflow, WorkflowCall};
use super::runtime::parse_size_mb;
use indexmap::IndexSet;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

static BARE_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(^|[^A-Za-z0-9_.])([A-Za-z_][A-Za-z0-9_]*)").unwrap());

/// Severity of a finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Level {
    Error,
    Warning,
    Info,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Level::Error => write!(f, "ERROR"),
            Level::Warning => write!(f, "WARNING"),
            Level::Info => write!(f, "INFO"),
        }
    }
}

/// One validation result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub level: Level,
    pub message: String,
    /// Dotted path to the offending element, e.g. `call.align`
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub location: String,
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.location.is_empty() {
            write!(f, "[{}] {}", self.level, self.message)
        } else {
            write!(f, "[{}] {}: {}", self.level, self.location, self.message)
        }
    }
}

/// All findings for one document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub findings: Vec<Finding>,
}

impl ValidationReport {
    /// True when no finding is an error.
    pub fn is_valid(&self) -> bool {
        !self.findings.iter().any(|f| f.level == Level::Error)
    }

    pub fn errors(&self) -> impl Iterator<Item = &Finding> {
        self.with_level(Level::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Finding> {
        self.with_level(Level::Warning)
    }

    pub fn with_level(&self, level: Level) -> impl Iterator<Item = &Finding> {
        self.findings.iter().filter(move |f| f.level == level)
    }

    pub fn is_empty(&self) -> bool {
        self.findings.is_empty()
    }

    fn push(&mut self, level: Level, message: String, location: impl Into<String>) {
        self.findings.push(Finding {
            level,
            message,
            location: location.into(),
        });
    }
}

/// Stateless workflow and task validator.
#[derive(Debug, Clone, Copy, Default)]
pub struct Validator;

impl Validator {
    pub fn new() -> Self {
        Validator
    }

    pub fn validate_workflow(&self, workflow: &Workflow) -> ValidationReport {
        let mut report = ValidationReport::default();

        if workflow.name.trim().is_empty() {
            report.push(Level::Error, "Workflow missing name".to_string(), "");
        }

        for call in &workflow.calls {
            self.check_call(workflow, call, &mut report);
        }

        for task in workflow.tasks.values() {
            self.check_task(task, &mut report);
        }

        for cycle in workflow.dependency_graph().find_cycles() {
            let mut path = cycle.clone();
            if let Some(first) = cycle.first() {
                path.push(first.clone());
            }
            report.push(
                Level::Error,
                format!("Circular dependency detected: {}", path.join(" -> ")),
                "workflow.calls",
            );
        }

        let used = used_names(workflow);
        for input in &workflow.inputs {
            if !used.contains(input.name.as_str()) {
                report.push(
                    Level::Warning,
                    format!("Input '{}' is not used by any call", input.name),
                    "workflow.inputs",
                );
            }
        }

        for output in &workflow.outputs {
            let Some(expression) = &output.expression else {
                continue;
            };
            for (call_id, _) in dotted_references(expression) {
                if workflow.call(&call_id).is_none() {
                    report.push(
                        Level::Error,
                        format!(
                            "Output '{}' references unknown call '{}'",
                            output.name, call_id
                        ),
                        "workflow.outputs",
                    );
                }
            }
        }

        report
    }

    pub fn validate_task(&self, task: &Task) -> ValidationReport {
        let mut report = ValidationReport::default();
        self.check_task(task, &mut report);
        report
    }

    fn check_call(&self, workflow: &Workflow, call: &WorkflowCall, report: &mut ValidationReport) {
        let location = format!("call.{}", call.call_id);
        let Some(task) = workflow.task_for(call) else {
            report.push(
                Level::Warning,
                format!(
                    "Call '{}' references unknown task '{}'",
                    call.call_id, call.task_name
                ),
                location,
            );
            return;
        };

        for input in &task.inputs {
            if input.is_required() && !call.inputs.contains_key(&input.name) {
                report.push(
                    Level::Error,
                    format!(
                        "Call '{}' missing required input '{}'",
                        call.call_id, input.name
                    ),
                    location.clone(),
                );
            }
        }

        for name in call.inputs.keys() {
            if task.input(name).is_none() {
                report.push(
                    Level::Warning,
                    format!("Call '{}' provides unknown input '{}'", call.call_id, name),
                    location.clone(),
                );
            }
        }
    }

    fn check_task(&self, task: &Task, report: &mut ValidationReport) {
        let location = format!("task.{}", task.name);
        if task.name.trim().is_empty() {
            report.push(Level::Error, "Task missing name".to_string(), "");
        }

        if task.command.trim().is_empty() {
            report.push(
                Level::Error,
                format!("Task '{}' missing command", task.name),
                location.clone(),
            );
        }

        for name in task.command_references() {
            if task.input(&name).is_none() {
                report.push(
                    Level::Error,
                    format!(
                        "Task '{}' command references unknown input '{}'",
                        task.name, name
                    ),
                    format!("{}.command", location),
                );
            }
        }

        if let Some(runtime) = &task.runtime {
            for (field, value) in [("memory", &runtime.memory), ("disk", &runtime.disk)] {
                if let Some(value) = value {
                    if parse_size_mb(value).is_none() {
                        report.push(
                            Level::Warning,
                            format!("Task '{}' has invalid {} format: {}", task.name, field, value),
                            format!("{}.runtime", location),
                        );
                    }
                }
            }
        }

        if task.outputs.is_empty() {
            report.push(
                Level::Info,
                format!("Task '{}' declares no outputs", task.name),
                location,
            );
        }
    }
}

/// Bare identifiers read anywhere in the workflow body: call inputs, scatter
/// collections, conditions and output expressions. `a.b` references count
/// for neither `a` nor `b`.
fn used_names(workflow: &Workflow) -> IndexSet<String> {
    let mut texts: Vec<&str> = Vec::new();
    for call in &workflow.calls {
        texts.extend(call.inputs.values().filter_map(|b| b.as_expression()));
        texts.extend(call.scatter_items.as_deref());
        texts.extend(call.conditional.as_deref());
    }
    texts.extend(workflow.outputs.iter().filter_map(|o| o.expression.as_deref()));

    let mut names = IndexSet::new();
    for text in texts {
        for caps in BARE_NAME.captures_iter(text) {
            let Some(name) = caps.get(2) else { continue };
            if text[name.end()..].starts_with('.') {
                continue;
            }
            names.insert(name.as_str().to_string());
        }
        // placeholders inside string expressions
        for caps in INTERPOLATION.captures_iter(text) {
            if let Some(name) = caps.get(1) {
                names.insert(name.as_str().to_string());
            }
        }
    }
    names
}
