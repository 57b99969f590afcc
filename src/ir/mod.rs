//! Intermediate representation shared by both languages.
//!
//! Parsers build these types and writers read them. Tasks are owned by their
//! workflow and keyed by name; calls refer to tasks and to each other's
//! outputs by string, and those references are resolved only when needed
//! (see [`Workflow::task_for`] and [`Workflow::dependency_graph`]).

pub mod graph;
pub mod io;
pub mod runtime;
pub mod task;
pub mod validation;
pub mod workflow;

pub use graph::{DependencyGraph, GraphStatistics};
pub use io::{Binding, Input, Output};
pub use runtime::{parse_size_mb, Runtime};
pub use task::Task;
pub use validation::{Finding, Level, ValidationReport, Validator};
pub use workflow::{Import, Workflow, WorkflowCall, WorkflowKind};
