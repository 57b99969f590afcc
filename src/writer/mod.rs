//! Renderers from the intermediate representation back to source text

pub mod cwl;
pub mod wdl;

pub use cwl::CwlWriter;
pub use wdl::WdlWriter;

use crate::error::Result;
use crate::ir::{Task, Workflow};

/// A renderer of one workflow language.
pub trait Write {
    /// Render a whole document: its tasks and, unless it only holds tasks,
    /// the workflow itself.
    fn write_workflow(&self, workflow: &Workflow) -> Result<String>;

    /// Render a standalone task.
    fn write_task(&self, task: &Task) -> Result<String>;
}
